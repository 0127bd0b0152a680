use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::{fs, sync::RwLock};
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;

/// File name of the key store inside the storage directory.
pub const KEYS_FILE_NAME: &str = "authorisedKeys.json";

/// Upload tokens, persisted as a JSON array of strings.
///
/// Writers hold the lock across the disk write and only publish the new
/// sequence once it is on disk, so memory never runs ahead of the file.
pub struct KeyStore {
    path: PathBuf,
    keys: Arc<RwLock<Vec<String>>>,
}

impl KeyStore {
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        let keys: Vec<String> = match fs::read(&path).await {
            Ok(raw) => {
                info!("loading authorised keys from {}", path.display());
                serde_json::from_slice(&raw)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        persist(&path, &keys).await?;
        Ok(Self {
            path,
            keys: Arc::new(RwLock::new(keys)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn contains(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        self.keys.read().await.iter().any(|k| k == token)
    }

    pub async fn list(&self) -> Vec<String> {
        self.keys.read().await.clone()
    }

    pub async fn is_empty(&self) -> bool {
        self.keys.read().await.is_empty()
    }

    pub async fn add(&self) -> Result<String, AppError> {
        let token = Uuid::new_v4().simple().to_string();
        let added = self
            .update({
                let token = token.clone();
                move |keys| {
                    keys.push(token);
                    Some(keys.len())
                }
            })
            .await?;
        if let Some(total) = added {
            info!("authorised key added ({total} total)");
        }
        Ok(token)
    }

    /// Removes the first exact match. Returns false when `token` is absent.
    pub async fn remove(&self, token: &str) -> Result<bool, AppError> {
        let token = token.to_string();
        let removed = self
            .update(move |keys| {
                let idx = keys.iter().position(|k| *k == token)?;
                keys.remove(idx);
                Some(keys.len())
            })
            .await?;
        if let Some(left) = removed {
            info!("authorised key removed ({left} left)");
        }
        Ok(removed.is_some())
    }

    /// Applies `edit` to a copy of the keys, persists it and publishes it.
    ///
    /// The write guard moves into a spawned task, so dropping the caller
    /// cannot release the lock between the disk write and the publish.
    /// `edit` returning `None` leaves both memory and disk untouched.
    async fn update<T, F>(&self, edit: F) -> Result<Option<T>, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Vec<String>) -> Option<T> + Send + 'static,
    {
        let mut guard = self.keys.clone().write_owned().await;
        let path = self.path.clone();
        tokio::spawn(async move {
            let mut next = (*guard).clone();
            let Some(out) = edit(&mut next) else {
                return Ok(None);
            };
            persist(&path, &next).await?;
            *guard = next;
            Ok(Some(out))
        })
        .await
        .map_err(|e| AppError::Task(e.to_string()))?
    }
}

/// Whole-file replace through a sibling temp file and rename.
async fn persist(path: &Path, keys: &[String]) -> Result<(), AppError> {
    let body = serde_json::to_vec(keys)?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(), AppError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&body)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| AppError::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Task(e.to_string()))?
}
