use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;
use tracing::info;

use crate::error::AppError;

/// Effective server configuration. Fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub file_store: PathBuf,
    /// Literal caller addresses allowed on `/admin`. Empty denies everyone.
    pub admin_ips: Vec<String>,
    pub require_api_key: bool,
    pub max_upload_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
            file_store: PathBuf::from("files/"),
            admin_ips: vec!["127.0.0.1".to_string(), "::1".to_string()],
            require_api_key: true,
            max_upload_bytes: 1024 * 1024 * 1024,
        }
    }
}

/// Fills keys missing from `doc` with the defaults. Present keys are kept as is.
fn merge_defaults(doc: &mut Map<String, Value>) -> Result<(), AppError> {
    let Value::Object(defaults) = serde_json::to_value(Config::default())? else {
        return Err(AppError::Config("defaults are not an object".to_string()));
    };
    for (key, value) in defaults {
        doc.entry(key).or_insert(value);
    }
    Ok(())
}

/// Reads the document at `path` (if any), merges it over the defaults and
/// writes the merged document back. `store_override` replaces the storage
/// directory in the returned config only, never in the persisted document.
/// The storage directory is created before returning.
pub async fn load(path: &Path, store_override: Option<PathBuf>) -> Result<Config, AppError> {
    let mut doc = match fs::read(path).await {
        Ok(raw) => {
            info!("opening existing configuration file at {}", path.display());
            match serde_json::from_slice::<Value>(&raw)? {
                Value::Object(map) => map,
                other => {
                    return Err(AppError::Config(format!(
                        "{} must hold a JSON object, found {other}",
                        path.display()
                    )))
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(
                "configuration file at {} not found, a new one will be created",
                path.display()
            );
            Map::new()
        }
        Err(e) => return Err(e.into()),
    };
    merge_defaults(&mut doc)?;

    let mut config: Config = serde_json::from_value(Value::Object(doc.clone()))?;
    fs::write(path, serde_json::to_vec_pretty(&doc)?).await?;

    if let Some(dir) = store_override {
        config.file_store = dir;
    }
    if fs::metadata(&config.file_store).await.is_err() {
        info!("creating file store at {}", config.file_store.display());
    }
    fs::create_dir_all(&config.file_store).await?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_doc(path: &Path) -> Map<String, Value> {
        let raw = fs::read(path).await.unwrap();
        serde_json::from_slice(&raw).unwrap()
    }

    #[tokio::test]
    async fn missing_file_yields_defaults_and_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = dir.path().join("files");
        let cfg = load(&path, Some(store.clone())).await.unwrap();

        assert_eq!(cfg.port, 3000);
        assert!(cfg.require_api_key);
        assert_eq!(cfg.admin_ips, vec!["127.0.0.1", "::1"]);
        assert!(store.is_dir());

        let doc = read_doc(&path).await;
        for key in ["port", "host", "fileStore", "adminIps", "requireApiKey", "maxUploadBytes"] {
            assert!(doc.contains_key(key), "missing {key}");
        }
    }

    #[tokio::test]
    async fn present_keys_win() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = dir.path().join("nested/store");
        let raw = serde_json::json!({
            "port": 8080,
            "fileStore": store,
            "adminIps": [],
            "extra": "kept"
        });
        fs::write(&path, raw.to_string()).await.unwrap();

        let cfg = load(&path, None).await.unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.file_store, store);
        assert!(cfg.admin_ips.is_empty());
        assert_eq!(cfg.host, "0.0.0.0");
        assert!(store.is_dir());

        let doc = read_doc(&path).await;
        assert_eq!(doc["port"], 8080);
        assert_eq!(doc["extra"], "kept");
        assert_eq!(doc["requireApiKey"], true);
    }

    #[tokio::test]
    async fn override_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let from_doc = dir.path().join("doc-store");
        let from_env = dir.path().join("env-store");
        fs::write(&path, serde_json::json!({ "fileStore": from_doc }).to_string())
            .await
            .unwrap();

        let cfg = load(&path, Some(from_env.clone())).await.unwrap();
        assert_eq!(cfg.file_store, from_env);
        assert!(from_env.is_dir());
        assert_eq!(read_doc(&path).await["fileStore"], serde_json::json!(from_doc));
    }

    #[tokio::test]
    async fn malformed_document_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{\"port\": ").await.unwrap();
        assert!(matches!(load(&path, None).await, Err(AppError::Json(_))));
    }

    #[tokio::test]
    async fn non_object_document_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "[1, 2]").await.unwrap();
        assert!(matches!(load(&path, None).await, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn ill_typed_value_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"port": "eighty"}"#).await.unwrap();
        assert!(matches!(load(&path, None).await, Err(AppError::Json(_))));
    }

    #[tokio::test]
    async fn unwritable_store_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"file").await.unwrap();
        assert!(matches!(
            load(&path, Some(blocker.join("store"))).await,
            Err(AppError::Io(_))
        ));
    }
}
