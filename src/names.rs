//! Storage names for uploaded content.
//!
//! A stored name is a random UUIDv4 in simple form followed by the
//! sanitized extension of the client's file name.

use uuid::Uuid;

const MAX_EXTENSION_LEN: usize = 16;
const SEPARATORS: &[char] = &['/', '\\'];

pub fn generate(original: &str) -> String {
    format!("{}{}", Uuid::new_v4().simple(), extension(original))
}

/// Extension of `original` including the leading dot, or an empty string.
///
/// Only the final path component is considered and only ASCII
/// alphanumerics, `-` and `_` survive, so the result can never carry a
/// separator or a traversal sequence.
pub fn extension(original: &str) -> String {
    let base = original.rsplit(SEPARATORS).next().unwrap_or("");
    let idx = match base.rfind('.') {
        Some(0) | None => return String::new(),
        Some(i) => i,
    };
    let body: String = base[idx + 1..]
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(MAX_EXTENSION_LEN)
        .collect();
    if body.is_empty() {
        String::new()
    } else {
        format!(".{body}")
    }
}

/// True when `name` can be joined onto the storage directory without
/// escaping it or addressing a hidden entry.
pub fn is_servable(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(SEPARATORS)
        && !name.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_extension() {
        let name = generate("photo.png");
        assert!(name.ends_with(".png"));
        assert_eq!(name.len(), 32 + 4);
        assert!(name[..32].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn no_extension_means_bare_identifier() {
        let name = generate("README");
        assert_eq!(name.len(), 32);
        assert!(!name.contains('.'));
        assert_eq!(extension(""), "");
    }

    #[test]
    fn only_last_extension_counts() {
        assert_eq!(extension("archive.tar.gz"), ".gz");
    }

    #[test]
    fn leading_dot_is_not_an_extension() {
        assert_eq!(extension(".bashrc"), "");
        assert_eq!(extension("dir/.hidden"), "");
    }

    #[test]
    fn lone_dot_is_dropped() {
        assert_eq!(extension("file."), "");
    }

    #[test]
    fn separators_and_traversal_are_stripped() {
        assert_eq!(extension("../../etc/passwd"), "");
        assert_eq!(extension("a.png/../../x"), "");
        assert_eq!(extension("C:\\tmp\\evil.exe"), ".exe");
        assert_eq!(extension("x.p%2F..ng"), ".ng");
        assert_eq!(extension("x.p n:g"), ".png");
        assert!(is_servable(&generate("..\\..\\boot.ini")));
    }

    #[test]
    fn extension_is_capped() {
        let ext = extension(&format!("f.{}", "a".repeat(100)));
        assert_eq!(ext.len(), 1 + MAX_EXTENSION_LEN);
    }

    #[test]
    fn names_do_not_repeat() {
        assert_ne!(generate("a.txt"), generate("a.txt"));
    }

    #[test]
    fn servable_names() {
        assert!(is_servable("0123abcd.png"));
        assert!(!is_servable(""));
        assert!(!is_servable(".env"));
        assert!(!is_servable("a/b"));
        assert!(!is_servable("a\\b"));
        assert!(!is_servable("a..b"));
    }
}
