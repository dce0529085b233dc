use dirs::home_dir;
use std::path::{Path, PathBuf};

/// Returns the configuration directory, or None if the user's home cannot be resolved.
pub fn try_up_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("UP_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".up"))
}

/// Returns the up home directory (`~/.up`), falling back to `./.up` when no
/// home directory exists.
pub fn up_home() -> PathBuf {
    try_up_home().unwrap_or_else(|| PathBuf::from(".up"))
}

/// Config file: ~/.up/config.toml
pub fn config_path() -> PathBuf {
    up_home().join("config.toml")
}

/// Package cache: ~/.up/cache, or `UP_CACHE_DIR`
pub fn cache_path() -> PathBuf {
    match std::env::var("UP_CACHE_DIR") {
        Ok(dir) if !dir.is_empty() => expand_tilde(&dir),
        _ => up_home().join("cache"),
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        },
        _ => PathBuf::from(path),
    }
}

/// Directory name used for a version inside the cache. Digests contain `:`
/// which is not portable in file names.
pub fn escape_version(version: &str) -> String {
    version.replace(':', "_")
}

/// Inverse of [`escape_version`].
pub fn unescape_version(dir: &str) -> String {
    match dir.split_once('_') {
        Some((alg, hex))
            if !alg.is_empty()
                && alg.chars().all(|c| c.is_ascii_alphanumeric())
                && hex.len() >= 32
                && hex.chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            format!("{alg}:{hex}")
        }
        _ => dir.to_string(),
    }
}

/// Project-local models directory: `<project dir>/.up`
pub fn models_dir(project_file: &Path) -> PathBuf {
    project_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join(".up")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_escaping() {
        let digest = format!("sha256:{}", "ab".repeat(32));
        let escaped = escape_version(&digest);
        assert!(!escaped.contains(':'));
        assert_eq!(unescape_version(&escaped), digest);
        assert_eq!(unescape_version("v1.0.0"), "v1.0.0");
        assert_eq!(unescape_version("v1.0.0-rc_1"), "v1.0.0-rc_1");
    }

    #[test]
    fn test_models_dir() {
        assert_eq!(models_dir(Path::new("upbound.yaml")), PathBuf::from("./.up"));
        assert_eq!(
            models_dir(Path::new("/work/proj/upbound.yaml")),
            PathBuf::from("/work/proj/.up")
        );
    }

    #[test]
    fn test_expand_tilde_passthrough() {
        assert_eq!(expand_tilde("/tmp/cache"), PathBuf::from("/tmp/cache"));
        assert_eq!(expand_tilde("~user/x"), PathBuf::from("~user/x"));
    }
}
