//! Application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Config | `~/Library/Application Support/puml-render/` | `~/.config/puml-render/` |
//! | Cache | `~/Library/Caches/puml-render/` | `~/.cache/puml-render/` |
//!
//! # Environment Overrides
//!
//! - `PUML_RENDER_CONFIG_DIR` overrides [`config_dir`]
//! - `PUML_RENDER_CACHE_DIR` overrides [`cache_dir`]

use std::path::PathBuf;

const APP_DIR: &str = "puml-render";

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("PUML_RENDER_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| std::env::temp_dir().join("puml-render-config"))
}

/// Application cache directory, home of the artifact database.
#[must_use]
pub fn cache_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("PUML_RENDER_CACHE_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::cache_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| std::env::temp_dir().join("puml-render-cache"))
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Artifact database path (`cache_dir()/artifacts.db`).
#[must_use]
pub fn cache_db() -> PathBuf {
    cache_dir().join("artifacts.db")
}

/// The user's home directory, used for `~` expansion.
#[must_use]
pub fn home_dir() -> Option<PathBuf> {
    dirs::home_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_ends_with_config_toml() {
        let path = config_file();
        let s = path.to_string_lossy();
        assert!(s.ends_with("config.toml"), "config_file: {s}");
    }

    #[test]
    fn cache_db_is_inside_cache_dir() {
        let db = cache_db();
        assert!(db.starts_with(cache_dir()));
        assert!(db.to_string_lossy().ends_with("artifacts.db"));
    }

    #[test]
    fn config_dir_override_via_env() {
        let key = "PUML_RENDER_CONFIG_DIR";
        let original = std::env::var_os(key);

        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var(key, "/custom/config") };
        assert_eq!(config_dir(), PathBuf::from("/custom/config"));

        match original {
            Some(val) => unsafe { std::env::set_var(key, val) },
            None => unsafe { std::env::remove_var(key) },
        }
    }
}
