//! Centralized path utilities
//!
//! All application paths in one place for consistency

use std::path::PathBuf;

use crate::constants;

/// Get the kernl config directory (~/.kernl)
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(constants::CONFIG_DIR_NAME)
}

/// Get the config file path (~/.kernl/config.toml)
pub fn config_file() -> PathBuf {
    config_dir().join(constants::CONFIG_FILE_NAME)
}

/// Get the default SQLite database path (~/.kernl/kernl.db)
pub fn default_database_path() -> PathBuf {
    config_dir().join(constants::DATABASE_FILE_NAME)
}

/// Ensure the config directory exists, creating it if necessary
pub fn ensure_config_dir() -> std::io::Result<PathBuf> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_live_under_config_dir() {
        let base = config_dir();
        assert!(base.ends_with(constants::CONFIG_DIR_NAME));
        assert_eq!(config_file().parent(), Some(base.as_path()));
        assert_eq!(default_database_path().parent(), Some(base.as_path()));
    }
}
