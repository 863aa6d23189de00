//! Cross-platform directory path resolution
//!
//! - Linux/macOS: XDG Base Directory specification (~/.config, ~/.cache)
//! - Windows: Known Folder API (AppData\Roaming, AppData\Local)

use std::path::{Path, PathBuf};

/// Get the configuration directory path
///
/// Checks SHIPYARD_CONFIG_DIR first, then falls back to:
/// - Unix (Linux/macOS): XDG_CONFIG_HOME/shipyard or ~/.config/shipyard
/// - Windows: %APPDATA%\shipyard\config
pub fn config_dir() -> PathBuf {
    std::env::var("SHIPYARD_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(windows)]
            {
                use directories::ProjectDirs;
                ProjectDirs::from("", "", "shipyard")
                    .map(|dirs| dirs.config_dir().to_path_buf())
                    .unwrap_or_else(|| PathBuf::from(".").join(".config").join("shipyard"))
            }
            #[cfg(not(windows))]
            {
                use directories::BaseDirs;
                std::env::var("XDG_CONFIG_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        BaseDirs::new()
                            .map(|dirs| dirs.home_dir().join(".config"))
                            .unwrap_or_else(|| PathBuf::from(".").join(".config"))
                    })
                    .join("shipyard")
            }
        })
}

/// Get the cache directory path
///
/// - Unix (Linux/macOS): XDG_CACHE_HOME/shipyard or ~/.cache/shipyard
/// - Windows: %LOCALAPPDATA%\shipyard\cache
pub fn cache_dir() -> PathBuf {
    #[cfg(windows)]
    {
        use directories::ProjectDirs;
        ProjectDirs::from("", "", "shipyard")
            .map(|dirs| dirs.cache_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".").join(".cache").join("shipyard"))
    }
    #[cfg(not(windows))]
    {
        use directories::BaseDirs;
        std::env::var("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                BaseDirs::new()
                    .map(|dirs| dirs.home_dir().join(".cache"))
                    .unwrap_or_else(|| PathBuf::from(".").join(".cache"))
            })
            .join("shipyard")
    }
}

/// Get the root configuration file path
pub fn root_config_path() -> PathBuf {
    config_dir().join("config.yaml")
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
