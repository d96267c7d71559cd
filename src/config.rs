use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directories to scan for music files (used when `scan` has no CLI args).
    pub music_dirs: Vec<PathBuf>,
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Number of hashing workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// How long a writer waits on another process's write lock.
    pub busy_timeout_ms: u64,
    /// Scanner behaviour.
    pub scan: ScanConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            music_dirs: Vec::new(),
            db_path: None,
            workers: 0,
            busy_timeout_ms: 5000,
            scan: ScanConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Tombstone catalogued files under a scanned root that are gone from disk.
    pub tombstone_missing: bool,
    /// Follow symlinks while walking music directories.
    pub follow_links: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            tombstone_missing: true,
            follow_links: true,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/tapeshelf/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// CLI flag first, then the config file, then the XDG data dir.
    pub fn resolve_db_path(&self, cli: Option<PathBuf>) -> PathBuf {
        cli.or_else(|| self.db_path.clone())
            .unwrap_or_else(default_db_path)
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("tapeshelf.db")
    } else {
        // Fallback: current directory
        PathBuf::from("tapeshelf.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = AppConfig::parse("").unwrap();
        assert!(cfg.music_dirs.is_empty());
        assert_eq!(cfg.busy_timeout_ms, 5000);
        assert!(cfg.scan.tombstone_missing);
        assert!(cfg.scan.follow_links);
        assert!(cfg.resolve_workers() >= 1);
    }

    #[test]
    fn test_partial_config() {
        let cfg = AppConfig::parse(
            r#"
            music_dirs = ["/srv/music"]
            workers = 3
            busy_timeout_ms = 250

            [scan]
            tombstone_missing = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.music_dirs, vec![PathBuf::from("/srv/music")]);
        assert_eq!(cfg.resolve_workers(), 3);
        assert_eq!(cfg.busy_timeout(), Duration::from_millis(250));
        assert!(!cfg.scan.tombstone_missing);
        assert!(cfg.scan.follow_links);
    }

    #[test]
    fn test_db_path_precedence() {
        let cfg = AppConfig::parse(r#"db_path = "/cfg/lib.db""#).unwrap();
        assert_eq!(
            cfg.resolve_db_path(Some(PathBuf::from("/cli.db"))),
            PathBuf::from("/cli.db")
        );
        assert_eq!(cfg.resolve_db_path(None), PathBuf::from("/cfg/lib.db"));
    }
}
