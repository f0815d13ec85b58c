//! Configuration and paths

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Number of history messages requested per page
pub const HISTORY_CHUNK_SIZE: usize = 30;

/// Two messages closer than this may share a display unit
pub const CONSECUTIVE_WINDOW_MS: i64 = 60_000;

/// Separator placed between merged message bodies
pub const BODY_SEPARATOR: &str = "<br/>";

/// All configurable paths and constants
#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub history_db: PathBuf,
    pub registry_file: PathBuf,
    pub history_chunk_size: usize,
    pub consecutive_window_ms: i64,
    pub avatar_cache_size: usize,
    pub gone_to_active_ms: u64,
    pub composing_to_paused_ms: u64,
    pub paused_to_inactive_ms: u64,
    pub active_to_inactive_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let state_dir = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("convo-cache");

        Self {
            history_db: state_dir.join("history.db"),
            registry_file: state_dir.join("sessions.json"),
            state_dir,
            history_chunk_size: HISTORY_CHUNK_SIZE,
            consecutive_window_ms: CONSECUTIVE_WINDOW_MS,
            avatar_cache_size: 64,
            gone_to_active_ms: 500,
            composing_to_paused_ms: 10_000,
            paused_to_inactive_ms: 15_000,
            active_to_inactive_ms: 30_000,
        }
    }
}

/// JSON overlay; every field is optional and falls back to the defaults
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    state_dir: Option<PathBuf>,
    history_db: Option<PathBuf>,
    registry_file: Option<PathBuf>,
    history_chunk_size: Option<usize>,
    consecutive_window_ms: Option<i64>,
    avatar_cache_size: Option<usize>,
    gone_to_active_ms: Option<u64>,
    composing_to_paused_ms: Option<u64>,
    paused_to_inactive_ms: Option<u64>,
    active_to_inactive_ms: Option<u64>,
}

impl Config {
    /// Create config for testing with custom paths
    pub fn for_test(temp_dir: &Path) -> Self {
        Self {
            state_dir: temp_dir.join("state"),
            history_db: temp_dir.join("history.db"),
            registry_file: temp_dir.join("state/sessions.json"),
            history_chunk_size: HISTORY_CHUNK_SIZE,
            consecutive_window_ms: CONSECUTIVE_WINDOW_MS,
            avatar_cache_size: 8,
            gone_to_active_ms: 500,
            composing_to_paused_ms: 10_000,
            paused_to_inactive_ms: 15_000,
            active_to_inactive_ms: 30_000,
        }
    }

    /// Load a JSON config file on top of the defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::default().apply(file)
    }

    fn apply(mut self, file: ConfigFile) -> Result<Self> {
        if let Some(dir) = file.state_dir {
            // Derived paths follow the state dir unless overridden below
            self.history_db = dir.join("history.db");
            self.registry_file = dir.join("sessions.json");
            self.state_dir = dir;
        }
        if let Some(p) = file.history_db {
            self.history_db = p;
        }
        if let Some(p) = file.registry_file {
            self.registry_file = p;
        }
        if let Some(n) = file.history_chunk_size {
            if n == 0 {
                return Err(Error::Config("history_chunk_size must be > 0".into()));
            }
            self.history_chunk_size = n;
        }
        if let Some(ms) = file.consecutive_window_ms {
            if ms < 0 {
                return Err(Error::Config("consecutive_window_ms must be >= 0".into()));
            }
            self.consecutive_window_ms = ms;
        }
        if let Some(n) = file.avatar_cache_size {
            if n == 0 {
                return Err(Error::Config("avatar_cache_size must be > 0".into()));
            }
            self.avatar_cache_size = n;
        }
        self.gone_to_active_ms = file.gone_to_active_ms.unwrap_or(self.gone_to_active_ms);
        self.composing_to_paused_ms = file
            .composing_to_paused_ms
            .unwrap_or(self.composing_to_paused_ms);
        self.paused_to_inactive_ms = file
            .paused_to_inactive_ms
            .unwrap_or(self.paused_to_inactive_ms);
        self.active_to_inactive_ms = file
            .active_to_inactive_ms
            .unwrap_or(self.active_to_inactive_ms);
        Ok(self)
    }

    /// Timings handed to the chat state controller
    pub fn chat_state_timings(&self) -> crate::chat_state::Timings {
        crate::chat_state::Timings {
            gone_to_active: Duration::from_millis(self.gone_to_active_ms),
            composing_to_paused: Duration::from_millis(self.composing_to_paused_ms),
            paused_to_inactive: Duration::from_millis(self.paused_to_inactive_ms),
            active_to_inactive: Duration::from_millis(self.active_to_inactive_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.history_chunk_size, 30);
        assert_eq!(config.consecutive_window_ms, 60_000);
        assert!(config.history_db.to_string_lossy().contains("history.db"));
    }

    #[test]
    fn test_test_config() {
        let temp = std::env::temp_dir();
        let config = Config::for_test(&temp);
        assert_eq!(config.history_db, temp.join("history.db"));
    }

    #[test]
    fn test_load_overlay() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "state_dir": "/tmp/cc", "history_chunk_size": 50, "consecutive_window_ms": 5000 }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.history_chunk_size, 50);
        assert_eq!(config.consecutive_window_ms, 5000);
        assert_eq!(config.history_db, PathBuf::from("/tmp/cc/history.db"));
        // Untouched fields keep defaults
        assert_eq!(config.composing_to_paused_ms, 10_000);
    }

    #[test]
    fn test_load_rejects_zero_chunk() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, r#"{ "history_chunk_size": 0 }"#).unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_rejects_unknown_field() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, r#"{ "poll_interval_ms": 100 }"#).unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_chat_state_timings() {
        let config = Config::default();
        let timings = config.chat_state_timings();
        assert_eq!(timings.gone_to_active, Duration::from_millis(500));
        assert_eq!(timings.active_to_inactive, Duration::from_secs(30));
    }
}
