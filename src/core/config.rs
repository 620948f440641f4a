//! Board configuration: defaults, then `<root>/board.toml`, then environment.

use crate::core::error::BoardError;
use crate::core::schemas;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TTL_SECS: u64 = 300;
pub const DEFAULT_BOARD_DIR: &str = ".claimboard";
pub const DIR_ENV: &str = "CLAIMBOARD_DIR";
pub const TTL_ENV: &str = "CLAIMBOARD_DEFAULT_TTL_SECS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoardConfig {
    /// Board storage location. Never read from `board.toml` itself.
    #[serde(skip)]
    pub root: PathBuf,
    /// TTL applied to claims that do not specify one.
    pub default_ttl_secs: u64,
    /// `sync_data` after every event append and document write.
    pub fsync: bool,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_BOARD_DIR),
            default_ttl_secs: DEFAULT_TTL_SECS,
            fsync: true,
        }
    }
}

impl BoardConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Defaults, overlaid with `<root>/board.toml` when present, then `CLAIMBOARD_DEFAULT_TTL_SECS`.
    pub fn load(root: &Path) -> Result<Self, BoardError> {
        let path = root.join(schemas::CONFIG_FILE_NAME);
        let mut config = match fs::read_to_string(&path) {
            Ok(raw) => Self::parse(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(BoardError::IoError(e)),
        };
        config.root = root.to_path_buf();
        config.apply_overrides(std::env::var(TTL_ENV).ok().as_deref())?;
        Ok(config)
    }

    /// Resolves the root from `CLAIMBOARD_DIR` (or `.claimboard`) and loads it.
    pub fn from_env() -> Result<Self, BoardError> {
        let root = std::env::var(DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_BOARD_DIR));
        Self::load(&root)
    }

    pub fn parse(raw: &str) -> Result<Self, BoardError> {
        let config: BoardConfig = toml::from_str(raw)
            .map_err(|e| BoardError::ConfigError(format!("invalid board.toml: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, ttl_secs: Option<&str>) -> Result<(), BoardError> {
        if let Some(raw) = ttl_secs {
            self.default_ttl_secs = raw.trim().parse::<u64>().map_err(|_| {
                BoardError::ConfigError(format!("{} must be a positive integer, got '{}'", TTL_ENV, raw))
            })?;
        }
        self.check()
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_secs = ttl.as_secs();
        self
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    fn check(&self) -> Result<(), BoardError> {
        if self.default_ttl_secs == 0 {
            return Err(BoardError::ConfigError(
                "default_ttl_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
