//! Config - 設定の読み込み
//!
//! 優先順位（後勝ち）: 組み込みデフォルト → 設定ファイル → 環境変数 `TODO__*`。
//! コマンドライン引数による上書きは CLI 側で最後に適用する。

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, Map};
use serde::{Deserialize, Serialize};

use crate::app::compactor::{
    CompactorConfig, DEFAULT_CAPACITY, DEFAULT_STORE_TIMEOUT, DEFAULT_TICK_INTERVAL,
};

pub const ENV_PREFIX: &str = "TODO";
pub const ENV_SEPARATOR: &str = "__";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactorSettings {
    pub capacity: usize,
    pub tick_interval_ms: u64,
    pub store_timeout_ms: u64,
}

impl Default for CompactorSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            tick_interval_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl CompactorSettings {
    pub fn to_compactor_config(&self) -> CompactorConfig {
        CompactorConfig {
            capacity: self.capacity,
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            store_timeout: Duration::from_millis(self.store_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    /// Database file; required for `sqlite`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub compactor: CompactorSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub log: LogSettings,
}

impl AppConfig {
    /// Defaults, then `file` (format by extension), then process env.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(file, None)
    }

    /// Like [`AppConfig::load`], but reads env vars from `env` instead of
    /// the process environment when given.
    pub fn load_with_env(
        file: Option<&Path>,
        env: Option<Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let defaults = AppConfig::default();
        let mut builder = Config::builder()
            .set_default("compactor.capacity", defaults.compactor.capacity as u64)?
            .set_default(
                "compactor.tick_interval_ms",
                defaults.compactor.tick_interval_ms,
            )?
            .set_default(
                "compactor.store_timeout_ms",
                defaults.compactor.store_timeout_ms,
            )?
            .set_default("storage.backend", "memory")?
            .set_default("log.level", defaults.log.level)?
            .set_default("log.json", defaults.log.json)?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(env),
        );

        Ok(builder.build()?.try_deserialize()?)
    }
}
