use eyre::Result;
use serde::{Deserialize, Serialize};

#[allow(unused_imports)]
use super::CONFIG;

use super::constants::LOG_FILE_PATH;
use super::defaults::*;

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Configuration {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub transcript: TranscriptConfig,

    #[serde(default)]
    pub metadata: MetadataConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GeneralConfig {
    /// Owner identity used to scope conversations in the store.
    #[serde(default = "user")]
    pub user: String,

    #[serde(default)]
    pub verbose: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LogConfig {
    #[serde(default = "log_level")]
    pub level: Option<String>,

    #[serde(default)]
    pub filters: Option<Vec<LogFilter>>,

    #[serde(default)]
    pub file: LogFile,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LogFilter {
    #[serde(default)]
    pub module: Option<String>,

    #[serde(default)]
    pub level: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LogFile {
    #[serde(default = "log_file_path")]
    pub path: String,

    #[serde(default)]
    pub append: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "generator_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "generator_model")]
    pub model: String,

    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub enum StoreConfig {
    #[serde(rename = "sqlite")]
    Sqlite(SqliteStore),
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SqliteStore {
    pub path: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TranscriptConfig {
    #[serde(default = "transcript_endpoint")]
    pub endpoint: String,

    /// Basic auth token for the transcript service. Requests fail before
    /// any upstream call when unset.
    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MetadataConfig {
    #[serde(default = "metadata_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Configuration {
    #[cfg(not(test))]
    pub fn instance() -> &'static Configuration {
        CONFIG.get().expect("Config not initialized")
    }

    #[cfg(not(test))]
    pub fn init(config: Configuration) -> Result<()> {
        CONFIG
            .set(config)
            .map_err(|_| eyre::eyre!("Config already initialized"))?;
        Ok(())
    }

    #[cfg(test)]
    pub fn instance() -> &'static Configuration {
        use super::TEST_CONFIG;
        TEST_CONFIG.with(|config| *config.borrow())
    }

    #[cfg(test)]
    pub fn init(config: Configuration) -> Result<()> {
        use super::TEST_CONFIG;
        TEST_CONFIG.with(|test_config| {
            *test_config.borrow_mut() = Box::leak(Box::new(config));
        });
        Ok(())
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            log: LogConfig::default(),
            generator: GeneratorConfig::default(),
            store: StoreConfig::default(),
            transcript: TranscriptConfig::default(),
            metadata: MetadataConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            user: user(),
            verbose: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Some("info".to_string()),
            file: LogFile::default(),
            filters: None,
        }
    }
}

impl Default for LogFile {
    fn default() -> Self {
        Self {
            path: LOG_FILE_PATH.to_string(),
            append: false,
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: generator_endpoint(),
            api_key: None,
            model: generator_model(),
            timeout_secs: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Sqlite(SqliteStore::default())
    }
}

impl Default for SqliteStore {
    fn default() -> Self {
        Self { path: None }
    }
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            endpoint: transcript_endpoint(),
            api_token: None,
            timeout_secs: None,
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            endpoint: metadata_endpoint(),
            timeout_secs: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: poll_interval_secs(),
        }
    }
}
