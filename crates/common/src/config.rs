use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::KdfParams;

pub const CONFIG_FILE_NAME: &str = "session.toml";

/// Per-hub session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Seconds between automatic access grant runs
    #[serde(default = "default_grant_interval_secs")]
    pub grant_interval_secs: u64,
    /// Run the automatic access grant once right after login
    #[serde(default = "default_grant_on_login")]
    pub grant_on_login: bool,
    /// How often a wrong Account Key may be entered before giving up
    #[serde(default = "default_max_account_key_attempts")]
    pub max_account_key_attempts: u32,
    /// Device type reported when registering this device
    #[serde(default = "default_device_type")]
    pub device_type: String,
    /// Argon2id work factors for wrapping user keys under the Account Key
    #[serde(default)]
    pub kdf: KdfParams,
}

fn default_grant_interval_secs() -> u64 {
    300
}

fn default_grant_on_login() -> bool {
    true
}

fn default_max_account_key_attempts() -> u32 {
    3
}

fn default_device_type() -> String {
    "DESKTOP".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grant_interval_secs: default_grant_interval_secs(),
            grant_on_login: default_grant_on_login(),
            max_account_key_attempts: default_max_account_key_attempts(),
            device_type: default_device_type(),
            kdf: KdfParams::default(),
        }
    }
}

impl SessionConfig {
    pub fn grant_interval(&self) -> Duration {
        Duration::from_secs(self.grant_interval_secs)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grant_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "grant_interval_secs must be positive".into(),
            ));
        }
        if self.max_account_key_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_account_key_attempts must be positive".into(),
            ));
        }
        if self.kdf.iterations == 0 || self.kdf.parallelism == 0 {
            return Err(ConfigError::Invalid(
                "kdf iterations and parallelism must be positive".into(),
            ));
        }
        if self.kdf.check_limits().is_err() {
            return Err(ConfigError::Invalid(
                "kdf work factors exceed what tokens may carry".into(),
            ));
        }
        if self.kdf.memory_kib < 8 * self.kdf.parallelism {
            return Err(ConfigError::Invalid(
                "kdf memory_kib must be at least 8 * parallelism".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
