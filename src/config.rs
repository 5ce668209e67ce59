/// Environment configuration.
///
/// Variables are read from the process environment; when the plugin variable
/// is unset, a `.env-issuer` file in the working directory is loaded first.
use std::path::PathBuf;

use crate::error::{KmsError, Result};
use crate::storage::local::DEFAULT_STORAGE_DIR;

pub const ENV_KMS_PLUGIN: &str = "ISSUER_KMS_PLUGIN";
pub const ENV_LOCAL_STORAGE_FILE_PATH: &str = "ISSUER_KMS_PLUGIN_LOCAL_STORAGE_FILE_PATH";
pub const ENV_FILE: &str = ".env-issuer";

/// Storage plugin selected for operator tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KmsPlugin {
    LocalStorage,
}

impl KmsPlugin {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "localstorage" => Ok(KmsPlugin::LocalStorage),
            other => Err(KmsError::backend(
                "config",
                format!("unsupported {ENV_KMS_PLUGIN} value: {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub plugin: KmsPlugin,
    /// Directory holding the local storage file.
    pub local_storage_dir: PathBuf,
}

impl Config {
    /// Read configuration from the environment, falling back to
    /// `.env-issuer` when the plugin variable is unset.
    pub fn load() -> Result<Self> {
        if std::env::var(ENV_KMS_PLUGIN).is_err() {
            let _ = dotenvy::from_filename(ENV_FILE);
        }

        let plugin = std::env::var(ENV_KMS_PLUGIN)
            .map_err(|_| KmsError::backend("config", format!("{ENV_KMS_PLUGIN} is not set")))?;
        let plugin = KmsPlugin::parse(&plugin)?;

        let local_storage_dir = std::env::var(ENV_LOCAL_STORAGE_FILE_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORAGE_DIR));

        Ok(Self {
            plugin,
            local_storage_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_parse() {
        assert_eq!(
            KmsPlugin::parse("localstorage").unwrap(),
            KmsPlugin::LocalStorage
        );
        assert!(KmsPlugin::parse("vault").is_err());
        assert!(KmsPlugin::parse("").is_err());
    }
}
