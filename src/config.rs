use std::fs;
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::DramError;

pub const DEFAULT_DRAM_CONFIG: &str = "/data/DRAM_databases/CONFIG";
pub const DEFAULT_DESCRIPTION_DB: &str = "/data/DRAM_databases/description_db.sqlite";
pub const DEFAULT_MODULE_VERSION_FILE: &str = "/kb/module/kbase.yml";
pub const DEFAULT_THREADS: usize = 4;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub workspace_url: String,
    pub scratch: String,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub ontology_url: Option<String>,
    #[serde(default)]
    pub module_version_file: Option<String>,
    #[serde(default)]
    pub dram: Option<DramEntry>,
    #[serde(default)]
    pub threads: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DramEntry {
    #[serde(default)]
    pub config_path: Option<String>,
    #[serde(default)]
    pub description_db: Option<String>,
}

/// On-disk locations of the DRAM reference databases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub config_path: Utf8PathBuf,
    pub description_db: Utf8PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            config_path: Utf8PathBuf::from(DEFAULT_DRAM_CONFIG),
            description_db: Utf8PathBuf::from(DEFAULT_DESCRIPTION_DB),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub workspace_url: String,
    pub scratch: Utf8PathBuf,
    pub callback_url: String,
    pub ontology_url: String,
    pub module_version_file: Utf8PathBuf,
    pub databases: DatabaseSettings,
    pub threads: usize,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, DramError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => std::env::var("KB_DEPLOYMENT_CONFIG")
                .map(PathBuf::from)
                .map_err(|_| DramError::MissingConfig)?,
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| DramError::ConfigRead(config_path.clone()))?;
        let mut config: Config = serde_json::from_str(&content)
            .map_err(|err| DramError::ConfigParse(err.to_string()))?;

        if let Ok(callback_url) = std::env::var("SDK_CALLBACK_URL") {
            if !callback_url.trim().is_empty() {
                config.callback_url = Some(callback_url.trim().to_string());
            }
        }

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, DramError> {
        let callback_url = config
            .callback_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                DramError::ConfigParse(
                    "callback_url is not set (config or SDK_CALLBACK_URL)".to_string(),
                )
            })?;
        if config.workspace_url.trim().is_empty() {
            return Err(DramError::ConfigParse("workspace_url is empty".to_string()));
        }

        let dram = config.dram.unwrap_or_default();
        let databases = DatabaseSettings {
            config_path: dram
                .config_path
                .map(Utf8PathBuf::from)
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_DRAM_CONFIG)),
            description_db: dram
                .description_db
                .map(Utf8PathBuf::from)
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_DESCRIPTION_DB)),
        };

        Ok(ResolvedConfig {
            workspace_url: config.workspace_url,
            scratch: Utf8PathBuf::from(config.scratch),
            ontology_url: config.ontology_url.unwrap_or_else(|| callback_url.clone()),
            callback_url,
            module_version_file: config
                .module_version_file
                .map(Utf8PathBuf::from)
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_MODULE_VERSION_FILE)),
            databases,
            threads: config.threads.filter(|n| *n > 0).unwrap_or(DEFAULT_THREADS),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ModuleFile {
    #[serde(rename = "module-version")]
    module_version: serde_yaml::Value,
}

/// Reads the `module-version` key of the SDK `kbase.yml`.
pub fn read_module_version(path: &Utf8Path) -> Result<String, DramError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|_| DramError::ConfigRead(path.as_std_path().to_path_buf()))?;
    let module: ModuleFile =
        serde_yaml::from_str(&content).map_err(|err| DramError::ConfigParse(err.to_string()))?;
    match module.module_version {
        serde_yaml::Value::String(version) => Ok(version),
        serde_yaml::Value::Number(version) => Ok(version.to_string()),
        other => Err(DramError::ConfigParse(format!(
            "module-version is not a scalar: {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn minimal() -> Config {
        Config {
            workspace_url: "https://kbase.us/services/ws".to_string(),
            scratch: "/kb/module/work/tmp".to_string(),
            callback_url: Some("http://localhost:9999".to_string()),
            ontology_url: None,
            module_version_file: None,
            dram: None,
            threads: None,
        }
    }

    #[test]
    fn resolve_defaults() {
        let resolved = ConfigLoader::resolve_config(minimal()).unwrap();
        assert_eq!(resolved.threads, DEFAULT_THREADS);
        assert_eq!(resolved.databases, DatabaseSettings::default());
        assert_eq!(resolved.ontology_url, "http://localhost:9999");
        assert_eq!(resolved.module_version_file, DEFAULT_MODULE_VERSION_FILE);
    }

    #[test]
    fn resolve_requires_callback_url() {
        let mut config = minimal();
        config.callback_url = Some("  ".to_string());
        assert_matches!(
            ConfigLoader::resolve_config(config),
            Err(DramError::ConfigParse(_))
        );
    }

    #[test]
    fn module_version_from_yaml() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("kbase.yml")).unwrap();
        fs::write(
            path.as_std_path(),
            "module-name:\n    kb_DRAM\nmodule-version:\n    0.0.2\nowners:\n    [shafferm]\n",
        )
        .unwrap();
        assert_eq!(read_module_version(&path).unwrap(), "0.0.2");
    }
}
