//! Configuration Loader
//!
//! Environment-aware loading: detect the environment, read the matching TOML
//! file if one exists, then apply `DOCFLOW__`-prefixed environment variable
//! overrides. Missing files fall back to the documented defaults; a present
//! but invalid file is an error, never a silent fallback.

use super::{ConfigResult, ConfigurationError, DocflowConfig};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Loaded configuration plus the environment it was resolved for
pub struct ConfigManager {
    config: DocflowConfig,
    environment: String,
}

impl ConfigManager {
    /// Load with environment auto-detection and the default config directory
    pub fn load() -> ConfigResult<Self> {
        Self::load_from_directory(Path::new("config"))
    }

    /// Load from a specific directory, preferring the environment-specific
    /// file (`docflow.<env>.toml`) over the shared one (`docflow.toml`).
    pub fn load_from_directory(config_dir: &Path) -> ConfigResult<Self> {
        let environment = Self::detect_environment();

        let shared = config_dir.join("docflow.toml");
        let env_specific = config_dir.join(format!("docflow.{environment}.toml"));
        debug!(
            environment = %environment,
            shared = %shared.display(),
            env_specific = %env_specific.display(),
            "Resolving configuration sources"
        );

        let config = Self::build(&[shared, env_specific])?;
        config.validate()?;

        info!(environment = %environment, "✅ Configuration loaded");
        Ok(Self {
            config,
            environment,
        })
    }

    fn build(files: &[PathBuf]) -> ConfigResult<DocflowConfig> {
        let mut builder = config::Config::builder();
        for file in files {
            builder = builder.add_source(
                config::File::from(file.as_path())
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix("DOCFLOW")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|raw| raw.try_deserialize::<DocflowConfig>())
            .map_err(|e| ConfigurationError::Load(e.to_string()))
    }

    /// Environment from `DOCFLOW_ENV`, then `APP_ENV`, defaulting to
    /// development
    pub fn detect_environment() -> String {
        env::var("DOCFLOW_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    pub fn config(&self) -> &DocflowConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::load_from_directory(dir.path()).unwrap();
        assert_eq!(manager.config().stages.translation.consumers, 12);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("docflow.toml")).unwrap();
        writeln!(
            file,
            "[stages.translation]\nconsumers = 4\nendpoint = \"http://translate:9000/invoke\"\n\n[failure_router]\nretention = \"hold\""
        )
        .unwrap();

        let manager = ConfigManager::load_from_directory(dir.path()).unwrap();
        let config = manager.config();
        assert_eq!(config.stages.translation.consumers, 4);
        assert_eq!(
            config.stages.translation.endpoint,
            "http://translate:9000/invoke"
        );
        assert_eq!(
            config.failure_router.retention,
            crate::orchestration::ErrorRetention::Hold
        );
        // Untouched sections keep their defaults
        assert_eq!(config.stages.ocr.consumers, 3);
    }

    #[test]
    fn invalid_file_is_an_error_not_a_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("docflow.toml"), "stages = \"not a table\"").unwrap();
        assert!(ConfigManager::load_from_directory(dir.path()).is_err());
    }
}
