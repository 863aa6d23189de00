//! Configuration loading and merging logic
//!
//! Precedence order (highest to lowest):
//! 1. Command line flags
//! 2. Environment variable overrides
//! 3. Config file
//! 4. Built-in defaults

use super::{paths, schema::Config};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub namespace: Option<String>,
    pub workers: Option<usize>,
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with all layers merged
    ///
    /// An explicit `path` must exist; the default config file is optional.
    pub fn load(path: Option<&Path>, overrides: &CliOverrides) -> Result<Config> {
        let mut config = match path {
            Some(path) => Self::load_file(path)?,
            None => {
                let root = paths::root_config_path();
                if root.exists() {
                    Self::load_file(&root)?
                } else {
                    Config::default()
                }
            }
        };

        config = Self::apply_env_overrides(config, |key| std::env::var(key).ok())?;
        config = Self::apply_cli_overrides(config, overrides);
        Self::validate(&config)?;

        Ok(config)
    }

    /// Load configuration from a file
    pub fn load_file(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// The file `load` reads when no explicit path is given
    pub fn default_path() -> PathBuf {
        paths::root_config_path()
    }

    /// Check values serde cannot check on its own
    pub fn validate(config: &Config) -> Result<()> {
        if config.namespace.is_empty() {
            return Err(anyhow::anyhow!("namespace must not be empty"));
        }
        if config.workers == 0 {
            return Err(anyhow::anyhow!("workers must be at least 1"));
        }
        if config.backoff.base_millis == 0 {
            return Err(anyhow::anyhow!("backoff.baseMillis must be at least 1"));
        }
        if config.backoff.max() < config.backoff.base() {
            return Err(anyhow::anyhow!(
                "backoff.maxSeconds ({}s) is shorter than backoff.baseMillis ({}ms)",
                config.backoff.max_seconds,
                config.backoff.base_millis
            ));
        }
        if config.resync_seconds == 0 {
            return Err(anyhow::anyhow!("resyncSeconds must be at least 1"));
        }
        crate::controller::selected_controllers(
            &config.enabled_controllers,
            &config.disabled_controllers,
        )?;
        Ok(())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(
        mut config: Config,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Config> {
        if let Some(namespace) = lookup("SHIPYARD_NAMESPACE") {
            config.namespace = namespace;
        }

        if let Some(workers) = lookup("SHIPYARD_WORKERS") {
            config.workers = workers
                .parse()
                .with_context(|| format!("SHIPYARD_WORKERS must be a number, got {:?}", workers))?;
        }

        if let Some(dir) = lookup("SHIPYARD_CHART_CACHE_DIR") {
            config.chart_cache_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    fn apply_cli_overrides(mut config: Config, overrides: &CliOverrides) -> Config {
        if let Some(namespace) = &overrides.namespace {
            config.namespace = namespace.clone();
        }
        if let Some(workers) = overrides.workers {
            config.workers = workers;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_load_file_and_cli_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "namespace: fleet\nworkers: 3\n").unwrap();

        let config = ConfigLoader::load_file(&path).unwrap();
        assert_eq!(config.namespace, "fleet");

        let overrides = CliOverrides {
            namespace: None,
            workers: Some(7),
        };
        let config = ConfigLoader::apply_cli_overrides(config, &overrides);
        assert_eq!(config.namespace, "fleet");
        assert_eq!(config.workers, 7);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(ConfigLoader::load(Some(&missing), &CliOverrides::default()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SHIPYARD_NAMESPACE", "clusters"),
            ("SHIPYARD_WORKERS", "4"),
            ("SHIPYARD_CHART_CACHE_DIR", "/var/cache/charts"),
        ]
        .into_iter()
        .collect();

        let config = ConfigLoader::apply_env_overrides(Config::default(), |key| {
            env.get(key).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(config.namespace, "clusters");
        assert_eq!(config.workers, 4);
        assert_eq!(config.chart_cache_dir, PathBuf::from("/var/cache/charts"));
    }

    #[test]
    fn test_env_workers_must_parse() {
        let result = ConfigLoader::apply_env_overrides(Config::default(), |key| {
            (key == "SHIPYARD_WORKERS").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validate() {
        assert!(ConfigLoader::validate(&Config::default()).is_ok());

        let config = Config {
            workers: 0,
            ..Default::default()
        };
        assert!(ConfigLoader::validate(&config).is_err());

        let config = Config {
            enabled_controllers: vec!["janitor".into()],
            ..Default::default()
        };
        assert!(ConfigLoader::validate(&config).is_err());
    }
}
