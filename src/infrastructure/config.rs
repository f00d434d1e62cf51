//! Configuration loader with hierarchical merging.
//!
//! Precedence (lowest to highest): built-in defaults, YAML file, environment
//! variables prefixed `MAESTRO_`. The loader produces the typed `CoreConfig`
//! the core consumes; nothing inside the core reads files or the
//! environment.

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::CoreConfig;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from the default location (`maestro.yaml` in the working
    /// directory) when present, plus environment overrides.
    pub fn load() -> CoreResult<CoreConfig> {
        Self::load_from(Path::new("maestro.yaml"))
    }

    /// Load from an explicit YAML path (skipped when missing) plus
    /// environment overrides.
    pub fn load_from(path: &Path) -> CoreResult<CoreConfig> {
        let mut figment = Figment::from(Serialized::defaults(CoreConfig::default()));
        if path.exists() {
            figment = figment.merge(Yaml::file(path));
        }
        let config: CoreConfig = figment
            .merge(Env::prefixed("MAESTRO_").split("__"))
            .extract()
            .map_err(|e| CoreError::InvalidInput(format!("configuration error: {e}")))?;

        validate(&config)?;
        Ok(config)
    }
}

fn validate(config: &CoreConfig) -> CoreResult<()> {
    if config.memory_db_path.trim().is_empty() {
        return Err(CoreError::InvalidInput(
            "memory_db_path cannot be empty".into(),
        ));
    }
    if config.rate_limit.max_tokens < 0.0 || config.rate_limit.refill_rate <= 0.0 {
        return Err(CoreError::InvalidInput(
            "rate limit tokens and refill rate must be positive".into(),
        ));
    }
    if config.breaker.failure_threshold == 0 || config.breaker.success_threshold == 0 {
        return Err(CoreError::InvalidInput(
            "breaker thresholds must be at least 1".into(),
        ));
    }
    if let Some(ref active) = config.active_provider {
        if !config.providers.iter().any(|p| &p.name == active) {
            return Err(CoreError::InvalidInput(format!(
                "active provider '{active}' is not in the provider list"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_when_no_file() {
        let config = ConfigLoader::load_from(Path::new("/nonexistent/maestro.yaml")).unwrap();
        assert_eq!(config.memory_db_path, "data/memory.db");
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(
            file,
            "memory_db_path: /tmp/other.db\nbreaker:\n  failure_threshold: 3\n  cooldown_ms: 1000\n  success_threshold: 1\n"
        )
        .unwrap();

        let config = ConfigLoader::load_from(file.path()).unwrap();
        assert_eq!(config.memory_db_path, "/tmp/other.db");
        assert_eq!(config.breaker.failure_threshold, 3);
        // Untouched sections keep defaults.
        assert_eq!(config.checkpoint_dir, "workflow/reports");
    }

    #[test]
    fn test_unknown_active_provider_rejected() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "active_provider: ghost\n").unwrap();
        assert!(ConfigLoader::load_from(file.path()).is_err());
    }
}
