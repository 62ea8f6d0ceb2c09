use std::path::Path;

use crate::config::schema::PipelineConfig;
use crate::error::ConfigError;
use crate::guard::MAX_WINDOW_SECS;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<PipelineConfig, ConfigError> {
    let config: PipelineConfig = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &PipelineConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "max_attempts must be at least 1".to_string(),
        });
    }

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "retry.max_attempts must be at least 1".to_string(),
        });
    }
    if !(retry.multiplier >= 1.0 && retry.multiplier.is_finite()) {
        return Err(ConfigError::Validation {
            message: format!("retry.multiplier must be >= 1.0, got {}", retry.multiplier),
        });
    }
    if retry.initial_backoff_ms > retry.max_backoff_ms {
        return Err(ConfigError::Validation {
            message: "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".to_string(),
        });
    }

    if config.batch.concurrency == 0 {
        return Err(ConfigError::Validation {
            message: "batch.concurrency must be at least 1".to_string(),
        });
    }

    for (name, queue) in [("process", &config.queues.process), ("extract", &config.queues.extract)] {
        if queue.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: format!("queues.{} must not be empty", name),
            });
        }
    }

    if config.max_message_age_secs == 0 {
        return Err(ConfigError::Validation {
            message: "max_message_age_secs must be positive".to_string(),
        });
    }
    for (name, secs) in [
        ("max_message_age_secs", config.max_message_age_secs),
        ("max_clock_skew_secs", config.max_clock_skew_secs),
    ] {
        if secs > MAX_WINDOW_SECS {
            return Err(ConfigError::Validation {
                message: format!("{} must not exceed {}, got {}", name, MAX_WINDOW_SECS, secs),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchMode;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load_config_from_str(r#"{ "version": "1.0" }"#).unwrap();

        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.max_message_age_secs, 24 * 60 * 60);
        assert_eq!(config.batch.mode, BatchMode::PartialFailure);
        assert_eq!(config.queues.process, "document-process");
        assert_eq!(config.retry.multiplier, 2.0);
    }

    #[test]
    fn test_full_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "max_attempts": 5,
            "max_message_age_secs": 3600,
            "retry": { "max_attempts": 4, "initial_backoff_ms": 100, "max_backoff_ms": 2000, "multiplier": 1.5 },
            "batch": { "mode": "all_or_nothing", "concurrency": 2 },
            "queues": { "process": "proc", "extract": "ext" },
            "storage_root": "/var/lib/docpipe",
            "database_path": "/var/lib/docpipe/jobs.db"
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.batch.mode, BatchMode::AllOrNothing);
        assert_eq!(config.batch.concurrency, 2);
        assert_eq!(config.queues.extract, "ext");
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.database_path.as_deref(), Some("/var/lib/docpipe/jobs.db"));
    }

    #[test]
    fn test_rejects_unsupported_version() {
        let result = load_config_from_str(r#"{ "version": "2.0" }"#);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_rejects_shrinking_backoff() {
        let result = load_config_from_str(
            r#"{ "version": "1.0", "retry": { "multiplier": 0.5 } }"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_rejects_zero_concurrency_and_empty_queue() {
        assert!(load_config_from_str(r#"{ "version": "1.0", "batch": { "concurrency": 0 } }"#).is_err());
        assert!(load_config_from_str(r#"{ "version": "1.0", "queues": { "process": " " } }"#).is_err());
    }

    #[test]
    fn test_rejects_windows_beyond_duration_range() {
        let result =
            load_config_from_str(r#"{ "version": "1.0", "max_message_age_secs": 10000000000000000 }"#);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
        let result = load_config_from_str(r#"{ "version": "1.0", "max_clock_skew_secs": 18446744073709551615 }"#);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));

        let config = load_config_from_str(&format!(
            r#"{{ "version": "1.0", "max_message_age_secs": {} }}"#,
            MAX_WINDOW_SECS
        ))
        .unwrap();
        crate::guard::FreshnessGuard::new(config.max_message_age_secs, config.max_clock_skew_secs);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            load_config_from_str("{"),
            Err(ConfigError::ParseJson(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docpipe.json");
        std::fs::write(&path, r#"{ "version": "1.0", "max_attempts": 2 }"#).unwrap();

        assert_eq!(load_config(&path).unwrap().max_attempts, 2);
        assert!(matches!(
            load_config(dir.path().join("missing.json")),
            Err(ConfigError::ReadFile { .. })
        ));
    }
}
