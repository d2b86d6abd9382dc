use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let frequencies = [
        (
            "job.cancellation_check_frequency",
            config.job.cancellation_check_frequency,
        ),
        (
            "job.report_progress_db_frequency",
            config.job.report_progress_db_frequency,
        ),
        (
            "job.report_progress_log_frequency",
            config.job.report_progress_log_frequency,
        ),
        ("worker.pool_size", config.worker.pool_size),
    ];
    for (name, value) in frequencies {
        if value == 0 {
            return Err(ConfigError::Validation {
                message: format!("{} must be at least 1", name),
            });
        }
    }

    if config.job.failure_threshold > 100 {
        return Err(ConfigError::Validation {
            message: format!(
                "job.failure_threshold must be a percentage, got {}",
                config.job.failure_threshold
            ),
        });
    }

    if config.stream.max_file_bytes == 0 {
        return Err(ConfigError::Validation {
            message: "stream.max_file_bytes must be at least 1".to_string(),
        });
    }

    if !config.upstream.base_url.starts_with("http://")
        && !config.upstream.base_url.starts_with("https://")
    {
        return Err(ConfigError::Validation {
            message: format!("Invalid upstream base_url: {}", config.upstream.base_url),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
    {
        "version": "1.0",
        "efs_mount": "/mnt/efs",
        "upstream": { "base_url": "https://bfd.example/v1/fhir" }
    }
    "#;

    #[test]
    fn test_load_minimal_config_applies_defaults() {
        let config = load_config_from_str(MINIMAL).unwrap();
        assert_eq!(config.efs_mount, "/mnt/efs");
        assert_eq!(config.job.cancellation_check_frequency, 10);
        assert_eq!(config.job.report_progress_db_frequency, 100);
        assert_eq!(config.job.report_progress_log_frequency, 1000);
        assert_eq!(config.job.failure_threshold, 10);
        assert_eq!(config.job.expiration_hours, 24);
        assert_eq!(config.stream.max_file_bytes, 200 * 1024 * 1024);
        assert_eq!(config.upstream.page_size, 100);
        assert_eq!(config.upstream.retry.max_attempts, 3);
        assert_eq!(config.worker.poll_interval_ms, 1000);
        assert!(config.worker.pool_size >= 1);
        assert!(!config.logging.json);
    }

    #[test]
    fn test_settings_conversions() {
        let config = load_config_from_str(
            r#"
            {
                "version": "1.0",
                "efs_mount": "/mnt/efs",
                "job": { "failure_threshold": 25, "expiration_hours": 48 },
                "stream": { "max_file_bytes": 1024, "lock_timeout_ms": 500 },
                "upstream": {
                    "base_url": "http://localhost:8080/fhir",
                    "retry": { "max_attempts": 5, "backoff_ms": 10 }
                }
            }
            "#,
        )
        .unwrap();

        let contract = config.contract_settings();
        assert_eq!(contract.failure_threshold, 25);
        assert_eq!(contract.writer.max_file_bytes, 1024);
        assert_eq!(contract.writer.lock_timeout.as_millis(), 500);

        let job = config.job_settings();
        assert_eq!(job.expiration, chrono::Duration::hours(48));
        assert_eq!(job.efs_mount, std::path::PathBuf::from("/mnt/efs"));

        let retry = config.retry_policy();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.backoff.as_millis(), 10);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let result = load_config_from_str(&MINIMAL.replace("\"1.0\"", "\"2.0\""));
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_schema_rejects_zero_frequency() {
        let result = load_config_from_str(
            r#"
            {
                "version": "1.0",
                "efs_mount": "/mnt/efs",
                "job": { "report_progress_db_frequency": 0 },
                "upstream": { "base_url": "https://bfd.example" }
            }
            "#,
        );
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_schema_rejects_threshold_above_hundred() {
        let result = load_config_from_str(
            r#"
            {
                "version": "1.0",
                "efs_mount": "/mnt/efs",
                "job": { "failure_threshold": 101 },
                "upstream": { "base_url": "https://bfd.example" }
            }
            "#,
        );
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_schema_requires_upstream() {
        let result = load_config_from_str(r#"{"version": "1.0", "efs_mount": "/mnt/efs"}"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let result = load_config_from_str(&MINIMAL.replace("https://", "ftp://"));
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.upstream.base_url, "https://bfd.example/v1/fhir");
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = load_config("/definitely/not/here.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
