//! Engine configuration module
//!
//! Handles loading and validating configuration from environment variables.

use std::time::Duration;

use thiserror::Error;

use crate::analysis::risk::{Classification, RiskAssessment};
use crate::sql::SqlDialect;

/// Smallest and largest traversal depth a caller may request.
pub const MIN_DEPTH: u8 = 1;
pub const MAX_DEPTH: u8 = 10;
pub const DEFAULT_DEPTH: u8 = 3;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load environment variables: {0}")]
    EnvLoad(#[from] dotenvy::Error),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Analysis defaults
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    pub max_depth: u8,
    /// Wall-clock budget for dependency traversal, if any
    pub lookup_timeout: Option<Duration>,
    pub sql_dialect: SqlDialect,
    pub include_downstream: bool,
    pub include_upstream: bool,
    pub fail_on: Classification,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_DEPTH,
            lookup_timeout: None,
            sql_dialect: SqlDialect::Snowflake,
            include_downstream: true,
            include_upstream: true,
            fail_on: Classification::High,
        }
    }
}

impl AnalysisConfig {
    /// Gate for CI: true when `assessment` reaches the configured `fail_on` level
    pub fn should_fail(&self, assessment: &RiskAssessment) -> bool {
        assessment.exceeds(self.fail_on)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive string
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,schemaflow_risk=debug".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Complete engine settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub analysis: AnalysisConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup
    pub fn from_source<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AnalysisConfig::default();

        let max_depth = match get("SCHEMAFLOW_MAX_DEPTH") {
            Some(raw) => parse_depth(&raw)?,
            None => defaults.max_depth,
        };

        let lookup_timeout = get("SCHEMAFLOW_LOOKUP_TIMEOUT_MS")
            .map(|raw| {
                raw.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| {
                    ConfigError::InvalidValue(format!(
                        "SCHEMAFLOW_LOOKUP_TIMEOUT_MS must be a number of milliseconds, got '{}'",
                        raw
                    ))
                })
            })
            .transpose()?;

        let sql_dialect = match get("SCHEMAFLOW_SQL_DIALECT") {
            Some(raw) => raw.parse().map_err(ConfigError::InvalidValue)?,
            None => defaults.sql_dialect,
        };

        let fail_on = match get("SCHEMAFLOW_FAIL_ON") {
            Some(raw) => raw.parse().map_err(ConfigError::InvalidValue)?,
            None => defaults.fail_on,
        };

        let analysis = AnalysisConfig {
            max_depth,
            lookup_timeout,
            sql_dialect,
            include_downstream: parse_flag(&get, "SCHEMAFLOW_INCLUDE_DOWNSTREAM", true)?,
            include_upstream: parse_flag(&get, "SCHEMAFLOW_INCLUDE_UPSTREAM", true)?,
            fail_on,
        };

        let format = match get("SCHEMAFLOW_LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("compact") => LogFormat::Compact,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "SCHEMAFLOW_LOG_FORMAT must be 'compact' or 'json', got '{}'",
                    other
                )))
            }
        };

        let logging = LoggingConfig {
            filter: get("SCHEMAFLOW_LOG").unwrap_or_else(|| LoggingConfig::default().filter),
            format,
        };

        Ok(Self { analysis, logging })
    }
}

/// Parse a traversal depth, rejecting anything outside 1..=10
pub fn parse_depth(raw: &str) -> Result<u8, ConfigError> {
    let depth: u8 = raw.trim().parse().map_err(|_| {
        ConfigError::InvalidValue(format!("max_depth must be an integer, got '{}'", raw))
    })?;

    if !(MIN_DEPTH..=MAX_DEPTH).contains(&depth) {
        return Err(ConfigError::InvalidValue(format!(
            "max_depth must be {}-{}, got {}",
            MIN_DEPTH, MAX_DEPTH, depth
        )));
    }
    Ok(depth)
}

fn parse_flag<F>(get: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(format!(
                "{} must be a boolean, got '{}'",
                key, raw
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn source(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_analysis_config() {
        let settings = Settings::from_source(source(&[])).unwrap();
        assert_eq!(settings.analysis, AnalysisConfig::default());
        assert_eq!(settings.analysis.max_depth, 3);
        assert_eq!(settings.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_overrides_from_source() {
        let settings = Settings::from_source(source(&[
            ("SCHEMAFLOW_MAX_DEPTH", "5"),
            ("SCHEMAFLOW_LOOKUP_TIMEOUT_MS", "250"),
            ("SCHEMAFLOW_SQL_DIALECT", "postgres"),
            ("SCHEMAFLOW_INCLUDE_UPSTREAM", "false"),
            ("SCHEMAFLOW_FAIL_ON", "medium"),
            ("SCHEMAFLOW_LOG_FORMAT", "json"),
        ]))
        .unwrap();

        assert_eq!(settings.analysis.max_depth, 5);
        assert_eq!(settings.analysis.lookup_timeout, Some(Duration::from_millis(250)));
        assert_eq!(settings.analysis.sql_dialect, SqlDialect::Postgres);
        assert!(!settings.analysis.include_upstream);
        assert!(settings.analysis.include_downstream);
        assert_eq!(settings.analysis.fail_on, Classification::Medium);
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_depth_out_of_range_is_rejected() {
        assert!(parse_depth("0").is_err());
        assert!(parse_depth("11").is_err());
        assert!(parse_depth("deep").is_err());
        assert_eq!(parse_depth(" 10 ").unwrap(), 10);

        let result = Settings::from_source(source(&[("SCHEMAFLOW_MAX_DEPTH", "42")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_fail_on_gates_assessments() {
        let medium = RiskAssessment {
            risk_score: 40,
            classification: Classification::Medium,
            findings: Vec::new(),
            metadata: None,
        };

        assert!(!AnalysisConfig::default().should_fail(&medium));

        let strict = Settings::from_source(source(&[("SCHEMAFLOW_FAIL_ON", "medium")])).unwrap();
        assert!(strict.analysis.should_fail(&medium));
    }

    #[test]
    fn test_invalid_flag_is_rejected() {
        let result = Settings::from_source(source(&[("SCHEMAFLOW_INCLUDE_DOWNSTREAM", "maybe")]));
        assert!(result.is_err());
    }
}
