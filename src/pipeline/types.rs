//! Request types for the analysis pipeline

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::analysis::blast_radius::ImpactSettings;
use crate::config::{AnalysisConfig, DEFAULT_DEPTH};
use crate::models::Table;
use crate::sql::SqlDialect;

/// Knobs for one analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AnalysisOptions {
    #[validate(range(min = 1, max = 10, message = "max_depth must be 1-10"))]
    pub max_depth: u8,
    pub include_downstream: bool,
    pub include_upstream: bool,
    pub sql_dialect: SqlDialect,
    /// Budget for all dependency lookups of the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_timeout_ms: Option<u64>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_DEPTH,
            include_downstream: true,
            include_upstream: true,
            sql_dialect: SqlDialect::default(),
            lookup_timeout_ms: None,
        }
    }
}

impl AnalysisOptions {
    pub fn lookup_timeout(&self) -> Option<Duration> {
        self.lookup_timeout_ms.map(Duration::from_millis)
    }

    pub fn impact_settings(&self) -> ImpactSettings {
        ImpactSettings {
            max_depth: self.max_depth,
            include_downstream: self.include_downstream,
            include_upstream: self.include_upstream,
        }
    }
}

impl From<&AnalysisConfig> for AnalysisOptions {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            include_downstream: config.include_downstream,
            include_upstream: config.include_upstream,
            sql_dialect: config.sql_dialect,
            lookup_timeout_ms: config.lookup_timeout.map(|t| t.as_millis() as u64),
        }
    }
}

/// Inputs of one analysis run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub before: Vec<Table>,
    pub after: Vec<Table>,
    /// View/procedure definitions keyed by object name
    #[serde(default)]
    pub sql_definitions: BTreeMap<String, String>,
    #[serde(default)]
    pub options: AnalysisOptions,
    /// Provenance labels, e.g. a file path or warehouse identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_source: Option<String>,
}

impl AnalysisRequest {
    pub fn new(before: Vec<Table>, after: Vec<Table>) -> Self {
        Self {
            before,
            after,
            ..Default::default()
        }
    }

    pub fn with_sql(mut self, name: impl Into<String>, sql_text: impl Into<String>) -> Self {
        self.sql_definitions.insert(name.into(), sql_text.into());
        self
    }

    pub fn with_options(mut self, options: AnalysisOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_sources(mut self, before: impl Into<String>, after: impl Into<String>) -> Self {
        self.before_source = Some(before.into());
        self.after_source = Some(after.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        assert!(AnalysisOptions::default().validate().is_ok());
    }

    #[test]
    fn test_depth_range_is_validated() {
        for depth in [0u8, 11, 255] {
            let options = AnalysisOptions {
                max_depth: depth,
                ..Default::default()
            };
            assert!(options.validate().is_err(), "depth {} accepted", depth);
        }
    }

    #[test]
    fn test_options_from_config() {
        let config = AnalysisConfig {
            max_depth: 7,
            lookup_timeout: Some(Duration::from_millis(1500)),
            ..Default::default()
        };
        let options = AnalysisOptions::from(&config);
        assert_eq!(options.max_depth, 7);
        assert_eq!(options.lookup_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: AnalysisRequest = serde_json::from_str(r#"{"before": [], "after": []}"#).unwrap();
        assert_eq!(request.options, AnalysisOptions::default());
        assert!(request.sql_definitions.is_empty());
    }
}
