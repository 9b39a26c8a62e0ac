//! Findings produced by the rule engine

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::dependency::{ImpactDetail, ObjectRef};
use crate::error::{validation_error, AppResult};

/// Evidence keys are sorted so serialized findings are stable
pub type Evidence = BTreeMap<String, serde_json::Value>;

/// Kind of risk a finding reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingType {
    ColumnRemoved,
    TableRemoved,
    ColumnTypeChanged,
    ColumnNullabilityChanged,
    ColumnAdded,
    JoinKeyChanged,
    GrainChange,
    PotentialBreakage,
}

impl fmt::Display for FindingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FindingType::ColumnRemoved => "COLUMN_REMOVED",
            FindingType::TableRemoved => "TABLE_REMOVED",
            FindingType::ColumnTypeChanged => "COLUMN_TYPE_CHANGED",
            FindingType::ColumnNullabilityChanged => "COLUMN_NULLABILITY_CHANGED",
            FindingType::ColumnAdded => "COLUMN_ADDED",
            FindingType::JoinKeyChanged => "JOIN_KEY_CHANGED",
            FindingType::GrainChange => "GRAIN_CHANGE",
            FindingType::PotentialBreakage => "POTENTIAL_BREAKAGE",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

fn default_confidence() -> f64 {
    1.0
}

/// A single risk finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub finding_type: FindingType,
    pub severity: Severity,
    /// 0-100, summed by the aggregator
    pub base_risk: u32,
    pub evidence: Evidence,
    pub description: String,
    /// Reported alongside the score, never multiplied into it
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

impl Finding {
    pub fn new(
        finding_type: FindingType,
        severity: Severity,
        base_risk: u32,
        evidence: Evidence,
        description: impl Into<String>,
    ) -> Self {
        Self {
            finding_type,
            severity,
            base_risk,
            evidence,
            description: description.into(),
            confidence: default_confidence(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// A finding must cite evidence and stay inside the risk and confidence ranges
    pub fn validate(&self) -> AppResult<()> {
        if self.evidence.is_empty() {
            return Err(validation_error(format!(
                "{} finding has no evidence",
                self.finding_type
            )));
        }
        if self.base_risk > 100 {
            return Err(validation_error(format!(
                "{} finding has base_risk {} (max 100)",
                self.finding_type, self.base_risk
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(validation_error(format!(
                "{} finding has confidence {} outside [0, 1]",
                self.finding_type, self.confidence
            )));
        }
        Ok(())
    }

    fn evidence_str(&self, key: &str) -> Option<&str> {
        self.evidence.get(key).and_then(|v| v.as_str())
    }

    /// The object this finding is about, taken from its `schema`/`table`/`column` evidence
    pub fn subject(&self) -> Option<ObjectRef> {
        let schema = self.evidence_str("schema")?;
        let table = self.evidence_str("table")?;
        Some(match self.evidence_str("column") {
            Some(column) => ObjectRef::column(schema, table, column),
            None => ObjectRef::table(schema, table),
        })
    }
}

/// A finding plus the optional impact detail gathered for its subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedFinding {
    #[serde(flatten)]
    pub finding: Finding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact_detail: Option<ImpactDetail>,
}

impl EnrichedFinding {
    pub fn new(finding: Finding, impact_detail: Option<ImpactDetail>) -> Self {
        Self {
            finding,
            impact_detail,
        }
    }
}

impl From<Finding> for EnrichedFinding {
    fn from(finding: Finding) -> Self {
        Self::new(finding, None)
    }
}
