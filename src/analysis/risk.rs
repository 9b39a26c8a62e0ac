//! Risk Aggregator
//!
//! Sums finding risk into a single score and classifies it:
//! `< 30` LOW, `30..70` MEDIUM, `>= 70` HIGH. Confidence is carried on each
//! finding but never weights the score.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::models::{EnrichedFinding, Severity};

pub const MEDIUM_THRESHOLD: u32 = 30;
pub const HIGH_THRESHOLD: u32 = 70;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Low,
    Medium,
    High,
}

impl Classification {
    pub fn from_score(score: u32) -> Self {
        if score >= HIGH_THRESHOLD {
            Classification::High
        } else if score >= MEDIUM_THRESHOLD {
            Classification::Medium
        } else {
            Classification::Low
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Classification::Low => "LOW",
            Classification::Medium => "MEDIUM",
            Classification::High => "HIGH",
        };
        f.write_str(label)
    }
}

impl FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Classification::Low),
            "medium" => Ok(Classification::Medium),
            "high" => Ok(Classification::High),
            other => Err(format!(
                "Unknown classification '{}'; expected low, medium or high",
                other
            )),
        }
    }
}

/// Provenance of an assessment run. Passed through the aggregator untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentMetadata {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub before_checksum: String,
    pub after_checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_source: Option<String>,
    pub change_count: usize,
    pub signals_supplied: bool,
    /// Degradations the run absorbed: unparseable SQL, partial lookups
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Final result of an analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: u32,
    pub classification: Classification,
    pub findings: Vec<EnrichedFinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AssessmentMetadata>,
}

impl RiskAssessment {
    /// True when the classification is at or above `threshold`
    pub fn exceeds(&self, threshold: Classification) -> bool {
        self.classification >= threshold
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.finding.severity).max()
    }

    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.finding.severity == severity)
            .count()
    }
}

pub struct RiskAggregator;

impl RiskAggregator {
    pub fn aggregate(findings: Vec<EnrichedFinding>) -> RiskAssessment {
        Self::aggregate_with_metadata(findings, None)
    }

    pub fn aggregate_with_metadata(
        findings: Vec<EnrichedFinding>,
        metadata: Option<AssessmentMetadata>,
    ) -> RiskAssessment {
        let risk_score = findings
            .iter()
            .fold(0u32, |total, f| total.saturating_add(f.finding.base_risk));
        let classification = Classification::from_score(risk_score);

        info!(
            "🧠 Risk aggregated: score={}, classification={}, findings={}",
            risk_score,
            classification,
            findings.len()
        );

        RiskAssessment {
            risk_score,
            classification,
            findings,
            metadata,
        }
    }
}

/// Sum and classify findings. See [`RiskAggregator::aggregate`].
pub fn aggregate(findings: Vec<EnrichedFinding>) -> RiskAssessment {
    RiskAggregator::aggregate(findings)
}
