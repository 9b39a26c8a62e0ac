//! Orchestrator - runs one analysis end to end
//!
//! diff -> signals -> rules -> impact enrichment -> aggregation.
//! Caller errors (ambiguous schemas, invalid options) propagate. Everything
//! else degrades: unparseable SQL, failing or slow lookups and unavailable
//! schema sources become warnings in the assessment metadata.

use std::collections::HashMap;
use std::time::Instant as WallClock;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use super::types::AnalysisRequest;
use crate::analysis::blast_radius::{CancelToken, ImpactAnalyzer, TraversalOptions};
use crate::analysis::diff::DiffEngine;
use crate::analysis::risk::{AssessmentMetadata, RiskAggregator, RiskAssessment};
use crate::analysis::rules::RulesEngine;
use crate::error::AppResult;
use crate::models::{schema_checksum, EnrichedFinding, Finding, ImpactDetail, ObjectRef, Table};
use crate::sql::signals::extract_all;
use crate::warehouse::{DependencyLookup, SchemaSource};

/// Runs analyses with a fixed rule set
#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    rules: RulesEngine,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: RulesEngine) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RulesEngine {
        &self.rules
    }

    /// Run an analysis. Without a lookup, findings carry no impact detail.
    pub async fn run(
        &self,
        request: &AnalysisRequest,
        lookup: Option<&dyn DependencyLookup>,
        cancel: Option<CancelToken>,
    ) -> AppResult<RiskAssessment> {
        let started_at = Utc::now();
        let timer = WallClock::now();
        let run_id = Uuid::new_v4();

        info!(
            "🔍 Starting analysis {}: {} -> {} tables, {} SQL definitions",
            run_id,
            request.before.len(),
            request.after.len(),
            request.sql_definitions.len()
        );

        request.options.validate()?;

        let diff = DiffEngine::diff(&request.before, &request.after)?;

        let mut warnings = Vec::new();
        let extraction = extract_all(&request.sql_definitions, request.options.sql_dialect);
        for name in &extraction.failed {
            warnings.push(format!(
                "SQL definition '{}' could not be parsed; its signals were skipped",
                name
            ));
        }
        let signals = extraction.signals;

        let findings = self.rules.evaluate(&diff, signals.as_ref());

        let enriched = match lookup {
            Some(lookup) => {
                let options = TraversalOptions {
                    deadline: request.options.lookup_timeout().map(|t| Instant::now() + t),
                    cancel,
                };
                self.enrich(findings, request, lookup, &options, &mut warnings)
                    .await?
            }
            None => findings.into_iter().map(EnrichedFinding::from).collect(),
        };

        let metadata = AssessmentMetadata {
            run_id,
            started_at,
            finished_at: Utc::now(),
            duration_ms: timer.elapsed().as_millis() as u64,
            before_checksum: schema_checksum(&request.before),
            after_checksum: schema_checksum(&request.after),
            before_source: request.before_source.clone(),
            after_source: request.after_source.clone(),
            change_count: diff.len(),
            signals_supplied: signals.is_some(),
            warnings,
        };

        let assessment = RiskAggregator::aggregate_with_metadata(enriched, Some(metadata));

        info!(
            "✅ Analysis {} complete: score={}, classification={}, findings={}",
            run_id,
            assessment.risk_score,
            assessment.classification,
            assessment.findings.len()
        );

        Ok(assessment)
    }

    /// Attach impact detail to each finding. Each subject is traversed once per run.
    async fn enrich(
        &self,
        findings: Vec<Finding>,
        request: &AnalysisRequest,
        lookup: &dyn DependencyLookup,
        options: &TraversalOptions,
        warnings: &mut Vec<String>,
    ) -> AppResult<Vec<EnrichedFinding>> {
        let settings = request.options.impact_settings();
        let mut cache: HashMap<ObjectRef, ImpactDetail> = HashMap::new();
        let mut enriched = Vec::with_capacity(findings.len());

        for finding in findings {
            let Some(subject) = finding.subject() else {
                enriched.push(EnrichedFinding::from(finding));
                continue;
            };

            let detail = match cache.get(&subject) {
                Some(detail) => detail.clone(),
                None => {
                    let detail =
                        ImpactAnalyzer::impact_detail(&subject, lookup, &settings, options).await?;
                    if detail.partial {
                        warnings.push(format!(
                            "Impact data for {} is partial: some dependency lookups failed or timed out",
                            subject
                        ));
                    }
                    cache.insert(subject, detail.clone());
                    detail
                }
            };

            enriched.push(EnrichedFinding::new(finding, Some(detail)));
        }

        Ok(enriched)
    }
}

/// Run an analysis with the default rule set
pub async fn analyze(
    request: &AnalysisRequest,
    lookup: Option<&dyn DependencyLookup>,
) -> AppResult<RiskAssessment> {
    Orchestrator::new().run(request, lookup, None).await
}

/// Fetch tables from a schema source, turning a failure into an empty set
/// plus a warning.
pub async fn fetch_tables_or_empty(
    source: &dyn SchemaSource,
    schema: Option<&str>,
    warnings: &mut Vec<String>,
) -> Vec<Table> {
    match source.fetch_tables(schema).await {
        Ok(tables) => tables,
        Err(e) => {
            warn!("Schema source '{}' failed: {}", source.name(), e);
            warnings.push(format!("Schema source '{}' unavailable: {}", source.name(), e));
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::blast_radius::cancellation;
    use crate::analysis::risk::Classification;
    use crate::error::{lookup_error, AppError};
    use crate::models::{Column, DependencyObject, Direction, FindingType, ObjectKind, Severity};
    use crate::pipeline::types::AnalysisOptions;
    use crate::warehouse::Catalog;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn col(table: &str, name: &str, data_type: &str, nullable: bool, ordinal: u32) -> Column {
        Column::new("PUBLIC", table, name, data_type, nullable, ordinal)
    }

    fn customers(with_email: bool) -> Table {
        let mut columns = vec![col("customers", "id", "NUMBER", false, 1)];
        if with_email {
            columns.push(col("customers", "email", "VARCHAR", true, 2));
        }
        Table::new("PUBLIC", "customers", columns)
    }

    fn orders(total_type: &str, with_customer_id: bool) -> Table {
        let mut columns = vec![
            col("orders", "id", "NUMBER", false, 1),
            col("orders", "total", total_type, true, 2),
        ];
        if with_customer_id {
            columns.push(col("orders", "customer_id", "NUMBER", true, 3));
        }
        Table::new("PUBLIC", "orders", columns)
    }

    #[tokio::test]
    async fn test_scenario_column_removed() {
        let request = AnalysisRequest::new(vec![customers(true)], vec![customers(false)]);

        let assessment = analyze(&request, None).await.unwrap();

        assert_eq!(assessment.findings.len(), 1);
        let finding = &assessment.findings[0].finding;
        assert_eq!(finding.finding_type, FindingType::ColumnRemoved);
        assert_eq!(finding.severity, Severity::High);
        assert_eq!(finding.base_risk, 80);
        assert_eq!(assessment.risk_score, 80);
        assert_eq!(assessment.classification, Classification::High);
        assert!(assessment.findings[0].impact_detail.is_none());
    }

    #[tokio::test]
    async fn test_scenario_identical_schemas() {
        let tables = vec![customers(true), orders("FLOAT", true)];
        let request = AnalysisRequest::new(tables.clone(), tables);

        let assessment = analyze(&request, None).await.unwrap();

        assert!(assessment.findings.is_empty());
        assert_eq!(assessment.risk_score, 0);
        assert_eq!(assessment.classification, Classification::Low);
        let metadata = assessment.metadata.unwrap();
        assert_eq!(metadata.before_checksum, metadata.after_checksum);
        assert_eq!(metadata.change_count, 0);
    }

    #[tokio::test]
    async fn test_scenario_type_change() {
        let request = AnalysisRequest::new(vec![orders("FLOAT", false)], vec![orders("VARCHAR", false)]);

        let assessment = analyze(&request, None).await.unwrap();

        assert_eq!(assessment.findings.len(), 1);
        assert_eq!(
            assessment.findings[0].finding.finding_type,
            FindingType::ColumnTypeChanged
        );
        assert_eq!(assessment.risk_score, 40);
        assert_eq!(assessment.classification, Classification::Medium);
    }

    #[tokio::test]
    async fn test_scenario_unparseable_sql() {
        let request = AnalysisRequest::new(vec![orders("FLOAT", true)], vec![orders("FLOAT", false)])
            .with_sql("v_orders", "SELEC o.id FRM orders o JOIN ON");

        let assessment = analyze(&request, None).await.unwrap();

        let kinds: Vec<FindingType> = assessment
            .findings
            .iter()
            .map(|f| f.finding.finding_type)
            .collect();
        assert_eq!(kinds, vec![FindingType::ColumnRemoved]);
        let metadata = assessment.metadata.unwrap();
        assert!(metadata.signals_supplied);
        assert_eq!(metadata.warnings.len(), 1);
        assert!(metadata.warnings[0].contains("v_orders"));
    }

    #[tokio::test]
    async fn test_join_key_finding_with_parsed_sql() {
        let request = AnalysisRequest::new(vec![orders("FLOAT", true)], vec![orders("FLOAT", false)])
            .with_sql(
                "v_orders",
                "SELECT o.id FROM orders o JOIN customers c ON o.customer_id = c.id",
            );

        let assessment = analyze(&request, None).await.unwrap();

        assert_eq!(assessment.risk_score, 160);
        assert_eq!(
            assessment.findings[1].finding.finding_type,
            FindingType::JoinKeyChanged
        );
    }

    #[tokio::test]
    async fn test_cycle_in_dependency_graph() {
        let catalog = Catalog::new()
            .with_dependency(
                ObjectRef::table("PUBLIC", "customers"),
                DependencyObject::new(ObjectKind::View, "PUBLIC", "B"),
            )
            .with_dependency(
                ObjectRef::table("PUBLIC", "B"),
                DependencyObject::new(ObjectKind::View, "PUBLIC", "customers"),
            );
        let request = AnalysisRequest::new(vec![customers(true)], vec![customers(false)]);

        let assessment = analyze(&request, Some(&catalog)).await.unwrap();

        let detail = assessment.findings[0].impact_detail.as_ref().unwrap();
        assert_eq!(detail.direct_dependents.len(), 1);
        assert_eq!(detail.direct_dependents[0].name, "B");
        assert!(detail.transitive_dependents.is_empty());
        assert_eq!(detail.blast_radius, 1);
        assert!(!detail.partial);
    }

    #[tokio::test]
    async fn test_impact_does_not_change_score() {
        let catalog = Catalog::new().with_dependency(
            ObjectRef::table("PUBLIC", "customers"),
            DependencyObject::new(ObjectKind::View, "MART", "V_CUSTOMERS").critical(),
        );
        let request = AnalysisRequest::new(vec![customers(true)], vec![customers(false)]);

        let with_lookup = analyze(&request, Some(&catalog)).await.unwrap();
        let without_lookup = analyze(&request, None).await.unwrap();

        assert_eq!(with_lookup.risk_score, without_lookup.risk_score);
        assert_eq!(with_lookup.classification, without_lookup.classification);
        assert!(with_lookup.findings[0]
            .impact_detail
            .as_ref()
            .unwrap()
            .has_critical_dependents());
    }

    #[tokio::test]
    async fn test_failing_lookup_degrades_to_partial_detail() {
        let catalog = Catalog::new().with_unavailable("PUBLIC.customers");
        let request = AnalysisRequest::new(vec![customers(true)], vec![customers(false)]);

        let assessment = analyze(&request, Some(&catalog)).await.unwrap();

        let detail = assessment.findings[0].impact_detail.as_ref().unwrap();
        assert!(detail.partial);
        assert_eq!(detail.blast_radius, 0);
        assert_eq!(assessment.risk_score, 80);
        assert_eq!(assessment.metadata.unwrap().warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_depth_is_a_caller_error() {
        let request = AnalysisRequest::new(vec![], vec![]).with_options(AnalysisOptions {
            max_depth: 0,
            ..Default::default()
        });

        let err = analyze(&request, None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_duplicate_tables_are_a_caller_error() {
        let request = AnalysisRequest::new(vec![customers(true), customers(false)], vec![]);
        let err = analyze(&request, None).await.unwrap_err();
        assert!(err.is_caller_error());
    }

    struct CountingLookup {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl DependencyLookup for CountingLookup {
        async fn neighbors(
            &self,
            _object: &ObjectRef,
            _direction: Direction,
        ) -> AppResult<Vec<DependencyObject>> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_subject_traversed_once_per_run() {
        // A removed nullable join column is the subject of both a removal and
        // a join-key finding.
        let lookup = CountingLookup {
            calls: std::sync::atomic::AtomicUsize::new(0),
        };
        let request = AnalysisRequest::new(vec![orders("FLOAT", true)], vec![orders("FLOAT", false)])
            .with_sql(
                "v",
                "SELECT 1 FROM orders o JOIN customers c ON o.customer_id = c.id",
            )
            .with_options(AnalysisOptions {
                include_upstream: false,
                ..Default::default()
            });

        let assessment = Orchestrator::new()
            .run(&request, Some(&lookup), None)
            .await
            .unwrap();

        assert_eq!(assessment.findings.len(), 2);
        assert_eq!(lookup.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    struct HangingLookup;

    #[async_trait]
    impl DependencyLookup for HangingLookup {
        async fn neighbors(
            &self,
            object: &ObjectRef,
            _direction: Direction,
        ) -> AppResult<Vec<DependencyObject>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(lookup_error(object.to_string(), "unreachable"))
        }
    }

    #[tokio::test]
    async fn test_lookup_timeout_still_returns_assessment() {
        let request = AnalysisRequest::new(vec![customers(true)], vec![customers(false)])
            .with_options(AnalysisOptions {
                lookup_timeout_ms: Some(20),
                ..Default::default()
            });

        let assessment = analyze(&request, Some(&HangingLookup)).await.unwrap();

        assert_eq!(assessment.risk_score, 80);
        assert!(assessment.findings[0].impact_detail.as_ref().unwrap().partial);
    }

    #[tokio::test]
    async fn test_cancelled_run_still_returns_assessment() {
        let (handle, token) = cancellation();
        handle.cancel();
        let request = AnalysisRequest::new(vec![customers(true)], vec![customers(false)]);

        let assessment = Orchestrator::new()
            .run(&request, Some(&HangingLookup), Some(token))
            .await
            .unwrap();

        assert!(assessment.findings[0].impact_detail.as_ref().unwrap().partial);
    }

    struct BrokenSource;

    #[async_trait]
    impl SchemaSource for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }

        async fn fetch_tables(&self, _schema: Option<&str>) -> AppResult<Vec<Table>> {
            Err(AppError::WarehouseNotImplemented("broken".into()))
        }
    }

    #[tokio::test]
    async fn test_schema_source_failure_becomes_missing_input() {
        let mut warnings = Vec::new();
        let tables = fetch_tables_or_empty(&BrokenSource, None, &mut warnings).await;
        assert!(tables.is_empty());
        assert_eq!(warnings.len(), 1);

        let catalog = Catalog::new().with_table(customers(true));
        let tables = fetch_tables_or_empty(&catalog, Some("public"), &mut warnings).await;
        assert_eq!(tables.len(), 1);
        assert_eq!(warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_assessment_serializes_expected_fields() {
        let request = AnalysisRequest::new(vec![customers(true)], vec![customers(false)]);
        let assessment = analyze(&request, None).await.unwrap();

        let value = serde_json::to_value(&assessment).unwrap();
        assert_eq!(value["risk_score"], serde_json::json!(80));
        assert_eq!(value["classification"], serde_json::json!("HIGH"));
        let finding = &value["findings"][0];
        assert_eq!(finding["finding_type"], serde_json::json!("COLUMN_REMOVED"));
        assert_eq!(finding["severity"], serde_json::json!("HIGH"));
        assert_eq!(finding["base_risk"], serde_json::json!(80));
        assert_eq!(finding["evidence"]["column"], serde_json::json!("email"));
        assert!(finding.get("impact_detail").is_none());
    }
}
