//! Rules Engine
//!
//! An ordered, immutable list of rules. Each rule maps a diff plus optional
//! SQL signals to findings, and every finding cites the change (and signal)
//! that triggered it. Rules needing signals stay silent when none are given.

use std::fmt;

use serde_json::json;
use tracing::{debug, warn};

use super::diff::{Change, ChangeType, Diff, ObjectType};
use crate::models::{Evidence, Finding, FindingType, Severity};
use crate::sql::SignalSet;

pub type RuleCheck = fn(&Rule, &Diff, Option<&SignalSet>) -> Vec<Finding>;

/// A registered rule and the weight its findings carry
#[derive(Clone, Copy)]
pub struct Rule {
    pub id: &'static str,
    pub name: &'static str,
    pub finding_type: FindingType,
    pub severity: Severity,
    pub base_risk: u32,
    pub requires_signals: bool,
    check: RuleCheck,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("finding_type", &self.finding_type)
            .field("severity", &self.severity)
            .field("base_risk", &self.base_risk)
            .field("requires_signals", &self.requires_signals)
            .finish()
    }
}

impl Rule {
    pub const fn new(
        id: &'static str,
        name: &'static str,
        finding_type: FindingType,
        severity: Severity,
        base_risk: u32,
        requires_signals: bool,
        check: RuleCheck,
    ) -> Self {
        Self {
            id,
            name,
            finding_type,
            severity,
            base_risk,
            requires_signals,
            check,
        }
    }

    pub fn apply(&self, diff: &Diff, signals: Option<&SignalSet>) -> Vec<Finding> {
        if self.requires_signals && signals.is_none() {
            return Vec::new();
        }
        (self.check)(self, diff, signals)
    }

    fn finding(&self, evidence: Evidence, description: String) -> Finding {
        Finding::new(
            self.finding_type,
            self.severity,
            self.base_risk,
            evidence,
            description,
        )
    }
}

/// The rules engine that evaluates a diff
#[derive(Debug, Clone)]
pub struct RulesEngine {
    rules: Vec<Rule>,
}

impl Default for RulesEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RulesEngine {
    pub fn new() -> Self {
        Self::with_rules(default_rules())
    }

    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Apply every rule in registration order
    pub fn evaluate(&self, diff: &Diff, signals: Option<&SignalSet>) -> Vec<Finding> {
        let mut findings = Vec::new();

        for rule in &self.rules {
            for finding in rule.apply(diff, signals) {
                if let Err(e) = finding.validate() {
                    warn!("Rule {} produced an invalid finding, dropping it: {}", rule.id, e);
                    continue;
                }
                findings.push(finding);
            }
        }

        debug!(
            "Evaluated {} rules over {} changes: {} findings (signals supplied: {})",
            self.rules.len(),
            diff.len(),
            findings.len(),
            signals.is_some()
        );

        findings
    }
}

/// Apply the default rule set. See [`RulesEngine::evaluate`].
pub fn apply_rules(diff: &Diff, signals: Option<&SignalSet>) -> Vec<Finding> {
    RulesEngine::new().evaluate(diff, signals)
}

/// Default rules in registration order
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "R001",
            "column_removed",
            FindingType::ColumnRemoved,
            Severity::High,
            80,
            false,
            check_column_removed,
        ),
        Rule::new(
            "R002",
            "table_removed",
            FindingType::TableRemoved,
            Severity::High,
            80,
            false,
            check_table_removed,
        ),
        Rule::new(
            "R003",
            "column_type_changed",
            FindingType::ColumnTypeChanged,
            Severity::Medium,
            40,
            false,
            check_type_changed,
        ),
        Rule::new(
            "R004",
            "column_made_not_null",
            FindingType::ColumnNullabilityChanged,
            Severity::Medium,
            50,
            false,
            check_made_not_null,
        ),
        Rule::new(
            "R005",
            "nullable_column_added",
            FindingType::ColumnAdded,
            Severity::Low,
            0,
            false,
            check_nullable_column_added,
        ),
        Rule::new(
            "R006",
            "required_column_added",
            FindingType::ColumnAdded,
            Severity::Medium,
            30,
            false,
            check_required_column_added,
        ),
        Rule::new(
            "R007",
            "join_key_changed",
            FindingType::JoinKeyChanged,
            Severity::High,
            80,
            true,
            check_join_key_changed,
        ),
        Rule::new(
            "R008",
            "grain_change",
            FindingType::GrainChange,
            Severity::Medium,
            40,
            true,
            check_grain_change,
        ),
        Rule::new(
            "R009",
            "potential_breakage",
            FindingType::PotentialBreakage,
            Severity::Medium,
            50,
            true,
            check_potential_breakage,
        ),
    ]
}

// ============================================================================
// Evidence helpers
// ============================================================================

fn base_evidence(change: &Change) -> Evidence {
    let mut evidence = Evidence::new();
    evidence.insert("schema".into(), json!(change.schema_name));
    evidence.insert("table".into(), json!(change.table_name));
    if let Some(column) = &change.column_name {
        evidence.insert("column".into(), json!(column));
    }
    evidence.insert("change_type".into(), json!(change.change_type));
    evidence
}

fn column_changes(diff: &Diff, change_type: ChangeType) -> impl Iterator<Item = &Change> {
    diff.column_changes()
        .filter(move |c| c.change_type == change_type)
}

fn column_label(change: &Change) -> String {
    format!(
        "{}.{}.{}",
        change.schema_name,
        change.table_name,
        change.column_name.as_deref().unwrap_or("?")
    )
}

// ============================================================================
// Schema-only rules
// ============================================================================

fn check_column_removed(rule: &Rule, diff: &Diff, _: Option<&SignalSet>) -> Vec<Finding> {
    column_changes(diff, ChangeType::Removed)
        .map(|change| {
            let mut evidence = base_evidence(change);
            if let Some(before) = change.before_column() {
                evidence.insert("data_type".into(), json!(before.data_type));
            }
            rule.finding(
                evidence,
                format!(
                    "Column {} was removed; queries selecting it will fail",
                    column_label(change)
                ),
            )
        })
        .collect()
}

fn check_table_removed(rule: &Rule, diff: &Diff, _: Option<&SignalSet>) -> Vec<Finding> {
    diff.iter()
        .filter(|c| c.object_type == ObjectType::Table && c.change_type == ChangeType::Removed)
        .map(|change| {
            let mut evidence = base_evidence(change);
            let column_count = change.before_table().map_or(0, |t| t.columns.len());
            evidence.insert("column_count".into(), json!(column_count));
            rule.finding(
                evidence,
                format!(
                    "Table {}.{} was dropped ({} columns)",
                    change.schema_name, change.table_name, column_count
                ),
            )
        })
        .collect()
}

fn check_type_changed(rule: &Rule, diff: &Diff, _: Option<&SignalSet>) -> Vec<Finding> {
    column_changes(diff, ChangeType::TypeChanged)
        .filter_map(|change| {
            let before = change.before_column()?;
            let after = change.after_column()?;
            let mut evidence = base_evidence(change);
            evidence.insert("before_type".into(), json!(before.data_type));
            evidence.insert("after_type".into(), json!(after.data_type));
            let mut description = format!(
                "Column {} changed type from {} to {}",
                column_label(change),
                before.data_type,
                after.data_type
            );
            if change.nullability_also_changed() {
                evidence.insert("before_nullable".into(), json!(before.is_nullable));
                evidence.insert("after_nullable".into(), json!(after.is_nullable));
                description.push_str(if after.is_nullable {
                    " and now allows NULL"
                } else {
                    " and became NOT NULL"
                });
            }
            Some(rule.finding(evidence, description))
        })
        .collect()
}

fn check_made_not_null(rule: &Rule, diff: &Diff, _: Option<&SignalSet>) -> Vec<Finding> {
    column_changes(diff, ChangeType::NullabilityChanged)
        .filter_map(|change| {
            let before = change.before_column()?;
            let after = change.after_column()?;
            if !(before.is_nullable && !after.is_nullable) {
                return None;
            }
            let mut evidence = base_evidence(change);
            evidence.insert("before_nullable".into(), json!(true));
            evidence.insert("after_nullable".into(), json!(false));
            Some(rule.finding(
                evidence,
                format!(
                    "Column {} became NOT NULL; writers sending NULL will fail",
                    column_label(change)
                ),
            ))
        })
        .collect()
}

fn added_columns(rule: &Rule, diff: &Diff, nullable: bool) -> Vec<Finding> {
    column_changes(diff, ChangeType::Added)
        .filter_map(|change| {
            let after = change.after_column()?;
            if after.is_nullable != nullable {
                return None;
            }
            let mut evidence = base_evidence(change);
            evidence.insert("data_type".into(), json!(after.data_type));
            evidence.insert("is_nullable".into(), json!(after.is_nullable));
            let description = if nullable {
                format!("Nullable column {} was added", column_label(change))
            } else {
                format!(
                    "NOT NULL column {} was added; inserts that omit it will fail",
                    column_label(change)
                )
            };
            Some(rule.finding(evidence, description))
        })
        .collect()
}

fn check_nullable_column_added(rule: &Rule, diff: &Diff, _: Option<&SignalSet>) -> Vec<Finding> {
    added_columns(rule, diff, true)
}

fn check_required_column_added(rule: &Rule, diff: &Diff, _: Option<&SignalSet>) -> Vec<Finding> {
    added_columns(rule, diff, false)
}

// ============================================================================
// Signal-backed rules
// ============================================================================

fn check_join_key_changed(rule: &Rule, diff: &Diff, signals: Option<&SignalSet>) -> Vec<Finding> {
    let Some(signals) = signals else {
        return Vec::new();
    };

    diff.column_changes()
        .filter(|c| matches!(c.change_type, ChangeType::Removed | ChangeType::TypeChanged))
        .filter_map(|change| {
            let column = change.column_name.as_deref()?;
            let join_key = signals.find_join_key(&change.table_name, column)?;
            let mut evidence = base_evidence(change);
            evidence.insert("join_key".into(), json!(join_key.to_string()));
            Some(rule.finding(
                evidence,
                format!(
                    "Column {} is used as a join key ({}) and was {}",
                    column_label(change),
                    join_key,
                    match change.change_type {
                        ChangeType::Removed => "removed",
                        _ => "retyped",
                    }
                ),
            ))
        })
        .collect()
}

fn check_grain_change(rule: &Rule, diff: &Diff, signals: Option<&SignalSet>) -> Vec<Finding> {
    let Some(signals) = signals else {
        return Vec::new();
    };

    column_changes(diff, ChangeType::Removed)
        .filter_map(|change| {
            let column = change.column_name.as_deref()?;
            let group_by = signals.find_group_by(&change.table_name, column)?;
            let mut evidence = base_evidence(change);
            evidence.insert("group_by_column".into(), json!(group_by.to_string()));
            Some(rule.finding(
                evidence,
                format!(
                    "Column {} was removed but is used in GROUP BY ({}); aggregation grain changes",
                    column_label(change),
                    group_by
                ),
            ))
        })
        .collect()
}

fn check_potential_breakage(rule: &Rule, diff: &Diff, signals: Option<&SignalSet>) -> Vec<Finding> {
    let Some(signals) = signals else {
        return Vec::new();
    };

    column_changes(diff, ChangeType::TypeChanged)
        .filter_map(|change| {
            let column = change.column_name.as_deref()?;
            let selected = signals.find_selected(&change.table_name, column)?;
            let mut evidence = base_evidence(change);
            evidence.insert("selected_column".into(), json!(selected.to_string()));
            if let (Some(before), Some(after)) = (change.before_column(), change.after_column()) {
                evidence.insert("before_type".into(), json!(before.data_type));
                evidence.insert("after_type".into(), json!(after.data_type));
            }
            Some(rule.finding(
                evidence,
                format!(
                    "Column {} changed type and is selected by downstream SQL ({})",
                    column_label(change),
                    selected
                ),
            ))
        })
        .collect()
}
