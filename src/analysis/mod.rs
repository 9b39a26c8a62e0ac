//! Analysis stages: diff, rules, impact traversal and risk aggregation

pub mod blast_radius;
pub mod diff;
pub mod risk;
pub mod rules;

pub use blast_radius::{
    analyze_impact, cancellation, CancelHandle, CancelToken, ImpactAnalyzer, ImpactSettings,
    StopReason, Traversal, TraversalOptions,
};
pub use diff::{diff, Change, ChangeType, Diff, DiffEngine, DiffSummary, ObjectState, ObjectType};
pub use risk::{aggregate, AssessmentMetadata, Classification, RiskAggregator, RiskAssessment};
pub use rules::{apply_rules, default_rules, Rule, RulesEngine};
