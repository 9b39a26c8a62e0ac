//! SchemaFlow Risk - schema change risk engine
//!
//! Compares two versions of a relational schema and answers "how risky is
//! this change?" with a deterministic, evidence-backed assessment:
//!
//! - **Diff**: structural changes between before/after tables
//! - **Signals**: join keys, group-by and selected columns parsed from SQL
//! - **Rules**: findings with fixed integer risk, each citing its evidence
//! - **Impact**: bounded, cycle-safe dependency traversal through a lookup
//! - **Aggregate**: additive score classified LOW / MEDIUM / HIGH
//!
//! Missing or broken optional inputs (SQL that does not parse, a failing
//! dependency lookup) shrink the result instead of failing the run.

pub mod analysis;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod sql;
pub mod telemetry;
pub mod warehouse;

pub use analysis::{Classification, RiskAssessment};
pub use config::Settings;
pub use error::{AppError, AppResult};
pub use pipeline::{analyze, AnalysisOptions, AnalysisRequest, Orchestrator};
pub use telemetry::init_tracing;
