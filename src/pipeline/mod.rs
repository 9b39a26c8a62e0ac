//! Analysis Pipeline Module
//!
//! Connects the stages into one run:
//!
//! 1. **Diff**: compare before/after tables
//! 2. **Signals**: parse the supplied SQL definitions, best-effort
//! 3. **Rules**: turn changes (and signals) into evidence-backed findings
//! 4. **Impact**: attach dependency impact when a lookup is available
//! 5. **Aggregate**: sum and classify

pub mod orchestrator;
pub mod types;

pub use orchestrator::{analyze, fetch_tables_or_empty, Orchestrator};
pub use types::{AnalysisOptions, AnalysisRequest};
