//! Warehouse capabilities consumed by the engine.
//!
//! The engine never talks to a warehouse directly. It sees two capabilities:
//! a [`SchemaSource`] that returns tables, and a [`DependencyLookup`] that
//! answers "who reads from this object" questions for the impact analyzer.

pub mod catalog;

use std::fmt;

use async_trait::async_trait;

use crate::error::{AppError, AppResult};
use crate::models::{DependencyObject, Direction, ObjectRef, Table};

pub use catalog::Catalog;

/// Returns the tables of a warehouse, optionally narrowed to one schema
#[async_trait]
pub trait SchemaSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_tables(&self, schema: Option<&str>) -> AppResult<Vec<Table>>;
}

/// Dependency graph access. Implementations may fail per call; the impact
/// analyzer treats a failure as a missing subtree, not a fatal error.
#[async_trait]
pub trait DependencyLookup: Send + Sync {
    /// Objects adjacent to `object` in the given direction
    async fn neighbors(
        &self,
        object: &ObjectRef,
        direction: Direction,
    ) -> AppResult<Vec<DependencyObject>>;

    /// Applications that consume `object`
    async fn applications(&self, _object: &ObjectRef) -> AppResult<Vec<String>> {
        Ok(Vec::new())
    }
}

// ============================================================================
// Adapter registry
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    Catalog,
    Snowflake,
    Databricks,
    Postgres,
    Redshift,
}

impl AdapterKind {
    const ALL: [AdapterKind; 5] = [
        AdapterKind::Catalog,
        AdapterKind::Snowflake,
        AdapterKind::Databricks,
        AdapterKind::Postgres,
        AdapterKind::Redshift,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AdapterKind::Catalog => "catalog",
            AdapterKind::Snowflake => "snowflake",
            AdapterKind::Databricks => "databricks",
            AdapterKind::Postgres => "postgres",
            AdapterKind::Redshift => "redshift",
        }
    }

    pub fn is_implemented(self) -> bool {
        matches!(self, AdapterKind::Catalog)
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Registry entry for a known adapter name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterStatus {
    Available(AdapterKind),
    Unimplemented(AdapterKind),
}

/// Look up an adapter by name (case-insensitive)
pub fn registry_entry(name: &str) -> Option<AdapterStatus> {
    let wanted = name.trim().to_lowercase();
    AdapterKind::ALL
        .into_iter()
        .find(|kind| kind.name() == wanted)
        .map(|kind| {
            if kind.is_implemented() {
                AdapterStatus::Available(kind)
            } else {
                AdapterStatus::Unimplemented(kind)
            }
        })
}

/// Resolve an adapter name to an implemented adapter, or a caller error
pub fn resolve_adapter(name: &str) -> AppResult<AdapterKind> {
    match registry_entry(name) {
        Some(AdapterStatus::Available(kind)) => Ok(kind),
        Some(AdapterStatus::Unimplemented(kind)) => {
            Err(AppError::WarehouseNotImplemented(kind.name().to_string()))
        }
        None => Err(AppError::UnsupportedWarehouse {
            name: name.to_string(),
            supported: supported_adapters().join(", "),
        }),
    }
}

/// Adapters that can be used today
pub fn supported_adapters() -> Vec<&'static str> {
    AdapterKind::ALL
        .into_iter()
        .filter(|k| k.is_implemented())
        .map(AdapterKind::name)
        .collect()
}

/// Adapters known to the registry but not implemented yet
pub fn planned_adapters() -> Vec<&'static str> {
    AdapterKind::ALL
        .into_iter()
        .filter(|k| !k.is_implemented())
        .map(AdapterKind::name)
        .collect()
}
