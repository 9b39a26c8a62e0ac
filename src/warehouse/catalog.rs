//! File-backed catalog adapter.
//!
//! A [`Catalog`] is a JSON document holding tables, dependency edges and
//! application usage. It implements both warehouse capabilities and is the
//! only adapter available without a live warehouse connection.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DependencyLookup, SchemaSource};
use crate::error::{lookup_error, AppResult};
use crate::models::{DependencyObject, Direction, ObjectKind, ObjectRef, QualifiedName, Table};

fn default_source_kind() -> ObjectKind {
    ObjectKind::Table
}

/// `dependent` reads from `source`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// A `column` here narrows the edge to that column
    pub source: ObjectRef,
    #[serde(default = "default_source_kind")]
    pub source_kind: ObjectKind,
    pub dependent: DependencyObject,
}

impl DependencyEdge {
    fn reads_from(&self, object: &ObjectRef) -> bool {
        if !self.source.qualified_name().matches(&object.qualified_name()) {
            return false;
        }
        match (&self.source.column, &object.column) {
            (Some(edge_column), Some(changed_column)) => {
                edge_column.eq_ignore_ascii_case(changed_column)
            }
            _ => true,
        }
    }

    fn source_object(&self) -> DependencyObject {
        DependencyObject::new(self.source_kind, &self.source.schema, &self.source.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub dependencies: Vec<DependencyEdge>,
    /// "schema.name" -> consuming applications
    #[serde(default)]
    pub applications: BTreeMap<String, Vec<String>>,
    /// "schema.name" of objects whose lookups fail, e.g. revoked grants
    #[serde(default)]
    pub unavailable: BTreeSet<String>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> AppResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let catalog = Self::from_json(&contents)?;
        debug!(
            "Loaded catalog from {}: {} tables, {} dependency edges",
            path.as_ref().display(),
            catalog.tables.len(),
            catalog.dependencies.len()
        );
        Ok(catalog)
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    pub fn with_dependency(mut self, source: ObjectRef, dependent: DependencyObject) -> Self {
        self.dependencies.push(DependencyEdge {
            source,
            source_kind: default_source_kind(),
            dependent,
        });
        self
    }

    pub fn with_application(mut self, object: &str, application: &str) -> Self {
        self.applications
            .entry(object.to_string())
            .or_default()
            .push(application.to_string());
        self
    }

    pub fn with_unavailable(mut self, object: &str) -> Self {
        self.unavailable.insert(object.to_string());
        self
    }

    fn is_unavailable(&self, name: &QualifiedName) -> bool {
        let wanted = name.to_string();
        self.unavailable
            .iter()
            .any(|entry| entry.eq_ignore_ascii_case(&wanted))
    }

    fn downstream(&self, object: &ObjectRef) -> Vec<DependencyObject> {
        let mut seen = HashSet::new();
        self.dependencies
            .iter()
            .filter(|edge| edge.reads_from(object))
            .map(|edge| edge.dependent.clone())
            .filter(|dependent| seen.insert(dependent.qualified_name().key()))
            .collect()
    }

    fn upstream(&self, object: &ObjectRef) -> Vec<DependencyObject> {
        let target = object.qualified_name();
        let mut seen = HashSet::new();
        self.dependencies
            .iter()
            .filter(|edge| edge.dependent.qualified_name().matches(&target))
            .map(DependencyEdge::source_object)
            .filter(|source| seen.insert(source.qualified_name().key()))
            .collect()
    }
}

#[async_trait]
impl DependencyLookup for Catalog {
    async fn neighbors(
        &self,
        object: &ObjectRef,
        direction: Direction,
    ) -> AppResult<Vec<DependencyObject>> {
        let name = object.qualified_name();
        if self.is_unavailable(&name) {
            return Err(lookup_error(name.to_string(), "object is unavailable in catalog"));
        }

        Ok(match direction {
            Direction::Downstream => self.downstream(object),
            Direction::Upstream => self.upstream(object),
        })
    }

    async fn applications(&self, object: &ObjectRef) -> AppResult<Vec<String>> {
        let wanted = object.qualified_name().to_string();
        Ok(self
            .applications
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(&wanted))
            .flat_map(|(_, apps)| apps.iter().cloned())
            .collect())
    }
}

#[async_trait]
impl SchemaSource for Catalog {
    fn name(&self) -> &str {
        "catalog"
    }

    async fn fetch_tables(&self, schema: Option<&str>) -> AppResult<Vec<Table>> {
        Ok(self
            .tables
            .iter()
            .filter(|t| schema.map_or(true, |s| t.schema_name.eq_ignore_ascii_case(s)))
            .cloned()
            .collect())
    }
}
