//! Dependency graph types shared by lookups and the impact analyzer.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::schema::QualifiedName;

/// Kind of object that can depend on (or be depended on by) a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectKind {
    Table,
    View,
    MaterializedView,
    Function,
    Procedure,
}

/// A node returned by a dependency lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyObject {
    pub object_type: ObjectKind,
    pub name: String,
    pub schema: String,
    /// Marked by the lookup, e.g. objects backing production dashboards
    #[serde(default)]
    pub is_critical: bool,
}

impl DependencyObject {
    pub fn new(object_type: ObjectKind, schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            object_type,
            name: name.into(),
            schema: schema.into(),
            is_critical: false,
        }
    }

    pub fn critical(mut self) -> Self {
        self.is_critical = true;
        self
    }

    pub fn qualified_name(&self) -> QualifiedName {
        QualifiedName::new(&self.schema, &self.name)
    }

    /// Object-level reference used to continue a traversal from this node
    pub fn to_object_ref(&self) -> ObjectRef {
        ObjectRef::table(&self.schema, &self.name)
    }
}

/// The object a traversal starts from: a table, optionally narrowed to a column
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub schema: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
}

impl ObjectRef {
    pub fn table(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            column: None,
        }
    }

    pub fn column(
        schema: impl Into<String>,
        name: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            column: Some(column.into()),
        }
    }

    pub fn qualified_name(&self) -> QualifiedName {
        QualifiedName::new(&self.schema, &self.name)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.column {
            Some(column) => write!(f, "{}.{}.{}", self.schema, self.name, column),
            None => write!(f, "{}.{}", self.schema, self.name),
        }
    }
}

/// Which edges a traversal follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Objects that read from the changed object
    Downstream,
    /// Objects the changed object reads from
    Upstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Downstream => write!(f, "downstream"),
            Direction::Upstream => write!(f, "upstream"),
        }
    }
}

/// Impact attached to a finding after dependency traversal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactDetail {
    pub direct_dependents: Vec<DependencyObject>,
    pub transitive_dependents: Vec<DependencyObject>,
    pub affected_applications: BTreeSet<String>,
    /// `direct_dependents.len() + transitive_dependents.len()`
    pub blast_radius: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstream_dependencies: Vec<DependencyObject>,
    /// Deepest level fully traversed
    pub max_depth_reached: u8,
    /// True when a lookup failed, timed out or was cancelled
    #[serde(default)]
    pub partial: bool,
}

impl ImpactDetail {
    pub fn new(
        direct_dependents: Vec<DependencyObject>,
        transitive_dependents: Vec<DependencyObject>,
        affected_applications: BTreeSet<String>,
    ) -> Self {
        let blast_radius = direct_dependents.len() + transitive_dependents.len();
        Self {
            direct_dependents,
            transitive_dependents,
            affected_applications,
            blast_radius,
            upstream_dependencies: Vec::new(),
            max_depth_reached: 0,
            partial: false,
        }
    }

    pub fn has_critical_dependents(&self) -> bool {
        self.direct_dependents
            .iter()
            .chain(self.transitive_dependents.iter())
            .any(|d| d.is_critical)
    }
}
