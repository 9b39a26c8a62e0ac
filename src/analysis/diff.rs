//! Schema Diff Engine
//!
//! Compares a "before" and "after" set of tables and emits a flat,
//! ordered list of structural changes.
//!
//! Ordering is deterministic: tables are walked in input order (every "before"
//! table, then the tables only present "after"); within a table, removed and modified columns come first in the "before"
//! table's ordinal order, then added columns in the "after" table's ordinal order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{validation_error, AppResult};
use crate::models::{Column, ObjectRef, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Added,
    Removed,
    TypeChanged,
    NullabilityChanged,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChangeType::Added => "ADDED",
            ChangeType::Removed => "REMOVED",
            ChangeType::TypeChanged => "TYPE_CHANGED",
            ChangeType::NullabilityChanged => "NULLABILITY_CHANGED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectType {
    Table,
    Column,
}

/// Snapshot of the changed object on one side of the diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectState {
    Table(Table),
    Column(Column),
}

/// One structural change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub change_type: ChangeType,
    pub object_type: ObjectType,
    pub schema_name: String,
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
    pub before: Option<ObjectState>,
    pub after: Option<ObjectState>,
}

impl Change {
    pub fn table_added(table: &Table) -> Self {
        Self::for_table(ChangeType::Added, table, None, Some(table.clone()))
    }

    pub fn table_removed(table: &Table) -> Self {
        Self::for_table(ChangeType::Removed, table, Some(table.clone()), None)
    }

    pub fn column_added(column: &Column) -> Self {
        Self::for_column(ChangeType::Added, column, None, Some(column.clone()))
    }

    pub fn column_removed(column: &Column) -> Self {
        Self::for_column(ChangeType::Removed, column, Some(column.clone()), None)
    }

    pub fn type_changed(before: &Column, after: &Column) -> Self {
        Self::for_column(
            ChangeType::TypeChanged,
            after,
            Some(before.clone()),
            Some(after.clone()),
        )
    }

    pub fn nullability_changed(before: &Column, after: &Column) -> Self {
        Self::for_column(
            ChangeType::NullabilityChanged,
            after,
            Some(before.clone()),
            Some(after.clone()),
        )
    }

    fn for_table(
        change_type: ChangeType,
        table: &Table,
        before: Option<Table>,
        after: Option<Table>,
    ) -> Self {
        Self {
            change_type,
            object_type: ObjectType::Table,
            schema_name: table.schema_name.clone(),
            table_name: table.table_name.clone(),
            column_name: None,
            before: before.map(ObjectState::Table),
            after: after.map(ObjectState::Table),
        }
    }

    fn for_column(
        change_type: ChangeType,
        column: &Column,
        before: Option<Column>,
        after: Option<Column>,
    ) -> Self {
        Self {
            change_type,
            object_type: ObjectType::Column,
            schema_name: column.schema_name.clone(),
            table_name: column.table_name.clone(),
            column_name: Some(column.column_name.clone()),
            before: before.map(ObjectState::Column),
            after: after.map(ObjectState::Column),
        }
    }

    pub fn is_column(&self) -> bool {
        self.object_type == ObjectType::Column
    }

    pub fn before_column(&self) -> Option<&Column> {
        match &self.before {
            Some(ObjectState::Column(c)) => Some(c),
            _ => None,
        }
    }

    pub fn after_column(&self) -> Option<&Column> {
        match &self.after {
            Some(ObjectState::Column(c)) => Some(c),
            _ => None,
        }
    }

    /// True for a type change whose column also flipped nullability. The
    /// diff emits one change per column, so that second dimension rides along
    /// in the before/after states.
    pub fn nullability_also_changed(&self) -> bool {
        self.change_type == ChangeType::TypeChanged
            && matches!(
                (self.before_column(), self.after_column()),
                (Some(before), Some(after)) if before.is_nullable != after.is_nullable
            )
    }

    pub fn before_table(&self) -> Option<&Table> {
        match &self.before {
            Some(ObjectState::Table(t)) => Some(t),
            _ => None,
        }
    }

    /// "schema.table" or "schema.table.column"
    pub fn object_path(&self) -> String {
        self.subject().to_string()
    }

    pub fn subject(&self) -> ObjectRef {
        match &self.column_name {
            Some(column) => ObjectRef::column(&self.schema_name, &self.table_name, column),
            None => ObjectRef::table(&self.schema_name, &self.table_name),
        }
    }
}

/// Counts per change kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub tables_added: usize,
    pub tables_removed: usize,
    pub tables_modified: usize,
    pub columns_added: usize,
    pub columns_removed: usize,
    pub columns_type_changed: usize,
    pub columns_nullability_changed: usize,
    pub total_changes: usize,
}

/// Ordered, immutable list of changes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    changes: Vec<Change>,
}

impl Diff {
    pub fn from_changes(changes: Vec<Change>) -> Self {
        Self { changes }
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }

    pub fn column_changes(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter().filter(|c| c.is_column())
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary::default();
        let mut modified_tables = BTreeSet::new();

        for change in &self.changes {
            match (change.object_type, change.change_type) {
                (ObjectType::Table, ChangeType::Added) => summary.tables_added += 1,
                (ObjectType::Table, ChangeType::Removed) => summary.tables_removed += 1,
                (ObjectType::Table, _) => {}
                (ObjectType::Column, change_type) => {
                    modified_tables.insert((&change.schema_name, &change.table_name));
                    match change_type {
                        ChangeType::Added => summary.columns_added += 1,
                        ChangeType::Removed => summary.columns_removed += 1,
                        ChangeType::TypeChanged => summary.columns_type_changed += 1,
                        ChangeType::NullabilityChanged => summary.columns_nullability_changed += 1,
                    }
                }
            }
        }

        summary.tables_modified = modified_tables.len();
        summary.total_changes = self.changes.len();
        summary
    }
}

impl<'a> IntoIterator for &'a Diff {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

/// The diff engine that compares two table sets
pub struct DiffEngine;

impl DiffEngine {
    /// Compare two table sets and return all differences.
    ///
    /// Fails only when one side is ambiguous: a duplicate (schema, table) key,
    /// or a table with duplicate column names.
    pub fn diff(before: &[Table], after: &[Table]) -> AppResult<Diff> {
        let before_map = Self::index_tables(before, "before")?;
        let after_map = Self::index_tables(after, "after")?;

        let mut changes = Vec::new();
        for old in before {
            match after_map.get(&table_key(old)) {
                Some(new) => Self::diff_columns(old, new, &mut changes),
                None => changes.push(Change::table_removed(old)),
            }
        }
        for new in after {
            if !before_map.contains_key(&table_key(new)) {
                changes.push(Change::table_added(new));
            }
        }

        debug!(
            "Diffed {} -> {} tables: {} changes",
            before.len(),
            after.len(),
            changes.len()
        );

        Ok(Diff::from_changes(changes))
    }

    fn index_tables<'a>(
        tables: &'a [Table],
        side: &str,
    ) -> AppResult<BTreeMap<(&'a str, &'a str), &'a Table>> {
        let mut map = BTreeMap::new();
        for table in tables {
            table.validate()?;
            if map.insert(table_key(table), table).is_some() {
                return Err(validation_error(format!(
                    "Duplicate table {} in {} schema",
                    table.qualified_name(),
                    side
                )));
            }
        }
        Ok(map)
    }

    fn diff_columns(old: &Table, new: &Table, changes: &mut Vec<Change>) {
        for before_col in old.columns_in_order() {
            match new.column(&before_col.column_name) {
                None => changes.push(Change::column_removed(before_col)),
                Some(after_col) => {
                    if let Some(change) = Self::compare_columns(before_col, after_col) {
                        changes.push(change);
                    }
                }
            }
        }

        for after_col in new.columns_in_order() {
            if old.column(&after_col.column_name).is_none() {
                changes.push(Change::column_added(after_col));
            }
        }
    }

    /// Type wins over nullability: at most one change per column.
    fn compare_columns(before: &Column, after: &Column) -> Option<Change> {
        if before.data_type != after.data_type {
            Some(Change::type_changed(before, after))
        } else if before.is_nullable != after.is_nullable {
            Some(Change::nullability_changed(before, after))
        } else {
            None
        }
    }
}

fn table_key(table: &Table) -> (&str, &str) {
    (table.schema_name.as_str(), table.table_name.as_str())
}

/// Compare two table sets. See [`DiffEngine::diff`].
pub fn diff(before: &[Table], after: &[Table]) -> AppResult<Diff> {
    DiffEngine::diff(before, after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn col(table: &str, name: &str, data_type: &str, nullable: bool, ordinal: u32) -> Column {
        Column::new("PUBLIC", table, name, data_type, nullable, ordinal)
    }

    fn customers() -> Table {
        Table::new(
            "PUBLIC",
            "CUSTOMERS",
            vec![
                col("CUSTOMERS", "ID", "NUMBER", false, 1),
                col("CUSTOMERS", "EMAIL", "VARCHAR", true, 2),
            ],
        )
    }

    #[test]
    fn test_identical_schemas_produce_empty_diff() {
        let tables = vec![customers()];
        let result = DiffEngine::diff(&tables, &tables).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.summary().total_changes, 0);
    }

    #[test]
    fn test_column_removed() {
        let before = vec![customers()];
        let mut after_table = customers();
        after_table.columns.retain(|c| c.column_name != "EMAIL");

        let result = DiffEngine::diff(&before, &[after_table]).unwrap();

        assert_eq!(result.len(), 1);
        let change = &result.changes()[0];
        assert_eq!(change.change_type, ChangeType::Removed);
        assert_eq!(change.object_type, ObjectType::Column);
        assert_eq!(change.column_name.as_deref(), Some("EMAIL"));
        assert_eq!(change.before_column().map(|c| c.data_type.as_str()), Some("VARCHAR"));
        assert!(change.after.is_none());
    }

    #[test]
    fn test_type_change_wins_over_nullability() {
        let before = vec![customers()];
        let after = vec![Table::new(
            "PUBLIC",
            "CUSTOMERS",
            vec![
                col("CUSTOMERS", "ID", "VARCHAR", true, 1),
                col("CUSTOMERS", "EMAIL", "VARCHAR", true, 2),
            ],
        )];

        let result = DiffEngine::diff(&before, &after).unwrap();

        assert_eq!(result.len(), 1);
        let change = &result.changes()[0];
        assert_eq!(change.change_type, ChangeType::TypeChanged);
        assert!(change.nullability_also_changed());
        assert_eq!(change.before_column().map(|c| c.is_nullable), Some(false));
        assert_eq!(change.after_column().map(|c| c.is_nullable), Some(true));
    }

    #[test]
    fn test_nullability_change() {
        let before = vec![customers()];
        let mut after_table = customers();
        after_table.columns[1].is_nullable = false;

        let result = DiffEngine::diff(&before, &[after_table]).unwrap();

        assert_eq!(result.len(), 1);
        let change = &result.changes()[0];
        assert_eq!(change.change_type, ChangeType::NullabilityChanged);
        assert_eq!(change.before_column().map(|c| c.is_nullable), Some(true));
        assert_eq!(change.after_column().map(|c| c.is_nullable), Some(false));
    }

    #[test]
    fn test_type_comparison_is_exact() {
        let before = vec![customers()];
        let mut after_table = customers();
        after_table.columns[1].data_type = "varchar".to_string();

        let result = DiffEngine::diff(&before, &[after_table]).unwrap();
        assert_eq!(result.changes()[0].change_type, ChangeType::TypeChanged);
    }

    #[test]
    fn test_new_table_is_a_single_change() {
        let result = DiffEngine::diff(&[], &[customers()]).unwrap();

        assert_eq!(result.len(), 1);
        let change = &result.changes()[0];
        assert_eq!(change.change_type, ChangeType::Added);
        assert_eq!(change.object_type, ObjectType::Table);
        assert_eq!(change.column_name, None);
        assert_eq!(result.summary().tables_added, 1);
        assert_eq!(result.summary().columns_added, 0);
    }

    #[test]
    fn test_dropped_table_is_a_single_change() {
        let result = DiffEngine::diff(&[customers()], &[]).unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result.changes()[0].change_type, ChangeType::Removed);
        assert_eq!(
            result.changes()[0].before_table().map(|t| t.columns.len()),
            Some(2)
        );
    }

    #[test]
    fn test_duplicate_table_key_is_rejected() {
        let before = vec![customers(), customers()];
        let err = DiffEngine::diff(&before, &[]).unwrap_err();
        assert!(err.is_caller_error());
        assert!(err.to_string().contains("PUBLIC.CUSTOMERS"));
    }

    #[test]
    fn test_column_order_follows_ordinal_not_input() {
        let before = vec![Table::new("PUBLIC", "T", vec![col("T", "A", "INT", true, 1)])];
        let after = vec![Table::new(
            "PUBLIC",
            "T",
            vec![
                col("T", "A", "INT", true, 1),
                col("T", "Z", "INT", true, 3),
                col("T", "B", "INT", true, 2),
            ],
        )];

        let result = DiffEngine::diff(&before, &after).unwrap();
        let added: Vec<&str> = result
            .iter()
            .filter_map(|c| c.column_name.as_deref())
            .collect();
        assert_eq!(added, vec!["B", "Z"]);
    }

    #[test]
    fn test_tables_follow_input_order() {
        let zed = Table::new("PUBLIC", "ZED", vec![col("ZED", "ID", "INT", false, 1)]);
        let alpha = Table::new("PUBLIC", "ALPHA", vec![col("ALPHA", "ID", "INT", false, 1)]);
        let beta = Table::new("PUBLIC", "BETA", vec![col("BETA", "ID", "INT", false, 1)]);
        let mut zed_after = zed.clone();
        zed_after.columns[0].data_type = "BIGINT".to_string();

        let result = DiffEngine::diff(&[zed, alpha], &[beta, zed_after]).unwrap();

        let tables: Vec<(&str, ChangeType)> = result
            .iter()
            .map(|c| (c.table_name.as_str(), c.change_type))
            .collect();
        assert_eq!(
            tables,
            vec![
                ("ZED", ChangeType::TypeChanged),
                ("ALPHA", ChangeType::Removed),
                ("BETA", ChangeType::Added),
            ]
        );
    }

    #[test]
    fn test_summary_counts() {
        let before = vec![
            customers(),
            Table::new("PUBLIC", "LEGACY", vec![col("LEGACY", "ID", "INT", false, 1)]),
        ];
        let mut changed = customers();
        changed.columns.retain(|c| c.column_name != "EMAIL");
        changed.columns.push(col("CUSTOMERS", "PHONE", "VARCHAR", true, 3));
        let after = vec![changed];

        let summary = DiffEngine::diff(&before, &after).unwrap().summary();

        assert_eq!(
            summary,
            DiffSummary {
                tables_added: 0,
                tables_removed: 1,
                tables_modified: 1,
                columns_added: 1,
                columns_removed: 1,
                columns_type_changed: 0,
                columns_nullability_changed: 0,
                total_changes: 3,
            }
        );
    }

    fn arb_table() -> impl Strategy<Value = Table> {
        (
            "[A-C]",
            prop::collection::btree_map("[a-e]", ("INT|TEXT|DATE", any::<bool>()), 0..5),
        )
            .prop_map(|(name, cols)| {
                let columns = cols
                    .into_iter()
                    .enumerate()
                    .map(|(i, (col_name, (ty, nullable)))| {
                        Column::new("S", name.as_str(), col_name, ty, nullable, i as u32 + 1)
                    })
                    .collect();
                Table::new("S", name, columns)
            })
    }

    fn arb_schema() -> impl Strategy<Value = Vec<Table>> {
        prop::collection::btree_map("[A-C]", arb_table(), 0..3).prop_map(|tables| {
            tables
                .into_iter()
                .map(|(name, mut table)| {
                    table.table_name = name.clone();
                    for c in &mut table.columns {
                        c.table_name = name.clone();
                    }
                    table
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_diff_against_self_is_empty(schema in arb_schema()) {
            prop_assert!(DiffEngine::diff(&schema, &schema).unwrap().is_empty());
        }

        #[test]
        fn prop_column_changes_differ_in_their_dimension(before in arb_schema(), after in arb_schema()) {
            let result = DiffEngine::diff(&before, &after).unwrap();
            for change in result.column_changes() {
                let (Some(old), Some(new)) = (change.before_column(), change.after_column()) else {
                    continue;
                };
                match change.change_type {
                    ChangeType::TypeChanged => {
                        prop_assert_ne!(&old.data_type, &new.data_type);
                        prop_assert_eq!(
                            change.nullability_also_changed(),
                            old.is_nullable != new.is_nullable
                        );
                    }
                    ChangeType::NullabilityChanged => {
                        prop_assert_eq!(&old.data_type, &new.data_type);
                        prop_assert_ne!(old.is_nullable, new.is_nullable);
                        prop_assert!(!change.nullability_also_changed());
                    }
                    _ => {}
                }
            }
        }

        #[test]
        fn prop_at_most_one_change_per_column(before in arb_schema(), after in arb_schema()) {
            let result = DiffEngine::diff(&before, &after).unwrap();
            let mut seen = BTreeSet::new();
            for change in result.iter() {
                prop_assert!(seen.insert(change.object_path()));
            }
        }
    }
}
