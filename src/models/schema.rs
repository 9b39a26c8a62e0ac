//! Relational schema metadata: tables, columns and qualified names.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{validation_error, AppResult};

/// A single column as captured from a warehouse or parsed DDL
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    pub schema_name: String,
    pub table_name: String,
    pub column_name: String,
    /// Exact type text; no normalization is applied
    pub data_type: String,
    pub is_nullable: bool,
    /// 1-based position within the table
    pub ordinal_position: u32,
}

impl Column {
    pub fn new(
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
        column_name: impl Into<String>,
        data_type: impl Into<String>,
        is_nullable: bool,
        ordinal_position: u32,
    ) -> Self {
        Self {
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            column_name: column_name.into(),
            data_type: data_type.into(),
            is_nullable,
            ordinal_position,
        }
    }
}

/// A table and its columns. Column order in `columns` carries no meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub schema_name: String,
    pub table_name: String,
    #[serde(default)]
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
        columns: Vec<Column>,
    ) -> Self {
        Self {
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            columns,
        }
    }

    pub fn qualified_name(&self) -> QualifiedName {
        QualifiedName::new(&self.schema_name, &self.table_name)
    }

    /// Find a column by exact name
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.column_name == name)
    }

    /// Columns sorted by ordinal position, ties broken by name
    pub fn columns_in_order(&self) -> Vec<&Column> {
        let mut ordered: Vec<&Column> = self.columns.iter().collect();
        ordered.sort_by(|a, b| {
            a.ordinal_position
                .cmp(&b.ordinal_position)
                .then_with(|| a.column_name.cmp(&b.column_name))
        });
        ordered
    }

    /// Reject tables whose column identity is ambiguous
    pub fn validate(&self) -> AppResult<()> {
        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.ordinal_position == 0 {
                return Err(validation_error(format!(
                    "Column {}.{} has ordinal position 0; positions are 1-based",
                    self.qualified_name(),
                    column.column_name
                )));
            }
            if !seen.insert(column.column_name.as_str()) {
                return Err(validation_error(format!(
                    "Duplicate column '{}' in table {}",
                    column.column_name,
                    self.qualified_name()
                )));
            }
        }
        Ok(())
    }
}

/// A schema-qualified object name. Equality is exact; use [`QualifiedName::key`]
/// for case-insensitive identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedName {
    pub schema: String,
    pub name: String,
}

impl QualifiedName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Case-folded identity used for visited sets and lookups
    pub fn key(&self) -> (String, String) {
        (self.schema.to_lowercase(), self.name.to_lowercase())
    }

    pub fn matches(&self, other: &QualifiedName) -> bool {
        self.schema.eq_ignore_ascii_case(&other.schema) && self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Compute a content checksum for a set of tables.
///
/// Input order does not affect the result.
pub fn schema_checksum(tables: &[Table]) -> String {
    let mut hasher = Sha256::new();

    let mut ordered: Vec<&Table> = tables.iter().collect();
    ordered.sort_by(|a, b| {
        (&a.schema_name, &a.table_name).cmp(&(&b.schema_name, &b.table_name))
    });

    for table in ordered {
        hasher.update(format!("T:{}.{}\n", table.schema_name, table.table_name).as_bytes());
        for col in table.columns_in_order() {
            hasher.update(
                format!(
                    "C:{}:{}:{}:{}\n",
                    col.column_name, col.data_type, col.is_nullable, col.ordinal_position
                )
                .as_bytes(),
            );
        }
    }

    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> Table {
        Table::new(
            "PUBLIC",
            "ORDERS",
            vec![
                Column::new("PUBLIC", "ORDERS", "STATUS", "VARCHAR", true, 2),
                Column::new("PUBLIC", "ORDERS", "ID", "NUMBER", false, 1),
            ],
        )
    }

    #[test]
    fn test_columns_in_order_sorts_by_ordinal() {
        let table = orders();
        let names: Vec<&str> = table
            .columns_in_order()
            .iter()
            .map(|c| c.column_name.as_str())
            .collect();
        assert_eq!(names, vec!["ID", "STATUS"]);
    }

    #[test]
    fn test_duplicate_column_is_rejected() {
        let mut table = orders();
        table
            .columns
            .push(Column::new("PUBLIC", "ORDERS", "ID", "NUMBER", true, 3));
        assert!(table.validate().is_err());
        assert!(orders().validate().is_ok());
    }

    #[test]
    fn test_checksum_ignores_input_order() {
        let a = orders();
        let b = Table::new("PUBLIC", "CUSTOMERS", vec![]);
        let forward = schema_checksum(&[a.clone(), b.clone()]);
        let reverse = schema_checksum(&[b, a.clone()]);
        assert_eq!(forward, reverse);
        assert_ne!(forward, schema_checksum(&[a]));
    }

    #[test]
    fn test_qualified_name_key_is_case_insensitive() {
        let upper = QualifiedName::new("PUBLIC", "ORDERS");
        let lower = QualifiedName::new("public", "orders");
        assert_ne!(upper, lower);
        assert_eq!(upper.key(), lower.key());
        assert!(upper.matches(&lower));
        assert_eq!(upper.to_string(), "PUBLIC.ORDERS");
    }
}
