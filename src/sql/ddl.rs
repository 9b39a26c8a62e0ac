//! DDL replay: apply CREATE / ALTER / DROP TABLE statements to a base schema
//! to obtain the "after" table set without a live warehouse.

use async_trait::async_trait;
use sqlparser::ast::{
    AlterColumnOperation, AlterTableOperation, ColumnDef, ColumnOption, CreateTable, Ident,
    ObjectName, ObjectType as SqlObjectType, Statement, TableConstraint,
};
use sqlparser::parser::Parser;
use tracing::{debug, warn};

use super::{SqlDialect, RECURSION_LIMIT};
use crate::error::AppResult;
use crate::models::{Column, Table};
use crate::warehouse::SchemaSource;

/// Apply `sql_text` on top of `base` and return the resulting tables.
///
/// Statements other than CREATE/ALTER/DROP TABLE are skipped. ALTERs that
/// target a table not present in the working set are skipped with a warning.
/// DDL that does not parse leaves `base` unchanged.
pub fn parse_ddl(sql_text: &str, base: &[Table], dialect: SqlDialect) -> Vec<Table> {
    let parser_dialect = dialect.parser_dialect();
    let parsed = Parser::new(parser_dialect.as_ref())
        .with_recursion_limit(RECURSION_LIMIT)
        .try_with_sql(sql_text)
        .and_then(|mut parser| parser.parse_statements());
    let statements = match parsed {
        Ok(statements) => statements,
        Err(e) => {
            warn!(dialect = %dialect, error = %e, "DDL parse failed, keeping base schema");
            return base.to_vec();
        }
    };

    let mut replay = DdlReplay {
        dialect,
        tables: base.to_vec(),
    };

    for statement in &statements {
        match statement {
            Statement::CreateTable(create) => replay.create_table(create),
            Statement::AlterTable {
                name, operations, ..
            } => replay.alter_table(name, operations),
            Statement::Drop {
                object_type: SqlObjectType::Table,
                names,
                ..
            } => {
                for name in names {
                    replay.drop_table(name);
                }
            }
            other => debug!("Skipping non-table DDL: {}", other),
        }
    }

    debug!(
        "Replayed {} DDL statements onto {} base tables -> {} tables",
        statements.len(),
        base.len(),
        replay.tables.len()
    );

    replay.tables
}

struct DdlReplay {
    dialect: SqlDialect,
    tables: Vec<Table>,
}

impl DdlReplay {
    /// Unquoted identifiers fold the way the target warehouse folds them
    fn normalize(&self, ident: &Ident) -> String {
        if ident.quote_style.is_some() {
            return ident.value.clone();
        }
        match self.dialect {
            SqlDialect::Snowflake => ident.value.to_uppercase(),
            SqlDialect::Postgres | SqlDialect::Redshift => ident.value.to_lowercase(),
            _ => ident.value.clone(),
        }
    }

    fn default_schema(&self) -> String {
        self.normalize(&Ident::new("public"))
    }

    fn split_name(&self, name: &ObjectName) -> Option<(String, String)> {
        let mut parts = name.0.iter().rev();
        let table = self.normalize(parts.next()?);
        let schema = parts
            .next()
            .map(|i| self.normalize(i))
            .unwrap_or_else(|| self.default_schema());
        Some((schema, table))
    }

    fn position(&self, schema: &str, table: &str) -> Option<usize> {
        self.tables.iter().position(|t| {
            t.schema_name.eq_ignore_ascii_case(schema) && t.table_name.eq_ignore_ascii_case(table)
        })
    }

    fn column_from_def(&self, schema: &str, table: &str, def: &ColumnDef, ordinal: u32) -> Column {
        let options: Vec<&ColumnOption> = def.options.iter().map(|o| &o.option).collect();
        Column::new(
            schema,
            table,
            self.normalize(&def.name),
            def.data_type.to_string(),
            is_nullable(&options),
            ordinal,
        )
    }

    fn create_table(&mut self, create: &CreateTable) {
        let Some((schema, name)) = self.split_name(&create.name) else {
            return;
        };

        let columns = create
            .columns
            .iter()
            .enumerate()
            .map(|(i, def)| self.column_from_def(&schema, &name, def, i as u32 + 1))
            .collect();
        let mut table = Table::new(&schema, &name, columns);
        for constraint in &create.constraints {
            mark_not_null(&mut table, &self.primary_key_columns(constraint));
        }

        match self.position(&schema, &name) {
            Some(index) => self.tables[index] = table,
            None => self.tables.push(table),
        }
    }

    fn primary_key_columns(&self, constraint: &TableConstraint) -> Vec<String> {
        match constraint {
            TableConstraint::PrimaryKey { columns, .. } => {
                columns.iter().map(|ident| self.normalize(ident)).collect()
            }
            _ => Vec::new(),
        }
    }

    fn drop_table(&mut self, name: &ObjectName) {
        if let Some((schema, table)) = self.split_name(name) {
            if let Some(index) = self.position(&schema, &table) {
                self.tables.remove(index);
            }
        }
    }

    fn alter_table(&mut self, name: &ObjectName, operations: &[AlterTableOperation]) {
        let Some((schema, table_name)) = self.split_name(name) else {
            return;
        };
        let Some(index) = self.position(&schema, &table_name) else {
            warn!("ALTER TABLE on unknown table {}.{}, skipping", schema, table_name);
            return;
        };

        for operation in operations {
            let normalized = match operation {
                AlterTableOperation::AddColumn { column_def, .. } => {
                    Some(self.normalize(&column_def.name))
                }
                AlterTableOperation::DropColumn { column_name, .. }
                | AlterTableOperation::AlterColumn { column_name, .. } => {
                    Some(self.normalize(column_name))
                }
                AlterTableOperation::ModifyColumn { col_name, .. } => Some(self.normalize(col_name)),
                _ => None,
            };

            let table = &self.tables[index];
            let (table_schema, table_table) = (table.schema_name.clone(), table.table_name.clone());
            let next_ordinal = table
                .columns
                .iter()
                .map(|c| c.ordinal_position)
                .max()
                .unwrap_or(0)
                + 1;

            match operation {
                AlterTableOperation::AddColumn { column_def, .. } => {
                    let column =
                        self.column_from_def(&table_schema, &table_table, column_def, next_ordinal);
                    let table = &mut self.tables[index];
                    table
                        .columns
                        .retain(|c| !c.column_name.eq_ignore_ascii_case(&column.column_name));
                    table.columns.push(column);
                }
                AlterTableOperation::DropColumn { .. } => {
                    if let Some(column_name) = normalized {
                        self.tables[index]
                            .columns
                            .retain(|c| !c.column_name.eq_ignore_ascii_case(&column_name));
                    }
                }
                AlterTableOperation::RenameColumn {
                    old_column_name,
                    new_column_name,
                } => {
                    let old = self.normalize(old_column_name);
                    let new = self.normalize(new_column_name);
                    if let Some(column) = find_column(&mut self.tables[index], &old) {
                        column.column_name = new;
                    }
                }
                AlterTableOperation::AlterColumn { op, .. } => {
                    let Some(column_name) = normalized else { continue };
                    let Some(column) = find_column(&mut self.tables[index], &column_name) else {
                        continue;
                    };
                    match op {
                        AlterColumnOperation::SetNotNull => column.is_nullable = false,
                        AlterColumnOperation::DropNotNull => column.is_nullable = true,
                        AlterColumnOperation::SetDataType { data_type, .. } => {
                            column.data_type = data_type.to_string()
                        }
                        _ => {}
                    }
                }
                AlterTableOperation::ModifyColumn {
                    data_type, options, ..
                } => {
                    let Some(column_name) = normalized else { continue };
                    let Some(column) = find_column(&mut self.tables[index], &column_name) else {
                        continue;
                    };
                    let options: Vec<&ColumnOption> = options.iter().collect();
                    column.data_type = data_type.to_string();
                    column.is_nullable = is_nullable(&options);
                }
                AlterTableOperation::AddConstraint(constraint) => {
                    let columns = self.primary_key_columns(constraint);
                    mark_not_null(&mut self.tables[index], &columns);
                }
                other => debug!("Skipping ALTER TABLE operation: {}", other),
            }
        }
    }
}

fn find_column<'a>(table: &'a mut Table, name: &str) -> Option<&'a mut Column> {
    table
        .columns
        .iter_mut()
        .find(|c| c.column_name.eq_ignore_ascii_case(name))
}

/// Primary key columns are NOT NULL
fn mark_not_null(table: &mut Table, columns: &[String]) {
    for name in columns {
        if let Some(column) = find_column(table, name) {
            column.is_nullable = false;
        }
    }
}

fn is_nullable(options: &[&ColumnOption]) -> bool {
    !options.iter().any(|option| {
        matches!(
            option,
            ColumnOption::NotNull | ColumnOption::Unique { is_primary: true, .. }
        )
    })
}

/// Schema source backed by tables replayed from DDL
#[derive(Debug, Clone)]
pub struct DdlSchemaSource {
    tables: Vec<Table>,
}

impl DdlSchemaSource {
    pub fn new(tables: Vec<Table>) -> Self {
        Self { tables }
    }

    pub fn from_ddl(sql_text: &str, base: &[Table], dialect: SqlDialect) -> Self {
        Self::new(parse_ddl(sql_text, base, dialect))
    }
}

#[async_trait]
impl SchemaSource for DdlSchemaSource {
    fn name(&self) -> &str {
        "ddl"
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
