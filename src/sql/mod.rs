//! SQL handling: signal extraction from definitions and DDL replay.

pub mod ddl;
pub mod signals;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlparser::dialect::{
    BigQueryDialect, DatabricksDialect, Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect,
    RedshiftSqlDialect, SnowflakeDialect,
};

pub use ddl::{parse_ddl, DdlSchemaSource};
pub use signals::{extract_all, extract_signals, QualifiedColumn, QualifiedTable, SignalSet};

/// Deep nesting in generated SQL should fail the parse, not the stack.
pub(crate) const RECURSION_LIMIT: usize = 64;

/// SQL dialect used to parse definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    Snowflake,
    Postgres,
    MySql,
    BigQuery,
    Databricks,
    Redshift,
    Generic,
}

impl SqlDialect {
    pub fn parser_dialect(self) -> Box<dyn Dialect> {
        match self {
            SqlDialect::Snowflake => Box::new(SnowflakeDialect {}),
            SqlDialect::Postgres => Box::new(PostgreSqlDialect {}),
            SqlDialect::MySql => Box::new(MySqlDialect {}),
            SqlDialect::BigQuery => Box::new(BigQueryDialect {}),
            SqlDialect::Databricks => Box::new(DatabricksDialect {}),
            SqlDialect::Redshift => Box::new(RedshiftSqlDialect {}),
            SqlDialect::Generic => Box::new(GenericDialect {}),
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlDialect::Snowflake => "snowflake",
            SqlDialect::Postgres => "postgres",
            SqlDialect::MySql => "mysql",
            SqlDialect::BigQuery => "bigquery",
            SqlDialect::Databricks => "databricks",
            SqlDialect::Redshift => "redshift",
            SqlDialect::Generic => "generic",
        };
        f.write_str(name)
    }
}

impl FromStr for SqlDialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "snowflake" => Ok(SqlDialect::Snowflake),
            "postgres" | "postgresql" => Ok(SqlDialect::Postgres),
            "mysql" => Ok(SqlDialect::MySql),
            "bigquery" => Ok(SqlDialect::BigQuery),
            "databricks" => Ok(SqlDialect::Databricks),
            "redshift" => Ok(SqlDialect::Redshift),
            "generic" | "ansi" => Ok(SqlDialect::Generic),
            other => Err(format!("Unknown SQL dialect '{}'", other)),
        }
    }
}
