//! SQL Signal Extractor
//!
//! Pulls join keys, group-by columns, selected columns and referenced tables
//! out of view/model definitions. Extraction never fails: unparseable SQL
//! yields an empty [`SignalSet`] and a warning in the log.
//!
//! Identifiers are lowercased. Column qualifiers are resolved through the
//! enclosing SELECT's table aliases; a bare column in a single-table SELECT is
//! attributed to that table, otherwise it stays unqualified.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    visit_expressions, visit_relations, BinaryOperator, CreateTable, Expr, GroupByExpr, Insert,
    Join, JoinConstraint, JoinOperator, ObjectName, Query, Select, SelectItem, SetExpr, Statement,
    TableFactor, TableWithJoins,
};
use sqlparser::parser::{Parser, ParserError};
use tracing::{debug, warn};

use super::{SqlDialect, RECURSION_LIMIT};

/// A column reference, optionally qualified by its (resolved) table name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedColumn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub column: String,
}

impl QualifiedColumn {
    pub fn new(table: Option<&str>, column: &str) -> Self {
        Self {
            table: table.map(str::to_lowercase),
            column: column.to_lowercase(),
        }
    }

    /// Case-insensitive match against a physical column. An unqualified
    /// reference matches any table.
    pub fn matches(&self, table: &str, column: &str) -> bool {
        if !self.column.eq_ignore_ascii_case(column) {
            return false;
        }
        match &self.table {
            Some(qualifier) => qualifier.eq_ignore_ascii_case(table),
            None => true,
        }
    }
}

impl fmt::Display for QualifiedColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.column),
            None => f.write_str(&self.column),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedTable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub name: String,
}

impl QualifiedTable {
    fn from_object_name(name: &ObjectName) -> Option<Self> {
        let mut parts = name.0.iter().rev();
        let table = parts.next()?.value.to_lowercase();
        let schema = parts.next().map(|i| i.value.to_lowercase());
        Some(Self {
            schema,
            name: table,
        })
    }
}

/// Usage signals extracted from one or more SQL definitions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSet {
    pub join_keys: BTreeSet<QualifiedColumn>,
    pub group_by_columns: BTreeSet<QualifiedColumn>,
    pub selected_columns: BTreeSet<QualifiedColumn>,
    pub referenced_tables: BTreeSet<QualifiedTable>,
}

impl SignalSet {
    pub fn is_empty(&self) -> bool {
        self.join_keys.is_empty()
            && self.group_by_columns.is_empty()
            && self.selected_columns.is_empty()
            && self.referenced_tables.is_empty()
    }

    /// Union of several signal sets
    pub fn union<I>(sets: I) -> Self
    where
        I: IntoIterator<Item = SignalSet>,
    {
        sets.into_iter().fold(SignalSet::default(), |mut acc, set| {
            acc.join_keys.extend(set.join_keys);
            acc.group_by_columns.extend(set.group_by_columns);
            acc.selected_columns.extend(set.selected_columns);
            acc.referenced_tables.extend(set.referenced_tables);
            acc
        })
    }

    pub fn find_join_key(&self, table: &str, column: &str) -> Option<&QualifiedColumn> {
        self.join_keys.iter().find(|c| c.matches(table, column))
    }

    pub fn find_group_by(&self, table: &str, column: &str) -> Option<&QualifiedColumn> {
        self.group_by_columns.iter().find(|c| c.matches(table, column))
    }

    pub fn find_selected(&self, table: &str, column: &str) -> Option<&QualifiedColumn> {
        self.selected_columns.iter().find(|c| c.matches(table, column))
    }
}

/// Outcome of extracting signals from a map of named definitions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalExtraction {
    /// `None` when no definitions were supplied
    pub signals: Option<SignalSet>,
    /// Names of definitions that failed to parse
    pub failed: Vec<String>,
}

/// Parse `sql_text` and extract signals, surfacing the parser error.
pub fn try_extract_signals(sql_text: &str, dialect: SqlDialect) -> Result<SignalSet, ParserError> {
    let parser_dialect = dialect.parser_dialect();
    let statements = Parser::new(parser_dialect.as_ref())
        .with_recursion_limit(RECURSION_LIMIT)
        .try_with_sql(sql_text)?
        .parse_statements()?;

    let mut collector = SignalCollector::default();
    for statement in &statements {
        collector.visit_statement(statement);
    }
    Ok(collector.finish())
}

/// Extract signals from SQL text. Parse failures yield an empty set.
pub fn extract_signals(sql_text: &str, dialect: SqlDialect) -> SignalSet {
    match try_extract_signals(sql_text, dialect) {
        Ok(signals) => signals,
        Err(e) => {
            warn!(dialect = %dialect, error = %e, "SQL parse failed, no signals extracted");
            SignalSet::default()
        }
    }
}

/// Extract and merge signals from every definition.
pub fn extract_all(definitions: &BTreeMap<String, String>, dialect: SqlDialect) -> SignalExtraction {
    if definitions.is_empty() {
        return SignalExtraction::default();
    }

    let mut failed = Vec::new();
    let mut sets = Vec::with_capacity(definitions.len());
    for (name, sql_text) in definitions {
        match try_extract_signals(sql_text, dialect) {
            Ok(signals) => sets.push(signals),
            Err(e) => {
                warn!(definition = %name, dialect = %dialect, error = %e, "SQL parse failed, skipping definition");
                failed.push(name.clone());
            }
        }
    }

    let signals = SignalSet::union(sets);
    debug!(
        "Extracted signals from {} definitions: {} join keys, {} group-by, {} selected, {} tables",
        definitions.len(),
        signals.join_keys.len(),
        signals.group_by_columns.len(),
        signals.selected_columns.len(),
        signals.referenced_tables.len()
    );

    SignalExtraction {
        signals: Some(signals),
        failed,
    }
}

// ============================================================================
// AST walk
// ============================================================================

/// Table aliases visible in one SELECT
#[derive(Default)]
struct Scope {
    aliases: HashMap<String, String>,
    tables: Vec<String>,
}

impl Scope {
    fn resolve(&self, qualifier: &str) -> String {
        let qualifier = qualifier.to_lowercase();
        self.aliases.get(&qualifier).cloned().unwrap_or(qualifier)
    }

    fn sole_table(&self) -> Option<&str> {
        match self.tables.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }
}

#[derive(Default)]
struct SignalCollector {
    signals: SignalSet,
    cte_names: HashSet<String>,
}

impl SignalCollector {
    fn finish(mut self) -> SignalSet {
        let cte_names = self.cte_names;
        self.signals
            .referenced_tables
            .retain(|t| t.schema.is_some() || !cte_names.contains(&t.name));
        self.signals
    }

    fn visit_statement(&mut self, statement: &Statement) {
        let _ = visit_relations(statement, |name| {
            if let Some(table) = QualifiedTable::from_object_name(name) {
                self.signals.referenced_tables.insert(table);
            }
            ControlFlow::<()>::Continue(())
        });

        match statement {
            Statement::Query(query) => self.visit_query(query),
            Statement::CreateView { query, .. } => self.visit_query(query),
            Statement::CreateTable(CreateTable {
                query: Some(query), ..
            }) => self.visit_query(query),
            Statement::Insert(Insert {
                source: Some(query), ..
            }) => self.visit_query(query),
            _ => {}
        }
    }

    fn visit_query(&mut self, query: &Query) {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.cte_names.insert(cte.alias.name.value.to_lowercase());
                self.visit_query(&cte.query);
            }
        }
        self.visit_set_expr(&query.body);
    }

    fn visit_set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => self.visit_select(select),
            SetExpr::Query(query) => self.visit_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.visit_set_expr(left);
                self.visit_set_expr(right);
            }
            _ => {}
        }
    }

    fn visit_select(&mut self, select: &Select) {
        let mut factors = Vec::new();
        let mut joins = Vec::new();
        for from in &select.from {
            flatten_from(from, &mut factors, &mut joins);
        }

        let mut scope = Scope::default();
        for factor in factors {
            match factor {
                TableFactor::Table { name, alias, .. } => {
                    if let Some(table) = name.0.last().map(|i| i.value.to_lowercase()) {
                        if let Some(alias) = alias {
                            scope
                                .aliases
                                .insert(alias.name.value.to_lowercase(), table.clone());
                        }
                        scope.tables.push(table);
                    }
                }
                TableFactor::Derived { subquery, .. } => self.visit_query(subquery),
                _ => {}
            }
        }

        for join in joins {
            if let Some(JoinConstraint::On(condition)) = join_constraint(&join.join_operator) {
                self.collect_join_keys(condition, &scope);
            }
        }

        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                    let columns = column_refs(expr, &scope);
                    self.signals.selected_columns.extend(columns);
                }
                _ => {}
            }
        }

        if let GroupByExpr::Expressions(exprs, ..) = &select.group_by {
            for expr in exprs {
                let columns = column_refs(expr, &scope);
                self.signals.group_by_columns.extend(columns);
            }
        }
    }

    /// Equalities between two columns, through AND/OR and parentheses
    fn collect_join_keys(&mut self, condition: &Expr, scope: &Scope) {
        match condition {
            Expr::BinaryOp { left, op, right } => match op {
                BinaryOperator::Eq => {
                    if let (Some(l), Some(r)) = (column_ref(left, scope), column_ref(right, scope)) {
                        self.signals.join_keys.insert(l);
                        self.signals.join_keys.insert(r);
                    }
                }
                BinaryOperator::And | BinaryOperator::Or => {
                    self.collect_join_keys(left, scope);
                    self.collect_join_keys(right, scope);
                }
                _ => {}
            },
            Expr::Nested(inner) => self.collect_join_keys(inner, scope),
            _ => {}
        }
    }
}

fn flatten_from<'a>(
    from: &'a TableWithJoins,
    factors: &mut Vec<&'a TableFactor>,
    joins: &mut Vec<&'a Join>,
) {
    push_factor(&from.relation, factors, joins);
    for join in &from.joins {
        push_factor(&join.relation, factors, joins);
        joins.push(join);
    }
}

fn push_factor<'a>(
    factor: &'a TableFactor,
    factors: &mut Vec<&'a TableFactor>,
    joins: &mut Vec<&'a Join>,
) {
    match factor {
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => flatten_from(table_with_joins, factors, joins),
        other => factors.push(other),
    }
}

fn join_constraint(operator: &JoinOperator) -> Option<&JoinConstraint> {
    match operator {
        JoinOperator::Inner(c)
        | JoinOperator::LeftOuter(c)
        | JoinOperator::RightOuter(c)
        | JoinOperator::FullOuter(c)
        | JoinOperator::LeftSemi(c)
        | JoinOperator::RightSemi(c)
        | JoinOperator::LeftAnti(c)
        | JoinOperator::RightAnti(c) => Some(c),
        _ => None,
    }
}

fn column_ref(expr: &Expr, scope: &Scope) -> Option<QualifiedColumn> {
    match expr {
        Expr::Identifier(ident) => Some(QualifiedColumn::new(scope.sole_table(), &ident.value)),
        Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
            let column = &parts[parts.len() - 1].value;
            let qualifier = scope.resolve(&parts[parts.len() - 2].value);
            Some(QualifiedColumn::new(Some(&qualifier), column))
        }
        Expr::Nested(inner) => column_ref(inner, scope),
        Expr::Cast { expr, .. } => column_ref(expr, scope),
        _ => None,
    }
}

/// Every column referenced anywhere inside `expr`
fn column_refs(expr: &Expr, scope: &Scope) -> Vec<QualifiedColumn> {
    let mut found = Vec::new();
    let _ = visit_expressions(expr, |e| {
        if let Expr::Identifier(_) | Expr::CompoundIdentifier(_) = e {
            if let Some(column) = column_ref(e, scope) {
                found.push(column);
            }
        }
        ControlFlow::<()>::Continue(())
    });
    found
}
