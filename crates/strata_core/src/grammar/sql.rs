use crate::ir::{parse_aggregate_expression, Connector, QueryIr, QueryKind, WhereClause};
use crate::{OrmError, OrmResult, Statement, Value};

/// Placeholder style for parameterized statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?` placeholders (SQLite, MySQL).
    QuestionMark,
    /// `$1`, `$2`, ... (PostgreSQL).
    DollarNumber,
}

/// How LIMIT/OFFSET is spelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitStyle {
    /// `LIMIT n OFFSET o`.
    LimitOffset,
    /// MySQL's `LIMIT o, n`.
    CommaLimit,
}

/// How an upsert is spelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStyle {
    /// `ON CONFLICT (cols) DO UPDATE / DO NOTHING` (PostgreSQL, SQLite).
    OnConflict,
    /// `ON DUPLICATE KEY UPDATE` / `INSERT IGNORE` (MySQL).
    OnDuplicateKey,
}

/// Dialect hooks the shared SQL skeleton is parameterized by.
pub trait SqlDialect: Send + Sync {
    /// Quote a single identifier (no qualification, no expressions).
    fn quote_identifier(&self, name: &str) -> String;

    fn placeholder_style(&self) -> PlaceholderStyle;

    fn limit_style(&self) -> LimitStyle {
        LimitStyle::LimitOffset
    }

    fn upsert_style(&self) -> UpsertStyle;

    /// Whether INSERT/UPDATE/DELETE accept a RETURNING clause.
    fn supports_returning(&self) -> bool {
        false
    }
}

/// One compilation pass over a dialect. Tracks placeholder numbering so
/// `$n` dialects stay in emission order across CTEs and sub-queries.
pub(crate) struct SqlCompiler<'a> {
    dialect: &'a dyn SqlDialect,
    placeholders: usize,
}

impl<'a> SqlCompiler<'a> {
    pub(crate) fn new(dialect: &'a dyn SqlDialect) -> Self {
        Self {
            dialect,
            placeholders: 0,
        }
    }

    pub(crate) fn compile(&mut self, ir: &QueryIr) -> OrmResult<Statement> {
        self.reject_wide_column_options(ir)?;

        match ir.kind {
            QueryKind::Select => self.compile_select(ir),
            QueryKind::Insert => self.compile_insert(ir),
            QueryKind::Update => self.compile_update(ir),
            QueryKind::Delete => self.compile_delete(ir),
        }
    }

    fn reject_wide_column_options(&self, ir: &QueryIr) -> OrmResult<()> {
        if ir.ttl.is_some() {
            return Err(OrmError::unsupported(
                "TTL is only available on the wide-column backend",
            ));
        }
        if ir.allow_filtering {
            return Err(OrmError::unsupported(
                "ALLOW FILTERING is only available on the wide-column backend",
            ));
        }
        if ir.if_not_exists || !ir.if_conditions.is_empty() {
            return Err(OrmError::unsupported(
                "lightweight transactions are only available on the wide-column backend",
            ));
        }
        Ok(())
    }

    fn placeholder(&mut self) -> String {
        self.placeholders += 1;
        match self.dialect.placeholder_style() {
            PlaceholderStyle::QuestionMark => "?".to_string(),
            PlaceholderStyle::DollarNumber => format!("${}", self.placeholders),
        }
    }

    fn quote(&self, name: &str) -> String {
        self.dialect.quote_identifier(name)
    }

    /// Quote a possibly qualified column reference (`users.id`).
    fn quote_column(&self, column: &str) -> String {
        if column == "*" {
            return "*".to_string();
        }
        column
            .split('.')
            .map(|part| {
                if part == "*" {
                    part.to_string()
                } else {
                    self.quote(part)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Quote a projection entry: plain column, qualified column, aliased
    /// column, or aggregate expression.
    fn quote_projection(&self, column: &str) -> String {
        if let Some((func, arg, alias)) = parse_aggregate_expression(column) {
            let arg = if arg == "*" {
                "*".to_string()
            } else {
                self.quote_column(&arg)
            };
            return format!("{}({}) AS {}", func, arg, self.quote(&alias));
        }

        match column.split_once(" as ") {
            Some((col, alias)) => format!(
                "{} AS {}",
                self.quote_column(col.trim()),
                self.quote(alias.trim())
            ),
            None => self.quote_column(column),
        }
    }

    fn compile_ctes(&mut self, ir: &QueryIr, params: &mut Vec<Value>) -> OrmResult<String> {
        if ir.ctes.is_empty() {
            return Ok(String::new());
        }

        let mut parts = Vec::with_capacity(ir.ctes.len());
        for cte in &ir.ctes {
            let inner = self.compile_select_body(&cte.query, params)?;
            parts.push(format!("{} AS ({})", self.quote(&cte.name), inner));
        }
        Ok(format!("WITH {} ", parts.join(", ")))
    }

    fn compile_select(&mut self, ir: &QueryIr) -> OrmResult<Statement> {
        let mut params = Vec::new();
        let ctes = self.compile_ctes(ir, &mut params)?;
        let body = self.compile_select_body(ir, &mut params)?;
        Ok(Statement::new(format!("{}{}", ctes, body), params))
    }

    fn compile_select_body(&mut self, ir: &QueryIr, params: &mut Vec<Value>) -> OrmResult<String> {
        let table = require_table(ir)?;

        let projection = if ir.columns.is_empty() {
            "*".to_string()
        } else {
            ir.columns
                .iter()
                .map(|c| self.quote_projection(c))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!(
            "SELECT {}{} FROM {}",
            if ir.distinct { "DISTINCT " } else { "" },
            projection,
            self.quote_column(table)
        );

        for join in &ir.joins {
            sql.push_str(&format!(
                " {} {} ON {} {} {}",
                join.kind.keyword(),
                self.quote_column(&join.table),
                self.quote_column(&join.first),
                join.operator,
                self.quote_column(&join.second)
            ));
        }

        if !ir.wheres.is_empty() {
            let clause = self.compile_wheres(&ir.wheres, params)?;
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }

        if !ir.groups.is_empty() {
            let groups: Vec<String> = ir.groups.iter().map(|g| self.quote_column(g)).collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&groups.join(", "));
        }

        if !ir.havings.is_empty() {
            let clause = self.compile_wheres(&ir.havings, params)?;
            sql.push_str(" HAVING ");
            sql.push_str(&clause);
        }

        if !ir.orders.is_empty() {
            let orders: Vec<String> = ir
                .orders
                .iter()
                .map(|o| format!("{} {}", self.quote_column(&o.column), o.direction.keyword()))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }

        sql.push_str(&self.compile_limit_offset(ir));

        Ok(sql)
    }

    fn compile_limit_offset(&self, ir: &QueryIr) -> String {
        match (ir.limit, ir.offset, self.dialect.limit_style()) {
            (None, None, _) => String::new(),
            (Some(limit), None, _) => format!(" LIMIT {}", limit),
            (Some(limit), Some(offset), LimitStyle::CommaLimit) => {
                format!(" LIMIT {}, {}", offset, limit)
            }
            (Some(limit), Some(offset), LimitStyle::LimitOffset) => {
                format!(" LIMIT {} OFFSET {}", limit, offset)
            }
            // MySQL requires a LIMIT before OFFSET; its documented
            // idiom for "no limit" is the maximum row count.
            (None, Some(offset), LimitStyle::CommaLimit) => {
                format!(" LIMIT 18446744073709551615 OFFSET {}", offset)
            }
            (None, Some(offset), LimitStyle::LimitOffset) => format!(" OFFSET {}", offset),
        }
    }

    pub(crate) fn compile_wheres(
        &mut self,
        clauses: &[WhereClause],
        params: &mut Vec<Value>,
    ) -> OrmResult<String> {
        let mut sql = String::new();

        for (index, clause) in clauses.iter().enumerate() {
            if index > 0 {
                sql.push_str(match clause.connector() {
                    Connector::And => " AND ",
                    Connector::Or => " OR ",
                });
            }
            let fragment = self.compile_where(clause, params)?;
            sql.push_str(&fragment);
        }

        Ok(sql)
    }

    fn compile_where(
        &mut self,
        clause: &WhereClause,
        params: &mut Vec<Value>,
    ) -> OrmResult<String> {
        match clause {
            WhereClause::Basic {
                column,
                operator,
                value,
                ..
            } => {
                let ph = self.placeholder();
                params.push(value.clone());
                Ok(format!("{} {} {}", self.quote_column(column), operator, ph))
            }
            WhereClause::In { column, values, .. } => {
                if values.is_empty() {
                    return Ok("0 = 1".to_string());
                }
                let placeholders: Vec<String> =
                    values.iter().map(|_| self.placeholder()).collect();
                params.extend(values.iter().cloned());
                Ok(format!(
                    "{} IN ({})",
                    self.quote_column(column),
                    placeholders.join(", ")
                ))
            }
            WhereClause::NotIn { column, values, .. } => {
                if values.is_empty() {
                    return Ok("1 = 1".to_string());
                }
                let placeholders: Vec<String> =
                    values.iter().map(|_| self.placeholder()).collect();
                params.extend(values.iter().cloned());
                Ok(format!(
                    "{} NOT IN ({})",
                    self.quote_column(column),
                    placeholders.join(", ")
                ))
            }
            WhereClause::Between {
                column, low, high, ..
            } => {
                let low_ph = self.placeholder();
                let high_ph = self.placeholder();
                params.push(low.clone());
                params.push(high.clone());
                Ok(format!(
                    "{} BETWEEN {} AND {}",
                    self.quote_column(column),
                    low_ph,
                    high_ph
                ))
            }
            WhereClause::Null { column, .. } => {
                Ok(format!("{} IS NULL", self.quote_column(column)))
            }
            WhereClause::NotNull { column, .. } => {
                Ok(format!("{} IS NOT NULL", self.quote_column(column)))
            }
            WhereClause::Exists { query, .. } => {
                let inner = self.compile_select_body(query, params)?;
                Ok(format!("EXISTS ({})", inner))
            }
            WhereClause::NotExists { query, .. } => {
                let inner = self.compile_select_body(query, params)?;
                Ok(format!("NOT EXISTS ({})", inner))
            }
            WhereClause::Token { .. } => Err(OrmError::unsupported(
                "TOKEN comparisons are only available on the wide-column backend",
            )),
            WhereClause::Raw { sql, bindings, .. } => {
                params.extend(bindings.iter().cloned());
                Ok(sql.clone())
            }
        }
    }

    fn compile_insert(&mut self, ir: &QueryIr) -> OrmResult<Statement> {
        let table = require_table(ir)?;
        if ir.values.is_empty() {
            return Err(OrmError::query_failed("INSERT requires at least one value"));
        }

        let mut params = Vec::new();
        let ctes = self.compile_ctes(ir, &mut params)?;

        let ignore = matches!(
            (&ir.on_conflict, self.dialect.upsert_style()),
            (Some(conflict), UpsertStyle::OnDuplicateKey) if conflict.update.is_none()
        );

        let columns: Vec<String> = ir.values.keys().map(|c| self.quote(c)).collect();
        let placeholders: Vec<String> = ir.values.iter().map(|_| self.placeholder()).collect();
        params.extend(ir.values.values().cloned());

        let mut sql = format!(
            "{}INSERT{} INTO {} ({}) VALUES ({})",
            ctes,
            if ignore { " IGNORE" } else { "" },
            self.quote_column(table),
            columns.join(", "),
            placeholders.join(", ")
        );

        if let Some(conflict) = &ir.on_conflict {
            match self.dialect.upsert_style() {
                UpsertStyle::OnConflict => {
                    let target: Vec<String> =
                        conflict.columns.iter().map(|c| self.quote(c)).collect();
                    match &conflict.update {
                        Some(update) => {
                            let assignments = self.compile_assignments(update, &mut params);
                            sql.push_str(&format!(
                                " ON CONFLICT ({}) DO UPDATE SET {}",
                                target.join(", "),
                                assignments
                            ));
                        }
                        None => {
                            sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", target.join(", ")));
                        }
                    }
                }
                UpsertStyle::OnDuplicateKey => {
                    if let Some(update) = &conflict.update {
                        let assignments = self.compile_assignments(update, &mut params);
                        sql.push_str(&format!(" ON DUPLICATE KEY UPDATE {}", assignments));
                    }
                }
            }
        }

        self.push_returning(ir, &mut sql)?;
        Ok(Statement::new(sql, params))
    }

    fn compile_assignments(
        &mut self,
        values: &indexmap::IndexMap<String, Value>,
        params: &mut Vec<Value>,
    ) -> String {
        let assignments: Vec<String> = values
            .iter()
            .map(|(column, value)| {
                let ph = self.placeholder();
                params.push(value.clone());
                format!("{} = {}", self.quote(column), ph)
            })
            .collect();
        assignments.join(", ")
    }

    fn compile_update(&mut self, ir: &QueryIr) -> OrmResult<Statement> {
        let table = require_table(ir)?;
        if ir.values.is_empty() {
            return Err(OrmError::query_failed("UPDATE requires at least one assignment"));
        }

        let mut params = Vec::new();
        let ctes = self.compile_ctes(ir, &mut params)?;
        let assignments = self.compile_assignments(&ir.values, &mut params);

        let mut sql = format!(
            "{}UPDATE {} SET {}",
            ctes,
            self.quote_column(table),
            assignments
        );

        if !ir.wheres.is_empty() {
            let clause = self.compile_wheres(&ir.wheres, &mut params)?;
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }

        self.push_returning(ir, &mut sql)?;
        Ok(Statement::new(sql, params))
    }

    fn compile_delete(&mut self, ir: &QueryIr) -> OrmResult<Statement> {
        let table = require_table(ir)?;

        let mut params = Vec::new();
        let ctes = self.compile_ctes(ir, &mut params)?;
        let mut sql = format!("{}DELETE FROM {}", ctes, self.quote_column(table));

        if !ir.wheres.is_empty() {
            let clause = self.compile_wheres(&ir.wheres, &mut params)?;
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }

        self.push_returning(ir, &mut sql)?;
        Ok(Statement::new(sql, params))
    }

    fn push_returning(&self, ir: &QueryIr, sql: &mut String) -> OrmResult<()> {
        if ir.returning.is_empty() {
            return Ok(());
        }
        if !self.dialect.supports_returning() {
            return Err(OrmError::unsupported(
                "RETURNING is not supported by this backend",
            ));
        }
        let columns: Vec<String> = ir
            .returning
            .iter()
            .map(|c| self.quote_column(c))
            .collect();
        sql.push_str(&format!(" RETURNING {}", columns.join(", ")));
        Ok(())
    }
}

pub(crate) fn require_table(ir: &QueryIr) -> OrmResult<&str> {
    ir.table
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| OrmError::query_failed("query has no target table"))
}
