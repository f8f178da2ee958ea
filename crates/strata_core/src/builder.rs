use indexmap::IndexMap;
use std::sync::Arc;

use crate::ir::{
    Connector, Cte, Direction, IfCondition, JoinClause, JoinKind, OnConflict, OrderClause,
    QueryIr, QueryKind, WhereClause,
};
use crate::record::now;
use crate::relations::eager_load;
use crate::{Connection, ModelClass, Models, OrmError, OrmResult, Record, RowSet, Value};

/// Fluent, accumulative query builder.
///
/// Methods consume and return the builder; `clone` produces a structurally
/// independent copy. A builder bound to a model class hydrates records and
/// honors the class's soft-delete scope; an unbound builder works on raw
/// rows.
#[derive(Clone)]
pub struct QueryBuilder {
    ir: QueryIr,
    class: Option<Arc<ModelClass>>,
    models: Option<Models>,
    eager: Vec<String>,
    with_trashed: bool,
    only_trashed: bool,
}

impl QueryBuilder {
    /// Unbound builder over a table or collection.
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            ir: QueryIr::select(name.into()),
            class: None,
            models: None,
            eager: Vec::new(),
            with_trashed: false,
            only_trashed: false,
        }
    }

    /// Builder scoped to a registered model class.
    pub(crate) fn for_class(class: Arc<ModelClass>, models: Models) -> Self {
        let mut builder = Self::table(class.qualified_table());
        builder.class = Some(class);
        builder.models = Some(models);
        builder
    }

    pub fn ir(&self) -> &QueryIr {
        &self.ir
    }

    // ------------------------------------------------------------------
    // Projection and sources
    // ------------------------------------------------------------------

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.ir.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn add_select(mut self, column: impl Into<String>) -> Self {
        self.ir.columns.push(column.into());
        self
    }

    pub fn distinct(mut self) -> Self {
        self.ir.distinct = true;
        self
    }

    pub fn from(mut self, table: impl Into<String>) -> Self {
        self.ir.table = Some(table.into());
        self
    }

    /// Alias of `from` for INSERT/UPDATE phrasing.
    pub fn into_table(self, table: impl Into<String>) -> Self {
        self.from(table)
    }

    // ------------------------------------------------------------------
    // Where clauses
    // ------------------------------------------------------------------

    pub fn where_op(
        mut self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.ir.wheres.push(WhereClause::Basic {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
            connector: Connector::And,
        });
        self
    }

    pub fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_op(column, "=", value)
    }

    pub fn or_where_op(
        mut self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.ir.wheres.push(WhereClause::Basic {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
            connector: Connector::Or,
        });
        self
    }

    pub fn or_where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.or_where_op(column, "=", value)
    }

    /// Object-shaped where input: every pair becomes an `=` clause with an
    /// `and` connector.
    pub fn where_map<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (column, value) in pairs {
            self.ir.wheres.push(WhereClause::Basic {
                column: column.into(),
                operator: "=".to_string(),
                value: value.into(),
                connector: Connector::And,
            });
        }
        self
    }

    pub fn where_in<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.ir.wheres.push(WhereClause::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            connector: Connector::And,
        });
        self
    }

    pub fn where_not_in<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.ir.wheres.push(WhereClause::NotIn {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            connector: Connector::And,
        });
        self
    }

    pub fn where_between(
        mut self,
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.ir.wheres.push(WhereClause::Between {
            column: column.into(),
            low: low.into(),
            high: high.into(),
            connector: Connector::And,
        });
        self
    }

    pub fn where_null(mut self, column: impl Into<String>) -> Self {
        self.ir.wheres.push(WhereClause::Null {
            column: column.into(),
            connector: Connector::And,
        });
        self
    }

    pub fn where_not_null(mut self, column: impl Into<String>) -> Self {
        self.ir.wheres.push(WhereClause::NotNull {
            column: column.into(),
            connector: Connector::And,
        });
        self
    }

    pub fn where_exists(mut self, query: QueryBuilder) -> Self {
        self.ir.wheres.push(WhereClause::Exists {
            query: Box::new(query.ir),
            connector: Connector::And,
        });
        self
    }

    pub fn where_not_exists(mut self, query: QueryBuilder) -> Self {
        self.ir.wheres.push(WhereClause::NotExists {
            query: Box::new(query.ir),
            connector: Connector::And,
        });
        self
    }

    /// Wide-column token comparison over the partition key columns.
    pub fn where_token<I, V>(
        mut self,
        columns: &[&str],
        operator: impl Into<String>,
        values: I,
    ) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.ir.wheres.push(WhereClause::Token {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            operator: operator.into(),
            values: values.into_iter().map(Into::into).collect(),
            connector: Connector::And,
        });
        self
    }

    pub fn where_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.ir.wheres.push(WhereClause::Raw {
            sql: sql.into(),
            bindings,
            connector: Connector::And,
        });
        self
    }

    // ------------------------------------------------------------------
    // Grouping, ordering, paging
    // ------------------------------------------------------------------

    pub fn group_by(mut self, columns: &[&str]) -> Self {
        self.ir.groups = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn having(
        mut self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.ir.havings.push(WhereClause::Basic {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
            connector: Connector::And,
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.ir.orders.push(OrderClause {
            column: column.into(),
            direction: Direction::Asc,
        });
        self
    }

    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.ir.orders.push(OrderClause {
            column: column.into(),
            direction: Direction::Desc,
        });
        self
    }

    pub fn join(
        mut self,
        table: impl Into<String>,
        first: impl Into<String>,
        operator: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        self.ir.joins.push(JoinClause {
            kind: JoinKind::Inner,
            table: table.into(),
            first: first.into(),
            operator: operator.into(),
            second: second.into(),
        });
        self
    }

    pub fn left_join(
        mut self,
        table: impl Into<String>,
        first: impl Into<String>,
        operator: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        self.ir.joins.push(JoinClause {
            kind: JoinKind::Left,
            table: table.into(),
            first: first.into(),
            operator: operator.into(),
            second: second.into(),
        });
        self
    }

    pub fn with_cte(mut self, name: impl Into<String>, query: QueryBuilder) -> Self {
        self.ir.ctes.push(Cte {
            name: name.into(),
            query: Box::new(query.ir),
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.ir.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.ir.offset = Some(offset);
        self
    }

    // ------------------------------------------------------------------
    // Backend-specific options
    // ------------------------------------------------------------------

    pub fn allow_filtering(mut self) -> Self {
        self.ir.allow_filtering = true;
        self
    }

    pub fn if_not_exists(mut self) -> Self {
        self.ir.if_not_exists = true;
        self
    }

    pub fn if_condition(
        mut self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.ir.if_conditions.push(IfCondition {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
        });
        self
    }

    pub fn ttl(mut self, seconds: u32) -> Self {
        self.ir.ttl = Some(seconds);
        self
    }

    pub fn returning(mut self, columns: &[&str]) -> Self {
        self.ir.returning = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn on_conflict(
        mut self,
        columns: &[&str],
        update: Option<IndexMap<String, Value>>,
    ) -> Self {
        self.ir.on_conflict = Some(OnConflict {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            update,
        });
        self
    }

    // ------------------------------------------------------------------
    // Eager loading and soft-delete scope
    // ------------------------------------------------------------------

    /// Request eager loading of a relation; dot paths (`posts.comments`)
    /// recurse.
    pub fn with(mut self, relation: impl Into<String>) -> Self {
        self.eager.push(relation.into());
        self
    }

    /// Include soft-deleted rows.
    pub fn with_trashed(mut self) -> Self {
        self.with_trashed = true;
        self
    }

    /// Select only soft-deleted rows.
    pub fn only_trashed(mut self) -> Self {
        self.only_trashed = true;
        self
    }

    fn apply_soft_delete_scope(&mut self) {
        let Some(class) = &self.class else { return };
        if !class.soft_deletes() {
            return;
        }
        if self.only_trashed {
            self.ir.wheres.push(WhereClause::NotNull {
                column: "deleted_at".to_string(),
                connector: Connector::And,
            });
        } else if !self.with_trashed {
            self.ir.wheres.push(WhereClause::Null {
                column: "deleted_at".to_string(),
                connector: Connector::And,
            });
        }
    }

    // ------------------------------------------------------------------
    // Terminal operations
    // ------------------------------------------------------------------

    fn bound(&self) -> OrmResult<(Arc<ModelClass>, Models)> {
        match (&self.class, &self.models) {
            (Some(class), Some(models)) => Ok((class.clone(), models.clone())),
            _ => Err(OrmError::configuration(
                "builder is not bound to a model class",
            )),
        }
    }

    /// Execute a SELECT and return raw rows, without hydration.
    pub fn get_rows(mut self, conn: &mut Connection) -> OrmResult<RowSet> {
        self.apply_soft_delete_scope();
        let statement = conn.grammar().compile(&self.ir)?;
        conn.query(&statement)
    }

    /// Execute a SELECT, hydrate records, and resolve requested eager
    /// loads.
    pub fn get(mut self, conn: &mut Connection) -> OrmResult<Vec<Record>> {
        let (class, models) = self.bound()?;
        self.apply_soft_delete_scope();

        let statement = conn.grammar().compile(&self.ir)?;
        let result = conn.query(&statement)?;

        let mut records: Vec<Record> = result
            .rows
            .into_iter()
            .map(|row| Record::hydrate(class.clone(), models.clone(), &result.columns, row))
            .collect();

        if !self.eager.is_empty() {
            eager_load(&models, conn, &mut records, &self.eager)?;
        }
        Ok(records)
    }

    pub fn first(self, conn: &mut Connection) -> OrmResult<Option<Record>> {
        Ok(self.limit(1).get(conn)?.into_iter().next())
    }

    /// Look up by primary key. `None` on an absent key.
    pub fn find(self, conn: &mut Connection, id: impl Into<Value>) -> OrmResult<Option<Record>> {
        let (class, _) = self.bound()?;
        self.where_eq(class.primary_key(), id).first(conn)
    }

    pub fn find_or_fail(self, conn: &mut Connection, id: impl Into<Value>) -> OrmResult<Record> {
        let (class, _) = self.bound()?;
        self.find(conn, id)?
            .ok_or_else(|| OrmError::RecordNotFound(class.table().to_string()))
    }

    /// Single-column projection.
    pub fn pluck(self, conn: &mut Connection, column: &str) -> OrmResult<Vec<Value>> {
        let rows = self.select(&[column]).get_rows(conn)?;
        Ok(rows
            .rows
            .into_iter()
            .map(|mut row| {
                if row.is_empty() {
                    Value::Null
                } else {
                    row.swap_remove(0)
                }
            })
            .collect())
    }

    /// Count rows; compiles to a single aggregate column.
    pub fn count(mut self, conn: &mut Connection, column: Option<&str>) -> OrmResult<u64> {
        self.apply_soft_delete_scope();
        self.ir.columns = vec![format!("count({}) as aggregate", column.unwrap_or("*"))];
        self.ir.orders.clear();
        let statement = conn.grammar().compile(&self.ir)?;
        let result = conn.query(&statement)?;
        Ok(result
            .scalar()
            .and_then(Value::as_i64)
            .map(|count| count.max(0) as u64)
            .unwrap_or(0))
    }

    /// `count(*) LIMIT 1 > 0`.
    pub fn exists(mut self, conn: &mut Connection) -> OrmResult<bool> {
        self.apply_soft_delete_scope();
        self.ir.columns = vec!["count(*) as aggregate".to_string()];
        self.ir.orders.clear();
        self.ir.limit = Some(1);
        let statement = conn.grammar().compile(&self.ir)?;
        let result = conn.query(&statement)?;
        Ok(result
            .scalar()
            .and_then(Value::as_i64)
            .map(|count| count > 0)
            .unwrap_or(false))
    }

    /// Execute an INSERT of the given values.
    pub fn insert<I, K, V>(mut self, conn: &mut Connection, values: I) -> OrmResult<RowSet>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.ir.kind = QueryKind::Insert;
        self.ir.values = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let statement = conn.grammar().compile(&self.ir)?;
        conn.query(&statement)
    }

    /// INSERT and read back the generated key: through RETURNING on
    /// backends that have it, else the driver-reported last insert id.
    pub fn insert_get_id<I, K, V>(
        mut self,
        conn: &mut Connection,
        values: I,
        key: &str,
    ) -> OrmResult<Value>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        if conn.supports(crate::DriverFeatures::RETURNING) {
            self.ir.returning = vec![key.to_string()];
        }
        self.ir.kind = QueryKind::Insert;
        self.ir.values = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let statement = conn.grammar().compile(&self.ir)?;
        let result = conn.query(&statement)?;
        result
            .scalar()
            .cloned()
            .or(result.last_insert_id.map(Value::Int))
            .ok_or_else(|| OrmError::query_failed("backend reported no insert id"))
    }

    /// Execute an UPDATE of the given assignments against the accumulated
    /// wheres. Returns the affected-row count where the backend reports
    /// one.
    pub fn update<I, K, V>(mut self, conn: &mut Connection, values: I) -> OrmResult<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.ir.kind = QueryKind::Update;
        self.ir.values = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let statement = conn.grammar().compile(&self.ir)?;
        let result = conn.query(&statement)?;
        Ok(result.affected_rows.unwrap_or(0))
    }

    /// Execute a DELETE against the accumulated wheres. A soft-delete
    /// class gets an UPDATE setting `deleted_at` instead.
    pub fn delete(mut self, conn: &mut Connection) -> OrmResult<u64> {
        let soft = self
            .class
            .as_ref()
            .map(|class| class.soft_deletes())
            .unwrap_or(false);

        if soft {
            self.ir.kind = QueryKind::Update;
            self.ir.values = IndexMap::from([("deleted_at".to_string(), now())]);
        } else {
            self.ir.kind = QueryKind::Delete;
        }

        let statement = conn.grammar().compile(&self.ir)?;
        let result = conn.query(&statement)?;
        Ok(result.affected_rows.unwrap_or(0))
    }
}
