use indexmap::IndexMap;
use std::collections::BTreeSet;

use super::def::BelongsToManyDef;
use crate::ir::{Connector, WhereClause};
use crate::{Connection, OrmResult, QueryBuilder, Value};

/// Result of `sync`: `updated` is reserved and currently always empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncResult {
    pub attached: Vec<Value>,
    pub detached: Vec<Value>,
    pub updated: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToggleResult {
    pub attached: Vec<Value>,
    pub detached: Vec<Value>,
}

/// Pivot-table operations for one parent of a many-to-many relation.
///
/// Obtained through `Record::pivot_ops`. Accumulated `where_pivot`
/// constraints apply to every pivot select issued here.
pub struct PivotOps {
    def: BelongsToManyDef,
    parent_key: Value,
    pivot_wheres: Vec<WhereClause>,
    use_lwt: bool,
}

impl PivotOps {
    pub(crate) fn new(def: BelongsToManyDef, parent_key: Value) -> Self {
        Self {
            def,
            parent_key,
            pivot_wheres: Vec::new(),
            use_lwt: false,
        }
    }

    /// Constrain pivot selects on a pivot column.
    pub fn where_pivot(
        mut self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.pivot_wheres.push(WhereClause::Basic {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
            connector: Connector::And,
        });
        self
    }

    pub fn where_pivot_in<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.pivot_wheres.push(WhereClause::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            connector: Connector::And,
        });
        self
    }

    /// Attach pivot inserts as lightweight transactions (`IF NOT EXISTS`)
    /// on backends that support them.
    pub fn with_lwt(mut self) -> Self {
        self.use_lwt = true;
        self
    }

    fn pivot_select(&self) -> QueryBuilder {
        let mut builder = QueryBuilder::table(&self.def.pivot_table)
            .select(&[self.def.related_pivot_key.as_str()])
            .where_eq(&self.def.foreign_pivot_key, self.parent_key.clone());
        for clause in &self.pivot_wheres {
            builder = push_clause(builder, clause.clone());
        }
        builder
    }

    /// Currently attached related ids for this parent.
    pub fn current_ids(&self, conn: &mut Connection) -> OrmResult<Vec<Value>> {
        let rows = self.pivot_select().get_rows(conn)?;
        Ok(rows
            .rows
            .into_iter()
            .filter_map(|mut row| {
                if row.is_empty() {
                    None
                } else {
                    Some(row.swap_remove(0))
                }
            })
            .collect())
    }

    /// Insert one pivot row per id. Duplicate handling is the backend's:
    /// relational pivot tables rely on their primary/unique key, the
    /// wide-column backend can opt into LWT via `with_lwt`.
    pub fn attach(
        &self,
        conn: &mut Connection,
        ids: &[Value],
        extra: &IndexMap<String, Value>,
    ) -> OrmResult<()> {
        for id in ids {
            let mut values: IndexMap<String, Value> = IndexMap::new();
            values.insert(self.def.foreign_pivot_key.clone(), self.parent_key.clone());
            values.insert(self.def.related_pivot_key.clone(), id.clone());
            for (key, value) in extra {
                values.insert(key.clone(), value.clone());
            }

            let mut builder = QueryBuilder::table(&self.def.pivot_table);
            if self.use_lwt {
                builder = builder.if_not_exists();
            }
            builder.insert(conn, values)?;
        }
        Ok(())
    }

    /// Delete matching pivot rows; `None` detaches every row of this
    /// parent. Returns the affected-row count the backend reported.
    pub fn detach(&self, conn: &mut Connection, ids: Option<&[Value]>) -> OrmResult<u64> {
        let mut builder = QueryBuilder::table(&self.def.pivot_table)
            .where_eq(&self.def.foreign_pivot_key, self.parent_key.clone());
        if let Some(ids) = ids {
            if ids.is_empty() {
                return Ok(0);
            }
            builder = builder.where_in(&self.def.related_pivot_key, ids.to_vec());
        }
        builder.delete(conn)
    }

    /// Reconcile the attached set toward `ids`: detach what is missing
    /// from the input (unless `detach_missing` is off), then attach what
    /// is new. `sync(ids)` twice is a no-op the second time.
    pub fn sync(
        &self,
        conn: &mut Connection,
        ids: &[Value],
        detach_missing: bool,
    ) -> OrmResult<SyncResult> {
        let current: BTreeSet<Value> = self.current_ids(conn)?.into_iter().collect();
        let wanted: BTreeSet<Value> = ids.iter().cloned().collect();

        let attached: Vec<Value> = ids
            .iter()
            .filter(|id| !current.contains(*id))
            .cloned()
            .collect();
        let detached: Vec<Value> = if detach_missing {
            current
                .iter()
                .filter(|id| !wanted.contains(*id))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        if !detached.is_empty() {
            self.detach(conn, Some(&detached))?;
        }
        if !attached.is_empty() {
            self.attach(conn, &attached, &IndexMap::new())?;
        }

        Ok(SyncResult {
            attached,
            detached,
            updated: Vec::new(),
        })
    }

    /// Flip membership per id: attached ids detach, absent ids attach.
    pub fn toggle(&self, conn: &mut Connection, ids: &[Value]) -> OrmResult<ToggleResult> {
        let current: BTreeSet<Value> = self.current_ids(conn)?.into_iter().collect();

        let detached: Vec<Value> = ids
            .iter()
            .filter(|id| current.contains(*id))
            .cloned()
            .collect();
        let attached: Vec<Value> = ids
            .iter()
            .filter(|id| !current.contains(*id))
            .cloned()
            .collect();

        if !detached.is_empty() {
            self.detach(conn, Some(&detached))?;
        }
        if !attached.is_empty() {
            self.attach(conn, &attached, &IndexMap::new())?;
        }

        Ok(ToggleResult { attached, detached })
    }
}

fn push_clause(builder: QueryBuilder, clause: WhereClause) -> QueryBuilder {
    match clause {
        WhereClause::Basic {
            column,
            operator,
            value,
            ..
        } => builder.where_op(column, operator, value),
        WhereClause::In { column, values, .. } => builder.where_in(column, values),
        other => {
            debug_assert!(false, "unexpected pivot clause {:?}", other);
            builder
        }
    }
}
