use super::sql::require_table;
use crate::ir::{Connector, QueryIr, QueryKind, WhereClause};
use crate::{Grammar, OrmError, OrmResult, Statement, Value};

/// CQL statement compiler for the wide-column backend.
///
/// Identifiers are emitted unquoted (reserved-word table names are the
/// schema author's problem, as in cqlsh), placeholders are `?`, and the
/// wide-column-only IR options (TTL, lightweight transactions,
/// ALLOW FILTERING, TOKEN) compile here and nowhere else. OFFSET, GROUP BY,
/// HAVING, joins, OR connectors, sub-queries and RETURNING have no CQL
/// form and surface as `UnsupportedFeature`.
pub struct CqlGrammar;

impl Grammar for CqlGrammar {
    fn compile(&self, ir: &QueryIr) -> OrmResult<Statement> {
        match ir.kind {
            QueryKind::Select => compile_select(ir),
            QueryKind::Insert => compile_insert(ir),
            QueryKind::Update => compile_update(ir),
            QueryKind::Delete => compile_delete(ir),
        }
    }

    fn compile_rename_table(&self, _from: &str, _to: &str) -> OrmResult<Statement> {
        Err(OrmError::unsupported(
            "the wide-column backend cannot rename tables",
        ))
    }
}

fn reject_relational_options(ir: &QueryIr) -> OrmResult<()> {
    if !ir.returning.is_empty() {
        return Err(OrmError::unsupported("RETURNING is not available in CQL"));
    }
    if ir.on_conflict.is_some() {
        return Err(OrmError::unsupported(
            "ON CONFLICT is not available in CQL; use IF NOT EXISTS",
        ));
    }
    if !ir.groups.is_empty() || !ir.havings.is_empty() {
        return Err(OrmError::unsupported(
            "GROUP BY / HAVING are not available in CQL",
        ));
    }
    if !ir.joins.is_empty() {
        return Err(OrmError::unsupported("joins are not available in CQL"));
    }
    if !ir.ctes.is_empty() {
        return Err(OrmError::unsupported(
            "common table expressions are not available in CQL",
        ));
    }
    if ir.offset.is_some() {
        return Err(OrmError::unsupported("OFFSET is not available in CQL"));
    }
    Ok(())
}

fn compile_select(ir: &QueryIr) -> OrmResult<Statement> {
    reject_relational_options(ir)?;
    let table = require_table(ir)?;

    let projection = if ir.columns.is_empty() {
        "*".to_string()
    } else {
        ir.columns.join(", ")
    };

    let mut cql = format!(
        "SELECT {}{} FROM {}",
        if ir.distinct { "DISTINCT " } else { "" },
        projection,
        table
    );
    let mut params = Vec::new();

    if !ir.wheres.is_empty() {
        cql.push_str(" WHERE ");
        cql.push_str(&compile_wheres(&ir.wheres, &mut params)?);
    }

    if !ir.orders.is_empty() {
        let orders: Vec<String> = ir
            .orders
            .iter()
            .map(|o| format!("{} {}", o.column, o.direction.keyword()))
            .collect();
        cql.push_str(" ORDER BY ");
        cql.push_str(&orders.join(", "));
    }

    if let Some(limit) = ir.limit {
        cql.push_str(&format!(" LIMIT {}", limit));
    }

    if ir.allow_filtering {
        cql.push_str(" ALLOW FILTERING");
    }

    Ok(Statement::new(cql, params))
}

fn compile_wheres(clauses: &[WhereClause], params: &mut Vec<Value>) -> OrmResult<String> {
    let mut cql = String::new();

    for (index, clause) in clauses.iter().enumerate() {
        if index > 0 {
            match clause.connector() {
                Connector::And => cql.push_str(" AND "),
                Connector::Or => {
                    return Err(OrmError::unsupported("OR conditions are not available in CQL"));
                }
            }
        }

        match clause {
            WhereClause::Basic {
                column,
                operator,
                value,
                ..
            } => {
                cql.push_str(&format!("{} {} ?", column, operator));
                params.push(value.clone());
            }
            WhereClause::In { column, values, .. } => {
                let placeholders = vec!["?"; values.len()].join(", ");
                cql.push_str(&format!("{} IN ({})", column, placeholders));
                params.extend(values.iter().cloned());
            }
            WhereClause::NotIn { .. } => {
                return Err(OrmError::unsupported("NOT IN is not available in CQL"));
            }
            WhereClause::Between {
                column, low, high, ..
            } => {
                // CQL has no BETWEEN; expand to a range pair.
                cql.push_str(&format!("{col} >= ? AND {col} <= ?", col = column));
                params.push(low.clone());
                params.push(high.clone());
            }
            WhereClause::Null { .. } | WhereClause::NotNull { .. } => {
                return Err(OrmError::unsupported(
                    "NULL predicates are not available in CQL",
                ));
            }
            WhereClause::Exists { .. } | WhereClause::NotExists { .. } => {
                return Err(OrmError::unsupported("sub-queries are not available in CQL"));
            }
            WhereClause::Token {
                columns,
                operator,
                values,
                ..
            } => {
                let placeholders = vec!["?"; values.len()].join(", ");
                cql.push_str(&format!(
                    "TOKEN({}) {} TOKEN({})",
                    columns.join(", "),
                    operator,
                    placeholders
                ));
                params.extend(values.iter().cloned());
            }
            WhereClause::Raw { sql, bindings, .. } => {
                cql.push_str(sql);
                params.extend(bindings.iter().cloned());
            }
        }
    }

    Ok(cql)
}

fn compile_insert(ir: &QueryIr) -> OrmResult<Statement> {
    reject_relational_options(ir)?;
    let table = require_table(ir)?;
    if ir.values.is_empty() {
        return Err(OrmError::query_failed("INSERT requires at least one value"));
    }

    let columns: Vec<&str> = ir.values.keys().map(String::as_str).collect();
    let placeholders = vec!["?"; ir.values.len()].join(", ");
    let params: Vec<Value> = ir.values.values().cloned().collect();

    let mut cql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders
    );

    if ir.if_not_exists {
        cql.push_str(" IF NOT EXISTS");
    }
    if let Some(ttl) = ir.ttl {
        cql.push_str(&format!(" USING TTL {}", ttl));
    }

    Ok(Statement::new(cql, params))
}

fn compile_update(ir: &QueryIr) -> OrmResult<Statement> {
    reject_relational_options(ir)?;
    let table = require_table(ir)?;
    if ir.values.is_empty() {
        return Err(OrmError::query_failed("UPDATE requires at least one assignment"));
    }

    let mut cql = format!("UPDATE {}", table);
    if let Some(ttl) = ir.ttl {
        cql.push_str(&format!(" USING TTL {}", ttl));
    }

    let assignments: Vec<String> = ir.values.keys().map(|c| format!("{} = ?", c)).collect();
    let mut params: Vec<Value> = ir.values.values().cloned().collect();

    cql.push_str(" SET ");
    cql.push_str(&assignments.join(", "));

    if !ir.wheres.is_empty() {
        cql.push_str(" WHERE ");
        cql.push_str(&compile_wheres(&ir.wheres, &mut params)?);
    }

    push_if_conditions(ir, &mut cql, &mut params);
    Ok(Statement::new(cql, params))
}

fn compile_delete(ir: &QueryIr) -> OrmResult<Statement> {
    reject_relational_options(ir)?;
    let table = require_table(ir)?;

    let mut cql = format!("DELETE FROM {}", table);
    let mut params = Vec::new();

    if !ir.wheres.is_empty() {
        cql.push_str(" WHERE ");
        cql.push_str(&compile_wheres(&ir.wheres, &mut params)?);
    }

    push_if_conditions(ir, &mut cql, &mut params);
    Ok(Statement::new(cql, params))
}

/// Lightweight-transaction conditions bind last, after values and wheres.
fn push_if_conditions(ir: &QueryIr, cql: &mut String, params: &mut Vec<Value>) {
    if ir.if_conditions.is_empty() {
        return;
    }
    let conditions: Vec<String> = ir
        .if_conditions
        .iter()
        .map(|c| format!("{} {} ?", c.column, c.operator))
        .collect();
    cql.push_str(" IF ");
    cql.push_str(&conditions.join(" AND "));
    params.extend(ir.if_conditions.iter().map(|c| c.value.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Direction, IfCondition, OrderClause};

    #[test]
    fn select_with_filters_matches_wire_contract() {
        let mut ir = QueryIr::select("users");
        ir.columns = vec!["id".to_string(), "name".to_string()];
        ir.wheres.push(WhereClause::Basic {
            column: "active".to_string(),
            operator: "=".to_string(),
            value: Value::Bool(true),
            connector: Connector::And,
        });
        ir.wheres.push(WhereClause::In {
            column: "department_id".to_string(),
            values: vec![Value::Int(1), Value::Int(2), Value::Int(3)],
            connector: Connector::And,
        });
        ir.orders.push(OrderClause {
            column: "name".to_string(),
            direction: Direction::Asc,
        });
        ir.limit = Some(100);
        ir.allow_filtering = true;

        let statement = CqlGrammar.compile(&ir).expect("compiles");
        assert_eq!(
            statement.text,
            "SELECT id, name FROM users WHERE active = ? AND department_id IN (?, ?, ?) \
             ORDER BY name ASC LIMIT 100 ALLOW FILTERING"
        );
        assert_eq!(
            statement.params,
            vec![Value::Bool(true), Value::Int(1), Value::Int(2), Value::Int(3)]
        );
    }

    #[test]
    fn conditional_update_with_ttl() {
        let mut ir = QueryIr::select("users");
        ir.kind = QueryKind::Update;
        ir.ttl = Some(3600);
        ir.values
            .insert("name".to_string(), Value::Text("Jane".to_string()));
        ir.wheres.push(WhereClause::Basic {
            column: "id".to_string(),
            operator: "=".to_string(),
            value: Value::Int(1),
            connector: Connector::And,
        });
        ir.if_conditions.push(IfCondition {
            column: "version".to_string(),
            operator: "=".to_string(),
            value: Value::Int(4),
        });

        let statement = CqlGrammar.compile(&ir).expect("compiles");
        assert_eq!(
            statement.text,
            "UPDATE users USING TTL 3600 SET name = ? WHERE id = ? IF version = ?"
        );
        assert_eq!(
            statement.params,
            vec![
                Value::Text("Jane".to_string()),
                Value::Int(1),
                Value::Int(4)
            ]
        );
    }

    #[test]
    fn insert_if_not_exists_with_ttl() {
        let mut ir = QueryIr::select("users");
        ir.kind = QueryKind::Insert;
        ir.values.insert("id".to_string(), Value::Int(1));
        ir.values
            .insert("name".to_string(), Value::Text("Ada".to_string()));
        ir.if_not_exists = true;
        ir.ttl = Some(60);

        let statement = CqlGrammar.compile(&ir).expect("compiles");
        assert_eq!(
            statement.text,
            "INSERT INTO users (id, name) VALUES (?, ?) IF NOT EXISTS USING TTL 60"
        );
    }

    #[test]
    fn token_comparison_over_partition_keys() {
        let mut ir = QueryIr::select("events");
        ir.wheres.push(WhereClause::Token {
            columns: vec!["tenant".to_string(), "day".to_string()],
            operator: ">".to_string(),
            values: vec![Value::Text("t1".to_string()), Value::Int(20240101)],
            connector: Connector::And,
        });

        let statement = CqlGrammar.compile(&ir).expect("compiles");
        assert_eq!(
            statement.text,
            "SELECT * FROM events WHERE TOKEN(tenant, day) > TOKEN(?, ?)"
        );
    }

    #[test]
    fn offset_and_rename_are_rejected() {
        let mut ir = QueryIr::select("users");
        ir.offset = Some(10);
        assert!(matches!(
            CqlGrammar.compile(&ir),
            Err(OrmError::UnsupportedFeature(_))
        ));

        assert!(matches!(
            CqlGrammar.compile_rename_table("users", "people"),
            Err(OrmError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn or_connector_is_rejected() {
        let mut ir = QueryIr::select("users");
        ir.wheres.push(WhereClause::Basic {
            column: "a".to_string(),
            operator: "=".to_string(),
            value: Value::Int(1),
            connector: Connector::And,
        });
        ir.wheres.push(WhereClause::Basic {
            column: "b".to_string(),
            operator: "=".to_string(),
            value: Value::Int(2),
            connector: Connector::Or,
        });

        assert!(matches!(
            CqlGrammar.compile(&ir),
            Err(OrmError::UnsupportedFeature(_))
        ));
    }
}
