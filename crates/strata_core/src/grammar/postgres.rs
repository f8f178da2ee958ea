use super::sql::{PlaceholderStyle, SqlCompiler, SqlDialect, UpsertStyle};
use crate::{Grammar, OrmResult, QueryIr, Statement};

/// PostgreSQL statement compiler: double-quoted identifiers, positional
/// `$n` placeholders, `ON CONFLICT` upserts, RETURNING.
pub struct PostgresGrammar;

struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::DollarNumber
    }

    fn upsert_style(&self) -> UpsertStyle {
        UpsertStyle::OnConflict
    }

    fn supports_returning(&self) -> bool {
        true
    }
}

static DIALECT: PostgresDialect = PostgresDialect;

impl Grammar for PostgresGrammar {
    fn compile(&self, ir: &QueryIr) -> OrmResult<Statement> {
        SqlCompiler::new(&DIALECT).compile(ir)
    }

    fn compile_rename_table(&self, from: &str, to: &str) -> OrmResult<Statement> {
        Ok(Statement::raw(format!(
            "ALTER TABLE {} RENAME TO {}",
            DIALECT.quote_identifier(from),
            DIALECT.quote_identifier(to)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Connector, OnConflict, QueryKind, WhereClause};
    use crate::Value;
    use indexmap::IndexMap;

    #[test]
    fn placeholders_are_numbered_in_emission_order() {
        let mut ir = QueryIr::select("users");
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

        let statement = PostgresGrammar.compile(&ir).expect("compiles");
        assert_eq!(
            statement.text,
            "SELECT * FROM \"users\" WHERE \"active\" = $1 AND \"department_id\" IN ($2, $3, $4)"
        );
        assert_eq!(
            statement.params,
            vec![Value::Bool(true), Value::Int(1), Value::Int(2), Value::Int(3)]
        );
    }

    #[test]
    fn upsert_with_returning() {
        let mut ir = QueryIr::select("users");
        ir.kind = QueryKind::Insert;
        ir.values.insert("id".to_string(), Value::Int(1));
        ir.values
            .insert("name".to_string(), Value::Text("Ada".to_string()));
        ir.on_conflict = Some(OnConflict {
            columns: vec!["id".to_string()],
            update: Some(IndexMap::from([(
                "name".to_string(),
                Value::Text("Ada".to_string()),
            )])),
        });
        ir.returning = vec!["id".to_string(), "name".to_string()];

        let statement = PostgresGrammar.compile(&ir).expect("compiles");
        assert_eq!(
            statement.text,
            "INSERT INTO \"users\" (\"id\", \"name\") VALUES ($1, $2) \
             ON CONFLICT (\"id\") DO UPDATE SET \"name\" = $3 RETURNING \"id\", \"name\""
        );
        assert_eq!(statement.params.len(), 3);
    }

    #[test]
    fn update_binds_values_before_wheres() {
        let mut ir = QueryIr::select("users");
        ir.kind = QueryKind::Update;
        ir.values
            .insert("name".to_string(), Value::Text("Jane".to_string()));
        ir.wheres.push(WhereClause::Basic {
            column: "id".to_string(),
            operator: "=".to_string(),
            value: Value::Int(1),
            connector: Connector::And,
        });

        let statement = PostgresGrammar.compile(&ir).expect("compiles");
        assert_eq!(
            statement.text,
            "UPDATE \"users\" SET \"name\" = $1 WHERE \"id\" = $2"
        );
        assert_eq!(
            statement.params,
            vec![Value::Text("Jane".to_string()), Value::Int(1)]
        );
    }

    #[test]
    fn cte_parameters_bind_first() {
        let mut inner = QueryIr::select("events");
        inner.columns = vec!["user_id".to_string()];
        inner.wheres.push(WhereClause::Basic {
            column: "kind".to_string(),
            operator: "=".to_string(),
            value: Value::Text("login".to_string()),
            connector: Connector::And,
        });

        let mut ir = QueryIr::select("users");
        ir.ctes.push(crate::ir::Cte {
            name: "recent".to_string(),
            query: Box::new(inner),
        });
        ir.wheres.push(WhereClause::Basic {
            column: "active".to_string(),
            operator: "=".to_string(),
            value: Value::Bool(true),
            connector: Connector::And,
        });

        let statement = PostgresGrammar.compile(&ir).expect("compiles");
        assert_eq!(
            statement.text,
            "WITH \"recent\" AS (SELECT \"user_id\" FROM \"events\" WHERE \"kind\" = $1) \
             SELECT * FROM \"users\" WHERE \"active\" = $2"
        );
        assert_eq!(
            statement.params,
            vec![Value::Text("login".to_string()), Value::Bool(true)]
        );
    }
}
