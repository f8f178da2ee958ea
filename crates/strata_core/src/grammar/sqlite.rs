use super::sql::{PlaceholderStyle, SqlCompiler, SqlDialect, UpsertStyle};
use crate::{Grammar, OrmResult, QueryIr, Statement};

/// SQLite statement compiler: double-quoted identifiers, `?` placeholders,
/// `ON CONFLICT` upserts, RETURNING (3.35+).
pub struct SqliteGrammar;

struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::QuestionMark
    }

    fn upsert_style(&self) -> UpsertStyle {
        UpsertStyle::OnConflict
    }

    fn supports_returning(&self) -> bool {
        true
    }
}

static DIALECT: SqliteDialect = SqliteDialect;

impl Grammar for SqliteGrammar {
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
    use crate::ir::{Connector, QueryKind, WhereClause};
    use crate::Value;

    #[test]
    fn select_with_wheres_and_limit() {
        let mut ir = QueryIr::select("users");
        ir.columns = vec!["id".to_string(), "name".to_string()];
        ir.wheres.push(WhereClause::Basic {
            column: "active".to_string(),
            operator: "=".to_string(),
            value: Value::Bool(true),
            connector: Connector::And,
        });
        ir.limit = Some(10);
        ir.offset = Some(20);

        let statement = SqliteGrammar.compile(&ir).expect("compiles");
        assert_eq!(
            statement.text,
            "SELECT \"id\", \"name\" FROM \"users\" WHERE \"active\" = ? LIMIT 10 OFFSET 20"
        );
        assert_eq!(statement.params, vec![Value::Bool(true)]);
    }

    #[test]
    fn empty_where_in_short_circuits() {
        let mut ir = QueryIr::select("users");
        ir.wheres.push(WhereClause::In {
            column: "id".to_string(),
            values: vec![],
            connector: Connector::And,
        });

        let statement = SqliteGrammar.compile(&ir).expect("compiles");
        assert_eq!(statement.text, "SELECT * FROM \"users\" WHERE 0 = 1");
        assert!(statement.params.is_empty());
    }

    #[test]
    fn delete_by_key() {
        let mut ir = QueryIr::select("users");
        ir.kind = QueryKind::Delete;
        ir.wheres.push(WhereClause::Basic {
            column: "id".to_string(),
            operator: "=".to_string(),
            value: Value::Int(7),
            connector: Connector::And,
        });

        let statement = SqliteGrammar.compile(&ir).expect("compiles");
        assert_eq!(statement.text, "DELETE FROM \"users\" WHERE \"id\" = ?");
        assert_eq!(statement.params, vec![Value::Int(7)]);
    }

    #[test]
    fn ttl_is_rejected() {
        let mut ir = QueryIr::select("users");
        ir.ttl = Some(60);

        let error = SqliteGrammar.compile(&ir).unwrap_err();
        assert!(matches!(error, crate::OrmError::UnsupportedFeature(_)));
    }

    #[test]
    fn rename_table() {
        let statement = SqliteGrammar
            .compile_rename_table("users", "people")
            .expect("compiles");
        assert_eq!(statement.text, "ALTER TABLE \"users\" RENAME TO \"people\"");
    }
}
