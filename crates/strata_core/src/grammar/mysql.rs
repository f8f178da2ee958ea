use super::sql::{LimitStyle, PlaceholderStyle, SqlCompiler, SqlDialect, UpsertStyle};
use crate::{Grammar, OrmResult, QueryIr, Statement};

/// MySQL statement compiler: backtick identifiers, `?` placeholders,
/// `LIMIT offset, count`, `ON DUPLICATE KEY UPDATE` upserts. No RETURNING.
pub struct MySqlGrammar;

struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::QuestionMark
    }

    fn limit_style(&self) -> LimitStyle {
        LimitStyle::CommaLimit
    }

    fn upsert_style(&self) -> UpsertStyle {
        UpsertStyle::OnDuplicateKey
    }
}

static DIALECT: MySqlDialect = MySqlDialect;

impl Grammar for MySqlGrammar {
    fn compile(&self, ir: &QueryIr) -> OrmResult<Statement> {
        SqlCompiler::new(&DIALECT).compile(ir)
    }

    fn compile_rename_table(&self, from: &str, to: &str) -> OrmResult<Statement> {
        Ok(Statement::raw(format!(
            "RENAME TABLE {} TO {}",
            DIALECT.quote_identifier(from),
            DIALECT.quote_identifier(to)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Connector, OnConflict, QueryKind, WhereClause};
    use crate::{OrmError, Value};
    use indexmap::IndexMap;

    #[test]
    fn limit_offset_uses_comma_form() {
        let mut ir = QueryIr::select("users");
        ir.limit = Some(10);
        ir.offset = Some(30);

        let statement = MySqlGrammar.compile(&ir).expect("compiles");
        assert_eq!(statement.text, "SELECT * FROM `users` LIMIT 30, 10");
    }

    #[test]
    fn on_duplicate_key_update() {
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

        let statement = MySqlGrammar.compile(&ir).expect("compiles");
        assert_eq!(
            statement.text,
            "INSERT INTO `users` (`id`, `name`) VALUES (?, ?) ON DUPLICATE KEY UPDATE `name` = ?"
        );
        assert_eq!(statement.params.len(), 3);
    }

    #[test]
    fn conflict_without_update_becomes_insert_ignore() {
        let mut ir = QueryIr::select("users");
        ir.kind = QueryKind::Insert;
        ir.values.insert("id".to_string(), Value::Int(1));
        ir.on_conflict = Some(OnConflict {
            columns: vec!["id".to_string()],
            update: None,
        });

        let statement = MySqlGrammar.compile(&ir).expect("compiles");
        assert_eq!(statement.text, "INSERT IGNORE INTO `users` (`id`) VALUES (?)");
    }

    #[test]
    fn returning_is_rejected() {
        let mut ir = QueryIr::select("users");
        ir.kind = QueryKind::Insert;
        ir.values.insert("id".to_string(), Value::Int(1));
        ir.returning = vec!["id".to_string()];

        let error = MySqlGrammar.compile(&ir).unwrap_err();
        assert!(matches!(error, OrmError::UnsupportedFeature(_)));
    }

    #[test]
    fn where_between_binds_low_then_high() {
        let mut ir = QueryIr::select("orders");
        ir.wheres.push(WhereClause::Between {
            column: "total".to_string(),
            low: Value::Int(10),
            high: Value::Int(100),
            connector: Connector::And,
        });

        let statement = MySqlGrammar.compile(&ir).expect("compiles");
        assert_eq!(
            statement.text,
            "SELECT * FROM `orders` WHERE `total` BETWEEN ? AND ?"
        );
        assert_eq!(statement.params, vec![Value::Int(10), Value::Int(100)]);
    }
}
