mod cql;
mod mongo;
mod mysql;
mod postgres;
mod sql;
mod sqlite;

pub use cql::CqlGrammar;
pub use mongo::MongoGrammar;
pub use mysql::MySqlGrammar;
pub use postgres::PostgresGrammar;
pub use sql::{LimitStyle, PlaceholderStyle, SqlDialect, UpsertStyle};
pub use sqlite::SqliteGrammar;

use crate::{OrmResult, QueryIr, Statement};

/// Compiles backend-neutral query IR into one backend's statements.
///
/// Each driver owns exactly one grammar. Compilation is pure: no I/O, no
/// driver state, and the emitted placeholder order equals the parameter
/// binding order (CTEs, then values, then wheres, then havings).
pub trait Grammar: Send + Sync {
    fn compile(&self, ir: &QueryIr) -> OrmResult<Statement>;

    /// Table rename, where the backend has one. The wide-column grammar
    /// rejects this.
    fn compile_rename_table(&self, from: &str, to: &str) -> OrmResult<Statement>;
}
