use std::time::Instant;

use log::debug;
use rusqlite::types::ValueRef;
use rusqlite::Connection as RusqliteConnection;
use strata_core::{
    ConnectionConfig, Driver, DriverFactory, DriverFeatures, DriverKind, Grammar, OrmError,
    OrmResult, RowSet, SqliteGrammar, Statement, Value,
};

pub struct SqliteDriverFactory;

impl DriverFactory for SqliteDriverFactory {
    fn kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    fn create(&self, config: &ConnectionConfig) -> OrmResult<Box<dyn Driver>> {
        Ok(Box::new(SqliteDriver::new(config)?))
    }
}

static GRAMMAR: SqliteGrammar = SqliteGrammar;

/// SQLite driver over `rusqlite`.
///
/// Transactions nest by counting: only the outermost `begin` issues BEGIN
/// and only the outermost `commit` issues COMMIT. A rollback anywhere in
/// the nesting rolls the whole transaction back.
pub struct SqliteDriver {
    path: String,
    conn: Option<RusqliteConnection>,
    tx_depth: u32,
}

impl SqliteDriver {
    pub fn new(config: &ConnectionConfig) -> OrmResult<Self> {
        let path = config
            .database
            .clone()
            .ok_or_else(|| OrmError::configuration("sqlite requires a database path"))?;
        Ok(Self {
            path,
            conn: None,
            tx_depth: 0,
        })
    }

    fn client(&self) -> OrmResult<&RusqliteConnection> {
        self.conn
            .as_ref()
            .ok_or_else(|| OrmError::connection_failed("sqlite connection is not open"))
    }

    fn execute_control(&mut self, sql: &str) -> OrmResult<()> {
        self.client()?
            .execute_batch(sql)
            .map_err(|e| OrmError::query_failed(format!("sqlite: {}", e)))
    }
}

impl Driver for SqliteDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    fn features(&self) -> DriverFeatures {
        DriverFeatures::RELATIONAL_BASE | DriverFeatures::RETURNING
    }

    fn grammar(&self) -> &dyn Grammar {
        &GRAMMAR
    }

    fn connect(&mut self) -> OrmResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        debug!("opening sqlite database {}", self.path);
        let conn = RusqliteConnection::open(&self.path)
            .map_err(|e| OrmError::connection_failed(format!("sqlite: {}", e)))?;
        self.conn = Some(conn);
        Ok(())
    }

    fn disconnect(&mut self) -> OrmResult<()> {
        self.conn = None;
        self.tx_depth = 0;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn query(&mut self, statement: &Statement) -> OrmResult<RowSet> {
        let started = Instant::now();
        let conn = self.client()?;

        let mut stmt = conn
            .prepare(&statement.text)
            .map_err(|e| OrmError::query_failed(format!("sqlite: {}", e)))?;

        let params =
            rusqlite::params_from_iter(statement.params.iter().map(value_to_sqlite));

        if stmt.column_count() == 0 {
            let affected = stmt
                .execute(params)
                .map_err(|e| OrmError::query_failed(format!("sqlite: {}", e)))?;
            let last_insert_id = conn.last_insert_rowid();
            return Ok(RowSet {
                affected_rows: Some(affected as u64),
                last_insert_id: (last_insert_id != 0).then_some(last_insert_id),
                execution_time: started.elapsed(),
                ..RowSet::default()
            });
        }

        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut rows_out = Vec::new();
        let mut rows = stmt
            .query(params)
            .map_err(|e| OrmError::query_failed(format!("sqlite: {}", e)))?;
        while let Some(row) = rows
            .next()
            .map_err(|e| OrmError::query_failed(format!("sqlite: {}", e)))?
        {
            let mut out = Vec::with_capacity(columns.len());
            for index in 0..columns.len() {
                let value = row
                    .get_ref(index)
                    .map_err(|e| OrmError::query_failed(format!("sqlite: {}", e)))?;
                out.push(value_from_sqlite(value));
            }
            rows_out.push(out);
        }

        Ok(RowSet {
            columns,
            rows: rows_out,
            affected_rows: None,
            last_insert_id: None,
            execution_time: started.elapsed(),
        })
    }

    fn begin_transaction(&mut self) -> OrmResult<()> {
        if self.tx_depth == 0 {
            self.execute_control("BEGIN")?;
        }
        self.tx_depth += 1;
        Ok(())
    }

    fn commit(&mut self) -> OrmResult<()> {
        if self.tx_depth == 0 {
            return Err(OrmError::query_failed("commit outside of a transaction"));
        }
        self.tx_depth -= 1;
        if self.tx_depth == 0 {
            self.execute_control("COMMIT")?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> OrmResult<()> {
        if self.tx_depth == 0 {
            return Err(OrmError::query_failed("rollback outside of a transaction"));
        }
        self.tx_depth = 0;
        self.execute_control("ROLLBACK")
    }
}

fn value_to_sqlite(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(i64::from(*b)),
        Value::Int(i) => Sql::Integer(*i),
        Value::Float(f) => Sql::Real(*f),
        Value::Text(s) | Value::Json(s) | Value::Decimal(s) => Sql::Text(s.clone()),
        Value::Bytes(b) => Sql::Blob(b.clone()),
        Value::DateTime(dt) => Sql::Text(dt.to_rfc3339()),
        Value::Date(d) => Sql::Text(d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => Sql::Text(t.format("%H:%M:%S%.f").to_string()),
        Value::Array(_) => Sql::Text(value.to_json().to_string()),
    }
}

fn value_from_sqlite(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_driver() -> SqliteDriver {
        let config = ConnectionConfig::new("sqlite").with_database(":memory:");
        let mut driver = SqliteDriver::new(&config).expect("valid config");
        driver.connect().expect("connects");
        driver
    }

    #[test]
    fn round_trips_typed_values() {
        let mut driver = memory_driver();
        driver
            .query(&Statement::raw(
                "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, price REAL, data BLOB)",
            ))
            .expect("creates table");

        let insert = Statement::new(
            "INSERT INTO items (name, price, data) VALUES (?, ?, ?)",
            vec![
                Value::Text("widget".to_string()),
                Value::Float(9.5),
                Value::Bytes(vec![1, 2, 3]),
            ],
        );
        let result = driver.query(&insert).expect("inserts");
        assert_eq!(result.affected_rows, Some(1));
        assert_eq!(result.last_insert_id, Some(1));

        let select = Statement::raw("SELECT id, name, price, data FROM items");
        let rows = driver.query(&select).expect("selects");
        assert_eq!(rows.columns, vec!["id", "name", "price", "data"]);
        assert_eq!(
            rows.rows,
            vec![vec![
                Value::Int(1),
                Value::Text("widget".to_string()),
                Value::Float(9.5),
                Value::Bytes(vec![1, 2, 3]),
            ]]
        );
    }

    #[test]
    fn nested_transactions_count_and_only_outer_commits() {
        let mut driver = memory_driver();
        driver
            .query(&Statement::raw("CREATE TABLE t (v INTEGER)"))
            .expect("creates table");

        driver.begin_transaction().expect("outer begin");
        driver.begin_transaction().expect("inner begin is counted");
        driver
            .query(&Statement::new(
                "INSERT INTO t (v) VALUES (?)",
                vec![Value::Int(1)],
            ))
            .expect("inserts");
        driver.commit().expect("inner commit is counted");

        // Still inside the outer transaction: another BEGIN must fail if
        // one were issued, so this succeeding shows only counting happened.
        driver
            .query(&Statement::new(
                "INSERT INTO t (v) VALUES (?)",
                vec![Value::Int(2)],
            ))
            .expect("second insert");
        driver.commit().expect("outer commit");

        let rows = driver
            .query(&Statement::raw("SELECT count(*) FROM t"))
            .expect("counts");
        assert_eq!(rows.scalar(), Some(&Value::Int(2)));
    }

    #[test]
    fn rollback_discards_the_whole_nesting() {
        let mut driver = memory_driver();
        driver
            .query(&Statement::raw("CREATE TABLE t (v INTEGER)"))
            .expect("creates table");

        driver.begin_transaction().expect("outer begin");
        driver.begin_transaction().expect("inner begin");
        driver
            .query(&Statement::new(
                "INSERT INTO t (v) VALUES (?)",
                vec![Value::Int(1)],
            ))
            .expect("inserts");
        driver.rollback().expect("rolls back");

        let rows = driver
            .query(&Statement::raw("SELECT count(*) FROM t"))
            .expect("counts");
        assert_eq!(rows.scalar(), Some(&Value::Int(0)));
    }

    #[test]
    fn commit_without_begin_fails() {
        let mut driver = memory_driver();
        assert!(driver.commit().is_err());
    }

    #[test]
    fn persists_to_a_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("test.db");
        let config =
            ConnectionConfig::new("sqlite").with_database(path.display().to_string());

        let mut driver = SqliteDriver::new(&config).expect("valid config");
        driver.connect().expect("connects");
        driver
            .query(&Statement::raw("CREATE TABLE t (v INTEGER)"))
            .expect("creates table");
        driver.disconnect().expect("disconnects");

        let mut reopened = SqliteDriver::new(&config).expect("valid config");
        reopened.connect().expect("reconnects");
        let rows = reopened
            .query(&Statement::raw("SELECT count(*) FROM t"))
            .expect("table survived");
        assert_eq!(rows.scalar(), Some(&Value::Int(0)));
    }

    #[test]
    fn missing_database_path_is_a_configuration_error() {
        let config = ConnectionConfig::new("sqlite");
        assert!(matches!(
            SqliteDriver::new(&config),
            Err(OrmError::Configuration(_))
        ));
    }
}
