use std::time::Instant;

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use log::debug;
use mysql::prelude::Queryable;
use mysql::{Conn, Opts, OptsBuilder, Params};
use strata_core::{
    ConnectionConfig, Driver, DriverFactory, DriverFeatures, DriverKind, Grammar, MySqlGrammar,
    OrmError, OrmResult, RowSet, Statement, Value,
};

pub struct MySqlDriverFactory;

impl DriverFactory for MySqlDriverFactory {
    fn kind(&self) -> DriverKind {
        DriverKind::MySql
    }

    fn create(&self, config: &ConnectionConfig) -> OrmResult<Box<dyn Driver>> {
        Ok(Box::new(MySqlDriver::new(config)?))
    }
}

static GRAMMAR: MySqlGrammar = MySqlGrammar;

/// MySQL driver over the synchronous `mysql` client.
pub struct MySqlDriver {
    opts: Opts,
    host: String,
    port: u16,
    conn: Option<Conn>,
    in_transaction: bool,
}

impl MySqlDriver {
    pub fn new(config: &ConnectionConfig) -> OrmResult<Self> {
        let host = config.host_or("localhost");
        let port = config.port.unwrap_or(3306);
        let user = config
            .username
            .clone()
            .ok_or_else(|| OrmError::configuration("mysql requires a username"))?;

        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(host.clone()))
            .tcp_port(port)
            .user(Some(user))
            .pass(config.password.clone())
            .db_name(config.database.clone());

        Ok(Self {
            opts: opts.into(),
            host,
            port,
            conn: None,
            in_transaction: false,
        })
    }

    fn conn_mut(&mut self) -> OrmResult<&mut Conn> {
        self.conn
            .as_mut()
            .ok_or_else(|| OrmError::connection_failed("mysql connection is not open"))
    }

    fn execute_control(&mut self, sql: &str) -> OrmResult<()> {
        self.conn_mut()?
            .query_drop(sql)
            .map_err(|e| OrmError::query_failed(format!("mysql: {}", e)))
    }
}

impl Driver for MySqlDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::MySql
    }

    fn features(&self) -> DriverFeatures {
        DriverFeatures::RELATIONAL_BASE
    }

    fn grammar(&self) -> &dyn Grammar {
        &GRAMMAR
    }

    fn connect(&mut self) -> OrmResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        debug!("connecting to mysql at {}:{}", self.host, self.port);
        let conn = Conn::new(self.opts.clone()).map_err(|e| {
            OrmError::connection_failed(format!("mysql {}:{}: {}", self.host, self.port, e))
        })?;
        self.conn = Some(conn);
        Ok(())
    }

    fn disconnect(&mut self) -> OrmResult<()> {
        self.conn = None;
        self.in_transaction = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn query(&mut self, statement: &Statement) -> OrmResult<RowSet> {
        let started = Instant::now();
        let conn = self.conn_mut()?;

        // Prepare first: the statement metadata tells SELECTs apart from
        // mutations even when zero rows come back.
        let stmt = conn
            .prep(&statement.text)
            .map_err(|e| OrmError::query_failed(format!("mysql: {}", e)))?;
        let columns: Vec<String> = stmt
            .columns()
            .iter()
            .map(|c| c.name_str().into_owned())
            .collect();

        let params = if statement.params.is_empty() {
            Params::Empty
        } else {
            Params::Positional(statement.params.iter().map(value_to_mysql).collect())
        };

        let result: Vec<mysql::Row> = conn
            .exec(&stmt, params)
            .map_err(|e| OrmError::query_failed(format!("mysql: {}", e)))?;

        if columns.is_empty() {
            let affected = conn.affected_rows();
            let last_insert_id = conn.last_insert_id();
            return Ok(RowSet {
                affected_rows: Some(affected),
                last_insert_id: (last_insert_id != 0).then_some(last_insert_id as i64),
                execution_time: started.elapsed(),
                ..RowSet::default()
            });
        }

        let rows = result
            .into_iter()
            .map(|row| row.unwrap().iter().map(value_from_mysql).collect())
            .collect();

        Ok(RowSet {
            columns,
            rows,
            affected_rows: None,
            last_insert_id: None,
            execution_time: started.elapsed(),
        })
    }

    fn begin_transaction(&mut self) -> OrmResult<()> {
        if self.in_transaction {
            return Err(OrmError::query_failed("transaction already in progress"));
        }
        self.execute_control("BEGIN")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> OrmResult<()> {
        if !self.in_transaction {
            return Err(OrmError::query_failed("commit outside of a transaction"));
        }
        self.execute_control("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> OrmResult<()> {
        if !self.in_transaction {
            return Err(OrmError::query_failed("rollback outside of a transaction"));
        }
        self.execute_control("ROLLBACK")?;
        self.in_transaction = false;
        Ok(())
    }
}

fn value_to_mysql(value: &Value) -> mysql::Value {
    use mysql::Value as Sql;
    match value {
        Value::Null => Sql::NULL,
        Value::Bool(b) => Sql::Int(i64::from(*b)),
        Value::Int(i) => Sql::Int(*i),
        Value::Float(f) => Sql::Double(*f),
        Value::Text(s) | Value::Json(s) | Value::Decimal(s) => Sql::Bytes(s.clone().into_bytes()),
        Value::Bytes(b) => Sql::Bytes(b.clone()),
        Value::DateTime(dt) => Sql::Bytes(
            dt.format("%Y-%m-%d %H:%M:%S%.6f")
                .to_string()
                .into_bytes(),
        ),
        Value::Date(d) => Sql::Bytes(d.format("%Y-%m-%d").to_string().into_bytes()),
        Value::Time(t) => Sql::Bytes(t.format("%H:%M:%S%.6f").to_string().into_bytes()),
        Value::Array(_) => Sql::Bytes(value.to_json().to_string().into_bytes()),
    }
}

fn value_from_mysql(value: &mysql::Value) -> Value {
    use mysql::Value as Sql;
    match value {
        Sql::NULL => Value::Null,
        Sql::Int(i) => Value::Int(*i),
        Sql::UInt(u) => i64::try_from(*u)
            .map(Value::Int)
            .unwrap_or_else(|_| Value::Text(u.to_string())),
        Sql::Float(f) => Value::Float(f64::from(*f)),
        Sql::Double(f) => Value::Float(*f),
        Sql::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => Value::Text(text.to_string()),
            Err(_) => Value::Bytes(bytes.clone()),
        },
        Sql::Date(year, month, day, hour, minute, second, micros) => {
            if *hour == 0 && *minute == 0 && *second == 0 && *micros == 0 {
                NaiveDate::from_ymd_opt(i32::from(*year), u32::from(*month), u32::from(*day))
                    .map(Value::Date)
                    .unwrap_or(Value::Null)
            } else {
                NaiveDate::from_ymd_opt(i32::from(*year), u32::from(*month), u32::from(*day))
                    .and_then(|date| {
                        date.and_hms_micro_opt(
                            u32::from(*hour),
                            u32::from(*minute),
                            u32::from(*second),
                            *micros,
                        )
                    })
                    .map(|naive| Value::DateTime(Utc.from_utc_datetime(&naive)))
                    .unwrap_or(Value::Null)
            }
        }
        Sql::Time(negative, days, hours, minutes, seconds, micros) => {
            if *negative || *days > 0 {
                Value::Text(format!(
                    "{}{}d {:02}:{:02}:{:02}.{:06}",
                    if *negative { "-" } else { "" },
                    days,
                    hours,
                    minutes,
                    seconds,
                    micros
                ))
            } else {
                NaiveTime::from_hms_micro_opt(
                    u32::from(*hours),
                    u32::from(*minutes),
                    u32::from(*seconds),
                    *micros,
                )
                .map(Value::Time)
                .unwrap_or(Value::Null)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_requires_a_username() {
        let config = ConnectionConfig::new("mysql");
        assert!(matches!(
            MySqlDriver::new(&config),
            Err(OrmError::Configuration(_))
        ));
    }

    #[test]
    fn values_map_to_native_forms() {
        assert_eq!(value_to_mysql(&Value::Null), mysql::Value::NULL);
        assert_eq!(value_to_mysql(&Value::Bool(true)), mysql::Value::Int(1));
        assert_eq!(
            value_to_mysql(&Value::Text("x".to_string())),
            mysql::Value::Bytes(b"x".to_vec())
        );
    }

    #[test]
    fn native_values_coerce_to_portable_forms() {
        assert_eq!(value_from_mysql(&mysql::Value::Int(7)), Value::Int(7));
        assert_eq!(
            value_from_mysql(&mysql::Value::UInt(u64::MAX)),
            Value::Text(u64::MAX.to_string())
        );
        assert_eq!(
            value_from_mysql(&mysql::Value::Bytes(b"name".to_vec())),
            Value::Text("name".to_string())
        );
        assert!(matches!(
            value_from_mysql(&mysql::Value::Date(2024, 3, 1, 10, 30, 0, 0)),
            Value::DateTime(_)
        ));
        assert_eq!(
            value_from_mysql(&mysql::Value::Date(2024, 3, 1, 0, 0, 0, 0)),
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date"))
        );
    }
}
