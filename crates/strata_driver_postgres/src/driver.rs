use std::error::Error as StdError;
use std::time::Instant;

use bytes::BytesMut;
use log::{debug, warn};
use postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use postgres::{Client, NoTls, Row as PgRow};
use strata_core::{
    ConnectionConfig, Driver, DriverFactory, DriverFeatures, DriverKind, Grammar, OrmError,
    OrmResult, PostgresGrammar, RowSet, Statement, Value,
};

pub struct PostgresDriverFactory;

impl DriverFactory for PostgresDriverFactory {
    fn kind(&self) -> DriverKind {
        DriverKind::PostgreSql
    }

    fn create(&self, config: &ConnectionConfig) -> OrmResult<Box<dyn Driver>> {
        Ok(Box::new(PostgresDriver::new(config)?))
    }
}

static GRAMMAR: PostgresGrammar = PostgresGrammar;

/// PostgreSQL driver over the synchronous `postgres` client.
pub struct PostgresDriver {
    conn_string: String,
    host: String,
    port: u16,
    client: Option<Client>,
    in_transaction: bool,
}

impl PostgresDriver {
    pub fn new(config: &ConnectionConfig) -> OrmResult<Self> {
        let host = config.host_or("localhost");
        let port = config.port.unwrap_or(5432);
        let user = config
            .username
            .clone()
            .ok_or_else(|| OrmError::configuration("postgresql requires a username"))?;
        let database = config
            .database
            .clone()
            .ok_or_else(|| OrmError::configuration("postgresql requires a database"))?;

        let mut conn_string = format!(
            "host={} port={} user={} dbname={} connect_timeout=30",
            host, port, user, database
        );
        if let Some(password) = &config.password {
            conn_string.push_str(&format!(" password={}", password));
        }

        Ok(Self {
            conn_string,
            host,
            port,
            client: None,
            in_transaction: false,
        })
    }

    fn client_mut(&mut self) -> OrmResult<&mut Client> {
        self.client
            .as_mut()
            .ok_or_else(|| OrmError::connection_failed("postgresql connection is not open"))
    }
}

impl Driver for PostgresDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::PostgreSql
    }

    fn features(&self) -> DriverFeatures {
        DriverFeatures::RELATIONAL_BASE | DriverFeatures::RETURNING
    }

    fn grammar(&self) -> &dyn Grammar {
        &GRAMMAR
    }

    fn connect(&mut self) -> OrmResult<()> {
        if self.client.is_some() {
            return Ok(());
        }
        debug!("connecting to postgresql at {}:{}", self.host, self.port);
        let client = Client::connect(&self.conn_string, NoTls).map_err(|e| {
            OrmError::connection_failed(format!("postgresql {}:{}: {}", self.host, self.port, e))
        })?;
        self.client = Some(client);
        Ok(())
    }

    fn disconnect(&mut self) -> OrmResult<()> {
        self.client = None;
        self.in_transaction = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn query(&mut self, statement: &Statement) -> OrmResult<RowSet> {
        let started = Instant::now();
        let client = self.client_mut()?;

        let prepared = client
            .prepare(&statement.text)
            .map_err(|e| OrmError::query_failed(format!("postgresql: {}", e)))?;

        let wrapped: Vec<PgValue<'_>> = statement.params.iter().map(PgValue).collect();
        let params: Vec<&(dyn ToSql + Sync)> =
            wrapped.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        if prepared.columns().is_empty() {
            let affected = client
                .execute(&prepared, &params)
                .map_err(|e| OrmError::query_failed(format!("postgresql: {}", e)))?;
            return Ok(RowSet {
                affected_rows: Some(affected),
                execution_time: started.elapsed(),
                ..RowSet::default()
            });
        }

        let pg_rows = client
            .query(&prepared, &params)
            .map_err(|e| OrmError::query_failed(format!("postgresql: {}", e)))?;

        let columns: Vec<String> = prepared
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let mut rows = Vec::with_capacity(pg_rows.len());
        for pg_row in &pg_rows {
            let mut row = Vec::with_capacity(columns.len());
            for index in 0..columns.len() {
                row.push(value_from_pg(pg_row, index)?);
            }
            rows.push(row);
        }

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
        self.client_mut()?
            .batch_execute("BEGIN")
            .map_err(|e| OrmError::query_failed(format!("postgresql: {}", e)))?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> OrmResult<()> {
        if !self.in_transaction {
            return Err(OrmError::query_failed("commit outside of a transaction"));
        }
        self.client_mut()?
            .batch_execute("COMMIT")
            .map_err(|e| OrmError::query_failed(format!("postgresql: {}", e)))?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> OrmResult<()> {
        if !self.in_transaction {
            return Err(OrmError::query_failed("rollback outside of a transaction"));
        }
        self.client_mut()?
            .batch_execute("ROLLBACK")
            .map_err(|e| OrmError::query_failed(format!("postgresql: {}", e)))?;
        self.in_transaction = false;
        Ok(())
    }
}

/// Binds a portable value against whatever parameter type the prepared
/// statement expects.
#[derive(Debug)]
struct PgValue<'a>(&'a Value);

impl ToSql for PgValue<'_> {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Int(i) => {
                if *ty == Type::INT2 {
                    (*i as i16).to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    (*i as i32).to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*i as f32).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*i as f64).to_sql(ty, out)
                } else {
                    i.to_sql(ty, out)
                }
            }
            Value::Float(f) => {
                if *ty == Type::FLOAT4 {
                    (*f as f32).to_sql(ty, out)
                } else {
                    f.to_sql(ty, out)
                }
            }
            Value::Text(s) | Value::Decimal(s) => {
                if *ty == Type::UUID {
                    uuid::Uuid::parse_str(s)?.to_sql(ty, out)
                } else if *ty == Type::TIMESTAMP {
                    let parsed = Value::parse_datetime(s)
                        .ok_or_else(|| format!("'{}' is not a timestamp", s))?;
                    parsed.naive_utc().to_sql(ty, out)
                } else if *ty == Type::TIMESTAMPTZ {
                    let parsed = Value::parse_datetime(s)
                        .ok_or_else(|| format!("'{}' is not a timestamp", s))?;
                    parsed.to_sql(ty, out)
                } else {
                    s.to_sql(ty, out)
                }
            }
            Value::Bytes(b) => b.to_sql(ty, out),
            Value::Json(raw) => {
                let parsed: serde_json::Value = serde_json::from_str(raw)
                    .unwrap_or_else(|_| serde_json::Value::String(raw.clone()));
                parsed.to_sql(ty, out)
            }
            Value::DateTime(dt) => {
                if *ty == Type::TIMESTAMP {
                    dt.naive_utc().to_sql(ty, out)
                } else {
                    dt.to_sql(ty, out)
                }
            }
            Value::Date(d) => d.to_sql(ty, out),
            Value::Time(t) => t.to_sql(ty, out),
            Value::Array(_) => {
                let json = self.0.to_json();
                json.to_sql(ty, out)
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn value_from_pg(row: &PgRow, index: usize) -> OrmResult<Value> {
    let ty = row.columns()[index].type_().clone();
    let read = |e: postgres::Error| OrmError::query_failed(format!("postgresql: {}", e));

    let value = if ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(index)
            .map_err(read)?
            .map(Value::Bool)
    } else if ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(index)
            .map_err(read)?
            .map(|v| Value::Int(i64::from(v)))
    } else if ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(index)
            .map_err(read)?
            .map(|v| Value::Int(i64::from(v)))
    } else if ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(index)
            .map_err(read)?
            .map(Value::Int)
    } else if ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(index)
            .map_err(read)?
            .map(|v| Value::Float(f64::from(v)))
    } else if ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(index)
            .map_err(read)?
            .map(Value::Float)
    } else if ty == Type::UUID {
        row.try_get::<_, Option<uuid::Uuid>>(index)
            .map_err(read)?
            .map(|v| Value::Text(v.to_string()))
    } else if ty == Type::JSON || ty == Type::JSONB {
        row.try_get::<_, Option<serde_json::Value>>(index)
            .map_err(read)?
            .map(|v| Value::Json(v.to_string()))
    } else if ty == Type::TIMESTAMP {
        row.try_get::<_, Option<chrono::NaiveDateTime>>(index)
            .map_err(read)?
            .map(|v| Value::DateTime(v.and_utc()))
    } else if ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(index)
            .map_err(read)?
            .map(Value::DateTime)
    } else if ty == Type::DATE {
        row.try_get::<_, Option<chrono::NaiveDate>>(index)
            .map_err(read)?
            .map(Value::Date)
    } else if ty == Type::TIME {
        row.try_get::<_, Option<chrono::NaiveTime>>(index)
            .map_err(read)?
            .map(Value::Time)
    } else if ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(index)
            .map_err(read)?
            .map(Value::Bytes)
    } else {
        match row.try_get::<_, Option<String>>(index) {
            Ok(text) => text.map(Value::Text),
            Err(_) => {
                warn!("unhandled postgresql type {}; reading as NULL", ty);
                None
            }
        }
    };

    Ok(value.unwrap_or(Value::Null))
}
