use std::collections::HashMap;
use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike};
use log::debug;
use scylla::client::execution_profile::ExecutionProfile;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::cluster::metadata::{ColumnType, NativeType};
use scylla::policies::load_balancing::DefaultPolicy;
use scylla::statement::prepared::PreparedStatement;
use scylla::value::{
    Counter, CqlDate, CqlDecimal, CqlTime, CqlTimestamp, CqlValue, Row,
};
use strata_core::{
    ConnectionConfig, CqlGrammar, Driver, DriverFactory, DriverFeatures, DriverKind, Grammar,
    OrmError, OrmResult, RowSet, Statement, Value,
};

pub struct ScyllaDriverFactory;

impl DriverFactory for ScyllaDriverFactory {
    fn kind(&self) -> DriverKind {
        DriverKind::ScyllaDb
    }

    fn create(&self, config: &ConnectionConfig) -> OrmResult<Box<dyn Driver>> {
        Ok(Box::new(ScyllaDriver::new(config)?))
    }
}

static GRAMMAR: CqlGrammar = CqlGrammar;

/// Days between the CQL date epoch offset (2^31 = 1970-01-01) and the
/// common era, for chrono conversion.
const EPOCH_FROM_CE: i32 = 719_163;

/// Wide-column driver over the `scylla` session.
///
/// The native client is async-only; the driver owns a tokio runtime and
/// blocks on it, keeping the `Driver` contract synchronous like every
/// other backend. Prepared statements are cached per driver by statement
/// text and dropped on disconnect (the session invalidates them).
pub struct ScyllaDriver {
    host: String,
    port: u16,
    keyspace: Option<String>,
    username: Option<String>,
    password: Option<String>,
    local_data_center: Option<String>,
    runtime: tokio::runtime::Runtime,
    session: Option<Session>,
    prepared: HashMap<String, PreparedStatement>,
}

impl ScyllaDriver {
    pub fn new(config: &ConnectionConfig) -> OrmResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .map_err(|e| OrmError::configuration(format!("tokio runtime: {}", e)))?;

        Ok(Self {
            host: config.host_or("localhost"),
            port: config.port.unwrap_or(9042),
            keyspace: config.keyspace_or_database().map(str::to_string),
            username: config.username.clone(),
            password: config.password.clone(),
            local_data_center: config.local_data_center.clone(),
            runtime,
            session: None,
            prepared: HashMap::new(),
        })
    }

    fn session(&self) -> OrmResult<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| OrmError::connection_failed("scylladb session is not open"))
    }

    fn prepare_cached(&mut self, text: &str) -> OrmResult<PreparedStatement> {
        if let Some(prepared) = self.prepared.get(text) {
            return Ok(prepared.clone());
        }
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| OrmError::connection_failed("scylladb session is not open"))?;
        let prepared = self
            .runtime
            .block_on(session.prepare(text.to_string()))
            .map_err(|e| OrmError::query_failed(format!("scylladb prepare: {}", e)))?;
        self.prepared.insert(text.to_string(), prepared.clone());
        Ok(prepared)
    }
}

impl Driver for ScyllaDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::ScyllaDb
    }

    fn features(&self) -> DriverFeatures {
        DriverFeatures::WIDE_COLUMN_BASE
    }

    fn grammar(&self) -> &dyn Grammar {
        &GRAMMAR
    }

    fn connect(&mut self) -> OrmResult<()> {
        if self.session.is_some() {
            return Ok(());
        }
        debug!("connecting to scylladb at {}:{}", self.host, self.port);

        let mut builder = SessionBuilder::new().known_node(format!("{}:{}", self.host, self.port));
        if let (Some(user), Some(password)) = (&self.username, &self.password) {
            builder = builder.user(user.clone(), password.clone());
        }
        if let Some(keyspace) = &self.keyspace {
            builder = builder.use_keyspace(keyspace.clone(), false);
        }
        if let Some(dc) = &self.local_data_center {
            let policy = DefaultPolicy::builder()
                .prefer_datacenter(dc.clone())
                .build();
            let profile = ExecutionProfile::builder()
                .load_balancing_policy(policy)
                .build();
            builder = builder.default_execution_profile_handle(profile.into_handle());
        }

        let session = self.runtime.block_on(builder.build()).map_err(|e| {
            OrmError::connection_failed(format!("scylladb {}:{}: {}", self.host, self.port, e))
        })?;
        self.session = Some(session);
        Ok(())
    }

    fn disconnect(&mut self) -> OrmResult<()> {
        self.session = None;
        self.prepared.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn query(&mut self, statement: &Statement) -> OrmResult<RowSet> {
        let started = Instant::now();
        let prepared = self.prepare_cached(&statement.text)?;

        let params: Vec<Option<CqlValue>> = {
            let specs = prepared.get_variable_col_specs();
            let mut bound = Vec::with_capacity(statement.params.len());
            for (index, value) in statement.params.iter().enumerate() {
                let target = specs.get_by_index(index).map(|spec| spec.typ().clone());
                bound.push(value_to_cql(value, target.as_ref())?);
            }
            bound
        };

        let session = self.session()?;
        let result = self
            .runtime
            .block_on(session.execute_unpaged(&prepared, params))
            .map_err(|e| OrmError::query_failed(format!("scylladb: {}", e)))?;

        let Ok(rows_result) = result.into_rows_result() else {
            // Mutations and LWTs without rows: CQL reports no counts.
            return Ok(RowSet {
                affected_rows: Some(0),
                execution_time: started.elapsed(),
                ..RowSet::default()
            });
        };

        let columns: Vec<String> = rows_result
            .column_specs()
            .iter()
            .map(|spec| spec.name().to_string())
            .collect();

        let mut rows = Vec::new();
        let iterator = rows_result
            .rows::<Row>()
            .map_err(|e| OrmError::query_failed(format!("scylladb: {}", e)))?;
        for row in iterator {
            let row = row.map_err(|e| OrmError::query_failed(format!("scylladb: {}", e)))?;
            rows.push(
                row.columns
                    .into_iter()
                    .map(|column| column.map(cql_to_value).unwrap_or(Value::Null))
                    .collect(),
            );
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
        Err(OrmError::unsupported(
            "the wide-column backend has no transactions; use batches or LWT conditions",
        ))
    }

    fn commit(&mut self) -> OrmResult<()> {
        Err(OrmError::unsupported(
            "the wide-column backend has no transactions",
        ))
    }

    fn rollback(&mut self) -> OrmResult<()> {
        Err(OrmError::unsupported(
            "the wide-column backend has no transactions",
        ))
    }
}

/// Bind a portable value against the prepared statement's declared column
/// type, so integer widths and temporal encodings match the schema.
fn value_to_cql(value: &Value, target: Option<&ColumnType<'_>>) -> OrmResult<Option<CqlValue>> {
    let native = match target {
        Some(ColumnType::Native(native)) => Some(native),
        _ => None,
    };

    let converted = match value {
        Value::Null => None,
        Value::Bool(b) => Some(CqlValue::Boolean(*b)),
        Value::Int(i) => Some(match native {
            Some(NativeType::Int) => CqlValue::Int(*i as i32),
            Some(NativeType::SmallInt) => CqlValue::SmallInt(*i as i16),
            Some(NativeType::TinyInt) => CqlValue::TinyInt(*i as i8),
            Some(NativeType::Counter) => CqlValue::Counter(Counter(*i)),
            Some(NativeType::Double) => CqlValue::Double(*i as f64),
            Some(NativeType::Float) => CqlValue::Float(*i as f32),
            Some(NativeType::Timestamp) => CqlValue::Timestamp(CqlTimestamp(*i)),
            _ => CqlValue::BigInt(*i),
        }),
        Value::Float(f) => Some(match native {
            Some(NativeType::Float) => CqlValue::Float(*f as f32),
            _ => CqlValue::Double(*f),
        }),
        Value::Text(s) => Some(match native {
            Some(NativeType::Uuid) | Some(NativeType::Timeuuid) => {
                let parsed = uuid::Uuid::from_str(s)
                    .map_err(|e| OrmError::query_failed(format!("'{}' is not a uuid: {}", s, e)))?;
                CqlValue::Uuid(parsed)
            }
            Some(NativeType::Timestamp) => {
                let parsed = Value::parse_datetime(s).ok_or_else(|| {
                    OrmError::query_failed(format!("'{}' is not a timestamp", s))
                })?;
                CqlValue::Timestamp(CqlTimestamp(parsed.timestamp_millis()))
            }
            _ => CqlValue::Text(s.clone()),
        }),
        Value::Json(s) | Value::Decimal(s) => Some(CqlValue::Text(s.clone())),
        Value::Bytes(b) => Some(CqlValue::Blob(b.clone())),
        Value::DateTime(dt) => Some(CqlValue::Timestamp(CqlTimestamp(dt.timestamp_millis()))),
        Value::Date(d) => Some(CqlValue::Date(date_to_cql(d))),
        Value::Time(t) => Some(CqlValue::Time(CqlTime(
            i64::from(t.num_seconds_from_midnight()) * 1_000_000_000
                + i64::from(t.nanosecond()),
        ))),
        Value::Array(items) => {
            let list = items
                .iter()
                .map(|item| {
                    value_to_cql(item, None).map(|v| v.unwrap_or(CqlValue::Empty))
                })
                .collect::<OrmResult<Vec<_>>>()?;
            Some(CqlValue::List(list))
        }
    };

    Ok(converted)
}

/// Coerce native values to portable ones: UUIDs become strings, decimals
/// decimal strings, timestamps UTC datetimes, 64-bit integers where
/// representable.
fn cql_to_value(value: CqlValue) -> Value {
    match value {
        CqlValue::Ascii(s) | CqlValue::Text(s) => Value::Text(s),
        CqlValue::Boolean(b) => Value::Bool(b),
        CqlValue::Blob(bytes) => Value::Bytes(bytes),
        CqlValue::Counter(counter) => Value::Int(counter.0),
        CqlValue::TinyInt(i) => Value::Int(i64::from(i)),
        CqlValue::SmallInt(i) => Value::Int(i64::from(i)),
        CqlValue::Int(i) => Value::Int(i64::from(i)),
        CqlValue::BigInt(i) => Value::Int(i),
        CqlValue::Float(f) => Value::Float(f64::from(f)),
        CqlValue::Double(f) => Value::Float(f),
        CqlValue::Uuid(u) => Value::Text(u.to_string()),
        CqlValue::Timeuuid(u) => Value::Text(u.to_string()),
        CqlValue::Decimal(decimal) => Value::Decimal(decimal_to_string(&decimal)),
        CqlValue::Timestamp(CqlTimestamp(millis)) => DateTime::from_timestamp_millis(millis)
            .map(Value::DateTime)
            .unwrap_or(Value::Null),
        CqlValue::Date(date) => date_from_cql(date).map(Value::Date).unwrap_or(Value::Null),
        CqlValue::Time(CqlTime(nanos)) => NaiveTime::from_num_seconds_from_midnight_opt(
            (nanos / 1_000_000_000) as u32,
            (nanos % 1_000_000_000) as u32,
        )
        .map(Value::Time)
        .unwrap_or(Value::Null),
        CqlValue::Inet(addr) => Value::Text(addr.to_string()),
        CqlValue::List(items) | CqlValue::Set(items) => {
            Value::Array(items.into_iter().map(cql_to_value).collect())
        }
        CqlValue::Tuple(items) => Value::Array(
            items
                .into_iter()
                .map(|item| item.map(cql_to_value).unwrap_or(Value::Null))
                .collect(),
        ),
        CqlValue::Empty => Value::Null,
        other => Value::Text(format!("{:?}", other)),
    }
}

fn date_to_cql(date: &NaiveDate) -> CqlDate {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch exists");
    let days = date.signed_duration_since(epoch).num_days();
    CqlDate(((1i64 << 31) + days) as u32)
}

fn date_from_cql(date: CqlDate) -> Option<NaiveDate> {
    let days = i64::from(date.0) - (1i64 << 31);
    NaiveDate::from_num_days_from_ce_opt(EPOCH_FROM_CE + days as i32)
}

/// Render a CQL decimal exactly: signed big-endian mantissa bytes plus a
/// base-10 scale. Mantissas wider than 128 bits fall back to scientific
/// notation over the raw integer digits.
fn decimal_to_string(decimal: &CqlDecimal) -> String {
    let (bytes, scale) = decimal.as_signed_be_bytes_slice_and_exponent();
    match signed_be_bytes_to_i128(bytes) {
        Some(mantissa) => format_decimal(mantissa, scale),
        None => format!("0x{}e-{}", hex(bytes), scale),
    }
}

fn signed_be_bytes_to_i128(bytes: &[u8]) -> Option<i128> {
    if bytes.is_empty() {
        return Some(0);
    }
    if bytes.len() > 16 {
        return None;
    }
    let negative = bytes[0] & 0x80 != 0;
    let mut buf = [if negative { 0xff } else { 0x00 }; 16];
    buf[16 - bytes.len()..].copy_from_slice(bytes);
    Some(i128::from_be_bytes(buf))
}

fn format_decimal(mantissa: i128, scale: i32) -> String {
    if scale <= 0 {
        let mut out = mantissa.to_string();
        out.extend(std::iter::repeat('0').take((-scale) as usize));
        return out;
    }

    let negative = mantissa < 0;
    let digits = mantissa.unsigned_abs().to_string();
    let scale = scale as usize;

    let unsigned = if digits.len() > scale {
        let (whole, frac) = digits.split_at(digits.len() - scale);
        format!("{}.{}", whole, frac)
    } else {
        format!("0.{}{}", "0".repeat(scale - digits.len()), digits)
    };

    if negative {
        format!("-{}", unsigned)
    } else {
        unsigned
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_formatting() {
        assert_eq!(format_decimal(12345, 2), "123.45");
        assert_eq!(format_decimal(-12345, 2), "-123.45");
        assert_eq!(format_decimal(5, 3), "0.005");
        assert_eq!(format_decimal(42, 0), "42");
        assert_eq!(format_decimal(42, -2), "4200");
    }

    #[test]
    fn signed_bytes_round_trip() {
        assert_eq!(signed_be_bytes_to_i128(&[]), Some(0));
        assert_eq!(signed_be_bytes_to_i128(&[0x01]), Some(1));
        assert_eq!(signed_be_bytes_to_i128(&[0xff]), Some(-1));
        assert_eq!(signed_be_bytes_to_i128(&[0x04, 0xd2]), Some(1234));
        assert_eq!(signed_be_bytes_to_i128(&[0u8; 17]), None);
    }

    #[test]
    fn cql_date_round_trip() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date");
        assert_eq!(date_from_cql(date_to_cql(&date)), Some(date));

        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid date");
        assert_eq!(date_to_cql(&epoch).0, 1u32 << 31);
    }

    #[test]
    fn portable_coercions() {
        assert_eq!(cql_to_value(CqlValue::BigInt(9)), Value::Int(9));
        assert_eq!(
            cql_to_value(CqlValue::Uuid(uuid::Uuid::nil())),
            Value::Text("00000000-0000-0000-0000-000000000000".to_string())
        );
        assert!(matches!(
            cql_to_value(CqlValue::Timestamp(CqlTimestamp(1_700_000_000_000))),
            Value::DateTime(_)
        ));
        assert_eq!(cql_to_value(CqlValue::Empty), Value::Null);
    }

    #[test]
    fn null_binds_as_none() {
        let bound = value_to_cql(&Value::Null, None).expect("converts");
        assert!(bound.is_none());

        let bound = value_to_cql(&Value::Int(7), None).expect("converts");
        assert_eq!(bound, Some(CqlValue::BigInt(7)));
    }
}
