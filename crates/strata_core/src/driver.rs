use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::{ConnectionConfig, Grammar, OrmError, OrmResult, Value};

/// Supported backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverKind {
    ScyllaDb,
    MySql,
    PostgreSql,
    Sqlite,
    MongoDb,
}

impl DriverKind {
    pub fn name(&self) -> &'static str {
        match self {
            DriverKind::ScyllaDb => "scylladb",
            DriverKind::MySql => "mysql",
            DriverKind::PostgreSql => "postgresql",
            DriverKind::Sqlite => "sqlite",
            DriverKind::MongoDb => "mongodb",
        }
    }
}

impl FromStr for DriverKind {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scylladb" | "scylla" | "cassandra" => Ok(DriverKind::ScyllaDb),
            "mysql" | "mariadb" => Ok(DriverKind::MySql),
            "postgresql" | "postgres" | "pgsql" => Ok(DriverKind::PostgreSql),
            "sqlite" | "sqlite3" => Ok(DriverKind::Sqlite),
            "mongodb" | "mongo" => Ok(DriverKind::MongoDb),
            other => Err(OrmError::UnsupportedDriver(other.to_string())),
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Capabilities a backend driver may support.
    ///
    /// The record and query layers consult these before emitting
    /// backend-specific syntax; drivers declare them at construction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DriverFeatures: u32 {
        const PREPARED_STATEMENTS     = 1 << 0;
        const BATCH_OPERATIONS        = 1 << 1;
        const TRANSACTIONS            = 1 << 2;
        const RETURNING               = 1 << 3;
        const TTL                     = 1 << 4;
        const LIGHTWEIGHT_TRANSACTIONS = 1 << 5;
        const MATERIALIZED_VIEWS      = 1 << 6;
        const SECONDARY_INDEXES       = 1 << 7;
        const COLLECTIONS             = 1 << 8;
        const USER_DEFINED_TYPES      = 1 << 9;
        const COUNTERS                = 1 << 10;
        const JSON                    = 1 << 11;
        const FOREIGN_KEYS            = 1 << 12;
        const AUTO_INCREMENT          = 1 << 13;
    }
}

impl DriverFeatures {
    /// Baseline for the relational engines.
    pub const RELATIONAL_BASE: Self = Self::from_bits_truncate(
        Self::PREPARED_STATEMENTS.bits()
            | Self::TRANSACTIONS.bits()
            | Self::SECONDARY_INDEXES.bits()
            | Self::JSON.bits()
            | Self::FOREIGN_KEYS.bits()
            | Self::AUTO_INCREMENT.bits(),
    );

    /// Baseline for the wide-column backend.
    pub const WIDE_COLUMN_BASE: Self = Self::from_bits_truncate(
        Self::PREPARED_STATEMENTS.bits()
            | Self::BATCH_OPERATIONS.bits()
            | Self::TTL.bits()
            | Self::LIGHTWEIGHT_TRANSACTIONS.bits()
            | Self::MATERIALIZED_VIEWS.bits()
            | Self::SECONDARY_INDEXES.bits()
            | Self::COLLECTIONS.bits()
            | Self::USER_DEFINED_TYPES.bits()
            | Self::COUNTERS.bits(),
    );

    /// Baseline for the document backend.
    pub const DOCUMENT_BASE: Self =
        Self::from_bits_truncate(Self::BATCH_OPERATIONS.bits() | Self::JSON.bits());

    /// Look up a single flag by its wire name (the `supportsFeature(name)`
    /// contract). Unknown names map to no flag, so they read as unsupported.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "prepared_statements" => Some(Self::PREPARED_STATEMENTS),
            "batch_operations" => Some(Self::BATCH_OPERATIONS),
            "transactions" => Some(Self::TRANSACTIONS),
            "returning" => Some(Self::RETURNING),
            "ttl" => Some(Self::TTL),
            "lightweight_transactions" => Some(Self::LIGHTWEIGHT_TRANSACTIONS),
            "materialized_views" => Some(Self::MATERIALIZED_VIEWS),
            "secondary_indexes" => Some(Self::SECONDARY_INDEXES),
            "collections" => Some(Self::COLLECTIONS),
            "user_defined_types" => Some(Self::USER_DEFINED_TYPES),
            "counters" => Some(Self::COUNTERS),
            "json" => Some(Self::JSON),
            "foreign_keys" => Some(Self::FOREIGN_KEYS),
            "auto_increment" => Some(Self::AUTO_INCREMENT),
            _ => None,
        }
    }
}

/// A compiled statement ready for driver execution.
///
/// For SQL/CQL backends `text` carries placeholders and `params` the values
/// to bind, in emission order. For the document backend `text` is a
/// directive (`collection:op:payload`) and `params` is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub text: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(text: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            text: text.into(),
            params,
        }
    }

    pub fn raw(text: impl Into<String>) -> Self {
        Self::new(text, Vec::new())
    }
}

pub type Row = Vec<Value>;

/// Rows returned from a driver, with portable value coercion applied.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub affected_rows: Option<u64>,
    /// Auto-increment key assigned by the backend, where it reports one.
    pub last_insert_id: Option<i64>,
    pub execution_time: Duration,
}

impl RowSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn affected(count: u64) -> Self {
        Self {
            affected_rows: Some(count),
            ..Self::default()
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First value of the first row, for single-aggregate results.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }
}

/// Backend adapter. One implementation per supported engine.
///
/// Drivers own their native client handle and are created disconnected;
/// `connect` is the only place a native client is built. All methods that
/// touch the backend are potentially blocking.
pub trait Driver: Send {
    fn kind(&self) -> DriverKind;

    /// Capability set declared by this driver.
    fn features(&self) -> DriverFeatures;

    fn supports(&self, feature: DriverFeatures) -> bool {
        self.features().contains(feature)
    }

    /// Named capability check (`supportsFeature("ttl")`).
    fn supports_feature(&self, name: &str) -> bool {
        DriverFeatures::from_wire_name(name)
            .map(|flag| self.supports(flag))
            .unwrap_or(false)
    }

    /// The compiler turning query IR into this backend's statements.
    fn grammar(&self) -> &dyn Grammar;

    fn connect(&mut self) -> OrmResult<()>;

    fn disconnect(&mut self) -> OrmResult<()>;

    fn is_connected(&self) -> bool;

    /// Execute a compiled statement, binding `params` through the
    /// prepared-statement path where the backend has one.
    fn query(&mut self, statement: &Statement) -> OrmResult<RowSet>;

    fn begin_transaction(&mut self) -> OrmResult<()>;

    fn commit(&mut self) -> OrmResult<()>;

    fn rollback(&mut self) -> OrmResult<()>;

    /// Render a value as a quoted literal for log output only. Execution
    /// always binds through `query`'s parameter path.
    fn escape(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            other => format!("'{}'", other.display().replace('\'', "''")),
        }
    }
}

/// Creates drivers for one backend kind.
///
/// Factories are registered on the `ConnectionRegistry`; `create` builds a
/// disconnected driver from a config snapshot and never touches the network.
pub trait DriverFactory: Send + Sync {
    fn kind(&self) -> DriverKind;

    fn create(&self, config: &ConnectionConfig) -> OrmResult<Box<dyn Driver>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_kind_parses_spec_names_and_aliases() {
        assert_eq!("scylladb".parse::<DriverKind>().unwrap(), DriverKind::ScyllaDb);
        assert_eq!("postgres".parse::<DriverKind>().unwrap(), DriverKind::PostgreSql);
        assert_eq!("mongo".parse::<DriverKind>().unwrap(), DriverKind::MongoDb);
        assert!(matches!(
            "oracle".parse::<DriverKind>(),
            Err(OrmError::UnsupportedDriver(_))
        ));
    }

    #[test]
    fn feature_names_round_trip() {
        assert_eq!(
            DriverFeatures::from_wire_name("lightweight_transactions"),
            Some(DriverFeatures::LIGHTWEIGHT_TRANSACTIONS)
        );
        assert_eq!(DriverFeatures::from_wire_name("clustering"), None);
    }

    #[test]
    fn wide_column_base_has_no_foreign_keys() {
        let features = DriverFeatures::WIDE_COLUMN_BASE;
        assert!(features.contains(DriverFeatures::TTL));
        assert!(features.contains(DriverFeatures::LIGHTWEIGHT_TRANSACTIONS));
        assert!(!features.contains(DriverFeatures::FOREIGN_KEYS));
        assert!(!features.contains(DriverFeatures::RETURNING));
    }
}
