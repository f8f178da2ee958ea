use thiserror::Error;

/// Data-access errors.
///
/// Every operation in the registry, query and record layers returns this
/// type so callers handle all backends uniformly. Driver-native errors are
/// converted at the driver boundary with an identifying prefix and are
/// otherwise passed through unmodified.
#[derive(Debug, Error)]
pub enum OrmError {
    /// Malformed connection configuration (missing host, bad port, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The `driver` option names a backend no factory is registered for.
    #[error("Unsupported driver: {0}")]
    UnsupportedDriver(String),

    /// A connection with this name is already registered.
    #[error("Connection '{0}' already exists")]
    AlreadyExists(String),

    /// No connection registered under this name.
    #[error("Connection '{0}' not found")]
    NotFound(String),

    /// Failed to establish or tear down a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The backend rejected a statement.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// The operation requires a capability the selected driver lacks
    /// (TTL on a relational backend, OFFSET on the wide-column backend, ...).
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Mass-assignment violation surfaced in strict mode.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// `find_or_fail` found no row for the given primary key.
    #[error("No record found in '{0}'")]
    RecordNotFound(String),

    /// A polymorphic relation met a morph tag with no registered class,
    /// or a relation definition references an unknown class.
    #[error("Relation misconfigured: {0}")]
    RelationMisconfigured(String),

    /// The operation was cancelled through the native client.
    #[error("Operation cancelled")]
    Cancelled,

    /// The operation exceeded the configured timeout.
    #[error("Operation timed out")]
    Timeout,

    /// Filesystem or network I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrmError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn query_failed(msg: impl Into<String>) -> Self {
        Self::QueryFailed(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedFeature(msg.into())
    }

    pub fn relation(msg: impl Into<String>) -> Self {
        Self::RelationMisconfigured(msg.into())
    }
}

pub type OrmResult<T> = Result<T, OrmError>;
