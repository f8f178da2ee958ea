use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use strata_core::{
    ConnectionConfig, CqlGrammar, Driver, DriverFactory, DriverFeatures, DriverKind, Grammar,
    MongoGrammar, MySqlGrammar, OrmError, OrmResult, PostgresGrammar, RowSet, SqliteGrammar,
    Statement, Value,
};

/// Scripted outcome of one statement.
#[derive(Debug, Clone)]
pub enum FakeOutcome {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    Affected(u64),
    Error(String),
}

impl FakeOutcome {
    fn into_result(&self) -> OrmResult<RowSet> {
        match self {
            Self::Rows { columns, rows } => Ok(RowSet {
                columns: columns.clone(),
                rows: rows.clone(),
                ..RowSet::default()
            }),
            Self::Affected(count) => Ok(RowSet::affected(*count)),
            Self::Error(message) => Err(OrmError::query_failed(message.clone())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeDriverStats {
    pub executed: Vec<Statement>,
    pub connect_calls: usize,
    pub disconnect_calls: usize,
    pub begin_calls: usize,
    pub commit_calls: usize,
    pub rollback_calls: usize,
}

/// Shared driver state: the handle a test keeps is the same state the
/// registry-owned driver mutates.
#[derive(Default)]
pub struct FakeState {
    outcomes: RwLock<HashMap<String, Vec<FakeOutcome>>>,
    default_outcome: RwLock<Option<FakeOutcome>>,
    executed: Mutex<Vec<Statement>>,
    connect_error: RwLock<Option<String>>,
    connected: AtomicBool,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    begin_calls: AtomicUsize,
    commit_calls: AtomicUsize,
    rollback_calls: AtomicUsize,
}

/// Deterministic in-memory driver for contract tests.
///
/// Outcomes are scripted per statement text (consumed in order when a
/// statement repeats) with an optional default; every executed statement
/// is recorded for assertion.
#[derive(Clone)]
pub struct FakeDriver {
    kind: DriverKind,
    state: Arc<FakeState>,
}

impl FakeDriver {
    pub fn new(kind: DriverKind) -> Self {
        Self {
            kind,
            state: Arc::new(FakeState::default()),
        }
    }

    pub fn state(&self) -> Arc<FakeState> {
        self.state.clone()
    }

    pub fn with_rows(
        self,
        statement: impl Into<String>,
        columns: &[&str],
        rows: Vec<Vec<Value>>,
    ) -> Self {
        self.state.script_rows(statement, columns, rows);
        self
    }

    pub fn with_affected(self, statement: impl Into<String>, count: u64) -> Self {
        self.state.script(statement, FakeOutcome::Affected(count));
        self
    }

    pub fn with_error(self, statement: impl Into<String>, message: impl Into<String>) -> Self {
        self.state
            .script(statement, FakeOutcome::Error(message.into()));
        self
    }

    pub fn with_connect_error(self, message: impl Into<String>) -> Self {
        *write_lock(&self.state.connect_error) = Some(message.into());
        self
    }
}

impl FakeState {
    /// Queue an outcome for one statement text. Repeated scripting of the
    /// same text queues outcomes consumed in order.
    pub fn script(&self, statement: impl Into<String>, outcome: FakeOutcome) {
        write_lock(&self.outcomes)
            .entry(statement.into())
            .or_default()
            .push(outcome);
    }

    pub fn script_rows(
        &self,
        statement: impl Into<String>,
        columns: &[&str],
        rows: Vec<Vec<Value>>,
    ) {
        self.script(
            statement,
            FakeOutcome::Rows {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
            },
        );
    }

    pub fn script_default_rows(&self, columns: &[&str], rows: Vec<Vec<Value>>) {
        *write_lock(&self.default_outcome) = Some(FakeOutcome::Rows {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        });
    }

    pub fn set_connect_error(&self, message: impl Into<String>) {
        *write_lock(&self.connect_error) = Some(message.into());
    }

    pub fn stats(&self) -> FakeDriverStats {
        FakeDriverStats {
            executed: mutex_lock(&self.executed).clone(),
            connect_calls: self.connect_calls.load(Ordering::Relaxed),
            disconnect_calls: self.disconnect_calls.load(Ordering::Relaxed),
            begin_calls: self.begin_calls.load(Ordering::Relaxed),
            commit_calls: self.commit_calls.load(Ordering::Relaxed),
            rollback_calls: self.rollback_calls.load(Ordering::Relaxed),
        }
    }

    /// Statement texts in execution order.
    pub fn executed_texts(&self) -> Vec<String> {
        mutex_lock(&self.executed)
            .iter()
            .map(|s| s.text.clone())
            .collect()
    }

    pub fn clear_log(&self) {
        mutex_lock(&self.executed).clear();
    }
}

static SQLITE_GRAMMAR: SqliteGrammar = SqliteGrammar;
static POSTGRES_GRAMMAR: PostgresGrammar = PostgresGrammar;
static MYSQL_GRAMMAR: MySqlGrammar = MySqlGrammar;
static CQL_GRAMMAR: CqlGrammar = CqlGrammar;
static MONGO_GRAMMAR: MongoGrammar = MongoGrammar;

impl Driver for FakeDriver {
    fn kind(&self) -> DriverKind {
        self.kind
    }

    fn features(&self) -> DriverFeatures {
        match self.kind {
            DriverKind::ScyllaDb => DriverFeatures::WIDE_COLUMN_BASE,
            DriverKind::MongoDb => DriverFeatures::DOCUMENT_BASE,
            DriverKind::PostgreSql | DriverKind::Sqlite => {
                DriverFeatures::RELATIONAL_BASE | DriverFeatures::RETURNING
            }
            DriverKind::MySql => DriverFeatures::RELATIONAL_BASE,
        }
    }

    fn grammar(&self) -> &dyn Grammar {
        match self.kind {
            DriverKind::Sqlite => &SQLITE_GRAMMAR,
            DriverKind::PostgreSql => &POSTGRES_GRAMMAR,
            DriverKind::MySql => &MYSQL_GRAMMAR,
            DriverKind::ScyllaDb => &CQL_GRAMMAR,
            DriverKind::MongoDb => &MONGO_GRAMMAR,
        }
    }

    fn connect(&mut self) -> OrmResult<()> {
        self.state.connect_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(message) = read_lock(&self.state.connect_error).clone() {
            return Err(OrmError::connection_failed(message));
        }
        self.state.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn disconnect(&mut self) -> OrmResult<()> {
        self.state.disconnect_calls.fetch_add(1, Ordering::Relaxed);
        self.state.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Relaxed)
    }

    fn query(&mut self, statement: &Statement) -> OrmResult<RowSet> {
        mutex_lock(&self.state.executed).push(statement.clone());

        let scripted = {
            let mut outcomes = write_lock(&self.state.outcomes);
            outcomes.get_mut(&statement.text).and_then(|queue| {
                if queue.len() > 1 {
                    Some(queue.remove(0))
                } else {
                    queue.first().cloned()
                }
            })
        };
        if let Some(outcome) = scripted {
            return outcome.into_result();
        }

        if let Some(outcome) = read_lock(&self.state.default_outcome).clone() {
            return outcome.into_result();
        }

        Ok(RowSet::empty())
    }

    fn begin_transaction(&mut self) -> OrmResult<()> {
        self.state.begin_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn commit(&mut self) -> OrmResult<()> {
        self.state.commit_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn rollback(&mut self) -> OrmResult<()> {
        self.state.rollback_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Factory handing out drivers that all share one scripted state, so a
/// test keeps asserting through its own handle after the registry takes
/// ownership of the driver.
pub struct FakeDriverFactory {
    kind: DriverKind,
    state: Arc<FakeState>,
}

impl FakeDriverFactory {
    pub fn new(kind: DriverKind) -> Self {
        Self {
            kind,
            state: Arc::new(FakeState::default()),
        }
    }

    pub fn state(&self) -> Arc<FakeState> {
        self.state.clone()
    }

    pub fn shared(kind: DriverKind) -> (Arc<Self>, Arc<FakeState>) {
        let factory = Arc::new(Self::new(kind));
        let state = factory.state();
        (factory, state)
    }
}

impl DriverFactory for FakeDriverFactory {
    fn kind(&self) -> DriverKind {
        self.kind
    }

    fn create(&self, _config: &ConnectionConfig) -> OrmResult<Box<dyn Driver>> {
        Ok(Box::new(FakeDriver {
            kind: self.kind,
            state: self.state.clone(),
        }))
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}

fn mutex_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}
