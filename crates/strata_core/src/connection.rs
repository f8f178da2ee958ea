use log::debug;

use crate::{
    ConnectionConfig, Driver, DriverFeatures, DriverKind, Grammar, OrmResult, RowSet, Statement,
};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Named binding of a driver to a logical identity.
///
/// The connection exclusively owns its driver and keeps a snapshot of the
/// config it was created from. Statements issued on one connection run in
/// submission order; the connection is meant for one operation at a time.
pub struct Connection {
    name: String,
    config: ConnectionConfig,
    driver: Box<dyn Driver>,
    state: ConnectionState,
}

impl Connection {
    pub(crate) fn new(
        name: impl Into<String>,
        config: ConnectionConfig,
        driver: Box<dyn Driver>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            driver,
            state: ConnectionState::New,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn kind(&self) -> DriverKind {
        self.driver.kind()
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn grammar(&self) -> &dyn Grammar {
        self.driver.grammar()
    }

    pub fn supports(&self, feature: DriverFeatures) -> bool {
        self.driver.supports(feature)
    }

    pub fn supports_feature(&self, name: &str) -> bool {
        self.driver.supports_feature(name)
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.driver.is_connected()
    }

    pub fn connect(&mut self) -> OrmResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        debug!("connecting '{}' ({})", self.name, self.driver.kind());
        self.state = ConnectionState::Connecting;
        match self.driver.connect() {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Err(error) => {
                self.state = ConnectionState::Disconnected;
                Err(error)
            }
        }
    }

    pub fn disconnect(&mut self) -> OrmResult<()> {
        if matches!(
            self.state,
            ConnectionState::New | ConnectionState::Disconnected
        ) {
            return Ok(());
        }
        debug!("disconnecting '{}'", self.name);
        self.state = ConnectionState::Disconnecting;
        let result = self.driver.disconnect();
        self.state = ConnectionState::Disconnected;
        result
    }

    /// Execute a compiled statement, connecting lazily on first use.
    pub fn query(&mut self, statement: &Statement) -> OrmResult<RowSet> {
        self.ensure_connected()?;
        if log::log_enabled!(log::Level::Debug) {
            let rendered: Vec<String> = statement
                .params
                .iter()
                .map(|p| self.driver.escape(p))
                .collect();
            debug!(
                "{} <- {} [{}]",
                self.name,
                statement.text,
                rendered.join(", ")
            );
        }
        self.driver.query(statement)
    }

    pub fn begin_transaction(&mut self) -> OrmResult<()> {
        self.ensure_connected()?;
        self.driver.begin_transaction()
    }

    pub fn commit(&mut self) -> OrmResult<()> {
        self.driver.commit()
    }

    pub fn rollback(&mut self) -> OrmResult<()> {
        self.driver.rollback()
    }

    fn ensure_connected(&mut self) -> OrmResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            self.connect()
        }
    }
}
