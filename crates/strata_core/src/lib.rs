//! One data-access API over heterogeneous storage backends.
//!
//! Applications declare record schemas and relationships once; the core
//! translates high-level operations into backend-native statements
//! (SQL dialects, CQL, document directives), dispatches them through
//! named connections, and reconstructs typed records with their
//! relationship graphs. Backend drivers live in sibling crates and plug
//! in through the `Driver`/`DriverFactory` traits.

pub mod builder;
pub mod casts;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod events;
pub mod grammar;
pub mod ir;
pub mod model;
pub mod record;
pub mod registry;
pub mod relations;
pub mod value;

pub use builder::QueryBuilder;
pub use casts::CastKind;
pub use config::{ConnectionConfig, RegistryConfig};
pub use connection::{Connection, ConnectionState};
pub use driver::{
    Driver, DriverFactory, DriverFeatures, DriverKind, Row, RowSet, Statement,
};
pub use error::{OrmError, OrmResult};
pub use events::{Listener, Observer, RecordEvent};
pub use grammar::{
    CqlGrammar, Grammar, LimitStyle, MongoGrammar, MySqlGrammar, PlaceholderStyle,
    PostgresGrammar, SqlDialect, SqliteGrammar, UpsertStyle,
};
pub use ir::{QueryIr, QueryKind, WhereClause};
pub use model::{ModelClass, ModelClassBuilder, Models, Mutator};
pub use record::{Record, Related};
pub use registry::{ConnectionRegistry, DEFAULT_CONNECTION};
pub use relations::{BelongsToManyDef, PivotOps, RelationDef, SyncResult, ToggleResult};
pub use value::Value;
