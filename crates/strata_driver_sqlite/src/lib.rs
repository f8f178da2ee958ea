mod driver;

pub use driver::{SqliteDriver, SqliteDriverFactory};
