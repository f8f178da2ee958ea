mod driver;

pub use driver::{MySqlDriver, MySqlDriverFactory};
