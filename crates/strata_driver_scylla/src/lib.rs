mod driver;

pub use driver::{ScyllaDriver, ScyllaDriverFactory};
