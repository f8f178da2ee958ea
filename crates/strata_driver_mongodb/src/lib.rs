mod directive;
mod driver;

pub use directive::{Directive, DirectiveOp};
pub use driver::{MongoDriver, MongoDriverFactory};
