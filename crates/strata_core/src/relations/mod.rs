mod def;
mod loader;
mod pivot;

pub use def::{BelongsToManyDef, RelationDef};
pub use loader::{eager_load, load_for_parent};
pub use pivot::{PivotOps, SyncResult, ToggleResult};
