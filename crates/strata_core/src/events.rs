use std::sync::Arc;

use crate::Record;

/// Lifecycle events emitted by the record layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordEvent {
    Saving,
    Saved,
    Creating,
    Created,
    Updating,
    Updated,
    Deleting,
    Deleted,
    Restoring,
    Restored,
}

impl RecordEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RecordEvent::Saving => "saving",
            RecordEvent::Saved => "saved",
            RecordEvent::Creating => "creating",
            RecordEvent::Created => "created",
            RecordEvent::Updating => "updating",
            RecordEvent::Updated => "updated",
            RecordEvent::Deleting => "deleting",
            RecordEvent::Deleted => "deleted",
            RecordEvent::Restoring => "restoring",
            RecordEvent::Restored => "restored",
        }
    }

    /// Events whose listeners can veto the operation by returning `false`.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            RecordEvent::Saving
                | RecordEvent::Creating
                | RecordEvent::Updating
                | RecordEvent::Deleting
                | RecordEvent::Restoring
        )
    }
}

/// Ad-hoc listener. The return value only matters for cancellable events.
pub type Listener = Arc<dyn Fn(&mut Record) -> bool + Send + Sync>;

/// Grouped listener set for one model class.
///
/// Observers run before ad-hoc listeners; within each group, registration
/// order. A `false` return from any hook on a cancellable event
/// short-circuits the dispatch and the operation.
pub trait Observer: Send + Sync {
    fn saving(&self, _record: &mut Record) -> bool {
        true
    }

    fn saved(&self, _record: &mut Record) {}

    fn creating(&self, _record: &mut Record) -> bool {
        true
    }

    fn created(&self, _record: &mut Record) {}

    fn updating(&self, _record: &mut Record) -> bool {
        true
    }

    fn updated(&self, _record: &mut Record) {}

    fn deleting(&self, _record: &mut Record) -> bool {
        true
    }

    fn deleted(&self, _record: &mut Record) {}

    fn restoring(&self, _record: &mut Record) -> bool {
        true
    }

    fn restored(&self, _record: &mut Record) {}
}

pub(crate) fn dispatch_observer(
    observer: &dyn Observer,
    event: RecordEvent,
    record: &mut Record,
) -> bool {
    match event {
        RecordEvent::Saving => observer.saving(record),
        RecordEvent::Creating => observer.creating(record),
        RecordEvent::Updating => observer.updating(record),
        RecordEvent::Deleting => observer.deleting(record),
        RecordEvent::Restoring => observer.restoring(record),
        RecordEvent::Saved => {
            observer.saved(record);
            true
        }
        RecordEvent::Created => {
            observer.created(record);
            true
        }
        RecordEvent::Updated => {
            observer.updated(record);
            true
        }
        RecordEvent::Deleted => {
            observer.deleted(record);
            true
        }
        RecordEvent::Restored => {
            observer.restored(record);
            true
        }
    }
}
