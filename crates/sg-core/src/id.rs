//! Process-wide unique identifiers

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Unique identifier for processors, tracks and parameters.
///
/// Ids are allocated from a monotonically increasing process-wide counter
/// and are never reused within a process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u32);

/// Unique identifier attached to non-RT events, used for request/response
/// matching across the RT boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

// Id 0 is reserved as the "nobody" address (e.g. transport events)
static NEXT_OBJECT_ID: AtomicU32 = AtomicU32::new(1);
static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

impl ObjectId {
    /// Address used by events that are not directed at a specific processor
    pub const NONE: Self = Self(0);
}

/// Allocate a fresh object id
pub fn next_object_id() -> ObjectId {
    ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
}

/// Allocate a fresh event id
pub fn next_event_id() -> EventId {
    EventId(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let a = next_object_id();
        let b = next_object_id();
        assert!(b.0 > a.0);

        let x = next_event_id();
        let y = next_event_id();
        assert!(y.0 > x.0);
    }
}
