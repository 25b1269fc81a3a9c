//! Shared timestamp/id helpers for deterministic envelopes and events.

use ulid::Ulid;

/// Unix-epoch seconds with a `Z` suffix (e.g. `1771220592Z`), matching the
/// timestamp format used across every durable artifact and event.
pub fn now_epoch_z() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{}Z", secs)
}

/// A new lexically-sortable unique id, used for event ids and run ids.
pub fn new_id() -> String {
    Ulid::new().to_string()
}
