// Timekeeping helpers
//
// Austin Shafer - 2020
use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current time in milliseconds since the epoch.
///
/// This is what the logging infrastructure stamps messages with.
pub fn get_current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time is before the epoch")
        .as_millis() as u64
}
