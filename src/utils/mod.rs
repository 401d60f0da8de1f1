pub mod crypto;
pub mod serde_hex;

use std::time::{SystemTime, UNIX_EPOCH};

pub fn unix_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
