//! UUID v7 utilities for time-ordered identifiers.
//!
//! Message, history, notification, and event ids are UUIDv7: the embedded
//! millisecond timestamp makes ids sort in creation order, which keeps
//! sibling ordering in threads stable and index pages append-mostly.

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
///
/// UUIDv7 embeds a Unix timestamp (milliseconds) in the first 48 bits,
/// providing natural time-ordering.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Check if a UUID is version 7.
#[inline]
pub fn is_v7(uuid: &Uuid) -> bool {
    uuid.get_version_num() == 7
}

/// Extract the timestamp from a UUIDv7.
///
/// Returns `None` if the UUID is not version 7.
pub fn extract_timestamp(uuid: &Uuid) -> Option<DateTime<Utc>> {
    let bytes = uuid.as_bytes();
    if (bytes[6] >> 4) != 7 {
        return None;
    }

    // 48-bit millisecond timestamp in the first 6 bytes
    let millis = ((bytes[0] as u64) << 40)
        | ((bytes[1] as u64) << 32)
        | ((bytes[2] as u64) << 24)
        | ((bytes[3] as u64) << 16)
        | ((bytes[4] as u64) << 8)
        | (bytes[5] as u64);

    Utc.timestamp_millis_opt(millis as i64).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_v7_is_version_7() {
        let id = new_v7();
        assert!(is_v7(&id));
    }

    #[test]
    fn test_v7_ordering() {
        let id1 = new_v7();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = new_v7();

        // Later UUIDs should be greater
        assert!(id2 > id1);
    }

    #[test]
    fn test_timestamp_extraction() {
        let before = Utc::now() - chrono::Duration::seconds(1);
        let id = new_v7();
        let after = Utc::now() + chrono::Duration::seconds(1);

        let ts = extract_timestamp(&id).expect("should be v7");
        assert!(ts >= before && ts <= after);
    }

    #[test]
    fn test_extract_timestamp_rejects_v4() {
        let id = Uuid::new_v4();
        assert!(extract_timestamp(&id).is_none());
        assert!(!is_v7(&id));
    }
}
