use std::time::SystemTime;

use time::OffsetDateTime;

pub mod game;
pub mod health;
pub mod query;
pub mod validation;
pub mod ws;

/// Milliseconds since the Unix epoch, the timestamp format used on the wire.
pub fn epoch_millis(time: SystemTime) -> i64 {
    (OffsetDateTime::from(time).unix_timestamp_nanos() / 1_000_000) as i64
}

fn now_millis() -> i64 {
    epoch_millis(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    #[test]
    fn epoch_millis_truncates_sub_millisecond_precision() {
        let time = UNIX_EPOCH + Duration::from_micros(1_700_000_000_123_999);
        assert_eq!(epoch_millis(time), 1_700_000_000_123);
    }
}
