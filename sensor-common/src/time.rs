use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

pub trait TimeSource {
    fn now(&self) -> OffsetDateTime;

    // Return an ISO timestamp
    fn current_time(&self) -> String {
        format_timestamp(self.now())
    }
}

#[derive(Clone)]
pub struct SystemTime {}

impl TimeSource for SystemTime {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Fixed-width UTC timestamp with microseconds and a trailing `Z`, so that
/// generated timestamps sort lexicographically in time order.
pub fn format_timestamp(time: OffsetDateTime) -> String {
    time.to_offset(UtcOffset::UTC)
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
        ))
        .expect("failed to format timestamp")
}
