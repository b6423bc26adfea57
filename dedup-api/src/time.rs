use time::OffsetDateTime;

pub trait TimeSource {
    /// The timestamp attached to a window count when it is captured.
    fn current_time(&self) -> OffsetDateTime;
}

#[derive(Clone)]
pub struct SystemTime {}

impl TimeSource for SystemTime {
    fn current_time(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}
