use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// The distinct identifier count of one aggregation window.
///
/// Serialized as-is both as the Kafka message value and as the body of
/// notification callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueCountMessage {
    pub unique_request_count: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl UniqueCountMessage {
    pub fn new(unique_request_count: u64, timestamp: OffsetDateTime) -> Self {
        Self {
            unique_request_count,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn serializes_count_and_rfc3339_timestamp() {
        let message = UniqueCountMessage::new(3, datetime!(2024-05-01 12:30:00 UTC));

        let json = serde_json::to_value(message).expect("failed to serialize message");

        assert_eq!(
            json,
            serde_json::json!({
                "unique_request_count": 3,
                "timestamp": "2024-05-01T12:30:00Z",
            })
        );
    }
}
