use async_trait::async_trait;

use dedup_common::messages::UniqueCountMessage;

use super::{CountSink, PublishError};

/// Logs window counts instead of producing them, for running without brokers.
pub struct PrintSink {}

#[async_trait]
impl CountSink for PrintSink {
    async fn send(&self, message: UniqueCountMessage) -> Result<(), PublishError> {
        let payload = serde_json::to_string(&message)?;
        tracing::info!("window count: {}", payload);

        Ok(())
    }
}
