use std::sync::Arc;
use std::time::Duration;

use reqwest::header;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};
use url::Url;

use dedup_common::messages::UniqueCountMessage;
use dedup_common::store::StoreError;

use crate::dedup::Deduplicator;
use crate::time::TimeSource;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("failed to count the current window: {0}")]
    Count(#[from] StoreError),
    #[error("notification request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Enqueues count notifications from request handlers without waiting on them.
#[derive(Clone)]
pub struct Notifier {
    sender: mpsc::Sender<Url>,
}

impl Notifier {
    /// Build the handler-side `Notifier` and the worker delivering its queue.
    ///
    /// At most `queue_size` notifications wait in the queue and at most
    /// `max_concurrency` requests are in flight.
    pub fn new(
        dedup: Deduplicator,
        timesource: Arc<dyn TimeSource + Send + Sync>,
        queue_size: usize,
        max_concurrency: usize,
        request_timeout: Duration,
    ) -> Result<(Notifier, NotificationWorker), NotifyError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("dedup-api notifier")
            .timeout(request_timeout)
            .build()?;

        let (sender, receiver) = mpsc::channel(queue_size);

        Ok((
            Notifier { sender },
            NotificationWorker {
                receiver,
                client,
                dedup,
                timesource,
                max_concurrency,
            },
        ))
    }

    /// Queue a notification to `endpoint`. Returns false if it was dropped
    /// because the queue is full or the worker is gone.
    pub fn notify(&self, endpoint: Url) -> bool {
        match self.sender.try_send(endpoint) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(endpoint)) => {
                warn!("notification queue full, dropping notification to {}", endpoint);
                metrics::counter!("notifications_total", "outcome" => "dropped").increment(1);
                false
            }
            Err(mpsc::error::TrySendError::Closed(endpoint)) => {
                warn!("notification worker stopped, dropping notification to {}", endpoint);
                metrics::counter!("notifications_total", "outcome" => "dropped").increment(1);
                false
            }
        }
    }
}

pub struct NotificationWorker {
    receiver: mpsc::Receiver<Url>,
    client: reqwest::Client,
    dedup: Deduplicator,
    timesource: Arc<dyn TimeSource + Send + Sync>,
    max_concurrency: usize,
}

impl NotificationWorker {
    /// Deliver queued notifications until every `Notifier` is dropped, then wait
    /// for the requests still in flight.
    pub async fn run(mut self) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));

        while let Some(endpoint) = self.receiver.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let client = self.client.clone();
            let dedup = self.dedup.clone();
            let timesource = self.timesource.clone();

            tokio::spawn(async move {
                match notify_count(&client, &dedup, timesource.as_ref(), &endpoint).await {
                    Ok(status) => {
                        info!("sent count to endpoint {}, status code: {}", endpoint, status);
                        metrics::counter!("notifications_total", "outcome" => "sent").increment(1);
                    }
                    Err(e) => {
                        error!("failed to notify endpoint {}: {}", endpoint, e);
                        metrics::counter!("notifications_total", "outcome" => "failed")
                            .increment(1);
                    }
                }
                drop(permit);
            });
        }

        // Every permit back means every spawned notification finished
        let permits = u32::try_from(self.max_concurrency).unwrap_or(u32::MAX);
        if semaphore.acquire_many(permits).await.is_err() {
            warn!("notification semaphore closed while draining");
        }
        info!("notification worker stopped");
    }
}

/// Count the current window and POST it to `endpoint`, once.
async fn notify_count(
    client: &reqwest::Client,
    dedup: &Deduplicator,
    timesource: &(dyn TimeSource + Send + Sync),
    endpoint: &Url,
) -> Result<reqwest::StatusCode, NotifyError> {
    let count = dedup.window_size().await?;
    let message = UniqueCountMessage::new(count, timesource.current_time());

    let response = client
        .post(endpoint.clone())
        .json(&message)
        .send()
        .await?;

    Ok(response.status())
}
