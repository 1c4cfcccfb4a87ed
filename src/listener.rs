//! Forwards Postgres `NOTIFY` payloads to stream subscribers.

use log::{error, info, warn};
use sqlx::postgres::PgListener;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::message::Message;
use crate::metrics;
use crate::storage::remote::redact_url;
use crate::stream::Broadcaster;
use crate::web::config::ListenerConfig;

/// Pause after a failed receive before listening again.
const RETRY_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct Listener {
    listener: PgListener,
    channel: String,
    broadcaster: Arc<Broadcaster>,
}

impl Listener {
    pub async fn connect(
        config: &ListenerConfig,
        broadcaster: Arc<Broadcaster>,
    ) -> Result<Self, ListenerError> {
        info!(
            "Listening on channel {} at {}",
            config.channel,
            redact_url(&config.url)
        );

        let mut listener = PgListener::connect(&config.url).await?;
        listener.listen(&config.channel).await?;

        Ok(Listener {
            listener,
            channel: config.channel.clone(),
            broadcaster,
        })
    }

    pub async fn run(mut self) {
        info!("Stream listener started on channel {}", self.channel);

        loop {
            match self.listener.recv().await {
                Ok(notification) => {
                    forward(&self.broadcaster, notification.payload()).await;
                }
                Err(e) => {
                    // The next recv reconnects and re-subscribes.
                    error!("Listener receive error: {}", e);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }
}

/// Broadcasts one notification payload. Payloads that are not a valid
/// message are logged and skipped.
pub async fn forward(broadcaster: &Broadcaster, payload: &str) -> bool {
    info!("Message notification received: {}", payload);
    match serde_json::from_str::<Message>(payload) {
        Ok(msg) => {
            broadcaster.broadcast(&msg).await;
            metrics::record_broadcasted(&msg.action);
            true
        }
        Err(e) => {
            warn!("Notification unmarshal error: {}", e);
            false
        }
    }
}
