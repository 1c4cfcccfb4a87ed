//! End-to-end check against a running server: subscribe, abort a fresh
//! check, expect it on the stream and in the aborted checks list.

use futures_util::StreamExt;
use log::{debug, info};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite};

use crate::message::Message;
use crate::web::api::checks::AbortResponse;
use crate::web::config::Config;

const STREAM_READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SmokeError {
    #[error("Invalid bind address: {0}")]
    Address(String),
    #[error("Stream connection error: {0}")]
    Stream(#[from] tungstenite::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid stream message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Stream closed before the abort message arrived")]
    StreamClosed,
    #[error("No abort message within {0:?}")]
    Timeout(Duration),
    #[error("Unexpected stream message: {0:?}")]
    Unexpected(Message),
    #[error("Check {0} missing from aborted checks")]
    NotListed(String),
}

pub async fn run(config: &Config) -> Result<(), SmokeError> {
    let addr = target_addr(&config.web.bind)?;
    let base = format!("http://{}", addr);
    let check_id = uuid::Uuid::new_v4().to_string();

    let stream_url = format!("ws://{}/stream", addr);
    info!("Connecting to {}", stream_url);
    let (mut ws, _) = connect_async(stream_url.as_str()).await?;

    let client = reqwest::Client::new();
    let response: AbortResponse = client
        .post(format!("{}/abort", base))
        .json(&serde_json::json!({ "checks": [check_id] }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    info!("Aborted {} check(s), waiting for {}", response.aborted, check_id);

    let received = timeout(STREAM_READ_TIMEOUT, next_event(&mut ws))
        .await
        .map_err(|_| SmokeError::Timeout(STREAM_READ_TIMEOUT))??;

    if received.check_id.as_deref() != Some(check_id.as_str()) {
        return Err(SmokeError::Unexpected(received));
    }
    info!("Stream message read successfully: {:?}", received);

    let checks: Vec<String> = client
        .get(format!("{}/checks", base))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    if !checks.contains(&check_id) {
        return Err(SmokeError::NotListed(check_id));
    }

    if let Err(e) = ws.close(None).await {
        debug!("Error closing stream: {}", e);
    }
    Ok(())
}

/// Next message on the stream that is not a ping.
async fn next_event<S>(ws: &mut S) -> Result<Message, SmokeError>
where
    S: futures_util::Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = ws.next().await {
        let tungstenite::Message::Text(text) = frame? else {
            continue;
        };
        let msg: Message = serde_json::from_str(text.as_str())?;
        if !msg.is_ping() {
            return Ok(msg);
        }
    }
    Err(SmokeError::StreamClosed)
}

/// Address to reach the server on; wildcard binds are reached over loopback.
fn target_addr(bind: &str) -> Result<SocketAddr, SmokeError> {
    let mut addr: SocketAddr = bind
        .parse()
        .map_err(|_| SmokeError::Address(bind.to_string()))?;
    if addr.ip().is_unspecified() {
        addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    Ok(addr)
}
