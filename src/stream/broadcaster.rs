//! Fan-out of stream messages to connected subscribers.

use axum::extract::ws::{Message as Frame, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::subscriber::{Delivery, Subscriber, SubscriberId};
use crate::message::Message;

/// Delivers every broadcast message to every registered subscriber.
///
/// Each subscriber owns a bounded queue. Broadcasting never waits on a
/// subscriber: when a queue is full the message is dropped for that
/// subscriber only, and a subscriber that has dropped `max_dropped`
/// messages in total is evicted.
pub struct Broadcaster {
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
    ping_interval: Duration,
    buffer: usize,
    max_dropped: u64,
    started: AtomicBool,
}

impl Broadcaster {
    pub fn new(ping_interval: Duration, buffer: usize, max_dropped: u64) -> Arc<Self> {
        Arc::new(Broadcaster {
            subscribers: RwLock::new(HashMap::new()),
            ping_interval,
            buffer: buffer.max(1),
            max_dropped,
            started: AtomicBool::new(false),
        })
    }

    /// Starts the ping loop. Later calls do nothing.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Pinging subscribers every {:?}", self.ping_interval);
        tokio::spawn(ping_loop(Arc::downgrade(self), self.ping_interval));
    }

    pub async fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<Arc<str>>) {
        let (subscriber, receiver) = Subscriber::new(self.buffer);
        let id = subscriber.id;

        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(id, subscriber);
        debug!("Subscriber {} registered ({} total)", id, subscribers.len());

        (id, receiver)
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        let mut subscribers = self.subscribers.write().await;
        if subscribers.remove(&id).is_some() {
            debug!("Subscriber {} removed ({} left)", id, subscribers.len());
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Queues `msg` for every subscriber registered when the call starts.
    pub async fn broadcast(&self, msg: &Message) {
        let payload: Arc<str> = match serde_json::to_string(msg) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!("Failed to serialize message {:?}: {}", msg, e);
                return;
            }
        };

        let mut to_remove = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            for subscriber in subscribers.values() {
                match subscriber.offer(Arc::clone(&payload)) {
                    Delivery::Queued => {}
                    Delivery::Closed => to_remove.push(subscriber.id),
                    Delivery::Dropped(total) if total >= self.max_dropped => {
                        warn!(
                            "Evicting slow subscriber {} after {} dropped messages",
                            subscriber.id, total
                        );
                        to_remove.push(subscriber.id);
                    }
                    Delivery::Dropped(total) => {
                        warn!(
                            "Subscriber {} queue full, dropped message ({} total)",
                            subscriber.id, total
                        );
                    }
                }
            }
            if !msg.is_ping() {
                debug!("Broadcast {:?} to {} subscribers", msg, subscribers.len());
            }
        }

        if !to_remove.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in to_remove {
                subscribers.remove(&id);
            }
        }
    }

    /// Registers a subscriber and upgrades the request into its connection.
    ///
    /// The subscriber is registered before the upgrade response is sent, so
    /// a client sees every message broadcast after its handshake completes.
    /// If the upgrade fails the queue is dropped and the next broadcast
    /// removes the entry.
    pub async fn handle_conn(self: &Arc<Self>, ws: WebSocketUpgrade) -> Response {
        let (id, outbound) = self.subscribe().await;
        let broadcaster = Arc::clone(self);
        ws.on_upgrade(move |socket| async move { broadcaster.serve(id, outbound, socket).await })
    }

    /// Serves one websocket subscriber until it disconnects or fails.
    async fn serve(
        &self,
        id: SubscriberId,
        mut outbound: mpsc::Receiver<Arc<str>>,
        socket: WebSocket,
    ) {
        let (mut sink, mut inbound) = socket.split();
        info!("Subscriber {} connected", id);

        loop {
            tokio::select! {
                payload = outbound.recv() => {
                    let Some(payload) = payload else {
                        // Evicted from the registry.
                        break;
                    };
                    if let Err(e) = sink.send(Frame::Text(payload.to_string().into())).await {
                        warn!("Error writing to subscriber {}: {}", id, e);
                        break;
                    }
                }
                frame = inbound.next() => match frame {
                    Some(Ok(Frame::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Error reading from subscriber {}: {}", id, e);
                        break;
                    }
                },
            }
        }

        self.unsubscribe(id).await;
        if let Err(e) = sink.close().await {
            debug!("Error closing subscriber {}: {}", id, e);
        }
        info!("Subscriber {} disconnected", id);
    }
}

async fn ping_loop(broadcaster: Weak<Broadcaster>, period: Duration) {
    let ping = Message::ping();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(broadcaster) = broadcaster.upgrade() else {
            return;
        };
        broadcaster.broadcast(&ping).await;
    }
}
