use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

pub type SubscriberId = Uuid;

/// Outcome of offering one payload to a subscriber queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue full, payload discarded. Carries the subscriber's total drops.
    Dropped(u64),
    /// Receiving side is gone.
    Closed,
}

/// Registry entry for one live connection.
#[derive(Debug)]
pub struct Subscriber {
    pub id: SubscriberId,
    sender: mpsc::Sender<Arc<str>>,
    dropped: AtomicU64,
}

impl Subscriber {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (sender, receiver) = mpsc::channel(buffer);
        let subscriber = Subscriber {
            id: Uuid::new_v4(),
            sender,
            dropped: AtomicU64::new(0),
        };
        (subscriber, receiver)
    }

    /// Never waits: a full queue drops the new payload.
    pub fn offer(&self, payload: Arc<str>) -> Delivery {
        match self.sender.try_send(payload) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                Delivery::Dropped(self.dropped.fetch_add(1, Ordering::Relaxed) + 1)
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}
