use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A check must stop.
pub const ACTION_ABORT: &str = "abort";
/// Liveness heartbeat, carries no check identity.
pub const ACTION_PING: &str = "ping";

/// Notification relayed to every stream subscriber.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_id: Option<String>,
    pub action: String,
}

impl Message {
    pub fn abort(check_id: impl Into<String>) -> Self {
        Message {
            check_id: Some(check_id.into()),
            action: ACTION_ABORT.to_string(),
            ..Default::default()
        }
    }

    pub fn ping() -> Self {
        Message {
            action: ACTION_PING.to_string(),
            ..Default::default()
        }
    }

    pub fn is_ping(&self) -> bool {
        self.action == ACTION_PING
    }
}
