use async_trait::async_trait;
use log::{debug, info};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

pub const CHECKS_KEY_PREFIX: &str = "check:";

/// Keys fetched per `SCAN` round trip.
const SCAN_CHUNK: usize = 50;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),
}

/// Durable, TTL-capable backend behind the aborted checks mirror.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// All checks whose entries have not expired yet.
    async fn get_checks(&self) -> Result<Vec<String>, RemoteError>;

    /// Persists every check with the store TTL. Either all entries are
    /// written or none are.
    async fn set_checks(&self, checks: &[String]) -> Result<(), RemoteError>;
}

pub fn check_key(check_id: &str) -> String {
    format!("{}{}", CHECKS_KEY_PREFIX, check_id)
}

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    ttl: Duration,
}

impl RedisStore {
    pub async fn connect(url: &str, ttl: Duration) -> Result<Self, RemoteError> {
        info!("Connecting to Redis at {}", redact_url(url));

        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        Ok(RedisStore { conn, ttl })
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get_checks(&self) -> Result<Vec<String>, RemoteError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", CHECKS_KEY_PREFIX);
        let mut checks = Vec::new();
        let mut seen = HashSet::new();

        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_CHUNK)
                .query_async(&mut conn)
                .await?;

            let keys = unseen_keys(&mut seen, keys);
            if !keys.is_empty() {
                // Keys may expire between SCAN and MGET.
                let values: Vec<Option<String>> = conn.mget(&keys).await?;
                checks.extend(values.into_iter().flatten());
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        debug!("Scanned {} checks from Redis", checks.len());
        Ok(checks)
    }

    async fn set_checks(&self, checks: &[String]) -> Result<(), RemoteError> {
        let mut conn = self.conn.clone();
        let ttl = self.ttl.as_secs().max(1);

        set_pipeline(checks, ttl)
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }
}

/// One MULTI/EXEC transaction with a `SETEX` per check.
fn set_pipeline(checks: &[String], ttl: u64) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();
    for check in checks {
        pipe.set_ex(check_key(check), check, ttl).ignore();
    }
    pipe
}

/// SCAN may return a key more than once while the keyspace is rehashed.
fn unseen_keys(seen: &mut HashSet<String>, keys: Vec<String>) -> Vec<String> {
    keys.into_iter()
        .filter(|key| seen.insert(key.clone()))
        .collect()
}

/// Hides the password part of a connection URL for logging.
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.rsplit_once('@') {
        Some((credentials, host)) => match credentials.split_once(':') {
            Some((user, _)) => format!("{}://{}:***@{}", scheme, user, host),
            None => url.to_string(),
        },
        None => url.to_string(),
    }
}
