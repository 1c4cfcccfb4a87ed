use log::{error, info};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::remote::{RemoteError, RemoteStore};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("No checks given")]
    Empty,
    #[error("Failed to load checks from remote store: {0}")]
    Load(#[source] RemoteError),
    #[error("Failed to persist {} checks to remote store: {source}", checks.len())]
    Write {
        /// Checks that were not persisted. The remote write is a single
        /// transaction, so this is always the whole batch.
        checks: Vec<String>,
        #[source]
        source: RemoteError,
    },
}

/// In-memory mirror of the aborted checks held by a [`RemoteStore`].
///
/// Reads are served from memory. Writes go to the remote store first and are
/// applied to the mirror only once they are durable. The mirror is fully
/// reloaded every refresh period, which is also the only way entries that
/// expired remotely leave it.
pub struct AbortedCheckStore {
    remote: Arc<dyn RemoteStore>,
    mirror: RwLock<Vec<String>>,
    // Serializes Add and Refresh across their remote call, so the mirror
    // lock is never held over network I/O.
    writer: Mutex<()>,
}

impl AbortedCheckStore {
    /// Loads the current remote state and starts the refresh loop.
    pub async fn new(
        remote: Arc<dyn RemoteStore>,
        refresh_period: Duration,
    ) -> Result<Arc<Self>, StorageError> {
        let checks = remote.get_checks().await.map_err(StorageError::Load)?;
        info!("Loaded {} aborted checks from remote store", checks.len());

        let store = Arc::new(AbortedCheckStore {
            remote,
            mirror: RwLock::new(checks),
            writer: Mutex::new(()),
        });

        tokio::spawn(refresh_loop(Arc::downgrade(&store), refresh_period));

        Ok(store)
    }

    /// Snapshot of the checks currently known to be aborted, in insertion
    /// order.
    pub async fn aborted_checks(&self) -> Vec<String> {
        self.mirror.read().await.clone()
    }

    pub async fn add_aborted_checks(&self, checks: &[String]) -> Result<(), StorageError> {
        if checks.is_empty() {
            return Err(StorageError::Empty);
        }

        let _writer = self.writer.lock().await;

        self.remote
            .set_checks(checks)
            .await
            .map_err(|source| StorageError::Write {
                checks: checks.to_vec(),
                source,
            })?;

        self.mirror.write().await.extend_from_slice(checks);
        Ok(())
    }

    /// Replaces the mirror with a full load from the remote store. On error
    /// the previous mirror is kept.
    pub async fn refresh(&self) -> Result<usize, StorageError> {
        let _writer = self.writer.lock().await;

        let checks = self.remote.get_checks().await.map_err(StorageError::Load)?;
        let count = checks.len();
        *self.mirror.write().await = checks;

        Ok(count)
    }
}

async fn refresh_loop(store: Weak<AbortedCheckStore>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(store) = store.upgrade() else {
            return;
        };

        match store.refresh().await {
            Ok(count) => info!("Refreshed aborted checks from remote store ({} entries)", count),
            Err(e) => error!("Error refreshing remote checks: {}", e),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    /// Remote store kept in memory, with switchable failures and latency.
    #[derive(Default)]
    pub(crate) struct FakeRemote {
        checks: StdMutex<Vec<String>>,
        fail_get: AtomicBool,
        fail_set: AtomicBool,
        set_delay: StdMutex<Option<Duration>>,
        gets: AtomicUsize,
    }

    impl FakeRemote {
        pub(crate) fn with_checks(checks: &[&str]) -> Arc<Self> {
            let remote = FakeRemote::default();
            *remote.checks.lock().unwrap() = checks.iter().map(|c| c.to_string()).collect();
            Arc::new(remote)
        }

        pub(crate) fn fail_set(&self, fail: bool) {
            self.fail_set.store(fail, Ordering::SeqCst);
        }

        fn fail_get(&self, fail: bool) {
            self.fail_get.store(fail, Ordering::SeqCst);
        }

        fn set_delay(&self, delay: Duration) {
            *self.set_delay.lock().unwrap() = Some(delay);
        }

        fn replace(&self, checks: &[&str]) {
            *self.checks.lock().unwrap() = checks.iter().map(|c| c.to_string()).collect();
        }

        fn stored(&self) -> Vec<String> {
            self.checks.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteStore for FakeRemote {
        async fn get_checks(&self) -> Result<Vec<String>, RemoteError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            if self.fail_get.load(Ordering::SeqCst) {
                return Err(RemoteError::Unavailable("get refused".into()));
            }
            Ok(self.stored())
        }

        async fn set_checks(&self, checks: &[String]) -> Result<(), RemoteError> {
            let delay = *self.set_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_set.load(Ordering::SeqCst) {
                return Err(RemoteError::Unavailable("set refused".into()));
            }
            self.checks.lock().unwrap().extend_from_slice(checks);
            Ok(())
        }
    }

    fn ids(checks: &[&str]) -> Vec<String> {
        checks.iter().map(|c| c.to_string()).collect()
    }

    #[tokio::test]
    async fn loads_remote_checks_on_start() {
        let remote = FakeRemote::with_checks(&["check1", "check2"]);
        let store = AbortedCheckStore::new(remote, DAY).await.unwrap();

        assert_eq!(store.aborted_checks().await, ids(&["check1", "check2"]));
    }

    #[tokio::test]
    async fn empty_remote_gives_empty_mirror() {
        let store = AbortedCheckStore::new(FakeRemote::with_checks(&[]), DAY)
            .await
            .unwrap();

        assert!(store.aborted_checks().await.is_empty());
    }

    #[tokio::test]
    async fn start_fails_when_remote_is_unavailable() {
        let remote = FakeRemote::with_checks(&["check1"]);
        remote.fail_get(true);

        let result = AbortedCheckStore::new(remote, DAY).await;
        assert!(matches!(result, Err(StorageError::Load(_))));
    }

    #[tokio::test]
    async fn added_checks_are_readable_in_order() {
        let remote = FakeRemote::with_checks(&[]);
        let store = AbortedCheckStore::new(remote.clone(), DAY).await.unwrap();

        store.add_aborted_checks(&ids(&["c1", "c2"])).await.unwrap();
        assert_eq!(store.aborted_checks().await, ids(&["c1", "c2"]));

        store.add_aborted_checks(&ids(&["c3"])).await.unwrap();
        assert_eq!(store.aborted_checks().await, ids(&["c1", "c2", "c3"]));
        assert_eq!(remote.stored(), ids(&["c1", "c2", "c3"]));
    }

    #[tokio::test]
    async fn failed_write_leaves_mirror_untouched() {
        let remote = FakeRemote::with_checks(&["c1", "c2"]);
        let store = AbortedCheckStore::new(remote.clone(), DAY).await.unwrap();
        remote.fail_set(true);

        let err = store.add_aborted_checks(&ids(&["c4"])).await.unwrap_err();
        match err {
            StorageError::Write { checks, .. } => assert_eq!(checks, ids(&["c4"])),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.aborted_checks().await, ids(&["c1", "c2"]));
    }

    #[tokio::test]
    async fn empty_batch_is_rejected_without_remote_call() {
        let remote = FakeRemote::with_checks(&[]);
        let store = AbortedCheckStore::new(remote.clone(), DAY).await.unwrap();
        remote.fail_set(true);

        let err = store.add_aborted_checks(&[]).await.unwrap_err();
        assert!(matches!(err, StorageError::Empty));
    }

    #[tokio::test]
    async fn duplicates_are_kept() {
        let store = AbortedCheckStore::new(FakeRemote::with_checks(&["c1"]), DAY)
            .await
            .unwrap();

        store.add_aborted_checks(&ids(&["c1"])).await.unwrap();
        assert_eq!(store.aborted_checks().await, ids(&["c1", "c1"]));
    }

    #[tokio::test]
    async fn reads_do_not_wait_for_remote_write() {
        let remote = FakeRemote::with_checks(&["check1", "check2"]);
        let store = AbortedCheckStore::new(remote.clone(), DAY).await.unwrap();
        remote.set_delay(Duration::from_millis(500));

        let writer = {
            let store = store.clone();
            tokio::spawn(async move { store.add_aborted_checks(&ids(&["check3"])).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The write is still in flight: readers see the state before it.
        let during = tokio::time::timeout(Duration::from_millis(100), store.aborted_checks())
            .await
            .expect("read blocked on remote write");
        assert_eq!(during, ids(&["check1", "check2"]));

        writer.await.unwrap().unwrap();
        assert_eq!(
            store.aborted_checks().await,
            ids(&["check1", "check2", "check3"])
        );
    }

    #[tokio::test]
    async fn concurrent_adds_all_land() {
        let store = AbortedCheckStore::new(FakeRemote::with_checks(&[]), DAY)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let batch = vec![format!("a{i}"), format!("b{i}")];
                store.add_aborted_checks(&batch).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let checks = store.aborted_checks().await;
        assert_eq!(checks.len(), 32);
        // Each batch is applied as a unit.
        for pair in checks.chunks(2) {
            assert_eq!(pair[0].replacen('a', "b", 1), pair[1]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_loop_replaces_mirror() {
        let remote = FakeRemote::with_checks(&["old"]);
        let store = AbortedCheckStore::new(remote.clone(), DAY).await.unwrap();

        remote.replace(&["new1", "new2"]);
        tokio::time::sleep(DAY - Duration::from_secs(1)).await;
        assert_eq!(store.aborted_checks().await, ids(&["old"]));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.aborted_checks().await, ids(&["new1", "new2"]));
        assert_eq!(remote.gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_previous_mirror() {
        let remote = FakeRemote::with_checks(&["c1"]);
        let store = AbortedCheckStore::new(remote.clone(), DAY).await.unwrap();

        remote.replace(&[]);
        remote.fail_get(true);
        tokio::time::sleep(DAY + Duration::from_secs(1)).await;
        assert_eq!(store.aborted_checks().await, ids(&["c1"]));
        assert_eq!(remote.gets.load(Ordering::SeqCst), 2);

        // Retried only at the next tick.
        remote.fail_get(false);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(remote.gets.load(Ordering::SeqCst), 2);

        tokio::time::sleep(DAY).await;
        assert!(store.aborted_checks().await.is_empty());
        assert_eq!(remote.gets.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_loop_stops_with_store() {
        let remote = FakeRemote::with_checks(&[]);
        let store = AbortedCheckStore::new(remote.clone(), DAY).await.unwrap();
        drop(store);

        tokio::time::sleep(DAY * 3).await;
        assert_eq!(remote.gets.load(Ordering::SeqCst), 1);
    }
}
