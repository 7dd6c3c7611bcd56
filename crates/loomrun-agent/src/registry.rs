//! Per-thread graph handles and interruption flags.
//!
//! Backed by [`DashMap`] so runs on different threads never contend on a
//! global lock.  Each entry holds a [`OnceCell`]: concurrent first runs of
//! the same thread wait on a single build instead of compiling two graphs,
//! and a failed build leaves the cell empty for the next attempt.
//!
//! Entries are never dropped implicitly.  Call [`ThreadRegistry::evict`]
//! when a conversation is over, or [`ThreadRegistry::evict_idle`]
//! periodically; interrupted threads survive idle sweeps because a client
//! may still answer their pending tool calls.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::error::Result;
use crate::graph::GraphHandle;

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// State kept for one thread.
pub struct ThreadEntry {
    handle: OnceCell<Arc<dyn GraphHandle>>,
    interrupted: AtomicBool,
    /// Milliseconds since the Unix epoch.
    last_used: AtomicI64,
}

impl ThreadEntry {
    fn new() -> Self {
        Self {
            handle: OnceCell::new(),
            interrupted: AtomicBool::new(false),
            last_used: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    fn touch(&self) {
        self.last_used
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn is_built(&self) -> bool {
        self.handle.initialized()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    pub fn last_used(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_used.load(Ordering::Relaxed))
            .unwrap_or_default()
    }

    fn idle_for(&self, now_ms: i64) -> Duration {
        let elapsed = now_ms.saturating_sub(self.last_used.load(Ordering::Relaxed));
        Duration::from_millis(u64::try_from(elapsed).unwrap_or(0))
    }
}

impl std::fmt::Debug for ThreadEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadEntry")
            .field("built", &self.is_built())
            .field("interrupted", &self.is_interrupted())
            .field("last_used", &self.last_used())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Concurrent thread store.  Cheaply cloneable; clones share entries.
#[derive(Clone, Default)]
pub struct ThreadRegistry {
    inner: Arc<DashMap<String, Arc<ThreadEntry>>>,
}

impl ThreadRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, thread_id: &str) -> Arc<ThreadEntry> {
        // Clone the Arc out so no shard lock is held across an await.
        self.inner
            .entry(thread_id.to_owned())
            .or_insert_with(|| Arc::new(ThreadEntry::new()))
            .value()
            .clone()
    }

    /// Return the thread's graph handle, building it with `build` if this is
    /// the first use.  At most one build succeeds per thread; concurrent
    /// callers wait for it.
    pub async fn get_or_build<F, Fut>(&self, thread_id: &str, build: F) -> Result<Arc<dyn GraphHandle>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn GraphHandle>>>,
    {
        let entry = self.entry(thread_id);
        entry.touch();

        let handle = entry
            .handle
            .get_or_try_init(|| async {
                tracing::info!(thread_id = %thread_id, "building graph for new thread");
                build().await
            })
            .await?;
        Ok(Arc::clone(handle))
    }

    /// Whether the thread's last run ended suspended.  `false` for unknown
    /// threads.
    pub fn is_interrupted(&self, thread_id: &str) -> bool {
        self.inner
            .get(thread_id)
            .is_some_and(|e| e.is_interrupted())
    }

    /// Record how the thread's latest run ended.  Returns `false` when the
    /// thread is not registered.
    pub fn set_interrupted(&self, thread_id: &str, interrupted: bool) -> bool {
        match self.inner.get(thread_id) {
            Some(entry) => {
                entry.interrupted.store(interrupted, Ordering::Release);
                entry.touch();
                tracing::debug!(thread_id = %thread_id, interrupted, "thread flag updated");
                true
            }
            None => false,
        }
    }

    /// Drop a thread and its graph handle.
    pub fn evict(&self, thread_id: &str) -> bool {
        let removed = self.inner.remove(thread_id).is_some();
        if removed {
            tracing::info!(thread_id = %thread_id, "thread evicted");
        }
        removed
    }

    /// Drop every thread unused for at least `ttl`, except interrupted ones.
    /// Returns how many were dropped.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let now_ms = Utc::now().timestamp_millis();
        let before = self.inner.len();
        self.inner
            .retain(|_, entry| entry.is_interrupted() || entry.idle_for(now_ms) < ttl);
        let evicted = before.saturating_sub(self.inner.len());
        if evicted > 0 {
            tracing::info!(evicted, ttl_secs = ttl.as_secs(), "idle threads evicted");
        }
        evicted
    }

    /// Snapshot of one thread's entry.
    pub fn get(&self, thread_id: &str) -> Option<Arc<ThreadEntry>> {
        self.inner.get(thread_id).map(|e| e.value().clone())
    }

    pub fn contains(&self, thread_id: &str) -> bool {
        self.inner.contains_key(thread_id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AgentError, BoxError};
    use crate::graph::{GraphState, RunConfig, StepStream};
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use std::sync::atomic::AtomicUsize;

    struct NoopHandle;

    #[async_trait]
    impl GraphHandle for NoopHandle {
        async fn stream(
            &self,
            _initial: Option<GraphState>,
            _config: RunConfig,
        ) -> std::result::Result<StepStream, BoxError> {
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn update_state(
            &self,
            config: RunConfig,
            _partial: Map<String, Value>,
        ) -> std::result::Result<RunConfig, BoxError> {
            Ok(config)
        }
    }

    fn handle() -> Arc<dyn GraphHandle> {
        Arc::new(NoopHandle)
    }

    #[tokio::test]
    async fn builds_once_per_thread() {
        let registry = ThreadRegistry::new();
        let builds = AtomicUsize::new(0);

        for _ in 0..3 {
            registry
                .get_or_build("t1", || async {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok(handle())
                })
                .await
                .unwrap();
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("t1").unwrap().is_built());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_runs_share_one_build() {
        let registry = ThreadRegistry::new();
        let builds = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                let builds = Arc::clone(&builds);
                tokio::spawn(async move {
                    registry
                        .get_or_build("shared", || async move {
                            builds.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(handle())
                        })
                        .await
                        .map(|_| ())
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_build_can_be_retried() {
        let registry = ThreadRegistry::new();
        let err = registry
            .get_or_build("t1", || async {
                Err(AgentError::Construction {
                    thread_id: "t1".into(),
                    source: "compile failed".into(),
                })
            })
            .await;
        assert!(err.is_err());
        assert!(!registry.get("t1").unwrap().is_built());

        registry
            .get_or_build("t1", || async { Ok(handle()) })
            .await
            .unwrap();
        assert!(registry.get("t1").unwrap().is_built());
    }

    #[tokio::test]
    async fn interruption_flag_round_trip() {
        let registry = ThreadRegistry::new();
        assert!(!registry.is_interrupted("t1"));
        assert!(!registry.set_interrupted("t1", true));

        registry
            .get_or_build("t1", || async { Ok(handle()) })
            .await
            .unwrap();
        assert!(registry.set_interrupted("t1", true));
        assert!(registry.is_interrupted("t1"));
        registry.set_interrupted("t1", false);
        assert!(!registry.is_interrupted("t1"));
    }

    #[tokio::test]
    async fn idle_sweep_keeps_interrupted_threads() {
        let registry = ThreadRegistry::new();
        for id in ["done", "waiting"] {
            registry
                .get_or_build(id, || async { Ok(handle()) })
                .await
                .unwrap();
        }
        registry.set_interrupted("waiting", true);

        assert_eq!(registry.evict_idle(Duration::from_secs(3600)), 0);
        assert_eq!(registry.evict_idle(Duration::ZERO), 1);
        assert!(registry.contains("waiting"));
        assert!(!registry.contains("done"));
    }

    #[tokio::test]
    async fn evict_removes_thread() {
        let registry = ThreadRegistry::new();
        registry
            .get_or_build("t1", || async { Ok(handle()) })
            .await
            .unwrap();
        assert!(registry.evict("t1"));
        assert!(!registry.evict("t1"));
        assert!(registry.is_empty());
    }
}
