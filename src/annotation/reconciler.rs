//! Annotation Reconciler
//!
//! Waits for annotations that other agents produce asynchronously (the VM
//! UUID on a pod, for instance) and writes the engine's own decisions back.
//!
//! At most one poll loop runs per (subject, key). The loop is a shared
//! future owned by its waiters: every caller joins the same loop and bounds
//! it with its own deadline, and once the last waiter is gone the loop is
//! dropped with it. Nothing is spawned, so an abandoned wait leaves nothing
//! behind.

use crate::domain::model::{AnnotationEntry, AnnotationSubject};
use crate::domain::ports::ControlPlaneClientRef;
use crate::error::{Error, Result};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

type PollOutcome = std::result::Result<String, String>;
type PollFuture = Shared<BoxFuture<'static, PollOutcome>>;
type PollKey = (AnnotationSubject, String);

/// Deduplicated annotation waiter and writer
pub struct AnnotationReconciler {
    client: ControlPlaneClientRef,
    poll_interval: Duration,
    default_timeout: Duration,
    /// In-flight polls; weak so that waiters alone keep a poll alive
    inflight: Mutex<HashMap<PollKey, WeakShared<BoxFuture<'static, PollOutcome>>>>,
}

impl AnnotationReconciler {
    pub fn new(
        client: ControlPlaneClientRef,
        poll_interval: Duration,
        default_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            poll_interval,
            default_timeout,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// Wait until `key` appears on `subject`, or the deadline passes
    ///
    /// Dropping the returned future withdraws this caller from the poll.
    pub async fn await_annotation(
        &self,
        subject: &AnnotationSubject,
        key: &str,
        timeout: Option<Duration>,
    ) -> Result<AnnotationEntry> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let poll = self.join_or_start(subject, key);

        match tokio::time::timeout(timeout, poll).await {
            Ok(Ok(value)) => Ok(AnnotationEntry {
                subject: subject.clone(),
                key: key.to_string(),
                value,
                created_at: Utc::now(),
                deadline: None,
            }),
            Ok(Err(reason)) => Err(Error::transport(
                format!("read annotation {} on {}", key, subject),
                reason,
            )),
            Err(_) => {
                warn!(
                    "Annotation {} on {} not observed within {:?}",
                    key, subject, timeout
                );
                Err(Error::AnnotationTimeout {
                    subject: subject.to_string(),
                    key: key.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Write an annotation and return once it is acknowledged
    pub async fn set(
        &self,
        subject: &AnnotationSubject,
        key: &str,
        value: &str,
    ) -> Result<AnnotationEntry> {
        self.client.set_annotation(subject, key, value).await?;
        debug!("Set annotation {}={} on {}", key, value, subject);

        Ok(AnnotationEntry {
            subject: subject.clone(),
            key: key.to_string(),
            value: value.to_string(),
            created_at: Utc::now(),
            deadline: None,
        })
    }

    /// Direct read without polling
    pub async fn lookup(&self, subject: &AnnotationSubject, key: &str) -> Result<Option<String>> {
        self.client.get_annotation(subject, key).await
    }

    /// Number of polls that still have at least one waiter
    pub fn inflight_count(&self) -> usize {
        self.inflight
            .lock()
            .values()
            .filter(|weak| weak.upgrade().is_some())
            .count()
    }

    fn join_or_start(&self, subject: &AnnotationSubject, key: &str) -> PollFuture {
        let poll_key = (subject.clone(), key.to_string());
        let mut inflight = self.inflight.lock();

        // Forget polls whose waiters are gone or that already resolved
        inflight.retain(|_, weak| {
            weak.upgrade()
                .map(|shared| shared.peek().is_none())
                .unwrap_or(false)
        });

        if let Some(existing) = inflight.get(&poll_key).and_then(|weak| weak.upgrade()) {
            debug!("Joining in-flight poll for {} on {}", key, subject);
            return existing;
        }

        let poll = poll_annotation(
            self.client.clone(),
            subject.clone(),
            key.to_string(),
            self.poll_interval,
        )
        .boxed()
        .shared();

        if let Some(weak) = poll.downgrade() {
            inflight.insert(poll_key, weak);
        }
        info!("Started poll for annotation {} on {}", key, subject);
        poll
    }
}

async fn poll_annotation(
    client: ControlPlaneClientRef,
    subject: AnnotationSubject,
    key: String,
    interval: Duration,
) -> PollOutcome {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match client.get_annotation(&subject, &key).await {
            Ok(Some(value)) if !value.is_empty() => {
                debug!("Observed annotation {}={} on {}", key, value, subject);
                return Ok(value);
            }
            Ok(_) => {}
            // The object may not exist yet
            Err(Error::ResourceNotFound { .. }) => {}
            Err(e) => return Err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::memory::InMemoryControlPlane;
    use assert_matches::assert_matches;

    const KEY: &str = "placement.storage.io/vm-uuid";

    fn pod() -> AnnotationSubject {
        AnnotationSubject::Pod {
            namespace: "default".into(),
            name: "web-0".into(),
        }
    }

    fn reconciler(cp: &Arc<InMemoryControlPlane>) -> Arc<AnnotationReconciler> {
        AnnotationReconciler::new(
            cp.clone(),
            Duration::from_secs(1),
            Duration::from_secs(30),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_share_one_poll() {
        let cp = InMemoryControlPlane::new();
        let reconciler = reconciler(&cp);

        let writer = {
            let cp = cp.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(3500)).await;
                cp.put_annotation(pod(), KEY, "vm-42");
            })
        };

        let target = pod();
        let (a, b) = tokio::join!(
            reconciler.await_annotation(&target, KEY, Some(Duration::from_secs(10))),
            reconciler.await_annotation(&target, KEY, Some(Duration::from_secs(10))),
        );
        writer.await.unwrap();

        assert_eq!(a.unwrap().value, "vm-42");
        assert_eq!(b.unwrap().value, "vm-42");
        // Ticks at 0s..4s from a single loop
        assert!(cp.reads() <= 5, "reads: {}", cp.reads());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_stops_polling() {
        let cp = InMemoryControlPlane::new();
        let reconciler = reconciler(&cp);

        let result = reconciler
            .await_annotation(&pod(), KEY, Some(Duration::from_secs(2)))
            .await;
        assert_matches!(result, Err(Error::AnnotationTimeout { .. }));
        assert_eq!(reconciler.inflight_count(), 0);

        let reads = cp.reads();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(cp.reads(), reads);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_waiter_keeps_its_own_deadline() {
        let cp = InMemoryControlPlane::new();
        let reconciler = reconciler(&cp);

        let writer = {
            let cp = cp.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(2500)).await;
                cp.put_annotation(pod(), KEY, "vm-7");
            })
        };

        let target = pod();
        let (short, long) = tokio::join!(
            reconciler.await_annotation(&target, KEY, Some(Duration::from_secs(1))),
            reconciler.await_annotation(&target, KEY, Some(Duration::from_secs(5))),
        );
        writer.await.unwrap();

        assert_matches!(short, Err(Error::AnnotationTimeout { .. }));
        assert_eq!(long.unwrap().value, "vm-7");
    }

    #[tokio::test]
    async fn test_read_failure_is_transport_failure() {
        let cp = InMemoryControlPlane::new();
        cp.fail_reads(true);
        let reconciler = reconciler(&cp);

        let result = reconciler
            .await_annotation(&pod(), KEY, Some(Duration::from_secs(5)))
            .await;
        assert_matches!(result, Err(Error::TransportFailure { .. }));
    }

    #[tokio::test]
    async fn test_set_then_lookup() {
        let cp = InMemoryControlPlane::new();
        let reconciler = reconciler(&cp);
        let host = AnnotationSubject::Host {
            name: "esx-1".into(),
        };

        let entry = reconciler.set(&host, "zone", "zone-2").await.unwrap();
        assert_eq!(entry.value, "zone-2");
        assert_eq!(
            reconciler.lookup(&host, "zone").await.unwrap(),
            Some("zone-2".to_string())
        );
        assert_eq!(reconciler.lookup(&host, "missing").await.unwrap(), None);
    }
}
