//! In-memory tracking of long-running operations.
//!
//! Conversions and audio merges run for minutes; callers poll or subscribe for
//! progress. Records live in memory only and are evicted once a terminal
//! status has been observed, or after a TTL for results nobody collected.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Source of wall-clock time, injectable for TTL tests.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

/// Snapshot of one tracked operation.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub kind: String,
    pub status: JobStatus,
    /// 0..=100, only meaningful while running.
    pub progress_percent: u8,
    /// Operation-specific position, e.g. seconds encoded so far.
    pub current: Option<f64>,
    pub total: Option<f64>,
    /// Identifier of the produced artifact, set on completion.
    pub result: Option<String>,
    pub error: Option<String>,
    pub updated_at: i64,
    /// Set once a terminal status has been handed to a caller.
    #[serde(skip)]
    observed: bool,
}

/// Mutation applied to a tracked job.
#[derive(Debug, Clone)]
pub enum JobUpdate {
    Running,
    Progress {
        percent: u8,
        current: Option<f64>,
        total: Option<f64>,
    },
    Completed { result: Option<String> },
    Failed { error: String },
}

type Subscriber = Box<dyn Fn(&Job) + Send + Sync>;

struct RegistryInner {
    jobs: HashMap<String, Job>,
    subscribers: HashMap<String, Vec<(u64, Subscriber)>>,
    next_subscriber_id: u64,
}

/// Registry of in-flight and recently finished jobs.
pub struct JobRegistry {
    inner: Mutex<RegistryInner>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl JobRegistry {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                jobs: HashMap::new(),
                subscribers: HashMap::new(),
                next_subscriber_id: 0,
            }),
            clock,
            ttl,
        }
    }

    /// Create a pending job and return its snapshot.
    pub fn create(&self, id: &str, kind: &str) -> Job {
        let job = Job {
            id: id.to_string(),
            kind: kind.to_string(),
            status: JobStatus::Pending,
            progress_percent: 0,
            current: None,
            total: None,
            result: None,
            error: None,
            updated_at: self.clock.now_millis(),
            observed: false,
        };
        let mut inner = self.inner.lock().unwrap();
        inner.jobs.insert(id.to_string(), job.clone());
        info!("Tracking {} job {}", kind, id);
        job
    }

    /// Apply an update. Unknown ids are logged and ignored: the job may have
    /// been evicted while its task was still finishing.
    pub fn update(&self, id: &str, update: JobUpdate) {
        let mut inner = self.inner.lock().unwrap();
        let now = self.clock.now_millis();
        let snapshot = match inner.jobs.get_mut(id) {
            Some(job) => {
                if job.status.is_terminal() {
                    // Last writer of a terminal status wins; later progress
                    // reports from a lagging task are dropped.
                    debug!("Ignoring update for terminal job {}", id);
                    return;
                }
                match update {
                    JobUpdate::Running => job.status = JobStatus::Running,
                    JobUpdate::Progress {
                        percent,
                        current,
                        total,
                    } => {
                        job.status = JobStatus::Running;
                        job.progress_percent = percent.min(100);
                        job.current = current;
                        job.total = total;
                    }
                    JobUpdate::Completed { result } => {
                        job.status = JobStatus::Completed;
                        job.progress_percent = 100;
                        job.result = result;
                    }
                    JobUpdate::Failed { error } => {
                        job.status = JobStatus::Error;
                        job.error = Some(error);
                    }
                }
                job.updated_at = now;
                job.clone()
            }
            None => {
                warn!("Update for unknown job {}", id);
                return;
            }
        };

        // Subscribers are notified synchronously under the lock, so a poll
        // racing a notification can never see an older state than the one
        // delivered, and two racing updates cannot deliver out of order.
        // Callbacks therefore must not call back into the registry.
        if let Some(subs) = inner.subscribers.get(id) {
            for (_, callback) in subs {
                callback(&snapshot);
            }
        }
    }

    /// Get a snapshot. The first read of a terminal status marks the job
    /// observed, scheduling it for eviction.
    pub fn get(&self, id: &str) -> Option<Job> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner.jobs.get_mut(id)?;
        let snapshot = job.clone();
        if job.status.is_terminal() && !job.observed {
            job.observed = true;
        }
        Some(snapshot)
    }

    /// Subscribe to updates for a job. Dropping the guard unsubscribes.
    ///
    /// The callback runs synchronously while the registry lock is held; it
    /// must not call back into the registry. Forward the snapshot to a
    /// channel or task when further registry access is needed.
    pub fn subscribe(
        self: &Arc<Self>,
        id: &str,
        callback: impl Fn(&Job) + Send + Sync + 'static,
    ) -> SubscriptionGuard {
        let mut inner = self.inner.lock().unwrap();
        let subscriber_id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        inner
            .subscribers
            .entry(id.to_string())
            .or_default()
            .push((subscriber_id, Box::new(callback)));
        SubscriptionGuard {
            registry: Arc::clone(self),
            job_id: id.to_string(),
            subscriber_id,
        }
    }

    fn unsubscribe(&self, job_id: &str, subscriber_id: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(subs) = inner.subscribers.get_mut(job_id) {
            subs.retain(|(id, _)| *id != subscriber_id);
            if subs.is_empty() {
                inner.subscribers.remove(job_id);
            }
        }
    }

    /// Drop observed terminal jobs, and unobserved terminal jobs older than
    /// the TTL. Running jobs are never evicted.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let ttl_ms = self.ttl.as_millis() as i64;
        let mut inner = self.inner.lock().unwrap();
        let before = inner.jobs.len();
        inner.jobs.retain(|_, job| {
            if !job.status.is_terminal() {
                return true;
            }
            !(job.observed || now - job.updated_at >= ttl_ms)
        });
        let evicted = before - inner.jobs.len();
        if evicted > 0 {
            debug!("Evicted {} finished jobs", evicted);
        }
        evicted
    }

    /// Spawn a periodic eviction sweep that stops on shutdown.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown_token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        registry.evict_expired();
                    }
                    _ = shutdown_token.cancelled() => {
                        debug!("Job sweeper stopped");
                        break;
                    }
                }
            }
        })
    }
}

/// Unsubscribes on drop.
pub struct SubscriptionGuard {
    registry: Arc<JobRegistry>,
    job_id: String,
    subscriber_id: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.registry.unsubscribe(&self.job_id, self.subscriber_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    struct ManualClock {
        now: AtomicI64,
    }

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: AtomicI64::new(0),
            })
        }

        fn advance(&self, millis: i64) {
            self.now.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> i64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    fn registry(clock: Arc<ManualClock>) -> Arc<JobRegistry> {
        Arc::new(JobRegistry::new(clock, Duration::from_secs(3600)))
    }

    #[test]
    fn test_lifecycle() {
        let clock = ManualClock::new();
        let registry = registry(clock);
        registry.create("j-1", "convert");

        registry.update("j-1", JobUpdate::Running);
        assert_eq!(registry.get("j-1").unwrap().status, JobStatus::Running);

        registry.update(
            "j-1",
            JobUpdate::Progress {
                percent: 40,
                current: Some(12.0),
                total: Some(30.0),
            },
        );
        let job = registry.get("j-1").unwrap();
        assert_eq!(job.progress_percent, 40);
        assert_eq!(job.current, Some(12.0));

        registry.update(
            "j-1",
            JobUpdate::Completed {
                result: Some("b-9".to_string()),
            },
        );
        let job = registry.get("j-1").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress_percent, 100);
        assert_eq!(job.result.as_deref(), Some("b-9"));
    }

    #[test]
    fn test_terminal_status_is_final() {
        let clock = ManualClock::new();
        let registry = registry(clock);
        registry.create("j-1", "convert");
        registry.update(
            "j-1",
            JobUpdate::Failed {
                error: "boom".to_string(),
            },
        );
        registry.update(
            "j-1",
            JobUpdate::Progress {
                percent: 50,
                current: None,
                total: None,
            },
        );
        let job = registry.get("j-1").unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_observed_terminal_job_is_evicted() {
        let clock = ManualClock::new();
        let registry = registry(clock);
        registry.create("j-1", "merge");
        registry.update("j-1", JobUpdate::Completed { result: None });

        // Not yet observed, so the sweep keeps it.
        assert_eq!(registry.evict_expired(), 0);

        // Observing the terminal status schedules eviction.
        assert!(registry.get("j-1").is_some());
        assert_eq!(registry.evict_expired(), 1);
        assert!(registry.get("j-1").is_none());
    }

    #[test]
    fn test_unobserved_terminal_job_expires_after_ttl() {
        let clock = ManualClock::new();
        let registry = Arc::new(JobRegistry::new(
            clock.clone(),
            Duration::from_millis(1000),
        ));
        registry.create("j-1", "merge");
        registry.update("j-1", JobUpdate::Completed { result: None });

        clock.advance(999);
        assert_eq!(registry.evict_expired(), 0);
        clock.advance(1);
        assert_eq!(registry.evict_expired(), 1);
    }

    #[test]
    fn test_running_jobs_never_evicted() {
        let clock = ManualClock::new();
        let registry = Arc::new(JobRegistry::new(clock.clone(), Duration::from_millis(10)));
        registry.create("j-1", "convert");
        registry.update("j-1", JobUpdate::Running);
        clock.advance(100_000);
        assert_eq!(registry.evict_expired(), 0);
        assert!(registry.get("j-1").is_some());
    }

    #[test]
    fn test_subscriber_receives_updates_until_dropped() {
        let clock = ManualClock::new();
        let registry = registry(clock);
        registry.create("j-1", "convert");

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_by_cb = Arc::clone(&seen);
        let guard = registry.subscribe("j-1", move |_| {
            seen_by_cb.fetch_add(1, Ordering::SeqCst);
        });

        registry.update("j-1", JobUpdate::Running);
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        drop(guard);
        registry.update("j-1", JobUpdate::Completed { result: None });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscriber_sees_states_in_order() {
        let clock = ManualClock::new();
        let registry = registry(clock);
        registry.create("j-1", "convert");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_by_cb = Arc::clone(&seen);
        let _guard = registry.subscribe("j-1", move |job| {
            seen_by_cb.lock().unwrap().push(job.status);
        });

        registry.update("j-1", JobUpdate::Running);
        registry.update(
            "j-1",
            JobUpdate::Progress {
                percent: 50,
                current: None,
                total: None,
            },
        );
        registry.update("j-1", JobUpdate::Completed { result: None });

        assert_eq!(
            *seen.lock().unwrap(),
            vec![JobStatus::Running, JobStatus::Running, JobStatus::Completed]
        );
    }

    #[test]
    fn test_update_unknown_job_is_ignored() {
        let clock = ManualClock::new();
        let registry = registry(clock);
        registry.update("ghost", JobUpdate::Running);
        assert!(registry.get("ghost").is_none());
    }
}
