/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::schedule
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Periodic update checks: debounced registration, exponential
    backoff after failures, a network precondition, and at most
    one check in flight per process.

  Security / Safety Notes:
    Errors raised by a check are logged and converted into a
    retry; they never terminate the daemon.

  Dependencies:
    tokio (time, net, sync, task), tokio-util CancellationToken,
    reqwest::Url for host extraction.

  Operational Scope:
    Backs the `daemon` and `schedule` commands.

  Revision History:
    2025-11-12 COD  Authored scheduling daemon.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Single in-flight job, explicit cancellation
    - Bounded exponential backoff
    - Redundant re-registration suppressed
============================================================*/

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::check::{CheckReport, Checker};
use crate::config::CheckConfig;
use crate::error::{Result, SynupdError};
use crate::logger::Logger;
use crate::state::{ScheduleRecord, StateStore};

/// An identical registration younger than this is left alone.
pub const RESET_PERIOD: Duration = Duration::from_secs(4 * 24 * 60 * 60);
pub const BACKOFF_INITIAL: Duration = Duration::from_secs(15 * 60);
pub const BACKOFF_MAX: Duration = Duration::from_secs(5 * 60 * 60);

/// Outcome of [`register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Kept(ScheduleRecord),
    Registered(ScheduleRecord),
}

/// Record the periodic schedule unless an equivalent one was set within
/// [`RESET_PERIOD`].
pub fn register(store: &StateStore, interval_minutes: u64, now_ms: i64) -> Result<Registration> {
    let reset_ms = RESET_PERIOD.as_millis() as i64;
    store.update(|state| {
        if let Some(existing) = state.schedule {
            let age = now_ms.saturating_sub(existing.set_at_ms);
            if (0..reset_ms).contains(&age) && existing.interval_minutes == interval_minutes {
                return Registration::Kept(existing);
            }
        }
        let record = ScheduleRecord {
            set_at_ms: now_ms,
            interval_minutes,
        };
        state.schedule = Some(record);
        Registration::Registered(record)
    })
}

/// Timing parameters of the periodic loop.
#[derive(Debug, Clone)]
pub struct SchedulePolicy {
    pub interval: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// URL whose host must resolve before a check runs.
    pub reachability_url: Option<String>,
    /// Wait before the first scheduled run.
    pub first_run: Duration,
}

impl SchedulePolicy {
    pub fn from_config(check: &CheckConfig, reachability_url: Option<String>) -> Self {
        Self {
            interval: Duration::from_secs(check.interval_minutes.saturating_mul(60)),
            backoff_initial: BACKOFF_INITIAL,
            backoff_max: BACKOFF_MAX,
            reachability_url,
            first_run: Duration::ZERO,
        }
    }

    /// Keep the cadence of a kept registration: the first run lands on the
    /// next whole interval after `set_at_ms`. A fresh registration runs at once.
    pub fn resume(mut self, registration: Registration, now_ms: i64) -> Self {
        self.first_run = match registration {
            Registration::Registered(_) => Duration::ZERO,
            Registration::Kept(record) => {
                let interval_ms = self.interval.as_millis().max(1);
                let elapsed = now_ms.saturating_sub(record.set_at_ms).max(0) as u128;
                let remaining = interval_ms - elapsed % interval_ms;
                Duration::from_millis(u64::try_from(remaining).unwrap_or(u64::MAX))
            }
        };
        self
    }

    /// Delay after `failures` consecutive failed runs (`failures >= 1`).
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.backoff_initial
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }
}

struct Running<T> {
    token: CancellationToken,
    active: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<T>>>,
}

impl<T> Running<T> {
    fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Holds at most one background job.
pub struct JobSlot<T> {
    running: Mutex<Option<Running<T>>>,
}

impl<T: Send + 'static> Default for JobSlot<T> {
    fn default() -> Self {
        Self {
            running: Mutex::new(None),
        }
    }
}

impl<T: Send + 'static> JobSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `job` unless one is already in flight; returns whether it started.
    pub fn try_start<F>(&self, job: F) -> bool
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let mut slot = self.lock();
        if let Some(running) = slot.as_ref() {
            if running.active.load(Ordering::SeqCst) {
                return false;
            }
        }
        *slot = Some(spawn_job(job));
        true
    }

    /// Cancel whatever is in flight and start `job` in its place.
    pub fn restart<F>(&self, job: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let mut slot = self.lock();
        if let Some(previous) = slot.take() {
            previous.stop();
        }
        *slot = Some(spawn_job(job));
    }

    pub fn cancel(&self) {
        if let Some(previous) = self.lock().take() {
            previous.stop();
        }
    }

    /// Await the current job. `None` when nothing was started or it was
    /// already joined.
    pub async fn join(&self) -> Option<Result<T>> {
        let handle = self.lock().as_mut().and_then(|running| running.handle.take())?;
        Some(match handle.await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Err(SynupdError::Cancelled),
            Err(err) => Err(SynupdError::Runtime(format!("Check job aborted: {err}"))),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Running<T>>> {
        self.running
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

fn spawn_job<T, F>(job: F) -> Running<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let token = CancellationToken::new();
    let active = Arc::new(AtomicBool::new(true));
    let child = token.clone();
    let flag = active.clone();
    let handle = tokio::spawn(async move {
        let result = tokio::select! {
            biased;
            _ = child.cancelled() => Err(SynupdError::Cancelled),
            result = job => result,
        };
        flag.store(false, Ordering::SeqCst);
        result
    });
    Running {
        token,
        active,
        handle: Some(handle),
    }
}

/// Whether the host of `url` currently resolves.
pub async fn network_available(url: &str) -> bool {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return false;
    };
    let (Some(host), Some(port)) = (parsed.host_str(), parsed.port_or_known_default()) else {
        return false;
    };
    let resolved = match tokio::net::lookup_host((host, port)).await {
        Ok(mut addrs) => addrs.next().is_some(),
        Err(_) => false,
    };
    resolved
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    Scheduled,
    Requested,
}

/// Run checks until `shutdown` fires. `trigger` requests an immediate check,
/// ignored while one is in flight.
pub async fn run_periodic(
    checker: Checker,
    policy: SchedulePolicy,
    logger: Arc<Logger>,
    trigger: Arc<Notify>,
    shutdown: CancellationToken,
) -> Result<()> {
    let slot: JobSlot<CheckReport> = JobSlot::new();
    let mut failures = 0u32;
    let mut deadline = Instant::now() + policy.first_run;

    logger.info(
        "DAEMON",
        format!(
            "Checking {} channel every {} min",
            checker.channel(),
            policy.interval.as_secs() / 60
        ),
    );

    loop {
        let tick = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = trigger.notified() => Tick::Requested,
            _ = sleep_until(deadline) => Tick::Scheduled,
        };

        if let Some(url) = &policy.reachability_url {
            if !network_available(url).await {
                logger.warn("NETWAIT", "Update server unreachable; deferring check");
                deadline = Instant::now() + policy.backoff_initial;
                continue;
            }
        }

        let job_checker = checker.clone();
        let job = async move { job_checker.run().await };
        match tick {
            Tick::Scheduled => slot.restart(job),
            Tick::Requested => {
                if !slot.try_start(job) {
                    logger.info("SKIP", "Check already in flight; request ignored");
                    continue;
                }
            }
        }

        let join = slot.join();
        tokio::pin!(join);
        let outcome = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    slot.cancel();
                    logger.info("DAEMON", "Shutdown requested; check cancelled");
                    return Ok(());
                }
                _ = trigger.notified() => {
                    logger.info("SKIP", "Check already in flight; request ignored");
                }
                outcome = &mut join => break outcome,
            }
        };

        let delay = match outcome {
            Some(Ok(report)) => {
                failures = 0;
                logger.info(
                    "CHECK",
                    format!(
                        "{} (installed {}, available {})",
                        report.status,
                        report.installed,
                        report.available.format()
                    ),
                );
                policy.interval
            }
            Some(Err(err)) if err.is_cancelled() => policy.interval,
            Some(Err(err)) if !err.is_retryable() => {
                failures = 0;
                logger.warn(
                    "CHECK",
                    format!("Check failed ({err}); next attempt on schedule"),
                );
                policy.interval
            }
            Some(Err(err)) => {
                failures = failures.saturating_add(1);
                let delay = policy.backoff(failures);
                logger.warn(
                    "RETRY",
                    format!(
                        "Check failed ({err}); retry #{failures} in {} s",
                        delay.as_secs()
                    ),
                );
                delay
            }
            None => policy.interval,
        };
        deadline = Instant::now() + delay;
    }

    slot.cancel();
    logger.info("DAEMON", "Stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tempfile::TempDir;

    use super::*;
    use crate::check::tests::{FixedManifest, RecordingNotifier};
    use crate::decision::Channel;
    use crate::installed::InstalledSource;
    use crate::manifest::AvailableVersion;

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    #[test]
    fn registration_is_debounced() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let first = register(&store, 240, 1_000).unwrap();
        assert!(matches!(first, Registration::Registered(_)));

        let again = register(&store, 240, 1_000 + 3 * DAY_MS).unwrap();
        assert_eq!(
            again,
            Registration::Kept(ScheduleRecord {
                set_at_ms: 1_000,
                interval_minutes: 240
            })
        );

        let changed = register(&store, 60, 1_000 + DAY_MS).unwrap();
        assert!(matches!(changed, Registration::Registered(r) if r.interval_minutes == 60));

        let stale = register(&store, 60, 1_000 + DAY_MS + 4 * DAY_MS).unwrap();
        assert!(matches!(stale, Registration::Registered(_)));
    }

    #[test]
    fn registration_from_the_future_is_replaced() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        register(&store, 240, 10 * DAY_MS).unwrap();
        assert!(matches!(
            register(&store, 240, DAY_MS).unwrap(),
            Registration::Registered(_)
        ));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = SchedulePolicy::from_config(&CheckConfig::default(), None);
        assert_eq!(policy.interval, Duration::from_secs(240 * 60));
        assert_eq!(policy.backoff(1), Duration::from_secs(15 * 60));
        assert_eq!(policy.backoff(2), Duration::from_secs(30 * 60));
        assert_eq!(policy.backoff(3), Duration::from_secs(60 * 60));
        assert_eq!(policy.backoff(6), BACKOFF_MAX);
        assert_eq!(policy.backoff(40), BACKOFF_MAX);
    }

    #[tokio::test]
    async fn try_start_is_a_no_op_while_running() {
        let slot: JobSlot<u32> = JobSlot::new();
        let gate = Arc::new(Notify::new());
        let wait = gate.clone();
        assert!(slot.try_start(async move {
            wait.notified().await;
            Ok(1)
        }));
        assert!(!slot.try_start(async { Ok(2) }));

        gate.notify_one();
        assert_eq!(slot.join().await.unwrap().unwrap(), 1);
        assert!(slot.try_start(async { Ok(3) }));
        assert_eq!(slot.join().await.unwrap().unwrap(), 3);
    }

    #[tokio::test]
    async fn restart_cancels_the_previous_job() {
        let slot: JobSlot<u32> = JobSlot::new();
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = finished.clone();
        slot.restart(async move {
            std::future::pending::<()>().await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        });
        slot.restart(async { Ok(2) });
        assert_eq!(slot.join().await.unwrap().unwrap(), 2);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert!(slot.join().await.is_none());
    }

    #[tokio::test]
    async fn cancelled_job_reports_cancellation() {
        let slot: JobSlot<u32> = JobSlot::new();
        slot.restart(async {
            std::future::pending::<()>().await;
            Ok(0)
        });
        let handle = slot.lock().as_mut().unwrap().handle.take().unwrap();
        slot.cancel();
        let result = handle.await;
        assert!(result.is_err() || result.unwrap().unwrap_err().is_cancelled());
    }

    fn fast_policy() -> SchedulePolicy {
        SchedulePolicy {
            interval: Duration::from_millis(40),
            backoff_initial: Duration::from_millis(5),
            backoff_max: Duration::from_millis(20),
            reachability_url: None,
            first_run: Duration::ZERO,
        }
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// Manifest source failing with a fixed HTTP status.
    struct RejectingManifest {
        status: u16,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl crate::client::ManifestSource for RejectingManifest {
        async fn fetch_available(&self, _channel: Channel) -> Result<AvailableVersion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SynupdError::Http {
                status: self.status,
                url: "http://127.0.0.1/version".into(),
            })
        }

        async fn release_notes(&self, _version: &AvailableVersion) -> String {
            String::new()
        }
    }

    #[tokio::test]
    async fn daemon_keeps_running_through_failures() {
        let manifest = Arc::new(FixedManifest::new(None));
        let checker = Checker::new(
            InstalledSource::Literal("1.0.0".into()),
            manifest.clone(),
            Channel::Stable,
            Arc::new(RecordingNotifier::default()),
            Arc::new(Logger::quiet()),
        );
        let shutdown = CancellationToken::new();
        let daemon = tokio::spawn(run_periodic(
            checker,
            fast_policy(),
            Arc::new(Logger::quiet()),
            Arc::new(Notify::new()),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown.cancel();
        daemon.await.unwrap().unwrap();
        assert!(manifest.calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn daemon_runs_on_request_and_notifies() {
        let manifest = Arc::new(FixedManifest::new(Some("AquaMail\t2.0.0\t1700000000000")));
        let notifier = Arc::new(RecordingNotifier::default());
        let checker = Checker::new(
            InstalledSource::Literal("1.0.0".into()),
            manifest.clone(),
            Channel::Beta,
            notifier.clone(),
            Arc::new(Logger::quiet()),
        );
        let policy = SchedulePolicy {
            interval: Duration::from_secs(3600),
            ..fast_policy()
        };
        let trigger = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();
        let daemon = tokio::spawn(run_periodic(
            checker,
            policy,
            Arc::new(Logger::quiet()),
            trigger.clone(),
            shutdown.clone(),
        ));

        // Initial run happens immediately; a request forces a second one.
        wait_for(|| notifier.events.lock().unwrap().len() == 1).await;
        trigger.notify_one();
        wait_for(|| notifier.events.lock().unwrap().len() == 2).await;
        shutdown.cancel();
        daemon.await.unwrap().unwrap();

        assert_eq!(manifest.calls.load(Ordering::SeqCst), 2);
        assert_eq!(notifier.events.lock().unwrap().len(), 2);
    }

    #[test]
    fn kept_registration_resumes_its_cadence() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let hour_ms = 60 * 60 * 1000;
        let base = SchedulePolicy::from_config(&CheckConfig::default(), None);

        let first = register(&store, 240, 0).unwrap();
        assert_eq!(base.clone().resume(first, 0).first_run, Duration::ZERO);

        // Relaunched one hour later: next run is three hours out, not now.
        let again = register(&store, 240, hour_ms).unwrap();
        assert!(matches!(again, Registration::Kept(_)));
        assert_eq!(
            base.clone().resume(again, hour_ms).first_run,
            Duration::from_secs(3 * 60 * 60)
        );

        // Nine hours in, the phase still follows the original registration.
        let later = register(&store, 240, 9 * hour_ms).unwrap();
        assert_eq!(
            base.resume(later, 9 * hour_ms).first_run,
            Duration::from_secs(3 * 60 * 60)
        );
    }

    #[tokio::test]
    async fn restarted_daemon_waits_for_kept_schedule() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        register(&store, 240, 0).unwrap();
        let kept = register(&store, 240, 60_000).unwrap();

        let manifest = Arc::new(FixedManifest::new(Some("AquaMail\t2.0.0\t1700000000000")));
        let checker = Checker::new(
            InstalledSource::Literal("1.0.0".into()),
            manifest.clone(),
            Channel::Beta,
            Arc::new(RecordingNotifier::default()),
            Arc::new(Logger::quiet()),
        );
        let policy = SchedulePolicy::from_config(&CheckConfig::default(), None).resume(kept, 60_000);
        let shutdown = CancellationToken::new();
        let daemon = tokio::spawn(run_periodic(
            checker,
            policy,
            Arc::new(Logger::quiet()),
            Arc::new(Notify::new()),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        daemon.await.unwrap().unwrap();
        assert_eq!(manifest.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn permanent_failures_wait_a_full_interval() {
        let manifest = Arc::new(RejectingManifest {
            status: 404,
            calls: AtomicUsize::new(0),
        });
        let checker = Checker::new(
            InstalledSource::Literal("1.0.0".into()),
            manifest.clone(),
            Channel::Stable,
            Arc::new(RecordingNotifier::default()),
            Arc::new(Logger::quiet()),
        );
        let policy = SchedulePolicy {
            interval: Duration::from_secs(3600),
            ..fast_policy()
        };
        let shutdown = CancellationToken::new();
        let daemon = tokio::spawn(run_periodic(
            checker,
            policy,
            Arc::new(Logger::quiet()),
            Arc::new(Notify::new()),
            shutdown.clone(),
        ));

        wait_for(|| manifest.calls.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        daemon.await.unwrap().unwrap();
        assert_eq!(manifest.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unresolvable_host_is_unavailable() {
        assert!(!network_available("not a url").await);
        assert!(network_available("http://127.0.0.1:9/version").await);
    }
}
