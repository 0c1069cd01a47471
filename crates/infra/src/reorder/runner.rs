use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::LedgerResult;

use super::alerts::{AlertScanner, ALERT_SCAN_JOB};
use super::suggestions::{SuggestionScanner, SUGGESTION_SCAN_JOB};

/// A job a [`ScanRunner`] can drive on a schedule.
pub trait ScheduledJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// One run. Errors are logged and retried by the runner.
    fn run_scheduled(&self) -> LedgerResult<()>;
}

impl ScheduledJob for AlertScanner {
    fn name(&self) -> &'static str {
        ALERT_SCAN_JOB
    }

    fn run_scheduled(&self) -> LedgerResult<()> {
        self.run().map(|_| ())
    }
}

impl ScheduledJob for SuggestionScanner {
    fn name(&self) -> &'static str {
        SUGGESTION_SCAN_JOB
    }

    fn run_scheduled(&self) -> LedgerResult<()> {
        self.run().map(|_| ())
    }
}

/// Schedule for one background job.
#[derive(Debug, Clone)]
pub struct ScanRunner {
    pub interval: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for ScanRunner {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1200),
            max_retries: 5,
            base_backoff: Duration::from_millis(250),
        }
    }
}

impl ScanRunner {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    /// Spawn a named thread that runs `job` once now, then every `interval`.
    ///
    /// `trigger()` requests an extra run; triggers arriving while one is
    /// already pending coalesce. Failures are retried with bounded exponential
    /// backoff and never leave the thread.
    pub fn spawn(&self, job: Arc<dyn ScheduledJob>) -> io::Result<ScanRunnerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (trigger_tx, trigger_rx) = mpsc::sync_channel::<()>(1);

        let cfg = self.clone();
        let name = job.name();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || runner_loop(cfg, job, shutdown_rx, trigger_rx))?;

        Ok(ScanRunnerHandle {
            name,
            shutdown: shutdown_tx,
            trigger: trigger_tx,
            join: Some(join),
        })
    }
}

/// Control handle for a spawned runner. Dropping it also stops the runner,
/// without waiting for the thread.
#[derive(Debug)]
pub struct ScanRunnerHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    trigger: mpsc::SyncSender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl ScanRunnerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask for a run as soon as possible. No-op if one is already pending.
    pub fn trigger(&self) {
        let _ = self.trigger.try_send(());
    }

    /// Stop the runner and wait for an in-flight run to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!(runner = self.name, "runner thread panicked");
            }
        }
    }
}

fn runner_loop(
    cfg: ScanRunner,
    job: Arc<dyn ScheduledJob>,
    shutdown_rx: mpsc::Receiver<()>,
    trigger_rx: mpsc::Receiver<()>,
) {
    let name = job.name();
    info!(runner = name, interval_secs = cfg.interval.as_secs(), "scan runner started");

    let mut next_tick = Instant::now() + cfg.interval;
    let mut pending = true;
    let mut failures: u32 = 0;
    let mut backoff_until: Option<Instant> = None;

    loop {
        let now = Instant::now();
        if now >= next_tick {
            pending = true;
            while next_tick <= now {
                next_tick += cfg.interval;
            }
        }
        while trigger_rx.try_recv().is_ok() {
            pending = true;
        }

        let wake_at = match backoff_until {
            Some(until) if now < until => Some(until),
            _ if !pending => Some(next_tick),
            _ => None,
        };
        if let Some(at) = wake_at {
            // Short slices so triggers are noticed promptly.
            let wait = at.saturating_duration_since(now).min(Duration::from_millis(250));
            match shutdown_rx.recv_timeout(wait) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => continue,
            }
        }
        match shutdown_rx.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        pending = false;
        backoff_until = None;
        match job.run_scheduled() {
            Ok(()) => failures = 0,
            Err(e) => {
                failures += 1;
                warn!(runner = name, attempt = failures, error = %e, "scheduled run failed");
                if failures <= cfg.max_retries {
                    pending = true;
                    backoff_until = Some(Instant::now() + backoff(cfg.base_backoff, failures));
                } else {
                    warn!(runner = name, "retries exhausted; waiting for the next tick");
                    failures = 0;
                }
            }
        }
    }

    info!(runner = name, "scan runner stopped");
}

/// `base * 2^(attempt-1)`, capped at ten seconds.
fn backoff(base: Duration, attempt: u32) -> Duration {
    let pow = 1u32 << attempt.saturating_sub(1).min(10);
    let ms = base.as_millis().saturating_mul(u128::from(pow));
    Duration::from_millis(ms.min(10_000) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use cmms_core::DomainError;

    struct Counting {
        runs: AtomicU32,
        fail_first: u32,
    }

    impl ScheduledJob for Counting {
        fn name(&self) -> &'static str {
            "test.counting"
        }

        fn run_scheduled(&self) -> LedgerResult<()> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                return Err(DomainError::conflict("flaky").into());
            }
            Ok(())
        }
    }

    fn wait_for(job: &Counting, at_least: u32) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if job.runs.load(Ordering::SeqCst) >= at_least {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn counting(fail_first: u32) -> Arc<Counting> {
        Arc::new(Counting {
            runs: AtomicU32::new(0),
            fail_first,
        })
    }

    #[test]
    fn runs_at_startup_and_on_trigger() {
        let job = counting(0);
        let handle = ScanRunner::every(Duration::from_secs(3600))
            .spawn(job.clone())
            .unwrap();
        assert!(wait_for(&job, 1));
        handle.trigger();
        assert!(wait_for(&job, 2));
        handle.shutdown();
    }

    #[test]
    fn failures_are_retried_with_backoff() {
        let job = counting(2);
        let runner = ScanRunner {
            interval: Duration::from_secs(3600),
            max_retries: 5,
            base_backoff: Duration::from_millis(5),
        };
        let handle = runner.spawn(job.clone()).unwrap();
        assert!(wait_for(&job, 3));
        handle.shutdown();
    }

    #[test]
    fn shutdown_stops_the_thread() {
        let job = counting(0);
        let handle = ScanRunner::every(Duration::from_millis(20))
            .spawn(job.clone())
            .unwrap();
        assert!(wait_for(&job, 2));
        handle.shutdown();
        let after = job.runs.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(job.runs.load(Ordering::SeqCst), after);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff(base, 1), Duration::from_millis(100));
        assert_eq!(backoff(base, 3), Duration::from_millis(400));
        assert_eq!(backoff(base, 20), Duration::from_secs(10));
    }
}
