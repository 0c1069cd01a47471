//! Single-flight guards for scan jobs.
//!
//! A permit is held for the duration of one run and released on drop. A
//! second run of the same job while a permit is out is skipped, not queued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::LedgerStore;

pub trait RunGuard: Send + Sync {
    /// `None` when another run of `job` holds the guard.
    fn try_acquire(&self, job: &'static str) -> Option<RunPermit>;
}

/// Proof that the holder may run a job. Releases the guard when dropped.
pub struct RunPermit {
    job: &'static str,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl RunPermit {
    fn new(job: &'static str, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            job,
            release: Some(Box::new(release)),
        }
    }

    pub fn job(&self) -> &'static str {
        self.job
    }

    /// Wrap an inner permit so both release, outer first.
    fn chain(self, outer: impl FnOnce() + Send + 'static) -> Self {
        let job = self.job;
        Self::new(job, move || {
            outer();
            drop(self);
        })
    }
}

impl std::fmt::Debug for RunPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunPermit").field("job", &self.job).finish()
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// In-process flag per job. Correct for a single instance only.
#[derive(Debug, Default)]
pub struct LocalRunGuard {
    flags: Mutex<HashMap<&'static str, Arc<AtomicBool>>>,
}

impl LocalRunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, job: &'static str) -> Option<Arc<AtomicBool>> {
        let mut flags = self.flags.lock().ok()?;
        Some(flags.entry(job).or_default().clone())
    }
}

impl RunGuard for LocalRunGuard {
    fn try_acquire(&self, job: &'static str) -> Option<RunPermit> {
        let flag = self.flag(job)?;
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(RunPermit::new(job, move || flag.store(false, Ordering::Release)))
    }
}

/// Cluster-wide guard backed by a TTL'd lease row in the store.
///
/// Also holds a local flag: the lease is keyed by holder, and every runner in
/// this process shares one holder id.
pub struct LeaseRunGuard {
    store: Arc<dyn LedgerStore>,
    holder: String,
    ttl: Duration,
    local: LocalRunGuard,
}

impl LeaseRunGuard {
    pub fn new(store: Arc<dyn LedgerStore>, ttl: Duration) -> Self {
        Self::with_holder(store, format!("worker-{}", Uuid::now_v7()), ttl)
    }

    pub fn with_holder(store: Arc<dyn LedgerStore>, holder: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            holder: holder.into(),
            ttl,
            local: LocalRunGuard::new(),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }
}

impl RunGuard for LeaseRunGuard {
    fn try_acquire(&self, job: &'static str) -> Option<RunPermit> {
        let local = self.local.try_acquire(job)?;
        match self
            .store
            .try_acquire_lease(job, &self.holder, self.ttl, Utc::now())
        {
            Ok(true) => {
                debug!(job, holder = %self.holder, "scan lease acquired");
                let store = self.store.clone();
                let holder = self.holder.clone();
                Some(local.chain(move || {
                    if let Err(e) = store.release_lease(job, &holder) {
                        warn!(job, holder = %holder, error = %e, "failed to release scan lease");
                    }
                }))
            }
            Ok(false) => None,
            Err(e) => {
                warn!(job, error = %e, "scan lease unavailable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryLedgerStore;

    #[test]
    fn local_guard_is_single_flight_per_job() {
        let guard = LocalRunGuard::new();
        let permit = guard.try_acquire("alerts").unwrap();
        assert!(guard.try_acquire("alerts").is_none());
        assert!(guard.try_acquire("suggestions").is_some());
        drop(permit);
        assert!(guard.try_acquire("alerts").is_some());
    }

    #[test]
    fn lease_guard_excludes_other_holders_until_release() {
        let store: Arc<dyn LedgerStore> = Arc::new(InMemoryLedgerStore::new());
        let a = LeaseRunGuard::with_holder(store.clone(), "a", Duration::minutes(5));
        let b = LeaseRunGuard::with_holder(store.clone(), "b", Duration::minutes(5));

        let permit = a.try_acquire("alerts").unwrap();
        assert!(b.try_acquire("alerts").is_none());
        assert!(a.try_acquire("alerts").is_none());
        drop(permit);
        assert!(b.try_acquire("alerts").is_some());
    }

    #[test]
    fn expired_lease_can_be_taken_over() {
        let store: Arc<dyn LedgerStore> = Arc::new(InMemoryLedgerStore::new());
        let stale = LeaseRunGuard::with_holder(store.clone(), "crashed", Duration::seconds(-1));
        let permit = stale.try_acquire("alerts").unwrap();
        std::mem::forget(permit);

        let fresh = LeaseRunGuard::with_holder(store, "fresh", Duration::minutes(5));
        assert!(fresh.try_acquire("alerts").is_some());
    }
}
