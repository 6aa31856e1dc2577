//! Per-job cancellation signalling.
//!
//! Each running job exclusively owns its [`CancelFlag`]; the scheduler and
//! API surface hold a [`WeakCancelFlag`] keyed by job id. The flag is
//! set-only — there is no un-cancel — and workers observe it between
//! batches, never mid-batch, so the unit of responsiveness is one batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Owned cancellation flag for one job.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    /// Create a fresh, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Irreversible.
    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }

    /// A weak handle that does not keep the job's flag alive.
    pub fn downgrade(&self) -> WeakCancelFlag {
        WeakCancelFlag {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Weak handle to a job's cancellation flag.
///
/// Upgrading fails once the owning worker has dropped its flag, i.e. the
/// job already reached a terminal state.
#[derive(Debug, Clone)]
pub struct WeakCancelFlag {
    inner: Weak<AtomicBool>,
}

impl WeakCancelFlag {
    /// Set the flag if the job is still alive. Returns whether a live flag
    /// was found.
    pub fn cancel(&self) -> bool {
        match self.inner.upgrade() {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_starts_unset_and_sets_once() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        flag.cancel();
        assert!(flag.is_cancelled());
        // Set-only: cancelling again changes nothing.
        flag.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn weak_handle_cancels_live_flag() {
        let flag = CancelFlag::new();
        let weak = flag.downgrade();
        assert!(weak.cancel());
        assert!(flag.is_cancelled());
    }

    #[test]
    fn weak_handle_fails_after_job_ends() {
        let weak = {
            let flag = CancelFlag::new();
            flag.downgrade()
        };
        assert!(!weak.cancel());
    }

    #[test]
    fn clones_share_the_flag() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
