//! Lifecycle - Running / Draining / Stopped の共有状態
//!
//! shutdown 要求（Running -> Draining）と completion への最終書き込みは
//! 同じロックの下で行う。どちらが先かが必ず一方に決まる。

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::domain::DispatcherState;

/// Dispatcher state shared by the façade and the loop thread.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: Mutex<DispatcherState>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(DispatcherState::Running),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatcherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> DispatcherState {
        *self.lock()
    }

    pub(crate) fn is_shutdown_requested(&self) -> bool {
        !self.state().accepts_work()
    }

    /// Running -> Draining. Returns `true` only for the call that made the transition.
    pub(crate) fn begin_draining(&self) -> bool {
        let mut state = self.lock();
        if *state != DispatcherState::Running {
            return false;
        }
        *state = DispatcherState::Draining;
        true
    }

    pub(crate) fn mark_stopped(&self) {
        *self.lock() = DispatcherState::Stopped;
    }

    /// Run `commit` with shutdown held off.
    ///
    /// `commit` receives whether shutdown was already requested. A concurrent
    /// [`begin_draining`](Self::begin_draining) waits until `commit` returns,
    /// so whatever `commit` writes is ordered entirely before or entirely
    /// after the request. `commit` must not request shutdown itself.
    pub(crate) fn commit<R>(&self, commit: impl FnOnce(bool) -> R) -> R {
        let state = self.lock();
        commit(!state.accepts_work())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn draining_happens_once() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), DispatcherState::Running);
        assert!(!lifecycle.is_shutdown_requested());

        assert!(lifecycle.begin_draining());
        assert!(!lifecycle.begin_draining());
        assert_eq!(lifecycle.state(), DispatcherState::Draining);
        assert!(lifecycle.is_shutdown_requested());
    }

    #[test]
    fn stopped_is_not_reopened() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_draining();
        lifecycle.mark_stopped();
        assert!(!lifecycle.begin_draining());
        assert_eq!(lifecycle.state(), DispatcherState::Stopped);
    }

    #[test]
    fn commit_sees_earlier_shutdown_request() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.commit(|draining| draining));

        lifecycle.begin_draining();
        assert!(lifecycle.commit(|draining| draining));
    }

    #[test]
    fn shutdown_request_waits_for_running_commit() {
        let lifecycle = Arc::new(Lifecycle::new());
        let drained = Arc::new(AtomicBool::new(false));

        let saw_draining = lifecycle.commit(|draining| {
            let requester = thread::spawn({
                let lifecycle = Arc::clone(&lifecycle);
                let drained = Arc::clone(&drained);
                move || {
                    lifecycle.begin_draining();
                    drained.store(true, Ordering::SeqCst);
                }
            });
            thread::sleep(Duration::from_millis(50));
            // The request cannot slip in between the check and the write.
            assert!(!drained.load(Ordering::SeqCst));
            (draining, requester)
        });

        let (draining, requester) = saw_draining;
        assert!(!draining);
        requester.join().unwrap();
        assert!(drained.load(Ordering::SeqCst));
        assert_eq!(lifecycle.state(), DispatcherState::Draining);
    }
}
