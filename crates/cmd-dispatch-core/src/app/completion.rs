//! Completion slot - 一度だけ書き込める結果の入れ物
//!
//! # 構成
//! - `Completer`: 書き込み側（dispatcher loop / cancel 経路だけが持つ）
//! - `Completion`: 値を受け取る側（呼び出し元が 1 つだけ持つ）
//! - `CompletionObserver`: 状態だけを見る側（clone 可能、いくつでも作れる）
//!
//! blocking wait は Condvar、async wait は `watch` で待つ。

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::domain::{CompletionState, DispatchError};

/// Terminal result of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    Succeeded(T),
    Failed(E),
    /// The action or the provider panicked. Reported as a failure.
    Panicked(String),
    Cancelled,
}

impl<T, E> Outcome<T, E> {
    pub fn state(&self) -> CompletionState {
        match self {
            Outcome::Succeeded(_) => CompletionState::Succeeded,
            Outcome::Failed(_) | Outcome::Panicked(_) => CompletionState::Failed,
            Outcome::Cancelled => CompletionState::Cancelled,
        }
    }

    pub fn into_result(self) -> Result<T, DispatchError<E>> {
        match self {
            Outcome::Succeeded(value) => Ok(value),
            Outcome::Failed(error) => Err(DispatchError::Failed(error)),
            Outcome::Panicked(message) => Err(DispatchError::Panicked(message)),
            Outcome::Cancelled => Err(DispatchError::Cancelled),
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Outcome::Succeeded(value),
            Err(error) => Outcome::Failed(error),
        }
    }
}

enum Slot<T, E> {
    Pending,
    Ready(Outcome<T, E>),
    Taken,
}

struct Shared<T, E> {
    slot: Mutex<Slot<T, E>>,
    ready: Condvar,
    state: watch::Sender<CompletionState>,
}

impl<T, E> Shared<T, E> {
    fn lock(&self) -> MutexGuard<'_, Slot<T, E>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// First write wins; later writes are refused.
    fn resolve(&self, outcome: Outcome<T, E>) -> bool {
        let mut slot = self.lock();
        if !matches!(*slot, Slot::Pending) {
            return false;
        }
        let state = outcome.state();
        *slot = Slot::Ready(outcome);
        drop(slot);

        self.state.send_replace(state);
        self.ready.notify_all();
        true
    }

    fn take_ready(slot: &mut Slot<T, E>) -> Option<Outcome<T, E>> {
        match std::mem::replace(slot, Slot::Taken) {
            Slot::Ready(outcome) => Some(outcome),
            other => {
                *slot = other;
                None
            }
        }
    }
}

/// Create a connected writer / reader pair for one command.
pub fn completion_pair<T, E>() -> (Completer<T, E>, Completion<T, E>) {
    let (state, _) = watch::channel(CompletionState::Pending);
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot::Pending),
        ready: Condvar::new(),
        state,
    });
    (
        Completer {
            shared: Arc::clone(&shared),
        },
        Completion { shared },
    )
}

/// Write side of a completion slot.
///
/// Each write method returns `true` only if it was the write that resolved
/// the slot. Dropping a completer that never wrote resolves the slot as
/// cancelled, so an abandoned command never leaves its caller hanging.
pub struct Completer<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Completer<T, E> {
    pub fn succeed(&self, value: T) -> bool {
        self.shared.resolve(Outcome::Succeeded(value))
    }

    pub fn fail(&self, error: E) -> bool {
        self.shared.resolve(Outcome::Failed(error))
    }

    pub fn cancel(&self) -> bool {
        self.shared.resolve(Outcome::Cancelled)
    }

    pub fn complete(&self, result: Result<T, E>) -> bool {
        self.shared.resolve(result.into())
    }

    pub fn resolve(&self, outcome: Outcome<T, E>) -> bool {
        self.shared.resolve(outcome)
    }
}

impl<T, E> Drop for Completer<T, E> {
    fn drop(&mut self) {
        self.shared.resolve(Outcome::Cancelled);
    }
}

impl<T, E> fmt::Debug for Completer<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("state", &*self.shared.state.borrow())
            .finish()
    }
}

/// Read side of a completion slot: the handle returned to the caller.
///
/// The value moves out exactly once, through `wait`, `wait_timeout`,
/// `try_take`, `outcome` or `.await`.
pub struct Completion<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Completion<T, E> {
    pub fn state(&self) -> CompletionState {
        *self.shared.state.borrow()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// A read-only view of the state that any number of observers can hold.
    pub fn observer(&self) -> CompletionObserver {
        CompletionObserver {
            state: self.shared.state.subscribe(),
        }
    }

    /// Take the outcome if the slot is already resolved.
    pub fn try_take(self) -> Result<Outcome<T, E>, Self> {
        let taken = Shared::take_ready(&mut self.shared.lock());
        taken.ok_or(self)
    }

    /// Block the calling thread until the slot is resolved.
    pub fn wait_outcome(self) -> Outcome<T, E> {
        let mut slot = self.shared.lock();
        loop {
            if let Some(outcome) = Shared::take_ready(&mut slot) {
                return outcome;
            }
            slot = self
                .shared
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until resolved and convert to a `Result`.
    ///
    /// A failure comes back as the original error; cancellation as
    /// [`DispatchError::Cancelled`].
    pub fn wait(self) -> Result<T, DispatchError<E>> {
        self.wait_outcome().into_result()
    }

    /// Block for at most `timeout`. Gives the handle back if still pending.
    ///
    /// Timing out only stops waiting; the command itself keeps its place.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Outcome<T, E>, Self> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.lock();
        loop {
            if let Some(outcome) = Shared::take_ready(&mut slot) {
                return Ok(outcome);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                drop(slot);
                return Err(self);
            }
            let (guard, _) = self
                .shared
                .ready
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }
    }

    /// Wait asynchronously until the slot is resolved.
    pub async fn outcome(self) -> Outcome<T, E> {
        let mut state = self.shared.state.subscribe();
        loop {
            if state.borrow_and_update().is_terminal() {
                break;
            }
            // The sender lives in `shared`, which we hold, so this never errors.
            if state.changed().await.is_err() {
                break;
            }
        }
        // The slot is written before the state is published.
        let outcome = Shared::take_ready(&mut self.shared.lock());
        outcome.unwrap_or(Outcome::Cancelled)
    }
}

impl<T, E> IntoFuture for Completion<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    type Output = Result<T, DispatchError<E>>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.outcome().await.into_result() })
    }
}

impl<T, E> fmt::Debug for Completion<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("state", &self.state())
            .finish()
    }
}

/// Read-only, cloneable view of a completion slot's state.
#[derive(Debug, Clone)]
pub struct CompletionObserver {
    state: watch::Receiver<CompletionState>,
}

impl CompletionObserver {
    pub fn state(&self) -> CompletionState {
        *self.state.borrow()
    }

    /// Wait until the slot reaches a terminal state and return it.
    pub async fn wait_terminal(&mut self) -> CompletionState {
        loop {
            let current = *self.state.borrow_and_update();
            if current.is_terminal() {
                return current;
            }
            if self.state.changed().await.is_err() {
                // Writer and reader are both gone without a resolution.
                return CompletionState::Cancelled;
            }
        }
    }
}
