//! Dispatcher - 呼び出し側の入口（Invocation Façade）とライフサイクル
//!
//! # 入口
//! - `invoke_async`: コマンドを投入して completion を返す（容量 1 の背圧でのみ待つ）
//! - `submit`: `invoke_async` の async 版（tokio の blocking pool で投入する）
//! - `invoke` / `call`: 結果が出るまで待つ（blocking / async）
//! - `execute*`: 戻り値なし版（`()` を「中身なし」の値として同じ仕組みに流す）
//!
//! # 終了
//! - `request_shutdown()`: Running -> Draining、mailbox を閉じる（待たない）
//! - `shutdown()`: request_shutdown() + loop スレッドの join
//! - `Drop` は `shutdown()` を呼ぶ

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use tracing::{debug, error, info, warn};

use super::builder::BuildError;
use super::completion::{Completion, completion_pair};
use super::config::DispatcherConfig;
use super::dispatcher_loop::DispatcherLoop;
use super::lifecycle::Lifecycle;
use super::mailbox::{Mailbox, Rejected};
use super::work::{BoxedWork, ChannelCommand};
use crate::domain::{DispatchError, DispatcherState};
use crate::ports::ChannelProvider;

/// Serializes every access to one shared channel onto a dedicated thread.
///
/// Commands run one at a time, in the order they entered the mailbox. Each
/// one reaches exactly one terminal state: succeeded, failed (including a
/// panic), or cancelled.
///
/// # Example
/// ```ignore
/// let dispatcher = DispatcherBuilder::new(provider).name("publisher").build()?;
/// let depth = dispatcher.invoke(|channel| channel.declare_queue("jobs"))?;
/// dispatcher.shutdown();
/// ```
pub struct Dispatcher<P: ChannelProvider> {
    name: String,
    mailbox: Arc<Mailbox<BoxedWork<P>>>,
    lifecycle: Arc<Lifecycle>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_thread: ThreadId,
    next_seq: AtomicU64,
}

impl<P: ChannelProvider> Dispatcher<P> {
    /// Start a dispatcher with the default configuration.
    pub fn new(provider: P) -> Result<Self, BuildError> {
        Self::spawn(DispatcherConfig::default(), provider)
    }

    pub(crate) fn spawn(config: DispatcherConfig, provider: P) -> Result<Self, BuildError> {
        let mailbox = Arc::new(Mailbox::new());
        let lifecycle = Arc::new(Lifecycle::new());
        let thread_name = config.thread_name();

        let dispatcher_loop = DispatcherLoop::new(
            config.name.clone(),
            provider,
            Arc::clone(&mailbox),
            Arc::clone(&lifecycle),
        );
        let worker = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || dispatcher_loop.run())?;
        let worker_thread = worker.thread().id();

        info!(dispatcher = %config.name, thread = %thread_name, "dispatcher started");

        Ok(Self {
            name: config.name,
            mailbox,
            lifecycle,
            worker: Mutex::new(Some(worker)),
            worker_thread,
            next_seq: AtomicU64::new(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> DispatcherState {
        self.lifecycle.state()
    }

    /// Number of commands waiting in the mailbox (0 or 1).
    pub fn pending(&self) -> usize {
        self.mailbox.len()
    }

    fn prepare<T, F>(&self, action: F) -> (BoxedWork<P>, Completion<T, P::Error>)
    where
        F: FnOnce(&mut P::Channel) -> Result<T, P::Error> + Send + 'static,
        T: Send + 'static,
    {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (completer, completion) = completion_pair();
        let work: BoxedWork<P> = Box::new(ChannelCommand::new(seq, action, completer));
        (work, completion)
    }

    fn reject(&self, work: BoxedWork<P>) {
        debug!(dispatcher = %self.name, seq = work.seq(), "mailbox closed; command rejected");
        work.cancel();
    }

    /// Submit a command and return its pending completion.
    ///
    /// Blocks the calling thread only while another command occupies the
    /// mailbox slot. Never waits for the action itself. After shutdown the
    /// returned completion is already cancelled.
    pub fn invoke_async<T, F>(&self, action: F) -> Completion<T, P::Error>
    where
        F: FnOnce(&mut P::Channel) -> Result<T, P::Error> + Send + 'static,
        T: Send + 'static,
    {
        let (work, completion) = self.prepare(action);
        if let Err(Rejected(work)) = self.mailbox.put(work) {
            self.reject(work);
        }
        completion
    }

    /// Async-admission twin of [`invoke_async`](Self::invoke_async).
    ///
    /// The mailbox wait runs on tokio's blocking pool, so backpressure is an
    /// `.await` instead of a blocked executor thread. Requires a tokio runtime.
    pub async fn submit<T, F>(&self, action: F) -> Completion<T, P::Error>
    where
        F: FnOnce(&mut P::Channel) -> Result<T, P::Error> + Send + 'static,
        T: Send + 'static,
    {
        let (work, completion) = self.prepare(action);
        if self.mailbox.is_closed() {
            self.reject(work);
            return completion;
        }

        let mailbox = Arc::clone(&self.mailbox);
        match tokio::task::spawn_blocking(move || mailbox.put(work)).await {
            Ok(Ok(())) => {}
            Ok(Err(Rejected(work))) => self.reject(work),
            // The command was dropped with the task, which resolves it cancelled.
            Err(err) => warn!(dispatcher = %self.name, error = %err, "admission task failed"),
        }
        completion
    }

    /// Run a command and block until it finishes.
    ///
    /// Returns the action's value, the original error
    /// ([`DispatchError::Failed`]), [`DispatchError::Panicked`] if the action
    /// panicked, or [`DispatchError::Cancelled`].
    /// Do not call from the dispatcher's own commands: the command would wait
    /// on itself.
    pub fn invoke<T, F>(&self, action: F) -> Result<T, DispatchError<P::Error>>
    where
        F: FnOnce(&mut P::Channel) -> Result<T, P::Error> + Send + 'static,
        T: Send + 'static,
    {
        self.invoke_async(action).wait()
    }

    /// Run a command and await its result.
    pub async fn call<T, F>(&self, action: F) -> Result<T, DispatchError<P::Error>>
    where
        F: FnOnce(&mut P::Channel) -> Result<T, P::Error> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(action).await.await
    }

    /// [`invoke`](Self::invoke) for actions with no return value.
    pub fn execute<F>(&self, action: F) -> Result<(), DispatchError<P::Error>>
    where
        F: FnOnce(&mut P::Channel) -> Result<(), P::Error> + Send + 'static,
    {
        self.invoke(action)
    }

    /// [`invoke_async`](Self::invoke_async) for actions with no return value.
    pub fn execute_async<F>(&self, action: F) -> Completion<(), P::Error>
    where
        F: FnOnce(&mut P::Channel) -> Result<(), P::Error> + Send + 'static,
    {
        self.invoke_async(action)
    }

    /// [`submit`](Self::submit) for actions with no return value.
    pub async fn submit_unit<F>(&self, action: F) -> Completion<(), P::Error>
    where
        F: FnOnce(&mut P::Channel) -> Result<(), P::Error> + Send + 'static,
    {
        self.submit(action).await
    }

    /// Stop accepting commands and wake the loop. Does not wait.
    ///
    /// Returns `true` for the call that initiated shutdown.
    pub fn request_shutdown(&self) -> bool {
        let initiated = self.lifecycle.begin_draining();
        self.mailbox.close();
        if initiated {
            info!(dispatcher = %self.name, "shutdown requested");
        }
        initiated
    }

    /// Request shutdown and wait for the loop thread to exit.
    ///
    /// Idempotent. When called from inside a command (on the loop thread) it
    /// only requests shutdown; the loop exits once that command returns.
    pub fn shutdown(&self) {
        self.request_shutdown();
        if thread::current().id() == self.worker_thread {
            return;
        }

        // 同時に呼ばれた場合も join が終わるまで待たせる
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                error!(dispatcher = %self.name, "dispatcher thread panicked");
            }
            self.lifecycle.mark_stopped();
            info!(dispatcher = %self.name, "dispatcher stopped");
        }
    }
}

impl<P: ChannelProvider> Drop for Dispatcher<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
