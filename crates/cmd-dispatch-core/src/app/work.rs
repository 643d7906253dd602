//! Work item - action と completion slot の組
//!
//! Mailbox は結果の型が異なるコマンドを同じ列に並べるので、
//! `ChannelCommand<F, T, E>` を `dyn WorkItem<P>` に型消去して運ぶ。
//!
//! 結果の書き込みは `Lifecycle::commit` の中で行い、shutdown 要求と競合させない。

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error};

use super::completion::{Completer, Outcome};
use super::lifecycle::Lifecycle;
use crate::ports::ChannelProvider;

/// Object-safe view of a queued command.
pub(crate) trait WorkItem<P: ChannelProvider>: Send {
    /// Submission sequence number (for logs).
    fn seq(&self) -> u64;

    /// Run the action through the provider and resolve the completion.
    fn execute(self: Box<Self>, provider: &mut P, lifecycle: &Lifecycle);

    /// Resolve the completion as cancelled without running the action.
    fn cancel(self: Box<Self>);
}

pub(crate) type BoxedWork<P> = Box<dyn WorkItem<P>>;

/// A caller's action together with the writer for its completion slot.
pub(crate) struct ChannelCommand<F, T, E> {
    seq: u64,
    action: F,
    completer: Completer<T, E>,
}

impl<F, T, E> ChannelCommand<F, T, E> {
    pub(crate) fn new(seq: u64, action: F, completer: Completer<T, E>) -> Self {
        Self {
            seq,
            action,
            completer,
        }
    }
}

impl<P, F, T> WorkItem<P> for ChannelCommand<F, T, P::Error>
where
    P: ChannelProvider,
    F: FnOnce(&mut P::Channel) -> Result<T, P::Error> + Send + 'static,
    T: Send + 'static,
{
    fn seq(&self) -> u64 {
        self.seq
    }

    fn execute(self: Box<Self>, provider: &mut P, lifecycle: &Lifecycle) {
        let ChannelCommand {
            seq,
            action,
            completer,
        } = *self;

        let run = panic::catch_unwind(AssertUnwindSafe(|| provider.with_channel(action)));
        let outcome = match run {
            Ok(result) => Outcome::from(result),
            Err(payload) => {
                let message = panic_message(payload.as_ref()).to_string();
                error!(seq, panic = %message, "command panicked");
                Outcome::Panicked(message)
            }
        };
        let failure = match &outcome {
            Outcome::Failed(error) => Some(error.to_string()),
            _ => None,
        };

        // A result that lands after a shutdown request is cancelled instead.
        let cancelled = lifecycle.commit(|draining| {
            if draining {
                completer.cancel();
            } else {
                completer.resolve(outcome);
            }
            draining
        });

        if cancelled {
            debug!(seq, "command finished after shutdown request; cancelling");
        } else if let Some(error) = failure {
            debug!(seq, %error, "command failed");
        } else {
            debug!(seq, "command finished");
        }
    }

    fn cancel(self: Box<Self>) {
        debug!(seq = self.seq, "command cancelled before execution");
        self.completer.cancel();
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::completion::{Completion, completion_pair};
    use crate::domain::CompletionState;

    #[derive(Debug, thiserror::Error, PartialEq)]
    enum TestError {
        #[error("no channel")]
        NoChannel,
        #[error("action failed: {0}")]
        Action(String),
    }

    /// Provider whose channel is a plain counter.
    struct CounterProvider {
        counter: u32,
        available: bool,
    }

    impl ChannelProvider for CounterProvider {
        type Channel = u32;
        type Error = TestError;

        fn with_channel<T, F>(&mut self, action: F) -> Result<T, TestError>
        where
            F: FnOnce(&mut u32) -> Result<T, TestError>,
        {
            if !self.available {
                return Err(TestError::NoChannel);
            }
            action(&mut self.counter)
        }
    }

    type Boxed<T> = (BoxedWork<CounterProvider>, Completion<T, TestError>);

    fn boxed<F, T>(action: F) -> Boxed<T>
    where
        F: FnOnce(&mut u32) -> Result<T, TestError> + Send + 'static,
        T: Send + 'static,
    {
        let (completer, completion) = completion_pair();
        (Box::new(ChannelCommand::new(1, action, completer)), completion)
    }

    #[test]
    fn execute_resolves_with_action_result() {
        let mut provider = CounterProvider {
            counter: 0,
            available: true,
        };
        let (work, completion) = boxed(|counter| {
            *counter += 1;
            Ok(*counter)
        });

        work.execute(&mut provider, &Lifecycle::new());
        assert_eq!(completion.wait().unwrap(), 1);
        assert_eq!(provider.counter, 1);
    }

    #[test]
    fn provider_failure_is_reported_as_failed() {
        let mut provider = CounterProvider {
            counter: 0,
            available: false,
        };
        let (work, completion) = boxed(|_| Ok(()));

        work.execute(&mut provider, &Lifecycle::new());
        assert_eq!(
            completion.try_take().unwrap(),
            Outcome::Failed(TestError::NoChannel)
        );
    }

    #[test]
    fn action_error_is_preserved() {
        let mut provider = CounterProvider {
            counter: 0,
            available: true,
        };
        let (work, completion) = boxed::<_, ()>(|_| Err(TestError::Action("x".to_string())));

        work.execute(&mut provider, &Lifecycle::new());
        let err = completion.wait().unwrap_err();
        assert_eq!(err.into_failure(), Some(TestError::Action("x".to_string())));
    }

    #[test]
    fn result_after_shutdown_request_is_cancelled() {
        let mut provider = CounterProvider {
            counter: 0,
            available: true,
        };
        let lifecycle = Lifecycle::new();
        lifecycle.begin_draining();
        let (work, completion) = boxed(|counter| Ok(*counter));

        work.execute(&mut provider, &lifecycle);
        assert_eq!(completion.state(), CompletionState::Cancelled);
    }

    #[test]
    fn panicking_action_resolves_as_failed() {
        let mut provider = CounterProvider {
            counter: 0,
            available: true,
        };
        let (work, completion) = boxed::<_, ()>(|_| panic!("bad command"));

        work.execute(&mut provider, &Lifecycle::new());
        assert_eq!(completion.state(), CompletionState::Failed);
        assert_eq!(
            completion.try_take().unwrap(),
            Outcome::Panicked("bad command".to_string())
        );
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(3_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[test]
    fn cancel_skips_the_action() {
        let (work, completion) = boxed::<_, ()>(|_| panic!("must not run"));

        work.cancel();
        assert!(completion.wait().unwrap_err().is_cancelled());
    }
}
