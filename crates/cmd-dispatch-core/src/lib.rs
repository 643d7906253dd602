//! cmd-dispatch-core
//!
//! Serializes access to one shared, non-thread-safe broker channel.
//!
//! Many callers submit "do something with the channel" commands; a single
//! dedicated thread runs them one at a time, in submission order, and
//! resolves each caller's completion handle with the result.
//!
//! # モジュール構成
//! - **domain**: 状態と呼び出し側のエラー（DispatcherState, CompletionState, DispatchError）
//! - **ports**: 外部への要求（ChannelProvider）
//! - **app**: Mailbox, DispatcherLoop, Dispatcher, Completion, Builder / Config
//! - **impls**: 開発用の実装（InMemoryChannelProvider）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{
    BuildError, Completion, CompletionObserver, Dispatcher, DispatcherBuilder, DispatcherConfig,
    Outcome,
};
pub use domain::{CompletionState, DispatchError, DispatcherState};
pub use ports::ChannelProvider;
