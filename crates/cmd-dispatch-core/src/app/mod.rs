//! App - アプリケーション層
//!
//! # 主要コンポーネント
//! - **Mailbox**: 容量 1 の受け渡し口（背圧）
//! - **DispatcherLoop**: channel に触れる唯一のスレッド
//! - **Dispatcher**: 呼び出し側の入口とライフサイクル
//! - **Completion**: 一度だけ書き込める結果の入れ物
//! - **DispatcherBuilder / DispatcherConfig**: 構築と設定

pub mod builder;
pub mod completion;
pub mod config;
pub mod dispatcher;
pub mod mailbox;

mod dispatcher_loop;
mod lifecycle;
mod work;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, DispatcherBuilder};
pub use self::completion::{Completer, Completion, CompletionObserver, Outcome, completion_pair};
pub use self::config::{ConfigError, DispatcherConfig};
pub use self::dispatcher::Dispatcher;
pub use self::mailbox::{MAILBOX_CAPACITY, Mailbox, Rejected, Take};
