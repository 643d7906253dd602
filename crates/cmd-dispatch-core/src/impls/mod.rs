//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryChannelProvider**: 操作を記録するだけの開発用 channel
//!
//! 本物のブローカー接続（再接続・認証・プロトコル）は別クレートに置きます。

pub mod inmem_channel;

// 主要な型を再エクスポート
pub use self::inmem_channel::{
    ChannelError, ChannelOp, ConnectionId, InMemoryChannel, InMemoryChannelProvider, Journal,
    JournalEntry,
};
