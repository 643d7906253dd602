//! Ports - 抽象化レイヤー
//!
//! Dispatcher が外部に要求するインターフェースを定義します。
//! 接続の回復やブローカープロトコルの詳細は実装側に閉じ込めます。

pub mod channel_provider;

pub use self::channel_provider::ChannelProvider;
