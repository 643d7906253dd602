//! ChannelProvider port - 共有 channel へのアクセス
//!
//! Dispatcher は channel の再接続方法を知らない。
//! 「いま有効な channel に対してこの関数を実行する」ことだけを要求する。

/// Supplies a currently-valid channel and runs an action against it.
///
/// # Contract
/// - `with_channel` blocks until a valid channel exists (reconnecting
///   internally if needed), then runs `action` synchronously on the calling
///   thread and returns its result unchanged.
/// - If no channel can be produced, the provider returns its own error; the
///   dispatcher reports it exactly like an action failure.
/// - The dispatcher calls `with_channel` only from its loop thread, once per
///   executed command, so `Channel` does not need to be `Send` or `Sync`.
/// - Dropping the provider releases the channel. The dispatcher drops it
///   exactly once, when its loop exits.
pub trait ChannelProvider: Send + 'static {
    type Channel;
    type Error: std::error::Error + Send + Sync + 'static;

    fn with_channel<T, F>(&mut self, action: F) -> Result<T, Self::Error>
    where
        F: FnOnce(&mut Self::Channel) -> Result<T, Self::Error>;
}
