//! Errors - 呼び出し側に返すエラー型
//!
//! # 分類
//! - Failed: action 自体の失敗、または channel を取得できなかった失敗（元のエラーをそのまま保持）
//! - Panicked: action か provider が panic した（Failed 扱い、メッセージだけ残る）
//! - Cancelled: shutdown によるキャンセル（Failed とは混同しない）

use thiserror::Error;

/// Error returned by the blocking and awaiting invoke variants.
///
/// `Failed` carries the error produced by the action or by the channel
/// provider unchanged; its `Display` and `source` are those of the original
/// error.
#[derive(Debug, Error)]
pub enum DispatchError<E> {
    #[error(transparent)]
    Failed(E),

    /// The action or the provider panicked; carries the panic message.
    #[error("command panicked: {0}")]
    Panicked(String),

    #[error("operation cancelled: dispatcher is shutting down")]
    Cancelled,
}

impl<E> DispatchError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DispatchError::Cancelled)
    }

    /// Recover the original error, if this is a failure.
    pub fn into_failure(self) -> Option<E> {
        match self {
            DispatchError::Failed(error) => Some(error),
            DispatchError::Panicked(_) | DispatchError::Cancelled => None,
        }
    }
}
