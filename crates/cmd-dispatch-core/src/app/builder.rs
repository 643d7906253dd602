//! DispatcherBuilder - dispatcher の構築
//!
//! # 起動時検証（Fail-fast）
//! - name が空なら BuildError::EmptyName
//! - thread 名に NUL が含まれていれば BuildError::InvalidThreadName
//! - スレッド起動に失敗すれば BuildError::Spawn

use super::config::DispatcherConfig;
use super::dispatcher::Dispatcher;
use crate::ports::ChannelProvider;

/// BuildError は dispatcher 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("dispatcher name must not be empty")]
    EmptyName,

    #[error("invalid thread name {0:?}: must be non-empty and contain no NUL bytes")]
    InvalidThreadName(String),

    #[error("failed to spawn dispatcher thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Builds a [`Dispatcher`] around a channel provider.
///
/// # 使用例
/// ```ignore
/// let dispatcher = DispatcherBuilder::new(provider)
///     .name("orders")
///     .build()?;
/// ```
pub struct DispatcherBuilder<P> {
    provider: P,
    config: DispatcherConfig,
}

impl<P: ChannelProvider> DispatcherBuilder<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            config: DispatcherConfig::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.config.thread_name = Some(thread_name.into());
        self
    }

    /// Replace the whole configuration (e.g. one loaded from JSON).
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the configuration and start the loop thread.
    pub fn build(self) -> Result<Dispatcher<P>, BuildError> {
        if self.config.name.trim().is_empty() {
            return Err(BuildError::EmptyName);
        }
        let thread_name = self.config.thread_name();
        if thread_name.is_empty() || thread_name.contains('\0') {
            return Err(BuildError::InvalidThreadName(thread_name));
        }
        Dispatcher::spawn(self.config, self.provider)
    }
}
