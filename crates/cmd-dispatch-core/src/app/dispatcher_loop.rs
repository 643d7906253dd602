//! DispatcherLoop - channel に触れる唯一の実行コンテキスト
//!
//! # フロー
//! 1. Mailbox::take() で次のコマンドを取得（Stop なら終了）
//! 2. shutdown 要求済みなら実行せずに cancel
//! 3. ChannelProvider 経由で action を実行し、結果を completion に書き込む（panic は失敗として書く）
//! 4. 終了時に provider を drop（channel の解放は 1 回だけ）

use std::sync::Arc;

use tracing::{info, info_span};

use super::lifecycle::Lifecycle;
use super::mailbox::{Mailbox, Take};
use super::work::BoxedWork;
use crate::ports::ChannelProvider;

/// Everything the loop thread owns for the dispatcher's lifetime.
pub(crate) struct DispatcherLoop<P: ChannelProvider> {
    name: String,
    provider: P,
    mailbox: Arc<Mailbox<BoxedWork<P>>>,
    lifecycle: Arc<Lifecycle>,
}

impl<P: ChannelProvider> DispatcherLoop<P> {
    pub(crate) fn new(
        name: String,
        provider: P,
        mailbox: Arc<Mailbox<BoxedWork<P>>>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            name,
            provider,
            mailbox,
            lifecycle,
        }
    }

    /// Run until the mailbox is closed and drained.
    pub(crate) fn run(self) {
        let DispatcherLoop {
            name,
            mut provider,
            mailbox,
            lifecycle,
        } = self;

        let span = info_span!("dispatcher", name = %name);
        let _entered = span.enter();
        info!("dispatcher loop started");

        let mut executed: u64 = 0;
        let mut cancelled: u64 = 0;

        loop {
            let work = match mailbox.take() {
                Take::Item(work) => work,
                Take::Stop => break,
            };

            // 取り出しと shutdown 要求が競合した場合は実行しない
            if lifecycle.is_shutdown_requested() {
                work.cancel();
                cancelled += 1;
                continue;
            }

            work.execute(&mut provider, &lifecycle);
            executed += 1;
        }

        drop(provider);
        lifecycle.mark_stopped();
        info!(executed, cancelled, "dispatcher loop stopped");
    }
}
