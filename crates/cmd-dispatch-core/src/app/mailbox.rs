//! Mailbox - producer と dispatcher loop の間の受け渡し口
//!
//! # 設計
//! - 容量は 1 固定（2 件目を入れようとした producer は 1 件目が取り出されるまで待つ）
//! - Mutex + Condvar による blocking put / take
//! - close() で待機中の producer と consumer を全員起こす

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Number of commands the mailbox holds before producers block.
pub const MAILBOX_CAPACITY: usize = 1;

/// An item the mailbox refused because it was closed.
///
/// The caller gets the item back and must resolve it (cancel) itself.
#[derive(Debug)]
pub struct Rejected<T>(pub T);

/// Result of [`Mailbox::take`].
#[derive(Debug)]
pub enum Take<T> {
    /// Next item in insertion order.
    Item(T),

    /// The mailbox is closed and empty.
    Stop,
}

struct MailboxState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Single-slot FIFO hand-off between many producers and one consumer.
pub struct Mailbox<T> {
    state: Mutex<MailboxState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MailboxState {
                items: VecDeque::with_capacity(MAILBOX_CAPACITY),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    // Nothing panics while the lock is held, so a poisoned state is still consistent.
    fn lock(&self) -> MutexGuard<'_, MailboxState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert an item, blocking while the slot is occupied.
    ///
    /// Returns the item back as [`Rejected`] if the mailbox is closed before
    /// (or while) waiting for the slot.
    pub fn put(&self, item: T) -> Result<(), Rejected<T>> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(Rejected(item));
            }
            if state.items.len() < MAILBOX_CAPACITY {
                state.items.push_back(item);
                drop(state);
                self.not_empty.notify_one();
                return Ok(());
            }
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Remove the next item, blocking while the mailbox is empty.
    ///
    /// Items still present when the mailbox is closed are handed out before
    /// `Take::Stop`, so the consumer can resolve every one of them.
    pub fn take(&self) -> Take<T> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Take::Item(item);
            }
            if state.closed {
                return Take::Stop;
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Close the mailbox and wake every waiter.
    ///
    /// Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn put_then_take_returns_item() {
        let mailbox = Mailbox::new();
        mailbox.put(7).unwrap();
        assert_eq!(mailbox.len(), 1);
        assert!(matches!(mailbox.take(), Take::Item(7)));
        assert!(mailbox.is_empty());
    }

    #[test]
    fn second_put_blocks_until_slot_is_taken() {
        let mailbox = Arc::new(Mailbox::new());
        mailbox.put(1).unwrap();

        let second_done = Arc::new(AtomicBool::new(false));
        let producer = thread::spawn({
            let mailbox = Arc::clone(&mailbox);
            let second_done = Arc::clone(&second_done);
            move || {
                mailbox.put(2).unwrap();
                second_done.store(true, Ordering::SeqCst);
            }
        });

        thread::sleep(Duration::from_millis(100));
        assert!(!second_done.load(Ordering::SeqCst), "capacity is one");

        assert!(matches!(mailbox.take(), Take::Item(1)));
        producer.join().unwrap();
        assert!(second_done.load(Ordering::SeqCst));
        assert!(matches!(mailbox.take(), Take::Item(2)));
    }

    #[test]
    fn single_producer_order_is_preserved() {
        let mailbox = Arc::new(Mailbox::new());
        let producer = thread::spawn({
            let mailbox = Arc::clone(&mailbox);
            move || {
                for i in 0..50 {
                    mailbox.put(i).unwrap();
                }
                mailbox.close();
            }
        });

        let mut seen = Vec::new();
        while let Take::Item(i) = mailbox.take() {
            seen.push(i);
        }
        producer.join().unwrap();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let mailbox: Arc<Mailbox<u32>> = Arc::new(Mailbox::new());
        let consumer = thread::spawn({
            let mailbox = Arc::clone(&mailbox);
            move || mailbox.take()
        });

        thread::sleep(Duration::from_millis(50));
        assert!(mailbox.close());
        assert!(matches!(consumer.join().unwrap(), Take::Stop));
    }

    #[test]
    fn close_rejects_blocked_producer() {
        let mailbox = Arc::new(Mailbox::new());
        mailbox.put("first").unwrap();

        let producer = thread::spawn({
            let mailbox = Arc::clone(&mailbox);
            move || mailbox.put("second")
        });

        thread::sleep(Duration::from_millis(50));
        mailbox.close();

        let Err(Rejected(item)) = producer.join().unwrap() else {
            panic!("blocked put must be rejected on close");
        };
        assert_eq!(item, "second");
    }

    #[test]
    fn items_queued_before_close_are_still_handed_out() {
        let mailbox = Mailbox::new();
        mailbox.put(42).unwrap();
        mailbox.close();

        assert!(matches!(mailbox.take(), Take::Item(42)));
        assert!(matches!(mailbox.take(), Take::Stop));
    }

    #[test]
    fn put_after_close_is_rejected_and_close_is_idempotent() {
        let mailbox = Mailbox::new();
        assert!(mailbox.close());
        assert!(!mailbox.close());
        assert!(mailbox.is_closed());
        assert!(matches!(mailbox.put(1), Err(Rejected(1))));
    }
}
