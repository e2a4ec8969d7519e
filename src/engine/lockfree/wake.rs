//! ### English
//! Coalesced unpark for a polling worker thread.
//!
//! ### 中文
//! 面向轮询工作线程的合并 unpark。

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::Thread;

use parking_lot::RwLock;

/// ### English
/// Wakes an attached thread at most once per drain, avoiding unpark storms from a hot producer.
///
/// ### 中文
/// 每次 drain 最多唤醒一次已绑定的线程，避免热路径生产者造成 unpark 风暴。
#[derive(Default)]
pub struct ThreadWaker {
    pending: AtomicBool,
    thread: RwLock<Option<Thread>>,
}

impl ThreadWaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, thread: Thread) {
        *self.thread.write() = Some(thread);
    }

    pub fn detach(&self) {
        self.thread.write().take();
        self.pending.store(false, Ordering::Relaxed);
    }

    /// ### English
    /// Marks work pending; only the first call since the last [`Self::take`] unparks.
    ///
    /// ### 中文
    /// 标记有待处理工作；自上次 [`Self::take`] 以来只有第一次调用会 unpark。
    #[inline]
    pub fn wake(&self) {
        if !self.pending.swap(true, Ordering::Release) {
            if let Some(thread) = self.thread.read().as_ref() {
                thread.unpark();
            }
        }
    }

    /// ### English
    /// Clears and returns the pending flag. Called by the attached thread.
    ///
    /// ### 中文
    /// 清除并返回 pending 标记；由已绑定的线程调用。
    #[inline]
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wakes_coalesce_until_taken() {
        let waker = ThreadWaker::new();
        waker.attach(std::thread::current());
        waker.wake();
        waker.wake();
        assert!(waker.take());
        assert!(!waker.take());
        waker.detach();
        waker.wake();
        assert!(waker.take());
    }
}
