//! ### English
//! Startup handshake between a spawning thread and a freshly spawned worker.
//!
//! The capture and compositor threads create their GL context before reporting back; the caller of
//! `start` parks here until the worker sends `Ok(())` or its context error. A worker that reports
//! after the caller gave up leaves the value behind, and it is dropped with the handshake.
//!
//! ### 中文
//! 创建方线程与新启动工作线程之间的启动握手。
//!
//! 捕获线程与合成线程会先创建各自的 GL 上下文再回报；`start` 的调用方在此 park，直到工作线程
//! 发送 `Ok(())` 或上下文错误。若工作线程在调用方放弃等待后才回报，该值会留在握手对象中，
//! 随其一同释放。

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const READY: u8 = 2;
const TAKEN: u8 = 3;

/// ### English
/// Single-use slot carrying a worker's init result to the thread that spawned it.
///
/// `waiter` is the spawning thread; `send` unparks it.
///
/// ### 中文
/// 一次性槽位：把工作线程的初始化结果带回创建它的线程。
///
/// `waiter` 为创建方线程；`send` 会将其 unpark。
pub(crate) struct OneShot<T> {
    /// `EMPTY -> WRITING -> READY -> TAKEN`; only `send` leaves `EMPTY`.
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
    waiter: thread::Thread,
}

// SAFETY: `value` is written once by the `EMPTY -> WRITING` winner and read once by the
// `READY -> TAKEN` winner (or by `Drop`).
unsafe impl<T: Send> Send for OneShot<T> {}
unsafe impl<T: Send> Sync for OneShot<T> {}

impl<T> OneShot<T> {
    #[inline]
    pub(crate) fn new(waiter: thread::Thread) -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
            waiter,
        }
    }

    /// ### English
    /// Reports the init result. Only the first report counts; later ones return `false`.
    ///
    /// ### 中文
    /// 回报初始化结果。只有第一次回报生效，之后返回 `false`。
    pub(crate) fn send(&self, value: T) -> bool {
        let claimed = self
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();
        if claimed {
            unsafe {
                (*self.value.get()).write(value);
            }
            self.state.store(READY, Ordering::Release);
            self.waiter.unpark();
        }
        claimed
    }

    #[inline]
    pub(crate) fn try_recv(&self) -> Option<T> {
        match self
            .state
            .compare_exchange(READY, TAKEN, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => Some(unsafe { (*self.value.get()).assume_init_read() }),
            Err(_) => None,
        }
    }

    /// ### English
    /// Waits for the worker's report. `None` means the worker did not report in time; the caller
    /// then stops and joins it.
    ///
    /// Spurious unparks only cost another check.
    ///
    /// ### 中文
    /// 等待工作线程回报。返回 `None` 表示未在时限内回报，调用方随后停止并 join 该线程。
    ///
    /// 虚假唤醒只会多做一次检查。
    pub(crate) fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(value) = self.try_recv() {
                return Some(value);
            }
            thread::park_timeout(deadline.saturating_duration_since(Instant::now()));
        }
        self.try_recv()
    }
}

impl<T> Drop for OneShot<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == READY {
            unsafe {
                self.value.get_mut().assume_init_drop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn worker_reports_once() {
        let init = Arc::new(OneShot::new(thread::current()));
        let worker = init.clone();
        let handle = thread::spawn(move || {
            assert!(worker.send(Ok::<(), String>(())));
            assert!(!worker.send(Err("second report".to_string())));
        });
        assert_eq!(init.recv_timeout(Duration::from_secs(5)), Some(Ok(())));
        handle.join().expect("worker");
        assert_eq!(init.try_recv(), None);
    }

    #[test]
    fn silent_worker_times_out() {
        let init = OneShot::<()>::new(thread::current());
        assert_eq!(init.recv_timeout(Duration::from_millis(5)), None);
    }

    #[test]
    fn late_report_is_dropped_with_the_handshake() {
        let payload = Arc::new(());
        let init = OneShot::new(thread::current());
        assert_eq!(init.recv_timeout(Duration::ZERO), None);
        assert!(init.send(payload.clone()));
        assert_eq!(Arc::strong_count(&payload), 2);
        drop(init);
        assert_eq!(Arc::strong_count(&payload), 1);
    }
}
