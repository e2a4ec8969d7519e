//! ### English
//! Spin-then-yield backoff used by seqlock readers when they collide with a writer.
//!
//! ### 中文
//! seqlock 读者与写者碰撞时使用的“先自旋后让出”退避。

use std::thread;

/// ### English
/// Spins allowed before falling back to `yield_now()`.
///
/// ### 中文
/// 回退到 `yield_now()` 之前允许的自旋次数。
const SPIN_LIMIT: u32 = 32;

pub(crate) struct Backoff {
    step: u32,
}

impl Backoff {
    #[inline]
    pub(crate) fn new() -> Self {
        Self { step: 0 }
    }

    /// ### English
    /// Waits a little; the wait grows from a CPU spin hint to a scheduler yield.
    ///
    /// ### 中文
    /// 稍作等待；等待方式从 CPU 自旋提示逐步升级为让出调度。
    #[inline]
    pub(crate) fn snooze(&mut self) {
        if self.step < SPIN_LIMIT {
            for _ in 0..(1u32 << self.step.min(4)) {
                std::hint::spin_loop();
            }
        } else {
            thread::yield_now();
        }
        self.step = self.step.saturating_add(1);
    }
}
