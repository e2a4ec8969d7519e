//! ### English
//! Per-mirror update rate limiter.
//!
//! ### 中文
//! 单个镜像的更新频率限制器。

use std::time::{Duration, Instant};

/// ### English
/// Decides whether a mirror may run its capture pass at `now`.
///
/// `fps <= 0` means unthrottled. A forced update (after a resize) always passes once, and so does
/// the first throttled call after running unthrottled.
///
/// ### 中文
/// 判断镜像在 `now` 时刻是否可以执行捕获流程。
///
/// `fps <= 0` 表示不限速；强制更新（resize 之后）总会放行一次，从不限速切换为限速后的
/// 第一次调用也会放行。
#[derive(Clone, Copy, Debug, Default)]
pub struct FpsThrottle {
    last: Option<Instant>,
    force: bool,
}

impl FpsThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn force(&mut self) {
        self.force = true;
    }

    pub fn interval(fps: i32) -> Option<Duration> {
        (fps > 0).then(|| Duration::from_nanos(1_000_000_000 / fps as u64))
    }

    /// ### English
    /// Returns `true` and records `now` when an update is due.
    ///
    /// ### 中文
    /// 需要更新时返回 `true` 并记录 `now`。
    pub fn should_update(&mut self, fps: i32, now: Instant) -> bool {
        let Some(interval) = Self::interval(fps) else {
            // Unthrottled updates leave no timestamp behind.
            self.force = false;
            self.last = None;
            return true;
        };
        let due = match (self.force, self.last) {
            (true, _) | (_, None) => true,
            (false, Some(last)) => now.saturating_duration_since(last) >= interval,
        };
        if due {
            self.force = false;
            self.last = Some(now);
        }
        due
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_fps_over_one_second_of_millisecond_ticks() {
        let start = Instant::now();
        let mut throttle = FpsThrottle::new();
        let updates = (0..1000u64)
            .filter(|tick| throttle.should_update(10, start + Duration::from_millis(*tick)))
            .count();
        assert!((9..=11).contains(&updates), "updates = {updates}");
    }

    #[test]
    fn unthrottled_and_forced_updates() {
        let now = Instant::now();
        let mut throttle = FpsThrottle::new();
        assert!(throttle.should_update(0, now));
        assert!(throttle.should_update(-1, now));

        assert!(throttle.should_update(1, now));
        assert!(!throttle.should_update(1, now + Duration::from_millis(10)));
        throttle.force();
        assert!(throttle.should_update(1, now + Duration::from_millis(20)));
        assert!(!throttle.should_update(1, now + Duration::from_millis(30)));
    }

    #[test]
    fn throttling_resumes_after_an_unthrottled_stretch() {
        let now = Instant::now();
        let mut throttle = FpsThrottle::new();
        assert!(throttle.should_update(30, now));
        assert!(throttle.should_update(0, now + Duration::from_millis(1)));
        assert!(throttle.should_update(30, now + Duration::from_millis(2)));
        assert!(!throttle.should_update(30, now + Duration::from_millis(3)));
        assert!(throttle.should_update(30, now + Duration::from_millis(40)));
    }
}
