//! ### English
//! Mode transition state: the animated game viewport between two modes.
//!
//! The host thread advances it once per frame under a mutex; every other reader loads the
//! latest value from a lock-free [`SnapshotCell`].
//!
//! ### 中文
//! 模式过渡状态：两个模式之间动画中的游戏 viewport。
//!
//! 宿主线程每帧在互斥锁内推进一次；其余读者从无锁 [`SnapshotCell`] 读取最新值。

use std::time::{Duration, Instant};

use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;

use crate::engine::config::{TransitionConfig, TransitionStyle};
use crate::engine::geometry::{Easing, RectF};
use crate::engine::lockfree::SnapshotCell;

/// ### English
/// Plain-data view of the transition, safe to copy across threads.
///
/// ### 中文
/// 过渡状态的纯数据视图，可安全跨线程拷贝。
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TransitionSnapshot {
    /// ### English
    /// Viewport to use this frame.
    ///
    /// ### 中文
    /// 本帧使用的 viewport。
    pub current: RectF,
    pub from: RectF,
    pub to: RectF,
    /// ### English
    /// Eased progress in `0..=1`.
    ///
    /// ### 中文
    /// 缓动后的进度，取值 `0..=1`。
    pub progress: f32,
    /// ### English
    /// Linear time fraction in `0..=1`.
    ///
    /// ### 中文
    /// 线性时间比例，取值 `0..=1`。
    pub raw_progress: f32,
    pub active: u32,
    pub style: u32,
    /// ### English
    /// Incremented by every `begin`; lets readers detect a new transition.
    ///
    /// ### 中文
    /// 每次 `begin` 递增，读者据此识别新的过渡。
    pub generation: u32,
    _pad: u32,
}

impl TransitionSnapshot {
    pub fn is_active(&self) -> bool {
        self.active != 0
    }

    pub fn style(&self) -> TransitionStyle {
        TransitionStyle::from_code(self.style)
    }

    fn settled(rect: RectF, generation: u32) -> Self {
        Self {
            current: rect,
            from: rect,
            to: rect,
            progress: 1.0,
            raw_progress: 1.0,
            active: 0,
            style: TransitionStyle::Cut.code(),
            generation,
            _pad: 0,
        }
    }
}

/// ### English
/// Bounded bounce-out curve (never leaves `0..=1`).
///
/// ### 中文
/// 有界的 bounce-out 曲线（不会超出 `0..=1`）。
fn bounce_out(t: f32) -> f32 {
    const N: f32 = 7.5625;
    const D: f32 = 2.75;
    let t = t.clamp(0.0, 1.0);
    let value = if t < 1.0 / D {
        N * t * t
    } else if t < 2.0 / D {
        let t = t - 1.5 / D;
        N * t * t + 0.75
    } else if t < 2.5 / D {
        let t = t - 2.25 / D;
        N * t * t + 0.9375
    } else {
        let t = t - 2.625 / D;
        N * t * t + 0.984375
    };
    value.clamp(0.0, 1.0)
}

struct TransitionInner {
    from: RectF,
    to: RectF,
    started: Option<Instant>,
    duration: Duration,
    easing: Easing,
    style: TransitionStyle,
    from_mode: String,
    to_mode: String,
    generation: u32,
    last: TransitionSnapshot,
}

impl TransitionInner {
    fn sample(&self, now: Instant) -> TransitionSnapshot {
        let Some(started) = self.started else {
            return TransitionSnapshot::settled(self.to, self.generation);
        };

        let raw = if self.duration.is_zero() {
            1.0
        } else {
            (now.saturating_duration_since(started).as_secs_f32() / self.duration.as_secs_f32())
                .clamp(0.0, 1.0)
        };
        if raw >= 1.0 {
            return TransitionSnapshot::settled(self.to, self.generation);
        }

        let progress = match self.style {
            TransitionStyle::Bounce => bounce_out(raw),
            _ => self.easing.apply(raw),
        };
        let current = match self.style {
            // Full-size viewport sliding into place.
            TransitionStyle::Slide => {
                let moved = RectF::lerp(self.from, self.to, progress);
                RectF::new(moved.x, moved.y, self.to.width, self.to.height)
            }
            _ => RectF::lerp(self.from, self.to, progress),
        };

        TransitionSnapshot {
            current,
            from: self.from,
            to: self.to,
            progress,
            raw_progress: raw,
            active: 1,
            style: self.style.code(),
            generation: self.generation,
            _pad: 0,
        }
    }
}

/// ### English
/// Owner of the mode transition state.
///
/// ### 中文
/// 模式过渡状态的持有者。
pub struct TransitionController {
    inner: Mutex<TransitionInner>,
    snapshot: SnapshotCell<TransitionSnapshot>,
}

impl TransitionController {
    pub fn new(initial: RectF, mode_id: &str) -> Self {
        let settled = TransitionSnapshot::settled(initial, 0);
        Self {
            inner: Mutex::new(TransitionInner {
                from: initial,
                to: initial,
                started: None,
                duration: Duration::ZERO,
                easing: Easing::Linear,
                style: TransitionStyle::Cut,
                from_mode: mode_id.to_string(),
                to_mode: mode_id.to_string(),
                generation: 0,
                last: settled,
            }),
            snapshot: SnapshotCell::new(settled),
        }
    }

    /// ### English
    /// Starts a transition from the current animated viewport towards `target`.
    ///
    /// A `Cut` (or zero duration) settles immediately.
    ///
    /// ### 中文
    /// 从当前动画 viewport 开始向 `target` 过渡。
    ///
    /// `Cut`（或时长为 0）会立即到位。
    pub fn begin(&self, target: RectF, to_mode: &str, config: &TransitionConfig, now: Instant) {
        let mut inner = self.inner.lock();
        let start_rect = inner.sample(now).current;
        inner.generation = inner.generation.wrapping_add(1);
        let previous_mode = std::mem::replace(&mut inner.to_mode, to_mode.to_string());
        inner.from_mode = previous_mode;
        inner.from = start_rect;
        inner.to = target;
        inner.style = config.style;
        inner.easing = config.easing;
        inner.duration = config.duration();
        inner.started = (config.style != TransitionStyle::Cut && !inner.duration.is_zero())
            .then_some(now);

        let snapshot = inner.sample(now);
        inner.last = snapshot;
        self.snapshot.store(snapshot);
        log::debug!(
            "mode transition {} -> {} ({:?}, {:?})",
            inner.from_mode,
            inner.to_mode,
            inner.style,
            inner.duration
        );
    }

    /// ### English
    /// Replaces the resting viewport without animating (screen resize, dimension change).
    ///
    /// ### 中文
    /// 不经动画直接替换静止 viewport（屏幕尺寸或模式尺寸变化）。
    pub fn set_target(&self, target: RectF, now: Instant) {
        let mut inner = self.inner.lock();
        if inner.to == target {
            return;
        }
        inner.to = target;
        let snapshot = inner.sample(now);
        inner.last = snapshot;
        self.snapshot.store(snapshot);
    }

    /// ### English
    /// Advances the animation to `now` and publishes the new snapshot. Called once per host frame.
    ///
    /// ### 中文
    /// 将动画推进到 `now` 并发布新快照；每个宿主帧调用一次。
    pub fn advance(&self, now: Instant) -> TransitionSnapshot {
        let mut inner = self.inner.lock();
        let snapshot = inner.sample(now);
        if !snapshot.is_active() {
            inner.started = None;
            inner.from = inner.to;
        }
        if snapshot != inner.last {
            inner.last = snapshot;
            self.snapshot.store(snapshot);
        }
        snapshot
    }

    /// ### English
    /// Lock-free read of the last published state.
    ///
    /// ### 中文
    /// 无锁读取最近发布的状态。
    pub fn snapshot(&self) -> TransitionSnapshot {
        self.snapshot.load()
    }

    /// ### English
    /// `(from_mode, to_mode)` of the latest transition.
    ///
    /// ### 中文
    /// 最近一次过渡的 `(from_mode, to_mode)`。
    pub fn modes(&self) -> (String, String) {
        let inner = self.inner.lock();
        (inner.from_mode.clone(), inner.to_mode.clone())
    }

    pub fn current_mode(&self) -> String {
        self.inner.lock().to_mode.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(style: TransitionStyle, ms: u32) -> TransitionConfig {
        TransitionConfig {
            style,
            duration_ms: ms,
            easing: Easing::Linear,
            slide_mirrors: false,
        }
    }

    #[test]
    fn bounce_curve_is_bounded_with_exact_ends() {
        assert_eq!(bounce_out(0.0), 0.0);
        assert_eq!(bounce_out(1.0), 1.0);
        for step in 0..=100 {
            let v = bounce_out(step as f32 / 100.0);
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn transition_hits_endpoints_and_settles() {
        let a = RectF::new(0.0, 0.0, 1920.0, 1080.0);
        let b = RectF::new(768.0, -7652.0, 384.0, 16384.0);
        let controller = TransitionController::new(a, "normal");
        let t0 = Instant::now();
        controller.begin(b, "thin", &config(TransitionStyle::Bounce, 100), t0);

        let start = controller.advance(t0);
        assert!(start.is_active());
        assert_eq!(start.current, a);

        let mid = controller.advance(t0 + Duration::from_millis(40));
        assert!(mid.current.width <= a.width && mid.current.width >= b.width);
        assert!(mid.current.height >= a.height && mid.current.height <= b.height);

        let end = controller.advance(t0 + Duration::from_millis(100));
        assert!(!end.is_active());
        assert_eq!(end.current, b);
        assert_eq!(controller.snapshot(), end);
        assert_eq!(controller.modes(), ("normal".into(), "thin".into()));
    }

    #[test]
    fn cut_settles_immediately() {
        let a = RectF::new(0.0, 0.0, 100.0, 100.0);
        let b = RectF::new(10.0, 10.0, 50.0, 50.0);
        let controller = TransitionController::new(a, "a");
        controller.begin(b, "b", &config(TransitionStyle::Cut, 500), Instant::now());
        let snapshot = controller.snapshot();
        assert!(!snapshot.is_active());
        assert_eq!(snapshot.current, b);
        assert_eq!(snapshot.generation, 1);
    }

    #[test]
    fn slide_keeps_target_size() {
        let a = RectF::new(0.0, 0.0, 100.0, 100.0);
        let b = RectF::new(200.0, 0.0, 50.0, 80.0);
        let controller = TransitionController::new(a, "a");
        let t0 = Instant::now();
        controller.begin(b, "b", &config(TransitionStyle::Slide, 100), t0);
        let mid = controller.advance(t0 + Duration::from_millis(50));
        assert_eq!((mid.current.width, mid.current.height), (50.0, 80.0));
        assert!(mid.current.x > 0.0 && mid.current.x < 200.0);
    }
}
