//! ### English
//! Coordination thread: fixed-rate bookkeeping that keeps the host frame O(1).
//!
//! Screen metrics, the resting viewport, the active-mirror list, pending mode and dimension
//! changes and queued config commands are all refreshed here at about 60 Hz, so the host thread
//! and the capture thread only ever read precomputed values.
//!
//! ### 中文
//! 协调线程：以固定频率执行簿记工作，使宿主帧保持 O(1)。
//!
//! 屏幕尺寸、静止 viewport、活动镜像列表、待处理的模式与尺寸变更以及排队的配置命令都在这里
//! 以约 60 Hz 刷新，宿主线程与捕获线程只读取预先计算好的值。

mod hooks;
mod state;
mod tick;

pub use hooks::{GameState, GameStateSource, PlatformHooks, ReportedHooks};
pub use state::{ActiveMirrors, CoordinationState, DimensionChange, ScreenMetrics, ViewportCache};
pub use tick::{Coordinator, TickReport};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::engine::error::OverlayError;

/// ### English
/// Fixed-cadence deadline tracker. Falls back to "now + interval" after a stall instead of
/// running a burst of catch-up ticks.
///
/// ### 中文
/// 固定节奏的截止时间跟踪器。卡顿后回退为“当前时间 + 间隔”，而不是连续补跑多个 tick。
#[derive(Clone, Copy, Debug)]
pub struct TickPacer {
    interval: Duration,
    next: Instant,
}

impl TickPacer {
    pub fn new(hz: u32, start: Instant) -> Self {
        let interval = Duration::from_secs(1) / hz.max(1);
        Self {
            interval,
            next: start + interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// ### English
    /// Time left until the next tick is due, advancing the deadline.
    ///
    /// ### 中文
    /// 距下一个 tick 到期的剩余时间，同时推进截止时间。
    pub fn remaining(&mut self, now: Instant) -> Duration {
        let wait = self.next.saturating_duration_since(now);
        self.next = if now > self.next {
            now + self.interval
        } else {
            self.next + self.interval
        };
        wait
    }
}

/// ### English
/// Running coordination thread. Dropping it stops and joins the thread.
///
/// ### 中文
/// 运行中的协调线程；drop 时停止并 join 该线程。
pub struct CoordinationThread {
    should_stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CoordinationThread {
    pub fn start(mut coordinator: Coordinator, hz: u32) -> Result<Self, OverlayError> {
        let should_stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let should_stop = should_stop.clone();
            thread::Builder::new()
                .name("xian-overlay-logic".to_string())
                .spawn(move || {
                    log::info!("coordination thread started");
                    let mut pacer = TickPacer::new(hz, Instant::now());
                    while !should_stop.load(Ordering::Acquire) {
                        coordinator.tick(Instant::now());
                        let wait = pacer.remaining(Instant::now());
                        if !wait.is_zero() && !should_stop.load(Ordering::Acquire) {
                            thread::park_timeout(wait);
                        }
                    }
                    log::info!("coordination thread stopped");
                })?
        };
        Ok(Self {
            should_stop,
            thread: Some(thread),
        })
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.should_stop.store(true, Ordering::Release);
        thread.thread().unpark();
        if thread.join().is_err() {
            log::error!("coordination thread panicked");
        }
    }
}

impl Drop for CoordinationThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
