//! ### English
//! GUI toggles and toasts set from any thread and sampled by the host thread each frame.
//!
//! ### 中文
//! 可由任意线程设置、由宿主线程每帧采样的 GUI 开关与提示。

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::engine::compositor::{GuiFlags, Toast};
use crate::engine::config::DebugConfig;

const TOAST_HOLD: Duration = Duration::from_millis(2000);
const TOAST_FADE: Duration = Duration::from_millis(500);

#[derive(Default)]
pub struct HostUi {
    settings_open: AtomicBool,
    toast: Mutex<Option<(String, Instant)>>,
}

impl HostUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_settings_open(&self, open: bool) {
        self.settings_open.store(open, Ordering::Release);
    }

    pub fn settings_open(&self) -> bool {
        self.settings_open.load(Ordering::Acquire)
    }

    /// ### English
    /// Shows `text` for two seconds, then fades it out. Replaces any visible toast.
    ///
    /// ### 中文
    /// 显示 `text` 两秒后淡出；会替换当前可见的提示。
    pub fn show_toast(&self, text: &str, now: Instant) {
        *self.toast.lock() = Some((text.to_string(), now));
    }

    /// ### English
    /// GUI flags for a frame at `now`; expired toasts are cleared.
    ///
    /// ### 中文
    /// 生成 `now` 时刻一帧的 GUI 标志；已过期的提示会被清除。
    pub fn sample(&self, debug: &DebugConfig, now: Instant) -> GuiFlags {
        let toast = {
            let mut slot = self.toast.lock();
            let toast = slot.as_ref().and_then(|(text, shown)| {
                let opacity = toast_opacity(now.saturating_duration_since(*shown));
                (opacity > 0.0).then(|| Toast {
                    text: text.clone(),
                    opacity,
                })
            });
            if toast.is_none() {
                *slot = None;
            }
            toast
        };
        GuiFlags {
            settings_open: self.settings_open(),
            performance_overlay: debug.show_performance_overlay,
            profiler: debug.show_profiler,
            toast,
        }
    }
}

fn toast_opacity(age: Duration) -> f32 {
    if age <= TOAST_HOLD {
        return 1.0;
    }
    let fading = age - TOAST_HOLD;
    if fading >= TOAST_FADE {
        0.0
    } else {
        1.0 - fading.as_secs_f32() / TOAST_FADE.as_secs_f32()
    }
}
