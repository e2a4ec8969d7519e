//! ### English
//! State the coordination thread computes and everyone else reads.
//!
//! ### 中文
//! 协调线程计算、其它线程读取的状态。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use bytemuck::{Pod, Zeroable};
use dpi::PhysicalSize;
use parking_lot::Mutex;

use crate::engine::geometry::RectF;
use crate::engine::lockfree::{SnapshotCell, VersionedArc};

use super::hooks::GameState;

/// ### English
/// Host window metrics.
///
/// ### 中文
/// 宿主窗口尺寸信息。
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ScreenMetrics {
    pub width: u32,
    pub height: u32,
}

impl ScreenMetrics {
    pub fn new(size: PhysicalSize<u32>) -> Self {
        Self {
            width: size.width,
            height: size.height,
        }
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        PhysicalSize::new(self.width, self.height)
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// ### English
/// Resting viewport of the current mode on the current screen.
///
/// ### 中文
/// 当前模式在当前屏幕上的静止 viewport。
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ViewportCache {
    pub screen_width: u32,
    pub screen_height: u32,
    pub viewport: RectF,
    /// ### English
    /// `0` until the first computation.
    ///
    /// ### 中文
    /// 首次计算前为 `0`。
    pub valid: u32,
    _pad: u32,
}

impl ViewportCache {
    pub fn new(screen: PhysicalSize<u32>, viewport: RectF) -> Self {
        Self {
            screen_width: screen.width,
            screen_height: screen.height,
            viewport,
            valid: 1,
            _pad: 0,
        }
    }

    pub fn screen(&self) -> PhysicalSize<u32> {
        PhysicalSize::new(self.screen_width, self.screen_height)
    }

    pub fn is_valid(&self) -> bool {
        self.valid != 0
    }
}

/// ### English
/// Mirrors shown by the current mode, recomputed only when the mode or config version changes.
///
/// ### 中文
/// 当前模式展示的镜像，仅在模式或配置版本变化时重新计算。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActiveMirrors {
    pub mode_id: String,
    pub config_version: u64,
    pub names: Vec<String>,
}

/// ### English
/// Deferred change of one mode's dimensions.
///
/// ### 中文
/// 延迟应用的模式尺寸变更。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DimensionChange {
    pub mode_id: String,
    pub width: u32,
    pub height: u32,
}

/// ### English
/// Shared coordination outputs and pending requests.
///
/// ### 中文
/// 共享的协调输出与待处理请求。
pub struct CoordinationState {
    screen: SnapshotCell<ScreenMetrics>,
    screen_dirty: AtomicBool,
    viewport: SnapshotCell<ViewportCache>,
    active_mirrors: VersionedArc<ActiveMirrors>,
    pending_mode: Mutex<Option<String>>,
    pending_dimensions: Mutex<Option<DimensionChange>>,
    overlay_hook_present: AtomicBool,
    borderless_applied: AtomicBool,
    ticks: AtomicU64,
    /// ### English
    /// Host framebuffer size as last reported by the host thread, packed `width << 32 | height`.
    ///
    /// ### 中文
    /// 宿主线程最近报告的 framebuffer 尺寸，打包为 `width << 32 | height`。
    reported_screen: AtomicU64,
    reported_game_state: AtomicU32,
}

impl Default for CoordinationState {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinationState {
    pub fn new() -> Self {
        Self {
            screen: SnapshotCell::new(ScreenMetrics::default()),
            screen_dirty: AtomicBool::new(true),
            viewport: SnapshotCell::new(ViewportCache::default()),
            active_mirrors: VersionedArc::new(ActiveMirrors::default()),
            pending_mode: Mutex::new(None),
            pending_dimensions: Mutex::new(None),
            overlay_hook_present: AtomicBool::new(false),
            borderless_applied: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
            reported_screen: AtomicU64::new(0),
            reported_game_state: AtomicU32::new(GameState::Unknown.code()),
        }
    }

    /// ### English
    /// Asks the next tick to re-read screen metrics (window resized or moved).
    ///
    /// ### 中文
    /// 请求下一个 tick 重新读取屏幕尺寸（窗口缩放或移动）。
    #[inline]
    pub fn mark_screen_dirty(&self) {
        self.screen_dirty.store(true, Ordering::Release);
    }

    /// ### English
    /// Records the host framebuffer size; marks the screen dirty only when it changed. Cheap
    /// enough to call every host frame.
    ///
    /// ### 中文
    /// 记录宿主 framebuffer 尺寸；仅在变化时标记屏幕为 dirty。开销足够小，可每个宿主帧调用。
    pub fn report_screen(&self, size: PhysicalSize<u32>) {
        let packed = (u64::from(size.width) << 32) | u64::from(size.height);
        if self.reported_screen.swap(packed, Ordering::AcqRel) != packed {
            self.mark_screen_dirty();
        }
    }

    pub fn reported_screen(&self) -> Option<PhysicalSize<u32>> {
        let packed = self.reported_screen.load(Ordering::Acquire);
        let size = PhysicalSize::new((packed >> 32) as u32, packed as u32);
        (size.width > 0 && size.height > 0).then_some(size)
    }

    pub fn report_game_state(&self, state: GameState) {
        self.reported_game_state.store(state.code(), Ordering::Release);
    }

    pub fn reported_game_state(&self) -> GameState {
        GameState::from_code(self.reported_game_state.load(Ordering::Acquire))
    }

    pub(crate) fn take_screen_dirty(&self) -> bool {
        self.screen_dirty.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn screen(&self) -> ScreenMetrics {
        self.screen.load()
    }

    pub(crate) fn store_screen(&self, metrics: ScreenMetrics) {
        self.screen.store(metrics);
    }

    #[inline]
    pub fn viewport(&self) -> ViewportCache {
        self.viewport.load()
    }

    pub(crate) fn store_viewport(&self, cache: ViewportCache) {
        self.viewport.store(cache);
    }

    pub fn active_mirrors(&self) -> Arc<ActiveMirrors> {
        self.active_mirrors.get()
    }

    #[inline]
    pub fn active_mirrors_version(&self) -> u64 {
        self.active_mirrors.version()
    }

    pub(crate) fn publish_active_mirrors(&self, active: ActiveMirrors) -> u64 {
        self.active_mirrors.publish(active)
    }

    /// ### English
    /// Queues a mode switch; a newer request replaces an unapplied one.
    ///
    /// ### 中文
    /// 排队一次模式切换；未应用的旧请求会被新请求替换。
    pub fn request_mode_switch(&self, mode_id: &str) {
        *self.pending_mode.lock() = Some(mode_id.to_string());
    }

    pub(crate) fn take_mode_switch(&self) -> Option<String> {
        self.pending_mode.lock().take()
    }

    pub(crate) fn restore_mode_switch(&self, mode_id: String) {
        self.pending_mode.lock().get_or_insert(mode_id);
    }

    pub fn request_dimension_change(&self, mode_id: &str, width: u32, height: u32) {
        *self.pending_dimensions.lock() = Some(DimensionChange {
            mode_id: mode_id.to_string(),
            width,
            height,
        });
    }

    pub(crate) fn take_dimension_change(&self) -> Option<DimensionChange> {
        self.pending_dimensions.lock().take()
    }

    pub fn overlay_hook_present(&self) -> bool {
        self.overlay_hook_present.load(Ordering::Acquire)
    }

    pub(crate) fn set_overlay_hook_present(&self, present: bool) -> bool {
        self.overlay_hook_present.swap(present, Ordering::AcqRel) != present
    }

    pub(crate) fn borderless_applied(&self) -> bool {
        self.borderless_applied.load(Ordering::Acquire)
    }

    pub(crate) fn mark_borderless_applied(&self) {
        self.borderless_applied.store(true, Ordering::Release);
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    pub(crate) fn count_tick(&self) {
        self.ticks.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_mode_request_wins() {
        let state = CoordinationState::new();
        state.request_mode_switch("thin");
        state.request_mode_switch("wide");
        assert_eq!(state.take_mode_switch().as_deref(), Some("wide"));
        assert_eq!(state.take_mode_switch(), None);
    }

    #[test]
    fn reported_screen_marks_dirty_only_on_change() {
        let state = CoordinationState::new();
        assert_eq!(state.reported_screen(), None);
        assert!(state.take_screen_dirty());

        state.report_screen(PhysicalSize::new(1920, 1080));
        assert!(state.take_screen_dirty());
        state.report_screen(PhysicalSize::new(1920, 1080));
        assert!(!state.take_screen_dirty());
        assert_eq!(state.reported_screen(), Some(PhysicalSize::new(1920, 1080)));
    }

    #[test]
    fn screen_starts_dirty() {
        let state = CoordinationState::new();
        assert!(state.take_screen_dirty());
        assert!(!state.take_screen_dirty());
        state.mark_screen_dirty();
        assert!(state.take_screen_dirty());
    }
}
