//! ### English
//! Seams to the platform and the game that the coordination thread calls into.
//!
//! ### 中文
//! 协调线程调用的平台与游戏接口。

use std::sync::Arc;

use dpi::PhysicalSize;

use super::state::CoordinationState;

/// ### English
/// Coarse game screen as reported by the embedder.
///
/// ### 中文
/// 由嵌入方报告的粗粒度游戏界面状态。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GameState {
    #[default]
    Unknown,
    InWorld,
    TitleScreen,
    /// ### English
    /// Multi-instance wall / world preview screen.
    ///
    /// ### 中文
    /// 多实例墙 / 世界预览界面。
    Wall,
}

impl GameState {
    /// ### English
    /// Whether moving from `self` to `next` leaves a world for a menu-like screen.
    ///
    /// ### 中文
    /// 从 `self` 切换到 `next` 是否意味着离开世界进入菜单类界面。
    pub fn exits_world(self, next: GameState) -> bool {
        self == GameState::InWorld && matches!(next, GameState::TitleScreen | GameState::Wall)
    }

    /// ### English
    /// Numeric code used by the C ABI (`0` unknown, `1` in world, `2` title, `3` wall).
    ///
    /// ### 中文
    /// C ABI 使用的数值编码（`0` 未知、`1` 世界内、`2` 标题、`3` 墙）。
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => GameState::InWorld,
            2 => GameState::TitleScreen,
            3 => GameState::Wall,
            _ => GameState::Unknown,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            GameState::Unknown => 0,
            GameState::InWorld => 1,
            GameState::TitleScreen => 2,
            GameState::Wall => 3,
        }
    }
}

/// ### English
/// OS-level operations the coordination thread performs at most once per tick.
///
/// Every method runs on the coordination thread and may be slow; none is ever called from the
/// host render thread.
///
/// ### 中文
/// 协调线程每个 tick 至多执行一次的系统级操作。
///
/// 所有方法都在协调线程上运行且可能较慢；绝不会在宿主渲染线程上调用。
pub trait PlatformHooks: Send {
    /// ### English
    /// Current client-area size of the host window, `None` while unknown (minimized).
    ///
    /// ### 中文
    /// 宿主窗口当前客户区尺寸；未知（最小化）时为 `None`。
    fn screen_size(&mut self) -> Option<PhysicalSize<u32>>;

    /// ### English
    /// Whether a third-party overlay hook module is loaded in the process.
    ///
    /// ### 中文
    /// 进程中是否加载了第三方 overlay hook 模块。
    fn overlay_hook_present(&mut self) -> bool {
        false
    }

    /// ### English
    /// Applies the OS pointer speed (1..=20). Returns `false` if the OS refused.
    ///
    /// ### 中文
    /// 应用系统指针速度（1..=20）；系统拒绝时返回 `false`。
    fn set_mouse_speed(&mut self, _speed: u32) -> bool {
        false
    }

    /// ### English
    /// Switches the host window to borderless fullscreen. Returns `false` on failure.
    ///
    /// ### 中文
    /// 把宿主窗口切换为无边框全屏；失败时返回 `false`。
    fn apply_borderless(&mut self) -> bool {
        false
    }
}

/// ### English
/// Source of the game screen state.
///
/// ### 中文
/// 游戏界面状态的来源。
pub trait GameStateSource: Send {
    fn game_state(&mut self) -> GameState;
}

/// ### English
/// Hooks for an embedder that reports window size and game screen through the C ABI instead of
/// letting the overlay query the OS.
///
/// ### 中文
/// 用于通过 C ABI 报告窗口尺寸与游戏界面、而非由 overlay 直接查询系统的嵌入方的 hook。
#[derive(Clone)]
pub struct ReportedHooks {
    state: Arc<CoordinationState>,
}

impl ReportedHooks {
    pub fn new(state: Arc<CoordinationState>) -> Self {
        Self { state }
    }
}

impl PlatformHooks for ReportedHooks {
    fn screen_size(&mut self) -> Option<PhysicalSize<u32>> {
        self.state.reported_screen()
    }
}

impl GameStateSource for ReportedHooks {
    fn game_state(&mut self) -> GameState {
        self.state.reported_game_state()
    }
}
