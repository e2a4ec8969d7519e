//! ### English
//! Per-frame render requests handed from the host thread to the compositor.
//!
//! ### 中文
//! 宿主线程每帧交给合成线程的渲染请求。

use dpi::PhysicalSize;

use crate::engine::config::{BackgroundConfig, ModeBorderConfig, TransitionStyle};
use crate::engine::geometry::RectF;
use crate::engine::gpu::FenceHandle;
use crate::engine::transition::TransitionSnapshot;

/// ### English
/// Mode transition as seen by one request.
///
/// ### 中文
/// 单个请求所见的模式过渡。
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionSample {
    pub from: RectF,
    pub to: RectF,
    pub progress: f32,
    pub active: bool,
    pub style: TransitionStyle,
    /// ### English
    /// Mode being left; its mirrors slide/fade out while the new mode's slide/fade in.
    ///
    /// ### 中文
    /// 正在离开的模式；其镜像滑出/淡出，同时新模式的镜像滑入/淡入。
    pub previous_mode: String,
    /// ### English
    /// Whether mirrors follow the viewport edges while animating.
    ///
    /// ### 中文
    /// 动画期间镜像是否跟随 viewport 边缘移动。
    pub slide_mirrors: bool,
}

impl TransitionSample {
    pub fn settled(viewport: RectF) -> Self {
        Self {
            from: viewport,
            to: viewport,
            progress: 1.0,
            active: false,
            style: TransitionStyle::Cut,
            previous_mode: String::new(),
            slide_mirrors: false,
        }
    }

    pub fn from_snapshot(snapshot: &TransitionSnapshot, previous_mode: &str) -> Self {
        Self {
            from: snapshot.from,
            to: snapshot.to,
            progress: snapshot.progress,
            active: snapshot.is_active(),
            style: snapshot.style(),
            previous_mode: previous_mode.to_string(),
            slide_mirrors: false,
        }
    }
}

/// ### English
/// Short-lived message drawn on top of everything.
///
/// ### 中文
/// 绘制在最上层的短暂提示。
#[derive(Clone, Debug, PartialEq)]
pub struct Toast {
    pub text: String,
    /// ### English
    /// `1.0` fully visible, fading to `0.0`.
    ///
    /// ### 中文
    /// `1.0` 完全可见，淡出到 `0.0`。
    pub opacity: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GuiFlags {
    pub settings_open: bool,
    pub performance_overlay: bool,
    pub profiler: bool,
    pub toast: Option<Toast>,
}

impl GuiFlags {
    pub fn any(&self) -> bool {
        self.settings_open
            || self.performance_overlay
            || self.profiler
            || self.toast.as_ref().is_some_and(|toast| toast.opacity > 0.0)
    }
}

/// ### English
/// EyeZoom magnifier state for one frame.
///
/// ### 中文
/// 单帧的 EyeZoom 放大镜状态。
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EyeZoomRequest {
    /// ### English
    /// The magnifier (or its exit animation) is on screen.
    ///
    /// ### 中文
    /// 放大镜（或其退出动画）正在显示。
    pub active: bool,
    /// ### English
    /// Animation progress, `1.0` = fully shown.
    ///
    /// ### 中文
    /// 动画进度，`1.0` 表示完全显示。
    pub progress: f32,
    /// ### English
    /// Animating away; the frozen snapshot is drawn instead of live content.
    ///
    /// ### 中文
    /// 正在离开；绘制冻结快照而不是实时内容。
    pub leaving: bool,
}

/// ### English
/// Everything the compositor needs for one frame of one stream.
///
/// ### 中文
/// 合成线程为某个输出流渲染一帧所需的全部数据。
#[derive(Clone, Debug, PartialEq)]
pub struct FrameRenderRequest {
    pub frame_number: u64,
    pub screen: PhysicalSize<u32>,
    /// ### English
    /// Game viewport this frame (animated while a transition runs).
    ///
    /// ### 中文
    /// 本帧的游戏 viewport（过渡期间为动画值）。
    pub viewport: RectF,
    pub transition: TransitionSample,
    pub mode_id: String,
    pub gui: GuiFlags,
    pub show_texture_grid: bool,
    pub eyezoom: EyeZoomRequest,
    pub background: BackgroundConfig,
    pub border: ModeBorderConfig,
}

impl FrameRenderRequest {
    pub fn new(frame_number: u64, screen: PhysicalSize<u32>, viewport: RectF, mode_id: &str) -> Self {
        Self {
            frame_number,
            screen,
            viewport,
            transition: TransitionSample::settled(viewport),
            mode_id: mode_id.to_string(),
            gui: GuiFlags::default(),
            show_texture_grid: false,
            eyezoom: EyeZoomRequest::default(),
            background: BackgroundConfig::default(),
            border: ModeBorderConfig::default(),
        }
    }
}

/// ### English
/// External-capture variant: the request plus a host fence marking the game frame copy ready.
///
/// The host keeps ownership of `game_ready` and deletes it only after enough later frames.
///
/// ### 中文
/// 外部捕获变体：请求加上标记游戏帧拷贝就绪的宿主 fence。
///
/// `game_ready` 的所有权仍归宿主，宿主会在足够多的后续帧之后才删除它。
#[derive(Clone, Debug, PartialEq)]
pub struct ObsFrameSubmission {
    pub request: FrameRenderRequest,
    pub game_ready: FenceHandle,
}
