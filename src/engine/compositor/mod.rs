//! ### English
//! Overlay compositor: a third GPU context that renders overlay frames for two output streams.
//!
//! The host thread submits one [`FrameRenderRequest`] per frame (and an [`ObsFrameSubmission`]
//! while external capture is active) through [`CompositorShared`]; the compositor thread
//! ([`OverlayCompositor`]) renders mirrors, images, window overlays, the EyeZoom magnifier and the
//! debug GUI into the stream's triple-buffered ring, and the host acquires the newest finished
//! frame from there.
//!
//! ### 中文
//! overlay 合成器：第三个 GPU 上下文，为两个输出流渲染 overlay 帧。
//!
//! 宿主线程每帧通过 [`CompositorShared`] 提交一个 [`FrameRenderRequest`]（外部捕获启用时另提交
//! 一个 [`ObsFrameSubmission`]）；合成线程（[`OverlayCompositor`]）把镜像、图片、窗口叠加、
//! EyeZoom 放大镜与调试 GUI 渲染到该流的三缓冲环中，宿主再从中获取最新完成的帧。

mod eyezoom;
mod gui;
mod images;
mod render;
mod request;
mod ring;
mod scene;
mod thread;

pub use eyezoom::GridLabel;
pub use gui::{EguiLayer, GuiFrame, GuiLayer, NullGui, SettingsPanel};
pub use images::{DecodedImage, ImageFrame, ImageKind, ImageLibrary, ImageQueue, ImageSender};
pub use render::{FrameRenderer, PHASE_NAMES, RenderInputs, RenderStats, StreamKind};
pub use request::{
    EyeZoomRequest, FrameRenderRequest, GuiFlags, ObsFrameSubmission, Toast, TransitionSample,
};
pub use ring::{AcquiredFrame, RING_SLOTS, RenderRing, SharedRing};
pub use thread::{CompositorShared, CompositorStats, OverlayCompositor};
