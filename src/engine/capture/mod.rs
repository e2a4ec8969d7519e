//! ### English
//! Capture engine: host frame copies and per-mirror capture passes.
//!
//! The host thread copies its frame into one of two copy textures ([`HostFrameCopier`]); the
//! capture thread ([`CaptureEngine`]) publishes finished copies through [`GameFrameCopy`] and
//! renders every active mirror from the freshest one, publishing the results in
//! [`MirrorRegistry`].
//!
//! ### 中文
//! 捕获引擎：宿主帧拷贝与逐镜像捕获流程。
//!
//! 宿主线程把当前帧拷贝到两张拷贝纹理之一（[`HostFrameCopier`]）；捕获线程
//! （[`CaptureEngine`]）通过 [`GameFrameCopy`] 发布完成的拷贝，并基于最新拷贝渲染每个活动镜像，
//! 结果发布在 [`MirrorRegistry`] 中。

mod frame_copy;
mod mirror;
mod pipeline;
mod thread;
mod throttle;

pub use frame_copy::{CopyFrame, GameFrameCopy, HostFrameCopier};
pub use mirror::{
    CachedRenderPosition, MirrorPlacement, MirrorRegistry, MirrorRenderData, PositionKey,
};
pub use thread::{CaptureEngine, CaptureShared};
pub use throttle::FpsThrottle;
