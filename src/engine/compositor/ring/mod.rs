//! ### English
//! Triple-buffered output ring of the overlay compositor, one per output stream.
//!
//! The compositor thread ([`RenderRing`]) renders into a slot it reserved and publishes it as
//! READY; the host thread acquires the newest READY slot through [`SharedRing`], samples it and
//! releases it together with a consumer fence. A slot whose last reader left a consumer fence is
//! only written again after that fence signaled or a GPU-side wait on it was issued.
//!
//! ### 中文
//! overlay 合成线程的三缓冲输出环，每个输出流一个。
//!
//! 合成线程（[`RenderRing`]）渲染到已预留的槽位并将其发布为 READY；宿主线程通过
//! [`SharedRing`] 获取最新的 READY 槽位、采样后连同 consumer fence 一起释放。上一个读者留下
//! consumer fence 的槽位，只有在该 fence 已 signal 或已发出 GPU 侧等待之后才会再次写入。

mod producer;
mod shared;
mod slot;

pub use producer::RenderRing;
pub use shared::SharedRing;

use crate::engine::gpu::{FenceHandle, TextureRef};

/// ### English
/// Fixed slot count per stream.
///
/// ### 中文
/// 每个输出流固定的槽位数量。
pub const RING_SLOTS: usize = 3;

pub(crate) const SLOT_FREE: u8 = 0;
pub(crate) const SLOT_READY: u8 = 1;
pub(crate) const SLOT_HELD: u8 = 2;
pub(crate) const SLOT_RELEASE_PENDING: u8 = 3;
pub(crate) const SLOT_RENDERING: u8 = 4;

/// ### English
/// A completed overlay frame held by the host thread until it calls
/// [`SharedRing::release`].
///
/// ### 中文
/// 宿主线程持有的已完成 overlay 帧，直到其调用 [`SharedRing::release`]。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredFrame {
    pub slot: usize,
    pub texture: TextureRef,
    /// ### English
    /// Wait on this (GPU side) before sampling `texture`.
    ///
    /// ### 中文
    /// 采样 `texture` 之前需在 GPU 侧等待该 fence。
    pub producer_fence: FenceHandle,
    pub frame_seq: u64,
    pub generation: u64,
}
