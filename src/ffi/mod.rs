//! ### English
//! C ABI surface for `xian_overlay`.
//!
//! All exported symbols are `extern "C"` functions; structs are `#[repr(C)]`.
//! Strings passed from Java/Panama must be NUL-terminated UTF-8 (C string); they will be
//! validated as UTF-8 and will be truncated at the first NUL byte.
//!
//! Threading: an `XianOverlay` may be used from any thread. An `XianOverlayHost` belongs to the
//! host render thread that created it and must only be used (and destroyed) there.
//!
//! ### 中文
//! `xian_overlay` 的 C ABI 接口层。
//!
//! 所有导出符号均为 `extern "C"` 函数；结构体使用 `#[repr(C)]`。
//! Java/Panama 传入的字符串必须是以 NUL 结尾的 UTF-8（C 字符串）；Rust 会校验 UTF-8，
//! 且在遇到第一个 NUL 字节处截断。
//!
//! 线程：`XianOverlay` 可在任意线程使用；`XianOverlayHost` 属于创建它的宿主渲染线程，
//! 只能在该线程上使用（及销毁）。
mod abi;
mod config;
mod frame;
mod glfw;
mod host;
mod image;
mod overlay;

use std::ffi::{CStr, c_char};
use std::sync::Arc;

use crate::engine::{AcquiredFrame, GpuContextFactory, HostCompositor, OverlaySystem};

#[repr(C)]
/// ### English
/// Opaque overlay handle owning the logic, capture and render threads.
///
/// ### 中文
/// 不透明 overlay 句柄，持有逻辑、捕获与渲染线程。
pub struct XianOverlay {
    system: OverlaySystem,
    /// ### English
    /// Context factory sharing with the host window passed to `xian_overlay_create`.
    ///
    /// ### 中文
    /// 与 `xian_overlay_create` 传入的宿主 window 共享对象的上下文工厂。
    factory: Arc<dyn GpuContextFactory>,
}

#[repr(C)]
/// ### English
/// Opaque host-thread handle (copies, submits and blends once per host frame).
///
/// ### 中文
/// 不透明宿主线程句柄（每个宿主帧执行拷贝、提交与混合）。
pub struct XianOverlayHost {
    host: HostCompositor,
}

#[repr(C)]
/// ### English
/// One finished external-capture frame handed to the embedder.
///
/// ### 中文
/// 交给宿主的一帧已完成外部捕获帧。
pub struct XianOverlayFrame {
    /// ### English
    /// Ring slot index; pass it back to `xian_overlay_obs_release_frame`.
    ///
    /// ### 中文
    /// 环形缓冲槽位索引；需传回 `xian_overlay_obs_release_frame`。
    pub slot: u32,
    /// ### English
    /// GL texture ID containing the frame (premultiplied alpha).
    ///
    /// ### 中文
    /// 包含该帧的 GL 纹理 ID（预乘 alpha）。
    pub texture_id: u32,
    /// ### English
    /// Producer fence handle (`GLsync` cast to `u64`), or 0 if unavailable.
    ///
    /// Wait on it GPU-side (`glWaitSync`) before sampling. It is owned by Rust; do NOT delete it.
    ///
    /// ### 中文
    /// 生产者 fence 句柄（`GLsync` 转为 `u64`），不可用则为 0。
    ///
    /// 采样前应在 GPU 侧等待（`glWaitSync`）。该对象由 Rust 持有；不要自行删除。
    pub producer_fence: u64,
    pub width: u32,
    pub height: u32,
    /// ### English
    /// Monotonic sequence number of the rendered request.
    ///
    /// ### 中文
    /// 已渲染请求的单调递增序号。
    pub frame_seq: u64,
}

/// ### English
/// C ABI version for `xian_overlay`.
///
/// ### 中文
/// `xian_overlay` 的 C ABI 版本号。
const XIAN_OVERLAY_ABI_VERSION: u32 = 1;

impl From<AcquiredFrame> for XianOverlayFrame {
    fn from(value: AcquiredFrame) -> Self {
        Self {
            slot: value.slot as u32,
            texture_id: value.texture.id,
            producer_fence: value.producer_fence.raw(),
            width: value.texture.size.width,
            height: value.texture.size.height,
            frame_seq: value.frame_seq,
        }
    }
}

/// ### English
/// Borrows an optional NUL-terminated UTF-8 C string.
///
/// Returns `None` for NULL pointers or invalid UTF-8. Empty strings are returned as-is.
///
/// # Safety
/// `ptr` must be valid and point to a NUL-terminated string for the duration of the call.
///
/// ### 中文
/// 借用可选的 NUL 结尾 UTF-8 C 字符串。
///
/// 对 NULL 指针或 UTF-8 非法返回 `None`；空字符串原样返回。
///
/// # Safety
/// `ptr` 在本次调用期间必须有效，并指向以 NUL 结尾的字符串。
unsafe fn cstr_to_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// ### English
/// Borrows the overlay behind `overlay`, or `None` for NULL.
///
/// # Safety
/// `overlay` must be NULL or a live pointer returned by `xian_overlay_create`.
///
/// ### 中文
/// 借用 `overlay` 指向的 overlay；NULL 时返回 `None`。
///
/// # Safety
/// `overlay` 必须为 NULL，或是由 `xian_overlay_create` 返回且仍存活的指针。
unsafe fn overlay_ref<'a>(overlay: *const XianOverlay) -> Option<&'a XianOverlay> {
    unsafe { overlay.as_ref() }
}

#[cfg(test)]
mod tests {
    use dpi::PhysicalSize;

    use super::*;
    use crate::engine::gpu::{FenceHandle, TextureRef};

    #[test]
    fn acquired_frame_maps_to_the_c_layout() {
        let frame = XianOverlayFrame::from(AcquiredFrame {
            slot: 2,
            texture: TextureRef {
                id: 17,
                size: PhysicalSize::new(640, 360),
            },
            producer_fence: FenceHandle::from_raw(0xfeed),
            frame_seq: 9,
            generation: 3,
        });
        assert_eq!(
            (frame.slot, frame.texture_id, frame.producer_fence),
            (2, 17, 0xfeed)
        );
        assert_eq!((frame.width, frame.height, frame.frame_seq), (640, 360, 9));
    }

    #[test]
    fn null_and_invalid_strings_are_rejected() {
        assert_eq!(unsafe { cstr_to_str(std::ptr::null()) }, None);
        assert_eq!(unsafe { cstr_to_str(c"thin".as_ptr()) }, Some("thin"));
        let invalid = [0xffu8, 0xfe, 0];
        assert_eq!(unsafe { cstr_to_str(invalid.as_ptr().cast()) }, None);
    }
}
