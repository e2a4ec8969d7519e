//! ### English
//! C ABI bindings for the host render thread (create/destroy/per-frame entry point).
//!
//! ### 中文
//! 宿主渲染线程相关的 C ABI 绑定（create/destroy/逐帧入口）。

use std::ffi::{CString, c_char};
use std::time::Instant;

use dpi::PhysicalSize;

use super::{XianOverlay, XianOverlayHost, overlay_ref};

#[unsafe(no_mangle)]
/// ### English
/// Creates the host-thread glue. Call on the game's render thread with the game context current.
///
/// Returns NULL on failure.
///
/// ### 中文
/// 创建宿主线程胶水层。需在游戏渲染线程、游戏上下文 current 时调用。
///
/// 失败时返回 NULL。
pub unsafe extern "C" fn xian_overlay_host_create(
    overlay: *const XianOverlay,
) -> *mut XianOverlayHost {
    let Some(overlay) = (unsafe { overlay_ref(overlay) }) else {
        return std::ptr::null_mut();
    };
    match overlay.system.create_host(overlay.factory.as_ref()) {
        Ok(host) => Box::into_raw(Box::new(XianOverlayHost { host })),
        Err(err) => {
            log::error!("cannot create host glue: {err}");
            std::ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Destroys the host glue. Call on the same thread, with the same context current, as create.
///
/// ### 中文
/// 销毁宿主胶水层。需在与 create 相同的线程、相同上下文 current 时调用。
pub unsafe extern "C" fn xian_overlay_host_destroy(host: *mut XianOverlayHost) {
    if host.is_null() {
        return;
    }
    unsafe {
        drop(Box::from_raw(host));
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Per-frame entry point, called right before the game swaps buffers.
///
/// Copies the game frame for the capture thread, submits this frame's overlay requests and
/// blends the newest finished overlay frame onto `framebuffer` (0 = default framebuffer).
/// Never blocks on the CPU.
///
/// Returns `true` if an overlay frame was blended.
///
/// ### 中文
/// 逐帧入口，在游戏交换缓冲之前调用。
///
/// 为捕获线程拷贝游戏帧，提交本帧的 overlay 请求，并把最新完成的 overlay 帧混合到
/// `framebuffer`（0 表示默认 framebuffer）。从不在 CPU 上阻塞。
///
/// 若混合了一帧 overlay 则返回 `true`。
pub unsafe extern "C" fn xian_overlay_host_on_frame(
    host: *mut XianOverlayHost,
    framebuffer: u32,
    width: u32,
    height: u32,
) -> bool {
    let Some(host) = (unsafe { host.as_mut() }) else {
        return false;
    };
    host.host
        .on_frame(framebuffer, PhysicalSize::new(width, height), Instant::now())
}

#[unsafe(no_mangle)]
/// ### English
/// Returns the windows the current mode wants captured as a JSON array of
/// `{id, windowTitle, fps}`, or NULL. Free it with `xian_overlay_free_string`.
///
/// ### 中文
/// 以 `{id, windowTitle, fps}` 的 JSON 数组返回当前模式需要捕获的窗口，失败返回 NULL。
/// 需使用 `xian_overlay_free_string` 释放。
pub unsafe extern "C" fn xian_overlay_host_window_targets_json(
    host: *const XianOverlayHost,
) -> *mut c_char {
    let Some(host) = (unsafe { host.as_ref() }) else {
        return std::ptr::null_mut();
    };
    let Ok(json) = serde_json::to_string(&host.host.caches().window_targets) else {
        return std::ptr::null_mut();
    };
    CString::new(json).map_or(std::ptr::null_mut(), CString::into_raw)
}
