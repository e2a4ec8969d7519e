//! ### English
//! C ABI bindings for the overlay lifecycle (create/destroy, worker threads, coordination input).
//!
//! ### 中文
//! overlay 生命周期相关的 C ABI 绑定（create/destroy、工作线程、协调输入）。

use std::ffi::{c_char, c_void};
use std::sync::Arc;
use std::time::Instant;

use dpi::PhysicalSize;

use super::{XianOverlay, overlay_ref};
use crate::engine::{GameState, GlfwContextFactory, OverlayError, OverlaySystem, OverlayTuning};

/// ### English
/// Logs a failed thread start and maps the outcome to the C boolean.
///
/// ### 中文
/// 记录线程启动失败，并把结果映射为 C 布尔值。
fn report_start(what: &str, result: Result<bool, OverlayError>) -> bool {
    match result {
        Ok(_) => true,
        Err(err) => {
            log::error!("failed to start {what} thread: {err}");
            false
        }
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Creates an overlay bound to the game's GLFW window.
///
/// The GLFW table must already be installed (`xian_overlay_set_glfw_api`). No thread is started
/// yet; call the `xian_overlay_start_*` functions once a config has been published.
///
/// `logic_hz` is the coordination tick rate; `0` selects the default (60).
///
/// Returns NULL on failure.
///
/// ### 中文
/// 创建绑定到游戏 GLFW window 的 overlay。
///
/// GLFW 函数表必须已安装（`xian_overlay_set_glfw_api`）。此时不会启动任何线程；发布配置后
/// 再调用 `xian_overlay_start_*` 系列函数。
///
/// `logic_hz` 为协调线程 tick 频率；`0` 表示使用默认值（60）。
///
/// 失败时返回 NULL。
pub extern "C" fn xian_overlay_create(
    glfw_shared_window: *mut c_void,
    logic_hz: u32,
) -> *mut XianOverlay {
    let factory = match GlfwContextFactory::new(glfw_shared_window) {
        Ok(factory) => factory,
        Err(err) => {
            log::error!("cannot create overlay: {err}");
            return std::ptr::null_mut();
        }
    };

    let mut tuning = OverlayTuning::default();
    if logic_hz != 0 {
        tuning.logic_hz = logic_hz;
    }

    Box::into_raw(Box::new(XianOverlay {
        system: OverlaySystem::new(tuning),
        factory: Arc::new(factory),
    }))
}

#[unsafe(no_mangle)]
/// ### English
/// Destroys an overlay created by `xian_overlay_create`.
///
/// Stops the render, capture and logic threads. Destroy every `XianOverlayHost` first.
///
/// ### 中文
/// 销毁由 `xian_overlay_create` 创建的 overlay。
///
/// 会停止渲染、捕获与逻辑线程。请先销毁所有 `XianOverlayHost`。
pub unsafe extern "C" fn xian_overlay_destroy(overlay: *mut XianOverlay) {
    if overlay.is_null() {
        return;
    }
    unsafe {
        drop(Box::from_raw(overlay));
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Starts the logic (coordination) thread. Idempotent; returns `false` only on failure.
///
/// ### 中文
/// 启动逻辑（协调）线程。幂等；仅失败时返回 `false`。
pub unsafe extern "C" fn xian_overlay_start_logic_thread(overlay: *const XianOverlay) -> bool {
    let Some(overlay) = (unsafe { overlay_ref(overlay) }) else {
        return false;
    };
    report_start("logic", overlay.system.start_logic_thread())
}

#[unsafe(no_mangle)]
/// ### English
/// Stops the logic thread. Returns whether it was running.
///
/// ### 中文
/// 停止逻辑线程；返回其之前是否在运行。
pub unsafe extern "C" fn xian_overlay_stop_logic_thread(overlay: *const XianOverlay) -> bool {
    unsafe { overlay_ref(overlay) }.is_some_and(|overlay| overlay.system.stop_logic_thread())
}

#[unsafe(no_mangle)]
/// ### English
/// Starts the capture thread on a new context shared with the game window. Idempotent.
///
/// ### 中文
/// 在与游戏 window 共享的新上下文上启动捕获线程。幂等。
pub unsafe extern "C" fn xian_overlay_start_capture_thread(overlay: *const XianOverlay) -> bool {
    let Some(overlay) = (unsafe { overlay_ref(overlay) }) else {
        return false;
    };
    report_start(
        "capture",
        overlay.system.start_capture_thread(overlay.factory.clone()),
    )
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn xian_overlay_stop_capture_thread(overlay: *const XianOverlay) -> bool {
    unsafe { overlay_ref(overlay) }.is_some_and(|overlay| overlay.system.stop_capture_thread())
}

#[unsafe(no_mangle)]
/// ### English
/// Starts the overlay render thread on a new context shared with the game window. Idempotent.
///
/// ### 中文
/// 在与游戏 window 共享的新上下文上启动 overlay 渲染线程。幂等。
pub unsafe extern "C" fn xian_overlay_start_render_thread(overlay: *const XianOverlay) -> bool {
    let Some(overlay) = (unsafe { overlay_ref(overlay) }) else {
        return false;
    };
    report_start(
        "render",
        overlay
            .system
            .start_render_thread(overlay.factory.clone(), None),
    )
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn xian_overlay_stop_render_thread(overlay: *const XianOverlay) -> bool {
    unsafe { overlay_ref(overlay) }.is_some_and(|overlay| overlay.system.stop_render_thread())
}

#[unsafe(no_mangle)]
/// ### English
/// Requests a switch to mode `mode_id`. Applied by the logic thread on its next tick; a newer
/// request replaces an unapplied one.
///
/// ### 中文
/// 请求切换到模式 `mode_id`。由逻辑线程在下一个 tick 应用；未应用的旧请求会被新请求替换。
pub unsafe extern "C" fn xian_overlay_request_mode_switch(
    overlay: *const XianOverlay,
    mode_id: *const c_char,
) -> bool {
    let (Some(overlay), Some(mode_id)) =
        (unsafe { overlay_ref(overlay) }, unsafe { super::cstr_to_str(mode_id) })
    else {
        return false;
    };
    overlay.system.request_mode_switch(mode_id);
    true
}

#[unsafe(no_mangle)]
/// ### English
/// Requests new dimensions for mode `mode_id` (applied through the config command queue).
///
/// ### 中文
/// 请求修改模式 `mode_id` 的尺寸（经由配置命令队列应用）。
pub unsafe extern "C" fn xian_overlay_request_dimension_change(
    overlay: *const XianOverlay,
    mode_id: *const c_char,
    width: u32,
    height: u32,
) -> bool {
    let (Some(overlay), Some(mode_id)) =
        (unsafe { overlay_ref(overlay) }, unsafe { super::cstr_to_str(mode_id) })
    else {
        return false;
    };
    overlay
        .system
        .request_dimension_change(mode_id, width, height);
    true
}

#[unsafe(no_mangle)]
/// ### English
/// Reports which screen the game shows: `0` unknown, `1` in world, `2` title, `3` wall.
/// Leaving the world returns the overlay to its default mode.
///
/// ### 中文
/// 报告游戏当前界面：`0` 未知，`1` 世界内，`2` 标题界面，`3` wall。
/// 离开世界时 overlay 会回到默认模式。
pub unsafe extern "C" fn xian_overlay_report_game_state(overlay: *const XianOverlay, state: u32) {
    if let Some(overlay) = unsafe { overlay_ref(overlay) } {
        overlay
            .system
            .coordination()
            .report_game_state(GameState::from_code(state));
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Reports the window size from a thread other than the host render thread (e.g. a resize
/// callback). The host frame entry point reports it too.
///
/// ### 中文
/// 从宿主渲染线程以外的线程（例如 resize 回调）报告窗口尺寸。宿主帧入口也会报告该值。
pub unsafe extern "C" fn xian_overlay_report_screen_size(
    overlay: *const XianOverlay,
    width: u32,
    height: u32,
) {
    if let Some(overlay) = unsafe { overlay_ref(overlay) } {
        overlay
            .system
            .coordination()
            .report_screen(PhysicalSize::new(width, height));
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Marks an external capture consumer (e.g. OBS) as attached or detached.
///
/// ### 中文
/// 标记外部捕获消费者（例如 OBS）已连接或已断开。
pub unsafe extern "C" fn xian_overlay_set_obs_active(overlay: *const XianOverlay, active: bool) {
    if let Some(overlay) = unsafe { overlay_ref(overlay) } {
        overlay.system.set_obs_active(active);
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn xian_overlay_set_settings_open(overlay: *const XianOverlay, open: bool) {
    if let Some(overlay) = unsafe { overlay_ref(overlay) } {
        overlay.system.ui().set_settings_open(open);
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Shows a short notification over the game for two seconds.
///
/// ### 中文
/// 在游戏画面上显示两秒的简短提示。
pub unsafe extern "C" fn xian_overlay_show_toast(
    overlay: *const XianOverlay,
    text: *const c_char,
) -> bool {
    let (Some(overlay), Some(text)) =
        (unsafe { overlay_ref(overlay) }, unsafe { super::cstr_to_str(text) })
    else {
        return false;
    };
    overlay.system.ui().show_toast(text, Instant::now());
    true
}
