//! ### English
//! C ABI bindings for config publication and field-level edits.
//!
//! ### 中文
//! 配置发布与字段级修改相关的 C ABI 绑定。

use std::ffi::{CString, c_char};

use super::{XianOverlay, cstr_to_str, overlay_ref};
use crate::engine::config::CaptureRegion;
use crate::engine::geometry::Anchor;

/// ### English
/// Parses an anchor name (`"topLeftScreen"`, `"centerViewport"`, ...) the way the config JSON
/// spells it.
///
/// ### 中文
/// 按配置 JSON 的写法解析锚点名（`"topLeftScreen"`、`"centerViewport"` 等）。
fn parse_anchor(name: &str) -> Option<Anchor> {
    serde_json::from_value(serde_json::Value::String(name.to_string())).ok()
}

#[unsafe(no_mangle)]
/// ### English
/// Replaces the whole config with the JSON document `json`.
///
/// Returns the new config version, or `0` if the JSON is invalid (the previous config stays).
///
/// ### 中文
/// 用 JSON 文档 `json` 替换整份配置。
///
/// 返回新的配置版本号；JSON 非法时返回 `0`（保留之前的配置）。
pub unsafe extern "C" fn xian_overlay_publish_config_json(
    overlay: *const XianOverlay,
    json: *const c_char,
) -> u64 {
    let (Some(overlay), Some(json)) = (unsafe { overlay_ref(overlay) }, unsafe { cstr_to_str(json) })
    else {
        return 0;
    };
    match overlay.system.load_config_json(json) {
        Ok(version) => version,
        Err(err) => {
            log::error!("config rejected: {err}");
            0
        }
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Returns the current config as a newly allocated JSON C string, or NULL.
///
/// Free it with `xian_overlay_free_string`.
///
/// ### 中文
/// 以新分配的 JSON C 字符串返回当前配置，失败返回 NULL。
///
/// 需使用 `xian_overlay_free_string` 释放。
pub unsafe extern "C" fn xian_overlay_config_json(overlay: *const XianOverlay) -> *mut c_char {
    let Some(overlay) = (unsafe { overlay_ref(overlay) }) else {
        return std::ptr::null_mut();
    };
    let snapshot = overlay.system.config_snapshot();
    let Ok(json) = serde_json::to_string(snapshot.as_ref()) else {
        return std::ptr::null_mut();
    };
    CString::new(json).map_or(std::ptr::null_mut(), CString::into_raw)
}

#[unsafe(no_mangle)]
/// ### English
/// Frees a string returned by this library.
///
/// ### 中文
/// 释放本库返回的字符串。
pub unsafe extern "C" fn xian_overlay_free_string(value: *mut c_char) {
    if value.is_null() {
        return;
    }
    unsafe {
        drop(CString::from_raw(value));
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn xian_overlay_update_mirror_fps(
    overlay: *const XianOverlay,
    name: *const c_char,
    fps: i32,
) -> bool {
    let (Some(overlay), Some(name)) = (unsafe { overlay_ref(overlay) }, unsafe { cstr_to_str(name) })
    else {
        return false;
    };
    overlay.system.update_mirror_fps(name, fps)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn xian_overlay_update_mirror_capture_config(
    overlay: *const XianOverlay,
    name: *const c_char,
    capture_width: u32,
    capture_height: u32,
) -> bool {
    let (Some(overlay), Some(name)) = (unsafe { overlay_ref(overlay) }, unsafe { cstr_to_str(name) })
    else {
        return false;
    };
    overlay
        .system
        .update_mirror_capture_config(name, capture_width, capture_height)
}

#[unsafe(no_mangle)]
/// ### English
/// Moves a mirror's output. `relative_to` is an anchor name as spelled in the config JSON.
///
/// ### 中文
/// 移动镜像输出位置。`relative_to` 为配置 JSON 中的锚点名。
pub unsafe extern "C" fn xian_overlay_update_mirror_output_position(
    overlay: *const XianOverlay,
    name: *const c_char,
    x: i32,
    y: i32,
    relative_to: *const c_char,
) -> bool {
    let (Some(overlay), Some(name), Some(anchor)) = (
        unsafe { overlay_ref(overlay) },
        unsafe { cstr_to_str(name) },
        unsafe { cstr_to_str(relative_to) }.and_then(parse_anchor),
    ) else {
        return false;
    };
    overlay
        .system
        .update_mirror_output_position(name, x, y, anchor)
}

#[unsafe(no_mangle)]
/// ### English
/// Replaces a mirror's capture regions with a JSON array of `{x, y, relativeTo}` objects.
///
/// ### 中文
/// 用 `{x, y, relativeTo}` 对象组成的 JSON 数组替换镜像的捕获区域。
pub unsafe extern "C" fn xian_overlay_update_mirror_input_regions(
    overlay: *const XianOverlay,
    name: *const c_char,
    regions_json: *const c_char,
) -> bool {
    let (Some(overlay), Some(name), Some(json)) = (
        unsafe { overlay_ref(overlay) },
        unsafe { cstr_to_str(name) },
        unsafe { cstr_to_str(regions_json) },
    ) else {
        return false;
    };
    match serde_json::from_str::<Vec<CaptureRegion>>(json) {
        Ok(inputs) => overlay.system.update_mirror_input_regions(name, inputs),
        Err(err) => {
            log::warn!("capture regions for {name} rejected: {err}");
            false
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn xian_overlay_move_image(
    overlay: *const XianOverlay,
    name: *const c_char,
    dx: i32,
    dy: i32,
) -> bool {
    let (Some(overlay), Some(name)) = (unsafe { overlay_ref(overlay) }, unsafe { cstr_to_str(name) })
    else {
        return false;
    };
    overlay.system.move_image(name, dx, dy)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn xian_overlay_move_window_overlay(
    overlay: *const XianOverlay,
    name: *const c_char,
    dx: i32,
    dy: i32,
) -> bool {
    let (Some(overlay), Some(name)) = (unsafe { overlay_ref(overlay) }, unsafe { cstr_to_str(name) })
    else {
        return false;
    };
    overlay.system.move_window_overlay(name, dx, dy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_names_follow_the_config_spelling() {
        assert_eq!(parse_anchor("centerViewport"), Some(Anchor::CenterViewport));
        assert_eq!(parse_anchor("bottomRightScreen"), Some(Anchor::BottomRightScreen));
        assert_eq!(parse_anchor("BottomRightScreen"), None);
    }

    #[test]
    fn null_overlay_is_rejected() {
        unsafe {
            assert_eq!(
                xian_overlay_publish_config_json(std::ptr::null(), c"{}".as_ptr()),
                0
            );
            assert!(xian_overlay_config_json(std::ptr::null()).is_null());
            assert!(!xian_overlay_move_image(std::ptr::null(), c"a".as_ptr(), 1, 1));
            xian_overlay_free_string(std::ptr::null_mut());
        }
    }
}
