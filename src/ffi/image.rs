//! ### English
//! C ABI binding for decoded image submission.
//!
//! ### 中文
//! 已解码图片提交相关的 C ABI 绑定。

use std::ffi::c_char;

use super::{XianOverlay, cstr_to_str, overlay_ref};
use crate::engine::{DecodedImage, ImageKind};

fn image_kind(code: u32) -> Option<ImageKind> {
    match code {
        0 => Some(ImageKind::Background),
        1 => Some(ImageKind::UserImage),
        2 => Some(ImageKind::WindowOverlay),
        _ => None,
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Queues a decoded RGBA image for upload on the render thread. The pixels are copied.
///
/// - `kind`: `0` mode background, `1` user image, `2` window overlay.
/// - `rgba`: tightly packed rows, `len` bytes; animated images stack their frames top to bottom.
/// - `frame_delays_ms`: `frame_count` delays for an animation, or NULL / `0` for a still image.
///
/// Returns `false` if the arguments are inconsistent or the upload queue is full.
///
/// ### 中文
/// 将已解码的 RGBA 图片排队，由渲染线程上传。像素数据会被拷贝。
///
/// - `kind`：`0` 模式背景，`1` 用户图片，`2` 窗口覆盖层。
/// - `rgba`：紧密排列的行，共 `len` 字节；动图的各帧自上而下堆叠。
/// - `frame_delays_ms`：动图的 `frame_count` 个延迟；静态图片传 NULL / `0`。
///
/// 参数不一致或上传队列已满时返回 `false`。
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn xian_overlay_submit_image(
    overlay: *const XianOverlay,
    id: *const c_char,
    kind: u32,
    rgba: *const u8,
    len: usize,
    width: u32,
    frame_height: u32,
    frame_delays_ms: *const u32,
    frame_count: u32,
) -> bool {
    let (Some(overlay), Some(id), Some(kind)) = (
        unsafe { overlay_ref(overlay) },
        unsafe { cstr_to_str(id) },
        image_kind(kind),
    ) else {
        return false;
    };
    if rgba.is_null() || width == 0 || frame_height == 0 {
        return false;
    }

    let frame_delays_ms = if frame_delays_ms.is_null() || frame_count == 0 {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(frame_delays_ms, frame_count as usize) }.to_vec()
    };
    let frames = frame_delays_ms.len().max(1);
    let expected = width as usize * frame_height as usize * frames * 4;
    if len != expected {
        log::warn!("image {id}: {len} bytes for {width}x{frame_height}x{frames}; rejected");
        return false;
    }
    let rgba = unsafe { std::slice::from_raw_parts(rgba, len) }.to_vec();

    overlay.system.image_sender().send(DecodedImage {
        id: id.to_string(),
        kind,
        rgba,
        width,
        frame_height,
        frame_delays_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kinds_are_rejected() {
        assert_eq!(image_kind(0), Some(ImageKind::Background));
        assert_eq!(image_kind(2), Some(ImageKind::WindowOverlay));
        assert_eq!(image_kind(3), None);
    }
}
