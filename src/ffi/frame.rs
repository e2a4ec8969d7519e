use crate::engine::Fence;

use super::{XianOverlay, XianOverlayFrame, overlay_ref};

#[unsafe(no_mangle)]
/// ### English
/// Tries to acquire the newest finished external-capture frame.
///
/// On success writes `out_frame` and returns `true`. The slot stays reserved until it is handed
/// back through `xian_overlay_obs_release_frame`; at most one frame may be held at a time.
///
/// ### 中文
/// 尝试获取最新完成的外部捕获帧。
///
/// 成功时写入 `out_frame` 并返回 `true`。该槽位在通过 `xian_overlay_obs_release_frame`
/// 归还之前保持占用；同一时刻最多持有一帧。
pub unsafe extern "C" fn xian_overlay_obs_acquire_frame(
    overlay: *const XianOverlay,
    out_frame: *mut XianOverlayFrame,
) -> bool {
    if out_frame.is_null() {
        return false;
    }
    let Some(overlay) = (unsafe { overlay_ref(overlay) }) else {
        return false;
    };
    let Some(frame) = overlay.system.completed_obs_frame() else {
        return false;
    };
    unsafe { out_frame.write(frame.into()) };
    true
}

#[unsafe(no_mangle)]
/// ### English
/// Releases a frame acquired with `xian_overlay_obs_acquire_frame`.
///
/// `consumer_fence` must be `0` or a `GLsync` created by the embedder *after* sampling the
/// texture. Ownership transfers to Rust and the embedder must NOT delete it; the render thread
/// waits on it before reusing the slot and deletes it afterwards.
///
/// ### 中文
/// 释放通过 `xian_overlay_obs_acquire_frame` 获取的帧。
///
/// `consumer_fence` 必须为 `0`，或是宿主在采样纹理*之后*创建的 `GLsync`。所有权转移给 Rust，
/// 宿主不要自行删除；渲染线程会在复用槽位前等待它，并在之后删除。
pub unsafe extern "C" fn xian_overlay_obs_release_frame(
    overlay: *const XianOverlay,
    slot: u32,
    consumer_fence: u64,
) {
    let Some(overlay) = (unsafe { overlay_ref(overlay) }) else {
        return;
    };
    let fence = unsafe { Fence::from_raw(consumer_fence) };
    overlay
        .system
        .submit_obs_consumer_fence(slot as usize, fence);
}
