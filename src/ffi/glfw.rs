use crate::engine::{EmbedderGlfwApi, install_embedder_glfw_api};

#[unsafe(no_mangle)]
/// ### English
/// Installs an embedder-provided GLFW function table (e.g. resolved through LWJGL).
///
/// Must be called before `xian_overlay_create`. All function pointers must come from the same
/// GLFW library instance that produced the `GLFWwindow*` passed to `xian_overlay_create`.
///
/// Returns `true` on success.
///
/// ### 中文
/// 安装由宿主提供的 GLFW 函数表（例如通过 LWJGL 解析得到）。
///
/// 必须在 `xian_overlay_create` 之前调用。所有函数指针必须来自同一个 GLFW 库实例
/// （也就是创建 `xian_overlay_create` 传入的 `GLFWwindow*` 的那个实例）。
///
/// 成功返回 `true`。
pub unsafe extern "C" fn xian_overlay_set_glfw_api(api: *const EmbedderGlfwApi) -> bool {
    if api.is_null() {
        return false;
    }

    let api = unsafe { *api };
    match install_embedder_glfw_api(api) {
        Ok(()) => true,
        Err(err) => {
            log::error!("rejected GLFW function table: {err}");
            false
        }
    }
}
