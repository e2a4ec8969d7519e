/// ### English
/// Minimal GLFW binding driven by a function table the host hands over.
/// Used to create the capture/compositor shared offscreen contexts and to load GL symbols.
///
/// ### 中文
/// 由宿主提供函数表驱动的最小 GLFW 绑定。
/// 用于创建捕获/合成线程的共享离屏上下文，并加载 GL 符号。
mod loader;

pub use loader::{GlfwWindowPtr, LoadedGlfwApi};

use crate::engine::error::OverlayError;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
/// ### English
/// Function pointer table for the GLFW symbols this crate needs (e.g. from LWJGL).
///
/// All fields are raw addresses (`usize`). Every field except `glfw_get_current_context` must
/// be non-zero when installing.
///
/// ### 中文
/// 本 crate 所需 GLFW 符号的函数指针表（例如来自 LWJGL）。
///
/// 所有字段都是原始地址（`usize`）。安装时除 `glfw_get_current_context` 外均必须非 0。
pub struct EmbedderGlfwApi {
    pub glfw_get_proc_address: usize,
    pub glfw_make_context_current: usize,
    pub glfw_get_current_context: usize,
    pub glfw_default_window_hints: usize,
    pub glfw_window_hint: usize,
    pub glfw_get_window_attrib: usize,
    pub glfw_create_window: usize,
    pub glfw_destroy_window: usize,
}

/// ### English
/// Installs the host's GLFW function table. Must happen before any thread creates a context.
///
/// ### 中文
/// 安装宿主的 GLFW 函数表；必须在任何线程创建上下文之前完成。
pub(crate) fn install_embedder_glfw_api(api: EmbedderGlfwApi) -> Result<(), OverlayError> {
    loader::install(api)
}

/// ### English
/// Whether a table has been installed.
///
/// ### 中文
/// 是否已安装函数表。
pub(crate) fn is_installed() -> bool {
    LoadedGlfwApi::load().is_ok()
}
