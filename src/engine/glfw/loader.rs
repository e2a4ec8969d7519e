//! ### English
//! Process-wide GLFW function table and the few calls made through it.
//!
//! ### 中文
//! 进程级 GLFW 函数表以及经由它发出的少量调用。

use std::ffi::{CStr, c_char, c_int, c_void};
use std::sync::OnceLock;

use crate::engine::error::OverlayError;

use super::EmbedderGlfwApi;

#[repr(C)]
pub struct GLFWwindow {
    _private: [u8; 0],
}

#[repr(C)]
pub struct GLFWmonitor {
    _private: [u8; 0],
}

type GlfwGetProcAddress = unsafe extern "C" fn(*const c_char) -> *const c_void;
type GlfwMakeContextCurrent = unsafe extern "C" fn(*mut GLFWwindow);
type GlfwGetCurrentContext = unsafe extern "C" fn() -> *mut GLFWwindow;
type GlfwDefaultWindowHints = unsafe extern "C" fn();
type GlfwWindowHint = unsafe extern "C" fn(c_int, c_int);
type GlfwGetWindowAttrib = unsafe extern "C" fn(*mut GLFWwindow, c_int) -> c_int;
type GlfwCreateWindow = unsafe extern "C" fn(
    c_int,
    c_int,
    *const c_char,
    *mut GLFWmonitor,
    *mut GLFWwindow,
) -> *mut GLFWwindow;
type GlfwDestroyWindow = unsafe extern "C" fn(*mut GLFWwindow);

/// ### English
/// Raw GLFW window pointer.
///
/// ### 中文
/// GLFW window 裸指针。
pub type GlfwWindowPtr = *mut GLFWwindow;

static EMBEDDER_GLFW_API: OnceLock<LoadedGlfwApi> = OnceLock::new();

fn require(address: usize, name: &str) -> Result<usize, OverlayError> {
    if address == 0 {
        return Err(OverlayError::GlfwLoad(format!("{name} is NULL")));
    }
    Ok(address)
}

/// ### English
/// Validates and installs the table. A second install is rejected.
///
/// ### 中文
/// 校验并安装函数表；重复安装会被拒绝。
pub(super) fn install(api: EmbedderGlfwApi) -> Result<(), OverlayError> {
    let get_proc_address = require(api.glfw_get_proc_address, "glfw_get_proc_address")?;
    let make_context_current =
        require(api.glfw_make_context_current, "glfw_make_context_current")?;
    let default_window_hints =
        require(api.glfw_default_window_hints, "glfw_default_window_hints")?;
    let window_hint = require(api.glfw_window_hint, "glfw_window_hint")?;
    let get_window_attrib = require(api.glfw_get_window_attrib, "glfw_get_window_attrib")?;
    let create_window = require(api.glfw_create_window, "glfw_create_window")?;
    let destroy_window = require(api.glfw_destroy_window, "glfw_destroy_window")?;

    // SAFETY: the host guarantees every non-zero address points at the matching GLFW export.
    let table = unsafe {
        LoadedGlfwApi {
            get_proc_address: std::mem::transmute::<usize, GlfwGetProcAddress>(get_proc_address),
            make_context_current: std::mem::transmute::<usize, GlfwMakeContextCurrent>(
                make_context_current,
            ),
            get_current_context: (api.glfw_get_current_context != 0).then(|| {
                std::mem::transmute::<usize, GlfwGetCurrentContext>(api.glfw_get_current_context)
            }),
            default_window_hints: std::mem::transmute::<usize, GlfwDefaultWindowHints>(
                default_window_hints,
            ),
            window_hint: std::mem::transmute::<usize, GlfwWindowHint>(window_hint),
            get_window_attrib: std::mem::transmute::<usize, GlfwGetWindowAttrib>(
                get_window_attrib,
            ),
            create_window: std::mem::transmute::<usize, GlfwCreateWindow>(create_window),
            destroy_window: std::mem::transmute::<usize, GlfwDestroyWindow>(destroy_window),
        }
    };

    EMBEDDER_GLFW_API
        .set(table)
        .map_err(|_| OverlayError::GlfwLoad("GLFW table is already installed".to_string()))?;
    log::info!("GLFW function table installed");
    Ok(())
}

/// ### English
/// The installed GLFW entry points.
///
/// ### 中文
/// 已安装的 GLFW 入口。
#[derive(Clone, Copy)]
pub struct LoadedGlfwApi {
    get_proc_address: GlfwGetProcAddress,
    make_context_current: GlfwMakeContextCurrent,
    get_current_context: Option<GlfwGetCurrentContext>,
    default_window_hints: GlfwDefaultWindowHints,
    window_hint: GlfwWindowHint,
    get_window_attrib: GlfwGetWindowAttrib,
    create_window: GlfwCreateWindow,
    destroy_window: GlfwDestroyWindow,
}

impl LoadedGlfwApi {
    #[inline]
    pub fn load() -> Result<Self, OverlayError> {
        EMBEDDER_GLFW_API.get().copied().ok_or_else(|| {
            OverlayError::GlfwLoad(
                "GLFW table not installed; call xian_overlay_set_glfw_api first".to_string(),
            )
        })
    }

    #[inline]
    pub unsafe fn make_current(&self, window: GlfwWindowPtr) {
        unsafe { (self.make_context_current)(window) };
    }

    /// ### English
    /// Window whose context is current on the calling thread, if the table provides the call.
    ///
    /// ### 中文
    /// 调用线程上当前 current 的 window（若函数表提供了该调用）。
    #[inline]
    pub unsafe fn current_context(&self) -> Option<GlfwWindowPtr> {
        let get = self.get_current_context?;
        let window = unsafe { get() };
        (!window.is_null()).then_some(window)
    }

    #[inline]
    pub unsafe fn get_proc_address(&self, name: &CStr) -> *const c_void {
        unsafe { (self.get_proc_address)(name.as_ptr()) }
    }

    #[inline]
    pub unsafe fn destroy_window(&self, window: GlfwWindowPtr) {
        unsafe { (self.destroy_window)(window) };
    }

    /// ### English
    /// Creates a hidden 1x1 window whose context shares objects with `share`, copying the
    /// client API, version, profile and creation API of the shared context.
    ///
    /// ### 中文
    /// 创建一个隐藏的 1x1 window，其上下文与 `share` 共享对象，并沿用被共享上下文的客户端 API、
    /// 版本、profile 与创建 API。
    pub unsafe fn create_shared_offscreen_window(
        &self,
        share: GlfwWindowPtr,
        title: &CStr,
    ) -> Result<GlfwWindowPtr, OverlayError> {
        const GLFW_FALSE: c_int = 0;
        const GLFW_FOCUSED: c_int = 0x0002_0001;
        const GLFW_RESIZABLE: c_int = 0x0002_0003;
        const GLFW_VISIBLE: c_int = 0x0002_0004;
        const GLFW_CLIENT_API: c_int = 0x0002_2001;
        const GLFW_CONTEXT_VERSION_MAJOR: c_int = 0x0002_2002;
        const GLFW_CONTEXT_VERSION_MINOR: c_int = 0x0002_2003;
        const GLFW_OPENGL_FORWARD_COMPAT: c_int = 0x0002_2006;
        const GLFW_OPENGL_DEBUG_CONTEXT: c_int = 0x0002_2007;
        const GLFW_OPENGL_PROFILE: c_int = 0x0002_2008;
        const GLFW_CONTEXT_CREATION_API: c_int = 0x0002_200B;

        if share.is_null() {
            return Err(OverlayError::ContextCreation(
                "no host window to share with".to_string(),
            ));
        }

        let attrib = |name: c_int| unsafe { (self.get_window_attrib)(share, name) };
        let client_api = attrib(GLFW_CLIENT_API);
        let major = attrib(GLFW_CONTEXT_VERSION_MAJOR);
        let minor = attrib(GLFW_CONTEXT_VERSION_MINOR);
        let profile = attrib(GLFW_OPENGL_PROFILE);
        let forward = attrib(GLFW_OPENGL_FORWARD_COMPAT);
        let debug = attrib(GLFW_OPENGL_DEBUG_CONTEXT);
        let creation_api = attrib(GLFW_CONTEXT_CREATION_API);

        let window = unsafe {
            (self.default_window_hints)();
            (self.window_hint)(GLFW_VISIBLE, GLFW_FALSE);
            (self.window_hint)(GLFW_FOCUSED, GLFW_FALSE);
            (self.window_hint)(GLFW_RESIZABLE, GLFW_FALSE);
            for (hint, value) in [
                (GLFW_CLIENT_API, client_api),
                (GLFW_CONTEXT_VERSION_MAJOR, major),
                (GLFW_CONTEXT_VERSION_MINOR, minor),
                (GLFW_OPENGL_PROFILE, profile),
                (GLFW_CONTEXT_CREATION_API, creation_api),
            ] {
                if value > 0 {
                    (self.window_hint)(hint, value);
                }
            }
            (self.window_hint)(GLFW_OPENGL_FORWARD_COMPAT, forward);
            (self.window_hint)(GLFW_OPENGL_DEBUG_CONTEXT, debug);

            let window =
                (self.create_window)(1, 1, title.as_ptr(), std::ptr::null_mut(), share);
            (self.default_window_hints)();
            window
        };

        if window.is_null() {
            return Err(OverlayError::ContextCreation(
                "glfwCreateWindow failed for shared offscreen context".to_string(),
            ));
        }
        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_entries_are_rejected_before_install() {
        let err = install(EmbedderGlfwApi::default()).expect_err("null table");
        assert!(matches!(err, OverlayError::GlfwLoad(message) if message.contains("get_proc")));
        assert!(EMBEDDER_GLFW_API.get().is_none());
    }
}
