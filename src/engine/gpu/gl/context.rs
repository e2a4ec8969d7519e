/// ### English
/// GLFW-backed OpenGL contexts.
///
/// The capture and compositor threads each own a hidden offscreen window whose context shares
/// objects with the host window. The host thread borrows the context it already has current.
///
/// ### 中文
/// 基于 GLFW 的 OpenGL 上下文。
///
/// 捕获线程与合成线程各自持有一个隐藏的离屏 window，其上下文与宿主 window 共享对象；宿主线程
/// 则借用其已经 current 的上下文。
use std::cell::Cell;
use std::ffi::{CStr, CString, c_void};
use std::rc::Rc;
use std::sync::Arc;

use gleam::gl::{self, Gl};
use glow::HasContext as _;

use crate::engine::error::OverlayError;
use crate::engine::glfw::{self, GlfwWindowPtr, LoadedGlfwApi};
use crate::engine::gpu::{ContextRole, GpuContextFactory, GpuDevice};

use super::GlDevice;

fn parse_gl_version(version: &str) -> (u32, u32) {
    // "4.6.0 NVIDIA ..." or "OpenGL ES 3.2 ..."
    let mut numbers = version
        .split_whitespace()
        .find(|token| token.starts_with(|c: char| c.is_ascii_digit()))
        .into_iter()
        .flat_map(|token| token.split('.'))
        .map(|part| part.parse::<u32>().unwrap_or(0));
    let major = numbers.next().unwrap_or(0);
    let minor = numbers.next().unwrap_or(0);
    (major, minor)
}

thread_local! {
    static CURRENT_GLFW_WINDOW: Cell<GlfwWindowPtr> = const { Cell::new(std::ptr::null_mut()) };
}

fn proc_address(glfw: &LoadedGlfwApi, name: &str) -> *const c_void {
    match CString::new(name) {
        Ok(name) => unsafe { glfw.get_proc_address(name.as_c_str()) },
        Err(_) => std::ptr::null(),
    }
}

/// ### English
/// One thread's GL context plus its gleam and glow function tables.
///
/// ### 中文
/// 单个线程的 GL 上下文及其 gleam 与 glow 函数表。
pub struct GlContext {
    glfw: LoadedGlfwApi,
    /// ### English
    /// Offscreen window owned by this context, or null when borrowing the host's.
    ///
    /// ### 中文
    /// 本上下文持有的离屏 window；借用宿主上下文时为 null。
    owned_window: GlfwWindowPtr,
    gl: Rc<dyn Gl>,
    glow: Arc<glow::Context>,
    version: (u32, u32),
    is_gles: bool,
}

impl GlContext {
    /// ### English
    /// Creates a hidden window sharing objects with `share` and makes it current here.
    /// Call on the thread that will own the context.
    ///
    /// ### 中文
    /// 创建与 `share` 共享对象的隐藏 window，并在当前线程设为 current；须在将持有该上下文的
    /// 线程上调用。
    pub fn create_shared(share: GlfwWindowPtr, title: &CStr) -> Result<Self, OverlayError> {
        let glfw = LoadedGlfwApi::load()?;
        let window = unsafe { glfw.create_shared_offscreen_window(share, title)? };
        unsafe { glfw.make_current(window) };
        CURRENT_GLFW_WINDOW.with(|current| current.set(window));
        Self::load(glfw, window)
    }

    /// ### English
    /// Wraps the context already current on the calling (host) thread. Never destroys it.
    ///
    /// ### 中文
    /// 包装调用线程（宿主线程）上已 current 的上下文；不会销毁它。
    pub fn borrow_current() -> Result<Self, OverlayError> {
        let glfw = LoadedGlfwApi::load()?;
        if let Some(window) = unsafe { glfw.current_context() } {
            CURRENT_GLFW_WINDOW.with(|current| current.set(window));
        }
        Self::load(glfw, std::ptr::null_mut())
    }

    fn load(glfw: LoadedGlfwApi, owned_window: GlfwWindowPtr) -> Result<Self, OverlayError> {
        let glow =
            unsafe { glow::Context::from_loader_function(|name| proc_address(&glfw, name)) };
        let version_string = unsafe { glow.get_parameter_string(glow::VERSION) };
        if version_string.is_empty() {
            return Err(OverlayError::ContextCreation(
                "no GL context is current".to_string(),
            ));
        }
        let is_gles = version_string.starts_with("OpenGL ES");
        let version = parse_gl_version(&version_string);

        let gl: Rc<dyn Gl> = unsafe {
            if is_gles {
                gl::GlesFns::load_with(|name| proc_address(&glfw, name))
            } else {
                gl::GlFns::load_with(|name| proc_address(&glfw, name))
            }
        };

        log::info!("GL context ready: {version_string}");
        Ok(Self {
            glfw,
            owned_window,
            gl,
            glow: Arc::new(glow),
            version,
            is_gles,
        })
    }

    /// ### English
    /// Makes this context current on the calling thread (no-op if it already is).
    ///
    /// ### 中文
    /// 使该上下文在调用线程上 current（已是 current 时为空操作）。
    pub fn make_current(&self) {
        if self.owned_window.is_null() {
            return;
        }
        CURRENT_GLFW_WINDOW.with(|current| {
            if current.get() == self.owned_window {
                return;
            }
            unsafe { self.glfw.make_current(self.owned_window) };
            current.set(self.owned_window);
        });
    }

    pub fn gleam(&self) -> Rc<dyn Gl> {
        self.gl.clone()
    }

    pub fn glow(&self) -> Arc<glow::Context> {
        self.glow.clone()
    }

    /// ### English
    /// Whether GLSL 330 core programs and `glBlitFramebuffer` are available.
    ///
    /// ### 中文
    /// 是否支持 GLSL 330 core 程序与 `glBlitFramebuffer`。
    pub fn supports_core_330(&self) -> bool {
        !self.is_gles && self.version >= (3, 3)
    }

    pub fn is_gles(&self) -> bool {
        self.is_gles
    }
}

impl Drop for GlContext {
    fn drop(&mut self) {
        if self.owned_window.is_null() {
            return;
        }
        unsafe {
            self.glfw.make_current(std::ptr::null_mut());
            CURRENT_GLFW_WINDOW.with(|current| {
                if current.get() == self.owned_window {
                    current.set(std::ptr::null_mut());
                }
            });
            self.glfw.destroy_window(self.owned_window);
        }
    }
}

/// ### English
/// Creates GL devices for each thread role, sharing with the host window.
///
/// ### 中文
/// 为各线程角色创建 GL 设备，与宿主 window 共享对象。
pub struct GlfwContextFactory {
    /// ### English
    /// Host `GLFWwindow*` stored as an address so the factory is `Send + Sync`.
    ///
    /// ### 中文
    /// 以地址形式保存的宿主 `GLFWwindow*`，使工厂满足 `Send + Sync`。
    host_window: usize,
}

impl GlfwContextFactory {
    pub fn new(host_window: *mut c_void) -> Result<Self, OverlayError> {
        if !glfw::is_installed() {
            return Err(OverlayError::NotInitialized("GLFW function table"));
        }
        if host_window.is_null() {
            return Err(OverlayError::ContextCreation(
                "host window pointer is null".to_string(),
            ));
        }
        Ok(Self {
            host_window: host_window as usize,
        })
    }
}

impl GpuContextFactory for GlfwContextFactory {
    fn create_device(&self, role: ContextRole) -> Result<Box<dyn GpuDevice>, OverlayError> {
        let context = match role {
            ContextRole::Host => GlContext::borrow_current()?,
            ContextRole::Capture => {
                GlContext::create_shared(self.host_window as GlfwWindowPtr, c"xian-overlay-capture")?
            }
            ContextRole::Compositor => GlContext::create_shared(
                self.host_window as GlfwWindowPtr,
                c"xian-overlay-compositor",
            )?,
        };
        Ok(Box::new(GlDevice::new(context, role)?))
    }
}
