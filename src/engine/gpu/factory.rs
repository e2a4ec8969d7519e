//! ### English
//! Per-thread GPU context creation.
//!
//! ### 中文
//! 按线程创建 GPU 上下文。

use crate::engine::error::OverlayError;

use super::GpuDevice;

/// ### English
/// Which thread a device is created for.
///
/// ### 中文
/// 设备为哪个线程创建。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextRole {
    /// ### English
    /// The host's own context, already current on the calling (host render) thread.
    ///
    /// ### 中文
    /// 宿主自身的上下文，已在调用线程（宿主渲染线程）上 current。
    Host,
    /// ### English
    /// New shared context for the capture thread.
    ///
    /// ### 中文
    /// 为捕获线程新建的共享上下文。
    Capture,
    /// ### English
    /// New shared context for the overlay compositor thread.
    ///
    /// ### 中文
    /// 为 overlay 合成线程新建的共享上下文。
    Compositor,
}

impl ContextRole {
    pub fn label(self) -> &'static str {
        match self {
            ContextRole::Host => "host",
            ContextRole::Capture => "capture",
            ContextRole::Compositor => "compositor",
        }
    }
}

/// ### English
/// Creates a [`GpuDevice`] on the calling thread.
///
/// The factory itself is shared between threads; the device it returns is not and must stay on
/// the thread that created it.
///
/// ### 中文
/// 在调用线程上创建 [`GpuDevice`]。
///
/// 工厂本身可在线程间共享；返回的设备不可共享，必须留在创建它的线程上。
pub trait GpuContextFactory: Send + Sync {
    fn create_device(&self, role: ContextRole) -> Result<Box<dyn GpuDevice>, OverlayError>;
}
