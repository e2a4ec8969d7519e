//! ### English
//! Error type for initialization-time failures.
//!
//! The per-frame paths never return these; they degrade to "no texture / no fence" instead.
//!
//! ### 中文
//! 初始化阶段失败的错误类型。
//!
//! 逐帧热路径从不返回这些错误，而是退化为“无纹理 / 无 fence”。

use dpi::PhysicalSize;
use thiserror::Error;

/// ### English
/// Errors raised while creating contexts, GPU programs, render targets or threads.
///
/// ### 中文
/// 创建上下文、GPU 程序、渲染目标或线程时产生的错误。
#[derive(Error, Debug)]
pub enum OverlayError {
    /// Shared GL context could not be created
    #[error("Context creation failed: {0}")]
    ContextCreation(String),

    /// Embedder GLFW function table missing or invalid
    #[error("GLFW loader error: {0}")]
    GlfwLoad(String),

    /// Framebuffer completeness check failed
    #[error("Framebuffer incomplete (status 0x{status:04X}) for {width}x{height}")]
    FramebufferIncomplete { status: u32, width: u32, height: u32 },

    /// Shader stage failed to compile
    #[error("Shader compile failed for {program}: {log}")]
    ShaderCompile { program: &'static str, log: String },

    /// Shader program failed to link
    #[error("Shader link failed for {program}: {log}")]
    ShaderLink { program: &'static str, log: String },

    /// OS refused to spawn a worker thread
    #[error("Thread spawn failed: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    /// Worker thread did not report back in time
    #[error("Thread '{0}' did not finish initialization")]
    ThreadInitTimeout(&'static str),

    /// Config JSON failed to parse
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    /// Zero-sized or oversized surface
    #[error("Invalid size {}x{}", .0.width, .0.height)]
    InvalidSize(PhysicalSize<u32>),

    /// Subsystem used before its initialization succeeded
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),
}

impl OverlayError {
    /// ### English
    /// Rejects zero-sized surfaces.
    ///
    /// ### 中文
    /// 拒绝尺寸为 0 的表面。
    pub fn check_size(size: PhysicalSize<u32>) -> Result<PhysicalSize<u32>, Self> {
        if size.width == 0 || size.height == 0 || size.width > 16384 || size.height > 16384 {
            return Err(Self::InvalidSize(size));
        }
        Ok(size)
    }
}
