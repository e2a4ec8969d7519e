/// ### English
/// Overlay internals: config snapshots, the capture/compositor/coordination threads, host glue
/// and the GPU abstraction they share.
///
/// ### 中文
/// overlay 内部模块：配置快照、捕获/合成/协调线程、宿主胶水层，以及它们共用的 GPU 抽象。
pub mod capture;
pub mod compositor;
pub mod config;
pub mod coordination;
pub mod error;
pub mod geometry;
pub mod glfw;
pub mod gpu;
pub mod host;
pub mod lockfree;
pub mod logging;
pub mod service;
pub mod transition;

pub use compositor::{AcquiredFrame, DecodedImage, ImageKind};
pub use coordination::GameState;
pub use error::OverlayError;
pub use glfw::EmbedderGlfwApi;
pub(crate) use glfw::install_embedder_glfw_api;
pub use gpu::gl::GlfwContextFactory;
pub use gpu::{Fence, GpuContextFactory};
pub use host::HostCompositor;
pub use service::{OverlaySystem, OverlayTuning};
