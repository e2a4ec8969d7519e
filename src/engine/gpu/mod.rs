//! ### English
//! GPU abstraction shared by the capture, compositor and host threads.
//!
//! Every thread owns one [`GpuDevice`] bound to its own context; all contexts share one object
//! namespace (textures and sync objects created on one are valid on the others). Handles are
//! move-only and are released through the device that owns the context, so "handle is 0" turns
//! into "no handle" and double deletion cannot be expressed.
//!
//! ### 中文
//! 捕获、合成与宿主线程共用的 GPU 抽象。
//!
//! 每个线程持有一个绑定到自身上下文的 [`GpuDevice`]；所有上下文共享同一对象命名空间（在一个
//! 上下文创建的纹理与同步对象在其它上下文中同样有效）。句柄只能移动，并通过持有上下文的设备
//! 释放，因此“句柄为 0”变成“没有句柄”，重复删除在类型上无法表达。

mod factory;
mod fence;
pub mod gl;
pub mod headless;

pub use factory::{ContextRole, GpuContextFactory};
pub use fence::DeferredFenceRing;

use std::sync::Arc;

use dpi::PhysicalSize;

use crate::engine::error::OverlayError;
use crate::engine::geometry::{PixelRect, RectF, Rgba};

/// ### English
/// Raw texture name in the shared namespace (`0` = none).
///
/// ### 中文
/// 共享命名空间中的原始纹理名（`0` 表示无）。
pub type TextureId = u32;

/// ### English
/// Upper bound on target colors a mirror filter compares against.
///
/// ### 中文
/// 镜像颜色过滤可比较的目标颜色数量上限。
pub const MAX_FILTER_COLORS: usize = 8;

/// ### English
/// Non-owning copy of a fence handle (`GLsync` cast to `u64`, `0` = none).
///
/// Safe to pass across threads and wait on while the owner keeps the fence alive.
///
/// ### 中文
/// fence 句柄的非拥有拷贝（`GLsync` 转为 `u64`，`0` 表示无）。
///
/// 只要拥有者保持 fence 存活，就可以跨线程传递并等待。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FenceHandle(u64);

impl FenceHandle {
    pub const NONE: Self = Self(0);

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// ### English
/// Owned fence. Must end up in [`GpuDevice::delete_fence`] (directly or via
/// [`DeferredFenceRing`]), or be turned into a raw value to hand ownership to another thread.
///
/// ### 中文
/// 拥有所有权的 fence。最终必须交给 [`GpuDevice::delete_fence`]（直接或经由
/// [`DeferredFenceRing`]），或转成原始值把所有权交给其它线程。
#[derive(Debug)]
pub struct Fence(FenceHandle);

impl Fence {
    /// ### English
    /// Wraps a raw handle created by a device.
    ///
    /// # Safety
    /// `raw` must be a live fence not owned by anything else.
    ///
    /// ### 中文
    /// 包装由设备创建的原始句柄。
    ///
    /// # Safety
    /// `raw` 必须是仍然存活、且不被其它任何对象拥有的 fence。
    pub unsafe fn from_raw(raw: u64) -> Option<Self> {
        (raw != 0).then_some(Self(FenceHandle(raw)))
    }

    #[inline]
    pub fn handle(&self) -> FenceHandle {
        self.0
    }

    /// ### English
    /// Gives up ownership and returns the raw value.
    ///
    /// ### 中文
    /// 放弃所有权并返回原始值。
    #[inline]
    pub fn into_raw(self) -> u64 {
        let raw = self.0.0;
        std::mem::forget(self);
        raw
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        log::debug!("fence 0x{:x} dropped without deletion", self.0.0);
    }
}

/// ### English
/// Texture plus its allocated size.
///
/// ### 中文
/// 纹理及其分配尺寸。
#[derive(Debug)]
pub struct Texture {
    id: TextureId,
    size: PhysicalSize<u32>,
}

impl Texture {
    pub(crate) fn new(id: TextureId, size: PhysicalSize<u32>) -> Self {
        Self { id, size }
    }

    #[inline]
    pub fn id(&self) -> TextureId {
        self.id
    }

    #[inline]
    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub(crate) fn set_size(&mut self, size: PhysicalSize<u32>) {
        self.size = size;
    }

    #[inline]
    pub fn view(&self) -> TextureRef {
        TextureRef {
            id: self.id,
            size: self.size,
        }
    }
}

/// ### English
/// Borrowed view of a texture used in draw calls.
///
/// ### 中文
/// 绘制调用中使用的纹理借用视图。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureRef {
    pub id: TextureId,
    pub size: PhysicalSize<u32>,
}

/// ### English
/// Offscreen framebuffer with a color texture and an optional stencil renderbuffer.
///
/// ### 中文
/// 离屏 framebuffer，带颜色纹理与可选的 stencil renderbuffer。
#[derive(Debug)]
pub struct RenderTarget {
    pub(crate) framebuffer: u32,
    pub(crate) texture: Texture,
    pub(crate) stencil: u32,
}

impl RenderTarget {
    #[inline]
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    #[inline]
    pub fn size(&self) -> PhysicalSize<u32> {
        self.texture.size
    }
}

/// ### English
/// Where subsequent clears, blits and draws land.
///
/// ### 中文
/// 后续 clear、blit 与绘制的目标。
#[derive(Clone, Copy, Debug)]
pub enum DrawTarget<'a> {
    /// ### English
    /// A framebuffer owned by the host (`0` = default framebuffer).
    ///
    /// ### 中文
    /// 宿主持有的 framebuffer（`0` 为默认 framebuffer）。
    Host {
        framebuffer: u32,
        size: PhysicalSize<u32>,
    },
    Target(&'a RenderTarget),
}

/// ### English
/// Source of a framebuffer blit.
///
/// ### 中文
/// framebuffer blit 的来源。
#[derive(Clone, Copy, Debug)]
pub enum BlitSource {
    Framebuffer {
        framebuffer: u32,
        size: PhysicalSize<u32>,
    },
    Texture(TextureRef),
}

/// ### English
/// How a quad combines with what is already in the target.
///
/// ### 中文
/// 四边形与目标中已有内容的混合方式。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendMode {
    /// ### English
    /// Straight-alpha source over premultiplied destination.
    ///
    /// ### 中文
    /// 直通 alpha 源叠加到预乘目标上。
    #[default]
    Over,
    /// ### English
    /// Premultiplied source over destination (used for finished overlay frames).
    ///
    /// ### 中文
    /// 预乘源叠加到目标上（用于完成的 overlay 帧）。
    Premultiplied,
    /// ### English
    /// Overwrite without blending.
    ///
    /// ### 中文
    /// 不混合直接覆盖。
    Replace,
}

/// ### English
/// Color filter applied when a mirror is captured.
///
/// ### 中文
/// 捕获镜像时应用的颜色过滤。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MirrorFilter {
    pub targets: [Rgba; MAX_FILTER_COLORS],
    pub count: u32,
    pub output: Rgba,
    pub sensitivity: f32,
}

impl MirrorFilter {
    pub fn new(targets: &[Rgba], output: Rgba, sensitivity: f32) -> Self {
        let mut packed = [Rgba::TRANSPARENT; MAX_FILTER_COLORS];
        let count = targets.len().min(MAX_FILTER_COLORS);
        packed[..count].copy_from_slice(&targets[..count]);
        Self {
            targets: packed,
            count: count as u32,
            output,
            sensitivity,
        }
    }

    /// ### English
    /// Filter output for one sampled color.
    ///
    /// ### 中文
    /// 单个采样颜色的过滤输出。
    pub fn apply(&self, sample: Rgba) -> Rgba {
        let hit = sample.a > 0.0
            && self.targets[..self.count as usize]
                .iter()
                .any(|target| target.rgb_distance(sample) <= self.sensitivity);
        if hit { self.output } else { Rgba::TRANSPARENT }
    }
}

/// ### English
/// Fragment program selection plus its parameters.
///
/// ### 中文
/// 片元程序选择及其参数。
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Shading {
    /// ### English
    /// Flat `tint`.
    ///
    /// ### 中文
    /// 纯色 `tint`。
    Solid,
    /// ### English
    /// Texture sample multiplied by `tint`.
    ///
    /// ### 中文
    /// 纹理采样乘以 `tint`。
    Textured,
    /// ### English
    /// Like `Textured`, but texels within `sensitivity` of `key` are discarded.
    ///
    /// ### 中文
    /// 同 `Textured`，但与 `key` 距离在 `sensitivity` 内的纹素被丢弃。
    ColorKey { key: Rgba, sensitivity: f32 },
    /// ### English
    /// Vertical gradient from `top` to `bottom` across the quad.
    ///
    /// ### 中文
    /// 在四边形内从 `top` 到 `bottom` 的竖直渐变。
    Gradient { top: Rgba, bottom: Rgba },
    /// ### English
    /// Outline of `thickness` pixels along the quad edge, rounded by `radius` or elliptical.
    ///
    /// ### 中文
    /// 沿四边形边缘、宽 `thickness` 像素的描边，可按 `radius` 圆角或为椭圆。
    Border {
        thickness: f32,
        radius: f32,
        circle: bool,
    },
    MirrorFilter(MirrorFilter),
    /// ### English
    /// Texture sample with transparent texels near opaque ones painted `color`.
    ///
    /// ### 中文
    /// 纹理采样，并把靠近不透明纹素的透明纹素涂成 `color`。
    DynamicBorder { thickness: f32, color: Rgba },
}

/// ### English
/// One textured/solid quad.
///
/// `dst` is in target pixels with a top-left origin; `uv` is normalized texture space with a
/// top-left origin.
///
/// ### 中文
/// 一个纹理/纯色四边形。
///
/// `dst` 为目标像素坐标（左上角原点）；`uv` 为归一化纹理坐标（左上角原点）。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuadDraw {
    pub dst: RectF,
    pub texture: Option<TextureRef>,
    pub uv: RectF,
    pub tint: Rgba,
    pub opacity: f32,
    pub shading: Shading,
    pub blend: BlendMode,
}

impl QuadDraw {
    pub fn solid(dst: RectF, color: Rgba) -> Self {
        Self {
            dst,
            texture: None,
            uv: RectF::UNIT,
            tint: color,
            opacity: 1.0,
            shading: Shading::Solid,
            blend: BlendMode::Over,
        }
    }

    pub fn textured(dst: RectF, texture: TextureRef) -> Self {
        Self {
            dst,
            texture: Some(texture),
            uv: RectF::UNIT,
            tint: Rgba::WHITE,
            opacity: 1.0,
            shading: Shading::Textured,
            blend: BlendMode::Over,
        }
    }

    pub fn with_uv(mut self, uv: RectF) -> Self {
        self.uv = uv;
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn with_shading(mut self, shading: Shading) -> Self {
        self.shading = shading;
        self
    }

    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }
}

/// ### English
/// Per-context GPU command surface.
///
/// Implementations must be used only on the thread whose context they wrap. Hot-path methods
/// (`bind`, `clear`, `blit`, `draw`, fence operations) never fail loudly; they degrade to no-ops.
///
/// ### 中文
/// 单个上下文的 GPU 命令接口。
///
/// 实现只能在其包装的上下文所在线程使用。热路径方法（`bind`、`clear`、`blit`、`draw`、fence
/// 操作）从不显式失败，而是退化为空操作。
pub trait GpuDevice {
    /// ### English
    /// Allocates an RGBA8 texture; `pixels` are tightly packed rows, top row first.
    ///
    /// ### 中文
    /// 分配 RGBA8 纹理；`pixels` 为紧密排列的行数据，首行在最上方。
    fn create_texture(
        &mut self,
        size: PhysicalSize<u32>,
        pixels: Option<&[u8]>,
    ) -> Result<Texture, OverlayError>;

    /// ### English
    /// Replaces the full contents of `texture` (same layout as `create_texture`).
    ///
    /// ### 中文
    /// 替换 `texture` 的全部内容（布局同 `create_texture`）。
    fn upload_texture(&mut self, texture: &Texture, pixels: &[u8]);

    /// ### English
    /// Reallocates `texture` storage if `size` differs (contents become undefined).
    ///
    /// ### 中文
    /// 若 `size` 不同则重新分配 `texture` 存储（内容变为未定义）。
    fn resize_texture(&mut self, texture: &mut Texture, size: PhysicalSize<u32>);

    fn delete_texture(&mut self, texture: Texture);

    /// ### English
    /// Creates a framebuffer with a color texture; fails if the completeness check fails.
    ///
    /// ### 中文
    /// 创建带颜色纹理的 framebuffer；完整性检查失败时返回错误。
    fn create_render_target(
        &mut self,
        size: PhysicalSize<u32>,
        with_stencil: bool,
    ) -> Result<RenderTarget, OverlayError>;

    fn resize_render_target(
        &mut self,
        target: &mut RenderTarget,
        size: PhysicalSize<u32>,
    ) -> Result<(), OverlayError>;

    fn delete_render_target(&mut self, target: RenderTarget);

    fn bind(&mut self, target: DrawTarget<'_>);

    fn clear(&mut self, color: Rgba);

    /// ### English
    /// Copies `src` of `source` into `dst` of the bound target (nearest filtering, no blending).
    ///
    /// ### 中文
    /// 把 `source` 的 `src` 区域拷贝到当前目标的 `dst` 区域（最近邻过滤，不混合）。
    fn blit(&mut self, source: BlitSource, src: PixelRect, dst: PixelRect);

    fn draw(&mut self, quad: &QuadDraw);

    /// ### English
    /// Inserts a fence after all commands issued so far and flushes.
    ///
    /// ### 中文
    /// 在已提交的全部命令之后插入 fence 并 flush。
    fn insert_fence(&mut self) -> Option<Fence>;

    /// ### English
    /// GPU-side wait: later commands on this context run after `fence` signals. Never blocks the
    /// CPU.
    ///
    /// ### 中文
    /// GPU 侧等待：该上下文之后的命令会在 `fence` signal 之后执行；从不阻塞 CPU。
    fn wait_fence(&mut self, fence: FenceHandle);

    /// ### English
    /// Zero-timeout poll. Returns `true` once `fence` has signaled.
    ///
    /// ### 中文
    /// 零超时轮询；`fence` 已 signal 时返回 `true`。
    fn poll_fence(&mut self, fence: FenceHandle) -> bool;

    fn delete_fence(&mut self, fence: Fence);

    fn flush(&mut self);

    /// ### English
    /// Reads one pixel (top-left origin); diagnostics only.
    ///
    /// ### 中文
    /// 读取单个像素（左上角原点）；仅用于诊断。
    fn read_pixel(&mut self, source: BlitSource, x: u32, y: u32) -> Option<Rgba>;

    /// ### English
    /// Snapshots the state the host expects to find unchanged (bindings, blend, viewport).
    /// Only meaningful on the host context; paired with [`GpuDevice::restore_host_state`].
    ///
    /// ### 中文
    /// 保存宿主期望保持不变的状态（绑定、混合、viewport）；仅对宿主上下文有意义，
    /// 与 [`GpuDevice::restore_host_state`] 成对使用。
    fn save_host_state(&mut self) {}

    fn restore_host_state(&mut self) {}

    /// ### English
    /// Raw glow context for GUI painters that drive GL directly.
    ///
    /// ### 中文
    /// 供直接驱动 GL 的 GUI painter 使用的原始 glow 上下文。
    fn glow_context(&self) -> Option<Arc<glow::Context>> {
        None
    }
}
