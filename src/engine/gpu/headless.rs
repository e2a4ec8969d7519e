//! ### English
//! Software [`GpuDevice`] with a shared object namespace.
//!
//! Used when no real GL is available (tests, CI). Every device cloned from one [`HeadlessGpu`]
//! sees the same textures, framebuffers and fences, like contexts in one share group. Fences can
//! signal on insertion or be held until signaled by hand, so gating logic is testable. Every
//! texture write or sample and every fence operation is recorded as a [`GpuEvent`].
//!
//! ### 中文
//! 带共享对象命名空间的软件 [`GpuDevice`]。
//!
//! 在没有真实 GL 时使用（测试、CI）。同一个 [`HeadlessGpu`] 派生出的所有设备看到相同的纹理、
//! framebuffer 与 fence，如同同一共享组中的上下文。fence 可以在插入时立即 signal，也可以保持
//! 未 signal 直到手动触发，便于测试门控逻辑。每次纹理写入或采样以及每次 fence 操作都会记录为
//! [`GpuEvent`]。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use dpi::PhysicalSize;
use parking_lot::Mutex;

use crate::engine::error::OverlayError;
use crate::engine::geometry::{PixelRect, Rgba};

use super::{
    BlendMode, BlitSource, ContextRole, DrawTarget, Fence, FenceHandle, GpuContextFactory,
    GpuDevice, QuadDraw, RenderTarget, Shading, Texture, TextureId,
};

const EVENT_CAPACITY: usize = 8192;

/// ### English
/// One recorded GPU operation.
///
/// ### 中文
/// 一条记录下来的 GPU 操作。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpuEvent {
    Write { texture: TextureId },
    Sample { texture: TextureId },
    FenceInserted { fence: u64 },
    Wait { fence: u64 },
    Poll { fence: u64, signaled: bool },
    Deleted { fence: u64 },
    /// ### English
    /// A wait, poll or delete on a fence that was never created or already deleted.
    ///
    /// ### 中文
    /// 对从未创建或已删除的 fence 进行等待、轮询或删除。
    InvalidFence { fence: u64 },
}

#[derive(Clone, Debug)]
struct Surface {
    size: PhysicalSize<u32>,
    /// Rows top first.
    pixels: Vec<Rgba>,
}

impl Surface {
    fn new(size: PhysicalSize<u32>, fill: Rgba) -> Self {
        Self {
            size,
            pixels: vec![fill; size.width as usize * size.height as usize],
        }
    }

    fn bounds(&self) -> PixelRect {
        PixelRect::from_size(self.size)
    }

    fn get(&self, x: i32, y: i32) -> Rgba {
        if x < 0 || y < 0 || x >= self.size.width as i32 || y >= self.size.height as i32 {
            return Rgba::TRANSPARENT;
        }
        self.pixels[y as usize * self.size.width as usize + x as usize]
    }

    fn set(&mut self, x: i32, y: i32, color: Rgba) {
        if x < 0 || y < 0 || x >= self.size.width as i32 || y >= self.size.height as i32 {
            return;
        }
        let width = self.size.width as usize;
        self.pixels[y as usize * width + x as usize] = color;
    }

    /// Nearest sample at normalized coordinates (clamp to edge).
    fn sample(&self, u: f32, v: f32) -> Rgba {
        if self.size.width == 0 || self.size.height == 0 {
            return Rgba::TRANSPARENT;
        }
        let x = ((u * self.size.width as f32).floor() as i32).clamp(0, self.size.width as i32 - 1);
        let y =
            ((v * self.size.height as f32).floor() as i32).clamp(0, self.size.height as i32 - 1);
        self.get(x, y)
    }
}

#[derive(Clone, Copy, Debug)]
struct FenceState {
    signaled: bool,
}

struct HeadlessState {
    next_object: u32,
    next_fence: u64,
    textures: HashMap<TextureId, Surface>,
    framebuffers: HashMap<u32, TextureId>,
    host: Surface,
    fences: HashMap<u64, FenceState>,
    auto_signal: bool,
    fail_render_targets: bool,
    draw_calls: u64,
    events: VecDeque<GpuEvent>,
}

impl HeadlessState {
    fn record(&mut self, event: GpuEvent) {
        if self.events.len() == EVENT_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn alloc_object(&mut self) -> u32 {
        self.next_object += 1;
        self.next_object
    }

    /// Texture behind a framebuffer, `None` for the host surface.
    fn framebuffer_texture(&self, framebuffer: u32) -> Option<TextureId> {
        if framebuffer == 0 {
            return None;
        }
        self.framebuffers.get(&framebuffer).copied()
    }

    fn surface(&self, texture: Option<TextureId>) -> Option<&Surface> {
        match texture {
            None => Some(&self.host),
            Some(id) => self.textures.get(&id),
        }
    }

    fn surface_mut(&mut self, texture: Option<TextureId>) -> Option<&mut Surface> {
        match texture {
            None => Some(&mut self.host),
            Some(id) => self.textures.get_mut(&id),
        }
    }

    fn fence_op(&mut self, fence: FenceHandle) -> Option<FenceState> {
        let state = self.fences.get(&fence.raw()).copied();
        if state.is_none() {
            self.record(GpuEvent::InvalidFence { fence: fence.raw() });
        }
        state
    }
}

/// ### English
/// Shared software GPU. Clone it freely; call [`HeadlessGpu::device`] once per thread.
///
/// ### 中文
/// 共享的软件 GPU。可随意克隆；每个线程调用一次 [`HeadlessGpu::device`]。
#[derive(Clone)]
pub struct HeadlessGpu {
    shared: Arc<Mutex<HeadlessState>>,
}

impl Default for HeadlessGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessGpu {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(HeadlessState {
                next_object: 0,
                next_fence: 0x1000,
                textures: HashMap::new(),
                framebuffers: HashMap::new(),
                host: Surface::new(PhysicalSize::new(0, 0), Rgba::TRANSPARENT),
                fences: HashMap::new(),
                auto_signal: true,
                fail_render_targets: false,
                draw_calls: 0,
                events: VecDeque::new(),
            })),
        }
    }

    pub fn device(&self) -> HeadlessDevice {
        HeadlessDevice {
            shared: Arc::clone(&self.shared),
            bound: None,
        }
    }

    /// ### English
    /// When `false`, new fences stay unsignaled until [`Self::signal_all`] / [`Self::signal`].
    ///
    /// ### 中文
    /// 为 `false` 时，新 fence 保持未 signal，直到调用 [`Self::signal_all`] / [`Self::signal`]。
    pub fn set_auto_signal(&self, auto_signal: bool) {
        self.shared.lock().auto_signal = auto_signal;
    }

    pub fn signal_all(&self) {
        for state in self.shared.lock().fences.values_mut() {
            state.signaled = true;
        }
    }

    pub fn signal(&self, fence: FenceHandle) {
        if let Some(state) = self.shared.lock().fences.get_mut(&fence.raw()) {
            state.signaled = true;
        }
    }

    /// ### English
    /// Makes every following render target creation fail.
    ///
    /// ### 中文
    /// 使之后的所有渲染目标创建失败。
    pub fn set_fail_render_targets(&self, fail: bool) {
        self.shared.lock().fail_render_targets = fail;
    }

    /// ### English
    /// Replaces the host's default framebuffer contents (what the game rendered this frame).
    ///
    /// ### 中文
    /// 替换宿主默认 framebuffer 的内容（本帧游戏渲染的画面）。
    pub fn set_host_frame(&self, size: PhysicalSize<u32>, color: Rgba) {
        self.shared.lock().host = Surface::new(size, color);
    }

    /// ### English
    /// Paints one rectangle of the host framebuffer.
    ///
    /// ### 中文
    /// 在宿主 framebuffer 上绘制一个矩形。
    pub fn paint_host(&self, rect: PixelRect, color: Rgba) {
        let mut state = self.shared.lock();
        let rect = rect.clamp_to(state.host.bounds());
        for y in rect.y..rect.y + rect.height {
            for x in rect.x..rect.x + rect.width {
                state.host.set(x, y, color);
            }
        }
    }

    pub fn host_pixel(&self, x: u32, y: u32) -> Rgba {
        self.shared.lock().host.get(x as i32, y as i32)
    }

    pub fn texture_pixel(&self, texture: TextureId, x: u32, y: u32) -> Option<Rgba> {
        let state = self.shared.lock();
        state
            .textures
            .get(&texture)
            .map(|surface| surface.get(x as i32, y as i32))
    }

    pub fn texture_count(&self) -> usize {
        self.shared.lock().textures.len()
    }

    pub fn framebuffer_count(&self) -> usize {
        self.shared.lock().framebuffers.len()
    }

    pub fn fence_alive(&self, fence: FenceHandle) -> bool {
        self.shared.lock().fences.contains_key(&fence.raw())
    }

    pub fn live_fence_count(&self) -> usize {
        self.shared.lock().fences.len()
    }

    pub fn draw_calls(&self) -> u64 {
        self.shared.lock().draw_calls
    }

    pub fn events(&self) -> Vec<GpuEvent> {
        self.shared.lock().events.iter().copied().collect()
    }

    /// ### English
    /// Returns and clears the event log.
    ///
    /// ### 中文
    /// 返回并清空事件日志。
    pub fn take_events(&self) -> Vec<GpuEvent> {
        self.shared.lock().events.drain(..).collect()
    }
}

impl GpuContextFactory for HeadlessGpu {
    fn create_device(&self, role: ContextRole) -> Result<Box<dyn GpuDevice>, OverlayError> {
        log::debug!("headless {} device created", role.label());
        Ok(Box::new(self.device()))
    }
}

#[derive(Clone, Copy, Debug)]
struct Bound {
    /// `None` = host surface.
    texture: Option<TextureId>,
}

/// ### English
/// One thread's view of a [`HeadlessGpu`].
///
/// ### 中文
/// 某个线程对 [`HeadlessGpu`] 的视图。
pub struct HeadlessDevice {
    shared: Arc<Mutex<HeadlessState>>,
    bound: Option<Bound>,
}

fn decode_pixels(size: PhysicalSize<u32>, pixels: &[u8]) -> Option<Vec<Rgba>> {
    let expected = size.width as usize * size.height as usize * 4;
    if pixels.len() != expected {
        log::warn!(
            "pixel upload size mismatch: {} bytes for {}x{}",
            pixels.len(),
            size.width,
            size.height
        );
        return None;
    }
    Some(
        pixels
            .chunks_exact(4)
            .map(|p| Rgba::from_rgba8(p[0], p[1], p[2], p[3]))
            .collect(),
    )
}

fn multiply(a: Rgba, b: Rgba) -> Rgba {
    Rgba::new(a.r * b.r, a.g * b.g, a.b * b.b, a.a * b.a)
}

fn blend(mode: BlendMode, src: Rgba, dst: Rgba) -> Rgba {
    match mode {
        BlendMode::Replace => src,
        BlendMode::Over => {
            let inv = 1.0 - src.a;
            Rgba::new(
                src.r * src.a + dst.r * inv,
                src.g * src.a + dst.g * inv,
                src.b * src.a + dst.b * inv,
                src.a + dst.a * inv,
            )
        }
        BlendMode::Premultiplied => {
            let inv = 1.0 - src.a;
            Rgba::new(
                src.r + dst.r * inv,
                src.g + dst.g * inv,
                src.b + dst.b * inv,
                src.a + dst.a * inv,
            )
        }
    }
}

/// ### English
/// Whether a point `(px, py)` local to a `w`×`h` quad lies on its outline.
/// Returns `None` when the point is outside the rounded/elliptical shape.
///
/// ### 中文
/// 判断 `w`×`h` 四边形内局部坐标 `(px, py)` 是否位于描边上；点在圆角/椭圆形状之外时返回 `None`。
fn on_outline(
    px: f32,
    py: f32,
    w: f32,
    h: f32,
    thickness: f32,
    radius: f32,
    circle: bool,
) -> Option<bool> {
    if circle {
        let (a, b) = (w * 0.5, h * 0.5);
        let (dx, dy) = (px - a, py - b);
        if (dx / a).powi(2) + (dy / b).powi(2) > 1.0 {
            return None;
        }
        let (ia, ib) = (a - thickness, b - thickness);
        if ia <= 0.0 || ib <= 0.0 {
            return Some(true);
        }
        return Some((dx / ia).powi(2) + (dy / ib).powi(2) >= 1.0);
    }

    let r = radius.min(w * 0.5).min(h * 0.5).max(0.0);
    let qx = (r - px).max(px - (w - r)).max(0.0);
    let qy = (r - py).max(py - (h - r)).max(0.0);
    if r > 0.0 && qx > 0.0 && qy > 0.0 {
        let inward = r - (qx * qx + qy * qy).sqrt();
        if inward < 0.0 {
            return None;
        }
        return Some(inward < thickness);
    }
    let edge = px.min(py).min(w - px).min(h - py);
    Some(edge < thickness)
}

impl HeadlessDevice {
    fn bound_texture(&self) -> Option<Option<TextureId>> {
        self.bound.map(|bound| bound.texture)
    }

    fn source_texture(state: &HeadlessState, source: BlitSource) -> Option<TextureId> {
        match source {
            BlitSource::Framebuffer { framebuffer, .. } => state.framebuffer_texture(framebuffer),
            BlitSource::Texture(texture) => Some(texture.id),
        }
    }

    fn shade(
        quad: &QuadDraw,
        texture: Option<&Surface>,
        u: f32,
        v: f32,
        local: (f32, f32),
    ) -> Option<Rgba> {
        let sample = || {
            let su = quad.uv.x + u * quad.uv.width;
            let sv = quad.uv.y + v * quad.uv.height;
            texture.map_or(Rgba::WHITE, |surface| surface.sample(su, sv))
        };
        let color = match quad.shading {
            Shading::Solid => quad.tint,
            Shading::Textured => multiply(sample(), quad.tint),
            Shading::ColorKey { key, sensitivity } => {
                let texel = sample();
                if texel.rgb_distance(key) <= sensitivity {
                    return None;
                }
                multiply(texel, quad.tint)
            }
            Shading::Gradient { top, bottom } => Rgba::new(
                top.r + (bottom.r - top.r) * v,
                top.g + (bottom.g - top.g) * v,
                top.b + (bottom.b - top.b) * v,
                top.a + (bottom.a - top.a) * v,
            ),
            Shading::Border {
                thickness,
                radius,
                circle,
            } => {
                let on = on_outline(
                    local.0,
                    local.1,
                    quad.dst.width,
                    quad.dst.height,
                    thickness,
                    radius,
                    circle,
                )?;
                if !on {
                    return None;
                }
                quad.tint
            }
            Shading::MirrorFilter(filter) => filter.apply(sample()),
            Shading::DynamicBorder { thickness, color } => {
                let texel = sample();
                if texel.a > 0.0 {
                    texel
                } else if let Some(surface) = texture {
                    let su = quad.uv.x + u * quad.uv.width;
                    let sv = quad.uv.y + v * quad.uv.height;
                    let cx = (su * surface.size.width as f32).floor() as i32;
                    let cy = (sv * surface.size.height as f32).floor() as i32;
                    let reach = thickness.ceil() as i32;
                    let near = (-reach..=reach).any(|oy| {
                        (-reach..=reach).any(|ox| {
                            ((ox * ox + oy * oy) as f32).sqrt() <= thickness
                                && surface.get(cx + ox, cy + oy).a > 0.0
                        })
                    });
                    if near { color } else { Rgba::TRANSPARENT }
                } else {
                    Rgba::TRANSPARENT
                }
            }
        };
        Some(color)
    }
}

impl GpuDevice for HeadlessDevice {
    fn create_texture(
        &mut self,
        size: PhysicalSize<u32>,
        pixels: Option<&[u8]>,
    ) -> Result<Texture, OverlayError> {
        let size = OverlayError::check_size(size)?;
        let mut surface = Surface::new(size, Rgba::TRANSPARENT);
        if let Some(decoded) = pixels.and_then(|pixels| decode_pixels(size, pixels)) {
            surface.pixels = decoded;
        }
        let mut state = self.shared.lock();
        let id = state.alloc_object();
        state.textures.insert(id, surface);
        state.record(GpuEvent::Write { texture: id });
        Ok(Texture::new(id, size))
    }

    fn upload_texture(&mut self, texture: &Texture, pixels: &[u8]) {
        let Some(decoded) = decode_pixels(texture.size(), pixels) else {
            return;
        };
        let mut state = self.shared.lock();
        if let Some(surface) = state.textures.get_mut(&texture.id()) {
            surface.pixels = decoded;
            state.record(GpuEvent::Write {
                texture: texture.id(),
            });
        }
    }

    fn resize_texture(&mut self, texture: &mut Texture, size: PhysicalSize<u32>) {
        if texture.size() == size || OverlayError::check_size(size).is_err() {
            return;
        }
        let mut state = self.shared.lock();
        if let Some(surface) = state.textures.get_mut(&texture.id()) {
            *surface = Surface::new(size, Rgba::TRANSPARENT);
            texture.set_size(size);
        }
    }

    fn delete_texture(&mut self, texture: Texture) {
        self.shared.lock().textures.remove(&texture.id());
    }

    fn create_render_target(
        &mut self,
        size: PhysicalSize<u32>,
        with_stencil: bool,
    ) -> Result<RenderTarget, OverlayError> {
        let size = OverlayError::check_size(size)?;
        let mut state = self.shared.lock();
        if state.fail_render_targets {
            return Err(OverlayError::FramebufferIncomplete {
                status: 0x8CD6,
                width: size.width,
                height: size.height,
            });
        }
        let texture = state.alloc_object();
        state
            .textures
            .insert(texture, Surface::new(size, Rgba::TRANSPARENT));
        let framebuffer = state.alloc_object();
        state.framebuffers.insert(framebuffer, texture);
        let stencil = if with_stencil { state.alloc_object() } else { 0 };
        Ok(RenderTarget {
            framebuffer,
            texture: Texture::new(texture, size),
            stencil,
        })
    }

    fn resize_render_target(
        &mut self,
        target: &mut RenderTarget,
        size: PhysicalSize<u32>,
    ) -> Result<(), OverlayError> {
        let size = OverlayError::check_size(size)?;
        if target.size() == size {
            return Ok(());
        }
        let mut state = self.shared.lock();
        if state.fail_render_targets {
            return Err(OverlayError::FramebufferIncomplete {
                status: 0x8CD6,
                width: size.width,
                height: size.height,
            });
        }
        if let Some(surface) = state.textures.get_mut(&target.texture.id()) {
            *surface = Surface::new(size, Rgba::TRANSPARENT);
        }
        target.texture.set_size(size);
        Ok(())
    }

    fn delete_render_target(&mut self, target: RenderTarget) {
        let mut state = self.shared.lock();
        state.framebuffers.remove(&target.framebuffer);
        state.textures.remove(&target.texture.id());
    }

    fn bind(&mut self, target: DrawTarget<'_>) {
        let texture = match target {
            DrawTarget::Host { framebuffer, size } => {
                let mut state = self.shared.lock();
                let texture = state.framebuffer_texture(framebuffer);
                if texture.is_none() && state.host.size != size {
                    state.host = Surface::new(size, Rgba::TRANSPARENT);
                }
                texture
            }
            DrawTarget::Target(target) => Some(target.texture.id()),
        };
        self.bound = Some(Bound { texture });
    }

    fn clear(&mut self, color: Rgba) {
        let Some(texture) = self.bound_texture() else {
            return;
        };
        let mut state = self.shared.lock();
        if let Some(surface) = state.surface_mut(texture) {
            surface.pixels.fill(color);
        }
        if let Some(id) = texture {
            state.record(GpuEvent::Write { texture: id });
        }
    }

    fn blit(&mut self, source: BlitSource, src: PixelRect, dst: PixelRect) {
        let Some(target) = self.bound_texture() else {
            return;
        };
        if src.is_empty() || dst.is_empty() {
            return;
        }
        let mut state = self.shared.lock();
        let source_id = Self::source_texture(&state, source);
        let Some(from) = state.surface(source_id).cloned() else {
            return;
        };
        let Some(to) = state.surface_mut(target) else {
            return;
        };
        let clipped = dst.clamp_to(to.bounds());
        for y in clipped.y..clipped.y + clipped.height {
            for x in clipped.x..clipped.x + clipped.width {
                let fx = (x - dst.x) as f32 + 0.5;
                let fy = (y - dst.y) as f32 + 0.5;
                let sx = src.x + (fx * src.width as f32 / dst.width as f32).floor() as i32;
                let sy = src.y + (fy * src.height as f32 / dst.height as f32).floor() as i32;
                to.set(x, y, from.get(sx, sy));
            }
        }
        if let Some(id) = source_id {
            state.record(GpuEvent::Sample { texture: id });
        }
        if let Some(id) = target {
            state.record(GpuEvent::Write { texture: id });
        }
    }

    fn draw(&mut self, quad: &QuadDraw) {
        let Some(target) = self.bound_texture() else {
            return;
        };
        if quad.dst.is_empty() {
            return;
        }
        let mut state = self.shared.lock();
        state.draw_calls += 1;
        let texture_id = quad.texture.map(|texture| texture.id);
        let texture = match texture_id {
            Some(id) => match state.textures.get(&id) {
                Some(surface) => Some(surface.clone()),
                None => return,
            },
            None => None,
        };
        let Some(to) = state.surface_mut(target) else {
            return;
        };

        let dst = quad.dst;
        let area = PixelRect::new(
            dst.x.floor() as i32,
            dst.y.floor() as i32,
            (dst.right().ceil() - dst.x.floor()) as i32,
            (dst.bottom().ceil() - dst.y.floor()) as i32,
        )
        .clamp_to(to.bounds());
        let opacity = quad.opacity.clamp(0.0, 1.0);

        for y in area.y..area.y + area.height {
            for x in area.x..area.x + area.width {
                let cx = x as f32 + 0.5;
                let cy = y as f32 + 0.5;
                // Pixel-center coverage, like GL rasterization.
                if cx < dst.x || cx >= dst.right() || cy < dst.y || cy >= dst.bottom() {
                    continue;
                }
                let local = (cx - dst.x, cy - dst.y);
                let u = local.0 / dst.width;
                let v = local.1 / dst.height;
                let Some(mut color) = Self::shade(quad, texture.as_ref(), u, v, local) else {
                    continue;
                };
                match quad.blend {
                    BlendMode::Premultiplied => {
                        color = Rgba::new(
                            color.r * opacity,
                            color.g * opacity,
                            color.b * opacity,
                            color.a * opacity,
                        )
                    }
                    _ => color.a *= opacity,
                }
                let out = blend(quad.blend, color, to.get(x, y));
                to.set(x, y, out);
            }
        }

        if let Some(id) = texture_id {
            state.record(GpuEvent::Sample { texture: id });
        }
        if let Some(id) = target {
            state.record(GpuEvent::Write { texture: id });
        }
    }

    fn insert_fence(&mut self) -> Option<Fence> {
        let mut state = self.shared.lock();
        state.next_fence += 1;
        let raw = state.next_fence;
        let signaled = state.auto_signal;
        state.fences.insert(raw, FenceState { signaled });
        state.record(GpuEvent::FenceInserted { fence: raw });
        // SAFETY: freshly created above and owned by nobody else.
        unsafe { Fence::from_raw(raw) }
    }

    fn wait_fence(&mut self, fence: FenceHandle) {
        if fence.is_none() {
            return;
        }
        let mut state = self.shared.lock();
        if state.fence_op(fence).is_some() {
            state.record(GpuEvent::Wait { fence: fence.raw() });
        }
    }

    fn poll_fence(&mut self, fence: FenceHandle) -> bool {
        if fence.is_none() {
            return false;
        }
        let mut state = self.shared.lock();
        let Some(fence_state) = state.fence_op(fence) else {
            return false;
        };
        state.record(GpuEvent::Poll {
            fence: fence.raw(),
            signaled: fence_state.signaled,
        });
        fence_state.signaled
    }

    fn delete_fence(&mut self, fence: Fence) {
        let raw = fence.into_raw();
        let mut state = self.shared.lock();
        if state.fences.remove(&raw).is_some() {
            state.record(GpuEvent::Deleted { fence: raw });
        } else {
            state.record(GpuEvent::InvalidFence { fence: raw });
        }
    }

    fn flush(&mut self) {}

    fn read_pixel(&mut self, source: BlitSource, x: u32, y: u32) -> Option<Rgba> {
        let state = self.shared.lock();
        let texture = Self::source_texture(&state, source);
        let surface = state.surface(texture)?;
        (x < surface.size.width && y < surface.size.height)
            .then(|| surface.get(x as i32, y as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::geometry::RectF;
    use crate::engine::gpu::MirrorFilter;

    fn close(a: Rgba, b: Rgba) -> bool {
        (a.r - b.r).abs() < 1e-3
            && (a.g - b.g).abs() < 1e-3
            && (a.b - b.b).abs() < 1e-3
            && (a.a - b.a).abs() < 1e-3
    }

    #[test]
    fn premultiplied_composite_over_host_frame() {
        let gpu = HeadlessGpu::new();
        let mut device = gpu.device();
        let size = PhysicalSize::new(4, 4);
        gpu.set_host_frame(size, Rgba::new(0.0, 0.0, 1.0, 1.0));

        let target = device.create_render_target(size, false).expect("target");
        device.bind(DrawTarget::Target(&target));
        device.clear(Rgba::TRANSPARENT);
        device.draw(&QuadDraw::solid(
            RectF::new(0.0, 0.0, 2.0, 2.0),
            Rgba::new(1.0, 0.0, 0.0, 0.5),
        ));
        // Straight source over transparent premultiplied destination.
        let texel = gpu
            .texture_pixel(target.texture().id(), 0, 0)
            .expect("texel");
        assert!(close(texel, Rgba::new(0.5, 0.0, 0.0, 0.5)));

        device.bind(DrawTarget::Host {
            framebuffer: 0,
            size,
        });
        device.draw(
            &QuadDraw::textured(RectF::from_size(size), target.texture().view())
                .with_blend(BlendMode::Premultiplied),
        );
        assert!(close(gpu.host_pixel(0, 0), Rgba::new(0.5, 0.0, 0.5, 1.0)));
        assert!(close(gpu.host_pixel(3, 3), Rgba::new(0.0, 0.0, 1.0, 1.0)));
        device.delete_render_target(target);
        assert_eq!(gpu.texture_count(), 0);
    }

    #[test]
    fn blit_copies_host_region_with_scaling() {
        let gpu = HeadlessGpu::new();
        let mut device = gpu.device();
        gpu.set_host_frame(PhysicalSize::new(8, 8), Rgba::BLACK);
        gpu.paint_host(PixelRect::new(2, 2, 2, 2), Rgba::WHITE);

        let target = device
            .create_render_target(PhysicalSize::new(4, 4), false)
            .expect("target");
        device.bind(DrawTarget::Target(&target));
        device.blit(
            BlitSource::Framebuffer {
                framebuffer: 0,
                size: PhysicalSize::new(8, 8),
            },
            PixelRect::new(2, 2, 2, 2),
            PixelRect::new(0, 0, 4, 4),
        );
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(
                    gpu.texture_pixel(target.texture().id(), x, y),
                    Some(Rgba::WHITE)
                );
            }
        }
    }

    #[test]
    fn color_key_and_mirror_filter() {
        let gpu = HeadlessGpu::new();
        let mut device = gpu.device();
        let green = [0u8, 255, 0, 255];
        let red = [255u8, 0, 0, 255];
        let pixels: Vec<u8> = [green, red].concat();
        let texture = device
            .create_texture(PhysicalSize::new(2, 1), Some(&pixels))
            .expect("texture");
        let target = device
            .create_render_target(PhysicalSize::new(2, 1), false)
            .expect("target");

        device.bind(DrawTarget::Target(&target));
        device.draw(
            &QuadDraw::textured(RectF::new(0.0, 0.0, 2.0, 1.0), texture.view()).with_shading(
                Shading::ColorKey {
                    key: Rgba::new(0.0, 1.0, 0.0, 1.0),
                    sensitivity: 0.1,
                },
            ),
        );
        assert_eq!(
            gpu.texture_pixel(target.texture().id(), 0, 0),
            Some(Rgba::TRANSPARENT)
        );
        assert!(close(
            gpu.texture_pixel(target.texture().id(), 1, 0)
                .expect("texel"),
            Rgba::new(1.0, 0.0, 0.0, 1.0)
        ));

        device.clear(Rgba::TRANSPARENT);
        let filter = MirrorFilter::new(&[Rgba::new(1.0, 0.0, 0.0, 1.0)], Rgba::WHITE, 0.05);
        device.draw(
            &QuadDraw::textured(RectF::new(0.0, 0.0, 2.0, 1.0), texture.view())
                .with_shading(Shading::MirrorFilter(filter))
                .with_blend(BlendMode::Replace),
        );
        assert_eq!(
            gpu.texture_pixel(target.texture().id(), 0, 0),
            Some(Rgba::TRANSPARENT)
        );
        assert_eq!(
            gpu.texture_pixel(target.texture().id(), 1, 0),
            Some(Rgba::WHITE)
        );
    }

    #[test]
    fn border_draws_outline_only() {
        let gpu = HeadlessGpu::new();
        let mut device = gpu.device();
        let target = device
            .create_render_target(PhysicalSize::new(10, 10), false)
            .expect("target");
        device.bind(DrawTarget::Target(&target));
        device.draw(
            &QuadDraw::solid(RectF::new(0.0, 0.0, 10.0, 10.0), Rgba::WHITE).with_shading(
                Shading::Border {
                    thickness: 2.0,
                    radius: 0.0,
                    circle: false,
                },
            ),
        );
        let id = target.texture().id();
        assert_eq!(gpu.texture_pixel(id, 0, 5), Some(Rgba::WHITE));
        assert_eq!(gpu.texture_pixel(id, 1, 5), Some(Rgba::WHITE));
        assert_eq!(gpu.texture_pixel(id, 5, 5), Some(Rgba::TRANSPARENT));
    }

    #[test]
    fn manual_fences_and_invalid_use_are_recorded() {
        let gpu = HeadlessGpu::new();
        gpu.set_auto_signal(false);
        let mut producer = gpu.device();
        let mut consumer = gpu.device();

        let fence = producer.insert_fence().expect("fence");
        let handle = fence.handle();
        assert!(!consumer.poll_fence(handle));
        gpu.signal_all();
        assert!(consumer.poll_fence(handle));
        consumer.delete_fence(fence);
        assert!(!consumer.poll_fence(handle));

        let events = gpu.events();
        assert!(events.contains(&GpuEvent::Deleted {
            fence: handle.raw()
        }));
        assert_eq!(
            events.last(),
            Some(&GpuEvent::InvalidFence {
                fence: handle.raw()
            })
        );
    }

    #[test]
    fn failing_render_targets_report_incomplete() {
        let gpu = HeadlessGpu::new();
        gpu.set_fail_render_targets(true);
        let mut device = gpu.device();
        let result = device.create_render_target(PhysicalSize::new(4, 4), true);
        assert!(matches!(
            result,
            Err(OverlayError::FramebufferIncomplete { .. })
        ));
        assert!(matches!(
            device.create_texture(PhysicalSize::new(0, 4), None),
            Err(OverlayError::InvalidSize(_))
        ));
    }
}
