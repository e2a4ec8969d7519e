//! ### English
//! OpenGL implementation of [`GpuDevice`].
//!
//! Object management and draws go through `gleam`; sync objects and programs go through `glow`.
//! All rectangles arrive with a top-left origin and are flipped to GL's bottom-left origin here.
//! Uploaded pixel rows are stored bottom row first so rendered and uploaded textures share one
//! orientation.
//!
//! ### 中文
//! [`GpuDevice`] 的 OpenGL 实现。
//!
//! 对象管理与绘制走 `gleam`；同步对象与着色程序走 `glow`。所有矩形以左上角为原点传入，在此处
//! 翻转为 GL 的左下角原点。上传的像素行按“最底行在前”存储，使渲染得到的纹理与上传的纹理方向一致。

mod context;
mod shaders;

pub use context::{GlContext, GlfwContextFactory};

use std::rc::Rc;
use std::sync::Arc;

use dpi::PhysicalSize;
use gleam::gl::{self, Gl};
use glow::HasContext as _;

use crate::engine::error::OverlayError;
use crate::engine::geometry::{PixelRect, Rgba};

use self::shaders::{ProgramKind, Programs};
use super::{
    BlendMode, BlitSource, ContextRole, DrawTarget, Fence, FenceHandle, GpuDevice, QuadDraw,
    RenderTarget, Shading, Texture,
};

#[inline]
fn native_fence(handle: FenceHandle) -> glow::NativeFence {
    glow::NativeFence(handle.raw() as usize as *mut _)
}

/// ### English
/// Reverses row order of a tightly packed RGBA8 image.
///
/// ### 中文
/// 反转紧密排列 RGBA8 图像的行顺序。
fn flip_rows(pixels: &[u8], size: PhysicalSize<u32>) -> Vec<u8> {
    let stride = size.width as usize * 4;
    let mut flipped = Vec::with_capacity(pixels.len());
    for row in pixels.chunks_exact(stride).rev() {
        flipped.extend_from_slice(row);
    }
    flipped
}

fn checked_pixels(pixels: &[u8], size: PhysicalSize<u32>) -> Option<Vec<u8>> {
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
    Some(flip_rows(pixels, size))
}

#[derive(Clone, Copy, Debug, Default)]
struct Bound {
    framebuffer: gl::GLuint,
    size: PhysicalSize<u32>,
}

/// ### English
/// Host GL state captured before overlay drawing and put back afterwards.
///
/// ### 中文
/// 在绘制 overlay 之前保存、之后恢复的宿主 GL 状态。
#[derive(Default)]
struct SavedState {
    draw_framebuffer: i32,
    read_framebuffer: i32,
    viewport: [i32; 4],
    program: i32,
    active_texture: i32,
    texture: i32,
    vertex_array: i32,
    blend_func: [i32; 4],
    blend: bool,
    depth_test: bool,
    scissor_test: bool,
    cull_face: bool,
    stencil_test: bool,
}

/// ### English
/// GL device bound to one thread's context.
///
/// ### 中文
/// 绑定到某个线程上下文的 GL 设备。
pub struct GlDevice {
    gl: Rc<dyn Gl>,
    glow: Arc<glow::Context>,
    role: ContextRole,
    programs: Programs,
    vertex_array: Option<glow::VertexArray>,
    /// ### English
    /// Scratch framebuffer used to read from plain textures (blits, pixel reads).
    ///
    /// ### 中文
    /// 用于从普通纹理读取（blit、像素读取）的临时 framebuffer。
    read_framebuffer: gl::GLuint,
    bound: Bound,
    saved: Option<SavedState>,
    context: GlContext,
}

impl GlDevice {
    pub fn new(context: GlContext, role: ContextRole) -> Result<Self, OverlayError> {
        context.make_current();
        let gl = context.gleam();
        let glow = context.glow();

        if !context.supports_core_330() && !context.is_gles() {
            return Err(OverlayError::ContextCreation(format!(
                "{} context lacks GL 3.3 core",
                role.label()
            )));
        }

        let programs = Programs::build_all(&glow, context.is_gles())?;
        let vertex_array = unsafe { glow.create_vertex_array() }
            .map_err(|err| log::warn!("vertex array creation failed: {err}"))
            .ok();
        let read_framebuffer = gl.gen_framebuffers(1).first().copied().unwrap_or(0);

        log::info!("{} GL device initialized", role.label());
        Ok(Self {
            gl,
            glow,
            role,
            programs,
            vertex_array,
            read_framebuffer,
            bound: Bound::default(),
            saved: None,
            context,
        })
    }

    fn gen_texture(&self, size: PhysicalSize<u32>, filter: gl::GLenum, pixels: Option<&[u8]>) -> gl::GLuint {
        let id = self.gl.gen_textures(1).first().copied().unwrap_or(0);
        if id == 0 {
            return 0;
        }
        self.gl.bind_texture(gl::TEXTURE_2D, id);
        self.gl
            .tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, filter as gl::GLint);
        self.gl
            .tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, filter as gl::GLint);
        self.gl.tex_parameter_i(
            gl::TEXTURE_2D,
            gl::TEXTURE_WRAP_S,
            gl::CLAMP_TO_EDGE as gl::GLint,
        );
        self.gl.tex_parameter_i(
            gl::TEXTURE_2D,
            gl::TEXTURE_WRAP_T,
            gl::CLAMP_TO_EDGE as gl::GLint,
        );
        self.allocate(size, pixels);
        self.gl.bind_texture(gl::TEXTURE_2D, 0);
        id
    }

    /// Storage for the texture bound to `TEXTURE_2D`.
    fn allocate(&self, size: PhysicalSize<u32>, pixels: Option<&[u8]>) {
        self.gl.pixel_store_i(gl::UNPACK_ALIGNMENT, 1);
        self.gl.tex_image_2d(
            gl::TEXTURE_2D,
            0,
            gl::RGBA8 as gl::GLint,
            size.width as gl::GLsizei,
            size.height as gl::GLsizei,
            0,
            gl::RGBA,
            gl::UNSIGNED_BYTE,
            pixels,
        );
    }

    fn allocate_stencil(&self, renderbuffer: gl::GLuint, size: PhysicalSize<u32>) {
        self.gl.bind_renderbuffer(gl::RENDERBUFFER, renderbuffer);
        self.gl.renderbuffer_storage(
            gl::RENDERBUFFER,
            gl::DEPTH24_STENCIL8,
            size.width as gl::GLsizei,
            size.height as gl::GLsizei,
        );
        self.gl.bind_renderbuffer(gl::RENDERBUFFER, 0);
    }

    fn check_complete(&self, framebuffer: gl::GLuint, size: PhysicalSize<u32>) -> Result<(), OverlayError> {
        self.gl.bind_framebuffer(gl::FRAMEBUFFER, framebuffer);
        let status = self.gl.check_frame_buffer_status(gl::FRAMEBUFFER);
        self.gl.bind_framebuffer(gl::FRAMEBUFFER, self.bound.framebuffer);
        if status != gl::FRAMEBUFFER_COMPLETE {
            return Err(OverlayError::FramebufferIncomplete {
                status,
                width: size.width,
                height: size.height,
            });
        }
        Ok(())
    }

    /// ### English
    /// Framebuffer and height to read `source` from.
    ///
    /// ### 中文
    /// 读取 `source` 所用的 framebuffer 与高度。
    fn read_source(&self, source: BlitSource) -> (gl::GLuint, PhysicalSize<u32>) {
        match source {
            BlitSource::Framebuffer { framebuffer, size } => (framebuffer, size),
            BlitSource::Texture(texture) => {
                self.gl
                    .bind_framebuffer(gl::READ_FRAMEBUFFER, self.read_framebuffer);
                self.gl.framebuffer_texture_2d(
                    gl::READ_FRAMEBUFFER,
                    gl::COLOR_ATTACHMENT0,
                    gl::TEXTURE_2D,
                    texture.id,
                    0,
                );
                (self.read_framebuffer, texture.size)
            }
        }
    }

    fn set_blend(&self, blend: BlendMode) {
        match blend {
            BlendMode::Replace => self.gl.disable(gl::BLEND),
            BlendMode::Over => {
                self.gl.enable(gl::BLEND);
                self.gl.blend_func_separate(
                    gl::SRC_ALPHA,
                    gl::ONE_MINUS_SRC_ALPHA,
                    gl::ONE,
                    gl::ONE_MINUS_SRC_ALPHA,
                );
            }
            BlendMode::Premultiplied => {
                self.gl.enable(gl::BLEND);
                self.gl.blend_func_separate(
                    gl::ONE,
                    gl::ONE_MINUS_SRC_ALPHA,
                    gl::ONE,
                    gl::ONE_MINUS_SRC_ALPHA,
                );
            }
        }
    }

    fn integer(&self, name: gl::GLenum) -> i32 {
        let mut value = [0];
        unsafe { self.gl.get_integer_v(name, &mut value) };
        value[0]
    }

    fn enabled(&self, cap: gl::GLenum) -> bool {
        self.gl.is_enabled(cap) != 0
    }

    fn toggle(&self, cap: gl::GLenum, on: bool) {
        if on {
            self.gl.enable(cap);
        } else {
            self.gl.disable(cap);
        }
    }
}

impl GpuDevice for GlDevice {
    fn create_texture(
        &mut self,
        size: PhysicalSize<u32>,
        pixels: Option<&[u8]>,
    ) -> Result<Texture, OverlayError> {
        let size = OverlayError::check_size(size)?;
        let flipped = pixels.and_then(|pixels| checked_pixels(pixels, size));
        let id = self.gen_texture(size, gl::LINEAR, flipped.as_deref());
        if id == 0 {
            return Err(OverlayError::InvalidSize(size));
        }
        Ok(Texture::new(id, size))
    }

    fn upload_texture(&mut self, texture: &Texture, pixels: &[u8]) {
        let Some(flipped) = checked_pixels(pixels, texture.size()) else {
            return;
        };
        self.gl.bind_texture(gl::TEXTURE_2D, texture.id());
        self.gl.pixel_store_i(gl::UNPACK_ALIGNMENT, 1);
        self.gl.tex_sub_image_2d(
            gl::TEXTURE_2D,
            0,
            0,
            0,
            texture.size().width as gl::GLsizei,
            texture.size().height as gl::GLsizei,
            gl::RGBA,
            gl::UNSIGNED_BYTE,
            &flipped,
        );
        self.gl.bind_texture(gl::TEXTURE_2D, 0);
    }

    fn resize_texture(&mut self, texture: &mut Texture, size: PhysicalSize<u32>) {
        if texture.size() == size || OverlayError::check_size(size).is_err() {
            return;
        }
        self.gl.bind_texture(gl::TEXTURE_2D, texture.id());
        self.allocate(size, None);
        self.gl.bind_texture(gl::TEXTURE_2D, 0);
        texture.set_size(size);
    }

    fn delete_texture(&mut self, texture: Texture) {
        self.gl.delete_textures(&[texture.id()]);
    }

    fn create_render_target(
        &mut self,
        size: PhysicalSize<u32>,
        with_stencil: bool,
    ) -> Result<RenderTarget, OverlayError> {
        let size = OverlayError::check_size(size)?;
        let framebuffer = self.gl.gen_framebuffers(1).first().copied().unwrap_or(0);
        let texture = self.gen_texture(size, gl::NEAREST, None);
        let stencil = if with_stencil {
            self.gl.gen_renderbuffers(1).first().copied().unwrap_or(0)
        } else {
            0
        };

        self.gl.bind_framebuffer(gl::FRAMEBUFFER, framebuffer);
        self.gl.framebuffer_texture_2d(
            gl::FRAMEBUFFER,
            gl::COLOR_ATTACHMENT0,
            gl::TEXTURE_2D,
            texture,
            0,
        );
        if stencil != 0 {
            self.allocate_stencil(stencil, size);
            self.gl.framebuffer_renderbuffer(
                gl::FRAMEBUFFER,
                gl::DEPTH_STENCIL_ATTACHMENT,
                gl::RENDERBUFFER,
                stencil,
            );
        }

        let target = RenderTarget {
            framebuffer,
            texture: Texture::new(texture, size),
            stencil,
        };
        if let Err(err) = self.check_complete(framebuffer, size) {
            self.delete_render_target(target);
            return Err(err);
        }
        Ok(target)
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
        self.gl.bind_texture(gl::TEXTURE_2D, target.texture.id());
        self.allocate(size, None);
        self.gl.bind_texture(gl::TEXTURE_2D, 0);
        if target.stencil != 0 {
            self.allocate_stencil(target.stencil, size);
        }
        target.texture.set_size(size);
        self.check_complete(target.framebuffer, size)
    }

    fn delete_render_target(&mut self, target: RenderTarget) {
        if self.bound.framebuffer == target.framebuffer {
            self.bound = Bound::default();
            self.gl.bind_framebuffer(gl::FRAMEBUFFER, 0);
        }
        self.gl.delete_framebuffers(&[target.framebuffer]);
        self.gl.delete_textures(&[target.texture.id()]);
        if target.stencil != 0 {
            self.gl.delete_renderbuffers(&[target.stencil]);
        }
    }

    fn bind(&mut self, target: DrawTarget<'_>) {
        let bound = match target {
            DrawTarget::Host { framebuffer, size } => Bound { framebuffer, size },
            DrawTarget::Target(target) => Bound {
                framebuffer: target.framebuffer,
                size: target.size(),
            },
        };
        self.bound = bound;
        self.gl.bind_framebuffer(gl::FRAMEBUFFER, bound.framebuffer);
        self.gl.viewport(
            0,
            0,
            bound.size.width as gl::GLsizei,
            bound.size.height as gl::GLsizei,
        );
        self.gl.disable(gl::DEPTH_TEST);
        self.gl.disable(gl::SCISSOR_TEST);
        self.gl.disable(gl::CULL_FACE);
        self.gl.disable(gl::STENCIL_TEST);
        self.gl.color_mask(true, true, true, true);
    }

    fn clear(&mut self, color: Rgba) {
        self.gl.clear_color(color.r, color.g, color.b, color.a);
        self.gl.clear(gl::COLOR_BUFFER_BIT);
    }

    fn blit(&mut self, source: BlitSource, src: PixelRect, dst: PixelRect) {
        if src.is_empty() || dst.is_empty() {
            return;
        }
        let (read, source_size) = self.read_source(source);
        self.gl.bind_framebuffer(gl::READ_FRAMEBUFFER, read);
        self.gl
            .bind_framebuffer(gl::DRAW_FRAMEBUFFER, self.bound.framebuffer);

        let src_y = source_size.height as i32 - src.y - src.height;
        let dst_y = self.bound.size.height as i32 - dst.y - dst.height;
        self.gl.blit_framebuffer(
            src.x,
            src_y,
            src.x + src.width,
            src_y + src.height,
            dst.x,
            dst_y,
            dst.x + dst.width,
            dst_y + dst.height,
            gl::COLOR_BUFFER_BIT,
            gl::NEAREST,
        );
        self.gl.bind_framebuffer(gl::FRAMEBUFFER, self.bound.framebuffer);
    }

    fn draw(&mut self, quad: &QuadDraw) {
        let size = self.bound.size;
        if quad.dst.is_empty() || size.width == 0 || size.height == 0 {
            return;
        }
        let wanted = match quad.shading {
            Shading::Solid => ProgramKind::Solid,
            Shading::Textured => ProgramKind::Textured,
            Shading::ColorKey { .. } => ProgramKind::ColorKey,
            Shading::Gradient { .. } => ProgramKind::Gradient,
            Shading::Border { .. } => ProgramKind::Border,
            Shading::MirrorFilter(_) => ProgramKind::MirrorFilter,
            Shading::DynamicBorder { .. } => ProgramKind::DynamicBorder,
        };
        let Some((program, chosen)) = self.programs.get(wanted) else {
            return;
        };

        let (w, h) = (size.width as f32, size.height as f32);
        let dst = quad.dst;
        let glow = &self.glow;
        unsafe {
            glow.use_program(Some(program.handle));
            glow.bind_vertex_array(self.vertex_array);
            glow.uniform_4_f32(
                program.uniform("u_dst"),
                dst.x / w * 2.0 - 1.0,
                1.0 - dst.y / h * 2.0,
                dst.right() / w * 2.0 - 1.0,
                1.0 - dst.bottom() / h * 2.0,
            );
            glow.uniform_4_f32(
                program.uniform("u_uv"),
                quad.uv.x,
                quad.uv.y,
                quad.uv.right(),
                quad.uv.bottom(),
            );
            glow.uniform_4_f32(
                program.uniform("u_tint"),
                quad.tint.r,
                quad.tint.g,
                quad.tint.b,
                quad.tint.a,
            );
            glow.uniform_1_f32(program.uniform("u_opacity"), quad.opacity.clamp(0.0, 1.0));
            glow.uniform_1_i32(
                program.uniform("u_premultiplied"),
                i32::from(quad.blend == BlendMode::Premultiplied),
            );
            glow.uniform_1_i32(program.uniform("u_tex"), 0);

            if chosen == wanted {
                match quad.shading {
                    Shading::ColorKey { key, sensitivity } => {
                        glow.uniform_4_f32(program.uniform("u_key"), key.r, key.g, key.b, key.a);
                        glow.uniform_1_f32(program.uniform("u_sensitivity"), sensitivity);
                    }
                    Shading::Gradient { top, bottom } => {
                        glow.uniform_4_f32(program.uniform("u_top"), top.r, top.g, top.b, top.a);
                        glow.uniform_4_f32(
                            program.uniform("u_bottom"),
                            bottom.r,
                            bottom.g,
                            bottom.b,
                            bottom.a,
                        );
                    }
                    Shading::Border {
                        thickness,
                        radius,
                        circle,
                    } => {
                        glow.uniform_2_f32(program.uniform("u_size"), dst.width, dst.height);
                        glow.uniform_1_f32(program.uniform("u_thickness"), thickness);
                        glow.uniform_1_f32(program.uniform("u_radius"), radius);
                        glow.uniform_1_i32(program.uniform("u_circle"), i32::from(circle));
                    }
                    Shading::MirrorFilter(filter) => {
                        let flat: Vec<f32> = filter
                            .targets
                            .iter()
                            .flat_map(|c| [c.r, c.g, c.b, c.a])
                            .collect();
                        glow.uniform_4_f32_slice(program.uniform("u_targets"), &flat);
                        glow.uniform_1_i32(program.uniform("u_count"), filter.count as i32);
                        let out = filter.output;
                        glow.uniform_4_f32(program.uniform("u_output"), out.r, out.g, out.b, out.a);
                        glow.uniform_1_f32(program.uniform("u_sensitivity"), filter.sensitivity);
                    }
                    Shading::DynamicBorder { thickness, color } => {
                        glow.uniform_1_f32(program.uniform("u_thickness"), thickness);
                        glow.uniform_4_f32(
                            program.uniform("u_color"),
                            color.r,
                            color.g,
                            color.b,
                            color.a,
                        );
                        let (tw, th) = quad
                            .texture
                            .map(|t| (t.size.width.max(1) as f32, t.size.height.max(1) as f32))
                            .unwrap_or((1.0, 1.0));
                        glow.uniform_2_f32(program.uniform("u_texel"), 1.0 / tw, 1.0 / th);
                    }
                    Shading::Solid | Shading::Textured => {}
                }
            }
        }

        self.gl.active_texture(gl::TEXTURE0);
        self.gl.bind_texture(
            gl::TEXTURE_2D,
            quad.texture.map(|texture| texture.id).unwrap_or(0),
        );
        self.set_blend(quad.blend);
        self.gl.draw_arrays(gl::TRIANGLE_STRIP, 0, 4);
        self.gl.bind_texture(gl::TEXTURE_2D, 0);
    }

    fn insert_fence(&mut self) -> Option<Fence> {
        let sync = unsafe { self.glow.fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0) }.ok();
        unsafe {
            self.glow.flush();
        }
        let raw = sync.map(|s| s.0 as usize as u64).unwrap_or(0);
        // SAFETY: freshly created sync object, owned by nobody else yet.
        unsafe { Fence::from_raw(raw) }
    }

    fn wait_fence(&mut self, fence: FenceHandle) {
        if fence.is_none() {
            return;
        }
        unsafe {
            self.glow
                .wait_sync(native_fence(fence), 0, glow::TIMEOUT_IGNORED);
        }
    }

    fn poll_fence(&mut self, fence: FenceHandle) -> bool {
        if fence.is_none() {
            return false;
        }
        let status = unsafe { self.glow.client_wait_sync(native_fence(fence), 0, 0) };
        status == glow::ALREADY_SIGNALED || status == glow::CONDITION_SATISFIED
    }

    fn delete_fence(&mut self, fence: Fence) {
        let raw = fence.into_raw();
        unsafe {
            self.glow.delete_sync(native_fence(FenceHandle::from_raw(raw)));
        }
    }

    fn flush(&mut self) {
        self.gl.flush();
    }

    fn read_pixel(&mut self, source: BlitSource, x: u32, y: u32) -> Option<Rgba> {
        let (read, size) = self.read_source(source);
        if x >= size.width || y >= size.height {
            return None;
        }
        self.gl.bind_framebuffer(gl::READ_FRAMEBUFFER, read);
        let pixel = self.gl.read_pixels(
            x as gl::GLint,
            (size.height - 1 - y) as gl::GLint,
            1,
            1,
            gl::RGBA,
            gl::UNSIGNED_BYTE,
        );
        self.gl.bind_framebuffer(gl::FRAMEBUFFER, self.bound.framebuffer);
        match pixel.as_slice() {
            [r, g, b, a, ..] => Some(Rgba::from_rgba8(*r, *g, *b, *a)),
            _ => None,
        }
    }

    fn save_host_state(&mut self) {
        let mut state = SavedState {
            draw_framebuffer: self.integer(gl::DRAW_FRAMEBUFFER_BINDING),
            read_framebuffer: self.integer(gl::READ_FRAMEBUFFER_BINDING),
            program: self.integer(gl::CURRENT_PROGRAM),
            active_texture: self.integer(gl::ACTIVE_TEXTURE),
            vertex_array: self.integer(gl::VERTEX_ARRAY_BINDING),
            blend: self.enabled(gl::BLEND),
            depth_test: self.enabled(gl::DEPTH_TEST),
            scissor_test: self.enabled(gl::SCISSOR_TEST),
            cull_face: self.enabled(gl::CULL_FACE),
            stencil_test: self.enabled(gl::STENCIL_TEST),
            ..SavedState::default()
        };
        self.gl.active_texture(gl::TEXTURE0);
        state.texture = self.integer(gl::TEXTURE_BINDING_2D);
        unsafe { self.gl.get_integer_v(gl::VIEWPORT, &mut state.viewport) };
        state.blend_func = [
            self.integer(gl::BLEND_SRC_RGB),
            self.integer(gl::BLEND_DST_RGB),
            self.integer(gl::BLEND_SRC_ALPHA),
            self.integer(gl::BLEND_DST_ALPHA),
        ];
        self.saved = Some(state);
    }

    fn restore_host_state(&mut self) {
        let Some(state) = self.saved.take() else {
            return;
        };
        self.gl
            .bind_framebuffer(gl::DRAW_FRAMEBUFFER, state.draw_framebuffer as gl::GLuint);
        self.gl
            .bind_framebuffer(gl::READ_FRAMEBUFFER, state.read_framebuffer as gl::GLuint);
        let [x, y, w, h] = state.viewport;
        self.gl.viewport(x, y, w, h);
        self.gl.use_program(state.program as gl::GLuint);
        self.gl.active_texture(gl::TEXTURE0);
        self.gl
            .bind_texture(gl::TEXTURE_2D, state.texture as gl::GLuint);
        self.gl.active_texture(state.active_texture as gl::GLenum);
        self.gl.bind_vertex_array(state.vertex_array as gl::GLuint);
        let [src_rgb, dst_rgb, src_alpha, dst_alpha] = state.blend_func;
        self.gl.blend_func_separate(
            src_rgb as gl::GLenum,
            dst_rgb as gl::GLenum,
            src_alpha as gl::GLenum,
            dst_alpha as gl::GLenum,
        );
        self.toggle(gl::BLEND, state.blend);
        self.toggle(gl::DEPTH_TEST, state.depth_test);
        self.toggle(gl::SCISSOR_TEST, state.scissor_test);
        self.toggle(gl::CULL_FACE, state.cull_face);
        self.toggle(gl::STENCIL_TEST, state.stencil_test);
        self.bound = Bound::default();
    }

    fn glow_context(&self) -> Option<Arc<glow::Context>> {
        Some(self.glow.clone())
    }
}

impl Drop for GlDevice {
    fn drop(&mut self) {
        self.context.make_current();
        self.programs.delete(&self.glow);
        if let Some(vertex_array) = self.vertex_array.take() {
            unsafe { self.glow.delete_vertex_array(vertex_array) };
        }
        if self.read_framebuffer != 0 {
            self.gl.delete_framebuffers(&[self.read_framebuffer]);
        }
        log::debug!("{} GL device released", self.role.label());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_flip_bottom_first() {
        let size = PhysicalSize::new(1, 3);
        let pixels = [1u8, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3];
        assert_eq!(
            flip_rows(&pixels, size),
            vec![3, 3, 3, 3, 2, 2, 2, 2, 1, 1, 1, 1]
        );
        assert!(checked_pixels(&pixels[..8], size).is_none());
    }
}
