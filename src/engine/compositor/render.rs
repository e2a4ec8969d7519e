//! ### English
//! Per-stream frame renderer: turns one [`FrameRenderRequest`] into one published ring frame.
//!
//! ### 中文
//! 单个输出流的帧渲染器：把一个 [`FrameRenderRequest`] 变成一个已发布的环形缓冲帧。

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::engine::capture::{MirrorRegistry, MirrorRenderData};
use crate::engine::config::{BackgroundConfig, Config};
use crate::engine::geometry::{RectF, Rgba};
use crate::engine::gpu::{
    BlendMode, DrawTarget, FenceHandle, GpuDevice, QuadDraw, Shading, TextureRef,
};

use super::eyezoom::{EyeZoomRenderer, GridLabel};
use super::gui::{GuiFrame, GuiLayer, texture_grid};
use super::images::{ImageKind, ImageLibrary};
use super::request::FrameRenderRequest;
use super::ring::{RenderRing, SharedRing};
use super::scene::{Motion, SceneDraw, ScenePlan, resolve_images, resolve_mirrors, viewport_border};

/// ### English
/// Names of the timed phases in [`RenderStats::phases`].
///
/// ### 中文
/// [`RenderStats::phases`] 中各计时阶段的名称。
pub const PHASE_NAMES: [&str; 5] = ["setup", "background", "mirrors", "images", "gui"];

const AVERAGE_WEIGHT: f64 = 0.1;

/// ### English
/// Which output stream a renderer feeds.
///
/// ### 中文
/// 渲染器服务于哪个输出流。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    /// ### English
    /// Blended onto the host framebuffer, which already holds the game.
    ///
    /// ### 中文
    /// 混合到已包含游戏画面的宿主 framebuffer 上。
    Local,
    /// ### English
    /// Self-contained frame for an external capture consumer.
    ///
    /// ### 中文
    /// 为外部捕获消费者生成的完整独立帧。
    Obs,
}

impl StreamKind {
    pub fn label(self) -> &'static str {
        match self {
            StreamKind::Local => "local",
            StreamKind::Obs => "obs",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderStats {
    pub frames: u64,
    /// ### English
    /// Frames published without content draws because nothing was visible.
    ///
    /// ### 中文
    /// 因没有可见内容而未进行内容绘制即发布的帧数。
    pub empty_frames: u64,
    /// ### English
    /// Requests dropped because no ring slot could be reserved.
    ///
    /// ### 中文
    /// 因无法预留环形槽位而丢弃的请求数。
    pub no_slot: u64,
    pub last_frame: Duration,
    pub average_frame: Duration,
    pub mirrors_drawn: usize,
    pub images_drawn: usize,
    pub phases: [Duration; PHASE_NAMES.len()],
}

impl RenderStats {
    fn record(&mut self, elapsed: Duration) {
        self.frames += 1;
        self.last_frame = elapsed;
        self.average_frame = if self.frames == 1 {
            elapsed
        } else {
            self.average_frame
                .mul_f64(1.0 - AVERAGE_WEIGHT)
                .saturating_add(elapsed.mul_f64(AVERAGE_WEIGHT))
        };
    }
}

/// ### English
/// Shared inputs of one compositor iteration.
///
/// ### 中文
/// 合成线程一轮迭代共享的输入。
pub struct RenderInputs<'a> {
    pub config: &'a Config,
    pub config_version: u64,
    pub mirrors: &'a MirrorRegistry,
    pub images: &'a ImageLibrary,
    /// ### English
    /// Latest game frame copy (fence-proven or safe fallback).
    ///
    /// ### 中文
    /// 最新的游戏帧拷贝（已由 fence 证明完成，或安全回退）。
    pub game: Option<TextureRef>,
    pub now: Instant,
}

/// ### English
/// Renders frames of one stream into its ring. Compositor thread only.
///
/// ### 中文
/// 把某个输出流的帧渲染到其环形缓冲中；仅限合成线程使用。
pub struct FrameRenderer {
    kind: StreamKind,
    ring: RenderRing,
    plan: ScenePlan,
    eyezoom: EyeZoomRenderer,
    draws: Vec<SceneDraw>,
    mirror_data: Vec<Option<MirrorRenderData>>,
    labels: Vec<GridLabel>,
    stats: RenderStats,
}

impl FrameRenderer {
    pub fn new(kind: StreamKind, shared: Arc<SharedRing>, fence_depth: usize) -> Self {
        Self {
            kind,
            ring: RenderRing::new(kind.label(), shared, fence_depth),
            plan: ScenePlan::default(),
            eyezoom: EyeZoomRenderer::new(),
            draws: Vec::new(),
            mirror_data: Vec::new(),
            labels: Vec::new(),
            stats: RenderStats::default(),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }

    pub fn shared(&self) -> &Arc<SharedRing> {
        self.ring.shared()
    }

    /// ### English
    /// Renders and publishes one frame. `game_ready` is the host fence guarding the game copy
    /// (external-capture stream only; `NONE` otherwise). Returns the published frame sequence, or
    /// `None` when no slot or render target was available.
    ///
    /// ### 中文
    /// 渲染并发布一帧。`game_ready` 为保护游戏拷贝的宿主 fence（仅外部捕获流使用，否则为
    /// `NONE`）。返回已发布帧的序号；没有可用槽位或渲染目标时返回 `None`。
    pub fn render(
        &mut self,
        device: &mut dyn GpuDevice,
        gui: &mut dyn GuiLayer,
        inputs: &RenderInputs<'_>,
        request: &FrameRenderRequest,
        game_ready: FenceHandle,
    ) -> Option<u64> {
        let started = Instant::now();
        let mut phases = [Duration::ZERO; PHASE_NAMES.len()];
        let mut mark = started;
        let mut lap = |phase: usize| {
            let now = Instant::now();
            phases[phase] = now - mark;
            mark = now;
        };

        if request.screen.width == 0 || request.screen.height == 0 {
            return None;
        }
        if self.ring.ensure_size(device, request.screen) {
            self.plan.invalidate();
        }
        let Some(slot) = self.ring.begin_frame(device) else {
            self.stats.no_slot += 1;
            return None;
        };

        /*
        ### English
        The magnifier renders into its own target, so it runs before the slot is bound.

        ### 中文
        放大镜渲染到自己的目标，因此要在绑定槽位之前执行。
        */
        if !game_ready.is_none() {
            device.wait_fence(game_ready);
        }
        let zoom = self
            .eyezoom
            .prepare(device, inputs.config.eyezoom.as_ref(), request, inputs.game);

        let Some(target) = self.ring.target(slot) else {
            self.ring.abort_frame(slot);
            return None;
        };
        device.bind(DrawTarget::Target(target));
        lap(0);

        match self.kind {
            StreamKind::Local => device.clear(Rgba::TRANSPARENT),
            StreamKind::Obs => self.draw_backdrop(device, inputs, request),
        }
        lap(1);

        let eyezoom_mode = inputs.config.eyezoom.as_ref().map(|z| z.mode_id.as_str());
        let slide_allowed = eyezoom_mode.is_none_or(|mode| {
            mode != request.mode_id && mode != request.transition.previous_mode
        });
        let motion = Motion::new(request, slide_allowed);
        self.plan.refresh(
            inputs.config,
            inputs.config_version,
            &request.mode_id,
            &request.transition.previous_mode,
        );

        /*
        ### English
        Copy the mirror data out under one short read lock; fences are waited on afterwards.

        ### 中文
        在一次短暂读锁内拷贝镜像数据；之后才等待 fence。
        */
        inputs
            .mirrors
            .render_data(self.plan.mirror_names(), &mut self.mirror_data);
        self.draws.clear();
        resolve_mirrors(&self.plan, &self.mirror_data, &motion, &mut self.draws);
        let mirror_draws = self.draws.len();
        let image_count =
            resolve_images(&self.plan, inputs.images, &motion, inputs.now, &mut self.draws);

        self.labels.clear();
        let grid = if request.show_texture_grid {
            let mut textures: Vec<TextureRef> = self
                .mirror_data
                .iter()
                .flatten()
                .map(|data| data.texture)
                .collect();
            textures.extend(inputs.images.textures());
            textures.extend(inputs.game);
            texture_grid(&textures, request.screen)
        } else {
            Vec::new()
        };

        let visible = !self.draws.is_empty()
            || zoom.is_some()
            || !grid.is_empty()
            || request.gui.any();

        if visible {
            for draw in &self.draws[..mirror_draws] {
                if !draw.wait.is_none() {
                    device.wait_fence(draw.wait);
                }
                device.draw(&draw.quad);
            }
            lap(2);
            for draw in &self.draws[mirror_draws..] {
                device.draw(&draw.quad);
            }
            lap(3);

            if let Some(zoom) = &zoom {
                device.draw(&zoom.quad);
                self.labels.extend(zoom.labels.iter().cloned());
            }
            for (rect, texture, label) in grid {
                device.draw(&QuadDraw::solid(rect, Rgba::new(0.0, 0.0, 0.0, 0.6)));
                device.draw(&QuadDraw::textured(rect, texture));
                self.labels.push(label);
            }
            let frame = GuiFrame {
                size: request.screen,
                flags: &request.gui,
                stats: &self.stats,
                labels: &self.labels,
            };
            if gui.paint(device, &frame) {
                /*
                ### English
                The painter leaves its own GL state behind; rebind before finishing.

                ### 中文
                painter 会留下自己的 GL 状态；完成前重新绑定。
                */
                if let Some(target) = self.ring.target(slot) {
                    device.bind(DrawTarget::Target(target));
                }
            }
            lap(4);
            self.stats.mirrors_drawn = mirror_draws;
            self.stats.images_drawn = image_count;
        } else {
            self.stats.empty_frames += 1;
            self.stats.mirrors_drawn = 0;
            self.stats.images_drawn = 0;
        }

        let seq = self.ring.finish_frame(device, slot);
        self.stats.phases = phases;
        self.stats.record(started.elapsed());
        Some(seq)
    }

    /// ### English
    /// External-capture backdrop: mode background, the live game frame in the viewport, then the
    /// viewport border.
    ///
    /// ### 中文
    /// 外部捕获流的底图：模式背景、viewport 中的实时游戏帧，然后是 viewport 描边。
    fn draw_backdrop(
        &self,
        device: &mut dyn GpuDevice,
        inputs: &RenderInputs<'_>,
        request: &FrameRenderRequest,
    ) {
        let full = RectF::from_size(request.screen);
        match &request.background {
            BackgroundConfig::Color { color } => device.clear(*color),
            BackgroundConfig::Gradient { top, bottom } => {
                device.clear(Rgba::TRANSPARENT);
                device.draw(
                    &QuadDraw::solid(full, *top)
                        .with_shading(Shading::Gradient {
                            top: *top,
                            bottom: *bottom,
                        })
                        .with_blend(BlendMode::Replace),
                );
            }
            BackgroundConfig::Image { image_id } => {
                match inputs.images.get(ImageKind::Background, image_id, inputs.now) {
                    Some(frame) => {
                        device.clear(Rgba::BLACK);
                        device.draw(
                            &QuadDraw::textured(full, frame.texture)
                                .with_uv(frame.uv)
                                .with_blend(BlendMode::Replace),
                        );
                    }
                    None => device.clear(request.background.flat_color()),
                }
            }
        }

        if let Some(game) = inputs.game
            && !request.viewport.is_empty()
        {
            device.draw(&QuadDraw::textured(request.viewport, game).with_blend(BlendMode::Replace));
        }
        if request.border.enabled && request.border.width > 0.0 {
            device.draw(&viewport_border(
                request.viewport,
                request.border.width,
                request.border.color,
            ));
        }
    }

    /// ### English
    /// Releases the ring targets and the magnifier snapshot.
    ///
    /// ### 中文
    /// 释放环形缓冲的渲染目标与放大镜快照。
    pub fn destroy(&mut self, device: &mut dyn GpuDevice) {
        self.eyezoom.destroy(device);
        self.ring.destroy(device);
        self.plan.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::capture::MirrorRenderData;
    use crate::engine::compositor::gui::NullGui;
    use crate::engine::gpu::BlitSource;
    use crate::engine::gpu::headless::{GpuEvent, HeadlessGpu};
    use dpi::PhysicalSize;

    const SCREEN: PhysicalSize<u32> = PhysicalSize::new(40, 30);

    fn config(opacity: f32) -> Config {
        let mut config = Config::from_json(
            r#"{
                "modes": [{"id": "main", "width": 20, "height": 20, "mirrorIds": ["pie"]}],
                "mirrors": [{"name": "pie", "captureWidth": 10, "captureHeight": 10,
                             "inputs": [{"x": 0, "y": 0}]}]
            }"#,
        )
        .expect("fixture parses");
        if let Some(pie) = config.mirror_mut("pie") {
            pie.opacity = opacity;
        }
        config
    }

    fn request() -> FrameRenderRequest {
        FrameRenderRequest::new(1, SCREEN, RectF::new(10.0, 5.0, 20.0, 20.0), "main")
    }

    /// Publishes a solid-color mirror the way the capture thread does.
    fn publish_mirror(
        capture: &mut dyn GpuDevice,
        registry: &MirrorRegistry,
        color: Rgba,
    ) -> (crate::engine::gpu::RenderTarget, Option<crate::engine::gpu::Fence>) {
        let target = capture
            .create_render_target(PhysicalSize::new(10, 10), false)
            .expect("mirror target");
        capture.bind(DrawTarget::Target(&target));
        capture.clear(color);
        let fence = capture.insert_fence();
        registry.publish(
            "pie",
            MirrorRenderData {
                texture: target.texture().view(),
                fence: fence.as_ref().map(|f| f.handle()).unwrap_or_default(),
                has_valid_content: true,
                generation: 1,
                position: None,
            },
        );
        (target, fence)
    }

    #[test]
    fn mirror_is_sampled_only_after_its_capture_fence() {
        let gpu = HeadlessGpu::new();
        let mut capture = gpu.device();
        let mut compositor = gpu.device();
        let registry = MirrorRegistry::new();
        let images = ImageLibrary::new();
        let green = Rgba::from_rgba8(0, 255, 0, 255);
        let (target, fence) = publish_mirror(&mut capture, &registry, green);
        let fence_raw = fence.as_ref().map(|f| f.handle().raw()).expect("fence");
        let config = config(1.0);

        let mut renderer = FrameRenderer::new(StreamKind::Local, Arc::new(SharedRing::new()), 8);
        let inputs = RenderInputs {
            config: &config,
            config_version: 1,
            mirrors: &registry,
            images: &images,
            game: None,
            now: Instant::now(),
        };
        gpu.take_events();
        let seq = renderer
            .render(&mut compositor, &mut NullGui::default(), &inputs, &request(), FenceHandle::NONE)
            .expect("frame");
        assert_eq!(seq, 1);

        let events = gpu.take_events();
        let mirror_texture = target.texture().id();
        let wait = events
            .iter()
            .position(|e| *e == GpuEvent::Wait { fence: fence_raw })
            .expect("capture fence waited on");
        let sample = events
            .iter()
            .position(|e| *e == GpuEvent::Sample { texture: mirror_texture })
            .expect("mirror sampled");
        assert!(wait < sample);

        let frame = renderer.shared().try_acquire_latest().expect("published");
        assert_eq!(
            compositor.read_pixel(BlitSource::Texture(frame.texture), 5, 5),
            Some(green)
        );
        assert_eq!(
            compositor.read_pixel(BlitSource::Texture(frame.texture), 20, 20),
            Some(Rgba::TRANSPARENT)
        );
        assert!(renderer.shared().release(frame.slot, None).is_none());

        renderer.destroy(&mut compositor);
        capture.delete_render_target(target);
        if let Some(fence) = fence {
            capture.delete_fence(fence);
        }
        assert_eq!(gpu.live_fence_count(), 0);
    }

    #[test]
    fn invisible_frame_still_publishes_a_fenced_texture() {
        let gpu = HeadlessGpu::new();
        let mut capture = gpu.device();
        let mut compositor = gpu.device();
        let registry = MirrorRegistry::new();
        let images = ImageLibrary::new();
        let (target, fence) = publish_mirror(&mut capture, &registry, Rgba::WHITE);
        let config = config(0.0);
        let mut gui = NullGui::default();

        let mut renderer = FrameRenderer::new(StreamKind::Local, Arc::new(SharedRing::new()), 8);
        let inputs = RenderInputs {
            config: &config,
            config_version: 1,
            mirrors: &registry,
            images: &images,
            game: None,
            now: Instant::now(),
        };
        let draws_before = gpu.draw_calls();
        renderer
            .render(&mut compositor, &mut gui, &inputs, &request(), FenceHandle::NONE)
            .expect("frame");
        assert_eq!(gpu.draw_calls(), draws_before);
        assert_eq!(gui.requested, 0);
        assert_eq!(renderer.stats().empty_frames, 1);
        assert_eq!(renderer.stats().frames, 1);

        let frame = renderer.shared().try_acquire_latest().expect("valid frame");
        assert_ne!(frame.texture.id, 0);
        assert!(!frame.producer_fence.is_none());
        assert!(compositor.poll_fence(frame.producer_fence));
        assert!(renderer.shared().release(frame.slot, None).is_none());

        renderer.destroy(&mut compositor);
        capture.delete_render_target(target);
        if let Some(fence) = fence {
            capture.delete_fence(fence);
        }
    }

    #[test]
    fn obs_stream_composites_background_game_and_border() {
        let gpu = HeadlessGpu::new();
        let mut host = gpu.device();
        let mut compositor = gpu.device();
        let registry = MirrorRegistry::new();
        let images = ImageLibrary::new();
        let config = config(1.0);
        let blue = Rgba::from_rgba8(0, 0, 255, 255);
        let red = Rgba::from_rgba8(255, 0, 0, 255);
        let game = host
            .create_texture(PhysicalSize::new(4, 4), Some(&[0, 0, 255, 255].repeat(16)))
            .expect("game copy");
        let ready = host.insert_fence().expect("game ready fence");

        let mut request = request();
        request.background = BackgroundConfig::Color { color: red };
        request.border.enabled = true;
        request.border.width = 2.0;
        request.border.color = Rgba::WHITE;

        let mut renderer = FrameRenderer::new(StreamKind::Obs, Arc::new(SharedRing::new()), 8);
        let inputs = RenderInputs {
            config: &config,
            config_version: 1,
            mirrors: &registry,
            images: &images,
            game: Some(game.view()),
            now: Instant::now(),
        };
        gpu.take_events();
        renderer
            .render(&mut compositor, &mut NullGui::default(), &inputs, &request, ready.handle())
            .expect("frame");
        assert!(gpu.events().contains(&GpuEvent::Wait {
            fence: ready.handle().raw()
        }));

        let frame = renderer.shared().try_acquire_latest().expect("frame");
        let mut pixel = |x, y| compositor.read_pixel(BlitSource::Texture(frame.texture), x, y);
        assert_eq!(pixel(0, 0), Some(red));
        assert_eq!(pixel(20, 15), Some(blue));
        assert_eq!(pixel(9, 15), Some(Rgba::WHITE));
        assert!(renderer.shared().release(frame.slot, None).is_none());

        renderer.destroy(&mut compositor);
        host.delete_fence(ready);
        host.delete_texture(game);
    }

    #[test]
    fn resize_replans_and_missing_slot_is_counted() {
        let gpu = HeadlessGpu::new();
        let mut compositor = gpu.device();
        let registry = MirrorRegistry::new();
        let images = ImageLibrary::new();
        let config = config(1.0);
        let mut renderer = FrameRenderer::new(StreamKind::Local, Arc::new(SharedRing::new()), 8);
        let inputs = RenderInputs {
            config: &config,
            config_version: 1,
            mirrors: &registry,
            images: &images,
            game: None,
            now: Instant::now(),
        };

        gpu.set_fail_render_targets(true);
        assert!(renderer
            .render(&mut compositor, &mut NullGui::default(), &inputs, &request(), FenceHandle::NONE)
            .is_none());
        assert_eq!(renderer.stats().no_slot, 1);

        gpu.set_fail_render_targets(false);
        let mut bigger = request();
        bigger.screen = PhysicalSize::new(64, 48);
        assert!(renderer
            .render(&mut compositor, &mut NullGui::default(), &inputs, &bigger, FenceHandle::NONE)
            .is_some());
        let frame = renderer.shared().try_acquire_latest().expect("frame");
        assert_eq!(frame.texture.size, PhysicalSize::new(64, 48));
        assert!(renderer.shared().release(frame.slot, None).is_none());
        renderer.destroy(&mut compositor);
        assert_eq!(gpu.framebuffer_count(), 0);
    }
}
