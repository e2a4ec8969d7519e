//! ### English
//! EyeZoom magnifier: a full-height strip at the left edge showing a horizontally magnified,
//! centered slice of the game frame with a numbered box row for aiming.
//!
//! The strip is rendered into a private snapshot target first and the snapshot is what lands in
//! the output frame. While leaving, the snapshot is no longer refreshed, so the exit animation
//! shows a frozen image instead of a gap.
//!
//! ### 中文
//! EyeZoom 放大镜：位于左侧边缘的全高条带，显示游戏帧中央切片的水平放大图像，并带有编号方格
//! 用于瞄准。
//!
//! 条带先渲染到私有快照目标，输出帧中绘制的是该快照。离开动画期间不再刷新快照，因此退出动画
//! 显示的是冻结图像而不是空白。

use dpi::PhysicalSize;

use crate::engine::config::{EyeZoomConfig, EyeZoomTransition};
use crate::engine::geometry::{RectF, Rgba};
use crate::engine::gpu::{BlendMode, DrawTarget, GpuDevice, QuadDraw, RenderTarget, TextureRef};

use super::request::FrameRenderRequest;

const BOX_ROW_ALPHA: f32 = 0.45;
const MIN_STRIP_FRACTION: f32 = 0.2;

/// ### English
/// A number drawn over a grid box, in output pixels.
///
/// ### 中文
/// 绘制在方格上的数字（输出像素坐标）。
#[derive(Clone, Debug, PartialEq)]
pub struct GridLabel {
    pub center: (f32, f32),
    pub text: String,
    pub color: Rgba,
    pub size: f32,
}

/// ### English
/// What the output frame receives: the snapshot quad plus optional labels for the GUI layer.
///
/// ### 中文
/// 输出帧需要绘制的内容：快照四边形以及交给 GUI 层的可选标签。
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct EyeZoomDraw {
    pub(crate) quad: QuadDraw,
    pub(crate) labels: Vec<GridLabel>,
}

/// ### English
/// Full-size strip rectangle for a request.
///
/// ### 中文
/// 请求对应的完整条带矩形。
pub(crate) fn strip_rect(screen: PhysicalSize<u32>, viewport: RectF) -> RectF {
    let width = if viewport.x >= 1.0 {
        viewport.x.floor()
    } else {
        (screen.width as f32 * MIN_STRIP_FRACTION).floor()
    };
    RectF::new(0.0, 0.0, width, screen.height as f32)
}

/// ### English
/// Strip rectangle at `progress` for the configured transition.
///
/// ### 中文
/// 按所配置的过渡方式计算 `progress` 时刻的条带矩形。
pub(crate) fn animated_rect(full: RectF, transition: EyeZoomTransition, progress: f32) -> RectF {
    let p = progress.clamp(0.0, 1.0);
    match transition {
        EyeZoomTransition::Grow => RectF::new(full.x, full.y, full.width * p, full.height),
        EyeZoomTransition::Slide => RectF::new(
            full.x - full.width * (1.0 - p),
            full.y,
            full.width,
            full.height,
        ),
    }
}

/// ### English
/// Normalized rectangle of the centered clone region inside a `game` sized texture.
///
/// ### 中文
/// 尺寸为 `game` 的纹理内居中克隆区域的归一化矩形。
pub(crate) fn clone_uv(config: &EyeZoomConfig, game: PhysicalSize<u32>) -> RectF {
    if game.width == 0 || game.height == 0 {
        return RectF::UNIT;
    }
    let width = config.clone_width.clamp(1, game.width) as f32;
    let height = config.clone_height.clamp(1, game.height) as f32;
    let gw = game.width as f32;
    let gh = game.height as f32;
    RectF::new(
        ((gw - width) * 0.5).floor() / gw,
        ((gh - height) * 0.5).floor() / gh,
        width / gw,
        height / gh,
    )
}

/// ### English
/// Per-stream magnifier state: the snapshot target and whether it holds content.
///
/// ### 中文
/// 单个输出流的放大镜状态：快照目标及其是否有内容。
#[derive(Default)]
pub(crate) struct EyeZoomRenderer {
    snapshot: Option<RenderTarget>,
    has_snapshot: bool,
}

impl EyeZoomRenderer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// ### English
    /// Refreshes the snapshot (unless leaving) and returns what to draw this frame. Binds the
    /// snapshot target; callers rebind their own target afterwards.
    ///
    /// ### 中文
    /// 刷新快照（离开时除外）并返回本帧需要绘制的内容；会绑定快照目标，调用方随后需重新绑定
    /// 自己的目标。
    pub(crate) fn prepare(
        &mut self,
        device: &mut dyn GpuDevice,
        config: Option<&EyeZoomConfig>,
        request: &FrameRenderRequest,
        game: Option<TextureRef>,
    ) -> Option<EyeZoomDraw> {
        let zoom = request.eyezoom;
        let config = config?;
        if !zoom.active {
            self.has_snapshot = false;
            return None;
        }

        let full = strip_rect(request.screen, request.viewport);
        let size = PhysicalSize::new(full.width as u32, full.height as u32);
        if size.width == 0 || size.height == 0 {
            return None;
        }

        if !zoom.leaving
            && let Some(game) = game
        {
            self.refresh(device, config, size, game);
        }
        if !self.has_snapshot {
            return None;
        }
        let snapshot = self.snapshot.as_ref()?;

        let rect = animated_rect(full, config.transition, zoom.progress);
        if rect.is_empty() {
            return None;
        }
        let labels = if config.show_numbers && !zoom.leaving {
            grid_labels(config, full, rect)
        } else {
            Vec::new()
        };
        Some(EyeZoomDraw {
            quad: QuadDraw::textured(rect, snapshot.texture().view())
                .with_blend(BlendMode::Premultiplied),
            labels,
        })
    }

    fn refresh(
        &mut self,
        device: &mut dyn GpuDevice,
        config: &EyeZoomConfig,
        size: PhysicalSize<u32>,
        game: TextureRef,
    ) {
        match self.snapshot.as_mut() {
            Some(target) if target.size() != size => {
                if let Err(err) = device.resize_render_target(target, size) {
                    log::warn!("eyezoom snapshot resize failed: {err}");
                    self.has_snapshot = false;
                    return;
                }
            }
            Some(_) => {}
            None => match device.create_render_target(size, false) {
                Ok(target) => self.snapshot = Some(target),
                Err(err) => {
                    log::warn!("eyezoom snapshot unavailable: {err}");
                    return;
                }
            },
        }
        let Some(target) = self.snapshot.as_ref() else {
            return;
        };

        let full = RectF::from_size(size);
        device.bind(DrawTarget::Target(target));
        device.clear(Rgba::TRANSPARENT);
        device.draw(
            &QuadDraw::textured(full, game)
                .with_uv(clone_uv(config, game.size))
                .with_blend(BlendMode::Replace),
        );
        for (index, rect) in box_rects(config, full).into_iter().enumerate() {
            let color = if index % 2 == 0 {
                config.box_color_a
            } else {
                config.box_color_b
            };
            device.draw(&QuadDraw::solid(rect, color).with_opacity(BOX_ROW_ALPHA));
        }
        self.has_snapshot = true;
    }

    pub(crate) fn has_snapshot(&self) -> bool {
        self.has_snapshot
    }

    pub(crate) fn texture(&self) -> Option<TextureRef> {
        self.snapshot.as_ref().map(|target| target.texture().view())
    }

    pub(crate) fn destroy(&mut self, device: &mut dyn GpuDevice) {
        if let Some(target) = self.snapshot.take() {
            device.delete_render_target(target);
        }
        self.has_snapshot = false;
    }
}

/// ### English
/// The numbered box row across the vertical center of the strip.
///
/// ### 中文
/// 横跨条带竖直中心的编号方格行。
fn box_rects(config: &EyeZoomConfig, full: RectF) -> Vec<RectF> {
    let count = config.grid_boxes.max(1);
    let width = full.width / count as f32;
    let y = full.y + (full.height - width) * 0.5;
    (0..count)
        .map(|i| RectF::new(full.x + i as f32 * width, y, width, width))
        .collect()
}

fn grid_labels(config: &EyeZoomConfig, full: RectF, shown: RectF) -> Vec<GridLabel> {
    let count = config.grid_boxes.max(1);
    let half = (count / 2) as i64;
    let scale_x = if full.width > 0.0 {
        shown.width / full.width
    } else {
        0.0
    };
    box_rects(config, full)
        .into_iter()
        .enumerate()
        .map(|(index, rect)| {
            let local_center = rect.x + rect.width * 0.5 - full.x;
            GridLabel {
                center: (shown.x + local_center * scale_x, rect.y + rect.height * 0.5),
                text: (index as i64 - half).abs().to_string(),
                color: config.text_color,
                size: (rect.width * 0.6).max(6.0),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gpu::headless::HeadlessGpu;
    use crate::engine::gpu::BlitSource;

    fn request(active: bool, leaving: bool, progress: f32) -> FrameRenderRequest {
        let mut request = FrameRenderRequest::new(
            1,
            PhysicalSize::new(40, 20),
            RectF::new(10.0, 0.0, 20.0, 20.0),
            "zoom",
        );
        request.eyezoom.active = active;
        request.eyezoom.leaving = leaving;
        request.eyezoom.progress = progress;
        request
    }

    fn config() -> EyeZoomConfig {
        EyeZoomConfig {
            mode_id: "zoom".to_string(),
            clone_width: 2,
            clone_height: 4,
            grid_boxes: 5,
            ..EyeZoomConfig::default()
        }
    }

    #[test]
    fn grow_and_slide_hit_full_rect_at_completion() {
        let full = RectF::new(0.0, 0.0, 10.0, 20.0);
        assert_eq!(animated_rect(full, EyeZoomTransition::Grow, 0.0).width, 0.0);
        assert_eq!(animated_rect(full, EyeZoomTransition::Grow, 1.0), full);
        assert_eq!(animated_rect(full, EyeZoomTransition::Slide, 0.0).x, -10.0);
        assert_eq!(animated_rect(full, EyeZoomTransition::Slide, 1.0), full);
    }

    #[test]
    fn clone_region_is_centered() {
        let uv = clone_uv(&config(), PhysicalSize::new(10, 8));
        assert_eq!(uv, RectF::new(0.4, 0.25, 0.2, 0.5));
        let strip = strip_rect(PhysicalSize::new(100, 50), RectF::new(0.0, 0.0, 100.0, 50.0));
        assert_eq!(strip, RectF::new(0.0, 0.0, 20.0, 50.0));
    }

    #[test]
    fn labels_count_outward_from_center() {
        let full = RectF::new(0.0, 0.0, 50.0, 100.0);
        let labels = grid_labels(&config(), full, full);
        let texts: Vec<&str> = labels.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["2", "1", "0", "1", "2"]);
        assert_eq!(labels[2].center, (25.0, 50.0));
    }

    #[test]
    fn leaving_draws_the_frozen_snapshot() {
        let gpu = HeadlessGpu::new();
        let mut device = gpu.device();
        let red = device
            .create_texture(PhysicalSize::new(4, 4), Some(&[255, 0, 0, 255].repeat(16)))
            .expect("game texture");
        let mut zoom = EyeZoomRenderer::new();
        let config = config();

        let shown = zoom
            .prepare(&mut device, Some(&config), &request(true, false, 1.0), Some(red.view()))
            .expect("visible");
        assert_eq!(shown.labels.len(), 5);
        assert!(zoom.has_snapshot());
        let snapshot = zoom.texture().expect("snapshot target");
        let top = device.read_pixel(BlitSource::Texture(snapshot), 0, 0);
        assert_eq!(top, Some(Rgba::from_rgba8(255, 0, 0, 255)));

        /*
        ### English
        Game content changes while leaving; the snapshot must not.

        ### 中文
        离开期间游戏内容变化，快照不得随之变化。
        */
        device.upload_texture(&red, &[0, 0, 255, 255].repeat(16));
        let writes_before = gpu.draw_calls();
        let leaving = zoom
            .prepare(&mut device, Some(&config), &request(true, true, 0.5), Some(red.view()))
            .expect("frozen image still drawn");
        assert_eq!(gpu.draw_calls(), writes_before);
        assert!(leaving.labels.is_empty());
        assert_eq!(leaving.quad.dst.width, 5.0);
        assert_eq!(device.read_pixel(BlitSource::Texture(snapshot), 0, 0), top);

        assert!(zoom
            .prepare(&mut device, Some(&config), &request(false, false, 0.0), Some(red.view()))
            .is_none());
        assert!(!zoom.has_snapshot());

        zoom.destroy(&mut device);
        device.delete_texture(red);
        assert_eq!(gpu.texture_count(), 0);
    }
}
