//! ### English
//! Immediate-mode GUI layer of the compositor: performance overlay, profiler, toast, settings
//! panel hook, texture-grid captions and EyeZoom numbers.
//!
//! The real layer drives `egui` and paints with `egui_glow` on the compositor's own context. It
//! needs a raw glow context; devices without one (headless) simply paint nothing.
//!
//! ### 中文
//! 合成线程的即时模式 GUI 层：性能浮层、profiler、toast、设置面板钩子、纹理网格标题与
//! EyeZoom 编号。
//!
//! 实际实现驱动 `egui`，并在合成线程自己的上下文上用 `egui_glow` 绘制；它需要原始 glow 上下文，
//! 没有该上下文的设备（headless）不绘制任何内容。

use std::sync::Arc;
use std::time::Instant;

use dpi::PhysicalSize;
use egui::{Align2, Color32, FontId, Id, LayerId, Order, Pos2};

use crate::engine::geometry::{RectF, Rgba};
use crate::engine::gpu::{GpuDevice, TextureRef};

use super::eyezoom::GridLabel;
use super::render::{PHASE_NAMES, RenderStats};
use super::request::{GuiFlags, Toast};

const GRID_CELL: f32 = 128.0;
const GRID_GAP: f32 = 8.0;
const CAPTION_SIZE: f32 = 12.0;

/// ### English
/// Settings editor hosted by the compositor; widget layout lives with the implementor.
///
/// ### 中文
/// 由合成线程承载的设置编辑器；控件布局由实现方负责。
pub trait SettingsPanel: Send {
    fn show(&mut self, ctx: &egui::Context);
}

/// ### English
/// Inputs of one GUI pass.
///
/// ### 中文
/// 一次 GUI 绘制的输入。
pub struct GuiFrame<'a> {
    pub size: PhysicalSize<u32>,
    pub flags: &'a GuiFlags,
    pub stats: &'a RenderStats,
    /// ### English
    /// Text drawn at fixed output positions (EyeZoom numbers, texture-grid captions).
    ///
    /// ### 中文
    /// 绘制在固定输出位置的文本（EyeZoom 编号、纹理网格标题）。
    pub labels: &'a [GridLabel],
}

impl GuiFrame<'_> {
    pub fn wants_paint(&self) -> bool {
        self.flags.any() || !self.labels.is_empty()
    }
}

/// ### English
/// Paints GUI content into the currently bound target.
///
/// ### 中文
/// 把 GUI 内容绘制到当前绑定的目标。
pub trait GuiLayer {
    /// ### English
    /// Returns whether anything was painted.
    ///
    /// ### 中文
    /// 返回是否绘制了内容。
    fn paint(&mut self, device: &mut dyn GpuDevice, frame: &GuiFrame<'_>) -> bool;

    fn destroy(&mut self, device: &mut dyn GpuDevice);
}

/// ### English
/// GUI layer that paints nothing and counts the passes it was asked for.
///
/// ### 中文
/// 不绘制任何内容、只统计被请求次数的 GUI 层。
#[derive(Debug, Default)]
pub struct NullGui {
    pub requested: u64,
}

impl GuiLayer for NullGui {
    fn paint(&mut self, _device: &mut dyn GpuDevice, frame: &GuiFrame<'_>) -> bool {
        if frame.wants_paint() {
            self.requested += 1;
        }
        false
    }

    fn destroy(&mut self, _device: &mut dyn GpuDevice) {}
}

/// ### English
/// Texture-grid layout: one cell per texture, left to right, wrapping at the screen edge.
///
/// ### 中文
/// 纹理网格布局：每个纹理一个格子，从左到右排列，到屏幕边缘换行。
pub(crate) fn texture_grid(
    textures: &[TextureRef],
    screen: PhysicalSize<u32>,
) -> Vec<(RectF, TextureRef, GridLabel)> {
    let columns = (((screen.width as f32 - GRID_GAP) / (GRID_CELL + GRID_GAP)).floor() as usize).max(1);
    textures
        .iter()
        .enumerate()
        .map(|(index, texture)| {
            let col = (index % columns) as f32;
            let row = (index / columns) as f32;
            let x = GRID_GAP + col * (GRID_CELL + GRID_GAP);
            let y = GRID_GAP + CAPTION_SIZE + row * (GRID_CELL + GRID_GAP + CAPTION_SIZE);
            let label = GridLabel {
                center: (x + GRID_CELL * 0.5, y - CAPTION_SIZE * 0.5),
                text: format!(
                    "#{} {}x{}",
                    texture.id, texture.size.width, texture.size.height
                ),
                color: Rgba::WHITE,
                size: CAPTION_SIZE,
            };
            (RectF::new(x, y, GRID_CELL, GRID_CELL), *texture, label)
        })
        .collect()
}

fn color32(color: Rgba) -> Color32 {
    let byte = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    Color32::from_rgba_unmultiplied(byte(color.r), byte(color.g), byte(color.b), byte(color.a))
}

/// ### English
/// Whether `bytes` start like a TrueType/OpenType font or collection.
///
/// ### 中文
/// 判断 `bytes` 是否以 TrueType/OpenType 字体或字体集合的文件头开始。
fn looks_like_font(bytes: &[u8]) -> bool {
    matches!(
        bytes.get(..4),
        Some([0x00, 0x01, 0x00, 0x00]) | Some(b"OTTO") | Some(b"true") | Some(b"ttcf")
    ) && bytes.len() > 64
}

/// ### English
/// `egui` + `egui_glow` implementation of [`GuiLayer`].
///
/// ### 中文
/// 基于 `egui` + `egui_glow` 的 [`GuiLayer`] 实现。
pub struct EguiLayer {
    ctx: egui::Context,
    painter: Option<egui_glow::Painter>,
    unavailable: bool,
    settings: Option<Box<dyn SettingsPanel>>,
    started: Instant,
}

impl EguiLayer {
    pub fn new(settings: Option<Box<dyn SettingsPanel>>, font_path: Option<&str>) -> Self {
        let ctx = egui::Context::default();
        if let Some(path) = font_path {
            Self::install_font(&ctx, path);
        }
        Self {
            ctx,
            painter: None,
            unavailable: false,
            settings,
            started: Instant::now(),
        }
    }

    /// ### English
    /// Adds the user font in front of the defaults; unreadable or corrupt files keep the built-in
    /// fonts.
    ///
    /// ### 中文
    /// 把用户字体放在默认字体之前；文件不可读或已损坏时保留内置字体。
    fn install_font(ctx: &egui::Context, path: &str) {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("GUI font {path} unreadable ({err}); using built-in font");
                return;
            }
        };
        if !looks_like_font(&bytes) {
            log::warn!("GUI font {path} is not a font file; using built-in font");
            return;
        }
        let mut fonts = egui::FontDefinitions::default();
        fonts.font_data.insert(
            "user".to_owned(),
            Arc::new(egui::FontData::from_owned(bytes)),
        );
        for family in [egui::FontFamily::Proportional, egui::FontFamily::Monospace] {
            fonts
                .families
                .entry(family)
                .or_default()
                .insert(0, "user".to_owned());
        }
        ctx.set_fonts(fonts);
    }

    fn ensure_painter(&mut self, device: &dyn GpuDevice) -> bool {
        if self.painter.is_some() {
            return true;
        }
        if self.unavailable {
            return false;
        }
        let Some(gl) = device.glow_context() else {
            log::info!("GUI layer disabled: device has no GL context");
            self.unavailable = true;
            return false;
        };
        match egui_glow::Painter::new(gl, "", None, false) {
            Ok(painter) => {
                self.painter = Some(painter);
                true
            }
            Err(err) => {
                log::error!("GUI painter creation failed: {err}");
                self.unavailable = true;
                false
            }
        }
    }
}

impl GuiLayer for EguiLayer {
    fn paint(&mut self, device: &mut dyn GpuDevice, frame: &GuiFrame<'_>) -> bool {
        if !frame.wants_paint() || !self.ensure_painter(device) {
            return false;
        }
        let Self {
            ctx,
            painter,
            settings,
            started,
            ..
        } = self;
        let Some(painter) = painter.as_mut() else {
            return false;
        };

        let (w, h) = (frame.size.width as f32, frame.size.height as f32);
        let raw_input = egui::RawInput {
            screen_rect: Some(egui::Rect::from_min_size(
                egui::pos2(0.0, 0.0),
                egui::vec2(w, h),
            )),
            viewports: std::iter::once((
                egui::ViewportId::ROOT,
                egui::ViewportInfo {
                    native_pixels_per_point: Some(1.0),
                    ..Default::default()
                },
            ))
            .collect(),
            time: Some(started.elapsed().as_secs_f64()),
            ..Default::default()
        };

        let output = ctx.run(raw_input, |ctx| {
            if frame.flags.performance_overlay {
                performance_window(ctx, frame.stats);
            }
            if frame.flags.profiler {
                profiler_window(ctx, frame.stats);
            }
            if frame.flags.settings_open
                && let Some(panel) = settings.as_mut()
            {
                panel.show(ctx);
            }
            if let Some(toast) = &frame.flags.toast {
                toast_area(ctx, toast);
            }
            if !frame.labels.is_empty() {
                let text = ctx.layer_painter(LayerId::new(Order::Foreground, Id::new("labels")));
                for label in frame.labels {
                    text.text(
                        Pos2::new(label.center.0, label.center.1),
                        Align2::CENTER_CENTER,
                        &label.text,
                        FontId::proportional(label.size),
                        color32(label.color),
                    );
                }
            }
        });
        let primitives = ctx.tessellate(output.shapes, output.pixels_per_point);
        painter.paint_and_update_textures(
            [frame.size.width, frame.size.height],
            output.pixels_per_point,
            &primitives,
            &output.textures_delta,
        );
        true
    }

    fn destroy(&mut self, _device: &mut dyn GpuDevice) {
        if let Some(mut painter) = self.painter.take() {
            painter.destroy();
        }
    }
}

fn performance_window(ctx: &egui::Context, stats: &RenderStats) {
    egui::Window::new("Performance")
        .anchor(Align2::RIGHT_TOP, [-8.0, 8.0])
        .resizable(false)
        .collapsible(false)
        .show(ctx, |ui| {
            let ms = stats.average_frame.as_secs_f64() * 1000.0;
            ui.label(format!("frame {:.2} ms", ms));
            ui.label(format!("frames {}  empty {}", stats.frames, stats.empty_frames));
            ui.label(format!("no slot {}", stats.no_slot));
            ui.label(format!(
                "mirrors {}  images {}",
                stats.mirrors_drawn, stats.images_drawn
            ));
        });
}

fn profiler_window(ctx: &egui::Context, stats: &RenderStats) {
    egui::Window::new("Profiler")
        .anchor(Align2::RIGHT_BOTTOM, [-8.0, -8.0])
        .resizable(false)
        .collapsible(false)
        .show(ctx, |ui| {
            egui::Grid::new("phases").striped(true).show(ui, |ui| {
                for (name, time) in PHASE_NAMES.iter().zip(stats.phases.iter()) {
                    ui.label(*name);
                    ui.label(format!("{:.3} ms", time.as_secs_f64() * 1000.0));
                    ui.end_row();
                }
            });
        });
}

fn toast_area(ctx: &egui::Context, toast: &Toast) {
    if toast.opacity <= 0.0 {
        return;
    }
    egui::Area::new(Id::new("toast"))
        .order(Order::Tooltip)
        .anchor(Align2::CENTER_BOTTOM, [0.0, -40.0])
        .show(ctx, |ui| {
            ui.set_opacity(toast.opacity.clamp(0.0, 1.0));
            egui::Frame::popup(ui.style()).show(ui, |ui| {
                ui.label(&toast.text);
            });
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gpu::headless::HeadlessGpu;

    #[test]
    fn grid_wraps_at_screen_edge() {
        let textures: Vec<TextureRef> = (1..=3)
            .map(|id| TextureRef {
                id,
                size: PhysicalSize::new(64, 32),
            })
            .collect();
        let cells = texture_grid(&textures, PhysicalSize::new(300, 600));
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[0].0.x, GRID_GAP);
        assert_eq!(cells[1].0.y, cells[0].0.y);
        assert_eq!(cells[2].0.x, GRID_GAP);
        assert!(cells[2].0.y > cells[0].0.bottom());
        assert_eq!(cells[1].2.text, "#2 64x32");
    }

    #[test]
    fn font_sniffing_rejects_garbage() {
        let mut ttf = vec![0x00, 0x01, 0x00, 0x00];
        ttf.resize(128, 0);
        assert!(looks_like_font(&ttf));
        assert!(!looks_like_font(b"definitely not a font"));
        assert!(!looks_like_font(b"OTTO"));
    }

    #[test]
    fn egui_layer_without_gl_paints_nothing() {
        let gpu = HeadlessGpu::new();
        let mut device = gpu.device();
        let mut layer = EguiLayer::new(None, Some("/nonexistent/font.ttf"));
        let flags = GuiFlags {
            performance_overlay: true,
            ..GuiFlags::default()
        };
        let stats = RenderStats::default();
        let frame = GuiFrame {
            size: PhysicalSize::new(64, 64),
            flags: &flags,
            stats: &stats,
            labels: &[],
        };
        assert!(!layer.paint(&mut device, &frame));
        assert!(!layer.paint(&mut device, &frame));
        layer.destroy(&mut device);
        assert_eq!(gpu.draw_calls(), 0);
    }

    #[test]
    fn null_gui_counts_requested_passes() {
        let gpu = HeadlessGpu::new();
        let mut device = gpu.device();
        let mut gui = NullGui::default();
        let stats = RenderStats::default();
        let idle = GuiFlags::default();
        let label = GridLabel {
            center: (0.0, 0.0),
            text: "0".to_string(),
            color: Rgba::BLACK,
            size: 8.0,
        };
        let labels = [label];
        let frames = [
            GuiFrame {
                size: PhysicalSize::new(8, 8),
                flags: &idle,
                stats: &stats,
                labels: &[],
            },
            GuiFrame {
                size: PhysicalSize::new(8, 8),
                flags: &idle,
                stats: &stats,
                labels: &labels,
            },
        ];
        for frame in &frames {
            gui.paint(&mut device, frame);
        }
        assert_eq!(gui.requested, 1);
    }
}
