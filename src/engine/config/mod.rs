//! ### English
//! Immutable configuration snapshot consumed by every overlay thread.
//!
//! The tree is deserialized from JSON (the embedder owns the on-disk format and the editing GUI)
//! and published through [`ConfigStore`]. Consumers never mutate it in place; changes go through
//! [`ConfigCommand`]s applied by the coordination thread.
//!
//! ### 中文
//! 所有 overlay 线程消费的不可变配置快照。
//!
//! 配置树从 JSON 反序列化（磁盘格式与编辑 GUI 由宿主负责），并通过 [`ConfigStore`] 发布。
//! 消费方从不原地修改；所有变更都以 [`ConfigCommand`] 的形式交由协调线程应用。

mod command;
mod store;

pub use command::{ConfigCommand, ConfigCommandQueue, ConfigCommandSender};
pub use store::ConfigStore;

use std::time::Duration;

use dpi::PhysicalSize;
use serde::{Deserialize, Serialize};

use crate::engine::geometry::{Anchor, Easing, PixelRect, Rgba};

/// ### English
/// Root of the configuration tree.
///
/// ### 中文
/// 配置树根节点。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub modes: Vec<ModeConfig>,
    pub mirrors: Vec<MirrorConfig>,
    pub mirror_groups: Vec<MirrorGroupConfig>,
    pub images: Vec<ImageConfig>,
    pub window_overlays: Vec<WindowOverlayConfig>,
    pub default_mode: String,
    pub eyezoom: Option<EyeZoomConfig>,
    pub debug: DebugConfig,
    /// ### English
    /// OS pointer speed (1..=20); `None` leaves the system setting alone.
    ///
    /// ### 中文
    /// 系统指针速度（1..=20）；`None` 表示不改动系统设置。
    pub mouse_sensitivity: Option<u32>,
    pub auto_borderless: bool,
    pub gui_font_path: Option<String>,
}

impl Config {
    /// ### English
    /// Parses a config tree from JSON.
    ///
    /// ### 中文
    /// 从 JSON 解析配置树。
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn mode(&self, id: &str) -> Option<&ModeConfig> {
        self.modes.iter().find(|mode| mode.id == id)
    }

    pub fn mode_mut(&mut self, id: &str) -> Option<&mut ModeConfig> {
        self.modes.iter_mut().find(|mode| mode.id == id)
    }

    pub fn mirror(&self, name: &str) -> Option<&MirrorConfig> {
        self.mirrors.iter().find(|mirror| mirror.name == name)
    }

    pub fn mirror_mut(&mut self, name: &str) -> Option<&mut MirrorConfig> {
        self.mirrors.iter_mut().find(|mirror| mirror.name == name)
    }

    pub fn group(&self, name: &str) -> Option<&MirrorGroupConfig> {
        self.mirror_groups.iter().find(|group| group.name == name)
    }

    pub fn image(&self, name: &str) -> Option<&ImageConfig> {
        self.images.iter().find(|image| image.name == name)
    }

    pub fn image_mut(&mut self, name: &str) -> Option<&mut ImageConfig> {
        self.images.iter_mut().find(|image| image.name == name)
    }

    pub fn window_overlay(&self, name: &str) -> Option<&WindowOverlayConfig> {
        self.window_overlays
            .iter()
            .find(|overlay| overlay.image.name == name)
    }

    pub fn window_overlay_mut(&mut self, name: &str) -> Option<&mut WindowOverlayConfig> {
        self.window_overlays
            .iter_mut()
            .find(|overlay| overlay.image.name == name)
    }

    /// ### English
    /// Names of every mirror a mode shows, directly or through its groups, without duplicates and
    /// in config order of first reference.
    ///
    /// ### 中文
    /// 某模式（直接或通过分组）展示的全部镜像名称，去重并按首次引用顺序排列。
    pub fn mirrors_for_mode(&self, mode: &ModeConfig) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let mut push = |name: &str| {
            if self.mirror(name).is_some() && !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        };
        for id in &mode.mirror_ids {
            push(id);
        }
        for group in mode.group_ids.iter().filter_map(|id| self.group(id)) {
            for item in group.items.iter().filter(|item| item.enabled) {
                push(&item.mirror_id);
            }
        }
        names
    }
}

/// ### English
/// A named viewport configuration the host window can switch into.
///
/// ### 中文
/// 宿主窗口可切换到的命名 viewport 配置。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModeConfig {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub stretch: Option<StretchConfig>,
    pub transition: TransitionConfig,
    pub background: BackgroundConfig,
    pub border: ModeBorderConfig,
    pub mirror_ids: Vec<String>,
    pub image_ids: Vec<String>,
    pub window_overlay_ids: Vec<String>,
    pub group_ids: Vec<String>,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            width: 1,
            height: 1,
            x: None,
            y: None,
            stretch: None,
            transition: TransitionConfig::default(),
            background: BackgroundConfig::default(),
            border: ModeBorderConfig::default(),
            mirror_ids: Vec::new(),
            image_ids: Vec::new(),
            window_overlay_ids: Vec::new(),
            group_ids: Vec::new(),
        }
    }
}

impl ModeConfig {
    pub fn size(&self) -> PhysicalSize<u32> {
        PhysicalSize::new(self.width.max(1), self.height.max(1))
    }

    pub fn position(&self) -> Option<(i32, i32)> {
        Some((self.x?, self.y?))
    }

    pub fn stretch_rect(&self) -> Option<PixelRect> {
        self.stretch
            .filter(|stretch| stretch.enabled)
            .map(|stretch| PixelRect::new(stretch.x, stretch.y, stretch.width, stretch.height))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StretchConfig {
    pub enabled: bool,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransitionStyle {
    #[default]
    Cut,
    Bounce,
    Slide,
}

impl TransitionStyle {
    pub fn code(self) -> u32 {
        match self {
            TransitionStyle::Cut => 0,
            TransitionStyle::Bounce => 1,
            TransitionStyle::Slide => 2,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            1 => TransitionStyle::Bounce,
            2 => TransitionStyle::Slide,
            _ => TransitionStyle::Cut,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransitionConfig {
    pub style: TransitionStyle,
    pub duration_ms: u32,
    pub easing: Easing,
    /// ### English
    /// Slide mirrors in/out from the nearest screen edge while the mode animates.
    ///
    /// ### 中文
    /// 模式动画期间，镜像是否从最近的屏幕边缘滑入/滑出。
    pub slide_mirrors: bool,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            style: TransitionStyle::Cut,
            duration_ms: 300,
            easing: Easing::EaseOut,
            slide_mirrors: false,
        }
    }
}

impl TransitionConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.duration_ms))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BackgroundConfig {
    Color { color: Rgba },
    #[serde(rename_all = "camelCase")]
    Image { image_id: String },
    Gradient { top: Rgba, bottom: Rgba },
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        BackgroundConfig::Color { color: Rgba::BLACK }
    }
}

impl BackgroundConfig {
    /// ### English
    /// Representative flat color (gradients use their top stop; images fall back to black).
    ///
    /// ### 中文
    /// 代表性纯色（渐变取顶部色；图片回退为黑色）。
    pub fn flat_color(&self) -> Rgba {
        match self {
            BackgroundConfig::Color { color } => *color,
            BackgroundConfig::Gradient { top, .. } => *top,
            BackgroundConfig::Image { .. } => Rgba::BLACK,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModeBorderConfig {
    pub enabled: bool,
    pub color: Rgba,
    pub width: f32,
}

impl Default for ModeBorderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            color: Rgba::WHITE,
            width: 2.0,
        }
    }
}

/// ### English
/// One rectangle sampled from the game frame.
///
/// ### 中文
/// 从游戏帧中采样的一个矩形区域。
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureRegion {
    pub x: i32,
    pub y: i32,
    pub relative_to: Anchor,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MirrorOutput {
    pub x: i32,
    pub y: i32,
    pub relative_to: Anchor,
    pub scale: f32,
    pub scale_x: Option<f32>,
    pub scale_y: Option<f32>,
}

impl Default for MirrorOutput {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            relative_to: Anchor::TopLeftScreen,
            scale: 1.0,
            scale_x: None,
            scale_y: None,
        }
    }
}

impl MirrorOutput {
    pub fn scales(&self) -> (f32, f32) {
        (
            self.scale_x.unwrap_or(self.scale).max(0.0),
            self.scale_y.unwrap_or(self.scale).max(0.0),
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BorderShape {
    #[default]
    Rectangle,
    Circle,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MirrorBorder {
    #[default]
    None,
    /// ### English
    /// Outline traced around opaque content (alpha edge detection).
    ///
    /// ### 中文
    /// 沿不透明内容描边（alpha 边缘检测）。
    Dynamic { thickness: u32, color: Rgba },
    /// ### English
    /// Fixed outline around the whole capture.
    ///
    /// ### 中文
    /// 围绕整个捕获区域的固定描边。
    Static {
        shape: BorderShape,
        thickness: u32,
        color: Rgba,
        radius: f32,
    },
}

impl MirrorBorder {
    /// ### English
    /// Extra pixels added on each side of the capture by this border.
    ///
    /// ### 中文
    /// 该描边在捕获区域每一侧额外增加的像素数。
    pub fn padding(&self) -> u32 {
        match *self {
            MirrorBorder::None => 0,
            MirrorBorder::Dynamic { thickness, .. } | MirrorBorder::Static { thickness, .. } => {
                thickness
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MirrorColors {
    pub target_colors: Vec<Rgba>,
    pub output_color: Rgba,
    pub sensitivity: f32,
}

impl Default for MirrorColors {
    fn default() -> Self {
        Self {
            target_colors: Vec::new(),
            output_color: Rgba::WHITE,
            sensitivity: 0.05,
        }
    }
}

/// ### English
/// A named capture region of the game frame re-output elsewhere.
///
/// ### 中文
/// 一个命名的游戏帧捕获区域，会被输出到屏幕其它位置。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MirrorConfig {
    pub name: String,
    pub inputs: Vec<CaptureRegion>,
    pub capture_width: u32,
    pub capture_height: u32,
    pub output: MirrorOutput,
    pub border: MirrorBorder,
    pub colors: MirrorColors,
    /// ### English
    /// Skip color filtering and copy the captured pixels as-is.
    ///
    /// ### 中文
    /// 跳过颜色过滤，原样拷贝捕获像素。
    pub raw_output: bool,
    pub fps: i32,
    pub opacity: f32,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            inputs: Vec::new(),
            capture_width: 50,
            capture_height: 50,
            output: MirrorOutput::default(),
            border: MirrorBorder::None,
            colors: MirrorColors::default(),
            raw_output: false,
            fps: 0,
            opacity: 1.0,
        }
    }
}

impl MirrorConfig {
    pub fn capture_size(&self) -> PhysicalSize<u32> {
        PhysicalSize::new(self.capture_width, self.capture_height)
    }

    /// ### English
    /// Size of the border-applied output texture.
    ///
    /// ### 中文
    /// 应用描边后的输出纹理尺寸。
    pub fn output_texture_size(&self) -> PhysicalSize<u32> {
        let pad = self.border.padding() * 2;
        PhysicalSize::new(self.capture_width + pad, self.capture_height + pad)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MirrorGroupItem {
    pub mirror_id: String,
    pub enabled: bool,
    pub offset_x: i32,
    pub offset_y: i32,
    pub width_percent: f32,
    pub height_percent: f32,
}

impl Default for MirrorGroupItem {
    fn default() -> Self {
        Self {
            mirror_id: String::new(),
            enabled: true,
            offset_x: 0,
            offset_y: 0,
            width_percent: 100.0,
            height_percent: 100.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GroupOutput {
    pub x: i32,
    pub y: i32,
    pub relative_to: Anchor,
    pub scale: f32,
}

impl Default for GroupOutput {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            relative_to: Anchor::TopLeftScreen,
            scale: 1.0,
        }
    }
}

/// ### English
/// Named collection of mirrors sharing one output anchor.
///
/// ### 中文
/// 共享同一输出锚点的镜像集合。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MirrorGroupConfig {
    pub name: String,
    pub items: Vec<MirrorGroupItem>,
    pub output: GroupOutput,
}

impl MirrorGroupConfig {
    pub fn item(&self, mirror_id: &str) -> Option<&MirrorGroupItem> {
        self.items
            .iter()
            .find(|item| item.enabled && item.mirror_id == mirror_id)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CropConfig {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ColorKeyConfig {
    pub color: Rgba,
    pub sensitivity: f32,
}

impl Default for ColorKeyConfig {
    fn default() -> Self {
        Self {
            color: Rgba::BLACK,
            sensitivity: 0.05,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageBackgroundConfig {
    pub enabled: bool,
    pub color: Rgba,
    pub opacity: f32,
}

impl Default for ImageBackgroundConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            color: Rgba::BLACK,
            opacity: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageBorderConfig {
    pub enabled: bool,
    pub color: Rgba,
    pub width: f32,
    pub radius: f32,
}

impl Default for ImageBorderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            color: Rgba::WHITE,
            width: 2.0,
            radius: 0.0,
        }
    }
}

/// ### English
/// Static (or animated) user image placed on screen.
///
/// ### 中文
/// 放置在屏幕上的静态（或动画）用户图片。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageConfig {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub relative_to: Anchor,
    pub scale: f32,
    pub crop: CropConfig,
    pub color_key: Option<ColorKeyConfig>,
    pub opacity: f32,
    pub background: ImageBackgroundConfig,
    pub border: ImageBorderConfig,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            x: 0,
            y: 0,
            relative_to: Anchor::TopLeftScreen,
            scale: 1.0,
            crop: CropConfig::default(),
            color_key: None,
            opacity: 1.0,
            background: ImageBackgroundConfig::default(),
            border: ImageBorderConfig::default(),
        }
    }
}

/// ### English
/// Image-shaped overlay whose pixels come from a captured external window.
///
/// ### 中文
/// 外形与图片相同、像素来自外部窗口捕获的叠加层。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WindowOverlayConfig {
    #[serde(flatten)]
    pub image: ImageConfig,
    pub window_title: String,
    pub fps: i32,
}

impl Default for WindowOverlayConfig {
    fn default() -> Self {
        Self {
            image: ImageConfig::default(),
            window_title: String::new(),
            fps: 30,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EyeZoomTransition {
    /// ### English
    /// The strip grows from zero width.
    ///
    /// ### 中文
    /// 条带从零宽度逐渐长出。
    #[default]
    Grow,
    /// ### English
    /// The strip slides in from the left edge at full size.
    ///
    /// ### 中文
    /// 条带以完整尺寸从左侧边缘滑入。
    Slide,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EyeZoomConfig {
    pub mode_id: String,
    pub clone_width: u32,
    pub clone_height: u32,
    pub grid_boxes: u32,
    pub box_color_a: Rgba,
    pub box_color_b: Rgba,
    pub text_color: Rgba,
    pub transition: EyeZoomTransition,
    pub show_numbers: bool,
}

impl Default for EyeZoomConfig {
    fn default() -> Self {
        Self {
            mode_id: String::new(),
            clone_width: 30,
            clone_height: 1400,
            grid_boxes: 30,
            box_color_a: Rgba::new(1.0, 0.71, 0.76, 1.0),
            box_color_b: Rgba::new(0.68, 0.85, 0.9, 1.0),
            text_color: Rgba::BLACK,
            transition: EyeZoomTransition::Grow,
            show_numbers: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DebugConfig {
    pub show_texture_grid: bool,
    pub show_performance_overlay: bool,
    pub show_profiler: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "defaultMode": "normal",
        "modes": [
            { "id": "normal", "width": 1920, "height": 1080 },
            {
                "id": "thin", "width": 384, "height": 16384,
                "mirrorIds": ["pie"],
                "groupIds": ["stats"],
                "transition": { "style": "bounce", "durationMs": 250 },
                "background": { "type": "gradient", "top": {"r":0,"g":0,"b":0}, "bottom": {"r":1,"g":1,"b":1} }
            }
        ],
        "mirrors": [
            {
                "name": "pie", "captureWidth": 40, "captureHeight": 30,
                "inputs": [ { "x": 10, "y": 20, "relativeTo": "bottomRightViewport" } ],
                "border": { "type": "static", "shape": "circle", "thickness": 2, "color": {"r":1,"g":0,"b":0}, "radius": 4 },
                "fps": 30
            },
            { "name": "f3", "captureWidth": 100, "captureHeight": 10 }
        ],
        "mirrorGroups": [
            { "name": "stats", "items": [ { "mirrorId": "f3", "widthPercent": 50 }, { "mirrorId": "pie" } ] }
        ],
        "windowOverlays": [ { "name": "chat", "windowTitle": "Chat", "x": 5 } ]
    }"#;

    #[test]
    fn parses_sample_with_defaults() {
        let config = Config::from_json(SAMPLE).expect("parse");
        let thin = config.mode("thin").expect("thin");
        assert_eq!(thin.size(), PhysicalSize::new(384, 16384));
        assert_eq!(thin.transition.style, TransitionStyle::Bounce);
        assert_eq!(thin.transition.duration_ms, 250);
        assert!(matches!(thin.background, BackgroundConfig::Gradient { .. }));

        let pie = config.mirror("pie").expect("pie");
        assert_eq!(pie.inputs[0].relative_to, Anchor::BottomRightViewport);
        assert_eq!(pie.output_texture_size(), PhysicalSize::new(44, 34));
        assert_eq!(pie.opacity, 1.0);
        assert_eq!(pie.colors.output_color.a, 1.0);

        let chat = config.window_overlay("chat").expect("chat");
        assert_eq!(chat.image.x, 5);
        assert_eq!(chat.window_title, "Chat");
        assert_eq!(chat.fps, 30);
    }

    #[test]
    fn mode_mirror_list_merges_groups_without_duplicates() {
        let config = Config::from_json(SAMPLE).expect("parse");
        let thin = config.mode("thin").expect("thin");
        assert_eq!(config.mirrors_for_mode(thin), vec!["pie", "f3"]);
        assert!(config.mirrors_for_mode(config.mode("normal").expect("normal")).is_empty());
    }

    #[test]
    fn missing_lookups_are_none() {
        let config = Config::default();
        assert!(config.mode("nope").is_none());
        assert!(config.mirror("nope").is_none());
        assert!(config.group("nope").is_none());
        assert!(config.image("nope").is_none());
    }
}
