//! ### English
//! Screen-space geometry shared by every component: colors, rectangles, anchors and the
//! interpolation helpers used by mode transitions.
//!
//! All rectangles use a top-left origin in physical pixels. The GL backend flips to its
//! bottom-left convention at the very last step.
//!
//! ### 中文
//! 各组件共用的屏幕空间几何：颜色、矩形、锚点，以及模式过渡使用的插值工具。
//!
//! 所有矩形均以左上角为原点、单位为物理像素；GL 后端在最后一步再翻转为其左下角约定。

use bytemuck::{Pod, Zeroable};
use dpi::PhysicalSize;
use serde::{Deserialize, Serialize};

/// ### English
/// Linear RGBA color with components in `0.0..=1.0`.
///
/// ### 中文
/// 线性 RGBA 颜色，各分量取值 `0.0..=1.0`。
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize, Pod, Zeroable)]
pub struct Rgba {
    #[serde(default)]
    pub r: f32,
    #[serde(default)]
    pub g: f32,
    #[serde(default)]
    pub b: f32,
    #[serde(default = "one")]
    pub a: f32,
}

fn one() -> f32 {
    1.0
}

impl Rgba {
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// ### English
    /// Builds a color from 8-bit channels.
    ///
    /// ### 中文
    /// 由 8 位通道构造颜色。
    pub fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::new(
            f32::from(r) / 255.0,
            f32::from(g) / 255.0,
            f32::from(b) / 255.0,
            f32::from(a) / 255.0,
        )
    }

    /// ### English
    /// Returns the same color with its alpha multiplied by `opacity`.
    ///
    /// ### 中文
    /// 返回 alpha 乘以 `opacity` 之后的颜色。
    pub fn with_opacity(self, opacity: f32) -> Self {
        Self {
            a: self.a * opacity.clamp(0.0, 1.0),
            ..self
        }
    }

    /// ### English
    /// Euclidean RGB distance, used by color keys and mirror target colors.
    ///
    /// ### 中文
    /// RGB 欧氏距离，用于颜色键与镜像目标色匹配。
    pub fn rgb_distance(self, other: Self) -> f32 {
        let dr = self.r - other.r;
        let dg = self.g - other.g;
        let db = self.b - other.b;
        (dr * dr + dg * dg + db * db).sqrt()
    }
}

/// ### English
/// Integer pixel rectangle (top-left origin).
///
/// ### 中文
/// 整数像素矩形（左上角原点）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl PixelRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// ### English
    /// Full rectangle covering `size`.
    ///
    /// ### 中文
    /// 覆盖整个 `size` 的矩形。
    pub fn from_size(size: PhysicalSize<u32>) -> Self {
        Self::new(0, 0, size.width as i32, size.height as i32)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// ### English
    /// Intersection with `bounds`; the result may be empty.
    ///
    /// ### 中文
    /// 与 `bounds` 求交；结果可能为空。
    pub fn clamp_to(&self, bounds: PixelRect) -> PixelRect {
        let x0 = self.x.max(bounds.x);
        let y0 = self.y.max(bounds.y);
        let x1 = (self.x + self.width).min(bounds.x + bounds.width);
        let y1 = (self.y + self.height).min(bounds.y + bounds.height);
        PixelRect::new(x0, y0, (x1 - x0).max(0), (y1 - y0).max(0))
    }

    pub fn to_f32(self) -> RectF {
        RectF::new(
            self.x as f32,
            self.y as f32,
            self.width as f32,
            self.height as f32,
        )
    }
}

/// ### English
/// Floating-point rectangle. Used for animated viewports and quad placement.
///
/// ### 中文
/// 浮点矩形，用于动画 viewport 与四边形摆放。
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Default, Pod, Zeroable)]
pub struct RectF {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl RectF {
    /// ### English
    /// Unit rectangle, the identity texture-coordinate range.
    ///
    /// ### 中文
    /// 单位矩形，即完整的纹理坐标范围。
    pub const UNIT: Self = Self::new(0.0, 0.0, 1.0, 1.0);

    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_size(size: PhysicalSize<u32>) -> Self {
        Self::new(0.0, 0.0, size.width as f32, size.height as f32)
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn intersects(&self, other: &RectF) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// ### English
    /// Rounds to the nearest integer pixel rectangle.
    ///
    /// ### 中文
    /// 四舍五入为整数像素矩形。
    pub fn round(&self) -> PixelRect {
        PixelRect::new(
            self.x.round() as i32,
            self.y.round() as i32,
            self.width.round() as i32,
            self.height.round() as i32,
        )
    }

    /// ### English
    /// Component-wise interpolation between `from` and `to`.
    ///
    /// `t <= 0` returns exactly `from`, `t >= 1` returns exactly `to`, and any other `t` yields a
    /// rectangle whose every component lies between the two endpoints (inclusive).
    ///
    /// ### 中文
    /// 在 `from` 与 `to` 之间逐分量插值。
    ///
    /// `t <= 0` 精确返回 `from`，`t >= 1` 精确返回 `to`；其余 `t` 的每个分量都落在两端点之间（含端点）。
    pub fn lerp(from: RectF, to: RectF, t: f32) -> RectF {
        if !(t > 0.0) {
            return from;
        }
        if t >= 1.0 {
            return to;
        }
        RectF::new(
            lerp_between(from.x, to.x, t),
            lerp_between(from.y, to.y, t),
            lerp_between(from.width, to.width, t),
            lerp_between(from.height, to.height, t),
        )
    }
}

/// ### English
/// Linear interpolation from `a` to `b`, clamped so float rounding never leaves `[a, b]`.
///
/// A `t` outside `0.0..=1.0` therefore yields the nearer endpoint.
///
/// ### 中文
/// 从 `a` 到 `b` 的线性插值，并做截断，浮点舍入不会超出 `[a, b]` 区间。
///
/// 因此 `t` 超出 `0.0..=1.0` 时得到较近的端点。
#[inline]
pub fn lerp_between(a: f32, b: f32, t: f32) -> f32 {
    let value = a + (b - a) * t;
    value.clamp(a.min(b), a.max(b))
}

/// ### English
/// Reference frame for a configured position.
///
/// Screen anchors position relative to the full host window; viewport anchors position relative
/// to the (possibly animated) game viewport of the active mode.
///
/// ### 中文
/// 配置坐标的参考系。
///
/// Screen 锚点相对整个宿主窗口；Viewport 锚点相对当前模式（可能处于动画中）的游戏 viewport。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Anchor {
    #[default]
    TopLeftScreen,
    TopRightScreen,
    BottomLeftScreen,
    BottomRightScreen,
    CenterScreen,
    TopLeftViewport,
    TopRightViewport,
    BottomLeftViewport,
    BottomRightViewport,
    CenterViewport,
}

impl Anchor {
    pub fn is_viewport_relative(self) -> bool {
        matches!(
            self,
            Anchor::TopLeftViewport
                | Anchor::TopRightViewport
                | Anchor::BottomLeftViewport
                | Anchor::BottomRightViewport
                | Anchor::CenterViewport
        )
    }

    /// ### English
    /// Resolves an `(x, y)` offset for an element of size `(width, height)` into the top-left
    /// corner of that element in screen pixels.
    ///
    /// Right/bottom anchors measure the offset from the right/bottom edge inwards, center anchors
    /// offset from the centered position.
    ///
    /// ### 中文
    /// 将尺寸为 `(width, height)` 的元素的 `(x, y)` 偏移解析为其屏幕像素左上角。
    ///
    /// 右/下锚点从右/下边缘向内计算偏移；居中锚点以居中位置为基准偏移。
    pub fn resolve(
        self,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        screen: PhysicalSize<u32>,
        viewport: RectF,
    ) -> (f32, f32) {
        let frame = if self.is_viewport_relative() {
            viewport
        } else {
            RectF::from_size(screen)
        };

        match self {
            Anchor::TopLeftScreen | Anchor::TopLeftViewport => (frame.x + x, frame.y + y),
            Anchor::TopRightScreen | Anchor::TopRightViewport => {
                (frame.right() - width - x, frame.y + y)
            }
            Anchor::BottomLeftScreen | Anchor::BottomLeftViewport => {
                (frame.x + x, frame.bottom() - height - y)
            }
            Anchor::BottomRightScreen | Anchor::BottomRightViewport => {
                (frame.right() - width - x, frame.bottom() - height - y)
            }
            Anchor::CenterScreen | Anchor::CenterViewport => (
                frame.x + (frame.width - width) * 0.5 + x,
                frame.y + (frame.height - height) * 0.5 + y,
            ),
        }
    }
}

/// ### English
/// Easing curve applied to raw transition progress.
///
/// ### 中文
/// 作用于过渡原始进度的缓动曲线。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Easing {
    #[default]
    Linear,
    EaseOut,
    EaseInOut,
}

impl Easing {
    /// ### English
    /// Maps `t` (clamped to `0..=1`) through the curve. Endpoints are preserved exactly.
    ///
    /// ### 中文
    /// 将 `t`（先截断到 `0..=1`）映射到曲线上；端点保持精确。
    pub fn apply(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        if t == 0.0 || t == 1.0 {
            return t;
        }
        match self {
            Easing::Linear => t,
            Easing::EaseOut => 1.0 - (1.0 - t).powi(3),
            Easing::EaseInOut => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) * 0.5
                }
            }
        }
    }
}

/// ### English
/// Viewport rectangle for a mode of `mode_size` on a screen of `screen` pixels.
///
/// An explicit stretch rectangle wins; otherwise an explicit position, otherwise the mode is
/// centered on screen.
///
/// ### 中文
/// 计算尺寸为 `mode_size` 的模式在 `screen` 屏幕上的 viewport 矩形。
///
/// 显式 stretch 矩形优先；其次为显式位置；否则在屏幕居中。
pub fn mode_viewport(
    screen: PhysicalSize<u32>,
    mode_size: PhysicalSize<u32>,
    position: Option<(i32, i32)>,
    stretch: Option<PixelRect>,
) -> RectF {
    if let Some(stretch) = stretch.filter(|rect| !rect.is_empty()) {
        return stretch.to_f32();
    }
    let width = mode_size.width as f32;
    let height = mode_size.height as f32;
    match position {
        Some((x, y)) => RectF::new(x as f32, y as f32, width, height),
        None => RectF::new(
            ((screen.width as f32 - width) * 0.5).floor(),
            ((screen.height as f32 - height) * 0.5).floor(),
            width,
            height,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn between(a: f32, b: f32, v: f32) -> bool {
        v >= a.min(b) && v <= a.max(b)
    }

    #[test]
    fn lerp_hits_endpoints_exactly() {
        let a = RectF::new(0.1, 17.3, 1920.0, 1080.0);
        let b = RectF::new(640.7, 0.3, 320.0, 16384.0);
        assert_eq!(RectF::lerp(a, b, 0.0), a);
        assert_eq!(RectF::lerp(a, b, 1.0), b);
        assert_eq!(RectF::lerp(a, b, -3.0), a);
        assert_eq!(RectF::lerp(a, b, 7.0), b);
    }

    #[test]
    fn scalar_lerp_clamps_out_of_range_progress() {
        assert_eq!(lerp_between(4.0, -2.0, 0.5), 1.0);
        assert_eq!(lerp_between(4.0, -2.0, 1.5), -2.0);
        assert_eq!(lerp_between(4.0, -2.0, -0.5), 4.0);
    }

    #[test]
    fn lerp_stays_between_endpoints() {
        let a = RectF::new(0.1, 0.3, 0.7, 1e6);
        let b = RectF::new(0.3, 0.1, 1e-3, 3.0);
        for step in 1..1000 {
            let t = step as f32 / 1000.0;
            let r = RectF::lerp(a, b, t);
            assert!(between(a.x, b.x, r.x));
            assert!(between(a.y, b.y, r.y));
            assert!(between(a.width, b.width, r.width));
            assert!(between(a.height, b.height, r.height));
        }
    }

    #[test]
    fn anchors_resolve_against_their_frame() {
        let screen = PhysicalSize::new(1000, 800);
        let viewport = RectF::new(100.0, 200.0, 400.0, 300.0);

        assert_eq!(
            Anchor::TopLeftScreen.resolve(10.0, 20.0, 50.0, 40.0, screen, viewport),
            (10.0, 20.0)
        );
        assert_eq!(
            Anchor::BottomRightScreen.resolve(10.0, 20.0, 50.0, 40.0, screen, viewport),
            (940.0, 740.0)
        );
        assert_eq!(
            Anchor::TopLeftViewport.resolve(10.0, 20.0, 50.0, 40.0, screen, viewport),
            (110.0, 220.0)
        );
        assert_eq!(
            Anchor::CenterViewport.resolve(0.0, 0.0, 50.0, 40.0, screen, viewport),
            (275.0, 330.0)
        );
    }

    #[test]
    fn easing_preserves_endpoints() {
        for easing in [Easing::Linear, Easing::EaseOut, Easing::EaseInOut] {
            assert_eq!(easing.apply(0.0), 0.0);
            assert_eq!(easing.apply(1.0), 1.0);
            let mid = easing.apply(0.5);
            assert!(mid > 0.0 && mid < 1.0);
        }
    }

    #[test]
    fn mode_viewport_centers_by_default() {
        let screen = PhysicalSize::new(1920, 1080);
        let rect = mode_viewport(screen, PhysicalSize::new(384, 16384), None, None);
        assert_eq!(rect.x, 768.0);
        assert_eq!(rect.width, 384.0);
        assert_eq!(rect.y, ((1080.0f32 - 16384.0) * 0.5).floor());

        let stretched = mode_viewport(
            screen,
            PhysicalSize::new(384, 16384),
            None,
            Some(PixelRect::new(0, 0, 1920, 1080)),
        );
        assert_eq!(stretched, RectF::new(0.0, 0.0, 1920.0, 1080.0));
    }
}
