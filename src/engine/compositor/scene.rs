//! ### English
//! Scene planning: which mirrors, images and window overlays a frame shows, where, and how opaque.
//!
//! Planning (config lookups, string comparisons) only reruns when the config version or the
//! modes involved change. Resolving a plan into quads is cheap and runs every frame, because the
//! viewport may be animating.
//!
//! ### 中文
//! 场景规划：一帧显示哪些镜像、图片与窗口叠加，位置在哪里，透明度多少。
//!
//! 规划（配置查找、字符串比较）只在配置版本或涉及的模式变化时重新执行；把规划解析为四边形
//! 的开销很小，每帧都执行，因为 viewport 可能正处于动画中。

use std::time::Instant;

use dpi::PhysicalSize;

use crate::engine::capture::{CachedRenderPosition, MirrorPlacement, MirrorRenderData, PositionKey};
use crate::engine::config::{Config, ImageConfig, ModeConfig, TransitionStyle};
use crate::engine::geometry::{RectF, Rgba};
use crate::engine::gpu::{BlendMode, FenceHandle, QuadDraw, Shading};

use super::images::{ImageKind, ImageLibrary};
use super::request::FrameRenderRequest;

/// ### English
/// Animation inputs shared by every element of one frame.
///
/// ### 中文
/// 同一帧所有元素共享的动画输入。
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Motion {
    pub(crate) active: bool,
    pub(crate) progress: f32,
    pub(crate) from: RectF,
    pub(crate) to: RectF,
    pub(crate) current: RectF,
    pub(crate) slide: bool,
    pub(crate) screen: PhysicalSize<u32>,
}

impl Motion {
    /// ### English
    /// `slide_allowed` is false when EyeZoom owns the animation of either mode involved.
    ///
    /// ### 中文
    /// 当 EyeZoom 接管所涉模式之一的动画时，`slide_allowed` 为 false。
    pub(crate) fn new(request: &FrameRenderRequest, slide_allowed: bool) -> Self {
        let transition = &request.transition;
        Self {
            active: transition.active,
            progress: transition.progress.clamp(0.0, 1.0),
            from: transition.from,
            to: transition.to,
            current: request.viewport,
            slide: slide_allowed
                && transition.slide_mirrors
                && transition.style == TransitionStyle::Slide,
            screen: request.screen,
        }
    }

    /// ### English
    /// Screen rectangle and opacity factor of an element present in the previous mode (`from`),
    /// the current one (`to`), or both.
    ///
    /// ### 中文
    /// 计算存在于上一模式（`from`）、当前模式（`to`）或两者中的元素的屏幕矩形与透明度系数。
    pub(crate) fn animate(&self, from: Option<RectF>, to: Option<RectF>) -> Option<(RectF, f32)> {
        let t = self.progress;
        match (from, to) {
            (_, Some(to)) if !self.active => Some((to, 1.0)),
            (Some(from), Some(to)) => Some((RectF::lerp(from, to, t), 1.0)),
            (None, Some(to)) if self.slide => Some((RectF::lerp(self.offscreen(to), to, t), 1.0)),
            (None, Some(to)) => Some((to, t)),
            (Some(_), None) if !self.active => None,
            (Some(from), None) if self.slide => {
                Some((RectF::lerp(from, self.offscreen(from), t), 1.0))
            }
            (Some(from), None) => Some((from, 1.0 - t)),
            (None, None) => None,
        }
    }

    /// ### English
    /// `rect` moved just past the nearer vertical screen edge.
    ///
    /// ### 中文
    /// 把 `rect` 移到较近的竖直屏幕边缘之外。
    fn offscreen(&self, rect: RectF) -> RectF {
        let center = rect.x + rect.width * 0.5;
        let x = if center < self.screen.width as f32 * 0.5 {
            -rect.width
        } else {
            self.screen.width as f32
        };
        RectF::new(x, rect.y, rect.width, rect.height)
    }
}

/// ### English
/// A mirror the frame may show, with its placement in the previous and current mode.
///
/// ### 中文
/// 本帧可能显示的镜像，以及它在上一模式与当前模式中的摆放。
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PlannedMirror {
    pub(crate) name: String,
    pub(crate) from: Option<MirrorPlacement>,
    pub(crate) to: Option<MirrorPlacement>,
    pub(crate) opacity: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PlannedImage {
    pub(crate) id: String,
    pub(crate) kind: ImageKind,
    pub(crate) config: ImageConfig,
    pub(crate) in_from: bool,
    pub(crate) in_to: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct PlanKey {
    config_version: u64,
    mode_id: String,
    previous_mode: String,
}

/// ### English
/// Config-derived element lists for one `(config version, mode, previous mode)` triple.
///
/// ### 中文
/// 针对 `(配置版本, 模式, 上一模式)` 三元组、由配置推导出的元素列表。
#[derive(Debug, Default)]
pub(crate) struct ScenePlan {
    key: Option<PlanKey>,
    pub(crate) mirrors: Vec<PlannedMirror>,
    pub(crate) images: Vec<PlannedImage>,
}

fn mode_placements(config: &Config, mode: &ModeConfig) -> Vec<(String, MirrorPlacement)> {
    let mut placements: Vec<(String, MirrorPlacement)> = Vec::new();
    for id in &mode.mirror_ids {
        if let Some(mirror) = config.mirror(id)
            && !placements.iter().any(|(name, _)| name == id)
        {
            placements.push((id.clone(), MirrorPlacement::from_config(mirror)));
        }
    }
    for group in mode.group_ids.iter().filter_map(|id| config.group(id)) {
        for item in group.items.iter().filter(|item| item.enabled) {
            if let Some(mirror) = config.mirror(&item.mirror_id)
                && !placements.iter().any(|(name, _)| *name == item.mirror_id)
            {
                placements.push((
                    item.mirror_id.clone(),
                    MirrorPlacement::in_group(mirror, &group.output, item),
                ));
            }
        }
    }
    placements
}

fn mode_images(config: &Config, mode: &ModeConfig) -> Vec<(ImageKind, String, ImageConfig)> {
    let images = mode
        .image_ids
        .iter()
        .filter_map(|id| config.image(id))
        .map(|image| (ImageKind::UserImage, image.name.clone(), image.clone()));
    let overlays = mode
        .window_overlay_ids
        .iter()
        .filter_map(|id| config.window_overlay(id))
        .map(|overlay| {
            (
                ImageKind::WindowOverlay,
                overlay.image.name.clone(),
                overlay.image.clone(),
            )
        });
    images.chain(overlays).collect()
}

impl ScenePlan {
    /// ### English
    /// Rebuilds the lists when the key changed. Returns whether anything was rebuilt.
    ///
    /// ### 中文
    /// 键变化时重建列表；返回是否发生了重建。
    pub(crate) fn refresh(
        &mut self,
        config: &Config,
        config_version: u64,
        mode_id: &str,
        previous_mode: &str,
    ) -> bool {
        let previous_mode = if previous_mode == mode_id {
            ""
        } else {
            previous_mode
        };
        if let Some(key) = &self.key
            && key.config_version == config_version
            && key.mode_id == mode_id
            && key.previous_mode == previous_mode
        {
            return false;
        }

        self.mirrors.clear();
        self.images.clear();
        let to_mode = config.mode(mode_id);
        let from_mode = (!previous_mode.is_empty())
            .then(|| config.mode(previous_mode))
            .flatten();

        let to_placements = to_mode.map(|m| mode_placements(config, m)).unwrap_or_default();
        let from_placements = from_mode
            .map(|m| mode_placements(config, m))
            .unwrap_or_default();
        let find = |list: &[(String, MirrorPlacement)], name: &str| {
            list.iter().find(|(n, _)| n == name).map(|(_, p)| *p)
        };
        for (name, placement) in &to_placements {
            self.mirrors.push(PlannedMirror {
                name: name.clone(),
                from: find(&from_placements, name),
                to: Some(*placement),
                opacity: config.mirror(name).map_or(1.0, |m| m.opacity),
            });
        }
        for (name, placement) in &from_placements {
            if find(&to_placements, name).is_none() {
                self.mirrors.push(PlannedMirror {
                    name: name.clone(),
                    from: Some(*placement),
                    to: None,
                    opacity: config.mirror(name).map_or(1.0, |m| m.opacity),
                });
            }
        }

        let to_images = to_mode.map(|m| mode_images(config, m)).unwrap_or_default();
        let from_images = from_mode
            .map(|m| mode_images(config, m))
            .unwrap_or_default();
        let contains = |list: &[(ImageKind, String, ImageConfig)], kind: ImageKind, id: &str| {
            list.iter().any(|(k, n, _)| *k == kind && n == id)
        };
        for (kind, id, image) in &to_images {
            self.images.push(PlannedImage {
                id: id.clone(),
                kind: *kind,
                config: image.clone(),
                in_from: contains(&from_images, *kind, id),
                in_to: true,
            });
        }
        for (kind, id, image) in from_images.iter() {
            if !contains(&to_images, *kind, id) {
                self.images.push(PlannedImage {
                    id: id.clone(),
                    kind: *kind,
                    config: image.clone(),
                    in_from: true,
                    in_to: false,
                });
            }
        }

        self.key = Some(PlanKey {
            config_version,
            mode_id: mode_id.to_string(),
            previous_mode: previous_mode.to_string(),
        });
        true
    }

    pub(crate) fn invalidate(&mut self) {
        self.key = None;
    }

    pub(crate) fn mirror_names(&self) -> impl Iterator<Item = &str> {
        self.mirrors.iter().map(|mirror| mirror.name.as_str())
    }
}

/// ### English
/// One resolved draw. Mirror quads carry the capture fence to wait on first.
///
/// ### 中文
/// 一次已解析的绘制；镜像四边形携带需先等待的捕获 fence。
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct SceneDraw {
    pub(crate) wait: FenceHandle,
    pub(crate) quad: QuadDraw,
}

impl SceneDraw {
    fn quad(quad: QuadDraw) -> Self {
        Self {
            wait: FenceHandle::NONE,
            quad,
        }
    }
}

/// ### English
/// Appends the visible mirror quads. `data` is parallel to `plan.mirrors`.
///
/// ### 中文
/// 追加可见的镜像四边形；`data` 与 `plan.mirrors` 一一对应。
pub(crate) fn resolve_mirrors(
    plan: &ScenePlan,
    data: &[Option<MirrorRenderData>],
    motion: &Motion,
    out: &mut Vec<SceneDraw>,
) {
    for (mirror, data) in plan.mirrors.iter().zip(data) {
        let Some(data) = data.filter(|d| d.has_valid_content && d.texture.id != 0) else {
            continue;
        };
        let size = data.texture.size;
        let to = mirror.to.map(|placement| {
            let key = PositionKey {
                placement,
                size,
                screen: motion.screen,
                viewport: if motion.active { motion.to } else { motion.current },
            };
            CachedRenderPosition::rect_for(data.position.as_ref(), key)
        });
        let from = mirror
            .from
            .filter(|_| motion.active)
            .map(|placement| placement.resolve(size, motion.screen, motion.from));
        let Some((rect, factor)) = motion.animate(from, to) else {
            continue;
        };
        let opacity = (mirror.opacity * factor).clamp(0.0, 1.0);
        if opacity <= 0.0 || rect.is_empty() {
            continue;
        }
        out.push(SceneDraw {
            wait: data.fence,
            quad: QuadDraw::textured(rect, data.texture)
                .with_opacity(opacity)
                .with_blend(BlendMode::Premultiplied),
        });
    }
}

/// ### English
/// Destination rectangle and frame-local texture rectangle of an image after cropping.
///
/// ### 中文
/// 裁剪后图片的目标矩形与帧内纹理矩形。
pub(crate) fn image_layout(
    image: &ImageConfig,
    frame: PhysicalSize<u32>,
    screen: PhysicalSize<u32>,
    viewport: RectF,
) -> Option<(RectF, RectF)> {
    let crop = &image.crop;
    let width = frame
        .width
        .saturating_sub(crop.left.saturating_add(crop.right));
    let height = frame
        .height
        .saturating_sub(crop.top.saturating_add(crop.bottom));
    if width == 0 || height == 0 {
        return None;
    }
    let dst_width = width as f32 * image.scale;
    let dst_height = height as f32 * image.scale;
    let (x, y) = image.relative_to.resolve(
        image.x as f32,
        image.y as f32,
        dst_width,
        dst_height,
        screen,
        viewport,
    );
    let uv = RectF::new(
        crop.left as f32 / frame.width as f32,
        crop.top as f32 / frame.height as f32,
        width as f32 / frame.width as f32,
        height as f32 / frame.height as f32,
    );
    Some((RectF::new(x, y, dst_width, dst_height), uv))
}

/// ### English
/// Appends background, content and border quads of every visible image and window overlay.
/// Returns how many images were placed.
///
/// ### 中文
/// 追加每个可见图片与窗口叠加的背景、内容与描边四边形；返回放置的图片数量。
pub(crate) fn resolve_images(
    plan: &ScenePlan,
    library: &ImageLibrary,
    motion: &Motion,
    now: Instant,
    out: &mut Vec<SceneDraw>,
) -> usize {
    let mut drawn = 0;
    for planned in &plan.images {
        let Some(frame) = library.get(planned.kind, &planned.id, now) else {
            continue;
        };
        let image = &planned.config;
        let layout = |viewport| image_layout(image, frame.size, motion.screen, viewport);
        let to_viewport = if motion.active { motion.to } else { motion.current };
        let to = planned.in_to.then(|| layout(to_viewport)).flatten();
        let from = (planned.in_from && motion.active)
            .then(|| layout(motion.from))
            .flatten();
        let uv_crop = to.or(from).map(|(_, uv)| uv).unwrap_or(RectF::UNIT);
        let Some((rect, factor)) = motion.animate(from.map(|l| l.0), to.map(|l| l.0)) else {
            continue;
        };
        let opacity = (image.opacity * factor).clamp(0.0, 1.0);
        if opacity <= 0.0 || rect.is_empty() {
            continue;
        }

        if image.background.enabled && image.background.opacity > 0.0 {
            out.push(SceneDraw::quad(
                QuadDraw::solid(rect, image.background.color)
                    .with_opacity(image.background.opacity * opacity),
            ));
        }

        let uv = RectF::new(
            frame.uv.x + uv_crop.x * frame.uv.width,
            frame.uv.y + uv_crop.y * frame.uv.height,
            uv_crop.width * frame.uv.width,
            uv_crop.height * frame.uv.height,
        );
        let mut content = QuadDraw::textured(rect, frame.texture)
            .with_uv(uv)
            .with_opacity(opacity);
        if let Some(key) = &image.color_key {
            content = content.with_shading(Shading::ColorKey {
                key: key.color,
                sensitivity: key.sensitivity,
            });
        }
        out.push(SceneDraw::quad(content));
        drawn += 1;

        if image.border.enabled && image.border.width > 0.0 {
            let w = image.border.width;
            out.push(SceneDraw::quad(
                QuadDraw::solid(outset(rect, w), image.border.color)
                    .with_opacity(opacity)
                    .with_shading(Shading::Border {
                        thickness: w,
                        radius: image.border.radius,
                        circle: false,
                    }),
            ));
        }
    }
    drawn
}

fn outset(rect: RectF, by: f32) -> RectF {
    RectF::new(rect.x - by, rect.y - by, rect.width + 2.0 * by, rect.height + 2.0 * by)
}

/// ### English
/// Border drawn around the game viewport on the external-capture stream.
///
/// ### 中文
/// 外部捕获流上围绕游戏 viewport 绘制的描边。
pub(crate) fn viewport_border(viewport: RectF, width: f32, color: Rgba) -> QuadDraw {
    QuadDraw::solid(outset(viewport, width), color).with_shading(Shading::Border {
        thickness: width,
        radius: 0.0,
        circle: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::geometry::Anchor;
    use crate::engine::gpu::TextureRef;

    fn config() -> Config {
        Config::from_json(
            r#"{
                "modes": [
                    {"id": "main", "width": 100, "height": 100, "mirrorIds": ["pie", "e"],
                     "imageIds": ["logo"]},
                    {"id": "thin", "width": 40, "height": 100, "mirrorIds": ["e"],
                     "groupIds": ["g"]}
                ],
                "mirrors": [
                    {"name": "pie", "captureWidth": 10, "captureHeight": 10,
                     "inputs": [{"x": 0, "y": 0}], "opacity": 0.5},
                    {"name": "e", "captureWidth": 10, "captureHeight": 10,
                     "inputs": [{"x": 0, "y": 0}],
                     "output": {"x": 5, "y": 5, "relativeTo": "topLeftViewport", "scale": 1.0}}
                ],
                "mirrorGroups": [
                    {"name": "g", "items": [{"mirrorId": "pie", "enabled": true,
                      "widthPercent": 50.0, "heightPercent": 50.0}],
                     "output": {"x": 1, "y": 2, "relativeTo": "topLeftScreen", "scale": 2.0}}
                ],
                "images": [{"name": "logo", "x": 0, "y": 0, "scale": 1.0, "opacity": 1.0}]
            }"#,
        )
        .expect("fixture parses")
    }

    fn data(id: u32) -> MirrorRenderData {
        MirrorRenderData {
            texture: TextureRef {
                id,
                size: PhysicalSize::new(10, 10),
            },
            fence: FenceHandle::from_raw(u64::from(id)),
            has_valid_content: true,
            generation: 1,
            position: None,
        }
    }

    fn motion(active: bool, progress: f32, slide: bool) -> Motion {
        Motion {
            active,
            progress,
            from: RectF::new(0.0, 0.0, 100.0, 100.0),
            to: RectF::new(30.0, 0.0, 40.0, 100.0),
            current: RectF::new(30.0, 0.0, 40.0, 100.0),
            slide,
            screen: PhysicalSize::new(100, 100),
        }
    }

    #[test]
    fn group_items_override_direct_placement_only_when_not_listed_directly() {
        let config = config();
        let mut plan = ScenePlan::default();
        assert!(plan.refresh(&config, 1, "thin", ""));
        assert!(!plan.refresh(&config, 1, "thin", "thin"));

        let names: Vec<&str> = plan.mirror_names().collect();
        assert_eq!(names, ["e", "pie"]);
        let pie = &plan.mirrors[1];
        let placement = pie.to.expect("pie shown through group");
        assert_eq!((placement.x, placement.y), (1.0, 2.0));
        assert_eq!(placement.scale_x, 1.0);
        assert_eq!(pie.from, None);
        assert_eq!(pie.opacity, 0.5);
    }

    #[test]
    fn transition_plan_tracks_entering_and_leaving_elements() {
        let config = config();
        let mut plan = ScenePlan::default();
        plan.refresh(&config, 1, "thin", "main");

        let e = plan.mirrors.iter().find(|m| m.name == "e").expect("e");
        assert!(e.from.is_some() && e.to.is_some());
        let pie = plan.mirrors.iter().find(|m| m.name == "pie").expect("pie");
        assert!(pie.from.is_some() && pie.to.is_some());

        let logo = &plan.images[0];
        assert!(logo.in_from && !logo.in_to);
        assert!(plan.refresh(&config, 2, "thin", "main"));
    }

    #[test]
    fn staying_viewport_mirror_interpolates_between_from_and_to() {
        let config = config();
        let mut plan = ScenePlan::default();
        plan.refresh(&config, 1, "thin", "main");
        let e_index = plan.mirrors.iter().position(|m| m.name == "e").expect("e");
        let mut all = vec![None; plan.mirrors.len()];
        all[e_index] = Some(data(7));

        let mut out = Vec::new();
        resolve_mirrors(&plan, &all, &motion(true, 0.0, false), &mut out);
        assert_eq!(out[0].quad.dst, RectF::new(5.0, 5.0, 10.0, 10.0));
        assert_eq!(out[0].wait, FenceHandle::from_raw(7));

        out.clear();
        resolve_mirrors(&plan, &all, &motion(true, 1.0, false), &mut out);
        assert_eq!(out[0].quad.dst, RectF::new(35.0, 5.0, 10.0, 10.0));

        out.clear();
        resolve_mirrors(&plan, &all, &motion(true, 0.5, false), &mut out);
        let x = out[0].quad.dst.x;
        assert!((5.0..=35.0).contains(&x));
    }

    #[test]
    fn leaving_elements_fade_or_slide_out() {
        let m = motion(true, 0.25, false);
        let rect = RectF::new(10.0, 10.0, 20.0, 20.0);
        assert_eq!(m.animate(Some(rect), None), Some((rect, 0.75)));
        assert_eq!(m.animate(None, Some(rect)), Some((rect, 0.25)));

        let sliding = motion(true, 1.0, true);
        let (out, factor) = sliding.animate(Some(rect), None).expect("still drawn");
        assert_eq!(factor, 1.0);
        assert_eq!(out.x, -20.0);

        let settled = motion(false, 1.0, true);
        assert_eq!(settled.animate(Some(rect), None), None);
        assert_eq!(settled.animate(Some(rect), Some(rect)), Some((rect, 1.0)));
    }

    #[test]
    fn zero_opacity_and_invalid_mirrors_are_not_drawn() {
        let mut config = config();
        if let Some(pie) = config.mirror_mut("pie") {
            pie.opacity = 0.0;
        }
        let mut plan = ScenePlan::default();
        plan.refresh(&config, 1, "main", "");
        let mut invalid = data(3);
        invalid.has_valid_content = false;

        let mut out = Vec::new();
        resolve_mirrors(&plan, &[Some(data(2)), Some(invalid)], &motion(false, 1.0, false), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn cropped_image_layout_uses_anchor_and_scale() {
        let mut image = ImageConfig::default();
        image.scale = 2.0;
        image.relative_to = Anchor::BottomRightScreen;
        image.crop.left = 2;
        image.crop.top = 1;
        let (dst, uv) = image_layout(
            &image,
            PhysicalSize::new(10, 5),
            PhysicalSize::new(100, 100),
            RectF::new(0.0, 0.0, 100.0, 100.0),
        )
        .expect("non-empty");
        assert_eq!(dst, RectF::new(84.0, 92.0, 16.0, 8.0));
        assert_eq!(uv, RectF::new(0.2, 0.2, 0.8, 0.8));

        image.crop.right = 8;
        assert!(image_layout(&image, PhysicalSize::new(10, 5), PhysicalSize::new(1, 1), RectF::UNIT).is_none());
    }

    #[test]
    fn huge_crop_values_hide_the_image() {
        let mut image = ImageConfig::default();
        image.crop.left = u32::MAX;
        image.crop.right = 1;
        image.crop.top = u32::MAX;
        image.crop.bottom = u32::MAX;
        assert!(image_layout(&image, PhysicalSize::new(10, 5), PhysicalSize::new(100, 100), RectF::UNIT).is_none());
    }

    #[test]
    fn motion_only_slides_for_slide_transitions_that_allow_it() {
        let mut request = FrameRenderRequest::new(1, PhysicalSize::new(100, 100), RectF::UNIT, "m");
        request.transition.style = TransitionStyle::Slide;
        request.transition.slide_mirrors = true;
        assert!(Motion::new(&request, true).slide);
        assert!(!Motion::new(&request, false).slide);
        request.transition.style = TransitionStyle::Bounce;
        assert!(!Motion::new(&request, true).slide);
    }
}
