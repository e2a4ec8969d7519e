//! ### English
//! Mirror instances (capture-thread GPU state) and the registry the compositor reads.
//!
//! The capture thread exclusively owns every mirror's render targets. What other threads may see
//! is a small [`MirrorRenderData`] copy per mirror held in [`MirrorRegistry`]: the lock guards the
//! map and metadata, the producer fence guards pixel readiness.
//!
//! ### 中文
//! 镜像实例（捕获线程的 GPU 状态）以及合成线程读取的注册表。
//!
//! 捕获线程独占每个镜像的渲染目标。其它线程可见的只是 [`MirrorRegistry`] 中每个镜像一份的
//! [`MirrorRenderData`]：锁保护映射结构与元数据，生产者 fence 保护像素就绪。

use std::collections::HashMap;

use dpi::PhysicalSize;
use parking_lot::RwLock;

use crate::engine::config::{GroupOutput, MirrorConfig, MirrorGroupItem};
use crate::engine::error::OverlayError;
use crate::engine::geometry::{Anchor, RectF};
use crate::engine::gpu::{Fence, FenceHandle, GpuDevice, RenderTarget, TextureRef};

use super::throttle::FpsThrottle;

/// ### English
/// Where and how large a mirror is drawn, before resolving against screen and viewport.
///
/// ### 中文
/// 镜像的绘制位置与缩放（尚未针对屏幕与 viewport 解析）。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MirrorPlacement {
    pub x: f32,
    pub y: f32,
    pub anchor: Anchor,
    pub scale_x: f32,
    pub scale_y: f32,
}

impl MirrorPlacement {
    pub fn from_config(mirror: &MirrorConfig) -> Self {
        let (scale_x, scale_y) = mirror.output.scales();
        Self {
            x: mirror.output.x as f32,
            y: mirror.output.y as f32,
            anchor: mirror.output.relative_to,
            scale_x,
            scale_y,
        }
    }

    /// ### English
    /// Placement of a mirror shown through a group: the group anchor and scale, offset and sized
    /// by the item.
    ///
    /// ### 中文
    /// 通过分组展示的镜像摆放：使用分组的锚点与缩放，并按条目偏移与调整尺寸。
    pub fn in_group(mirror: &MirrorConfig, group: &GroupOutput, item: &MirrorGroupItem) -> Self {
        let (scale_x, scale_y) = mirror.output.scales();
        Self {
            x: (group.x + item.offset_x) as f32,
            y: (group.y + item.offset_y) as f32,
            anchor: group.relative_to,
            scale_x: scale_x * group.scale * item.width_percent / 100.0,
            scale_y: scale_y * group.scale * item.height_percent / 100.0,
        }
    }

    /// ### English
    /// Screen rectangle for a texture of `size`.
    ///
    /// ### 中文
    /// 尺寸为 `size` 的纹理对应的屏幕矩形。
    pub fn resolve(
        &self,
        size: PhysicalSize<u32>,
        screen: PhysicalSize<u32>,
        viewport: RectF,
    ) -> RectF {
        let width = size.width as f32 * self.scale_x;
        let height = size.height as f32 * self.scale_y;
        let (x, y) = self
            .anchor
            .resolve(self.x, self.y, width, height, screen, viewport);
        RectF::new(x, y, width, height)
    }
}

/// ### English
/// Inputs a cached render position was computed from.
///
/// ### 中文
/// 计算缓存渲染位置所用的输入。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionKey {
    pub placement: MirrorPlacement,
    pub size: PhysicalSize<u32>,
    pub screen: PhysicalSize<u32>,
    pub viewport: RectF,
}

/// ### English
/// Screen rectangle plus the key it is valid for.
///
/// ### 中文
/// 屏幕矩形及其有效的键。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CachedRenderPosition {
    pub key: PositionKey,
    pub rect: RectF,
}

impl CachedRenderPosition {
    pub fn compute(key: PositionKey) -> Self {
        Self {
            key,
            rect: key.placement.resolve(key.size, key.screen, key.viewport),
        }
    }

    /// ### English
    /// Cached rectangle when `key` matches, otherwise a freshly computed one.
    ///
    /// ### 中文
    /// `key` 匹配时返回缓存矩形，否则重新计算。
    pub fn rect_for(cached: Option<&Self>, key: PositionKey) -> RectF {
        match cached {
            Some(cached) if cached.key == key => cached.rect,
            _ => Self::compute(key).rect,
        }
    }
}

/// ### English
/// What the compositor needs to draw a mirror, copied out under the registry read lock.
///
/// ### 中文
/// 合成线程绘制镜像所需的数据，在注册表读锁内拷贝出来。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MirrorRenderData {
    pub texture: TextureRef,
    /// ### English
    /// Signals when `texture` is fully written. Owned by the capture thread; wait on it only.
    ///
    /// ### 中文
    /// `texture` 完全写入后 signal；由捕获线程拥有，读者只能等待。
    pub fence: FenceHandle,
    pub has_valid_content: bool,
    /// ### English
    /// Counts front/back swaps.
    ///
    /// ### 中文
    /// 前后缓冲交换次数。
    pub generation: u64,
    pub position: Option<CachedRenderPosition>,
}

/// ### English
/// Published per-mirror render data, keyed by mirror name.
///
/// ### 中文
/// 按镜像名索引的已发布渲染数据。
#[derive(Default)]
pub struct MirrorRegistry {
    entries: RwLock<HashMap<String, MirrorRenderData>>,
}

impl MirrorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// ### English
    /// Replaces a mirror's data; this is the front/back swap as seen by readers.
    ///
    /// ### 中文
    /// 替换镜像数据；对读者而言即前后缓冲交换。
    pub fn publish(&self, name: &str, data: MirrorRenderData) {
        let mut entries = self.entries.write();
        match entries.get_mut(name) {
            Some(entry) => *entry = data,
            None => {
                entries.insert(name.to_string(), data);
            }
        }
    }

    pub fn remove(&self, name: &str) -> Option<MirrorRenderData> {
        self.entries.write().remove(name)
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn get(&self, name: &str) -> Option<MirrorRenderData> {
        self.entries.read().get(name).copied()
    }

    /// ### English
    /// Copies the data of `names` into `out` (same order, `None` for unknown mirrors) under one
    /// short read lock. Never wait on the fences while the lock is held.
    ///
    /// ### 中文
    /// 在一次短暂的读锁内把 `names` 对应的数据拷贝到 `out`（顺序一致，未知镜像为 `None`）。
    /// 持锁期间绝不等待 fence。
    pub fn render_data<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
        out: &mut Vec<Option<MirrorRenderData>>,
    ) {
        out.clear();
        let entries = self.entries.read();
        out.extend(names.into_iter().map(|name| entries.get(name).copied()));
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// ### English
/// The four render targets of one mirror.
///
/// ### 中文
/// 单个镜像的四个渲染目标。
pub(crate) struct MirrorTargets {
    pub(crate) intermediate: [RenderTarget; 2],
    pub(crate) finals: [RenderTarget; 2],
}

impl MirrorTargets {
    fn create(device: &mut dyn GpuDevice, size: PhysicalSize<u32>) -> Result<Self, OverlayError> {
        let mut created: Vec<RenderTarget> = Vec::with_capacity(4);
        for _ in 0..4 {
            match device.create_render_target(size, false) {
                Ok(target) => created.push(target),
                Err(err) => {
                    for target in created {
                        device.delete_render_target(target);
                    }
                    return Err(err);
                }
            }
        }
        let mut created = created.into_iter();
        match (
            created.next(),
            created.next(),
            created.next(),
            created.next(),
        ) {
            (Some(a), Some(b), Some(c), Some(d)) => Ok(Self {
                intermediate: [a, b],
                finals: [c, d],
            }),
            _ => Err(OverlayError::InvalidSize(size)),
        }
    }

    pub(crate) fn size(&self) -> PhysicalSize<u32> {
        self.finals[0].size()
    }

    fn resize(
        &mut self,
        device: &mut dyn GpuDevice,
        size: PhysicalSize<u32>,
    ) -> Result<(), OverlayError> {
        for target in self.intermediate.iter_mut().chain(self.finals.iter_mut()) {
            device.resize_render_target(target, size)?;
        }
        Ok(())
    }

    fn delete(self, device: &mut dyn GpuDevice) {
        let [a, b] = self.intermediate;
        let [c, d] = self.finals;
        for target in [a, b, c, d] {
            device.delete_render_target(target);
        }
    }
}

/// ### English
/// Capture-thread state of one mirror.
///
/// ### 中文
/// 单个镜像在捕获线程中的状态。
#[derive(Default)]
pub(crate) struct MirrorInstance {
    pub(crate) targets: Option<MirrorTargets>,
    /// ### English
    /// Index of the final target readers may sample.
    ///
    /// ### 中文
    /// 读者可以采样的 final 目标下标。
    pub(crate) front: usize,
    /// ### English
    /// Producer fence of the front final target (owned here; readers get a handle copy).
    ///
    /// ### 中文
    /// front final 目标的生产者 fence（由此处拥有；读者拿到的是句柄拷贝）。
    pub(crate) front_fence: Option<Fence>,
    pub(crate) has_valid_content: bool,
    pub(crate) generation: u64,
    pub(crate) throttle: FpsThrottle,
    /// ### English
    /// Output size whose render targets failed to build; not retried until the size changes.
    ///
    /// ### 中文
    /// 渲染目标创建失败时的输出尺寸；尺寸变化前不再重试。
    pub(crate) unavailable_at: Option<PhysicalSize<u32>>,
    pub(crate) last_sequence: u64,
    pub(crate) position: Option<CachedRenderPosition>,
}

impl MirrorInstance {
    /// ### English
    /// Makes sure all targets exist at `size`. Returns `false` while the mirror is unavailable.
    /// Any (re)allocation invalidates the content and forces the next update.
    ///
    /// ### 中文
    /// 确保所有目标以 `size` 存在；镜像不可用时返回 `false`。任何（重新）分配都会使内容失效
    /// 并强制下一次更新。
    pub(crate) fn ensure_targets(
        &mut self,
        name: &str,
        device: &mut dyn GpuDevice,
        size: PhysicalSize<u32>,
    ) -> bool {
        if self.unavailable_at == Some(size) {
            return false;
        }
        self.unavailable_at = None;

        let result = match &mut self.targets {
            Some(targets) if targets.size() == size => return true,
            Some(targets) => targets.resize(device, size),
            None => MirrorTargets::create(device, size).map(|targets| {
                self.targets = Some(targets);
            }),
        };

        self.has_valid_content = false;
        self.position = None;
        self.throttle.force();
        match result {
            Ok(()) => {
                log::debug!("mirror '{name}' targets at {}x{}", size.width, size.height);
                true
            }
            Err(err) => {
                log::warn!(
                    "mirror '{name}' unavailable at {}x{}: {err}",
                    size.width,
                    size.height
                );
                if let Some(targets) = self.targets.take() {
                    targets.delete(device);
                }
                self.unavailable_at = Some(size);
                false
            }
        }
    }

    /// ### English
    /// Releases the render targets and hands back the front fence for retirement.
    ///
    /// ### 中文
    /// 释放渲染目标，并交回 front fence 以便延迟删除。
    pub(crate) fn release(&mut self, device: &mut dyn GpuDevice) -> Option<Fence> {
        if let Some(targets) = self.targets.take() {
            targets.delete(device);
        }
        self.has_valid_content = false;
        self.position = None;
        self.front_fence.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gpu::headless::HeadlessGpu;

    fn mirror() -> MirrorConfig {
        let mut mirror = MirrorConfig {
            name: "pie".to_string(),
            ..MirrorConfig::default()
        };
        mirror.output.x = 10;
        mirror.output.y = 20;
        mirror.output.relative_to = Anchor::BottomRightScreen;
        mirror.output.scale = 2.0;
        mirror
    }

    #[test]
    fn placement_resolves_anchor_and_scale() {
        let rect = MirrorPlacement::from_config(&mirror()).resolve(
            PhysicalSize::new(50, 40),
            PhysicalSize::new(1920, 1080),
            RectF::new(0.0, 0.0, 1920.0, 1080.0),
        );
        assert_eq!(rect, RectF::new(1810.0, 980.0, 100.0, 80.0));
    }

    #[test]
    fn group_item_scales_percentages() {
        let group = GroupOutput {
            x: 5,
            y: 6,
            relative_to: Anchor::TopLeftScreen,
            scale: 0.5,
        };
        let item = MirrorGroupItem {
            mirror_id: "pie".to_string(),
            offset_x: 1,
            offset_y: 2,
            width_percent: 50.0,
            ..MirrorGroupItem::default()
        };
        let placement = MirrorPlacement::in_group(&mirror(), &group, &item);
        assert_eq!((placement.x, placement.y), (6.0, 8.0));
        assert_eq!((placement.scale_x, placement.scale_y), (0.5, 1.0));
    }

    #[test]
    fn cached_position_used_only_for_matching_key() {
        let key = PositionKey {
            placement: MirrorPlacement::from_config(&mirror()),
            size: PhysicalSize::new(50, 40),
            screen: PhysicalSize::new(1920, 1080),
            viewport: RectF::new(0.0, 0.0, 1920.0, 1080.0),
        };
        let mut cached = CachedRenderPosition::compute(key);
        cached.rect.x = -1.0;
        assert_eq!(CachedRenderPosition::rect_for(Some(&cached), key).x, -1.0);
        let moved = PositionKey {
            screen: PhysicalSize::new(2560, 1440),
            ..key
        };
        assert_eq!(
            CachedRenderPosition::rect_for(Some(&cached), moved).x,
            2560.0 - 100.0 - 10.0
        );
    }

    #[test]
    fn failed_targets_stay_unavailable_until_size_changes() {
        let gpu = HeadlessGpu::new();
        let mut device = gpu.device();
        let mut instance = MirrorInstance::default();
        let size = PhysicalSize::new(30, 30);

        gpu.set_fail_render_targets(true);
        assert!(!instance.ensure_targets("pie", &mut device, size));
        gpu.set_fail_render_targets(false);
        assert!(!instance.ensure_targets("pie", &mut device, size));
        assert_eq!(gpu.framebuffer_count(), 0);

        assert!(instance.ensure_targets("pie", &mut device, PhysicalSize::new(31, 30)));
        assert_eq!(gpu.framebuffer_count(), 4);
        assert!(instance.release(&mut device).is_none());
        assert_eq!(gpu.framebuffer_count(), 0);
    }

    #[test]
    fn registry_copies_in_request_order() {
        let registry = MirrorRegistry::new();
        let data = MirrorRenderData {
            texture: TextureRef {
                id: 7,
                size: PhysicalSize::new(1, 1),
            },
            fence: FenceHandle::from_raw(9),
            has_valid_content: true,
            generation: 1,
            position: None,
        };
        registry.publish("a", data);
        let mut out = Vec::new();
        registry.render_data(["missing", "a"], &mut out);
        assert_eq!(out, vec![None, Some(data)]);
    }
}
