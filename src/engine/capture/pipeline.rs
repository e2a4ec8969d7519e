//! ### English
//! Per-mirror capture pass: game copy → intermediate target → final (bordered) target → swap.
//!
//! ### 中文
//! 单个镜像的捕获流程：游戏拷贝 → 中间目标 → 最终（带描边）目标 → 交换。

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

use crate::engine::config::{BorderShape, Config, MirrorBorder, MirrorConfig};
use crate::engine::coordination::{ActiveMirrors, ViewportCache};
use crate::engine::geometry::{PixelRect, RectF, Rgba};
use crate::engine::gpu::{
    BlendMode, BlitSource, DeferredFenceRing, DrawTarget, GpuDevice, MirrorFilter, QuadDraw,
    Shading,
};

use super::frame_copy::CopyFrame;
use super::mirror::{
    CachedRenderPosition, MirrorInstance, MirrorPlacement, MirrorRegistry, MirrorRenderData,
    MirrorTargets, PositionKey,
};

/// ### English
/// Capture-thread owner of every mirror instance.
///
/// ### 中文
/// 捕获线程中所有镜像实例的持有者。
pub(crate) struct MirrorPipeline {
    instances: HashMap<String, MirrorInstance>,
    retired: DeferredFenceRing,
    config_version: u64,
    border_passes: u64,
}

impl MirrorPipeline {
    pub(crate) fn new(fence_depth: usize) -> Self {
        Self {
            instances: HashMap::new(),
            retired: DeferredFenceRing::new(fence_depth),
            config_version: 0,
            border_passes: 0,
        }
    }

    /// ### English
    /// Number of completed capture + border passes (diagnostics).
    ///
    /// ### 中文
    /// 已完成的捕获 + 描边流程次数（诊断用）。
    pub(crate) fn border_passes(&self) -> u64 {
        self.border_passes
    }

    /// ### English
    /// Updates every active mirror that is due. Returns how many were updated.
    ///
    /// ### 中文
    /// 更新所有到期的活动镜像，返回更新的数量。
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn run(
        &mut self,
        device: &mut dyn GpuDevice,
        config: &Config,
        config_version: u64,
        active: &ActiveMirrors,
        viewport: ViewportCache,
        frame: Option<CopyFrame>,
        registry: &MirrorRegistry,
        now: Instant,
    ) -> usize {
        if config_version != self.config_version {
            self.prune(device, config, registry);
            self.config_version = config_version;
        }
        let Some(frame) = frame else {
            return 0;
        };

        let mut updated = 0;
        for name in &active.names {
            let Some(mirror) = config.mirror(name) else {
                continue;
            };
            if mirror.inputs.is_empty() {
                continue;
            }
            if !self.instances.contains_key(name.as_str()) {
                self.instances
                    .insert(name.clone(), MirrorInstance::default());
            }
            let Some(instance) = self.instances.get_mut(name.as_str()) else {
                continue;
            };

            let size = mirror.output_texture_size();
            let was_valid = instance.has_valid_content;
            if !instance.ensure_targets(name, device, size) {
                if was_valid || registry.get(name).is_some() {
                    registry.remove(name);
                }
                continue;
            }
            if was_valid && !instance.has_valid_content {
                registry.remove(name);
            }

            let fresh = frame.sequence != instance.last_sequence || !instance.has_valid_content;
            if !fresh || !instance.throttle.should_update(mirror.fps, now) {
                continue;
            }

            let Some(targets) = instance.targets.as_ref() else {
                continue;
            };
            let back = 1 - instance.front;
            capture_into(device, targets, back, mirror, frame, &viewport);
            self.border_passes += 1;

            let fence = device.insert_fence();
            let position = viewport.is_valid().then(|| {
                CachedRenderPosition::compute(PositionKey {
                    placement: MirrorPlacement::from_config(mirror),
                    size,
                    screen: viewport.screen(),
                    viewport: viewport.viewport,
                })
            });

            instance.front = back;
            instance.generation += 1;
            instance.has_valid_content = true;
            instance.last_sequence = frame.sequence;
            instance.position = position;
            let data = MirrorRenderData {
                texture: targets.finals[back].texture().view(),
                fence: fence.as_ref().map(|f| f.handle()).unwrap_or_default(),
                has_valid_content: true,
                generation: instance.generation,
                position,
            };
            registry.publish(name, data);

            let previous = std::mem::replace(&mut instance.front_fence, fence);
            if let Some(previous) = previous {
                self.retired.retire(device, previous);
            }
            updated += 1;
        }
        updated
    }

    /// ### English
    /// Drops instances of mirrors that no longer exist in `config`.
    ///
    /// ### 中文
    /// 移除在 `config` 中已不存在的镜像实例。
    fn prune(&mut self, device: &mut dyn GpuDevice, config: &Config, registry: &MirrorRegistry) {
        let stale: Vec<String> = self
            .instances
            .keys()
            .filter(|name| config.mirror(name).is_none())
            .cloned()
            .collect();
        for name in stale {
            registry.remove(&name);
            if let Some(mut instance) = self.instances.remove(&name) {
                if let Some(fence) = instance.release(device) {
                    self.retired.retire(device, fence);
                }
                log::debug!("mirror '{name}' removed");
            }
        }
    }

    /// ### English
    /// Releases every GPU object. Each resource class is cleaned up in its own guarded block so a
    /// failure in one does not skip the others.
    ///
    /// ### 中文
    /// 释放全部 GPU 对象。每类资源在各自受保护的块中清理，一类失败不会跳过其它类。
    pub(crate) fn teardown(&mut self, device: &mut dyn GpuDevice, registry: &MirrorRegistry) {
        registry.clear();

        let mut fences = Vec::new();
        let targets = catch_unwind(AssertUnwindSafe(|| {
            for (_, mut instance) in self.instances.drain() {
                if let Some(fence) = instance.release(device) {
                    fences.push(fence);
                }
            }
        }));
        if targets.is_err() {
            log::error!("mirror render target cleanup panicked");
        }

        let retired = catch_unwind(AssertUnwindSafe(|| {
            for fence in fences.drain(..) {
                device.delete_fence(fence);
            }
            self.retired.drain(device);
        }));
        if retired.is_err() {
            log::error!("mirror fence cleanup panicked");
        }
    }
}

/// ### English
/// Copies the capture regions into `intermediate[back]` (color-filtered unless raw) and
/// applies the border into `finals[back]`.
///
/// Both targets are `output_texture_size`; content sits inset by the border padding so the
/// border has room on every side.
///
/// ### 中文
/// 把捕获区域拷贝到 `intermediate[back]`（非 raw 时做颜色过滤），再把描边应用到 `finals[back]`。
///
/// 两个目标尺寸均为 `output_texture_size`；内容按描边留白内缩，保证四周都有描边空间。
fn capture_into(
    device: &mut dyn GpuDevice,
    targets: &MirrorTargets,
    back: usize,
    mirror: &MirrorConfig,
    frame: CopyFrame,
    viewport: &ViewportCache,
) {
    let intermediate = &targets.intermediate[back];
    let finals = &targets.finals[back];
    let frame_size = frame.texture.size;
    let frame_rect = PixelRect::from_size(frame_size);
    let game_viewport = if viewport.is_valid() {
        viewport.viewport
    } else {
        RectF::from_size(frame_size)
    };

    let pad = mirror.border.padding() as i32;
    let (width, height) = (mirror.capture_width as i32, mirror.capture_height as i32);
    let raw = mirror.raw_output || mirror.colors.target_colors.is_empty();
    let filter = MirrorFilter::new(
        &mirror.colors.target_colors,
        mirror.colors.output_color,
        mirror.colors.sensitivity,
    );

    device.bind(DrawTarget::Target(intermediate));
    device.clear(Rgba::TRANSPARENT);
    for input in &mirror.inputs {
        let (x, y) = input.relative_to.resolve(
            input.x as f32,
            input.y as f32,
            width as f32,
            height as f32,
            frame_size,
            game_viewport,
        );
        let region = PixelRect::new(x.round() as i32, y.round() as i32, width, height);
        let src = region.clamp_to(frame_rect);
        if src.is_empty() {
            continue;
        }
        let dst = PixelRect::new(
            pad + (src.x - region.x),
            pad + (src.y - region.y),
            src.width,
            src.height,
        );

        if raw {
            device.blit(BlitSource::Texture(frame.texture), src, dst);
        } else {
            let uv = RectF::new(
                src.x as f32 / frame_size.width as f32,
                src.y as f32 / frame_size.height as f32,
                src.width as f32 / frame_size.width as f32,
                src.height as f32 / frame_size.height as f32,
            );
            device.draw(
                &QuadDraw::textured(dst.to_f32(), frame.texture)
                    .with_uv(uv)
                    .with_shading(Shading::MirrorFilter(filter))
                    .with_blend(BlendMode::Over),
            );
        }
    }

    let full = RectF::from_size(finals.size());
    let content = QuadDraw::textured(full, intermediate.texture().view()).with_blend(BlendMode::Replace);
    device.bind(DrawTarget::Target(finals));
    device.clear(Rgba::TRANSPARENT);
    match mirror.border {
        MirrorBorder::None => device.draw(&content),
        MirrorBorder::Dynamic { thickness, color } => device.draw(
            &content.with_shading(Shading::DynamicBorder {
                thickness: thickness as f32,
                color,
            }),
        ),
        MirrorBorder::Static {
            shape,
            thickness,
            color,
            radius,
        } => {
            device.draw(&content);
            device.draw(&QuadDraw::solid(full, color).with_shading(Shading::Border {
                thickness: thickness as f32,
                radius,
                circle: shape == BorderShape::Circle,
            }));
        }
    }
}
