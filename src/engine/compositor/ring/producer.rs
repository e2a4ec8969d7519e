//! ### English
//! Compositor-side owner of one output ring: render targets, slot reservation and publishing.
//!
//! ### 中文
//! 合成线程侧的输出环持有者：渲染目标、槽位预留与发布。

use std::sync::Arc;

use dpi::PhysicalSize;

use crate::engine::gpu::{DeferredFenceRing, Fence, GpuDevice, RenderTarget};

use super::shared::SharedRing;
use super::{
    RING_SLOTS, SLOT_FREE, SLOT_HELD, SLOT_READY, SLOT_RELEASE_PENDING, SLOT_RENDERING,
};

/// ### English
/// Triple-buffered render targets of one output stream.
///
/// Must stay on the compositor thread.
///
/// ### 中文
/// 单个输出流的三缓冲渲染目标。
///
/// 必须留在合成线程上。
pub struct RenderRing {
    label: &'static str,
    shared: Arc<SharedRing>,
    targets: [Option<RenderTarget>; RING_SLOTS],
    size: PhysicalSize<u32>,
    /// ### English
    /// Monotonic frame sequence generator (0 is reserved for "no frame").
    ///
    /// ### 中文
    /// 单调递增帧序号生成器（0 保留表示“无帧”）。
    next_frame_seq: u64,
    /// ### English
    /// Completion fence of the last good frame; replaced fences go through `retired`.
    ///
    /// ### 中文
    /// 最近有效帧的完成 fence；被替换的 fence 经 `retired` 延迟删除。
    published: Option<Fence>,
    retired: DeferredFenceRing,
    failed_size: Option<PhysicalSize<u32>>,
}

impl RenderRing {
    pub fn new(label: &'static str, shared: Arc<SharedRing>, fence_depth: usize) -> Self {
        Self {
            label,
            shared,
            targets: [None, None, None],
            size: PhysicalSize::new(0, 0),
            next_frame_seq: 0,
            published: None,
            retired: DeferredFenceRing::new(fence_depth),
            failed_size: None,
        }
    }

    pub fn shared(&self) -> &Arc<SharedRing> {
        &self.shared
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn target(&self, slot: usize) -> Option<&RenderTarget> {
        self.targets.get(slot)?.as_ref()
    }

    /// ### English
    /// Switches the ring to `size`. Returns `true` when the size changed, in which case the last
    /// good frame has been invalidated.
    ///
    /// Slots the host currently holds are resized lazily when they are next reserved.
    ///
    /// ### 中文
    /// 将环切换到 `size`。尺寸变化时返回 `true`，此时最近有效帧已失效。
    ///
    /// 宿主当前持有的槽位会在下次被预留时再延迟 resize。
    pub fn ensure_size(&mut self, device: &mut dyn GpuDevice, size: PhysicalSize<u32>) -> bool {
        if self.size == size {
            return false;
        }

        log::debug!(
            "{} ring resize {}x{} -> {}x{}",
            self.label,
            self.size.width,
            self.size.height,
            size.width,
            size.height
        );
        self.shared.set_resizing(true);
        self.shared.invalidate_latest();
        self.size = size;
        self.failed_size = None;

        for slot in 0..RING_SLOTS {
            let locked = [SLOT_READY, SLOT_FREE, SLOT_RELEASE_PENDING]
                .into_iter()
                .any(|state| {
                    self.shared
                        .compare_exchange_state(slot, state, SLOT_RENDERING)
                });
            if !locked {
                continue;
            }
            self.settle_consumer_fence(device, slot);
            self.shared.clear_producer_fence(slot);
            self.ensure_slot_target(device, slot);
            self.shared.store_state(slot, SLOT_FREE);
        }

        if let Some(fence) = self.published.take() {
            self.retired.retire(device, fence);
        }
        self.shared.set_resizing(false);
        true
    }

    /// ### English
    /// Deals with the consumer fence of a slot this thread owns: deleted at once when it has
    /// signaled, otherwise the GPU is told to wait for it before any following command.
    ///
    /// ### 中文
    /// 处理本线程独占槽位上的 consumer fence：已 signal 则立即删除，否则让 GPU 在后续命令之前
    /// 等待它。
    fn settle_consumer_fence(&mut self, device: &mut dyn GpuDevice, slot: usize) {
        let Some(fence) = self.shared.take_consumer_fence(slot) else {
            return;
        };
        if !device.poll_fence(fence.handle()) {
            device.wait_fence(fence.handle());
        }
        device.delete_fence(fence);
    }

    /// ### English
    /// Moves RELEASE_PENDING slots whose consumer fence signaled back to FREE (never blocks).
    ///
    /// ### 中文
    /// 把 consumer fence 已 signal 的 RELEASE_PENDING 槽位移回 FREE（从不阻塞）。
    fn reclaim_release_pending(&mut self, device: &mut dyn GpuDevice) {
        for slot in 0..RING_SLOTS {
            if self.shared.slot_state(slot) != SLOT_RELEASE_PENDING {
                continue;
            }
            let fence = self.shared.peek_consumer_fence(slot);
            if !fence.is_none() && !device.poll_fence(fence) {
                continue;
            }
            if self
                .shared
                .compare_exchange_state(slot, SLOT_RELEASE_PENDING, SLOT_FREE)
                && let Some(fence) = self.shared.take_consumer_fence(slot)
            {
                device.delete_fence(fence);
            }
        }
    }

    fn ensure_slot_target(&mut self, device: &mut dyn GpuDevice, slot: usize) -> bool {
        if self.size.width == 0 || self.size.height == 0 {
            return false;
        }
        if self.failed_size == Some(self.size) {
            return false;
        }

        let result = match self.targets[slot].as_mut() {
            Some(target) if target.size() == self.size => Ok(()),
            Some(target) => device.resize_render_target(target, self.size),
            None => device
                .create_render_target(self.size, true)
                .map(|target| {
                    self.targets[slot] = Some(target);
                }),
        };

        match result {
            Ok(()) => {
                if let Some(target) = self.targets[slot].as_ref() {
                    self.shared.set_slot_texture(slot, target.texture().view());
                }
                true
            }
            Err(err) => {
                log::error!("{} ring slot {slot}: {err}", self.label);
                self.failed_size = Some(self.size);
                false
            }
        }
    }

    /// ### English
    /// Reserves the slot to render the next frame into.
    ///
    /// Order: FREE slots, then reclaimed RELEASE_PENDING slots, then the oldest READY slot that is
    /// not the last good frame, and only then a RELEASE_PENDING slot whose consumer fence is still
    /// unsignaled (with a GPU-side wait). Returns `None` when every slot is in use or the targets
    /// cannot be allocated.
    ///
    /// ### 中文
    /// 预留下一帧要渲染到的槽位。
    ///
    /// 顺序：FREE 槽位 → 回收后的 RELEASE_PENDING 槽位 → 非最近有效帧中最旧的 READY 槽位 →
    /// 最后才是 consumer fence 仍未 signal 的 RELEASE_PENDING 槽位（发出 GPU 侧等待）。所有槽位
    /// 都在使用或无法分配渲染目标时返回 `None`。
    pub fn begin_frame(&mut self, device: &mut dyn GpuDevice) -> Option<usize> {
        let slot = self.reserve(device)?;
        self.settle_consumer_fence(device, slot);
        self.shared.clear_producer_fence(slot);
        if !self.ensure_slot_target(device, slot) {
            self.shared.store_state(slot, SLOT_FREE);
            return None;
        }
        self.shared.begin_generation(slot);
        Some(slot)
    }

    /// Slots in `state`, oldest frame first.
    fn by_age(&self, state: u8) -> Vec<usize> {
        let mut slots: Vec<usize> = (0..RING_SLOTS)
            .filter(|&slot| self.shared.slot_state(slot) == state)
            .collect();
        slots.sort_by_key(|&slot| self.shared.slot_seq(slot));
        slots
    }

    fn claim_oldest(&self, from: u8) -> Option<usize> {
        self.by_age(from)
            .into_iter()
            .find(|&slot| self.shared.compare_exchange_state(slot, from, SLOT_RENDERING))
    }

    fn reserve(&mut self, device: &mut dyn GpuDevice) -> Option<usize> {
        /*
        ### English
        Fast path: triple buffering nearly always leaves one FREE slot.

        ### 中文
        快路径：三缓冲几乎总会留下一个 FREE 槽位。
        */
        if let Some(slot) = self.claim_oldest(SLOT_FREE) {
            return Some(slot);
        }

        self.reclaim_release_pending(device);
        if let Some(slot) = self.claim_oldest(SLOT_FREE) {
            return Some(slot);
        }

        /*
        ### English
        Steal the oldest READY slot, keeping the last good frame available to the host.

        ### 中文
        抢占最旧的 READY 槽位，保留最近有效帧给宿主使用。
        */
        let (latest_seq, latest_slot) = self.shared.latest();
        let stealable = self.by_age(SLOT_READY).into_iter().find(|&slot| {
            !(latest_seq != 0 && slot == latest_slot)
                && self
                    .shared
                    .compare_exchange_state(slot, SLOT_READY, SLOT_RENDERING)
        });
        if stealable.is_some() {
            return stealable;
        }

        /*
        ### English
        Last resort: reuse a slot whose reader has not finished yet. The GPU-side wait issued by
        `settle_consumer_fence` orders our writes after its reads.

        ### 中文
        最后手段：复用读者尚未完成的槽位。`settle_consumer_fence` 发出的 GPU 侧等待保证我们的
        写入排在其读取之后。
        */
        let pending = self.claim_oldest(SLOT_RELEASE_PENDING);
        if pending.is_none() {
            log::trace!(
                "{} ring: no slot available (held: {})",
                self.label,
                (0..RING_SLOTS)
                    .filter(|&slot| self.shared.slot_state(slot) == SLOT_HELD)
                    .count()
            );
        }
        pending
    }

    /// ### English
    /// Finishes the frame in `slot`: inserts its completion fence, publishes it as the last good
    /// frame and retires the previous frame's fence through the deferred ring. Returns the new
    /// frame sequence.
    ///
    /// ### 中文
    /// 完成 `slot` 中的帧：插入完成 fence、发布为最近有效帧，并通过延迟环回收上一帧的 fence。
    /// 返回新的帧序号。
    pub fn finish_frame(&mut self, device: &mut dyn GpuDevice, slot: usize) -> u64 {
        let fence = device.insert_fence();
        let handle = fence.as_ref().map(Fence::handle).unwrap_or_default();

        self.next_frame_seq = self.next_frame_seq.wrapping_add(1).max(1);
        self.shared.publish(slot, handle, self.next_frame_seq);

        if let Some(previous) = std::mem::replace(&mut self.published, fence) {
            self.retired.retire(device, previous);
        }
        self.next_frame_seq
    }

    /// ### English
    /// Gives a reserved slot back without publishing it.
    ///
    /// ### 中文
    /// 不发布，直接归还已预留的槽位。
    pub fn abort_frame(&mut self, slot: usize) {
        if slot < RING_SLOTS {
            self.shared
                .compare_exchange_state(slot, SLOT_RENDERING, SLOT_FREE);
        }
    }

    pub fn last_frame_seq(&self) -> u64 {
        self.next_frame_seq
    }

    /// ### English
    /// Deletes every GPU object of the ring. Idempotent.
    ///
    /// ### 中文
    /// 删除环上的全部 GPU 对象；幂等。
    pub fn destroy(&mut self, device: &mut dyn GpuDevice) {
        self.shared.set_resizing(true);
        self.shared.invalidate_latest();

        for slot in 0..RING_SLOTS {
            if let Some(fence) = self.shared.take_consumer_fence(slot) {
                device.delete_fence(fence);
            }
            self.shared.clear_producer_fence(slot);
            if let Some(target) = self.targets[slot].take() {
                device.delete_render_target(target);
            }
            self.shared.store_state(slot, SLOT_FREE);
        }

        if let Some(fence) = self.published.take() {
            device.delete_fence(fence);
        }
        self.retired.drain(device);
        self.size = PhysicalSize::new(0, 0);
        self.shared.set_resizing(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::geometry::Rgba;
    use crate::engine::gpu::headless::{GpuEvent, HeadlessGpu};
    use crate::engine::gpu::DrawTarget;

    struct Rig {
        gpu: HeadlessGpu,
        compositor: Box<dyn GpuDevice>,
        host: Box<dyn GpuDevice>,
        ring: RenderRing,
    }

    impl Rig {
        fn new() -> Self {
            let gpu = HeadlessGpu::new();
            let mut rig = Self {
                compositor: Box::new(gpu.device()),
                host: Box::new(gpu.device()),
                ring: RenderRing::new("test", Arc::new(SharedRing::new()), 4),
                gpu,
            };
            rig.ring
                .ensure_size(rig.compositor.as_mut(), PhysicalSize::new(8, 8));
            rig
        }

        fn render(&mut self, color: Rgba) -> usize {
            let slot = self
                .ring
                .begin_frame(self.compositor.as_mut())
                .expect("slot");
            let target = self.ring.target(slot).expect("target");
            self.compositor.bind(DrawTarget::Target(target));
            self.compositor.clear(color);
            self.ring.finish_frame(self.compositor.as_mut(), slot);
            slot
        }

        /// Host acquire + sample + release with a consumer fence.
        fn consume(&mut self) -> (usize, u64) {
            let shared = Arc::clone(self.ring.shared());
            let frame = shared.try_acquire_latest().expect("frame");
            self.host.wait_fence(frame.producer_fence);
            let _ = self
                .host
                .read_pixel(crate::engine::gpu::BlitSource::Texture(frame.texture), 0, 0);
            let fence = self.host.insert_fence();
            let raw = fence.as_ref().map(|f| f.handle().raw()).unwrap_or(0);
            if let Some(stale) = shared.release(frame.slot, fence) {
                self.host.delete_fence(stale);
            }
            (frame.slot, raw)
        }
    }

    #[test]
    fn frames_rotate_through_free_slots() {
        let mut rig = Rig::new();
        let a = rig.render(Rgba::WHITE);
        let b = rig.render(Rgba::BLACK);
        let c = rig.render(Rgba::WHITE);
        let mut used = vec![a, b, c];
        used.sort_unstable();
        assert_eq!(used, vec![0, 1, 2]);
        assert_eq!(rig.ring.shared().latest(), (3, c));
    }

    #[test]
    fn slot_is_never_rewritten_before_its_consumer_fence() {
        let mut rig = Rig::new();
        rig.gpu.set_auto_signal(false);

        let first = rig.render(Rgba::WHITE);
        let (consumed, consumer_fence) = rig.consume();
        assert_eq!(consumed, first);
        let texture = rig.ring.target(first).expect("target").texture().id();
        let generation_before = rig.ring.shared().generation(first);
        rig.gpu.take_events();

        // Keep rendering until the consumed slot is reused.
        let mut reused = false;
        for _ in 0..4 {
            if rig.render(Rgba::BLACK) == first {
                reused = true;
                break;
            }
        }
        assert!(reused, "the consumed slot comes around again");
        assert!(rig.ring.shared().generation(first) > generation_before);

        let events = rig.gpu.events();
        let first_write = events
            .iter()
            .position(|event| *event == GpuEvent::Write { texture })
            .expect("slot written");
        let waited = events[..first_write]
            .iter()
            .any(|event| *event == GpuEvent::Wait { fence: consumer_fence });
        assert!(waited, "GPU wait on the consumer fence precedes the rewrite");
        assert!(!rig.gpu.fence_alive(crate::engine::gpu::FenceHandle::from_raw(consumer_fence)));
    }

    #[test]
    fn signaled_consumer_fence_is_reclaimed_without_waiting() {
        let mut rig = Rig::new();
        let first = rig.render(Rgba::WHITE);
        let (_, consumer_fence) = rig.consume();
        rig.gpu.take_events();
        for _ in 0..3 {
            rig.render(Rgba::BLACK);
        }
        assert!(
            !rig
                .gpu
                .events()
                .contains(&GpuEvent::Wait { fence: consumer_fence })
        );
        assert!(rig.ring.shared().generation(first) >= 2);
    }

    #[test]
    fn held_slot_is_skipped() {
        let mut rig = Rig::new();
        let first = rig.render(Rgba::WHITE);
        let held = rig.ring.shared().try_acquire_latest().expect("held");
        assert_eq!(held.slot, first);
        for _ in 0..6 {
            assert_ne!(rig.render(Rgba::BLACK), first);
        }
        assert!(rig.ring.shared().release(held.slot, None).is_none());
        assert_eq!(rig.ring.shared().slot_state(first), SLOT_FREE);
    }

    #[test]
    fn resize_invalidates_last_good_frame_and_destroy_frees_everything() {
        let mut rig = Rig::new();
        rig.render(Rgba::WHITE);
        assert!(
            rig.ring
                .ensure_size(rig.compositor.as_mut(), PhysicalSize::new(16, 4))
        );
        assert!(rig.ring.shared().try_acquire_latest().is_none());
        let slot = rig.render(Rgba::WHITE);
        assert_eq!(
            rig.ring.target(slot).map(|target| target.size()),
            Some(PhysicalSize::new(16, 4))
        );

        rig.ring.destroy(rig.compositor.as_mut());
        assert_eq!(rig.gpu.framebuffer_count(), 0);
        assert_eq!(rig.gpu.live_fence_count(), 0);
    }

    #[test]
    fn allocation_failure_yields_no_slot() {
        let gpu = HeadlessGpu::new();
        let mut device = gpu.device();
        let mut ring = RenderRing::new("test", Arc::new(SharedRing::new()), 4);
        gpu.set_fail_render_targets(true);
        ring.ensure_size(&mut device, PhysicalSize::new(8, 8));
        assert!(ring.begin_frame(&mut device).is_none());
        assert_eq!(ring.shared().slot_state(0), SLOT_FREE);
    }
}
