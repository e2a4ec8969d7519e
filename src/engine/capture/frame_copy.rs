//! ### English
//! Double-buffered copy of the host frame.
//!
//! The host thread blits its framebuffer into one of two copy targets and hands the copy fence to
//! the capture thread. The capture thread polls fences (never blocking) and publishes a slot as
//! "ready" once its fence has signaled.
//!
//! State word layout (`u64`):
//! - bits `0..2`: ready slot (`3` = none)
//! - bits `2..4`: slot being written (`3` = none)
//! - bits `16..40`: write generation of slot 0
//! - bits `40..64`: write generation of slot 1
//!
//! The host alternates between the two slots. Submissions are polled in the order they were made
//! (fences on one context signal in order), so a copy whose fence signals while the next copy is in
//! flight is still published. A submission carries the generation it was written with; if the host
//! wraps around and starts another write into the same slot before the fence is seen, the old
//! submission is stale and is discarded.
//!
//! ### 中文
//! 宿主帧的双缓冲拷贝。
//!
//! 宿主线程把其 framebuffer blit 到两个拷贝目标之一，并把拷贝 fence 交给捕获线程。捕获线程
//! 零超时轮询 fence（从不阻塞），fence signal 后把该槽位发布为 “ready”。
//!
//! 状态字布局（`u64`）：
//! - bit `0..2`：ready 槽位（`3` 表示无）
//! - bit `2..4`：正在写入的槽位（`3` 表示无）
//! - bit `16..40`：槽位 0 的写入代数
//! - bit `40..64`：槽位 1 的写入代数
//!
//! 宿主在两个槽位之间交替写入。提交按提交顺序轮询（同一上下文上的 fence 按顺序 signal），因此
//! 下一次拷贝仍在进行时 signal 的拷贝依然会被发布。每次提交携带写入时的代数；若 fence 被观察到
//! 之前宿主已绕回并开始向同一槽位写入，旧提交即过期并被丢弃。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use dpi::PhysicalSize;

use crate::engine::error::OverlayError;
use crate::engine::geometry::PixelRect;
use crate::engine::gpu::{BlitSource, DrawTarget, Fence, GpuDevice, RenderTarget, TextureRef};
use crate::engine::lockfree::ThreadWaker;

const SLOT_NONE: u64 = 3;
const SLOT_MASK: u64 = 0b11;
const WRITING_SHIFT: u32 = 2;
const GEN_BITS: u32 = 24;
const GEN_MASK: u64 = (1 << GEN_BITS) - 1;
const GEN_SHIFT: [u32; 2] = [16, 40];

const INITIAL_STATE: u64 = SLOT_NONE | (SLOT_NONE << WRITING_SHIFT);

/// ### English
/// Submissions in flight between host and capture thread.
///
/// ### 中文
/// 宿主与捕获线程之间在途提交的数量上限。
const SUBMISSION_CAPACITY: usize = 8;

#[inline]
fn ready_of(state: u64) -> u64 {
    state & SLOT_MASK
}

#[inline]
fn writing_of(state: u64) -> u64 {
    (state >> WRITING_SHIFT) & SLOT_MASK
}

#[inline]
fn generation_of(state: u64, slot: usize) -> u32 {
    ((state >> GEN_SHIFT[slot]) & GEN_MASK) as u32
}

#[inline]
fn with_generation(state: u64, slot: usize, generation: u32) -> u64 {
    (state & !(GEN_MASK << GEN_SHIFT[slot])) | ((u64::from(generation) & GEN_MASK) << GEN_SHIFT[slot])
}

#[inline]
fn with_ready(state: u64, slot: u64) -> u64 {
    (state & !SLOT_MASK) | slot
}

#[inline]
fn with_writing(state: u64, slot: u64) -> u64 {
    (state & !(SLOT_MASK << WRITING_SHIFT)) | (slot << WRITING_SHIFT)
}

#[inline]
fn pack_size(size: PhysicalSize<u32>) -> u64 {
    (u64::from(size.width) << 32) | u64::from(size.height)
}

#[inline]
fn unpack_size(packed: u64) -> PhysicalSize<u32> {
    PhysicalSize::new((packed >> 32) as u32, packed as u32)
}

/// ### English
/// One copy of the host frame.
///
/// ### 中文
/// 宿主帧的一份拷贝。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopyFrame {
    pub slot: usize,
    pub texture: TextureRef,
    /// ### English
    /// Publication sequence; `0` for a frame returned by the safe fallback before any publish.
    ///
    /// ### 中文
    /// 发布序号；在任何发布之前由安全回退返回的帧为 `0`。
    pub sequence: u64,
}

#[derive(Default)]
struct CopySlot {
    texture: AtomicU32,
    size: AtomicU64,
    sequence: AtomicU64,
}

/// ### English
/// Host-to-capture handoff of one copy fence (ownership travels with `fence`).
///
/// ### 中文
/// 宿主到捕获线程的一次拷贝 fence 交接（所有权随 `fence` 转移）。
#[derive(Debug)]
pub(crate) struct CopySubmission {
    slot: usize,
    generation: u32,
    fence: u64,
}

/// ### English
/// Shared state of the game frame copy.
///
/// ### 中文
/// 游戏帧拷贝的共享状态。
pub struct GameFrameCopy {
    state: AtomicU64,
    slots: [CopySlot; 2],
    sequence: AtomicU64,
    consumer_active: AtomicBool,
    submit_tx: Sender<CopySubmission>,
    submit_rx: Receiver<CopySubmission>,
    waker: ThreadWaker,
}

impl Default for GameFrameCopy {
    fn default() -> Self {
        Self::new()
    }
}

impl GameFrameCopy {
    pub fn new() -> Self {
        let (submit_tx, submit_rx) = crossbeam_channel::bounded(SUBMISSION_CAPACITY);
        Self {
            state: AtomicU64::new(INITIAL_STATE),
            slots: Default::default(),
            sequence: AtomicU64::new(0),
            consumer_active: AtomicBool::new(false),
            submit_tx,
            submit_rx,
            waker: ThreadWaker::new(),
        }
    }

    /// ### English
    /// Whether a capture thread is draining submissions; the host skips copying otherwise.
    ///
    /// ### 中文
    /// 是否有捕获线程在处理提交；否则宿主跳过拷贝。
    #[inline]
    pub fn is_consumer_active(&self) -> bool {
        self.consumer_active.load(Ordering::Acquire)
    }

    pub(crate) fn set_consumer_active(&self, active: bool) {
        self.consumer_active.store(active, Ordering::Release);
    }

    pub(crate) fn waker(&self) -> &ThreadWaker {
        &self.waker
    }

    fn frame(&self, slot: u64) -> Option<CopyFrame> {
        if slot >= 2 {
            return None;
        }
        let entry = &self.slots[slot as usize];
        let id = entry.texture.load(Ordering::Acquire);
        if id == 0 {
            return None;
        }
        Some(CopyFrame {
            slot: slot as usize,
            texture: TextureRef {
                id,
                size: unpack_size(entry.size.load(Ordering::Acquire)),
            },
            sequence: entry.sequence.load(Ordering::Acquire),
        })
    }

    /// ### English
    /// Latest fence-proven copy.
    ///
    /// ### 中文
    /// 最新的、经 fence 证明已完成的拷贝。
    pub fn ready(&self) -> Option<CopyFrame> {
        self.frame(ready_of(self.state.load(Ordering::Acquire)))
    }

    /// ### English
    /// A slot that is not being written right now; at most one frame stale, no fence needed.
    ///
    /// ### 中文
    /// 当前未被写入的槽位；最多落后一帧，无需等待 fence。
    pub fn safe(&self) -> Option<CopyFrame> {
        let state = self.state.load(Ordering::Acquire);
        let writing = writing_of(state);
        (0..2u64)
            .filter(|slot| *slot != writing)
            .find_map(|slot| self.frame(slot))
    }

    /// ### English
    /// `ready()`, falling back to `safe()` during cold start or a driver stall.
    ///
    /// ### 中文
    /// 优先 `ready()`；冷启动或驱动卡顿时回退到 `safe()`。
    pub fn latest(&self) -> Option<CopyFrame> {
        self.ready().or_else(|| self.safe())
    }

    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// ### English
    /// Claims `slot` and bumps its generation. A ready marker on `slot` is withdrawn, so readers
    /// fall back to the other slot until the new copy is published. Host thread only.
    ///
    /// ### 中文
    /// 占用 `slot` 并递增其代数。若 `slot` 正是 ready 槽位则撤销 ready 标记，读取方在新拷贝
    /// 发布前回退到另一个槽位；仅限宿主线程。
    fn begin_write(&self, slot: usize) -> u32 {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let generation = (generation_of(current, slot) + 1) & GEN_MASK as u32;
            let mut next = with_writing(with_generation(current, slot, generation), slot as u64);
            if ready_of(current) == slot as u64 {
                next = with_ready(next, SLOT_NONE);
            }
            match self.state.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return generation,
                Err(actual) => current = actual,
            }
        }
    }

    fn abort_write(&self, slot: usize, generation: u32) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (writing_of(current) == slot as u64 && generation_of(current, slot) == generation)
                    .then(|| with_writing(current, SLOT_NONE))
            });
    }

    fn store_slot(&self, slot: usize, texture: TextureRef) {
        let entry = &self.slots[slot];
        entry.size.store(pack_size(texture.size), Ordering::Release);
        entry.texture.store(texture.id, Ordering::Release);
    }

    /// ### English
    /// Publishes `slot` as ready if no newer write has claimed it. Capture thread only.
    ///
    /// ### 中文
    /// 若没有更新的写入占用 `slot`，则将其发布为 ready；仅限捕获线程。
    fn publish(&self, slot: usize, generation: u32) -> bool {
        let current = self.state.load(Ordering::Acquire);
        if generation_of(current, slot) != generation {
            return false;
        }
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        self.slots[slot].sequence.store(sequence, Ordering::Release);
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if generation_of(current, slot) != generation {
                    return None;
                }
                let mut next = with_ready(current, slot as u64);
                if writing_of(current) == slot as u64 {
                    next = with_writing(next, SLOT_NONE);
                }
                Some(next)
            })
            .is_ok()
    }

    /// ### English
    /// Forgets both slots (their textures are about to be deleted).
    ///
    /// ### 中文
    /// 清空两个槽位（其纹理即将被删除）。
    fn reset(&self) {
        self.state.store(INITIAL_STATE, Ordering::Release);
        for entry in &self.slots {
            entry.texture.store(0, Ordering::Release);
        }
    }
}

/// ### English
/// Host-thread half of the copy protocol; owns the two copy targets.
///
/// ### 中文
/// 拷贝协议的宿主线程部分；持有两个拷贝目标。
#[derive(Default)]
pub struct HostFrameCopier {
    targets: [Option<RenderTarget>; 2],
    next_slot: usize,
    failed_size: Option<PhysicalSize<u32>>,
}

impl HostFrameCopier {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_target(
        &mut self,
        device: &mut dyn GpuDevice,
        slot: usize,
        size: PhysicalSize<u32>,
    ) -> Result<(), OverlayError> {
        match &mut self.targets[slot] {
            Some(target) => device.resize_render_target(target, size),
            empty => {
                *empty = Some(device.create_render_target(size, false)?);
                Ok(())
            }
        }
    }

    /// ### English
    /// Copies the host framebuffer into the next copy slot and hands its fence to the capture
    /// thread. Leaves the host framebuffer unbound; callers restore host state. Returns whether a
    /// copy was submitted.
    ///
    /// ### 中文
    /// 把宿主 framebuffer 拷贝到下一个拷贝槽位，并把 fence 交给捕获线程。不会恢复宿主
    /// framebuffer 绑定，由调用方恢复宿主状态。返回是否提交了拷贝。
    pub fn copy(
        &mut self,
        shared: &GameFrameCopy,
        device: &mut dyn GpuDevice,
        framebuffer: u32,
        size: PhysicalSize<u32>,
    ) -> bool {
        if !shared.is_consumer_active() || size.width == 0 || size.height == 0 {
            return false;
        }
        if self.failed_size == Some(size) {
            return false;
        }

        let slot = self.next_slot;
        let generation = shared.begin_write(slot);
        if let Err(err) = self.ensure_target(device, slot, size) {
            log::warn!("game frame copy target unavailable: {err}");
            self.failed_size = Some(size);
            shared.abort_write(slot, generation);
            return false;
        }
        self.failed_size = None;
        let Some(target) = self.targets[slot].as_ref() else {
            shared.abort_write(slot, generation);
            return false;
        };
        shared.store_slot(slot, target.texture().view());

        let full = PixelRect::from_size(size);
        device.bind(DrawTarget::Target(target));
        device.blit(BlitSource::Framebuffer { framebuffer, size }, full, full);
        let Some(fence) = device.insert_fence() else {
            shared.abort_write(slot, generation);
            return false;
        };

        let submission = CopySubmission {
            slot,
            generation,
            fence: fence.into_raw(),
        };
        match shared.submit_tx.try_send(submission) {
            Ok(()) => {
                self.next_slot = 1 - slot;
                shared.waker.wake();
                true
            }
            Err(TrySendError::Full(submission) | TrySendError::Disconnected(submission)) => {
                // SAFETY: ownership came back with the rejected submission.
                if let Some(fence) = unsafe { Fence::from_raw(submission.fence) } {
                    device.delete_fence(fence);
                }
                shared.abort_write(slot, generation);
                shared.waker.wake();
                false
            }
        }
    }

    /// ### English
    /// Deletes both copy targets and forgets the published slots.
    ///
    /// ### 中文
    /// 删除两个拷贝目标，并清空已发布的槽位。
    pub fn destroy(&mut self, shared: &GameFrameCopy, device: &mut dyn GpuDevice) {
        shared.reset();
        self.next_slot = 0;
        for target in self.targets.iter_mut().filter_map(Option::take) {
            device.delete_render_target(target);
        }
    }
}

struct PendingCopy {
    slot: usize,
    generation: u32,
    fence: Fence,
}

/// ### English
/// Capture-thread half of the copy protocol: polls submitted fences and publishes ready slots.
///
/// ### 中文
/// 拷贝协议的捕获线程部分：轮询已提交的 fence 并发布 ready 槽位。
#[derive(Default)]
pub(crate) struct CopyReceiver {
    pending: VecDeque<PendingCopy>,
}

impl CopyReceiver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// ### English
    /// Drains new submissions and publishes signaled ones oldest first, stopping at the first
    /// fence that has not signaled. Returns whether a frame was published.
    ///
    /// ### 中文
    /// 取出新提交，并从最旧的开始发布已 signal 的提交，遇到第一个未 signal 的 fence 即停止；
    /// 返回是否发布了新帧。
    pub(crate) fn pump(&mut self, shared: &GameFrameCopy, device: &mut dyn GpuDevice) -> bool {
        while let Ok(submission) = shared.submit_rx.try_recv() {
            // SAFETY: the host gave up ownership when the submission was sent.
            if let Some(fence) = unsafe { Fence::from_raw(submission.fence) } {
                self.pending.push_back(PendingCopy {
                    slot: submission.slot,
                    generation: submission.generation,
                    fence,
                });
            }
        }

        let mut published = false;
        while let Some(entry) = self.pending.front() {
            let current = shared.state.load(Ordering::Acquire);
            let stale = generation_of(current, entry.slot) != entry.generation;
            if !stale && !device.poll_fence(entry.fence.handle()) {
                break;
            }
            let Some(entry) = self.pending.pop_front() else {
                break;
            };
            if !stale && shared.publish(entry.slot, entry.generation) {
                published = true;
            }
            device.delete_fence(entry.fence);
        }
        published
    }

    /// ### English
    /// Deletes every fence still held or queued.
    ///
    /// ### 中文
    /// 删除仍持有或仍在队列中的全部 fence。
    pub(crate) fn shutdown(&mut self, shared: &GameFrameCopy, device: &mut dyn GpuDevice) {
        while let Ok(submission) = shared.submit_rx.try_recv() {
            // SAFETY: see `pump`.
            if let Some(fence) = unsafe { Fence::from_raw(submission.fence) } {
                device.delete_fence(fence);
            }
        }
        for entry in self.pending.drain(..) {
            device.delete_fence(entry.fence);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::geometry::Rgba;
    use crate::engine::gpu::FenceHandle;
    use crate::engine::gpu::headless::{GpuEvent, HeadlessGpu};

    fn setup() -> (HeadlessGpu, GameFrameCopy) {
        let gpu = HeadlessGpu::new();
        gpu.set_host_frame(PhysicalSize::new(8, 4), Rgba::new(1.0, 0.0, 0.0, 1.0));
        let shared = GameFrameCopy::new();
        shared.set_consumer_active(true);
        (gpu, shared)
    }

    #[test]
    fn state_word_packing() {
        let state = with_generation(INITIAL_STATE, 1, 0xAB_CDEF);
        let state = with_generation(state, 0, 7);
        assert_eq!(generation_of(state, 0), 7);
        assert_eq!(generation_of(state, 1), 0xAB_CDEF);
        assert_eq!(ready_of(state), SLOT_NONE);
        assert_eq!(writing_of(with_writing(state, 1)), 1);
    }

    #[test]
    fn ready_only_after_fence_signals() {
        let (gpu, shared) = setup();
        gpu.set_auto_signal(false);
        let mut host = gpu.device();
        let mut capture = gpu.device();
        let mut copier = HostFrameCopier::new();
        let mut receiver = CopyReceiver::new();

        assert!(copier.copy(&shared, &mut host, 0, PhysicalSize::new(8, 4)));
        assert!(!receiver.pump(&shared, &mut capture));
        assert!(shared.ready().is_none());
        assert!(shared.safe().is_none(), "only the slot being written has a texture");

        gpu.signal_all();
        assert!(receiver.pump(&shared, &mut capture));
        let frame = shared.ready().expect("published");
        assert_eq!(frame.slot, 0);
        assert_eq!(frame.sequence, 1);
        assert_eq!(
            gpu.texture_pixel(frame.texture.id, 3, 2),
            Some(Rgba::new(1.0, 0.0, 0.0, 1.0))
        );
        assert_eq!(gpu.live_fence_count(), 0);
    }

    #[test]
    fn next_copy_targets_other_slot_and_safe_avoids_it() {
        let (gpu, shared) = setup();
        let mut host = gpu.device();
        let mut capture = gpu.device();
        let mut copier = HostFrameCopier::new();
        let mut receiver = CopyReceiver::new();

        copier.copy(&shared, &mut host, 0, PhysicalSize::new(8, 4));
        receiver.pump(&shared, &mut capture);
        assert_eq!(shared.ready().map(|f| f.slot), Some(0));

        gpu.set_auto_signal(false);
        copier.copy(&shared, &mut host, 0, PhysicalSize::new(8, 4));
        receiver.pump(&shared, &mut capture);
        assert_eq!(shared.ready().map(|f| f.slot), Some(0));
        assert_eq!(shared.safe().map(|f| f.slot), Some(0));

        gpu.signal_all();
        receiver.pump(&shared, &mut capture);
        assert_eq!(shared.ready().map(|f| f.slot), Some(1));
        assert_eq!(shared.latest().map(|f| f.sequence), Some(2));
    }

    fn inserted_fence(gpu: &HeadlessGpu) -> Option<FenceHandle> {
        gpu.take_events().into_iter().rev().find_map(|event| match event {
            GpuEvent::FenceInserted { fence } => Some(FenceHandle::from_raw(fence)),
            _ => None,
        })
    }

    #[test]
    fn gpu_one_frame_behind_still_publishes() {
        let (gpu, shared) = setup();
        gpu.set_auto_signal(false);
        let mut host = gpu.device();
        let mut capture = gpu.device();
        let mut copier = HostFrameCopier::new();
        let mut receiver = CopyReceiver::new();

        let mut previous = None;
        for frame in 1..=10u64 {
            assert!(copier.copy(&shared, &mut host, 0, PhysicalSize::new(8, 4)));
            let current = inserted_fence(&gpu);
            if let Some(fence) = previous {
                gpu.signal(fence);
            }
            receiver.pump(&shared, &mut capture);
            previous = current;

            if frame > 1 {
                let ready = shared.ready().expect("the previous copy is published");
                assert_eq!(ready.sequence, frame - 1, "at most one frame stale");
                assert_eq!(ready.slot, ((frame - 2) % 2) as usize);
                assert_ne!(shared.latest().map(|f| f.slot), Some(((frame - 1) % 2) as usize));
            }
        }
        assert_eq!(gpu.live_fence_count(), 1, "only the newest copy is still in flight");
    }

    #[test]
    fn wrapped_around_submission_is_discarded() {
        let (gpu, shared) = setup();
        gpu.set_auto_signal(false);
        let mut host = gpu.device();
        let mut capture = gpu.device();
        let mut copier = HostFrameCopier::new();
        let mut receiver = CopyReceiver::new();

        for _ in 0..3 {
            copier.copy(&shared, &mut host, 0, PhysicalSize::new(8, 4));
            receiver.pump(&shared, &mut capture);
        }
        // The third copy reused slot 0 before the first fence was seen.
        gpu.signal_all();
        assert!(receiver.pump(&shared, &mut capture));
        assert_eq!(shared.sequence(), 2);
        assert_eq!(shared.ready().map(|f| f.slot), Some(0));
        assert_eq!(gpu.live_fence_count(), 0);
    }

    #[test]
    fn inactive_consumer_skips_copy() {
        let (gpu, shared) = setup();
        shared.set_consumer_active(false);
        let mut host = gpu.device();
        let mut copier = HostFrameCopier::new();
        assert!(!copier.copy(&shared, &mut host, 0, PhysicalSize::new(8, 4)));
        assert_eq!(gpu.texture_count(), 0);
    }

    #[test]
    fn failed_target_clears_writing_slot() {
        let (gpu, shared) = setup();
        gpu.set_fail_render_targets(true);
        let mut host = gpu.device();
        let mut copier = HostFrameCopier::new();
        assert!(!copier.copy(&shared, &mut host, 0, PhysicalSize::new(8, 4)));
        assert_eq!(writing_of(shared.state.load(Ordering::Acquire)), SLOT_NONE);
        // Same size is not retried.
        gpu.set_fail_render_targets(false);
        assert!(!copier.copy(&shared, &mut host, 0, PhysicalSize::new(8, 4)));
        assert!(copier.copy(&shared, &mut host, 0, PhysicalSize::new(8, 5)));
    }
}
