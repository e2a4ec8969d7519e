//! ### English
//! Lock-free slot table shared by the compositor (producer) and the host thread (consumer).
//!
//! ### 中文
//! 合成线程（生产者）与宿主线程（消费者）共享的无锁槽位表。

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use dpi::PhysicalSize;

use crate::engine::gpu::{Fence, FenceHandle, TextureRef};

use super::slot::SlotAtomics;
use super::{
    AcquiredFrame, RING_SLOTS, SLOT_FREE, SLOT_HELD, SLOT_READY, SLOT_RELEASE_PENDING,
};

const CACHE_LINE_BYTES: usize = 64;
const LATEST_PAD_BYTES: usize = CACHE_LINE_BYTES - std::mem::size_of::<AtomicU64>();
const FLAGS_PAD_BYTES: usize = CACHE_LINE_BYTES - std::mem::size_of::<AtomicU8>();

const SLOT_INDEX_BITS: u64 = 2;

#[inline]
fn pack_latest(frame_seq: u64, slot: usize) -> u64 {
    (frame_seq << SLOT_INDEX_BITS) | (slot as u64 & ((1u64 << SLOT_INDEX_BITS) - 1))
}

#[inline]
fn unpack_latest(packed: u64) -> (u64, usize) {
    (
        packed >> SLOT_INDEX_BITS,
        (packed & ((1u64 << SLOT_INDEX_BITS) - 1)) as usize,
    )
}

/// ### English
/// Per-stream shared ring state.
///
/// ### 中文
/// 单个输出流的共享环状态。
#[repr(C)]
pub struct SharedRing {
    slots: [SlotAtomics; RING_SLOTS],
    meta: RingMeta,
}

#[repr(C, align(64))]
struct RingMeta {
    /// ### English
    /// Packed `(frame_seq, slot)` of the last good frame; `frame_seq == 0` means none.
    ///
    /// ### 中文
    /// 最近一个有效帧的 packed `(frame_seq, slot)`；`frame_seq == 0` 表示没有。
    latest_packed: AtomicU64,
    _pad_latest: [u8; LATEST_PAD_BYTES],
    /// ### English
    /// Non-zero while the compositor reallocates the ring; the host stops acquiring.
    ///
    /// ### 中文
    /// 合成线程重新分配环期间为非 0；宿主停止 acquire。
    resizing: AtomicU8,
    _pad_flags: [u8; FLAGS_PAD_BYTES],
}

impl Default for SharedRing {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedRing {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| SlotAtomics::new()),
            meta: RingMeta {
                latest_packed: AtomicU64::new(0),
                _pad_latest: [0; LATEST_PAD_BYTES],
                resizing: AtomicU8::new(0),
                _pad_flags: [0; FLAGS_PAD_BYTES],
            },
        }
    }

    /// ### English
    /// Acquires the newest READY slot as HELD. Falls back to any other READY slot, newest first.
    ///
    /// ### 中文
    /// 将最新的 READY 槽位 acquire 为 HELD；失败时回退到其它 READY 槽位（优先最新）。
    pub fn try_acquire_latest(&self) -> Option<AcquiredFrame> {
        if self.is_resizing() {
            return None;
        }

        let (latest, front) = unpack_latest(self.meta.latest_packed.load(Ordering::Acquire));
        if latest == 0 || front >= RING_SLOTS {
            return None;
        }

        if self.slots[front]
            .state
            .compare_exchange(SLOT_READY, SLOT_HELD, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return Some(self.acquired_frame(front));
        }

        let slot_a = (front + 1) % RING_SLOTS;
        let slot_b = (front + 2) % RING_SLOTS;
        let mut candidates = [slot_a, slot_b];
        if self.slot_seq(slot_b) > self.slot_seq(slot_a) {
            candidates.swap(0, 1);
        }

        candidates.into_iter().find_map(|slot| {
            self.slots[slot]
                .state
                .compare_exchange(SLOT_READY, SLOT_HELD, Ordering::Acquire, Ordering::Relaxed)
                .ok()
                .map(|_| self.acquired_frame(slot))
        })
    }

    fn acquired_frame(&self, slot: usize) -> AcquiredFrame {
        let atomics = &self.slots[slot];
        AcquiredFrame {
            slot,
            texture: TextureRef {
                id: atomics.texture_id.load(Ordering::Relaxed),
                size: PhysicalSize::new(
                    atomics.width.load(Ordering::Relaxed),
                    atomics.height.load(Ordering::Relaxed),
                ),
            },
            producer_fence: FenceHandle::from_raw(atomics.producer_fence.load(Ordering::Relaxed)),
            frame_seq: atomics.frame_seq.load(Ordering::Relaxed),
            generation: atomics.generation.load(Ordering::Relaxed),
        }
    }

    /// ### English
    /// Releases a HELD slot, handing `consumer_fence` (inserted after sampling) to the
    /// compositor.
    ///
    /// The slot goes back to READY while it still holds the last good frame (so the host can draw
    /// it again next frame), otherwise to RELEASE_PENDING (or FREE without a fence). Returns a
    /// fence the caller must delete: an older consumer fence it replaced, or `consumer_fence`
    /// itself when the slot was not HELD.
    ///
    /// ### 中文
    /// 释放 HELD 槽位，并把采样后插入的 `consumer_fence` 交给合成线程。
    ///
    /// 若槽位仍是最近的有效帧则回到 READY（宿主下一帧可再次绘制），否则进入
    /// RELEASE_PENDING（无 fence 时为 FREE）。返回调用方需要删除的 fence：被替换的旧
    /// consumer fence，或槽位不处于 HELD 时的 `consumer_fence` 本身。
    #[must_use]
    pub fn release(&self, slot: usize, consumer_fence: Option<Fence>) -> Option<Fence> {
        if slot >= RING_SLOTS || self.slots[slot].state.load(Ordering::Acquire) != SLOT_HELD {
            return consumer_fence;
        }

        let atomics = &self.slots[slot];
        let raw = consumer_fence.map_or(0, Fence::into_raw);
        let previous = atomics.consumer_fence.swap(raw, Ordering::AcqRel);

        let (latest_seq, latest_slot) =
            unpack_latest(self.meta.latest_packed.load(Ordering::Acquire));
        let still_latest = latest_seq != 0
            && latest_slot == slot
            && atomics.frame_seq.load(Ordering::Relaxed) == latest_seq;
        let next = if still_latest {
            SLOT_READY
        } else if raw == 0 {
            SLOT_FREE
        } else {
            SLOT_RELEASE_PENDING
        };
        atomics.state.store(next, Ordering::Release);

        // SAFETY: the slot was HELD, so nobody else could have taken this consumer fence.
        unsafe { Fence::from_raw(previous) }
    }

    /// ### English
    /// Packed-pointer view of the last good frame: `(frame_seq, slot)`, `frame_seq == 0` = none.
    ///
    /// ### 中文
    /// 最近有效帧的 `(frame_seq, slot)`；`frame_seq == 0` 表示没有。
    pub fn latest(&self) -> (u64, usize) {
        unpack_latest(self.meta.latest_packed.load(Ordering::Acquire))
    }

    pub fn is_resizing(&self) -> bool {
        self.meta.resizing.load(Ordering::Acquire) != 0
    }

    pub fn slot_state(&self, slot: usize) -> u8 {
        self.slots[slot].state.load(Ordering::Acquire)
    }

    pub fn generation(&self, slot: usize) -> u64 {
        self.slots[slot].generation.load(Ordering::Acquire)
    }

    pub(super) fn slot_seq(&self, slot: usize) -> u64 {
        self.slots[slot].frame_seq.load(Ordering::Relaxed)
    }

    pub(super) fn compare_exchange_state(&self, slot: usize, current: u8, new: u8) -> bool {
        self.slots[slot]
            .state
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(super) fn store_state(&self, slot: usize, state: u8) {
        self.slots[slot].state.store(state, Ordering::Release);
    }

    pub(super) fn set_resizing(&self, resizing: bool) {
        self.meta
            .resizing
            .store(u8::from(resizing), Ordering::Release);
    }

    /// ### English
    /// Forgets the last good frame (its texture no longer holds defined content).
    ///
    /// ### 中文
    /// 丢弃最近有效帧（其纹理内容已不再有定义）。
    pub(super) fn invalidate_latest(&self) {
        self.meta.latest_packed.store(0, Ordering::Release);
    }

    pub(super) fn begin_generation(&self, slot: usize) -> u64 {
        self.slots[slot].generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// ### English
    /// Takes the consumer fence left in a slot the caller now owns.
    ///
    /// ### 中文
    /// 取走调用方当前独占的槽位中遗留的 consumer fence。
    pub(super) fn take_consumer_fence(&self, slot: usize) -> Option<Fence> {
        let raw = self.slots[slot].consumer_fence.swap(0, Ordering::AcqRel);
        // SAFETY: handed over by `release`; the swap makes this the only owner.
        unsafe { Fence::from_raw(raw) }
    }

    pub(super) fn peek_consumer_fence(&self, slot: usize) -> FenceHandle {
        FenceHandle::from_raw(self.slots[slot].consumer_fence.load(Ordering::Acquire))
    }

    pub(super) fn set_slot_texture(&self, slot: usize, texture: TextureRef) {
        let atomics = &self.slots[slot];
        atomics.texture_id.store(texture.id, Ordering::Relaxed);
        atomics.width.store(texture.size.width, Ordering::Relaxed);
        atomics.height.store(texture.size.height, Ordering::Relaxed);
    }

    pub(super) fn clear_producer_fence(&self, slot: usize) {
        self.slots[slot].producer_fence.store(0, Ordering::Relaxed);
    }

    /// ### English
    /// Publishes a rendered slot as READY and makes it the last good frame.
    ///
    /// ### 中文
    /// 将渲染完成的槽位发布为 READY，并设为最近有效帧。
    pub(super) fn publish(&self, slot: usize, producer_fence: FenceHandle, frame_seq: u64) {
        let atomics = &self.slots[slot];
        atomics.frame_seq.store(frame_seq, Ordering::Relaxed);
        atomics
            .producer_fence
            .store(producer_fence.raw(), Ordering::Relaxed);
        atomics.state.store(SLOT_READY, Ordering::Release);
        self.meta
            .latest_packed
            .store(pack_latest(frame_seq, slot), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::compositor::ring::SLOT_RENDERING;

    fn publish_slot(ring: &SharedRing, slot: usize, seq: u64) {
        ring.store_state(slot, SLOT_RENDERING);
        ring.set_slot_texture(
            slot,
            TextureRef {
                id: 10 + slot as u32,
                size: PhysicalSize::new(4, 4),
            },
        );
        ring.publish(slot, FenceHandle::from_raw(100 + seq), seq);
    }

    #[test]
    fn latest_packing_round_trips() {
        assert_eq!(unpack_latest(pack_latest(0x1234_5678, 2)), (0x1234_5678, 2));
        assert_eq!(unpack_latest(0), (0, 0));
    }

    #[test]
    fn acquire_prefers_latest_then_newest_ready() {
        let ring = SharedRing::new();
        assert!(ring.try_acquire_latest().is_none());

        publish_slot(&ring, 0, 1);
        publish_slot(&ring, 1, 2);
        let frame = ring.try_acquire_latest().expect("latest");
        assert_eq!(frame.slot, 1);
        assert_eq!(frame.producer_fence, FenceHandle::from_raw(102));
        assert_eq!(frame.texture.id, 11);

        let fallback = ring.try_acquire_latest().expect("older ready frame");
        assert_eq!(fallback.slot, 0);
        assert!(ring.try_acquire_latest().is_none());
    }

    #[test]
    fn releasing_the_last_good_frame_keeps_it_ready() {
        let ring = SharedRing::new();
        publish_slot(&ring, 2, 7);
        let frame = ring.try_acquire_latest().expect("frame");
        assert!(ring.release(frame.slot, None).is_none());
        assert_eq!(ring.slot_state(2), SLOT_READY);
        assert_eq!(ring.try_acquire_latest().map(|f| f.frame_seq), Some(7));
    }

    #[test]
    fn releasing_a_superseded_frame_frees_it() {
        let ring = SharedRing::new();
        publish_slot(&ring, 0, 1);
        let frame = ring.try_acquire_latest().expect("frame");
        publish_slot(&ring, 1, 2);
        assert!(ring.release(frame.slot, None).is_none());
        assert_eq!(ring.slot_state(0), SLOT_FREE);
    }

    #[test]
    fn release_of_unheld_slot_returns_nothing_to_store() {
        let ring = SharedRing::new();
        assert!(ring.release(1, None).is_none());
        assert!(ring.release(RING_SLOTS, None).is_none());
        assert_eq!(ring.slot_state(1), SLOT_FREE);
    }

    #[test]
    fn resizing_blocks_acquire() {
        let ring = SharedRing::new();
        publish_slot(&ring, 0, 1);
        ring.set_resizing(true);
        assert!(ring.try_acquire_latest().is_none());
        ring.set_resizing(false);
        ring.invalidate_latest();
        assert!(ring.try_acquire_latest().is_none());
    }
}
