use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64};

use super::SLOT_FREE;

#[repr(C, align(64))]
pub(super) struct SlotAtomics {
    /// ### English
    /// Slot state (`SLOT_*`).
    ///
    /// ### 中文
    /// 槽位状态（`SLOT_*`）。
    pub(super) state: AtomicU8,
    /// ### English
    /// Color texture of the slot's render target (`0` until first allocation).
    ///
    /// ### 中文
    /// 槽位渲染目标的颜色纹理（首次分配前为 `0`）。
    pub(super) texture_id: AtomicU32,
    pub(super) width: AtomicU32,
    pub(super) height: AtomicU32,
    /// ### English
    /// Non-owning completion fence of the frame in this slot. The compositor keeps ownership.
    ///
    /// ### 中文
    /// 该槽位帧的完成 fence（非拥有）；所有权由合成线程保留。
    pub(super) producer_fence: AtomicU64,
    /// ### English
    /// Owned consumer fence handed over by the host after sampling; taken back by the compositor
    /// once it owns the slot again.
    ///
    /// ### 中文
    /// 宿主采样后移交的 consumer fence（拥有所有权）；合成线程重新拥有槽位后取回。
    pub(super) consumer_fence: AtomicU64,
    pub(super) frame_seq: AtomicU64,
    /// ### English
    /// Incremented every time the compositor starts writing into the slot.
    ///
    /// ### 中文
    /// 合成线程每次开始写入该槽位时递增。
    pub(super) generation: AtomicU64,
}

impl SlotAtomics {
    pub(super) fn new() -> Self {
        Self {
            state: AtomicU8::new(SLOT_FREE),
            texture_id: AtomicU32::new(0),
            width: AtomicU32::new(0),
            height: AtomicU32::new(0),
            producer_fence: AtomicU64::new(0),
            consumer_fence: AtomicU64::new(0),
            frame_seq: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }
}
