//! ### English
//! Deferred fence deletion.
//!
//! A fence handle that was published to other threads may still be read (and waited on) by a
//! reader that loaded it just before it was replaced. Instead of deleting a retired fence right
//! away, it is parked here until `depth` newer fences have been retired.
//!
//! ### 中文
//! 延迟删除 fence。
//!
//! 已发布给其它线程的 fence 句柄，可能仍被恰好在替换前读取它的读者使用（并等待）。因此退役的
//! fence 不会立即删除，而是暂存于此，直到又有 `depth` 个更新的 fence 退役。

use std::collections::VecDeque;

use super::{Fence, GpuDevice};

/// ### English
/// Default retirement depth (frames).
///
/// ### 中文
/// 默认退役深度（帧）。
pub const DEFAULT_FENCE_RETIRE_DEPTH: usize = 64;

pub struct DeferredFenceRing {
    pending: VecDeque<Fence>,
    depth: usize,
}

impl Default for DeferredFenceRing {
    fn default() -> Self {
        Self::new(DEFAULT_FENCE_RETIRE_DEPTH)
    }
}

impl DeferredFenceRing {
    pub fn new(depth: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(depth + 1),
            depth,
        }
    }

    /// ### English
    /// Retires `fence`; deletes the oldest parked fence once more than `depth` are waiting.
    ///
    /// ### 中文
    /// 退役 `fence`；当等待数量超过 `depth` 时删除最早暂存的 fence。
    pub fn retire(&mut self, device: &mut dyn GpuDevice, fence: Fence) {
        self.pending.push_back(fence);
        while self.pending.len() > self.depth {
            if let Some(oldest) = self.pending.pop_front() {
                device.delete_fence(oldest);
            }
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// ### English
    /// Deletes every parked fence (teardown; all readers must be gone).
    ///
    /// ### 中文
    /// 删除所有暂存的 fence（销毁阶段；所有读者必须已退出）。
    pub fn drain(&mut self, device: &mut dyn GpuDevice) {
        for fence in self.pending.drain(..) {
            device.delete_fence(fence);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gpu::headless::{GpuEvent, HeadlessGpu};

    #[test]
    fn fence_survives_until_depth_newer_fences_retire() {
        let gpu = HeadlessGpu::new();
        let mut device = gpu.device();
        let mut ring = DeferredFenceRing::new(4);

        let first = device.insert_fence().expect("fence");
        let first_handle = first.handle();
        ring.retire(&mut device, first);

        for _ in 0..4 {
            let fence = device.insert_fence().expect("fence");
            assert!(gpu.fence_alive(first_handle));
            ring.retire(&mut device, fence);
        }

        assert!(!gpu.fence_alive(first_handle));
        assert_eq!(ring.len(), 4);

        ring.drain(&mut device);
        assert!(ring.is_empty());
        assert_eq!(gpu.live_fence_count(), 0);
        assert!(
            !gpu.events()
                .iter()
                .any(|event| matches!(event, GpuEvent::InvalidFence { .. }))
        );
    }
}
