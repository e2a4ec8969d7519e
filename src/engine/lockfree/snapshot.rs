//! ### English
//! Double-buffered seqlock cell for small `Pod` snapshots (one writer, many lock-free readers).
//!
//! ### 中文
//! 面向小型 `Pod` 快照的双缓冲 seqlock 单元（单写者，多个无锁读者）。

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering, fence};

use bytemuck::Pod;
use parking_lot::Mutex;

use super::Backoff;

const WORD_BYTES: usize = std::mem::size_of::<u32>();

struct Buffer {
    /// ### English
    /// Seqlock version: odd while the writer is inside this buffer.
    ///
    /// ### 中文
    /// seqlock 版本号：写者正在写入该缓冲时为奇数。
    version: AtomicU64,
    words: Box<[AtomicU32]>,
}

impl Buffer {
    fn new(words: usize) -> Self {
        Self {
            version: AtomicU64::new(0),
            words: (0..words).map(|_| AtomicU32::new(0)).collect(),
        }
    }
}

/// ### English
/// Lock-free snapshot cell.
///
/// The writer always fills the buffer that is not `current`, then flips `current`; readers copy
/// the current buffer word by word and retry only if the writer lapped them twice mid-copy.
///
/// ### 中文
/// 无锁快照单元。
///
/// 写者总是写入非 `current` 的缓冲，然后切换 `current`；读者逐字拷贝当前缓冲，仅当写者在拷贝
/// 过程中绕回两次时才重试。
pub struct SnapshotCell<T: Pod> {
    buffers: [Buffer; 2],
    current: AtomicUsize,
    /// ### English
    /// Serializes writers; readers never touch it.
    ///
    /// ### 中文
    /// 串行化写者；读者从不触碰。
    writer: Mutex<()>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Pod> SnapshotCell<T> {
    pub fn new(initial: T) -> Self {
        let words = std::mem::size_of::<T>().div_ceil(WORD_BYTES).max(1);
        let cell = Self {
            buffers: [Buffer::new(words), Buffer::new(words)],
            current: AtomicUsize::new(0),
            writer: Mutex::new(()),
            _marker: std::marker::PhantomData,
        };
        cell.write_words(0, &initial);
        cell
    }

    fn write_words(&self, index: usize, value: &T) {
        let buffer = &self.buffers[index];
        let version = buffer.version.load(Ordering::Relaxed);
        buffer.version.store(version.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        let bytes = bytemuck::bytes_of(value);
        for (word, chunk) in buffer.words.iter().zip(bytes.chunks(WORD_BYTES)) {
            let mut raw = [0u8; WORD_BYTES];
            raw[..chunk.len()].copy_from_slice(chunk);
            word.store(u32::from_ne_bytes(raw), Ordering::Relaxed);
        }

        buffer
            .version
            .store(version.wrapping_add(2), Ordering::Release);
    }

    /// ### English
    /// Publishes a new value.
    ///
    /// ### 中文
    /// 发布新值。
    pub fn store(&self, value: T) {
        let _guard = self.writer.lock();
        let next = self.current.load(Ordering::Relaxed) ^ 1;
        self.write_words(next, &value);
        self.current.store(next, Ordering::Release);
    }

    /// ### English
    /// Returns a consistent copy of the latest published value.
    ///
    /// ### 中文
    /// 返回最新发布值的一致拷贝。
    pub fn load(&self) -> T {
        let mut backoff = Backoff::new();
        loop {
            let index = self.current.load(Ordering::Acquire);
            let buffer = &self.buffers[index];
            let before = buffer.version.load(Ordering::Acquire);
            if before & 1 == 0 {
                let mut out = T::zeroed();
                let bytes = bytemuck::bytes_of_mut(&mut out);
                for (word, chunk) in buffer.words.iter().zip(bytes.chunks_mut(WORD_BYTES)) {
                    let raw = word.load(Ordering::Relaxed).to_ne_bytes();
                    chunk.copy_from_slice(&raw[..chunk.len()]);
                }
                fence(Ordering::Acquire);
                if buffer.version.load(Ordering::Relaxed) == before {
                    return out;
                }
            }
            backoff.snooze();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    use bytemuck::Zeroable;

    use super::*;

    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
    struct Sample {
        a: u32,
        b: u32,
        c: f32,
        d: u32,
    }

    #[test]
    fn load_returns_last_store() {
        let cell = SnapshotCell::new(Sample::zeroed());
        assert_eq!(cell.load(), Sample::zeroed());
        let value = Sample {
            a: 1,
            b: 2,
            c: 3.5,
            d: 4,
        };
        cell.store(value);
        assert_eq!(cell.load(), value);
    }

    #[test]
    fn readers_never_observe_mixed_values() {
        let cell = Arc::new(SnapshotCell::new(Sample::zeroed()));
        let stop = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let cell = cell.clone();
                let stop = stop.clone();
                thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        let s = cell.load();
                        assert_eq!(s.a, s.b);
                        assert_eq!(s.a, s.d);
                        assert_eq!(s.c, s.a as f32);
                    }
                })
            })
            .collect();

        for n in 0..50_000u32 {
            cell.store(Sample {
                a: n,
                b: n,
                c: n as f32,
                d: n,
            });
        }
        stop.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().expect("reader");
        }
    }
}
