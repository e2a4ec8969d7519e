//! ### English
//! Versioned `Arc` publication for heap-owning immutable snapshots.
//!
//! ### 中文
//! 面向持有堆内存的不可变快照的带版本 `Arc` 发布。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// ### English
/// Holder of the latest `Arc<T>` plus a monotonically increasing version.
///
/// Readers can compare `version()` lock-free and only touch the lock (to clone the `Arc`) when it
/// moved. Version `0` means "nothing published yet".
///
/// ### 中文
/// 保存最新 `Arc<T>` 及单调递增版本号。
///
/// 读者可无锁比较 `version()`，仅在版本变化时才加锁克隆 `Arc`。版本 `0` 表示“尚未发布”。
pub struct VersionedArc<T> {
    version: AtomicU64,
    value: RwLock<(u64, Arc<T>)>,
}

impl<T> VersionedArc<T> {
    pub fn new(initial: T) -> Self {
        Self {
            version: AtomicU64::new(0),
            value: RwLock::new((0, Arc::new(initial))),
        }
    }

    /// ### English
    /// Replaces the value and returns the new version.
    ///
    /// ### 中文
    /// 替换值并返回新版本号。
    pub fn publish(&self, value: T) -> u64 {
        let value = Arc::new(value);
        let mut guard = self.value.write();
        let version = guard.0.wrapping_add(1).max(1);
        *guard = (version, value);
        self.version.store(version, Ordering::Release);
        version
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// ### English
    /// Returns the latest value together with its version.
    ///
    /// ### 中文
    /// 返回最新值及其版本号。
    pub fn load(&self) -> (u64, Arc<T>) {
        let guard = self.value.read();
        (guard.0, guard.1.clone())
    }

    pub fn get(&self) -> Arc<T> {
        self.value.read().1.clone()
    }
}

/// ### English
/// Reader-side cache that re-clones only on version change.
///
/// ### 中文
/// 读者侧缓存：仅在版本变化时重新克隆。
pub struct VersionedReader<T> {
    version: u64,
    cached: Arc<T>,
}

impl<T> VersionedReader<T> {
    pub fn new(source: &VersionedArc<T>) -> Self {
        let (version, cached) = source.load();
        Self { version, cached }
    }

    /// ### English
    /// Refreshes from `source`; returns `true` when the cached value changed.
    ///
    /// ### 中文
    /// 从 `source` 刷新；缓存值发生变化时返回 `true`。
    pub fn refresh(&mut self, source: &VersionedArc<T>) -> bool {
        if source.version() == self.version {
            return false;
        }
        let (version, cached) = source.load();
        self.version = version;
        self.cached = cached;
        true
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    pub fn get(&self) -> &Arc<T> {
        &self.cached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_bumps_version_and_readers_follow() {
        let source = VersionedArc::new(String::from("a"));
        let mut reader = VersionedReader::new(&source);
        assert_eq!(reader.version(), 0);
        assert!(!reader.refresh(&source));

        assert_eq!(source.publish("b".to_string()), 1);
        assert!(reader.refresh(&source));
        assert_eq!(reader.get().as_str(), "b");
        assert!(!reader.refresh(&source));
    }

    #[test]
    fn held_snapshots_survive_republish() {
        let source = VersionedArc::new(vec![1, 2, 3]);
        let held = source.get();
        source.publish(vec![9]);
        assert_eq!(*held, vec![1, 2, 3]);
        assert_eq!(*source.get(), vec![9]);
    }
}
