//! ### English
//! Versioned publication point for the config snapshot.
//!
//! ### 中文
//! 配置快照的带版本发布点。

use std::sync::Arc;

use crate::engine::lockfree::{VersionedArc, VersionedReader};

use super::Config;

/// ### English
/// Shared holder of the latest immutable [`Config`].
///
/// Readers keep the returned `Arc` for one tick/frame; it never changes after publication.
///
/// ### 中文
/// 最新不可变 [`Config`] 的共享持有者。
///
/// 读者在一个 tick/帧内持有返回的 `Arc`；发布后其内容不再改变。
pub struct ConfigStore {
    inner: VersionedArc<Config>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            inner: VersionedArc::new(Config::default()),
        }
    }

    /// ### English
    /// Publishes a new snapshot and returns its version (always >= 1).
    ///
    /// ### 中文
    /// 发布新快照并返回其版本号（始终 >= 1）。
    pub fn publish(&self, config: Config) -> u64 {
        let version = self.inner.publish(config);
        log::debug!("config snapshot v{version} published");
        version
    }

    pub fn snapshot(&self) -> Arc<Config> {
        self.inner.get()
    }

    pub fn snapshot_with_version(&self) -> (u64, Arc<Config>) {
        self.inner.load()
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.inner.version()
    }

    /// ### English
    /// Whether any snapshot has been published yet.
    ///
    /// ### 中文
    /// 是否已经发布过快照。
    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.version() != 0
    }

    pub fn reader(&self) -> VersionedReader<Config> {
        VersionedReader::new(&self.inner)
    }

    pub fn refresh(&self, reader: &mut VersionedReader<Config>) -> bool {
        reader.refresh(&self.inner)
    }
}
