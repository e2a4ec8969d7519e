//! ### English
//! Per-mode lookups the host thread needs every frame, rebuilt only when the config version or
//! the current mode changes.
//!
//! ### 中文
//! 宿主线程每帧需要的逐模式查询结果，仅在配置版本或当前模式变化时重建。

use serde::Serialize;

use crate::engine::config::{BackgroundConfig, Config, DebugConfig, ModeBorderConfig};

/// ### English
/// A window the embedder should capture for the current mode.
///
/// ### 中文
/// 当前模式下嵌入方需要捕获的窗口。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowCaptureTarget {
    pub id: String,
    pub window_title: String,
    pub fps: i32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HostCaches {
    key: Option<(u64, String)>,
    pub background: BackgroundConfig,
    pub border: ModeBorderConfig,
    pub slide_mirrors: bool,
    pub eyezoom_mode: Option<String>,
    pub debug: DebugConfig,
    pub window_targets: Vec<WindowCaptureTarget>,
    rebuilds: u64,
}

impl HostCaches {
    pub fn new() -> Self {
        Self::default()
    }

    /// ### English
    /// Rebuilds when `(version, mode_id)` differs from the last build. Returns whether it did.
    ///
    /// ### 中文
    /// 当 `(version, mode_id)` 与上次构建不同时重建；返回是否发生了重建。
    pub fn refresh(&mut self, config: &Config, version: u64, mode_id: &str) -> bool {
        if self
            .key
            .as_ref()
            .is_some_and(|(v, mode)| *v == version && mode == mode_id)
        {
            return false;
        }

        let mode = config.mode(mode_id);
        self.background = mode.map(|m| m.background.clone()).unwrap_or_default();
        self.border = mode.map(|m| m.border).unwrap_or_default();
        self.slide_mirrors = mode.is_some_and(|m| m.transition.slide_mirrors);
        self.eyezoom_mode = config.eyezoom.as_ref().map(|zoom| zoom.mode_id.clone());
        self.debug = config.debug;
        self.window_targets = mode
            .into_iter()
            .flat_map(|m| m.window_overlay_ids.iter())
            .filter_map(|id| config.window_overlay(id))
            .map(|overlay| WindowCaptureTarget {
                id: overlay.image.name.clone(),
                window_title: overlay.window_title.clone(),
                fps: overlay.fps,
            })
            .collect();
        self.key = Some((version, mode_id.to_string()));
        self.rebuilds += 1;
        true
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::{ImageConfig, ModeConfig, WindowOverlayConfig};

    fn config() -> Config {
        Config {
            modes: vec![ModeConfig {
                id: "wall".into(),
                window_overlay_ids: vec!["chat".into(), "missing".into()],
                ..ModeConfig::default()
            }],
            window_overlays: vec![WindowOverlayConfig {
                image: ImageConfig {
                    name: "chat".into(),
                    ..ImageConfig::default()
                },
                window_title: "Chat".into(),
                fps: 10,
            }],
            ..Config::default()
        }
    }

    #[test]
    fn rebuilds_only_on_version_or_mode_change() {
        let config = config();
        let mut caches = HostCaches::new();
        assert!(caches.refresh(&config, 1, "wall"));
        assert!(!caches.refresh(&config, 1, "wall"));
        assert!(caches.refresh(&config, 2, "wall"));
        assert!(caches.refresh(&config, 2, "other"));
        assert_eq!(caches.rebuilds(), 3);
        assert!(caches.window_targets.is_empty());
    }

    #[test]
    fn window_targets_skip_unknown_overlays() {
        let mut caches = HostCaches::new();
        caches.refresh(&config(), 1, "wall");
        assert_eq!(
            caches.window_targets,
            vec![WindowCaptureTarget {
                id: "chat".into(),
                window_title: "Chat".into(),
                fps: 10,
            }]
        );
    }
}
