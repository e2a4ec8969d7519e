//! ### English
//! Single-writer config mutation queue.
//!
//! Any thread may enqueue a [`ConfigCommand`]; only the coordination thread drains the queue,
//! applies the commands to a clone of the current snapshot and republishes it.
//!
//! ### 中文
//! 单写者配置变更队列。
//!
//! 任意线程都可以入队 [`ConfigCommand`]；只有协调线程会取出队列，把命令应用到当前快照的
//! 克隆上并重新发布。

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::engine::geometry::Anchor;

use super::{CaptureRegion, Config, ConfigStore};

/// ### English
/// Upper bound on queued commands; enqueueing beyond it drops the command.
///
/// ### 中文
/// 队列中命令的上限；超出时丢弃新命令。
const COMMAND_CAPACITY: usize = 1024;

/// ### English
/// One deferred config mutation.
///
/// ### 中文
/// 一条延迟执行的配置变更。
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigCommand {
    MoveImage {
        name: String,
        dx: i32,
        dy: i32,
    },
    MoveWindowOverlay {
        name: String,
        dx: i32,
        dy: i32,
    },
    UpdateMirrorCaptureConfig {
        name: String,
        capture_width: u32,
        capture_height: u32,
    },
    UpdateMirrorFps {
        name: String,
        fps: i32,
    },
    UpdateMirrorOutputPosition {
        name: String,
        x: i32,
        y: i32,
        relative_to: Anchor,
    },
    UpdateMirrorInputRegions {
        name: String,
        inputs: Vec<CaptureRegion>,
    },
    SetModeDimensions {
        mode_id: String,
        width: u32,
        height: u32,
    },
}

impl ConfigCommand {
    /// ### English
    /// Applies the command in place. Returns `false` when its target does not exist.
    ///
    /// ### 中文
    /// 原地应用命令；目标不存在时返回 `false`。
    pub fn apply(&self, config: &mut Config) -> bool {
        match self {
            ConfigCommand::MoveImage { name, dx, dy } => {
                config.image_mut(name).is_some_and(|image| {
                    image.x += dx;
                    image.y += dy;
                    true
                })
            }
            ConfigCommand::MoveWindowOverlay { name, dx, dy } => {
                config.window_overlay_mut(name).is_some_and(|overlay| {
                    overlay.image.x += dx;
                    overlay.image.y += dy;
                    true
                })
            }
            ConfigCommand::UpdateMirrorCaptureConfig {
                name,
                capture_width,
                capture_height,
            } => config.mirror_mut(name).is_some_and(|mirror| {
                mirror.capture_width = (*capture_width).max(1);
                mirror.capture_height = (*capture_height).max(1);
                true
            }),
            ConfigCommand::UpdateMirrorFps { name, fps } => {
                config.mirror_mut(name).is_some_and(|mirror| {
                    mirror.fps = *fps;
                    true
                })
            }
            ConfigCommand::UpdateMirrorOutputPosition {
                name,
                x,
                y,
                relative_to,
            } => config.mirror_mut(name).is_some_and(|mirror| {
                mirror.output.x = *x;
                mirror.output.y = *y;
                mirror.output.relative_to = *relative_to;
                true
            }),
            ConfigCommand::UpdateMirrorInputRegions { name, inputs } => {
                config.mirror_mut(name).is_some_and(|mirror| {
                    mirror.inputs = inputs.clone();
                    true
                })
            }
            ConfigCommand::SetModeDimensions {
                mode_id,
                width,
                height,
            } => config.mode_mut(mode_id).is_some_and(|mode| {
                mode.width = (*width).max(1);
                mode.height = (*height).max(1);
                true
            }),
        }
    }
}

/// ### English
/// Cloneable producer handle. Never blocks.
///
/// ### 中文
/// 可克隆的生产者句柄；永不阻塞。
#[derive(Clone)]
pub struct ConfigCommandSender {
    tx: Sender<ConfigCommand>,
}

impl ConfigCommandSender {
    /// ### English
    /// Enqueues a command; returns `false` if the queue is full or closed.
    ///
    /// ### 中文
    /// 入队一条命令；队列已满或已关闭时返回 `false`。
    pub fn send(&self, command: ConfigCommand) -> bool {
        match self.tx.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(command)) => {
                log::warn!("config command queue full, dropping {command:?}");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// ### English
/// Consumer side owned by the coordination thread.
///
/// ### 中文
/// 由协调线程持有的消费端。
pub struct ConfigCommandQueue {
    tx: Sender<ConfigCommand>,
    rx: Receiver<ConfigCommand>,
}

impl Default for ConfigCommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigCommandQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(COMMAND_CAPACITY);
        Self { tx, rx }
    }

    pub fn sender(&self) -> ConfigCommandSender {
        ConfigCommandSender {
            tx: self.tx.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// ### English
    /// Drains every queued command into one clone of the current snapshot and publishes it.
    ///
    /// Returns the new version, or `None` if nothing changed.
    ///
    /// ### 中文
    /// 把所有已入队的命令应用到当前快照的一份克隆上并发布。
    ///
    /// 返回新版本号；若无变化则返回 `None`。
    pub fn drain_into(&self, store: &ConfigStore) -> Option<u64> {
        let mut pending = self.rx.try_iter().peekable();
        pending.peek()?;

        let mut config = (*store.snapshot()).clone();
        let mut changed = false;
        for command in pending {
            if command.apply(&mut config) {
                changed = true;
            } else {
                log::debug!("config command target missing: {command:?}");
            }
        }

        changed.then(|| store.publish(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::{ImageConfig, MirrorConfig, ModeConfig};

    fn store_with_defaults() -> ConfigStore {
        let store = ConfigStore::new();
        store.publish(Config {
            modes: vec![ModeConfig {
                id: "thin".into(),
                width: 300,
                height: 900,
                ..ModeConfig::default()
            }],
            mirrors: vec![MirrorConfig {
                name: "pie".into(),
                ..MirrorConfig::default()
            }],
            images: vec![ImageConfig {
                name: "logo".into(),
                x: 10,
                y: 10,
                ..ImageConfig::default()
            }],
            ..Config::default()
        });
        store
    }

    #[test]
    fn batched_commands_publish_once() {
        let store = store_with_defaults();
        let queue = ConfigCommandQueue::new();
        let sender = queue.sender();
        let before = store.version();

        assert!(sender.send(ConfigCommand::MoveImage {
            name: "logo".into(),
            dx: 5,
            dy: -3,
        }));
        assert!(sender.send(ConfigCommand::MoveImage {
            name: "logo".into(),
            dx: 1,
            dy: 1,
        }));
        assert!(sender.send(ConfigCommand::UpdateMirrorFps {
            name: "pie".into(),
            fps: 10,
        }));
        assert!(sender.send(ConfigCommand::SetModeDimensions {
            mode_id: "thin".into(),
            width: 0,
            height: 1200,
        }));

        assert_eq!(queue.drain_into(&store), Some(before + 1));
        let config = store.snapshot();
        let logo = config.image("logo").expect("logo");
        assert_eq!((logo.x, logo.y), (16, 8));
        assert_eq!(config.mirror("pie").expect("pie").fps, 10);
        let thin = config.mode("thin").expect("thin");
        assert_eq!((thin.width, thin.height), (1, 1200));
        assert!(queue.is_empty());
    }

    #[test]
    fn empty_or_unknown_targets_do_not_republish() {
        let store = store_with_defaults();
        let queue = ConfigCommandQueue::new();
        let before = store.version();
        assert_eq!(queue.drain_into(&store), None);

        queue.sender().send(ConfigCommand::UpdateMirrorFps {
            name: "missing".into(),
            fps: 5,
        });
        assert_eq!(queue.drain_into(&store), None);
        assert_eq!(store.version(), before);
    }

    #[test]
    fn held_snapshot_is_not_mutated() {
        let store = store_with_defaults();
        let queue = ConfigCommandQueue::new();
        let held = store.snapshot();
        queue.sender().send(ConfigCommand::UpdateMirrorOutputPosition {
            name: "pie".into(),
            x: 40,
            y: 50,
            relative_to: Anchor::CenterViewport,
        });
        queue.drain_into(&store);
        assert_eq!(held.mirror("pie").expect("pie").output.x, 0);
        assert_eq!(store.snapshot().mirror("pie").expect("pie").output.x, 40);
    }
}
