//! ### English
//! One coordination tick: config-reactive bookkeeping kept off the host frame.
//!
//! ### 中文
//! 单个协调 tick：从宿主帧中移出的、随配置变化的簿记工作。

use std::sync::Arc;
use std::time::{Duration, Instant};

use dpi::PhysicalSize;

use crate::engine::config::{
    Config, ConfigCommand, ConfigCommandQueue, ConfigStore, TransitionConfig,
};
use crate::engine::geometry::mode_viewport;
use crate::engine::service::OverlayTuning;
use crate::engine::transition::TransitionController;

use super::hooks::{GameState, GameStateSource, PlatformHooks};
use super::state::{ActiveMirrors, CoordinationState, ScreenMetrics, ViewportCache};

/// ### English
/// What one tick did; used by diagnostics and tests.
///
/// ### 中文
/// 单个 tick 完成的工作；用于诊断与测试。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// ### English
    /// Nothing ran because no config snapshot was published yet.
    ///
    /// ### 中文
    /// 尚未发布配置快照，因此未执行任何工作。
    pub skipped: bool,
    pub screen_changed: bool,
    pub viewport_changed: bool,
    pub mirrors_recomputed: bool,
    pub overlay_hook_changed: bool,
    pub mode_switched: Option<String>,
    pub dimensions_applied: bool,
    pub mouse_speed_applied: Option<u32>,
    pub borderless_applied: bool,
    /// ### English
    /// Version published after draining config commands.
    ///
    /// ### 中文
    /// 处理配置命令后发布的版本号。
    pub config_published: Option<u64>,
}

/// ### English
/// Tick state owned by the coordination thread.
///
/// ### 中文
/// 由协调线程持有的 tick 状态。
pub struct Coordinator {
    config: Arc<ConfigStore>,
    commands: Arc<ConfigCommandQueue>,
    state: Arc<CoordinationState>,
    transition: Arc<TransitionController>,
    platform: Box<dyn PlatformHooks>,
    game: Box<dyn GameStateSource>,
    metrics_refresh: Duration,
    last_metrics: Option<Instant>,
    viewport_key: Option<(PhysicalSize<u32>, String, u64)>,
    game_state: GameState,
    mouse_speed: Option<u32>,
}

impl Coordinator {
    pub fn new(
        config: Arc<ConfigStore>,
        commands: Arc<ConfigCommandQueue>,
        state: Arc<CoordinationState>,
        transition: Arc<TransitionController>,
        platform: Box<dyn PlatformHooks>,
        game: Box<dyn GameStateSource>,
        tuning: OverlayTuning,
    ) -> Self {
        Self {
            config,
            commands,
            state,
            transition,
            platform,
            game,
            metrics_refresh: tuning.metrics_refresh,
            last_metrics: None,
            viewport_key: None,
            game_state: GameState::Unknown,
            mouse_speed: None,
        }
    }

    pub fn state(&self) -> &Arc<CoordinationState> {
        &self.state
    }

    /// ### English
    /// Runs one tick at `now`.
    ///
    /// ### 中文
    /// 在 `now` 执行一个 tick。
    pub fn tick(&mut self, now: Instant) -> TickReport {
        let mut report = TickReport::default();
        if !self.config.is_loaded() {
            report.skipped = true;
            return report;
        }
        let (version, config) = self.config.snapshot_with_version();

        report.screen_changed = self.refresh_screen(now);
        let screen = self.state.screen();

        self.ensure_initial_mode(&config, screen, now);
        report.viewport_changed = self.refresh_viewport(&config, version, screen, now);
        report.mirrors_recomputed = self.refresh_active_mirrors(&config, version);

        let hook = self.platform.overlay_hook_present();
        if self.state.set_overlay_hook_present(hook) {
            report.overlay_hook_changed = true;
            log::info!("overlay hook {}", if hook { "detected" } else { "gone" });
        }

        let game_state = self.game.game_state();
        if self.game_state.exits_world(game_state) {
            self.reset_to_default_mode(&config);
        }
        self.game_state = game_state;

        if config.mouse_sensitivity != self.mouse_speed {
            if let Some(speed) = config.mouse_sensitivity {
                if self.platform.set_mouse_speed(speed.clamp(1, 20)) {
                    report.mouse_speed_applied = Some(speed);
                } else {
                    log::warn!("mouse speed {speed} was not applied");
                }
            }
            self.mouse_speed = config.mouse_sensitivity;
        }

        report.mode_switched = self.apply_mode_switch(&config, screen, now);
        if let Some(change) = self.state.take_dimension_change() {
            let command = ConfigCommand::SetModeDimensions {
                mode_id: change.mode_id,
                width: change.width,
                height: change.height,
            };
            report.dimensions_applied = self.commands.sender().send(command);
        }

        if config.auto_borderless && !self.state.borderless_applied() {
            self.state.mark_borderless_applied();
            report.borderless_applied = self.platform.apply_borderless();
            if !report.borderless_applied {
                log::warn!("auto borderless could not be applied");
            }
        }

        report.config_published = self.commands.drain_into(&self.config);
        self.state.count_tick();
        report
    }

    fn refresh_screen(&mut self, now: Instant) -> bool {
        let dirty = self.state.take_screen_dirty();
        let due = self
            .last_metrics
            .is_none_or(|last| now.saturating_duration_since(last) >= self.metrics_refresh);
        if !dirty && !due {
            return false;
        }
        self.last_metrics = Some(now);

        let Some(size) = self.platform.screen_size() else {
            return false;
        };
        let metrics = ScreenMetrics::new(size);
        if metrics == self.state.screen() {
            return false;
        }
        log::debug!("screen metrics {}x{}", size.width, size.height);
        self.state.store_screen(metrics);
        true
    }

    /// ### English
    /// Enters the default mode once a config and a screen size are known.
    ///
    /// ### 中文
    /// 在配置与屏幕尺寸都已知后进入默认模式。
    fn ensure_initial_mode(&mut self, config: &Config, screen: ScreenMetrics, now: Instant) {
        if !screen.is_valid() || config.mode(&self.transition.current_mode()).is_some() {
            return;
        }
        let Some(mode) = config.mode(&config.default_mode).or(config.modes.first()) else {
            return;
        };
        let viewport = mode_viewport(
            screen.size(),
            mode.size(),
            mode.position(),
            mode.stretch_rect(),
        );
        self.transition
            .begin(viewport, &mode.id, &TransitionConfig::default(), now);
        log::info!("entered initial mode {}", mode.id);
    }

    fn refresh_viewport(
        &mut self,
        config: &Config,
        version: u64,
        screen: ScreenMetrics,
        now: Instant,
    ) -> bool {
        if !screen.is_valid() {
            return false;
        }
        let mode_id = self.transition.current_mode();
        let key = (screen.size(), mode_id, version);
        if self.viewport_key.as_ref() == Some(&key) {
            return false;
        }
        let Some(mode) = config.mode(&key.1) else {
            return false;
        };
        let viewport = mode_viewport(
            screen.size(),
            mode.size(),
            mode.position(),
            mode.stretch_rect(),
        );
        self.viewport_key = Some(key);

        let cache = ViewportCache::new(screen.size(), viewport);
        if cache == self.state.viewport() {
            return false;
        }
        self.state.store_viewport(cache);
        self.transition.set_target(viewport, now);
        true
    }

    fn refresh_active_mirrors(&mut self, config: &Config, version: u64) -> bool {
        let mode_id = self.transition.current_mode();
        let current = self.state.active_mirrors();
        if current.mode_id == mode_id && current.config_version == version {
            return false;
        }
        let names = config
            .mode(&mode_id)
            .map(|mode| config.mirrors_for_mode(mode))
            .unwrap_or_default();
        self.state.publish_active_mirrors(ActiveMirrors {
            mode_id,
            config_version: version,
            names,
        });
        true
    }

    fn reset_to_default_mode(&mut self, config: &Config) {
        if config.default_mode.is_empty() || self.transition.current_mode() == config.default_mode {
            return;
        }
        log::debug!("left the world; returning to {}", config.default_mode);
        self.state.request_mode_switch(&config.default_mode);
    }

    fn apply_mode_switch(
        &mut self,
        config: &Config,
        screen: ScreenMetrics,
        now: Instant,
    ) -> Option<String> {
        let mode_id = self.state.take_mode_switch()?;
        let Some(mode) = config.mode(&mode_id) else {
            log::warn!("mode switch to unknown mode {mode_id}");
            return None;
        };
        if !screen.is_valid() {
            /*
            ### English
            Keep the request until the first screen size arrives, unless a newer one replaced it.

            ### 中文
            在首个屏幕尺寸到达前保留该请求，除非已有更新的请求替换它。
            */
            self.state.restore_mode_switch(mode_id);
            return None;
        }
        if self.transition.current_mode() == mode_id {
            return None;
        }

        let viewport = mode_viewport(
            screen.size(),
            mode.size(),
            mode.position(),
            mode.stretch_rect(),
        );
        self.transition.begin(viewport, &mode.id, &mode.transition, now);
        self.state.store_viewport(ViewportCache::new(screen.size(), viewport));
        self.viewport_key = None;
        self.refresh_active_mirrors(config, self.config.version());
        log::info!("mode switched to {mode_id}");
        Some(mode_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::engine::config::{MirrorConfig, ModeConfig};
    use crate::engine::geometry::RectF;

    #[derive(Clone, Default)]
    struct HookRecorder {
        screen: Option<PhysicalSize<u32>>,
        hook: bool,
        mouse: Arc<Mutex<Vec<u32>>>,
        borderless: Arc<Mutex<u32>>,
    }

    impl PlatformHooks for HookRecorder {
        fn screen_size(&mut self) -> Option<PhysicalSize<u32>> {
            self.screen
        }

        fn overlay_hook_present(&mut self) -> bool {
            self.hook
        }

        fn set_mouse_speed(&mut self, speed: u32) -> bool {
            self.mouse.lock().unwrap().push(speed);
            true
        }

        fn apply_borderless(&mut self) -> bool {
            *self.borderless.lock().unwrap() += 1;
            true
        }
    }

    struct Scripted(Arc<Mutex<GameState>>);

    impl GameStateSource for Scripted {
        fn game_state(&mut self) -> GameState {
            *self.0.lock().unwrap()
        }
    }

    struct Rig {
        coordinator: Coordinator,
        store: Arc<ConfigStore>,
        commands: Arc<ConfigCommandQueue>,
        state: Arc<CoordinationState>,
        transition: Arc<TransitionController>,
        recorder: HookRecorder,
        game: Arc<Mutex<GameState>>,
    }

    fn mode(id: &str, width: u32, height: u32, mirrors: &[&str]) -> ModeConfig {
        ModeConfig {
            id: id.into(),
            width,
            height,
            mirror_ids: mirrors.iter().map(|m| m.to_string()).collect(),
            ..ModeConfig::default()
        }
    }

    fn config() -> Config {
        Config {
            modes: vec![
                mode("full", 1920, 1080, &[]),
                mode("thin", 300, 1000, &["pie"]),
            ],
            mirrors: vec![MirrorConfig {
                name: "pie".into(),
                ..MirrorConfig::default()
            }],
            default_mode: "full".into(),
            mouse_sensitivity: Some(10),
            auto_borderless: true,
            ..Config::default()
        }
    }

    fn rig(screen: Option<PhysicalSize<u32>>) -> Rig {
        let store = Arc::new(ConfigStore::new());
        let commands = Arc::new(ConfigCommandQueue::new());
        let state = Arc::new(CoordinationState::new());
        let transition = Arc::new(TransitionController::new(RectF::default(), ""));
        let recorder = HookRecorder {
            screen,
            ..HookRecorder::default()
        };
        let game = Arc::new(Mutex::new(GameState::Unknown));
        let coordinator = Coordinator::new(
            store.clone(),
            commands.clone(),
            state.clone(),
            transition.clone(),
            Box::new(recorder.clone()),
            Box::new(Scripted(game.clone())),
            OverlayTuning::default(),
        );
        Rig {
            coordinator,
            store,
            commands,
            state,
            transition,
            recorder,
            game,
        }
    }

    #[test]
    fn tick_without_config_does_nothing() {
        let mut rig = rig(Some(PhysicalSize::new(1920, 1080)));
        let report = rig.coordinator.tick(Instant::now());
        assert!(report.skipped);
        assert_eq!(rig.state.ticks(), 0);
        assert!(!rig.state.viewport().is_valid());
    }

    #[test]
    fn first_tick_enters_default_mode_and_caches_everything() {
        let mut rig = rig(Some(PhysicalSize::new(1920, 1080)));
        rig.store.publish(config());

        let report = rig.coordinator.tick(Instant::now());
        assert!(report.screen_changed);
        assert!(report.viewport_changed);
        assert!(report.mirrors_recomputed);
        assert_eq!(report.mouse_speed_applied, Some(10));
        assert!(report.borderless_applied);
        assert_eq!(rig.transition.current_mode(), "full");
        assert_eq!(
            rig.state.viewport().viewport,
            RectF::new(0.0, 0.0, 1920.0, 1080.0)
        );

        /*
        ### English
        Nothing changed: the second tick only re-polls.

        ### 中文
        无变化：第二个 tick 只做轮询。
        */
        let report = rig.coordinator.tick(Instant::now());
        assert!(!report.viewport_changed && !report.mirrors_recomputed);
        assert_eq!(report.mouse_speed_applied, None);
        assert!(!report.borderless_applied);
        assert_eq!(*rig.recorder.borderless.lock().unwrap(), 1);
        assert_eq!(*rig.recorder.mouse.lock().unwrap(), vec![10]);
        assert_eq!(rig.state.ticks(), 2);
    }

    #[test]
    fn mode_switch_recomputes_viewport_and_active_mirrors() {
        let mut rig = rig(Some(PhysicalSize::new(1920, 1080)));
        rig.store.publish(config());
        rig.coordinator.tick(Instant::now());

        rig.state.request_mode_switch("thin");
        let report = rig.coordinator.tick(Instant::now());
        assert_eq!(report.mode_switched.as_deref(), Some("thin"));
        assert_eq!(rig.state.active_mirrors().names, vec!["pie".to_string()]);
        assert_eq!(
            rig.state.viewport().viewport,
            RectF::new(810.0, 40.0, 300.0, 1000.0)
        );

        rig.state.request_mode_switch("missing");
        assert_eq!(rig.coordinator.tick(Instant::now()).mode_switched, None);
        assert_eq!(rig.transition.current_mode(), "thin");
    }

    #[test]
    fn mode_switch_waits_for_screen_metrics() {
        let mut rig = rig(None);
        rig.store.publish(config());
        rig.state.request_mode_switch("thin");

        assert_eq!(rig.coordinator.tick(Instant::now()).mode_switched, None);
        assert_eq!(rig.state.take_mode_switch().as_deref(), Some("thin"));
    }

    #[test]
    fn leaving_the_world_returns_to_default_mode() {
        let mut rig = rig(Some(PhysicalSize::new(1920, 1080)));
        rig.store.publish(config());
        rig.coordinator.tick(Instant::now());
        rig.state.request_mode_switch("thin");
        *rig.game.lock().unwrap() = GameState::InWorld;
        rig.coordinator.tick(Instant::now());
        assert_eq!(rig.transition.current_mode(), "thin");

        *rig.game.lock().unwrap() = GameState::Wall;
        let report = rig.coordinator.tick(Instant::now());
        assert_eq!(report.mode_switched.as_deref(), Some("full"));
    }

    #[test]
    fn dimension_change_goes_through_the_command_queue() {
        let mut rig = rig(Some(PhysicalSize::new(1920, 1080)));
        rig.store.publish(config());
        rig.coordinator.tick(Instant::now());
        rig.state.request_mode_switch("thin");
        rig.coordinator.tick(Instant::now());

        rig.state.request_dimension_change("thin", 400, 900);
        let report = rig.coordinator.tick(Instant::now());
        assert!(report.dimensions_applied);
        assert!(report.config_published.is_some());
        assert!(rig.commands.is_empty());
        assert_eq!(rig.store.snapshot().mode("thin").map(|m| m.width), Some(400));

        let report = rig.coordinator.tick(Instant::now());
        assert!(report.viewport_changed);
        assert_eq!(
            rig.state.viewport().viewport,
            RectF::new(760.0, 90.0, 400.0, 900.0)
        );
    }

    #[test]
    fn screen_is_requeried_on_dirty_flag_or_safety_interval() {
        let mut rig = rig(Some(PhysicalSize::new(1280, 720)));
        rig.store.publish(config());
        let start = Instant::now();
        assert!(rig.coordinator.tick(start).screen_changed);

        rig.coordinator.platform = Box::new(HookRecorder {
            screen: Some(PhysicalSize::new(2560, 1440)),
            ..HookRecorder::default()
        });
        assert!(!rig.coordinator.tick(start + Duration::from_millis(10)).screen_changed);
        assert!(rig.coordinator.tick(start + Duration::from_millis(300)).screen_changed);

        rig.coordinator.platform = Box::new(HookRecorder {
            screen: Some(PhysicalSize::new(800, 600)),
            ..HookRecorder::default()
        });
        rig.state.mark_screen_dirty();
        assert!(rig.coordinator.tick(start + Duration::from_millis(310)).screen_changed);
        assert_eq!(rig.state.screen().size(), PhysicalSize::new(800, 600));
    }
}
