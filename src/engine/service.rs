//! ### English
//! Overlay service: owns every shared object and the lifecycles of the three worker threads.
//!
//! [`OverlaySystem`] is what the C ABI hands out as an opaque pointer. It is `Sync`; every
//! method may be called from any thread, except [`OverlaySystem::create_host`] whose result must
//! stay on the host render thread.
//!
//! ### 中文
//! overlay 服务：持有所有共享对象以及三个工作线程的生命周期。
//!
//! [`OverlaySystem`] 就是 C ABI 交给调用方的不透明指针。它满足 `Sync`；除
//! [`OverlaySystem::create_host`] 的返回值必须留在宿主渲染线程外，所有方法都可在任意线程调用。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::engine::capture::{CaptureEngine, CaptureShared};
use crate::engine::compositor::{
    AcquiredFrame, CompositorShared, FrameRenderRequest, ImageSender, ObsFrameSubmission,
    OverlayCompositor, SettingsPanel,
};
use crate::engine::config::{
    CaptureRegion, Config, ConfigCommand, ConfigCommandQueue, ConfigCommandSender, ConfigStore,
};
use crate::engine::coordination::{
    CoordinationState, CoordinationThread, Coordinator, GameStateSource, PlatformHooks,
    ReportedHooks,
};
use crate::engine::error::OverlayError;
use crate::engine::geometry::{Anchor, RectF};
use crate::engine::gpu::{Fence, GpuContextFactory};
use crate::engine::host::{HostCompositor, HostLinks, HostUi};
use crate::engine::lockfree::Publish;
use crate::engine::transition::TransitionController;

/// ### English
/// Runtime tunables shared by all threads.
///
/// ### 中文
/// 所有线程共享的运行时可调参数。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlayTuning {
    /// ### English
    /// Coordination tick rate.
    ///
    /// ### 中文
    /// 协调线程 tick 频率。
    pub logic_hz: u32,
    /// ### English
    /// Screen metrics are re-queried at least this often even without a dirty flag.
    ///
    /// ### 中文
    /// 即使没有脏标记，屏幕尺寸也至少以此间隔重新查询。
    pub metrics_refresh: Duration,
    /// ### English
    /// Capture thread sleep when no new game frame is available.
    ///
    /// ### 中文
    /// 没有新游戏帧时捕获线程的休眠时长。
    pub capture_idle: Duration,
    pub deferred_fence_depth: usize,
}

impl Default for OverlayTuning {
    fn default() -> Self {
        Self {
            logic_hz: 60,
            metrics_refresh: Duration::from_millis(250),
            capture_idle: Duration::from_millis(1),
            deferred_fence_depth: 64,
        }
    }
}

/// ### English
/// Holds at most one running worker. Start and stop are idempotent.
///
/// ### 中文
/// 最多持有一个运行中的工作线程；启动与停止均为幂等操作。
pub struct ThreadSlot<T> {
    running: Mutex<Option<T>>,
}

impl<T> Default for ThreadSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ThreadSlot<T> {
    pub fn new() -> Self {
        Self {
            running: Mutex::new(None),
        }
    }

    /// ### English
    /// Runs `spawn` unless a worker is already running. Returns whether a new worker started.
    ///
    /// ### 中文
    /// 若尚无运行中的工作线程则执行 `spawn`；返回是否启动了新的工作线程。
    pub fn start(
        &self,
        spawn: impl FnOnce() -> Result<T, OverlayError>,
    ) -> Result<bool, OverlayError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(false);
        }
        *running = Some(spawn()?);
        Ok(true)
    }

    /// ### English
    /// Drops the running worker (which stops and joins it). Returns whether one was running.
    ///
    /// ### 中文
    /// drop 运行中的工作线程（从而停止并 join）；返回之前是否有工作线程在运行。
    pub fn stop(&self) -> bool {
        let running = self.running.lock().take();
        /*
        ### English
        Join outside the lock so `is_running` never waits on a thread shutting down.

        ### 中文
        在锁外 join，使 `is_running` 不会等待正在关闭的线程。
        */
        let stopped = running.is_some();
        drop(running);
        stopped
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}

/// ### English
/// The whole overlay: shared state plus the logic, capture and render thread slots.
///
/// ### 中文
/// 整个 overlay：共享状态，加上逻辑、捕获与渲染线程槽位。
pub struct OverlaySystem {
    tuning: OverlayTuning,
    config: Arc<ConfigStore>,
    commands: Arc<ConfigCommandQueue>,
    command_sender: ConfigCommandSender,
    coordination: Arc<CoordinationState>,
    transition: Arc<TransitionController>,
    capture: Arc<CaptureShared>,
    compositor: Arc<CompositorShared>,
    ui: Arc<HostUi>,
    obs_active: Arc<AtomicBool>,
    logic_thread: ThreadSlot<CoordinationThread>,
    capture_thread: ThreadSlot<CaptureEngine>,
    render_thread: ThreadSlot<OverlayCompositor>,
}

impl Default for OverlaySystem {
    fn default() -> Self {
        Self::new(OverlayTuning::default())
    }
}

impl OverlaySystem {
    pub fn new(tuning: OverlayTuning) -> Self {
        let commands = Arc::new(ConfigCommandQueue::new());
        Self {
            tuning,
            config: Arc::new(ConfigStore::new()),
            command_sender: commands.sender(),
            commands,
            coordination: Arc::new(CoordinationState::new()),
            transition: Arc::new(TransitionController::new(RectF::default(), "")),
            capture: Arc::new(CaptureShared::new()),
            compositor: Arc::new(CompositorShared::new()),
            ui: Arc::new(HostUi::new()),
            obs_active: Arc::new(AtomicBool::new(false)),
            logic_thread: ThreadSlot::new(),
            capture_thread: ThreadSlot::new(),
            render_thread: ThreadSlot::new(),
        }
    }

    pub fn tuning(&self) -> OverlayTuning {
        self.tuning
    }

    // Config

    pub fn config_snapshot(&self) -> Arc<Config> {
        self.config.snapshot()
    }

    pub fn config_version(&self) -> u64 {
        self.config.version()
    }

    /// ### English
    /// Replaces the whole config. Returns the new version.
    ///
    /// ### 中文
    /// 替换整份配置；返回新的版本号。
    pub fn publish_config(&self, config: Config) -> u64 {
        let version = self.config.publish(config);
        log::info!("config v{version} published");
        version
    }

    pub fn load_config_json(&self, json: &str) -> Result<u64, OverlayError> {
        let config = Config::from_json(json)?;
        Ok(self.publish_config(config))
    }

    /*
    ### English
    Field-level edits. All of them are queued and applied by the logic thread on its next tick.

    ### 中文
    字段级修改。全部进入队列，由逻辑线程在下一个 tick 应用。
    */

    pub fn update_mirror_capture_config(
        &self,
        name: &str,
        capture_width: u32,
        capture_height: u32,
    ) -> bool {
        self.command_sender
            .send(ConfigCommand::UpdateMirrorCaptureConfig {
                name: name.to_string(),
                capture_width,
                capture_height,
            })
    }

    pub fn update_mirror_fps(&self, name: &str, fps: i32) -> bool {
        self.command_sender.send(ConfigCommand::UpdateMirrorFps {
            name: name.to_string(),
            fps,
        })
    }

    pub fn update_mirror_output_position(
        &self,
        name: &str,
        x: i32,
        y: i32,
        relative_to: Anchor,
    ) -> bool {
        self.command_sender
            .send(ConfigCommand::UpdateMirrorOutputPosition {
                name: name.to_string(),
                x,
                y,
                relative_to,
            })
    }

    pub fn update_mirror_input_regions(&self, name: &str, inputs: Vec<CaptureRegion>) -> bool {
        self.command_sender
            .send(ConfigCommand::UpdateMirrorInputRegions {
                name: name.to_string(),
                inputs,
            })
    }

    pub fn move_image(&self, name: &str, dx: i32, dy: i32) -> bool {
        self.command_sender.send(ConfigCommand::MoveImage {
            name: name.to_string(),
            dx,
            dy,
        })
    }

    pub fn move_window_overlay(&self, name: &str, dx: i32, dy: i32) -> bool {
        self.command_sender.send(ConfigCommand::MoveWindowOverlay {
            name: name.to_string(),
            dx,
            dy,
        })
    }

    // Coordination

    pub fn coordination(&self) -> &Arc<CoordinationState> {
        &self.coordination
    }

    pub fn request_mode_switch(&self, mode_id: &str) {
        self.coordination.request_mode_switch(mode_id);
    }

    pub fn request_dimension_change(&self, mode_id: &str, width: u32, height: u32) {
        self.coordination
            .request_dimension_change(mode_id, width, height);
    }

    pub fn current_mode(&self) -> String {
        self.transition.current_mode()
    }

    pub fn ui(&self) -> &Arc<HostUi> {
        &self.ui
    }

    // Compositor handoff

    pub fn image_sender(&self) -> ImageSender {
        self.compositor.image_sender()
    }

    pub fn submit_frame_for_rendering(&self, request: FrameRenderRequest) -> Publish {
        self.compositor.submit_frame_for_rendering(request)
    }

    pub fn submit_obs_frame_context(&self, submission: ObsFrameSubmission) -> Publish {
        self.compositor.submit_obs_frame_context(submission)
    }

    pub fn completed_render_frame(&self) -> Option<AcquiredFrame> {
        self.compositor.completed_render_frame()
    }

    pub fn completed_obs_frame(&self) -> Option<AcquiredFrame> {
        self.compositor.completed_obs_frame()
    }

    /// ### English
    /// Releases a local frame. A fence the ring could not take is deleted by the compositor.
    ///
    /// ### 中文
    /// 释放本地帧；环形缓冲无法接收的 fence 交由合成线程删除。
    pub fn submit_render_consumer_fence(&self, slot: usize, consumer_fence: Option<Fence>) {
        if let Some(stale) = self
            .compositor
            .submit_render_consumer_fence(slot, consumer_fence)
        {
            self.compositor.retire_fence(stale);
        }
    }

    pub fn submit_obs_consumer_fence(&self, slot: usize, consumer_fence: Option<Fence>) {
        if let Some(stale) = self
            .compositor
            .submit_obs_consumer_fence(slot, consumer_fence)
        {
            self.compositor.retire_fence(stale);
        }
    }

    /// ### English
    /// Whether an external capture consumer is attached. While it is, the host also submits
    /// external-capture requests.
    ///
    /// ### 中文
    /// 是否连接了外部捕获消费者；连接期间宿主还会提交外部捕获请求。
    pub fn set_obs_active(&self, active: bool) {
        if self.obs_active.swap(active, Ordering::AcqRel) != active {
            log::info!("external capture {}", if active { "attached" } else { "detached" });
        }
    }

    pub fn obs_active(&self) -> bool {
        self.obs_active.load(Ordering::Acquire)
    }

    // Host

    pub fn host_links(&self) -> HostLinks {
        HostLinks {
            config: self.config.clone(),
            transition: self.transition.clone(),
            coordination: self.coordination.clone(),
            capture: self.capture.clone(),
            compositor: self.compositor.clone(),
            ui: self.ui.clone(),
            obs_active: self.obs_active.clone(),
        }
    }

    /// ### English
    /// Creates the host-thread glue. Call on the host render thread with its context current.
    ///
    /// ### 中文
    /// 创建宿主线程胶水层；需在宿主渲染线程、宿主上下文 current 时调用。
    pub fn create_host(
        &self,
        factory: &dyn GpuContextFactory,
    ) -> Result<HostCompositor, OverlayError> {
        HostCompositor::new(factory, self.host_links(), self.tuning.deferred_fence_depth)
    }

    // Thread lifecycle

    /// ### English
    /// Starts the logic thread with size and game state reported through
    /// [`CoordinationState::report_screen`] / [`CoordinationState::report_game_state`].
    ///
    /// ### 中文
    /// 启动逻辑线程，尺寸与游戏状态通过 [`CoordinationState::report_screen`] /
    /// [`CoordinationState::report_game_state`] 报告。
    pub fn start_logic_thread(&self) -> Result<bool, OverlayError> {
        let hooks = ReportedHooks::new(self.coordination.clone());
        self.start_logic_thread_with(Box::new(hooks.clone()), Box::new(hooks))
    }

    pub fn start_logic_thread_with(
        &self,
        platform: Box<dyn PlatformHooks>,
        game: Box<dyn GameStateSource>,
    ) -> Result<bool, OverlayError> {
        let started = self.logic_thread.start(|| {
            let coordinator = Coordinator::new(
                self.config.clone(),
                self.commands.clone(),
                self.coordination.clone(),
                self.transition.clone(),
                platform,
                game,
                self.tuning,
            );
            CoordinationThread::start(coordinator, self.tuning.logic_hz)
        })?;
        if started {
            log::info!("logic thread running at {} Hz", self.tuning.logic_hz);
        }
        Ok(started)
    }

    pub fn stop_logic_thread(&self) -> bool {
        self.logic_thread.stop()
    }

    pub fn start_capture_thread(
        &self,
        factory: Arc<dyn GpuContextFactory>,
    ) -> Result<bool, OverlayError> {
        self.capture_thread.start(|| {
            CaptureEngine::start(
                factory,
                self.config.clone(),
                self.coordination.clone(),
                self.capture.clone(),
                self.tuning,
            )
        })
    }

    pub fn stop_capture_thread(&self) -> bool {
        self.capture_thread.stop()
    }

    pub fn start_render_thread(
        &self,
        factory: Arc<dyn GpuContextFactory>,
        settings: Option<Box<dyn SettingsPanel>>,
    ) -> Result<bool, OverlayError> {
        self.render_thread.start(|| {
            OverlayCompositor::start(
                factory,
                self.config.clone(),
                self.capture.clone(),
                self.compositor.clone(),
                settings,
                self.tuning,
            )
        })
    }

    pub fn stop_render_thread(&self) -> bool {
        self.render_thread.stop()
    }

    pub fn threads_running(&self) -> (bool, bool, bool) {
        (
            self.logic_thread.is_running(),
            self.capture_thread.is_running(),
            self.render_thread.is_running(),
        )
    }

    /// ### English
    /// Stops the render, capture and logic threads, in that order.
    ///
    /// ### 中文
    /// 依次停止渲染、捕获与逻辑线程。
    pub fn shutdown(&self) {
        self.stop_render_thread();
        self.stop_capture_thread();
        self.stop_logic_thread();
    }
}

impl Drop for OverlaySystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use dpi::PhysicalSize;

    use super::*;
    use crate::engine::config::{MirrorConfig, ModeConfig};
    use crate::engine::gpu::headless::HeadlessGpu;

    const WAIT: Duration = Duration::from_secs(5);

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while !done() {
            if Instant::now() > deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
        true
    }

    fn config() -> Config {
        Config {
            default_mode: "normal".into(),
            modes: vec![ModeConfig {
                id: "normal".into(),
                width: 1920,
                height: 1080,
                ..ModeConfig::default()
            }],
            mirrors: vec![MirrorConfig {
                name: "pie".into(),
                fps: 10,
                ..MirrorConfig::default()
            }],
            ..Config::default()
        }
    }

    #[test]
    fn defaults_match_documented_tunables() {
        let tuning = OverlayTuning::default();
        assert_eq!(tuning.logic_hz, 60);
        assert_eq!(tuning.metrics_refresh, Duration::from_millis(250));
        assert_eq!(tuning.capture_idle, Duration::from_millis(1));
        assert_eq!(tuning.deferred_fence_depth, 64);
    }

    #[test]
    fn thread_slot_start_and_stop_are_idempotent() {
        let slot = ThreadSlot::new();
        assert!(slot.start(|| Ok(1)).unwrap());
        assert!(!slot.start(|| -> Result<i32, OverlayError> { panic!("second spawn") }).unwrap());
        assert!(slot.is_running());
        assert!(slot.stop());
        assert!(!slot.stop());
        assert!(!slot.is_running());
    }

    #[test]
    fn failed_start_leaves_the_slot_empty() {
        let slot: ThreadSlot<()> = ThreadSlot::new();
        assert!(
            slot.start(|| Err(OverlayError::NotInitialized("test")))
                .is_err()
        );
        assert!(!slot.is_running());
    }

    #[test]
    fn all_threads_start_once_and_stop_once() {
        let gpu = HeadlessGpu::new();
        let system = OverlaySystem::default();
        let factory: Arc<dyn GpuContextFactory> = Arc::new(gpu.clone());

        assert!(system.start_logic_thread().unwrap());
        assert!(system.start_capture_thread(factory.clone()).unwrap());
        assert!(system.start_render_thread(factory.clone(), None).unwrap());
        assert!(!system.start_logic_thread().unwrap());
        assert!(!system.start_capture_thread(factory.clone()).unwrap());
        assert!(!system.start_render_thread(factory, None).unwrap());
        assert_eq!(system.threads_running(), (true, true, true));

        system.shutdown();
        assert_eq!(system.threads_running(), (false, false, false));
        assert!(!system.stop_render_thread());
        assert_eq!(gpu.framebuffer_count(), 0);
    }

    #[test]
    fn queued_edits_are_applied_by_the_logic_thread() {
        let system = OverlaySystem::default();
        let loaded = system.publish_config(config());
        system.coordination().report_screen(PhysicalSize::new(1920, 1080));

        assert!(system.update_mirror_fps("pie", 30));
        assert!(system.update_mirror_capture_config("pie", 0, 64));
        assert!(system.move_image("missing", 1, 1));
        system.start_logic_thread().unwrap();

        assert!(wait_until(|| system.config_version() > loaded));
        let snapshot = system.config_snapshot();
        let mirror = snapshot.mirror("pie").expect("mirror survives");
        assert_eq!(mirror.fps, 30);
        assert_eq!((mirror.capture_width, mirror.capture_height), (1, 64));
        assert!(wait_until(|| system.current_mode() == "normal"));
    }

    #[test]
    fn invalid_json_keeps_the_previous_config() {
        let system = OverlaySystem::default();
        let version = system.publish_config(config());
        assert!(system.load_config_json("{ not json").is_err());
        assert_eq!(system.config_version(), version);
        assert_eq!(system.config_snapshot().modes.len(), 1);
    }

    #[test]
    fn host_glue_shares_the_system_objects() {
        let gpu = HeadlessGpu::new();
        let system = OverlaySystem::default();
        system.set_obs_active(true);
        let host = system.create_host(&gpu).expect("headless host");
        assert_eq!(host.stats().frames, 0);
        assert!(system.host_links().obs_active.load(Ordering::Acquire));
    }
}
