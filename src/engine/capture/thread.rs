//! ### English
//! Capture thread: owns the capture GPU context, publishes game copies and runs mirror passes.
//!
//! ### 中文
//! 捕获线程：持有捕获 GPU 上下文，发布游戏拷贝并执行镜像流程。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::engine::config::ConfigStore;
use crate::engine::coordination::CoordinationState;
use crate::engine::error::OverlayError;
use crate::engine::gpu::{ContextRole, GpuContextFactory};
use crate::engine::lockfree::OneShot;
use crate::engine::service::OverlayTuning;

use super::frame_copy::{CopyReceiver, GameFrameCopy};
use super::mirror::MirrorRegistry;
use super::pipeline::MirrorPipeline;

const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// ### English
/// State shared between the capture thread and its readers (host glue, compositor).
///
/// ### 中文
/// 捕获线程与其读者（宿主胶水层、合成线程）之间共享的状态。
#[derive(Default)]
pub struct CaptureShared {
    pub frame_copy: GameFrameCopy,
    pub mirrors: MirrorRegistry,
    border_passes: AtomicU64,
}

impl CaptureShared {
    pub fn new() -> Self {
        Self::default()
    }

    /// ### English
    /// Total mirror capture passes since start (diagnostics).
    ///
    /// ### 中文
    /// 启动以来镜像捕获流程的总次数（诊断用）。
    pub fn border_passes(&self) -> u64 {
        self.border_passes.load(Ordering::Relaxed)
    }
}

/// ### English
/// Running capture thread. Dropping it stops and joins the thread.
///
/// ### 中文
/// 运行中的捕获线程；drop 时停止并 join 该线程。
pub struct CaptureEngine {
    shared: Arc<CaptureShared>,
    should_stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CaptureEngine {
    /// ### English
    /// Spawns the capture thread and blocks until its GPU context is ready (or fails).
    ///
    /// ### 中文
    /// 创建捕获线程，并阻塞等待其 GPU 上下文就绪（或失败）。
    pub fn start(
        factory: Arc<dyn GpuContextFactory>,
        config: Arc<ConfigStore>,
        coordination: Arc<CoordinationState>,
        shared: Arc<CaptureShared>,
        tuning: OverlayTuning,
    ) -> Result<Self, OverlayError> {
        let should_stop = Arc::new(AtomicBool::new(false));
        let init = Arc::new(OneShot::new(thread::current()));

        let thread = {
            let should_stop = should_stop.clone();
            let shared = shared.clone();
            let init = init.clone();
            thread::Builder::new()
                .name("xian-overlay-capture".to_string())
                .spawn(move || {
                    run_capture_thread(
                        factory,
                        config,
                        coordination,
                        shared,
                        should_stop,
                        tuning,
                        init,
                    )
                })?
        };

        match init.recv_timeout(INIT_TIMEOUT) {
            Some(Ok(())) => Ok(Self {
                shared,
                should_stop,
                thread: Some(thread),
            }),
            Some(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            None => {
                should_stop.store(true, Ordering::Release);
                thread.thread().unpark();
                let _ = thread.join();
                Err(OverlayError::ThreadInitTimeout("capture"))
            }
        }
    }

    pub fn shared(&self) -> &Arc<CaptureShared> {
        &self.shared
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.should_stop.store(true, Ordering::Release);
        thread.thread().unpark();
        if thread.join().is_err() {
            log::error!("capture thread panicked");
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_capture_thread(
    factory: Arc<dyn GpuContextFactory>,
    config: Arc<ConfigStore>,
    coordination: Arc<CoordinationState>,
    shared: Arc<CaptureShared>,
    should_stop: Arc<AtomicBool>,
    tuning: OverlayTuning,
    init: Arc<OneShot<Result<(), OverlayError>>>,
) {
    let mut device = match factory.create_device(ContextRole::Capture) {
        Ok(device) => device,
        Err(err) => {
            log::error!("capture context unavailable: {err}");
            init.send(Err(err));
            return;
        }
    };

    let mut pipeline = MirrorPipeline::new(tuning.deferred_fence_depth);
    let mut receiver = CopyReceiver::new();
    let waker = shared.frame_copy.waker();
    waker.attach(thread::current());
    shared.frame_copy.set_consumer_active(true);
    init.send(Ok(()));
    log::info!("capture thread started");

    while !should_stop.load(Ordering::Acquire) {
        waker.take();

        /*
        ### English
        1) Publish finished host copies.

        ### 中文
        1) 发布已完成的宿主拷贝。
        */
        receiver.pump(&shared.frame_copy, device.as_mut());

        /*
        ### English
        2) Capture due mirrors from the freshest copy.

        ### 中文
        2) 基于最新拷贝捕获到期的镜像。
        */
        if config.is_loaded() {
            let (version, snapshot) = config.snapshot_with_version();
            let active = coordination.active_mirrors();
            let updated = pipeline.run(
                device.as_mut(),
                &snapshot,
                version,
                &active,
                coordination.viewport(),
                shared.frame_copy.latest(),
                &shared.mirrors,
                Instant::now(),
            );
            if updated > 0 {
                shared
                    .border_passes
                    .store(pipeline.border_passes(), Ordering::Relaxed);
            }
        }

        if should_stop.load(Ordering::Acquire) {
            break;
        }
        thread::park_timeout(tuning.capture_idle);
    }

    shared.frame_copy.set_consumer_active(false);
    waker.detach();
    receiver.shutdown(&shared.frame_copy, device.as_mut());
    pipeline.teardown(device.as_mut(), &shared.mirrors);
    device.flush();
    log::info!("capture thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::Config;
    use crate::engine::gpu::headless::HeadlessGpu;

    #[test]
    fn start_reports_context_failure() {
        struct Broken;
        impl GpuContextFactory for Broken {
            fn create_device(
                &self,
                _role: ContextRole,
            ) -> Result<Box<dyn crate::engine::gpu::GpuDevice>, OverlayError> {
                Err(OverlayError::ContextCreation("no share group".to_string()))
            }
        }

        let result = CaptureEngine::start(
            Arc::new(Broken),
            Arc::new(ConfigStore::new()),
            Arc::new(CoordinationState::new()),
            Arc::new(CaptureShared::new()),
            OverlayTuning::default(),
        );
        assert!(matches!(result, Err(OverlayError::ContextCreation(_))));
    }

    #[test]
    fn consumer_flag_follows_thread_lifetime() {
        let gpu = HeadlessGpu::new();
        let shared = Arc::new(CaptureShared::new());
        let config = Arc::new(ConfigStore::new());
        config.publish(Config::default());

        let engine = CaptureEngine::start(
            Arc::new(gpu.clone()),
            config,
            Arc::new(CoordinationState::new()),
            shared.clone(),
            OverlayTuning::default(),
        )
        .expect("headless capture thread");
        assert!(shared.frame_copy.is_consumer_active());
        drop(engine);
        assert!(!shared.frame_copy.is_consumer_active());
        assert_eq!(gpu.live_fence_count(), 0);
    }
}
