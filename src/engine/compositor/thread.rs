//! ### English
//! Overlay compositor thread: waits for render requests and renders both output streams.
//!
//! ### 中文
//! overlay 合成线程：等待渲染请求并渲染两个输出流。

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::engine::capture::CaptureShared;
use crate::engine::config::ConfigStore;
use crate::engine::error::OverlayError;
use crate::engine::gpu::{ContextRole, Fence, FenceHandle, GpuContextFactory, GpuDevice};
use crate::engine::lockfree::{Mailbox, MailboxStats, OneShot, Publish};
use crate::engine::service::OverlayTuning;

use super::gui::{EguiLayer, GuiLayer, SettingsPanel};
use super::images::{ImageLibrary, ImageQueue, ImageSender};
use super::render::{FrameRenderer, RenderInputs, RenderStats, StreamKind};
use super::request::{FrameRenderRequest, ObsFrameSubmission};
use super::ring::{AcquiredFrame, SharedRing};

const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// ### English
/// Upper bound on one idle wait; queued images are still drained at this rate without requests.
///
/// ### 中文
/// 单次空闲等待的上限；即使没有请求，排队的图片也按此频率处理。
const IDLE_WAIT: Duration = Duration::from_millis(50);

/// ### English
/// Diagnostics published after every compositor iteration.
///
/// ### 中文
/// 每轮合成迭代后发布的诊断数据。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompositorStats {
    pub local: RenderStats,
    pub obs: RenderStats,
    pub images_loaded: usize,
    pub image_uploads: u64,
}

/// ### English
/// State shared between the compositor thread and the host thread.
///
/// ### 中文
/// 合成线程与宿主线程之间共享的状态。
pub struct CompositorShared {
    local_requests: Mailbox<FrameRenderRequest>,
    obs_requests: Mailbox<ObsFrameSubmission>,
    wake: Mutex<bool>,
    wake_cv: Condvar,
    local_ring: Arc<SharedRing>,
    obs_ring: Arc<SharedRing>,
    images: ImageQueue,
    completed: Mutex<u64>,
    completed_cv: Condvar,
    stats: Mutex<CompositorStats>,
    orphan_fences: Mutex<Vec<Fence>>,
}

impl Default for CompositorShared {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositorShared {
    pub fn new() -> Self {
        Self {
            local_requests: Mailbox::new(),
            obs_requests: Mailbox::new(),
            wake: Mutex::new(false),
            wake_cv: Condvar::new(),
            local_ring: Arc::new(SharedRing::new()),
            obs_ring: Arc::new(SharedRing::new()),
            images: ImageQueue::new(),
            completed: Mutex::new(0),
            completed_cv: Condvar::new(),
            stats: Mutex::new(CompositorStats::default()),
            orphan_fences: Mutex::new(Vec::new()),
        }
    }

    fn notify(&self) {
        *self.wake.lock() = true;
        self.wake_cv.notify_one();
    }

    /// ### English
    /// Hands the local-display request of this host frame to the compositor. Never blocks; an
    /// unrendered older request is replaced and counted as dropped.
    ///
    /// ### 中文
    /// 把本宿主帧的本地显示请求交给合成线程。从不阻塞；尚未渲染的旧请求被替换并计为丢弃。
    pub fn submit_frame_for_rendering(&self, request: FrameRenderRequest) -> Publish {
        let outcome = self.local_requests.publish(request);
        self.notify();
        outcome
    }

    /// ### English
    /// External-capture counterpart of [`Self::submit_frame_for_rendering`].
    ///
    /// ### 中文
    /// [`Self::submit_frame_for_rendering`] 的外部捕获版本。
    pub fn submit_obs_frame_context(&self, submission: ObsFrameSubmission) -> Publish {
        let outcome = self.obs_requests.publish(submission);
        self.notify();
        outcome
    }

    pub fn completed_render_frame(&self) -> Option<AcquiredFrame> {
        self.local_ring.try_acquire_latest()
    }

    pub fn completed_obs_frame(&self) -> Option<AcquiredFrame> {
        self.obs_ring.try_acquire_latest()
    }

    /// ### English
    /// Releases a local frame acquired with [`Self::completed_render_frame`]. Returns the fence
    /// back if the slot was no longer held, so the caller can delete it.
    ///
    /// ### 中文
    /// 释放通过 [`Self::completed_render_frame`] 获取的本地帧。若该槽位已不处于持有状态则把
    /// fence 返还，由调用方删除。
    #[must_use]
    pub fn submit_render_consumer_fence(
        &self,
        slot: usize,
        consumer_fence: Option<Fence>,
    ) -> Option<Fence> {
        self.local_ring.release(slot, consumer_fence)
    }

    #[must_use]
    pub fn submit_obs_consumer_fence(
        &self,
        slot: usize,
        consumer_fence: Option<Fence>,
    ) -> Option<Fence> {
        self.obs_ring.release(slot, consumer_fence)
    }

    /// ### English
    /// Hands a fence owned by a thread without a device to the compositor, which deletes it on
    /// its next wake.
    ///
    /// ### 中文
    /// 把没有设备的线程所持有的 fence 交给合成线程，由其在下次唤醒时删除。
    pub fn retire_fence(&self, fence: Fence) {
        self.orphan_fences.lock().push(fence);
    }

    pub fn image_sender(&self) -> ImageSender {
        self.images.sender()
    }

    pub fn local_ring(&self) -> &Arc<SharedRing> {
        &self.local_ring
    }

    pub fn obs_ring(&self) -> &Arc<SharedRing> {
        &self.obs_ring
    }

    /// ### English
    /// Number of compositor iterations that rendered at least one stream.
    ///
    /// ### 中文
    /// 至少渲染了一个输出流的合成迭代次数。
    pub fn completed_iterations(&self) -> u64 {
        *self.completed.lock()
    }

    /// ### English
    /// Blocks until more than `seen` iterations completed or `timeout` elapsed; returns the count.
    ///
    /// ### 中文
    /// 阻塞直到完成的迭代数超过 `seen` 或超时；返回当前计数。
    pub fn wait_for_completion(&self, seen: u64, timeout: Duration) -> u64 {
        let deadline = Instant::now() + timeout;
        let mut completed = self.completed.lock();
        while *completed <= seen {
            if self
                .completed_cv
                .wait_until(&mut completed, deadline)
                .timed_out()
            {
                break;
            }
        }
        *completed
    }

    pub fn stats(&self) -> CompositorStats {
        self.stats.lock().clone()
    }

    pub fn request_stats(&self) -> (MailboxStats, MailboxStats) {
        (self.local_requests.stats(), self.obs_requests.stats())
    }

    fn finish_iteration(&self) {
        *self.completed.lock() += 1;
        self.completed_cv.notify_all();
    }
}

/// ### English
/// Running compositor thread. Dropping it stops and joins the thread.
///
/// ### 中文
/// 运行中的合成线程；drop 时停止并 join 该线程。
pub struct OverlayCompositor {
    shared: Arc<CompositorShared>,
    should_stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl OverlayCompositor {
    /// ### English
    /// Spawns the compositor thread and blocks until its GPU context is ready (or fails).
    ///
    /// ### 中文
    /// 创建合成线程，并阻塞等待其 GPU 上下文就绪（或失败）。
    pub fn start(
        factory: Arc<dyn GpuContextFactory>,
        config: Arc<ConfigStore>,
        capture: Arc<CaptureShared>,
        shared: Arc<CompositorShared>,
        settings: Option<Box<dyn SettingsPanel>>,
        tuning: OverlayTuning,
    ) -> Result<Self, OverlayError> {
        let should_stop = Arc::new(AtomicBool::new(false));
        let init = Arc::new(OneShot::new(thread::current()));

        let thread = {
            let should_stop = should_stop.clone();
            let shared = shared.clone();
            let init = init.clone();
            thread::Builder::new()
                .name("xian-overlay-compositor".to_string())
                .spawn(move || {
                    let context = CompositorContext {
                        config,
                        capture,
                        shared,
                        should_stop,
                        tuning,
                    };
                    run_compositor_thread(factory, context, settings, init)
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
                shared.notify();
                let _ = thread.join();
                Err(OverlayError::ThreadInitTimeout("compositor"))
            }
        }
    }

    pub fn shared(&self) -> &Arc<CompositorShared> {
        &self.shared
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.should_stop.store(true, Ordering::Release);
        self.shared.notify();
        if thread.join().is_err() {
            log::error!("compositor thread panicked");
        }
    }
}

impl Drop for OverlayCompositor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct CompositorContext {
    config: Arc<ConfigStore>,
    capture: Arc<CaptureShared>,
    shared: Arc<CompositorShared>,
    should_stop: Arc<AtomicBool>,
    tuning: OverlayTuning,
}

impl CompositorContext {
    fn stopping(&self) -> bool {
        self.should_stop.load(Ordering::Acquire)
    }

    /// ### English
    /// Sleeps until a request arrives, shutdown is requested or the idle wait elapses.
    ///
    /// ### 中文
    /// 休眠直到有请求到达、请求关闭或空闲等待超时。
    fn wait(&self) {
        let mut pending = self.shared.wake.lock();
        if !*pending
            && !self.stopping()
            && !self.shared.local_requests.has_pending()
            && !self.shared.obs_requests.has_pending()
        {
            let _ = self.shared.wake_cv.wait_for(&mut pending, IDLE_WAIT);
        }
        *pending = false;
    }
}

fn run_compositor_thread(
    factory: Arc<dyn GpuContextFactory>,
    context: CompositorContext,
    settings: Option<Box<dyn SettingsPanel>>,
    init: Arc<OneShot<Result<(), OverlayError>>>,
) {
    let mut device = match factory.create_device(ContextRole::Compositor) {
        Ok(device) => device,
        Err(err) => {
            log::error!("compositor context unavailable: {err}");
            init.send(Err(err));
            return;
        }
    };

    let shared = &context.shared;
    let depth = context.tuning.deferred_fence_depth;
    let mut local = FrameRenderer::new(StreamKind::Local, shared.local_ring.clone(), depth);
    let mut obs = FrameRenderer::new(StreamKind::Obs, shared.obs_ring.clone(), depth);
    let mut library = ImageLibrary::new();
    let mut config = context.config.reader();
    let font_path = config.get().gui_font_path.clone();
    let mut gui = EguiLayer::new(settings, font_path.as_deref());
    init.send(Ok(()));
    log::info!("compositor thread started");

    while !context.stopping() {
        context.wait();
        if context.stopping() {
            break;
        }

        let now = Instant::now();
        library.drain(device.as_mut(), shared.images.receiver(), now);
        delete_orphans(device.as_mut(), shared);
        context.config.refresh(&mut config);

        let obs_submission = shared.obs_requests.try_consume();
        let local_request = shared.local_requests.try_consume();
        if obs_submission.is_none() && local_request.is_none() {
            continue;
        }

        let game = context.capture.frame_copy.latest().map(|frame| frame.texture);
        let inputs = RenderInputs {
            config: config.get(),
            config_version: config.version(),
            mirrors: &context.capture.mirrors,
            images: &library,
            game,
            now,
        };

        /*
        ### English
        External capture first so its frame is ready by the time OBS polls; then the local display.

        ### 中文
        先渲染外部捕获流，使其帧在 OBS 轮询时已就绪；再渲染本地显示。
        */
        if let Some(submission) = obs_submission {
            obs.render(
                device.as_mut(),
                &mut gui,
                &inputs,
                &submission.request,
                submission.game_ready,
            );
        }
        if let Some(request) = local_request {
            local.render(
                device.as_mut(),
                &mut gui,
                &inputs,
                &request,
                FenceHandle::NONE,
            );
        }

        *shared.stats.lock() = CompositorStats {
            local: local.stats().clone(),
            obs: obs.stats().clone(),
            images_loaded: library.len(),
            image_uploads: library.uploads(),
        };
        shared.finish_iteration();
    }

    teardown(device.as_mut(), &mut local, &mut obs, &mut library, &mut gui);
    delete_orphans(device.as_mut(), shared);
    device.flush();
    log::info!("compositor thread stopped");
}

fn delete_orphans(device: &mut dyn GpuDevice, shared: &CompositorShared) {
    let orphans = std::mem::take(&mut *shared.orphan_fences.lock());
    for fence in orphans {
        device.delete_fence(fence);
    }
}

/// ### English
/// Releases every GPU resource class in its own unwind guard, so one failing class does not leak
/// the others.
///
/// ### 中文
/// 每类 GPU 资源在各自的 unwind 保护中释放，一类失败不会导致其它类泄漏。
fn teardown(
    device: &mut dyn GpuDevice,
    local: &mut FrameRenderer,
    obs: &mut FrameRenderer,
    library: &mut ImageLibrary,
    gui: &mut EguiLayer,
) {
    guarded("gui", || gui.destroy(device));
    guarded("local ring", || local.destroy(device));
    guarded("obs ring", || obs.destroy(device));
    guarded("images", || library.destroy(device));
}

fn guarded(what: &str, step: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(step)).is_err() {
        log::error!("compositor teardown of {what} panicked");
    }
}

#[cfg(test)]
mod tests {
    use dpi::PhysicalSize;

    use super::*;
    use crate::engine::compositor::images::{DecodedImage, ImageKind};
    use crate::engine::geometry::RectF;
    use crate::engine::gpu::headless::HeadlessGpu;

    const WAIT: Duration = Duration::from_secs(5);

    fn start(gpu: &HeadlessGpu) -> OverlayCompositor {
        OverlayCompositor::start(
            Arc::new(gpu.clone()),
            Arc::new(ConfigStore::new()),
            Arc::new(CaptureShared::new()),
            Arc::new(CompositorShared::new()),
            None,
            OverlayTuning::default(),
        )
        .expect("headless compositor thread")
    }

    fn request(frame: u64) -> FrameRenderRequest {
        let screen = PhysicalSize::new(64, 48);
        FrameRenderRequest::new(frame, screen, RectF::new(0.0, 0.0, 64.0, 48.0), "default")
    }

    #[test]
    fn submitted_request_becomes_a_completed_frame() {
        let gpu = HeadlessGpu::new();
        let compositor = start(&gpu);
        let shared = compositor.shared().clone();

        assert!(shared.completed_render_frame().is_none());
        let _ = shared.submit_frame_for_rendering(request(1));
        assert!(shared.wait_for_completion(0, WAIT) >= 1);

        let frame = shared.completed_render_frame().expect("published frame");
        assert_eq!(frame.frame_seq, 1);
        assert!(shared.submit_render_consumer_fence(frame.slot, None).is_none());
        assert!(shared.completed_obs_frame().is_none());

        drop(compositor);
        assert_eq!(gpu.framebuffer_count(), 0);
        assert_eq!(gpu.live_fence_count(), 0);
    }

    #[test]
    fn obs_and_local_are_rendered_in_one_wake() {
        let gpu = HeadlessGpu::new();
        let compositor = start(&gpu);
        let shared = compositor.shared().clone();

        /*
        ### English
        Publish both before the thread can run an iteration for only one of them.

        ### 中文
        在线程只处理其中一个之前同时发布两者。
        */
        let seen = shared.completed_iterations();
        let _ = shared.submit_obs_frame_context(ObsFrameSubmission {
            request: request(7),
            game_ready: FenceHandle::NONE,
        });
        let _ = shared.submit_frame_for_rendering(request(7));
        let mut done = seen;
        while shared.stats().local.frames == 0 || shared.stats().obs.frames == 0 {
            let next = shared.wait_for_completion(done, WAIT);
            assert!(next > done, "compositor stalled");
            done = next;
        }
        assert!(shared.completed_obs_frame().is_some());
        assert!(shared.completed_render_frame().is_some());
    }

    #[test]
    fn queued_images_are_loaded_on_the_compositor() {
        let gpu = HeadlessGpu::new();
        let compositor = start(&gpu);
        let shared = compositor.shared().clone();

        let pixels = vec![255u8; 4 * 4 * 4];
        assert!(shared.image_sender().send(DecodedImage::still(
            "logo",
            ImageKind::UserImage,
            4,
            4,
            pixels,
        )));
        let _ = shared.submit_frame_for_rendering(request(1));
        shared.wait_for_completion(0, WAIT);
        assert_eq!(shared.stats().images_loaded, 1);

        let textures = gpu.texture_count();
        drop(compositor);
        assert!(gpu.texture_count() < textures);
    }

    #[test]
    fn retired_fences_are_deleted_by_the_compositor() {
        let gpu = HeadlessGpu::new();
        let compositor = start(&gpu);
        let shared = compositor.shared().clone();

        let fence = gpu.device().insert_fence().expect("headless fence");
        let handle = fence.handle();
        shared.retire_fence(fence);
        assert!(gpu.fence_alive(handle));

        let _ = shared.submit_frame_for_rendering(request(1));
        shared.wait_for_completion(0, WAIT);
        assert!(!gpu.fence_alive(handle));
    }

    #[test]
    fn stop_is_idempotent() {
        let gpu = HeadlessGpu::new();
        let mut compositor = start(&gpu);
        compositor.shutdown();
        compositor.shutdown();
        assert!(compositor.thread.is_none());
    }
}
