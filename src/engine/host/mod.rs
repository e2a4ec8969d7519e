//! ### English
//! Host-thread glue: everything that runs synchronously inside the host's render callback.
//!
//! Per frame the host copies its frame for the capture thread, builds and submits the overlay
//! requests, then blends the newest finished overlay frame onto its framebuffer with a GPU-side
//! wait. Nothing here blocks on the CPU.
//!
//! ### 中文
//! 宿主线程胶水层：在宿主渲染回调内同步执行的全部工作。
//!
//! 每帧宿主为捕获线程拷贝当前帧，构建并提交 overlay 请求，然后通过 GPU 侧等待把最新完成的
//! overlay 帧混合到自己的 framebuffer 上。这里没有任何 CPU 阻塞。

mod caches;
mod ui;

pub use caches::{HostCaches, WindowCaptureTarget};
pub use ui::HostUi;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use dpi::PhysicalSize;

use crate::engine::capture::{CaptureShared, HostFrameCopier};
use crate::engine::compositor::{
    CompositorShared, EyeZoomRequest, FrameRenderRequest, ObsFrameSubmission, TransitionSample,
};
use crate::engine::config::{Config, ConfigStore};
use crate::engine::coordination::CoordinationState;
use crate::engine::error::OverlayError;
use crate::engine::geometry::RectF;
use crate::engine::gpu::{
    BlendMode, ContextRole, DeferredFenceRing, DrawTarget, FenceHandle, GpuContextFactory,
    GpuDevice, QuadDraw,
};
use crate::engine::lockfree::{Publish, VersionedReader};
use crate::engine::transition::{TransitionController, TransitionSnapshot};

/// ### English
/// Shared objects the host glue talks to.
///
/// ### 中文
/// 宿主胶水层访问的共享对象。
#[derive(Clone)]
pub struct HostLinks {
    pub config: Arc<ConfigStore>,
    pub transition: Arc<TransitionController>,
    pub coordination: Arc<CoordinationState>,
    pub capture: Arc<CaptureShared>,
    pub compositor: Arc<CompositorShared>,
    pub ui: Arc<HostUi>,
    /// ### English
    /// An external capture consumer is attached; external-capture requests are submitted.
    ///
    /// ### 中文
    /// 已连接外部捕获消费者；会提交外部捕获请求。
    pub obs_active: Arc<AtomicBool>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HostFrameStats {
    pub frames: u64,
    pub copies: u64,
    pub blended: u64,
    /// ### English
    /// Requests that replaced an unrendered one (or were discarded).
    ///
    /// ### 中文
    /// 替换了未渲染请求（或被丢弃）的请求数。
    pub dropped_requests: u64,
}

/// ### English
/// Host render-thread state. Create it on the host thread with its context current and keep it
/// there.
///
/// ### 中文
/// 宿主渲染线程状态。需在宿主上下文 current 的宿主线程上创建，并始终留在该线程。
pub struct HostCompositor {
    device: Box<dyn GpuDevice>,
    links: HostLinks,
    reader: VersionedReader<Config>,
    copier: HostFrameCopier,
    caches: HostCaches,
    game_fences: DeferredFenceRing,
    modes: (u32, String, String),
    frame_number: u64,
    stats: HostFrameStats,
}

impl HostCompositor {
    pub fn new(
        factory: &dyn GpuContextFactory,
        links: HostLinks,
        fence_depth: usize,
    ) -> Result<Self, OverlayError> {
        let device = factory.create_device(ContextRole::Host)?;
        let reader = links.config.reader();
        let (from, to) = links.transition.modes();
        let generation = links.transition.snapshot().generation;
        Ok(Self {
            device,
            reader,
            copier: HostFrameCopier::new(),
            caches: HostCaches::new(),
            game_fences: DeferredFenceRing::new(fence_depth),
            modes: (generation, from, to),
            frame_number: 0,
            stats: HostFrameStats::default(),
            links,
        })
    }

    pub fn stats(&self) -> HostFrameStats {
        self.stats
    }

    pub fn caches(&self) -> &HostCaches {
        &self.caches
    }

    /// ### English
    /// Runs the per-frame host work on `framebuffer` of `size`. Returns whether an overlay frame
    /// was blended.
    ///
    /// ### 中文
    /// 在尺寸为 `size` 的 `framebuffer` 上执行每帧宿主工作；返回是否混合了 overlay 帧。
    pub fn on_frame(&mut self, framebuffer: u32, size: PhysicalSize<u32>, now: Instant) -> bool {
        if size.width == 0 || size.height == 0 {
            return false;
        }
        self.stats.frames += 1;
        self.frame_number += 1;
        self.links.coordination.report_screen(size);
        self.device.save_host_state();

        /*
        ### English
        1) Copy the clean game frame before anything is drawn over it.

        ### 中文
        1) 在绘制任何内容之前拷贝干净的游戏帧。
        */
        let capture = self.links.capture.clone();
        if self
            .copier
            .copy(&capture.frame_copy, self.device.as_mut(), framebuffer, size)
        {
            self.stats.copies += 1;
        }

        /*
        ### English
        2) Lookup caches, animated viewport and the request.

        ### 中文
        2) 查询缓存、动画 viewport 与请求。
        */
        self.links.config.refresh(&mut self.reader);
        let snapshot = self.links.transition.advance(now);
        if snapshot.generation != self.modes.0 {
            let (from, to) = self.links.transition.modes();
            self.modes = (snapshot.generation, from, to);
        }
        self.caches
            .refresh(self.reader.get(), self.reader.version(), &self.modes.2);
        let request = self.build_request(size, &snapshot, now);

        /*
        ### English
        3) Submit both streams; neither call blocks.

        ### 中文
        3) 提交两个输出流；两者都不会阻塞。
        */
        let obs = self.links.obs_active.load(Ordering::Acquire).then(|| request.clone());
        self.count_publish(self.links.compositor.submit_frame_for_rendering(request));
        if let Some(request) = obs {
            let game_ready = match self.device.insert_fence() {
                Some(fence) => {
                    let handle = fence.handle();
                    self.game_fences.retire(self.device.as_mut(), fence);
                    handle
                }
                None => FenceHandle::NONE,
            };
            let submission = ObsFrameSubmission {
                request,
                game_ready,
            };
            self.count_publish(self.links.compositor.submit_obs_frame_context(submission));
        }

        /*
        ### English
        4) Blend the newest finished overlay frame and hand back a consumer fence.

        ### 中文
        4) 混合最新完成的 overlay 帧并交回 consumer fence。
        */
        let blended = self.blend_latest(framebuffer, size);
        self.device.restore_host_state();
        blended
    }

    fn count_publish(&mut self, outcome: Publish) {
        if outcome != Publish::Stored {
            self.stats.dropped_requests += 1;
        }
    }

    fn build_request(
        &self,
        size: PhysicalSize<u32>,
        snapshot: &TransitionSnapshot,
        now: Instant,
    ) -> FrameRenderRequest {
        let (_, from_mode, to_mode) = &self.modes;
        let previous = if snapshot.is_active() {
            from_mode.as_str()
        } else {
            ""
        };
        let mut transition = TransitionSample::from_snapshot(snapshot, previous);
        transition.slide_mirrors = self.caches.slide_mirrors;

        let mut request = FrameRenderRequest::new(self.frame_number, size, snapshot.current, to_mode);
        request.transition = transition;
        request.gui = self.links.ui.sample(&self.caches.debug, now);
        request.show_texture_grid = self.caches.debug.show_texture_grid;
        request.eyezoom = eyezoom_request(self.caches.eyezoom_mode.as_deref(), &self.modes, snapshot);
        request.background = self.caches.background.clone();
        request.border = self.caches.border;
        request
    }

    fn blend_latest(&mut self, framebuffer: u32, size: PhysicalSize<u32>) -> bool {
        let compositor = self.links.compositor.clone();
        let Some(frame) = compositor.completed_render_frame() else {
            return false;
        };

        let matches = frame.texture.size == size && frame.texture.id != 0;
        if matches {
            if !frame.producer_fence.is_none() {
                self.device.wait_fence(frame.producer_fence);
            }
            self.device.bind(DrawTarget::Host { framebuffer, size });
            self.device.draw(
                &QuadDraw::textured(RectF::from_size(size), frame.texture)
                    .with_blend(BlendMode::Premultiplied),
            );
        }

        let consumer = if matches {
            self.device.insert_fence()
        } else {
            None
        };
        if let Some(stale) = compositor.submit_render_consumer_fence(frame.slot, consumer) {
            self.device.delete_fence(stale);
        }
        if matches {
            self.stats.blended += 1;
        }
        matches
    }

    /// ### English
    /// Deletes the copy targets and every fence the host still owns. Idempotent.
    ///
    /// ### 中文
    /// 删除拷贝目标以及宿主仍持有的全部 fence；幂等。
    pub fn destroy(&mut self) {
        self.copier
            .destroy(&self.links.capture.frame_copy, self.device.as_mut());
        self.game_fences.drain(self.device.as_mut());
        self.device.flush();
    }
}

impl Drop for HostCompositor {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// ### English
/// Magnifier state: shown while the EyeZoom mode is entered or current, frozen while leaving it.
///
/// ### 中文
/// 放大镜状态：进入或处于 EyeZoom 模式时显示，离开时冻结。
fn eyezoom_request(
    eyezoom_mode: Option<&str>,
    modes: &(u32, String, String),
    snapshot: &TransitionSnapshot,
) -> EyeZoomRequest {
    let Some(mode) = eyezoom_mode else {
        return EyeZoomRequest::default();
    };
    let (_, from, to) = modes;
    if to == mode {
        EyeZoomRequest {
            active: true,
            progress: snapshot.progress,
            leaving: false,
        }
    } else if from == mode && snapshot.is_active() {
        EyeZoomRequest {
            active: true,
            progress: 1.0 - snapshot.progress,
            leaving: true,
        }
    } else {
        EyeZoomRequest::default()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::engine::compositor::OverlayCompositor;
    use crate::engine::config::{ModeConfig, TransitionConfig, TransitionStyle};
    use crate::engine::geometry::{Easing, Rgba};
    use crate::engine::gpu::headless::HeadlessGpu;
    use crate::engine::service::OverlayTuning;

    const SCREEN: PhysicalSize<u32> = PhysicalSize::new(64, 48);

    fn links() -> HostLinks {
        let config = Arc::new(ConfigStore::new());
        config.publish(Config {
            modes: vec![ModeConfig {
                id: "full".into(),
                width: 64,
                height: 48,
                ..ModeConfig::default()
            }],
            default_mode: "full".into(),
            ..Config::default()
        });
        HostLinks {
            config,
            transition: Arc::new(TransitionController::new(
                RectF::from_size(SCREEN),
                "full",
            )),
            coordination: Arc::new(CoordinationState::new()),
            capture: Arc::new(CaptureShared::new()),
            compositor: Arc::new(CompositorShared::new()),
            ui: Arc::new(HostUi::new()),
            obs_active: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn frames_without_compositor_only_submit_requests() {
        let gpu = HeadlessGpu::new();
        let links = links();
        let mut host = HostCompositor::new(&gpu, links.clone(), 64).expect("host device");

        let now = Instant::now();
        assert!(!host.on_frame(0, SCREEN, now));
        assert!(!host.on_frame(0, SCREEN, now));

        let stats = host.stats();
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.blended, 0);
        assert_eq!(stats.copies, 0);
        assert_eq!(stats.dropped_requests, 1);
        assert_eq!(links.coordination.reported_screen(), Some(SCREEN));
        assert_eq!(host.caches().rebuilds(), 1);
    }

    #[test]
    fn obs_submission_carries_a_host_owned_fence() {
        let gpu = HeadlessGpu::new();
        let links = links();
        links.obs_active.store(true, Ordering::Release);
        let mut host = HostCompositor::new(&gpu, links.clone(), 2).expect("host device");

        for _ in 0..4 {
            host.on_frame(0, SCREEN, Instant::now());
        }
        /*
        ### English
        Only the last `depth` game fences stay alive.

        ### 中文
        只有最近 `depth` 个游戏 fence 保持存活。
        */
        assert_eq!(gpu.live_fence_count(), 2);
        drop(host);
        assert_eq!(gpu.live_fence_count(), 0);
    }

    #[test]
    fn finished_overlay_frame_is_blended_after_its_fence() {
        let gpu = HeadlessGpu::new();
        gpu.set_host_frame(SCREEN, Rgba::new(0.0, 0.0, 1.0, 1.0));
        let links = links();
        links.ui.show_toast("hello", Instant::now());
        let compositor = OverlayCompositor::start(
            Arc::new(gpu.clone()),
            links.config.clone(),
            links.capture.clone(),
            links.compositor.clone(),
            None,
            OverlayTuning::default(),
        )
        .expect("compositor");
        let mut host = HostCompositor::new(&gpu, links.clone(), 64).expect("host device");

        let seen = links.compositor.completed_iterations();
        host.on_frame(0, SCREEN, Instant::now());
        links
            .compositor
            .wait_for_completion(seen, Duration::from_secs(5));
        assert!(host.on_frame(0, SCREEN, Instant::now()));
        assert_eq!(host.stats().blended, 1);

        /*
        ### English
        The local overlay is transparent here, so the host pixels survive the blend.

        ### 中文
        此处本地 overlay 是透明的，因此宿主像素在混合后保持不变。
        */
        assert_eq!(gpu.host_pixel(10, 10), Rgba::new(0.0, 0.0, 1.0, 1.0));
        drop(host);
        drop(compositor);
        assert_eq!(gpu.live_fence_count(), 0);
    }

    #[test]
    fn eyezoom_is_frozen_while_leaving_its_mode() {
        let modes = (1, "zoom".to_string(), "full".to_string());
        let transition = TransitionController::new(RectF::new(0.0, 0.0, 10.0, 10.0), "zoom");
        let start = Instant::now();
        transition.begin(
            RectF::new(0.0, 0.0, 20.0, 20.0),
            "full",
            &TransitionConfig {
                style: TransitionStyle::Bounce,
                duration_ms: 100,
                easing: Easing::Linear,
                slide_mirrors: false,
            },
            start,
        );
        let snapshot = transition.advance(start + Duration::from_millis(10));
        let leaving = eyezoom_request(Some("zoom"), &modes, &snapshot);
        assert!(leaving.active && leaving.leaving);
        assert!(leaving.progress > 0.0 && leaving.progress < 1.0);

        let settled = transition.advance(start + Duration::from_secs(1));
        assert_eq!(eyezoom_request(Some("zoom"), &modes, &settled), EyeZoomRequest::default());

        let entered = (2, "full".to_string(), "zoom".to_string());
        let shown = eyezoom_request(Some("zoom"), &entered, &settled);
        assert!(shown.active && !shown.leaving);
        assert_eq!(shown.progress, 1.0);
    }
}
