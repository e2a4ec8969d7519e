//! ### English
//! Decoded-image queue and the compositor's GPU image library.
//!
//! Decoding happens elsewhere; decoded RGBA buffers arrive over a channel, are uploaded by the
//! compositor thread once per iteration and then dropped. Animated images are uploaded as one
//! vertical strip of frames and animated by selecting the current frame's texture rows.
//!
//! ### 中文
//! 已解码图片队列与合成线程的 GPU 图片库。
//!
//! 解码在其它地方完成；解码后的 RGBA 缓冲通过通道到达，由合成线程每轮上传一次后释放。动画图片
//! 以竖直帧条的形式整体上传，并通过选择当前帧所在的纹理行来播放。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use dpi::PhysicalSize;

use crate::engine::geometry::RectF;
use crate::engine::gpu::{GpuDevice, Texture, TextureRef};

const QUEUE_CAPACITY: usize = 64;
const MIN_FRAME_DELAY: Duration = Duration::from_millis(10);

/// ### English
/// What a decoded image is used for.
///
/// ### 中文
/// 已解码图片的用途。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageKind {
    Background,
    UserImage,
    WindowOverlay,
}

/// ### English
/// One decoded image: tightly packed RGBA rows, frames stacked top to bottom.
///
/// ### 中文
/// 一张已解码图片：紧密排列的 RGBA 行，多帧自上而下堆叠。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedImage {
    pub id: String,
    pub kind: ImageKind,
    pub rgba: Vec<u8>,
    pub width: u32,
    /// ### English
    /// Height of a single frame.
    ///
    /// ### 中文
    /// 单帧高度。
    pub frame_height: u32,
    /// ### English
    /// Per-frame delays in milliseconds; empty or one entry means a still image.
    ///
    /// ### 中文
    /// 每帧延迟（毫秒）；为空或只有一项表示静态图片。
    pub frame_delays_ms: Vec<u32>,
}

impl DecodedImage {
    pub fn still(id: &str, kind: ImageKind, width: u32, height: u32, rgba: Vec<u8>) -> Self {
        Self {
            id: id.to_string(),
            kind,
            rgba,
            width,
            frame_height: height,
            frame_delays_ms: Vec::new(),
        }
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_delays_ms.len().max(1) as u32
    }

    pub fn is_animated(&self) -> bool {
        self.frame_count() > 1
    }

    /// ### English
    /// Size of the vertical frame strip, or `None` if it does not fit in `u32`.
    ///
    /// ### 中文
    /// 纵向帧条带的尺寸；超出 `u32` 范围时返回 `None`。
    fn strip_size(&self) -> Option<PhysicalSize<u32>> {
        let height = self.frame_height.checked_mul(self.frame_count())?;
        Some(PhysicalSize::new(self.width, height))
    }

    fn byte_len(size: PhysicalSize<u32>) -> Option<usize> {
        (size.width as usize)
            .checked_mul(size.height as usize)?
            .checked_mul(4)
    }

    fn is_consistent(&self) -> bool {
        self.width > 0
            && self.frame_height > 0
            && self
                .strip_size()
                .and_then(Self::byte_len)
                .is_some_and(|len| self.rgba.len() == len)
    }
}

/// ### English
/// Producer handle of the decoded-image queue. Never blocks; a full queue drops the image.
///
/// ### 中文
/// 已解码图片队列的生产者句柄；从不阻塞，队列满时丢弃图片。
#[derive(Clone)]
pub struct ImageSender {
    tx: Sender<DecodedImage>,
}

impl ImageSender {
    pub fn send(&self, image: DecodedImage) -> bool {
        match self.tx.try_send(image) {
            Ok(()) => true,
            Err(TrySendError::Full(image)) => {
                log::warn!("decoded image queue full; dropping {}", image.id);
                false
            }
            Err(TrySendError::Disconnected(image)) => {
                log::debug!("compositor gone; dropping decoded image {}", image.id);
                false
            }
        }
    }
}

/// ### English
/// Bounded multi-producer queue drained by the compositor thread.
///
/// ### 中文
/// 由合成线程消费的有界多生产者队列。
pub struct ImageQueue {
    tx: Sender<DecodedImage>,
    rx: Receiver<DecodedImage>,
}

impl Default for ImageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(QUEUE_CAPACITY);
        Self { tx, rx }
    }

    pub fn sender(&self) -> ImageSender {
        ImageSender {
            tx: self.tx.clone(),
        }
    }

    pub(crate) fn receiver(&self) -> &Receiver<DecodedImage> {
        &self.rx
    }
}

struct LoadedImage {
    texture: Texture,
    frame_height: u32,
    delays: Vec<Duration>,
    total: Duration,
    loaded_at: Instant,
}

impl LoadedImage {
    fn frame_index(&self, now: Instant) -> usize {
        if self.delays.len() < 2 || self.total.is_zero() {
            return 0;
        }
        let elapsed = now.saturating_duration_since(self.loaded_at);
        let mut remaining = Duration::from_nanos(
            (elapsed.as_nanos() % self.total.as_nanos()).min(u128::from(u64::MAX)) as u64,
        );
        for (index, delay) in self.delays.iter().enumerate() {
            if remaining < *delay {
                return index;
            }
            remaining -= *delay;
        }
        self.delays.len() - 1
    }
}

/// ### English
/// Drawable view of one image at one instant.
///
/// ### 中文
/// 某一时刻某张图片的可绘制视图。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageFrame {
    pub texture: TextureRef,
    /// ### English
    /// Size of a single frame.
    ///
    /// ### 中文
    /// 单帧尺寸。
    pub size: PhysicalSize<u32>,
    /// ### English
    /// Normalized texture rectangle of the current frame.
    ///
    /// ### 中文
    /// 当前帧的归一化纹理矩形。
    pub uv: RectF,
}

/// ### English
/// GPU textures of all uploaded images, owned by the compositor thread.
///
/// ### 中文
/// 所有已上传图片的 GPU 纹理，归合成线程所有。
#[derive(Default)]
pub struct ImageLibrary {
    images: HashMap<(ImageKind, String), LoadedImage>,
    uploads: u64,
}

impl ImageLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// ### English
    /// Uploads everything queued so far; the raw buffers are dropped afterwards. Returns the
    /// number of images uploaded.
    ///
    /// ### 中文
    /// 上传目前为止排队的全部图片，随后释放原始缓冲；返回上传的图片数量。
    pub fn drain(
        &mut self,
        device: &mut dyn GpuDevice,
        queue: &Receiver<DecodedImage>,
        now: Instant,
    ) -> usize {
        let mut uploaded = 0;
        for image in queue.try_iter() {
            if self.upload(device, image, now) {
                uploaded += 1;
            }
        }
        uploaded
    }

    fn upload(&mut self, device: &mut dyn GpuDevice, image: DecodedImage, now: Instant) -> bool {
        if !image.is_consistent() {
            log::warn!(
                "decoded image {} has {} bytes for {}x{}x{}; ignored",
                image.id,
                image.rgba.len(),
                image.width,
                image.frame_height,
                image.frame_count()
            );
            return false;
        }

        let Some(size) = image.strip_size() else {
            return false;
        };
        let key = (image.kind, image.id.clone());

        /*
        ### English
        Same size: update in place so the texture name stays stable.

        ### 中文
        尺寸相同则原地更新，保持纹理名不变。
        */
        if let Some(existing) = self.images.get_mut(&key)
            && existing.texture.size() == size
        {
            device.upload_texture(&existing.texture, &image.rgba);
            existing.frame_height = image.frame_height;
            existing.delays = frame_delays(&image.frame_delays_ms);
            existing.total = existing.delays.iter().sum();
            existing.loaded_at = now;
            self.uploads += 1;
            return true;
        }

        let texture = match device.create_texture(size, Some(&image.rgba)) {
            Ok(texture) => texture,
            Err(err) => {
                log::error!("image {} upload failed: {err}", image.id);
                return false;
            }
        };
        let delays = frame_delays(&image.frame_delays_ms);
        let loaded = LoadedImage {
            texture,
            frame_height: image.frame_height,
            total: delays.iter().sum(),
            delays,
            loaded_at: now,
        };
        if let Some(previous) = self.images.insert(key, loaded) {
            device.delete_texture(previous.texture);
        }
        self.uploads += 1;
        true
    }

    pub fn get(&self, kind: ImageKind, id: &str, now: Instant) -> Option<ImageFrame> {
        let image = self.images.get(&(kind, id.to_string()))?;
        let strip = image.texture.size();
        let frames = (strip.height / image.frame_height.max(1)).max(1);
        let index = image.frame_index(now).min(frames as usize - 1) as f32;
        let frame_v = 1.0 / frames as f32;
        Some(ImageFrame {
            texture: image.texture.view(),
            size: PhysicalSize::new(strip.width, image.frame_height),
            uv: RectF::new(0.0, index * frame_v, 1.0, frame_v),
        })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    /// ### English
    /// Texture names currently alive, for the texture-grid debug view.
    ///
    /// ### 中文
    /// 当前存活的纹理名，用于纹理网格调试视图。
    pub fn textures(&self) -> impl Iterator<Item = TextureRef> + '_ {
        self.images.values().map(|image| image.texture.view())
    }

    pub fn destroy(&mut self, device: &mut dyn GpuDevice) {
        for (_, image) in self.images.drain() {
            device.delete_texture(image.texture);
        }
    }
}

fn frame_delays(delays_ms: &[u32]) -> Vec<Duration> {
    delays_ms
        .iter()
        .map(|&ms| Duration::from_millis(u64::from(ms)).max(MIN_FRAME_DELAY))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::geometry::Rgba;
    use crate::engine::gpu::headless::HeadlessGpu;

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        rgba.repeat((width * height) as usize)
    }

    #[test]
    fn queued_images_are_uploaded_once() {
        let gpu = HeadlessGpu::new();
        let mut device = gpu.device();
        let queue = ImageQueue::new();
        let mut library = ImageLibrary::new();
        let now = Instant::now();

        assert!(queue.sender().send(DecodedImage::still(
            "logo",
            ImageKind::UserImage,
            2,
            2,
            solid(2, 2, [255, 0, 0, 255]),
        )));
        assert_eq!(library.drain(&mut device, queue.receiver(), now), 1);
        assert_eq!(library.drain(&mut device, queue.receiver(), now), 0);

        let frame = library.get(ImageKind::UserImage, "logo", now).expect("uploaded");
        assert_eq!(frame.size, PhysicalSize::new(2, 2));
        assert_eq!(frame.uv, RectF::UNIT);
        assert_eq!(
            gpu.texture_pixel(frame.texture.id, 1, 1),
            Some(Rgba::from_rgba8(255, 0, 0, 255))
        );
        assert!(library.get(ImageKind::Background, "logo", now).is_none());
    }

    #[test]
    fn reupload_keeps_texture_name_when_size_matches() {
        let gpu = HeadlessGpu::new();
        let mut device = gpu.device();
        let queue = ImageQueue::new();
        let mut library = ImageLibrary::new();
        let now = Instant::now();
        let sender = queue.sender();

        sender.send(DecodedImage::still("w", ImageKind::WindowOverlay, 1, 1, solid(1, 1, [0; 4])));
        library.drain(&mut device, queue.receiver(), now);
        let first = library.get(ImageKind::WindowOverlay, "w", now).expect("w");

        sender.send(DecodedImage::still("w", ImageKind::WindowOverlay, 1, 1, solid(1, 1, [9; 4])));
        library.drain(&mut device, queue.receiver(), now);
        let second = library.get(ImageKind::WindowOverlay, "w", now).expect("w");
        assert_eq!(first.texture.id, second.texture.id);

        sender.send(DecodedImage::still("w", ImageKind::WindowOverlay, 2, 1, solid(2, 1, [9; 4])));
        library.drain(&mut device, queue.receiver(), now);
        assert_eq!(gpu.texture_count(), 1);
    }

    #[test]
    fn animated_strip_advances_by_frame_delay() {
        let gpu = HeadlessGpu::new();
        let mut device = gpu.device();
        let queue = ImageQueue::new();
        let mut library = ImageLibrary::new();
        let start = Instant::now();

        let mut rgba = solid(1, 1, [255, 0, 0, 255]);
        rgba.extend(solid(1, 1, [0, 255, 0, 255]));
        queue.sender().send(DecodedImage {
            id: "spin".to_string(),
            kind: ImageKind::UserImage,
            rgba,
            width: 1,
            frame_height: 1,
            frame_delays_ms: vec![100, 100],
        });
        library.drain(&mut device, queue.receiver(), start);

        let at = |ms| {
            library
                .get(ImageKind::UserImage, "spin", start + Duration::from_millis(ms))
                .map(|frame| frame.uv.y)
        };
        assert_eq!(at(0), Some(0.0));
        assert_eq!(at(150), Some(0.5));
        assert_eq!(at(250), Some(0.0));
    }

    #[test]
    fn inconsistent_buffers_are_rejected() {
        let gpu = HeadlessGpu::new();
        let mut device = gpu.device();
        let queue = ImageQueue::new();
        let mut library = ImageLibrary::new();
        queue.sender().send(DecodedImage::still("bad", ImageKind::UserImage, 4, 4, vec![0; 3]));
        assert_eq!(library.drain(&mut device, queue.receiver(), Instant::now()), 0);
        assert!(library.is_empty());

        library.destroy(&mut device);
        assert_eq!(gpu.texture_count(), 0);
    }

    #[test]
    fn oversized_frame_strip_is_rejected() {
        let gpu = HeadlessGpu::new();
        let mut device = gpu.device();
        let queue = ImageQueue::new();
        let mut library = ImageLibrary::new();

        let mut tall = DecodedImage::still("tall", ImageKind::UserImage, 1, u32::MAX, vec![0; 4]);
        tall.frame_delays_ms = vec![100, 100];
        assert_eq!(tall.strip_size(), None);
        queue.sender().send(tall);

        let wide = DecodedImage::still("wide", ImageKind::UserImage, u32::MAX, u32::MAX, vec![0; 4]);
        queue.sender().send(wide);

        assert_eq!(library.drain(&mut device, queue.receiver(), Instant::now()), 0);
        assert!(library.is_empty());
        assert_eq!(gpu.texture_count(), 0);
    }
}
