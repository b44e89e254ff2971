//! The render surface component
//!
//! [`Renderer`] consumes a stream subscription on a dedicated worker
//! thread: decode JPEG, notify the recording sink, apply transforms,
//! fit to the surface, blit. Surface lifecycle is tracked independently
//! of the stream: while the surface is invalid frames are drained but
//! never blitted, and blitting resumes on the next frame once the
//! surface comes back, without a new `set_source` call.

use crate::fps::{FpsCounter, FpsOverlay};
use crate::sink::FrameSink;
use crate::surface::DrawSurface;
use crate::transform::{dest_rect, TransformState};
use camview_core::{DisplayMode, Error, Frame, Result, StreamingState, ViewerConfig};
use camview_stream::{CancelHandle, Subscription};
use image::{imageops, RgbaImage};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Consecutive decode failures before the stream is flagged as degraded
const DEGRADED_AFTER: u32 = 10;

struct SurfaceStatus {
    valid: bool,
    width: u32,
    height: u32,
}

struct Inner<S: DrawSurface> {
    surface: Mutex<S>,
    // lock order: lifecycle before surface
    lifecycle: Mutex<SurfaceStatus>,
    running: AtomicBool,
    transform: Mutex<TransformState>,
    display_mode: Mutex<DisplayMode>,
    show_fps: AtomicBool,
    background: Mutex<[u8; 4]>,
    overlay: Mutex<FpsOverlay>,
    resolution: Mutex<Option<(u32, u32)>>,
    sink: Mutex<Option<Arc<dyn FrameSink>>>,
    last_image: Mutex<Option<RgbaImage>>,
    consecutive_decode_failures: AtomicU32,
    degraded: AtomicBool,
}

/// Drives decoded frames onto a [`DrawSurface`]
pub struct Renderer<S: DrawSurface + 'static> {
    inner: Arc<Inner<S>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: Mutex<Option<CancelHandle>>,
    stream_state: Mutex<Option<watch::Receiver<StreamingState>>>,
}

impl<S: DrawSurface + 'static> Renderer<S> {
    pub fn new(surface: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                surface: Mutex::new(surface),
                lifecycle: Mutex::new(SurfaceStatus {
                    valid: false,
                    width: 0,
                    height: 0,
                }),
                running: AtomicBool::new(false),
                transform: Mutex::new(TransformState::default()),
                display_mode: Mutex::new(DisplayMode::default()),
                show_fps: AtomicBool::new(false),
                background: Mutex::new([0, 0, 0, 255]),
                overlay: Mutex::new(FpsOverlay::default()),
                resolution: Mutex::new(None),
                sink: Mutex::new(None),
                last_image: Mutex::new(None),
                consecutive_decode_failures: AtomicU32::new(0),
                degraded: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
            cancel: Mutex::new(None),
            stream_state: Mutex::new(None),
        }
    }

    /// Apply the shell's presentation settings in one call
    pub fn apply_viewer_config(&self, config: &ViewerConfig) {
        self.set_display_mode(config.display_mode);
        self.show_fps(config.show_fps);
        self.flip_horizontal(config.flip_horizontal);
        self.flip_vertical(config.flip_vertical);
        self.set_rotate(config.rotate_degrees);
    }

    /// Start consuming frames from a subscription.
    ///
    /// Replaces any active source; the previous playback is stopped
    /// first. Fails if the worker thread cannot be spawned, leaving the
    /// renderer stopped.
    pub fn set_source(&self, subscription: Subscription) -> Result<()> {
        self.stop_playback();

        *self.cancel.lock().unwrap() = Some(subscription.cancel_handle());
        *self.stream_state.lock().unwrap() = Some(subscription.state_watch());
        self.inner.running.store(true, Ordering::Release);
        self.inner.degraded.store(false, Ordering::Release);
        self.inner
            .consecutive_decode_failures
            .store(0, Ordering::Release);

        let inner = self.inner.clone();
        let handle = match thread::Builder::new()
            .name("camview-render".into())
            .spawn(move || run_render_loop(inner, subscription))
        {
            Ok(handle) => handle,
            Err(e) => {
                // dropping the closure dropped the subscription, which
                // cancels the session
                self.inner.running.store(false, Ordering::Release);
                self.cancel.lock().unwrap().take();
                return Err(Error::Resource(format!(
                    "failed to spawn render thread: {}",
                    e
                )));
            }
        };
        *self.worker.lock().unwrap() = Some(handle);
        info!("playback started");
        Ok(())
    }

    /// Stop playback and release the stream. Idempotent; never races an
    /// in-flight frame: the worker either finishes or abandons it before
    /// this returns.
    pub fn stop_playback(&self) {
        self.inner.running.store(false, Ordering::Release);
        if let Some(cancel) = self.cancel.lock().unwrap().take() {
            cancel.cancel();
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            if handle.join().is_err() {
                warn!("render thread panicked");
            }
            info!("playback stopped");
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Latest observed session state, if a source is attached
    pub fn stream_state(&self) -> Option<StreamingState> {
        self.stream_state
            .lock()
            .unwrap()
            .as_ref()
            .map(|rx| rx.borrow().clone())
    }

    /// Repeated decode failures were observed on the current stream
    pub fn is_degraded(&self) -> bool {
        self.inner.degraded.load(Ordering::Acquire)
    }

    pub fn set_display_mode(&self, mode: DisplayMode) {
        *self.inner.display_mode.lock().unwrap() = mode;
    }

    pub fn show_fps(&self, show: bool) {
        self.inner.show_fps.store(show, Ordering::Release);
    }

    pub fn flip_horizontal(&self, flip: bool) {
        self.inner.transform.lock().unwrap().flip_horizontal = flip;
    }

    pub fn flip_vertical(&self, flip: bool) {
        self.inner.transform.lock().unwrap().flip_vertical = flip;
    }

    pub fn set_rotate(&self, degrees: f32) {
        self.inner.transform.lock().unwrap().rotate_degrees = degrees;
    }

    pub fn flip_source(&self, flip: bool) {
        self.inner.transform.lock().unwrap().source_flip = flip;
    }

    /// Fixed decode target; every frame is scaled to this size right
    /// after decoding
    pub fn set_resolution(&self, width: u32, height: u32) {
        *self.inner.resolution.lock().unwrap() = Some((width, height));
    }

    pub fn set_background_color(&self, color: [u8; 4]) {
        *self.inner.background.lock().unwrap() = color;
    }

    pub fn set_fps_overlay_colors(&self, text: [u8; 4], background: [u8; 4]) {
        let mut overlay = self.inner.overlay.lock().unwrap();
        overlay.text_color = text;
        overlay.background_color = background;
    }

    /// Register the per-frame recording consumer
    pub fn set_frame_sink(&self, sink: Arc<dyn FrameSink>) {
        *self.inner.sink.lock().unwrap() = Some(sink);
    }

    /// Release the last decoded pixel buffer; call when backgrounded
    pub fn free_camera_memory(&self) {
        self.inner.last_image.lock().unwrap().take();
    }

    /// Paint the surface with the background color, if it is valid
    pub fn clear_surface(&self) {
        let lifecycle = self.inner.lifecycle.lock().unwrap();
        if lifecycle.valid {
            let background = *self.inner.background.lock().unwrap();
            self.inner.surface.lock().unwrap().clear(background);
        }
    }

    /// Inspect the owned surface
    pub fn with_surface<T>(&self, f: impl FnOnce(&S) -> T) -> T {
        f(&self.inner.surface.lock().unwrap())
    }

    // Surface lifecycle, reported by the hosting shell. These are the
    // renderer's only source of surface validity.

    pub fn on_surface_created(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().unwrap();
        lifecycle.valid = true;
        debug!("surface created");
    }

    pub fn on_surface_changed(&self, width: u32, height: u32) {
        let mut lifecycle = self.inner.lifecycle.lock().unwrap();
        lifecycle.valid = true;
        lifecycle.width = width;
        lifecycle.height = height;
        debug!("surface changed to {}x{}", width, height);
    }

    /// Blocks until any in-flight blit has finished; afterwards no pixel
    /// is written until the surface is created again. Playback itself
    /// continues, draining frames.
    pub fn on_surface_destroyed(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().unwrap();
        lifecycle.valid = false;
        debug!("surface destroyed");
    }
}

impl<S: DrawSurface + 'static> Drop for Renderer<S> {
    fn drop(&mut self) {
        self.stop_playback();
    }
}

/// Worker loop: single consumer, at most one in-flight blit
fn run_render_loop<S: DrawSurface>(inner: Arc<Inner<S>>, mut subscription: Subscription) {
    let mut fps = FpsCounter::new();
    let mut badge: Option<RgbaImage> = None;

    while inner.running.load(Ordering::Acquire) {
        let Some(item) = subscription.recv() else {
            debug!("frame channel closed");
            break;
        };
        match item {
            Ok(frame) => render_frame(&inner, &frame, &mut fps, &mut badge),
            Err(e) => {
                warn!("stream ended: {}", e);
                break;
            }
        }
    }

    inner.running.store(false, Ordering::Release);
    // dropping the subscription cancels the session
}

fn render_frame<S: DrawSurface>(
    inner: &Inner<S>,
    frame: &Frame,
    fps: &mut FpsCounter,
    badge: &mut Option<RgbaImage>,
) {
    // decode; a single corrupt frame is dropped, not fatal
    let decoded = match image::load_from_memory_with_format(frame.data(), image::ImageFormat::Jpeg)
    {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            warn!("dropping undecodable frame {}: {}", frame.sequence, e);
            let failures = inner
                .consecutive_decode_failures
                .fetch_add(1, Ordering::AcqRel)
                + 1;
            if failures == DEGRADED_AFTER {
                warn!(
                    "{} consecutive decode failures, stream is degraded",
                    failures
                );
                inner.degraded.store(true, Ordering::Release);
            }
            return;
        }
    };
    inner
        .consecutive_decode_failures
        .store(0, Ordering::Release);

    // fixed decode target, when configured
    let decoded = match *inner.resolution.lock().unwrap() {
        Some((w, h)) if (decoded.width(), decoded.height()) != (w, h) => {
            imageops::resize(&decoded, w, h, imageops::FilterType::Triangle)
        }
        _ => decoded,
    };

    // recording sink sees every decoded frame, display state or not
    if let Some(sink) = inner.sink.lock().unwrap().clone() {
        sink.on_frame(frame.data(), frame.sequence);
        sink.on_image(&decoded);
    }

    // transform snapshot: mutations apply from the next frame on
    let transform = *inner.transform.lock().unwrap();
    let image = if transform.is_identity() {
        decoded
    } else {
        transform.apply(decoded)
    };

    // holding the lifecycle lock across the blit keeps
    // on_surface_destroyed ordered against the in-flight frame
    let lifecycle = inner.lifecycle.lock().unwrap();
    if !lifecycle.valid || lifecycle.width == 0 || lifecycle.height == 0 {
        debug!("surface not available, dropping frame {}", frame.sequence);
        return;
    }

    let mode = *inner.display_mode.lock().unwrap();
    let rect = dest_rect(
        mode,
        image.width(),
        image.height(),
        lifecycle.width,
        lifecycle.height,
    );
    let scaled = if (image.width(), image.height()) != (rect.width, rect.height) {
        imageops::resize(&image, rect.width, rect.height, imageops::FilterType::Triangle)
    } else {
        image
    };

    if !inner.running.load(Ordering::Acquire) {
        // cancelled mid-frame: abandon cleanly, nothing written
        return;
    }

    {
        let mut surface = inner.surface.lock().unwrap();
        surface.clear(*inner.background.lock().unwrap());
        surface.blit(rect.x, rect.y, &scaled);

        if inner.show_fps.load(Ordering::Acquire) {
            if let Some(figure) = fps.tick() {
                *badge = Some(inner.overlay.lock().unwrap().render(figure));
            }
            if let Some(overlay) = badge.as_ref() {
                let x = rect.x + rect.width as i64 - overlay.width() as i64;
                let y = rect.y + rect.height as i64 - overlay.height() as i64;
                surface.blit(x, y, overlay);
            }
        } else {
            fps.tick();
        }
    }

    *inner.last_image.lock().unwrap() = Some(scaled);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::BufferSurface;
    use camview_stream::FrameSender;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn jpeg_of(color: [u8; 3], width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Jpeg)
            .unwrap();
        out.into_inner()
    }

    fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(15));
        }
        false
    }

    fn close_to(pixel: [u8; 4], color: [u8; 3]) -> bool {
        pixel[0].abs_diff(color[0]) < 40
            && pixel[1].abs_diff(color[1]) < 40
            && pixel[2].abs_diff(color[2]) < 40
    }

    fn streaming_renderer() -> (Renderer<BufferSurface>, FrameSender) {
        let renderer = Renderer::new(BufferSurface::new(64, 64));
        let (sender, subscription) = Subscription::in_process(8);
        renderer.set_source(subscription).unwrap();
        (renderer, sender)
    }

    fn send(sender: &FrameSender, jpeg: Vec<u8>, sequence: u64) {
        assert!(sender.send(Frame::new(jpeg, sequence)));
    }

    #[test]
    fn test_blits_frame_when_surface_valid() {
        let (renderer, sender) = streaming_renderer();
        renderer.set_display_mode(DisplayMode::Fullscreen);
        renderer.on_surface_created();
        renderer.on_surface_changed(64, 64);

        send(&sender, jpeg_of([220, 10, 10], 64, 64), 0);
        assert!(wait_until(Duration::from_secs(3), || {
            close_to(renderer.with_surface(|s| s.pixel(32, 32)), [220, 10, 10])
        }));

        drop(sender);
        renderer.stop_playback();
    }

    #[test]
    fn test_surface_destroyed_drains_then_resumes_on_recreate() {
        let (renderer, sender) = streaming_renderer();
        renderer.set_display_mode(DisplayMode::Fullscreen);
        renderer.on_surface_created();
        renderer.on_surface_changed(64, 64);

        send(&sender, jpeg_of([220, 10, 10], 64, 64), 0);
        assert!(wait_until(Duration::from_secs(3), || {
            close_to(renderer.with_surface(|s| s.pixel(32, 32)), [220, 10, 10])
        }));

        renderer.on_surface_destroyed();
        send(&sender, jpeg_of([10, 220, 10], 64, 64), 1);
        thread::sleep(Duration::from_millis(200));
        // the green frame was drained, not drawn
        assert!(close_to(
            renderer.with_surface(|s| s.pixel(32, 32)),
            [220, 10, 10]
        ));
        assert!(renderer.is_streaming());

        // no new set_source needed after the surface comes back
        renderer.on_surface_created();
        send(&sender, jpeg_of([10, 10, 220], 64, 64), 2);
        assert!(wait_until(Duration::from_secs(3), || {
            close_to(renderer.with_surface(|s| s.pixel(32, 32)), [10, 10, 220])
        }));

        drop(sender);
        renderer.stop_playback();
    }

    #[test]
    fn test_best_fit_letterboxes_against_background() {
        let (renderer, sender) = streaming_renderer();
        renderer.set_display_mode(DisplayMode::BestFit);
        renderer.on_surface_created();
        renderer.on_surface_changed(64, 64);

        // 2:1 frame on a square surface: bands above and below
        send(&sender, jpeg_of([220, 10, 10], 32, 16), 0);
        assert!(wait_until(Duration::from_secs(3), || {
            close_to(renderer.with_surface(|s| s.pixel(32, 32)), [220, 10, 10])
        }));
        assert_eq!(renderer.with_surface(|s| s.pixel(32, 4)), [0, 0, 0, 255]);
        assert_eq!(renderer.with_surface(|s| s.pixel(32, 60)), [0, 0, 0, 255]);

        drop(sender);
        renderer.stop_playback();
    }

    struct CountingSink {
        frames: AtomicUsize,
        images: AtomicUsize,
    }

    impl FrameSink for CountingSink {
        fn on_frame(&self, jpeg: &[u8], _sequence: u64) {
            assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
            self.frames.fetch_add(1, Ordering::SeqCst);
        }

        fn on_image(&self, _image: &RgbaImage) {
            self.images.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_sink_receives_frames_while_surface_invalid() {
        let (renderer, sender) = streaming_renderer();
        let sink = Arc::new(CountingSink {
            frames: AtomicUsize::new(0),
            images: AtomicUsize::new(0),
        });
        renderer.set_frame_sink(sink.clone());
        // surface never created: display is dropped, recording is not

        send(&sender, jpeg_of([220, 10, 10], 16, 16), 0);
        send(&sender, jpeg_of([10, 220, 10], 16, 16), 1);
        assert!(wait_until(Duration::from_secs(3), || {
            sink.frames.load(Ordering::SeqCst) == 2 && sink.images.load(Ordering::SeqCst) == 2
        }));
        assert!(renderer.is_streaming());

        drop(sender);
        renderer.stop_playback();
    }

    #[test]
    fn test_corrupt_frame_skipped_without_stopping_playback() {
        let (renderer, sender) = streaming_renderer();
        renderer.set_display_mode(DisplayMode::Fullscreen);
        renderer.on_surface_created();
        renderer.on_surface_changed(64, 64);

        send(&sender, b"definitely not a jpeg".to_vec(), 0);
        send(&sender, jpeg_of([220, 10, 10], 64, 64), 1);
        assert!(wait_until(Duration::from_secs(3), || {
            close_to(renderer.with_surface(|s| s.pixel(32, 32)), [220, 10, 10])
        }));
        assert!(renderer.is_streaming());
        assert!(!renderer.is_degraded());

        drop(sender);
        renderer.stop_playback();
    }

    #[test]
    fn test_repeated_decode_failures_flag_degraded_without_stopping() {
        let (renderer, sender) = streaming_renderer();
        renderer.on_surface_created();
        renderer.on_surface_changed(64, 64);

        for i in 0..10 {
            send(&sender, b"not a jpeg".to_vec(), i);
        }
        assert!(wait_until(Duration::from_secs(3), || renderer.is_degraded()));
        assert!(renderer.is_streaming());

        // a degraded stream still decodes and blits whatever arrives
        renderer.set_display_mode(DisplayMode::Fullscreen);
        send(&sender, jpeg_of([220, 10, 10], 64, 64), 10);
        assert!(wait_until(Duration::from_secs(3), || {
            close_to(renderer.with_surface(|s| s.pixel(32, 32)), [220, 10, 10])
        }));

        drop(sender);
        renderer.stop_playback();
    }

    #[test]
    fn test_decode_failure_count_resets_on_good_frame() {
        let (renderer, sender) = streaming_renderer();
        renderer.set_display_mode(DisplayMode::Fullscreen);
        renderer.on_surface_created();
        renderer.on_surface_changed(64, 64);

        let failures = || {
            renderer
                .inner
                .consecutive_decode_failures
                .load(Ordering::SeqCst)
        };

        for i in 0..9 {
            send(&sender, b"garbage".to_vec(), i);
        }
        assert!(wait_until(Duration::from_secs(3), || failures() == 9));

        send(&sender, jpeg_of([220, 10, 10], 64, 64), 9);
        assert!(wait_until(Duration::from_secs(3), || failures() == 0));

        for i in 10..19 {
            send(&sender, b"garbage".to_vec(), i);
        }
        assert!(wait_until(Duration::from_secs(3), || failures() == 9));
        assert!(!renderer.is_degraded());
        assert!(renderer.is_streaming());

        drop(sender);
        renderer.stop_playback();
    }

    #[test]
    fn test_set_resolution_rescales_decoded_frames() {
        let (renderer, sender) = streaming_renderer();
        renderer.set_display_mode(DisplayMode::BestFit);
        renderer.set_resolution(32, 16);
        renderer.on_surface_created();
        renderer.on_surface_changed(64, 64);

        // square input forced to 2:1 before fitting: the letterbox bands
        // can only come from the decode-target rescale
        send(&sender, jpeg_of([220, 10, 10], 64, 64), 0);
        assert!(wait_until(Duration::from_secs(3), || {
            close_to(renderer.with_surface(|s| s.pixel(32, 32)), [220, 10, 10])
        }));
        assert_eq!(renderer.with_surface(|s| s.pixel(32, 4)), [0, 0, 0, 255]);
        assert_eq!(renderer.with_surface(|s| s.pixel(32, 60)), [0, 0, 0, 255]);

        drop(sender);
        renderer.stop_playback();
    }

    #[test]
    fn test_stop_playback_is_idempotent() {
        let (renderer, sender) = streaming_renderer();
        renderer.on_surface_created();
        renderer.on_surface_changed(64, 64);

        drop(sender);
        renderer.stop_playback();
        renderer.stop_playback();
        assert!(!renderer.is_streaming());
    }

    #[test]
    fn test_terminal_stream_error_ends_playback() {
        let (renderer, sender) = streaming_renderer();
        renderer.on_surface_created();
        renderer.on_surface_changed(64, 64);

        sender.fail(camview_core::Error::Protocol("resync gave up".into()));
        assert!(wait_until(Duration::from_secs(3), || !renderer.is_streaming()));
    }

    #[test]
    fn test_free_camera_memory_releases_cached_frame() {
        let (renderer, sender) = streaming_renderer();
        renderer.set_display_mode(DisplayMode::Fullscreen);
        renderer.on_surface_created();
        renderer.on_surface_changed(64, 64);

        send(&sender, jpeg_of([220, 10, 10], 64, 64), 0);
        assert!(wait_until(Duration::from_secs(3), || {
            renderer.inner.last_image.lock().unwrap().is_some()
        }));
        renderer.free_camera_memory();
        assert!(renderer.inner.last_image.lock().unwrap().is_none());

        drop(sender);
        renderer.stop_playback();
    }
}
