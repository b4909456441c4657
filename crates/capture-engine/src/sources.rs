//! Live frame sources.
//!
//! [`GstFrameSource`] captures the X11 display or a V4L2 camera into RGBA
//! frames. [`SyntheticSource`] produces test patterns without any device.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use pipcast_common::error::{PipcastError, PipcastResult};
use pipcast_media_model::{FrameSource, SourceKind, VideoFrame};

use crate::gst_support::{escape_value, init_gstreamer, wait_for_playing};

/// Latest-frame slot shared between a capture thread and readers.
#[derive(Default)]
struct FrameSlot {
    frame: Mutex<Option<VideoFrame>>,
    sequence: AtomicU64,
    live: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl FrameSlot {
    fn publish(&self, width: u32, height: u32, pixels: Vec<u8>) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        match VideoFrame::new(width, height, sequence, pixels) {
            Ok(frame) => {
                if let Ok(mut slot) = self.frame.lock() {
                    *slot = Some(frame);
                }
                self.live.store(true, Ordering::SeqCst);
            }
            Err(e) => self.fail(e.to_string()),
        }
    }

    fn fail(&self, message: String) {
        self.live.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = Some(message);
        }
    }

    fn is_ready(&self) -> bool {
        self.live.load(Ordering::SeqCst) && self.latest().is_some()
    }

    fn latest(&self) -> Option<VideoFrame> {
        self.frame.lock().ok().and_then(|slot| slot.clone())
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|slot| slot.clone())
    }
}

/// A GStreamer capture pipeline ending in an RGBA appsink.
pub struct GstFrameSource {
    kind: SourceKind,
    pipeline: gst::Pipeline,
    slot: Arc<FrameSlot>,
}

impl GstFrameSource {
    /// Capture the X11 display.
    pub fn display(show_pointer: bool) -> PipcastResult<Self> {
        let launch = format!(
            "ximagesrc use-damage=false show-pointer={show_pointer} ! queue max-size-buffers=4 leaky=downstream ! {RGBA_TAIL}"
        );
        Self::from_launch(SourceKind::Display, &launch)
    }

    /// Capture a camera. `device` defaults to the best detected V4L2 node.
    pub fn camera(device: Option<&str>) -> PipcastResult<Self> {
        let device = match device {
            Some(device) => device.to_string(),
            None => detect_default_webcam_device().ok_or_else(|| {
                PipcastError::capture(
                    "No webcam device found (expected /dev/video0 or another /dev/video* node)",
                )
            })?,
        };
        let launch = format!(
            "v4l2src device=\"{}\" ! queue max-size-buffers=4 leaky=downstream ! {RGBA_TAIL}",
            escape_value(&device)
        );
        Self::from_launch(SourceKind::Camera, &launch)
    }

    /// Build a source from an arbitrary launch string whose final element is
    /// an appsink named `sink`.
    pub fn from_launch(kind: SourceKind, launch: &str) -> PipcastResult<Self> {
        init_gstreamer()?;

        let pipeline = gst::parse::launch(launch)
            .map_err(|e| PipcastError::capture(format!("Failed to build {} pipeline: {e}", kind.as_str())))?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| PipcastError::capture("Launch string did not produce a pipeline"))?;
        let appsink = pipeline
            .by_name("sink")
            .and_then(|e| e.downcast::<gst_app::AppSink>().ok())
            .ok_or_else(|| PipcastError::capture(format!("{} pipeline has no appsink", kind.as_str())))?;

        let slot = Arc::new(FrameSlot::default());
        let sample_slot = slot.clone();
        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let (width, height) = sample
                        .caps()
                        .and_then(|caps| caps.structure(0))
                        .and_then(|s| Some((s.get::<i32>("width").ok()?, s.get::<i32>("height").ok()?)))
                        .ok_or(gst::FlowError::NotNegotiated)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                    sample_slot.publish(width.max(0) as u32, height.max(0) as u32, map.as_slice().to_vec());
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        if let Some(bus) = pipeline.bus() {
            let error_slot = slot.clone();
            bus.set_sync_handler(move |_bus, msg| {
                match msg.view() {
                    gst::MessageView::Error(err) => {
                        tracing::warn!(source = kind.as_str(), error = %err.error(), "Capture source error");
                        error_slot.fail(err.error().to_string());
                    }
                    gst::MessageView::Eos(_) => {
                        error_slot.fail(format!("{} source ended", kind.as_str()));
                    }
                    _ => {}
                }
                gst::BusSyncReply::Drop
            });
        }

        pipeline.set_state(gst::State::Playing).map_err(|e| {
            let _ = pipeline.set_state(gst::State::Null);
            PipcastError::capture(format!("Failed to start {} pipeline: {e:?}", kind.as_str()))
        })?;
        wait_for_playing(&pipeline, kind.as_str(), gst::ClockTime::from_seconds(10))?;
        tracing::info!(source = kind.as_str(), "Capture source started");

        Ok(Self {
            kind,
            pipeline,
            slot,
        })
    }

    /// Block until the first frame arrives or `timeout` elapses.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if self.slot.is_ready() {
                return true;
            }
            if self.slot.last_error().is_some() {
                return false;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        self.slot.is_ready()
    }
}

impl FrameSource for GstFrameSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn is_ready(&self) -> bool {
        self.slot.is_ready()
    }

    fn latest_frame(&self) -> Option<VideoFrame> {
        self.slot.latest()
    }

    fn last_error(&self) -> Option<String> {
        self.slot.last_error()
    }
}

impl Drop for GstFrameSource {
    fn drop(&mut self) {
        if let Some(bus) = self.pipeline.bus() {
            bus.unset_sync_handler();
        }
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            tracing::warn!(source = self.kind.as_str(), error = ?e, "Failed to stop capture source");
        }
    }
}

const RGBA_TAIL: &str =
    "videoconvert ! videoscale ! video/x-raw,format=RGBA ! appsink name=sink max-buffers=1 drop=true sync=false";

/// A device-free source for tests and dry runs.
pub struct SyntheticSource {
    kind: SourceKind,
    slot: FrameSlot,
}

impl SyntheticSource {
    /// A source that is not ready until a frame is pushed.
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            slot: FrameSlot::default(),
        }
    }

    /// A ready source already holding one test-pattern frame.
    pub fn with_pattern(kind: SourceKind, width: u32, height: u32) -> Self {
        let source = Self::new(kind);
        source.advance(width, height);
        source
    }

    /// Publish a frame. Its sequence is replaced with the source's own.
    pub fn push_frame(&self, frame: &VideoFrame) {
        self.slot
            .publish(frame.width(), frame.height(), frame.pixels().to_vec());
    }

    /// Publish the next test-pattern frame.
    pub fn advance(&self, width: u32, height: u32) {
        let step = self.slot.sequence.load(Ordering::SeqCst) + 1;
        let frame = test_pattern(self.kind, width, height, step);
        self.push_frame(&frame);
    }

    /// Simulate a device failure.
    pub fn fail(&self, message: impl Into<String>) {
        self.slot.fail(message.into());
    }

    /// Regenerate the pattern at `fps` until the returned handle is aborted.
    pub fn animate(
        self: &Arc<Self>,
        width: u32,
        height: u32,
        fps: u32,
    ) -> tokio::task::JoinHandle<()> {
        let source = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pipcast_common::clock::frame_interval(fps));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                source.advance(width, height);
            }
        })
    }
}

impl FrameSource for SyntheticSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn is_ready(&self) -> bool {
        self.slot.is_ready()
    }

    fn latest_frame(&self) -> Option<VideoFrame> {
        self.slot.latest()
    }

    fn last_error(&self) -> Option<String> {
        self.slot.last_error()
    }
}

/// Display: grey grid with a marker sweeping horizontally.
/// Camera: warm gradient with a marker sweeping vertically.
pub fn test_pattern(kind: SourceKind, width: u32, height: u32, step: u64) -> VideoFrame {
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    let grid = 32u32;
    for y in 0..height {
        for x in 0..width {
            let px = match kind {
                SourceKind::Display => {
                    let marker = width > 0 && x == (step % width as u64) as u32;
                    if marker {
                        [255, 80, 80, 255]
                    } else if x % grid == 0 || y % grid == 0 {
                        [90, 90, 100, 255]
                    } else {
                        [30, 30, 35, 255]
                    }
                }
                SourceKind::Camera => {
                    let marker = height > 0 && y == (step % height as u64) as u32;
                    if marker {
                        [80, 255, 80, 255]
                    } else {
                        let r = (x * 255 / width.max(1)) as u8;
                        let g = (y * 255 / height.max(1)) as u8;
                        [r, g, 160, 255]
                    }
                }
            };
            pixels.extend_from_slice(&px);
        }
    }
    match VideoFrame::new(width, height, step, pixels) {
        Ok(frame) => frame,
        Err(_) => VideoFrame::solid(width, height, step, [0, 0, 0, 255]),
    }
}

/// Pick the most webcam-like V4L2 node.
fn detect_default_webcam_device() -> Option<String> {
    let mut candidates: Vec<(String, u32)> = (0..16u32)
        .filter_map(|idx| {
            let dev_path = format!("/dev/video{idx}");
            std::path::Path::new(&dev_path)
                .exists()
                .then(|| {
                    let priority = webcam_device_priority(idx, &dev_path);
                    (dev_path, priority)
                })
        })
        .collect();

    // Stable sort keeps lower indices first among equal priorities.
    candidates.sort_by(|a, b| b.1.cmp(&a.1));
    let (device, priority) = candidates.into_iter().next()?;
    tracing::info!(device = %device, priority, "Selected webcam device");
    Some(device)
}

/// Score a V4L2 device from its sysfs name. Zero means definitely not a webcam.
fn webcam_device_priority(idx: u32, dev_path: &str) -> u32 {
    let name_path = format!("/sys/class/video4linux/video{idx}/name");
    let device_name = std::fs::read_to_string(name_path)
        .unwrap_or_default()
        .to_lowercase();
    score_device_name(&device_name, dev_path)
}

fn score_device_name(device_name: &str, dev_path: &str) -> u32 {
    const WEBCAM: &[&str] = &[
        "webcam", "camera", "cam", "facetime", "logitech", "v4l2loopback",
    ];
    const NOT_WEBCAM: &[&str] = &[
        "tuner", "tv", "dvb", "hdmi", "capture", "encoder", "decoder",
    ];

    if NOT_WEBCAM.iter().any(|kw| device_name.contains(kw)) {
        tracing::debug!(device = dev_path, name = %device_name, "Skipping non-webcam V4L2 device");
        return 0;
    }
    if WEBCAM.iter().any(|kw| device_name.contains(kw)) {
        80
    } else {
        10
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_is_not_ready_until_first_frame() {
        let source = SyntheticSource::new(SourceKind::Camera);
        assert!(!source.is_ready());
        assert!(source.latest_frame().is_none());

        source.advance(8, 6);
        assert!(source.is_ready());
        let frame = source.latest_frame().unwrap();
        assert_eq!((frame.width(), frame.height(), frame.sequence()), (8, 6, 1));
    }

    #[test]
    fn synthetic_sequence_increments_per_frame() {
        let source = SyntheticSource::with_pattern(SourceKind::Display, 4, 4);
        source.push_frame(&VideoFrame::solid(4, 4, 99, [1, 2, 3, 255]));
        let frame = source.latest_frame().unwrap();
        assert_eq!(frame.sequence(), 2);
        assert_eq!(frame.pixel(0, 0), Some([1, 2, 3, 255]));
    }

    #[test]
    fn failure_clears_readiness_and_records_error() {
        let source = SyntheticSource::with_pattern(SourceKind::Camera, 4, 4);
        source.fail("camera unplugged");
        assert!(!source.is_ready());
        assert_eq!(source.last_error().as_deref(), Some("camera unplugged"));

        source.advance(4, 4);
        assert!(source.is_ready());
    }

    #[test]
    fn test_pattern_has_requested_size() {
        let frame = test_pattern(SourceKind::Display, 64, 36, 5);
        assert_eq!(frame.pixels().len(), 64 * 36 * 4);
        assert_eq!(frame.pixel(5, 1), Some([255, 80, 80, 255]));
    }

    #[test]
    fn device_names_are_scored() {
        assert_eq!(score_device_name("hd pro webcam c920", "/dev/video0"), 80);
        assert_eq!(score_device_name("hdmi capture", "/dev/video2"), 0);
        assert_eq!(score_device_name("uvc device", "/dev/video4"), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn animated_source_keeps_producing_frames() {
        let source = Arc::new(SyntheticSource::new(SourceKind::Display));
        let handle = source.animate(8, 8, 30);
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();
        let frame = source.latest_frame().unwrap();
        assert!(frame.sequence() >= 3);
    }
}
