//! Capture stream encoder.
//!
//! Turns composited frames into a continuous WebM byte stream, optionally
//! multiplexing a microphone track. Encoded output arrives as
//! [`EncoderEvent`]s on a single ordered channel.

use std::sync::Arc;

use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use pipcast_common::error::{PipcastError, PipcastResult};
use pipcast_media_model::VideoFrame;
use tokio::sync::mpsc;

use crate::gst_support::{init_gstreamer, wait_for_playing};

/// Frame rate of the encoded stream.
pub const CAPTURE_FPS: u32 = 30;

/// Output of a running encoder, in production order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderEvent {
    /// A slice of the encoded stream. Boundaries carry no meaning.
    Chunk(Vec<u8>),
    /// End of stream reached; no further chunks follow.
    Finished,
    /// The encoder failed; the session cannot continue.
    Failed(String),
}

/// Sender half handed to an encoder when it starts.
pub type EncoderEvents = mpsc::UnboundedSender<EncoderEvent>;

/// A microphone described as a GStreamer source fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicrophoneInput {
    source: String,
}

impl MicrophoneInput {
    /// Use an explicit source fragment, e.g. `pulsesrc device=alsa_input.usb-0`.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// The session's default input device.
    pub fn default_device() -> Self {
        Self::new("pulsesrc do-timestamp=true")
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Fixed parameters of one encoded stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub microphone: Option<MicrophoneInput>,
}

/// Accepts composited frames for encoding.
pub trait FrameSink: Send {
    fn push(&mut self, frame: &VideoFrame) -> PipcastResult<()>;
}

/// A stream encoder driven by the recording controller.
pub trait StreamEncoder: Send {
    /// Build and start the pipeline. Output is delivered on `events`.
    fn start(
        &mut self,
        settings: &EncoderSettings,
        events: EncoderEvents,
    ) -> PipcastResult<Box<dyn FrameSink>>;

    /// Signal end of stream. Remaining chunks are flushed, then
    /// [`EncoderEvent::Finished`] is sent.
    fn finish(&mut self) -> PipcastResult<()>;

    /// Release all resources. Also used to abort a stream.
    fn shutdown(&mut self);
}

/// GStreamer-backed VP8/Opus WebM encoder.
#[derive(Default)]
pub struct GstStreamEncoder {
    running: Option<RunningPipeline>,
}

struct RunningPipeline {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
}

impl GstStreamEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamEncoder for GstStreamEncoder {
    fn start(
        &mut self,
        settings: &EncoderSettings,
        events: EncoderEvents,
    ) -> PipcastResult<Box<dyn FrameSink>> {
        if self.running.is_some() {
            return Err(PipcastError::encoder("Encoder already running"));
        }
        if settings.width == 0 || settings.height == 0 || settings.fps == 0 {
            return Err(PipcastError::encoder(format!(
                "Invalid encoder settings {}x{}@{}",
                settings.width, settings.height, settings.fps
            )));
        }
        init_gstreamer()?;

        let launch = encoder_launch(settings);
        tracing::debug!(launch = %launch, "Building encoder pipeline");
        let pipeline = gst::parse::launch(&launch)
            .map_err(|e| PipcastError::encoder(format!("Failed to build encoder pipeline: {e}")))?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| PipcastError::encoder("Launch string did not produce a pipeline"))?;

        let appsrc = pipeline
            .by_name("src")
            .and_then(|e| e.downcast::<gst_app::AppSrc>().ok())
            .ok_or_else(|| PipcastError::encoder("Encoder pipeline has no appsrc"))?;
        let appsink = pipeline
            .by_name("sink")
            .and_then(|e| e.downcast::<gst_app::AppSink>().ok())
            .ok_or_else(|| PipcastError::encoder("Encoder pipeline has no appsink"))?;

        appsrc.set_caps(Some(
            &gst::Caps::builder("video/x-raw")
                .field("format", "RGBA")
                .field("width", settings.width as i32)
                .field("height", settings.height as i32)
                .field("framerate", gst::Fraction::new(settings.fps as i32, 1))
                .build(),
        ));
        appsrc.set_format(gst::Format::Time);
        appsrc.set_is_live(true);
        appsrc.set_property("do-timestamp", true);

        // Chunks and end-of-stream are both emitted from the appsink
        // streaming thread, which keeps them in order.
        let chunk_tx = events.clone();
        let eos_tx = events.clone();
        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                    chunk_tx
                        .send(EncoderEvent::Chunk(map.as_slice().to_vec()))
                        .map_err(|_| gst::FlowError::Flushing)?;
                    Ok(gst::FlowSuccess::Ok)
                })
                .eos(move |_sink| {
                    let _ = eos_tx.send(EncoderEvent::Finished);
                })
                .build(),
        );

        if let Some(bus) = pipeline.bus() {
            let error_tx = events;
            bus.set_sync_handler(move |_bus, msg| {
                if let gst::MessageView::Error(err) = msg.view() {
                    let source = err
                        .src()
                        .map(|s| s.path_string().to_string())
                        .unwrap_or_else(|| "encoder".to_string());
                    tracing::warn!(source = %source, error = %err.error(), "Encoder pipeline error");
                    let _ = error_tx.send(EncoderEvent::Failed(format!("{source}: {}", err.error())));
                }
                gst::BusSyncReply::Drop
            });
        }

        if let Err(e) = pipeline.set_state(gst::State::Playing) {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(PipcastError::encoder(format!(
                "Failed to start encoder pipeline: {e:?}"
            )));
        }
        // Live pipelines only complete the transition once the first frame
        // arrives, so only an outright failure is checked here.
        if let Err(e) = wait_for_playing(&pipeline, "encoder", gst::ClockTime::ZERO) {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(PipcastError::encoder(e.to_string()));
        }

        tracing::info!(
            width = settings.width,
            height = settings.height,
            fps = settings.fps,
            microphone = settings.microphone.is_some(),
            "Encoder pipeline started"
        );

        let sink = GstFrameSink {
            appsrc: appsrc.clone(),
            frame_duration: gst::ClockTime::from_nseconds(1_000_000_000 / settings.fps as u64),
            expected_len: settings.width as usize * settings.height as usize * 4,
        };
        self.running = Some(RunningPipeline { pipeline, appsrc });
        Ok(Box::new(sink))
    }

    fn finish(&mut self) -> PipcastResult<()> {
        let running = self
            .running
            .as_ref()
            .ok_or_else(|| PipcastError::encoder("Encoder not running"))?;
        running
            .appsrc
            .end_of_stream()
            .map_err(|e| PipcastError::encoder(format!("Failed to signal end of stream: {e:?}")))?;
        // The muxer only finishes once every branch has ended, so live
        // microphone sources need their own EOS.
        for element in running.pipeline.iterate_sources().into_iter().flatten() {
            if element.name().as_str() != "src" && !element.send_event(gst::event::Eos::new()) {
                tracing::warn!(source = %element.name(), "Source ignored end of stream");
            }
        }
        tracing::debug!("End of stream signalled to encoder");
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(running) = self.running.take() {
            if let Some(bus) = running.pipeline.bus() {
                bus.unset_sync_handler();
            }
            if let Err(e) = running.pipeline.set_state(gst::State::Null) {
                tracing::warn!(error = ?e, "Failed to stop encoder pipeline");
            }
            tracing::debug!("Encoder pipeline released");
        }
    }
}

impl Drop for GstStreamEncoder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct GstFrameSink {
    appsrc: gst_app::AppSrc,
    frame_duration: gst::ClockTime,
    expected_len: usize,
}

impl FrameSink for GstFrameSink {
    fn push(&mut self, frame: &VideoFrame) -> PipcastResult<()> {
        if frame.pixels().len() != self.expected_len {
            return Err(PipcastError::encoder(format!(
                "Frame is {}x{}, encoder expects {} bytes",
                frame.width(),
                frame.height(),
                self.expected_len
            )));
        }
        let pixels: Arc<[u8]> = frame.shared_pixels();
        let mut buffer = gst::Buffer::from_slice(ArcBytes(pixels));
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_duration(self.frame_duration);
        }
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| PipcastError::encoder(format!("Encoder rejected frame: {e:?}")))?;
        Ok(())
    }
}

/// Lets a frame's shared pixel storage back a GStreamer buffer without a copy.
struct ArcBytes(Arc<[u8]>);

impl AsRef<[u8]> for ArcBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

fn encoder_launch(settings: &EncoderSettings) -> String {
    let keyint = settings.fps.saturating_mul(2).max(2);
    let mut launch = format!(
        "appsrc name=src ! queue max-size-buffers=8 ! videoconvert ! vp8enc deadline=1 cpu-used=8 keyframe-max-dist={keyint} ! queue max-size-buffers=8 ! webmmux name=mux streamable=true ! appsink name=sink sync=false"
    );
    if let Some(mic) = &settings.microphone {
        launch.push_str(&format!(
            " {} ! queue max-size-buffers=200 leaky=downstream ! audioconvert ! audioresample ! opusenc ! queue ! mux.",
            mic.source()
        ));
    }
    launch
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(microphone: Option<MicrophoneInput>) -> EncoderSettings {
        EncoderSettings {
            width: 1280,
            height: 720,
            fps: CAPTURE_FPS,
            microphone,
        }
    }

    #[test]
    fn launch_without_microphone_has_single_video_branch() {
        let launch = encoder_launch(&settings(None));
        assert!(launch.starts_with("appsrc name=src"));
        assert!(launch.contains("vp8enc"));
        assert!(launch.contains("keyframe-max-dist=60"));
        assert!(launch.contains("webmmux name=mux streamable=true"));
        assert!(!launch.contains("opusenc"));
    }

    #[test]
    fn launch_with_microphone_feeds_the_muxer() {
        let mic = MicrophoneInput::new("audiotestsrc is-live=true");
        let launch = encoder_launch(&settings(Some(mic)));
        assert!(launch.contains("audiotestsrc is-live=true ! queue"));
        assert!(launch.ends_with("opusenc ! queue ! mux."));
    }

    #[test]
    fn default_microphone_is_pulse() {
        assert!(MicrophoneInput::default_device().source().starts_with("pulsesrc"));
    }

    #[test]
    fn finish_without_start_is_an_error() {
        let mut encoder = GstStreamEncoder::new();
        assert!(encoder.finish().is_err());
        encoder.shutdown();
    }

    #[test]
    fn zero_sized_settings_are_rejected_before_gstreamer() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut encoder = GstStreamEncoder::new();
        let bad = EncoderSettings {
            width: 0,
            ..settings(None)
        };
        let err = encoder.start(&bad, tx).err().unwrap();
        assert!(err.to_string().contains("Invalid encoder settings"));
    }
}
