//! Recording session management.
//!
//! [`RecordingController`] owns at most one [`RecordingSession`] and moves it
//! through `Idle → Starting → Active → Stopping → Idle`. While active, a
//! render loop composites the display and camera at the capture rate and
//! feeds the encoder; encoded chunks come back over an ordered channel and
//! are concatenated into the final WebM artifact on stop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pipcast_common::clock::SessionClock;
use pipcast_common::config::RecordingDefaults;
use pipcast_common::error::{PipcastError, PipcastResult};
use pipcast_compositor::Compositor;
use pipcast_media_model::{
    Artifact, ContainerFormat, DeliveryFormat, FrameSource, OverlayGeometry, OverlayState,
    SourceKind,
};
use pipcast_transcoder::{ProgressCallback, Transcoder};
use tokio::sync::{mpsc, watch};

use crate::delivery::{deliver_with_fallback, DeliveryReport, OutputDelivery};
use crate::encoder::{EncoderEvent, EncoderSettings, MicrophoneInput, StreamEncoder, CAPTURE_FPS};
use crate::render_loop::{RenderInputs, RenderLoop};

/// How long `finish_stop` waits for the encoder to drain.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    /// No session.
    Idle,
    /// Session created; waiting for the first frame to be encoded.
    Starting,
    /// Frames are being composited and encoded.
    Active,
    /// No new frames; draining queued chunks.
    Stopping,
}

impl RecordingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingState::Idle => "idle",
            RecordingState::Starting => "starting",
            RecordingState::Active => "active",
            RecordingState::Stopping => "stopping",
        }
    }
}

/// Parameters fixed for the lifetime of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Composite surface width in pixels.
    pub width: u32,
    /// Composite surface height in pixels.
    pub height: u32,
    /// Capture rate.
    pub fps: u32,
    /// Format the user receives. Cannot change mid-session.
    pub delivery: DeliveryFormat,
    /// Initial overlay placement and mirroring.
    pub overlay: OverlayState,
    /// Microphone to multiplex, if any.
    pub microphone: Option<MicrophoneInput>,
}

impl SessionSettings {
    /// Settings for a `width x height` surface with the default overlay.
    pub fn new(width: u32, height: u32) -> PipcastResult<Self> {
        Ok(Self {
            width,
            height,
            fps: CAPTURE_FPS,
            delivery: DeliveryFormat::default(),
            overlay: OverlayState::new(default_overlay(width, height)?, true),
            microphone: None,
        })
    }

    /// Settings from the configured recording defaults.
    pub fn from_defaults(defaults: &RecordingDefaults) -> PipcastResult<Self> {
        let delivery = defaults
            .delivery_format
            .parse::<DeliveryFormat>()
            .map_err(|e| PipcastError::config(e.to_string()))?;
        let mut settings = Self::new(defaults.width, defaults.height)?;
        settings.fps = if defaults.fps == 0 { CAPTURE_FPS } else { defaults.fps };
        settings.delivery = delivery;
        settings.overlay.mirror = defaults.mirror_camera;
        settings.microphone = defaults
            .capture_microphone
            .then(MicrophoneInput::default_device);
        Ok(settings)
    }
}

/// Bottom-right quarter-size overlay with a small margin.
pub fn default_overlay(width: u32, height: u32) -> PipcastResult<OverlayGeometry> {
    if width == 0 || height == 0 {
        return Err(PipcastError::precondition(format!(
            "Output resolution {width}x{height} is empty"
        )));
    }
    let w = (width / 4).max(1);
    let h = (height / 4).max(1);
    let margin = (width.min(height) / 40) as i32;
    let x = (width - w) as i32 - margin;
    let y = (height - h) as i32 - margin;
    OverlayGeometry::new(x.max(0), y.max(0), w, h)
        .map_err(|e| PipcastError::precondition(e.to_string()))
}

/// One recording, from start request to finalized artifact.
#[derive(Debug)]
pub struct RecordingSession {
    id: u64,
    status: RecordingState,
    delivery: DeliveryFormat,
    clock: Option<SessionClock>,
    frozen_elapsed: Option<u64>,
    chunks: Vec<Vec<u8>>,
    failure: Option<String>,
}

impl RecordingSession {
    fn new(id: u64, delivery: DeliveryFormat) -> Self {
        Self {
            id,
            status: RecordingState::Starting,
            delivery,
            clock: None,
            frozen_elapsed: None,
            chunks: Vec::new(),
            failure: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> RecordingState {
        self.status
    }

    pub fn delivery(&self) -> DeliveryFormat {
        self.delivery
    }

    /// Wall-clock time the session became active.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.clock.as_ref().map(SessionClock::epoch_wall)
    }

    /// Whole seconds since `Active` began; frozen once stopping.
    pub fn elapsed_seconds(&self) -> Option<u64> {
        match self.status {
            RecordingState::Active => self.clock.as_ref().map(SessionClock::elapsed_whole_secs),
            RecordingState::Stopping => self.frozen_elapsed,
            RecordingState::Idle | RecordingState::Starting => None,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn encoded_bytes(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }
}

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { session_id: u64 },
    /// A session is already active or stopping; nothing changed.
    AlreadyRunning,
}

/// Result of finishing a stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Finished(Artifact),
    /// The encoder failed; no artifact exists.
    Abandoned(String),
    /// No session was active; nothing changed.
    NotRecording,
}

/// Non-fatal notices surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    /// A capture source reported a device error.
    Source { kind: SourceKind, message: String },
    /// The encoder failed and the session was abandoned.
    EncoderFailed { session_id: u64, reason: String },
}

/// Owns the recording state machine.
pub struct RecordingController {
    display: Arc<dyn FrameSource>,
    camera: Arc<dyn FrameSource>,
    encoder: Box<dyn StreamEncoder>,
    transcoder: Option<Arc<Transcoder>>,
    overlay: watch::Sender<OverlayState>,
    session: Option<RecordingSession>,
    render: Option<RenderLoop>,
    events: Option<mpsc::UnboundedReceiver<EncoderEvent>>,
    reported_errors: HashMap<SourceKind, String>,
    next_session_id: u64,
    drain_timeout: Duration,
}

impl RecordingController {
    pub fn new(
        display: Arc<dyn FrameSource>,
        camera: Arc<dyn FrameSource>,
        encoder: Box<dyn StreamEncoder>,
    ) -> Self {
        let (overlay, _) = watch::channel(OverlayState::new(OverlayGeometry::default(), true));
        Self {
            display,
            camera,
            encoder,
            transcoder: None,
            overlay,
            session: None,
            render: None,
            events: None,
            reported_errors: HashMap::new(),
            next_session_id: 1,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Use `transcoder` when the alternate delivery format is requested.
    pub fn with_transcoder(mut self, transcoder: Arc<Transcoder>) -> Self {
        self.transcoder = Some(transcoder);
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn state(&self) -> RecordingState {
        self.session
            .as_ref()
            .map(|s| s.status)
            .unwrap_or(RecordingState::Idle)
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    pub fn session_id(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Whole seconds recorded. `None` unless active or stopping.
    pub fn elapsed_seconds(&self) -> Option<u64> {
        self.session.as_ref().and_then(RecordingSession::elapsed_seconds)
    }

    /// Chunks received so far in the current session.
    pub fn chunk_count(&self) -> usize {
        self.session.as_ref().map_or(0, RecordingSession::chunk_count)
    }

    /// Current overlay state as the compositor will read it.
    pub fn overlay(&self) -> OverlayState {
        *self.overlay.borrow()
    }

    /// Move or resize the camera overlay. Applied from the next tick.
    pub fn set_overlay(&self, geometry: OverlayGeometry) {
        self.overlay.send_if_modified(|state| {
            let changed = state.geometry != geometry;
            state.geometry = geometry;
            changed
        });
    }

    /// Mirror the camera overlay. Applied from the next tick.
    pub fn set_mirror(&self, mirror: bool) {
        self.overlay.send_if_modified(|state| {
            let changed = state.mirror != mirror;
            state.mirror = mirror;
            changed
        });
    }

    /// Start a session.
    ///
    /// Both sources must be ready. On any failure the controller is back in
    /// `Idle` with nothing left running.
    pub async fn start(&mut self, settings: SessionSettings) -> PipcastResult<StartOutcome> {
        if self.state() != RecordingState::Idle {
            tracing::info!(state = self.state().as_str(), "Start ignored; session in progress");
            return Ok(StartOutcome::AlreadyRunning);
        }
        for source in [&self.display, &self.camera] {
            if !source.is_ready() {
                return Err(PipcastError::precondition(format!(
                    "{} source is not ready",
                    source.kind().as_str()
                )));
            }
        }

        let id = self.next_session_id;
        self.next_session_id += 1;
        self.session = Some(RecordingSession::new(id, settings.delivery));
        tracing::info!(
            session = id,
            width = settings.width,
            height = settings.height,
            fps = settings.fps,
            delivery = ?settings.delivery,
            "Starting recording session"
        );

        match self.launch(&settings).await {
            Ok(()) => {
                tracing::info!(session = id, "Recording session active");
                Ok(StartOutcome::Started { session_id: id })
            }
            Err(e) => {
                tracing::warn!(session = id, error = %e, "Recording session failed to start");
                self.encoder.shutdown();
                self.events = None;
                self.session = None;
                Err(e)
            }
        }
    }

    async fn launch(&mut self, settings: &SessionSettings) -> PipcastResult<()> {
        let mut compositor = Compositor::new(settings.width, settings.height)?;
        self.overlay.send_replace(settings.overlay);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let encoder_settings = EncoderSettings {
            width: settings.width,
            height: settings.height,
            fps: settings.fps,
            microphone: settings.microphone.clone(),
        };
        let mut sink = self.encoder.start(&encoder_settings, events_tx.clone())?;

        compositor.tick(self.display.as_ref(), self.camera.as_ref(), &settings.overlay);
        sink.push(&compositor.surface().snapshot(0))?;

        let clock = SessionClock::start();
        let overlay = self.overlay.subscribe();
        self.render = Some(RenderLoop::spawn(RenderInputs {
            display: Arc::clone(&self.display),
            camera: Arc::clone(&self.camera),
            overlay,
            compositor,
            sink,
            fps: settings.fps,
            first_sequence: 1,
            events: events_tx,
        }));
        self.events = Some(events_rx);

        if let Some(session) = self.session.as_mut() {
            tracing::debug!(session = session.id, started_at = %clock.epoch_wall(), "Session clock started");
            session.clock = Some(clock);
            session.status = RecordingState::Active;
        }
        Ok(())
    }

    /// `Active → Stopping`. Freezes elapsed time, stops the render loop and
    /// signals end of stream. Returns `false` when not active.
    pub async fn request_stop(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if session.status != RecordingState::Active {
            return false;
        }
        session.frozen_elapsed = session.clock.as_ref().map(SessionClock::elapsed_whole_secs);
        session.status = RecordingState::Stopping;
        let id = session.id;
        tracing::info!(session = id, elapsed_secs = ?session.frozen_elapsed, "Stopping recording session");

        if let Some(render) = self.render.take() {
            let stats = render.stop().await;
            tracing::debug!(session = id, ticks = stats.ticks, composed = stats.composed, "Render loop stopped");
        }

        if let Err(e) = self.encoder.finish() {
            if let Some(session) = self.session.as_mut() {
                session.failure = Some(e.to_string());
            }
        }
        true
    }

    /// Drain the encoder and finalize. `Stopping → Idle`.
    ///
    /// An active session is stopped first.
    pub async fn finish_stop(&mut self) -> StopOutcome {
        match self.state() {
            RecordingState::Idle => return StopOutcome::NotRecording,
            RecordingState::Active => {
                self.request_stop().await;
            }
            RecordingState::Starting | RecordingState::Stopping => {}
        }

        // A failed end-of-stream never produces a final event.
        let finish_failed = self.session.as_ref().is_some_and(|s| s.failure.is_some());
        let drained = if finish_failed {
            Ok(())
        } else {
            self.drain().await
        };
        self.encoder.shutdown();
        self.events = None;

        let Some(session) = self.session.take() else {
            return StopOutcome::NotRecording;
        };
        let failure = session.failure.clone().or(drained.err());
        if let Some(reason) = failure {
            tracing::warn!(session = session.id, reason = %reason, "Recording session abandoned");
            return StopOutcome::Abandoned(reason);
        }
        if session.chunks.is_empty() {
            tracing::warn!(session = session.id, "Encoder produced no data");
            return StopOutcome::Abandoned("encoder produced no data".to_string());
        }

        let started_at = session.started_at().unwrap_or_else(Utc::now);
        let artifact = Artifact::from_chunks(
            ContainerFormat::Webm,
            started_at,
            session.frozen_elapsed,
            &session.chunks,
        );
        tracing::info!(
            session = session.id,
            chunks = session.chunks.len(),
            bytes = artifact.len(),
            filename = %artifact.filename(),
            "Recording finalized"
        );
        StopOutcome::Finished(artifact)
    }

    /// Stop and finalize in one call.
    pub async fn stop(&mut self) -> StopOutcome {
        if self.state() == RecordingState::Idle {
            return StopOutcome::NotRecording;
        }
        self.request_stop().await;
        self.finish_stop().await
    }

    /// Stop, then hand the result to `delivery` in the session's requested
    /// format, falling back to WebM with a warning if conversion fails.
    ///
    /// A recording that cannot be handed off is returned in
    /// [`DeliveryReport::Undelivered`].
    pub async fn stop_and_deliver(
        &mut self,
        delivery: &dyn OutputDelivery,
        on_progress: Option<ProgressCallback>,
    ) -> DeliveryReport {
        let Some(requested) = self.session.as_ref().map(RecordingSession::delivery) else {
            return DeliveryReport::NotRecording;
        };
        match self.stop().await {
            StopOutcome::Finished(artifact) => {
                deliver_with_fallback(
                    artifact,
                    requested,
                    self.transcoder.as_deref(),
                    delivery,
                    on_progress,
                )
                .await
            }
            StopOutcome::Abandoned(reason) => DeliveryReport::Abandoned { reason },
            StopOutcome::NotRecording => DeliveryReport::NotRecording,
        }
    }

    /// Drain pending encoder output and collect advisories.
    ///
    /// An encoder failure while active abandons the session.
    pub async fn poll(&mut self) -> Vec<Advisory> {
        let mut advisories = self.source_advisories();
        if self.state() != RecordingState::Active {
            return advisories;
        }

        let mut failure = None;
        if let (Some(events), Some(session)) = (self.events.as_mut(), self.session.as_mut()) {
            while let Ok(event) = events.try_recv() {
                match event {
                    EncoderEvent::Chunk(bytes) => session.chunks.push(bytes),
                    EncoderEvent::Finished => {
                        failure = Some("encoder ended the stream unexpectedly".to_string());
                        break;
                    }
                    EncoderEvent::Failed(reason) => {
                        failure = Some(reason);
                        break;
                    }
                }
            }
        }

        if let Some(reason) = failure {
            if let Some(session_id) = self.abandon(&reason).await {
                advisories.push(Advisory::EncoderFailed { session_id, reason });
            }
        }
        advisories
    }

    async fn abandon(&mut self, reason: &str) -> Option<u64> {
        if let Some(render) = self.render.take() {
            render.stop().await;
        }
        self.encoder.shutdown();
        self.events = None;
        let session = self.session.take()?;
        tracing::warn!(session = session.id, reason, "Encoder failed; recording abandoned");
        Some(session.id)
    }

    fn source_advisories(&mut self) -> Vec<Advisory> {
        let mut advisories = Vec::new();
        for source in [&self.display, &self.camera] {
            let kind = source.kind();
            match source.last_error() {
                Some(message) => {
                    if self.reported_errors.get(&kind) != Some(&message) {
                        tracing::warn!(source = kind.as_str(), error = %message, "Capture source reported an error");
                        self.reported_errors.insert(kind, message.clone());
                        advisories.push(Advisory::Source { kind, message });
                    }
                }
                None => {
                    self.reported_errors.remove(&kind);
                }
            }
        }
        advisories
    }

    async fn drain(&mut self) -> Result<(), String> {
        let timeout = self.drain_timeout;
        let (Some(events), Some(session)) = (self.events.as_mut(), self.session.as_mut()) else {
            return Err("encoder was not running".to_string());
        };
        let drain = async {
            while let Some(event) = events.recv().await {
                match event {
                    EncoderEvent::Chunk(bytes) => session.chunks.push(bytes),
                    EncoderEvent::Finished => return Ok(()),
                    EncoderEvent::Failed(reason) => return Err(reason),
                }
            }
            Err("encoder closed without finishing".to_string())
        };
        match tokio::time::timeout(timeout, drain).await {
            Ok(result) => result,
            Err(_) => Err(format!("encoder did not finish within {}s", timeout.as_secs())),
        }
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        if self.session.is_some() {
            tracing::warn!("Recording controller dropped with a session in progress");
            self.encoder.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_overlay_sits_bottom_right() {
        let overlay = default_overlay(1280, 720).unwrap();
        assert_eq!((overlay.width(), overlay.height()), (320, 180));
        assert_eq!((overlay.x(), overlay.y()), (942, 522));
        assert!(overlay.fits_within(1280, 720));
    }

    #[test]
    fn default_overlay_rejects_empty_surface() {
        assert!(default_overlay(0, 720).is_err());
    }

    #[test]
    fn settings_follow_recording_defaults() {
        let defaults = RecordingDefaults {
            delivery_format: "mp4".to_string(),
            mirror_camera: false,
            capture_microphone: false,
            ..RecordingDefaults::default()
        };
        let settings = SessionSettings::from_defaults(&defaults).unwrap();
        assert_eq!(settings.delivery, DeliveryFormat::Alternate);
        assert!(!settings.overlay.mirror);
        assert!(settings.microphone.is_none());
        assert_eq!(settings.fps, CAPTURE_FPS);
    }

    #[test]
    fn unknown_delivery_format_is_a_config_error() {
        let defaults = RecordingDefaults {
            delivery_format: "gif".to_string(),
            ..RecordingDefaults::default()
        };
        let err = SessionSettings::from_defaults(&defaults).unwrap_err();
        assert!(matches!(err, PipcastError::Config { .. }));
    }
}
