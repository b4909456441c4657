use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pipcast_capture_engine::{
    Advisory, DeliveryReport, EncoderEvent, EncoderEvents, EncoderSettings, FrameSink,
    OutputDelivery, RecordingController, RecordingState, SessionSettings, StartOutcome,
    StopOutcome, StreamEncoder, SyntheticSource,
};
use pipcast_common::error::{PipcastError, PipcastResult};
use pipcast_media_model::{
    Artifact, ContainerFormat, DeliveryFormat, FrameSource, OverlayGeometry, SourceKind,
    VideoFrame,
};
use pipcast_transcoder::{TranscodeEngine, Transcoder};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SpyState {
    events: Option<EncoderEvents>,
    settings: Option<EncoderSettings>,
    frames: usize,
    starts: usize,
    finishes: usize,
}

/// Shared view into the fake encoder.
#[derive(Clone, Default)]
struct EncoderSpy {
    state: Arc<Mutex<SpyState>>,
    fail_start: Arc<AtomicBool>,
    fail_finish: Arc<AtomicBool>,
}

impl EncoderSpy {
    fn frames(&self) -> usize {
        self.state.lock().unwrap().frames
    }

    fn starts(&self) -> usize {
        self.state.lock().unwrap().starts
    }

    fn inject(&self, event: EncoderEvent) {
        let state = self.state.lock().unwrap();
        state.events.as_ref().unwrap().send(event).unwrap();
    }
}

/// Emits one single-byte chunk per pushed frame.
struct FakeEncoder {
    spy: EncoderSpy,
}

struct FakeSink {
    spy: EncoderSpy,
    events: EncoderEvents,
}

impl FrameSink for FakeSink {
    fn push(&mut self, frame: &VideoFrame) -> PipcastResult<()> {
        self.spy.state.lock().unwrap().frames += 1;
        self.events
            .send(EncoderEvent::Chunk(vec![frame.sequence() as u8]))
            .map_err(|_| PipcastError::encoder("events closed"))
    }
}

impl StreamEncoder for FakeEncoder {
    fn start(
        &mut self,
        settings: &EncoderSettings,
        events: EncoderEvents,
    ) -> PipcastResult<Box<dyn FrameSink>> {
        if self.spy.fail_start.load(Ordering::SeqCst) {
            return Err(PipcastError::encoder("no element 'vp8enc'"));
        }
        let mut state = self.spy.state.lock().unwrap();
        state.starts += 1;
        state.settings = Some(settings.clone());
        state.events = Some(events.clone());
        Ok(Box::new(FakeSink {
            spy: self.spy.clone(),
            events,
        }))
    }

    fn finish(&mut self) -> PipcastResult<()> {
        let mut state = self.spy.state.lock().unwrap();
        state.finishes += 1;
        if self.spy.fail_finish.load(Ordering::SeqCst) {
            return Err(PipcastError::encoder("could not send end-of-stream"));
        }
        if let Some(events) = &state.events {
            let _ = events.send(EncoderEvent::Finished);
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.spy.state.lock().unwrap().events = None;
    }
}

struct FakeEngine {
    fail: bool,
}

#[async_trait::async_trait]
impl TranscodeEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn initialize(&self) -> PipcastResult<()> {
        Ok(())
    }

    async fn transcode(
        &self,
        input: &Artifact,
        _target: ContainerFormat,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> PipcastResult<Vec<u8>> {
        progress(0.5);
        if self.fail {
            return Err(PipcastError::transcode("codec not available"));
        }
        let mut out = b"mp4:".to_vec();
        out.extend_from_slice(input.bytes());
        Ok(out)
    }

    async fn terminate(&self) {}
}

/// Every hand-off fails, as on a full disk.
struct FullDisk;

impl OutputDelivery for FullDisk {
    fn deliver(&self, _artifact: &Artifact, _warning: Option<&str>) -> PipcastResult<()> {
        Err(PipcastError::delivery("No space left on device"))
    }
}

#[derive(Default)]
struct CollectingDelivery {
    delivered: Mutex<Vec<(String, ContainerFormat, Option<String>)>>,
}

impl OutputDelivery for CollectingDelivery {
    fn deliver(&self, artifact: &Artifact, warning: Option<&str>) -> PipcastResult<()> {
        self.delivered.lock().unwrap().push((
            artifact.filename(),
            artifact.format(),
            warning.map(str::to_string),
        ));
        Ok(())
    }
}

struct Rig {
    controller: RecordingController,
    spy: EncoderSpy,
    camera: Arc<SyntheticSource>,
}

fn rig() -> Rig {
    let display = Arc::new(SyntheticSource::with_pattern(SourceKind::Display, 64, 48));
    let camera = Arc::new(SyntheticSource::with_pattern(SourceKind::Camera, 16, 12));
    let spy = EncoderSpy::default();
    let display_source: Arc<dyn FrameSource> = display;
    let camera_source: Arc<dyn FrameSource> = camera.clone();
    let controller = RecordingController::new(
        display_source,
        camera_source,
        Box::new(FakeEncoder {
            spy: spy.clone(),
        }),
    );
    Rig {
        controller,
        spy,
        camera,
    }
}

fn settings(delivery: DeliveryFormat) -> SessionSettings {
    let mut settings = SessionSettings::new(64, 36).unwrap();
    settings.delivery = delivery;
    settings
}

fn transcoder(fail: bool) -> Arc<Transcoder> {
    Arc::new(Transcoder::new(Box::new(FakeEngine { fail })))
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn three_second_recording_produces_webm_with_frozen_elapsed() {
    let mut rig = rig();
    let outcome = rig.controller.start(settings(DeliveryFormat::Native)).await.unwrap();
    assert_eq!(outcome, StartOutcome::Started { session_id: 1 });
    assert_eq!(rig.controller.state(), RecordingState::Active);
    assert_eq!(rig.controller.elapsed_seconds(), Some(0));

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert!(rig.controller.poll().await.is_empty());
    assert!(rig.controller.chunk_count() > 0);
    assert_eq!(rig.controller.elapsed_seconds(), Some(3));

    assert!(rig.controller.request_stop().await);
    assert_eq!(rig.controller.state(), RecordingState::Stopping);
    let frames_at_stop = rig.spy.frames();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(rig.controller.elapsed_seconds(), Some(3));
    assert_eq!(rig.spy.frames(), frames_at_stop, "no tick after stop");

    let artifact = match rig.controller.finish_stop().await {
        StopOutcome::Finished(artifact) => artifact,
        other => panic!("unexpected outcome {other:?}"),
    };
    assert_eq!(artifact.format(), ContainerFormat::Webm);
    assert_eq!(artifact.duration_secs(), Some(3));
    assert_eq!(artifact.len(), frames_at_stop);
    assert!(artifact.filename().starts_with("presentation-"));
    assert!(artifact.filename().ends_with(".webm"));
    // 3.5s at 30 fps plus the frame pushed at start.
    assert!((100..=110).contains(&frames_at_stop), "{frames_at_stop}");

    assert_eq!(rig.controller.state(), RecordingState::Idle);
    assert_eq!(rig.controller.elapsed_seconds(), None);

    let spy = rig.spy.state.lock().unwrap();
    assert_eq!(spy.finishes, 1);
    assert_eq!(
        spy.settings.as_ref().map(|s| (s.width, s.height, s.fps)),
        Some((64, 36, 30))
    );
}

#[tokio::test(start_paused = true)]
async fn elapsed_advances_one_per_second_and_freezes_on_stop() {
    let mut rig = rig();
    rig.controller.start(settings(DeliveryFormat::Native)).await.unwrap();

    for second in 1..=4u64 {
        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(rig.controller.elapsed_seconds(), Some(second - 1));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(rig.controller.elapsed_seconds(), Some(second));
        rig.controller.poll().await;
    }

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(rig.controller.request_stop().await);
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(rig.controller.elapsed_seconds(), Some(4));
    }
    assert!(matches!(
        rig.controller.finish_stop().await,
        StopOutcome::Finished(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn chunks_keep_production_order() {
    let mut rig = rig();
    rig.controller.start(settings(DeliveryFormat::Native)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let artifact = match rig.controller.stop().await {
        StopOutcome::Finished(artifact) => artifact,
        other => panic!("unexpected outcome {other:?}"),
    };
    let bytes = artifact.bytes();
    assert_eq!(bytes[0], 0);
    assert!(bytes.windows(2).all(|w| w[1] == w[0].wrapping_add(1)));
}

#[tokio::test(start_paused = true)]
async fn start_while_active_and_stop_while_idle_are_no_ops() {
    let mut rig = rig();
    assert_eq!(rig.controller.stop().await, StopOutcome::NotRecording);
    assert!(!rig.controller.request_stop().await);

    rig.controller.start(settings(DeliveryFormat::Native)).await.unwrap();
    let again = rig.controller.start(settings(DeliveryFormat::Alternate)).await.unwrap();
    assert_eq!(again, StartOutcome::AlreadyRunning);
    assert_eq!(rig.controller.session_id(), Some(1));
    assert_eq!(rig.spy.starts(), 1);

    rig.controller.request_stop().await;
    let during_stop = rig.controller.start(settings(DeliveryFormat::Native)).await.unwrap();
    assert_eq!(during_stop, StartOutcome::AlreadyRunning);
    assert!(matches!(rig.controller.finish_stop().await, StopOutcome::Finished(_)));

    let next = rig.controller.start(settings(DeliveryFormat::Native)).await.unwrap();
    assert_eq!(next, StartOutcome::Started { session_id: 2 });
    rig.controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn start_requires_ready_sources() {
    let display: Arc<dyn FrameSource> =
        Arc::new(SyntheticSource::with_pattern(SourceKind::Display, 64, 48));
    let camera: Arc<dyn FrameSource> = Arc::new(SyntheticSource::new(SourceKind::Camera));
    let spy = EncoderSpy::default();
    let mut controller = RecordingController::new(
        display,
        camera,
        Box::new(FakeEncoder {
            spy: spy.clone(),
        }),
    );

    let err = controller
        .start(settings(DeliveryFormat::Native))
        .await
        .unwrap_err();
    assert!(matches!(err, PipcastError::Precondition { .. }));
    assert!(err.to_string().contains("camera"));
    assert_eq!(controller.state(), RecordingState::Idle);
    assert_eq!(spy.starts(), 0);
}

#[tokio::test(start_paused = true)]
async fn encoder_start_failure_leaves_controller_idle() {
    let mut rig = rig();
    rig.spy.fail_start.store(true, Ordering::SeqCst);

    let err = rig
        .controller
        .start(settings(DeliveryFormat::Native))
        .await
        .unwrap_err();
    assert!(matches!(err, PipcastError::Encoder { .. }));
    assert_eq!(rig.controller.state(), RecordingState::Idle);
    assert_eq!(rig.controller.session_id(), None);

    rig.spy.fail_start.store(false, Ordering::SeqCst);
    let outcome = rig.controller.start(settings(DeliveryFormat::Native)).await.unwrap();
    assert!(matches!(outcome, StartOutcome::Started { .. }));
    rig.controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn encoder_failure_mid_session_abandons_without_artifact() {
    let mut rig = rig();
    rig.controller.start(settings(DeliveryFormat::Native)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    rig.spy
        .inject(EncoderEvent::Failed("vp8enc: out of memory".to_string()));
    let advisories = rig.controller.poll().await;
    assert_eq!(
        advisories,
        vec![Advisory::EncoderFailed {
            session_id: 1,
            reason: "vp8enc: out of memory".to_string(),
        }]
    );
    assert_eq!(rig.controller.state(), RecordingState::Idle);
    assert_eq!(rig.controller.stop().await, StopOutcome::NotRecording);
}

#[tokio::test(start_paused = true)]
async fn failure_while_draining_is_reported_as_abandoned() {
    let mut rig = rig();
    rig.controller.start(settings(DeliveryFormat::Native)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    rig.spy
        .inject(EncoderEvent::Failed("webmmux: not negotiated".to_string()));
    match rig.controller.stop().await {
        StopOutcome::Abandoned(reason) => assert!(reason.contains("not negotiated")),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(rig.controller.state(), RecordingState::Idle);
}

#[tokio::test(start_paused = true)]
async fn failed_end_of_stream_abandons_without_waiting_for_drain() {
    let mut rig = rig();
    rig.spy.fail_finish.store(true, Ordering::SeqCst);
    rig.controller.start(settings(DeliveryFormat::Native)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let stopping = tokio::time::Instant::now();
    match rig.controller.stop().await {
        StopOutcome::Abandoned(reason) => {
            assert!(reason.contains("end-of-stream"), "{reason}")
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(stopping.elapsed() < Duration::from_secs(1));
    assert_eq!(rig.controller.state(), RecordingState::Idle);
}

#[tokio::test(start_paused = true)]
async fn source_errors_surface_once_as_advisories() {
    let mut rig = rig();
    rig.controller.start(settings(DeliveryFormat::Native)).await.unwrap();

    rig.camera.fail("camera unplugged");
    let advisories = rig.controller.poll().await;
    assert_eq!(
        advisories,
        vec![Advisory::Source {
            kind: SourceKind::Camera,
            message: "camera unplugged".to_string(),
        }]
    );
    assert!(rig.controller.poll().await.is_empty());
    // A device error is advisory; the session keeps recording.
    assert_eq!(rig.controller.state(), RecordingState::Active);
    rig.controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn overlay_updates_are_published() {
    let mut rig = rig();
    let mut session = settings(DeliveryFormat::Native);
    session.overlay.mirror = true;
    rig.controller.start(session).await.unwrap();

    rig.controller.set_mirror(false);
    let moved = OverlayGeometry::new(-4, 2, 20, 10).unwrap();
    rig.controller.set_overlay(moved);
    let overlay = rig.controller.overlay();
    assert!(!overlay.mirror);
    assert_eq!(overlay.geometry, moved);
    rig.controller.stop().await;
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn native_delivery_hands_off_webm() {
    let mut rig = rig();
    let delivery = CollectingDelivery::default();
    rig.controller.start(settings(DeliveryFormat::Native)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let report = rig.controller.stop_and_deliver(&delivery, None).await;
    assert_eq!(report.warning(), None);
    let delivered = delivery.delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].0.ends_with(".webm"));
    assert_eq!(delivered[0].1, ContainerFormat::Webm);
}

#[tokio::test(start_paused = true)]
async fn alternate_delivery_hands_off_only_mp4() {
    let mut rig = rig();
    rig.controller = rig.controller.with_transcoder(transcoder(false));
    let delivery = CollectingDelivery::default();
    let progress = Arc::new(Mutex::new(Vec::<u8>::new()));
    let sink = progress.clone();

    rig.controller.start(settings(DeliveryFormat::Alternate)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    let report = rig
        .controller
        .stop_and_deliver(&delivery, Some(Box::new(move |p: u8| sink.lock().unwrap().push(p))))
        .await;

    let artifact = report.artifact().unwrap();
    assert_eq!(artifact.format(), ContainerFormat::Mp4);
    assert!(artifact.bytes().starts_with(b"mp4:"));
    assert_eq!(report.warning(), None);

    let delivered = delivery.delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].0.ends_with(".mp4"));
    assert_eq!(delivered[0].2, None);
    assert_eq!(progress.lock().unwrap().clone(), vec![0, 50, 100]);
}

#[tokio::test(start_paused = true)]
async fn transcode_failure_falls_back_to_webm_with_warning() {
    let mut rig = rig();
    rig.controller = rig.controller.with_transcoder(transcoder(true));
    let delivery = CollectingDelivery::default();

    rig.controller.start(settings(DeliveryFormat::Alternate)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    let report = rig.controller.stop_and_deliver(&delivery, None).await;

    match &report {
        DeliveryReport::Delivered { artifact, warning } => {
            assert_eq!(artifact.format(), ContainerFormat::Webm);
            assert!(warning.as_deref().unwrap().contains("codec not available"));
        }
        other => panic!("unexpected report {other:?}"),
    }
    let delivered = delivery.delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].0.ends_with(".webm"));
    assert!(delivered[0].2.is_some());
    assert_eq!(rig.controller.state(), RecordingState::Idle);
}

#[tokio::test(start_paused = true)]
async fn failed_hand_off_returns_the_recording() {
    let mut rig = rig();
    rig.controller.start(settings(DeliveryFormat::Native)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2_500)).await;

    match rig.controller.stop_and_deliver(&FullDisk, None).await {
        DeliveryReport::Undelivered { artifact, reason } => {
            assert_eq!(artifact.format(), ContainerFormat::Webm);
            assert!(!artifact.is_empty());
            assert_eq!(artifact.duration_secs(), Some(2));
            assert!(reason.contains("No space left on device"));
        }
        other => panic!("unexpected report {other:?}"),
    }
    assert_eq!(rig.controller.state(), RecordingState::Idle);
}

#[tokio::test(start_paused = true)]
async fn deliver_while_idle_is_a_no_op() {
    let mut rig = rig();
    let delivery = CollectingDelivery::default();
    let report = rig.controller.stop_and_deliver(&delivery, None).await;
    assert_eq!(report, DeliveryReport::NotRecording);
    assert!(delivery.delivered.lock().unwrap().is_empty());
}
