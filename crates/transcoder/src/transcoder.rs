//! Single-job transcoder over a shared engine.
//!
//! The transcoder owns the engine lifecycle and enforces that at most one job
//! is in flight. A second request while one is running is rejected, never
//! queued. Progress is published as whole percentages that never decrease and
//! only reach 100 when the job succeeds.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use pipcast_common::config::TranscodeConfig;
use pipcast_common::error::{PipcastError, PipcastResult};
use pipcast_media_model::{Artifact, ContainerFormat};
use tokio::sync::watch;

use crate::engine::{EngineState, TranscodeEngine};
use crate::ffmpeg::FfmpegEngine;

/// Progress callback for transcode jobs. Receives whole percentages.
pub type ProgressCallback = Box<dyn Fn(u8) + Send + Sync>;

/// Terminal state of a transcode job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    Pending,
    Success(Artifact),
    Failure(String),
}

/// One conversion request and its result.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub id: u64,
    pub input: Artifact,
    pub target_format: ContainerFormat,
    /// Highest progress reported, 0..=100.
    pub progress: u8,
    pub outcome: TranscodeOutcome,
}

impl TranscodeJob {
    fn new(id: u64, input: Artifact, target_format: ContainerFormat) -> Self {
        Self {
            id,
            input,
            target_format,
            progress: 0,
            outcome: TranscodeOutcome::Pending,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, TranscodeOutcome::Success(_))
    }

    pub fn into_outcome(self) -> TranscodeOutcome {
        self.outcome
    }
}

/// Monotonic percentage reporter for a single job.
struct JobProgress<'a> {
    last: AtomicU8,
    published: &'a watch::Sender<Option<u8>>,
    callback: Option<&'a ProgressCallback>,
}

impl<'a> JobProgress<'a> {
    fn new(published: &'a watch::Sender<Option<u8>>, callback: Option<&'a ProgressCallback>) -> Self {
        published.send_replace(Some(0));
        if let Some(cb) = callback {
            cb(0);
        }
        Self {
            last: AtomicU8::new(0),
            published,
            callback,
        }
    }

    /// Report an engine fraction. Capped at 99 until the job succeeds.
    fn report_fraction(&self, fraction: f64) {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.advance(((fraction * 100.0).floor() as u8).min(99));
    }

    fn complete(&self) {
        self.advance(100);
    }

    fn current(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }

    fn advance(&self, percent: u8) {
        let previous = self.last.fetch_max(percent, Ordering::SeqCst);
        if percent > previous {
            self.published.send_replace(Some(percent));
            if let Some(cb) = self.callback {
                cb(percent);
            }
        }
    }
}

/// Clears the in-flight flag when a job ends, whatever the path.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Converts finished recordings into the alternate delivery format.
pub struct Transcoder {
    engine: Box<dyn TranscodeEngine>,
    state: watch::Sender<EngineState>,
    progress: watch::Sender<Option<u8>>,
    in_flight: AtomicBool,
    next_job_id: AtomicU64,
}

static GLOBAL_TRANSCODER: OnceLock<Arc<Transcoder>> = OnceLock::new();

impl Transcoder {
    pub fn new(engine: Box<dyn TranscodeEngine>) -> Self {
        let (state, _) = watch::channel(EngineState::Uninitialized);
        let (progress, _) = watch::channel(None);
        Self {
            engine,
            state,
            progress,
            in_flight: AtomicBool::new(false),
            next_job_id: AtomicU64::new(1),
        }
    }

    /// The process-wide transcoder backed by ffmpeg.
    ///
    /// The first caller's configuration wins; later calls return the same instance.
    pub fn global(config: &TranscodeConfig) -> Arc<Transcoder> {
        GLOBAL_TRANSCODER
            .get_or_init(|| {
                Arc::new(Transcoder::new(Box::new(FfmpegEngine::new(
                    config.clone(),
                ))))
            })
            .clone()
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Current engine lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    /// Whether a job is currently running.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Watch engine lifecycle changes.
    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// Watch job progress: `Some(percent)` while a job runs, `None` otherwise.
    pub fn subscribe_progress(&self) -> watch::Receiver<Option<u8>> {
        self.progress.subscribe()
    }

    /// Initialize the engine. Idempotent: concurrent callers share one
    /// initialization and all observe its result.
    pub async fn initialize(&self) -> PipcastResult<()> {
        let claimed = self.state.send_if_modified(|state| {
            if *state == EngineState::Uninitialized {
                *state = EngineState::Initializing;
                true
            } else {
                false
            }
        });

        if !claimed {
            return match self.state() {
                EngineState::Ready => Ok(()),
                EngineState::Terminated => Err(PipcastError::EngineNotReady),
                EngineState::Initializing | EngineState::Uninitialized => {
                    self.wait_for_initialization().await
                }
            };
        }

        tracing::info!(engine = self.engine.name(), "Initializing transcode engine");
        match self.engine.initialize().await {
            Ok(()) => {
                let ready = self.state.send_if_modified(|state| {
                    if *state == EngineState::Initializing {
                        *state = EngineState::Ready;
                        true
                    } else {
                        false
                    }
                });
                if !ready {
                    // Terminated while initializing: release what was set up.
                    tracing::info!(engine = self.engine.name(), "Transcode engine terminated during initialization");
                    self.engine.terminate().await;
                    return Err(PipcastError::EngineNotReady);
                }
                tracing::info!(engine = self.engine.name(), "Transcode engine ready");
                Ok(())
            }
            Err(e) => {
                self.state.send_if_modified(|state| {
                    if *state == EngineState::Initializing {
                        *state = EngineState::Uninitialized;
                        true
                    } else {
                        false
                    }
                });
                tracing::warn!(engine = self.engine.name(), error = %e, "Transcode engine failed to initialize");
                Err(e)
            }
        }
    }

    /// Block until the engine is ready, initializing it if nobody has yet.
    pub async fn wait_ready(&self) -> PipcastResult<()> {
        match self.state() {
            EngineState::Ready => Ok(()),
            EngineState::Terminated => Err(PipcastError::EngineNotReady),
            EngineState::Uninitialized => self.initialize().await,
            EngineState::Initializing => self.wait_for_initialization().await,
        }
    }

    async fn wait_for_initialization(&self) -> PipcastResult<()> {
        let mut rx = self.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                EngineState::Ready => return Ok(()),
                EngineState::Terminated => return Err(PipcastError::EngineNotReady),
                EngineState::Uninitialized => {
                    return Err(PipcastError::transcode("engine initialization failed"))
                }
                EngineState::Initializing => {
                    if rx.changed().await.is_err() {
                        return Err(PipcastError::EngineNotReady);
                    }
                }
            }
        }
    }

    /// Convert `input` into `target`.
    ///
    /// Rejects with [`PipcastError::EngineNotReady`] before initialization has
    /// completed and with [`PipcastError::TranscoderBusy`] while another job
    /// runs. Engine failures are not errors here: they come back as a job
    /// whose outcome is [`TranscodeOutcome::Failure`].
    pub async fn transcode(
        &self,
        input: &Artifact,
        target: ContainerFormat,
        on_progress: Option<ProgressCallback>,
    ) -> PipcastResult<TranscodeJob> {
        if self.state() != EngineState::Ready {
            return Err(PipcastError::EngineNotReady);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PipcastError::TranscoderBusy);
        }
        let _in_flight = InFlight(&self.in_flight);

        let id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        let mut job = TranscodeJob::new(id, input.clone(), target);
        tracing::info!(
            job = id,
            from = %input.format(),
            to = %target,
            bytes = input.len(),
            "Transcode job started"
        );

        let progress = JobProgress::new(&self.progress, on_progress.as_ref());
        let result = if target == input.format() {
            Ok(input.bytes().to_vec())
        } else {
            self.engine
                .transcode(input, target, &|fraction| progress.report_fraction(fraction))
                .await
        };

        job.outcome = match result {
            Ok(bytes) if bytes.is_empty() => {
                TranscodeOutcome::Failure("engine produced an empty output".to_string())
            }
            Ok(bytes) => {
                progress.complete();
                TranscodeOutcome::Success(input.derive(target, bytes))
            }
            Err(e) => TranscodeOutcome::Failure(e.to_string()),
        };
        job.progress = progress.current();
        self.progress.send_replace(None);

        match &job.outcome {
            TranscodeOutcome::Success(artifact) => {
                tracing::info!(job = id, bytes = artifact.len(), "Transcode job succeeded")
            }
            TranscodeOutcome::Failure(reason) => {
                tracing::warn!(job = id, reason = %reason, progress = job.progress, "Transcode job failed")
            }
            TranscodeOutcome::Pending => {}
        }

        Ok(job)
    }

    /// Shut the engine down. Refused while a job is in flight.
    ///
    /// An initialization still in progress sees the terminated state when it
    /// completes, releases the engine and reports not-ready.
    pub async fn terminate(&self) -> PipcastResult<()> {
        if self.is_busy() {
            return Err(PipcastError::TranscoderBusy);
        }
        let previous = self.state.send_replace(EngineState::Terminated);
        if previous == EngineState::Ready {
            self.engine.terminate().await;
        }
        tracing::info!(engine = self.engine.name(), "Transcode engine terminated");
        Ok(())
    }
}
