//! Fixed-rate render loop feeding the encoder.
//!
//! The loop owns the compositor and the encoder's frame sink for the
//! lifetime of a session. Each tick composites the latest source frames and
//! pushes the surface; when nothing changed the previous composite is pushed
//! again so the stream keeps its rate.

use std::sync::Arc;

use pipcast_common::clock::frame_interval;
use pipcast_compositor::{Compositor, TickOutcome};
use pipcast_media_model::{FrameSource, OverlayState};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::encoder::{EncoderEvent, EncoderEvents, FrameSink};

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub ticks: u64,
    pub composed: u64,
    pub repeated: u64,
}

/// Everything the loop owns while it runs.
pub(crate) struct RenderInputs {
    pub display: Arc<dyn FrameSource>,
    pub camera: Arc<dyn FrameSource>,
    pub overlay: watch::Receiver<OverlayState>,
    pub compositor: Compositor,
    pub sink: Box<dyn FrameSink>,
    pub fps: u32,
    /// Frames already pushed before the loop started.
    pub first_sequence: u64,
    pub events: EncoderEvents,
}

/// Handle to a running render loop.
pub(crate) struct RenderLoop {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<RenderStats>,
}

impl RenderLoop {
    pub fn spawn(inputs: RenderInputs) -> Self {
        let (cancel, cancelled) = oneshot::channel();
        let handle = tokio::spawn(run(inputs, cancelled));
        Self { cancel, handle }
    }

    /// Cancel the loop and wait for it to exit. No tick runs after this returns.
    pub async fn stop(self) -> RenderStats {
        let _ = self.cancel.send(());
        match self.handle.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(error = %e, "Render loop task failed");
                RenderStats::default()
            }
        }
    }
}

async fn run(mut inputs: RenderInputs, mut cancelled: oneshot::Receiver<()>) -> RenderStats {
    let mut stats = RenderStats::default();
    let mut sequence = inputs.first_sequence;
    let mut ticker = tokio::time::interval(frame_interval(inputs.fps));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; that frame was pushed at start.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = &mut cancelled => break,
            _ = ticker.tick() => {}
        }

        stats.ticks += 1;
        let overlay = *inputs.overlay.borrow_and_update();
        match inputs
            .compositor
            .tick(inputs.display.as_ref(), inputs.camera.as_ref(), &overlay)
        {
            TickOutcome::Composed => stats.composed += 1,
            TickOutcome::Repeated => stats.repeated += 1,
        }

        let frame = inputs.compositor.surface().snapshot(sequence);
        sequence += 1;
        if let Err(e) = inputs.sink.push(&frame) {
            tracing::warn!(error = %e, sequence, "Encoder rejected composited frame");
            let _ = inputs.events.send(EncoderEvent::Failed(e.to_string()));
            break;
        }
    }

    tracing::debug!(
        ticks = stats.ticks,
        composed = stats.composed,
        repeated = stats.repeated,
        "Render loop exited"
    );
    stats
}
