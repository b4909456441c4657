//! The external re-encoding engine contract.

use pipcast_common::error::PipcastResult;
use pipcast_media_model::{Artifact, ContainerFormat};

/// Lifecycle of the process-wide engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Not yet initialized, or a previous initialization failed.
    Uninitialized,
    /// Initialization in progress.
    Initializing,
    /// Ready to accept jobs.
    Ready,
    /// Shut down; no further jobs are accepted.
    Terminated,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Initializing => "initializing",
            EngineState::Ready => "ready",
            EngineState::Terminated => "terminated",
        }
    }
}

/// A stateful re-encoding backend, initialized once and reused across jobs.
#[async_trait::async_trait]
pub trait TranscodeEngine: Send + Sync {
    /// Backend name.
    fn name(&self) -> &str;

    /// One-time setup. May fail; may be retried after failure.
    async fn initialize(&self) -> PipcastResult<()>;

    /// Re-encode `input` into `target`, returning the encoded bytes.
    /// `progress` receives fractions in `[0.0, 1.0]`.
    ///
    /// Any intermediate storage created for the job must be released before
    /// this returns, on success and on failure alike.
    async fn transcode(
        &self,
        input: &Artifact,
        target: ContainerFormat,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> PipcastResult<Vec<u8>>;

    /// Release engine-wide resources.
    async fn terminate(&self);
}
