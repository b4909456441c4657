//! Hand-off of finished recordings.

use std::path::{Path, PathBuf};

use pipcast_common::error::{PipcastError, PipcastResult};
use pipcast_media_model::{Artifact, DeliveryFormat};
use pipcast_transcoder::{ProgressCallback, TranscodeOutcome, Transcoder};

/// Receives the final artifact of a session.
pub trait OutputDelivery: Send + Sync {
    /// Persist `artifact` under its suggested filename. `warning` carries a
    /// non-blocking notice for the user, e.g. a transcode fallback.
    fn deliver(&self, artifact: &Artifact, warning: Option<&str>) -> PipcastResult<()>;
}

/// Writes artifacts into a directory, creating it when missing.
#[derive(Debug, Clone)]
pub struct DirectoryDelivery {
    dir: PathBuf,
}

impl DirectoryDelivery {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where `artifact` is (or would be) written.
    pub fn path_for(&self, artifact: &Artifact) -> PathBuf {
        self.dir.join(artifact.filename())
    }
}

impl OutputDelivery for DirectoryDelivery {
    fn deliver(&self, artifact: &Artifact, warning: Option<&str>) -> PipcastResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            PipcastError::delivery(format!("Cannot create {}: {e}", self.dir.display()))
        })?;
        let path = self.path_for(artifact);
        std::fs::write(&path, artifact.bytes())
            .map_err(|e| PipcastError::delivery(format!("Cannot write {}: {e}", path.display())))?;

        if let Some(warning) = warning {
            tracing::warn!(path = %path.display(), warning, "Recording saved with warning");
        } else {
            tracing::info!(path = %path.display(), bytes = artifact.len(), "Recording saved");
        }
        Ok(())
    }
}

/// What reached the user at the end of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryReport {
    /// An artifact was delivered, possibly in the fallback format.
    Delivered {
        artifact: Artifact,
        warning: Option<String>,
    },
    /// The recording finished but could not be handed off. The caller still
    /// holds the artifact.
    Undelivered { artifact: Artifact, reason: String },
    /// The session ended without an artifact.
    Abandoned { reason: String },
    /// No session was active.
    NotRecording,
}

impl DeliveryReport {
    /// The finished recording, whether or not it was handed off.
    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            DeliveryReport::Delivered { artifact, .. }
            | DeliveryReport::Undelivered { artifact, .. } => Some(artifact),
            _ => None,
        }
    }

    pub fn warning(&self) -> Option<&str> {
        match self {
            DeliveryReport::Delivered { warning, .. } => warning.as_deref(),
            _ => None,
        }
    }
}

/// Deliver `artifact` in the `requested` format.
///
/// When a transcode is needed and anything about it fails, the original
/// artifact is delivered instead together with a warning. If handing off the
/// converted artifact fails, the original is tried next. A recording that
/// cannot be delivered at all comes back in [`DeliveryReport::Undelivered`].
pub async fn deliver_with_fallback(
    artifact: Artifact,
    requested: DeliveryFormat,
    transcoder: Option<&Transcoder>,
    delivery: &dyn OutputDelivery,
    on_progress: Option<ProgressCallback>,
) -> DeliveryReport {
    let (primary, warning) = if requested.container() == artifact.format() {
        (artifact.clone(), None)
    } else {
        match transcode(&artifact, requested, transcoder, on_progress).await {
            Ok(converted) => (converted, None),
            Err(reason) => {
                let warning = format!(
                    "Conversion to {} failed ({reason}); saved as {} instead",
                    requested.container(),
                    artifact.format()
                );
                tracing::warn!(reason = %reason, "Falling back to captured format");
                (artifact.clone(), Some(warning))
            }
        }
    };

    let error = match delivery.deliver(&primary, warning.as_deref()) {
        Ok(()) => {
            return DeliveryReport::Delivered {
                artifact: primary,
                warning,
            }
        }
        Err(e) => e,
    };
    if primary.format() == artifact.format() {
        tracing::warn!(error = %error, filename = %artifact.filename(), "Recording could not be delivered");
        return DeliveryReport::Undelivered {
            artifact,
            reason: error.to_string(),
        };
    }

    tracing::warn!(error = %error, "Delivering converted recording failed; retrying with original");
    let warning = format!(
        "Saving as {} failed ({error}); saved as {} instead",
        primary.format(),
        artifact.format()
    );
    match delivery.deliver(&artifact, Some(&warning)) {
        Ok(()) => DeliveryReport::Delivered {
            artifact,
            warning: Some(warning),
        },
        Err(retry) => {
            tracing::warn!(error = %retry, filename = %artifact.filename(), "Recording could not be delivered");
            DeliveryReport::Undelivered {
                artifact,
                reason: retry.to_string(),
            }
        }
    }
}

async fn transcode(
    artifact: &Artifact,
    requested: DeliveryFormat,
    transcoder: Option<&Transcoder>,
    on_progress: Option<ProgressCallback>,
) -> Result<Artifact, String> {
    let transcoder = transcoder.ok_or_else(|| "no transcoder configured".to_string())?;
    transcoder.wait_ready().await.map_err(|e| e.to_string())?;
    let job = transcoder
        .transcode(artifact, requested.container(), on_progress)
        .await
        .map_err(|e| e.to_string())?;
    match job.into_outcome() {
        TranscodeOutcome::Success(converted) => Ok(converted),
        TranscodeOutcome::Failure(reason) => Err(reason),
        TranscodeOutcome::Pending => Err("transcode did not complete".to_string()),
    }
}
