//! Transcode command: convert an existing WebM recording to MP4.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use pipcast_capture_engine::{DirectoryDelivery, OutputDelivery};
use pipcast_common::config::AppConfig;
use pipcast_media_model::{Artifact, ContainerFormat};
use pipcast_transcoder::{TranscodeOutcome, Transcoder};

pub async fn run(
    config: &AppConfig,
    input: PathBuf,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let extension = input
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    if extension.as_deref() != Some(ContainerFormat::Webm.extension()) {
        anyhow::bail!("expected a .webm recording, got {}", input.display());
    }

    let metadata = tokio::fs::metadata(&input).await?;
    // Output naming follows the recording's timestamp; the file mtime is
    // the closest record of it.
    let started_at: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    let bytes = tokio::fs::read(&input).await?;
    let artifact = Artifact::new(ContainerFormat::Webm, started_at, None, bytes);

    let output_dir = output.unwrap_or_else(|| {
        input
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    });

    println!("Transcoding {}", input.display());
    println!("  Input size: {} bytes", artifact.len());

    let transcoder = Transcoder::global(&config.transcode);
    transcoder.initialize().await?;
    let job = transcoder
        .transcode(
            &artifact,
            ContainerFormat::Mp4,
            Some(super::print_progress("Progress")),
        )
        .await;
    if let Err(e) = transcoder.terminate().await {
        tracing::debug!(error = %e, "Transcoder not terminated");
    }

    match job?.into_outcome() {
        TranscodeOutcome::Success(converted) => {
            let delivery = DirectoryDelivery::new(&output_dir);
            delivery.deliver(&converted, None)?;
            println!("Saved: {}", delivery.path_for(&converted).display());
            println!("  Output size: {} bytes", converted.len());
            Ok(())
        }
        TranscodeOutcome::Failure(reason) => {
            println!();
            anyhow::bail!("transcode failed: {reason}")
        }
        TranscodeOutcome::Pending => anyhow::bail!("transcode did not complete"),
    }
}
