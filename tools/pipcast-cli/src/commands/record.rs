//! Record command: composite display + camera into a WebM stream.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pipcast_capture_engine::{
    Advisory, DeliveryReport, DirectoryDelivery, GstFrameSource, GstStreamEncoder,
    OutputDelivery, RecordingController, RecordingState, SessionSettings, StartOutcome,
    SyntheticSource,
};
use pipcast_common::config::AppConfig;
use pipcast_media_model::{DeliveryFormat, FrameSource, OverlayGeometry, SourceKind};
use pipcast_transcoder::Transcoder;

const SOURCE_READY_TIMEOUT: Duration = Duration::from_secs(5);
const SYNTHETIC_CAMERA_SIZE: (u32, u32) = (640, 360);

/// Command-line overrides on top of the configured recording defaults.
pub struct RecordOptions {
    pub output: Option<PathBuf>,
    pub delivery: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub overlay: Option<String>,
    pub mirror: bool,
    pub microphone: bool,
    pub synthetic: bool,
    pub duration: Option<u64>,
}

pub async fn run(config: &AppConfig, options: RecordOptions) -> anyhow::Result<()> {
    let settings = build_settings(config, &options)?;
    let output_dir = options
        .output
        .clone()
        .unwrap_or_else(|| config.output_dir.clone());

    println!("Starting PipCast recording");
    println!("  Output: {}", output_dir.display());
    println!(
        "  Surface: {}x{} @ {}fps",
        settings.width, settings.height, settings.fps
    );
    println!(
        "  Overlay: {},{} {}x{}{}",
        settings.overlay.geometry.x(),
        settings.overlay.geometry.y(),
        settings.overlay.geometry.width(),
        settings.overlay.geometry.height(),
        if settings.overlay.mirror { " (mirrored)" } else { "" }
    );
    println!("  Delivery: {}", settings.delivery);
    println!(
        "  Microphone: {}",
        if settings.microphone.is_some() { "on" } else { "off" }
    );

    let (display, camera, animators) = if options.synthetic {
        println!("  Sources: synthetic test patterns");
        synthetic_sources(settings.width, settings.height, settings.fps)
    } else {
        let (display, camera) = device_sources()?;
        (display, camera, Vec::new())
    };

    let transcoder = Transcoder::global(&config.transcode);
    if settings.delivery == DeliveryFormat::Alternate {
        // Warm the engine up while recording so stop does not wait on it.
        let transcoder = transcoder.clone();
        tokio::spawn(async move {
            if let Err(e) = transcoder.initialize().await {
                tracing::warn!(error = %e, "Transcoder unavailable; recording will be saved as webm");
            }
        });
    }

    let mut controller =
        RecordingController::new(display, camera, Box::new(GstStreamEncoder::new()))
            .with_transcoder(transcoder.clone());

    match controller.start(settings).await? {
        StartOutcome::Started { session_id } => {
            println!("\nRecording session {session_id}. Press Ctrl+C to stop.");
        }
        StartOutcome::AlreadyRunning => anyhow::bail!("a recording is already running"),
    }

    let aborted = record_until_stopped(&mut controller, options.duration).await;

    println!("\nStopping...");
    let delivery = DirectoryDelivery::new(&output_dir);
    let report = controller
        .stop_and_deliver(&delivery, Some(super::print_progress("Converting")))
        .await;

    for handle in animators {
        handle.abort();
    }
    if let Err(e) = transcoder.terminate().await {
        tracing::debug!(error = %e, "Transcoder not terminated");
    }

    match report {
        DeliveryReport::Delivered { artifact, warning } => {
            if let Some(warning) = warning {
                println!("[WARN] {warning}");
            }
            println!("Saved: {}", delivery.path_for(&artifact).display());
            println!("  Format: {}", artifact.format());
            if let Some(secs) = artifact.duration_secs() {
                println!("  Duration: {}", format_elapsed(secs));
            }
            println!("  Size: {} bytes", artifact.len());
            Ok(())
        }
        DeliveryReport::Undelivered { artifact, reason } => {
            println!("[ERROR] Could not save to {}: {reason}", output_dir.display());
            let rescue = DirectoryDelivery::new(std::env::temp_dir());
            match rescue.deliver(&artifact, Some(&reason)) {
                Ok(()) => {
                    println!("Saved instead: {}", rescue.path_for(&artifact).display());
                    Ok(())
                }
                Err(e) => anyhow::bail!("recording lost: {reason}; {e}"),
            }
        }
        DeliveryReport::Abandoned { reason } => {
            anyhow::bail!("recording abandoned: {reason}")
        }
        DeliveryReport::NotRecording => match aborted {
            Some(reason) => anyhow::bail!("recording abandoned: {reason}"),
            None => anyhow::bail!("no recording was active"),
        },
    }
}

/// Runs until Ctrl+C, the optional duration elapses, or the session dies.
/// Returns the encoder failure reason when the session was abandoned.
async fn record_until_stopped(
    controller: &mut RecordingController,
    duration: Option<u64>,
) -> Option<String> {
    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            _ = &mut ctrl_c => return None,
            _ = &mut deadline => return None,
            _ = ticker.tick() => {
                let mut failure = None;
                for advisory in controller.poll().await {
                    match advisory {
                        Advisory::Source { kind, message } => {
                            println!("\n[WARN] {} source: {message}", kind.as_str());
                        }
                        Advisory::EncoderFailed { reason, .. } => {
                            println!("\n[ERROR] Encoder failed: {reason}");
                            failure = Some(reason);
                        }
                    }
                }
                if failure.is_some() || controller.state() != RecordingState::Active {
                    return failure;
                }
                if let Some(secs) = controller.elapsed_seconds() {
                    use std::io::Write;
                    let bytes = controller.session().map_or(0, |s| s.encoded_bytes());
                    print!(
                        "\r  Recording: {}  ({} chunks, {} bytes)",
                        format_elapsed(secs),
                        controller.chunk_count(),
                        bytes
                    );
                    let _ = std::io::stdout().flush();
                }
            }
        }
    }
}

fn build_settings(config: &AppConfig, options: &RecordOptions) -> anyhow::Result<SessionSettings> {
    let mut defaults = config.recording.clone();
    if let Some(width) = options.width {
        defaults.width = width;
    }
    if let Some(height) = options.height {
        defaults.height = height;
    }
    if let Some(delivery) = &options.delivery {
        defaults.delivery_format = delivery.clone();
    }
    defaults.mirror_camera &= options.mirror;
    defaults.capture_microphone &= options.microphone && !options.synthetic;

    let mut settings = SessionSettings::from_defaults(&defaults)?;
    if let Some(overlay) = &options.overlay {
        settings.overlay.geometry = OverlayGeometry::parse(overlay)?;
    }
    Ok(settings)
}

type Sources = (
    Arc<dyn FrameSource>,
    Arc<dyn FrameSource>,
    Vec<tokio::task::JoinHandle<()>>,
);

fn synthetic_sources(width: u32, height: u32, fps: u32) -> Sources {
    let (cam_w, cam_h) = SYNTHETIC_CAMERA_SIZE;
    let display = Arc::new(SyntheticSource::with_pattern(SourceKind::Display, width, height));
    let camera = Arc::new(SyntheticSource::with_pattern(SourceKind::Camera, cam_w, cam_h));
    let animators = vec![
        display.animate(width, height, fps),
        camera.animate(cam_w, cam_h, fps),
    ];
    (display, camera, animators)
}

fn device_sources() -> anyhow::Result<(Arc<dyn FrameSource>, Arc<dyn FrameSource>)> {
    let display = GstFrameSource::display(true)?;
    let camera = GstFrameSource::camera(None)?;

    // Both waits block on GStreamer state changes.
    tokio::task::block_in_place(|| {
        for source in [&display, &camera] {
            if source.wait_ready(SOURCE_READY_TIMEOUT) {
                println!("  [OK] {} source ready", source.kind().as_str());
            } else {
                println!(
                    "  [WARN] {} source not ready after {}s",
                    source.kind().as_str(),
                    SOURCE_READY_TIMEOUT.as_secs()
                );
            }
        }
    });

    Ok((Arc::new(display), Arc::new(camera)))
}

fn format_elapsed(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> RecordOptions {
        RecordOptions {
            output: None,
            delivery: None,
            width: None,
            height: None,
            overlay: None,
            mirror: true,
            microphone: true,
            synthetic: false,
            duration: None,
        }
    }

    #[test]
    fn overrides_apply_on_top_of_config() {
        let config = AppConfig::default();
        let settings = build_settings(
            &config,
            &RecordOptions {
                delivery: Some("alternate".into()),
                width: Some(640),
                height: Some(360),
                mirror: false,
                synthetic: true,
                ..options()
            },
        )
        .unwrap();

        assert_eq!((settings.width, settings.height), (640, 360));
        assert_eq!(settings.delivery, DeliveryFormat::Alternate);
        assert!(!settings.overlay.mirror);
        assert!(settings.microphone.is_none());
        assert!(settings.overlay.geometry.fits_within(640, 360));
    }

    #[test]
    fn explicit_overlay_replaces_default() {
        let settings = build_settings(
            &AppConfig::default(),
            &RecordOptions {
                overlay: Some("10,20,300,200".into()),
                ..options()
            },
        )
        .unwrap();
        assert_eq!(
            settings.overlay.geometry,
            OverlayGeometry::new(10, 20, 300, 200).unwrap()
        );
        assert!(settings.microphone.is_some());
    }

    #[test]
    fn rejects_unknown_delivery() {
        let result = build_settings(
            &AppConfig::default(),
            &RecordOptions {
                delivery: Some("gif".into()),
                ..options()
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn elapsed_is_minutes_and_seconds() {
        assert_eq!(format_elapsed(0), "00:00");
        assert_eq!(format_elapsed(125), "02:05");
    }
}
