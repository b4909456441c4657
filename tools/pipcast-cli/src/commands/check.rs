//! Check encoder, capture and transcoder availability.

use std::path::PathBuf;

use pipcast_capture_engine::{element_available, CAPTURE_ELEMENTS, REQUIRED_ELEMENTS};
use pipcast_common::config::{config_file_path, AppConfig};
use pipcast_transcoder::Transcoder;

/// `write_config` saves the effective configuration to that path first.
pub async fn run(config: &AppConfig, write_config: Option<PathBuf>) -> anyhow::Result<()> {
    println!("PipCast System Check");
    println!("{}", "=".repeat(50));

    if let Some(path) = &write_config {
        config.save_to(path)?;
        println!("[OK] Config written: {}", path.display());
    }
    let path = write_config.unwrap_or_else(config_file_path);
    if path.exists() {
        println!("[OK] Config: {}", path.display());
    } else {
        println!("[OK] Config: defaults ({} not found)", path.display());
    }
    println!("{}", serde_json::to_string_pretty(config)?);

    println!();
    println!("GStreamer encoder elements:");
    let mut encoder_ok = true;
    for name in REQUIRED_ELEMENTS {
        let available = element_available(name)?;
        encoder_ok &= available;
        println!("  [{}] {name}", if available { "OK" } else { "MISSING" });
    }

    println!();
    println!("Capture elements:");
    for name in CAPTURE_ELEMENTS {
        let available = element_available(name)?;
        println!("  [{}] {name}", if available { "OK" } else { "WARN" });
    }

    println!();
    let transcoder = Transcoder::global(&config.transcode);
    let transcode_ok = match transcoder.initialize().await {
        Ok(()) => {
            println!("[OK] Transcoder: {} ({})", transcoder.engine_name(), config.transcode.ffmpeg_path);
            true
        }
        Err(e) => {
            println!("[WARN] Transcoder: {e}");
            false
        }
    };
    if let Err(e) = transcoder.terminate().await {
        tracing::debug!(error = %e, "Transcoder not terminated");
    }

    println!();
    match (encoder_ok, transcode_ok) {
        (true, true) => println!("All components are available. PipCast is ready."),
        (true, false) => {
            println!("Recording works; mp4 delivery will fall back to webm until ffmpeg is installed.")
        }
        (false, _) => println!("Required GStreamer elements are missing; recording will fail."),
    }

    Ok(())
}
