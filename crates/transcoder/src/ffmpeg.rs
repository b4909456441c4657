//! ffmpeg-backed transcode engine.
//!
//! Each job gets a scratch directory under the engine's working directory.
//! The input artifact is written there, ffmpeg converts it while streaming
//! `-progress` key/value pairs on stdout, and the scratch directory is
//! removed before the job result is returned.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use pipcast_common::config::TranscodeConfig;
use pipcast_common::error::{PipcastError, PipcastResult};
use pipcast_media_model::{Artifact, ContainerFormat};
use tokio::sync::mpsc;

use crate::engine::TranscodeEngine;

pub struct FfmpegEngine {
    config: TranscodeConfig,
    work_dir: Mutex<Option<PathBuf>>,
    next_scratch_id: AtomicU64,
}

impl FfmpegEngine {
    pub fn new(config: TranscodeConfig) -> Self {
        Self {
            config,
            work_dir: Mutex::new(None),
            next_scratch_id: AtomicU64::new(1),
        }
    }

    fn work_dir(&self) -> Option<PathBuf> {
        self.work_dir.lock().ok().and_then(|dir| dir.clone())
    }

    fn base_dir(&self) -> PathBuf {
        self.config
            .work_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
            .join(format!("pipcast-engine-{}", std::process::id()))
    }
}

#[async_trait::async_trait]
impl TranscodeEngine for FfmpegEngine {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn initialize(&self) -> PipcastResult<()> {
        let ffmpeg = self.config.ffmpeg_path.clone();
        let dir = self.base_dir();
        let prepared = dir.clone();

        tokio::task::spawn_blocking(move || -> PipcastResult<()> {
            let version = probe_ffmpeg_version(&ffmpeg).ok_or_else(|| {
                PipcastError::unsupported(format!("'{ffmpeg}' is not runnable (expected ffmpeg in PATH)"))
            })?;
            tracing::info!(version = %version, "Found ffmpeg");
            std::fs::create_dir_all(&prepared)?;
            Ok(())
        })
        .await
        .map_err(|e| PipcastError::transcode(format!("Engine initialization task failed: {e}")))??;

        if let Ok(mut slot) = self.work_dir.lock() {
            *slot = Some(dir);
        }
        Ok(())
    }

    async fn transcode(
        &self,
        input: &Artifact,
        target: ContainerFormat,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> PipcastResult<Vec<u8>> {
        if target != ContainerFormat::Mp4 {
            return Err(PipcastError::unsupported(format!(
                "ffmpeg engine cannot produce {target}"
            )));
        }
        let work_dir = self.work_dir().ok_or(PipcastError::EngineNotReady)?;
        let scratch_id = self.next_scratch_id.fetch_add(1, Ordering::SeqCst);
        let request = FfmpegRequest {
            config: self.config.clone(),
            scratch: work_dir.join(format!("job-{scratch_id}")),
            input_format: input.format(),
            target,
            duration_hint_secs: input.duration_secs(),
            input: input.bytes().to_vec(),
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<f64>();
        let task = tokio::task::spawn_blocking(move || run_job(request, tx));

        // Channel closes when the blocking job returns.
        while let Some(fraction) = rx.recv().await {
            progress(fraction);
        }

        task.await
            .map_err(|e| PipcastError::transcode(format!("ffmpeg job task failed: {e}")))?
    }

    async fn terminate(&self) {
        let dir = self.work_dir.lock().ok().and_then(|mut slot| slot.take());
        if let Some(dir) = dir {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove engine work dir");
            }
        }
    }
}

struct FfmpegRequest {
    config: TranscodeConfig,
    scratch: PathBuf,
    input_format: ContainerFormat,
    target: ContainerFormat,
    duration_hint_secs: Option<u64>,
    input: Vec<u8>,
}

/// Scratch directory removed on drop.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(path: PathBuf) -> PipcastResult<Self> {
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            tracing::warn!(dir = %self.path.display(), error = %e, "Failed to remove scratch dir");
        }
    }
}

fn run_job(request: FfmpegRequest, progress: mpsc::UnboundedSender<f64>) -> PipcastResult<Vec<u8>> {
    let scratch = ScratchDir::create(request.scratch.clone())?;
    let input_path = scratch
        .path()
        .join(format!("input.{}", request.input_format.extension()));
    let output_path = scratch
        .path()
        .join(format!("output.{}", request.target.extension()));

    std::fs::write(&input_path, &request.input)?;

    let duration_secs = request
        .duration_hint_secs
        .filter(|secs| *secs > 0)
        .map(|secs| secs as f64)
        .or_else(|| probe_duration_secs(&request.config.ffprobe_path, &input_path))
        .unwrap_or(0.0);

    let args = transcode_args(&request.config, &input_path, &output_path);
    run_ffmpeg(&request.config.ffmpeg_path, &args, duration_secs, &progress)?;

    let bytes = std::fs::read(&output_path)?;
    drop(scratch);
    Ok(bytes)
}

fn run_ffmpeg(
    ffmpeg: &str,
    args: &[String],
    expected_duration_secs: f64,
    progress: &mpsc::UnboundedSender<f64>,
) -> PipcastResult<()> {
    tracing::debug!(?args, "Running ffmpeg");
    let mut child = Command::new(ffmpeg)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PipcastError::transcode(format!("Failed to start ffmpeg: {e}")))?;

    tracing::info!(pid = child.id(), expected_duration_secs, "ffmpeg process started");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| PipcastError::transcode("Failed to capture ffmpeg stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| PipcastError::transcode("Failed to capture ffmpeg stderr"))?;

    // Drain stderr concurrently to avoid ffmpeg blocking on a full stderr pipe.
    let stderr_task = std::thread::spawn(move || -> String {
        let mut reader = BufReader::new(stderr);
        let mut output = String::new();
        match reader.read_to_string(&mut output) {
            Ok(_) => output,
            Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
        }
    });

    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    let mut state = ProgressState::default();
    loop {
        line.clear();
        let bytes = reader
            .read_line(&mut line)
            .map_err(|e| PipcastError::transcode(format!("Failed reading ffmpeg progress: {e}")))?;
        if bytes == 0 {
            break;
        }

        if let Some((key, value)) = line.trim().split_once('=') {
            state.update(key, value);
            if key == "progress" {
                // Receiver gone means nobody is listening; keep converting.
                let _ = progress.send(progress_fraction(&state, expected_duration_secs));
            }
        }
    }

    let status = child
        .wait()
        .map_err(|e| PipcastError::transcode(format!("Failed to wait on ffmpeg: {e}")))?;

    let stderr_output = stderr_task
        .join()
        .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

    if !status.success() {
        return Err(PipcastError::transcode(format!(
            "ffmpeg failed (status {}): {}",
            status,
            stderr_output.trim()
        )));
    }

    Ok(())
}

fn transcode_args(config: &TranscodeConfig, input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-fflags".to_string(),
        "+genpts".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-c:v".to_string(),
        config.video_codec.clone(),
        "-preset".to_string(),
        config.preset.clone(),
        "-crf".to_string(),
        config.crf.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:a".to_string(),
        config.audio_codec.clone(),
        "-b:a".to_string(),
        format!("{}k", config.audio_bitrate_kbps.max(32)),
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-nostats".to_string(),
        output.to_string_lossy().into_owned(),
    ]
}

fn probe_ffmpeg_version(ffmpeg: &str) -> Option<String> {
    let output = Command::new(ffmpeg).arg("-version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let raw = String::from_utf8_lossy(&output.stdout);
    raw.lines().next().map(|line| line.trim().to_string())
}

fn probe_duration_secs(ffprobe: &str, path: &Path) -> Option<f64> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let raw = String::from_utf8(output.stdout).ok()?;
    let secs = raw.lines().next()?.trim().parse::<f64>().ok()?;
    (secs.is_finite() && secs > 0.0).then_some(secs)
}

#[derive(Debug, Default)]
struct ProgressState {
    out_time_secs: f64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            // ffmpeg reports microseconds under both names.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }
}

fn progress_fraction(state: &ProgressState, expected_duration_secs: f64) -> f64 {
    if state.complete {
        return 1.0;
    }
    if expected_duration_secs <= 0.0 {
        return 0.0;
    }
    (state.out_time_secs / expected_duration_secs).clamp(0.0, 1.0)
}
