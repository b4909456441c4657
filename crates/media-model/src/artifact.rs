//! Finished recordings and their container formats.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Filename prefix for every artifact.
pub const ARTIFACT_PREFIX: &str = "presentation";

/// Container encoding of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerFormat {
    /// Native capture format (VP8/Opus in WebM).
    Webm,
    /// Alternate delivery format (H.264/AAC in MP4), produced by transcoding.
    Mp4,
}

impl ContainerFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Webm => "webm",
            ContainerFormat::Mp4 => "mp4",
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// The delivery format chosen before a session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryFormat {
    /// Deliver the captured WebM as-is.
    #[default]
    Native,
    /// Transcode to MP4 before delivery.
    Alternate,
}

impl DeliveryFormat {
    /// Container the user ends up with when everything succeeds.
    pub fn container(&self) -> ContainerFormat {
        match self {
            DeliveryFormat::Native => ContainerFormat::Webm,
            DeliveryFormat::Alternate => ContainerFormat::Mp4,
        }
    }

    pub fn needs_transcode(&self) -> bool {
        self.container() != ContainerFormat::Webm
    }
}

impl fmt::Display for DeliveryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryFormat::Native => write!(f, "native ({})", self.container()),
            DeliveryFormat::Alternate => write!(f, "alternate ({})", self.container()),
        }
    }
}

impl FromStr for DeliveryFormat {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "webm" => Ok(DeliveryFormat::Native),
            "alternate" | "mp4" => Ok(DeliveryFormat::Alternate),
            _ => Err(ModelError::UnknownDeliveryFormat {
                value: s.to_string(),
            }),
        }
    }
}

/// Suggested filename: `presentation-<UTC start, second precision, colons as hyphens>.<ext>`.
pub fn artifact_filename(started_at: DateTime<Utc>, format: ContainerFormat) -> String {
    format!(
        "{ARTIFACT_PREFIX}-{}.{}",
        started_at.format("%Y-%m-%dT%H-%M-%S"),
        format.extension()
    )
}

/// An immutable, finished recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    format: ContainerFormat,
    started_at: DateTime<Utc>,
    /// Recorded duration, when known. Streamed WebM carries no duration header.
    duration_secs: Option<u64>,
    bytes: Arc<[u8]>,
}

impl Artifact {
    pub fn new(
        format: ContainerFormat,
        started_at: DateTime<Utc>,
        duration_secs: Option<u64>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            format,
            started_at,
            duration_secs,
            bytes: bytes.into(),
        }
    }

    /// Concatenate encoded chunks in order into a single artifact.
    pub fn from_chunks(
        format: ContainerFormat,
        started_at: DateTime<Utc>,
        duration_secs: Option<u64>,
        chunks: &[Vec<u8>],
    ) -> Self {
        let total = chunks.iter().map(Vec::len).sum();
        let mut bytes = Vec::with_capacity(total);
        for chunk in chunks {
            bytes.extend_from_slice(chunk);
        }
        Self::new(format, started_at, duration_secs, bytes)
    }

    /// Same recording re-encoded into another container.
    pub fn derive(&self, format: ContainerFormat, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::new(format, self.started_at, self.duration_secs, bytes)
    }

    pub fn format(&self) -> ContainerFormat {
        self.format
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn duration_secs(&self) -> Option<u64> {
        self.duration_secs
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Suggested filename derived from the session start timestamp.
    pub fn filename(&self) -> String {
        artifact_filename(self.started_at, self.format)
    }
}
