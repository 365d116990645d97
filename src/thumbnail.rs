//! Embedded thumbnail extraction via ExifTool
//!
//! ExifTool can address each embedded image of a RAW container by tag,
//! which LibRaw cannot. Every call shells out to the `exiftool` binary
//! under a wall-clock limit and degrades to "no data" on any problem.

use crate::error::Result;
use crate::tensor::{self, ImageTensor};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Limit for the `-ver` availability probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Limit for a single tag extraction
pub const EXTRACT_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variable naming an alternative exiftool binary
pub const EXIFTOOL_ENV: &str = "RAW_NODES_EXIFTOOL";

/// Embedded images ExifTool can pull out of a RAW file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailTag {
    /// Small ~4KB thumbnail (IFD1)
    ThumbnailImage,
    /// Medium ~150KB preview (IFD0)
    PreviewImage,
    /// Full-size JPEG render (IFD2)
    JpgFromRaw,
}

impl ThumbnailTag {
    pub const ALL: [ThumbnailTag; 3] = [
        ThumbnailTag::ThumbnailImage,
        ThumbnailTag::PreviewImage,
        ThumbnailTag::JpgFromRaw,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThumbnailTag::ThumbnailImage => "ThumbnailImage",
            ThumbnailTag::PreviewImage => "PreviewImage",
            ThumbnailTag::JpgFromRaw => "JpgFromRaw",
        }
    }
}

/// Result of a bounded tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Success(Vec<u8>),
    /// Reason is only used for logging
    Failure(String),
}

/// All three embedded images, each decoded when present
#[derive(Debug, Clone, Default)]
pub struct EmbeddedImages {
    pub thumbnail: Option<ImageTensor>,
    pub preview: Option<ImageTensor>,
    pub jpg_from_raw: Option<ImageTensor>,
}

pub struct ExifTool {
    program: PathBuf,
    probe_timeout: Duration,
    extract_timeout: Duration,
}

impl ExifTool {
    pub fn new() -> Self {
        Self::with_program("exiftool")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            probe_timeout: PROBE_TIMEOUT,
            extract_timeout: EXTRACT_TIMEOUT,
        }
    }

    /// `exiftool` unless overridden by `RAW_NODES_EXIFTOOL`
    pub fn from_env() -> Self {
        match std::env::var_os(EXIFTOOL_ENV) {
            Some(program) if !program.is_empty() => Self::with_program(program),
            _ => Self::new(),
        }
    }

    pub fn with_timeouts(mut self, probe: Duration, extract: Duration) -> Self {
        self.probe_timeout = probe;
        self.extract_timeout = extract;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Check that the tool launches and answers a version query
    pub fn available(&self) -> bool {
        self.version().is_some()
    }

    pub fn version(&self) -> Option<String> {
        match self.run(vec!["-ver".into()], self.probe_timeout) {
            ToolOutcome::Success(stdout) => Some(String::from_utf8_lossy(&stdout).trim().to_string()),
            ToolOutcome::Failure(reason) => {
                debug!("{} unavailable: {}", self.program.display(), reason);
                None
            }
        }
    }

    /// Binary payload of one embedded tag, `None` when missing or on any failure
    pub fn extract(&self, raw_path: &Path, tag: ThumbnailTag) -> Option<Vec<u8>> {
        let args = vec![
            OsString::from("-b"),
            OsString::from(format!("-{}", tag.as_str())),
            raw_path.as_os_str().to_owned(),
        ];

        match self.run(args, self.extract_timeout) {
            ToolOutcome::Success(bytes) if bytes.is_empty() => {
                debug!("No {} in {}", tag.as_str(), raw_path.display());
                None
            }
            ToolOutcome::Success(bytes) => {
                debug!("Extracted {} ({} bytes) from {}", tag.as_str(), bytes.len(), raw_path.display());
                Some(bytes)
            }
            ToolOutcome::Failure(reason) => {
                debug!("{} extraction failed for {}: {}", tag.as_str(), raw_path.display(), reason);
                None
            }
        }
    }

    /// Extract and decode a tag in one step
    pub fn extract_image(&self, raw_path: &Path, tag: ThumbnailTag) -> Option<ImageTensor> {
        let bytes = self.extract(raw_path, tag)?;
        match bytes_to_tensor(&bytes) {
            Ok(tensor) => Some(tensor),
            Err(e) => {
                warn!("{} from {} is not a decodable JPEG: {}", tag.as_str(), raw_path.display(), e);
                None
            }
        }
    }

    pub fn extract_all(&self, raw_path: &Path) -> EmbeddedImages {
        EmbeddedImages {
            thumbnail: self.extract_image(raw_path, ThumbnailTag::ThumbnailImage),
            preview: self.extract_image(raw_path, ThumbnailTag::PreviewImage),
            jpg_from_raw: self.extract_image(raw_path, ThumbnailTag::JpgFromRaw),
        }
    }

    /// Run the tool to completion or until `limit` elapses, killing it on timeout
    fn run(&self, args: Vec<OsString>, limit: Duration) -> ToolOutcome {
        // A runtime thread cannot block_on, so hand the call to a helper thread
        if tokio::runtime::Handle::try_current().is_ok() {
            return std::thread::scope(|scope| {
                scope
                    .spawn(|| self.run_blocking(&args, limit))
                    .join()
                    .unwrap_or_else(|_| ToolOutcome::Failure("exiftool worker panicked".to_string()))
            });
        }
        self.run_blocking(&args, limit)
    }

    fn run_blocking(&self, args: &[OsString], limit: Duration) -> ToolOutcome {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => return ToolOutcome::Failure(format!("Failed to start runtime: {}", e)),
        };

        runtime.block_on(async {
            let mut cmd = Command::new(&self.program);
            cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);

            match tokio::time::timeout(limit, cmd.output()).await {
                Err(_) => ToolOutcome::Failure(format!("timed out after {:?}", limit)),
                Ok(Err(e)) => ToolOutcome::Failure(e.to_string()),
                Ok(Ok(output)) if !output.status.success() => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    ToolOutcome::Failure(format!("{}: {}", output.status, stderr.trim()))
                }
                Ok(Ok(output)) => ToolOutcome::Success(output.stdout),
            }
        })
    }
}

impl Default for ExifTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a JPEG payload into a `(1, H, W, 3)` tensor
pub fn bytes_to_tensor(jpeg_bytes: &[u8]) -> Result<ImageTensor> {
    let rgb = tensor::decode_jpeg(jpeg_bytes)?;
    Ok(tensor::rgb8_to_tensor(&rgb))
}
