//! Frame capture capability and its ffmpeg backend.
//!
//! A capture backend grabs one current frame from a stream address, or
//! fails. Backends are chosen once at startup from a closed config
//! variant; an unknown backend tag fails at config parse time.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::image::RawImage;
use crate::error::{Result, SceneVoteError};

/// Capability: fetch a single current frame from a capture address.
#[async_trait]
pub trait FrameCapture: Send + Sync {
    /// Grab one frame, bounded by `timeout`. Any failure (no stream,
    /// decode problem, timeout) is an error; the pipeline treats them all
    /// as transient.
    async fn capture(&self, address: &str, timeout: Duration) -> Result<RawImage>;
}

/// Closed set of capture backends.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum CaptureSpec {
    /// Single-frame grab through the ffmpeg CLI.
    Ffmpeg {
        /// Path to the ffmpeg binary.
        #[serde(default = "default_ffmpeg_binary")]
        binary: String,
    },
}

fn default_ffmpeg_binary() -> String {
    "ffmpeg".to_string()
}

impl CaptureSpec {
    /// Resolve the spec into a concrete backend.
    pub fn build(&self) -> Box<dyn FrameCapture> {
        match self {
            CaptureSpec::Ffmpeg { binary } => Box::new(FfmpegCapture::new(binary.clone())),
        }
    }
}

/// Captures one frame by running `ffmpeg -i <address> -vframes 1 -f
/// rawvideo -pix_fmt bgr24 -` and parsing the stream resolution from
/// ffmpeg's stderr.
pub struct FfmpegCapture {
    binary: String,
    resolution_re: Regex,
}

impl FfmpegCapture {
    /// Create a backend invoking the given ffmpeg binary.
    pub fn new(binary: String) -> Self {
        Self {
            binary,
            // ffmpeg prints the input resolution as ", WxH," in its
            // stream info lines.
            resolution_re: Regex::new(r", (\d+)x(\d+),").expect("static regex"),
        }
    }

    fn parse_resolution(&self, stderr: &str) -> Option<(u32, u32)> {
        let caps = self.resolution_re.captures(stderr)?;
        let width = caps.get(1)?.as_str().parse().ok()?;
        let height = caps.get(2)?.as_str().parse().ok()?;
        Some((width, height))
    }
}

#[async_trait]
impl FrameCapture for FfmpegCapture {
    async fn capture(&self, address: &str, timeout: Duration) -> Result<RawImage> {
        let fail = |reason: String| SceneVoteError::Capture {
            source_name: address.to_string(),
            reason,
        };

        let mut child = Command::new(&self.binary)
            .args([
                "-y",
                "-i",
                address,
                "-an",
                "-vframes",
                "1",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "bgr24",
                "-",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| fail(format!("spawn failed: {e}")))?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(fail(format!("wait failed: {e}"))),
            // kill_on_drop reaps the child when the future is dropped.
            Err(_) => return Err(fail("capture timed out".to_string())),
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        let (width, height) = self
            .parse_resolution(&stderr)
            .ok_or_else(|| fail("could not determine stream resolution".to_string()))?;
        debug!(address, width, height, "frame captured");

        RawImage::new(width, height, Bytes::from(output.stdout))
            .ok_or_else(|| fail("frame data does not match resolution".to_string()))
    }
}
