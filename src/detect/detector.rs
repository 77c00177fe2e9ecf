//! Subject detection capability.
//!
//! The model itself is external; the pipeline only needs a boolean
//! "subject seen" per frame. Detectors are chosen once at startup from a
//! closed config variant.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::image::RawImage;
use crate::error::{Result, SceneVoteError};

/// Capability: decide whether the subject is visible in a frame.
#[async_trait]
pub trait SubjectDetector: Send + Sync {
    /// Run detection on one frame.
    async fn detect(&self, image: &RawImage) -> Result<bool>;
}

/// Closed set of detector backends.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorSpec {
    /// Pipe the raw frame to an external classifier process and scan its
    /// output for a label.
    Command {
        /// Program to run; receives width and height as trailing args and
        /// the BGR24 frame on stdin.
        program: String,
        /// Extra arguments placed before width/height.
        #[serde(default)]
        args: Vec<String>,
        /// Detected iff this label appears in the program's stdout.
        label: String,
    },
}

impl DetectorSpec {
    /// Resolve the spec into a concrete detector.
    pub fn build(&self) -> Box<dyn SubjectDetector> {
        match self {
            DetectorSpec::Command {
                program,
                args,
                label,
            } => Box::new(CommandDetector {
                program: program.clone(),
                args: args.clone(),
                label: label.clone(),
            }),
        }
    }
}

/// Runs an external classifier per frame and checks its output for a
/// label, the way the upstream model's textual summary is checked.
pub struct CommandDetector {
    program: String,
    args: Vec<String>,
    label: String,
}

#[async_trait]
impl SubjectDetector for CommandDetector {
    async fn detect(&self, image: &RawImage) -> Result<bool> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(image.width.to_string())
            .arg(image.height.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SceneVoteError::Detection(format!("spawn failed: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&image.data)
                .await
                .map_err(|e| SceneVoteError::Detection(format!("stdin write failed: {e}")))?;
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SceneVoteError::Detection(format!("wait failed: {e}")))?;
        if !output.status.success() {
            return Err(SceneVoteError::Detection(format!(
                "classifier exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let seen = stdout.contains(&self.label);
        debug!(label = %self.label, seen, "detection ran");
        Ok(seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_spec_parses_command_variant() {
        let spec: DetectorSpec = toml::from_str(
            r#"
            kind = "command"
            program = "classify"
            args = ["--model", "small"]
            label = "cat"
            "#,
        )
        .unwrap();
        let DetectorSpec::Command { program, args, label } = spec;
        assert_eq!(program, "classify");
        assert_eq!(args, vec!["--model", "small"]);
        assert_eq!(label, "cat");
    }

    #[test]
    fn test_detector_spec_unknown_kind_fails_at_parse() {
        let result: std::result::Result<DetectorSpec, _> =
            toml::from_str("kind = \"magic\"\nprogram = \"x\"\nlabel = \"y\"");
        assert!(result.is_err());
    }
}
