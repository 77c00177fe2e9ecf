//! Camera polling and subject detection.
//!
//! The pipeline worker consumes batch jobs from the orchestration loop,
//! captures frames through a [`FrameCapture`] backend, runs a
//! [`SubjectDetector`], and publishes latest-wins result sets.

mod capture;
mod detector;
mod image;
mod pipeline;

pub use capture::{CaptureSpec, FfmpegCapture, FrameCapture};
pub use detector::{CommandDetector, DetectorSpec, SubjectDetector};
pub use image::RawImage;
pub use pipeline::{
    DetectionJob, DetectionPipeline, DetectionPipelineHandle, DetectionResult, PipelineConfig,
};
