//! Detection pipeline worker.
//!
//! A single worker task accepts batch jobs (named capture sources), polls
//! each source for a frame, runs detection, and publishes the result set.
//! Per-source failures are isolated and counted; a source that fails
//! `failure_tolerance` consecutive captures is blacklisted for the rest of
//! the process lifetime and silently skipped afterwards.
//!
//! Both the job and result queues are latest-wins: an unconsumed value is
//! overwritten, never queued behind.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::capture::FrameCapture;
use super::detector::SubjectDetector;
use crate::queue::LatestSlot;

/// A batch detection request: source key -> (capture address, rotation).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionJob {
    /// Sources to poll, keyed by scene/source name.
    pub sources: BTreeMap<String, (String, u16)>,
}

/// One batch's outcome, covering only non-blacklisted sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionResult {
    /// Per source: was the subject seen.
    pub per_source: BTreeMap<String, bool>,
}

/// Timing and tolerance knobs for the worker.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bound on each single-frame capture attempt.
    pub capture_timeout: Duration,
    /// Consecutive failures before a source is blacklisted.
    pub failure_tolerance: u32,
    /// How long one loop iteration waits for a job (also the stop-signal
    /// check cadence).
    pub poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capture_timeout: Duration::from_secs(5),
            failure_tolerance: 5,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Consecutive-failure bookkeeping, owned by the worker alone.
#[derive(Default)]
struct SourceHealth {
    failures: HashMap<String, u32>,
    blacklist: HashSet<String>,
}

impl SourceHealth {
    fn is_blacklisted(&self, key: &str) -> bool {
        self.blacklist.contains(key)
    }

    fn record_success(&mut self, key: &str) {
        self.failures.insert(key.to_string(), 0);
    }

    /// Count one failure; returns true if this crossed the tolerance and
    /// blacklisted the source. Blacklisting is irreversible within the
    /// process lifetime.
    fn record_failure(&mut self, key: &str, tolerance: u32) -> bool {
        let count = self.failures.entry(key.to_string()).or_insert(0);
        *count += 1;
        if *count >= tolerance {
            self.blacklist.insert(key.to_string());
            return true;
        }
        false
    }
}

/// An inert pipeline. Call [`DetectionPipeline::start`] to spawn the worker.
pub struct DetectionPipeline {
    capture: Box<dyn FrameCapture>,
    detector: Box<dyn SubjectDetector>,
    config: PipelineConfig,
}

/// Handle to a running pipeline worker.
pub struct DetectionPipelineHandle {
    jobs: LatestSlot<DetectionJob>,
    results: LatestSlot<DetectionResult>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

impl DetectionPipeline {
    /// Create a pipeline over the given capabilities. No task is spawned.
    pub fn new(
        capture: Box<dyn FrameCapture>,
        detector: Box<dyn SubjectDetector>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            capture,
            detector,
            config,
        }
    }

    /// Spawn the worker task and return its handle.
    pub fn start(self) -> DetectionPipelineHandle {
        let jobs: LatestSlot<DetectionJob> = LatestSlot::new();
        let results: LatestSlot<DetectionResult> = LatestSlot::new();
        let cancel = CancellationToken::new();

        let worker_jobs = jobs.clone();
        let worker_results = results.clone();
        let worker_cancel = cancel.clone();
        let worker = tokio::spawn(async move {
            let mut health = SourceHealth::default();
            info!("detection pipeline started");
            loop {
                if worker_cancel.is_cancelled() {
                    info!("detection pipeline stopping");
                    break;
                }
                let Some(job) = worker_jobs.take_timeout(self.config.poll_interval).await
                else {
                    continue;
                };
                let result = run_job(
                    &job,
                    self.capture.as_ref(),
                    self.detector.as_ref(),
                    &self.config,
                    &mut health,
                )
                .await;
                if worker_results.put(result) {
                    debug!("overwrote unconsumed detection result");
                }
            }
        });

        DetectionPipelineHandle {
            jobs,
            results,
            cancel,
            worker,
        }
    }
}

impl DetectionPipelineHandle {
    /// Submit a job, replacing any unconsumed prior one (latest wins).
    pub fn submit(&self, job: DetectionJob) {
        if self.jobs.put(job) {
            debug!("overwrote unconsumed detection job");
        }
    }

    /// Take the most recent result if one is pending.
    pub fn latest_result(&self) -> Option<DetectionResult> {
        self.results.take()
    }

    /// Signal the worker to stop and wait for it to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.worker.await;
    }
}

/// Process one job: capture + detect per source, with failure isolation.
async fn run_job(
    job: &DetectionJob,
    capture: &dyn FrameCapture,
    detector: &dyn SubjectDetector,
    config: &PipelineConfig,
    health: &mut SourceHealth,
) -> DetectionResult {
    let mut result = DetectionResult::default();
    for (key, (address, rotation)) in &job.sources {
        if health.is_blacklisted(key) {
            continue;
        }
        let frame = match capture.capture(address, config.capture_timeout).await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(source = %key, error = %e, "failed to capture frame");
                if health.record_failure(key, config.failure_tolerance) {
                    warn!(source = %key, address = %address, "source blacklisted");
                }
                continue;
            }
        };
        health.record_success(key);
        let frame = if *rotation == 180 {
            frame.rotate_180()
        } else {
            frame
        };
        match detector.detect(&frame).await {
            Ok(seen) => {
                result.per_source.insert(key.clone(), seen);
            }
            Err(e) => {
                // Detection errors do not count toward the blacklist;
                // the source itself delivered a frame.
                warn!(source = %key, error = %e, "detection failed");
            }
        }
    }
    debug!(?result, "detection batch done");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::image::RawImage;
    use crate::error::{Result, SceneVoteError};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn test_frame() -> RawImage {
        RawImage::new(1, 1, Bytes::from_static(&[0, 0, 0])).unwrap()
    }

    /// Capture that fails for addresses listed as dead, counting attempts.
    struct ScriptedCapture {
        dead: HashSet<String>,
        attempts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl FrameCapture for ScriptedCapture {
        async fn capture(&self, address: &str, _timeout: Duration) -> Result<RawImage> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.dead.contains(address) {
                return Err(SceneVoteError::Capture {
                    source_name: address.to_string(),
                    reason: "dead".to_string(),
                });
            }
            Ok(test_frame())
        }
    }

    /// Detector that reports "seen" for every frame.
    struct AlwaysSeen;

    #[async_trait]
    impl SubjectDetector for AlwaysSeen {
        async fn detect(&self, _image: &RawImage) -> Result<bool> {
            Ok(true)
        }
    }

    fn job(entries: &[(&str, &str)]) -> DetectionJob {
        DetectionJob {
            sources: entries
                .iter()
                .map(|(k, addr)| (k.to_string(), (addr.to_string(), 0)))
                .collect(),
        }
    }

    fn config(tolerance: u32) -> PipelineConfig {
        PipelineConfig {
            capture_timeout: Duration::from_millis(10),
            failure_tolerance: tolerance,
            poll_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_failing_source_isolated_from_batch() {
        let capture = ScriptedCapture {
            dead: HashSet::from(["rtsp://dead".to_string()]),
            attempts: Arc::new(AtomicU32::new(0)),
        };
        let mut health = SourceHealth::default();
        let result = run_job(
            &job(&[("cam_a", "rtsp://ok"), ("cam_b", "rtsp://dead")]),
            &capture,
            &AlwaysSeen,
            &config(3),
            &mut health,
        )
        .await;

        // The healthy camera still produced a result.
        assert_eq!(result.per_source.get("cam_a"), Some(&true));
        assert!(!result.per_source.contains_key("cam_b"));
        assert!(!health.is_blacklisted("cam_b"));
    }

    #[tokio::test]
    async fn test_blacklist_after_tolerance_and_never_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let capture = ScriptedCapture {
            dead: HashSet::from(["rtsp://dead".to_string()]),
            attempts: attempts.clone(),
        };
        let mut health = SourceHealth::default();
        let the_job = job(&[("cam", "rtsp://dead")]);
        let cfg = config(3);

        for _ in 0..3 {
            run_job(&the_job, &capture, &AlwaysSeen, &cfg, &mut health).await;
        }
        assert!(health.is_blacklisted("cam"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        // Even if the source would now succeed, it is never polled again.
        let capture_ok = ScriptedCapture {
            dead: HashSet::new(),
            attempts: attempts.clone(),
        };
        let result = run_job(&the_job, &capture_ok, &AlwaysSeen, &cfg, &mut health).await;
        assert!(result.per_source.is_empty());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let mut health = SourceHealth::default();
        assert!(!health.record_failure("cam", 3));
        assert!(!health.record_failure("cam", 3));
        health.record_success("cam");
        assert!(!health.record_failure("cam", 3));
        assert!(!health.record_failure("cam", 3));
        assert!(health.record_failure("cam", 3));
    }

    #[tokio::test]
    async fn test_latest_wins_result_queue() {
        let pipeline = DetectionPipeline::new(
            Box::new(ScriptedCapture {
                dead: HashSet::new(),
                attempts: Arc::new(AtomicU32::new(0)),
            }),
            Box::new(AlwaysSeen),
            config(3),
        );
        let handle = pipeline.start();

        handle.submit(job(&[("cam_a", "rtsp://a")]));
        handle.submit(job(&[("cam_b", "rtsp://b")]));

        // Give the worker time to process whatever job survived.
        tokio::time::sleep(Duration::from_millis(200)).await;

        // At most one result is pending, whichever job won.
        let first = handle.latest_result();
        assert!(first.is_some());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.latest_result().is_none());

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_terminates_worker() {
        let pipeline = DetectionPipeline::new(
            Box::new(ScriptedCapture {
                dead: HashSet::new(),
                attempts: Arc::new(AtomicU32::new(0)),
            }),
            Box::new(AlwaysSeen),
            config(3),
        );
        let handle = pipeline.start();
        // Returns only after the worker joined.
        handle.stop().await;
    }
}
