//! The orchestration loop.
//!
//! A single task polls the vote aggregator and the detection pipeline on
//! a fixed cadence, merges both vote sources, commits scene switches at
//! vote-window boundaries, and renders a status label through the mixer.
//! It is the only mutator of scene state; everything it shares with the
//! background components crosses a bounded queue.
//!
//! Mixer calls are assumed fast request/response; a failed call is
//! logged and the tick continues.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chat::ChatClientHandle;
use crate::config::{Config, Intervals, SceneConfig};
use crate::detect::{DetectionJob, DetectionPipelineHandle, DetectionResult};
use crate::mixer::{capture_address, MixerControl};
use crate::vote::VoteAggregator;

/// Weight a detected camera contributes to its scene's vote key.
const DETECTION_VOTE_WEIGHT: i64 = 3;

/// Lower bound on the cadence sleep.
const MIN_SLEEP_SECS: f64 = 0.5;

/// Within this many seconds of the window end, sleeps align with whole-
/// second boundaries so the countdown label ticks smoothly.
const FINE_COUNTDOWN_SECS: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Idle,
    Active,
    Exit,
}

impl State {
    fn text(self) -> &'static str {
        match self {
            State::Initial => "starting up",
            State::Idle => "controller running, voting open",
            State::Active => "subject on camera",
            State::Exit => "controller stopped",
        }
    }
}

/// Per-tick merged tally, one column per vote source.
#[derive(Debug, Clone, Default)]
struct VoteSummary {
    columns: Vec<(&'static str, BTreeMap<char, i64>)>,
}

impl VoteSummary {
    fn add_column(&mut self, name: &'static str, votes: BTreeMap<char, i64>) {
        self.columns.push((name, votes));
    }

    fn combined(&self, key: char) -> i64 {
        self.columns
            .iter()
            .map(|(_, votes)| votes.get(&key).copied().unwrap_or(0))
            .sum()
    }
}

/// Scene with the strictly greatest combined score, in vote-key order.
///
/// All-zero tallies and exact ties at the top elect nobody, so a tie
/// never triggers a switch. Unreachable scenes are excluded.
fn leading_scene(
    summary: &VoteSummary,
    mapping: &BTreeMap<char, String>,
    reachable: &BTreeSet<String>,
) -> Option<String> {
    let mut best: Option<(char, i64)> = None;
    let mut tied = false;
    for (key, scene) in mapping {
        if !reachable.contains(scene) {
            continue;
        }
        let total = summary.combined(*key);
        match best {
            Some((_, top)) if total > top => {
                best = Some((*key, total));
                tied = false;
            }
            Some((_, top)) if total == top => tied = true,
            None if total > 0 => best = Some((*key, total)),
            _ => {}
        }
    }
    if tied {
        return None;
    }
    best.and_then(|(key, _)| mapping.get(&key).cloned())
}

/// Tally table plus offline-camera lines, ready for the label source.
fn render_summary(
    summary: &VoteSummary,
    mapping: &BTreeMap<char, String>,
    reachable: &BTreeSet<String>,
) -> String {
    let mut lines = Vec::new();
    let mut header = String::from("key");
    for (name, _) in &summary.columns {
        header.push_str(&format!("  {name:>6}"));
    }
    lines.push(header);
    for (key, scene) in mapping {
        if !reachable.contains(scene) {
            continue;
        }
        let mut row = key.to_string();
        for (_, votes) in &summary.columns {
            row.push_str(&format!("  {:>6}", votes.get(key).copied().unwrap_or(0)));
        }
        lines.push(row);
    }
    for (key, scene) in mapping {
        if !reachable.contains(scene) {
            lines.push(format!("{key} camera offline"));
        }
    }
    lines.join("\n")
}

/// The loop itself. Construction wires collaborators; [`Orchestrator::run`]
/// does all the work.
pub struct Orchestrator {
    mixer: Arc<dyn MixerControl>,
    scenes: BTreeMap<String, SceneConfig>,
    mapping: BTreeMap<char, String>,
    default_scene: Option<String>,
    intervals: Intervals,
    missing_tolerance: u32,
    cancel: CancellationToken,
    aggregator: Option<VoteAggregator>,
    chat_client: Option<ChatClientHandle>,
    pipeline: Option<DetectionPipelineHandle>,
    state: State,
    current_scene: Option<String>,
    /// Scenes present in the latest detection result; cameras outside
    /// this set are offline and excluded from leader election.
    reachable: BTreeSet<String>,
    /// Remembered contribution of the last detection result, cleared on
    /// scene-switch commit.
    detection_votes: Option<BTreeMap<char, i64>>,
    missing_streak: u32,
}

impl Orchestrator {
    pub fn new(config: &Config, mixer: Arc<dyn MixerControl>, cancel: CancellationToken) -> Self {
        Self {
            mixer,
            scenes: config.scenes.clone(),
            mapping: config.vote_scene_mapping(),
            default_scene: config.default_scene().map(str::to_string),
            intervals: config.intervals.clone(),
            missing_tolerance: config.missing_tolerance,
            cancel,
            aggregator: None,
            chat_client: None,
            pipeline: None,
            state: State::Initial,
            current_scene: None,
            reachable: config.scenes.keys().cloned().collect(),
            detection_votes: None,
            missing_streak: 0,
        }
    }

    /// Enable chat voting.
    pub fn with_chat(mut self, aggregator: VoteAggregator) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    /// Take ownership of the running chat client for teardown.
    pub fn with_chat_client(mut self, client: ChatClientHandle) -> Self {
        self.chat_client = Some(client);
        self
    }

    /// Enable camera detection.
    pub fn with_detection(mut self, pipeline: DetectionPipelineHandle) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Run until the cancellation token fires, then tear down the
    /// background components in order: pipeline first, chat client last.
    pub async fn run(mut self) {
        info!("orchestration loop start");
        if let Some(agg) = self.aggregator.as_mut() {
            agg.reset();
        }
        self.state = State::Idle;
        self.update_label("").await;

        let mut next_vote = Instant::now() + self.intervals.vote();
        let mut next_detect = Instant::now();
        while !self.cancel.is_cancelled() {
            let sleep = self.tick(&mut next_vote, &mut next_detect).await;
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(sleep) => {}
            }
        }

        self.state = State::Exit;
        self.update_label("").await;
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.stop().await;
        }
        if let Some(client) = self.chat_client.take() {
            client.stop().await;
        }
        info!("orchestration loop stopped");
    }

    async fn tick(&mut self, next_vote: &mut Instant, next_detect: &mut Instant) -> Duration {
        let tick_start = Instant::now();

        if let Some(pipeline) = &self.pipeline {
            if tick_start >= *next_detect {
                pipeline.submit(self.build_job().await);
                *next_detect = tick_start + self.intervals.detect();
            }
        }
        if let Some(result) = self.pipeline.as_ref().and_then(|p| p.latest_result()) {
            self.apply_detection_result(&result).await;
        }

        let mut summary = VoteSummary::default();
        if let Some(agg) = self.aggregator.as_mut() {
            summary.add_column("chat", agg.current_tally());
        }
        if let Some(votes) = self.detection_votes.clone() {
            summary.add_column("detect", votes);
        }
        let leader = leading_scene(&summary, &self.mapping, &self.reachable);

        let mut countdown = next_vote.saturating_duration_since(tick_start);
        if self.aggregator.is_some() {
            if countdown.is_zero() {
                if let Some(agg) = self.aggregator.as_mut() {
                    agg.reset();
                }
                if let Some(scene) = &leader {
                    info!(scene = %scene, "vote window closed, switching scene");
                    self.switch_scene(scene).await;
                    self.detection_votes = None;
                    summary = VoteSummary::default();
                } else {
                    debug!("vote window closed, no leader");
                }
                *next_vote = tick_start + self.intervals.vote();
                countdown = self.intervals.vote();
            }
        } else {
            // Detection-only mode has no vote window; the countdown
            // shows the next camera poll instead.
            countdown = next_detect.saturating_duration_since(tick_start);
        }

        let body = render_summary(&summary, &self.mapping, &self.reachable);
        let detail = format!("{body}\nnext switch in {:.1}s", countdown.as_secs_f64());
        self.update_label(&detail).await;

        let elapsed = tick_start.elapsed().as_secs_f64();
        let mut sleep = (self.intervals.mainloop().as_secs_f64() - elapsed).max(MIN_SLEEP_SECS);
        let left = countdown.as_secs_f64();
        if left < FINE_COUNTDOWN_SECS {
            // Wake at the next whole-second boundary of the countdown.
            sleep = sleep.min((left - left.floor()).max(0.05));
        }
        Duration::from_secs_f64(sleep)
    }

    /// Resolve every scene's capture address from the mixer. Scenes whose
    /// settings cannot be read are left out of this batch.
    async fn build_job(&self) -> DetectionJob {
        let mut job = DetectionJob::default();
        for (name, scene) in &self.scenes {
            match self.mixer.get_source_settings(&scene.source).await {
                Ok(settings) => match capture_address(&settings) {
                    Some(address) => {
                        job.sources
                            .insert(name.clone(), (address.to_string(), scene.rotation));
                    }
                    None => warn!(scene = %name, "source settings carry no capture address"),
                },
                Err(e) => warn!(scene = %name, error = %e, "failed to read source settings"),
            }
        }
        job
    }

    async fn apply_detection_result(&mut self, result: &DetectionResult) {
        self.reachable = result.per_source.keys().cloned().collect();

        let mut votes = BTreeMap::new();
        for (scene, seen) in &result.per_source {
            if *seen {
                if let Some(cfg) = self.scenes.get(scene) {
                    votes.insert(cfg.vote_key, DETECTION_VOTE_WEIGHT);
                }
            }
        }
        self.detection_votes = Some(votes);
        if self.aggregator.is_some() {
            return;
        }

        // Detection-only mode: follow the subject immediately instead of
        // waiting for a vote window.
        let first_seen = result
            .per_source
            .iter()
            .find(|(_, seen)| **seen)
            .map(|(scene, _)| scene.clone());
        match first_seen {
            Some(scene) => {
                self.missing_streak = 0;
                if self.current_scene.as_deref() != Some(scene.as_str()) {
                    info!(scene = %scene, "subject detected, switching scene");
                    self.switch_scene(&scene).await;
                }
                self.state = State::Active;
            }
            None => {
                self.missing_streak += 1;
                if self.state == State::Active && self.missing_streak >= self.missing_tolerance {
                    if let Some(default) = self.default_scene.clone() {
                        info!(
                            scene = %default,
                            streak = self.missing_streak,
                            "subject gone, falling back to default scene"
                        );
                        self.switch_scene(&default).await;
                    }
                    self.state = State::Idle;
                    self.missing_streak = 0;
                }
            }
        }
    }

    async fn switch_scene(&mut self, scene: &str) {
        match self.mixer.set_current_scene(scene).await {
            Ok(()) => self.current_scene = Some(scene.to_string()),
            Err(e) => warn!(scene, error = %e, "scene switch failed"),
        }
    }

    /// Write the state line plus detail text to the current scene's label
    /// source.
    async fn update_label(&mut self, detail: &str) {
        let current = match self.mixer.get_current_scene().await {
            Ok(current) => current,
            Err(e) => {
                warn!(error = %e, "failed to read current scene");
                return;
            }
        };
        let Some(scene) = self.scenes.get(&current) else {
            debug!(scene = %current, "current scene not configured, skipping label");
            return;
        };
        let label_source = scene.label_source.clone();
        self.current_scene = Some(current);
        let text = format!("{}\n{detail}", self.state.text());
        if let Err(e) = self.mixer.set_source_text(&label_source, &text).await {
            warn!(error = %e, "failed to update status label");
        }
    }
}
