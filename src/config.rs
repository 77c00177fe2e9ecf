//! TOML configuration surface.
//!
//! The whole deployment is described by one file: mixer connection, the
//! scene map, optional chat credentials, optional detection setup, and
//! loop intervals. Validation runs once at startup and fails fast;
//! nothing downstream re-checks these invariants.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::detect::{CaptureSpec, DetectorSpec, PipelineConfig};
use crate::error::{Result, SceneVoteError};
use crate::protocol::DEFAULT_MAX_FRAME_LEN;
use crate::vote::{VoteWeights, DEFAULT_SUPER_BONUS};

/// Root configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mixer: MixerConfig,
    /// Scene name -> scene description. At least one entry.
    pub scenes: BTreeMap<String, SceneConfig>,
    /// Chat-vote input; omit to run detection-only.
    pub chat: Option<ChatConfig>,
    /// Camera detection input; omit to run chat-only.
    pub detection: Option<DetectionConfig>,
    #[serde(default)]
    pub intervals: Intervals,
    /// Consecutive all-miss detection results before falling back to the
    /// default scene (detection-only mode).
    #[serde(default = "default_missing_tolerance")]
    pub missing_tolerance: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MixerConfig {
    /// obs-websocket address, e.g. `ws://127.0.0.1:4455`.
    pub url: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SceneConfig {
    /// Media source whose settings carry the capture address.
    pub source: String,
    /// Camera rotation in degrees; 0 or 180.
    #[serde(default)]
    pub rotation: u16,
    /// Single lowercase letter viewers vote with.
    pub vote_key: char,
    /// Text source that receives the status label on this scene.
    pub label_source: String,
    /// Fallback scene for detection-only mode. Exactly one scene may
    /// carry this flag.
    #[serde(default, rename = "default")]
    pub is_default: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Streamer identity code for the open-platform session.
    pub id_code: String,
    pub app_id: i64,
    pub access_key: String,
    pub access_secret: String,
    #[serde(default = "default_chat_host")]
    pub host: String,
    /// Voter ids granted the super bonus.
    #[serde(default)]
    pub super_voters: HashSet<String>,
    /// Medal designation whose level counts toward vote weight.
    pub medal_name: Option<String>,
    #[serde(default = "default_super_bonus")]
    pub super_bonus: i64,
    /// Event queue capacity; events past this are dropped.
    #[serde(default = "default_queue_len")]
    pub queue_len: usize,
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: u32,
}

impl ChatConfig {
    pub fn weights(&self) -> VoteWeights {
        VoteWeights {
            medal_name: self.medal_name.clone(),
            super_voters: self.super_voters.clone(),
            super_bonus: self.super_bonus,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    pub capture: CaptureSpec,
    pub detector: DetectorSpec,
    #[serde(default = "default_capture_timeout_secs")]
    pub capture_timeout_secs: u64,
    #[serde(default = "default_failure_tolerance")]
    pub failure_tolerance: u32,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl DetectionConfig {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            capture_timeout: Duration::from_secs(self.capture_timeout_secs),
            failure_tolerance: self.failure_tolerance,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Intervals {
    #[serde(default = "default_mainloop_secs")]
    pub mainloop_secs: u64,
    #[serde(default = "default_vote_secs")]
    pub vote_secs: u64,
    #[serde(default = "default_detect_secs")]
    pub detect_secs: u64,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            mainloop_secs: default_mainloop_secs(),
            vote_secs: default_vote_secs(),
            detect_secs: default_detect_secs(),
        }
    }
}

impl Intervals {
    pub fn mainloop(&self) -> Duration {
        Duration::from_secs(self.mainloop_secs)
    }

    pub fn vote(&self) -> Duration {
        Duration::from_secs(self.vote_secs)
    }

    pub fn detect(&self) -> Duration {
        Duration::from_secs(self.detect_secs)
    }
}

fn default_missing_tolerance() -> u32 {
    3
}

fn default_chat_host() -> String {
    "https://live-open.biliapi.com".to_string()
}

fn default_super_bonus() -> i64 {
    DEFAULT_SUPER_BONUS
}

fn default_queue_len() -> usize {
    100
}

fn default_max_frame_len() -> u32 {
    DEFAULT_MAX_FRAME_LEN
}

fn default_capture_timeout_secs() -> u64 {
    5
}

fn default_failure_tolerance() -> u32 {
    5
}

fn default_poll_interval_secs() -> u64 {
    1
}

fn default_mainloop_secs() -> u64 {
    1
}

fn default_vote_secs() -> u64 {
    10
}

fn default_detect_secs() -> u64 {
    10
}

impl Config {
    /// Read and parse a config file. Call [`Config::validate`] before
    /// using the result.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Check cross-field invariants. Errors name the offending field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(SceneVoteError::ConfigInvalid(msg));

        if self.scenes.is_empty() {
            return invalid("at least one scene is required".to_string());
        }
        if self.chat.is_none() && self.detection.is_none() {
            return invalid("at least one of [chat] or [detection] is required".to_string());
        }

        let mut seen_keys = HashSet::new();
        for (name, scene) in &self.scenes {
            if scene.rotation != 0 && scene.rotation != 180 {
                return invalid(format!(
                    "scene {name}: rotation must be 0 or 180, got {}",
                    scene.rotation
                ));
            }
            if !scene.vote_key.is_ascii_lowercase() {
                return invalid(format!(
                    "scene {name}: vote_key must be a lowercase letter, got {:?}",
                    scene.vote_key
                ));
            }
            if !seen_keys.insert(scene.vote_key) {
                return invalid(format!(
                    "scene {name}: vote_key {:?} is already taken",
                    scene.vote_key
                ));
            }
        }

        let defaults = self.scenes.values().filter(|s| s.is_default).count();
        if defaults > 1 {
            return invalid("at most one scene may be marked default".to_string());
        }
        if self.chat.is_none() && defaults == 0 {
            return invalid(
                "detection-only mode requires one scene marked default".to_string(),
            );
        }
        Ok(())
    }

    /// Vote key -> scene name, in key order.
    pub fn vote_scene_mapping(&self) -> BTreeMap<char, String> {
        self.scenes
            .iter()
            .map(|(name, scene)| (scene.vote_key, name.clone()))
            .collect()
    }

    /// The scene flagged as default, if any.
    pub fn default_scene(&self) -> Option<&str> {
        self.scenes
            .iter()
            .find(|(_, scene)| scene.is_default)
            .map(|(name, _)| name.as_str())
    }
}
