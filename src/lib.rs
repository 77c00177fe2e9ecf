//! # scenevote
//!
//! Chat-and-detection driven scene switching for a live stream.
//!
//! Viewers vote in chat with single-letter messages; cameras are polled
//! for the subject through an external detector. Both inputs feed a
//! weighted tally, and at each vote-window boundary the leading scene is
//! switched to on the mixer, with a status label rendered alongside.
//!
//! ## Architecture
//!
//! - **Chat client** (websocket): binary-framed streaming connection with
//!   signed HTTP session bootstrap and heartbeats
//! - **Detection pipeline** (worker task): capture + detect per camera,
//!   with per-source failure blacklisting
//! - **Orchestrator**: single polling loop merging both vote sources and
//!   driving the mixer
//!
//! Cross-task queues are bounded and lossy by design: chat events drop on
//! full, detection jobs and results keep only the latest.
//!
//! ## Example
//!
//! ```ignore
//! use scenevote::{Config, ObsMixer, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::load("scenevote.toml".as_ref()).await.unwrap();
//!     config.validate().unwrap();
//!     let mixer = ObsMixer::new(config.mixer.url.clone(), config.mixer.password.clone());
//!     mixer.validate().await.unwrap();
//!
//!     let cancel = CancellationToken::new();
//!     Orchestrator::new(&config, std::sync::Arc::new(mixer), cancel)
//!         .run()
//!         .await;
//! }
//! ```

pub mod chat;
pub mod config;
pub mod detect;
pub mod error;
pub mod mixer;
pub mod protocol;
pub mod queue;
pub mod vote;

mod orchestrator;

pub use config::Config;
pub use error::{Result, SceneVoteError};
pub use mixer::{MixerControl, ObsMixer};
pub use orchestrator::Orchestrator;
