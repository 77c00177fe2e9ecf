//! CLI entry point: load config, wire the components, run the loop.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scenevote::chat::{ChatClient, SessionApi, Signer};
use scenevote::detect::DetectionPipeline;
use scenevote::queue::event_queue;
use scenevote::vote::VoteAggregator;
use scenevote::{Config, ObsMixer, Orchestrator, Result};

#[derive(Parser)]
#[command(
    name = "scenevote",
    about = "Chat-and-detection driven scene switching for a live stream",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, default_value = "scenevote.toml")]
    config: PathBuf,

    /// Override the mixer websocket password from the config file.
    #[arg(long)]
    mixer_password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config).await?;
    if let Some(password) = cli.mixer_password {
        config.mixer.password = password;
    }
    config.validate()?;

    let mixer = Arc::new(ObsMixer::new(
        config.mixer.url.clone(),
        config.mixer.password.clone(),
    ));
    // Fatal on a bad address or password; everything later degrades
    // gracefully instead.
    mixer.validate().await?;
    info!(url = %config.mixer.url, "mixer reachable");

    let cancel = CancellationToken::new();
    let mut orchestrator = Orchestrator::new(&config, mixer, cancel.clone());

    if let Some(chat) = &config.chat {
        let signer = Signer::new(chat.access_key.clone(), chat.access_secret.clone());
        let api = SessionApi::new(chat.host.clone(), signer, chat.id_code.clone(), chat.app_id);
        let (events_tx, events_rx) = event_queue(chat.queue_len);
        let handle = ChatClient::new(api, chat.max_frame_len)
            .start(events_tx)
            .await?;
        if !handle.authenticated() {
            warn!("chat connection is not authenticated, events may be untrusted");
        }
        orchestrator = orchestrator
            .with_chat(VoteAggregator::new(chat.weights(), events_rx))
            .with_chat_client(handle);
    }

    if let Some(detection) = &config.detection {
        let pipeline = DetectionPipeline::new(
            detection.capture.build(),
            detection.detector.build(),
            detection.pipeline_config(),
        );
        orchestrator = orchestrator.with_detection(pipeline.start());
    }

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received, shutting down");
                cancel.cancel();
            }
        }
    });

    orchestrator.run().await;
    Ok(())
}
