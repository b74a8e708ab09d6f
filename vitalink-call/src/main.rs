//! Command-line client for Vitalink video sessions.
//!
//! Joins a session room, logs connection and occupancy changes, and leaves
//! cleanly on Ctrl-C. Runs on the synthetic device layer; a desktop build
//! would plug real capture in behind the same `MediaDevices` seam.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use vitalink_rtc::{
    logging, RtcConfig, SessionController, SessionId, SessionStatus, SessionType,
    SyntheticDevices, UserId, VideoSession,
};

#[derive(Debug, Parser)]
#[command(name = "vitalink-call", about = "Join a Vitalink video session")]
struct Args {
    /// Session (room) identifier to join
    #[arg(long, env = "VITALINK_SESSION")]
    session: String,

    /// Identity to join as
    #[arg(long, env = "VITALINK_USER")]
    user: String,

    /// Counterpart identity shown on the session record
    #[arg(long, default_value = "counterpart")]
    peer: String,

    /// Session kind: "therapy" or "consultation"
    #[arg(long, default_value = "consultation")]
    session_type: String,

    /// Path to a YAML config file
    #[arg(long, env = "VITALINK_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => RtcConfig::from_file(path)?,
        None => RtcConfig::from_env().unwrap_or_default(),
    };
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        anyhow::bail!(
            "configuration validation failed with {} error(s)",
            errors.len()
        );
    }

    logging::init_logging(&config.logging)?;
    info!("Vitalink call client starting...");

    let session_type = match args.session_type.as_str() {
        "therapy" => SessionType::Therapy,
        _ => SessionType::Consultation,
    };

    // Ad-hoc record; scheduled sessions come from the platform API instead
    let session = VideoSession {
        id: SessionId::from(args.session.clone()),
        session_type,
        participant_ids: (UserId::from(args.user.clone()), UserId::from(args.peer.clone())),
        scheduled_at: chrono::Utc::now(),
        duration_minutes: 0,
        status: SessionStatus::InProgress,
    };

    let controller = Arc::new(SessionController::new(
        config,
        Arc::new(SyntheticDevices::new()),
    ));
    controller
        .join(&session, UserId::from(args.user.clone()))
        .await?;

    if let Some(err) = controller.media_error() {
        warn!(error = %err, "joined without camera; retry available");
    }

    let mut state_rx = controller.subscribe_connection_state();
    let mut participants_rx = controller.subscribe_participants();
    let watcher = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *state_rx.borrow();
                    info!(%state, "connection state");
                }
                changed = participants_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let participants = *participants_rx.borrow();
                    info!(participants, "room occupancy");
                }
            }
        }
    });

    info!(session = %args.session, user = %args.user, "in session, press Ctrl-C to leave");
    tokio::signal::ctrl_c().await?;

    let duration = controller.session_duration();
    controller.leave().await;
    watcher.abort();
    info!(seconds = duration.as_secs(), "session ended");

    Ok(())
}
