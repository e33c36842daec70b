mod feed;
mod media;
mod session;
mod state;

use chrono::Utc;
use onair_core::config::Config;
use onair_core::view;
use tokio::io::AsyncBufReadExt;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::session::{SessionController, SessionEvent};
use crate::state::{ChannelUpdate, StateHandle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    std::fs::create_dir_all(&config.paths.log_dir)?;
    let log_path = config.paths.log_dir.join("onair.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,onair_player=debug")),
        )
        .init();

    info!("Config loaded from: {:?}", Config::config_path());
    info!("Log file: {:?}", log_path);

    // One fresh fetch per process start; an unavailable feed becomes an
    // empty catalog plus a surfaced error, never a crash.
    let catalog = match feed::load_catalog(&config.feed).await {
        Ok(catalog) => catalog,
        Err(e) => {
            warn!("{}", e);
            Vec::new()
        }
    };

    // Event channel — all inputs funnel into the session loop
    let (events_tx, events_rx) = mpsc::channel::<SessionEvent>(256);

    let state = StateHandle::new();
    let player = media::MpvPlayer::spawn(events_tx.clone()).await?;

    let controller = SessionController::new(
        catalog,
        config.rotation.mode,
        config.timing.clone(),
        state.clone(),
        player,
        events_tx.clone(),
        Utc::now,
    );

    tokio::spawn(render_loop(state.clone()));
    tokio::spawn(stdin_loop(events_tx.clone()));
    {
        let tx = events_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(SessionEvent::Shutdown).await;
            }
        });
    }

    info!("Channel initialised, running session loop");
    controller.run(events_rx).await?;

    Ok(())
}

/// Minimal renderer: logs the channel as it changes.  Anything fancier
/// (table, cards) would consume the same snapshots.
async fn render_loop(state: StateHandle) {
    let mut updates = state.subscribe();
    let mut last_status = String::new();

    loop {
        match updates.recv().await {
            Ok(ChannelUpdate::EntryChanged { idx }) => {
                let snap = state.snapshot().await;
                info!("Now playing entry #{}: {}", idx, snap.status_line);
                if let Some(next) = &snap.up_next {
                    info!("Up next: {}", next);
                }
                last_status = snap.status_line;
            }
            Ok(ChannelUpdate::StateUpdated) => {
                let snap = state.snapshot().await;
                if snap.status_line != last_status {
                    info!("{}", snap.status_line);
                    last_status = snap.status_line;
                }
            }
            Ok(ChannelUpdate::Progress { elapsed_secs }) => {
                debug!("progress: {}", view::format_clock(elapsed_secs));
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("render: missed {} updates", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Line-oriented control on stdin: `play`, `reload`, `mute`, `quit`.
async fn stdin_loop(events: mpsc::Sender<SessionEvent>) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let event = match line.trim() {
            "" => continue,
            "play" | "p" => SessionEvent::UserGesture,
            "reload" | "r" => SessionEvent::Reload,
            "mute" | "m" => SessionEvent::ToggleMute,
            "quit" | "q" => {
                let _ = events.send(SessionEvent::Shutdown).await;
                break;
            }
            other => {
                warn!("unknown command: {}", other);
                continue;
            }
        };
        if events.send(event).await.is_err() {
            break;
        }
    }
}
