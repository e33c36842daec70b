//! The abstract media transport and its mpv backend.
//!
//! The session controller never touches mpv directly: it sends
//! `PlayerCommand`s down an mpsc channel and receives `PlayerEvent`s
//! back through the session event loop, each stamped with the session
//! generation that was live when the event was produced.  A stale
//! generation on arrival means the binding it belonged to has already
//! been torn down, and the controller drops it.
//!
//! The mpv driver is one task that owns the child process and the IPC
//! socket: commands are serialised to JSON lines, unsolicited events
//! and property changes are mapped onto `PlayerEvent`s.
//!
//!   Load      → set pause, loadfile            (no autostart)
//!   file-loaded → get_property duration        → MetadataReady
//!   time-pos property change                   → TimeUpdate
//!   end-file (eof)                             → Ended
//!   end-file (error)                           → Error

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::session::SessionEvent;

/// Commands the session controller issues to the playable handle.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    /// Bind a new source.  `session` stamps every event the handle
    /// produces from this point on.
    Load { url: String, session: u64 },
    Play,
    Pause,
    SeekTo { secs: f64 },
    SetMute { muted: bool },
    Stop,
}

/// Signals coming back from the playable handle.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// Metadata is available; total length when the container knows it.
    MetadataReady { duration_secs: Option<f64> },
    TimeUpdate {
        position_secs: f64,
        duration_secs: Option<f64>,
    },
    /// Natural end of content.
    Ended,
    /// Decode/network/unsupported-source failure.
    Error { code: String },
    /// The platform refused autonomous playback (autoplay policy).
    PlayRefused,
}

// ── mpv backend ───────────────────────────────────────────────────────────────

/// observe_property IDs matched in property-change events.
const OBS_TIME_POS: u64 = 1;
const OBS_DURATION: u64 = 2;

const COMMAND_BUFFER: usize = 64;

#[cfg(unix)]
pub struct MpvPlayer;

#[cfg(unix)]
impl MpvPlayer {
    /// Spawn mpv with an IPC socket and return the command channel.
    /// Events flow into the session loop through `events`.
    pub async fn spawn(events: mpsc::Sender<SessionEvent>) -> anyhow::Result<mpsc::Sender<PlayerCommand>> {
        let binary = onair_core::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        let socket_path = onair_core::platform::mpv_socket_path();
        let _ = tokio::fs::remove_file(&socket_path).await;

        info!("mpv: spawning {}", binary.display());
        let child = tokio::process::Command::new(binary)
            .arg("--idle=yes")
            .arg("--no-video")
            .arg("--really-quiet")
            .arg(format!("--input-ipc-server={}", socket_path.display()))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;

        // Wait for the IPC socket to appear
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }

        let stream = tokio::net::UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(driver_task(stream, child, cmd_rx, events));
        Ok(cmd_tx)
    }
}

#[cfg(unix)]
async fn driver_task(
    stream: tokio::net::UnixStream,
    mut child: tokio::process::Child,
    mut commands: mpsc::Receiver<PlayerCommand>,
    events: mpsc::Sender<SessionEvent>,
) {
    let (read_half, mut writer) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let mut next_req_id: u64 = 1;
    // Which session subsequent mpv events belong to.  Updated when a
    // Load command is processed, so ordering within this single task
    // keeps event stamping consistent.
    let mut session: u64 = 0;
    // Outstanding get_property duration request, if any.
    let mut duration_req: Option<u64> = None;
    let mut last_duration: Option<f64> = None;

    for (id, prop) in [(OBS_TIME_POS, "time-pos"), (OBS_DURATION, "duration")] {
        let payload = encode(json!(["observe_property", id, prop]), &mut next_req_id);
        if let Err(e) = writer.write_all(payload.as_bytes()).await {
            warn!("mpv: observe_property write failed: {}", e);
        }
    }

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else {
                    debug!("mpv: command channel closed, shutting down");
                    break;
                };
                debug!("mpv: command {:?}", cmd);
                let payloads: Vec<String> = match cmd {
                    PlayerCommand::Load { url, session: s } => {
                        session = s;
                        duration_req = None;
                        last_duration = None;
                        vec![
                            encode(json!(["set_property", "pause", true]), &mut next_req_id),
                            encode(json!(["loadfile", url]), &mut next_req_id),
                        ]
                    }
                    PlayerCommand::Play => {
                        vec![encode(json!(["set_property", "pause", false]), &mut next_req_id)]
                    }
                    PlayerCommand::Pause => {
                        vec![encode(json!(["set_property", "pause", true]), &mut next_req_id)]
                    }
                    PlayerCommand::SeekTo { secs } => {
                        vec![encode(json!(["set_property", "time-pos", secs]), &mut next_req_id)]
                    }
                    PlayerCommand::SetMute { muted } => {
                        vec![encode(json!(["set_property", "mute", muted]), &mut next_req_id)]
                    }
                    PlayerCommand::Stop => {
                        vec![encode(json!(["stop"]), &mut next_req_id)]
                    }
                };
                let mut failed = false;
                for payload in payloads {
                    if let Err(e) = writer.write_all(payload.as_bytes()).await {
                        warn!("mpv: write error: {}", e);
                        let _ = events.send(SessionEvent::Player {
                            session,
                            event: PlayerEvent::Error { code: format!("ipc write error: {e}") },
                        }).await;
                        failed = true;
                        break;
                    }
                }
                if failed {
                    break;
                }
            }

            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(l)) => l,
                    Ok(None) => {
                        warn!("mpv: IPC connection closed");
                        let _ = events.send(SessionEvent::Player {
                            session,
                            event: PlayerEvent::Error { code: "ipc connection closed".to_string() },
                        }).await;
                        break;
                    }
                    Err(e) => {
                        warn!("mpv: IPC read error: {}", e);
                        let _ = events.send(SessionEvent::Player {
                            session,
                            event: PlayerEvent::Error { code: format!("ipc read error: {e}") },
                        }).await;
                        break;
                    }
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(Value::as_u64) {
                    if duration_req == Some(req_id) {
                        duration_req = None;
                        let duration_secs = val
                            .get("data")
                            .and_then(Value::as_f64)
                            .and_then(onair_core::catalog::normalize_duration);
                        last_duration = duration_secs;
                        let _ = events.send(SessionEvent::Player {
                            session,
                            event: PlayerEvent::MetadataReady { duration_secs },
                        }).await;
                    }
                    continue;
                }

                if let Some(event) = map_mpv_event(
                    &val,
                    session,
                    &mut last_duration,
                ) {
                    match event {
                        MpvSignal::Player(event) => {
                            let _ = events.send(SessionEvent::Player { session, event }).await;
                        }
                        MpvSignal::QueryDuration => {
                            let req_id = next_req_id;
                            let payload = encode(json!(["get_property", "duration"]), &mut next_req_id);
                            if writer.write_all(payload.as_bytes()).await.is_ok() {
                                duration_req = Some(req_id);
                            }
                        }
                    }
                }
            }
        }
    }

    let _ = child.kill().await;
    debug!("mpv: driver task exiting");
}

#[cfg(unix)]
enum MpvSignal {
    Player(PlayerEvent),
    QueryDuration,
}

/// Translate one unsolicited mpv message into a driver action.
#[cfg(unix)]
fn map_mpv_event(val: &Value, session: u64, last_duration: &mut Option<f64>) -> Option<MpvSignal> {
    let name = val.get("event")?.as_str()?;
    match name {
        "file-loaded" => Some(MpvSignal::QueryDuration),
        "end-file" => {
            let reason = val.get("reason").and_then(Value::as_str).unwrap_or("");
            match reason {
                "eof" => Some(MpvSignal::Player(PlayerEvent::Ended)),
                "error" => {
                    let code = val
                        .get("file_error")
                        .and_then(Value::as_str)
                        .unwrap_or("playback error")
                        .to_string();
                    Some(MpvSignal::Player(PlayerEvent::Error { code }))
                }
                // "stop"/"redirect"/"quit" are teardown noise for a
                // binding that is already being replaced.
                _ => {
                    debug!("mpv: end-file reason={} session={} ignored", reason, session);
                    None
                }
            }
        }
        "property-change" => {
            let id = val.get("id").and_then(Value::as_u64)?;
            let data = val.get("data");
            match id {
                OBS_TIME_POS => {
                    let position_secs = data.and_then(Value::as_f64)?;
                    Some(MpvSignal::Player(PlayerEvent::TimeUpdate {
                        position_secs,
                        duration_secs: *last_duration,
                    }))
                }
                OBS_DURATION => {
                    *last_duration = data
                        .and_then(Value::as_f64)
                        .and_then(onair_core::catalog::normalize_duration);
                    None
                }
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(unix)]
fn encode(command: Value, next_req_id: &mut u64) -> String {
    let req_id = *next_req_id;
    *next_req_id += 1;
    let mut raw = json!({ "command": command, "request_id": req_id }).to_string();
    raw.push('\n');
    raw
}
