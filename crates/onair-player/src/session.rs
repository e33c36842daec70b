//! SessionController — single-owner event loop for the live playback
//! session.
//!
//! All inputs funnel through one `SessionEvent` channel: player events,
//! the bounded metadata-wait timer, the progress tick, user gestures,
//! reloads.  The controller owns the schedule, the current position and
//! the player binding exclusively; nothing else mutates them, so a
//! stale event arriving mid-teardown can never race the new binding —
//! it is simply dropped by the generation check.
//!
//! Per-entry lifecycle:
//!
//!   Idle → Loading → Seeking → Playing → (advance | Ended)
//!                  ↘ (timeout: seek best-effort)
//!          Playing → Blocked (autoplay refused, gesture resumes)
//!          any     → Failed  (media error, terminal for the entry)

use chrono::{DateTime, Utc};
use onair_core::catalog::Episode;
use onair_core::config::TimingConfig;
use onair_core::schedule::{build_schedule, locate, Rotation, Schedule};
use onair_core::view::{self, EntryStatus, NowPlaying};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::media::{PlayerCommand, PlayerEvent};
use crate::state::{ChannelUpdate, SessionPhase, StateHandle};

/// All inputs into the session loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// A signal from the player binding stamped with its generation.
    Player { session: u64, event: PlayerEvent },
    /// The bounded metadata wait ran out for the given generation.
    MetadataTimeout { session: u64 },
    /// Periodic progress refresh while playing.
    ProgressTick,
    /// Explicit user action that may resume blocked playback.
    UserGesture,
    ToggleMute,
    /// Rebuild the schedule from the catalog and re-locate "now".
    Reload,
    Shutdown,
}

pub struct SessionController {
    catalog: Vec<Episode>,
    schedule: Schedule,
    rotation: Rotation,
    timing: TimingConfig,
    state: StateHandle,
    player: mpsc::Sender<PlayerCommand>,
    /// Clone of the loop's own sender, for timers.
    events_tx: mpsc::Sender<SessionEvent>,
    now: fn() -> DateTime<Utc>,
    /// Generation of the live player binding.  Bumped on every bind and
    /// teardown; events stamped with an older value are dropped.
    session: u64,
    current: Option<usize>,
    phase: SessionPhase,
    pending_seek_secs: f64,
    elapsed_secs: f64,
    known_duration: Option<f64>,
    status_line: String,
    muted: bool,
}

impl SessionController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Vec<Episode>,
        rotation: Rotation,
        timing: TimingConfig,
        state: StateHandle,
        player: mpsc::Sender<PlayerCommand>,
        events_tx: mpsc::Sender<SessionEvent>,
        now: fn() -> DateTime<Utc>,
    ) -> Self {
        Self {
            catalog,
            schedule: Vec::new(),
            rotation,
            timing,
            state,
            player,
            events_tx,
            now,
            session: 0,
            current: None,
            phase: SessionPhase::Idle,
            pending_seek_secs: 0.0,
            elapsed_secs: 0.0,
            known_duration: None,
            status_line: String::new(),
            muted: false,
        }
    }

    /// Run until shutdown.  Locates "now" once on entry; everything
    /// after that is event-driven.
    pub async fn run(mut self, mut events: mpsc::Receiver<SessionEvent>) -> anyhow::Result<()> {
        self.reload().await;

        let ticker = {
            let tx = self.events_tx.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    if tx.send(SessionEvent::ProgressTick).await.is_err() {
                        break;
                    }
                }
            })
        };

        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Player { session, event } => {
                    self.handle_player(session, event).await;
                }
                SessionEvent::MetadataTimeout { session } => {
                    self.handle_metadata_timeout(session).await;
                }
                SessionEvent::ProgressTick => {
                    if self.phase == SessionPhase::Playing {
                        let elapsed_secs = self.elapsed_secs;
                        self.publish(ChannelUpdate::Progress { elapsed_secs }).await;
                    }
                }
                SessionEvent::UserGesture => self.handle_user_gesture().await,
                SessionEvent::ToggleMute => {
                    self.muted = !self.muted;
                    let _ = self.player.send(PlayerCommand::SetMute { muted: self.muted }).await;
                    self.publish(ChannelUpdate::StateUpdated).await;
                }
                SessionEvent::Reload => self.reload().await,
                SessionEvent::Shutdown => {
                    info!("session: shutdown requested");
                    let _ = self.player.send(PlayerCommand::Stop).await;
                    break;
                }
            }
        }

        ticker.abort();
        Ok(())
    }

    /// Recompute the schedule from scratch and bind whatever is on the
    /// air right now.  Both the initial load and manual refresh land
    /// here; the schedule is never patched incrementally.
    async fn reload(&mut self) {
        let now = (self.now)();
        // Invalidate anything still in flight from the previous schedule.
        self.session += 1;

        match build_schedule(&self.catalog, now, self.rotation, &self.timing) {
            Ok(schedule) => {
                info!("session: schedule built, {} entries", schedule.len());
                self.schedule = schedule;
                match locate(&self.schedule, now) {
                    Some(hit) => self.begin_entry(hit.pos, hit.elapsed_secs).await,
                    None => {
                        self.current = None;
                        self.phase = SessionPhase::Idle;
                        self.status_line = "No scheduled media for right now.".to_string();
                        self.publish(ChannelUpdate::StateUpdated).await;
                    }
                }
            }
            Err(e) => {
                warn!("session: cannot load schedule: {}", e);
                self.schedule.clear();
                self.current = None;
                self.phase = SessionPhase::Idle;
                self.status_line = format!("Failed to load schedule: {e}");
                self.publish(ChannelUpdate::StateUpdated).await;
            }
        }
    }

    /// Tear down the previous binding and bind the schedule entry at
    /// `pos`, aiming to resume `elapsed` seconds in.
    async fn begin_entry(&mut self, pos: usize, elapsed: f64) {
        self.session += 1;
        let _ = self.player.send(PlayerCommand::Stop).await;

        let entry = &self.schedule[pos];
        info!(
            "session: binding entry idx={} url={} offset={:.1}s",
            entry.idx, entry.episode.url, elapsed
        );

        self.current = Some(pos);
        self.pending_seek_secs = elapsed;
        self.elapsed_secs = elapsed;
        self.known_duration = entry.duration;
        self.phase = SessionPhase::Loading;
        self.status_line = format!("Loading: {}", entry.episode.label());

        let idx = entry.idx;
        let url = entry.episode.url.clone();
        let _ = self.player.send(PlayerCommand::Load { url, session: self.session }).await;

        // Bounded metadata wait: flaky networks must not hang the
        // session forever.  The loser of the race is dropped by the
        // generation/phase check, never cancelled mid-flight.
        let tx = self.events_tx.clone();
        let session = self.session;
        let wait = std::time::Duration::from_secs(self.timing.metadata_timeout_secs);
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let _ = tx.send(SessionEvent::MetadataTimeout { session }).await;
        });

        self.publish(ChannelUpdate::EntryChanged { idx }).await;
    }

    async fn handle_player(&mut self, session: u64, event: PlayerEvent) {
        if session != self.session {
            debug!("session: dropping stale event {:?} (gen {} != {})", event, session, self.session);
            return;
        }

        match event {
            PlayerEvent::MetadataReady { duration_secs } => {
                if self.phase != SessionPhase::Loading {
                    // Metadata lost the race against the timeout; the
                    // seek already happened best-effort.
                    return;
                }
                if duration_secs.is_some() {
                    self.known_duration = duration_secs;
                }
                self.seek_and_play().await;
            }
            PlayerEvent::TimeUpdate { position_secs, duration_secs } => {
                if self.phase == SessionPhase::Playing {
                    self.elapsed_secs = position_secs;
                    if duration_secs.is_some() {
                        self.known_duration = duration_secs;
                    }
                }
            }
            PlayerEvent::Ended => {
                if matches!(self.phase, SessionPhase::Playing | SessionPhase::Seeking) {
                    self.advance().await;
                }
            }
            PlayerEvent::Error { code } => {
                warn!("session: media error on current entry: {}", code);
                self.status_line = format!("Unable to play media: {code}. Reload to retry.");
                self.phase = SessionPhase::Failed(code);
                self.publish(ChannelUpdate::StateUpdated).await;
            }
            PlayerEvent::PlayRefused => {
                if matches!(self.phase, SessionPhase::Seeking | SessionPhase::Playing) {
                    info!("session: autoplay refused, waiting for user gesture");
                    self.phase = SessionPhase::Blocked;
                    self.status_line = "Click Play to start".to_string();
                    self.publish(ChannelUpdate::StateUpdated).await;
                }
            }
        }
    }

    async fn handle_metadata_timeout(&mut self, session: u64) {
        // The timer that lost the race against metadata-ready arrives
        // here with a stale generation or a phase that moved on.
        if session != self.session || self.phase != SessionPhase::Loading {
            return;
        }
        warn!(
            "session: metadata not ready after {}s, seeking best-effort",
            self.timing.metadata_timeout_secs
        );
        self.seek_and_play().await;
    }

    /// Clamped seek, then play.  Reached from metadata-ready or from
    /// the timeout — whichever wins.
    async fn seek_and_play(&mut self) {
        self.phase = SessionPhase::Seeking;
        let target = clamp_seek(
            self.pending_seek_secs,
            self.known_duration,
            self.timing.end_seek_guard_secs,
        );
        if target > 0.0 {
            let _ = self.player.send(PlayerCommand::SeekTo { secs: target }).await;
        }
        self.elapsed_secs = target;

        let _ = self.player.send(PlayerCommand::Play).await;
        self.phase = SessionPhase::Playing;
        if let Some(pos) = self.current {
            let entry = &self.schedule[pos];
            self.status_line = match entry.episode.air_date.as_deref() {
                Some(date) => format!(
                    "Playing: {} (Original Air Date: {})",
                    entry.episode.label(),
                    view::format_air_date(date)
                ),
                None => format!("Playing: {}", entry.episode.label()),
            };
        }
        self.publish(ChannelUpdate::StateUpdated).await;
    }

    /// Natural end of the current entry: start the next one from its
    /// beginning.  Having advanced, the controller is authoritative
    /// about position — no wall-clock offset for the new entry.
    async fn advance(&mut self) {
        let Some(cur) = self.current else { return };
        if cur + 1 < self.schedule.len() {
            self.begin_entry(cur + 1, 0.0).await;
        } else {
            info!("session: end of schedule");
            self.phase = SessionPhase::Ended;
            self.status_line = "End of schedule.".to_string();
            self.publish(ChannelUpdate::StateUpdated).await;
        }
    }

    /// One explicit user action resumes blocked playback from wherever
    /// the media stands — the seek is not re-run.
    async fn handle_user_gesture(&mut self) {
        if self.phase != SessionPhase::Blocked {
            return;
        }
        let _ = self.player.send(PlayerCommand::Play).await;
        self.phase = SessionPhase::Playing;
        if let Some(pos) = self.current {
            self.status_line = format!("Playing: {}", self.schedule[pos].episode.label());
        }
        self.publish(ChannelUpdate::StateUpdated).await;
    }

    /// Push a fresh projection of the whole channel state.
    async fn publish(&self, note: ChannelUpdate) {
        let current_status = match self.phase {
            SessionPhase::Playing => EntryStatus::Playing { elapsed_secs: self.elapsed_secs },
            SessionPhase::Loading | SessionPhase::Seeking | SessionPhase::Blocked => {
                EntryStatus::Waiting
            }
            _ => EntryStatus::Inactive,
        };
        let rows = view::project_rows(&self.schedule, self.current, &current_status);
        let now_playing = self.current.map(|pos| {
            let entry = &self.schedule[pos];
            NowPlaying {
                idx: entry.idx,
                label: entry.episode.label().to_string(),
                air_date: entry.episode.air_date.clone(),
                elapsed_secs: self.elapsed_secs,
                duration_secs: self.known_duration,
            }
        });
        let up_next = self
            .current
            .and_then(|pos| view::up_next(&self.schedule, pos))
            .map(|entry| entry.episode.label().to_string());

        let phase = self.phase.clone();
        let status_line = self.status_line.clone();
        let muted = self.muted;
        self.state
            .update(
                move |s| {
                    s.phase = phase;
                    s.status_line = status_line;
                    s.rows = rows;
                    s.now_playing = now_playing;
                    s.up_next = up_next;
                    s.muted = muted;
                },
                note,
            )
            .await;
    }
}

/// Clamp a requested resume offset.  Never seek past a known end —
/// leave a small remainder so "ended" still fires naturally — and never
/// seek negative.  Unknown duration seeks as requested.
fn clamp_seek(elapsed: f64, duration: Option<f64>, guard_secs: f64) -> f64 {
    let elapsed = elapsed.max(0.0);
    match duration {
        Some(d) => elapsed.min((d - guard_secs).max(0.0)),
        None => elapsed,
    }
}
