//! Channel state owned by the session controller and shared read-only
//! with renderers.  `rev` is a monotonically increasing counter bumped
//! on every change; subscribers can use it to detect missed updates.

use std::sync::Arc;

use onair_core::view::{EntryRow, NowPlaying};
use tokio::sync::{broadcast, RwLock};

/// Lifecycle of the single live playback session.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionPhase {
    /// Nothing bound — before first locate, or nothing scheduled now.
    #[default]
    Idle,
    /// Media handle created, waiting for metadata (bounded).
    Loading,
    /// Metadata ready (or timed out), clamped seek in flight.
    Seeking,
    Playing,
    /// Platform refused autonomous playback; one user gesture resumes.
    Blocked,
    /// Last schedule entry finished; stays here until a reload.
    Ended,
    /// Media error, terminal for this entry.  No auto-retry, no
    /// auto-skip — silently skipping could cascade through the whole
    /// remaining cycle without the listener ever noticing.
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct ChannelState {
    pub rev: u64,
    pub phase: SessionPhase,
    /// One-line user-visible status, including surfaced errors.
    pub status_line: String,
    /// Visible slice of the schedule table.
    pub rows: Vec<EntryRow>,
    pub now_playing: Option<NowPlaying>,
    pub up_next: Option<String>,
    pub muted: bool,
}

/// Notifications pushed to renderers alongside the state snapshot.
#[derive(Debug, Clone)]
pub enum ChannelUpdate {
    StateUpdated,
    EntryChanged { idx: u32 },
    Progress { elapsed_secs: f64 },
}

/// Shared handle to the channel state plus its update broadcast.
#[derive(Clone)]
pub struct StateHandle {
    state: Arc<RwLock<ChannelState>>,
    updates: broadcast::Sender<ChannelUpdate>,
}

impl StateHandle {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            state: Arc::new(RwLock::new(ChannelState::default())),
            updates,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelUpdate> {
        self.updates.subscribe()
    }

    pub async fn snapshot(&self) -> ChannelState {
        self.state.read().await.clone()
    }

    /// Apply a mutation, bump `rev`, and notify subscribers.  A send
    /// error only means nobody is listening, which is fine.
    pub async fn update(&self, apply: impl FnOnce(&mut ChannelState), note: ChannelUpdate) {
        {
            let mut state = self.state.write().await;
            apply(&mut state);
            state.rev += 1;
        }
        let _ = self.updates.send(note);
    }
}
