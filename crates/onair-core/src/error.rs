use thiserror::Error;

/// Failures that can invalidate a whole load attempt.
///
/// Session-level conditions (metadata timeout, autoplay policy block,
/// media errors) are not in here on purpose: they are states of the
/// playback session machine, local to one entry, and never make the
/// catalog or schedule invalid.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// No schedule can be built from zero episodes.  Fatal for this
    /// load; surfaced to the user, never retried automatically.
    #[error("catalog is empty, cannot build a schedule")]
    EmptyCatalog,

    /// The feed could not be fetched or parsed.  The catalog is treated
    /// as empty for this attempt; a later reload may succeed.
    #[error("feed unavailable: {0}")]
    FeedUnavailable(String),
}
