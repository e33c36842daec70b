//! The episode catalog: a flat, externally supplied, ordered list of
//! pre-recorded episodes.  This is the only input to the timeline
//! builder; it carries no timing information of its own beyond each
//! episode's runtime.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ChannelError;

/// One pre-recorded episode as delivered by the upstream feed.
///
/// `url` is the content identity and must be non-empty; entries without
/// it are dropped during parsing.  `duration` is `None` when the feed
/// omitted it or supplied something unusable — unknown, never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "tolerant_duration")]
    pub duration: Option<f64>,
    #[serde(default, rename = "airDate")]
    pub air_date: Option<String>,
}

impl Episode {
    /// Display label: title when present, URL otherwise.
    pub fn label(&self) -> &str {
        if self.title.is_empty() {
            &self.url
        } else {
            &self.title
        }
    }
}

/// Accept whatever the feed put in `duration` and keep it only when it
/// is a usable number of seconds.  Feeds have been observed shipping
/// `"00:00:00"` strings and zeros here; both mean "length unknown" for
/// scheduling purposes.
fn tolerant_duration<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(|v| v.as_f64()).and_then(normalize_duration))
}

/// A duration is usable only when finite and at least one second.
/// Zero-length slots would stall the timeline builder, and sub-second
/// values would explode a week into millions of entries; both mean
/// "length unknown" and take the fallback slot instead.
pub const MIN_USABLE_DURATION_SECS: f64 = 1.0;

pub fn normalize_duration(secs: f64) -> Option<f64> {
    if secs.is_finite() && secs >= MIN_USABLE_DURATION_SECS {
        Some(secs)
    } else {
        None
    }
}

/// Parse the feed document: a JSON array of episode objects.
///
/// Tolerant of missing optional fields; entries without a `url` are
/// skipped.  A document that is not a JSON array at all counts as an
/// unavailable feed.
pub fn parse_catalog(raw: &str) -> Result<Vec<Episode>, ChannelError> {
    let episodes: Vec<Episode> = serde_json::from_str(raw)
        .map_err(|e| ChannelError::FeedUnavailable(format!("malformed feed: {e}")))?;
    Ok(episodes.into_iter().filter(|e| !e.url.is_empty()).collect())
}
