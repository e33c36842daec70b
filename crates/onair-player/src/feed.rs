//! Catalog acquisition: one fresh GET (or local file read) per load.
//! Nothing is cached — the whole point of rebuilding the schedule from
//! scratch is that every load sees the feed as it is now.

use onair_core::catalog::{parse_catalog, Episode};
use onair_core::config::FeedConfig;
use onair_core::error::ChannelError;
use tracing::info;

const FETCH_TIMEOUT_SECS: u64 = 30;

/// Load the episode catalog.  A configured local file takes priority
/// over the feed URL.  Any transport or parse failure is
/// `FeedUnavailable`: the caller treats the catalog as empty for this
/// attempt and surfaces the error instead of crashing.
pub async fn load_catalog(feed: &FeedConfig) -> Result<Vec<Episode>, ChannelError> {
    if let Some(path) = &feed.file {
        info!("feed: reading local catalog {}", path.display());
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ChannelError::FeedUnavailable(format!("{}: {e}", path.display())))?;
        return parse_catalog(&raw);
    }

    info!("feed: fetching catalog from {}", feed.url);
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(FETCH_TIMEOUT_SECS))
        .build()
        .map_err(|e| ChannelError::FeedUnavailable(e.to_string()))?;

    let response = client
        .get(&feed.url)
        .header(reqwest::header::CACHE_CONTROL, "no-cache")
        .send()
        .await
        .map_err(|e| ChannelError::FeedUnavailable(e.to_string()))?;

    if !response.status().is_success() {
        return Err(ChannelError::FeedUnavailable(format!(
            "feed returned {}",
            response.status()
        )));
    }

    let raw = response
        .text()
        .await
        .map_err(|e| ChannelError::FeedUnavailable(e.to_string()))?;
    let catalog = parse_catalog(&raw)?;
    info!("feed: catalog loaded, {} episodes", catalog.len());
    Ok(catalog)
}
