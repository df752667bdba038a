use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Engine tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Messages per page for latest, older and poll fetches.
    pub page_size: usize,
    /// Fixed poll period; there is no backoff.
    pub poll_interval: Duration,
    /// Distance from the bottom (px) still counted as "at the latest message".
    pub near_bottom_px: f64,
    /// Scroll offset (px) at which the next older page is requested.
    pub near_top_px: f64,
    /// Upper bound on parent hops when resolving a group thread root.
    pub max_parent_hops: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 40,
            poll_interval: Duration::from_secs(4),
            near_bottom_px: 40.0,
            near_top_px: 100.0,
            max_parent_hops: 25,
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `EMBER_PAGE_SIZE` and `EMBER_POLL_SECS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            page_size: env_or("EMBER_PAGE_SIZE", defaults.page_size).max(1),
            poll_interval: Duration::from_secs(
                env_or("EMBER_POLL_SECS", defaults.poll_interval.as_secs()).max(1),
            ),
            ..defaults
        }
    }
}

fn env_or<T: FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}='{}'", name, raw);
            default
        }),
        Err(_) => default,
    }
}
