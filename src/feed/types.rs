use chrono::{DateTime, Utc};
use serde::Serialize;

// ============================================================================
// Sources
// ============================================================================

/// One feed endpoint to fetch, plus the labels its items are filed under.
#[derive(Debug, Clone)]
pub struct FeedSource {
    /// Endpoint of the RSS/Atom document.
    pub feed_url: String,
    /// Category the items belong to (e.g. `opmlrss`).
    pub site_id: String,
    /// Display name of the category.
    pub site_name: String,
    /// Preferred source label; the channel title and the host are fallbacks.
    pub title_fallback: String,
    /// Stamp entries without any date with the fetch time instead of
    /// dropping them.
    pub allow_missing_published: bool,
}

impl FeedSource {
    /// Label used to order statuses: the display title, else the endpoint.
    pub fn sort_key(&self) -> &str {
        if self.title_fallback.trim().is_empty() {
            &self.feed_url
        } else {
            &self.title_fallback
        }
    }
}

// ============================================================================
// Items
// ============================================================================

/// A feed entry in canonical form, produced once per fetch cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RawItem {
    pub site_id: String,
    pub site_name: String,
    /// The specific feed/channel the item came from.
    pub source: String,
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Status reporting
// ============================================================================

/// Outcome of one fetch attempt, or of a whole batch when `breakdown` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedStatus {
    pub site_id: String,
    pub site_name: String,
    pub ok: bool,
    pub item_count: usize,
    pub duration_ms: u64,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_url: Option<String>,
    /// Subscription-list display name of the feed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_title: Option<String>,
    #[serde(flatten)]
    pub breakdown: Option<FeedBreakdown>,
}

/// Per-feed counts attached to a batch summary status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedBreakdown {
    pub partial_failures: usize,
    pub feed_count: usize,
    pub ok_feed_count: usize,
    pub failed_feed_count: usize,
}

impl FeedStatus {
    /// A failed status that never reached the network (e.g. missing OPML).
    pub fn failed(site_id: &str, site_name: &str, error: impl Into<String>) -> Self {
        Self {
            site_id: site_id.to_string(),
            site_name: site_name.to_string(),
            ok: false,
            item_count: 0,
            duration_ms: 0,
            error: Some(error.into()),
            feed_url: None,
            feed_title: None,
            breakdown: Some(FeedBreakdown::default()),
        }
    }

    /// Subscription title, else endpoint. Orders per-feed statuses.
    pub fn display_name(&self) -> &str {
        self.feed_title
            .as_deref()
            .or(self.feed_url.as_deref())
            .unwrap_or("")
    }

    /// The endpoint when known, else the site id. Used in failure lists.
    pub fn label(&self) -> &str {
        self.feed_url.as_deref().unwrap_or(&self.site_id)
    }
}
