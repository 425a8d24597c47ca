//! Grouping, ranking and statistics over the pruned archive.
//!
//! [`build_report`] selects the tracked categories, enriches their records
//! for display, keeps the newest [`ITEM_LIMIT`] of each and derives per-site
//! counts. The [`payload`] builders turn a [`Report`] into the JSON documents
//! written at the end of a run.

pub mod payload;

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::archive::{ArchiveRecord, ArchiveStore};
use crate::util::{host_of_url, repair_mojibake, UNSORTED_SOURCE};

pub use payload::{ArchivePayload, LatestPayload, StatusPayload};

/// Items kept per category.
pub const ITEM_LIMIT: usize = 20;

// ============================================================================
// Categories
// ============================================================================

/// The item categories a report tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Feeds listed in the OPML subscription file.
    Subscriptions,
    /// The fixed aggregator feed.
    Aggregator,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Subscriptions, Category::Aggregator];

    pub fn site_id(self) -> &'static str {
        match self {
            Category::Subscriptions => "opmlrss",
            Category::Aggregator => "momoyurss",
        }
    }

    pub fn site_name(self) -> &'static str {
        match self {
            Category::Subscriptions => "OPML RSS",
            Category::Aggregator => "Momoyu RSS",
        }
    }

    pub fn from_site_id(site_id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.site_id() == site_id)
    }
}

// ============================================================================
// Items and statistics
// ============================================================================

/// An archive record prepared for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportItem {
    #[serde(flatten)]
    pub record: ArchiveRecord,
    /// Title as shown, before any later presentation step rewrites it.
    pub title_original: String,
}

impl ReportItem {
    /// Published time, else first sighting.
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        self.record.published_at.or(self.record.first_seen_at)
    }
}

/// Item count of one site in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteStats {
    pub site_id: String,
    pub site_name: String,
    pub count: usize,
}

/// Ranked and counted view of the archive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    /// Records in the archive after pruning, tracked or not.
    pub archive_total: usize,
    /// Newest subscription items.
    pub subscriptions: Vec<ReportItem>,
    /// Newest aggregator items.
    pub aggregator: Vec<ReportItem>,
    /// Both categories merged, newest first.
    pub items: Vec<ReportItem>,
    /// Per-site counts over `items`, largest first.
    pub site_stats: Vec<SiteStats>,
    /// Distinct (site, source) pairs in `items`.
    pub source_count: usize,
}

impl Report {
    pub fn category(&self, category: Category) -> &[ReportItem] {
        match category {
            Category::Subscriptions => &self.subscriptions,
            Category::Aggregator => &self.aggregator,
        }
    }
}

/// Source label for display: the stored label, else the link's host without
/// `www.`, else [`UNSORTED_SOURCE`].
///
/// # Examples
///
/// ```
/// use feedroll::report::display_source;
///
/// assert_eq!(display_source("", "https://news.example.com/item?id=1"), "news.example.com");
/// assert_eq!(display_source("", "https://www.example.com/a"), "example.com");
/// assert_eq!(display_source("  Blog ", "https://example.com/a"), "Blog");
/// ```
pub fn display_source(source: &str, url: &str) -> String {
    let source = source.trim();
    if !source.is_empty() {
        return source.to_string();
    }
    let host = host_of_url(url);
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        UNSORTED_SOURCE.to_string()
    } else {
        host.to_string()
    }
}

/// Repairs title and source text and fills in a missing source label.
pub fn enrich(record: &ArchiveRecord) -> ReportItem {
    let mut record = record.clone();
    record.title = repair_mojibake(&record.title);
    record.source = repair_mojibake(&display_source(&record.source, &record.url));
    ReportItem {
        title_original: record.title.clone(),
        record,
    }
}

/// Newest first by [`ReportItem::event_time`]; undated items last.
fn sort_by_event_time(items: &mut [ReportItem]) {
    items.sort_by(|a, b| b.event_time().cmp(&a.event_time()));
}

/// Builds the report over every tracked category of `store`.
pub fn build_report(store: &ArchiveStore) -> Report {
    let mut by_category: HashMap<Category, Vec<ReportItem>> = HashMap::new();
    for record in store.records() {
        if let Some(category) = Category::from_site_id(&record.site_id) {
            by_category.entry(category).or_default().push(enrich(record));
        }
    }

    let mut top = |category: Category| {
        let mut items = by_category.remove(&category).unwrap_or_default();
        sort_by_event_time(&mut items);
        items.truncate(ITEM_LIMIT);
        items
    };
    let subscriptions = top(Category::Subscriptions);
    let aggregator = top(Category::Aggregator);

    let mut items: Vec<ReportItem> = subscriptions.iter().chain(&aggregator).cloned().collect();
    sort_by_event_time(&mut items);

    let (site_stats, source_count) = group_stats(&items);
    Report {
        archive_total: store.len(),
        subscriptions,
        aggregator,
        items,
        site_stats,
        source_count,
    }
}

/// Per-site counts, in order of first appearance and then largest first, plus
/// the number of distinct (site, source) pairs.
fn group_stats(items: &[ReportItem]) -> (Vec<SiteStats>, usize) {
    let mut stats: Vec<SiteStats> = Vec::new();
    let mut sources: HashSet<(&str, &str)> = HashSet::new();

    for item in items {
        let record = &item.record;
        sources.insert((record.site_id.as_str(), record.source.as_str()));
        match stats.iter_mut().find(|s| s.site_id == record.site_id) {
            Some(site) => site.count += 1,
            None => stats.push(SiteStats {
                site_id: record.site_id.clone(),
                site_name: if record.site_name.is_empty() {
                    record.site_id.clone()
                } else {
                    record.site_name.clone()
                },
                count: 1,
            }),
        }
    }

    stats.sort_by(|a, b| b.count.cmp(&a.count));
    (stats, sources.len())
}
