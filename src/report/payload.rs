//! JSON documents written at the end of a run.
//!
//! Every payload borrows from the run's report, archive and statuses; the
//! field names are the on-disk format read by downstream consumers.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::archive::{ArchiveRecord, ArchiveStore};
use crate::feed::{FeedStatus, ParsedSections};
use crate::report::{Category, Report, ReportItem, SiteStats, ITEM_LIMIT};
use crate::util::to_iso;

// ============================================================================
// latest-24h.json
// ============================================================================

/// The rolling-window snapshot.
#[derive(Debug, Serialize)]
pub struct LatestPayload<'a> {
    pub generated_at: String,
    pub window_hours: u32,
    pub archive_total: usize,
    pub site_count: usize,
    pub source_count: usize,
    pub site_stats: &'a [SiteStats],
    pub total_items: usize,
    pub items: &'a [ReportItem],
    pub follow_opml_limit: usize,
    pub follow_opml_count: usize,
    pub follow_opml_items: &'a [ReportItem],
    pub momoyu_limit: usize,
    pub momoyu_count: usize,
    pub momoyu_items: &'a [ReportItem],
    pub momoyu_parsed: &'a ParsedSections,
    pub subscriptions: SubscriptionsBlock<'a>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionsBlock<'a> {
    pub total_items: usize,
    pub items: &'a [ReportItem],
    pub groups: &'a [SiteStats],
    pub sections: SectionsBlock<'a>,
}

#[derive(Debug, Serialize)]
pub struct SectionsBlock<'a> {
    pub follow_opml: CategoryBlock<'a>,
    pub momoyu: AggregatorBlock<'a>,
}

#[derive(Debug, Serialize)]
pub struct CategoryBlock<'a> {
    pub limit: usize,
    pub count: usize,
    pub items: &'a [ReportItem],
}

#[derive(Debug, Serialize)]
pub struct AggregatorBlock<'a> {
    #[serde(flatten)]
    pub block: CategoryBlock<'a>,
    pub parsed: &'a ParsedSections,
}

impl<'a> LatestPayload<'a> {
    /// `window_hours` is reported as configured; item selection is by rank
    /// and count only.
    pub fn new(
        report: &'a Report,
        parsed: &'a ParsedSections,
        generated_at: DateTime<Utc>,
        window_hours: u32,
    ) -> Self {
        let block = |category: Category| {
            let items = report.category(category);
            CategoryBlock {
                limit: ITEM_LIMIT,
                count: items.len(),
                items,
            }
        };

        Self {
            generated_at: to_iso(&generated_at),
            window_hours,
            archive_total: report.archive_total,
            site_count: report.site_stats.len(),
            source_count: report.source_count,
            site_stats: &report.site_stats,
            total_items: report.items.len(),
            items: &report.items,
            follow_opml_limit: ITEM_LIMIT,
            follow_opml_count: report.subscriptions.len(),
            follow_opml_items: &report.subscriptions,
            momoyu_limit: ITEM_LIMIT,
            momoyu_count: report.aggregator.len(),
            momoyu_items: &report.aggregator,
            momoyu_parsed: parsed,
            subscriptions: SubscriptionsBlock {
                total_items: report.items.len(),
                items: &report.items,
                groups: &report.site_stats,
                sections: SectionsBlock {
                    follow_opml: block(Category::Subscriptions),
                    momoyu: AggregatorBlock {
                        block: block(Category::Aggregator),
                        parsed,
                    },
                },
            },
        }
    }
}

// ============================================================================
// archive.json
// ============================================================================

/// Every surviving record, most recently seen first.
#[derive(Debug, Serialize)]
pub struct ArchivePayload<'a> {
    pub generated_at: String,
    pub total_items: usize,
    pub items: Vec<&'a ArchiveRecord>,
}

impl<'a> ArchivePayload<'a> {
    pub fn new(store: &'a ArchiveStore, generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at: to_iso(&generated_at),
            total_items: store.len(),
            items: store.sorted_by_last_seen(),
        }
    }
}

// ============================================================================
// source-status.json
// ============================================================================

/// Health report: one status per category plus per-feed detail for the
/// subscription list.
#[derive(Debug, Serialize)]
pub struct StatusPayload<'a> {
    pub generated_at: String,
    pub sites: &'a [FeedStatus],
    pub successful_sites: usize,
    pub failed_sites: Vec<&'a str>,
    pub zero_item_sites: Vec<&'a str>,
    pub fetched_raw_items: usize,
    pub items_in_window: usize,
    pub rss_opml: OpmlStatus<'a>,
}

#[derive(Debug, Serialize)]
pub struct OpmlStatus<'a> {
    pub enabled: bool,
    pub path: Option<String>,
    pub feed_total: usize,
    pub ok_feeds: usize,
    pub failed_feeds: Vec<&'a str>,
    pub zero_item_feeds: Vec<&'a str>,
    pub feeds: &'a [FeedStatus],
}

/// Inputs of [`StatusPayload::new`] beyond the statuses themselves.
#[derive(Debug, Clone, Copy)]
pub struct StatusCounts {
    pub fetched_raw_items: usize,
    pub items_in_window: usize,
}

impl<'a> StatusPayload<'a> {
    pub fn new(
        sites: &'a [FeedStatus],
        feeds: &'a [FeedStatus],
        opml_path: Option<&Path>,
        counts: StatusCounts,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let site_ids = |keep: fn(&FeedStatus) -> bool| -> Vec<&'a str> {
            sites
                .iter()
                .filter(|s| keep(s))
                .map(|s| s.site_id.as_str())
                .collect()
        };
        let feed_labels = |keep: fn(&FeedStatus) -> bool| -> Vec<&'a str> {
            feeds.iter().filter(|s| keep(s)).map(|s| s.label()).collect()
        };

        Self {
            generated_at: to_iso(&generated_at),
            sites,
            successful_sites: sites.iter().filter(|s| s.ok).count(),
            failed_sites: site_ids(is_failed),
            zero_item_sites: site_ids(is_empty_success),
            fetched_raw_items: counts.fetched_raw_items,
            items_in_window: counts.items_in_window,
            rss_opml: OpmlStatus {
                enabled: opml_path.is_some(),
                path: opml_path.map(|p| p.display().to_string()),
                feed_total: feeds.len(),
                ok_feeds: feeds.iter().filter(|s| s.ok).count(),
                failed_feeds: feed_labels(is_failed),
                zero_item_feeds: feed_labels(is_empty_success),
                feeds,
            },
        }
    }
}

fn is_failed(status: &FeedStatus) -> bool {
    !status.ok
}

fn is_empty_success(status: &FeedStatus) -> bool {
    status.ok && status.item_count == 0
}
