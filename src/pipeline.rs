//! One batch run: fetch every source, reconcile the archive, build the report.
//!
//! Nothing here is fatal. Fetch and OPML problems end up in the statuses of
//! [`RunOutput`]; only writing the output files can fail.
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};

use crate::archive::{reconcile, ArchiveStore, ReconcileStats};
use crate::config::Config;
use crate::feed::{
    opml, summarize, DigestScraper, FeedClient, FeedSource, FeedStatus, OpmlFeed, ParsedSections,
};
use crate::output::{write_json, OutputError};
use crate::report::payload::StatusCounts;
use crate::report::{build_report, ArchivePayload, Category, LatestPayload, Report, StatusPayload};

pub const ARCHIVE_FILE: &str = "archive.json";
pub const LATEST_FILE: &str = "latest-24h.json";
pub const STATUS_FILE: &str = "source-status.json";

/// Source label of every aggregator item.
pub const AGGREGATOR_TITLE: &str = "momoyu.cc";

/// Everything one run produced, ready to be written out.
#[derive(Debug)]
pub struct RunOutput {
    pub generated_at: DateTime<Utc>,
    pub window_hours: u32,
    /// OPML file in use, `None` when subscriptions are disabled.
    pub opml_path: Option<PathBuf>,
    pub store: ArchiveStore,
    pub report: Report,
    pub sections: ParsedSections,
    /// Subscription summary (when enabled) followed by the aggregator status.
    pub sites: Vec<FeedStatus>,
    /// Per-feed statuses of the subscription batch.
    pub feeds: Vec<FeedStatus>,
    /// Raw items fetched this run, before validation and dedup.
    pub fetched_raw_items: usize,
    pub stats: ReconcileStats,
}

impl RunOutput {
    pub fn latest(&self) -> LatestPayload<'_> {
        LatestPayload::new(
            &self.report,
            &self.sections,
            self.generated_at,
            self.window_hours,
        )
    }

    pub fn archive(&self) -> ArchivePayload<'_> {
        ArchivePayload::new(&self.store, self.generated_at)
    }

    pub fn status(&self) -> StatusPayload<'_> {
        StatusPayload::new(
            &self.sites,
            &self.feeds,
            self.opml_path.as_deref(),
            StatusCounts {
                fetched_raw_items: self.fetched_raw_items,
                items_in_window: self.report.items.len(),
            },
            self.generated_at,
        )
    }

    /// Writes the three output documents into `dir`, archive first.
    pub fn write(&self, dir: &Path) -> Result<(), OutputError> {
        write_json(&dir.join(ARCHIVE_FILE), &self.archive())?;
        write_json(&dir.join(LATEST_FILE), &self.latest())?;
        write_json(&dir.join(STATUS_FILE), &self.status())?;
        Ok(())
    }
}

/// Fetch sources for the subscription list, labelled with their OPML titles.
pub fn subscription_sources(feeds: &[OpmlFeed]) -> Vec<FeedSource> {
    let category = Category::Subscriptions;
    feeds
        .iter()
        .map(|feed| FeedSource {
            feed_url: feed.xml_url.clone(),
            site_id: category.site_id().to_string(),
            site_name: category.site_name().to_string(),
            title_fallback: feed.title.clone(),
            allow_missing_published: false,
        })
        .collect()
}

/// The fixed aggregator feed. Its entries often carry no date, so they are
/// stamped with the fetch time instead of being dropped.
pub fn aggregator_source(url: &str) -> FeedSource {
    let category = Category::Aggregator;
    FeedSource {
        feed_url: url.to_string(),
        site_id: category.site_id().to_string(),
        site_name: category.site_name().to_string(),
        title_fallback: AGGREGATOR_TITLE.to_string(),
        allow_missing_published: true,
    }
}

/// Runs one batch against the archive in `config.output_dir`.
pub async fn run(config: &Config, client: &FeedClient, now: DateTime<Utc>) -> RunOutput {
    let store = ArchiveStore::load(&config.output_dir.join(ARCHIVE_FILE));
    tracing::info!(records = store.len(), "Loaded archive");

    let opml_path = config.opml_path();
    let mut items = Vec::new();
    let mut sites = Vec::new();
    let mut feeds = Vec::new();

    if let Some(path) = &opml_path {
        let category = Category::Subscriptions;
        match opml::load(path).await {
            Ok(list) => {
                tracing::info!(path = %path.display(), feeds = list.len(), "Loaded subscription list");
                let outcome = client
                    .fetch_all(subscription_sources(&list), config.rss_max_feeds, now)
                    .await;
                sites.push(summarize(category.site_id(), category.site_name(), &outcome));
                items.extend(outcome.items);
                feeds = outcome.statuses;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Subscription list unavailable");
                sites.push(FeedStatus::failed(
                    category.site_id(),
                    category.site_name(),
                    e.to_string(),
                ));
            }
        }
    }

    let (aggregator, sections) = client
        .fetch_aggregator(&aggregator_source(&config.aggregator_url), &DigestScraper, now)
        .await;
    sites.push(aggregator.status);
    items.extend(aggregator.items);

    let fetched_raw_items = items.len();
    let retention = TimeDelta::days(i64::from(config.archive_days));
    let (store, stats) = reconcile(store, &items, now, retention);
    let report = build_report(&store);

    tracing::info!(
        fetched = fetched_raw_items,
        archive_total = report.archive_total,
        in_window = report.items.len(),
        "Run complete"
    );

    RunOutput {
        generated_at: now,
        window_hours: config.window_hours,
        opml_path,
        store,
        report,
        sections,
        sites,
        feeds,
        fetched_raw_items,
        stats,
    }
}
