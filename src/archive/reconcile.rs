use std::collections::{HashMap, HashSet};

use chrono::{DateTime, TimeDelta, Utc};

use crate::archive::identity::item_id;
use crate::archive::store::{ArchiveRecord, ArchiveStore};
use crate::feed::RawItem;
use crate::util::{identity_url, normalize_url};

/// Counts from one reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// New records.
    pub inserted: usize,
    /// Existing records sighted again.
    pub updated: usize,
    /// Raw items without a title or an http(s) link.
    pub skipped: usize,
    /// Records dropped by retention.
    pub pruned: usize,
}

enum Merge {
    Inserted,
    Updated,
}

/// (site, source, link) of a record, compared the way identities are.
type LinkKey = (String, String, String);

fn link_key(site_id: &str, source: &str, url: &str) -> LinkKey {
    (
        site_id.trim().to_lowercase(),
        source.trim().to_lowercase(),
        identity_url(url),
    )
}

/// Finds records by link when an upstream title edit changed the identity.
struct LinkIndex {
    by_link: HashMap<LinkKey, Vec<String>>,
    /// Records matched or created in this pass, plus every record some item
    /// of the batch hits by id. None of them may be taken over by link.
    claimed: HashSet<String>,
}

impl LinkIndex {
    fn build(store: &ArchiveStore, claimed: HashSet<String>) -> Self {
        let mut by_link: HashMap<LinkKey, Vec<String>> = HashMap::new();
        for record in store.records() {
            by_link
                .entry(link_key(&record.site_id, &record.source, &record.url))
                .or_default()
                .push(record.id.clone());
        }
        Self { by_link, claimed }
    }

    /// The record a re-titled item should update, if any.
    ///
    /// Only a link shared by no other record qualifies, and only when the
    /// stored publication time equals the item's. Feeds that reuse one link
    /// for a series of items (a daily digest) therefore keep one record per
    /// title.
    fn retitled(
        &self,
        store: &ArchiveStore,
        key: &LinkKey,
        published_at: Option<DateTime<Utc>>,
    ) -> Option<String> {
        let [id] = self.by_link.get(key)?.as_slice() else {
            return None;
        };
        if self.claimed.contains(id) {
            return None;
        }
        let record = store.get(id)?;
        (record.published_at.is_some() && record.published_at == published_at)
            .then(|| id.clone())
    }

    fn add(&mut self, key: LinkKey, id: String) {
        self.by_link.entry(key).or_default().push(id.clone());
        self.claimed.insert(id);
    }
}

/// A raw item that passed validation, with its normalized link and identity.
struct Candidate<'a> {
    raw: &'a RawItem,
    title: &'a str,
    url: String,
    id: String,
}

impl<'a> Candidate<'a> {
    fn new(raw: &'a RawItem) -> Option<Self> {
        let title = raw.title.trim();
        let url = normalize_url(&raw.url);
        if title.is_empty() || !url.starts_with("http") {
            return None;
        }
        let id = item_id(&raw.site_id, &raw.source, title, &url);
        Some(Self { raw, title, url, id })
    }
}

/// Merges a batch of fetched items into the archive, then applies retention.
///
/// New items become records with `first_seen_at = last_seen_at = now`. A
/// re-sighted item is found by identity, or failing that by site, source,
/// link and publication time (its title changed upstream). It keeps the id
/// and `first_seen_at` it was first archived with; its display fields are
/// refreshed, `last_seen_at` advances to `now` and `published_at` is only
/// replaced by a non-null value. Records whose reference time (last seen,
/// else published, else first seen, else `now`) is older than
/// `now - retention` are dropped; the exact boundary is kept.
pub fn reconcile(
    mut store: ArchiveStore,
    items: &[RawItem],
    now: DateTime<Utc>,
    retention: TimeDelta,
) -> (ArchiveStore, ReconcileStats) {
    let mut stats = ReconcileStats::default();
    let candidates: Vec<Option<Candidate<'_>>> = items.iter().map(Candidate::new).collect();
    let direct_hits: HashSet<String> = candidates
        .iter()
        .flatten()
        .filter(|c| store.get(&c.id).is_some())
        .map(|c| c.id.clone())
        .collect();
    let mut index = LinkIndex::build(&store, direct_hits);

    for candidate in candidates {
        match candidate {
            Some(candidate) => match merge_item(&mut store, &mut index, candidate, now) {
                Merge::Inserted => stats.inserted += 1,
                Merge::Updated => stats.updated += 1,
            },
            None => stats.skipped += 1,
        }
    }
    stats.pruned = prune(&mut store, now, retention);

    tracing::info!(
        inserted = stats.inserted,
        updated = stats.updated,
        skipped = stats.skipped,
        pruned = stats.pruned,
        total = store.len(),
        "Archive reconciled"
    );
    (store, stats)
}

fn merge_item(
    store: &mut ArchiveStore,
    index: &mut LinkIndex,
    candidate: Candidate<'_>,
    now: DateTime<Utc>,
) -> Merge {
    let Candidate { raw, title, url, id } = candidate;
    let key = link_key(&raw.site_id, &raw.source, &url);
    let target = if store.get(&id).is_some() {
        Some(id.clone())
    } else {
        index.retitled(store, &key, raw.published_at)
    };

    if let Some(existing) = target.as_deref().and_then(|t| store.get_mut(t)) {
        if existing.id != id {
            tracing::debug!(id = %existing.id, title = %title, "Matched re-titled item by link");
        }
        existing.site_id = raw.site_id.clone();
        existing.site_name = raw.site_name.clone();
        existing.source = raw.source.clone();
        existing.title = title.to_string();
        existing.url = url;
        if raw.published_at.is_some() {
            existing.published_at = raw.published_at;
        }
        existing.first_seen_at.get_or_insert(now);
        existing.last_seen_at = Some(existing.last_seen_at.map_or(now, |prev| prev.max(now)));
        index.claimed.insert(existing.id.clone());
        return Merge::Updated;
    }

    store.insert(ArchiveRecord {
        id: id.clone(),
        site_id: raw.site_id.clone(),
        site_name: raw.site_name.clone(),
        source: raw.source.clone(),
        title: title.to_string(),
        url,
        published_at: raw.published_at,
        first_seen_at: Some(now),
        last_seen_at: Some(now),
    });
    index.add(key, id);
    Merge::Inserted
}

/// Drops records older than the retention window. Returns how many went.
pub fn prune(store: &mut ArchiveStore, now: DateTime<Utc>, retention: TimeDelta) -> usize {
    let cutoff = now
        .checked_sub_signed(retention)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let before = store.len();
    store.retain(|record| reference_time(record, now) >= cutoff);
    before - store.len()
}

fn reference_time(record: &ArchiveRecord, now: DateTime<Utc>) -> DateTime<Utc> {
    record
        .last_seen_at
        .or(record.published_at)
        .or(record.first_seen_at)
        .unwrap_or(now)
}
