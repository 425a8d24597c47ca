use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One archived item, keyed by its content address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub site_id: String,
    #[serde(default)]
    pub site_name: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub title: String,
    /// Normalized link.
    #[serde(default)]
    pub url: String,
    #[serde(default, with = "lenient_time")]
    pub published_at: Option<DateTime<Utc>>,
    /// Set when the item is first archived and never changed afterwards.
    #[serde(default, with = "lenient_time")]
    pub first_seen_at: Option<DateTime<Utc>>,
    /// Latest sighting; never moves backwards.
    #[serde(default, with = "lenient_time")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Stored timestamps are written as RFC 3339 UTC and read back through the
/// permissive resolver, so hand-edited or legacy files still load.
mod lenient_time {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    use crate::util::{resolve_str, resolve_timestamp, to_iso, RawTimestamp};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => serializer.serialize_str(&to_iso(dt)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Ok(match Option::<Value>::deserialize(deserializer)? {
            Some(Value::String(s)) => resolve_str(&s),
            Some(Value::Number(n)) => n
                .as_f64()
                .and_then(|n| resolve_timestamp(Some(&RawTimestamp::Number(n)))),
            _ => None,
        })
    }
}

/// The durable record store: every surviving [`ArchiveRecord`] by id.
///
/// Owned by the reconciler for the duration of a run and passed by value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveStore {
    records: BTreeMap<String, ArchiveRecord>,
}

impl ArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the previous `archive.json`.
    ///
    /// A missing, unreadable or malformed file yields an empty store; a
    /// broken archive is never fatal.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No archive found, starting empty");
                return Self::default();
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read archive, starting empty");
                return Self::default();
            }
        };

        match Self::from_json(&content) {
            Ok(store) => {
                tracing::info!(path = %path.display(), records = store.len(), "Loaded archive");
                store
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Malformed archive, starting empty");
                Self::default()
            }
        }
    }

    /// Parses an archive document.
    ///
    /// `items` may be a list of records carrying their own `id`, or an object
    /// keyed by id. Records that do not deserialize, or have no id, are
    /// skipped. Only invalid JSON is an error.
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        let payload: Value = serde_json::from_str(content)?;
        let mut store = Self::default();
        let mut skipped = 0usize;

        match payload.get("items") {
            Some(Value::Array(items)) => {
                for item in items {
                    match serde_json::from_value::<ArchiveRecord>(item.clone()) {
                        Ok(record) if !record.id.is_empty() => store.insert(record),
                        _ => skipped += 1,
                    }
                }
            }
            Some(Value::Object(items)) => {
                for (id, item) in items {
                    let Value::Object(fields) = item else {
                        skipped += 1;
                        continue;
                    };
                    let mut fields = fields.clone();
                    fields.insert("id".to_string(), Value::String(id.clone()));
                    match serde_json::from_value::<ArchiveRecord>(Value::Object(fields)) {
                        Ok(record) if !record.id.is_empty() => store.insert(record),
                        _ => skipped += 1,
                    }
                }
            }
            _ => {}
        }

        if skipped > 0 {
            tracing::warn!(skipped = skipped, "Skipped malformed archive records");
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ArchiveRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ArchiveRecord> {
        self.records.get_mut(id)
    }

    /// Inserts or replaces the record under its own id.
    pub fn insert(&mut self, record: ArchiveRecord) {
        self.records.insert(record.id.clone(), record);
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&ArchiveRecord) -> bool) {
        self.records.retain(|_, record| keep(record));
    }

    /// Records in id order.
    pub fn records(&self) -> impl Iterator<Item = &ArchiveRecord> {
        self.records.values()
    }

    /// Records ordered by `last_seen_at`, newest first; records without one last.
    pub fn sorted_by_last_seen(&self) -> Vec<&ArchiveRecord> {
        let mut records: Vec<&ArchiveRecord> = self.records.values().collect();
        records.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str, last_seen: Option<DateTime<Utc>>) -> ArchiveRecord {
        ArchiveRecord {
            id: id.to_string(),
            site_id: "opmlrss".into(),
            site_name: "OPML RSS".into(),
            source: "Blog".into(),
            title: format!("Title {}", id),
            url: format!("https://example.com/{}", id),
            published_at: None,
            first_seen_at: last_seen,
            last_seen_at: last_seen,
        }
    }

    #[test]
    fn test_load_list_form() {
        let json = r#"{"generated_at":"x","total_items":2,"items":[
            {"id":"a","site_id":"opmlrss","site_name":"OPML RSS","source":"Blog","title":"A","url":"https://e.com/a",
             "published_at":"2024-01-02T03:04:05Z","first_seen_at":"2024-01-02T03:04:05.000000Z","last_seen_at":"2024-01-03T00:00:00+00:00"},
            {"id":"","title":"no id"},
            {"id":"b","title":"B","published_at":null}
        ]}"#;

        let store = ArchiveStore::from_json(json).unwrap();
        assert_eq!(store.len(), 2);
        let a = store.get("a").unwrap();
        assert_eq!(
            a.published_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
        );
        assert_eq!(
            a.last_seen_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap())
        );
        assert_eq!(store.get("b").unwrap().published_at, None);
    }

    #[test]
    fn test_load_map_form_takes_id_from_key() {
        let json = r#"{"items":{
            "k1":{"title":"One","last_seen_at":"Tue, 02 Jan 2024 03:04:05 GMT"},
            "k2":"not an object",
            "k3":{"title":42}
        }}"#;

        let store = ArchiveStore::from_json(json).unwrap();
        assert_eq!(store.len(), 1);
        let one = store.get("k1").unwrap();
        assert_eq!(one.id, "k1");
        assert_eq!(
            one.last_seen_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
        );
    }

    #[test]
    fn test_garbage_timestamps_become_none() {
        let json = r#"{"items":[{"id":"a","published_at":"not a date","first_seen_at":true,"last_seen_at":1704164645}]}"#;
        let store = ArchiveStore::from_json(json).unwrap();
        let a = store.get("a").unwrap();
        assert_eq!(a.published_at, None);
        assert_eq!(a.first_seen_at, None);
        assert_eq!(
            a.last_seen_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
        );
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(ArchiveStore::from_json("{not json").is_err());
        assert!(ArchiveStore::from_json(r#"{"items": 3}"#).unwrap().is_empty());
    }

    #[test]
    fn test_load_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ArchiveStore::load(&dir.path().join("missing.json")).is_empty());

        let path = dir.path().join("archive.json");
        std::fs::write(&path, "]]]").unwrap();
        assert!(ArchiveStore::load(&path).is_empty());
    }

    #[test]
    fn test_serialized_timestamps_are_utc_micros() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let json = serde_json::to_value(record("a", Some(ts))).unwrap();
        assert_eq!(json["last_seen_at"], "2024-01-02T03:04:05.000000Z");
        assert!(json["published_at"].is_null());

        let back: ArchiveRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record("a", Some(ts)));
    }

    #[test]
    fn test_sorted_by_last_seen() {
        let t = |d| Some(Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap());
        let mut store = ArchiveStore::new();
        store.insert(record("old", t(1)));
        store.insert(record("none", None));
        store.insert(record("new", t(3)));

        let ids: Vec<&str> = store
            .sorted_by_last_seen()
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(ids, vec!["new", "old", "none"]);
    }
}
