//! Feed body → canonical items.
//!
//! Two interchangeable [`FeedParser`] implementations share one contract:
//! [`StructuredParser`] (feed-rs) and [`XmlFallbackParser`], a tolerant
//! quick-xml scan for `item`/`entry` elements. Which one runs is a
//! configuration choice ([`ParserKind`]); [`build_items`] applies the shared
//! item rules to whatever either of them extracted.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Deserialize;
use thiserror::Error;

use crate::feed::types::{FeedSource, RawItem};
use crate::util::{
    first_non_empty, host_of_url, resolve_timestamp, strip_control_chars, RawTimestamp,
};

/// Errors produced while turning a feed body into entries.
#[derive(Debug, Error)]
pub enum ParseError {
    /// feed-rs rejected the document
    #[error("Feed parse error: {0}")]
    Structured(#[from] feed_rs::parser::ParseFeedError),
    /// The document is not well-formed XML
    #[error("XML parse error: {0}")]
    Xml(String),
    /// Well-formed XML without an `rss`, `feed` or `RDF` root
    #[error("Document is not an RSS/Atom feed")]
    NotAFeed,
}

/// One entry as extracted from a feed document, before any validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub published: Option<RawTimestamp>,
}

/// Channel title plus entries in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
}

/// Extracts entries from a raw feed document.
pub trait FeedParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedFeed, ParseError>;
}

/// Selects the [`FeedParser`] implementation at configuration time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ParserKind {
    /// feed-rs
    #[default]
    Structured,
    /// quick-xml element scan
    Xml,
}

impl ParserKind {
    pub fn build(self) -> Arc<dyn FeedParser> {
        match self {
            ParserKind::Structured => Arc::new(StructuredParser),
            ParserKind::Xml => Arc::new(XmlFallbackParser),
        }
    }
}

// ============================================================================
// feed-rs
// ============================================================================

/// RSS 0.9x/1.0/2.0, Atom and JSON Feed via `feed-rs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredParser;

impl FeedParser for StructuredParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
        let feed = feed_rs::parser::parse(bytes)?;

        let entries = feed
            .entries
            .into_iter()
            .map(|entry| FeedEntry {
                title: entry.title.map(|t| t.content).unwrap_or_default(),
                link: preferred_link(&entry.links)
                    .map(|l| l.href.clone())
                    .unwrap_or_default(),
                published: entry
                    .published
                    .or(entry.updated)
                    .map(RawTimestamp::Instant),
            })
            .collect();

        Ok(ParsedFeed {
            title: feed.title.map(|t| t.content),
            entries,
        })
    }
}

/// The `alternate` link, else one without a `rel`, else the first one.
/// Atom entries often list `self`, `edit` or `enclosure` links first.
fn preferred_link(links: &[feed_rs::model::Link]) -> Option<&feed_rs::model::Link> {
    links
        .iter()
        .find(|l| l.rel.as_deref() == Some("alternate"))
        .or_else(|| links.iter().find(|l| l.rel.is_none()))
        .or_else(|| links.first())
}

// ============================================================================
// quick-xml
// ============================================================================

/// Streaming scan for `item` / `entry` elements, matched by local name so
/// that namespaced variants (`rss:item`, `atom:entry`) are found too.
///
/// Entries repeating an earlier `(title, link)` pair are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlFallbackParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    ChannelTitle,
    Title,
    Link,
    PubDate,
    Published,
    Updated,
}

#[derive(Debug, Default)]
struct EntryFields {
    title: String,
    link: String,
    /// First `href` of a link with some other `rel`, used when no
    /// alternate link exists.
    other_link: String,
    pub_date: Option<String>,
    published: Option<String>,
    updated: Option<String>,
}

impl EntryFields {
    fn set(&mut self, field: Field, value: String) {
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::PubDate => self.pub_date.get_or_insert_with(String::new),
            Field::Published => self.published.get_or_insert_with(String::new),
            Field::Updated => self.updated.get_or_insert_with(String::new),
            Field::ChannelTitle => return,
        };
        if slot.is_empty() {
            *slot = value;
        }
    }

    fn set_href(&mut self, href: String, alternate: bool) {
        if alternate {
            self.set(Field::Link, href);
        } else if self.other_link.is_empty() {
            self.other_link = href;
        }
    }

    fn into_entry(self) -> FeedEntry {
        let published = [self.pub_date, self.published, self.updated]
            .into_iter()
            .flatten()
            .map(|s| s.trim().to_string())
            .find(|s| !s.is_empty())
            .map(RawTimestamp::Text);
        let link = match self.link.trim() {
            "" => self.other_link.trim(),
            link => link,
        };
        FeedEntry {
            title: self.title.trim().to_string(),
            link: link.to_string(),
            published,
        }
    }
}

fn is_entry_element(local: &[u8]) -> bool {
    local == b"item" || local == b"entry"
}

fn entry_field(local: &[u8]) -> Option<Field> {
    match local {
        b"title" => Some(Field::Title),
        b"link" => Some(Field::Link),
        b"pubDate" => Some(Field::PubDate),
        b"published" => Some(Field::Published),
        b"updated" => Some(Field::Updated),
        _ => None,
    }
}

/// The `href` of a link element and whether it is the entry's alternate
/// link (`rel="alternate"` or no `rel` at all).
fn href_of(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Option<(String, bool)> {
    let attr = e.try_get_attribute("href").ok().flatten()?;
    let value = attr.decode_and_unescape_value(reader.decoder()).ok()?;
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let alternate = match e.try_get_attribute("rel").ok().flatten() {
        Some(rel) => rel.value.as_ref() == b"alternate",
        None => true,
    };
    Some((value.to_string(), alternate))
}

impl FeedParser for XmlFallbackParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut depth: usize = 0;
        let mut saw_feed_root = false;
        let mut channel_title: Option<String> = None;

        let mut entry: Option<(usize, EntryFields)> = None;
        let mut field: Option<(usize, Field, String)> = None;

        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut entries = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    depth += 1;
                    let local = e.local_name();
                    let local = local.as_ref();

                    if depth == 1 {
                        saw_feed_root = matches!(local, b"rss" | b"feed" | b"RDF");
                    }

                    // Markup nested inside a captured field is only text.
                    if field.is_none() {
                        if let Some((entry_depth, fields)) = &mut entry {
                            if depth == *entry_depth + 1 {
                                if let Some(kind) = entry_field(local) {
                                    if kind == Field::Link {
                                        if let Some((href, alternate)) = href_of(&e, &reader) {
                                            fields.set_href(href, alternate);
                                        }
                                    }
                                    field = Some((depth, kind, String::new()));
                                }
                            }
                        } else if is_entry_element(local) {
                            entry = Some((depth, EntryFields::default()));
                        } else if local == b"title" && channel_title.is_none() {
                            field = Some((depth, Field::ChannelTitle, String::new()));
                        }
                    }
                }
                Ok(Event::Empty(e)) => {
                    if let Some((entry_depth, fields)) = &mut entry {
                        if depth == *entry_depth && e.local_name().as_ref() == b"link" {
                            if let Some((href, alternate)) = href_of(&e, &reader) {
                                fields.set_href(href, alternate);
                            }
                        }
                    }
                }
                Ok(Event::Text(t)) => {
                    if let Some((_, _, text)) = &mut field {
                        let chunk = t
                            .unescape()
                            .map_err(|err| ParseError::Xml(err.to_string()))?;
                        text.push_str(&chunk);
                    }
                }
                Ok(Event::CData(c)) => {
                    if let Some((_, _, text)) = &mut field {
                        text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                    }
                }
                Ok(Event::End(_)) => {
                    if field.as_ref().is_some_and(|(d, _, _)| *d == depth) {
                        if let Some((_, kind, text)) = field.take() {
                            match (kind, &mut entry) {
                                (Field::ChannelTitle, _) => {
                                    channel_title = Some(text.trim().to_string());
                                }
                                (_, Some((_, fields))) => fields.set(kind, text),
                                (_, None) => {}
                            }
                        }
                    }

                    if entry.as_ref().is_some_and(|(d, _)| *d == depth) {
                        if let Some((_, fields)) = entry.take() {
                            let candidate = fields.into_entry();
                            if !candidate.title.is_empty()
                                && !candidate.link.is_empty()
                                && seen.insert((candidate.title.clone(), candidate.link.clone()))
                            {
                                entries.push(candidate);
                            }
                        }
                    }

                    depth = depth.saturating_sub(1);
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(ParseError::Xml(e.to_string())),
                _ => {}
            }
            buf.clear();
        }

        if !saw_feed_root {
            return Err(ParseError::NotAFeed);
        }

        Ok(ParsedFeed {
            title: channel_title.filter(|t| !t.is_empty()),
            entries,
        })
    }
}

// ============================================================================
// Shared item rules
// ============================================================================

/// Applies the item contract to parsed entries.
///
/// Entries with an empty title or link are dropped. The publish time is
/// resolved from whatever shape the parser found; entries without one are
/// stamped with `now` when the source allows it and dropped otherwise. The
/// source label is the first non-empty of the configured title, the channel
/// title and the feed host.
pub fn build_items(parsed: ParsedFeed, source: &FeedSource, now: DateTime<Utc>) -> Vec<RawItem> {
    let host = host_of_url(&source.feed_url);
    let label = first_non_empty([
        Some(source.title_fallback.as_str()),
        parsed.title.as_deref(),
        Some(host.as_str()),
    ]);

    parsed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let title = strip_control_chars(entry.title.trim()).into_owned();
            let url = entry.link.trim().to_string();
            if title.is_empty() || url.is_empty() {
                return None;
            }

            let published = match resolve_timestamp(entry.published.as_ref()) {
                Some(ts) => ts,
                None if source.allow_missing_published => now,
                None => return None,
            };

            Some(RawItem {
                site_id: source.site_id.clone(),
                site_name: source.site_name.clone(),
                source: label.clone(),
                title,
                url,
                published_at: Some(published),
            })
        })
        .collect()
}
