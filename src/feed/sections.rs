//! Digest sections of the fixed aggregator feed.
//!
//! The aggregator publishes a single RSS item whose description is an HTML
//! digest: an `<h2>` per board followed by `<p>` lines of the form
//! `<p>1. <a href="...">Title</a></p>`. The scrape is best-effort and only
//! ever surfaces as an opaque [`ParsedSections`] value copied into the
//! latest-window payload.

use quick_xml::events::Event;
use quick_xml::Reader;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use serde_json::{json, Value};

/// Opaque parsed-sections payload. Never inspected by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ParsedSections(Value);

impl Default for ParsedSections {
    fn default() -> Self {
        ParsedSections(json!({
            "item_title": null,
            "pubDate": null,
            "section_count": 0,
            "sections": [],
        }))
    }
}

impl ParsedSections {
    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// Turns the aggregator's raw feed body into [`ParsedSections`].
pub trait SectionScraper: Send + Sync {
    fn scrape(&self, feed_body: &[u8]) -> ParsedSections;
}

/// Reads the first channel item and splits its HTML description into ranked
/// sections. Any failure yields [`ParsedSections::default`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestScraper;

#[derive(Debug, Serialize)]
struct Section {
    section: String,
    count: usize,
    entries: Vec<SectionEntry>,
}

#[derive(Debug, Serialize)]
struct SectionEntry {
    rank: Option<u32>,
    title: String,
    url: String,
}

impl SectionScraper for DigestScraper {
    fn scrape(&self, feed_body: &[u8]) -> ParsedSections {
        let Some(item) = first_item(feed_body) else {
            return ParsedSections::default();
        };
        let sections = parse_digest(&item.description);
        ParsedSections(json!({
            "item_title": item.title,
            "pubDate": item.pub_date,
            "section_count": sections.len(),
            "sections": sections,
        }))
    }
}

#[derive(Debug, Default)]
struct FirstItem {
    title: String,
    pub_date: String,
    description: String,
}

/// Title, pubDate and description of `rss/channel/item[1]`.
fn first_item(body: &[u8]) -> Option<FirstItem> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut item: Option<FirstItem> = None;

    loop {
        match reader.read_event_into(&mut buf).ok()? {
            Event::Start(e) => path.push(e.local_name().as_ref().to_vec()),
            Event::End(_) => {
                let closed = path.pop();
                if item.is_some() && path.len() == 2 && closed.as_deref() == Some(b"item") {
                    return item;
                }
            }
            Event::Text(t) => {
                let text = t.unescape().ok()?;
                append_item_field(&path, &mut item, &text);
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                append_item_field(&path, &mut item, &text);
            }
            Event::Eof => return item,
            _ => {}
        }
        buf.clear();
    }
}

fn append_item_field(path: &[Vec<u8>], item: &mut Option<FirstItem>, text: &str) {
    let [_, channel, entry, field] = path else {
        return;
    };
    if channel.as_slice() != b"channel" || entry.as_slice() != b"item" {
        return;
    }
    let item = item.get_or_insert_with(FirstItem::default);
    let target = match field.as_slice() {
        b"title" => &mut item.title,
        b"pubDate" => &mut item.pub_date,
        b"description" => &mut item.description,
        _ => return,
    };
    target.push_str(text.trim());
}

/// Splits the digest HTML on `<h2>` headings; every `<p>` until the next
/// heading becomes an entry. Paragraphs before the first heading are ignored.
fn parse_digest(html: &str) -> Vec<Section> {
    let (Ok(blocks), Ok(links)) = (Selector::parse("h2, p"), Selector::parse("a[href]")) else {
        return Vec::new();
    };
    let fragment = Html::parse_fragment(html);

    let mut sections: Vec<Section> = Vec::new();
    for element in fragment.select(&blocks) {
        let text = element_text(element);
        if element.value().name() == "h2" {
            sections.push(Section {
                section: text,
                count: 0,
                entries: Vec::new(),
            });
            continue;
        }
        let Some(current) = sections.last_mut() else {
            continue;
        };
        let url = element
            .select(&links)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(|href| href.trim().to_string())
            .unwrap_or_default();
        let (rank, title) = split_rank(&text);
        current.entries.push(SectionEntry { rank, title, url });
        current.count = current.entries.len();
    }
    sections
}

/// Text content with whitespace collapsed.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// `"3. Some title"` → `(Some(3), "Some title")`.
fn split_rank(text: &str) -> (Option<u32>, String) {
    let digits_end = text
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    if digits_end > 0 {
        if let Some(rest) = text[digits_end..].strip_prefix('.') {
            if let Ok(rank) = text[..digits_end].parse() {
                return (Some(rank), rest.trim().to_string());
            }
        }
    }
    (None, text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST_FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>digest</title>
    <item>
        <title>Today's hot list</title>
        <pubDate>Tue, 02 Jan 2024 03:04:05 GMT</pubDate>
        <description><![CDATA[<h2>Board A</h2><p>1. <a href="https://a.example/1">Alpha &amp; co</a></p><p>2. <a href='https://a.example/2'>Beta</a></p><h2>Board B</h2><p>Unranked <b>line</b></p>]]></description>
    </item>
</channel></rss>"#;

    #[test]
    fn test_default_shape() {
        let value = ParsedSections::default();
        assert_eq!(value.as_value()["section_count"], 0);
        assert!(value.as_value()["item_title"].is_null());
        assert_eq!(value.as_value()["sections"], json!([]));
    }

    #[test]
    fn test_scrape_digest() {
        let parsed = DigestScraper.scrape(DIGEST_FEED.as_bytes());
        let v = parsed.as_value();
        assert_eq!(v["item_title"], "Today's hot list");
        assert_eq!(v["pubDate"], "Tue, 02 Jan 2024 03:04:05 GMT");
        assert_eq!(v["section_count"], 2);

        let a = &v["sections"][0];
        assert_eq!(a["section"], "Board A");
        assert_eq!(a["count"], 2);
        assert_eq!(a["entries"][0]["rank"], 1);
        assert_eq!(a["entries"][0]["title"], "Alpha & co");
        assert_eq!(a["entries"][0]["url"], "https://a.example/1");
        assert_eq!(a["entries"][1]["url"], "https://a.example/2");

        let b = &v["sections"][1];
        assert!(b["entries"][0]["rank"].is_null());
        assert_eq!(b["entries"][0]["title"], "Unranked line");
        assert_eq!(b["entries"][0]["url"], "");
    }

    #[test]
    fn test_scrape_garbage_is_default() {
        assert_eq!(DigestScraper.scrape(b"<<<"), ParsedSections::default());
        assert_eq!(
            DigestScraper.scrape(b"<rss><channel></channel></rss>"),
            ParsedSections::default()
        );
    }

    #[test]
    fn test_split_rank() {
        assert_eq!(split_rank("12. Twelve"), (Some(12), "Twelve".to_string()));
        assert_eq!(split_rank("2024 news"), (None, "2024 news".to_string()));
        assert_eq!(split_rank("plain"), (None, "plain".to_string()));
    }
}
