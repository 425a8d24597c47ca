//! Feed retrieval: subscription list, fetching and parsing.
//!
//! - [`opml`] - subscription list → [`OpmlFeed`]s
//! - [`fetcher`] - concurrent HTTP retrieval with bounded retries and
//!   per-source status records
//! - [`parser`] - feed body → canonical [`RawItem`]s, with two
//!   interchangeable implementations
//! - [`sections`] - digest sections of the fixed aggregator feed
//!
//! # Example
//!
//! ```ignore
//! let client = FeedClient::new(&config)?;
//! let outcome = client.fetch_all(sources, 0, Utc::now()).await;
//! let summary = summarize("opmlrss", "OPML RSS", &outcome);
//! ```

pub mod fetcher;
pub mod opml;
pub mod parser;
pub mod sections;
mod types;

pub use fetcher::{pool_size, summarize, FeedClient, FetchError, FetchOutcome, RetryPolicy, SourceFetch};
pub use opml::{OpmlError, OpmlFeed};
pub use parser::{build_items, FeedParser, ParseError, ParsedFeed, ParserKind};
pub use sections::{DigestScraper, ParsedSections, SectionScraper};
pub use types::{FeedBreakdown, FeedSource, FeedStatus, RawItem};
