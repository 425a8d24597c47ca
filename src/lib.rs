//! Batch RSS/Atom aggregator.
//!
//! Each run fetches an OPML subscription list plus one fixed aggregator feed,
//! merges the items into a deduplicated JSON archive with time-based
//! retention, and writes a rolling snapshot and a per-source health report.

pub mod archive;
pub mod config;
pub mod feed;
pub mod output;
pub mod pipeline;
pub mod report;
pub mod util;
