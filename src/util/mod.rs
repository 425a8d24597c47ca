//! Normalization helpers shared by the fetch, archive and report stages.
//!
//! - **URLs**: canonical form for identity and display, host extraction
//! - **Timestamps**: heterogeneous feed dates folded into UTC instants
//! - **Text**: mojibake repair and small string helpers
//!
//! # Examples
//!
//! ```
//! use feedroll::util::{host_of_url, normalize_url, repair_mojibake};
//!
//! assert_eq!(normalize_url("https://EX.com/a/?utm_source=x&id=1"), "https://ex.com/a?id=1");
//! assert_eq!(host_of_url("https://news.example.com/item?id=1"), "news.example.com");
//! assert_eq!(repair_mojibake("cafÃ©"), "café");
//! ```

mod text;
mod time;
mod url_normalizer;

pub use text::{first_non_empty, repair_mojibake, strip_control_chars, UNSORTED_SOURCE};
pub use time::{resolve_str, resolve_timestamp, to_iso, RawTimestamp};
pub use url_normalizer::{host_of_url, normalize_url};
pub(crate) use url_normalizer::identity_url;
