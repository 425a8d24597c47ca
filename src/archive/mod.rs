//! The durable, deduplicated item archive.
//!
//! Items are keyed by a content address ([`item_id`]), merged into an
//! [`ArchiveStore`] by [`reconcile`] and pruned by age. The store is a flat
//! JSON document rewritten on every run.

mod identity;
mod reconcile;
mod store;

pub use identity::item_id;
pub use reconcile::{prune, reconcile, ReconcileStats};
pub use store::{ArchiveRecord, ArchiveStore};
