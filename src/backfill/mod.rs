//! Merging late-arriving upserts into archive batches.
//!
//! Upsert batches are split into per-bucket patches ([`patch`]). Each patch is
//! merged against the bucket's current batch by a [`BackfillContext`]: values
//! of unsorted columns are patched in place on forked columns, everything else
//! is staged in a [`BackfillStore`] and sorted into the final batch by
//! [`archiving::merge`].

pub mod archiving;
pub mod context;
pub mod patch;
pub mod row;
pub mod store;

pub use archiving::ArchivingPatch;
pub use context::{BackfillContext, ContextState};
pub use patch::{create_backfill_patches, BackfillPatch};
pub use row::{Row, RowResolver};
pub use store::{BackfillStore, BackfillStoreSnapshot};
