//! Directory to local account reconciliation
//!
//! The reconciler only sees the outside world through the [`Directory`],
//! [`BlobStore`] and [`AccountSystem`](crate::system::AccountSystem) traits.

mod reconcile;
mod report;

pub use reconcile::Reconciler;
pub use report::SyncReport;

use crate::error::SyncResult;
use crate::users::{DirectoryUser, KeyBlob};

pub trait Directory {
    /// Enabled user members of a group, with `extra_fields` requested on top
    /// of the standard ones. An empty result is a `NotFound` error.
    fn group_members(
        &self,
        group_id: &str,
        extra_fields: &[String],
    ) -> SyncResult<Vec<DirectoryUser>>;
}

pub trait BlobStore {
    /// Blobs whose names start with `prefix` and end with `suffix`.
    /// Nothing matching is a `NotFound` error.
    fn list_blobs(&self, prefix: Option<&str>, suffix: &str) -> SyncResult<Vec<KeyBlob>>;

    /// Blob content with surrounding whitespace trimmed.
    fn download_blob(&self, name: &str) -> SyncResult<String>;
}
