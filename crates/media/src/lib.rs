//! Media pipeline: map an attachment reference to a locally stored file.

pub mod error;
pub mod local;

use std::path::PathBuf;

use async_trait::async_trait;

pub use {
    error::{Error, Result},
    local::LocalMediaStore,
};

/// Resolves opaque attachment references to local file paths.
///
/// Implementations may wait for a download in progress; callers bound the
/// wait with their own timeout.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(&self, reference: &str) -> Result<PathBuf>;
}
