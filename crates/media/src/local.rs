//! Attachments downloaded by the transport into a local directory.
//!
//! The transport saves each attachment as `<reference>` or
//! `<reference>.<ext>` under the media directory. Resolution polls until
//! the file shows up.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use {async_trait::async_trait, tracing::debug};

use crate::{Error, MediaResolver, Result};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct LocalMediaStore {
    dir: PathBuf,
    poll_interval: Duration,
    wait: bool,
}

impl LocalMediaStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait: true,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Fail immediately with [`Error::NotFound`] instead of polling.
    pub fn without_wait(mut self) -> Self {
        self.wait = false;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the media directory if needed.
    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::external(format!("create {}", self.dir.display()), e))
    }

    async fn find(&self, reference: &str) -> Result<Option<PathBuf>> {
        let exact = self.dir.join(reference);
        if tokio::fs::metadata(&exact).await.is_ok_and(|m| m.is_file()) {
            return Ok(Some(exact));
        }

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::external("read media dir", e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::external("read media dir", e))?
        {
            let path = entry.path();
            if path.file_stem().is_some_and(|stem| stem == reference)
                && tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file())
            {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

/// References become file names, so anything that could escape the media
/// directory is rejected.
fn validate_reference(reference: &str) -> Result<()> {
    let bad = reference.is_empty()
        || reference == "."
        || reference == ".."
        || reference.contains(['/', '\\', '\0']);
    if bad {
        return Err(Error::invalid_input(format!(
            "invalid media reference: {reference:?}"
        )));
    }
    Ok(())
}

#[async_trait]
impl MediaResolver for LocalMediaStore {
    async fn resolve(&self, reference: &str) -> Result<PathBuf> {
        validate_reference(reference)?;
        loop {
            if let Some(path) = self.find(reference).await? {
                let path = tokio::fs::canonicalize(&path)
                    .await
                    .map_err(|e| Error::external("canonicalize media path", e))?;
                debug!(reference, path = %path.display(), "media resolved");
                return Ok(path);
            }
            if !self.wait {
                return Err(Error::not_found(reference));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_exact_and_extension_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc"), b"x").unwrap();
        std::fs::write(dir.path().join("def.jpg"), b"y").unwrap();
        let store = LocalMediaStore::new(dir.path()).without_wait();

        let abc = store.resolve("abc").await.unwrap();
        assert!(abc.is_absolute());
        assert_eq!(abc.file_name().unwrap(), "abc");

        let def = store.resolve("def").await.unwrap();
        assert_eq!(def.file_name().unwrap(), "def.jpg");
    }

    #[tokio::test]
    async fn missing_without_wait_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalMediaStore::new(dir.path()).without_wait();
        assert!(matches!(
            store.resolve("nope").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn directory_with_matching_stem_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("voice.parts")).unwrap();
        let store = LocalMediaStore::new(dir.path()).without_wait();
        assert!(matches!(
            store.resolve("voice").await,
            Err(Error::NotFound { .. })
        ));

        std::fs::write(dir.path().join("voice.ogg"), b"audio").unwrap();
        let path = store.resolve("voice").await.unwrap();
        assert_eq!(path.file_name().unwrap(), "voice.ogg");
    }

    #[tokio::test]
    async fn rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalMediaStore::new(dir.path()).without_wait();
        for reference in ["", "..", "../etc/passwd", "a/b", "a\\b"] {
            assert!(matches!(
                store.resolve(reference).await,
                Err(Error::InvalidInput { .. })
            ));
        }
    }

    #[tokio::test]
    async fn waits_for_late_download() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalMediaStore::new(dir.path()).with_poll_interval(Duration::from_millis(10));
        let target = dir.path().join("late.ogg");

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tokio::fs::write(target, b"audio").await.unwrap();
        });

        let path = tokio::time::timeout(Duration::from_secs(5), store.resolve("late"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "late.ogg");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn ensure_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalMediaStore::new(dir.path().join("a/b"));
        store.ensure_dir().await.unwrap();
        assert!(store.dir().is_dir());
    }
}
