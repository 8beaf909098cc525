//! On-disk page cache: `<root>/<region>/<name>`.
//!
//! Releases never change once published, so a cached page is never fetched
//! again. The exception is a page containing a reject marker (a "pretend
//! 404" page served with a 200 status), which is always re-fetched.

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use crate::error::FetchError;
use crate::models::Region;

#[derive(Debug, Clone)]
pub struct PageCache {
    root: PathBuf,
}

impl PageCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        PageCache { root: root.into() }
    }

    pub fn region_dir(&self, region: Region) -> PathBuf {
        self.root.join(region.slug())
    }

    /// Cache path of document `name` for `region`.
    pub fn path(&self, region: Region, name: &str) -> PathBuf {
        self.region_dir(region).join(name)
    }

    /// Cached bytes at `path`, or `None` when nothing was stored yet.
    pub async fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        // ---
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        // ---
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Return the cached copy of `path`, fetching and storing it first when
    /// it is missing or contains `reject_marker`.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        path: &Path,
        reject_marker: Option<&str>,
        fetch: F,
    ) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Vec<u8>, FetchError>>,
    {
        // ---
        if let Some(cached) = self.read(path).await? {
            let rejected = reject_marker
                .is_some_and(|marker| String::from_utf8_lossy(&cached).contains(marker));
            if !rejected {
                tracing::trace!("Cache hit: {}", path.display());
                return Ok(cached);
            }
            tracing::debug!("Ignoring rejected cache entry {}", path.display());
        }

        let fetched = fetch().await?;
        self.write(path, &fetched).await?;
        Ok(fetched)
    }

    /// Regular files directly inside `dir`, sorted by name. A missing
    /// directory is empty.
    pub async fn list(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        // ---
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to list {}", dir.display()))
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Cache file name for a site-relative URI: slashes become underscores.
pub fn cache_name(uri: &str, extension: &str) -> String {
    format!("{}{}", uri.replace('/', "_"), extension)
}

/// Whether `err` is a 404 from the HTTP layer.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<FetchError>()
        .is_some_and(FetchError::is_not_found)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_cached_page_is_not_refetched() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let cache = PageCache::new(dir.path());
        let path = cache.path(Region::Nsw, "release.html");
        let calls = Cell::new(0);

        let fetch = || {
            calls.set(calls.get() + 1);
            async { Ok(b"<html>first</html>".to_vec()) }
        };
        let first = tokio_test::block_on(cache.get_or_fetch(&path, None, fetch)).unwrap();

        let fetch_again = || {
            calls.set(calls.get() + 1);
            async { Ok(b"<html>second</html>".to_vec()) }
        };
        let second = tokio_test::block_on(cache.get_or_fetch(&path, None, fetch_again)).unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_rejected_page_is_refetched() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let cache = PageCache::new(dir.path());
        let path = cache.path(Region::National, "pointer.html");
        tokio_test::block_on(cache.write(&path, b"sorry, PRETEND 404")).unwrap();

        let bytes = tokio_test::block_on(cache.get_or_fetch(&path, Some("PRETEND 404"), || async {
            Ok(b"real page".to_vec())
        }))
        .unwrap();

        assert_eq!(bytes, b"real page");
        let stored = tokio_test::block_on(cache.read(&path)).unwrap();
        assert_eq!(stored.as_deref(), Some(&b"real page"[..]));
    }

    #[test]
    fn test_not_found_is_propagated_and_nothing_stored() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let cache = PageCache::new(dir.path());
        let path = cache.path(Region::National, "missing.pdf");

        let err = tokio_test::block_on(cache.get_or_fetch(&path, None, || async {
            Err(FetchError::NotFound("https://example.org/missing.pdf".to_string()))
        }))
        .unwrap_err();

        assert!(is_not_found(&err));
        assert_eq!(tokio_test::block_on(cache.read(&path)).unwrap(), None);
    }

    #[test]
    fn test_list_sorts_and_tolerates_missing_dir() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let cache = PageCache::new(dir.path());
        let region_dir = cache.region_dir(Region::Wa);
        assert!(tokio_test::block_on(cache.list(&region_dir)).unwrap().is_empty());

        tokio_test::block_on(cache.write(&region_dir.join("b.html"), b"b")).unwrap();
        tokio_test::block_on(cache.write(&region_dir.join("a.html"), b"a")).unwrap();

        let files = tokio_test::block_on(cache.list(&region_dir)).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.html", "b.html"]);
    }

    #[test]
    fn test_cache_name_flattens_uri() {
        // ---
        assert_eq!(
            cache_name("news/Pages/20200401_00.aspx", ".html"),
            "news_Pages_20200401_00.aspx.html"
        );
    }
}
