//! Reading and writing the per-region JSON documents.
//!
//! Documents are the only durable state: every run overwrites them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::models::OutputDocument;

/// `<dir>/<slug>.json`
pub fn document_path(dir: &Path, slug: &str) -> PathBuf {
    dir.join(format!("{slug}.json"))
}

/// Validate and write `doc` as pretty JSON, creating `dir` if needed.
pub async fn write_document(dir: &Path, slug: &str, doc: &OutputDocument) -> Result<PathBuf> {
    // ---
    doc.validate()
        .with_context(|| format!("Refusing to write invalid {slug} document"))?;

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let path = document_path(dir, slug);
    let json = serde_json::to_string_pretty(doc).context("Failed to serialize document")?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!("Wrote {} ({} dates)", path.display(), doc.timeseries_dates.len());
    Ok(path)
}

/// Read a document back; `None` when it was never written.
pub async fn read_document(dir: &Path, slug: &str) -> Result<Option<OutputDocument>> {
    // ---
    let path = document_path(dir, slug);
    let text = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!("No document at {}", path.display());
            return Ok(None);
        }
        Err(err) => return Err(err).with_context(|| format!("Failed to read {}", path.display())),
    };

    let doc = serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(doc))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::Metric;
    use chrono::NaiveDate;

    fn doc() -> OutputDocument {
        let mut doc = OutputDocument {
            timeseries_dates: vec![
                NaiveDate::from_ymd_opt(2020, 4, 1).unwrap(),
                NaiveDate::from_ymd_opt(2020, 4, 2).unwrap(),
            ],
            ..Default::default()
        };
        doc.total.insert(Metric::Confirmed, vec![Some(1), None]);
        doc
    }

    #[test]
    fn test_write_then_read() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("by_state_partial");

        let path = tokio_test::block_on(write_document(&out, "nsw", &doc())).unwrap();
        assert_eq!(path, out.join("nsw.json"));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"timeseries_dates\""));
        assert!(text.contains("\"2020-04-01\""));
        assert!(text.contains("null"));

        let back = tokio_test::block_on(read_document(&out, "nsw")).unwrap();
        assert_eq!(back, Some(doc()));
    }

    #[test]
    fn test_missing_document_is_none() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(tokio_test::block_on(read_document(dir.path(), "tas")).unwrap(), None);
    }

    #[test]
    fn test_invalid_document_is_not_written() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let mut bad = doc();
        bad.total.insert(Metric::Deaths, vec![Some(0)]);

        assert!(tokio_test::block_on(write_document(dir.path(), "vic", &bad)).is_err());
        assert!(!dir.path().join("vic.json").exists());
    }
}
