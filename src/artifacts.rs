//! JSON artifact bundle writer (`spec.md` §6.3), grounded in the original
//! pipeline's per-document `json_outputs/<id>/<timestamp>/` layout plus a
//! `latest/` copy and a top-level `index.json` manifest.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub document_id: String,
    pub timestamp: String,
    pub letter_id: Option<i64>,
}

/// The last-known summary for one document: `index.json` is a map keyed by
/// `document_id` rather than an array, so a reader can look up a document's
/// status without opening its per-version folder (`spec.md` §6.3).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexEntry {
    pub latest_timestamp: String,
    pub version_count: usize,
    pub status: String,
    pub confidence: f64,
}

pub struct OutputStore {
    base_dir: PathBuf,
    max_versions_per_document: usize,
    retention_days: i64,
    auto_cleanup_enabled: bool,
}

impl OutputStore {
    pub fn new(
        base_dir: impl Into<PathBuf>,
        max_versions_per_document: usize,
        retention_days: i64,
        auto_cleanup_enabled: bool,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_versions_per_document,
            retention_days,
            auto_cleanup_enabled,
        }
    }

    /// Writes one version of the bundle for `document_id`: a timestamped
    /// directory with the four artifact files, a refreshed `latest/` copy,
    /// and an updated top-level `index.json`. Runs cleanup afterward when
    /// enabled.
    #[allow(clippy::too_many_arguments)]
    pub async fn write_bundle(
        &self,
        document_id: &str,
        letter_id: Option<i64>,
        status: &str,
        confidence: f64,
        grok_metadata: &Value,
        validation_result: &Value,
        processing_result: &Value,
        pipeline_summary: &Value,
        now: DateTime<Utc>,
    ) -> std::io::Result<PathBuf> {
        let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
        let doc_dir = self.base_dir.join(document_id);
        let version_dir = doc_dir.join(&timestamp);
        tokio::fs::create_dir_all(&version_dir).await?;

        let metadata =
            BundleMetadata { document_id: document_id.to_string(), timestamp: timestamp.clone(), letter_id };

        self.write_json(&version_dir.join("metadata.json"), &metadata).await?;
        self.write_json(&version_dir.join("grok_metadata.json"), grok_metadata).await?;
        self.write_json(&version_dir.join("validation_result.json"), validation_result).await?;
        self.write_json(&version_dir.join("processing_result.json"), processing_result).await?;
        self.write_json(&version_dir.join("pipeline_summary.json"), pipeline_summary).await?;

        self.refresh_latest(&doc_dir, &version_dir).await?;
        self.update_index(document_id, &timestamp, status, confidence).await?;

        if self.auto_cleanup_enabled {
            self.prune_versions(&doc_dir, now).await?;
        }

        Ok(version_dir)
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> std::io::Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(path, bytes).await
    }

    /// `latest/` holds a plain copy rather than a symlink, so consumers on
    /// platforms without symlink permissions can still read it.
    async fn refresh_latest(&self, doc_dir: &Path, version_dir: &Path) -> std::io::Result<()> {
        let latest_dir = doc_dir.join("latest");
        if latest_dir.exists() {
            tokio::fs::remove_dir_all(&latest_dir).await?;
        }
        tokio::fs::create_dir_all(&latest_dir).await?;

        let mut entries = tokio::fs::read_dir(version_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                let dest = latest_dir.join(entry.file_name());
                tokio::fs::copy(entry.path(), dest).await?;
            }
        }
        Ok(())
    }

    async fn update_index(
        &self,
        document_id: &str,
        timestamp: &str,
        status: &str,
        confidence: f64,
    ) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let index_path = self.base_dir.join("index.json");

        let mut index: HashMap<String, IndexEntry> = match tokio::fs::read(&index_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => HashMap::new(),
        };

        let doc_dir = self.base_dir.join(document_id);
        let version_count = count_version_dirs(&doc_dir).await.unwrap_or(0);

        index.insert(
            document_id.to_string(),
            IndexEntry {
                latest_timestamp: timestamp.to_string(),
                version_count,
                status: status.to_string(),
                confidence,
            },
        );

        let bytes = serde_json::to_vec_pretty(&index)?;
        tokio::fs::write(index_path, bytes).await
    }

    /// Keeps at most `max_versions_per_document` timestamped directories and
    /// drops anything older than `retention_days`, whichever prunes more
    /// aggressively. `latest/` is never pruned.
    async fn prune_versions(&self, doc_dir: &Path, now: DateTime<Utc>) -> std::io::Result<()> {
        let mut versions = Vec::new();
        let mut entries = tokio::fs::read_dir(doc_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == "latest" {
                continue;
            }
            if let Ok(ts) = DateTime::parse_from_str(&format!("{name} +0000"), "%Y%m%dT%H%M%SZ %z")
            {
                versions.push((ts.with_timezone(&Utc), entry.path()));
            }
        }
        versions.sort_by_key(|(ts, _)| *ts);
        versions.reverse();

        let cutoff = now - chrono::Duration::days(self.retention_days);
        for (index, (ts, path)) in versions.into_iter().enumerate() {
            let beyond_count_limit = index >= self.max_versions_per_document;
            let beyond_age_limit = ts < cutoff;
            if beyond_count_limit || beyond_age_limit {
                tokio::fs::remove_dir_all(path).await?;
            }
        }
        Ok(())
    }
}

async fn count_version_dirs(doc_dir: &Path) -> std::io::Result<usize> {
    let mut count = 0;
    let mut entries = tokio::fs::read_dir(doc_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() && entry.file_name() != "latest" {
            count += 1;
        }
    }
    Ok(count)
}
