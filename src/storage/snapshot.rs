//! Autosave snapshots.
//!
//! Each autosave writes `autosave/autosave_YYYYmmdd_HHMMSS.json`, a write-once
//! file holding every store, the level catalog and summary statistics. The
//! SHA-256 of the written bytes is returned so it can be logged. Beyond
//! `retention` files the oldest snapshots are removed (0 keeps everything).

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{io_err, Documents};
use crate::error::PersistenceError;
use crate::rewards::RewardTemplate;

const PREFIX: &str = "autosave_";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Statistics {
    pub total_rewards_given: usize,
    pub active_players: usize,
    pub level_distribution: BTreeMap<String, usize>,
    pub total_servers: usize,
    pub enabled_servers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveInfo {
    pub timestamp: String,
    pub save_type: String,
    pub version: String,
    pub total_players: usize,
    pub total_eos_mappings: usize,
    pub total_account_links: usize,
    pub total_servers: usize,
}

#[derive(Debug, Serialize)]
struct SnapshotDocument<'a> {
    save_info: SaveInfo,
    rewards_data: &'a BTreeMap<String, Vec<u32>>,
    eos_mapping_data: &'a BTreeMap<String, String>,
    account_links_data: &'a BTreeMap<String, crate::identity::AccountLink>,
    server_data: &'a BTreeMap<String, crate::registry::ServerConfig>,
    config_levels: &'a BTreeMap<String, Vec<RewardTemplate>>,
    statistics: &'a Statistics,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub checksum: String,
    pub size_bytes: u64,
    pub pruned: Vec<PathBuf>,
}

pub struct SnapshotWriter {
    dir: PathBuf,
    retention: usize,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            retention,
        }
    }

    pub fn write(
        &self,
        now: DateTime<Utc>,
        docs: &Documents,
        levels: &BTreeMap<String, Vec<RewardTemplate>>,
        statistics: &Statistics,
    ) -> Result<SnapshotInfo, PersistenceError> {
        fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        let doc = SnapshotDocument {
            save_info: SaveInfo {
                timestamp: now.to_rfc3339(),
                save_type: "Scheduled Autosave".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                total_players: docs.rewards.len(),
                total_eos_mappings: docs.identities.len(),
                total_account_links: docs.links.len(),
                total_servers: docs.servers.len(),
            },
            rewards_data: &docs.rewards,
            eos_mapping_data: &docs.identities,
            account_links_data: &docs.links,
            server_data: &docs.servers,
            config_levels: levels,
            statistics,
        };
        let content = serde_json::to_string_pretty(&doc).map_err(|e| PersistenceError::Json {
            path: self.dir.display().to_string(),
            source: e,
        })?;

        let stamp = now.format("%Y%m%d_%H%M%S").to_string();
        let path = self.create_unique(&stamp, content.as_bytes())?;
        let checksum = format!("{:x}", Sha256::digest(content.as_bytes()));
        let pruned = self.prune();
        info!(
            "autosave snapshot {} ({} bytes, sha256 {})",
            path.display(),
            content.len(),
            checksum
        );
        Ok(SnapshotInfo {
            path,
            checksum,
            size_bytes: content.len() as u64,
            pruned,
        })
    }

    /// Create the snapshot file without ever overwriting an existing one.
    fn create_unique(&self, stamp: &str, bytes: &[u8]) -> Result<PathBuf, PersistenceError> {
        let mut n = 0u32;
        loop {
            let name = if n == 0 {
                format!("{}{}.json", PREFIX, stamp)
            } else {
                format!("{}{}_{}.json", PREFIX, stamp, n)
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut f) => {
                    f.write_all(bytes).map_err(|e| io_err(&path, e))?;
                    let _ = f.sync_all();
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(io_err(&path, e)),
            }
        }
    }

    /// Snapshot files, oldest first.
    pub fn list(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = match fs::read_dir(&self.dir) {
            Ok(rd) => rd
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| is_snapshot(p))
                .collect(),
            Err(_) => Vec::new(),
        };
        files.sort();
        files
    }

    fn prune(&self) -> Vec<PathBuf> {
        if self.retention == 0 {
            return Vec::new();
        }
        let files = self.list();
        let excess = files.len().saturating_sub(self.retention);
        let mut removed = Vec::new();
        for path in files.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => removed.push(path),
                Err(e) => warn!("could not prune snapshot {}: {}", path.display(), e),
            }
        }
        removed
    }
}

fn is_snapshot(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(PREFIX) && n.ends_with(".json"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn docs() -> Documents {
        let mut d = Documents::default();
        d.rewards.insert("Steve".into(), vec![1]);
        d.identities
            .insert("Steve".into(), "28838c3022e0cb886568abcaa6f37f8d".into());
        d
    }

    #[test]
    fn snapshot_is_write_once_and_checksummed() {
        let dir = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(dir.path(), 0);
        let now = Utc.with_ymd_and_hms(2025, 7, 7, 12, 43, 11).unwrap();
        let stats = Statistics::default();
        let a = writer.write(now, &docs(), &BTreeMap::new(), &stats).unwrap();
        let b = writer.write(now, &docs(), &BTreeMap::new(), &stats).unwrap();
        assert_ne!(a.path, b.path);
        assert!(a.path.ends_with("autosave_20250707_124311.json"));
        assert_eq!(a.checksum.len(), 64);

        let raw = std::fs::read_to_string(&a.path).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["save_info"]["total_players"], 1);
        assert_eq!(v["eos_mapping_data"]["Steve"], "28838c3022e0cb886568abcaa6f37f8d");
        assert!(v.get("statistics").is_some());
    }

    #[test]
    fn retention_prunes_oldest() {
        let dir = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(dir.path(), 2);
        let stats = Statistics::default();
        for s in 0..4 {
            let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, s).unwrap();
            writer.write(now, &docs(), &BTreeMap::new(), &stats).unwrap();
        }
        let left = writer.list();
        assert_eq!(left.len(), 2);
        assert!(left[0].ends_with("autosave_20250101_000002.json"));
        assert!(left[1].ends_with("autosave_20250101_000003.json"));
    }
}
