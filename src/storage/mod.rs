//! # Storage Module - JSON Document Persistence
//!
//! The bridge keeps its state in a handful of pretty-printed JSON documents
//! under one data directory:
//!
//! ```text
//! data/
//! ├── rewards.json         ← player → claimed levels
//! ├── identities.json      ← player → external identity
//! ├── account_links.json   ← account id → link record
//! ├── servers.json         ← server id → connection settings
//! ├── levels.json          ← level → reward command templates (read-only)
//! └── autosave/            ← write-once snapshots
//! ```
//!
//! ## Features
//!
//! - **Atomic Writes**: every document is written to a temp file and renamed into place
//! - **File Locking**: an exclusive `fs2` lock on the destination serialises writers
//! - **First Run**: missing documents load as empty
//! - **Snapshots**: see [`snapshot`]
//!
//! Documents are saved as a unit. A failure part-way leaves earlier documents
//! written; there is no cross-document transaction.

pub mod snapshot;

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::fs;

use crate::error::PersistenceError;
use crate::identity::AccountLink;
use crate::registry::ServerConfig;
use crate::rewards::RewardTemplate;

pub const REWARDS_FILE: &str = "rewards.json";
pub const IDENTITIES_FILE: &str = "identities.json";
pub const LINKS_FILE: &str = "account_links.json";
pub const SERVERS_FILE: &str = "servers.json";
pub const LEVELS_FILE: &str = "levels.json";
pub const AUTOSAVE_DIR: &str = "autosave";

const MAX_TEMP_ATTEMPTS: u32 = 64;

/// The four mutable stores, in the shape they are persisted.
#[derive(Debug, Clone, Default)]
pub struct Documents {
    pub rewards: BTreeMap<String, Vec<u32>>,
    pub identities: BTreeMap<String, String>,
    pub links: BTreeMap<String, AccountLink>,
    pub servers: BTreeMap<String, ServerConfig>,
}

/// What [`Storage::load_all`] returns. Servers stay raw so the registry can
/// validate entries one by one.
#[derive(Debug, Clone, Default)]
pub struct LoadedDocuments {
    pub rewards: BTreeMap<String, Vec<u32>>,
    pub identities: BTreeMap<String, String>,
    pub links: BTreeMap<String, AccountLink>,
    pub servers: serde_json::Map<String, Value>,
    pub levels: BTreeMap<String, Vec<RewardTemplate>>,
}

pub struct Storage {
    data_dir: PathBuf,
}

impl Storage {
    /// Open (and create if needed) the data directory.
    pub async fn new(data_dir: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| io_err(&data_dir, e))?;
        Ok(Self { data_dir })
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.data_dir.join(file)
    }

    pub fn autosave_dir(&self) -> PathBuf {
        self.data_dir.join(AUTOSAVE_DIR)
    }

    pub async fn load_all(&self) -> Result<LoadedDocuments, PersistenceError> {
        let docs = LoadedDocuments {
            rewards: self.read_json(REWARDS_FILE).await?.unwrap_or_default(),
            identities: self.read_json(IDENTITIES_FILE).await?.unwrap_or_default(),
            links: self.read_json(LINKS_FILE).await?.unwrap_or_default(),
            servers: self.read_json(SERVERS_FILE).await?.unwrap_or_default(),
            levels: self.read_json(LEVELS_FILE).await?.unwrap_or_default(),
        };
        info!(
            "loaded {} reward records, {} identities, {} links, {} server entries, {} levels",
            docs.rewards.len(),
            docs.identities.len(),
            docs.links.len(),
            docs.servers.len(),
            docs.levels.len()
        );
        Ok(docs)
    }

    pub async fn save_all(&self, docs: &Documents) -> Result<(), PersistenceError> {
        self.write_json(REWARDS_FILE, &docs.rewards).await?;
        self.write_json(IDENTITIES_FILE, &docs.identities).await?;
        self.write_json(LINKS_FILE, &docs.links).await?;
        self.write_json(SERVERS_FILE, &docs.servers).await?;
        debug!("saved all documents to {}", self.data_dir.display());
        Ok(())
    }

    /// Read a document; `Ok(None)` if the file does not exist.
    pub async fn read_json<T: DeserializeOwned>(
        &self,
        file: &str,
    ) -> Result<Option<T>, PersistenceError> {
        let path = self.path(file);
        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path, e)),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| PersistenceError::Json {
                path: path.display().to_string(),
                source: e,
            })
    }

    pub async fn write_json<T: Serialize + ?Sized>(
        &self,
        file: &str,
        value: &T,
    ) -> Result<(), PersistenceError> {
        let path = self.path(file);
        let content = serde_json::to_string_pretty(value).map_err(|e| PersistenceError::Json {
            path: path.display().to_string(),
            source: e,
        })?;
        let target = path.clone();
        tokio::task::spawn_blocking(move || replace_document(&target, content.as_bytes()))
            .await
            .map_err(|e| io_err(&path, io::Error::new(ErrorKind::Other, e.to_string())))?
            .map_err(|e| io_err(&path, e))
    }
}

pub(crate) fn io_err(path: &Path, source: io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Lock the destination, write a sibling temp file, rename it into place.
/// Blocking; [`Storage::write_json`] runs it on the blocking pool.
fn replace_document(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let guard = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    guard.lock_exclusive()?;

    let (mut tmp, tmp_path) = sibling_temp(path)?;
    let staged = tmp
        .write_all(bytes)
        .and_then(|_| tmp.sync_all())
        .and_then(|_| std::fs::rename(&tmp_path, path));
    if let Err(e) = staged {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }
    if let Some(dir) = path.parent().and_then(|d| File::open(d).ok()) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// A fresh hidden file next to `path`, named `.<file>.<pid>.<n>.tmp`.
fn sibling_temp(path: &Path) -> io::Result<(File, PathBuf)> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    for n in 0..MAX_TEMP_ATTEMPTS {
        let candidate = dir.join(format!(".{}.{}.{}.tmp", file, std::process::id(), n));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(f) => return Ok((f, candidate)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        ErrorKind::AlreadyExists,
        format!("no free temp name next to {}", path.display()),
    ))
}
