//! Persistent filename → content uid map.
//!
//! Stored as pretty JSON at `<data_dir>/index/registry.json`. Writes go to
//! `registry.json.tmp` first and are renamed into place, so a crash leaves
//! either the old or the new registry, never a torn one.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::UidPolicy;

/// Length of a content uid in hex characters.
pub const UID_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub uid: String,
    pub source_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingested_at: Option<DateTime<Utc>>,
}

impl RegistryEntry {
    pub fn new(uid: String, source_path: PathBuf) -> Self {
        Self {
            uid,
            source_path,
            ingested_at: Some(Utc::now()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    documents: BTreeMap<String, RegistryEntry>,
}

impl Registry {
    /// Read the registry. A missing file is an empty registry; an
    /// unreadable one is logged and treated as empty.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read registry, starting empty");
                return Self::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(registry) => registry,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt registry, starting empty");
                Self::default()
            }
        }
    }

    /// Atomically replace the registry file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    pub fn get(&self, filename: &str) -> Option<&RegistryEntry> {
        self.documents.get(filename)
    }

    pub fn insert(&mut self, filename: String, entry: RegistryEntry) -> Option<RegistryEntry> {
        self.documents.insert(filename, entry)
    }

    pub fn remove(&mut self, filename: &str) -> Option<RegistryEntry> {
        self.documents.remove(filename)
    }

    pub fn clear(&mut self) {
        self.documents.clear();
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Entries in filename order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &RegistryEntry)> {
        self.documents.iter()
    }

    pub fn filenames(&self) -> Vec<String> {
        self.documents.keys().cloned().collect()
    }

    pub fn references_uid(&self, uid: &str) -> bool {
        self.documents.values().any(|e| e.uid == uid)
    }

    /// Drop entries whose source file no longer exists, returning their
    /// filenames.
    pub fn prune_missing_sources(&mut self) -> Vec<String> {
        let missing: Vec<String> = self
            .documents
            .iter()
            .filter(|(_, e)| !e.source_path.exists())
            .map(|(name, _)| name.clone())
            .collect();
        for name in &missing {
            self.documents.remove(name);
        }
        missing
    }
}

/// Derive the content uid for `filename` stored at `path`.
pub fn content_uid(policy: UidPolicy, filename: &str, path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(filename.as_bytes());
    hasher.update([0u8]);

    match policy {
        UidPolicy::Content => {
            let mut file = std::fs::File::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
        }
        UidPolicy::Generation => {
            let meta = std::fs::metadata(path)
                .with_context(|| format!("Failed to stat {}", path.display()))?;
            let mtime = meta
                .modified()
                .ok()
                .map(DateTime::<Utc>::from)
                .map(|t| t.timestamp_nanos_opt().unwrap_or_default())
                .unwrap_or_default();
            hasher.update(meta.len().to_le_bytes());
            hasher.update(mtime.to_le_bytes());
            hasher.update(uuid::Uuid::new_v4().as_bytes());
        }
    }

    let mut uid = hex::encode(hasher.finalize());
    uid.truncate(UID_LEN);
    Ok(uid)
}
