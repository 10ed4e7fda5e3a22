//! Persistent replication state.
//!
//! Two facts survive restarts: the id of the last replicated execution and
//! the set of position keys this engine opened on the destination. Both live
//! in one JSON document written atomically (temp file + rename), so a crash
//! mid-write leaves the previous state intact.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::models::PositionKey;

const STATE_FILE: &str = "copier_state.json";

/// On-disk shape of the state document.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateDocument {
    last_processed_execution_id: Option<String>,
    #[serde(default)]
    position_map: std::collections::BTreeMap<String, bool>,
}

#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    last_exec_id: Option<String>,
    mapped: BTreeSet<PositionKey>,
}

impl StateStore {
    /// Load state from `data_dir`, starting fresh when the file is missing.
    /// A corrupt file is logged and treated as missing; the reconciler
    /// rebuilds the map from live positions.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(STATE_FILE);

        let doc = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<StateDocument>(&raw) {
                Ok(doc) => doc,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "State file corrupt, starting fresh");
                    StateDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No state file, starting fresh");
                StateDocument::default()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading state file {}", path.display()))
            }
        };

        let mut mapped = BTreeSet::new();
        for (label, active) in &doc.position_map {
            if !active {
                continue;
            }
            match PositionKey::parse(label) {
                Some(key) => {
                    mapped.insert(key);
                }
                None => warn!(label = %label, "Skipping unparseable position key in state file"),
            }
        }

        Ok(Self {
            path,
            last_exec_id: doc.last_processed_execution_id,
            mapped,
        })
    }

    /// Persist atomically: the document is written to a sibling temp file
    /// and renamed over the target.
    pub fn save(&self) -> Result<()> {
        let doc = StateDocument {
            last_processed_execution_id: self.last_exec_id.clone(),
            position_map: self
                .mapped
                .iter()
                .map(|key| (key.label(), true))
                .collect(),
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating state directory {}", parent.display()))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(&doc).context("serializing state document")?;
        fs::write(&tmp, raw)
            .with_context(|| format!("writing temp state file {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing state file {}", self.path.display()))?;
        Ok(())
    }

    pub fn last_exec_id(&self) -> Option<&str> {
        self.last_exec_id.as_deref()
    }

    pub fn set_last_exec_id(&mut self, exec_id: String) {
        self.last_exec_id = Some(exec_id);
    }

    pub fn is_mapped(&self, key: &PositionKey) -> bool {
        self.mapped.contains(key)
    }

    /// Idempotent: mapping an already-mapped key is a no-op.
    pub fn map(&mut self, key: PositionKey) {
        self.mapped.insert(key);
    }

    /// Idempotent: unmapping an unknown key is a no-op.
    pub fn unmap(&mut self, key: &PositionKey) {
        self.mapped.remove(key);
    }

    pub fn mapped_count(&self) -> usize {
        self.mapped.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("copier-state-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = temp_dir();
        let mut store = StateStore::load(&dir).unwrap();
        store.map(PositionKey::new("BTCUSDT", Side::Buy));
        store.map(PositionKey::new("ETHUSDT", Side::Sell));
        store.set_last_exec_id("exec-42".to_string());
        store.save().unwrap();

        let reloaded = StateStore::load(&dir).unwrap();
        assert_eq!(reloaded.last_exec_id(), Some("exec-42"));
        assert!(reloaded.is_mapped(&PositionKey::new("BTCUSDT", Side::Buy)));
        assert!(reloaded.is_mapped(&PositionKey::new("ETHUSDT", Side::Sell)));
        assert!(!reloaded.is_mapped(&PositionKey::new("BTCUSDT", Side::Sell)));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn map_and_unmap_are_idempotent() {
        let dir = temp_dir();
        let mut store = StateStore::load(&dir).unwrap();
        let key = PositionKey::new("BTCUSDT", Side::Buy);

        store.map(key.clone());
        store.map(key.clone());
        assert_eq!(store.mapped_count(), 1);

        store.unmap(&key);
        store.unmap(&key);
        assert_eq!(store.mapped_count(), 0);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_file_starts_fresh() {
        let dir = temp_dir();
        let store = StateStore::load(&dir).unwrap();
        assert_eq!(store.last_exec_id(), None);
        assert_eq!(store.mapped_count(), 0);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn corrupt_file_starts_fresh() {
        let dir = temp_dir();
        fs::write(dir.join(STATE_FILE), "{not json").unwrap();
        let store = StateStore::load(&dir).unwrap();
        assert_eq!(store.last_exec_id(), None);
        assert_eq!(store.mapped_count(), 0);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn persisted_document_uses_label_keys() {
        let dir = temp_dir();
        let mut store = StateStore::load(&dir).unwrap();
        store.map(PositionKey::new("BTCUSDT", Side::Buy));
        store.save().unwrap();

        let raw = fs::read_to_string(dir.join(STATE_FILE)).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["positionMap"]["BTCUSDT-Buy"], true);

        fs::remove_dir_all(&dir).unwrap();
    }
}
