//! Per-document reading position, keyed by the document fingerprint.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::scale::{Rotation, ScaleValue};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedViewState {
    /// 1-indexed.
    pub page: usize,
    pub scale: ScaleValue,
    pub rotation: Rotation,
}

impl Default for PersistedViewState {
    fn default() -> Self {
        Self {
            page: 1,
            scale: ScaleValue::default(),
            rotation: Rotation::Deg0,
        }
    }
}

pub trait ViewStateStore: Send + Sync {
    fn load(&self, fingerprint: &str) -> Result<Option<PersistedViewState>>;
    fn save(&self, fingerprint: &str, state: &PersistedViewState) -> Result<()>;
}

pub struct FileViewStateStore {
    root: PathBuf,
}

impl FileViewStateStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create state directory at {:?}", root))?;
        Ok(Self { root })
    }

    fn state_path(&self, fingerprint: &str) -> PathBuf {
        let name: String = fingerprint
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.root.join(format!("{name}.json"))
    }
}

impl ViewStateStore for FileViewStateStore {
    fn load(&self, fingerprint: &str) -> Result<Option<PersistedViewState>> {
        let path = self.state_path(fingerprint);
        if !path.exists() {
            return Ok(None);
        }
        let mut file =
            File::open(&path).with_context(|| format!("failed to open state file {:?}", path))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let state = serde_json::from_str(&buf)
            .with_context(|| format!("failed to decode state file {:?}", path))?;
        Ok(Some(state))
    }

    fn save(&self, fingerprint: &str, state: &PersistedViewState) -> Result<()> {
        let path = self.state_path(fingerprint);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(state)?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp state file {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(tmp, path)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryViewStateStore {
    inner: Mutex<HashMap<String, PersistedViewState>>,
}

impl MemoryViewStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ViewStateStore for MemoryViewStateStore {
    fn load(&self, fingerprint: &str) -> Result<Option<PersistedViewState>> {
        Ok(self.inner.lock().get(fingerprint).cloned())
    }

    fn save(&self, fingerprint: &str, state: &PersistedViewState) -> Result<()> {
        self.inner
            .lock()
            .insert(fingerprint.to_string(), state.clone());
        Ok(())
    }
}
