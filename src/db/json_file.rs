//! Durable JSON snapshot of the target registry.
//!
//! The file is a JSON object keyed by target id. Only configuration is stored;
//! probe results live in memory.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::db::entities::monitored_target;

#[derive(Debug, thiserror::Error)]
pub enum JsonFileError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to serialize registry: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Persistence task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the registry. A missing or empty file is an empty registry.
    pub async fn load(&self) -> Result<HashMap<String, monitored_target::Model>, JsonFileError> {
        let path_display = self.path.display().to_string();
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path_display, "No registry file found, starting empty.");
                return Ok(HashMap::new());
            }
            Err(source) => {
                return Err(JsonFileError::Read {
                    path: path_display,
                    source,
                })
            }
        };
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }

        let raw: HashMap<String, monitored_target::Model> = serde_json::from_str(&contents)
            .map_err(|source| JsonFileError::Parse {
                path: path_display.clone(),
                source,
            })?;

        let mut targets = HashMap::with_capacity(raw.len());
        for (key, mut target) in raw {
            if target.id.is_empty() {
                target.id = key.clone();
            }
            if target.url.trim().is_empty() || target.interval == 0 {
                warn!(target_id = %key, "Skipping invalid record in registry file.");
                continue;
            }
            if target.name.trim().is_empty() {
                target.name = target.url.clone();
            }
            targets.insert(target.id.clone(), target);
        }
        info!(path = %path_display, count = targets.len(), "Loaded target registry.");
        Ok(targets)
    }

    /// Atomically replaces the registry file with `targets`.
    pub async fn save(&self, targets: Vec<monitored_target::Model>) -> Result<(), JsonFileError> {
        let by_id: BTreeMap<String, monitored_target::Model> = targets
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        let bytes = serde_json::to_vec_pretty(&by_id)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes)).await??;
        debug!(path = %self.path.display(), count = by_id.len(), "Registry persisted.");
        Ok(())
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), JsonFileError> {
    let to_err = |source: std::io::Error| JsonFileError::Write {
        path: path.display().to_string(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(to_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(to_err)?;
    tmp.write_all(bytes).map_err(to_err)?;
    tmp.as_file().sync_all().map_err(to_err)?;
    tmp.persist(path).map_err(|e| to_err(e.error))?;
    Ok(())
}
