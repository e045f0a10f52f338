//! Status persistence
//!
//! Repository and dependency records are flushed after every status
//! transition so an interrupted install leaves an accurate trail.

use crate::core::error::{Error, Result};
use crate::core::model::{Dependency, ToolShedRepository};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Durable storage for installation status.
pub trait StatusStore {
    /// Persist a repository record (including its dependency records).
    fn save_repository(&self, repository: &ToolShedRepository) -> Result<()>;

    /// Persist one dependency record belonging to `repository_id`.
    fn save_dependency(&self, repository_id: &str, dependency: &Dependency) -> Result<()>;

    fn load_repository(&self, id: &str) -> Result<Option<ToolShedRepository>>;

    /// Return the stored record for `candidate` if one exists, otherwise
    /// store and return `candidate` itself.
    fn create_or_update_repository(&self, candidate: ToolShedRepository) -> Result<ToolShedRepository> {
        match self.load_repository(&candidate.id)? {
            Some(existing) => Ok(existing),
            None => {
                self.save_repository(&candidate)?;
                Ok(candidate)
            }
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    repositories: BTreeMap<String, ToolShedRepository>,
}

/// A single JSON document under the configured state directory.
pub struct JsonStatusStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonStatusStore {
    pub const FILE_NAME: &'static str = "installs.json";

    /// Open (or create) the store in `state_dir`.
    pub fn open(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir)?;
        let path = state_dir.join(Self::FILE_NAME);
        let state = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            serde_json::from_str(&text)
                .map_err(|e| Error::Store(format!("cannot parse {}: {}", path.display(), e)))?
        } else {
            StoreState::default()
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| Error::Store("status store lock poisoned".into()))
    }

    /// Write to a sibling temp file, then rename over the document.
    fn flush(&self, state: &StoreState) -> Result<()> {
        let text = serde_json::to_string_pretty(state)
            .map_err(|e| Error::Store(format!("cannot serialize status: {}", e)))?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, text.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

impl StatusStore for JsonStatusStore {
    fn save_repository(&self, repository: &ToolShedRepository) -> Result<()> {
        let mut state = self.lock()?;
        state
            .repositories
            .insert(repository.id.clone(), repository.clone());
        self.flush(&state)
    }

    fn save_dependency(&self, repository_id: &str, dependency: &Dependency) -> Result<()> {
        let mut state = self.lock()?;
        let repository = state.repositories.get_mut(repository_id).ok_or_else(|| {
            Error::Store(format!("unknown repository '{}'", repository_id))
        })?;
        match repository
            .tool_dependencies
            .iter_mut()
            .find(|d| d.identity() == dependency.identity())
        {
            Some(existing) => *existing = dependency.clone(),
            None => repository.tool_dependencies.push(dependency.clone()),
        }
        self.flush(&state)
    }

    fn load_repository(&self, id: &str) -> Result<Option<ToolShedRepository>> {
        let state = self.lock()?;
        Ok(state.repositories.get(id).cloned())
    }
}
