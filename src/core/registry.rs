//! In-memory index of installed repositories and their tool dependencies.
//!
//! Only consulted when `manage_dependency_relationships` is enabled. The
//! installers are handed a registry explicitly; nothing here is global.

use crate::core::model::{Dependency, DependencyType, ToolShedRepository};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Receives notice of every completed repository and dependency install.
pub trait InstalledRepositoryRegistry {
    fn handle_repository_install(&self, repository: &ToolShedRepository);

    fn handle_tool_dependency_install(&self, repository: &ToolShedRepository, dependency: &Dependency);
}

type DependencyKey = (String, Option<String>, DependencyType);

/// Registry backed by two maps guarded by one mutex.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    inner: Mutex<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    repositories: BTreeMap<String, Vec<DependencyKey>>,
    dependents: BTreeMap<DependencyKey, Vec<String>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of repositories installed so far.
    pub fn installed_repositories(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|s| s.repositories.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Repositories that installed the given dependency.
    pub fn dependents_of(&self, name: &str, version: Option<&str>, dep_type: DependencyType) -> Vec<String> {
        let key = (name.to_string(), version.map(str::to_string), dep_type);
        self.inner
            .lock()
            .ok()
            .and_then(|s| s.dependents.get(&key).cloned())
            .unwrap_or_default()
    }
}

impl InstalledRepositoryRegistry for InMemoryRegistry {
    fn handle_repository_install(&self, repository: &ToolShedRepository) {
        if let Ok(mut state) = self.inner.lock() {
            state.repositories.entry(repository.id.clone()).or_default();
        }
    }

    fn handle_tool_dependency_install(&self, repository: &ToolShedRepository, dependency: &Dependency) {
        let key: DependencyKey = (
            dependency.name.clone(),
            dependency.version.clone(),
            dependency.dep_type,
        );
        if let Ok(mut state) = self.inner.lock() {
            let deps = state.repositories.entry(repository.id.clone()).or_default();
            if !deps.contains(&key) {
                deps.push(key.clone());
            }
            let dependents = state.dependents.entry(key).or_default();
            if !dependents.contains(&repository.id) {
                dependents.push(repository.id.clone());
            }
        }
    }
}
