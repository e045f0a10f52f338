//! Display containers
//!
//! Folder trees shown to an administrator before and after an install:
//! one per repository, then merged into a single view when several
//! repositories install together.

use crate::core::model::DeclaredDependency;
use crate::repository::catalog::{RepoInfo, RepoInfoDict, RepositoryDependency};
use serde::Serialize;
use std::sync::Mutex;

/// Separator between the components of a repository folder key.
pub const KEY_SEPARATOR: &str = "__ESEP__";

/// Folder ids in a merged view start here.
const MERGED_FOLDER_ID_START: u32 = 867;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryDependencyRow {
    pub tool_shed: String,
    pub name: String,
    pub owner: String,
    pub changeset_revision: String,
    pub prior_installation_required: bool,
    pub is_header: bool,
}

impl RepositoryDependencyRow {
    pub fn header() -> Self {
        Self {
            tool_shed: "Tool shed".into(),
            name: "Name".into(),
            owner: "Owner".into(),
            changeset_revision: "Revision".into(),
            prior_installation_required: false,
            is_header: true,
        }
    }
}

impl From<&RepositoryDependency> for RepositoryDependencyRow {
    fn from(dep: &RepositoryDependency) -> Self {
        Self {
            tool_shed: dep.tool_shed.clone(),
            name: dep.name.clone(),
            owner: dep.owner.clone(),
            changeset_revision: dep.changeset_revision.clone(),
            prior_installation_required: dep.prior_installation_required,
            is_header: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDependencyRow {
    pub name: String,
    pub version: Option<String>,
    pub dep_type: String,
    pub is_header: bool,
}

impl ToolDependencyRow {
    pub fn header() -> Self {
        Self {
            name: "Name".into(),
            version: Some("Version".into()),
            dep_type: "Type".into(),
            is_header: true,
        }
    }

    /// Identity used to drop duplicates when merging.
    fn listify(&self) -> (&str, Option<&str>, &str) {
        (&self.name, self.version.as_deref(), &self.dep_type)
    }
}

impl From<&DeclaredDependency> for ToolDependencyRow {
    fn from(dep: &DeclaredDependency) -> Self {
        Self {
            name: dep.name.clone(),
            version: dep.version.clone(),
            dep_type: dep.dep_type.to_string(),
            is_header: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Folder {
    pub id: u32,
    pub key: String,
    pub label: String,
    pub folders: Vec<Folder>,
    pub repository_dependencies: Vec<RepositoryDependencyRow>,
    pub tool_dependencies: Vec<ToolDependencyRow>,
}

impl Folder {
    pub fn new(id: u32, key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id,
            key: key.into(),
            label: label.into(),
            folders: Vec::new(),
            repository_dependencies: Vec::new(),
            tool_dependencies: Vec::new(),
        }
    }

    /// A `root` folder holding exactly `child`.
    fn root_of(id: u32, child: Folder) -> Self {
        let mut root = Folder::new(id, "root", "root");
        root.folders.push(child);
        root
    }
}

/// Every display container of one install view. Only the dependency
/// containers are populated for a new install.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContainersDict {
    pub readme_files: Option<Folder>,
    pub datatypes: Option<Folder>,
    pub missing_repository_dependencies: Option<Folder>,
    pub repository_dependencies: Option<Folder>,
    pub missing_tool_dependencies: Option<Folder>,
    pub tool_dependencies: Option<Folder>,
    pub invalid_tools: Option<Folder>,
    pub valid_tools: Option<Folder>,
    pub workflows: Option<Folder>,
}

impl ContainersDict {
    /// Containers for a repository about to be installed: everything it
    /// depends on is still missing. Unless `updating`, the missing
    /// folders are folded into the installed ones for display.
    pub fn for_new_install(info: &RepoInfo, updating: bool) -> Self {
        let mut containers = ContainersDict::default();

        if let Some(rd) = &info.repository_dependencies {
            let mut folder = Folder::new(1, rd.root_key.clone(), "Missing repository dependencies");
            folder.repository_dependencies.push(RepositoryDependencyRow::header());
            folder
                .repository_dependencies
                .extend(info.repository_dependency_edges().map(RepositoryDependencyRow::from));
            if folder.repository_dependencies.len() > 1 {
                containers.missing_repository_dependencies = Some(Folder::root_of(0, folder));
            }
        }

        if !info.tool_dependencies.is_empty() {
            let mut folder = Folder::new(3, "tool_dependencies", "Missing tool dependencies");
            folder.tool_dependencies.push(ToolDependencyRow::header());
            folder
                .tool_dependencies
                .extend(info.tool_dependencies.iter().map(ToolDependencyRow::from));
            containers.missing_tool_dependencies = Some(Folder::root_of(2, folder));
        }

        if !updating {
            containers = merge_missing_repository_dependencies_to_installed(containers);
            containers = merge_missing_tool_dependencies_to_installed(containers);
        }
        containers
    }
}

/// Fold the missing repository dependencies into the installed ones, or
/// relabel the missing folder if nothing is installed yet.
pub fn merge_missing_repository_dependencies_to_installed(mut containers: ContainersDict) -> ContainersDict {
    if let Some(mut missing_root) = containers.missing_repository_dependencies.take() {
        match containers.repository_dependencies.as_mut() {
            Some(installed_root) => {
                if let (Some(missing), Some(installed)) =
                    (missing_root.folders.first(), installed_root.folders.first_mut())
                {
                    installed.label = "Repository dependencies".into();
                    installed.repository_dependencies.extend(
                        missing
                            .repository_dependencies
                            .iter()
                            .filter(|rd| !rd.is_header)
                            .cloned(),
                    );
                    installed_root.folders.truncate(1);
                }
            }
            None => {
                for sub in &mut missing_root.folders {
                    sub.label = "Repository dependencies".into();
                }
                containers.repository_dependencies = Some(missing_root);
            }
        }
    }
    containers
}

/// Same as [`merge_missing_repository_dependencies_to_installed`] for tool
/// dependencies.
pub fn merge_missing_tool_dependencies_to_installed(mut containers: ContainersDict) -> ContainersDict {
    if let Some(mut missing_root) = containers.missing_tool_dependencies.take() {
        match containers.tool_dependencies.as_mut() {
            Some(installed_root) => {
                if let (Some(missing), Some(installed)) =
                    (missing_root.folders.first(), installed_root.folders.first_mut())
                {
                    installed.label = "Tool dependencies".into();
                    installed.tool_dependencies.extend(
                        missing
                            .tool_dependencies
                            .iter()
                            .filter(|td| !td.is_header)
                            .cloned(),
                    );
                    installed_root.folders.truncate(1);
                }
            }
            None => {
                for sub in &mut missing_root.folders {
                    sub.label = "Tool dependencies".into();
                }
                containers.tool_dependencies = Some(missing_root);
            }
        }
    }
    containers
}

/// Merges the containers of several repositories into one view. The
/// merge mutates the aggregate while walking every input, so it runs
/// under a lock; installation itself is not serialized here.
#[derive(Debug, Default)]
pub struct ContainerMerger {
    lock: Mutex<()>,
}

impl ContainerMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The merged view of a batch about to be installed, built from each
    /// repository's install information.
    pub fn containers_for_new_install(&self, repo_info_dicts: &[RepoInfoDict]) -> ContainersDict {
        let per_repository: Vec<ContainersDict> = repo_info_dicts
            .iter()
            .flat_map(|dict| dict.values())
            .map(|info| ContainersDict::for_new_install(info, false))
            .collect();
        self.merge_containers_for_new_install(&per_repository)
    }

    pub fn merge_containers_for_new_install(&self, containers: &[ContainersDict]) -> ContainersDict {
        if containers.is_empty() {
            return ContainersDict::default();
        }
        let _guard = match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        merge_for_new_install(containers)
    }
}

struct MergeState {
    next_id: u32,
    repository_dependencies: Option<(Folder, Folder)>,
    tool_dependencies: Option<(Folder, Folder)>,
}

impl MergeState {
    fn take_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Add one repository's containers. Stops at the first malformed
    /// container.
    fn add(&mut self, containers: &ContainersDict) -> Result<(), String> {
        if let Some(root) = &containers.repository_dependencies {
            if self.repository_dependencies.is_none() {
                let root_folder = Folder::new(self.take_id(), "root", "root");
                let merged = Folder::new(self.take_id(), "merged", "Repository dependencies");
                self.repository_dependencies = Some((root_folder, merged));
            }
            let mut sub = root
                .folders
                .first()
                .cloned()
                .ok_or_else(|| "repository dependencies container has no folder".to_string())?;
            sub.id = self.take_id();
            sub.label = repository_name_from_key(&sub.key).to_string();
            if let Some((_, merged)) = self.repository_dependencies.as_mut() {
                merged.folders.push(sub);
            }
        }

        if let Some(root) = &containers.tool_dependencies {
            if self.tool_dependencies.is_none() {
                let root_folder = Folder::new(self.take_id(), "root", "root");
                let merged = Folder::new(self.take_id(), "merged", "Tool dependencies");
                self.tool_dependencies = Some((root_folder, merged));
            }
            let sub = root
                .folders
                .first()
                .ok_or_else(|| "tool dependencies container has no folder".to_string())?;
            if let Some((_, merged)) = self.tool_dependencies.as_mut() {
                for td in &sub.tool_dependencies {
                    if !merged.tool_dependencies.iter().any(|m| m.listify() == td.listify()) {
                        merged.tool_dependencies.push(td.clone());
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> ContainersDict {
        let close = |(mut root, merged): (Folder, Folder)| {
            root.folders.push(merged);
            root
        };
        ContainersDict {
            repository_dependencies: self.repository_dependencies.map(close),
            tool_dependencies: self.tool_dependencies.map(close),
            ..ContainersDict::default()
        }
    }
}

fn merge_for_new_install(containers: &[ContainersDict]) -> ContainersDict {
    let mut state = MergeState {
        next_id: MERGED_FOLDER_ID_START,
        repository_dependencies: None,
        tool_dependencies: None,
    };
    for dict in containers {
        if let Err(e) = state.add(dict) {
            tracing::debug!("merging containers for new install: {}", e);
            break;
        }
    }
    state.finish()
}

/// The repository name is the second component of a folder key.
fn repository_name_from_key(key: &str) -> &str {
    key.split(KEY_SEPARATOR).nth(1).unwrap_or(key)
}
