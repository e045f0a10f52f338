//! Repository installer
//!
//! Installs a batch of tool shed repositories: fetch install information,
//! create the status records, order the batch, then clone each repository,
//! handle its contents, sync tool versions and install its tool
//! dependencies. A repository that fails is marked `Error` and the rest of
//! the batch continues.

use crate::core::config::InstallerConfig;
use crate::core::error::{CatalogError, ConfigError, Error, Result};
use crate::core::model::{
    Dependency, RepositoryStatus, ToolShedRepository, repository_id, strip_protocol,
    tool_dependency_install_dir,
};
use crate::core::output;
use crate::core::registry::InstalledRepositoryRegistry;
use crate::core::store::StatusStore;
use crate::engine::dependency::InstallToolDependencyManager;
use crate::engine::step::StepExecutor;
use crate::helpers::fs_utils;
use crate::recipe::platform::Platform;
use crate::repository::catalog::{RepoInfo, RepoInfoDict, RevisionDescriptor, ToolShedCatalog};
use crate::repository::collaborators::{
    ContentsHandler, DiskMetadataExtractor, MetadataExtractor, StandaloneContents,
    TOOL_DEPENDENCY_CONFIG, VersionControl, find_config_file,
};
use crate::repository::orderer::order_components_for_installation;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Caller choices for one install request.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    pub install_repository_dependencies: bool,
    pub install_tool_dependencies: bool,
    pub new_tool_panel_section_label: String,
    /// Falls back to the configured `shed_tool_conf`.
    pub shed_tool_conf: Option<String>,
    pub tool_panel_section_id: String,
}

/// Drives repository installation.
pub struct InstallRepositoryManager {
    config: InstallerConfig,
    catalog: Box<dyn ToolShedCatalog>,
    vcs: Box<dyn VersionControl>,
    metadata: Box<dyn MetadataExtractor>,
    contents: Box<dyn ContentsHandler>,
    store: Arc<dyn StatusStore>,
    dependencies: InstallToolDependencyManager,
    registry: Option<Arc<dyn InstalledRepositoryRegistry>>,
}

impl InstallRepositoryManager {
    /// The tool dependency installer shares `store` with this manager.
    pub fn new(
        config: InstallerConfig,
        catalog: Box<dyn ToolShedCatalog>,
        vcs: Box<dyn VersionControl>,
        store: Arc<dyn StatusStore>,
        executor: Box<dyn StepExecutor>,
    ) -> Self {
        let platform = Platform::with_overrides(
            config.os_override.as_deref(),
            config.architecture_override.as_deref(),
        );
        let dependencies = InstallToolDependencyManager::new(executor, store.clone(), platform);
        Self {
            config,
            catalog,
            vcs,
            metadata: Box::new(DiskMetadataExtractor),
            contents: Box::new(StandaloneContents),
            store,
            dependencies,
            registry: None,
        }
    }

    pub fn with_metadata_extractor(mut self, metadata: Box<dyn MetadataExtractor>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_contents_handler(mut self, contents: Box<dyn ContentsHandler>) -> Self {
        self.contents = contents;
        self
    }

    /// Only used when `manage_dependency_relationships` is on.
    pub fn with_registry(mut self, registry: Arc<dyn InstalledRepositoryRegistry>) -> Self {
        if !self.config.manage_dependency_relationships {
            tracing::debug!("manage_dependency_relationships is off; registry ignored");
            return self;
        }
        self.dependencies = self.dependencies.with_registry(registry.clone());
        self.registry = Some(registry);
        self
    }

    /// Install one repository revision, plus its repository dependencies
    /// when asked. Returns every repository this call attempted.
    pub fn install(
        &self,
        tool_shed_url: &str,
        name: &str,
        owner: &str,
        changeset_revision: &str,
        options: &InstallOptions,
    ) -> Result<Vec<ToolShedRepository>> {
        let info = self
            .catalog
            .get_repository_install_info(tool_shed_url, name, owner, changeset_revision)?;
        self.install_repositories(tool_shed_url, &info.revision, vec![info.repo_info], options)
    }

    /// Validate the request, create the batch records and install every
    /// new or uninstalled repository in dependency order.
    pub fn install_repositories(
        &self,
        tool_shed_url: &str,
        revision: &Value,
        repo_info_dicts: Vec<RepoInfoDict>,
        options: &InstallOptions,
    ) -> Result<Vec<ToolShedRepository>> {
        let descriptor = RevisionDescriptor::from_value(revision)?;
        if options.install_tool_dependencies {
            self.config.require_tool_dependency_dir()?;
        }
        let shed_tool_conf = self.resolve_shed_tool_conf(options)?;
        let section_id = self.normalize_section_id(&options.tool_panel_section_id);
        let label = &options.new_tool_panel_section_label;
        let panel_key = if descriptor.includes_tools_for_display_in_tool_panel
            && (!label.is_empty() || !section_id.is_empty())
        {
            self.contents.handle_tool_panel_section(&section_id, label)
        } else {
            None
        };

        let repo_info_dicts = if options.install_repository_dependencies
            && descriptor.has_repository_dependencies
        {
            self.with_required_repositories(tool_shed_url, repo_info_dicts)
        } else {
            repo_info_dicts
        };

        let batch = self.create_batch_records(tool_shed_url, &repo_info_dicts)?;
        if batch.is_empty() {
            return Err(CatalogError::InvalidRequest(
                "All repositories that you are attempting to install have been previously installed."
                    .into(),
            )
            .into());
        }

        let ids: Vec<String> = batch.iter().map(|(r, _)| r.id.clone()).collect();
        let infos: Vec<RepoInfoDict> = batch.into_iter().map(|(_, info)| info).collect();
        let keys = vec![panel_key; ids.len()];
        let ordered = order_components_for_installation(&ids, &infos, &keys);

        let total = ordered.ids.len();
        let mut installed = Vec::new();
        for (index, id) in ordered.ids.iter().enumerate() {
            let Some(repository) = self.store.load_repository(id)? else {
                continue;
            };
            if !repository.status.is_installable() {
                continue;
            }
            output::action_numbered(
                index + 1,
                total,
                &format!("{} ({})", repository.name, repository.changeset_revision),
            );
            let repository = self.install_tool_shed_repository(
                repository,
                &ordered.repo_info_dicts[index],
                ordered.tool_panel_section_keys[index].as_deref(),
                &shed_tool_conf,
                options.install_tool_dependencies,
                false,
            )?;
            installed.push(repository);
        }
        Ok(installed)
    }

    /// Clone one repository and carry it through to `Installed`.
    ///
    /// Per-repository failures end in an `Error` status on the returned
    /// record; only status store and filesystem failures are returned as
    /// errors.
    pub fn install_tool_shed_repository(
        &self,
        mut repository: ToolShedRepository,
        repo_info: &RepoInfoDict,
        tool_panel_section_key: Option<&str>,
        shed_tool_conf: &str,
        install_tool_dependencies: bool,
        reinstalling: bool,
    ) -> Result<ToolShedRepository> {
        self.update_status(&mut repository, RepositoryStatus::Cloning)?;
        let info = repo_info.get(&repository.name).ok_or_else(|| {
            CatalogError::InvalidResponse(format!("no install information for {}", repository.name))
        })?;

        let relative_install_dir = relative_clone_dir(&info.clone_url, &repository.installed_changeset_revision)
            .join(&repository.name);
        let install_dir = std::path::absolute(self.config.tool_path.join(&relative_install_dir))?;

        if let Err(message) = self.vcs.clone_repository(&info.clone_url, &install_dir, &info.ctx_rev) {
            output::error(&format!("cloning {} failed", repository.name));
            self.set_clone_failure(&mut repository, &install_dir, message)?;
            return Ok(repository);
        }

        if reinstalling {
            self.update_to_latest_revision(&repository, info, &install_dir);
        }

        if let Err(message) = self.handle_repository_contents(
            &mut repository,
            &install_dir,
            tool_panel_section_key,
            shed_tool_conf,
            reinstalling,
        ) {
            // The clone stays on disk for inspection.
            self.mark_error(&mut repository, message)?;
            return Ok(repository);
        }

        let metadata = repository.metadata.clone().unwrap_or_default();
        if metadata.tools.is_some() {
            self.update_status(&mut repository, RepositoryStatus::SettingToolVersions)?;
            self.set_tool_versions(&mut repository, &shed_url(&info.clone_url));
        }

        if install_tool_dependencies
            && !repository.tool_dependencies.is_empty()
            && metadata.tool_dependencies.is_some()
        {
            self.update_status(&mut repository, RepositoryStatus::InstallingToolDependencies)?;
            match self.install_tool_dependencies(&mut repository, &install_dir) {
                Ok(()) => {}
                Err(Error::Config(e)) => {
                    self.mark_error(&mut repository, format!("Error installing tool dependencies: {}", e))?;
                    return Ok(repository);
                }
                Err(e) => return Err(e),
            }
        }

        self.update_status(&mut repository, RepositoryStatus::Installed)?;
        output::success(&format!("{} installed", repository.name));
        if self.config.manage_dependency_relationships
            && let Some(registry) = &self.registry
        {
            registry.handle_repository_install(&repository);
        }
        Ok(repository)
    }

    /// Generate metadata for the clone and hand each kind of content to
    /// the contents handler.
    pub fn handle_repository_contents(
        &self,
        repository: &mut ToolShedRepository,
        install_dir: &Path,
        tool_section: Option<&str>,
        shed_tool_conf: &str,
        reinstalling: bool,
    ) -> std::result::Result<(), String> {
        let save = |repository: &ToolShedRepository| {
            self.store
                .save_repository(repository)
                .map_err(|e| e.to_string())
        };

        let metadata = self.metadata.generate_metadata(repository, install_dir)?;
        repository.metadata = Some(metadata.clone());
        save(repository)?;

        if let Some(declared) = &metadata.tool_dependencies
            && !reinstalling
        {
            self.create_tool_dependency_records(repository, declared);
            save(repository)?;
        }
        if let Some(sample_files) = &metadata.sample_files {
            self.contents
                .install_sample_files(repository, install_dir, sample_files, &self.config.tool_path)?;
        }
        if let Some(tools) = &metadata.tools {
            self.contents
                .add_to_tool_panel(repository, tools, tool_section, shed_tool_conf)?;
        }
        if let Some(data_manager) = &metadata.data_manager {
            self.contents.install_data_managers(repository, data_manager)?;
        }
        if let Some(datatypes) = &metadata.datatypes {
            repository.status = RepositoryStatus::LoadingProprietaryDatatypes;
            repository.includes_datatypes = true;
            save(repository)?;
            self.contents.load_datatypes(repository, install_dir, datatypes)?;
        }
        Ok(())
    }

    fn resolve_shed_tool_conf(&self, options: &InstallOptions) -> std::result::Result<String, ConfigError> {
        options
            .shed_tool_conf
            .clone()
            .filter(|conf| !conf.is_empty())
            .or_else(|| {
                self.config
                    .shed_tool_conf
                    .clone()
                    .filter(|conf| Some(conf) != self.config.migrated_tools_config.as_ref())
            })
            .ok_or(ConfigError::MissingParameter("shed_tool_conf"))
    }

    /// Accept a panel section id as given or with a `section_` prefix;
    /// anything else places tools outside any section.
    fn normalize_section_id(&self, section_id: &str) -> String {
        if section_id.is_empty() || self.contents.has_tool_panel_section(section_id) {
            return section_id.to_string();
        }
        let fixed = format!("section_{}", section_id);
        if self.contents.has_tool_panel_section(&fixed) {
            fixed
        } else {
            String::new()
        }
    }

    /// Add install information for every repository the batch depends on,
    /// transitively. Dependencies the catalog cannot describe are skipped.
    fn with_required_repositories(&self, tool_shed_url: &str, mut dicts: Vec<RepoInfoDict>) -> Vec<RepoInfoDict> {
        let mut seen: BTreeSet<String> = dicts
            .iter()
            .flat_map(|dict| dict.iter())
            .map(|(name, info)| info_id(name, info))
            .collect();
        let mut pending: Vec<_> = dicts
            .iter()
            .flat_map(|dict| dict.values())
            .flat_map(|info| info.repository_dependency_edges().cloned())
            .collect();

        while let Some(edge) = pending.pop() {
            let id = repository_id(&edge.tool_shed, &edge.name, &edge.owner, &edge.changeset_revision);
            if !seen.insert(id) {
                continue;
            }
            let url = tool_shed_url_for(&edge.tool_shed, tool_shed_url);
            match self
                .catalog
                .get_repository_install_info(&url, &edge.name, &edge.owner, &edge.changeset_revision)
            {
                Ok(info) => {
                    pending.extend(
                        info.repo_info
                            .values()
                            .flat_map(|i| i.repository_dependency_edges().cloned()),
                    );
                    dicts.push(info.repo_info);
                }
                Err(e) => output::warning(&format!(
                    "cannot get install information for repository dependency {}/{}: {}",
                    edge.owner, edge.name, e
                )),
            }
        }
        dicts
    }

    /// Create or refresh a status record per repository. Installed
    /// repositories are left out; anything stuck or failed starts over as
    /// `New`.
    fn create_batch_records(
        &self,
        tool_shed_url: &str,
        repo_info_dicts: &[RepoInfoDict],
    ) -> Result<Vec<(ToolShedRepository, RepoInfoDict)>> {
        let mut batch: Vec<(ToolShedRepository, RepoInfoDict)> = Vec::new();
        for (name, info) in repo_info_dicts.iter().flat_map(|dict| dict.iter()) {
            let tool_shed = tool_shed_host(&info.clone_url).unwrap_or_else(|| {
                strip_protocol(tool_shed_url).trim_end_matches('/').to_string()
            });
            let candidate = ToolShedRepository::new(tool_shed, name.clone(), info.owner.clone(), info.changeset_revision.clone());
            if batch.iter().any(|(r, _)| r.id == candidate.id) {
                continue;
            }
            let mut repository = self.store.create_or_update_repository(candidate)?;
            match repository.status {
                RepositoryStatus::Installed => {
                    output::skip(&format!("{} is already installed", repository.name));
                    continue;
                }
                RepositoryStatus::New | RepositoryStatus::Uninstalled => {}
                _ => {
                    repository.status = RepositoryStatus::New;
                    repository.error_message = None;
                    repository.deleted = false;
                    self.store.save_repository(&repository)?;
                }
            }
            batch.push((repository, RepoInfoDict::from([(name.clone(), info.clone())])));
        }
        Ok(batch)
    }

    fn create_tool_dependency_records(&self, repository: &mut ToolShedRepository, declared: &[crate::core::model::DeclaredDependency]) {
        let Some(root) = self.config.tool_dependency_dir.as_deref() else {
            return;
        };
        for dep in declared {
            let identity = (dep.name.as_str(), dep.version.as_deref(), dep.dep_type);
            if repository.tool_dependencies.iter().any(|d| d.identity() == identity) {
                continue;
            }
            let install_dir = tool_dependency_install_dir(root, repository, dep.dep_type, &dep.name, dep.version.as_deref());
            repository
                .tool_dependencies
                .push(Dependency::new(dep.name.clone(), dep.version.clone(), dep.dep_type, install_dir));
        }
    }

    /// Run the clone's `tool_dependencies.xml` for the repository's
    /// dependency records and keep the outcomes on the repository.
    fn install_tool_dependencies(&self, repository: &mut ToolShedRepository, install_dir: &Path) -> Result<()> {
        let Some(config_path) = find_config_file(TOOL_DEPENDENCY_CONFIG, install_dir) else {
            tracing::warn!("{}: no {} in {}", repository.name, TOOL_DEPENDENCY_CONFIG, install_dir.display());
            return Ok(());
        };
        let recipe = std::fs::read_to_string(&config_path)?;
        let requested = repository.tool_dependencies.clone();
        let results = self
            .dependencies
            .install_specified(repository, Some(install_dir), &recipe, &requested)?;
        // Every transition was saved per dependency; the stored records are current.
        if let Some(stored) = self.store.load_repository(&repository.id)? {
            repository.tool_dependencies = stored.tool_dependencies;
        }
        for result in results {
            if let Some(existing) = repository
                .tool_dependencies
                .iter_mut()
                .find(|d| d.identity() == result.identity())
            {
                *existing = result;
            }
        }
        Ok(())
    }

    fn set_tool_versions(&self, repository: &mut ToolShedRepository, tool_shed_url: &str) {
        match self.catalog.get_tool_versions(tool_shed_url, repository) {
            Ok(Some(versions)) => {
                if let Err(e) = self.contents.handle_tool_versions(repository, &versions) {
                    tracing::warn!("{}: cannot set tool versions: {}", repository.name, e);
                }
            }
            Ok(None) => append_missing_versions_message(repository),
            Err(e) => {
                tracing::warn!("{}: {}", repository.name, e);
                append_missing_versions_message(repository);
            }
        }
    }

    /// After a reinstall clone, move to the latest installable revision
    /// if it differs from the cloned one.
    fn update_to_latest_revision(&self, repository: &ToolShedRepository, info: &RepoInfo, install_dir: &Path) {
        let target = match self
            .catalog
            .get_update_to_changeset_revision_and_ctx_rev(&shed_url(&info.clone_url), repository)
        {
            Ok(Some(target)) => target,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("{}: cannot find update revision: {}", repository.name, e);
                return;
            }
        };
        if target.ctx_rev == info.ctx_rev {
            return;
        }
        let updated = self
            .vcs
            .pull(install_dir, &info.clone_url, &target.changeset_revision)
            .and_then(|()| self.vcs.update(install_dir, &target.ctx_rev));
        if let Err(e) = updated {
            tracing::warn!("{}: cannot update to {}: {}", repository.name, target.changeset_revision, e);
        }
    }

    fn update_status(&self, repository: &mut ToolShedRepository, status: RepositoryStatus) -> Result<()> {
        tracing::debug!(
            "changing status of repository {} from {} to {}",
            repository.name,
            repository.status,
            status
        );
        if status != RepositoryStatus::Installed {
            output::sub_action(&status.to_string());
        }
        repository.status = status;
        self.store.save_repository(repository)
    }

    fn mark_error(&self, repository: &mut ToolShedRepository, message: String) -> Result<()> {
        tracing::error!("{}: {}", repository.name, message);
        repository.status = RepositoryStatus::Error;
        repository.error_message = Some(message);
        self.store.save_repository(repository)
    }

    /// Reset a failed clone so another attempt can start cleanly.
    fn set_clone_failure(&self, repository: &mut ToolShedRepository, install_dir: &Path, message: String) -> Result<()> {
        repository.deleted = false;
        repository.uninstalled = false;
        if let Err(e) = fs_utils::remove_dir_if_exists(install_dir) {
            tracing::warn!("cannot remove {}: {}", install_dir.display(), e);
        }
        self.mark_error(repository, message)
    }
}

fn append_missing_versions_message(repository: &mut ToolShedRepository) {
    let message = format!(
        "Version information for the tools included in the {} repository is missing. \
         Reset all of this repository's metadata in the tool shed, then set the installed tool versions \
         from the installed repository's Repository Actions menu. ",
        repository.name
    );
    repository
        .error_message
        .get_or_insert_with(String::new)
        .push_str(&message);
}

/// `<host>/repos/<owner>/<name>/<revision>` for a clone URL.
pub fn relative_clone_dir(clone_url: &str, installed_changeset_revision: &str) -> PathBuf {
    PathBuf::from(strip_protocol(clone_url).trim_end_matches('/')).join(installed_changeset_revision)
}

/// Tool shed base URL of a clone URL (`https://shed.org/repos/o/n` →
/// `https://shed.org`).
fn shed_url(clone_url: &str) -> String {
    match clone_url.find("/repos/") {
        Some(index) => clone_url[..index].to_string(),
        None => clone_url.trim_end_matches('/').to_string(),
    }
}

fn tool_shed_host(clone_url: &str) -> Option<String> {
    let host = strip_protocol(&shed_url(clone_url)).to_string();
    (!host.is_empty()).then_some(host)
}

/// A dependency's tool shed, as a URL. Reuses the request's scheme when
/// it names the same shed.
fn tool_shed_url_for(tool_shed: &str, request_url: &str) -> String {
    if tool_shed.starts_with("http://") || tool_shed.starts_with("https://") {
        return tool_shed.trim_end_matches('/').to_string();
    }
    let request = request_url.trim_end_matches('/');
    if strip_protocol(request) == tool_shed.trim_end_matches('/') {
        return request.to_string();
    }
    format!("https://{}", tool_shed.trim_end_matches('/'))
}

fn info_id(name: &str, info: &RepoInfo) -> String {
    let tool_shed = tool_shed_host(&info.clone_url).unwrap_or_default();
    repository_id(&tool_shed, name, &info.owner, &info.changeset_revision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::DependencyStatus;
    use crate::core::store::JsonStatusStore;
    use crate::engine::environment::InstallEnvironment;
    use crate::engine::step::{Step, StepOutcome};
    use crate::repository::catalog::{InstallInfo, UpdateTarget};
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct NoCatalog;

    impl ToolShedCatalog for NoCatalog {
        fn get_repository_install_info(&self, _: &str, _: &str, _: &str, _: &str) -> Result<InstallInfo> {
            Err(CatalogError::InvalidRequest("unknown".into()).into())
        }

        fn get_tool_versions(&self, _: &str, _: &ToolShedRepository) -> Result<Option<Value>> {
            Ok(None)
        }

        fn get_update_to_changeset_revision_and_ctx_rev(
            &self,
            _: &str,
            _: &ToolShedRepository,
        ) -> Result<Option<UpdateTarget>> {
            Ok(Some(UpdateTarget {
                changeset_revision: "new".into(),
                ctx_rev: "9".into(),
            }))
        }
    }

    /// Writes a tool config, and optionally a tool dependency recipe, into
    /// the clone; records pull/update calls.
    #[derive(Default)]
    struct RecordingVcs {
        calls: Arc<Mutex<Vec<String>>>,
        tool_dependencies: Option<&'static str>,
    }

    impl VersionControl for RecordingVcs {
        fn clone_repository(&self, _url: &str, dest: &Path, _ctx_rev: &str) -> std::result::Result<(), String> {
            std::fs::create_dir_all(dest).map_err(|e| e.to_string())?;
            if let Some(recipe) = self.tool_dependencies {
                std::fs::write(dest.join(TOOL_DEPENDENCY_CONFIG), recipe).map_err(|e| e.to_string())?;
            }
            std::fs::write(dest.join("tool.xml"), r#"<tool id="t" name="T" version="1.0"/>"#)
                .map_err(|e| e.to_string())
        }

        fn pull(&self, _: &Path, _: &str, rev: &str) -> std::result::Result<(), String> {
            self.calls.lock().unwrap().push(format!("pull {}", rev));
            Ok(())
        }

        fn update(&self, _: &Path, ctx_rev: &str) -> std::result::Result<(), String> {
            self.calls.lock().unwrap().push(format!("update {}", ctx_rev));
            Ok(())
        }
    }

    struct Noop;

    impl StepExecutor for Noop {
        fn execute_step(&self, dependency: Dependency, _: Step<'_>, _: &mut InstallEnvironment) -> StepOutcome {
            StepOutcome {
                dependency,
                remaining_actions: Vec::new(),
                new_dir: None,
            }
        }
    }

    fn manager(dir: &TempDir, config: InstallerConfig, vcs: RecordingVcs) -> InstallRepositoryManager {
        let store = Arc::new(JsonStatusStore::open(&dir.path().join("state")).unwrap());
        InstallRepositoryManager::new(config, Box::new(NoCatalog), Box::new(vcs), store, Box::new(Noop))
    }

    fn config(dir: &TempDir) -> InstallerConfig {
        InstallerConfig {
            tool_path: dir.path().join("shed_tools"),
            shed_tool_conf: Some("shed_tool_conf.xml".into()),
            ..InstallerConfig::default()
        }
    }

    fn revision() -> Value {
        json!({
            "has_repository_dependencies": false,
            "includes_tools": true,
            "includes_tool_dependencies": false,
            "includes_tools_for_display_in_tool_panel": true
        })
    }

    fn repo_info(name: &str) -> RepoInfoDict {
        RepoInfoDict::from([(
            name.to_string(),
            RepoInfo {
                description: String::new(),
                clone_url: format!("https://shed.org/repos/devteam/{}", name),
                changeset_revision: "abc".into(),
                ctx_rev: "3".into(),
                owner: "devteam".into(),
                repository_dependencies: None,
                tool_dependencies: Vec::new(),
            },
        )])
    }

    #[test]
    fn test_tool_dependencies_need_dependency_dir() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, config(&dir), RecordingVcs::default());
        let options = InstallOptions {
            install_tool_dependencies: true,
            ..Default::default()
        };
        let err = manager
            .install_repositories("https://shed.org", &revision(), vec![repo_info("bwa")], &options)
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ToolDependencyDirNotSet)));
    }

    #[test]
    fn test_shed_tool_conf_is_required() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.migrated_tools_config = config.shed_tool_conf.clone();
        let manager = manager(&dir, config, RecordingVcs::default());

        let err = manager
            .install_repositories("https://shed.org", &revision(), vec![repo_info("bwa")], &InstallOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingParameter("shed_tool_conf"))));
    }

    #[test]
    fn test_missing_descriptor_flag_is_server_error() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, config(&dir), RecordingVcs::default());
        let err = manager
            .install_repositories("https://shed.org", &json!({}), vec![repo_info("bwa")], &InstallOptions::default())
            .unwrap_err();
        assert!(err.is_server_error());
    }

    #[test]
    fn test_installs_then_refuses_reinstall() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, config(&dir), RecordingVcs::default());

        let installed = manager
            .install_repositories("https://shed.org", &revision(), vec![repo_info("bwa")], &InstallOptions::default())
            .unwrap();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].status, RepositoryStatus::Installed);
        assert!(installed[0].metadata.as_ref().unwrap().tools.is_some());
        // Tool versions were missing, which is noted but not fatal.
        assert!(installed[0].error_message.as_deref().unwrap().contains("Version information"));
        assert!(
            dir.path()
                .join("shed_tools/shed.org/repos/devteam/bwa/abc/bwa/tool.xml")
                .exists()
        );

        let err = manager
            .install_repositories("https://shed.org", &revision(), vec![repo_info("bwa")], &InstallOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Catalog(CatalogError::InvalidRequest(_))));
    }

    #[test]
    fn test_reinstall_updates_to_latest_revision() {
        let dir = TempDir::new().unwrap();
        let vcs = RecordingVcs::default();
        let calls = vcs.calls.clone();
        let manager = manager(&dir, config(&dir), vcs);
        let mut repository = ToolShedRepository::new("shed.org", "bwa", "devteam", "abc");
        repository.status = RepositoryStatus::Uninstalled;

        let repository = manager
            .install_tool_shed_repository(repository, &repo_info("bwa"), None, "shed_tool_conf.xml", false, true)
            .unwrap();

        assert_eq!(repository.status, RepositoryStatus::Installed);
        assert_eq!(*calls.lock().unwrap(), vec!["pull new".to_string(), "update 9".to_string()]);
    }

    #[test]
    fn test_stored_dependency_status_survives_final_update() {
        let dir = TempDir::new().unwrap();
        let vcs = RecordingVcs {
            tool_dependencies: Some(
                r#"<tool_dependency>
                    <package name="bwa" version="0.5.9"><install version="1.0"><actions_group>
                        <actions os="plan9" architecture="mips">
                            <action type="download_binary">https://example.org/bwa-plan9.tgz</action>
                        </actions>
                    </actions_group></install></package>
                    <package name="samtools" version="0.1.19"><install version="1.0"><actions>
                        <action type="shell_command">make</action>
                    </actions></install></package>
                </tool_dependency>"#,
            ),
            ..Default::default()
        };
        let mut config = config(&dir);
        config.tool_dependency_dir = Some(dir.path().join("deps"));
        let store = Arc::new(JsonStatusStore::open(&dir.path().join("state")).unwrap());
        let manager = InstallRepositoryManager::new(
            config,
            Box::new(NoCatalog),
            Box::new(vcs),
            store.clone(),
            Box::new(Noop),
        );
        let repository = store
            .create_or_update_repository(ToolShedRepository::new("shed.org", "bwa", "devteam", "abc"))
            .unwrap();

        let repository = manager
            .install_tool_shed_repository(repository, &repo_info("bwa"), None, "shed_tool_conf.xml", true, false)
            .unwrap();

        assert_eq!(repository.status, RepositoryStatus::Installed);
        let stored = store.load_repository(&repository.id).unwrap().unwrap();
        assert_eq!(stored.status, RepositoryStatus::Installed);
        let status = |name: &str| {
            stored
                .tool_dependencies
                .iter()
                .find(|d| d.name == name)
                .map(|d| d.status)
                .unwrap()
        };
        assert_eq!(status("bwa"), DependencyStatus::Error);
        assert_eq!(status("samtools"), DependencyStatus::Installed);
        assert_eq!(stored.tool_dependencies, repository.tool_dependencies);
    }

    #[test]
    fn test_helpers() {
        assert_eq!(shed_url("https://shed.org/repos/devteam/bwa"), "https://shed.org");
        assert_eq!(tool_shed_url_for("shed.org", "http://shed.org/"), "http://shed.org");
        assert_eq!(tool_shed_url_for("other.org", "http://shed.org"), "https://other.org");
        assert_eq!(
            relative_clone_dir("https://shed.org/repos/devteam/bwa", "abc"),
            PathBuf::from("shed.org/repos/devteam/bwa/abc")
        );
    }
}
