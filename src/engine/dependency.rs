//! Tool dependency installer
//!
//! Entry point for installing the tool dependencies of one repository from
//! its `tool_dependencies.xml`. Only the requested records are touched,
//! which lets a caller install a subset of what a recipe declares.

use crate::core::error::{ConfigError, Result};
use crate::core::model::{Dependency, DependencyType, ToolShedRepository};
use crate::core::output;
use crate::core::registry::InstalledRepositoryRegistry;
use crate::core::store::StatusStore;
use crate::engine::environment::{EnvFileBuilder, InstallEnvironment};
use crate::engine::selector::{PackageContext, install_package};
use crate::engine::step::StepExecutor;
use crate::helpers::fs_utils;
use crate::recipe::platform::Platform;
use crate::recipe::tags::{RecipeEntry, read_entries};
use std::path::Path;
use std::sync::Arc;

/// Installs tool dependencies by following recipe documents.
pub struct InstallToolDependencyManager {
    executor: Box<dyn StepExecutor>,
    store: Arc<dyn StatusStore>,
    platform: Platform,
    registry: Option<Arc<dyn InstalledRepositoryRegistry>>,
}

impl InstallToolDependencyManager {
    pub fn new(executor: Box<dyn StepExecutor>, store: Arc<dyn StatusStore>, platform: Platform) -> Self {
        Self {
            executor,
            store,
            platform,
            registry: None,
        }
    }

    /// Report every finished dependency to `registry`.
    pub fn with_registry(mut self, registry: Arc<dyn InstalledRepositoryRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Follow `recipe` to install the `requested` dependencies of
    /// `repository`. Returns the records that ended `Installed` or
    /// `Error`.
    ///
    /// A malformed document or an unsupported `<set_environment>` version
    /// fails the whole call. Anything that goes wrong while installing one
    /// dependency is recorded on that dependency and the rest continue.
    pub fn install_specified(
        &self,
        repository: &ToolShedRepository,
        repository_install_dir: Option<&Path>,
        recipe: &str,
        requested: &[Dependency],
    ) -> Result<Vec<Dependency>> {
        let entries = read_entries(recipe)?;
        let mut known: Vec<Dependency> = requested.to_vec();
        let mut installed = Vec::new();

        let ctx = PackageContext {
            executor: self.executor.as_ref(),
            store: self.store.as_ref(),
            repository,
            repository_install_dir,
            platform: &self.platform,
        };

        for entry in entries.iter().filter(|e| e.is_installable()) {
            let Some((name, version, dep_type)) = entry.identity() else {
                continue;
            };
            let Some(index) = known
                .iter()
                .position(|d| d.identity() == (name, version, dep_type))
            else {
                tracing::debug!("{} {} was not requested; skipping", name, version.unwrap_or("-"));
                continue;
            };

            let dependency = match dep_type {
                DependencyType::SetEnvironment => {
                    self.install_environment_settings(&ctx, entry, known[index].clone())
                }
                DependencyType::Package => {
                    let Some(dependency) = self.begin_package(&ctx, known[index].clone()) else {
                        continue;
                    };
                    known[index] = dependency.clone();
                    self.install_one_package(&ctx, entry, &known, dependency)
                }
            };
            known[index] = dependency.clone();

            if dependency.is_installed() || dependency.is_error() {
                output::status_row(
                    &dependency.name,
                    dependency.display_version(),
                    &dependency.status.to_string(),
                    dependency.is_installed(),
                );
                if let Some(registry) = &self.registry {
                    registry.handle_tool_dependency_install(repository, &dependency);
                }
                installed.push(dependency);
            }
        }
        Ok(installed)
    }

    /// Decide whether a package entry needs work. A package already
    /// installed into a non-empty directory is left alone.
    fn begin_package(&self, ctx: &PackageContext<'_>, mut dependency: Dependency) -> Option<Dependency> {
        if dependency.is_installed() && fs_utils::dir_has_entries(&dependency.install_dir) {
            output::skip(&format!(
                "{} {} already installed",
                dependency.name,
                dependency.display_version()
            ));
            return None;
        }
        dependency.begin_attempt();
        ctx.persist_dependency(&dependency);
        Some(dependency)
    }

    fn install_one_package(
        &self,
        ctx: &PackageContext<'_>,
        entry: &RecipeEntry,
        known: &[Dependency],
        dependency: Dependency,
    ) -> Dependency {
        output::action(&format!(
            "Installing tool dependency {} {}",
            dependency.name,
            dependency.display_version()
        ));
        match install_package(ctx, &entry.element, known) {
            Ok(Some(dependency)) => dependency,
            Ok(None) => {
                let mut dependency = dependency;
                dependency.mark_error("package entry has no matching dependency record");
                ctx.persist_dependency(&dependency);
                dependency
            }
            Err(e) => self.record_failure(ctx, dependency, e),
        }
    }

    fn record_failure(&self, ctx: &PackageContext<'_>, mut dependency: Dependency, e: ConfigError) -> Dependency {
        let message = format!(
            "Error installing tool dependency {} version {}: {}",
            dependency.name,
            dependency.display_version(),
            e
        );
        tracing::error!("{}", message);
        // The install directory is kept for diagnosis.
        dependency.mark_error(message);
        ctx.persist_dependency(&dependency);
        dependency
    }

    /// Environment entries need no build: their mutations go straight to
    /// the dependency's `env.sh`.
    fn install_environment_settings(
        &self,
        ctx: &PackageContext<'_>,
        entry: &RecipeEntry,
        mut dependency: Dependency,
    ) -> Dependency {
        let variables = match entry.environment_variables() {
            Ok(variables) => variables,
            Err(e) => return self.record_failure(ctx, dependency, e),
        };
        let mut env = InstallEnvironment::new(
            dependency.install_dir.clone(),
            ctx.repository_install_dir.map(Path::to_path_buf),
        );
        let expanded = env.add_variables(&variables);
        match EnvFileBuilder::new(&dependency.install_dir).append(&expanded) {
            Ok(()) => {
                dependency.begin_attempt();
                dependency.mark_installed();
            }
            Err(e) => dependency.mark_error(format!(
                "cannot write {} for {}: {}",
                crate::engine::environment::ENV_FILE_NAME,
                dependency.name,
                e
            )),
        }
        ctx.persist_dependency(&dependency);
        dependency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::DependencyStatus;
    use crate::core::store::JsonStatusStore;
    use crate::engine::step::{Step, StepOutcome};
    use crate::recipe::action::Action;
    use tempfile::TempDir;

    struct Succeed;

    impl StepExecutor for Succeed {
        fn execute_step(&self, mut dependency: Dependency, step: Step<'_>, _env: &mut InstallEnvironment) -> StepOutcome {
            if let Action::ShellCommand { command } = step.action
                && command.contains("fail")
            {
                dependency.mark_error("simulated failure");
            }
            StepOutcome {
                dependency,
                remaining_actions: if step.initial_download {
                    step.following.to_vec()
                } else {
                    Vec::new()
                },
                new_dir: None,
            }
        }
    }

    fn setup() -> (TempDir, TempDir, InstallToolDependencyManager, ToolShedRepository) {
        let state = TempDir::new().unwrap();
        let deps = TempDir::new().unwrap();
        let store = Arc::new(JsonStatusStore::open(state.path()).unwrap());
        let repository = ToolShedRepository::new("shed.org", "bwa_wrappers", "devteam", "abc");
        store.save_repository(&repository).unwrap();
        let manager = InstallToolDependencyManager::new(
            Box::new(Succeed),
            store,
            Platform::new("linux", "x86_64"),
        );
        (state, deps, manager, repository)
    }

    fn package(deps: &TempDir, name: &str, version: &str) -> Dependency {
        Dependency::new(
            name,
            Some(version.into()),
            DependencyType::Package,
            deps.path().join(name).join(version),
        )
    }

    #[test]
    fn test_only_requested_entries_are_installed() {
        let (_state, deps, manager, repo) = setup();
        let recipe = r#"<tool_dependency>
            <package name="bwa" version="0.5.9"><install version="1.0"><actions>
                <action type="shell_command">make</action>
            </actions></install></package>
            <package name="samtools" version="0.1.19"><install version="1.0"><actions>
                <action type="shell_command">make</action>
            </actions></install></package>
        </tool_dependency>"#;

        let result = manager
            .install_specified(&repo, None, recipe, &[package(&deps, "samtools", "0.1.19")])
            .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "samtools");
        assert_eq!(result[0].status, DependencyStatus::Installed);
    }

    #[test]
    fn test_failure_does_not_stop_siblings() {
        let (_state, deps, manager, repo) = setup();
        let recipe = r#"<tool_dependency>
            <package name="bwa" version="0.5.9"><install version="1.0"><actions>
                <action type="shell_command">fail</action>
            </actions></install></package>
            <package name="samtools" version="0.1.19"><install version="1.0"><actions>
                <action type="shell_command">make</action>
            </actions></install></package>
        </tool_dependency>"#;

        let result = manager
            .install_specified(
                &repo,
                None,
                recipe,
                &[package(&deps, "bwa", "0.5.9"), package(&deps, "samtools", "0.1.19")],
            )
            .unwrap();

        assert_eq!(result.len(), 2);
        assert!(result[0].is_error());
        assert!(result[0].install_dir.exists());
        assert!(result[1].is_installed());
    }

    #[test]
    fn test_unsupported_install_version_is_recorded_per_dependency() {
        let (_state, deps, manager, repo) = setup();
        let recipe = r#"<tool_dependency>
            <package name="bwa" version="0.5.9"><install version="2.0"/></package>
        </tool_dependency>"#;

        let result = manager
            .install_specified(&repo, None, recipe, &[package(&deps, "bwa", "0.5.9")])
            .unwrap();

        assert!(result[0].is_error());
        assert!(
            result[0]
                .error_message
                .as_deref()
                .unwrap_or_default()
                .starts_with("Error installing tool dependency bwa version 0.5.9")
        );
    }

    #[test]
    fn test_package_without_recipe_for_platform_is_error() {
        let (state, deps, manager, repo) = setup();
        let recipe = r#"<tool_dependency>
            <package name="bwa" version="0.5.9"><install version="1.0"><actions_group>
                <actions os="darwin" architecture="x86_64">
                    <action type="download_binary">https://example.org/bwa-darwin.tgz</action>
                </actions>
            </actions_group></install></package>
        </tool_dependency>"#;

        let result = manager
            .install_specified(&repo, None, recipe, &[package(&deps, "bwa", "0.5.9")])
            .unwrap();

        assert_eq!(result.len(), 1);
        assert!(result[0].is_error());
        assert_eq!(
            result[0].error_message.as_deref(),
            Some("no installation recipe for linux/x86_64")
        );
        let stored = JsonStatusStore::open(state.path())
            .unwrap()
            .load_repository(&repo.id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.tool_dependencies[0].status, DependencyStatus::Error);
    }

    #[test]
    fn test_package_with_only_readme_is_error() {
        let (_state, deps, manager, repo) = setup();
        let recipe = r#"<tool_dependency>
            <package name="bwa" version="0.5.9">
                <readme>Installed with the bwa_package repository.</readme>
            </package>
        </tool_dependency>"#;

        let result = manager
            .install_specified(&repo, None, recipe, &[package(&deps, "bwa", "0.5.9")])
            .unwrap();

        assert_eq!(result.len(), 1);
        assert!(result[0].is_error());
    }

    #[test]
    fn test_bad_set_environment_version_is_fatal() {
        let (_state, _deps, manager, repo) = setup();
        let err = manager
            .install_specified(
                &repo,
                None,
                r#"<tool_dependency><set_environment version="0.9"/></tool_dependency>"#,
                &[],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            crate::core::error::Error::Config(ConfigError::UnsupportedSetEnvironmentVersion(_))
        ));
    }

    #[test]
    fn test_already_installed_package_is_skipped() {
        let (_state, deps, manager, repo) = setup();
        let mut dep = package(&deps, "bwa", "0.5.9");
        dep.status = DependencyStatus::Installed;
        std::fs::create_dir_all(&dep.install_dir).unwrap();
        std::fs::write(dep.install_dir.join("bwa"), "").unwrap();

        let result = manager
            .install_specified(
                &repo,
                None,
                r#"<tool_dependency><package name="bwa" version="0.5.9"><install version="1.0"><actions>
                    <action type="shell_command">fail</action>
                </actions></install></package></tool_dependency>"#,
                &[dep],
            )
            .unwrap();

        assert!(result.is_empty());
    }
}
