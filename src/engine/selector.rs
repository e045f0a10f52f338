//! Platform selector
//!
//! Chooses how a package gets installed. Outside an `<actions_group>`
//! every action list runs. Inside one, members are tried in document
//! order as installation strategies: platform binaries until one
//! installs, then the source build if none did. Bare trailing actions run
//! whenever the dependency is not in error.

use crate::core::error::ConfigError;
use crate::core::lock::acquire_install_lock;
use crate::core::model::{Dependency, ToolShedRepository};
use crate::core::output;
use crate::core::store::StatusStore;
use crate::engine::environment::InstallEnvironment;
use crate::engine::step::StepExecutor;
use crate::engine::walker::install_and_build_package;
use crate::helpers::fs_utils;
use crate::recipe::action::Action;
use crate::recipe::platform::Platform;
use crate::recipe::tags::{self, ActionGroup, GroupMember, InstallSection};
use crate::recipe::xml::Element;
use std::path::{Path, PathBuf};

/// Collaborators shared by every package of one repository.
pub struct PackageContext<'a> {
    pub executor: &'a dyn StepExecutor,
    pub store: &'a dyn StatusStore,
    pub repository: &'a ToolShedRepository,
    /// Clone directory of the repository, exposed to recipes as
    /// `$REPOSITORY_INSTALL_DIR`.
    pub repository_install_dir: Option<&'a Path>,
    pub platform: &'a Platform,
}

impl PackageContext<'_> {
    pub(crate) fn persist_dependency(&self, dependency: &Dependency) {
        if let Err(e) = self.store.save_dependency(&self.repository.id, dependency) {
            tracing::warn!(
                "cannot persist status of tool dependency {}: {}",
                dependency.name,
                e
            );
        }
    }
}

/// One member of an `<actions_group>`, classified.
enum Strategy<'g> {
    /// Prebuilt binary for this platform.
    Binary(&'g ActionGroup),
    /// Build from source; only if no binary installed.
    Source(&'g ActionGroup),
    /// Runs after whichever strategy won.
    Trailing(&'g Action),
}

impl<'g> From<&'g GroupMember> for Strategy<'g> {
    fn from(member: &'g GroupMember) -> Self {
        match member {
            GroupMember::Actions(group) if group.is_platform_specific() => Strategy::Binary(group),
            GroupMember::Actions(group) => Strategy::Source(group),
            GroupMember::Action(action) => Strategy::Trailing(action),
        }
    }
}

/// Install the package described by `package`, a `<package>` element.
///
/// The dependency record is located in `known` by exact name and version.
/// Returns `Ok(None)` if no record matches.
pub fn install_package(
    ctx: &PackageContext<'_>,
    package: &Element,
    known: &[Dependency],
) -> Result<Option<Dependency>, ConfigError> {
    let (Some(name), Some(version)) = (package.get_non_empty("name"), package.get_non_empty("version"))
    else {
        return Ok(None);
    };
    let Some(mut dependency) = known
        .iter()
        .find(|d| d.name == name && d.version.as_deref() == Some(version))
        .cloned()
    else {
        return Ok(None);
    };

    let recipe = tags::parse_package(package, ctx.platform)?;
    let install_dir = dependency.install_dir.clone();
    let mut attempted = false;

    for section in &recipe.sections {
        // A failed section is final for this attempt.
        if dependency.is_error() {
            break;
        }
        match section {
            InstallSection::Unconditional(groups) => {
                // Platform attributes are ignored outside an actions_group.
                for group in groups {
                    if dependency.is_error() {
                        break;
                    }
                    attempted = true;
                    dependency = install_via_actions(ctx, dependency, &install_dir, name, &group.actions);
                    if !dependency.is_error() {
                        tracing::debug!(
                            "tool dependency {} version {} has been installed in {}",
                            name,
                            version,
                            install_dir.display()
                        );
                    }
                }
            }
            InstallSection::Grouped(members) => {
                let (next, ran) = run_strategies(ctx, dependency, &install_dir, name, members);
                dependency = next;
                attempted |= ran;
            }
        }
    }

    if !attempted {
        dependency.mark_error(format!("no installation recipe for {}", ctx.platform));
        tracing::error!(
            "tool dependency {} version {}: {}",
            name,
            version,
            dependency.error_message.as_deref().unwrap_or_default()
        );
        ctx.persist_dependency(&dependency);
    }
    Ok(Some(dependency))
}

/// Try the members of one `<actions_group>`. Returns the dependency and
/// whether any member ran.
fn run_strategies(
    ctx: &PackageContext<'_>,
    mut dependency: Dependency,
    install_dir: &Path,
    package_name: &str,
    members: &[GroupMember],
) -> (Dependency, bool) {
    let mut binary_installed = false;
    // Set once a binary candidate fails; only that failure may be retried.
    let mut binary_failed = false;
    let mut ran = false;

    for member in members {
        match Strategy::from(member) {
            Strategy::Binary(group) => {
                if binary_installed || (dependency.is_error() && !binary_failed) {
                    continue;
                }
                ran = true;
                dependency.begin_attempt();
                dependency = install_via_actions(ctx, dependency, install_dir, package_name, &group.actions);
                if dependency.is_installed() {
                    binary_installed = true;
                } else {
                    binary_failed = true;
                    tracing::debug!(
                        "error downloading binary for tool dependency {} version {}: {}",
                        package_name,
                        dependency.display_version(),
                        dependency.error_message.as_deref().unwrap_or_default()
                    );
                }
            }
            Strategy::Source(group) => {
                if binary_installed
                    || (dependency.is_error() && !binary_failed)
                    || !clear_failed_binary(ctx, &mut dependency, install_dir)
                {
                    continue;
                }
                tracing::debug!(
                    "proceeding with install and compile recipe for tool dependency {}",
                    dependency.name
                );
                ran = true;
                binary_failed = false;
                dependency.begin_attempt();
                dependency = install_via_actions(ctx, dependency, install_dir, package_name, &group.actions);
            }
            Strategy::Trailing(action) => {
                if dependency.is_error() {
                    continue;
                }
                ran = true;
                dependency = install_via_actions(
                    ctx,
                    dependency,
                    install_dir,
                    package_name,
                    std::slice::from_ref(action),
                );
            }
        }
    }
    (dependency, ran)
}

/// Empty the install directory left behind by a failed binary attempt.
/// Returns false if the directory could not be cleared.
fn clear_failed_binary(ctx: &PackageContext<'_>, dependency: &mut Dependency, install_dir: &Path) -> bool {
    if !fs_utils::dir_has_entries(install_dir) {
        return true;
    }
    match fs_utils::remove_dir_if_exists(install_dir) {
        Ok(()) => {
            dependency.mark_uninstalled();
            ctx.persist_dependency(dependency);
            true
        }
        Err(e) => {
            tracing::debug!(
                "error removing old files from installation directory {}: {}",
                install_dir.display(),
                e
            );
            false
        }
    }
}

/// Run one action list for `dependency` under its install lock, then
/// finalize and persist the status.
pub fn install_via_actions(
    ctx: &PackageContext<'_>,
    mut dependency: Dependency,
    install_dir: &Path,
    package_name: &str,
    actions: &[Action],
) -> Dependency {
    if let Err(e) = std::fs::create_dir_all(install_dir) {
        dependency.mark_error(format!("cannot create {}: {}", install_dir.display(), e));
        ctx.persist_dependency(&dependency);
        return dependency;
    }
    let _lock = match acquire_install_lock(install_dir) {
        Ok(lock) => lock,
        Err(e) => {
            dependency.mark_error(e.to_string());
            ctx.persist_dependency(&dependency);
            return dependency;
        }
    };

    let mut env = InstallEnvironment::new(
        install_dir.to_path_buf(),
        ctx.repository_install_dir.map(PathBuf::from),
    );
    let name = dependency.name.clone();
    let version = dependency.display_version().to_string();
    dependency = match install_and_build_package(ctx.executor, dependency.clone(), package_name, actions, &mut env) {
        Ok(dependency) => dependency,
        Err(e) => {
            tracing::error!("error installing tool dependency {} version {}: {}", name, version, e);
            dependency.mark_error(e.to_string());
            dependency
        }
    };

    if dependency.mark_installed() {
        output::detail(&format!("{} {} installed", dependency.name, version));
    }
    ctx.persist_dependency(&dependency);
    dependency
}
