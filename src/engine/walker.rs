//! Recipe walker
//!
//! Runs one action list in two phases. The first action, if it is a
//! download or shell command, fetches the package and decides where the
//! build runs; every remaining action then runs in document order until
//! one leaves the dependency in `Error`.

use crate::core::model::Dependency;
use crate::engine::environment::InstallEnvironment;
use crate::engine::step::{Step, StepExecutor};
use crate::recipe::action::Action;
use std::path::{Path, PathBuf};

/// Run `actions` for `dependency` and return its final state.
///
/// The working directory is created here and removed before returning on
/// every path.
pub fn install_and_build_package(
    executor: &dyn StepExecutor,
    mut dependency: Dependency,
    package_name: &str,
    actions: &[Action],
    env: &mut InstallEnvironment,
) -> std::io::Result<Dependency> {
    let Some(first) = actions.first() else {
        return Ok(dependency);
    };

    let tmp = env.make_tmp_dir()?;
    let work_dir = tmp.path().to_path_buf();

    let (build_actions, mut dir): (Vec<Action>, PathBuf) = if first.kind().is_install_action() {
        let outcome = executor.execute_step(
            dependency,
            Step {
                action: first,
                following: &actions[1..],
                package_name,
                work_dir: &work_dir,
                current_dir: &work_dir,
                initial_download: true,
            },
            env,
        );
        dependency = outcome.dependency;
        // Nothing was fetched, so no build action can run.
        if dependency.is_error() {
            return Ok(dependency);
        }
        (
            outcome.remaining_actions,
            outcome.new_dir.unwrap_or_else(|| PathBuf::from(".")),
        )
    } else {
        // Nothing to download: an environment-only recipe runs against
        // the install directory.
        (actions.to_vec(), env.install_dir.clone())
    };

    for action in &build_actions {
        let current_dir = absolute(&work_dir.join(&dir));
        let outcome = executor.execute_step(
            dependency,
            Step {
                action,
                following: &[],
                package_name,
                work_dir: &work_dir,
                current_dir: &current_dir,
                initial_download: false,
            },
            env,
        );
        dependency = outcome.dependency;
        if dependency.is_error() {
            return Ok(dependency);
        }
        if let Some(new_dir) = outcome.new_dir {
            dir = new_dir;
        }
    }

    drop(tmp);
    Ok(dependency)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
