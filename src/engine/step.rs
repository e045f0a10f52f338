//! Recipe step interpreter
//!
//! One call runs one [`Action`] against the attempt's working directory.
//! Failures never escape: they are written to the dependency as an
//! `Error` status and the walker inspects it after every step.

use crate::core::error::StepError;
use crate::core::model::Dependency;
use crate::core::output;
use crate::engine::environment::{EnvFileBuilder, InstallEnvironment};
use crate::helpers::download::{Downloader, download_target};
use crate::helpers::{extract, fs_utils, shell};
use crate::recipe::action::{Action, EnvAction, EnvironmentVariable};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Inputs for one step.
#[derive(Debug, Clone, Copy)]
pub struct Step<'a> {
    pub action: &'a Action,
    /// Actions after `action` in the recipe; returned as the build list
    /// when `action` is the initial download.
    pub following: &'a [Action],
    pub package_name: &'a str,
    pub work_dir: &'a Path,
    pub current_dir: &'a Path,
    pub initial_download: bool,
}

/// What a step hands back to the walker.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub dependency: Dependency,
    /// The build-phase actions; only populated by an initial download.
    pub remaining_actions: Vec<Action>,
    /// Directory, relative to the working directory or absolute, that
    /// later steps run in. `None` keeps the previous one.
    pub new_dir: Option<PathBuf>,
}

/// Executes recipe steps.
pub trait StepExecutor {
    fn execute_step(
        &self,
        dependency: Dependency,
        step: Step<'_>,
        env: &mut InstallEnvironment,
    ) -> StepOutcome;
}

type StepResult = Result<(Vec<Action>, Option<PathBuf>), StepError>;

/// The step executor that touches the network, filesystem and shell.
pub struct StepManager {
    downloader: Downloader,
}

impl StepManager {
    pub fn new(http_timeout: Duration) -> Self {
        Self {
            downloader: Downloader::new(http_timeout),
        }
    }

    fn run(&self, step: &Step<'_>, env: &mut InstallEnvironment) -> StepResult {
        let dir = if step.initial_download {
            step.work_dir
        } else {
            step.current_dir
        };

        match step.action {
            Action::DownloadBinary {
                url,
                target_directory,
                sha256,
            } => {
                let url = env.expand(url);
                let archive = download_target(dir, &url, None);
                self.downloader.fetch(&url, &archive, sha256.as_deref())?;
                let dest = match target_directory {
                    Some(t) => env.install_dir.join(env.expand(t)),
                    None => env.install_dir.clone(),
                };
                if extract::is_archive(&archive.to_string_lossy()) {
                    extract::extract(&archive, &dest)?;
                } else {
                    let name = archive.file_name().unwrap_or_default();
                    fs_utils::move_path(&archive, &dest.join(name))?;
                }
                Ok(initial_result(step, Some(PathBuf::from("."))))
            }

            Action::DownloadByUrl {
                url,
                target_filename,
                sha256,
            } => {
                let url = env.expand(url);
                let archive = download_target(dir, &url, target_filename.as_deref());
                self.downloader.fetch(&url, &archive, sha256.as_deref())?;
                let new_dir = self.unpack_in_place(&archive, dir)?;
                Ok(initial_result(step, Some(new_dir)))
            }

            Action::DownloadFile {
                url,
                target_filename,
                extract: unpack,
                sha256,
            } => {
                let url = env.expand(url);
                let file = download_target(dir, &url, target_filename.as_deref());
                self.downloader.fetch(&url, &file, sha256.as_deref())?;
                let new_dir = if *unpack {
                    self.unpack_in_place(&file, dir)?
                } else {
                    PathBuf::from(".")
                };
                Ok(initial_result(step, Some(new_dir)))
            }

            Action::ShellCommand { command } => {
                let command = env.expand(command);
                output::detail(&command);
                shell::run_in(dir, &command, &env.shell_env())?;
                let new_dir = if step.work_dir.join(step.package_name).is_dir() {
                    PathBuf::from(step.package_name)
                } else {
                    PathBuf::from(".")
                };
                Ok(initial_result(step, Some(new_dir)))
            }

            Action::SetupPerlEnvironment { packages } => {
                let install_dir = env.install_dir.display().to_string();
                for package in packages {
                    let cmd = format!(
                        "cpanm --notest --local-lib={} {}",
                        shell::quote(&install_dir),
                        shell::quote(&env.expand(package))
                    );
                    shell::run_in(dir, &cmd, &env.shell_env())?;
                }
                self.export(
                    env,
                    &[
                        prepend("PERL5LIB", "$INSTALL_DIR/lib/perl5"),
                        prepend("PATH", "$INSTALL_DIR/bin"),
                    ],
                )?;
                Ok(initial_result(step, None))
            }

            Action::SetupREnvironment { packages } => {
                let install_dir = env.install_dir.display().to_string();
                for package in packages {
                    let package = env.expand(package);
                    let source = if package.contains("://") {
                        let target = download_target(dir, &package, None);
                        self.downloader.fetch(&package, &target, None)?;
                        target.display().to_string()
                    } else {
                        package
                    };
                    let cmd = format!(
                        "R CMD INSTALL --library={} {}",
                        shell::quote(&install_dir),
                        shell::quote(&source)
                    );
                    shell::run_in(dir, &cmd, &env.shell_env())?;
                }
                self.export(env, &[prepend("R_LIBS", "$INSTALL_DIR")])?;
                Ok(initial_result(step, None))
            }

            Action::SetupRubyEnvironment { gems } => {
                let install_dir = env.install_dir.display().to_string();
                for gem in gems {
                    let gem = env.expand(gem);
                    let spec = match gem.split_once('=') {
                        Some((name, version)) => {
                            format!("{} -v {}", shell::quote(name), shell::quote(version))
                        }
                        None => shell::quote(&gem),
                    };
                    let cmd = format!(
                        "gem install --no-document --install-dir {} {}",
                        shell::quote(&install_dir),
                        spec
                    );
                    shell::run_in(dir, &cmd, &env.shell_env())?;
                }
                self.export(
                    env,
                    &[
                        prepend("GEM_PATH", "$INSTALL_DIR"),
                        prepend("PATH", "$INSTALL_DIR/bin"),
                    ],
                )?;
                Ok(initial_result(step, None))
            }

            Action::SetEnvironment { variables } => {
                self.export(env, variables)?;
                Ok((Vec::new(), None))
            }

            Action::ChangeDirectory { directory } => {
                let target = extract::normalize_lexical(&dir.join(env.expand(directory)));
                if !target.starts_with(extract::normalize_lexical(dir)) {
                    return Err(StepError::UnsafePath(directory.clone()));
                }
                if !target.is_dir() {
                    return Err(StepError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("change_directory target {} does not exist", target.display()),
                    )));
                }
                Ok((Vec::new(), Some(target)))
            }

            Action::MakeDirectory { directory } => {
                std::fs::create_dir_all(dir.join(env.expand(directory)))?;
                Ok((Vec::new(), None))
            }

            Action::MoveFile {
                source,
                destination,
                rename_to,
            } => {
                let source = dir.join(env.expand(source));
                let file_name = match rename_to {
                    Some(name) => name.clone().into(),
                    None => source
                        .file_name()
                        .map(|n| n.to_os_string())
                        .ok_or_else(|| StepError::MissingParameter("move_file source".into()))?,
                };
                let dest = dir.join(env.expand(destination)).join(file_name);
                fs_utils::move_path(&source, &dest)?;
                Ok((Vec::new(), None))
            }

            Action::MoveDirectoryFiles {
                source_directory,
                destination_directory,
            } => {
                fs_utils::move_directory_files(
                    &dir.join(env.expand(source_directory)),
                    &dir.join(env.expand(destination_directory)),
                )?;
                Ok((Vec::new(), None))
            }

            Action::Chmod { files } => {
                for (file, mode) in files {
                    fs_utils::set_mode(&dir.join(env.expand(file)), *mode)?;
                }
                Ok((Vec::new(), None))
            }

            Action::Autoconf { options } => {
                let options = options.as_deref().map(|o| env.expand(o)).unwrap_or_default();
                let configure = if options.contains("--prefix") {
                    format!("./configure {}", options)
                } else {
                    format!(
                        "./configure --prefix={} {}",
                        shell::quote(&env.install_dir.display().to_string()),
                        options
                    )
                };
                let cmd = format!("{} && make && make install", configure.trim_end());
                shell::run_in(dir, &cmd, &env.shell_env())?;
                Ok((Vec::new(), None))
            }

            Action::MakeInstall { options } => {
                let options = options.as_deref().map(|o| env.expand(o)).unwrap_or_default();
                let cmd = format!("make {0} && make install {0}", options);
                shell::run_in(dir, cmd.trim_end(), &env.shell_env())?;
                Ok((Vec::new(), None))
            }
        }
    }

    /// Extract `file` into `dir` if it is an archive. Returns the directory
    /// later steps should run in: the archive's single top-level directory
    /// if it has one, else `dir` itself.
    fn unpack_in_place(&self, file: &Path, dir: &Path) -> Result<PathBuf, StepError> {
        if !extract::is_archive(&file.to_string_lossy()) {
            return Ok(PathBuf::from("."));
        }
        let staging = tempfile::Builder::new().prefix(".extract").tempdir_in(dir)?;
        extract::extract(file, staging.path())?;

        let top = extract::single_top_level_dir(staging.path());
        fs_utils::move_directory_files(staging.path(), dir)?;
        Ok(match top.as_deref().and_then(Path::file_name) {
            Some(name) => PathBuf::from(name),
            None => PathBuf::from("."),
        })
    }

    fn export(
        &self,
        env: &mut InstallEnvironment,
        variables: &[EnvironmentVariable],
    ) -> Result<(), StepError> {
        let expanded = env.add_variables(variables);
        EnvFileBuilder::new(&env.install_dir).append(&expanded)?;
        Ok(())
    }
}

impl StepExecutor for StepManager {
    fn execute_step(
        &self,
        mut dependency: Dependency,
        step: Step<'_>,
        env: &mut InstallEnvironment,
    ) -> StepOutcome {
        tracing::debug!(
            "{} {}: {}",
            dependency.name,
            dependency.display_version(),
            step.action.kind()
        );
        match self.run(&step, env) {
            Ok((remaining_actions, new_dir)) => StepOutcome {
                dependency,
                remaining_actions,
                new_dir,
            },
            Err(e) => {
                let message = format!("{} failed: {}", step.action.kind(), e);
                tracing::error!("{} {}: {}", dependency.name, dependency.display_version(), message);
                dependency.mark_error(message);
                StepOutcome {
                    dependency,
                    remaining_actions: Vec::new(),
                    new_dir: None,
                }
            }
        }
    }
}

/// An initial download hands back everything after it and the directory
/// it produced; a build step keeps the previous directory.
fn initial_result(step: &Step<'_>, dir: Option<PathBuf>) -> (Vec<Action>, Option<PathBuf>) {
    if step.initial_download {
        (step.following.to_vec(), dir.or_else(|| Some(PathBuf::from("."))))
    } else {
        (Vec::new(), None)
    }
}

fn prepend(name: &str, value: &str) -> EnvironmentVariable {
    EnvironmentVariable {
        name: name.to_string(),
        action: EnvAction::PrependTo,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{DependencyStatus, DependencyType};

    fn dependency(install_dir: &Path) -> Dependency {
        let mut dep = Dependency::new(
            "hello",
            Some("1.0".into()),
            DependencyType::Package,
            install_dir.to_path_buf(),
        );
        dep.begin_attempt();
        dep
    }

    fn step<'a>(action: &'a Action, following: &'a [Action], work_dir: &'a Path, initial: bool) -> Step<'a> {
        Step {
            action,
            following,
            package_name: "hello",
            work_dir,
            current_dir: work_dir,
            initial_download: initial,
        }
    }

    #[test]
    fn test_initial_shell_command_returns_following_actions() {
        let work = tempfile::tempdir().unwrap();
        let install = tempfile::tempdir().unwrap();
        let mut env = InstallEnvironment::new(install.path().to_path_buf(), None);
        let first = Action::shell("mkdir hello");
        let rest = vec![Action::shell("true")];

        let outcome = StepManager::new(Duration::from_secs(5)).execute_step(
            dependency(install.path()),
            step(&first, &rest, work.path(), true),
            &mut env,
        );

        assert_eq!(outcome.dependency.status, DependencyStatus::Installing);
        assert_eq!(outcome.remaining_actions, rest);
        assert_eq!(outcome.new_dir, Some(PathBuf::from("hello")));
    }

    #[test]
    fn test_failed_command_marks_error() {
        let work = tempfile::tempdir().unwrap();
        let install = tempfile::tempdir().unwrap();
        let mut env = InstallEnvironment::new(install.path().to_path_buf(), None);
        let action = Action::shell("exit 2");

        let outcome = StepManager::new(Duration::from_secs(5)).execute_step(
            dependency(install.path()),
            step(&action, &[], work.path(), false),
            &mut env,
        );

        assert!(outcome.dependency.is_error());
        assert!(
            outcome
                .dependency
                .error_message
                .as_deref()
                .unwrap_or_default()
                .contains("shell_command")
        );
        assert!(outcome.new_dir.is_none());
    }

    #[test]
    fn test_shell_sees_install_dir() {
        let work = tempfile::tempdir().unwrap();
        let install = tempfile::tempdir().unwrap();
        let mut env = InstallEnvironment::new(install.path().to_path_buf(), None);
        let action = Action::shell("touch \"$INSTALL_DIR/marker\"");

        let outcome = StepManager::new(Duration::from_secs(5)).execute_step(
            dependency(install.path()),
            step(&action, &[], work.path(), false),
            &mut env,
        );

        assert!(!outcome.dependency.is_error());
        assert!(install.path().join("marker").exists());
    }

    #[test]
    fn test_change_directory_stays_inside_current_dir() {
        let work = tempfile::tempdir().unwrap();
        std::fs::create_dir(work.path().join("src")).unwrap();
        let install = tempfile::tempdir().unwrap();
        let mut env = InstallEnvironment::new(install.path().to_path_buf(), None);
        let manager = StepManager::new(Duration::from_secs(5));

        let into = Action::ChangeDirectory {
            directory: "src".into(),
        };
        let outcome = manager.execute_step(
            dependency(install.path()),
            step(&into, &[], work.path(), false),
            &mut env,
        );
        assert_eq!(outcome.new_dir, Some(work.path().join("src")));

        let escape = Action::ChangeDirectory {
            directory: "../..".into(),
        };
        let outcome = manager.execute_step(
            dependency(install.path()),
            step(&escape, &[], work.path(), false),
            &mut env,
        );
        assert!(outcome.dependency.is_error());
    }

    #[test]
    fn test_set_environment_writes_env_file() {
        let work = tempfile::tempdir().unwrap();
        let install = tempfile::tempdir().unwrap();
        let mut env = InstallEnvironment::new(install.path().to_path_buf(), None);
        let action = Action::SetEnvironment {
            variables: vec![prepend("PATH", "$INSTALL_DIR/bin")],
        };

        let outcome = StepManager::new(Duration::from_secs(5)).execute_step(
            dependency(install.path()),
            step(&action, &[], work.path(), false),
            &mut env,
        );

        assert!(!outcome.dependency.is_error());
        assert!(outcome.new_dir.is_none());
        let text = std::fs::read_to_string(install.path().join("env.sh")).unwrap();
        assert_eq!(
            text.trim(),
            format!("PATH={}/bin:$PATH; export PATH", install.path().display())
        );
    }

    #[test]
    fn test_download_by_url_unpacks_and_enters_top_dir() {
        let work = tempfile::tempdir().unwrap();
        let install = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        let archive = source.path().join("hello-1.0.tar.gz");
        {
            let file = std::fs::File::create(&archive).unwrap();
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);
            let content = b"all:\n";
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "hello-1.0/Makefile", &content[..])
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }
        let mut env = InstallEnvironment::new(install.path().to_path_buf(), None);
        let action = Action::DownloadByUrl {
            url: format!("file://{}", archive.display()),
            target_filename: None,
            sha256: None,
        };

        let outcome = StepManager::new(Duration::from_secs(5)).execute_step(
            dependency(install.path()),
            step(&action, &[], work.path(), true),
            &mut env,
        );

        assert!(!outcome.dependency.is_error(), "{:?}", outcome.dependency.error_message);
        assert_eq!(outcome.new_dir, Some(PathBuf::from("hello-1.0")));
        assert!(work.path().join("hello-1.0/Makefile").exists());
    }
}
