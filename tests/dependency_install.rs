//! Tool dependency installation through the public API.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use toolshed_installer::core::model::{DependencyType, tool_dependency_install_dir};
use toolshed_installer::core::{DependencyStatus, JsonStatusStore, StatusStore};
use toolshed_installer::engine::{
    InstallEnvironment, Step, StepExecutor, StepOutcome, install_and_build_package,
};
use toolshed_installer::recipe::{Action, Platform};
use toolshed_installer::{Dependency, InstallToolDependencyManager, StepManager, ToolShedRepository};

/// Records every step it is handed and succeeds unless a command
/// contains "fail".
#[derive(Clone, Default)]
struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl StepExecutor for Recorder {
    fn execute_step(&self, mut dependency: Dependency, step: Step<'_>, _env: &mut InstallEnvironment) -> StepOutcome {
        let label = match step.action {
            Action::DownloadByUrl { url, .. } => format!("download_by_url {}", url),
            Action::ShellCommand { command } => format!("shell_command {}", command),
            other => other.kind().to_string(),
        };
        if label.contains("fail") {
            dependency.mark_error("simulated failure");
        }
        self.calls.lock().unwrap().push(label);
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

struct Fixture {
    _state: TempDir,
    deps: TempDir,
    store: Arc<JsonStatusStore>,
    repository: ToolShedRepository,
}

impl Fixture {
    fn new() -> Self {
        let state = TempDir::new().unwrap();
        let deps = TempDir::new().unwrap();
        let store = Arc::new(JsonStatusStore::open(state.path()).unwrap());
        let repository = ToolShedRepository::new("toolshed.g2.bx.psu.edu", "bwa_wrappers", "devteam", "ffa8aaa14f7c");
        store.save_repository(&repository).unwrap();
        Self {
            _state: state,
            deps,
            store,
            repository,
        }
    }

    fn record(&self, name: &str, version: Option<&str>, dep_type: DependencyType) -> Dependency {
        let install_dir = tool_dependency_install_dir(self.deps.path(), &self.repository, dep_type, name, version);
        Dependency::new(name, version.map(str::to_string), dep_type, install_dir)
    }

    fn manager(&self, executor: Box<dyn StepExecutor>) -> InstallToolDependencyManager {
        InstallToolDependencyManager::new(executor, self.store.clone(), Platform::new("linux", "x86_64"))
    }
}

#[test]
fn test_set_environment_writes_env_file_without_building() {
    let fixture = Fixture::new();
    let recorder = Recorder::default();
    let manager = fixture.manager(Box::new(recorder.clone()));
    let requested = fixture.record("R_SCRIPT_PATH", None, DependencyType::SetEnvironment);
    let recipe = r#"<tool_dependency>
        <set_environment version="1.0">
            <environment_variable name="R_SCRIPT_PATH" action="set_to">$REPOSITORY_INSTALL_DIR</environment_variable>
        </set_environment>
    </tool_dependency>"#;

    let results = manager
        .install_specified(
            &fixture.repository,
            Some(Path::new("/shed/bwa_wrappers")),
            recipe,
            &[requested.clone()],
        )
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, DependencyStatus::Installed);
    assert!(recorder.calls().is_empty());
    let env = std::fs::read_to_string(requested.install_dir.join("env.sh")).unwrap();
    assert_eq!(
        env.trim(),
        "R_SCRIPT_PATH=/shed/bwa_wrappers; export R_SCRIPT_PATH"
    );

    let stored = fixture
        .store
        .load_repository(&fixture.repository.id)
        .unwrap()
        .unwrap();
    assert!(stored.tool_dependencies.iter().any(|d| d.name == "R_SCRIPT_PATH" && d.is_installed()));
}

#[test]
fn test_grouped_recipe_uses_platform_binary_and_skips_source_build() {
    let fixture = Fixture::new();
    let recorder = Recorder::default();
    let manager = fixture.manager(Box::new(recorder.clone()));
    let recipe = r#"<tool_dependency>
        <package name="bwa" version="0.5.9">
            <install version="1.0">
                <actions_group>
                    <actions os="darwin" architecture="x86_64">
                        <action type="download_by_url">https://example.org/bwa-darwin.tgz</action>
                    </actions>
                    <actions os="linux" architecture="x86_64">
                        <action type="download_by_url">https://example.org/bwa-linux.tgz</action>
                        <action type="move_directory_files">
                            <source_directory>.</source_directory>
                            <destination_directory>$INSTALL_DIR/bin</destination_directory>
                        </action>
                    </actions>
                    <actions>
                        <action type="download_by_url">https://example.org/bwa-0.5.9.tar.bz2</action>
                        <action type="shell_command">make</action>
                    </actions>
                    <action type="set_environment">
                        <environment_variable name="PATH" action="prepend_to">$INSTALL_DIR/bin</environment_variable>
                    </action>
                </actions_group>
            </install>
        </package>
    </tool_dependency>"#;

    let results = manager
        .install_specified(
            &fixture.repository,
            None,
            recipe,
            &[fixture.record("bwa", Some("0.5.9"), DependencyType::Package)],
        )
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].is_installed(), "{:?}", results[0].error_message);
    assert_eq!(
        recorder.calls(),
        vec![
            "download_by_url https://example.org/bwa-linux.tgz".to_string(),
            "move_directory_files".to_string(),
            "set_environment".to_string(),
        ]
    );
}

#[test]
fn test_failed_binary_falls_back_to_source_build() {
    let fixture = Fixture::new();
    let recorder = Recorder::default();
    let manager = fixture.manager(Box::new(recorder.clone()));
    let recipe = r#"<tool_dependency>
        <package name="samtools" version="0.1.19">
            <install version="1.0">
                <actions_group>
                    <actions os="linux" architecture="x86_64">
                        <action type="download_by_url">https://example.org/fail-linux.tgz</action>
                    </actions>
                    <actions>
                        <action type="download_by_url">https://example.org/samtools-0.1.19.tar.bz2</action>
                        <action type="shell_command">make</action>
                    </actions>
                </actions_group>
            </install>
        </package>
    </tool_dependency>"#;

    let results = manager
        .install_specified(
            &fixture.repository,
            None,
            recipe,
            &[fixture.record("samtools", Some("0.1.19"), DependencyType::Package)],
        )
        .unwrap();

    assert!(results[0].is_installed(), "{:?}", results[0].error_message);
    assert!(results[0].error_message.is_none());
    assert_eq!(
        recorder.calls(),
        vec![
            "download_by_url https://example.org/fail-linux.tgz".to_string(),
            "download_by_url https://example.org/samtools-0.1.19.tar.bz2".to_string(),
            "shell_command make".to_string(),
        ]
    );
}

#[test]
fn test_walker_runs_download_then_build_steps_in_order() {
    let install = TempDir::new().unwrap();
    let recorder = Recorder::default();
    let mut env = InstallEnvironment::new(install.path().to_path_buf(), None);
    let actions = vec![
        Action::DownloadByUrl {
            url: "https://example.org/hello-1.0.tar.gz".into(),
            target_filename: None,
            sha256: None,
        },
        Action::ShellCommand {
            command: "./configure --prefix=$INSTALL_DIR".into(),
        },
        Action::ShellCommand {
            command: "make install".into(),
        },
    ];
    let dependency = Dependency::new(
        "hello",
        Some("1.0".into()),
        DependencyType::Package,
        install.path().to_path_buf(),
    );

    let result = install_and_build_package(&recorder, dependency, "hello", &actions, &mut env).unwrap();

    assert!(!result.is_error());
    assert_eq!(
        recorder.calls(),
        vec![
            "download_by_url https://example.org/hello-1.0.tar.gz".to_string(),
            "shell_command ./configure --prefix=$INSTALL_DIR".to_string(),
            "shell_command make install".to_string(),
        ]
    );
}

#[test]
fn test_walker_stops_at_first_failing_step() {
    let install = TempDir::new().unwrap();
    let recorder = Recorder::default();
    let mut env = InstallEnvironment::new(install.path().to_path_buf(), None);
    let actions = vec![
        Action::DownloadByUrl {
            url: "https://example.org/hello-1.0.tar.gz".into(),
            target_filename: None,
            sha256: None,
        },
        Action::ShellCommand {
            command: "make fail".into(),
        },
        Action::ShellCommand {
            command: "make install".into(),
        },
    ];
    let dependency = Dependency::new(
        "hello",
        Some("1.0".into()),
        DependencyType::Package,
        install.path().to_path_buf(),
    );

    let result = install_and_build_package(&recorder, dependency, "hello", &actions, &mut env).unwrap();

    assert!(result.is_error());
    assert_eq!(recorder.calls().len(), 2);
}

fn write_tarball(path: &Path) {
    let file = std::fs::File::create(path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let content = b"#!/bin/sh\necho hello\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder
        .append_data(&mut header, "hello-1.0/bin/hello", &content[..])
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap();
}

#[test]
fn test_local_tarball_installs_end_to_end() {
    let fixture = Fixture::new();
    let source = TempDir::new().unwrap();
    let archive: PathBuf = source.path().join("hello-1.0.tar.gz");
    write_tarball(&archive);
    let manager = fixture.manager(Box::new(StepManager::new(std::time::Duration::from_secs(5))));
    let requested = fixture.record("hello", Some("1.0"), DependencyType::Package);
    let recipe = format!(
        r#"<tool_dependency>
        <package name="hello" version="1.0">
            <install version="1.0">
                <actions>
                    <action type="download_by_url">file://{}</action>
                    <action type="move_directory_files">
                        <source_directory>bin</source_directory>
                        <destination_directory>$INSTALL_DIR/bin</destination_directory>
                    </action>
                    <action type="set_environment">
                        <environment_variable name="PATH" action="prepend_to">$INSTALL_DIR/bin</environment_variable>
                    </action>
                </actions>
            </install>
        </package>
    </tool_dependency>"#,
        archive.display()
    );

    let results = manager
        .install_specified(&fixture.repository, None, &recipe, &[requested.clone()])
        .unwrap();

    assert!(results[0].is_installed(), "{:?}", results[0].error_message);
    assert!(requested.install_dir.join("bin/hello").exists());
    let env = std::fs::read_to_string(requested.install_dir.join("env.sh")).unwrap();
    assert_eq!(
        env.trim(),
        format!(
            "PATH={}/bin:$PATH; export PATH",
            requested.install_dir.display()
        )
    );
}
