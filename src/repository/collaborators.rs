//! Collaborators the repository installer drives but does not own:
//! version control, metadata extraction, and the host application's
//! handling of repository contents.

use crate::core::model::{DeclaredDependency, RepositoryMetadata, ToolShedRepository};
use crate::core::output::{self, ProgressGuard};
use crate::recipe::tags::read_entries;
use crate::recipe::xml::parse_document;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use walkdir::WalkDir;

pub const TOOL_DEPENDENCY_CONFIG: &str = "tool_dependencies.xml";
pub const DATATYPES_CONFIG: &str = "datatypes_conf.xml";
pub const DATA_MANAGER_CONFIG: &str = "data_manager_conf.xml";

/// Clone, pull and update a repository working copy.
pub trait VersionControl {
    /// Clone `url` into `dest` at `ctx_rev` (or the default head when empty).
    fn clone_repository(&self, url: &str, dest: &Path, ctx_rev: &str) -> Result<(), String>;

    fn pull(&self, repo_dir: &Path, url: &str, changeset_revision: &str) -> Result<(), String>;

    fn update(&self, repo_dir: &Path, ctx_rev: &str) -> Result<(), String>;
}

/// Version control through the `git` command line.
#[derive(Debug, Clone, Default)]
pub struct GitVcs;

impl GitVcs {
    fn run(&self, args: &[&str]) -> Result<(), String> {
        let output = Command::new("git")
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| format!("failed to run git: {}", e))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!("git {} failed\nDetails: {}", args.first().unwrap_or(&""), stderr.trim()))
    }
}

impl VersionControl for GitVcs {
    fn clone_repository(&self, url: &str, dest: &Path, ctx_rev: &str) -> Result<(), String> {
        let dest_str = dest
            .to_str()
            .ok_or("destination path contains invalid UTF-8")?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }

        output::detail(&format!("git clone {}", url));
        let _guard = ProgressGuard(output::spinner(&format!("cloning {}", url)));
        self.run(&["clone", "--quiet", url, dest_str])?;
        if !ctx_rev.is_empty() {
            self.update(dest, ctx_rev)?;
        }
        Ok(())
    }

    fn pull(&self, repo_dir: &Path, url: &str, changeset_revision: &str) -> Result<(), String> {
        let dir = repo_dir.to_string_lossy();
        self.run(&["-C", &dir, "fetch", "--quiet", url, changeset_revision])
    }

    fn update(&self, repo_dir: &Path, ctx_rev: &str) -> Result<(), String> {
        let dir = repo_dir.to_string_lossy();
        self.run(&["-C", &dir, "checkout", "--quiet", ctx_rev])
    }
}

/// Produces the metadata record of a freshly cloned repository.
pub trait MetadataExtractor {
    fn generate_metadata(
        &self,
        repository: &ToolShedRepository,
        install_dir: &Path,
    ) -> Result<RepositoryMetadata, String>;
}

/// Reads metadata straight from the files in the clone.
#[derive(Debug, Clone, Default)]
pub struct DiskMetadataExtractor;

impl MetadataExtractor for DiskMetadataExtractor {
    fn generate_metadata(
        &self,
        _repository: &ToolShedRepository,
        install_dir: &Path,
    ) -> Result<RepositoryMetadata, String> {
        let mut metadata = RepositoryMetadata::default();
        let mut tools = Vec::new();
        let mut sample_files = Vec::new();

        for entry in walk_files(install_dir) {
            let rel = relative(install_dir, &entry);
            let Some(file_name) = entry.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match file_name {
                TOOL_DEPENDENCY_CONFIG => {
                    let text = std::fs::read_to_string(&entry).map_err(|e| e.to_string())?;
                    metadata.tool_dependencies = Some(declared_dependencies(&text)?);
                }
                DATATYPES_CONFIG => {
                    metadata.datatypes = Some(vec![json!({ "config": rel })]);
                }
                DATA_MANAGER_CONFIG => {
                    metadata.data_manager = Some(json!({ "config": rel }));
                }
                name if name.ends_with(".sample") => sample_files.push(rel),
                name if name.ends_with(".xml") => {
                    if let Some(tool) = tool_record(&entry, &rel) {
                        tools.push(tool);
                    }
                }
                _ => {}
            }
        }

        if !tools.is_empty() {
            metadata.tools = Some(tools);
        }
        if !sample_files.is_empty() {
            sample_files.sort();
            metadata.sample_files = Some(sample_files);
        }
        Ok(metadata)
    }
}

fn declared_dependencies(text: &str) -> Result<Vec<DeclaredDependency>, String> {
    let entries = read_entries(text).map_err(|e| e.to_string())?;
    Ok(entries
        .iter()
        .filter(|e| e.is_installable())
        .filter_map(|e| e.identity())
        .map(|(name, version, dep_type)| DeclaredDependency {
            name: name.to_string(),
            version: version.map(str::to_string),
            dep_type,
        })
        .collect())
}

/// A tool config is any XML document whose root is `<tool>`.
fn tool_record(path: &Path, rel: &str) -> Option<Value> {
    let text = std::fs::read_to_string(path).ok()?;
    let root = parse_document(&text).ok()?;
    if root.tag != "tool" {
        return None;
    }
    Some(json!({
        "id": root.get("id").unwrap_or_default(),
        "name": root.get("name").unwrap_or_default(),
        "version": root.get("version").unwrap_or("1.0.0"),
        "tool_config": rel,
    }))
}

/// Files under `dir`, skipping version-control bookkeeping.
fn walk_files(dir: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !matches!(e.file_name().to_str(), Some(".git" | ".hg")))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
}

fn relative(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}

/// Locate a configuration file anywhere in a clone.
pub fn find_config_file(name: &str, dir: &Path) -> Option<PathBuf> {
    walk_files(dir).find(|p| p.file_name().and_then(|n| n.to_str()) == Some(name))
}

/// What the host application does with a repository's contents.
///
/// Every hook defaults to doing nothing, so a host only overrides what it
/// supports.
pub trait ContentsHandler {
    /// True if the tool panel has a section with this id.
    fn has_tool_panel_section(&self, _section_id: &str) -> bool {
        false
    }

    /// Resolve (or create) the panel section new tools go into.
    fn handle_tool_panel_section(&self, section_id: &str, new_section_label: &str) -> Option<String> {
        if !section_id.is_empty() {
            return Some(section_id.to_string());
        }
        if new_section_label.is_empty() {
            return None;
        }
        Some(format!(
            "section_{}",
            new_section_label.to_lowercase().replace(' ', "_")
        ))
    }

    fn install_sample_files(
        &self,
        _repository: &ToolShedRepository,
        _install_dir: &Path,
        _sample_files: &[String],
        _tool_path: &Path,
    ) -> Result<(), String> {
        Ok(())
    }

    fn add_to_tool_panel(
        &self,
        _repository: &ToolShedRepository,
        _tools: &[Value],
        _section: Option<&str>,
        _shed_tool_conf: &str,
    ) -> Result<(), String> {
        Ok(())
    }

    fn install_data_managers(&self, _repository: &ToolShedRepository, _data_manager: &Value) -> Result<(), String> {
        Ok(())
    }

    fn load_datatypes(
        &self,
        _repository: &ToolShedRepository,
        _install_dir: &Path,
        _datatypes: &[Value],
    ) -> Result<(), String> {
        Ok(())
    }

    fn handle_tool_versions(&self, _repository: &ToolShedRepository, _versions: &Value) -> Result<(), String> {
        Ok(())
    }
}

/// Standalone contents handling: copies sample files into
/// `<tool_path>/tool-data` and logs the rest.
#[derive(Debug, Clone, Default)]
pub struct StandaloneContents;

impl ContentsHandler for StandaloneContents {
    fn install_sample_files(
        &self,
        repository: &ToolShedRepository,
        install_dir: &Path,
        sample_files: &[String],
        tool_path: &Path,
    ) -> Result<(), String> {
        let data_dir = tool_path.join("tool-data");
        std::fs::create_dir_all(&data_dir).map_err(|e| e.to_string())?;
        for sample in sample_files {
            let src = install_dir.join(sample);
            let Some(name) = src.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let target = data_dir.join(name.trim_end_matches(".sample"));
            if target.exists() {
                continue;
            }
            std::fs::copy(&src, &target).map_err(|e| format!("{}: {}", src.display(), e))?;
            tracing::debug!("{}: copied {} to {}", repository.name, sample, target.display());
        }
        Ok(())
    }

    fn add_to_tool_panel(
        &self,
        repository: &ToolShedRepository,
        tools: &[Value],
        section: Option<&str>,
        shed_tool_conf: &str,
    ) -> Result<(), String> {
        tracing::info!(
            "{}: {} tool(s) registered in {} (section {})",
            repository.name,
            tools.len(),
            shed_tool_conf,
            section.unwrap_or("none")
        );
        Ok(())
    }
}
