//! Installation records: tool dependencies and tool shed repositories.
//!
//! Both records carry a mutable status. Callers inspect the status after
//! every step rather than relying on propagated errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Installation status of a tool dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyStatus {
    #[serde(rename = "Never installed")]
    New,
    #[serde(rename = "Installing")]
    Installing,
    #[serde(rename = "Installed")]
    Installed,
    #[serde(rename = "Error")]
    Error,
    #[serde(rename = "Uninstalled")]
    Uninstalled,
}

impl fmt::Display for DependencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DependencyStatus::New => "Never installed",
            DependencyStatus::Installing => "Installing",
            DependencyStatus::Installed => "Installed",
            DependencyStatus::Error => "Error",
            DependencyStatus::Uninstalled => "Uninstalled",
        };
        f.write_str(s)
    }
}

/// What a tool dependency provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    Package,
    SetEnvironment,
}

impl DependencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyType::Package => "package",
            DependencyType::SetEnvironment => "set_environment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "package" => Some(DependencyType::Package),
            "set_environment" => Some(DependencyType::SetEnvironment),
            _ => None,
        }
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named, versioned package or environment export required by a
/// repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    /// `None` for set_environment entries, which are versionless.
    pub version: Option<String>,
    #[serde(rename = "type")]
    pub dep_type: DependencyType,
    pub status: DependencyStatus,
    pub error_message: Option<String>,
    pub install_dir: PathBuf,
}

impl Dependency {
    pub fn new(
        name: impl Into<String>,
        version: Option<String>,
        dep_type: DependencyType,
        install_dir: PathBuf,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            dep_type,
            status: DependencyStatus::New,
            error_message: None,
            install_dir,
        }
    }

    /// The `(name, version, type)` identity used to match recipe entries
    /// against requested records.
    pub fn identity(&self) -> (&str, Option<&str>, DependencyType) {
        (&self.name, self.version.as_deref(), self.dep_type)
    }

    pub fn display_version(&self) -> &str {
        self.version.as_deref().unwrap_or("-")
    }

    /// Start a fresh attempt: clears any error left by a previous strategy.
    pub fn begin_attempt(&mut self) {
        self.status = DependencyStatus::Installing;
        self.error_message = None;
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = DependencyStatus::Error;
        self.error_message = Some(message.into());
    }

    /// Promote to `Installed` unless the attempt already ended in a
    /// terminal state. Returns true if the status changed.
    pub fn mark_installed(&mut self) -> bool {
        if matches!(
            self.status,
            DependencyStatus::Error | DependencyStatus::Installed
        ) {
            return false;
        }
        tracing::debug!(
            "changing status for tool dependency {} from {} to {}",
            self.name,
            self.status,
            DependencyStatus::Installed
        );
        self.status = DependencyStatus::Installed;
        self.error_message = None;
        true
    }

    pub fn mark_uninstalled(&mut self) {
        self.status = DependencyStatus::Uninstalled;
        self.error_message = None;
    }

    pub fn is_error(&self) -> bool {
        self.status == DependencyStatus::Error
    }

    pub fn is_installed(&self) -> bool {
        self.status == DependencyStatus::Installed
    }
}

/// Installation status of a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepositoryStatus {
    #[serde(rename = "New")]
    New,
    #[serde(rename = "Cloning")]
    Cloning,
    #[serde(rename = "Setting tool versions")]
    SettingToolVersions,
    #[serde(rename = "Installing repository dependencies")]
    InstallingRepositoryDependencies,
    #[serde(rename = "Installing tool dependencies")]
    InstallingToolDependencies,
    #[serde(rename = "Loading proprietary datatypes")]
    LoadingProprietaryDatatypes,
    #[serde(rename = "Installed")]
    Installed,
    #[serde(rename = "Error")]
    Error,
    #[serde(rename = "Uninstalled")]
    Uninstalled,
}

impl RepositoryStatus {
    /// New and uninstalled repositories may be (re-)installed.
    pub fn is_installable(&self) -> bool {
        matches!(self, RepositoryStatus::New | RepositoryStatus::Uninstalled)
    }
}

impl fmt::Display for RepositoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RepositoryStatus::New => "New",
            RepositoryStatus::Cloning => "Cloning",
            RepositoryStatus::SettingToolVersions => "Setting tool versions",
            RepositoryStatus::InstallingRepositoryDependencies => {
                "Installing repository dependencies"
            }
            RepositoryStatus::InstallingToolDependencies => "Installing tool dependencies",
            RepositoryStatus::LoadingProprietaryDatatypes => "Loading proprietary datatypes",
            RepositoryStatus::Installed => "Installed",
            RepositoryStatus::Error => "Error",
            RepositoryStatus::Uninstalled => "Uninstalled",
        };
        f.write_str(s)
    }
}

/// A dependency declared in a repository's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredDependency {
    pub name: String,
    pub version: Option<String>,
    #[serde(rename = "type")]
    pub dep_type: DependencyType,
}

/// Structured metadata extracted from a cloned repository.
///
/// Tool, data manager and datatype entries are opaque to the installer;
/// they are handed back to the contents handler untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_dependencies: Option<Vec<DeclaredDependency>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_manager: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatypes: Option<Vec<serde_json::Value>>,
}

/// An installable bundle of tools, datatypes and dependencies at one
/// revision of a tool shed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolShedRepository {
    pub id: String,
    pub tool_shed: String,
    pub name: String,
    pub owner: String,
    pub changeset_revision: String,
    pub installed_changeset_revision: String,
    pub status: RepositoryStatus,
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: Option<RepositoryMetadata>,
    #[serde(default)]
    pub tool_dependencies: Vec<Dependency>,
    #[serde(default)]
    pub includes_datatypes: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub uninstalled: bool,
}

impl ToolShedRepository {
    pub fn new(
        tool_shed: impl Into<String>,
        name: impl Into<String>,
        owner: impl Into<String>,
        changeset_revision: impl Into<String>,
    ) -> Self {
        let tool_shed = tool_shed.into();
        let name = name.into();
        let owner = owner.into();
        let changeset_revision = changeset_revision.into();
        Self {
            id: repository_id(&tool_shed, &name, &owner, &changeset_revision),
            tool_shed,
            name,
            owner,
            installed_changeset_revision: changeset_revision.clone(),
            changeset_revision,
            status: RepositoryStatus::New,
            error_message: None,
            metadata: None,
            tool_dependencies: Vec::new(),
            includes_datatypes: false,
            deleted: false,
            uninstalled: false,
        }
    }

    /// True if this record is the repository named by a dependency edge.
    pub fn matches(&self, tool_shed: &str, name: &str, owner: &str, changeset_revision: &str) -> bool {
        strip_protocol(&self.tool_shed) == strip_protocol(tool_shed)
            && self.name == name
            && self.owner == owner
            && (self.changeset_revision == changeset_revision
                || self.installed_changeset_revision == changeset_revision)
    }
}

/// Stable identifier for a repository revision.
pub fn repository_id(tool_shed: &str, name: &str, owner: &str, changeset_revision: &str) -> String {
    format!(
        "{}/repos/{}/{}/{}",
        strip_protocol(tool_shed).trim_end_matches('/'),
        owner,
        name,
        changeset_revision
    )
}

/// Remove an `http://` / `https://` prefix and any `user@` credentials.
pub fn strip_protocol(url: &str) -> &str {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    match rest.find('@') {
        Some(at) if rest[..at].find('/').is_none() => &rest[at + 1..],
        _ => rest,
    }
}

/// Installation directory for one tool dependency of one repository.
///
/// Packages land in `<root>/<name>/<version>/<owner>/<repo>/<revision>`,
/// environment settings in
/// `<root>/environment_settings/<name>/<owner>/<repo>/<revision>`.
pub fn tool_dependency_install_dir(
    root: &Path,
    repository: &ToolShedRepository,
    dep_type: DependencyType,
    name: &str,
    version: Option<&str>,
) -> PathBuf {
    let base = match dep_type {
        DependencyType::Package => root.join(name).join(version.unwrap_or("default")),
        DependencyType::SetEnvironment => root.join("environment_settings").join(name),
    };
    base.join(&repository.owner)
        .join(&repository.name)
        .join(&repository.installed_changeset_revision)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_installed_does_not_override_error() {
        let mut dep = Dependency::new(
            "samtools",
            Some("0.1.19".into()),
            DependencyType::Package,
            PathBuf::from("/tmp/x"),
        );
        dep.begin_attempt();
        dep.mark_error("make failed");
        assert!(!dep.mark_installed());
        assert!(dep.is_error());
        assert_eq!(dep.error_message.as_deref(), Some("make failed"));
    }

    #[test]
    fn test_mark_installed_from_installing() {
        let mut dep = Dependency::new("bwa", Some("0.5.9".into()), DependencyType::Package, PathBuf::new());
        dep.begin_attempt();
        assert!(dep.mark_installed());
        assert!(dep.is_installed());
    }

    #[test]
    fn test_begin_attempt_clears_previous_error() {
        let mut dep = Dependency::new("bwa", Some("0.5.9".into()), DependencyType::Package, PathBuf::new());
        dep.mark_error("binary download failed");
        dep.begin_attempt();
        assert_eq!(dep.status, DependencyStatus::Installing);
        assert!(dep.error_message.is_none());
    }

    #[test]
    fn test_install_dir_layout() {
        let repo = ToolShedRepository::new("https://toolshed.example.org", "bwa_wrappers", "devteam", "abc123");
        let root = Path::new("/deps");

        let pkg = tool_dependency_install_dir(root, &repo, DependencyType::Package, "bwa", Some("0.5.9"));
        assert_eq!(pkg, PathBuf::from("/deps/bwa/0.5.9/devteam/bwa_wrappers/abc123"));

        let env = tool_dependency_install_dir(root, &repo, DependencyType::SetEnvironment, "JAVA_JAR_PATH", None);
        assert_eq!(
            env,
            PathBuf::from("/deps/environment_settings/JAVA_JAR_PATH/devteam/bwa_wrappers/abc123")
        );
    }

    #[test]
    fn test_repository_matches_ignores_protocol() {
        let repo = ToolShedRepository::new("https://toolshed.example.org", "bwa", "devteam", "abc123");
        assert!(repo.matches("http://toolshed.example.org", "bwa", "devteam", "abc123"));
        assert!(!repo.matches("toolshed.example.org", "bwa", "iuc", "abc123"));
        assert_eq!(repo.id, "toolshed.example.org/repos/devteam/bwa/abc123");
    }

    #[test]
    fn test_strip_protocol_removes_credentials() {
        assert_eq!(strip_protocol("https://user@shed.org/repos/a/b"), "shed.org/repos/a/b");
        assert_eq!(strip_protocol("shed.org"), "shed.org");
    }

    #[test]
    fn test_status_serializes_as_display_name() {
        let json = serde_json::to_string(&RepositoryStatus::InstallingToolDependencies).unwrap();
        assert_eq!(json, "\"Installing tool dependencies\"");
        assert!(RepositoryStatus::Uninstalled.is_installable());
        assert!(!RepositoryStatus::Error.is_installable());
    }
}
