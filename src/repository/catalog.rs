//! Remote tool shed catalog
//!
//! The catalog answers three questions: what is needed to install a
//! repository revision, which tool versions a revision carries, and which
//! revision an installed repository can be updated to.

use crate::core::error::{CatalogError, Result};
use crate::core::model::{DeclaredDependency, DependencyType, ToolShedRepository};
use crate::recipe::action::as_bool;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Install information keyed by repository name.
pub type RepoInfoDict = BTreeMap<String, RepoInfo>;

/// Queries against a tool shed.
pub trait ToolShedCatalog {
    /// Fetch the revision descriptor and install information for one
    /// repository revision.
    fn get_repository_install_info(
        &self,
        tool_shed_url: &str,
        name: &str,
        owner: &str,
        changeset_revision: &str,
    ) -> Result<InstallInfo>;

    /// Tool version lineage for a revision. `None` when the shed has no
    /// answer.
    fn get_tool_versions(
        &self,
        tool_shed_url: &str,
        repository: &ToolShedRepository,
    ) -> Result<Option<Value>>;

    /// Latest installable revision the repository can be updated to.
    fn get_update_to_changeset_revision_and_ctx_rev(
        &self,
        tool_shed_url: &str,
        repository: &ToolShedRepository,
    ) -> Result<Option<UpdateTarget>>;
}

/// One answer from `get_repository_revision_install_info`.
#[derive(Debug, Clone)]
pub struct InstallInfo {
    /// The raw revision record; validated by the installer.
    pub revision: Value,
    pub repo_info: RepoInfoDict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTarget {
    pub changeset_revision: String,
    pub ctx_rev: String,
}

/// The revision-level flags the installer requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionDescriptor {
    pub has_repository_dependencies: bool,
    pub includes_tools: bool,
    pub includes_tool_dependencies: bool,
    pub includes_tools_for_display_in_tool_panel: bool,
}

impl RevisionDescriptor {
    /// Every key must be present; a missing one is the shed's fault.
    pub fn from_value(value: &Value) -> std::result::Result<Self, CatalogError> {
        let flag = |key: &'static str| -> std::result::Result<bool, CatalogError> {
            value
                .get(key)
                .map(loose_bool)
                .ok_or(CatalogError::MissingField(key))
        };
        Ok(Self {
            has_repository_dependencies: flag("has_repository_dependencies")?,
            includes_tools: flag("includes_tools")?,
            includes_tool_dependencies: flag("includes_tool_dependencies")?,
            includes_tools_for_display_in_tool_panel: flag("includes_tools_for_display_in_tool_panel")?,
        })
    }
}

/// What the shed knows about installing one repository.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoInfo {
    pub description: String,
    pub clone_url: String,
    pub changeset_revision: String,
    pub ctx_rev: String,
    pub owner: String,
    pub repository_dependencies: Option<RepositoryDependencies>,
    pub tool_dependencies: Vec<DeclaredDependency>,
}

impl RepoInfo {
    /// Parse the seven-element install tuple.
    pub fn from_value(value: &Value) -> std::result::Result<Self, CatalogError> {
        let items = value
            .as_array()
            .filter(|items| items.len() >= 7)
            .ok_or_else(|| CatalogError::InvalidResponse("install tuple must have seven elements".into()))?;

        let repository_dependencies = match &items[5] {
            Value::Object(_) => Some(RepositoryDependencies::from_value(&items[5])?),
            _ => None,
        };

        Ok(Self {
            description: text(&items[0]),
            clone_url: text(&items[1]),
            changeset_revision: text(&items[2]),
            ctx_rev: text(&items[3]),
            owner: text(&items[4]),
            repository_dependencies,
            tool_dependencies: declared_tool_dependencies(&items[6]),
        })
    }

    /// Every dependency edge, across all components.
    pub fn repository_dependency_edges(&self) -> impl Iterator<Item = &RepositoryDependency> {
        self.repository_dependencies
            .iter()
            .flat_map(|rd| rd.components.iter())
            .flat_map(|(_, deps)| deps.iter())
    }
}

/// Parse the name-keyed install information dictionary.
pub fn parse_repo_info_dict(value: &Value) -> std::result::Result<RepoInfoDict, CatalogError> {
    let object = value
        .as_object()
        .ok_or_else(|| CatalogError::InvalidResponse("install information must be an object".into()))?;
    object
        .iter()
        .map(|(name, tuple)| Ok((name.clone(), RepoInfo::from_value(tuple)?)))
        .collect()
}

/// Repository dependency tree of one revision.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RepositoryDependencies {
    pub root_key: String,
    pub description: Option<String>,
    /// `(dependent repository key, its dependencies)` in response order.
    pub components: Vec<(String, Vec<RepositoryDependency>)>,
}

impl RepositoryDependencies {
    fn from_value(value: &Value) -> std::result::Result<Self, CatalogError> {
        let mut deps = RepositoryDependencies::default();
        let Some(object) = value.as_object() else {
            return Ok(deps);
        };
        for (key, entry) in object {
            match key.as_str() {
                "root_key" => deps.root_key = text(entry),
                "description" => deps.description = entry.as_str().map(str::to_string),
                _ => {
                    let tuples = entry.as_array().map(Vec::as_slice).unwrap_or_default();
                    let parsed = tuples
                        .iter()
                        .map(RepositoryDependency::from_value)
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    deps.components.push((key.clone(), parsed));
                }
            }
        }
        Ok(deps)
    }
}

/// One edge: the repository a dependent needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryDependency {
    pub tool_shed: String,
    pub name: String,
    pub owner: String,
    pub changeset_revision: String,
    pub prior_installation_required: bool,
    pub only_if_compiling_contained_td: bool,
}

impl RepositoryDependency {
    fn from_value(value: &Value) -> std::result::Result<Self, CatalogError> {
        let items = value
            .as_array()
            .filter(|items| items.len() >= 4)
            .ok_or_else(|| CatalogError::InvalidResponse(format!("bad repository dependency {}", value)))?;
        Ok(Self {
            tool_shed: text(&items[0]),
            name: text(&items[1]),
            owner: text(&items[2]),
            changeset_revision: text(&items[3]),
            prior_installation_required: items.get(4).map(loose_bool).unwrap_or(false),
            only_if_compiling_contained_td: items.get(5).map(loose_bool).unwrap_or(false),
        })
    }

    /// True if the dependent cannot be installed until this one is.
    pub fn must_install_first(&self) -> bool {
        self.prior_installation_required && !self.only_if_compiling_contained_td
    }
}

/// `tool_dependencies` maps `name/version` to a record, except for
/// `set_environment`, which maps to a list of records.
fn declared_tool_dependencies(value: &Value) -> Vec<DeclaredDependency> {
    let Some(object) = value.as_object() else {
        return Vec::new();
    };
    let mut declared = Vec::new();
    for entry in object.values() {
        let records = match entry {
            Value::Array(items) => items.iter().collect::<Vec<_>>(),
            other => vec![other],
        };
        for record in records {
            let Some(name) = record.get("name").and_then(Value::as_str) else {
                continue;
            };
            let Some(dep_type) = record
                .get("type")
                .and_then(Value::as_str)
                .and_then(DependencyType::parse)
            else {
                continue;
            };
            declared.push(DeclaredDependency {
                name: name.to_string(),
                version: record
                    .get("version")
                    .and_then(Value::as_str)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string),
                dep_type,
            });
        }
    }
    declared
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn loose_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => as_bool(s),
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    }
}

/// Catalog reached over HTTP.
pub struct HttpCatalog {
    agent: ureq::Agent,
}

impl HttpCatalog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    /// GET `<tool_shed_url>/<path>` with the usual repository parameters.
    /// An empty body comes back as an empty string.
    fn get(
        &self,
        tool_shed_url: &str,
        path: &str,
        name: &str,
        owner: &str,
        changeset_revision: &str,
    ) -> std::result::Result<String, CatalogError> {
        let url = format!("{}/{}", tool_shed_url.trim_end_matches('/'), path);
        tracing::debug!("GET {} name={} owner={} changeset_revision={}", url, name, owner, changeset_revision);
        let unreachable = |message: String| CatalogError::Unreachable {
            url: url.clone(),
            message,
        };
        let response = self
            .agent
            .get(&url)
            .query("name", name)
            .query("owner", owner)
            .query("changeset_revision", changeset_revision)
            .call()
            .map_err(|e| unreachable(e.to_string()))?;
        response
            .into_string()
            .map_err(|e| unreachable(e.to_string()))
    }
}

impl ToolShedCatalog for HttpCatalog {
    fn get_repository_install_info(
        &self,
        tool_shed_url: &str,
        name: &str,
        owner: &str,
        changeset_revision: &str,
    ) -> Result<InstallInfo> {
        let path = "api/repositories/get_repository_revision_install_info";
        let body = self
            .get(tool_shed_url, path, name, owner, changeset_revision)
            .inspect_err(|e| tracing::warn!("{}", e))?;
        if body.trim().is_empty() {
            let err = CatalogError::EmptyResponse {
                url: format!("{}/{}", tool_shed_url.trim_end_matches('/'), path),
            };
            tracing::warn!("{}", err);
            return Err(err.into());
        }

        let items: Value = serde_json::from_str(&body)
            .map_err(|e| CatalogError::InvalidResponse(e.to_string()))?;
        let revision = items.get(1).cloned().unwrap_or(Value::Null);
        let repo_info = items.get(2).cloned().unwrap_or(Value::Null);

        if is_empty(&revision) || is_empty(&repo_info) {
            return Err(CatalogError::InvalidRequest(format!(
                "No information is available for the requested repository revision.\n\
                 One or more of the following parameter values is likely invalid:\n\
                 tool_shed_url: {}\nname: {}\nowner: {}\nchangeset_revision: {}",
                tool_shed_url, name, owner, changeset_revision
            ))
            .into());
        }

        Ok(InstallInfo {
            revision,
            repo_info: parse_repo_info_dict(&repo_info)?,
        })
    }

    fn get_tool_versions(
        &self,
        tool_shed_url: &str,
        repository: &ToolShedRepository,
    ) -> Result<Option<Value>> {
        let body = self.get(
            tool_shed_url,
            "repository/get_tool_versions",
            &repository.name,
            &repository.owner,
            &repository.changeset_revision,
        )?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        let versions = serde_json::from_str(&body)
            .map_err(|e| CatalogError::InvalidResponse(e.to_string()))?;
        Ok(Some(versions))
    }

    fn get_update_to_changeset_revision_and_ctx_rev(
        &self,
        tool_shed_url: &str,
        repository: &ToolShedRepository,
    ) -> Result<Option<UpdateTarget>> {
        let body = self.get(
            tool_shed_url,
            "repository/get_changeset_revision_and_ctx_rev",
            &repository.name,
            &repository.owner,
            &repository.installed_changeset_revision,
        )?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        let answer: Value = serde_json::from_str(&body)
            .map_err(|e| CatalogError::InvalidResponse(e.to_string()))?;
        let field = |key: &str| answer.get(key).map(text).filter(|s| !s.is_empty());
        Ok(match (field("changeset_revision"), field("ctx_rev")) {
            (Some(changeset_revision), Some(ctx_rev)) => Some(UpdateTarget {
                changeset_revision,
                ctx_rev,
            }),
            _ => None,
        })
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn install_tuple() -> Value {
        json!([
            "BWA wrappers",
            "https://shed.org/repos/devteam/bwa_wrappers",
            "abc123",
            "7",
            "devteam",
            {
                "root_key": "shed.org__ESEP__bwa_wrappers__ESEP__devteam__ESEP__abc123",
                "description": "needs bwa",
                "shed.org__ESEP__bwa_wrappers__ESEP__devteam__ESEP__abc123": [
                    ["shed.org", "package_bwa_0_5_9", "devteam", "def456", "True", "False"],
                    ["shed.org", "datatypes", "iuc", "0a0a0a", "False", "False"]
                ]
            },
            {
                "bwa/0.5.9": {"name": "bwa", "version": "0.5.9", "type": "package"},
                "set_environment": [{"name": "BWA_ROOT", "type": "set_environment"}]
            }
        ])
    }

    #[test]
    fn test_repo_info_parses_install_tuple() {
        let info = RepoInfo::from_value(&install_tuple()).unwrap();
        assert_eq!(info.clone_url, "https://shed.org/repos/devteam/bwa_wrappers");
        assert_eq!(info.ctx_rev, "7");

        let edges: Vec<_> = info.repository_dependency_edges().collect();
        assert_eq!(edges.len(), 2);
        assert!(edges[0].must_install_first());
        assert!(!edges[1].must_install_first());

        assert_eq!(info.tool_dependencies.len(), 2);
        assert!(
            info.tool_dependencies
                .iter()
                .any(|d| d.name == "BWA_ROOT" && d.dep_type == DependencyType::SetEnvironment)
        );
    }

    #[test]
    fn test_short_install_tuple_is_rejected() {
        let err = RepoInfo::from_value(&json!(["only", "three", "items"])).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidResponse(_)));
    }

    #[test]
    fn test_descriptor_requires_every_flag() {
        let err = RevisionDescriptor::from_value(&json!({
            "has_repository_dependencies": false,
            "includes_tools": true,
            "includes_tool_dependencies": "True"
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            CatalogError::MissingField("includes_tools_for_display_in_tool_panel")
        ));
    }

    #[tokio::test]
    async fn test_install_info_from_shed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/repositories/get_repository_revision_install_info"))
            .and(query_param("name", "bwa_wrappers"))
            .and(query_param("owner", "devteam"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "bwa_wrappers"},
                {
                    "has_repository_dependencies": true,
                    "includes_tools": true,
                    "includes_tool_dependencies": true,
                    "includes_tools_for_display_in_tool_panel": true
                },
                {"bwa_wrappers": install_tuple()}
            ])))
            .mount(&server)
            .await;

        let catalog = HttpCatalog::new(Duration::from_secs(5));
        let info = catalog
            .get_repository_install_info(&server.uri(), "bwa_wrappers", "devteam", "abc123")
            .unwrap();

        assert!(RevisionDescriptor::from_value(&info.revision).unwrap().includes_tools);
        assert_eq!(info.repo_info["bwa_wrappers"].owner, "devteam");
    }

    #[tokio::test]
    async fn test_empty_revision_is_a_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{}, {}, {}])))
            .mount(&server)
            .await;

        let catalog = HttpCatalog::new(Duration::from_secs(5));
        let err = catalog
            .get_repository_install_info(&server.uri(), "nope", "devteam", "abc")
            .unwrap_err();

        assert!(matches!(err, Error::Catalog(CatalogError::InvalidRequest(_))));
        assert!(!err.is_server_error());
    }

    #[tokio::test]
    async fn test_empty_body_is_a_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let catalog = HttpCatalog::new(Duration::from_secs(5));
        let err = catalog
            .get_repository_install_info(&server.uri(), "bwa", "devteam", "abc")
            .unwrap_err();
        assert!(err.is_server_error());
    }

    #[tokio::test]
    async fn test_missing_tool_versions_are_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repository/get_tool_versions"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let catalog = HttpCatalog::new(Duration::from_secs(5));
        let repo = ToolShedRepository::new(server.uri(), "bwa", "devteam", "abc");
        assert!(catalog.get_tool_versions(&server.uri(), &repo).unwrap().is_none());
    }
}
