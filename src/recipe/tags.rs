//! Recipe document structure
//!
//! A `tool_dependencies.xml` root holds `package` entries and
//! `set_environment` wrappers. This module flattens the wrappers, derives
//! each entry's identity, and turns a package's `<install>` block into
//! the action-group sections the platform selector walks.

use crate::core::error::ConfigError;
use crate::core::model::DependencyType;
use crate::recipe::action::{Action, ActionKind, EnvironmentVariable};
use crate::recipe::platform::Platform;
use crate::recipe::xml::{Element, parse_document};

/// Schema version accepted on `<set_environment>` and `<install>`.
pub const SCHEMA_VERSION: &str = "1.0";

/// An ordered run of actions, optionally scoped to one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionGroup {
    pub os: Option<String>,
    pub architecture: Option<String>,
    pub actions: Vec<Action>,
}

impl ActionGroup {
    /// Only groups tagged with both an OS and an architecture are binary
    /// candidates.
    pub fn is_platform_specific(&self) -> bool {
        self.os.is_some() && self.architecture.is_some()
    }

    /// Parse an `<actions>` element. Duplicate `set_environment` actions
    /// are dropped.
    pub fn from_element(elem: &Element) -> Result<Self, ConfigError> {
        let mut actions: Vec<Action> = Vec::new();
        for child in elem.children_named("action") {
            let action = Action::from_element(child)?;
            if action.kind() == ActionKind::SetEnvironment && actions.contains(&action) {
                continue;
            }
            actions.push(action);
        }
        Ok(Self {
            os: elem.get_non_empty("os").map(str::to_string),
            architecture: elem.get_non_empty("architecture").map(str::to_string),
            actions,
        })
    }
}

/// One member of an `<actions_group>`, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupMember {
    /// A platform binary candidate or the source-build fallback.
    Actions(ActionGroup),
    /// A bare `<action>` that runs after whichever path succeeded.
    Action(Action),
}

/// One child of `<install>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSection {
    /// `<actions>` outside an `<actions_group>`: always run, platform
    /// attributes ignored.
    Unconditional(Vec<ActionGroup>),
    /// The members of an `<actions_group>` that apply to this platform.
    Grouped(Vec<GroupMember>),
}

impl InstallSection {
    pub fn in_actions_group(&self) -> bool {
        matches!(self, InstallSection::Grouped(_))
    }
}

/// Parse an `<install>` element into its sections, dropping binary
/// candidates built for other platforms.
pub fn parse_install(install: &Element, platform: &Platform) -> Result<Vec<InstallSection>, ConfigError> {
    let version = install.get("version").unwrap_or(SCHEMA_VERSION);
    if version != SCHEMA_VERSION {
        return Err(ConfigError::UnsupportedInstallVersion(version.to_string()));
    }

    let mut sections = Vec::new();
    for child in &install.children {
        match child.tag.as_str() {
            "actions" => {
                sections.push(InstallSection::Unconditional(vec![ActionGroup::from_element(child)?]));
            }
            "actions_group" => {
                let mut members = Vec::new();
                for sub in &child.children {
                    match sub.tag.as_str() {
                        "actions" => {
                            let group = ActionGroup::from_element(sub)?;
                            if let (Some(os), Some(arch)) = (&group.os, &group.architecture)
                                && !platform.matches(os, arch)
                            {
                                tracing::debug!("skipping binary recipe for {}/{} on {}", os, arch, platform);
                                continue;
                            }
                            members.push(GroupMember::Actions(group));
                        }
                        "action" => members.push(GroupMember::Action(Action::from_element(sub)?)),
                        other => tracing::debug!("ignoring <{}> inside <actions_group>", other),
                    }
                }
                sections.push(InstallSection::Grouped(members));
            }
            other => tracing::debug!("ignoring <{}> inside <install>", other),
        }
    }
    Ok(sections)
}

/// What a `<package>` asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecipe {
    pub sections: Vec<InstallSection>,
    /// `<repository>` children: packages provided by another repository.
    pub repository_references: usize,
}

/// Walk the children of a `<package>` element.
pub fn parse_package(package: &Element, platform: &Platform) -> Result<PackageRecipe, ConfigError> {
    let mut recipe = PackageRecipe {
        sections: Vec::new(),
        repository_references: 0,
    };
    for child in &package.children {
        match child.tag.as_str() {
            "install" => recipe.sections.extend(parse_install(child, platform)?),
            "repository" => {
                tracing::debug!(
                    "package {} refers to repository {}/{}; it is installed with that repository",
                    package.get("name").unwrap_or_default(),
                    child.get("owner").unwrap_or_default(),
                    child.get("name").unwrap_or_default()
                );
                recipe.repository_references += 1;
            }
            "readme" => {}
            other => tracing::debug!("ignoring <{}> inside <package>", other),
        }
    }
    Ok(recipe)
}

/// One top-level recipe entry after `<set_environment>` flattening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeEntry {
    pub name: Option<String>,
    pub version: Option<String>,
    pub dep_type: Option<DependencyType>,
    pub element: Element,
}

impl RecipeEntry {
    fn from_element(element: Element) -> Self {
        let dep_type = match element.get("type") {
            Some(t) => DependencyType::parse(t),
            None if matches!(element.tag.as_str(), "environment_variable" | "set_environment") => {
                Some(DependencyType::SetEnvironment)
            }
            None => Some(DependencyType::Package),
        };
        Self {
            name: element.get_non_empty("name").map(str::to_string),
            version: element.get_non_empty("version").map(str::to_string),
            dep_type,
            element,
        }
    }

    /// A named set_environment entry, or any entry with name and version.
    pub fn is_installable(&self) -> bool {
        match (&self.name, self.dep_type) {
            (Some(_), Some(DependencyType::SetEnvironment)) => true,
            (Some(_), Some(_)) => self.version.is_some(),
            _ => false,
        }
    }

    pub fn identity(&self) -> Option<(&str, Option<&str>, DependencyType)> {
        Some((self.name.as_deref()?, self.version.as_deref(), self.dep_type?))
    }

    /// The variable mutations carried by a set_environment entry.
    pub fn environment_variables(&self) -> Result<Vec<EnvironmentVariable>, ConfigError> {
        let elems: Vec<&Element> = if self.element.tag == "environment_variable" {
            vec![&self.element]
        } else {
            self.element.children_named("environment_variable").collect()
        };
        elems
            .into_iter()
            .map(|e| EnvironmentVariable::from_element(e).map_err(ConfigError::MalformedRecipe))
            .collect()
    }
}

/// Parse a recipe document into its top-level entries.
pub fn read_entries(document: &str) -> Result<Vec<RecipeEntry>, ConfigError> {
    let root = parse_document(document)?;
    let mut entries = Vec::new();
    for elem in root.children {
        if elem.tag == "set_environment" {
            let version = elem.get("version").unwrap_or(SCHEMA_VERSION);
            if version != SCHEMA_VERSION {
                return Err(ConfigError::UnsupportedSetEnvironmentVersion(version.to_string()));
            }
            entries.extend(elem.children.into_iter().map(RecipeEntry::from_element));
        } else {
            entries.push(RecipeEntry::from_element(elem));
        }
    }
    Ok(entries)
}
