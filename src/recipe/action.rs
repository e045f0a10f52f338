//! Typed recipe actions
//!
//! Every `<action type="...">` element becomes one variant of [`Action`].
//! Parameters are captured verbatim; `$INSTALL_DIR` and friends are
//! expanded when the step runs, against that attempt's environment.

use crate::core::error::ConfigError;
use crate::recipe::xml::Element;
use std::fmt;
use thiserror::Error;

/// A recipe element that could not be turned into an action.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid <action type=\"{action_type}\">: {message}")]
pub struct ActionParseError {
    pub action_type: String,
    pub message: String,
}

impl From<ActionParseError> for ConfigError {
    fn from(err: ActionParseError) -> Self {
        ConfigError::MalformedRecipe(err.to_string())
    }
}

/// How an environment variable is changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvAction {
    SetTo,
    PrependTo,
    AppendTo,
}

impl EnvAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "set_to" => Some(EnvAction::SetTo),
            "prepend_to" => Some(EnvAction::PrependTo),
            "append_to" => Some(EnvAction::AppendTo),
            _ => None,
        }
    }
}

/// One `<environment_variable>` mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentVariable {
    pub name: String,
    pub action: EnvAction,
    pub value: String,
}

impl EnvironmentVariable {
    pub fn from_element(elem: &Element) -> Result<Self, String> {
        let name = elem
            .get_non_empty("name")
            .ok_or("environment_variable requires a name attribute")?;
        let action = elem.get("action").unwrap_or("set_to");
        let action = EnvAction::parse(action)
            .ok_or_else(|| format!("unsupported environment_variable action '{}'", action))?;
        Ok(Self {
            name: name.to_string(),
            action,
            value: elem.text().to_string(),
        })
    }
}

/// Discriminant of [`Action`], named as in recipe documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    DownloadBinary,
    DownloadByUrl,
    DownloadFile,
    ShellCommand,
    SetupPerlEnvironment,
    SetupREnvironment,
    SetupRubyEnvironment,
    SetEnvironment,
    ChangeDirectory,
    MakeDirectory,
    MoveFile,
    MoveDirectoryFiles,
    Chmod,
    Autoconf,
    MakeInstall,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::DownloadBinary => "download_binary",
            ActionKind::DownloadByUrl => "download_by_url",
            ActionKind::DownloadFile => "download_file",
            ActionKind::ShellCommand => "shell_command",
            ActionKind::SetupPerlEnvironment => "setup_perl_environment",
            ActionKind::SetupREnvironment => "setup_r_environment",
            ActionKind::SetupRubyEnvironment => "setup_ruby_environment",
            ActionKind::SetEnvironment => "set_environment",
            ActionKind::ChangeDirectory => "change_directory",
            ActionKind::MakeDirectory => "make_directory",
            ActionKind::MoveFile => "move_file",
            ActionKind::MoveDirectoryFiles => "move_directory_files",
            ActionKind::Chmod => "chmod",
            ActionKind::Autoconf => "autoconf",
            ActionKind::MakeInstall => "make_install",
        }
    }

    /// Kinds allowed to act as a recipe's initial download step.
    pub fn is_install_action(&self) -> bool {
        matches!(
            self,
            ActionKind::DownloadBinary
                | ActionKind::DownloadByUrl
                | ActionKind::DownloadFile
                | ActionKind::ShellCommand
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recipe step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Fetch a prebuilt archive and unpack it into the install directory.
    DownloadBinary {
        url: String,
        target_directory: Option<String>,
        sha256: Option<String>,
    },
    /// Fetch a source archive into the work directory and unpack it.
    DownloadByUrl {
        url: String,
        target_filename: Option<String>,
        sha256: Option<String>,
    },
    /// Fetch a single file, optionally unpacking it.
    DownloadFile {
        url: String,
        target_filename: Option<String>,
        extract: bool,
        sha256: Option<String>,
    },
    ShellCommand {
        command: String,
    },
    SetupPerlEnvironment {
        packages: Vec<String>,
    },
    SetupREnvironment {
        packages: Vec<String>,
    },
    SetupRubyEnvironment {
        gems: Vec<String>,
    },
    SetEnvironment {
        variables: Vec<EnvironmentVariable>,
    },
    ChangeDirectory {
        directory: String,
    },
    MakeDirectory {
        directory: String,
    },
    MoveFile {
        source: String,
        destination: String,
        rename_to: Option<String>,
    },
    MoveDirectoryFiles {
        source_directory: String,
        destination_directory: String,
    },
    Chmod {
        files: Vec<(String, u32)>,
    },
    Autoconf {
        options: Option<String>,
    },
    MakeInstall {
        options: Option<String>,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::DownloadBinary { .. } => ActionKind::DownloadBinary,
            Action::DownloadByUrl { .. } => ActionKind::DownloadByUrl,
            Action::DownloadFile { .. } => ActionKind::DownloadFile,
            Action::ShellCommand { .. } => ActionKind::ShellCommand,
            Action::SetupPerlEnvironment { .. } => ActionKind::SetupPerlEnvironment,
            Action::SetupREnvironment { .. } => ActionKind::SetupREnvironment,
            Action::SetupRubyEnvironment { .. } => ActionKind::SetupRubyEnvironment,
            Action::SetEnvironment { .. } => ActionKind::SetEnvironment,
            Action::ChangeDirectory { .. } => ActionKind::ChangeDirectory,
            Action::MakeDirectory { .. } => ActionKind::MakeDirectory,
            Action::MoveFile { .. } => ActionKind::MoveFile,
            Action::MoveDirectoryFiles { .. } => ActionKind::MoveDirectoryFiles,
            Action::Chmod { .. } => ActionKind::Chmod,
            Action::Autoconf { .. } => ActionKind::Autoconf,
            Action::MakeInstall { .. } => ActionKind::MakeInstall,
        }
    }

    pub fn shell(command: impl Into<String>) -> Self {
        Action::ShellCommand {
            command: command.into(),
        }
    }

    /// Parse one `<action>` element.
    pub fn from_element(elem: &Element) -> Result<Self, ActionParseError> {
        let action_type = elem.get("type").unwrap_or_default();
        let fail = |message: &str| ActionParseError {
            action_type: action_type.to_string(),
            message: message.to_string(),
        };
        let text = || -> Result<String, ActionParseError> {
            let t = elem.text();
            if t.is_empty() {
                Err(fail("element text is empty"))
            } else {
                Ok(t.to_string())
            }
        };
        let attr = |key: &str| elem.get_non_empty(key).map(str::to_string);
        let sha256 = || attr("sha256sum").or_else(|| attr("sha256"));
        let child_texts = |tag: &str| -> Vec<String> {
            elem.children_named(tag)
                .map(|c| c.text().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        };

        let action = match action_type {
            "download_binary" => Action::DownloadBinary {
                url: text()?,
                target_directory: attr("target_directory"),
                sha256: sha256(),
            },
            "download_by_url" => Action::DownloadByUrl {
                url: text()?,
                target_filename: attr("target_filename"),
                sha256: sha256(),
            },
            "download_file" => Action::DownloadFile {
                url: text()?,
                target_filename: attr("target_filename"),
                extract: elem.get("extract").map(as_bool).unwrap_or(false),
                sha256: sha256(),
            },
            "shell_command" => Action::ShellCommand { command: text()? },
            "setup_perl_environment" => Action::SetupPerlEnvironment {
                packages: child_texts("package"),
            },
            "setup_r_environment" => Action::SetupREnvironment {
                packages: child_texts("package"),
            },
            "setup_ruby_environment" => Action::SetupRubyEnvironment {
                gems: child_texts("package"),
            },
            "set_environment" => {
                let variables = elem
                    .children_named("environment_variable")
                    .map(EnvironmentVariable::from_element)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|m| fail(&m))?;
                if variables.is_empty() {
                    return Err(fail("no <environment_variable> children"));
                }
                Action::SetEnvironment { variables }
            }
            "change_directory" => Action::ChangeDirectory { directory: text()? },
            "make_directory" => Action::MakeDirectory { directory: text()? },
            "move_file" => Action::MoveFile {
                source: elem
                    .child("source")
                    .map(|c| c.text().to_string())
                    .ok_or_else(|| fail("missing <source>"))?,
                destination: elem
                    .child("destination")
                    .map(|c| c.text().to_string())
                    .ok_or_else(|| fail("missing <destination>"))?,
                rename_to: attr("rename_to"),
            },
            "move_directory_files" => Action::MoveDirectoryFiles {
                source_directory: elem
                    .child("source_directory")
                    .map(|c| c.text().to_string())
                    .ok_or_else(|| fail("missing <source_directory>"))?,
                destination_directory: elem
                    .child("destination_directory")
                    .map(|c| c.text().to_string())
                    .ok_or_else(|| fail("missing <destination_directory>"))?,
            },
            "chmod" => {
                let files = elem
                    .children_named("file")
                    .map(|f| {
                        let mode = f.get("mode").unwrap_or("755");
                        u32::from_str_radix(mode, 8)
                            .map(|m| (f.text().to_string(), m))
                            .map_err(|_| fail(&format!("invalid mode '{}'", mode)))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Action::Chmod { files }
            }
            "autoconf" => Action::Autoconf {
                options: Some(elem.text().to_string()).filter(|t| !t.is_empty()),
            },
            "make_install" => Action::MakeInstall {
                options: Some(elem.text().to_string()).filter(|t| !t.is_empty()),
            },
            "" => return Err(fail("missing type attribute")),
            _ => return Err(fail("unsupported action type")),
        };
        Ok(action)
    }
}

/// Parse the loose booleans recipes use ("true", "True", "yes", "1").
pub fn as_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "on" | "1"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::xml::parse_document;

    fn parse(xml: &str) -> Result<Action, ActionParseError> {
        Action::from_element(&parse_document(xml).unwrap())
    }

    #[test]
    fn test_parse_download_by_url_with_checksum() {
        let action = parse(
            r#"<action type="download_by_url" sha256sum="abc">https://example.org/bwa-0.5.9.tar.bz2</action>"#,
        )
        .unwrap();
        assert_eq!(
            action,
            Action::DownloadByUrl {
                url: "https://example.org/bwa-0.5.9.tar.bz2".into(),
                target_filename: None,
                sha256: Some("abc".into()),
            }
        );
        assert!(action.kind().is_install_action());
    }

    #[test]
    fn test_parse_set_environment() {
        let action = parse(
            r#"<action type="set_environment">
                <environment_variable name="PATH" action="prepend_to">$INSTALL_DIR/bin</environment_variable>
                <environment_variable name="BWA_ROOT" action="set_to">$INSTALL_DIR</environment_variable>
            </action>"#,
        )
        .unwrap();
        match action {
            Action::SetEnvironment { variables } => {
                assert_eq!(variables.len(), 2);
                assert_eq!(variables[0].action, EnvAction::PrependTo);
                assert_eq!(variables[1].value, "$INSTALL_DIR");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_setup_actions_are_not_install_actions() {
        let action = parse(
            r#"<action type="setup_perl_environment"><package>XML::Parser</package></action>"#,
        )
        .unwrap();
        assert_eq!(action.kind(), ActionKind::SetupPerlEnvironment);
        assert!(!action.kind().is_install_action());
    }

    #[test]
    fn test_parse_chmod_modes() {
        let action = parse(
            r#"<action type="chmod"><file mode="750">$INSTALL_DIR/bin/tool</file></action>"#,
        )
        .unwrap();
        assert_eq!(
            action,
            Action::Chmod {
                files: vec![("$INSTALL_DIR/bin/tool".into(), 0o750)]
            }
        );
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = parse(r#"<action type="launch_rocket">now</action>"#).unwrap_err();
        assert_eq!(err.action_type, "launch_rocket");
    }

    #[test]
    fn test_shell_command_requires_text() {
        assert!(parse(r#"<action type="shell_command"/>"#).is_err());
    }

    #[test]
    fn test_as_bool() {
        assert!(as_bool("True"));
        assert!(as_bool(" yes "));
        assert!(!as_bool("false"));
        assert!(!as_bool(""));
    }
}
