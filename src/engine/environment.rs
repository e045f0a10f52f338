//! Per-attempt install environment and the `env.sh` activation script.

use crate::recipe::action::{EnvAction, EnvironmentVariable};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Name of the activation script written into an install directory.
pub const ENV_FILE_NAME: &str = "env.sh";

const TMP_DIR_PREFIX: &str = "tmp-toolshed-mtd";

/// Context for one run of a recipe: where it installs, the repository it
/// belongs to, and the environment mutations accumulated so far.
#[derive(Debug, Clone)]
pub struct InstallEnvironment {
    pub install_dir: PathBuf,
    pub repository_install_dir: Option<PathBuf>,
    pub tmp_work_dir: Option<PathBuf>,
    variables: Vec<EnvironmentVariable>,
}

impl InstallEnvironment {
    pub fn new(install_dir: PathBuf, repository_install_dir: Option<PathBuf>) -> Self {
        Self {
            install_dir,
            repository_install_dir,
            tmp_work_dir: None,
            variables: Vec::new(),
        }
    }

    /// Create the scoped working directory for this attempt. The directory
    /// is removed when the returned handle drops.
    pub fn make_tmp_dir(&mut self) -> io::Result<TempDir> {
        let dir = tempfile::Builder::new().prefix(TMP_DIR_PREFIX).tempdir()?;
        self.tmp_work_dir = Some(dir.path().to_path_buf());
        Ok(dir)
    }

    /// Substitute `$INSTALL_DIR`, `$REPOSITORY_INSTALL_DIR` and
    /// `$TMP_WORK_DIR` (with or without braces). Only whole variable
    /// names match; anything else is left as written.
    pub fn expand(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        let mut rest = value;
        while let Some(start) = rest.find('$') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let (name, consumed) = match after.strip_prefix('{') {
                Some(braced) => match braced.find('}') {
                    Some(end) => (&braced[..end], end + 2),
                    None => ("", 0),
                },
                None => {
                    let end = after
                        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                        .unwrap_or(after.len());
                    (&after[..end], end)
                }
            };
            match self.lookup(name) {
                Some(path) if consumed > 0 => {
                    out.push_str(&path.display().to_string());
                    rest = &after[consumed..];
                }
                _ => {
                    out.push('$');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }

    fn lookup(&self, name: &str) -> Option<&Path> {
        match name {
            "INSTALL_DIR" => Some(self.install_dir.as_path()),
            "REPOSITORY_INSTALL_DIR" => self.repository_install_dir.as_deref(),
            "TMP_WORK_DIR" => self.tmp_work_dir.as_deref(),
            _ => None,
        }
    }

    /// Record environment mutations with their values expanded.
    pub fn add_variables(&mut self, variables: &[EnvironmentVariable]) -> Vec<EnvironmentVariable> {
        let expanded: Vec<EnvironmentVariable> = variables
            .iter()
            .map(|v| EnvironmentVariable {
                name: v.name.clone(),
                action: v.action,
                value: self.expand(&v.value),
            })
            .collect();
        for var in &expanded {
            if !self.variables.contains(var) {
                self.variables.push(var.clone());
            }
        }
        expanded
    }

    pub fn variables(&self) -> &[EnvironmentVariable] {
        &self.variables
    }

    /// Environment passed to shell commands: the well-known directories,
    /// `NPROC`, then every accumulated mutation applied over the process
    /// environment.
    pub fn shell_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("INSTALL_DIR".to_string(), self.install_dir.display().to_string()),
            ("NPROC".to_string(), num_cpus::get().to_string()),
        ];
        if let Some(dir) = &self.repository_install_dir {
            env.push(("REPOSITORY_INSTALL_DIR".into(), dir.display().to_string()));
        }
        if let Some(dir) = &self.tmp_work_dir {
            env.push(("TMP_WORK_DIR".into(), dir.display().to_string()));
        }

        let mut resolved: BTreeMap<&str, String> = BTreeMap::new();
        for var in &self.variables {
            let current = resolved
                .get(var.name.as_str())
                .cloned()
                .or_else(|| std::env::var(&var.name).ok())
                .unwrap_or_default();
            let value = match var.action {
                EnvAction::SetTo => var.value.clone(),
                EnvAction::PrependTo if current.is_empty() => var.value.clone(),
                EnvAction::PrependTo => format!("{}:{}", var.value, current),
                EnvAction::AppendTo if current.is_empty() => var.value.clone(),
                EnvAction::AppendTo => format!("{}:{}", current, var.value),
            };
            resolved.insert(&var.name, value);
        }
        env.extend(resolved.into_iter().map(|(k, v)| (k.to_string(), v)));
        env
    }
}

/// Appends environment mutations to `<install_dir>/env.sh`, one shell
/// statement per mutation, skipping lines already present.
#[derive(Debug, Clone)]
pub struct EnvFileBuilder {
    install_dir: PathBuf,
}

impl EnvFileBuilder {
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.install_dir.join(ENV_FILE_NAME)
    }

    /// Shell statement for one mutation.
    pub fn line_for(var: &EnvironmentVariable) -> String {
        let name = &var.name;
        match var.action {
            EnvAction::SetTo => format!("{}={}; export {}", name, var.value, name),
            EnvAction::PrependTo => format!("{}={}:${}; export {}", name, var.value, name, name),
            EnvAction::AppendTo => format!("{}=${}:{}; export {}", name, name, var.value, name),
        }
    }

    pub fn append(&self, variables: &[EnvironmentVariable]) -> io::Result<()> {
        std::fs::create_dir_all(&self.install_dir)?;
        let path = self.path();
        let existing = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };
        let mut seen: Vec<String> = existing.lines().map(str::to_string).collect();

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        for var in variables {
            let line = Self::line_for(var);
            if seen.contains(&line) {
                continue;
            }
            writeln!(file, "{}", line)?;
            seen.push(line);
        }
        Ok(())
    }
}
