//! Installer error types.
//!
//! Failures inside a dependency's recipe never surface here: the
//! interpreter turns them into an `Error` status on the dependency. What
//! remains are the failures that abort an operation outright.

use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the dependency and repository installers.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("status store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the fault lies with the remote catalog rather than with
    /// what the caller asked for.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Error::Catalog(
                CatalogError::Unreachable { .. }
                    | CatalogError::EmptyResponse { .. }
                    | CatalogError::MissingField(_)
                    | CatalogError::InvalidResponse(_)
            )
        )
    }
}

/// Fatal configuration problems: malformed recipes, unsupported schema
/// versions, missing installation parameters.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("malformed recipe document: {0}")]
    MalformedRecipe(String),

    #[error("the <set_environment> tag must have a version attribute with value 1.0 (found {0})")]
    UnsupportedSetEnvironmentVersion(String),

    #[error("the <install> tag must have a version attribute with value 1.0 (found {0})")]
    UnsupportedInstallVersion(String),

    #[error(
        "tool dependencies can be installed automatically only if `tool_dependency_dir` is configured"
    )]
    ToolDependencyDirNotSet,

    #[error("missing required parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("cannot read config file {path}: {message}")]
    InvalidConfigFile { path: PathBuf, message: String },
}

/// Problems talking to the remote tool catalog.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("error retrieving installation information from {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("unable to retrieve installation information from {url}")]
    EmptyResponse { url: String },

    #[error("tool shed response missing required parameter '{0}'")]
    MissingField(&'static str),

    #[error("invalid tool shed response: {0}")]
    InvalidResponse(String),

    /// The request named something the catalog does not know about.
    #[error("{0}")]
    InvalidRequest(String),
}

/// Failure of a single recipe step. Converted to a dependency status by
/// the interpreter; never returned from the public API.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("command failed: {cmd} (exit code: {code:?})")]
    CommandFailed { cmd: String, code: Option<i32> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download failed for {url}: {message}")]
    Download { url: String, message: String },

    #[error("sha256 verification failed: expected {expected}, got {actual}")]
    Sha256Mismatch { expected: String, actual: String },

    #[error("archive extraction failed: {0}")]
    Extract(String),

    #[error("path escapes the working directory: {0}")]
    UnsafePath(String),

    #[error("missing required action parameter: {0}")]
    MissingParameter(String),
}
