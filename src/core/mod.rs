//! Records, errors, configuration and the other pieces every layer shares.

pub mod config;
pub mod error;
pub mod lock;
pub mod model;
pub mod output;
pub mod registry;
pub mod store;

pub use config::InstallerConfig;
pub use error::{CatalogError, ConfigError, Error, Result, StepError};
pub use model::{
    DeclaredDependency, Dependency, DependencyStatus, DependencyType, RepositoryMetadata,
    RepositoryStatus, ToolShedRepository,
};
pub use registry::{InMemoryRegistry, InstalledRepositoryRegistry};
pub use store::{JsonStatusStore, StatusStore};
