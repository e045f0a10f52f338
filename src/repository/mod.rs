//! Tool shed repositories: catalog access, ordering, installation and the
//! merged dependency views shown for an install.

pub mod catalog;
pub mod collaborators;
pub mod containers;
pub mod installer;
pub mod orderer;

pub use catalog::{HttpCatalog, InstallInfo, RepoInfo, RepoInfoDict, RevisionDescriptor, ToolShedCatalog};
pub use collaborators::{
    ContentsHandler, DiskMetadataExtractor, GitVcs, MetadataExtractor, StandaloneContents,
    VersionControl,
};
pub use containers::{ContainerMerger, ContainersDict, Folder};
pub use installer::{InstallOptions, InstallRepositoryManager};
pub use orderer::{OrderedComponents, order_components_for_installation};
