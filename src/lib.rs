//! Recipe-driven installer for tool shed repositories and their tool
//! dependencies.
//!
//! A repository's `tool_dependencies.xml` is a recipe: an ordered list of
//! `<package>` and `<set_environment>` entries, each package carrying the
//! actions that fetch and build it. The installer walks those actions in
//! document order, picks a prebuilt binary for the current platform when
//! the recipe offers one, and falls back to a source build otherwise.
//! Every dependency ends `Installed` or `Error`; one failure never stops
//! its siblings.
//!
//! # Example Recipe
//!
//! ```xml
//! <tool_dependency>
//!     <package name="bwa" version="0.5.9">
//!         <install version="1.0">
//!             <actions_group>
//!                 <actions os="linux" architecture="x86_64">
//!                     <action type="download_by_url">https://example.org/bwa-0.5.9-linux.tgz</action>
//!                     <action type="move_directory_files">
//!                         <source_directory>.</source_directory>
//!                         <destination_directory>$INSTALL_DIR/bin</destination_directory>
//!                     </action>
//!                 </actions>
//!                 <actions>
//!                     <action type="download_by_url">https://example.org/bwa-0.5.9.tar.bz2</action>
//!                     <action type="shell_command">make</action>
//!                 </actions>
//!                 <action type="set_environment">
//!                     <environment_variable name="PATH" action="prepend_to">$INSTALL_DIR/bin</environment_variable>
//!                 </action>
//!             </actions_group>
//!         </install>
//!     </package>
//! </tool_dependency>
//! ```
//!
//! # Layers
//!
//! - [`recipe`]: document parsing, typed actions, platform matching
//! - [`engine`]: step interpreter, recipe walker, platform selector and
//!   the tool dependency installer
//! - [`repository`]: catalog client, installation order, repository
//!   installer and merged display containers
//! - [`core`]: records, errors, configuration, status store, output
//!
//! # Variables Available to Actions
//!
//! - `INSTALL_DIR` - Installation directory of the dependency
//! - `REPOSITORY_INSTALL_DIR` - Clone directory of the owning repository
//! - `TMP_WORK_DIR` - Scratch directory removed after the recipe runs
//! - `NPROC` - Number of CPUs

pub mod core;
pub mod engine;
pub mod helpers;
pub mod recipe;
pub mod repository;

pub use core::output;
pub use core::{Dependency, DependencyStatus, Error, InstallerConfig, Result, ToolShedRepository};
pub use engine::{InstallToolDependencyManager, StepManager};
pub use repository::{InstallOptions, InstallRepositoryManager};
