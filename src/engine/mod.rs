//! Recipe execution: step interpreter, walker, platform selector and the
//! tool dependency installer built on them.

pub mod dependency;
pub mod environment;
pub mod selector;
pub mod step;
pub mod walker;

pub use dependency::InstallToolDependencyManager;
pub use environment::{EnvFileBuilder, InstallEnvironment};
pub use selector::{PackageContext, install_package, install_via_actions};
pub use step::{Step, StepExecutor, StepManager, StepOutcome};
pub use walker::install_and_build_package;
