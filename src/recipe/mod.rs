//! Recipe documents: parsing, typed actions and platform matching.

pub mod action;
pub mod platform;
pub mod tags;
pub mod xml;

pub use action::{Action, ActionKind, EnvAction, EnvironmentVariable};
pub use platform::Platform;
pub use tags::{ActionGroup, GroupMember, InstallSection, PackageRecipe, RecipeEntry};
