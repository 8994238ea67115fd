//! Build-output selection, target resolution and install/launch for
//! Android projects.

pub mod adb;
pub mod builder;
pub mod catalog;
pub mod config;
pub mod emulator;
pub mod error;
mod ids;
pub mod install;
pub mod manifest;
pub mod package;
pub mod resolver;
pub mod retry;
pub mod run;
pub mod target;

#[cfg(test)]
mod testing;

pub use adb::{AdbClient, SystemAdb};
pub use builder::{BuildOptions, BuildResults, BuildType, Builder, OutputLocator, PackageType};
pub use catalog::TargetCatalog;
pub use config::DeployConfig;
pub use emulator::{AvdEmulator, EmulatorImage, EmulatorManager};
pub use error::{DeployError, Result, ToolFailure};
pub use ids::{classify_target_kind, normalize_target_id};
pub use install::{InstallContext, InstallOrchestrator};
pub use resolver::TargetResolver;
pub use run::{RunCoordinator, RunOptions, RunParts};
pub use target::{Arch, ResolvedTarget, Target, TargetKind, TargetSpec};
