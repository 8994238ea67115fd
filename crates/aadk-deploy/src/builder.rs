use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::adb::AdbClient;
use crate::error::{DeployError, Result};
use crate::package::{self, matches_build_type};
use crate::target::Arch;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildType {
    #[default]
    Debug,
    Release,
}

impl BuildType {
    pub fn label(self) -> &'static str {
        match self {
            BuildType::Debug => "debug",
            BuildType::Release => "release",
        }
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    #[default]
    Apk,
    Bundle,
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PackageType::Apk => "apk",
            PackageType::Bundle => "bundle",
        })
    }
}

impl FromStr for PackageType {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "apk" => Ok(PackageType::Apk),
            "bundle" | "aab" => Ok(PackageType::Bundle),
            other => Err(format!("unknown package type: {other}")),
        }
    }
}

/// Packages produced by one build invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildResults {
    apk_paths: Vec<PathBuf>,
    build_type: BuildType,
}

impl BuildResults {
    pub fn new(apk_paths: Vec<PathBuf>, build_type: BuildType) -> Self {
        Self {
            apk_paths,
            build_type,
        }
    }

    pub fn apk_paths(&self) -> &[PathBuf] {
        &self.apk_paths
    }

    pub fn build_type(&self) -> BuildType {
        self.build_type
    }

    pub fn is_empty(&self) -> bool {
        self.apk_paths.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub build_type: BuildType,
    pub package_type: PackageType,
}

#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, options: &BuildOptions) -> Result<BuildResults>;

    fn find_best_apk_for_architecture(&self, results: &BuildResults, arch: Arch) -> Result<PathBuf> {
        package::find_best_apk_for_architecture(results, arch)
    }
}

/// Reads the CPU family of a target from `/proc/cpuinfo`.
pub async fn detect_architecture(adb: &dyn AdbClient, id: &str) -> Result<Arch> {
    let cpuinfo = adb.shell(id, "cat /proc/cpuinfo").await?;
    let arch = Arch::from_cpuinfo(&cpuinfo);
    debug!("target {id} reports {arch}");
    Ok(arch)
}

/// Collects apks a previous Gradle run left in the project's output tree.
#[derive(Debug, Clone)]
pub struct OutputLocator {
    project_dir: PathBuf,
}

impl OutputLocator {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
        }
    }

    fn output_root(&self) -> PathBuf {
        let app = self.project_dir.join("app/build/outputs/apk");
        if app.is_dir() {
            app
        } else {
            self.project_dir.join("build/outputs/apk")
        }
    }
}

fn variant_search_root(root: &Path, variant: &str) -> PathBuf {
    let candidate = root.join(variant);
    if candidate.is_dir() {
        candidate
    } else {
        root.to_path_buf()
    }
}

#[async_trait]
impl Builder for OutputLocator {
    async fn build(&self, options: &BuildOptions) -> Result<BuildResults> {
        let root = self.output_root();
        if !root.is_dir() {
            return Ok(BuildResults::new(Vec::new(), options.build_type));
        }
        let search_root = variant_search_root(&root, options.build_type.label());
        let apk_paths: Vec<PathBuf> = package::discover_apks(&search_root)?
            .into_iter()
            .filter(|path| matches_build_type(path, options.build_type))
            .collect();
        info!(
            "found {} {} apk(s) in {}",
            apk_paths.len(),
            options.build_type,
            search_root.display()
        );
        Ok(BuildResults::new(apk_paths, options.build_type))
    }
}

/// Rejects run options that can never be deployed directly.
pub fn ensure_installable(package_type: PackageType) -> Result<()> {
    match package_type {
        PackageType::Apk => Ok(()),
        PackageType::Bundle => Err(DeployError::UnsupportedPackageType(package_type)),
    }
}
