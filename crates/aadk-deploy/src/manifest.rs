use std::{
    fs, io,
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use crate::error::{DeployError, Result, ToolFailure};

/// Identity of the app being deployed.
pub trait ManifestReader: Send + Sync {
    fn package_id(&self) -> &str;
    fn activity_name(&self) -> &str;
}

/// Component handed to `am start`: `<package>/.<Activity>` for short names,
/// `<package>/<name>` for relative or fully qualified ones.
pub fn launch_component(package_id: &str, activity_name: &str) -> String {
    if activity_name.starts_with('.') || activity_name.contains('.') {
        format!("{package_id}/{activity_name}")
    } else {
        format!("{package_id}/.{activity_name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndroidManifest {
    path: PathBuf,
    package_id: String,
    activity_name: String,
}

impl AndroidManifest {
    /// Default manifest location inside an Android project.
    pub fn project_path(project_dir: &Path) -> PathBuf {
        project_dir.join("app/src/main/AndroidManifest.xml")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let xml = fs::read_to_string(path).map_err(|err| DeployError::Manifest {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::parse(path, &xml)
    }

    pub fn parse(path: &Path, xml: &str) -> Result<Self> {
        let manifest_error = |message: &str| DeployError::Manifest {
            path: path.to_path_buf(),
            message: message.to_string(),
        };
        let package_re = Regex::new(r#"<manifest\b[^>]*?\bpackage\s*=\s*"([^"]+)""#)
            .map_err(|err| manifest_error(&err.to_string()))?;
        let activity_re = Regex::new(r#"<activity\b[^>]*?\bandroid:name\s*=\s*"([^"]+)""#)
            .map_err(|err| manifest_error(&err.to_string()))?;

        let package_id = package_re
            .captures(xml)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| manifest_error("<manifest> has no package attribute"))?;
        let activity_name = activity_re
            .captures(xml)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| manifest_error("no <activity> with android:name"))?;

        Ok(Self {
            path: path.to_path_buf(),
            package_id,
            activity_name,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ManifestReader for AndroidManifest {
    fn package_id(&self) -> &str {
        &self.package_id
    }

    fn activity_name(&self) -> &str {
        &self.activity_name
    }
}

/// Reads metadata baked into a built package.
#[async_trait]
pub trait PackageInspector: Send + Sync {
    /// `targetSdkVersion` of the package, if it declares one.
    async fn target_sdk(&self, apk: &Path) -> Result<Option<u32>>;
}

pub(crate) fn parse_badging_target_sdk(badging: &str) -> Option<u32> {
    let re = Regex::new(r"targetSdkVersion:'(\d+)'").ok()?;
    re.captures(badging)?.get(1)?.as_str().parse().ok()
}

/// `aapt dump badging` from the SDK build-tools.
#[derive(Debug, Clone)]
pub struct Aapt {
    path: PathBuf,
}

impl Aapt {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_env() -> Self {
        Self::new(aadk_util::build_tool_path("AADK_AAPT_PATH", "aapt"))
    }
}

#[async_trait]
impl PackageInspector for Aapt {
    async fn target_sdk(&self, apk: &Path) -> Result<Option<u32>> {
        let output = Command::new(&self.path)
            .arg("dump")
            .arg("badging")
            .arg(apk)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| {
                if err.kind() == io::ErrorKind::NotFound {
                    ToolFailure::NotFound {
                        tool: "aapt",
                        env_hint: "AADK_AAPT_PATH",
                    }
                } else {
                    ToolFailure::Io {
                        tool: "aapt",
                        message: err.to_string(),
                    }
                }
            })?;
        if !output.status.success() {
            return Err(ToolFailure::Exit {
                tool: "aapt",
                status: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }
            .into());
        }
        Ok(parse_badging_target_sdk(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }
}
