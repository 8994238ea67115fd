use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::builder::{BuildType, PackageType};
use crate::target::{Arch, TargetSpec};

pub type Result<T> = std::result::Result<T, DeployError>;

const CERT_CONFLICT_MARKER: &str = "INCONSISTENT_CERTIFICATES";

/// Failure of an SDK subprocess (`adb`, `emulator`, `aapt`).
#[derive(Debug, Error)]
pub enum ToolFailure {
    #[error("{tool} not found (set {env_hint} or ANDROID_SDK_ROOT)")]
    NotFound {
        tool: &'static str,
        env_hint: &'static str,
    },
    #[error("{tool} failed: {message}")]
    Io { tool: &'static str, message: String },
    #[error("{}", format_exit_message(tool, *status, stdout, stderr))]
    Exit {
        tool: &'static str,
        status: i32,
        stdout: String,
        stderr: String,
    },
    #[error("{tool} command timed out after {}s", after.as_secs())]
    Timeout { tool: &'static str, after: Duration },
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("package type \"{0}\" is not supported during run; bundles cannot be installed directly on a target")]
    UnsupportedPackageType(PackageType),
    #[error("no {0} apk was found to deploy")]
    NoBuildOutputs(BuildType),
    #[error("could not find apk architecture: {arch} build-type: {build_type}")]
    NoMatchingApk { arch: Arch, build_type: BuildType },
    #[error("no target satisfies spec {0}")]
    NoTarget(TargetSpec),
    #[error(transparent)]
    Tool(#[from] ToolFailure),
    #[error("Failed to install apk to target: {0}")]
    InstallFailed(String),
    #[error("Failed to uninstall app from target: {0}")]
    UninstallFailed(String),
    #[error("Failed to start activity on target: {0}")]
    LaunchFailed(String),
    #[error("{operation} timed out after {}s", after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("emulator: {0}")]
    Emulator(String),
    #[error("failed to read manifest {}: {message}", path.display())]
    Manifest { path: PathBuf, message: String },
    #[error("invalid config {}: {message}", path.display())]
    Config { path: PathBuf, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// The target already holds the package signed with a different key.
    pub fn is_cert_conflict(&self) -> bool {
        self.to_string().contains(CERT_CONFLICT_MARKER)
    }
}

pub(crate) fn format_tool_output(stdout: &str, stderr: &str) -> String {
    let stdout = stdout.trim();
    let stderr = stderr.trim();
    let mut out = String::new();

    if !stdout.is_empty() {
        out.push_str("stdout:\n");
        out.push_str(stdout);
        out.push('\n');
    }
    if !stderr.is_empty() {
        out.push_str("stderr:\n");
        out.push_str(stderr);
        out.push('\n');
    }

    out
}

fn format_exit_message(tool: &str, status: i32, stdout: &str, stderr: &str) -> String {
    let detail = format_tool_output(stdout, stderr);
    if detail.trim().is_empty() {
        format!("{tool} command failed with exit {status}")
    } else {
        format!("{tool} command failed with exit {status}: {}", detail.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_message_includes_both_streams() {
        let err = ToolFailure::Exit {
            tool: "adb",
            status: 1,
            stdout: "Performing Streamed Install\n".into(),
            stderr: "adb: failed to install app.apk".into(),
        };
        let message = err.to_string();
        assert!(message.starts_with("adb command failed with exit 1:"));
        assert!(message.contains("stdout:\nPerforming Streamed Install"));
        assert!(message.contains("stderr:\nadb: failed to install app.apk"));
    }

    #[test]
    fn exit_message_without_output() {
        let err = ToolFailure::Exit {
            tool: "emulator",
            status: 3,
            stdout: String::new(),
            stderr: "  ".into(),
        };
        assert_eq!(err.to_string(), "emulator command failed with exit 3");
    }

    #[test]
    fn cert_conflict_is_detected_through_tool_output() {
        let err = DeployError::InstallFailed(
            "Failure [INSTALL_PARSE_FAILED_INCONSISTENT_CERTIFICATES]".into(),
        );
        assert!(err.is_cert_conflict());

        let err = DeployError::from(ToolFailure::Exit {
            tool: "adb",
            status: 1,
            stdout: String::new(),
            stderr: "Failure [INSTALL_FAILED_INSUFFICIENT_STORAGE]".into(),
        });
        assert!(!err.is_cert_conflict());
    }
}
