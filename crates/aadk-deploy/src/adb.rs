use std::{
    io,
    path::{Path, PathBuf},
    process::{Output, Stdio},
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
};
use tracing::debug;

use crate::error::{format_tool_output, DeployError, Result, ToolFailure};
use crate::ids::canonicalize_adb_serial;
use crate::retry::ExecLimits;

/// Wakes the screen and dismisses a swipe lock (KEYCODE_MENU).
pub const UNLOCK_COMMAND: &str = "input keyevent 82";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InstallOptions {
    /// Pass `-r` so an existing installation is replaced.
    pub replace: bool,
    pub limits: Option<ExecLimits>,
}

/// Device bridge used by the deploy pipeline.
#[async_trait]
pub trait AdbClient: Send + Sync {
    /// Serials of every online target (state `device`).
    async fn devices(&self) -> Result<Vec<String>>;
    async fn install(&self, id: &str, apk: &Path, options: &InstallOptions) -> Result<()>;
    async fn uninstall(&self, id: &str, package: &str) -> Result<()>;
    async fn shell(&self, id: &str, command: &str) -> Result<String>;
    /// Starts `component` (`<package>/<activity>`) and waits for it to launch.
    async fn start(&self, id: &str, component: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AdbDevice {
    pub(crate) serial: String,
    pub(crate) state: String,
}

pub(crate) fn parse_adb_devices(output: &str) -> Vec<AdbDevice> {
    let mut devices = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("List of devices attached") || line.starts_with('*')
        {
            continue;
        }

        let mut parts = line.split_whitespace();
        let Some(serial) = parts.next() else {
            continue;
        };
        let Some(state) = parts.next() else {
            continue;
        };
        devices.push(AdbDevice {
            serial: serial.to_string(),
            state: state.to_string(),
        });
    }

    devices
}

fn install_failure_hint(output: &str) -> Option<&'static str> {
    if output.contains("INSTALL_PARSE_FAILED_NO_CERTIFICATES") {
        Some(
            "Sign the build with a keystore, or sign and deploy the unsigned apk manually using Android tools.",
        )
    } else if output.contains("INSTALL_FAILED_VERSION_DOWNGRADE") {
        Some(
            "You're trying to install an apk with a lower versionCode than the one already installed.\nEither uninstall the app or increment the versionCode.",
        )
    } else {
        None
    }
}

fn install_failed(output: &str) -> DeployError {
    let mut message = output.trim().to_string();
    if let Some(hint) = install_failure_hint(&message) {
        message.push_str("\n\n");
        message.push_str(hint);
    }
    DeployError::InstallFailed(message)
}

async fn read_stream<R>(reader: Option<R>) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf).await;
    }
    buf
}

/// `adb` from the Android SDK, driven as a subprocess.
#[derive(Debug, Clone)]
pub struct SystemAdb {
    path: PathBuf,
}

impl SystemAdb {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_env() -> Self {
        Self::new(aadk_util::sdk_tool_path(
            "AADK_ADB_PATH",
            "platform-tools",
            "adb",
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn spawn_failure(err: io::Error) -> ToolFailure {
        if err.kind() == io::ErrorKind::NotFound {
            ToolFailure::NotFound {
                tool: "adb",
                env_hint: "AADK_ADB_PATH",
            }
        } else {
            ToolFailure::Io {
                tool: "adb",
                message: err.to_string(),
            }
        }
    }

    async fn adb_output(
        &self,
        args: &[&str],
        limits: Option<&ExecLimits>,
    ) -> std::result::Result<Output, ToolFailure> {
        debug!("adb {}", args.join(" "));
        let mut cmd = Command::new(&self.path);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn().map_err(Self::spawn_failure)?;

        let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
        let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

        let waited = match limits {
            None => child.wait().await,
            Some(limits) => match tokio::time::timeout(limits.timeout, child.wait()).await {
                Ok(waited) => waited,
                Err(_) => {
                    limits.kill_signal.send(&mut child);
                    let _ = child.wait().await;
                    stdout_task.abort();
                    stderr_task.abort();
                    return Err(ToolFailure::Timeout {
                        tool: "adb",
                        after: limits.timeout,
                    });
                }
            },
        };
        let status = waited.map_err(|err| ToolFailure::Io {
            tool: "adb",
            message: err.to_string(),
        })?;
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        if status.success() {
            Ok(Output {
                status,
                stdout,
                stderr,
            })
        } else {
            Err(ToolFailure::Exit {
                tool: "adb",
                status: status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&stdout).to_string(),
                stderr: String::from_utf8_lossy(&stderr).to_string(),
            })
        }
    }

    pub(crate) async fn list_devices(&self) -> Result<Vec<AdbDevice>> {
        let output = self.adb_output(&["devices"], None).await?;
        Ok(parse_adb_devices(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl AdbClient for SystemAdb {
    async fn devices(&self) -> Result<Vec<String>> {
        let devices = self.list_devices().await?;
        Ok(devices
            .into_iter()
            .filter(|device| device.state == "device")
            .map(|device| device.serial)
            .collect())
    }

    async fn install(&self, id: &str, apk: &Path, options: &InstallOptions) -> Result<()> {
        let serial = canonicalize_adb_serial(id);
        let apk = apk.to_string_lossy();
        let mut args = vec!["-s", serial.as_str(), "install"];
        if options.replace {
            args.push("-r");
        }
        args.push(&apk);

        match self.adb_output(&args, options.limits.as_ref()).await {
            // Older adb releases report install failures with exit status 0.
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let combined = format_tool_output(&stdout, &stderr);
                if combined.contains("Failure") {
                    Err(install_failed(&combined))
                } else {
                    Ok(())
                }
            }
            Err(ToolFailure::Exit { stdout, stderr, .. }) => {
                Err(install_failed(&format_tool_output(&stdout, &stderr)))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn uninstall(&self, id: &str, package: &str) -> Result<()> {
        let serial = canonicalize_adb_serial(id);
        let args = ["-s", serial.as_str(), "uninstall", package];
        let detail = match self.adb_output(&args, None).await {
            Ok(output) => format_tool_output(
                &String::from_utf8_lossy(&output.stdout),
                &String::from_utf8_lossy(&output.stderr),
            ),
            Err(ToolFailure::Exit { stdout, stderr, .. }) => {
                let detail = format_tool_output(&stdout, &stderr);
                return Err(DeployError::UninstallFailed(detail.trim().to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        if detail.contains("Failure") {
            return Err(DeployError::UninstallFailed(detail.trim().to_string()));
        }
        Ok(())
    }

    async fn shell(&self, id: &str, command: &str) -> Result<String> {
        let serial = canonicalize_adb_serial(id);
        let output = self
            .adb_output(&["-s", serial.as_str(), "shell", command], None)
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn start(&self, id: &str, component: &str) -> Result<()> {
        let serial = canonicalize_adb_serial(id);
        let args = [
            "-s",
            serial.as_str(),
            "shell",
            "am",
            "start",
            "-W",
            "-a",
            "android.intent.action.MAIN",
            "-n",
            component,
        ];
        let output = self.adb_output(&args, None).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        // `am start` exits 0 even when the component cannot be resolved.
        if stdout.contains("Error:") || stderr.contains("Error:") {
            return Err(DeployError::LaunchFailed(
                format_tool_output(&stdout, &stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}
