use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::adb::AdbClient;
use crate::error::{DeployError, Result, ToolFailure};
use crate::ids::{emulator_id_for_port, emulator_port};

const FIRST_CONSOLE_PORT: u16 = 5554;
const LAST_CONSOLE_PORT: u16 = 5682;
const APPEAR_POLL_INTERVAL: Duration = Duration::from_secs(1);
const LOG_TAIL_LINES: usize = 20;

/// An installed AVD.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EmulatorImage {
    pub name: String,
    pub api_level: Option<u32>,
}

#[async_trait]
pub trait EmulatorManager: Send + Sync {
    async fn list_images(&self) -> Result<Vec<EmulatorImage>>;

    async fn best_image(&self, target_sdk: Option<u32>) -> Result<Option<EmulatorImage>> {
        let images = self.list_images().await?;
        Ok(pick_best_image(&images, target_sdk).cloned())
    }

    /// Boots `name` and returns the adb serial of the new emulator.
    async fn start(&self, name: &str) -> Result<String>;

    async fn wait_for_boot(&self, id: &str) -> Result<()>;
}

/// Exact API level wins, then the closest level below the target, then
/// the first image.
pub fn pick_best_image(images: &[EmulatorImage], target_sdk: Option<u32>) -> Option<&EmulatorImage> {
    let first = images.first()?;
    let Some(target_sdk) = target_sdk else {
        return Some(first);
    };
    if let Some(exact) = images.iter().find(|image| image.api_level == Some(target_sdk)) {
        return Some(exact);
    }
    images
        .iter()
        .filter_map(|image| image.api_level.map(|api| (api, image)))
        .filter(|(api, _)| *api < target_sdk)
        .max_by_key(|(api, _)| *api)
        .map(|(_, image)| image)
        .or(Some(first))
}

fn parse_ini(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let (key, value) = line.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// API level from `target=android-34` or
/// `image.sysdir.1=system-images/android-34/google_apis/x86_64/`.
pub(crate) fn api_level_from_ini(ini: &HashMap<String, String>) -> Option<u32> {
    let re = Regex::new(r"android-(\d+)").ok()?;
    ["target", "image.sysdir.1"]
        .iter()
        .filter_map(|key| ini.get(*key))
        .find_map(|value| re.captures(value)?.get(1)?.as_str().parse().ok())
}

fn read_ini(path: &Path) -> Option<HashMap<String, String>> {
    fs::read_to_string(path).ok().map(|text| parse_ini(&text))
}

pub(crate) fn read_avd_image(avd_home: &Path, name: &str) -> EmulatorImage {
    let top = read_ini(&avd_home.join(format!("{name}.ini"))).unwrap_or_default();
    let mut api_level = api_level_from_ini(&top);
    if api_level.is_none() {
        let avd_dir = top
            .get("path")
            .map(PathBuf::from)
            .unwrap_or_else(|| avd_home.join(format!("{name}.avd")));
        api_level = read_ini(&avd_dir.join("config.ini"))
            .as_ref()
            .and_then(api_level_from_ini);
    }
    EmulatorImage {
        name: name.to_string(),
        api_level,
    }
}

fn avd_names_from_home(avd_home: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(avd_home) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "ini"))
        .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().to_string()))
        .collect();
    names.sort();
    names
}

pub(crate) fn first_free_console_port(serials: &[String]) -> Option<u16> {
    let used: Vec<u16> = serials.iter().filter_map(|id| emulator_port(id)).collect();
    (FIRST_CONSOLE_PORT..=LAST_CONSOLE_PORT)
        .step_by(2)
        .find(|port| !used.contains(port))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EmulatorTimeouts {
    pub start: Duration,
    pub boot: Duration,
    pub boot_poll: Duration,
}

fn open_log(path: &Path) -> io::Result<(Stdio, Stdio)> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let file = fs::File::create(path)?;
    let err = file.try_clone()?;
    Ok((Stdio::from(file), Stdio::from(err)))
}

fn log_tail(path: &Path, lines: usize) -> String {
    let contents = fs::read_to_string(path).unwrap_or_default();
    let all: Vec<&str> = contents.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// The SDK `emulator` binary plus adb for readiness checks.
pub struct AvdEmulator {
    emulator_path: PathBuf,
    avd_home: PathBuf,
    log_dir: PathBuf,
    adb: Arc<dyn AdbClient>,
    timeouts: EmulatorTimeouts,
}

impl AvdEmulator {
    pub fn new(
        emulator_path: impl Into<PathBuf>,
        avd_home: impl Into<PathBuf>,
        adb: Arc<dyn AdbClient>,
        timeouts: EmulatorTimeouts,
    ) -> Self {
        Self {
            emulator_path: emulator_path.into(),
            avd_home: avd_home.into(),
            log_dir: aadk_util::data_dir().join("logs"),
            adb,
            timeouts,
        }
    }

    /// Emulator console output goes to `emulator-<port>.log` in `dir`.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn from_env(adb: Arc<dyn AdbClient>, timeouts: EmulatorTimeouts) -> Self {
        Self::new(
            aadk_util::sdk_tool_path("AADK_EMULATOR_PATH", "emulator", "emulator"),
            aadk_util::android_avd_home(),
            adb,
            timeouts,
        )
    }

    fn tool_failure(err: io::Error) -> ToolFailure {
        if err.kind() == io::ErrorKind::NotFound {
            ToolFailure::NotFound {
                tool: "emulator",
                env_hint: "AADK_EMULATOR_PATH",
            }
        } else {
            ToolFailure::Io {
                tool: "emulator",
                message: err.to_string(),
            }
        }
    }

    async fn avd_names(&self) -> Result<Vec<String>> {
        let output = Command::new(&self.emulator_path)
            .arg("-list-avds")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => Ok(String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::trim)
                // Newer emulators print INFO/WARNING lines alongside the names.
                .filter(|line| !line.is_empty() && !line.contains(' ') && !line.contains('|'))
                .map(str::to_string)
                .collect()),
            Ok(output) => Err(ToolFailure::Exit {
                tool: "emulator",
                status: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }
            .into()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(
                    "emulator binary not found, reading AVDs from {}",
                    self.avd_home.display()
                );
                Ok(avd_names_from_home(&self.avd_home))
            }
            Err(err) => Err(Self::tool_failure(err).into()),
        }
    }

    async fn wait_until_online(&self, id: &str, child: &mut Child, log_path: &Path) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.timeouts.start;
        loop {
            match self.adb.devices().await {
                Ok(serials) if serials.iter().any(|serial| serial == id) => return Ok(()),
                Ok(_) => {}
                Err(err) => debug!("adb devices failed while waiting for {id}: {err}"),
            }
            match child.try_wait() {
                Ok(Some(status)) => {
                    return Err(DeployError::Emulator(format!(
                        "{id} exited with {status} before coming online (log: {}):\n{}",
                        log_path.display(),
                        log_tail(log_path, LOG_TAIL_LINES)
                    )));
                }
                Ok(None) => {}
                Err(err) => debug!("could not poll emulator process for {id}: {err}"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DeployError::Emulator(format!(
                    "{id} did not come online within {}s",
                    self.timeouts.start.as_secs()
                )));
            }
            tokio::time::sleep(APPEAR_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl EmulatorManager for AvdEmulator {
    async fn list_images(&self) -> Result<Vec<EmulatorImage>> {
        let names = self.avd_names().await?;
        Ok(names
            .iter()
            .map(|name| read_avd_image(&self.avd_home, name))
            .collect())
    }

    async fn start(&self, name: &str) -> Result<String> {
        let serials = self.adb.devices().await?;
        let port = first_free_console_port(&serials).ok_or_else(|| {
            DeployError::Emulator("no free emulator console port available".into())
        })?;
        let id = emulator_id_for_port(port);
        info!("Starting emulator {name} on port {port}");

        let log_path = self.log_dir.join(format!("emulator-{port}.log"));
        let (stdout, stderr) = open_log(&log_path).map_err(|err| ToolFailure::Io {
            tool: "emulator",
            message: format!("{}: {err}", log_path.display()),
        })?;
        debug!("emulator output goes to {}", log_path.display());

        let port_arg = port.to_string();
        // Not killed on drop: the emulator outlives this process.
        let mut child = Command::new(&self.emulator_path)
            .args(["-avd", name, "-port", port_arg.as_str()])
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(Self::tool_failure)?;

        self.wait_until_online(&id, &mut child, &log_path).await?;
        Ok(id)
    }

    async fn wait_for_boot(&self, id: &str) -> Result<()> {
        info!("Waiting for emulator {id} to boot");
        let deadline = tokio::time::Instant::now() + self.timeouts.boot;
        loop {
            match self.adb.shell(id, "getprop sys.boot_completed").await {
                Ok(value) if value.trim() == "1" => {
                    info!("Emulator {id} booted");
                    return Ok(());
                }
                Ok(_) => {}
                Err(err) => debug!("boot check on {id} failed: {err}"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DeployError::Emulator(format!(
                    "{id} did not finish booting within {}s",
                    self.timeouts.boot.as_secs()
                )));
            }
            tokio::time::sleep(self.timeouts.boot_poll).await;
        }
    }
}
