//! In-memory collaborators for pipeline tests.

use std::{
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::adb::{AdbClient, InstallOptions};
use crate::builder::{BuildOptions, BuildResults, Builder};
use crate::emulator::{EmulatorImage, EmulatorManager};
use crate::error::{DeployError, Result, ToolFailure};
use crate::ids::emulator_id_for_port;
use crate::manifest::{ManifestReader, PackageInspector};

const CPUINFO: &str = "cat /proc/cpuinfo";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdbCall {
    Devices,
    Install {
        id: String,
        apk: PathBuf,
        replace: bool,
        limited: bool,
    },
    Uninstall {
        id: String,
        package: String,
    },
    Shell {
        id: String,
        command: String,
    },
    Start {
        id: String,
        component: String,
    },
}

impl AdbCall {
    pub fn name(&self) -> &'static str {
        match self {
            AdbCall::Devices => "devices",
            AdbCall::Install { .. } => "install",
            AdbCall::Uninstall { .. } => "uninstall",
            AdbCall::Shell { .. } => "shell",
            AdbCall::Start { .. } => "start",
        }
    }
}

#[derive(Clone, Debug)]
pub enum InstallBehavior {
    Succeed,
    /// adb reported a failure with this output.
    Fail(String),
    /// adb gave up at once with a timeout.
    TimeOut,
    /// adb never answers; only the exec timeout ends it.
    Hang,
    /// adb takes this long before behaving like `then`.
    Slow {
        after: Duration,
        then: Box<InstallBehavior>,
    },
}

impl InstallBehavior {
    pub fn slow(after: Duration, then: InstallBehavior) -> Self {
        InstallBehavior::Slow {
            after,
            then: Box::new(then),
        }
    }
}

/// Records every call. Shell commands answer `""` unless scripted, cpuinfo
/// answers with whatever [`FakeAdb::set_cpuinfo`] stored.
#[derive(Default)]
pub struct FakeAdb {
    devices: Vec<String>,
    calls: Mutex<Vec<AdbCall>>,
    installs: Mutex<VecDeque<InstallBehavior>>,
    shell_scripts: Mutex<HashMap<String, VecDeque<String>>>,
    cpuinfo: Mutex<String>,
    start_failure: Mutex<Option<String>>,
    uninstall_failure: Mutex<Option<String>>,
}

impl FakeAdb {
    pub fn new(devices: &[&str]) -> Self {
        Self {
            devices: devices.iter().map(|id| id.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn set_cpuinfo(&self, cpuinfo: &str) {
        *self.cpuinfo.lock().unwrap() = cpuinfo.to_string();
    }

    /// Answers successive `command` calls in order; the last answer repeats.
    pub fn script_shell(&self, command: &str, responses: &[&str]) {
        self.shell_scripts.lock().unwrap().insert(
            command.to_string(),
            responses.iter().map(|r| r.to_string()).collect(),
        );
    }

    /// Outcomes of successive installs; installs succeed once drained.
    pub fn script_installs(&self, behaviors: Vec<InstallBehavior>) {
        *self.installs.lock().unwrap() = behaviors.into();
    }

    pub fn fail_uninstall(&self, output: &str) {
        *self.uninstall_failure.lock().unwrap() = Some(output.to_string());
    }

    pub fn fail_start(&self, output: &str) {
        *self.start_failure.lock().unwrap() = Some(output.to_string());
    }

    pub fn calls(&self) -> Vec<AdbCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|call| call.name() == name).count()
    }

    pub fn shell_count(&self, command: &str) -> usize {
        self.shell_targets(command).len()
    }

    pub fn shell_targets(&self, command: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                AdbCall::Shell { id, command: c } if c == command => Some(id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: AdbCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl AdbClient for FakeAdb {
    async fn devices(&self) -> Result<Vec<String>> {
        self.record(AdbCall::Devices);
        Ok(self.devices.clone())
    }

    async fn install(&self, id: &str, apk: &Path, options: &InstallOptions) -> Result<()> {
        self.record(AdbCall::Install {
            id: id.to_string(),
            apk: apk.to_path_buf(),
            replace: options.replace,
            limited: options.limits.is_some(),
        });
        let mut behavior = self
            .installs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(InstallBehavior::Succeed);
        let after = options
            .limits
            .map(|limits| limits.timeout)
            .unwrap_or(Duration::from_secs(300));
        while let InstallBehavior::Slow { after, then } = behavior {
            tokio::time::sleep(after).await;
            behavior = *then;
        }
        match behavior {
            InstallBehavior::Succeed => Ok(()),
            InstallBehavior::Fail(output) => Err(DeployError::InstallFailed(output)),
            InstallBehavior::TimeOut => Err(ToolFailure::Timeout { tool: "adb", after }.into()),
            InstallBehavior::Hang => match options.limits {
                Some(limits) => {
                    tokio::time::sleep(limits.timeout).await;
                    Err(ToolFailure::Timeout { tool: "adb", after }.into())
                }
                None => std::future::pending().await,
            },
            InstallBehavior::Slow { .. } => unreachable!("slow installs are unwrapped above"),
        }
    }

    async fn uninstall(&self, id: &str, package: &str) -> Result<()> {
        self.record(AdbCall::Uninstall {
            id: id.to_string(),
            package: package.to_string(),
        });
        match self.uninstall_failure.lock().unwrap().clone() {
            Some(output) => Err(DeployError::UninstallFailed(output)),
            None => Ok(()),
        }
    }

    async fn shell(&self, id: &str, command: &str) -> Result<String> {
        self.record(AdbCall::Shell {
            id: id.to_string(),
            command: command.to_string(),
        });
        if command == CPUINFO {
            return Ok(self.cpuinfo.lock().unwrap().clone());
        }
        let mut scripts = self.shell_scripts.lock().unwrap();
        let Some(queue) = scripts.get_mut(command) else {
            return Ok(String::new());
        };
        let answer = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(answer.unwrap_or_default())
    }

    async fn start(&self, id: &str, component: &str) -> Result<()> {
        self.record(AdbCall::Start {
            id: id.to_string(),
            component: component.to_string(),
        });
        match self.start_failure.lock().unwrap().clone() {
            Some(output) => Err(DeployError::LaunchFailed(output)),
            None => Ok(()),
        }
    }
}

/// Starts images on consecutive console ports from 5554.
#[derive(Default)]
pub struct FakeEmulators {
    images: Vec<EmulatorImage>,
    list_calls: AtomicUsize,
    started: Mutex<Vec<String>>,
    booted: Mutex<Vec<String>>,
}

impl FakeEmulators {
    pub fn new(images: &[(&str, Option<u32>)]) -> Self {
        Self {
            images: images
                .iter()
                .map(|(name, api_level)| EmulatorImage {
                    name: name.to_string(),
                    api_level: *api_level,
                })
                .collect(),
            ..Self::default()
        }
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn boot_waits(&self) -> Vec<String> {
        self.booted.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmulatorManager for FakeEmulators {
    async fn list_images(&self) -> Result<Vec<EmulatorImage>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.images.clone())
    }

    async fn start(&self, name: &str) -> Result<String> {
        let mut started = self.started.lock().unwrap();
        let port = 5554 + 2 * started.len() as u16;
        started.push(name.to_string());
        Ok(emulator_id_for_port(port))
    }

    async fn wait_for_boot(&self, id: &str) -> Result<()> {
        self.booted.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

pub struct FakeInspector {
    target_sdk: Option<u32>,
}

impl FakeInspector {
    pub fn new(target_sdk: Option<u32>) -> Self {
        Self { target_sdk }
    }
}

#[async_trait]
impl PackageInspector for FakeInspector {
    async fn target_sdk(&self, _apk: &Path) -> Result<Option<u32>> {
        Ok(self.target_sdk)
    }
}

pub struct FakeManifest {
    package_id: String,
    activity_name: String,
}

impl FakeManifest {
    pub fn new(package_id: &str, activity_name: &str) -> Self {
        Self {
            package_id: package_id.to_string(),
            activity_name: activity_name.to_string(),
        }
    }
}

impl ManifestReader for FakeManifest {
    fn package_id(&self) -> &str {
        &self.package_id
    }

    fn activity_name(&self) -> &str {
        &self.activity_name
    }
}

/// Hands out fixed results and counts invocations.
#[derive(Default)]
pub struct FakeBuilder {
    apk_paths: Vec<PathBuf>,
    builds: AtomicUsize,
}

impl FakeBuilder {
    pub fn with_apks(paths: &[&str]) -> Self {
        Self {
            apk_paths: paths.iter().map(PathBuf::from).collect(),
            ..Self::default()
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Builder for FakeBuilder {
    async fn build(&self, options: &BuildOptions) -> Result<BuildResults> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(BuildResults::new(self.apk_paths.clone(), options.build_type))
    }
}
