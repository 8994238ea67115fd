use std::{fs, io, path::Path, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::emulator::EmulatorTimeouts;
use crate::error::{DeployError, Result};
use crate::retry::{ExecLimits, KillSignal, RetryPolicy};

/// Tunables of the deploy pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub install_attempts: u32,
    pub install_timeout_secs: u64,
    pub install_kill_signal: KillSignal,
    pub boot_timeout_secs: u64,
    pub boot_poll_interval_millis: u64,
    pub emulator_start_timeout_secs: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            install_attempts: 3,
            install_timeout_secs: 300,
            install_kill_signal: KillSignal::Kill,
            boot_timeout_secs: 300,
            boot_poll_interval_millis: 3000,
            emulator_start_timeout_secs: 120,
        }
    }
}

fn override_from<T, F>(env: &F, key: &str, slot: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = env(key) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(value) => *slot = value,
        Err(err) => warn!("ignoring {key}={raw}: {err}"),
    }
}

impl DeployConfig {
    /// Reads `deploy-config.json` from the aadk data dir, then applies
    /// `AADK_*` environment overrides.
    pub fn load() -> Result<Self> {
        let path = aadk_util::config_file_path(aadk_util::DEPLOY_CONFIG_FILE);
        Self::load_from(&path, aadk_util::read_env_trimmed)
    }

    pub fn load_from<F>(path: &Path, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match fs::read_to_string(path) {
            Ok(data) => {
                serde_json::from_str::<DeployConfig>(&data).map_err(|err| DeployError::Config {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                })?
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => DeployConfig::default(),
            Err(err) => {
                return Err(DeployError::Config {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                })
            }
        };

        override_from(&env, "AADK_INSTALL_ATTEMPTS", &mut cfg.install_attempts);
        override_from(&env, "AADK_INSTALL_TIMEOUT_SECS", &mut cfg.install_timeout_secs);
        override_from(&env, "AADK_INSTALL_KILL_SIGNAL", &mut cfg.install_kill_signal);
        override_from(&env, "AADK_BOOT_TIMEOUT_SECS", &mut cfg.boot_timeout_secs);
        override_from(
            &env,
            "AADK_BOOT_POLL_INTERVAL_MILLIS",
            &mut cfg.boot_poll_interval_millis,
        );
        override_from(
            &env,
            "AADK_EMULATOR_START_TIMEOUT_SECS",
            &mut cfg.emulator_start_timeout_secs,
        );
        Ok(cfg)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.install_attempts,
            limits: ExecLimits {
                timeout: Duration::from_secs(self.install_timeout_secs),
                kill_signal: self.install_kill_signal,
            },
        }
    }

    pub fn emulator_timeouts(&self) -> EmulatorTimeouts {
        EmulatorTimeouts {
            start: Duration::from_secs(self.emulator_start_timeout_secs),
            boot: Duration::from_secs(self.boot_timeout_secs),
            boot_poll: Duration::from_millis(self.boot_poll_interval_millis),
        }
    }
}
