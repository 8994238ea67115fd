use std::{fmt, future::Future, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::process::Child;
use tracing::warn;

use crate::error::{DeployError, Result};

/// Slack granted beyond the per-attempt timeout so the subprocess's own
/// timer (and its kill signal) fires before the attempt is abandoned.
const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KillSignal {
    #[serde(rename = "SIGKILL")]
    Kill,
    #[serde(rename = "SIGTERM")]
    Term,
    #[serde(rename = "SIGINT")]
    Int,
}

impl KillSignal {
    #[cfg(unix)]
    fn as_raw(self) -> libc::c_int {
        match self {
            KillSignal::Kill => libc::SIGKILL,
            KillSignal::Term => libc::SIGTERM,
            KillSignal::Int => libc::SIGINT,
        }
    }

    /// Delivers the signal to a still-running child. Already reaped children
    /// have no pid and are left alone.
    pub(crate) fn send(self, child: &mut Child) {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                // SAFETY: `pid` belongs to a child we own and have not waited on yet.
                let rc = unsafe { libc::kill(pid as libc::pid_t, self.as_raw()) };
                if rc != 0 {
                    warn!("failed to send {self} to pid {pid}");
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }
    }
}

impl fmt::Display for KillSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KillSignal::Kill => "SIGKILL",
            KillSignal::Term => "SIGTERM",
            KillSignal::Int => "SIGINT",
        })
    }
}

impl FromStr for KillSignal {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        let upper = value.trim().to_ascii_uppercase();
        match upper.strip_prefix("SIG").unwrap_or(&upper) {
            "KILL" | "9" => Ok(KillSignal::Kill),
            "TERM" | "15" => Ok(KillSignal::Term),
            "INT" | "2" => Ok(KillSignal::Int),
            other => Err(format!("unsupported kill signal: {other}")),
        }
    }
}

/// Bound applied to a single subprocess invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecLimits {
    pub timeout: Duration,
    pub kill_signal: KillSignal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub limits: ExecLimits,
}

/// Runs `op` up to `policy.attempts` times with no delay between attempts.
///
/// Every attempt receives the policy's [`ExecLimits`] to hand to the
/// subprocesses it spawns, and is additionally abandoned once it outlives
/// the timeout plus a short grace period. The error of the last attempt is
/// returned unchanged.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut(u32, ExecLimits) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let guard = policy.limits.timeout + KILL_GRACE;
    let mut attempt = 1;
    loop {
        let outcome = match tokio::time::timeout(guard, op(attempt, policy.limits)).await {
            Ok(result) => result,
            Err(_) => Err(DeployError::Timeout {
                operation: "attempt",
                after: policy.limits.timeout,
            }),
        };
        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                warn!("attempt {attempt}/{attempts} failed, retrying: {err}");
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
