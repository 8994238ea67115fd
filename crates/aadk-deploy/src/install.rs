use std::{path::Path, sync::Arc};

use tracing::{info, warn};

use crate::adb::{AdbClient, InstallOptions, UNLOCK_COMMAND};
use crate::builder::{BuildResults, Builder};
use crate::error::{DeployError, Result};
use crate::manifest::{launch_component, ManifestReader};
use crate::retry::{retry, ExecLimits, RetryPolicy};
use crate::target::{ResolvedTarget, TargetKind};

/// Inputs of a single install, assembled per run.
pub struct InstallContext<'a> {
    pub manifest: &'a dyn ManifestReader,
    pub build_results: &'a BuildResults,
}

/// A signature conflict is not retried; it is resolved by uninstalling.
enum InstallOutcome {
    Installed,
    CertConflict(DeployError),
}

/// Installs, unlocks and launches the app on a resolved target.
pub struct InstallOrchestrator {
    adb: Arc<dyn AdbClient>,
    builder: Arc<dyn Builder>,
    policy: RetryPolicy,
}

impl InstallOrchestrator {
    pub fn new(adb: Arc<dyn AdbClient>, builder: Arc<dyn Builder>, policy: RetryPolicy) -> Self {
        Self {
            adb,
            builder,
            policy,
        }
    }

    pub async fn install(&self, target: &ResolvedTarget, ctx: &InstallContext<'_>) -> Result<()> {
        let package_id = ctx.manifest.package_id();
        let component = launch_component(package_id, ctx.manifest.activity_name());
        info!("Package name: {package_id}");

        let apk = self
            .builder
            .find_best_apk_for_architecture(ctx.build_results, target.arch)?;
        info!("Using apk: {}", apk.display());

        if let InstallOutcome::CertConflict(_) = self.install_bounded(target, &apk).await? {
            warn!(
                "Uninstalling app from target and reinstalling it because the installed app is signed with a different key"
            );
            self.adb.uninstall(target.id(), package_id).await?;
            if let InstallOutcome::CertConflict(err) = self.install_bounded(target, &apk).await? {
                return Err(err);
            }
        }
        info!("INSTALL SUCCESS");

        self.unlock(target.id()).await?;
        self.adb.start(target.id(), &component).await?;
        info!("LAUNCH SUCCESS");
        Ok(())
    }

    /// One logical install. Emulator installs hang now and then and are
    /// retried, each attempt bounded on its own; devices fail
    /// deterministically and get a single attempt.
    async fn install_bounded(&self, target: &ResolvedTarget, apk: &Path) -> Result<InstallOutcome> {
        match target.kind() {
            TargetKind::Emulator => {
                retry(&self.policy, move |attempt, limits| {
                    if attempt > 1 {
                        info!("Retrying install on {} (attempt {attempt})", target.id());
                    }
                    self.install_once(target, apk, Some(limits))
                })
                .await
            }
            TargetKind::Device => self.install_once(target, apk, None).await,
        }
    }

    async fn install_once(
        &self,
        target: &ResolvedTarget,
        apk: &Path,
        limits: Option<ExecLimits>,
    ) -> Result<InstallOutcome> {
        info!("Installing app on target {}", target.id());
        let options = InstallOptions {
            replace: true,
            limits,
        };
        match self.adb.install(target.id(), apk, &options).await {
            Ok(()) => Ok(InstallOutcome::Installed),
            Err(err) if err.is_cert_conflict() => Ok(InstallOutcome::CertConflict(err)),
            Err(err) => Err(err),
        }
    }

    /// Wakes and unlocks the screen. Safe to repeat.
    pub async fn unlock(&self, id: &str) -> Result<()> {
        info!("Unlocking screen...");
        self.adb.shell(id, UNLOCK_COMMAND).await?;
        Ok(())
    }
}
