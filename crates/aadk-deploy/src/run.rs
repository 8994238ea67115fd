use std::{path::Path, sync::Arc};

use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::adb::{AdbClient, SystemAdb};
use crate::builder::{ensure_installable, BuildOptions, BuildType, Builder, OutputLocator, PackageType};
use crate::config::DeployConfig;
use crate::emulator::{AvdEmulator, EmulatorManager};
use crate::error::{DeployError, Result};
use crate::install::{InstallContext, InstallOrchestrator};
use crate::manifest::{Aapt, AndroidManifest, ManifestReader, PackageInspector};
use crate::resolver::TargetResolver;
use crate::target::{ResolvedTarget, TargetKind, TargetSpec};

/// What the user asked `run` to do.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub target: Option<String>,
    pub device: bool,
    pub emulator: bool,
    pub build_type: BuildType,
    pub package_type: PackageType,
}

impl RunOptions {
    /// An explicit id beats the `device`/`emulator` flags.
    pub fn target_spec(&self) -> TargetSpec {
        if let Some(id) = self.target.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            TargetSpec::with_id(id)
        } else if self.device {
            TargetSpec::with_kind(TargetKind::Device)
        } else if self.emulator {
            TargetSpec::with_kind(TargetKind::Emulator)
        } else {
            TargetSpec::any()
        }
    }
}

/// Collaborators of one deploy.
pub struct RunParts {
    pub adb: Arc<dyn AdbClient>,
    pub emulators: Arc<dyn EmulatorManager>,
    pub inspector: Arc<dyn PackageInspector>,
    pub builder: Arc<dyn Builder>,
    pub manifest: Arc<dyn ManifestReader>,
}

pub struct RunCoordinator {
    builder: Arc<dyn Builder>,
    emulators: Arc<dyn EmulatorManager>,
    manifest: Arc<dyn ManifestReader>,
    resolver: TargetResolver,
    installer: InstallOrchestrator,
}

impl RunCoordinator {
    pub fn new(parts: RunParts, config: &DeployConfig) -> Self {
        let resolver = TargetResolver::new(
            Arc::clone(&parts.adb),
            Arc::clone(&parts.emulators),
            parts.inspector,
        );
        let installer = InstallOrchestrator::new(
            parts.adb,
            Arc::clone(&parts.builder),
            config.retry_policy(),
        );
        Self {
            builder: parts.builder,
            emulators: parts.emulators,
            manifest: parts.manifest,
            resolver,
            installer,
        }
    }

    /// Wires the SDK tools found on this host to a Gradle project checkout.
    pub fn for_project(project_dir: &Path, config: &DeployConfig) -> Result<Self> {
        let manifest = AndroidManifest::load(&AndroidManifest::project_path(project_dir))?;
        let adb: Arc<dyn AdbClient> = Arc::new(SystemAdb::from_env());
        let emulators = Arc::new(AvdEmulator::from_env(
            Arc::clone(&adb),
            config.emulator_timeouts(),
        ));
        Ok(Self::new(
            RunParts {
                adb,
                emulators,
                inspector: Arc::new(Aapt::from_env()),
                builder: Arc::new(OutputLocator::new(project_dir)),
                manifest: Arc::new(manifest),
            },
            config,
        ))
    }

    pub async fn run(&self, options: &RunOptions) -> Result<ResolvedTarget> {
        let run_id = Uuid::new_v4();
        self.run_inner(options)
            .instrument(info_span!("run", %run_id))
            .await
    }

    async fn run_inner(&self, options: &RunOptions) -> Result<ResolvedTarget> {
        let build_options = BuildOptions {
            build_type: options.build_type,
            package_type: options.package_type,
        };
        ensure_installable(build_options.package_type)?;

        let build_results = self.builder.build(&build_options).await?;
        if build_results.is_empty() {
            return Err(DeployError::NoBuildOutputs(build_options.build_type));
        }

        let spec = options.target_spec();
        let resolved = self.resolver.resolve(&spec, &build_results).await?;
        info!("Deploying to {resolved}");

        // Emulators found online have already booted; only a fresh start waits.
        if resolved.kind() == TargetKind::Emulator && resolved.provisioned {
            self.emulators.wait_for_boot(resolved.id()).await?;
        }

        let ctx = InstallContext {
            manifest: self.manifest.as_ref(),
            build_results: &build_results,
        };
        self.installer.install(&resolved, &ctx).await?;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{AdbCall, FakeAdb, FakeBuilder, FakeEmulators, FakeInspector, FakeManifest};

    struct Harness {
        adb: Arc<FakeAdb>,
        emulators: Arc<FakeEmulators>,
        builder: Arc<FakeBuilder>,
    }

    impl Harness {
        fn new(devices: &[&str], images: &[(&str, Option<u32>)], apks: &[&str]) -> Self {
            Self {
                adb: Arc::new(FakeAdb::new(devices)),
                emulators: Arc::new(FakeEmulators::new(images)),
                builder: Arc::new(FakeBuilder::with_apks(apks)),
            }
        }

        fn coordinator(&self) -> RunCoordinator {
            RunCoordinator::new(
                RunParts {
                    adb: self.adb.clone(),
                    emulators: self.emulators.clone(),
                    inspector: Arc::new(FakeInspector::new(Some(34))),
                    builder: self.builder.clone(),
                    manifest: Arc::new(FakeManifest::new("io.aadk.hello", "MainActivity")),
                },
                &DeployConfig::default(),
            )
        }
    }

    #[tokio::test]
    async fn bundles_are_rejected_before_any_target_work() {
        let harness = Harness::new(&["R58M123ABC"], &[("Pixel_API_34", Some(34))], &["app-debug.apk"]);
        let options = RunOptions {
            package_type: PackageType::Bundle,
            ..RunOptions::default()
        };
        let err = harness.coordinator().run(&options).await.unwrap_err();
        assert!(matches!(err, DeployError::UnsupportedPackageType(PackageType::Bundle)));
        assert!(harness.adb.calls().is_empty());
        assert_eq!(harness.emulators.list_calls(), 0);
        assert_eq!(harness.builder.builds(), 0);
    }

    #[tokio::test]
    async fn empty_build_results_fail_before_resolution() {
        let harness = Harness::new(&["R58M123ABC"], &[], &[]);
        let options = RunOptions {
            build_type: BuildType::Release,
            ..RunOptions::default()
        };
        let err = harness.coordinator().run(&options).await.unwrap_err();
        assert_eq!(err.to_string(), "no release apk was found to deploy");
        assert!(harness.adb.calls().is_empty());
    }

    #[test]
    fn explicit_target_wins_over_kind_flags() {
        let options = RunOptions {
            target: Some("emulator-5556".into()),
            device: true,
            ..RunOptions::default()
        };
        assert_eq!(options.target_spec(), TargetSpec::with_id("emulator-5556"));

        let options = RunOptions {
            device: true,
            ..RunOptions::default()
        };
        assert_eq!(options.target_spec(), TargetSpec::with_kind(TargetKind::Device));

        let options = RunOptions {
            emulator: true,
            ..RunOptions::default()
        };
        assert_eq!(options.target_spec(), TargetSpec::with_kind(TargetKind::Emulator));
        assert_eq!(RunOptions::default().target_spec(), TargetSpec::any());
    }

    #[tokio::test]
    async fn device_run_skips_boot_wait() {
        let harness = Harness::new(&["emulator-5554", "R58M123ABC"], &[], &["out/app-debug.apk"]);
        let resolved = harness.coordinator().run(&RunOptions::default()).await.unwrap();
        assert_eq!(resolved.id(), "R58M123ABC");
        assert!(harness.emulators.boot_waits().is_empty());
        assert_eq!(harness.adb.count("install"), 1);
        assert_eq!(harness.adb.count("start"), 1);
    }

    #[tokio::test]
    async fn provisioned_emulator_is_booted_before_install() {
        let harness = Harness::new(
            &[],
            &[("Pixel_API_30", Some(30)), ("Pixel_API_34", Some(34))],
            &["out/app-debug.apk"],
        );
        let resolved = harness.coordinator().run(&RunOptions::default()).await.unwrap();

        assert_eq!(resolved.id(), "emulator-5554");
        assert!(resolved.provisioned);
        assert_eq!(harness.emulators.started(), vec!["Pixel_API_34".to_string()]);
        assert_eq!(harness.emulators.boot_waits(), vec!["emulator-5554".to_string()]);

        let calls = harness.adb.calls();
        assert!(calls.contains(&AdbCall::Install {
            id: "emulator-5554".into(),
            apk: "out/app-debug.apk".into(),
            replace: true,
            limited: true,
        }));
        assert_eq!(
            calls.last(),
            Some(&AdbCall::Start {
                id: "emulator-5554".into(),
                component: "io.aadk.hello/.MainActivity".into(),
            })
        );
    }

    #[tokio::test]
    async fn running_emulator_is_installed_without_boot_wait() {
        let harness = Harness::new(&["emulator-5556"], &[], &["out/app-debug.apk"]);
        let options = RunOptions {
            emulator: true,
            ..RunOptions::default()
        };
        let resolved = harness.coordinator().run(&options).await.unwrap();
        assert!(!resolved.provisioned);
        assert!(harness.emulators.boot_waits().is_empty());
        assert!(harness.emulators.started().is_empty());
        assert_eq!(harness.adb.count("install"), 1);
    }

    #[tokio::test]
    async fn unmatched_spec_surfaces_resolution_error() {
        let harness = Harness::new(&["emulator-5554"], &[], &["out/app-debug.apk"]);
        let options = RunOptions {
            device: true,
            ..RunOptions::default()
        };
        let err = harness.coordinator().run(&options).await.unwrap_err();
        assert_eq!(err.to_string(), r#"no target satisfies spec {"type":"device"}"#);
        assert_eq!(harness.adb.count("install"), 0);
    }
}
