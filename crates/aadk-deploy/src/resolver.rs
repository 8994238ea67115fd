use std::sync::Arc;

use tracing::{debug, info};

use crate::adb::AdbClient;
use crate::builder::{detect_architecture, BuildResults};
use crate::catalog::TargetCatalog;
use crate::emulator::EmulatorManager;
use crate::error::{DeployError, Result};
use crate::manifest::PackageInspector;
use crate::target::{ResolvedTarget, Target, TargetKind, TargetSpec};

/// Turns a [`TargetSpec`] into one concrete, running target.
///
/// Online targets are always considered before an emulator is started, and
/// physical devices before emulators.
pub struct TargetResolver {
    catalog: TargetCatalog,
    adb: Arc<dyn AdbClient>,
    emulators: Arc<dyn EmulatorManager>,
    inspector: Arc<dyn PackageInspector>,
}

impl TargetResolver {
    pub fn new(
        adb: Arc<dyn AdbClient>,
        emulators: Arc<dyn EmulatorManager>,
        inspector: Arc<dyn PackageInspector>,
    ) -> Self {
        Self {
            catalog: TargetCatalog::new(Arc::clone(&adb)),
            adb,
            emulators,
            inspector,
        }
    }

    pub async fn resolve(
        &self,
        spec: &TargetSpec,
        build_results: &BuildResults,
    ) -> Result<ResolvedTarget> {
        let (target, provisioned) = match self.resolve_online(spec).await? {
            Some(target) => (target, false),
            None => match self.resolve_offline_emulator(spec, build_results).await? {
                Some(target) => (target, true),
                None => return Err(DeployError::NoTarget(spec.clone())),
            },
        };
        let arch = detect_architecture(self.adb.as_ref(), &target.id).await?;
        Ok(ResolvedTarget {
            target,
            arch,
            provisioned,
        })
    }

    async fn resolve_online(&self, spec: &TargetSpec) -> Result<Option<Target>> {
        let mut targets = self.catalog.list().await?;
        // Stable: adb's order is kept within each kind.
        targets.sort_by_key(|target| target.kind == TargetKind::Emulator);
        let found = targets.into_iter().find(|target| spec.matches(target));
        if found.is_none() {
            debug!("no online target matches {spec}");
        }
        Ok(found)
    }

    async fn resolve_offline_emulator(
        &self,
        spec: &TargetSpec,
        build_results: &BuildResults,
    ) -> Result<Option<Target>> {
        if spec.kind == Some(TargetKind::Device) {
            return Ok(None);
        }

        let image_name = match spec.id.as_deref() {
            Some(id) => {
                let images = self.emulators.list_images().await?;
                match images.into_iter().find(|image| image.name == id) {
                    Some(image) => image.name,
                    None => return Ok(None),
                }
            }
            None => {
                let target_sdk = match build_results.apk_paths().first() {
                    Some(apk) => self.inspector.target_sdk(apk).await?,
                    None => None,
                };
                debug!("looking for an emulator image matching target sdk {target_sdk:?}");
                match self.emulators.best_image(target_sdk).await? {
                    Some(image) => image.name,
                    None => return Ok(None),
                }
            }
        };

        info!("No online target matched, starting emulator image {image_name}");
        let id = self.emulators.start(&image_name).await?;
        Ok(Some(Target {
            id,
            kind: TargetKind::Emulator,
        }))
    }
}
