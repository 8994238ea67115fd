use std::sync::Arc;

use crate::adb::AdbClient;
use crate::error::Result;
use crate::target::Target;

/// Reachable targets as currently reported by adb. Unordered and unfiltered.
#[derive(Clone)]
pub struct TargetCatalog {
    adb: Arc<dyn AdbClient>,
}

impl TargetCatalog {
    pub fn new(adb: Arc<dyn AdbClient>) -> Self {
        Self { adb }
    }

    pub async fn list(&self) -> Result<Vec<Target>> {
        let ids = self.adb.devices().await?;
        Ok(ids.iter().map(|id| Target::from_id(id)).collect())
    }
}
