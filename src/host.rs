//! Test-Host Context
//!
//! The kernel's only view of the test executive hosting it: which sites are active, and
//! where measured data goes. [`RecordingHost`] keeps published data in memory for tests
//! and standalone use.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::addressing::SiteNumber;
use crate::data::PinSiteData;

/// The test program host the kernel runs inside.
pub trait TestHostContext: Send + Sync {
    /// Sites active in the current test program run.
    fn active_sites(&self) -> Vec<SiteNumber>;

    /// Hand per-site measurements to the host under `published_data_id`.
    fn publish(&self, published_data_id: &str, data: &PinSiteData<f64>) -> anyhow::Result<()>;
}

/// In-memory host. Later publications under the same id replace earlier ones.
#[derive(Debug, Default)]
pub struct RecordingHost {
    sites: Vec<SiteNumber>,
    published: RwLock<BTreeMap<String, PinSiteData<f64>>>,
}

impl RecordingHost {
    /// Host reporting `sites` as active.
    pub fn new(sites: &[SiteNumber]) -> Self {
        Self {
            sites: sites.to_vec(),
            published: RwLock::new(BTreeMap::new()),
        }
    }

    /// Last data published under `published_data_id`.
    pub fn published(&self, published_data_id: &str) -> Option<PinSiteData<f64>> {
        self.published.read().get(published_data_id).cloned()
    }

    /// Every id published so far, in name order.
    pub fn published_ids(&self) -> Vec<String> {
        self.published.read().keys().cloned().collect()
    }
}

impl TestHostContext for RecordingHost {
    fn active_sites(&self) -> Vec<SiteNumber> {
        self.sites.clone()
    }

    fn publish(&self, published_data_id: &str, data: &PinSiteData<f64>) -> anyhow::Result<()> {
        debug!(id = published_data_id, entries = data.len(), "Publishing measurements");
        self.published
            .write()
            .insert(published_data_id.to_string(), data.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_replaces_by_id() {
        let host = RecordingHost::new(&[0, 1]);
        host.publish("Vout", &PinSiteData::uniform(&["VDD"], &[0, 1], 1.0))
            .unwrap();
        host.publish("Vout", &PinSiteData::uniform(&["VDD"], &[0], 2.0))
            .unwrap();
        let data = host.published("Vout").unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data.get("VDD", 0), Some(&2.0));
        assert_eq!(host.active_sites(), vec![0, 1]);
        assert_eq!(host.published_ids(), vec!["Vout".to_string()]);
    }
}
