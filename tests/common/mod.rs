//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use rust_ate::addressing::SiteNumber;
use rust_ate::config::KernelConfig;
use rust_ate::driver::DriverSession;
use rust_ate::host::RecordingHost;
use rust_ate::manager::SessionManager;
use rust_ate::mock::{MockSmuSession, TriggerBackplane};
use rust_ate::pin_map::PinMap;

/// Manager plus direct handles to the simulated instruments behind it.
pub struct Rig {
    pub manager: SessionManager,
    pub host: Arc<RecordingHost>,
    pub backplane: Arc<TriggerBackplane>,
    pub smus: Vec<Arc<MockSmuSession>>,
}

impl Rig {
    pub fn smu(&self, resource: &str) -> &MockSmuSession {
        self.smus
            .iter()
            .find(|s| s.resource_name() == resource)
            .map(Arc::as_ref)
            .unwrap_or_else(|| panic!("no simulated SMU named {resource}"))
    }
}

/// `(resource, model, channel_count)` triples.
pub type SmuSpec<'a> = (&'a str, &'a str, usize);

pub fn config() -> KernelConfig {
    let mut config = KernelConfig::default();
    config.executor.worker_threads = 4;
    config
}

/// Build a rig whose SMUs all share one trigger backplane.
pub fn rig(pin_map: &PinMap, sites: &[SiteNumber], smus: &[SmuSpec<'_>]) -> Rig {
    let backplane = TriggerBackplane::new();
    let smus: Vec<Arc<MockSmuSession>> = smus
        .iter()
        .map(|(resource, model, channels)| {
            Arc::new(MockSmuSession::with_backplane(
                resource,
                model,
                *channels,
                backplane.clone(),
            ))
        })
        .collect();
    rig_with_sessions(pin_map, sites, smus, backplane)
}

pub fn rig_with_sessions(
    pin_map: &PinMap,
    sites: &[SiteNumber],
    smus: Vec<Arc<MockSmuSession>>,
    backplane: Arc<TriggerBackplane>,
) -> Rig {
    let host = Arc::new(RecordingHost::new(sites));
    let sessions: Vec<Arc<dyn DriverSession>> = smus
        .iter()
        .map(|s| Arc::clone(s) as Arc<dyn DriverSession>)
        .collect();
    let manager = SessionManager::from_pin_map(pin_map, sessions, host.clone(), config())
        .expect("manager should build from the pin map");
    Rig {
        manager,
        host,
        backplane,
        smus,
    }
}

/// Index of the first `"<operation> <channel>"` entry in a session's call log.
pub fn position(operations: &[String], entry: &str) -> usize {
    operations
        .iter()
        .position(|op| op == entry)
        .unwrap_or_else(|| panic!("'{entry}' not found in {operations:?}"))
}
