//! Session Manager
//!
//! The explicitly owned context a test program creates once at initialization and passes
//! to whatever needs instrument access. It holds:
//!
//! - the [`SessionRegistry`] (sessions, associations, pin groups),
//! - the [`ParallelExecutor`] and its worker pool,
//! - the [`CapabilityTable`],
//! - the [`TestHostContext`],
//! - the loaded [`KernelConfig`].
//!
//! Nothing in the kernel is global; two managers never share state unless they share
//! driver sessions.
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = SessionManager::from_pin_map(&pin_map, sessions, host, KernelConfig::default())?;
//! let vdd = manager.dcpower(&["VDD"])?;
//! vdd.force_voltage(&PinSiteTable::scalar(ForceSettings::new(1.8, Some(0.1))))?;
//! let voltages = vdd.measure_voltage()?;
//! ```

use std::sync::Arc;

use tracing::info;

use crate::addressing::SiteNumber;
use crate::bundle::Bundle;
use crate::capability::CapabilityTable;
use crate::config::KernelConfig;
use crate::dcpower::DcPower;
use crate::driver::DriverSession;
use crate::error::{AppResult, AteError};
use crate::executor::ParallelExecutor;
use crate::host::TestHostContext;
use crate::pin_map::PinMapProvider;
use crate::registry::SessionRegistry;

/// Entry point for test code: owns the registry, worker pool, capability table and
/// host handle for one test program.
pub struct SessionManager {
    registry: SessionRegistry,
    executor: ParallelExecutor,
    capabilities: CapabilityTable,
    host: Arc<dyn TestHostContext>,
    config: KernelConfig,
}

impl SessionManager {
    /// Assemble a manager around an existing registry.
    ///
    /// Uses the DCPower capability table; replace it with [`Self::with_capabilities`].
    pub fn new(
        registry: SessionRegistry,
        host: Arc<dyn TestHostContext>,
        config: KernelConfig,
    ) -> AppResult<Self> {
        config.validate().map_err(AteError::Configuration)?;
        let executor = ParallelExecutor::new(config.executor.worker_threads)?;
        info!(
            workers = executor.workers(),
            sessions = registry.session_ids().len(),
            "Session manager ready"
        );
        Ok(Self {
            registry,
            executor,
            capabilities: CapabilityTable::dcpower_defaults(),
            host,
            config,
        })
    }

    /// Build the registry from a pin map, using the host's active sites.
    pub fn from_pin_map(
        provider: &dyn PinMapProvider,
        sessions: impl IntoIterator<Item = Arc<dyn DriverSession>>,
        host: Arc<dyn TestHostContext>,
        config: KernelConfig,
    ) -> AppResult<Self> {
        let registry = SessionRegistry::from_pin_map(provider, &host.active_sites(), sessions)?;
        Self::new(registry, host, config)
    }

    /// Replace the capability table.
    pub fn with_capabilities(mut self, capabilities: CapabilityTable) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Registered sessions and associations.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Worker pool shared by every operation.
    pub fn executor(&self) -> &ParallelExecutor {
        &self.executor
    }

    /// Model capability table.
    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    /// Test host the manager publishes to.
    pub fn host(&self) -> &dyn TestHostContext {
        self.host.as_ref()
    }

    /// Validated kernel configuration.
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Refresh the registry's active sites from the host.
    pub fn sync_active_sites(&mut self) {
        let sites = self.host.active_sites();
        self.registry.set_active_sites(&sites);
    }

    /// Resolve pins (and optionally sites) to a bundle.
    pub fn resolve(&self, pins: &[&str], sites: Option<&[SiteNumber]>) -> AppResult<Bundle> {
        Ok(self.registry.resolve(pins, sites)?)
    }

    /// DC power view of `pins` on every active site.
    pub fn dcpower(&self, pins: &[&str]) -> AppResult<DcPower<'_>> {
        Ok(DcPower::new(self, self.resolve(pins, None)?))
    }

    /// DC power view of `pins` restricted to `sites`.
    pub fn dcpower_on_sites(&self, pins: &[&str], sites: &[SiteNumber]) -> AppResult<DcPower<'_>> {
        Ok(DcPower::new(self, self.resolve(pins, Some(sites))?))
    }

    /// Report the members of `group` as one pin.
    pub fn merge_pin_group(&mut self, group: &str) -> AppResult<()> {
        Ok(self.registry.merge_pin_group(group)?)
    }

    /// Undo [`merge_pin_group`](Self::merge_pin_group).
    pub fn unmerge_pin_group(&mut self, group: &str) -> AppResult<()> {
        Ok(self.registry.unmerge_pin_group(group)?)
    }

    /// Wire the members of `group` as one higher-current output per site.
    ///
    /// # Errors
    ///
    /// `Unsupported` when a member's model cannot gang.
    pub fn gang_pin_group(&mut self, group: &str) -> AppResult<()> {
        self.registry.gang_pin_group(group, &self.capabilities)
    }

    /// Undo [`gang_pin_group`](Self::gang_pin_group). Former followers get their own
    /// source trigger back on the next force.
    pub fn ungang_pin_group(&mut self, group: &str) -> AppResult<()> {
        Ok(self.registry.ungang_pin_group(group)?)
    }
}
