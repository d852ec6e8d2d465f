//! DC Power Operations
//!
//! Source-measure operations built on the kernel. Each one is a driver action fanned out
//! by the executor, parameterized through [`PinSiteTable`]s and reduced back into
//! [`PinSiteData`]:
//!
//! - **Source**: `configure_source`, `force_voltage`, `force_current`, `initiate`
//! - **Measure**: `configure_measure_settings`, `measure_voltage`, `measure_current`,
//!   `measure`, `measure_per_instrument`, `measure_and_publish_*`
//! - **Control**: `abort`
//! - **Hardware-timed**: `acquire_synchronized`, `acquire_synchronized_per_site`
//!
//! # Ganged pins
//!
//! Ganged channels split the current across the gang (see
//! [`SourceSettings::split_for_gang`]), followers source on the leader's source trigger,
//! and followers are initiated before anything else so they are armed when the leader
//! starts.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::addressing::{Cascading, ChannelAddress, GangRole};
use crate::broadcast;
use crate::bundle::Bundle;
use crate::capability::Feature;
use crate::data::{PinSiteData, PinSiteTable};
use crate::driver::{MeasureWhen, Record, Sample, SourceSettings, TriggerConfig};
use crate::error::{AppResult, AteError};
use crate::executor::ChannelResults;
use crate::manager::SessionManager;
use crate::reducer;
use crate::sync::{AcquisitionSettings, SynchronizedAcquisition};

/// Level and compliance limit for a force operation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForceSettings {
    /// Volts or amps, depending on the operation.
    pub level: f64,
    /// Compliance limit; driver default when absent.
    pub limit: Option<f64>,
}

impl ForceSettings {
    /// Level with an optional limit.
    pub fn new(level: f64, limit: Option<f64>) -> Self {
        Self { level, limit }
    }
}

/// Measurement settings; `None` leaves the channel's current value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasureSettings {
    /// Skipped on models without aperture time control.
    pub aperture_time_s: Option<f64>,
    /// Measurement start condition.
    pub measure_when: Option<MeasureWhen>,
}

/// DC power view over one bundle.
pub struct DcPower<'a> {
    manager: &'a SessionManager,
    bundle: Bundle,
}

impl<'a> DcPower<'a> {
    pub(crate) fn new(manager: &'a SessionManager, bundle: Bundle) -> Self {
        Self { manager, bundle }
    }

    /// Channels this view acts on.
    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    fn reduce<T>(&self, results: &ChannelResults<T>) -> AppResult<PinSiteData<T>>
    where
        T: Clone + PartialEq + std::fmt::Debug,
    {
        reducer::to_per_site_per_pin(results, self.manager.config().reducer.shared_pin_policy)
    }

    // =========================================================================
    // Source
    // =========================================================================

    /// Push source settings to every channel without initiating.
    ///
    /// Ganged followers are slaved to their leader's source trigger; every other channel
    /// has its source trigger cleared, so a channel left over from an earlier gang sources
    /// on its own again.
    pub fn configure_source(&self, table: &PinSiteTable<SourceSettings>) -> AppResult<()> {
        self.manager.executor().run_per_channel_with(
            &self.bundle,
            "configure_source",
            table,
            |session, address, settings| {
                let share = settings.split_for_gang(address.gang_size());
                session.driver.configure_source(&address.channel, &share)?;
                let trigger = match leader_source_trigger(address) {
                    Some(terminal) => TriggerConfig::DigitalEdge {
                        terminal: terminal.to_string(),
                    },
                    None => TriggerConfig::None,
                };
                session.driver.configure_source_trigger(&address.channel, &trigger)
            },
        )?;
        Ok(())
    }

    /// Initiate every channel, ganged followers first.
    pub fn initiate(&self) -> AppResult<()> {
        let executor = self.manager.executor();
        if self.bundle.has_ganged_channels() {
            executor.run_per_channel(&self.bundle, "initiate_followers", |session, address| {
                if address.is_ganged_follower() {
                    session.driver.initiate(&address.channel)?;
                }
                Ok(())
            })?;
            executor.run_per_channel(&self.bundle, "initiate", |session, address| {
                if !address.is_ganged_follower() {
                    session.driver.initiate(&address.channel)?;
                }
                Ok(())
            })?;
        } else {
            executor.run_per_channel(&self.bundle, "initiate", |session, address| {
                session.driver.initiate(&address.channel)
            })?;
        }
        Ok(())
    }

    /// Configure, initiate and wait until every channel is sourcing.
    pub fn force(&self, table: &PinSiteTable<SourceSettings>) -> AppResult<()> {
        self.configure_source(table)?;
        self.initiate()?;
        let timeout = self.manager.config().acquisition.source_complete_timeout();
        self.manager
            .executor()
            .run_per_channel(&self.bundle, "wait_for_source_complete", |session, address| {
                session.driver.wait_for_source_complete(&address.channel, timeout)
            })?;
        debug!(channels = self.bundle.len(), "Force completed");
        Ok(())
    }

    /// Force voltage with an optional current limit.
    pub fn force_voltage(&self, table: &PinSiteTable<ForceSettings>) -> AppResult<()> {
        self.force(&table.map(|s| SourceSettings::voltage(s.level, s.limit)))
    }

    /// Force current with an optional voltage limit.
    pub fn force_current(&self, table: &PinSiteTable<ForceSettings>) -> AppResult<()> {
        self.force(&table.map(|s| SourceSettings::current(s.level, s.limit)))
    }

    // =========================================================================
    // Measure
    // =========================================================================

    /// Apply aperture time and measure-when per channel.
    ///
    /// # Errors
    ///
    /// Capability errors for unknown models are raised before any channel is touched.
    pub fn configure_measure_settings(&self, table: &PinSiteTable<MeasureSettings>) -> AppResult<()> {
        let capabilities = self.manager.capabilities();
        broadcast::validate_coverage(table, self.bundle.channels())?;
        for address in self.bundle.channels() {
            capabilities.supports(&address.model, Feature::ApertureTime)?;
        }
        self.manager.executor().run_per_channel_with(
            &self.bundle,
            "configure_measure_settings",
            table,
            |session, address, settings| {
                let mut config = session.driver.measure_config(&address.channel)?;
                if let Some(aperture) = settings.aperture_time_s {
                    if capabilities.supports(&address.model, Feature::ApertureTime)? {
                        config.aperture_time_s = aperture;
                    }
                }
                if let Some(measure_when) = settings.measure_when {
                    config.measure_when = measure_when;
                }
                session.driver.configure_measurement(&address.channel, &config)
            },
        )?;
        Ok(())
    }

    fn measure_channels(&self, operation: &str) -> AppResult<ChannelResults<Sample>> {
        Ok(self
            .manager
            .executor()
            .run_per_channel(&self.bundle, operation, |session, address| {
                session.driver.measure(&address.channel)
            })?)
    }

    /// Voltage and current per pin and site.
    pub fn measure(&self) -> AppResult<PinSiteData<Sample>> {
        self.reduce(&self.measure_channels("measure")?)
    }

    /// Measured voltage per pin and site.
    pub fn measure_voltage(&self) -> AppResult<PinSiteData<f64>> {
        let samples = self.measure_channels("measure_voltage")?;
        self.reduce(&samples.map(|s| s.voltage))
    }

    /// Measured current per pin and site.
    pub fn measure_current(&self) -> AppResult<PinSiteData<f64>> {
        let samples = self.measure_channels("measure_current")?;
        self.reduce(&samples.map(|s| s.current))
    }

    /// Samples as `[session][channel]`, in executor order.
    pub fn measure_per_instrument(&self) -> AppResult<Vec<Vec<Sample>>> {
        Ok(reducer::to_per_instrument_per_channel(
            &self.measure_channels("measure_per_instrument")?,
        ))
    }

    /// Measure voltage and publish it under `published_data_id`.
    pub fn measure_and_publish_voltage(&self, published_data_id: &str) -> AppResult<PinSiteData<f64>> {
        let voltages = self.measure_voltage()?;
        self.publish(published_data_id, &voltages)?;
        Ok(voltages)
    }

    /// Measure current and publish it under `published_data_id`.
    pub fn measure_and_publish_current(&self, published_data_id: &str) -> AppResult<PinSiteData<f64>> {
        let currents = self.measure_current()?;
        self.publish(published_data_id, &currents)?;
        Ok(currents)
    }

    fn publish(&self, published_data_id: &str, data: &PinSiteData<f64>) -> AppResult<()> {
        self.manager
            .host()
            .publish(published_data_id, data)
            .map_err(|e| AteError::Host(format!("{e:#}")))
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Abort every channel, one task per session.
    pub fn abort(&self) -> AppResult<()> {
        self.manager
            .executor()
            .run_per_session(&self.bundle, "abort", |session| {
                for address in &session.channels {
                    session.driver.abort(&address.channel)?;
                }
                Ok(())
            })?;
        Ok(())
    }

    // =========================================================================
    // Hardware-timed acquisition
    // =========================================================================

    /// Coordinator for a step-by-step synchronized acquisition over this bundle.
    pub fn synchronized_acquisition(&self) -> SynchronizedAcquisition<'_> {
        SynchronizedAcquisition::new(
            self.manager.executor(),
            self.manager.capabilities(),
            &self.bundle,
            self.manager.config().acquisition.fetch_timeout_margin(),
        )
    }

    /// Acquire one record per channel, all started by a single leader trigger.
    pub fn acquire_synchronized(
        &self,
        table: &PinSiteTable<AcquisitionSettings>,
    ) -> AppResult<ChannelResults<Record>> {
        self.synchronized_acquisition().run(table)
    }

    /// [`acquire_synchronized`](Self::acquire_synchronized) keyed by pin and site.
    pub fn acquire_synchronized_per_site(
        &self,
        table: &PinSiteTable<AcquisitionSettings>,
    ) -> AppResult<PinSiteData<Record>> {
        self.reduce(&self.acquire_synchronized(table)?)
    }
}

fn leader_source_trigger(address: &ChannelAddress) -> Option<&str> {
    match &address.cascading {
        Some(Cascading::Ganged {
            role: GangRole::Follower,
            leader_source_trigger,
            ..
        }) => Some(leader_source_trigger),
        _ => None,
    }
}
