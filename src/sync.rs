//! Synchronized Trigger Coordinator
//!
//! Hardware-timed acquisition across independent instrument sessions. One channel is
//! made the leader and originates a single software edge; every other channel is armed
//! as a follower of the leader's measure trigger terminal, so all records start on the
//! same physical event.
//!
//! # State Machine
//!
//! ```text
//! Idle ──configure──▶ Configured ──arm──▶ Armed ──fire──▶ Fired ──drain──▶ Drained
//!   ▲                   │  ▲                                                 │
//!   │                   └──┘ configure (idempotent)                          │
//!   └──────────────── Restored ◀────────────── restore ◀─────────────────────┘
//! ```
//!
//! - **configure**: snapshot every channel's measurement configuration (first call only),
//!   then abort and apply aperture time, zero source delay and measure-on-trigger. The
//!   snapshot is taken before anything is touched, so a partially applied configure can
//!   still be restored.
//! - **arm**: leader gets a software edge trigger, followers a digital edge on the
//!   leader's terminal; every channel is committed, sized and initiated.
//! - **fire**: exactly one software edge, on the leader.
//! - **drain**: fetch every record with timeout = measurement time + margin.
//! - **restore**: abort, replay the snapshot, initiate again.
//!
//! [`SynchronizedAcquisition::run`] drives the whole sequence and restores after any
//! failure past the snapshot, including a configure that failed on some channels, before
//! returning the error.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::addressing::ChannelAddress;
use crate::broadcast;
use crate::bundle::Bundle;
use crate::capability::{CapabilityTable, Feature};
use crate::data::PinSiteTable;
use crate::driver::{MeasureConfig, MeasureWhen, Record, TriggerConfig, TriggerKind};
use crate::error::{AggregateExecutionError, AppResult, AteError, ChannelFailure};
use crate::executor::{ChannelResults, ParallelExecutor};

/// Per-channel acquisition request.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    /// Ignored on models without aperture time control.
    pub aperture_time_s: f64,
    /// Record duration in seconds; must be finite and positive.
    pub measurement_time_s: f64,
}

impl AcquisitionSettings {
    /// Aperture and measurement time in seconds.
    pub fn new(aperture_time_s: f64, measurement_time_s: f64) -> Self {
        Self {
            aperture_time_s,
            measurement_time_s,
        }
    }
}

/// Where a [`SynchronizedAcquisition`] is in its sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquisitionPhase {
    /// Nothing applied yet.
    Idle,
    /// Snapshot taken and measurement settings applied.
    Configured,
    /// Followers wired to the leader and every channel initiated.
    Armed,
    /// Leader edge sent.
    Fired,
    /// Every record fetched.
    Drained,
    /// Snapshot replayed.
    Restored,
}

impl fmt::Display for AcquisitionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One synchronized acquisition over a bundle.
pub struct SynchronizedAcquisition<'a> {
    executor: &'a ParallelExecutor,
    capabilities: &'a CapabilityTable,
    bundle: &'a Bundle,
    fetch_timeout_margin: Duration,
    phase: AcquisitionPhase,
    snapshot: Option<ChannelResults<MeasureConfig>>,
    settings: Option<ChannelResults<AcquisitionSettings>>,
    record_lengths: Option<ChannelResults<usize>>,
    leader: Option<ChannelAddress>,
    records: Option<ChannelResults<Record>>,
}

impl<'a> SynchronizedAcquisition<'a> {
    /// Acquisition over `bundle`; nothing touches hardware until `configure`.
    pub fn new(
        executor: &'a ParallelExecutor,
        capabilities: &'a CapabilityTable,
        bundle: &'a Bundle,
        fetch_timeout_margin: Duration,
    ) -> Self {
        Self {
            executor,
            capabilities,
            bundle,
            fetch_timeout_margin,
            phase: AcquisitionPhase::Idle,
            snapshot: None,
            settings: None,
            record_lengths: None,
            leader: None,
            records: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> AcquisitionPhase {
        self.phase
    }

    /// Leader channel, known once armed.
    pub fn leader(&self) -> Option<&ChannelAddress> {
        self.leader.as_ref()
    }

    /// Fetched records, available once drained.
    pub fn records(&self) -> Option<&ChannelResults<Record>> {
        self.records.as_ref()
    }

    /// Measurement configuration captured before the first configure, until restored.
    pub fn snapshot(&self) -> Option<&ChannelResults<MeasureConfig>> {
        self.snapshot.as_ref()
    }

    fn transition(&mut self, next: AcquisitionPhase) {
        debug!(from = %self.phase, to = %next, "Synchronized acquisition phase transition");
        self.phase = next;
    }

    fn expect_phase(&self, operation: &'static str, allowed: &[AcquisitionPhase]) -> AppResult<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(AteError::InvalidPhase {
                operation,
                phase: self.phase.to_string(),
            })
        }
    }

    // =========================================================================
    // Phases
    // =========================================================================

    /// Snapshot, abort and push the acquisition configuration to every channel.
    ///
    /// Calling it again before `arm` reapplies the same configuration without taking a
    /// new snapshot. If applying fails on some channels the snapshot is kept and
    /// [`restore`](Self::restore) puts every channel back.
    pub fn configure(&mut self, table: &PinSiteTable<AcquisitionSettings>) -> AppResult<()> {
        use AcquisitionPhase::*;
        self.expect_phase("configure", &[Idle, Configured, Restored])?;
        if self.phase == Restored {
            self.records = None;
            self.leader = None;
        }
        if self.bundle.is_empty() {
            return Err(AteError::Configuration(
                "Synchronized acquisition needs at least one channel".to_string(),
            ));
        }
        broadcast::validate_coverage(table, self.bundle.channels())?;
        for address in self.bundle.channels() {
            self.capabilities
                .require(&address.model, Feature::Trigger(TriggerKind::Measure))?;
            let settings = broadcast::select(table, address)?;
            let t = settings.measurement_time_s;
            if !(t.is_finite() && t > 0.0) {
                return Err(AteError::Configuration(format!(
                    "Measurement time for {} must be finite and positive, got {}",
                    address, settings.measurement_time_s
                )));
            }
        }

        if self.snapshot.is_none() {
            let snapshot =
                self.executor
                    .run_per_channel(self.bundle, "sync_snapshot", |session, address| {
                        session.driver.measure_config(&address.channel)
                    })?;
            self.snapshot = Some(snapshot);
        }

        let capabilities = self.capabilities;
        let configured = self.executor.run_per_channel_with(
            self.bundle,
            "sync_configure",
            table,
            |session, address, settings| {
                let driver = &session.driver;
                driver.abort(&address.channel)?;
                let current = driver.measure_config(&address.channel)?;
                let aperture_time_s = if capabilities.supports(&address.model, Feature::ApertureTime)? {
                    settings.aperture_time_s
                } else {
                    current.aperture_time_s
                };
                let config = MeasureConfig {
                    aperture_time_s,
                    measure_when: MeasureWhen::OnMeasureTrigger,
                    measure_trigger: current.measure_trigger,
                    source_delay_s: 0.0,
                };
                driver.configure_measurement(&address.channel, &config)?;
                Ok(*settings)
            },
        )?;

        self.settings = Some(configured);
        self.transition(Configured);
        Ok(())
    }

    /// Pick the leader, wire followers to it, commit, size records and initiate.
    pub fn arm(&mut self) -> AppResult<()> {
        self.expect_phase("arm", &[AcquisitionPhase::Configured])?;
        let bundle = self.bundle;
        let (_, leader) = bundle.first_channel().ok_or_else(|| {
            AteError::Configuration("Synchronized acquisition needs at least one channel".to_string())
        })?;
        let leader_terminal = self.capabilities.terminal_name(leader, TriggerKind::Measure)?;
        let settings = self.settings.as_ref().ok_or_else(|| {
            AteError::Configuration("Acquisition settings missing after configure".to_string())
        })?;

        let record_lengths = self.executor.run_per_channel(bundle, "sync_arm", |session, address| {
            let driver = &session.driver;
            let trigger = if address == leader {
                TriggerConfig::SoftwareEdge
            } else {
                TriggerConfig::DigitalEdge {
                    terminal: leader_terminal.clone(),
                }
            };
            let mut config = driver.measure_config(&address.channel)?;
            config.measure_trigger = trigger;
            driver.configure_measurement(&address.channel, &config)?;
            driver.commit(&address.channel)?;

            let measurement_time_s = settings
                .get(address)
                .map(|s| s.measurement_time_s)
                .ok_or_else(|| anyhow::anyhow!("No acquisition settings for {address}"))?;
            let delta_time_s = driver.record_delta_time(&address.channel)?;
            let length = record_length(measurement_time_s, delta_time_s);
            driver.set_record_length(&address.channel, length)?;
            driver.initiate(&address.channel)?;
            Ok(length)
        })?;

        debug!(leader = %leader, terminal = %leader_terminal, "Followers armed on leader terminal");
        self.leader = Some(leader.clone());
        self.record_lengths = Some(record_lengths);
        self.transition(AcquisitionPhase::Armed);
        Ok(())
    }

    /// Send the one software edge, on the leader.
    pub fn fire(&mut self) -> AppResult<()> {
        self.expect_phase("fire", &[AcquisitionPhase::Armed])?;
        let bundle = self.bundle;
        let (session, leader) = bundle.first_channel().ok_or_else(|| {
            AteError::Configuration("Synchronized acquisition needs at least one channel".to_string())
        })?;
        session
            .driver
            .send_software_edge(&leader.channel, TriggerKind::Measure)
            .map_err(|error| {
                AteError::from(AggregateExecutionError::new(
                    "sync_fire",
                    vec![ChannelFailure {
                        session: session.id.clone(),
                        channels: vec![leader.clone()],
                        error,
                    }],
                ))
            })?;
        info!(leader = %leader, "Sent synchronized measure trigger");
        self.transition(AcquisitionPhase::Fired);
        Ok(())
    }

    /// Fetch every channel's record.
    pub fn drain(&mut self) -> AppResult<()> {
        self.expect_phase("drain", &[AcquisitionPhase::Fired])?;
        let settings = self.settings.as_ref().ok_or_else(|| {
            AteError::Configuration("Acquisition settings missing after configure".to_string())
        })?;
        let record_lengths = self.record_lengths.as_ref().ok_or_else(|| {
            AteError::Configuration("Record lengths missing after arm".to_string())
        })?;
        let margin = self.fetch_timeout_margin;

        let fetched = self.executor.run_per_channel(self.bundle, "sync_fetch", |session, address| {
            let measurement_time_s = settings
                .get(address)
                .map(|s| s.measurement_time_s)
                .ok_or_else(|| anyhow::anyhow!("No acquisition settings for {address}"))?;
            let count = record_lengths
                .get(address)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("No record length for {address}"))?;
            let timeout = Duration::from_secs_f64(measurement_time_s) + margin;
            session.driver.fetch(&address.channel, count, timeout)
        });

        match fetched {
            Ok(records) => {
                self.records = Some(records);
                self.transition(AcquisitionPhase::Drained);
                Ok(())
            }
            Err(aggregate) if aggregate.all_timeouts() => {
                let longest = settings
                    .iter()
                    .map(|(_, s)| s.measurement_time_s)
                    .fold(0.0, f64::max);
                warn!(failures = aggregate.len(), "Synchronized fetch timed out");
                Err(AteError::timeout(
                    format!("sync_fetch ({aggregate})"),
                    Duration::from_secs_f64(longest) + margin,
                ))
            }
            Err(aggregate) => Err(aggregate.into()),
        }
    }

    /// Abort every channel, replay the snapshot and initiate again.
    ///
    /// Also valid straight after a configure that failed part way, as long as the
    /// snapshot was taken.
    pub fn restore(&mut self) -> AppResult<()> {
        use AcquisitionPhase::*;
        let partially_configured = matches!(self.phase, Idle | Restored) && self.snapshot.is_some();
        if !partially_configured {
            self.expect_phase("restore", &[Configured, Armed, Fired, Drained])?;
        }
        let snapshot = self.snapshot.as_ref().ok_or_else(|| {
            AteError::Configuration("No configuration snapshot to restore".to_string())
        })?;

        self.executor.run_per_channel(self.bundle, "sync_restore", |session, address| {
            let prior = snapshot
                .get(address)
                .ok_or_else(|| anyhow::anyhow!("No snapshot for {address}"))?;
            let driver = &session.driver;
            driver.abort(&address.channel)?;
            driver.configure_measurement(&address.channel, prior)?;
            driver.initiate(&address.channel)
        })?;
        self.snapshot = None;
        self.transition(Restored);
        Ok(())
    }

    fn arm_fire_drain(&mut self) -> AppResult<()> {
        self.arm()?;
        self.fire()?;
        self.drain()
    }

    /// Configure, arm, fire, drain and restore.
    ///
    /// Any failure once the snapshot is taken still restores before the error is
    /// returned; if the restore fails too, the original error wins and the restore
    /// failure is logged.
    pub fn run(mut self, table: &PinSiteTable<AcquisitionSettings>) -> AppResult<ChannelResults<Record>> {
        if let Err(error) = self.configure(table) {
            if self.snapshot.is_some() {
                if let Err(restore_error) = self.restore() {
                    warn!(error = %restore_error, "Restore after failed configure also failed");
                }
            }
            return Err(error);
        }
        let outcome = self.arm_fire_drain();
        let restored = self.restore();
        match (outcome, restored) {
            (Ok(()), Ok(())) => self.records.take().ok_or_else(|| {
                AteError::Configuration("Synchronized acquisition produced no records".to_string())
            }),
            (Ok(()), Err(restore_error)) => Err(restore_error),
            (Err(error), Ok(())) => Err(error),
            (Err(error), Err(restore_error)) => {
                warn!(error = %restore_error, "Restore after failed acquisition also failed");
                Err(error)
            }
        }
    }
}

/// Points needed to cover `measurement_time_s` at `delta_time_s` per point.
pub fn record_length(measurement_time_s: f64, delta_time_s: f64) -> usize {
    if delta_time_s <= 0.0 {
        return 1;
    }
    // Tolerate float noise such as 0.01 / 0.001 = 10.000000000000002.
    let points = (measurement_time_s / delta_time_s - 1e-9).ceil();
    (points as usize).max(1)
}
