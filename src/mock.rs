//! Mock Hardware Implementations
//!
//! Simulated SMU sessions for exercising the kernel without instruments.
//!
//! # Available Mocks
//!
//! - `MockSmuSession` - Multi-channel source-measure unit implementing [`DriverSession`]
//! - `TriggerBackplane` - Shared trigger bus (PXI backplane) several sessions route over
//!
//! # Simulation Model
//!
//! - Every channel drives a resistive load (1 kΩ by default); the measured value is
//!   clamped to the compliance limit, which flags the sample as in compliance.
//! - Initiating a channel arms its trigger inputs. An input only accepts edges pulsed on
//!   its terminal *after* the channel was armed, so a follower initiated after its
//!   leader misses the edge exactly as hardware would.
//! - A channel whose source trigger is `None` starts sourcing on initiate and pulses its
//!   own source trigger terminal, which is what ganged followers listen on.
//! - Fetching from a channel whose measure trigger never fired returns a kernel timeout
//!   immediately instead of blocking.
//! - Faults can be injected per (channel, operation) to drive failure paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::capability::{CapabilityTable, TerminalNaming};
use crate::driver::{
    DriverSession, MeasureConfig, MeasureWhen, OutputFunction, Record, Sample, SourceSettings,
    TriggerConfig, TriggerKind,
};
use crate::error::AteError;

/// Sample period used when a channel has no aperture time configured.
pub const DEFAULT_SAMPLE_PERIOD_S: f64 = 1e-3;

// =============================================================================
// TriggerBackplane - Simulated Trigger Bus
// =============================================================================

/// One edge pulsed on the backplane.
#[derive(Clone, Debug, PartialEq)]
pub struct Edge {
    /// Terminal the edge was pulsed on.
    pub terminal: String,
    /// Backplane-wide ordering; later edges have larger numbers.
    pub sequence: u64,
    /// Wall-clock time of the pulse.
    pub at: DateTime<Utc>,
}

/// Shared trigger bus. Sessions created with the same backplane can route triggers to
/// each other by terminal name.
#[derive(Debug, Default)]
pub struct TriggerBackplane {
    sequence: AtomicU64,
    edges: Mutex<Vec<Edge>>,
}

impl TriggerBackplane {
    /// Fresh backplane with no edges.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn pulse(&self, terminal: &str) -> DateTime<Utc> {
        let at = Utc::now();
        let sequence = self.next_sequence();
        self.edges.lock().push(Edge {
            terminal: terminal.to_string(),
            sequence,
            at,
        });
        at
    }

    /// First edge on `terminal` pulsed after `armed_at`.
    fn edge_after(&self, terminal: &str, armed_at: u64) -> Option<DateTime<Utc>> {
        self.edges
            .lock()
            .iter()
            .find(|e| e.terminal == terminal && e.sequence > armed_at)
            .map(|e| e.at)
    }

    /// Every edge pulsed so far, in order.
    pub fn edges(&self) -> Vec<Edge> {
        self.edges.lock().clone()
    }

    /// Number of edges of one trigger kind pulsed on any terminal.
    pub fn edge_count(&self, trigger: TriggerKind) -> usize {
        let suffix = format!("/{}", trigger.terminal_suffix());
        self.edges
            .lock()
            .iter()
            .filter(|e| e.terminal.ends_with(&suffix))
            .count()
    }
}

// =============================================================================
// MockSmuSession - Simulated Source-Measure Unit
// =============================================================================

#[derive(Clone, Debug)]
struct ChannelState {
    source: Option<SourceSettings>,
    source_trigger: TriggerConfig,
    measure: MeasureConfig,
    record_length: usize,
    committed: bool,
    /// Backplane sequence number at the last initiate, `None` while idle.
    armed_at: Option<u64>,
    load_ohms: f64,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            source: None,
            source_trigger: TriggerConfig::None,
            measure: MeasureConfig::default(),
            record_length: 1,
            committed: false,
            armed_at: None,
            load_ohms: 1_000.0,
        }
    }
}

/// Simulated multi-channel SMU.
///
/// # Example
///
/// ```rust,ignore
/// let backplane = TriggerBackplane::new();
/// let smu = MockSmuSession::with_backplane("SMU_4137_C1_S01", "NI PXIe-4137", 4, backplane.clone());
/// smu.configure_source("SMU_4137_C1_S01/0", &SourceSettings::voltage(1.0, Some(0.01)))?;
/// smu.initiate("SMU_4137_C1_S01/0")?;
/// assert_eq!(smu.measure("SMU_4137_C1_S01/0")?.voltage, 1.0);
/// ```
pub struct MockSmuSession {
    resource: String,
    model: String,
    naming: TerminalNaming,
    backplane: Arc<TriggerBackplane>,
    channels: HashMap<String, Mutex<ChannelState>>,
    faults: Mutex<HashSet<(String, String)>>,
    operations: Mutex<Vec<String>>,
    software_edges: AtomicUsize,
}

impl MockSmuSession {
    /// Create a session with `channel_count` channels on a private backplane.
    pub fn new(resource: &str, model: &str, channel_count: usize) -> Self {
        Self::with_backplane(resource, model, channel_count, TriggerBackplane::new())
    }

    /// Create a session routing its triggers over a shared backplane.
    ///
    /// Terminal naming follows the model's entry in the default capability table.
    pub fn with_backplane(
        resource: &str,
        model: &str,
        channel_count: usize,
        backplane: Arc<TriggerBackplane>,
    ) -> Self {
        let naming = CapabilityTable::dcpower_defaults()
            .terminal_naming(model)
            .unwrap_or(TerminalNaming::PerEngine);
        let channels = (0..channel_count)
            .map(|i| (format!("{resource}/{i}"), Mutex::new(ChannelState::default())))
            .collect();
        Self {
            resource: resource.to_string(),
            model: model.to_string(),
            naming,
            backplane,
            channels,
            faults: Mutex::new(HashSet::new()),
            operations: Mutex::new(Vec::new()),
            software_edges: AtomicUsize::new(0),
        }
    }

    /// Model string this session reports.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Backplane the session's terminals live on.
    pub fn backplane(&self) -> &Arc<TriggerBackplane> {
        &self.backplane
    }

    /// Make every future `operation` call on `channel` fail.
    pub fn inject_fault(&self, channel: &str, operation: &str) {
        self.faults
            .lock()
            .insert((channel.to_string(), operation.to_string()));
    }

    /// Remove every injected fault.
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Set the simulated load resistance seen by one channel.
    pub fn set_load(&self, channel: &str, ohms: f64) -> Result<()> {
        self.with_channel(channel, |state| {
            state.load_ohms = ohms;
            Ok(())
        })
    }

    /// Software edges sent through this session.
    pub fn software_edge_count(&self) -> usize {
        self.software_edges.load(Ordering::SeqCst)
    }

    /// `"<operation> <channel>"` entries in call order.
    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().clone()
    }

    /// Empty the operation log.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    /// True once the channel was committed or initiated.
    pub fn is_committed(&self, channel: &str) -> Result<bool> {
        self.with_channel(channel, |state| Ok(state.committed))
    }

    /// True between `initiate` and `abort`.
    pub fn is_running(&self, channel: &str) -> Result<bool> {
        self.with_channel(channel, |state| Ok(state.armed_at.is_some()))
    }

    /// Last source settings written to the channel.
    pub fn source_settings(&self, channel: &str) -> Result<Option<SourceSettings>> {
        self.with_channel(channel, |state| Ok(state.source.clone()))
    }

    /// Current source trigger input of the channel.
    pub fn source_trigger(&self, channel: &str) -> Result<TriggerConfig> {
        self.with_channel(channel, |state| Ok(state.source_trigger.clone()))
    }

    /// Points per record.
    pub fn record_length(&self, channel: &str) -> Result<usize> {
        self.with_channel(channel, |state| Ok(state.record_length))
    }

    fn record(&self, operation: &str, channel: &str) -> Result<()> {
        self.operations.lock().push(format!("{operation} {channel}"));
        if self
            .faults
            .lock()
            .contains(&(channel.to_string(), operation.to_string()))
        {
            bail!("Simulated {operation} fault on {channel}");
        }
        Ok(())
    }

    fn with_channel<R>(&self, channel: &str, f: impl FnOnce(&mut ChannelState) -> Result<R>) -> Result<R> {
        let state = self
            .channels
            .get(channel)
            .ok_or_else(|| anyhow!("Unknown channel '{}' on session '{}'", channel, self.resource))?;
        let mut guard = state.lock();
        f(&mut guard)
    }

    fn own_terminal(&self, channel: &str, trigger: TriggerKind) -> String {
        self.naming.terminal_name(channel, trigger)
    }

    /// Time the trigger input configured as `config` fired since the channel was armed.
    fn input_fired(
        &self,
        channel: &str,
        kind: TriggerKind,
        config: &TriggerConfig,
        armed_at: u64,
    ) -> Option<DateTime<Utc>> {
        match config {
            TriggerConfig::None => None,
            TriggerConfig::SoftwareEdge => self
                .backplane
                .edge_after(&self.own_terminal(channel, kind), armed_at),
            TriggerConfig::DigitalEdge { terminal } => self.backplane.edge_after(terminal, armed_at),
        }
    }

    fn is_sourcing(&self, channel: &str, state: &ChannelState) -> bool {
        match (state.armed_at, &state.source_trigger) {
            (None, _) => false,
            (Some(_), TriggerConfig::None) => true,
            (Some(armed_at), config) => self
                .input_fired(channel, TriggerKind::Source, config, armed_at)
                .is_some(),
        }
    }

    fn sample(&self, channel: &str, state: &ChannelState) -> Sample {
        let Some(source) = state.source.as_ref().filter(|_| self.is_sourcing(channel, state)) else {
            return Sample {
                voltage: 0.0,
                current: 0.0,
                in_compliance: false,
            };
        };
        let load = state.load_ohms.max(f64::MIN_POSITIVE);
        match source.function {
            OutputFunction::DcVoltage => {
                let natural = source.level / load;
                let (current, in_compliance) = clamp(natural, source.limit);
                let voltage = if in_compliance { current * load } else { source.level };
                Sample {
                    voltage,
                    current,
                    in_compliance,
                }
            }
            OutputFunction::DcCurrent => {
                let natural = source.level * load;
                let (voltage, in_compliance) = clamp(natural, source.limit);
                let current = if in_compliance { voltage / load } else { source.level };
                Sample {
                    voltage,
                    current,
                    in_compliance,
                }
            }
        }
    }
}

fn clamp(value: f64, limit: Option<f64>) -> (f64, bool) {
    match limit {
        Some(limit) if value.abs() > limit.abs() => (limit.abs().copysign(value), true),
        _ => (value, false),
    }
}

fn sample_period(config: &MeasureConfig) -> f64 {
    if config.aperture_time_s > 0.0 {
        config.aperture_time_s
    } else {
        DEFAULT_SAMPLE_PERIOD_S
    }
}

impl DriverSession for MockSmuSession {
    fn resource_name(&self) -> &str {
        &self.resource
    }

    fn abort(&self, channel: &str) -> Result<()> {
        self.record("abort", channel)?;
        self.with_channel(channel, |state| {
            state.armed_at = None;
            state.committed = false;
            Ok(())
        })
    }

    fn commit(&self, channel: &str) -> Result<()> {
        self.record("commit", channel)?;
        self.with_channel(channel, |state| {
            state.committed = true;
            Ok(())
        })
    }

    fn initiate(&self, channel: &str) -> Result<()> {
        self.record("initiate", channel)?;
        let starts_sourcing = self.with_channel(channel, |state| {
            state.committed = true;
            state.armed_at = Some(self.backplane.next_sequence());
            Ok(state.source_trigger == TriggerConfig::None && state.source.is_some())
        })?;
        if starts_sourcing {
            self.backplane
                .pulse(&self.own_terminal(channel, TriggerKind::Source));
        }
        Ok(())
    }

    fn configure_source(&self, channel: &str, settings: &SourceSettings) -> Result<()> {
        self.record("configure_source", channel)?;
        self.with_channel(channel, |state| {
            state.source = Some(settings.clone());
            if let Some(delay) = settings.source_delay_s {
                state.measure.source_delay_s = delay;
            }
            Ok(())
        })
    }

    fn configure_source_trigger(&self, channel: &str, trigger: &TriggerConfig) -> Result<()> {
        self.record("configure_source_trigger", channel)?;
        self.with_channel(channel, |state| {
            state.source_trigger = trigger.clone();
            Ok(())
        })
    }

    fn wait_for_source_complete(&self, channel: &str, timeout: Duration) -> Result<()> {
        self.record("wait_for_source_complete", channel)?;
        self.with_channel(channel, |state| {
            if self.is_sourcing(channel, state) {
                Ok(())
            } else {
                Err(AteError::timeout(format!("source complete on {channel}"), timeout).into())
            }
        })
    }

    fn measure(&self, channel: &str) -> Result<Sample> {
        self.record("measure", channel)?;
        self.with_channel(channel, |state| Ok(self.sample(channel, state)))
    }

    fn measure_config(&self, channel: &str) -> Result<MeasureConfig> {
        self.record("measure_config", channel)?;
        self.with_channel(channel, |state| Ok(state.measure.clone()))
    }

    fn configure_measurement(&self, channel: &str, config: &MeasureConfig) -> Result<()> {
        self.record("configure_measurement", channel)?;
        if config.aperture_time_s < 0.0 {
            bail!("Aperture time must not be negative, got {}", config.aperture_time_s);
        }
        self.with_channel(channel, |state| {
            state.measure = config.clone();
            Ok(())
        })
    }

    fn record_delta_time(&self, channel: &str) -> Result<f64> {
        self.record("record_delta_time", channel)?;
        self.with_channel(channel, |state| Ok(sample_period(&state.measure)))
    }

    fn set_record_length(&self, channel: &str, length: usize) -> Result<()> {
        self.record("set_record_length", channel)?;
        self.with_channel(channel, |state| {
            state.record_length = length.max(1);
            Ok(())
        })
    }

    fn fetch(&self, channel: &str, count: usize, timeout: Duration) -> Result<Record> {
        self.record("fetch", channel)?;
        self.with_channel(channel, |state| {
            let Some(armed_at) = state.armed_at else {
                bail!("Channel {channel} is not running");
            };
            let started_at = match state.measure.measure_when {
                MeasureWhen::OnMeasureTrigger => self.input_fired(
                    channel,
                    TriggerKind::Measure,
                    &state.measure.measure_trigger,
                    armed_at,
                ),
                _ => Some(Utc::now()),
            };
            let Some(started_at) = started_at else {
                return Err(AteError::timeout(format!("fetch on {channel}"), timeout).into());
            };
            let sample = self.sample(channel, state);
            Ok(Record {
                started_at,
                delta_time_s: sample_period(&state.measure),
                samples: vec![sample; count],
            })
        })
    }

    fn send_software_edge(&self, channel: &str, trigger: TriggerKind) -> Result<()> {
        self.record("send_software_edge", channel)?;
        let running = self.with_channel(channel, |state| Ok(state.armed_at.is_some()))?;
        if !running {
            bail!("Cannot send {trigger} on {channel}: channel is not running");
        }
        self.software_edges.fetch_add(1, Ordering::SeqCst);
        self.backplane.pulse(&self.own_terminal(channel, trigger));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voltage_source_drives_resistive_load() {
        let smu = MockSmuSession::new("SMU_A", "NI PXIe-4137", 2);
        smu.configure_source("SMU_A/0", &SourceSettings::voltage(2.0, Some(0.01)))
            .unwrap();
        smu.initiate("SMU_A/0").unwrap();
        let sample = smu.measure("SMU_A/0").unwrap();
        assert_eq!(sample.voltage, 2.0);
        assert!((sample.current - 0.002).abs() < 1e-12);
        assert!(!sample.in_compliance);
    }

    #[test]
    fn load_and_source_delay_are_applied() {
        let smu = MockSmuSession::new("SMU_A", "NI PXIe-4137", 1);
        smu.set_load("SMU_A/0", 500.0).unwrap();
        smu.configure_source(
            "SMU_A/0",
            &SourceSettings::voltage(1.0, Some(0.01)).with_source_delay(0.002),
        )
        .unwrap();
        smu.initiate("SMU_A/0").unwrap();

        assert!((smu.measure("SMU_A/0").unwrap().current - 0.002).abs() < 1e-12);
        assert_eq!(smu.measure_config("SMU_A/0").unwrap().source_delay_s, 0.002);
        assert!(smu.set_load("SMU_A/9", 10.0).is_err());
    }

    #[test]
    fn current_source_clamps_at_voltage_limit() {
        let smu = MockSmuSession::new("SMU_A", "NI PXIe-4137", 1);
        smu.configure_source("SMU_A/0", &SourceSettings::current(0.1, Some(5.0)))
            .unwrap();
        smu.initiate("SMU_A/0").unwrap();
        let sample = smu.measure("SMU_A/0").unwrap();
        assert_eq!(sample.voltage, 5.0);
        assert!(sample.in_compliance);
    }

    #[test]
    fn follower_armed_after_edge_misses_it() {
        let backplane = TriggerBackplane::new();
        let leader = MockSmuSession::with_backplane("SMU_A", "NI PXIe-4137", 1, backplane.clone());
        let follower = MockSmuSession::with_backplane("SMU_B", "NI PXIe-4137", 1, backplane.clone());
        let on_trigger = MeasureConfig {
            measure_when: MeasureWhen::OnMeasureTrigger,
            measure_trigger: TriggerConfig::SoftwareEdge,
            ..MeasureConfig::default()
        };
        leader.configure_measurement("SMU_A/0", &on_trigger).unwrap();
        follower
            .configure_measurement(
                "SMU_B/0",
                &MeasureConfig {
                    measure_trigger: TriggerConfig::DigitalEdge {
                        terminal: "/SMU_A/Engine0/MeasureTrigger".into(),
                    },
                    ..on_trigger.clone()
                },
            )
            .unwrap();

        leader.initiate("SMU_A/0").unwrap();
        leader.send_software_edge("SMU_A/0", TriggerKind::Measure).unwrap();
        follower.initiate("SMU_B/0").unwrap();

        assert!(leader.fetch("SMU_A/0", 2, Duration::from_secs(1)).is_ok());
        let err = follower.fetch("SMU_B/0", 2, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err.downcast_ref::<AteError>(), Some(AteError::Timeout { .. })));
        assert_eq!(backplane.edge_count(TriggerKind::Measure), 1);
    }

    #[test]
    fn injected_faults_fail_the_named_operation() {
        let smu = MockSmuSession::new("SMU_A", "NI PXIe-4137", 1);
        smu.inject_fault("SMU_A/0", "commit");
        assert!(smu.commit("SMU_A/0").is_err());
        assert!(smu.initiate("SMU_A/0").is_ok());
        smu.clear_faults();
        assert!(smu.commit("SMU_A/0").is_ok());
        assert_eq!(smu.operations().len(), 3);
    }

    #[test]
    fn unknown_channels_are_rejected() {
        let smu = MockSmuSession::new("SMU_A", "NI PXIe-4137", 1);
        assert!(smu.measure("SMU_A/7").is_err());
    }
}
