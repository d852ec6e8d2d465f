//! Driver Session Interface
//!
//! The kernel never talks to instrument hardware itself. Every vendor driver session is
//! reached through the narrow [`DriverSession`] trait, addressed per channel string and
//! grouped the way modular instrument drivers group their properties:
//!
//! - **Control**: `abort`, `commit`, `initiate`
//! - **Source**: `configure_source`, `configure_source_trigger`
//! - **Measurement**: `measure`, `measure_config`, `configure_measurement`,
//!   `record_delta_time`, `set_record_length`, `fetch`
//! - **Triggers**: `send_software_edge`
//! - **Events**: `wait_for_source_complete`
//!
//! # Design Philosophy
//!
//! - Methods are synchronous; the only suspension points in the kernel are these calls.
//! - Implementations are thread-safe (`Send + Sync`) and use interior mutability, since
//!   the executor drives independent channels of one session from several workers.
//! - Errors are `anyhow::Result`; a driver that gives up waiting should return
//!   [`AteError::Timeout`](crate::error::AteError) so the kernel can tell timeouts apart.

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Source Types
// =============================================================================

/// What a channel regulates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFunction {
    /// Force voltage, limit current.
    DcVoltage,
    /// Force current, limit voltage.
    DcCurrent,
}

/// Level and compliance limit for one channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Regulated quantity.
    pub function: OutputFunction,
    /// Volts or amps, depending on `function`.
    pub level: f64,
    /// Compliance limit on the other quantity; driver default when absent.
    pub limit: Option<f64>,
    /// Settling time before a measurement may start.
    pub source_delay_s: Option<f64>,
}

impl SourceSettings {
    /// Force `level` volts with an optional current limit.
    pub fn voltage(level: f64, current_limit: Option<f64>) -> Self {
        Self {
            function: OutputFunction::DcVoltage,
            level,
            limit: current_limit,
            source_delay_s: None,
        }
    }

    /// Force `level` amps with an optional voltage limit.
    pub fn current(level: f64, voltage_limit: Option<f64>) -> Self {
        Self {
            function: OutputFunction::DcCurrent,
            level,
            limit: voltage_limit,
            source_delay_s: None,
        }
    }

    /// Builder-style source delay.
    pub fn with_source_delay(mut self, seconds: f64) -> Self {
        self.source_delay_s = Some(seconds);
        self
    }

    /// Share of this setting carried by one of `channel_count` ganged channels.
    ///
    /// Current is split across the gang: the level when forcing current, the limit when
    /// forcing voltage.
    pub fn split_for_gang(&self, channel_count: usize) -> Self {
        let divisor = channel_count.max(1) as f64;
        let mut share = self.clone();
        match self.function {
            OutputFunction::DcVoltage => share.limit = self.limit.map(|l| l / divisor),
            OutputFunction::DcCurrent => share.level = self.level / divisor,
        }
        share
    }
}

// =============================================================================
// Trigger and Measurement Types
// =============================================================================

/// Hardware trigger a channel exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerKind {
    /// Starts a measurement record.
    Measure,
    /// Applies the configured output.
    Source,
    /// Starts a sequence.
    Start,
    /// Advances a sequence step.
    SequenceAdvance,
    /// Fires a pulse.
    Pulse,
}

impl TriggerKind {
    /// Logical terminal name used when routing the trigger.
    pub fn terminal_suffix(&self) -> &'static str {
        match self {
            TriggerKind::Measure => "MeasureTrigger",
            TriggerKind::Source => "SourceTrigger",
            TriggerKind::Start => "StartTrigger",
            TriggerKind::SequenceAdvance => "SequenceAdvanceTrigger",
            TriggerKind::Pulse => "PulseTrigger",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.terminal_suffix())
    }
}

/// How a trigger input is driven.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerConfig {
    /// Input disabled; the action happens as soon as the channel is initiated.
    None,
    /// Edge sent through `send_software_edge`.
    SoftwareEdge,
    /// Rising edge on a named hardware terminal.
    DigitalEdge {
        /// Fully qualified terminal, for example `/SMU_A/Engine0/SourceTrigger`.
        terminal: String,
    },
}

/// When a channel takes its measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasureWhen {
    /// Only when `measure` or `fetch` is called.
    OnDemand,
    /// As soon as sourcing has settled.
    AutomaticallyAfterSourceComplete,
    /// On the configured measure trigger.
    OnMeasureTrigger,
}

/// Measurement timing state of one channel. Read back before a synchronized
/// acquisition and replayed afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasureConfig {
    /// Integration time per point, seconds.
    pub aperture_time_s: f64,
    /// Measurement start condition.
    pub measure_when: MeasureWhen,
    /// Input used by `OnMeasureTrigger`.
    pub measure_trigger: TriggerConfig,
    /// Settling time after sourcing, seconds.
    pub source_delay_s: f64,
}

impl Default for MeasureConfig {
    fn default() -> Self {
        Self {
            aperture_time_s: 0.0,
            measure_when: MeasureWhen::AutomaticallyAfterSourceComplete,
            measure_trigger: TriggerConfig::None,
            source_delay_s: 0.0,
        }
    }
}

/// One measured point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Measured volts.
    pub voltage: f64,
    /// Measured amps.
    pub current: f64,
    /// True when the output hit its limit.
    pub in_compliance: bool,
}

/// A fetched measurement record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Time of the trigger that started the record.
    pub started_at: DateTime<Utc>,
    /// Seconds between points.
    pub delta_time_s: f64,
    /// Points in acquisition order.
    pub samples: Vec<Sample>,
}

// =============================================================================
// Driver Session
// =============================================================================

/// Opaque handle to one vendor driver session.
///
/// # Contract
/// - `channel` is always one individual channel string owned by this session.
/// - `abort` leaves the channel uncommitted; configuration calls are only guaranteed to
///   take effect after `commit` or `initiate`.
/// - `fetch` blocks up to `timeout` for `count` points.
pub trait DriverSession: Send + Sync {
    /// Resource name the session was opened with.
    fn resource_name(&self) -> &str;

    /// Stop the channel and drop it back to the uncommitted state.
    fn abort(&self, channel: &str) -> Result<()>;

    /// Apply pending configuration without starting.
    fn commit(&self, channel: &str) -> Result<()>;

    /// Commit if needed and start; sources immediately unless a source trigger is set.
    fn initiate(&self, channel: &str) -> Result<()>;

    /// Output function, level and limit.
    fn configure_source(&self, channel: &str, settings: &SourceSettings) -> Result<()>;

    /// Source trigger input.
    fn configure_source_trigger(&self, channel: &str, trigger: &TriggerConfig) -> Result<()>;

    /// Block until the output has settled or `timeout` passes.
    fn wait_for_source_complete(&self, channel: &str, timeout: Duration) -> Result<()>;

    /// On-demand measurement of voltage and current.
    fn measure(&self, channel: &str) -> Result<Sample>;

    /// Current measurement configuration.
    fn measure_config(&self, channel: &str) -> Result<MeasureConfig>;

    /// Replace the measurement configuration.
    fn configure_measurement(&self, channel: &str, config: &MeasureConfig) -> Result<()>;

    /// Actual sample period after commit, in seconds.
    fn record_delta_time(&self, channel: &str) -> Result<f64>;

    /// Points per fetched record.
    fn set_record_length(&self, channel: &str, length: usize) -> Result<()>;

    /// Read `count` points of the current record.
    fn fetch(&self, channel: &str, count: usize, timeout: Duration) -> Result<Record>;

    /// Pulse the channel's own `trigger` terminal.
    fn send_software_edge(&self, channel: &str, trigger: TriggerKind) -> Result<()>;
}
