//! Capability Table
//!
//! Static per-model reference data consulted once at configuration time instead of
//! branching on model strings inside every operation:
//!
//! - which features (aperture time, ganging, each hardware trigger) a model supports,
//! - how the model names its trigger terminals.
//!
//! The table is an explicitly constructed value owned by the
//! [`SessionManager`](crate::manager::SessionManager); nothing here is global.
//!
//! # Policy
//!
//! [`CapabilityTable::supports`] answers `Ok(false)` for a model known not to support a
//! feature (callers skip optional settings silently) and fails with
//! [`CapabilityError::UnknownModel`] for a model the table does not describe.
//! [`CapabilityTable::require`] turns a known-unsupported answer into an error for
//! features an operation cannot do without.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::addressing::ChannelAddress;
use crate::driver::TriggerKind;
use crate::error::CapabilityError;

/// Feature a model may or may not support.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Aperture time in seconds (older models average a fixed number of samples instead).
    ApertureTime,
    /// Several channels can be wired as one higher-current output.
    Ganging,
    /// Hardware trigger input of the given kind.
    Trigger(TriggerKind),
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::ApertureTime => f.write_str("aperture time"),
            Feature::Ganging => f.write_str("ganging"),
            Feature::Trigger(kind) => write!(f, "{kind}"),
        }
    }
}

/// How a model names its trigger terminals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminalNaming {
    /// One trigger engine per channel: `/<resource>/Engine<channel>/<Trigger>`.
    PerEngine,
    /// One trigger engine per instrument: `/<resource>/<Trigger>`.
    PerInstrument,
}

impl TerminalNaming {
    /// Build the terminal name of `trigger` on the channel `channel_string`.
    pub fn terminal_name(&self, channel_string: &str, trigger: TriggerKind) -> String {
        let resource = channel_string.split('/').next().unwrap_or(channel_string);
        match self {
            TerminalNaming::PerInstrument => format!("/{resource}/{}", trigger.terminal_suffix()),
            TerminalNaming::PerEngine => {
                let channel = channel_string.rsplit('/').next().unwrap_or(channel_string);
                format!("/{resource}/Engine{channel}/{}", trigger.terminal_suffix())
            }
        }
    }
}

#[derive(Clone, Debug)]
struct ModelCapabilities {
    naming: TerminalNaming,
    supported: HashSet<Feature>,
}

/// Per-model feature and terminal naming lookup.
#[derive(Clone, Debug, Default)]
pub struct CapabilityTable {
    models: HashMap<String, ModelCapabilities>,
}

// =============================================================================
// Known SMU models
// =============================================================================

const MEASURE_TRIGGER_MODELS: &[&str] = &[
    "NI PXIe-4112",
    "NI PXIe-4113",
    "NI PXIe-4135",
    "NI PXIe-4137",
    "NI PXIe-4139",
    "NI PXIe-4141",
    "NI PXIe-4143",
    "NI PXIe-4145",
    "NI PXIe-4147",
    "NI PXIe-4154",
    "NI PXIe-4162",
    "NI PXIe-4163",
    "NI PXIe-4190",
];

const PULSE_TRIGGER_MODELS: &[&str] = &["NI PXIe-4135", "NI PXIe-4137", "NI PXIe-4139"];

const GANGING_MODELS: &[&str] = &[
    "NI PXIe-4135",
    "NI PXIe-4137",
    "NI PXIe-4139",
    "NI PXIe-4147",
    "NI PXIe-4162",
    "NI PXIe-4163",
];

/// Models that average a fixed sample count instead of using an aperture time.
const SAMPLE_AVERAGING_MODELS: &[&str] = &["NI PXI-4110", "NI PXI-4130", "NI PXIe-4154"];

const OTHER_MODELS: &[&str] = &["NI PXI-4110", "NI PXI-4130", "NI PXI-4132"];

impl CapabilityTable {
    /// Empty table; every lookup fails with `UnknownModel` until models are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table describing the NI DCPower family.
    pub fn dcpower_defaults() -> Self {
        let mut table = Self::new();
        for model in MEASURE_TRIGGER_MODELS.iter().chain(OTHER_MODELS) {
            let mut features = Vec::new();
            if !SAMPLE_AVERAGING_MODELS.contains(model) {
                features.push(Feature::ApertureTime);
            }
            if GANGING_MODELS.contains(model) {
                features.push(Feature::Ganging);
            }
            if MEASURE_TRIGGER_MODELS.contains(model) {
                features.push(Feature::Trigger(TriggerKind::Measure));
                features.push(Feature::Trigger(TriggerKind::Source));
                features.push(Feature::Trigger(TriggerKind::SequenceAdvance));
                if *model != "NI PXIe-4145" {
                    features.push(Feature::Trigger(TriggerKind::Start));
                }
            }
            if PULSE_TRIGGER_MODELS.contains(model) {
                features.push(Feature::Trigger(TriggerKind::Pulse));
            }
            let naming = if *model == "NI PXI-4132" {
                TerminalNaming::PerInstrument
            } else {
                TerminalNaming::PerEngine
            };
            table.insert_model(model, naming, &features);
        }
        table
    }

    /// Add or replace the description of one model.
    pub fn insert_model(&mut self, model: &str, naming: TerminalNaming, features: &[Feature]) {
        self.models.insert(
            model.to_string(),
            ModelCapabilities {
                naming,
                supported: features.iter().copied().collect(),
            },
        );
    }

    /// Builder form of [`insert_model`](Self::insert_model).
    pub fn with_model(mut self, model: &str, naming: TerminalNaming, features: &[Feature]) -> Self {
        self.insert_model(model, naming, features);
        self
    }

    /// True when `model` has an entry.
    pub fn knows(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    fn entry(&self, model: &str) -> Result<&ModelCapabilities, CapabilityError> {
        self.models
            .get(model)
            .ok_or_else(|| CapabilityError::UnknownModel(model.to_string()))
    }

    /// Whether `model` has `feature`.
    ///
    /// # Errors
    ///
    /// `UnknownModel` when the model has no entry.
    pub fn supports(&self, model: &str, feature: Feature) -> Result<bool, CapabilityError> {
        Ok(self.entry(model)?.supported.contains(&feature))
    }

    /// Like [`supports`](Self::supports), but a missing feature is an `Unsupported` error.
    pub fn require(&self, model: &str, feature: Feature) -> Result<(), CapabilityError> {
        if self.supports(model, feature)? {
            Ok(())
        } else {
            Err(CapabilityError::Unsupported {
                model: model.to_string(),
                feature: feature.to_string(),
            })
        }
    }

    /// Terminal naming scheme of `model`.
    pub fn terminal_naming(&self, model: &str) -> Result<TerminalNaming, CapabilityError> {
        Ok(self.entry(model)?.naming)
    }

    /// Terminal name of `trigger` on the channel behind `address`.
    pub fn terminal_name(
        &self,
        address: &ChannelAddress,
        trigger: TriggerKind,
    ) -> Result<String, CapabilityError> {
        Ok(self
            .terminal_naming(&address.model)?
            .terminal_name(&address.channel, trigger))
    }
}
