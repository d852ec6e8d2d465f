//! Pin Map Provider
//!
//! The kernel does not parse pin-map files. It consumes the associations a pin map
//! describes through the [`PinMapProvider`] trait:
//!
//! - which pins exist, and which pin groups name sets of pins,
//! - for every (pin, site): the instrument resource, channel string and model behind it.
//!
//! [`PinMap`] is an in-memory provider assembled with a builder, which is what tests and
//! host integrations that already hold the associations use.
//!
//! # Example
//!
//! ```rust,ignore
//! let pin_map = PinMap::builder()
//!     .association("VDD", 0, "SMU_4137_C1_S01", "SMU_4137_C1_S01/0", "NI PXIe-4137")
//!     .association("VDD", 1, "SMU_4137_C1_S01", "SMU_4137_C1_S01/1", "NI PXIe-4137")
//!     .pin_group("Power", ["VDD", "VCC"])
//!     .build();
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::addressing::SiteNumber;

/// One (pin, site) to channel association.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinAssociation {
    /// Pin name.
    pub pin: String,
    /// `-1` for a system pin shared by every site.
    pub site: SiteNumber,
    /// Instrument resource (session) name.
    pub resource: String,
    /// Fully qualified channel string.
    pub channel: String,
    /// Instrument model string.
    pub model: String,
}

/// Source of pin-to-channel associations, consulted when a registry is built.
pub trait PinMapProvider {
    /// Every association, in pin-map declaration order.
    fn associations(&self) -> Vec<PinAssociation>;

    /// Member pins of a pin group, or `None` when `name` is not a group.
    fn pin_group(&self, name: &str) -> Option<Vec<String>>;

    /// Names of all declared pin groups.
    fn pin_group_names(&self) -> Vec<String>;
}

/// In-memory pin map.
#[derive(Clone, Debug, Default)]
pub struct PinMap {
    associations: Vec<PinAssociation>,
    groups: HashMap<String, Vec<String>>,
    group_order: Vec<String>,
}

impl PinMap {
    /// Start an empty pin map.
    pub fn builder() -> PinMapBuilder {
        PinMapBuilder::default()
    }
}

impl PinMapProvider for PinMap {
    fn associations(&self) -> Vec<PinAssociation> {
        self.associations.clone()
    }

    fn pin_group(&self, name: &str) -> Option<Vec<String>> {
        self.groups.get(name).cloned()
    }

    fn pin_group_names(&self) -> Vec<String> {
        self.group_order.clone()
    }
}

/// Chained construction of a [`PinMap`].
#[derive(Debug, Default)]
pub struct PinMapBuilder {
    map: PinMap,
}

impl PinMapBuilder {
    /// Pin on one site mapped to one channel.
    pub fn association(
        mut self,
        pin: &str,
        site: SiteNumber,
        resource: &str,
        channel: &str,
        model: &str,
    ) -> Self {
        self.map.associations.push(PinAssociation {
            pin: pin.to_string(),
            site,
            resource: resource.to_string(),
            channel: channel.to_string(),
            model: model.to_string(),
        });
        self
    }

    /// Site-independent pin.
    pub fn system_association(self, pin: &str, resource: &str, channel: &str, model: &str) -> Self {
        self.association(pin, crate::addressing::SYSTEM_SITE, resource, channel, model)
    }

    /// Named group of pins; redefining a group replaces its members.
    pub fn pin_group<I, S>(mut self, name: &str, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !self.map.groups.contains_key(name) {
            self.map.group_order.push(name.to_string());
        }
        self.map
            .groups
            .insert(name.to_string(), members.into_iter().map(Into::into).collect());
        self
    }

    /// Finish the pin map.
    pub fn build(self) -> PinMap {
        self.map
    }
}
