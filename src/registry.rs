//! Session Registry
//!
//! Central owner of every instrument session and of the flat (site, pin) to channel
//! associations that point into them. Test code never holds associations directly; it
//! asks the registry to [`resolve`](SessionRegistry::resolve) a pin selection into a
//! [`Bundle`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      SessionRegistry                         │
//! │  sessions (registration order)     associations (pin map)    │
//! │  ┌──────────────┐ ┌──────────────┐  VDD@0 -> SMU_A/0         │
//! │  │ SMU_A        │ │ SMU_B        │  VDD@1 -> SMU_A/1 ...     │
//! │  └──────────────┘ └──────────────┘                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  resolve(pins, sites) -> Bundle { SessionHandle* }           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Ordering
//!
//! Sessions appear in registration order and channels within a session sort by channel
//! string. Identical input therefore always yields identical iteration order, which the
//! executor, the reducer and leader selection all rely on.
//!
//! # Cascading
//!
//! Pin groups can be merged (reported as one named pin) or ganged (several channels
//! driving one pin). Either rewrites the cascading information carried by every
//! association of the group; bundles resolved afterwards see the new addresses, bundles
//! resolved before keep theirs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info};

use crate::addressing::{Cascading, ChannelAddress, GangRole, SessionId, SiteNumber};
use crate::bundle::{Bundle, SessionHandle};
use crate::capability::{CapabilityTable, Feature};
use crate::driver::{DriverSession, TriggerKind};
use crate::error::{AddressingError, AppResult};
use crate::pin_map::{PinAssociation, PinMapProvider};

struct RegisteredSession {
    id: SessionId,
    driver: Arc<dyn DriverSession>,
}

/// Open sessions and the (pin, site) associations that point at their channels.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Vec<RegisteredSession>,
    associations: Vec<ChannelAddress>,
    pin_groups: HashMap<String, Vec<String>>,
    active_sites: Vec<SiteNumber>,
}

impl SessionRegistry {
    /// Empty registry resolving against `active_sites` by default.
    pub fn new(active_sites: &[SiteNumber]) -> Self {
        Self {
            active_sites: active_sites.to_vec(),
            ..Self::default()
        }
    }

    /// Build a registry from a pin map and the sessions opened for it.
    ///
    /// # Arguments
    /// * `provider` - Source of pin associations and pin groups
    /// * `active_sites` - Sites used when a resolve call passes no filter
    /// * `sessions` - Open driver sessions, in the order they should be iterated
    ///
    /// # Errors
    /// `UnknownSession` if an association names a resource without an open session,
    /// `DuplicateChannel` if the pin map associates the same (pin, site, channel) twice.
    pub fn from_pin_map(
        provider: &dyn PinMapProvider,
        active_sites: &[SiteNumber],
        sessions: impl IntoIterator<Item = Arc<dyn DriverSession>>,
    ) -> Result<Self, AddressingError> {
        let mut registry = Self::new(active_sites);
        for session in sessions {
            registry.register_session(session);
        }
        for association in provider.associations() {
            registry.add_association(association)?;
        }
        for group in provider.pin_group_names() {
            if let Some(members) = provider.pin_group(&group) {
                registry.define_pin_group(&group, members);
            }
        }
        debug!(
            sessions = registry.sessions.len(),
            associations = registry.associations.len(),
            "Session registry built from pin map"
        );
        Ok(registry)
    }

    /// Register an open session under its resource name.
    ///
    /// Registering the same resource twice replaces the driver but keeps the original
    /// position in iteration order.
    pub fn register_session(&mut self, driver: Arc<dyn DriverSession>) -> SessionId {
        let id = SessionId::from(driver.resource_name());
        if let Some(existing) = self.sessions.iter_mut().find(|s| s.id == id) {
            existing.driver = driver;
        } else {
            self.sessions.push(RegisteredSession {
                id: id.clone(),
                driver,
            });
        }
        id
    }

    /// Add one pin map association.
    ///
    /// # Errors
    /// `UnknownSession` for an unregistered resource, `DuplicateChannel` for a repeat.
    pub fn add_association(&mut self, association: PinAssociation) -> Result<(), AddressingError> {
        let session = SessionId::from(association.resource.as_str());
        if !self.sessions.iter().any(|s| s.id == session) {
            return Err(AddressingError::UnknownSession {
                pin: association.pin,
                session: association.resource,
            });
        }
        let duplicate = self.associations.iter().any(|a| {
            a.session == session
                && a.channel == association.channel
                && a.site == association.site
                && a.pin == association.pin
        });
        if duplicate {
            return Err(AddressingError::DuplicateChannel {
                session: association.resource,
                channel: association.channel,
            });
        }
        self.associations.push(ChannelAddress::new(
            session,
            association.channel,
            association.model,
            association.site,
            association.pin,
        ));
        Ok(())
    }

    /// Add or replace a pin group.
    pub fn define_pin_group(&mut self, name: &str, members: Vec<String>) {
        self.pin_groups.insert(name.to_string(), members);
    }

    /// Sites used when a resolve call passes no filter.
    pub fn active_sites(&self) -> &[SiteNumber] {
        &self.active_sites
    }

    /// Replace the default sites.
    pub fn set_active_sites(&mut self, sites: &[SiteNumber]) {
        self.active_sites = sites.to_vec();
    }

    /// Session ids in registration order.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|s| s.id.clone()).collect()
    }

    /// True when `name` is a pin with at least one association.
    pub fn knows_pin(&self, name: &str) -> bool {
        self.associations.iter().any(|a| a.pin == name)
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve pin names (or pin group names) into a bundle.
    ///
    /// # Arguments
    /// * `pins` - Pin or pin group names; groups expand to their members
    /// * `sites` - Optional site filter; `None` uses the active sites
    ///
    /// System pins (site `-1`) are kept whatever the filter.
    pub fn resolve(
        &self,
        pins: &[&str],
        sites: Option<&[SiteNumber]>,
    ) -> Result<Bundle, AddressingError> {
        let sites: Vec<SiteNumber> = sites.map_or_else(|| self.active_sites.clone(), <[_]>::to_vec);
        let expanded = self.expand_pins(pins)?;

        let mut selected: Vec<&ChannelAddress> = Vec::new();
        for pin in &expanded {
            let before = selected.len();
            selected.extend(
                self.associations
                    .iter()
                    .filter(|a| &a.pin == pin && (a.is_system() || sites.contains(&a.site))),
            );
            if selected.len() == before {
                return Err(AddressingError::EmptySiteFilter {
                    pin: pin.clone(),
                    sites,
                });
            }
        }

        let mut sessions = Vec::new();
        for registered in &self.sessions {
            let mut channels: Vec<ChannelAddress> = selected
                .iter()
                .filter(|a| a.session == registered.id)
                .map(|a| (*a).clone())
                .collect();
            if channels.is_empty() {
                continue;
            }
            channels.sort_by(|a, b| {
                (a.channel.as_str(), a.site, a.pin.as_str()).cmp(&(b.channel.as_str(), b.site, b.pin.as_str()))
            });
            channels.dedup();
            sessions.push(SessionHandle {
                id: registered.id.clone(),
                driver: Arc::clone(&registered.driver),
                channels,
            });
        }

        let bundle = Bundle::new(pins.iter().map(|p| p.to_string()).collect(), sites, sessions);
        debug!(
            pins = ?pins,
            sessions = bundle.sessions().len(),
            channels = bundle.len(),
            "Resolved bundle"
        );
        Ok(bundle)
    }

    /// Expand pin group names and drop repeats, keeping first-seen order.
    fn expand_pins(&self, names: &[&str]) -> Result<Vec<String>, AddressingError> {
        let mut expanded: Vec<String> = Vec::new();
        for name in names {
            let members = match self.pin_groups.get(*name) {
                Some(members) => members.clone(),
                None if self.knows_pin(name) => vec![name.to_string()],
                None => return Err(AddressingError::UnknownPin(name.to_string())),
            };
            for member in members {
                if !self.knows_pin(&member) {
                    return Err(AddressingError::UnknownPin(member));
                }
                if !expanded.contains(&member) {
                    expanded.push(member);
                }
            }
        }
        Ok(expanded)
    }

    // =========================================================================
    // Cascading
    // =========================================================================

    /// Association indices of a pin group, bucketed per site in member order.
    fn group_indices_by_site(
        &self,
        group: &str,
    ) -> Result<BTreeMap<SiteNumber, Vec<usize>>, AddressingError> {
        let members = self
            .pin_groups
            .get(group)
            .ok_or_else(|| AddressingError::UnknownPinGroup(group.to_string()))?;
        let mut by_site: BTreeMap<SiteNumber, Vec<usize>> = BTreeMap::new();
        for member in members {
            for (index, association) in self.associations.iter().enumerate() {
                if &association.pin == member {
                    by_site.entry(association.site).or_default().push(index);
                }
            }
        }
        Ok(by_site)
    }

    /// Treat a pin group as one named pin.
    ///
    /// On every site the first member's channel becomes the primary, which reports
    /// results under the group name; the other members are suppressed from per-site
    /// output.
    pub fn merge_pin_group(&mut self, group: &str) -> Result<(), AddressingError> {
        let by_site = self.group_indices_by_site(group)?;
        for indices in by_site.values() {
            for (position, index) in indices.iter().enumerate() {
                self.associations[*index].cascading = Some(Cascading::Merged {
                    group: group.to_string(),
                    primary: position == 0,
                });
            }
        }
        info!(group, sites = by_site.len(), "Merged pin group");
        Ok(())
    }

    /// Drop the merge tags of `group`; members report under their own names again.
    pub fn unmerge_pin_group(&mut self, group: &str) -> Result<(), AddressingError> {
        if !self.pin_groups.contains_key(group) {
            return Err(AddressingError::UnknownPinGroup(group.to_string()));
        }
        for association in &mut self.associations {
            if association.merge_group() == Some(group) {
                association.cascading = None;
            }
        }
        info!(group, "Unmerged pin group");
        Ok(())
    }

    /// Gang the channels of a pin group so they act as one higher-current pin.
    ///
    /// On every site the first member's channel becomes the leader; followers record the
    /// leader's source trigger terminal so sourcing can slave them to it.
    ///
    /// # Errors
    /// `UnknownPinGroup`, or a capability error when a channel's model cannot gang.
    pub fn gang_pin_group(&mut self, group: &str, capabilities: &CapabilityTable) -> AppResult<()> {
        let by_site = self.group_indices_by_site(group)?;
        for indices in by_site.values() {
            for index in indices {
                capabilities.require(&self.associations[*index].model, Feature::Ganging)?;
            }
        }
        for indices in by_site.values() {
            let Some(leader_index) = indices.first() else {
                continue;
            };
            let terminal =
                capabilities.terminal_name(&self.associations[*leader_index], TriggerKind::Source)?;
            for (position, index) in indices.iter().enumerate() {
                let role = if position == 0 {
                    GangRole::Leader
                } else {
                    GangRole::Follower
                };
                self.associations[*index].cascading = Some(Cascading::Ganged {
                    group: group.to_string(),
                    role,
                    channel_count: indices.len(),
                    leader_source_trigger: terminal.clone(),
                });
            }
        }
        info!(group, sites = by_site.len(), "Ganged pin group");
        Ok(())
    }

    /// Drop the gang tags of `group`.
    ///
    /// Only the addressing changes here. The next source configuration clears the old
    /// leader trigger on former followers.
    pub fn ungang_pin_group(&mut self, group: &str) -> Result<(), AddressingError> {
        if !self.pin_groups.contains_key(group) {
            return Err(AddressingError::UnknownPinGroup(group.to_string()));
        }
        for association in &mut self.associations {
            let in_group = matches!(
                &association.cascading,
                Some(Cascading::Ganged { group: g, .. }) if g == group
            );
            if in_group {
                association.cascading = None;
            }
        }
        info!(group, "Unganged pin group");
        Ok(())
    }
}
