//! Addressing Model
//!
//! Immutable records describing how a (site, pin) pair maps onto one channel of one
//! instrument session. Addresses are produced by the session registry when a bundle is
//! resolved and carry no per-call state, so they are cheap to clone and discard.
//!
//! # Channel strings
//!
//! Channel strings follow the `<resource>/<channel>` convention used by modular
//! instrument drivers, e.g. `SMU_4137_C1_S01/0`. The resource part names the physical
//! instrument; the trailing part is the channel number within it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Parallel unit-under-test position. `-1` denotes a site-independent (system) channel.
pub type SiteNumber = i32;

/// Site number used for system channels that are shared by every site.
pub const SYSTEM_SITE: SiteNumber = -1;

/// Identifier of one underlying instrument session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Resource name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Cascading (ganging and merging)
// =============================================================================

/// Role of a channel inside a ganged pin group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GangRole {
    /// Originates the source trigger.
    Leader,
    /// Sources on the leader's trigger.
    Follower,
}

/// How a channel participates in a cascaded pin group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cascading {
    /// Several physical channels wired together to act as one higher-current pin.
    Ganged {
        /// Pin group the gang was built from.
        group: String,
        /// Leader or follower.
        role: GangRole,
        /// Number of physical channels in the gang on this site.
        channel_count: usize,
        /// Source trigger terminal of the gang leader; followers listen on it.
        leader_source_trigger: String,
    },
    /// Several pins treated as one named group for addressing and results.
    Merged {
        /// Name results are reported under.
        group: String,
        /// True for the one channel per site that reports for the group.
        primary: bool,
    },
}

// =============================================================================
// Channel Address
// =============================================================================

/// One physical instrument channel and the (site, pin) it currently represents.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelAddress {
    /// Owning session.
    pub session: SessionId,
    /// Fully qualified channel string, `resource/number`.
    pub channel: String,
    /// Instrument model, used for capability lookups.
    pub model: String,
    /// Site, or `SYSTEM_SITE`.
    pub site: SiteNumber,
    /// Pin as named in the pin map.
    pub pin: String,
    /// Gang or merge membership.
    pub cascading: Option<Cascading>,
}

impl ChannelAddress {
    /// Plain (non-cascaded) address.
    pub fn new(
        session: SessionId,
        channel: impl Into<String>,
        model: impl Into<String>,
        site: SiteNumber,
        pin: impl Into<String>,
    ) -> Self {
        Self {
            session,
            channel: channel.into(),
            model: model.into(),
            site,
            pin: pin.into(),
            cascading: None,
        }
    }

    /// Mark the address as part of a gang or merge.
    pub fn with_cascading(mut self, cascading: Cascading) -> Self {
        self.cascading = Some(cascading);
        self
    }

    /// True for site-independent channels.
    pub fn is_system(&self) -> bool {
        self.site == SYSTEM_SITE
    }

    /// Resource (instrument) part of the channel string.
    pub fn resource_name(&self) -> &str {
        self.channel.split('/').next().unwrap_or(&self.channel)
    }

    /// Channel number part of the channel string.
    pub fn channel_number(&self) -> &str {
        self.channel.rsplit('/').next().unwrap_or(&self.channel)
    }

    /// True for any gang member.
    pub fn is_ganged(&self) -> bool {
        matches!(self.cascading, Some(Cascading::Ganged { .. }))
    }

    /// True for gang members that follow the leader's source trigger.
    pub fn is_ganged_follower(&self) -> bool {
        matches!(
            self.cascading,
            Some(Cascading::Ganged {
                role: GangRole::Follower,
                ..
            })
        )
    }

    /// Number of channels sharing the load of this pin (1 unless ganged).
    pub fn gang_size(&self) -> usize {
        match &self.cascading {
            Some(Cascading::Ganged { channel_count, .. }) => (*channel_count).max(1),
            _ => 1,
        }
    }

    /// Name of the merged pin group this channel belongs to, if any.
    pub fn merge_group(&self) -> Option<&str> {
        match &self.cascading {
            Some(Cascading::Merged { group, .. }) => Some(group),
            _ => None,
        }
    }

    /// Pin name under which this channel's result is reported per site, or `None`
    /// when the channel is suppressed from per-site output (ganged followers and
    /// non-primary members of a merged group).
    pub fn reported_pin(&self) -> Option<&str> {
        match &self.cascading {
            None => Some(&self.pin),
            Some(Cascading::Ganged { role, .. }) => match role {
                GangRole::Leader => Some(&self.pin),
                GangRole::Follower => None,
            },
            Some(Cascading::Merged { group, primary }) => primary.then_some(group.as_str()),
        }
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@site{} ({})", self.pin, self.site, self.channel)
    }
}
