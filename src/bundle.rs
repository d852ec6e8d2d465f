//! Bundles and session handles.
//!
//! A [`Bundle`] is what test code operates on: the resolved channel addresses for a pin
//! and site selection, grouped by the session that owns them. It is a view onto shared
//! [`DriverSession`]s, so two bundles may address the same hardware; only instrument
//! state is shared between them, never the address lists.

use std::fmt;
use std::sync::Arc;

use crate::addressing::{ChannelAddress, SessionId, SiteNumber};
use crate::driver::DriverSession;

/// One instrument session and the channels of it a bundle acts on.
#[derive(Clone)]
pub struct SessionHandle {
    /// Session identifier, the instrument resource name.
    pub id: SessionId,
    /// Shared driver handle.
    pub driver: Arc<dyn DriverSession>,
    /// Sorted by channel string.
    pub channels: Vec<ChannelAddress>,
}

impl SessionHandle {
    /// Comma separated channel strings, as drivers accept for multi-channel calls.
    pub fn channel_list(&self) -> String {
        self.channels
            .iter()
            .map(|c| c.channel.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

/// Resolved channels for a set of pins and sites, grouped by session.
///
/// Sessions keep registry registration order. Cloning a bundle shares the driver
/// handles, never the sessions themselves.
#[derive(Clone, Debug)]
pub struct Bundle {
    pins: Vec<String>,
    sites: Vec<SiteNumber>,
    sessions: Vec<SessionHandle>,
}

impl Bundle {
    pub(crate) fn new(pins: Vec<String>, sites: Vec<SiteNumber>, sessions: Vec<SessionHandle>) -> Self {
        Self {
            pins,
            sites,
            sessions,
        }
    }

    /// Pin names as requested, before pin-group expansion.
    pub fn requested_pins(&self) -> &[String] {
        &self.pins
    }

    /// Active sites the bundle was resolved for.
    pub fn sites(&self) -> &[SiteNumber] {
        &self.sites
    }

    /// Sessions in executor order.
    pub fn sessions(&self) -> &[SessionHandle] {
        &self.sessions
    }

    /// Every channel address in executor order.
    pub fn channels(&self) -> impl Iterator<Item = &ChannelAddress> {
        self.sessions.iter().flat_map(|s| s.channels.iter())
    }

    /// Channel addresses nested per session, the layout of per-instrument results.
    pub fn addresses_per_session(&self) -> Vec<Vec<ChannelAddress>> {
        self.sessions.iter().map(|s| s.channels.clone()).collect()
    }

    /// Number of channel addresses.
    pub fn len(&self) -> usize {
        self.sessions.iter().map(|s| s.channels.len()).sum()
    }

    /// True when no channel was resolved.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First channel of the first session; the leader of a synchronized acquisition.
    pub fn first_channel(&self) -> Option<(&SessionHandle, &ChannelAddress)> {
        self.sessions
            .iter()
            .find_map(|s| s.channels.first().map(|c| (s, c)))
    }

    /// True when any channel belongs to a gang.
    pub fn has_ganged_channels(&self) -> bool {
        self.channels().any(ChannelAddress::is_ganged)
    }

    /// Addresses of one pin, in executor order.
    pub fn channels_for_pin<'a>(&'a self, pin: &'a str) -> impl Iterator<Item = &'a ChannelAddress> + 'a {
        self.channels().filter(move |c| c.pin == pin)
    }
}
