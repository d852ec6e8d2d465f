//! Caller-supplied value tables.
//!
//! Every instrument operation that takes a setting accepts it as a [`PinSiteTable`]:
//! one value for everything, a value per pin, a value per site, or a value per
//! (pin, site). The broadcast resolver (`crate::broadcast`) turns the table into the
//! one value that applies to a given channel.

use std::collections::HashMap;

use crate::addressing::SiteNumber;
use crate::data::{PinSiteData, SiteData};

/// Reduced form of a value table.
#[derive(Clone, Debug, PartialEq)]
pub enum PinSiteTable<T> {
    /// One value for every channel.
    Scalar(T),
    /// Keyed by pin or merged group name.
    PerPin(HashMap<String, T>),
    /// Keyed by site.
    PerSite(SiteData<T>),
    /// Keyed by pin, then site.
    PerPinSite(PinSiteData<T>),
}

/// Discriminant of [`PinSiteTable`] for logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableShape {
    /// [`PinSiteTable::Scalar`]
    Scalar,
    /// [`PinSiteTable::PerPin`]
    PerPin,
    /// [`PinSiteTable::PerSite`]
    PerSite,
    /// [`PinSiteTable::PerPinSite`]
    PerPinSite,
}

impl<T> PinSiteTable<T> {
    /// Table with one value for everything.
    pub fn scalar(value: T) -> Self {
        PinSiteTable::Scalar(value)
    }

    /// Table keyed by pin.
    pub fn per_pin<K: Into<String>>(entries: impl IntoIterator<Item = (K, T)>) -> Self {
        PinSiteTable::PerPin(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Table keyed by site.
    pub fn per_site(entries: impl IntoIterator<Item = (SiteNumber, T)>) -> Self {
        PinSiteTable::PerSite(entries.into_iter().collect())
    }

    /// Table keyed by pin and site.
    pub fn per_pin_site(data: PinSiteData<T>) -> Self {
        PinSiteTable::PerPinSite(data)
    }

    /// Same shape, every value transformed.
    pub fn map<U>(&self, f: impl Fn(&T) -> U) -> PinSiteTable<U> {
        match self {
            PinSiteTable::Scalar(value) => PinSiteTable::Scalar(f(value)),
            PinSiteTable::PerPin(values) => {
                PinSiteTable::PerPin(values.iter().map(|(pin, v)| (pin.clone(), f(v))).collect())
            }
            PinSiteTable::PerSite(values) => PinSiteTable::PerSite(values.map(&f)),
            PinSiteTable::PerPinSite(values) => PinSiteTable::PerPinSite(values.map(&f)),
        }
    }

    /// Which of the four shapes this table has.
    pub fn shape(&self) -> TableShape {
        match self {
            PinSiteTable::Scalar(_) => TableShape::Scalar,
            PinSiteTable::PerPin(_) => TableShape::PerPin,
            PinSiteTable::PerSite(_) => TableShape::PerSite,
            PinSiteTable::PerPinSite(_) => TableShape::PerPinSite,
        }
    }
}

impl<T> From<SiteData<T>> for PinSiteTable<T> {
    fn from(value: SiteData<T>) -> Self {
        PinSiteTable::PerSite(value)
    }
}

impl<T> From<PinSiteData<T>> for PinSiteTable<T> {
    fn from(value: PinSiteData<T>) -> Self {
        PinSiteTable::PerPinSite(value)
    }
}
