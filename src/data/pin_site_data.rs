//! Per-pin, per-site values.
//!
//! `PinSiteData<T>` is the shape every consumer-facing kernel operation returns and the
//! shape handed to the test host for publication. Pins iterate in name order and sites
//! in ascending order so that serialised dumps and test assertions are stable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::addressing::SiteNumber;
use crate::data::SiteData;

/// Values keyed by pin name, then site.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PinSiteData<T> {
    pins: BTreeMap<String, SiteData<T>>,
}

impl<T> Default for PinSiteData<T> {
    fn default() -> Self {
        Self {
            pins: BTreeMap::new(),
        }
    }
}

impl<T> PinSiteData<T> {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Same value for every (pin, site) combination.
    pub fn uniform(pins: &[&str], sites: &[SiteNumber], value: T) -> Self
    where
        T: Clone,
    {
        let mut data = Self::new();
        for pin in pins {
            for site in sites {
                data.insert(pin, *site, value.clone());
            }
        }
        data
    }

    /// Insert a value, returning the previous value for that (pin, site) if any.
    pub fn insert(&mut self, pin: &str, site: SiteNumber, value: T) -> Option<T> {
        self.pins
            .entry(pin.to_string())
            .or_default()
            .insert(site, value)
    }

    /// Value of `pin` on `site`.
    pub fn get(&self, pin: &str, site: SiteNumber) -> Option<&T> {
        self.pins.get(pin).and_then(|sites| sites.get(site))
    }

    /// True when `pin` has a value on `site`.
    pub fn contains(&self, pin: &str, site: SiteNumber) -> bool {
        self.get(pin, site).is_some()
    }

    /// Pins in name order.
    pub fn pin_names(&self) -> Vec<String> {
        self.pins.keys().cloned().collect()
    }

    /// Union of every site that carries at least one value.
    pub fn site_numbers(&self) -> Vec<SiteNumber> {
        let mut sites: Vec<SiteNumber> = self
            .pins
            .values()
            .flat_map(|s| s.site_numbers())
            .collect();
        sites.sort_unstable();
        sites.dedup();
        sites
    }

    /// Every site of one pin.
    pub fn extract_pin(&self, pin: &str) -> Option<&SiteData<T>> {
        self.pins.get(pin)
    }

    /// All pins' values on one site.
    pub fn extract_site(&self, site: SiteNumber) -> BTreeMap<String, &T> {
        self.pins
            .iter()
            .filter_map(|(pin, sites)| sites.get(site).map(|v| (pin.clone(), v)))
            .collect()
    }

    /// Subset holding only the listed pins; unknown names are ignored.
    pub fn extract_pins(&self, pins: &[&str]) -> PinSiteData<T>
    where
        T: Clone,
    {
        PinSiteData {
            pins: self
                .pins
                .iter()
                .filter(|(pin, _)| pins.contains(&pin.as_str()))
                .map(|(pin, sites)| (pin.clone(), sites.clone()))
                .collect(),
        }
    }

    /// Flattened `(pin, site, value)` entries in pin then site order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, SiteNumber, &T)> {
        self.pins
            .iter()
            .flat_map(|(pin, sites)| sites.iter().map(move |(site, v)| (pin.as_str(), site, v)))
    }

    /// Total number of (pin, site) entries.
    pub fn len(&self) -> usize {
        self.pins.values().map(SiteData::len).sum()
    }

    /// True when there are no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Same keys, every value transformed.
    pub fn map<U>(&self, f: impl Fn(&T) -> U) -> PinSiteData<U> {
        PinSiteData {
            pins: self
                .pins
                .iter()
                .map(|(pin, sites)| (pin.clone(), sites.map(&f)))
                .collect(),
        }
    }
}

impl PinSiteData<f64> {
    /// Largest value across every pin and site.
    pub fn max_value(&self) -> Option<f64> {
        self.iter().map(|(_, _, v)| *v).reduce(f64::max)
    }

    /// Smallest value across every pin and site.
    pub fn min_value(&self) -> Option<f64> {
        self.iter().map(|(_, _, v)| *v).reduce(f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PinSiteData<f64> {
        let mut data = PinSiteData::new();
        data.insert("PinA", 0, 1.0);
        data.insert("PinA", 1, 2.0);
        data.insert("PinB", 1, 3.0);
        data
    }

    #[test]
    fn insert_reports_overwrites() {
        let mut data = sample();
        assert_eq!(data.insert("PinA", 0, 9.0), Some(1.0));
        assert_eq!(data.get("PinA", 0), Some(&9.0));
    }

    #[test]
    fn extracts_by_pin_and_site() {
        let data = sample();
        assert_eq!(data.pin_names(), vec!["PinA".to_string(), "PinB".to_string()]);
        assert_eq!(data.site_numbers(), vec![0, 1]);
        assert_eq!(data.extract_pin("PinA").map(SiteData::len), Some(2));
        let site1 = data.extract_site(1);
        assert_eq!(site1.len(), 2);
        assert_eq!(site1["PinB"], &3.0);
        assert_eq!(data.extract_pins(&["PinB"]).len(), 1);
    }

    #[test]
    fn reductions() {
        let data = sample();
        assert_eq!(data.len(), 3);
        assert_eq!(data.max_value(), Some(3.0));
        assert_eq!(data.min_value(), Some(1.0));
        assert_eq!(PinSiteData::<f64>::new().max_value(), None);
    }
}
