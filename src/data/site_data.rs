//! Per-site values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::addressing::SiteNumber;

/// One value per site, iterated in ascending site order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SiteData<T> {
    values: BTreeMap<SiteNumber, T>,
}

impl<T> Default for SiteData<T> {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }
}

impl<T> SiteData<T> {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Same value replicated on every listed site.
    pub fn uniform(sites: &[SiteNumber], value: T) -> Self
    where
        T: Clone,
    {
        sites.iter().map(|site| (*site, value.clone())).collect()
    }

    /// Insert or replace, returning the previous value.
    pub fn insert(&mut self, site: SiteNumber, value: T) -> Option<T> {
        self.values.insert(site, value)
    }

    /// Value on `site`.
    pub fn get(&self, site: SiteNumber) -> Option<&T> {
        self.values.get(&site)
    }

    /// True when `site` has a value.
    pub fn contains(&self, site: SiteNumber) -> bool {
        self.values.contains_key(&site)
    }

    /// Sites in ascending order.
    pub fn site_numbers(&self) -> Vec<SiteNumber> {
        self.values.keys().copied().collect()
    }

    /// `(site, value)` pairs in ascending site order.
    pub fn iter(&self) -> impl Iterator<Item = (SiteNumber, &T)> {
        self.values.iter().map(|(site, value)| (*site, value))
    }

    /// Number of sites with a value.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no site has a value.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Same sites, every value transformed.
    pub fn map<U>(&self, f: impl Fn(&T) -> U) -> SiteData<U> {
        SiteData {
            values: self.values.iter().map(|(s, v)| (*s, f(v))).collect(),
        }
    }
}

impl<T> FromIterator<(SiteNumber, T)> for SiteData<T> {
    fn from_iter<I: IntoIterator<Item = (SiteNumber, T)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
