//! Broadcast Resolver
//!
//! The single generalization point that lets one kernel serve voltage sourcing, current
//! sourcing, timing and measurement configuration alike: given a [`PinSiteTable`] and a
//! resolved [`ChannelAddress`], pick the one value that applies.
//!
//! | Table shape   | Key                                  |
//! |---------------|--------------------------------------|
//! | `Scalar`      | none, same value for every channel   |
//! | `PerPin`      | `address.pin`                        |
//! | `PerSite`     | `address.site`                       |
//! | `PerPinSite`  | `(address.pin, address.site)`        |
//!
//! A `PerPinSite` table never falls back to a pin-only or site-only match. The only
//! alternate key is the merged group name: a channel that belongs to a merged pin group
//! also accepts values keyed by the group.

use crate::addressing::ChannelAddress;
use crate::data::PinSiteTable;
use crate::error::AddressingError;

/// Select the value of `table` that applies to `address`.
pub fn select<'a, T>(
    table: &'a PinSiteTable<T>,
    address: &ChannelAddress,
) -> Result<&'a T, AddressingError> {
    let found = match table {
        PinSiteTable::Scalar(value) => Some(value),
        PinSiteTable::PerPin(values) => values.get(&address.pin).or_else(|| {
            address
                .merge_group()
                .and_then(|group| values.get(group))
        }),
        PinSiteTable::PerSite(values) => values.get(address.site),
        PinSiteTable::PerPinSite(values) => values.get(&address.pin, address.site).or_else(|| {
            address
                .merge_group()
                .and_then(|group| values.get(group, address.site))
        }),
    };
    found.ok_or_else(|| AddressingError::MissingKey {
        pin: address.pin.clone(),
        site: address.site,
    })
}

/// Check that `table` has a value for every address before anything is dispatched.
pub fn validate_coverage<'a, T>(
    table: &PinSiteTable<T>,
    addresses: impl IntoIterator<Item = &'a ChannelAddress>,
) -> Result<(), AddressingError> {
    if matches!(table, PinSiteTable::Scalar(_)) {
        return Ok(());
    }
    for address in addresses {
        select(table, address)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::{Cascading, SessionId};
    use crate::data::PinSiteData;

    fn addr(pin: &str, site: i32) -> ChannelAddress {
        ChannelAddress::new(SessionId::from("SMU"), format!("SMU/{site}"), "NI PXIe-4137", site, pin)
    }

    #[test]
    fn scalar_applies_everywhere() {
        let table = PinSiteTable::scalar(1.5);
        assert_eq!(select(&table, &addr("VDD", 0)), Ok(&1.5));
        assert_eq!(select(&table, &addr("VCC", 3)), Ok(&1.5));
    }

    #[test]
    fn per_pin_missing_entry_is_an_addressing_error() {
        let table = PinSiteTable::per_pin([("VDD", 1.0)]);
        assert_eq!(select(&table, &addr("VDD", 2)), Ok(&1.0));
        assert_eq!(
            select(&table, &addr("VCC", 2)),
            Err(AddressingError::MissingKey {
                pin: "VCC".into(),
                site: 2
            })
        );
    }

    #[test]
    fn per_site_keys_by_site() {
        let table = PinSiteTable::per_site([(0, "a"), (1, "b")]);
        assert_eq!(select(&table, &addr("VDD", 1)), Ok(&"b"));
        assert!(select(&table, &addr("VDD", 2)).is_err());
    }

    #[test]
    fn per_pin_site_rejects_partial_matches() {
        let mut data = PinSiteData::new();
        data.insert("VDD", 0, 1.0);
        data.insert("VCC", 1, 2.0);
        let table = PinSiteTable::per_pin_site(data);
        assert_eq!(select(&table, &addr("VDD", 0)), Ok(&1.0));
        // Pin exists on another site, site exists for another pin: still missing.
        assert!(select(&table, &addr("VDD", 1)).is_err());
    }

    #[test]
    fn merged_channels_accept_group_keyed_values() {
        let member = addr("VDD1", 0).with_cascading(Cascading::Merged {
            group: "VDDMerged".into(),
            primary: false,
        });
        let table = PinSiteTable::per_pin([("VDDMerged", 0.5)]);
        assert_eq!(select(&table, &member), Ok(&0.5));
    }

    #[test]
    fn coverage_reports_first_gap() {
        let table = PinSiteTable::per_pin([("VDD", 1.0)]);
        let addresses = vec![addr("VDD", 0), addr("VCC", 0)];
        assert!(validate_coverage(&table, &addresses).is_err());
        assert!(validate_coverage(&PinSiteTable::scalar(1.0), &addresses).is_ok());
    }
}
