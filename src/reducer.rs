//! Result Reducer
//!
//! Folds executor output into the two shapes callers consume:
//!
//! - [`to_per_instrument_per_channel`]: `values[session][channel]` in executor order,
//!   for low-level and instrument-count sensitive consumers.
//! - [`to_per_site_per_pin`]: [`PinSiteData`] keyed by reported pin and site.
//!
//! Per-site output applies cascading: merged groups report under the group name from
//! their primary channel only, and ganged followers are left out. When two channels
//! still land on the same (pin, site) the [`SharedPinPolicy`] decides; entries are never
//! overwritten silently.

use serde::{Deserialize, Serialize};

use crate::addressing::ChannelAddress;
use crate::data::PinSiteData;
use crate::error::{AppResult, AteError};
use crate::executor::ChannelResults;

/// What to do when several channels report for the same (pin, site).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharedPinPolicy {
    /// All entries must be equal; disagreement is a configuration error.
    #[default]
    RequireAgreement,
    /// Keep the entry of the earliest channel in executor order.
    First,
}

/// Values nested as `[session][channel]`, in executor order.
pub fn to_per_instrument_per_channel<T: Clone>(results: &ChannelResults<T>) -> Vec<Vec<T>> {
    results
        .sessions()
        .iter()
        .map(|s| s.entries.iter().map(|(_, v)| v.clone()).collect())
        .collect()
}

/// Values keyed by reported pin and site.
///
/// # Errors
///
/// Under `RequireAgreement`, two channels reporting different values for the same
/// (pin, site).
pub fn to_per_site_per_pin<T>(
    results: &ChannelResults<T>,
    policy: SharedPinPolicy,
) -> AppResult<PinSiteData<T>>
where
    T: Clone + PartialEq + std::fmt::Debug,
{
    rekey(results.iter(), policy)
}

/// Re-key nested per-instrument values using the addresses they were produced for.
///
/// `addresses` and `values` must have the same nesting, as produced by a bundle and
/// [`to_per_instrument_per_channel`] over results of that bundle.
pub fn per_instrument_to_per_site_per_pin<T>(
    addresses: &[Vec<ChannelAddress>],
    values: &[Vec<T>],
    policy: SharedPinPolicy,
) -> AppResult<PinSiteData<T>>
where
    T: Clone + PartialEq + std::fmt::Debug,
{
    if addresses.len() != values.len()
        || addresses.iter().zip(values).any(|(a, v)| a.len() != v.len())
    {
        return Err(AteError::Configuration(
            "Per-instrument values do not match the bundle's channel layout".to_string(),
        ));
    }
    rekey(
        addresses.iter().flatten().zip(values.iter().flatten()),
        policy,
    )
}

fn rekey<'a, T>(
    entries: impl Iterator<Item = (&'a ChannelAddress, &'a T)>,
    policy: SharedPinPolicy,
) -> AppResult<PinSiteData<T>>
where
    T: Clone + PartialEq + std::fmt::Debug + 'a,
{
    let mut data = PinSiteData::new();
    for (address, value) in entries {
        let Some(pin) = address.reported_pin() else {
            continue;
        };
        match data.get(pin, address.site) {
            None => {
                data.insert(pin, address.site, value.clone());
            }
            Some(existing) => match policy {
                SharedPinPolicy::First => {}
                SharedPinPolicy::RequireAgreement if existing == value => {}
                SharedPinPolicy::RequireAgreement => {
                    return Err(AteError::Configuration(format!(
                        "Shared pin '{}' on site {} reports disagreeing values {:?} and {:?} ({})",
                        pin, address.site, existing, value, address.channel
                    )));
                }
            },
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::{Cascading, GangRole, SessionId};
    use crate::executor::SessionResults;

    fn addr(session: &str, channel: &str, site: i32, pin: &str) -> ChannelAddress {
        ChannelAddress::new(SessionId::from(session), channel, "NI PXIe-4137", site, pin)
    }

    fn results(entries: Vec<(ChannelAddress, f64)>) -> ChannelResults<f64> {
        ChannelResults::from_sessions(vec![SessionResults {
            session: SessionId::from("SMU_A"),
            entries,
        }])
    }

    #[test]
    fn shared_pin_disagreement_raises_by_default() {
        let raw = results(vec![
            (addr("SMU_A", "SMU_A/0", 0, "VDD"), 1.0),
            (addr("SMU_A", "SMU_A/1", 0, "VDD"), 2.0),
        ]);
        assert!(matches!(
            to_per_site_per_pin(&raw, SharedPinPolicy::RequireAgreement),
            Err(AteError::Configuration(_))
        ));
        let first = to_per_site_per_pin(&raw, SharedPinPolicy::First).unwrap();
        assert_eq!(first.get("VDD", 0), Some(&1.0));
    }

    #[test]
    fn shared_pin_agreement_is_accepted() {
        let raw = results(vec![
            (addr("SMU_A", "SMU_A/0", 0, "VDD"), 1.0),
            (addr("SMU_A", "SMU_A/1", 0, "VDD"), 1.0),
        ]);
        let data = to_per_site_per_pin(&raw, SharedPinPolicy::RequireAgreement).unwrap();
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn cascaded_channels_are_rekeyed() {
        let merged_primary = addr("SMU_A", "SMU_A/0", 0, "VDD1").with_cascading(Cascading::Merged {
            group: "VDDMerged".into(),
            primary: true,
        });
        let merged_member = addr("SMU_A", "SMU_A/1", 0, "VDD2").with_cascading(Cascading::Merged {
            group: "VDDMerged".into(),
            primary: false,
        });
        let follower = addr("SMU_A", "SMU_A/2", 0, "VCC").with_cascading(Cascading::Ganged {
            group: "VCCGang".into(),
            role: GangRole::Follower,
            channel_count: 2,
            leader_source_trigger: "/SMU_A/Engine3/SourceTrigger".into(),
        });
        let raw = results(vec![
            (merged_primary, 1.0),
            (merged_member, 2.0),
            (follower, 3.0),
        ]);
        let data = to_per_site_per_pin(&raw, SharedPinPolicy::RequireAgreement).unwrap();
        assert_eq!(data.pin_names(), vec!["VDDMerged".to_string()]);
        assert_eq!(data.get("VDDMerged", 0), Some(&1.0));
    }

    #[test]
    fn per_instrument_keeps_executor_order() {
        let raw = ChannelResults::from_sessions(vec![
            SessionResults {
                session: SessionId::from("SMU_A"),
                entries: vec![(addr("SMU_A", "SMU_A/0", 0, "VDD"), 1.0)],
            },
            SessionResults {
                session: SessionId::from("SMU_B"),
                entries: vec![
                    (addr("SMU_B", "SMU_B/0", 1, "VDD"), 2.0),
                    (addr("SMU_B", "SMU_B/1", 2, "VDD"), 3.0),
                ],
            },
        ]);
        assert_eq!(
            to_per_instrument_per_channel(&raw),
            vec![vec![1.0], vec![2.0, 3.0]]
        );
    }

    #[test]
    fn mismatched_layout_is_rejected() {
        let addresses = vec![vec![addr("SMU_A", "SMU_A/0", 0, "VDD")]];
        let values: Vec<Vec<f64>> = vec![vec![]];
        assert!(per_instrument_to_per_site_per_pin(&addresses, &values, SharedPinPolicy::First).is_err());
    }
}
