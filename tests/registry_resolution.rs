//! Pin/site resolution through a manager built from a pin map.

mod common;

use rust_ate::addressing::SYSTEM_SITE;
use rust_ate::error::{AddressingError, AteError};
use rust_ate::pin_map::PinMap;

fn four_site_map() -> PinMap {
    PinMap::builder()
        .association("VDD", 0, "SMU_A", "SMU_A/0", "NI PXIe-4137")
        .association("VDD", 1, "SMU_A", "SMU_A/1", "NI PXIe-4137")
        .association("VDD", 2, "SMU_B", "SMU_B/0", "NI PXIe-4137")
        .association("VDD", 3, "SMU_B", "SMU_B/1", "NI PXIe-4137")
        .association("VCC", 0, "SMU_A", "SMU_A/2", "NI PXIe-4137")
        .association("VCC", 1, "SMU_A", "SMU_A/3", "NI PXIe-4137")
        .association("VCC", 2, "SMU_B", "SMU_B/2", "NI PXIe-4137")
        .association("VCC", 3, "SMU_B", "SMU_B/3", "NI PXIe-4137")
        .system_association("VREF", "SMU_C", "SMU_C/0", "NI PXIe-4139")
        .pin_group("Supplies", ["VDD", "VCC"])
        .build()
}

fn rig() -> common::Rig {
    common::rig(
        &four_site_map(),
        &[0, 1, 2, 3],
        &[
            ("SMU_A", "NI PXIe-4137", 4),
            ("SMU_B", "NI PXIe-4137", 4),
            ("SMU_C", "NI PXIe-4139", 1),
        ],
    )
}

#[test]
fn site_filter_selects_only_requested_sites() {
    let rig = rig();
    let bundle = rig.manager.resolve(&["VDD"], Some(&[0, 2])).unwrap();

    let addresses: Vec<_> = bundle.channels().map(|a| (a.channel.clone(), a.site)).collect();
    assert_eq!(
        addresses,
        vec![("SMU_A/0".to_string(), 0), ("SMU_B/0".to_string(), 2)]
    );
    assert_eq!(bundle.sessions().len(), 2);
}

#[test]
fn unfiltered_resolution_uses_active_sites() {
    let rig = rig();
    let bundle = rig.manager.resolve(&["VDD"], None).unwrap();
    assert_eq!(bundle.len(), 4);
    assert_eq!(bundle.sites(), &[0, 1, 2, 3]);
}

#[test]
fn sessions_keep_registration_order() {
    let rig = rig();
    let bundle = rig.manager.resolve(&["VREF", "VCC", "VDD"], None).unwrap();

    let ids: Vec<_> = bundle.sessions().iter().map(|s| s.id.to_string()).collect();
    assert_eq!(ids, vec!["SMU_A", "SMU_B", "SMU_C"]);

    let channels: Vec<_> = bundle.sessions()[0]
        .channels
        .iter()
        .map(|a| a.channel.as_str())
        .collect();
    assert_eq!(channels, vec!["SMU_A/0", "SMU_A/1", "SMU_A/2", "SMU_A/3"]);
}

#[test]
fn pin_groups_expand_to_members() {
    let rig = rig();
    let grouped = rig.manager.resolve(&["Supplies"], Some(&[1])).unwrap();
    let explicit = rig.manager.resolve(&["VDD", "VCC"], Some(&[1])).unwrap();

    let grouped: Vec<_> = grouped.channels().cloned().collect();
    let explicit: Vec<_> = explicit.channels().cloned().collect();
    assert_eq!(grouped, explicit);
    assert_eq!(grouped.len(), 2);
}

#[test]
fn repeated_pins_resolve_once() {
    let rig = rig();
    let bundle = rig
        .manager
        .resolve(&["VDD", "Supplies", "VDD"], Some(&[3]))
        .unwrap();
    assert_eq!(bundle.len(), 2);
}

#[test]
fn system_pins_ignore_site_filter() {
    let rig = rig();
    let bundle = rig.manager.resolve(&["VREF", "VDD"], Some(&[1])).unwrap();

    let vref: Vec<_> = bundle.channels_for_pin("VREF").collect();
    assert_eq!(vref.len(), 1);
    assert_eq!(vref[0].site, SYSTEM_SITE);
    assert!(vref[0].is_system());
}

#[test]
fn unknown_pin_is_an_addressing_error() {
    let rig = rig();
    let err = rig.manager.resolve(&["VDD", "NOPE"], None).unwrap_err();
    assert!(matches!(
        err,
        AteError::Addressing(AddressingError::UnknownPin(ref pin)) if pin == "NOPE"
    ));
}

#[test]
fn filter_that_empties_a_pin_is_rejected() {
    let rig = rig();
    let err = rig.manager.resolve(&["VDD"], Some(&[7])).unwrap_err();
    assert!(matches!(
        err,
        AteError::Addressing(AddressingError::EmptySiteFilter { ref pin, .. }) if pin == "VDD"
    ));
}

#[test]
fn dcpower_on_sites_restricts_the_bundle() {
    let rig = rig();
    let vcc = rig.manager.dcpower_on_sites(&["VCC"], &[2, 3]).unwrap();
    let channels: Vec<_> = vcc.bundle().channels().map(|a| a.channel.as_str()).collect();
    assert_eq!(channels, vec!["SMU_B/2", "SMU_B/3"]);
}

#[test]
fn manager_follows_host_sites_and_custom_capabilities() {
    use std::sync::Arc;

    use rust_ate::capability::{CapabilityTable, Feature, TerminalNaming};
    use rust_ate::driver::{DriverSession, TriggerKind};
    use rust_ate::host::RecordingHost;
    use rust_ate::manager::SessionManager;
    use rust_ate::mock::MockSmuSession;
    use rust_ate::registry::SessionRegistry;

    let pin_map = PinMap::builder()
        .association("VDD", 0, "SIM_1", "SIM_1/0", "Acme SMU-1")
        .association("VDD", 1, "SIM_1", "SIM_1/1", "Acme SMU-1")
        .build();
    let sessions: Vec<Arc<dyn DriverSession>> =
        vec![Arc::new(MockSmuSession::new("SIM_1", "Acme SMU-1", 2))];
    let registry = SessionRegistry::from_pin_map(&pin_map, &[0], sessions).unwrap();
    let host = Arc::new(RecordingHost::new(&[0, 1]));

    let mut manager = SessionManager::new(registry, host, common::config())
        .unwrap()
        .with_capabilities(CapabilityTable::new().with_model(
            "Acme SMU-1",
            TerminalNaming::PerEngine,
            &[Feature::Trigger(TriggerKind::Measure)],
        ));
    assert_eq!(manager.resolve(&["VDD"], None).unwrap().len(), 1);

    manager.sync_active_sites();
    assert_eq!(manager.registry().active_sites(), &[0, 1]);
    assert_eq!(manager.resolve(&["VDD"], None).unwrap().len(), 2);
    assert!(manager.capabilities().knows("Acme SMU-1"));
    assert!(!manager.capabilities().knows("NI PXIe-4137"));
}
