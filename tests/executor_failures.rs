//! Failure aggregation across a fan-out: one bad channel never hides the rest.

mod common;

use rust_ate::data::PinSiteTable;
use rust_ate::dcpower::ForceSettings;
use rust_ate::error::AteError;
use rust_ate::pin_map::PinMap;
use tracing_test::traced_test;

fn rig() -> common::Rig {
    let pin_map = PinMap::builder()
        .association("VDD", 0, "SMU_A", "SMU_A/0", "NI PXIe-4139")
        .association("VDD", 1, "SMU_A", "SMU_A/1", "NI PXIe-4139")
        .association("VDD", 2, "SMU_B", "SMU_B/0", "NI PXIe-4139")
        .association("VDD", 3, "SMU_B", "SMU_B/1", "NI PXIe-4139")
        .build();
    common::rig(
        &pin_map,
        &[0, 1, 2, 3],
        &[("SMU_A", "NI PXIe-4139", 2), ("SMU_B", "NI PXIe-4139", 2)],
    )
}

#[test]
fn single_channel_fault_is_reported_and_others_still_run() {
    let rig = rig();
    let vdd = rig.manager.dcpower(&["VDD"]).unwrap();
    vdd.force_voltage(&PinSiteTable::scalar(ForceSettings::new(1.0, Some(0.01))))
        .unwrap();
    rig.smu("SMU_B").inject_fault("SMU_B/0", "measure");
    rig.smus.iter().for_each(|s| s.clear_operations());

    let err = vdd.measure_voltage().unwrap_err();
    let AteError::Execution(aggregate) = err else {
        panic!("expected an aggregate execution error, got {err:?}");
    };
    assert_eq!(aggregate.len(), 1);
    let failed = aggregate.failed_channels();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].channel, "SMU_B/0");
    assert_eq!(failed[0].site, 2);
    assert!(aggregate.to_string().contains("Simulated measure fault on SMU_B/0"));

    for (resource, channel) in [("SMU_A", "SMU_A/0"), ("SMU_A", "SMU_A/1"), ("SMU_B", "SMU_B/1")] {
        let ops = rig.smu(resource).operations();
        assert!(
            ops.contains(&format!("measure {channel}")),
            "{channel} was not measured: {ops:?}"
        );
    }
}

#[test]
fn every_failure_is_collected() {
    let rig = rig();
    let vdd = rig.manager.dcpower(&["VDD"]).unwrap();
    rig.smu("SMU_A").inject_fault("SMU_A/1", "configure_source");
    rig.smu("SMU_B").inject_fault("SMU_B/1", "configure_source");

    let err = vdd
        .force_voltage(&PinSiteTable::scalar(ForceSettings::new(1.0, None)))
        .unwrap_err();
    let AteError::Execution(aggregate) = err else {
        panic!("expected an aggregate execution error, got {err:?}");
    };
    let mut failed: Vec<_> = aggregate
        .failed_channels()
        .into_iter()
        .map(|a| a.channel.clone())
        .collect();
    failed.sort();
    assert_eq!(failed, vec!["SMU_A/1", "SMU_B/1"]);
    assert_eq!(aggregate.operation, "configure_source");
}

#[test]
fn per_session_failure_names_all_its_channels() {
    let rig = rig();
    let vdd = rig.manager.dcpower(&["VDD"]).unwrap();
    rig.smu("SMU_A").inject_fault("SMU_A/0", "abort");

    let err = vdd.abort().unwrap_err();
    let AteError::Execution(aggregate) = err else {
        panic!("expected an aggregate execution error, got {err:?}");
    };
    assert_eq!(aggregate.len(), 1);
    let failed: Vec<_> = aggregate
        .failed_channels()
        .into_iter()
        .map(|a| a.channel.as_str())
        .collect();
    assert_eq!(failed, vec!["SMU_A/0", "SMU_A/1"]);
    assert!(rig
        .smu("SMU_B")
        .operations()
        .contains(&"abort SMU_B/1".to_string()));
}

#[test]
fn panicking_action_becomes_a_failure() {
    let rig = rig();
    let bundle = rig.manager.resolve(&["VDD"], None).unwrap();

    let err = rig
        .manager
        .executor()
        .run_per_channel(&bundle, "probe", |_, address| {
            if address.site == 3 {
                panic!("probe exploded on site 3");
            }
            Ok(address.site)
        })
        .unwrap_err();

    assert_eq!(err.len(), 1);
    assert_eq!(err.failed_channels()[0].site, 3);
    assert!(err.to_string().contains("probe exploded on site 3"));
}

#[test]
fn missing_table_entry_fails_before_dispatch() {
    let rig = rig();
    let vdd = rig.manager.dcpower(&["VDD"]).unwrap();
    rig.smus.iter().for_each(|s| s.clear_operations());

    let table = PinSiteTable::per_site([
        (0, ForceSettings::new(1.0, None)),
        (1, ForceSettings::new(1.0, None)),
        (2, ForceSettings::new(1.0, None)),
    ]);
    let err = vdd.force_voltage(&table).unwrap_err();
    assert!(matches!(err, AteError::Addressing(_)));
    assert!(rig.smus.iter().all(|s| s.operations().is_empty()));
}

#[test]
#[traced_test]
fn channel_failures_are_logged() {
    let rig = rig();
    let vdd = rig.manager.dcpower(&["VDD"]).unwrap();
    rig.smu("SMU_A").inject_fault("SMU_A/1", "measure");

    assert!(vdd.measure_current().is_err());
    assert!(logs_contain("Channel action failed"));
    assert!(logs_contain("SMU_A/1"));
}
