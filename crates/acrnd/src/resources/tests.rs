use std::time::Duration;

use acrn_domain::MacAddress;
use rstest::{fixture, rstest};
use uuid::Uuid;

use super::system::free_tap_name;
use super::*;
use crate::retry::RetryPolicy;
use crate::tests::support::FakeHostDevices;

const FIRST: &str = "d2795438-25d6-11e8-864e-cb7a18b34643";
const SECOND: &str = "a7ada506-1ab0-4b6b-a0da-e513ca9b8c2f";

#[fixture]
fn pool() -> CapacityPool {
    CapacityPool::from_ids(&[FIRST, SECOND]).expect("identifiers should parse")
}

fn mac() -> MacAddress {
    "52:54:00:aa:bb:cc".parse().expect("valid mac")
}

#[rstest]
fn capacity_pool_hands_out_distinct_ids_then_exhausts(mut pool: CapacityPool) {
    let first = pool.acquire(Uuid::from_u128(1)).expect("first machine");
    let second = pool.acquire(Uuid::from_u128(2)).expect("second machine");
    assert_eq!(first.to_string(), FIRST);
    assert_eq!(second.to_string(), SECOND);
    let error = pool
        .acquire(Uuid::from_u128(3))
        .expect_err("third machine should find the pool empty");
    assert_eq!(error.pool_size, 2);
    assert_eq!(pool.available(), 0);
}

#[rstest]
fn capacity_pool_reacquire_returns_held_id(mut pool: CapacityPool) {
    let machine = Uuid::from_u128(7);
    let first = pool.acquire(machine).expect("acquire");
    assert_eq!(pool.acquire(machine).expect("reacquire"), first);
    assert_eq!(pool.available(), 1);
}

#[rstest]
fn capacity_pool_release_frees_in_priority_order(mut pool: CapacityPool) {
    let a = Uuid::from_u128(1);
    let b = Uuid::from_u128(2);
    pool.acquire(a).expect("a");
    pool.acquire(b).expect("b");
    assert_eq!(pool.release(a).map(|id| id.to_string()).as_deref(), Some(FIRST));
    assert_eq!(pool.release(a), None, "release is idempotent");
    let c = pool.acquire(Uuid::from_u128(3)).expect("freed id reused");
    assert_eq!(c.to_string(), FIRST);
}

#[test]
fn capacity_pool_rejects_malformed_ids() {
    let error = CapacityPool::from_ids(&["not-a-uuid"]).expect_err("should fail");
    assert_eq!(error.value, "not-a-uuid");
}

#[rstest]
#[case::empty(&[], "tap0")]
#[case::gap(&["tap0", "tap2"], "tap1")]
#[case::others(&["lo", "eth0", "tap0"], "tap1")]
fn free_tap_name_picks_lowest_unused(#[case] existing: &[&str], #[case] expected: &str) {
    let existing = existing.iter().map(|name| (*name).to_owned()).collect::<Vec<_>>();
    assert_eq!(free_tap_name(&existing).as_deref(), Some(expected));
}

#[rstest]
#[case::prefixed(Some("tap7"), "tap7")]
#[case::foreign(Some("vnet0"), "tap0")]
#[case::template(Some("tap%d"), "tap0")]
#[case::absent(None, "tap0")]
fn create_network_tap_reuses_only_prefixed_hints(
    #[case] hint: Option<&str>,
    #[case] expected: &str,
) {
    let devices = FakeHostDevices::new();
    let tap = create_network_tap(&devices, hint, "virbr0", mac(), Uuid::nil())
        .expect("tap should be created");
    assert_eq!(tap, expected);
    assert_eq!(devices.live_taps(), vec![expected.to_owned()]);
}

#[test]
fn destroy_network_taps_retries_busy_devices() {
    let devices = FakeHostDevices::new();
    let mut resources = MachineResources::default();
    let tap = create_network_tap(&devices, None, "virbr0", mac(), Uuid::nil()).expect("tap");
    resources.record_tap(TapRecord {
        name: tap,
        bridge: "virbr0".to_owned(),
    });
    devices.fail_deletes(2);

    destroy_network_taps(&devices, &mut resources, &RetryPolicy::new(5, Duration::ZERO));

    assert!(resources.taps().is_empty());
    assert!(devices.live_taps().is_empty());
    assert_eq!(devices.delete_attempts(), 3);
}

#[test]
fn destroy_network_taps_gives_up_without_escalating() {
    let devices = FakeHostDevices::new();
    let mut resources = MachineResources::default();
    let tap = create_network_tap(&devices, None, "virbr0", mac(), Uuid::nil()).expect("tap");
    resources.record_tap(TapRecord {
        name: tap.clone(),
        bridge: "virbr0".to_owned(),
    });
    devices.fail_deletes(10);

    destroy_network_taps(&devices, &mut resources, &RetryPolicy::new(3, Duration::ZERO));

    assert!(resources.taps().is_empty(), "record is dropped even when deletion gives up");
    assert_eq!(devices.live_taps(), vec![tap]);
    assert_eq!(devices.delete_attempts(), 3);
}

#[test]
fn pty_registry_is_bounded() {
    let devices = FakeHostDevices::new();
    let mut registry = PtyRegistry::default();
    for port in 0..4 {
        let pty = devices.open_pty().expect("pty");
        registry.push(port, pty).expect("within capacity");
    }
    assert!(matches!(
        registry.ensure_capacity(),
        Err(ResourceError::TooManyChannels { max: 4 })
    ));
    let overflow = devices.open_pty().expect("pty");
    let error = registry.push(4, overflow).expect_err("fifth entry overflows");
    assert_eq!(error.to_string(), "too many ttys (max = 4)");
    assert_eq!(registry.len(), MAX_PTYS);
}

#[test]
fn pty_registry_reset_is_idempotent() {
    let devices = FakeHostDevices::new();
    let mut registry = PtyRegistry::default();
    registry.push(0, devices.open_pty().expect("pty")).expect("push");
    assert!(registry.master_for(0).is_some());
    registry.reset();
    registry.reset();
    assert!(registry.is_empty());
    assert!(registry.master_for(0).is_none());
}
