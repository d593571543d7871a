use acrn_domain::MacAddress;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{HostDevices, MachineResources, RESOURCE_TARGET, ResourceError, TapRequest};
use crate::retry::RetryPolicy;

/// Prefix of generated tap names.
pub const TAP_PREFIX: &str = "tap";

/// Creates a tap for a bridge-backed interface.
///
/// A hint is reused only when it carries [`TAP_PREFIX`] and is not a
/// template; anything else is discarded and a fresh name generated.
///
/// # Errors
///
/// Propagates [`ResourceError`] from the device backend. Nothing created by
/// this call survives a failure.
pub fn create_network_tap(
    devices: &dyn HostDevices,
    hint: Option<&str>,
    bridge: &str,
    mac: MacAddress,
    owner: Uuid,
) -> Result<String, ResourceError> {
    let name = match hint {
        Some(hint) if reusable_hint(hint) => Some(hint),
        Some(hint) => {
            warn!(
                target: RESOURCE_TARGET,
                hint,
                "ignoring interface name without the '{TAP_PREFIX}' prefix"
            );
            None
        }
        None => None,
    };
    let tap = devices.create_tap(&TapRequest {
        name,
        bridge,
        mac,
        owner,
    })?;
    info!(
        target: RESOURCE_TARGET,
        tap = %tap,
        bridge,
        machine = %owner,
        "tap device created"
    );
    Ok(tap)
}

fn reusable_hint(hint: &str) -> bool {
    hint.len() > TAP_PREFIX.len() && hint.starts_with(TAP_PREFIX) && !hint.contains('%')
}

/// Detaches and deletes every tap recorded against a machine.
///
/// Detaching is best effort. Deletion is retried under `policy` because the
/// launcher may still hold the device briefly after exiting; giving up is
/// logged and the record dropped regardless.
pub fn destroy_network_taps(
    devices: &dyn HostDevices,
    resources: &mut MachineResources,
    policy: &RetryPolicy,
) {
    for tap in resources.take_taps() {
        if let Err(error) = devices.detach_tap(&tap.name) {
            debug!(
                target: RESOURCE_TARGET,
                tap = %tap.name,
                bridge = %tap.bridge,
                error = %error,
                "tap detach failed; continuing"
            );
        }
        match policy.run(|_| devices.delete_tap(&tap.name)) {
            Ok(()) => info!(
                target: RESOURCE_TARGET,
                tap = %tap.name,
                "tap device deleted"
            ),
            Err(gave_up) => warn!(
                target: RESOURCE_TARGET,
                tap = %tap.name,
                attempts = gave_up.attempts,
                error = %gave_up.last_error,
                "gave up deleting tap device"
            ),
        }
    }
}
