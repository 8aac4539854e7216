// SPDX-License-Identifier: AGPL-3.0-only

//! The residency state machine.
//!
//! All synchronization decisions go through the two pure functions here, so
//! the machine can be audited and tested without touching a device. The
//! `Buffer` acquire path asks [`needs_copy_in`] whether data must move, then
//! commits the result of [`next_residency`].

/// Which physical location(s) currently hold a buffer's authoritative data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// Never acquired; storage holds default-initialized (zeroed) content.
    Unallocated,
    /// The host copy is authoritative; any device copy is stale.
    HostOnly,
    /// The device copy is authoritative; the host copy is stale.
    DeviceOnly,
    /// Both copies agree.
    Synced,
}

/// Where an accessor wants the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLocation {
    Host,
    Device,
}

/// What the accessor intends to do with the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Faithful prior value required; no invalidation on release.
    Read,
    /// Faithful prior value required; the other location becomes stale.
    ReadWrite,
    /// No prior value needed — the caller rewrites the entire region.
    /// The other location becomes stale without ever being read.
    Overwrite,
}

/// Whether acquiring at `location` in `mode` must first copy current data in
/// from the other location.
///
/// Only Read and ReadWrite ever copy, and only when the other location is the
/// sole holder. Overwrite trusts the caller to rewrite everything.
pub(crate) fn needs_copy_in(state: Residency, location: AccessLocation, mode: AccessMode) -> bool {
    if matches!(mode, AccessMode::Overwrite) {
        return false;
    }
    matches!(
        (state, location),
        (Residency::DeviceOnly, AccessLocation::Host)
            | (Residency::HostOnly, AccessLocation::Device)
    )
}

/// The residency state after an acquire at `location` in `mode` completes.
pub(crate) fn next_residency(
    state: Residency,
    location: AccessLocation,
    mode: AccessMode,
) -> Residency {
    match mode {
        AccessMode::Read => match (state, location) {
            // Copy-in happened: both locations now agree.
            (Residency::DeviceOnly, AccessLocation::Host)
            | (Residency::HostOnly, AccessLocation::Device) => Residency::Synced,
            // First touch: default-initialized content becomes authoritative.
            (Residency::Unallocated, AccessLocation::Host) => Residency::HostOnly,
            (Residency::Unallocated, AccessLocation::Device) => Residency::DeviceOnly,
            // Already current at this location: no-op.
            _ => state,
        },
        AccessMode::ReadWrite | AccessMode::Overwrite => match location {
            AccessLocation::Host => Residency::HostOnly,
            AccessLocation::Device => Residency::DeviceOnly,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AccessLocation::{Device, Host};
    use AccessMode::{Overwrite, Read, ReadWrite};
    use Residency::{DeviceOnly, HostOnly, Synced, Unallocated};

    #[test]
    fn read_at_current_location_is_noop() {
        assert_eq!(next_residency(HostOnly, Host, Read), HostOnly);
        assert_eq!(next_residency(DeviceOnly, Device, Read), DeviceOnly);
        assert_eq!(next_residency(Synced, Host, Read), Synced);
        assert_eq!(next_residency(Synced, Device, Read), Synced);
        assert!(!needs_copy_in(HostOnly, Host, Read));
        assert!(!needs_copy_in(Synced, Device, Read));
    }

    #[test]
    fn read_at_other_location_syncs() {
        assert!(needs_copy_in(HostOnly, Device, Read));
        assert!(needs_copy_in(DeviceOnly, Host, Read));
        assert_eq!(next_residency(HostOnly, Device, Read), Synced);
        assert_eq!(next_residency(DeviceOnly, Host, Read), Synced);
    }

    #[test]
    fn readwrite_invalidates_other_location() {
        assert_eq!(next_residency(Synced, Host, ReadWrite), HostOnly);
        assert_eq!(next_residency(Synced, Device, ReadWrite), DeviceOnly);
        assert_eq!(next_residency(DeviceOnly, Host, ReadWrite), HostOnly);
        // ...but still copies the prior value in first.
        assert!(needs_copy_in(DeviceOnly, Host, ReadWrite));
        assert!(needs_copy_in(HostOnly, Device, ReadWrite));
    }

    #[test]
    fn overwrite_never_copies_in() {
        assert!(!needs_copy_in(DeviceOnly, Host, Overwrite));
        assert!(!needs_copy_in(HostOnly, Device, Overwrite));
        assert!(!needs_copy_in(Synced, Host, Overwrite));
        assert!(!needs_copy_in(Unallocated, Device, Overwrite));
    }

    #[test]
    fn overwrite_claims_location_unconditionally() {
        assert_eq!(next_residency(DeviceOnly, Host, Overwrite), HostOnly);
        assert_eq!(next_residency(HostOnly, Device, Overwrite), DeviceOnly);
        assert_eq!(next_residency(Synced, Device, Overwrite), DeviceOnly);
        assert_eq!(next_residency(Unallocated, Host, Overwrite), HostOnly);
    }

    #[test]
    fn first_touch_leaves_default_initialized_content() {
        // Read and ReadWrite on Unallocated have nothing to copy from.
        assert!(!needs_copy_in(Unallocated, Host, Read));
        assert!(!needs_copy_in(Unallocated, Device, ReadWrite));
        assert_eq!(next_residency(Unallocated, Host, Read), HostOnly);
        assert_eq!(next_residency(Unallocated, Device, Read), DeviceOnly);
        assert_eq!(next_residency(Unallocated, Host, ReadWrite), HostOnly);
        assert_eq!(next_residency(Unallocated, Device, ReadWrite), DeviceOnly);
    }
}
