// SPDX-License-Identifier: AGPL-3.0-only

//! Typed errors for context creation and buffer access.
//!
//! Replaces `Result<_, String>` in public APIs with a proper enum so callers
//! can pattern-match on failure modes (no adapter, exhausted memory, access
//! contract violations) rather than parsing opaque strings.

use std::fmt;

/// Errors arising from execution-context creation or buffer access.
#[derive(Debug)]
pub enum UndertowError {
    /// No compatible GPU adapter was found by wgpu.
    NoAdapter,

    /// GPU device creation failed (wraps the underlying wgpu error message).
    DeviceCreation(String),

    /// Accelerator access was requested on a host-only execution context.
    NoAccelerator,

    /// Host memory could not be obtained for a buffer allocation.
    HostAllocation {
        /// Requested allocation size in bytes.
        bytes: usize,
    },

    /// Accelerator storage could not be allocated (e.g. exceeds the device's
    /// maximum buffer size).
    DeviceAllocation(String),

    /// A second accessor was acquired before the first was released.
    ConcurrentAccess,

    /// Device-to-host readback failed (map callback error or dropped channel).
    Readback(String),
}

impl fmt::Display for UndertowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAdapter => write!(f, "No GPU adapter found"),
            Self::DeviceCreation(e) => write!(f, "Failed to create GPU device: {e}"),
            Self::NoAccelerator => {
                write!(
                    f,
                    "Accelerator access requested on a host-only execution context"
                )
            }
            Self::HostAllocation { bytes } => {
                write!(f, "Failed to allocate {bytes} bytes of host storage")
            }
            Self::DeviceAllocation(msg) => {
                write!(f, "Failed to allocate accelerator storage: {msg}")
            }
            Self::ConcurrentAccess => {
                write!(
                    f,
                    "Buffer accessor acquired while another accessor is outstanding"
                )
            }
            Self::Readback(msg) => write!(f, "Device readback failed: {msg}"),
        }
    }
}

impl std::error::Error for UndertowError {}
