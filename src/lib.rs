// SPDX-License-Identifier: AGPL-3.0-only

#![deny(clippy::expect_used, clippy::unwrap_used)]

//! undertow — dual-residency particle data buffers for GPU molecular dynamics.
//!
//! Every numerical subsystem of the engine (integrators, force kernels,
//! rigid-body updates) stores its per-particle state in [`Buffer`]s that can
//! live on the host, on one accelerator, or on both at once. The buffer tracks
//! where the authoritative copy currently is and synchronizes lazily: data
//! moves only when an accessor is acquired at a location that doesn't hold it.
//!
//! # Architecture
//!
//! ```text
//!    ┌─────────────────────────────┐
//!    │      ExecutionContext       │  wgpu adapter discovery + capability
//!    └──────────┬──────────────────┘
//!               │ Arc<ExecutionContext>
//!    ┌──────────▼──────────────────┐
//!    │         Buffer<T>           │  host Vec + lazy device buffer,
//!    └──────────┬──────────────────┘  4-state residency machine
//!               │ acquire(location, mode)
//!    ┌──────────▼──────────────────┐
//!    │  HostReadGuard / HostWrite  │  RAII accessors: sync on acquire,
//!    │  Guard / DeviceGuard        │  release on every exit path
//!    └─────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use undertow::{Buffer, ExecutionContext};
//!
//! # fn main() -> Result<(), undertow::UndertowError> {
//! let ctx = Arc::new(ExecutionContext::host_only());
//! let positions: Buffer<f32> = Buffer::new(1024, Arc::clone(&ctx))?;
//!
//! {
//!     let mut view = positions.host_mut()?;
//!     view[0] = 1.5;
//! } // accessor released here, on every exit path
//!
//! let view = positions.host_read()?;
//! assert_eq!(view[0], 1.5);
//! # Ok(())
//! # }
//! ```
//!
//! Ownership discipline: one driving control thread sequences
//! acquire → use → release per simulation phase. `Buffer` is intentionally
//! not `Sync`; it is not a general thread-safe container.

pub mod buffer;
pub mod context;
pub mod error;

pub use buffer::{
    AccessLocation, AccessMode, Buffer, DeviceGuard, HostReadGuard, HostWriteGuard, Residency,
};
pub use context::{Accelerator, AdapterInfo, ExecutionContext};
pub use error::UndertowError;
