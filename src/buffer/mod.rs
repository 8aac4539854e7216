// SPDX-License-Identifier: AGPL-3.0-only

//! Dual-residency typed buffers.
//!
//! A [`Buffer<T>`] owns a host allocation and, lazily, an accelerator
//! allocation for the same N (or pitch × height) elements. A 4-state
//! residency machine ([`Residency`]) records which side holds the
//! authoritative copy; data moves only when an accessor is acquired at a
//! location that doesn't hold it.
//!
//! Access goes through scoped RAII guards — [`HostReadGuard`],
//! [`HostWriteGuard`], [`DeviceGuard`] — acquired per location × mode:
//!
//! | method               | location | mode      |
//! |----------------------|----------|-----------|
//! | `host_read`          | host     | Read      |
//! | `host_mut`           | host     | ReadWrite |
//! | `host_overwrite`     | host     | Overwrite |
//! | `device_read`        | device   | Read      |
//! | `device_mut`         | device   | ReadWrite |
//! | `device_overwrite`   | device   | Overwrite |
//!
//! At most one guard may be outstanding per buffer; a second acquire fails
//! fast with [`crate::UndertowError::ConcurrentAccess`]. Release is automatic
//! on every exit path.
//!
//! Overwrite mode trusts the caller to rewrite the entire region before the
//! guard drops. Elements left unwritten hold unspecified values (whatever the
//! destination allocation last held) — out of contract, not detected.

mod guards;
mod residency;

pub use guards::{DeviceGuard, HostReadGuard, HostWriteGuard};
pub use residency::{AccessLocation, AccessMode, Residency};

use crate::context::ExecutionContext;
use crate::error::UndertowError;
use bytemuck::Pod;
use std::cell::{Cell, Ref, RefCell};
use std::sync::Arc;

/// A typed array of particle data resident on the host, the accelerator, or
/// both.
///
/// Host storage is allocated (zeroed) at construction; accelerator storage is
/// allocated on the first device-side acquire. Cloning deep-copies the
/// current authoritative content into a fresh host-resident buffer.
///
/// Not a thread-safe container: interior bookkeeping uses `Cell`/`RefCell`,
/// so `Buffer` is `!Sync` by construction. One control thread sequences
/// acquire → use → release per simulation phase.
pub struct Buffer<T: Pod> {
    ctx: Arc<ExecutionContext>,
    len: usize,
    pitch: usize,
    height: usize,
    host: RefCell<Vec<T>>,
    device: RefCell<Option<wgpu::Buffer>>,
    residency: Cell<Residency>,
    in_use: Cell<bool>,
}

impl<T: Pod> Buffer<T> {
    /// 1-D buffer of `n` elements. `n == 0` is a well-defined empty buffer
    /// that allocates nothing.
    ///
    /// # Errors
    ///
    /// Returns [`UndertowError::HostAllocation`] if host memory cannot be
    /// obtained.
    pub fn new(n: usize, ctx: Arc<ExecutionContext>) -> Result<Self, UndertowError> {
        Self::with_shape(n, 1, ctx)
    }

    /// Pitched 2-D buffer of `width` × `height` elements.
    ///
    /// The row stride (pitch) is `width` rounded up to the context's row
    /// granularity, so `len() == pitch() * height()`.
    ///
    /// # Errors
    ///
    /// Returns [`UndertowError::HostAllocation`] if host memory cannot be
    /// obtained.
    pub fn new_2d(
        width: usize,
        height: usize,
        ctx: Arc<ExecutionContext>,
    ) -> Result<Self, UndertowError> {
        let pitch = round_up(width, ctx.row_granularity());
        Self::with_shape(pitch, height, ctx)
    }

    fn with_shape(
        pitch: usize,
        height: usize,
        ctx: Arc<ExecutionContext>,
    ) -> Result<Self, UndertowError> {
        let len = pitch * height;
        let mut host = Vec::new();
        if len > 0 {
            host.try_reserve_exact(len)
                .map_err(|_| UndertowError::HostAllocation {
                    bytes: len * std::mem::size_of::<T>(),
                })?;
            host.resize(len, T::zeroed());
        }
        Ok(Self {
            ctx,
            len,
            pitch,
            height,
            host: RefCell::new(host),
            device: RefCell::new(None),
            residency: Cell::new(Residency::Unallocated),
            in_use: Cell::new(false),
        })
    }

    /// Total element count (`pitch * height`).
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Row stride in elements (= `len` for 1-D buffers).
    #[must_use]
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    /// Number of rows (1 for 1-D buffers).
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// True iff the buffer holds zero elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current residency state.
    #[must_use]
    pub fn residency(&self) -> Residency {
        self.residency.get()
    }

    /// The execution context this buffer is bound to.
    #[must_use]
    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Exchange all storage and metadata with `other` in O(1).
    ///
    /// Never fails and never touches element data. The exclusive borrows
    /// statically guarantee neither buffer has an accessor outstanding.
    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(self, other);
    }

    /// Reset every element of the authoritative copy to zero.
    ///
    /// Implemented as a host-side Overwrite, so no stale data is ever read
    /// and any device copy is invalidated.
    ///
    /// # Errors
    ///
    /// Returns [`UndertowError::ConcurrentAccess`] if an accessor is
    /// outstanding.
    pub fn zero(&self) -> Result<(), UndertowError> {
        let mut view = self.host_overwrite()?;
        view.fill(T::zeroed());
        Ok(())
    }

    // ── Scoped acquisition ───────────────────────────────────────────

    /// Acquire a read-only host view (mode Read).
    ///
    /// Synchronizes device → host first if the device holds the sole
    /// authoritative copy; blocks until that copy has settled.
    ///
    /// # Errors
    ///
    /// [`UndertowError::ConcurrentAccess`] if an accessor is outstanding;
    /// [`UndertowError::Readback`] if a required device → host copy fails.
    pub fn host_read(&self) -> Result<HostReadGuard<'_, T>, UndertowError> {
        self.acquire(AccessLocation::Host, AccessMode::Read)?;
        Ok(guards::host_read_guard(self))
    }

    /// Acquire a mutable host view with faithful prior content (mode
    /// ReadWrite). Any device copy becomes stale.
    ///
    /// # Errors
    ///
    /// As [`Self::host_read`].
    pub fn host_mut(&self) -> Result<HostWriteGuard<'_, T>, UndertowError> {
        self.acquire(AccessLocation::Host, AccessMode::ReadWrite)?;
        Ok(guards::host_write_guard(self))
    }

    /// Acquire a mutable host view without synchronizing (mode Overwrite).
    ///
    /// The caller is trusted to rewrite the entire region before release;
    /// unwritten elements hold unspecified values. Any device copy is
    /// invalidated without being read.
    ///
    /// # Errors
    ///
    /// [`UndertowError::ConcurrentAccess`] if an accessor is outstanding.
    pub fn host_overwrite(&self) -> Result<HostWriteGuard<'_, T>, UndertowError> {
        self.acquire(AccessLocation::Host, AccessMode::Overwrite)?;
        Ok(guards::host_write_guard(self))
    }

    /// Acquire the device-side buffer for read-only kernel access (mode
    /// Read). Allocates device storage on first use; synchronizes host →
    /// device if the host holds the sole authoritative copy.
    ///
    /// # Errors
    ///
    /// [`UndertowError::NoAccelerator`] on a host-only context;
    /// [`UndertowError::ConcurrentAccess`] if an accessor is outstanding;
    /// [`UndertowError::DeviceAllocation`] if lazy allocation fails.
    pub fn device_read(&self) -> Result<DeviceGuard<'_, T>, UndertowError> {
        self.device_guard(AccessMode::Read)
    }

    /// Acquire the device-side buffer for read-write kernel access (mode
    /// ReadWrite). The host copy becomes stale.
    ///
    /// # Errors
    ///
    /// As [`Self::device_read`].
    pub fn device_mut(&self) -> Result<DeviceGuard<'_, T>, UndertowError> {
        self.device_guard(AccessMode::ReadWrite)
    }

    /// Acquire the device-side buffer without synchronizing (mode Overwrite).
    /// The kernel is trusted to rewrite the entire region; the host copy is
    /// invalidated without being read.
    ///
    /// # Errors
    ///
    /// As [`Self::device_read`].
    pub fn device_overwrite(&self) -> Result<DeviceGuard<'_, T>, UndertowError> {
        self.device_guard(AccessMode::Overwrite)
    }

    // ── Internals ────────────────────────────────────────────────────

    /// The single guarded transition: fail-fast exclusion check, copy-in if
    /// the mode requires a faithful prior value, lazy device allocation,
    /// then the residency update from [`residency::next_residency`].
    fn acquire(&self, location: AccessLocation, mode: AccessMode) -> Result<(), UndertowError> {
        if self.in_use.get() {
            return Err(UndertowError::ConcurrentAccess);
        }
        if location == AccessLocation::Device {
            self.ctx.require_accelerator()?;
        }
        let state = self.residency.get();
        if residency::needs_copy_in(state, location, mode) {
            match location {
                AccessLocation::Host => self.copy_device_to_host()?,
                AccessLocation::Device => self.copy_host_to_device()?,
            }
        } else if location == AccessLocation::Device {
            self.ensure_device_storage()?;
        }
        self.residency
            .set(residency::next_residency(state, location, mode));
        self.in_use.set(true);
        Ok(())
    }

    fn device_guard(&self, mode: AccessMode) -> Result<DeviceGuard<'_, T>, UndertowError> {
        self.acquire(AccessLocation::Device, mode)?;
        match Ref::filter_map(self.device.borrow(), Option::as_ref) {
            Ok(raw) => Ok(guards::device_guard(self, raw)),
            Err(_) => {
                self.release();
                Err(UndertowError::DeviceAllocation(
                    "device storage missing after acquire".into(),
                ))
            }
        }
    }

    pub(super) fn release(&self) {
        self.in_use.set(false);
    }

    fn ensure_device_storage(&self) -> Result<(), UndertowError> {
        if self.device.borrow().is_some() {
            return Ok(());
        }
        let acc = self.ctx.require_accelerator()?;
        let raw = acc.create_storage_buffer(
            self.len * std::mem::size_of::<T>(),
            "undertow particle buffer",
        )?;
        *self.device.borrow_mut() = Some(raw);
        Ok(())
    }

    fn copy_host_to_device(&self) -> Result<(), UndertowError> {
        self.ensure_device_storage()?;
        let acc = self.ctx.require_accelerator()?;
        let device = self.device.borrow();
        if let Some(raw) = device.as_ref() {
            let host = self.host.borrow();
            acc.upload(raw, bytemuck::cast_slice(&host));
        }
        Ok(())
    }

    fn copy_device_to_host(&self) -> Result<(), UndertowError> {
        let acc = self.ctx.require_accelerator()?;
        let device = self.device.borrow();
        let Some(raw) = device.as_ref() else {
            // DeviceOnly residency without storage cannot arise; nothing to copy.
            return Ok(());
        };
        let bytes = acc.read_back(raw, self.len * std::mem::size_of::<T>())?;
        let mut host = self.host.borrow_mut();
        bytemuck::cast_slice_mut::<T, u8>(&mut host).copy_from_slice(&bytes);
        Ok(())
    }

    pub(super) fn host_storage(&self) -> &RefCell<Vec<T>> {
        &self.host
    }

    /// Snapshot of the authoritative content, reading back from the device
    /// if it is the sole holder. Used by `Clone`; does not disturb residency.
    fn authoritative_host_copy(&self) -> Result<Vec<T>, UndertowError> {
        match self.residency.get() {
            Residency::DeviceOnly => {
                let acc = self.ctx.require_accelerator()?;
                let device = self.device.borrow();
                let mut data = vec![T::zeroed(); self.len];
                if let Some(raw) = device.as_ref() {
                    let bytes = acc.read_back(raw, self.len * std::mem::size_of::<T>())?;
                    bytemuck::cast_slice_mut::<T, u8>(&mut data).copy_from_slice(&bytes);
                }
                Ok(data)
            }
            _ => Ok(self.host.borrow().clone()),
        }
    }
}

/// Deep copy: current authoritative content lands in a fresh host-resident
/// buffer with the same shape. The clone shares the execution context but no
/// storage.
///
/// # Panics
///
/// Panics if the source holds its data only on the device and the readback
/// fails, or if a write accessor is outstanding on the source.
impl<T: Pod> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        let host = match self.authoritative_host_copy() {
            Ok(data) => data,
            Err(e) => panic!("Buffer clone: device readback failed: {e}"),
        };
        let residency = if self.len == 0 || self.residency.get() == Residency::Unallocated {
            Residency::Unallocated
        } else {
            Residency::HostOnly
        };
        Self {
            ctx: Arc::clone(&self.ctx),
            len: self.len,
            pitch: self.pitch,
            height: self.height,
            host: RefCell::new(host),
            device: RefCell::new(None),
            residency: Cell::new(residency),
            in_use: Cell::new(false),
        }
    }
}

impl<T: Pod> std::fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len)
            .field("pitch", &self.pitch)
            .field("height", &self.height)
            .field("residency", &self.residency.get())
            .field("in_use", &self.in_use.get())
            .finish()
    }
}

/// Smallest multiple of `granularity` that is ≥ `value`.
fn round_up(value: usize, granularity: usize) -> usize {
    value.div_ceil(granularity) * granularity
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ctx() -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext::host_only())
    }

    #[test]
    fn round_up_to_granularity() {
        assert_eq!(round_up(0, 64), 0);
        assert_eq!(round_up(1, 64), 64);
        assert_eq!(round_up(63, 64), 64);
        assert_eq!(round_up(64, 64), 64);
        assert_eq!(round_up(65, 64), 128);
        assert_eq!(round_up(100, 1), 100);
    }

    #[test]
    fn one_d_shape() {
        let buf: Buffer<i32> = Buffer::new(100, ctx()).unwrap();
        assert_eq!(buf.len(), 100);
        assert_eq!(buf.pitch(), 100);
        assert_eq!(buf.height(), 1);
        assert!(!buf.is_empty());
    }

    #[test]
    fn two_d_shape_pitched() {
        let ctx = Arc::new(ExecutionContext::host_only_with_granularity(64));
        let buf: Buffer<i32> = Buffer::new_2d(63, 120, ctx).unwrap();
        assert_eq!(buf.pitch(), 64);
        assert_eq!(buf.height(), 120);
        assert_eq!(buf.len(), 7680);
    }

    #[test]
    fn two_d_exact_width_not_padded() {
        let ctx = Arc::new(ExecutionContext::host_only_with_granularity(64));
        let buf: Buffer<f64> = Buffer::new_2d(128, 3, ctx).unwrap();
        assert_eq!(buf.pitch(), 128);
        assert_eq!(buf.len(), 384);
    }

    #[test]
    fn empty_buffer_is_well_defined() {
        let buf: Buffer<f32> = Buffer::new(0, ctx()).unwrap();
        assert!(buf.is_empty());
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.residency(), Residency::Unallocated);
    }

    #[test]
    fn fresh_buffer_reads_zeroed() {
        let buf: Buffer<f64> = Buffer::new(16, ctx()).unwrap();
        assert_eq!(buf.residency(), Residency::Unallocated);
        let view = buf.host_read().unwrap();
        assert!(view.iter().all(|&v| v == 0.0));
        drop(view);
        assert_eq!(buf.residency(), Residency::HostOnly);
    }

    #[test]
    fn write_then_read_round_trip() {
        let buf: Buffer<i32> = Buffer::new(100, ctx()).unwrap();
        {
            let mut view = buf.host_mut().unwrap();
            for (i, v) in view.iter_mut().enumerate() {
                *v = i as i32;
            }
        }
        let view = buf.host_read().unwrap();
        for (i, &v) in view.iter().enumerate() {
            assert_eq!(v, i as i32);
        }
    }

    #[test]
    fn second_acquire_fails_fast() {
        let buf: Buffer<i32> = Buffer::new(8, ctx()).unwrap();
        let _held = buf.host_read().unwrap();
        assert!(matches!(
            buf.host_read(),
            Err(UndertowError::ConcurrentAccess)
        ));
        assert!(matches!(
            buf.host_mut(),
            Err(UndertowError::ConcurrentAccess)
        ));
    }

    #[test]
    fn release_is_automatic_on_early_exit() {
        let buf: Buffer<i32> = Buffer::new(8, ctx()).unwrap();
        fn early(buf: &Buffer<i32>) -> Result<(), UndertowError> {
            let view = buf.host_read()?;
            if view[0] == 0 {
                return Ok(()); // guard drops here
            }
            Ok(())
        }
        early(&buf).unwrap();
        assert!(buf.host_mut().is_ok());
    }

    #[test]
    fn device_acquire_on_host_only_context_is_configuration_error() {
        let buf: Buffer<f32> = Buffer::new(8, ctx()).unwrap();
        assert!(matches!(
            buf.device_read(),
            Err(UndertowError::NoAccelerator)
        ));
        // The failed acquire must not leave the buffer locked.
        assert!(buf.host_read().is_ok());
    }

    #[test]
    fn clone_is_deep_and_host_resident() {
        let buf: Buffer<i32> = Buffer::new(10, ctx()).unwrap();
        {
            let mut view = buf.host_mut().unwrap();
            view.iter_mut().for_each(|v| *v = 7);
        }
        let copy = buf.clone();
        assert_eq!(copy.len(), 10);
        assert_eq!(copy.pitch(), 10);
        assert_eq!(copy.height(), 1);
        assert_eq!(copy.residency(), Residency::HostOnly);

        // Mutating the copy must not affect the original, and vice versa.
        {
            let mut view = copy.host_mut().unwrap();
            view[0] = -1;
        }
        assert_eq!(buf.host_read().unwrap()[0], 7);
        {
            let mut view = buf.host_mut().unwrap();
            view[1] = 99;
        }
        assert_eq!(copy.host_read().unwrap()[1], 7);
    }

    #[test]
    fn clone_of_empty_buffer_stays_empty() {
        let buf: Buffer<i32> = Buffer::new(0, ctx()).unwrap();
        let copy = buf.clone();
        assert!(copy.is_empty());
        assert_eq!(copy.residency(), Residency::Unallocated);
    }

    #[test]
    fn assignment_replaces_prior_contents() {
        let src: Buffer<i32> = Buffer::new(100, ctx()).unwrap();
        {
            let mut view = src.host_mut().unwrap();
            for (i, v) in view.iter_mut().enumerate() {
                *v = i as i32;
            }
        }
        let mut dst: Buffer<i32> = Buffer::new(1, ctx()).unwrap();
        dst.clone_from(&src);
        assert_eq!(dst.len(), 100);
        assert_eq!(dst.pitch(), 100);
        assert_eq!(dst.height(), 1);
        let view = dst.host_read().unwrap();
        for (i, &v) in view.iter().enumerate() {
            assert_eq!(v, i as i32);
        }
    }

    #[test]
    fn swap_exchanges_identity_without_touching_data() {
        let ctx = ctx();
        let mut a: Buffer<i32> = Buffer::new(1000, Arc::clone(&ctx)).unwrap();
        let mut b: Buffer<i32> = Buffer::new(0, ctx).unwrap();
        {
            let mut view = a.host_mut().unwrap();
            view[999] = 42;
        }

        a.swap(&mut b);
        assert!(a.is_empty());
        assert_eq!(b.len(), 1000);
        assert_eq!(b.host_read().unwrap()[999], 42);
    }

    #[test]
    fn zero_resets_contents() {
        let buf: Buffer<i32> = Buffer::new(16, ctx()).unwrap();
        {
            let mut view = buf.host_mut().unwrap();
            view.iter_mut().for_each(|v| *v = 5);
        }
        buf.zero().unwrap();
        assert_eq!(buf.residency(), Residency::HostOnly);
        assert!(buf.host_read().unwrap().iter().all(|&v| v == 0));
    }

    #[test]
    fn row_access_uses_pitch() {
        let ctx = Arc::new(ExecutionContext::host_only_with_granularity(4));
        let buf: Buffer<i32> = Buffer::new_2d(3, 5, ctx).unwrap();
        assert_eq!(buf.pitch(), 4);
        {
            let mut view = buf.host_mut().unwrap();
            for y in 0..5 {
                let row = view.row_mut(y);
                assert_eq!(row.len(), 4);
                for v in row.iter_mut() {
                    *v = y as i32;
                }
            }
        }
        let view = buf.host_read().unwrap();
        assert!(view.row(4).iter().all(|&v| v == 4));
        assert_eq!(view[4 * 4], 4); // flat index of row 4, column 0
    }

    #[test]
    #[should_panic(expected = "row")]
    fn row_out_of_range_panics() {
        let ctx = Arc::new(ExecutionContext::host_only_with_granularity(4));
        let buf: Buffer<i32> = Buffer::new_2d(3, 5, ctx).unwrap();
        let view = buf.host_read().unwrap();
        let _ = view.row(5);
    }

    #[test]
    fn overwrite_skips_synchronization_on_host() {
        let buf: Buffer<i32> = Buffer::new(4, ctx()).unwrap();
        {
            let mut view = buf.host_overwrite().unwrap();
            view.iter_mut().for_each(|v| *v = 3);
        }
        assert_eq!(buf.residency(), Residency::HostOnly);
        assert!(buf.host_read().unwrap().iter().all(|&v| v == 3));
    }
}
