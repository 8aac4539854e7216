// SPDX-License-Identifier: AGPL-3.0-only

//! Scoped access guards.
//!
//! Each guard marks its buffer as checked out for exactly the guard's
//! lifetime; `Drop` releases the checkout on every exit path. Host guards
//! deref to slices, so all element access is bounds-checked. The device
//! guard exposes the wgpu buffer for bind groups — kernels are encoded and
//! submitted by the caller while the guard is held.

use super::Buffer;
use bytemuck::Pod;
use std::cell::{Ref, RefMut};
use std::ops::{Deref, DerefMut};

/// Read-only host view (mode Read). Derefs to `&[T]`.
pub struct HostReadGuard<'a, T: Pod> {
    buf: &'a Buffer<T>,
    view: Ref<'a, Vec<T>>,
}

pub(super) fn host_read_guard<T: Pod>(buf: &Buffer<T>) -> HostReadGuard<'_, T> {
    HostReadGuard {
        view: buf.host_storage().borrow(),
        buf,
    }
}

impl<T: Pod> HostReadGuard<'_, T> {
    /// Row `y` of a pitched 2-D buffer, `pitch` elements long.
    ///
    /// # Panics
    ///
    /// Panics if `y >= height`.
    #[must_use]
    pub fn row(&self, y: usize) -> &[T] {
        let height = self.buf.height();
        assert!(y < height, "row {y} out of range for height {height}");
        let pitch = self.buf.pitch();
        &self.view[y * pitch..(y + 1) * pitch]
    }
}

impl<T: Pod> Deref for HostReadGuard<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.view
    }
}

impl<T: Pod> Drop for HostReadGuard<'_, T> {
    fn drop(&mut self) {
        self.buf.release();
    }
}

/// Mutable host view (mode ReadWrite or Overwrite). Derefs to `&mut [T]`.
pub struct HostWriteGuard<'a, T: Pod> {
    buf: &'a Buffer<T>,
    view: RefMut<'a, Vec<T>>,
}

pub(super) fn host_write_guard<T: Pod>(buf: &Buffer<T>) -> HostWriteGuard<'_, T> {
    HostWriteGuard {
        view: buf.host_storage().borrow_mut(),
        buf,
    }
}

impl<T: Pod> HostWriteGuard<'_, T> {
    /// Row `y` of a pitched 2-D buffer, `pitch` elements long.
    ///
    /// # Panics
    ///
    /// Panics if `y >= height`.
    #[must_use]
    pub fn row(&self, y: usize) -> &[T] {
        let height = self.buf.height();
        assert!(y < height, "row {y} out of range for height {height}");
        let pitch = self.buf.pitch();
        &self.view[y * pitch..(y + 1) * pitch]
    }

    /// Mutable row `y` of a pitched 2-D buffer.
    ///
    /// # Panics
    ///
    /// Panics if `y >= height`.
    #[must_use]
    pub fn row_mut(&mut self, y: usize) -> &mut [T] {
        let height = self.buf.height();
        assert!(y < height, "row {y} out of range for height {height}");
        let pitch = self.buf.pitch();
        &mut self.view[y * pitch..(y + 1) * pitch]
    }
}

impl<T: Pod> Deref for HostWriteGuard<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.view
    }
}

impl<T: Pod> DerefMut for HostWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.view
    }
}

impl<T: Pod> Drop for HostWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.buf.release();
    }
}

/// Device-side checkout (any mode). Exposes the wgpu buffer for bind groups.
///
/// Work submitted against the buffer while the guard is held is asynchronous
/// with respect to the host; a later host-side acquire blocks until it has
/// drained.
pub struct DeviceGuard<'a, T: Pod> {
    buf: &'a Buffer<T>,
    raw: Ref<'a, wgpu::Buffer>,
}

pub(super) fn device_guard<'a, T: Pod>(
    buf: &'a Buffer<T>,
    raw: Ref<'a, wgpu::Buffer>,
) -> DeviceGuard<'a, T> {
    DeviceGuard { buf, raw }
}

impl<T: Pod> DeviceGuard<'_, T> {
    /// The device buffer, for building bind groups.
    #[must_use]
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.raw
    }

    /// Whole-buffer binding resource (convenience for bind group entries).
    #[must_use]
    pub fn binding(&self) -> wgpu::BindingResource<'_> {
        self.raw.as_entire_binding()
    }

    /// Element count of the underlying buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True iff the underlying buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Row stride in elements.
    #[must_use]
    pub fn pitch(&self) -> usize {
        self.buf.pitch()
    }

    /// Number of rows.
    #[must_use]
    pub fn height(&self) -> usize {
        self.buf.height()
    }

    /// Payload size in bytes (`len * size_of::<T>()`).
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.buf.len() * std::mem::size_of::<T>()
    }
}

impl<T: Pod> Drop for DeviceGuard<'_, T> {
    fn drop(&mut self) {
        self.buf.release();
    }
}
