// SPDX-License-Identifier: AGPL-3.0-only

//! Execution context — process-wide compute capability description.
//!
//! An [`ExecutionContext`] is created once, up front, and threaded explicitly
//! through every [`crate::Buffer`] construction. It answers two questions:
//! is there an accelerator in this process, and what row-alignment
//! granularity do pitched 2-D buffers need. There is no global device
//! singleton; capability is a value you pass around.
//!
//! ## Adapter selection
//!
//! Set `UNDERTOW_GPU_ADAPTER` to select a specific GPU:
//!
//! | Value | Behavior |
//! |-------|----------|
//! | `auto` | Auto-detect (discrete + `SHADER_F64` first) |
//! | `0`, `1`, … | Select adapter by enumeration index |
//! | substring | Case-insensitive name match (e.g. `"titan"`, `"4070"`) |
//! | *(unset)* | Same as `auto` |
//!
//! `UNDERTOW_WGPU_BACKEND` (`vulkan`, `metal`, `dx12`) restricts the wgpu
//! backend. Use [`ExecutionContext::enumerate_adapters`] to list GPUs before
//! selecting.

mod adapter;

pub use adapter::AdapterInfo;

use crate::error::UndertowError;

/// Default row-alignment granularity in elements for pitched 2-D buffers.
///
/// 64 elements keeps f64 rows 512-byte aligned, wide enough for coalesced
/// row access on every backend we target.
pub const DEFAULT_ROW_GRANULARITY: usize = 64;

/// An accelerator device bound to this process.
///
/// Owns the wgpu device and queue. Numerical components compile their
/// pipelines against [`Accelerator::device`] and submit work on
/// [`Accelerator::queue`] while holding a device-side buffer accessor.
pub struct Accelerator {
    adapter_name: String,
    has_f64: bool,
    max_buffer_size: u64,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl Accelerator {
    /// Adapter name as reported by the driver.
    #[must_use]
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Whether the device supports IEEE 754 f64 in shaders.
    #[must_use]
    pub fn has_f64(&self) -> bool {
        self.has_f64
    }

    /// Access the underlying wgpu device (for pipeline creation).
    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Access the underlying wgpu queue (for submissions).
    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Create a storage buffer suitable for particle data: shader-visible,
    /// copyable in both directions. Contents start zeroed.
    ///
    /// # Errors
    ///
    /// Returns [`UndertowError::DeviceAllocation`] if `bytes` exceeds the
    /// device's maximum buffer size.
    pub fn create_storage_buffer(
        &self,
        bytes: usize,
        label: &str,
    ) -> Result<wgpu::Buffer, UndertowError> {
        // Minimum one alignment unit so even empty buffers stay bindable.
        let size = padded_copy_size(bytes).max(wgpu::COPY_BUFFER_ALIGNMENT);
        if size > self.max_buffer_size {
            return Err(UndertowError::DeviceAllocation(format!(
                "{size} bytes exceeds device limit of {} bytes",
                self.max_buffer_size
            )));
        }
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }))
    }

    /// Upload raw bytes to a device buffer (overwrites from offset 0).
    ///
    /// Pads the tail with zeroes when `bytes` is not a multiple of wgpu's
    /// copy alignment; the padding lands in the buffer's slack region.
    pub fn upload(&self, buffer: &wgpu::Buffer, bytes: &[u8]) {
        let padded = padded_copy_size(bytes.len()) as usize;
        if padded == bytes.len() {
            self.queue.write_buffer(buffer, 0, bytes);
        } else {
            let mut scratch = vec![0u8; padded];
            scratch[..bytes.len()].copy_from_slice(bytes);
            self.queue.write_buffer(buffer, 0, &scratch);
        }
    }

    /// Read `bytes` back from a device buffer via a staging copy.
    ///
    /// Blocks until the device has drained all work affecting `buffer`, so
    /// the returned bytes are the settled contents.
    ///
    /// # Errors
    ///
    /// Returns [`UndertowError::Readback`] if the map callback fails or the
    /// channel is dropped.
    pub fn read_back(
        &self,
        buffer: &wgpu::Buffer,
        bytes: usize,
    ) -> Result<Vec<u8>, UndertowError> {
        if bytes == 0 {
            return Ok(Vec::new());
        }
        let size = padded_copy_size(bytes);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("undertow readback staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("undertow readback"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| UndertowError::Readback("map callback channel dropped".into()))?
            .map_err(|e| UndertowError::Readback(format!("buffer mapping: {e}")))?;

        let mapped = slice.get_mapped_range();
        let result = mapped[..bytes].to_vec();
        drop(mapped);
        staging.unmap();
        Ok(result)
    }
}

/// Round a copy size up to wgpu's copy alignment (4 bytes).
pub(crate) fn padded_copy_size(bytes: usize) -> u64 {
    let align = wgpu::COPY_BUFFER_ALIGNMENT;
    (bytes as u64).div_ceil(align) * align
}

/// Process-wide description of available compute backends.
///
/// Immutable after creation. Holds at most one accelerator.
pub struct ExecutionContext {
    accelerator: Option<Accelerator>,
    row_granularity: usize,
}

impl ExecutionContext {
    /// Host-only context with the default row granularity. Never fails.
    #[must_use]
    pub fn host_only() -> Self {
        Self::host_only_with_granularity(DEFAULT_ROW_GRANULARITY)
    }

    /// Host-only context with an explicit row granularity in elements.
    /// A granularity of zero is clamped to one.
    #[must_use]
    pub fn host_only_with_granularity(granularity: usize) -> Self {
        Self {
            accelerator: None,
            row_granularity: granularity.max(1),
        }
    }

    /// Context with one accelerator, selected per the module docs.
    ///
    /// Requests `SHADER_F64` when the adapter offers it (force kernels are
    /// f64-first) and raised storage-buffer limits for large particle counts.
    ///
    /// # Errors
    ///
    /// Returns [`UndertowError::NoAdapter`] if no adapter is found or
    /// [`UndertowError::DeviceCreation`] if device creation fails.
    pub async fn with_accelerator() -> Result<Self, UndertowError> {
        let selected = adapter::select_adapter()?;
        let adapter_info = selected.get_info();
        let adapter_features = selected.features();

        let mut required_features = wgpu::Features::empty();
        if adapter_features.contains(wgpu::Features::SHADER_F64) {
            required_features |= wgpu::Features::SHADER_F64;
        }

        let required_limits = wgpu::Limits {
            max_storage_buffer_binding_size: 512 * 1024 * 1024,
            max_buffer_size: 1024 * 1024 * 1024,
            max_storage_buffers_per_shader_stage: 12,
            ..wgpu::Limits::default()
        };
        let max_buffer_size = required_limits.max_buffer_size;

        let (device, queue) = selected
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("undertow particle device"),
                    required_features,
                    required_limits,
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|e| UndertowError::DeviceCreation(e.to_string()))?;

        Ok(Self {
            accelerator: Some(Accelerator {
                adapter_name: adapter_info.name,
                has_f64: required_features.contains(wgpu::Features::SHADER_F64),
                max_buffer_size,
                device,
                queue,
            }),
            row_granularity: DEFAULT_ROW_GRANULARITY,
        })
    }

    /// Accelerator context if one can be created, host-only otherwise.
    pub async fn autodetect() -> Self {
        match Self::with_accelerator().await {
            Ok(ctx) => ctx,
            Err(_) => Self::host_only(),
        }
    }

    /// Blocking wrapper around [`Self::with_accelerator`] for synchronous
    /// callers (drives the async device request on a fresh tokio runtime).
    ///
    /// # Errors
    ///
    /// As [`Self::with_accelerator`], plus [`UndertowError::DeviceCreation`]
    /// if the runtime itself cannot be built.
    pub fn with_accelerator_blocking() -> Result<Self, UndertowError> {
        let rt = tokio::runtime::Runtime::new()
            .map_err(|e| UndertowError::DeviceCreation(format!("tokio runtime: {e}")))?;
        rt.block_on(Self::with_accelerator())
    }

    /// Whether this context has an accelerator.
    #[must_use]
    pub fn has_accelerator(&self) -> bool {
        self.accelerator.is_some()
    }

    /// Row-alignment granularity in elements for pitched 2-D buffers.
    #[must_use]
    pub fn row_granularity(&self) -> usize {
        self.row_granularity
    }

    /// The accelerator, if present.
    #[must_use]
    pub fn accelerator(&self) -> Option<&Accelerator> {
        self.accelerator.as_ref()
    }

    /// The accelerator, or [`UndertowError::NoAccelerator`] on a host-only
    /// context.
    pub(crate) fn require_accelerator(&self) -> Result<&Accelerator, UndertowError> {
        self.accelerator.as_ref().ok_or(UndertowError::NoAccelerator)
    }

    /// Enumerate all available GPU adapters.
    #[must_use]
    pub fn enumerate_adapters() -> Vec<AdapterInfo> {
        adapter::enumerate_adapters()
    }

    /// Print all available adapters to stdout.
    pub fn print_available_adapters() {
        let adapters = Self::enumerate_adapters();
        println!("  Available GPU adapters:");
        for info in &adapters {
            let marker = if info.has_f64 { "✓" } else { "✗" };
            println!("    {marker} {info}");
        }
        if adapters.is_empty() {
            println!("    (none found)");
        }
    }
}
