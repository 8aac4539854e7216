// SPDX-License-Identifier: AGPL-3.0-only

//! GPU adapter discovery and selection.
//!
//! Runtime capability probing — no hardcoded GPU assumptions. The adapter
//! is selected by environment variable or auto-detected, preferring discrete
//! GPUs with `SHADER_F64` support (the engine's force kernels are f64-first).

use crate::error::UndertowError;

/// Summary of a discovered GPU adapter.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    /// Enumeration index (stable within a single run).
    pub index: usize,
    /// Adapter name as reported by the driver.
    pub name: String,
    /// Driver name (e.g. `"NVIDIA"`, `"NVK"`, `"radv"`).
    pub driver: String,
    /// Whether `SHADER_F64` is supported.
    pub has_f64: bool,
    /// Adapter device type (discrete, integrated, software, etc.).
    pub device_type: wgpu::DeviceType,
}

impl std::fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let f64_tag = if self.has_f64 { "f64" } else { "f32" };
        let kind = match self.device_type {
            wgpu::DeviceType::DiscreteGpu => "discrete",
            wgpu::DeviceType::IntegratedGpu => "integrated",
            wgpu::DeviceType::VirtualGpu => "virtual",
            wgpu::DeviceType::Cpu => "cpu",
            wgpu::DeviceType::Other => "other",
        };
        write!(
            f,
            "[{}] {} ({}, {}, {})",
            self.index, self.name, self.driver, kind, f64_tag
        )
    }
}

/// Create a wgpu instance with the backend configured via `UNDERTOW_WGPU_BACKEND`.
pub fn create_instance() -> wgpu::Instance {
    let backends = match std::env::var("UNDERTOW_WGPU_BACKEND").as_deref() {
        Ok("vulkan") => wgpu::Backends::VULKAN,
        Ok("metal") => wgpu::Backends::METAL,
        Ok("dx12") => wgpu::Backends::DX12,
        _ => wgpu::Backends::all(),
    };
    wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends,
        ..Default::default()
    })
}

/// Enumerate all available GPU adapters.
///
/// Returns a summary for each adapter including name, driver, and
/// `SHADER_F64` support. Use the `index` field with
/// `UNDERTOW_GPU_ADAPTER=<index>` to target a specific GPU.
#[must_use]
pub fn enumerate_adapters() -> Vec<AdapterInfo> {
    let instance = create_instance();
    instance
        .enumerate_adapters(wgpu::Backends::all())
        .into_iter()
        .enumerate()
        .map(|(i, adapter)| {
            let info = adapter.get_info();
            let features = adapter.features();
            AdapterInfo {
                index: i,
                name: info.name.clone(),
                driver: info.driver.clone(),
                has_f64: features.contains(wgpu::Features::SHADER_F64),
                device_type: info.device_type,
            }
        })
        .collect()
}

/// Select an adapter based on the `UNDERTOW_GPU_ADAPTER` environment variable.
/// Falls back to auto-detection (discrete + `SHADER_F64` first, then any
/// adapter).
///
/// # Errors
///
/// Returns [`UndertowError::NoAdapter`] if no adapter exists, or
/// [`UndertowError::DeviceCreation`] if the selector matches nothing.
pub fn select_adapter() -> Result<wgpu::Adapter, UndertowError> {
    let selector = std::env::var("UNDERTOW_GPU_ADAPTER")
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    let instance = create_instance();
    let adapters: Vec<wgpu::Adapter> = instance.enumerate_adapters(wgpu::Backends::all());
    if adapters.is_empty() {
        return Err(UndertowError::NoAdapter);
    }

    if selector.is_empty() || selector == "auto" {
        auto_select(adapters)
    } else if let Ok(idx) = selector.parse::<usize>() {
        select_by_index_or_name(adapters, idx, &selector)
    } else {
        select_by_name(adapters, &selector)
    }
}

/// Prefer discrete adapters with `SHADER_F64`, then any f64-capable adapter,
/// then any adapter at all — a buffer-only workload runs fine without f64.
fn auto_select(adapters: Vec<wgpu::Adapter>) -> Result<wgpu::Adapter, UndertowError> {
    let mut discrete_f64: Option<wgpu::Adapter> = None;
    let mut any_f64: Option<wgpu::Adapter> = None;
    let mut any: Option<wgpu::Adapter> = None;
    for a in adapters {
        let f64_capable = a.features().contains(wgpu::Features::SHADER_F64);
        if f64_capable && a.get_info().device_type == wgpu::DeviceType::DiscreteGpu {
            if discrete_f64.is_none() {
                discrete_f64 = Some(a);
                continue;
            }
        } else if f64_capable && any_f64.is_none() {
            any_f64 = Some(a);
            continue;
        }
        if any.is_none() {
            any = Some(a);
        }
    }
    discrete_f64
        .or(any_f64)
        .or(any)
        .ok_or(UndertowError::NoAdapter)
}

fn select_by_index_or_name(
    adapters: Vec<wgpu::Adapter>,
    idx: usize,
    selector: &str,
) -> Result<wgpu::Adapter, UndertowError> {
    if idx < adapters.len() {
        adapters
            .into_iter()
            .nth(idx)
            .ok_or(UndertowError::NoAdapter)
    } else {
        adapters
            .into_iter()
            .find(|a| a.get_info().name.to_ascii_lowercase().contains(selector))
            .ok_or_else(|| {
                UndertowError::DeviceCreation(format!(
                    "No adapter matching '{selector}' (tried as index {idx} and name)"
                ))
            })
    }
}

fn select_by_name(
    adapters: Vec<wgpu::Adapter>,
    selector: &str,
) -> Result<wgpu::Adapter, UndertowError> {
    adapters
        .into_iter()
        .find(|a| a.get_info().name.to_ascii_lowercase().contains(selector))
        .ok_or_else(|| UndertowError::DeviceCreation(format!("No adapter matching '{selector}'")))
}
