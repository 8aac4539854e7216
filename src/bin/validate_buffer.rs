// SPDX-License-Identifier: AGPL-3.0-only

//! Dual-Residency Buffer Validation
//!
//! Replays the canonical host ↔ device scenario ladder against a real
//! accelerator with an actual compute kernel in the loop:
//!   - host pattern write, device increment, host verify (full round trip)
//!   - Overwrite at the device: stale host copy must NOT be uploaded
//!   - Read at the device: rogue kernel writes must NOT come back
//!
//! Each check prints PASS/FAIL; exits nonzero on any failure. Run with
//! `UNDERTOW_GPU_ADAPTER` / `UNDERTOW_WGPU_BACKEND` to target a specific GPU.

use std::sync::Arc;
use undertow::{Buffer, DeviceGuard, ExecutionContext, Residency};

/// Increment every element of an i32 storage buffer by one.
const ADD_ONE_WGSL: &str = r"
@group(0) @binding(0) var<storage, read_write> data: array<i32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i < arrayLength(&data)) {
        data[i] = data[i] + 1;
    }
}
";

struct Harness {
    passed: u32,
    failed: u32,
}

impl Harness {
    fn check(&mut self, name: &str, ok: bool) {
        if ok {
            self.passed += 1;
            println!("  PASS  {name}");
        } else {
            self.failed += 1;
            println!("  FAIL  {name}");
        }
    }
}

fn build_add_one_pipeline(ctx: &ExecutionContext) -> Option<wgpu::ComputePipeline> {
    let acc = ctx.accelerator()?;
    let module = acc
        .device()
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("add_one"),
            source: wgpu::ShaderSource::Wgsl(ADD_ONE_WGSL.into()),
        });
    Some(
        acc.device()
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("add_one"),
                layout: None,
                module: &module,
                entry_point: "main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            }),
    )
}

/// Dispatch the increment kernel over the acquired device buffer.
fn dispatch_add_one(
    ctx: &ExecutionContext,
    pipeline: &wgpu::ComputePipeline,
    guard: &DeviceGuard<'_, i32>,
) {
    let Some(acc) = ctx.accelerator() else { return };
    let layout = pipeline.get_bind_group_layout(0);
    let bind_group = acc.device().create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("add_one"),
        layout: &layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: guard.binding(),
        }],
    });
    let mut encoder = acc
        .device()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("add_one"),
        });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("add_one"),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(guard.len().div_ceil(64) as u32, 1, 1);
    }
    acc.queue().submit(std::iter::once(encoder.finish()));
}

fn run(ctx: &Arc<ExecutionContext>) -> Result<Harness, undertow::UndertowError> {
    let mut h = Harness {
        passed: 0,
        failed: 0,
    };
    let Some(pipeline) = build_add_one_pipeline(ctx) else {
        return Err(undertow::UndertowError::NoAccelerator);
    };

    let n = 100;
    let buf: Buffer<i32> = Buffer::new(n, Arc::clone(ctx))?;
    h.check("construction: len == 100", buf.len() == n);
    h.check(
        "construction: device untouched",
        buf.residency() == Residency::Unallocated,
    );

    // Host pattern write, device increment, host verify.
    {
        let mut view = buf.host_mut()?;
        for (i, v) in view.iter_mut().enumerate() {
            *v = i as i32;
        }
    }
    {
        let guard = buf.device_mut()?;
        dispatch_add_one(ctx, &pipeline, &guard);
    }
    {
        let view = buf.host_read()?;
        h.check(
            "round trip: host sees kernel increments",
            view.iter().enumerate().all(|(i, &v)| v == i as i32 + 1),
        );
    }
    h.check(
        "round trip: both copies agree after read",
        buf.residency() == Residency::Synced,
    );

    // Diverge on the host, then Overwrite at the device. The kernel
    // increments whatever the device holds; if the host copy had been
    // uploaded the result would be 100+i+1 instead of i+2.
    {
        let mut view = buf.host_mut()?;
        for (i, v) in view.iter_mut().enumerate() {
            *v = 100 + i as i32;
        }
    }
    {
        let guard = buf.device_overwrite()?;
        dispatch_add_one(ctx, &pipeline, &guard);
    }
    {
        let view = buf.host_read()?;
        h.check(
            "overwrite: stale host copy never uploaded",
            view.iter().enumerate().all(|(i, &v)| v == i as i32 + 2),
        );
    }

    // Read acquire at the device with a rogue kernel write: the host copy
    // stays authoritative, so the increment must never come back.
    {
        let mut view = buf.host_mut()?;
        for (i, v) in view.iter_mut().enumerate() {
            *v = 200 + i as i32;
        }
    }
    {
        let guard = buf.device_read()?;
        dispatch_add_one(ctx, &pipeline, &guard);
    }
    {
        let view = buf.host_read()?;
        h.check(
            "read mode: rogue device write not copied back",
            view.iter().enumerate().all(|(i, &v)| v == 200 + i as i32),
        );
    }

    // Second accessor while one is held.
    {
        let _held = buf.host_read()?;
        h.check("exclusion: second acquire fails fast", buf.host_mut().is_err());
    }

    Ok(h)
}

fn main() {
    println!("═══ undertow dual-residency buffer validation ═══");
    ExecutionContext::print_available_adapters();

    let ctx = match ExecutionContext::with_accelerator_blocking() {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            eprintln!("  no usable accelerator: {e}");
            std::process::exit(1);
        }
    };
    if let Some(acc) = ctx.accelerator() {
        println!("  GPU: {}", acc.adapter_name());
        println!("  SHADER_F64: {}", if acc.has_f64() { "YES" } else { "NO" });
    }

    match run(&ctx) {
        Ok(h) => {
            println!("  ── {} passed, {} failed ──", h.passed, h.failed);
            if h.failed > 0 {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("  validation aborted: {e}");
            std::process::exit(1);
        }
    }
}
