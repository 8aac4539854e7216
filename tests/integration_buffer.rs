// SPDX-License-Identifier: AGPL-3.0-only

//! Integration tests: host-side buffer contract end-to-end.
//!
//! Exercises the public API the way numerical components use it — construct
//! against a context, acquire, touch elements, release — without requiring
//! an accelerator to be present.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use undertow::{Buffer, ExecutionContext, Residency, UndertowError};

fn ctx() -> Arc<ExecutionContext> {
    Arc::new(ExecutionContext::host_only())
}

#[test]
fn pattern_round_trip_100_elements() {
    let buf: Buffer<i32> = Buffer::new(100, ctx()).expect("allocate");
    assert_eq!(buf.len(), 100);

    {
        let mut view = buf.host_mut().expect("acquire readwrite");
        for i in 0..buf.len() {
            view[i] = i as i32;
        }
    }

    let view = buf.host_read().expect("acquire read");
    for i in 0..buf.len() {
        assert_eq!(view[i], i as i32);
    }
}

#[test]
fn pitched_2d_construction() {
    let ctx = Arc::new(ExecutionContext::host_only_with_granularity(64));
    let buf: Buffer<i32> = Buffer::new_2d(63, 120, ctx).expect("allocate");
    assert_eq!(buf.pitch(), 64);
    assert_eq!(buf.height(), 120);
    assert_eq!(buf.len(), 7680);
}

#[test]
fn second_accessor_is_a_contract_violation() {
    let buf: Buffer<i32> = Buffer::new(16, ctx()).expect("allocate");
    let held = buf.host_mut().expect("first acquire");
    assert!(matches!(
        buf.host_read(),
        Err(UndertowError::ConcurrentAccess)
    ));
    drop(held);
    // Released: acquisition works again.
    assert!(buf.host_read().is_ok());
}

#[test]
fn length_and_emptiness_for_all_small_sizes() {
    let ctx = ctx();
    for n in 0..16 {
        let buf: Buffer<f64> = Buffer::new(n, Arc::clone(&ctx)).expect("allocate");
        assert_eq!(buf.len(), n);
        assert_eq!(buf.is_empty(), n == 0);
    }
}

#[test]
fn empty_buffer_copy_assign_swap_ladder() {
    let ctx = ctx();
    let a: Buffer<i32> = Buffer::new(0, Arc::clone(&ctx)).expect("empty");
    assert!(a.is_empty());

    // Copy construction of an empty buffer.
    let b = a.clone();
    assert!(b.is_empty());
    assert_eq!(b.len(), 0);

    // Assignment of an empty buffer over a populated one.
    let mut c: Buffer<i32> = Buffer::new(1000, Arc::clone(&ctx)).expect("allocate");
    c.clone_from(&a);
    assert!(c.is_empty());

    // Swap with an empty buffer exchanges identity both ways.
    let mut d: Buffer<i32> = Buffer::new(1000, Arc::clone(&ctx)).expect("allocate");
    let mut a = a;
    d.swap(&mut a);
    assert!(d.is_empty());
    assert!(!a.is_empty());
    assert_eq!(a.len(), 1000);
}

#[test]
fn deep_copy_independence_both_directions() {
    let b1: Buffer<f64> = Buffer::new(32, ctx()).expect("allocate");
    {
        let mut view = b1.host_mut().expect("acquire");
        for (i, v) in view.iter_mut().enumerate() {
            *v = i as f64 * 0.5;
        }
    }
    let b2 = b1.clone();

    {
        let mut view = b2.host_mut().expect("acquire copy");
        view[3] = -1.0;
    }
    assert_eq!(b1.host_read().expect("read original")[3], 1.5);

    {
        let mut view = b1.host_mut().expect("acquire original");
        view[4] = 100.0;
    }
    assert_eq!(b2.host_read().expect("read copy")[4], 2.0);
}

#[test]
fn accelerator_acquire_without_accelerator_is_fatal_config_error() {
    let buf: Buffer<f32> = Buffer::new(64, ctx()).expect("allocate");
    for result in [
        buf.device_read().err(),
        buf.device_mut().err(),
        buf.device_overwrite().err(),
    ] {
        assert!(matches!(result, Some(UndertowError::NoAccelerator)));
    }
    // Residency untouched by the refused acquires.
    assert_eq!(buf.residency(), Residency::Unallocated);
}

#[test]
fn residency_stays_host_side_without_accelerator() {
    let buf: Buffer<i32> = Buffer::new(8, ctx()).expect("allocate");
    assert_eq!(buf.residency(), Residency::Unallocated);
    drop(buf.host_mut().expect("readwrite"));
    assert_eq!(buf.residency(), Residency::HostOnly);
    drop(buf.host_read().expect("read"));
    assert_eq!(buf.residency(), Residency::HostOnly);
    drop(buf.host_overwrite().expect("overwrite"));
    assert_eq!(buf.residency(), Residency::HostOnly);
}
