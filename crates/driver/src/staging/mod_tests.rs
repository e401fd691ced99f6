// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    writable_keeps_bits = { 0o660, true, 0o660 },
    readonly_clears_writes = { 0o660, false, 0o440 },
    type_bits_are_dropped = { 0o060660, true, 0o660 },
    world_writable = { 0o666, false, 0o444 },
)]
fn device_node_permissions(source: u32, writable: bool, expected: u32) {
    assert_eq!(permission_bits(source, writable), expected);
}

#[test]
fn stage_errors_render_usable_messages() {
    let err = StageError::EmptyDevice(PathBuf::from("/dev/nbd4"));
    assert_eq!(err.to_string(), "device /dev/nbd4 reports zero size");

    let err = StageError::NoFreeDevice;
    assert!(err.to_string().contains("/dev/nbd*"));
}
