// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    idle = { VolumeState::Idle, None },
    expanding = { VolumeState::Expanding, Some("expanding") },
    cloning = { VolumeState::Cloning, Some("cloning") },
    snapshotting = { VolumeState::Snapshotting, Some("snapshotting") },
    staged = { VolumeState::Staged, Some("staged") },
)]
fn annotation_round_trip(state: VolumeState, wire: Option<&str>) {
    assert_eq!(state.annotation_value(), wire);
    let parsed: VolumeState = wire.unwrap_or("").parse().unwrap();
    assert_eq!(parsed, state);
}

#[test]
fn missing_annotation_is_idle() {
    assert_eq!("".parse::<VolumeState>().unwrap(), VolumeState::Idle);
    assert_eq!("idle".parse::<VolumeState>().unwrap(), VolumeState::Idle);
}

#[test]
fn unknown_state_rejected() {
    let err = "defragmenting".parse::<VolumeState>().unwrap_err();
    assert_eq!(err, StateError::Unknown("defragmenting".to_string()));
}

#[parameterized(
    expanding = { VolumeState::Expanding, "volume is being expanded" },
    cloning = { VolumeState::Cloning, "volume is being cloned" },
    snapshotting = { VolumeState::Snapshotting, "volume is being snapshotted" },
    staged = { VolumeState::Staged, "volume is being staged" },
)]
fn busy_error_names_current_state(current: VolumeState, msg: &str) {
    assert_eq!(StateError::Busy { current }.to_string(), msg);
}

#[test]
fn op_maps_to_state() {
    assert_eq!(ExclusiveOp::Expand.state(), VolumeState::Expanding);
    assert_eq!(ExclusiveOp::Clone.state(), VolumeState::Cloning);
    assert_eq!(ExclusiveOp::Snapshot.state(), VolumeState::Snapshotting);
}
