// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proptest strategies shared with other crates' tests.

use crate::backing::BackingRef;
use crate::id::{NodeName, VolumeId};
use crate::state::ExclusiveOp;
use crate::volume::VolumeRecord;
use proptest::prelude::*;

/// One attempted transition against a volume record.
#[derive(Debug, Clone)]
pub enum Action {
    Begin(ExclusiveOp),
    Finish(ExclusiveOp),
    Stage(NodeName),
    Unstage(NodeName),
    MarkDeleting,
}

pub fn op_strategy() -> impl Strategy<Value = ExclusiveOp> {
    prop_oneof![
        Just(ExclusiveOp::Expand),
        Just(ExclusiveOp::Clone),
        Just(ExclusiveOp::Snapshot),
    ]
}

/// Node names drawn from a small pool so staging multiplicity gets exercised.
pub fn node_strategy() -> impl Strategy<Value = NodeName> {
    (0u8..4).prop_map(|i| NodeName::new(format!("node-{i}")))
}

pub fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        4 => op_strategy().prop_map(Action::Begin),
        4 => op_strategy().prop_map(Action::Finish),
        4 => node_strategy().prop_map(Action::Stage),
        4 => node_strategy().prop_map(Action::Unstage),
        1 => Just(Action::MarkDeleting),
    ]
}

pub fn fresh_record() -> VolumeRecord {
    VolumeRecord::new(
        VolumeId::new("11111111-2222-3333-4444-555555555555"),
        128 << 20,
        BackingRef::new("backing", "storage"),
    )
}
