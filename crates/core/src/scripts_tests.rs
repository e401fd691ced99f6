// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const SRC: &str = "/var/backing/pvc-src.qcow2";
const DST: &str = "/var/backing/pvc-dst.qcow2";
const ANCESTOR: &str = "/var/backing/cloned-src-to-dst.qcow2";
const SNAP: &str = "/var/backing/snapshot-s1.qcow2";

#[test]
fn create_blank_sizes_the_overlay() {
    assert_eq!(
        create_blank(DST, 134_217_728),
        "qemu-img create -f qcow2 -- '/var/backing/pvc-dst.qcow2' 134217728"
    );
}

#[test]
fn clone_runs_the_rebase_dance_in_order() {
    let script = clone_volume(SRC, ANCESTOR, DST, 1 << 30);
    let steps: Vec<&str> = script.split(" && ").collect();
    assert_eq!(steps.len(), 5);

    // Hard-link first, destination + replacement overlays next, atomic
    // rename over the live source, then seal the ancestor.
    assert_eq!(steps[0], "[ -e '/var/backing/cloned-src-to-dst.qcow2' ] || ln -- '/var/backing/pvc-src.qcow2' '/var/backing/cloned-src-to-dst.qcow2'");
    assert!(steps[1].contains("-b '/var/backing/cloned-src-to-dst.qcow2'"));
    assert!(steps[1].ends_with("'/var/backing/pvc-dst.qcow2' 1073741824"));
    assert!(steps[2].ends_with("'/var/backing/pvc-src.qcow2.new'"));
    assert_eq!(steps[3], "mv -f -- '/var/backing/pvc-src.qcow2.new' '/var/backing/pvc-src.qcow2'");
    assert_eq!(steps[4], "chmod a-w -- '/var/backing/cloned-src-to-dst.qcow2'");
}

#[test]
fn clone_is_reentrant() {
    // A retried job must not re-link the (now rebased) source over the
    // ancestor: the link step is guarded on ancestor existence.
    let script = clone_volume(SRC, ANCESTOR, DST, 1 << 30);
    assert!(script.starts_with("[ -e "));
}

#[test]
fn snapshot_reuses_the_dance_without_a_destination() {
    let script = snapshot_volume(SRC, SNAP);
    let steps: Vec<&str> = script.split(" && ").collect();
    assert_eq!(steps.len(), 4);
    assert!(steps[0].contains("ln -- '/var/backing/pvc-src.qcow2' '/var/backing/snapshot-s1.qcow2'"));
    assert_eq!(steps[3], "chmod a-w -- '/var/backing/snapshot-s1.qcow2'");
}

#[test]
fn from_snapshot_roots_the_overlay_at_the_ancestor() {
    assert_eq!(
        create_from_snapshot(SNAP, DST, 268_435_456),
        "qemu-img create -f qcow2 -b '/var/backing/snapshot-s1.qcow2' -F qcow2 -- '/var/backing/pvc-dst.qcow2' 268435456"
    );
}

#[test]
fn expand_guards_against_shrinking_retries() {
    let script = expand_volume(SRC, 268_435_456);
    assert!(script.contains("qemu-img info --output=json"));
    assert!(script.contains("if [ \"$cur\" -lt 268435456 ]"));
    assert!(script.contains("qemu-img resize -f qcow2 -- '/var/backing/pvc-src.qcow2' 268435456"));
}

#[test]
fn delete_leaves_ancestors_alone() {
    assert_eq!(delete_image(SRC), "rm -f -- '/var/backing/pvc-src.qcow2'");
}
