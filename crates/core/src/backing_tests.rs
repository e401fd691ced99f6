// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn image_path_is_under_mount() {
    let backing = BackingRef::new("shared", "storage");
    assert_eq!(backing.image_path("pvc-x.qcow2"), "/var/backing/pvc-x.qcow2");
}

#[test]
fn empty_base_path_normalizes_to_none() {
    let backing = BackingRef::new("shared", "storage").with_base_path("");
    assert_eq!(backing.base_path, None);

    let backing = BackingRef::new("shared", "storage").with_base_path("vols");
    assert_eq!(backing.base_path.as_deref(), Some("vols"));
}
