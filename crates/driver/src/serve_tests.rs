// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn endpoint_prefix_is_stripped() {
    assert_eq!(socket_path("unix:///csi/csi.sock"), Path::new("/csi/csi.sock"));
    assert_eq!(socket_path("/csi/csi.sock"), Path::new("/csi/csi.sock"));
}
