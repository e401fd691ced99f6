// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::collections::BTreeSet;

#[test]
fn export_args_order_and_flags() {
    let image = Path::new("/var/backing/pvc-x.qcow2");
    let socket = Path::new("/tmp/nbd.sock");

    let direct = export_args(image, socket, true, true);
    assert_eq!(
        direct,
        vec![
            "--format=qcow2",
            "--persistent",
            "--socket=/tmp/nbd.sock",
            "--cache=none",
            "--aio=native",
            "/var/backing/pvc-x.qcow2",
        ]
    );

    let buffered_readonly = export_args(image, socket, false, false);
    assert_eq!(
        buffered_readonly,
        vec![
            "--format=qcow2",
            "--persistent",
            "--socket=/tmp/nbd.sock",
            "--read-only",
            "/var/backing/pvc-x.qcow2",
        ]
    );
}

#[test]
fn nbd_names_are_matched_exactly() {
    assert!(is_nbd_name("nbd0"));
    assert!(is_nbd_name("nbd15"));
    assert!(!is_nbd_name("nbd"));
    assert!(!is_nbd_name("nbd0p1"));
    assert!(!is_nbd_name("loop0"));
    assert!(!is_nbd_name("sda"));
}

#[test]
fn candidate_devices_cover_all_nbd_nodes() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["nbd0", "nbd1", "nbd12", "loop0", "sda", "nbd0p1"] {
        std::fs::write(dir.path().join(name), b"").unwrap();
    }

    let devices: BTreeSet<PathBuf> = candidate_devices(dir.path()).into_iter().collect();
    let expected: BTreeSet<PathBuf> =
        ["nbd0", "nbd1", "nbd12"].iter().map(|n| dir.path().join(n)).collect();
    assert_eq!(devices, expected);

    assert_eq!(device_count(&dir.path().to_string_lossy()), 3);
    assert_eq!(device_count("/nonexistent-dir"), 0);
}

#[test]
fn device_size_comes_from_the_sysfs_sector_count() {
    let sys = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(sys.path().join("nbd3")).unwrap();
    std::fs::write(sys.path().join("nbd3/size"), "262144\n").unwrap();

    let size = device_size_bytes(sys.path(), Path::new("/dev/nbd3")).unwrap();
    assert_eq!(size, 134_217_728);

    assert!(device_size_bytes(sys.path(), Path::new("/dev/nbd9")).is_err());

    std::fs::write(sys.path().join("nbd3/size"), "not-a-number\n").unwrap();
    assert!(device_size_bytes(sys.path(), Path::new("/dev/nbd3")).is_err());
}
