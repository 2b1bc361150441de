// SPDX-License-Identifier: GPL-3.0-only

mod common;

use media_sys::{
    DryRun, Executor, InstallSession, SysError, check_passphrase_strength, map_encrypted,
};
use media_types::{BlockDevice, DeviceType};

use common::ScriptedRunner;

const PASSPHRASE: &str = "correct horse battery";

fn encrypted_root() -> BlockDevice {
    BlockDevice {
        name: "sda3".to_string(),
        fs_type: "ext4".to_string(),
        mount_point: "/".to_string(),
        label: "root".to_string(),
        device_type: DeviceType::Crypt,
        ..Default::default()
    }
}

#[test]
fn passphrase_only_travels_over_stdin() {
    let runner = ScriptedRunner::new().on("dmsetup ls", "No devices found\n");
    let mut sink = Executor::new(&runner);
    let mut session = InstallSession::new();
    let mut bd = encrypted_root();

    map_encrypted(&mut sink, &mut session, &mut bd, PASSPHRASE).unwrap();

    assert_eq!(
        runner.calls_to("cryptsetup"),
        vec![
            "cryptsetup --batch-mode --hash=sha256 --cipher=aes-xts-plain64 --key-size=512 \
             --label=root luksFormat /dev/sda3 -",
            "cryptsetup --batch-mode luksOpen /dev/sda3 root -",
        ]
    );
    assert_eq!(
        runner.inputs_to("cryptsetup"),
        vec![Some(PASSPHRASE.to_string()), Some(PASSPHRASE.to_string())]
    );
    assert!(runner.calls().iter().all(|c| !c.contains(PASSPHRASE)));

    assert_eq!(bd.mapped_name, "mapper/root");
    assert_eq!(bd.mapped_device_file(), "/dev/mapper/root");
    assert_eq!(session.mappings(), ["root"]);
}

#[test]
fn taken_mapper_names_get_a_suffix() {
    let runner = ScriptedRunner::new().on("dmsetup ls", "home\t(253:0)\nhome1\t(253:1)\n");
    let mut sink = Executor::new(&runner);
    let mut session = InstallSession::new();
    let mut bd = BlockDevice {
        name: "sdb1".to_string(),
        mount_point: "/home".to_string(),
        device_type: DeviceType::Crypt,
        ..Default::default()
    };

    map_encrypted(&mut sink, &mut session, &mut bd, PASSPHRASE).unwrap();

    assert_eq!(bd.mapped_name, "mapper/home2");
    assert_eq!(
        runner.calls_to("cryptsetup --batch-mode luksOpen"),
        vec!["cryptsetup --batch-mode luksOpen /dev/sdb1 home2 -"]
    );
}

#[test]
fn mapper_names_run_out() {
    let taken = "root\t(253:0)\nroot1\t(253:1)\nroot2\t(253:2)\nroot3\t(253:3)\nroot4\t(253:4)\n";
    let runner = ScriptedRunner::new().on("dmsetup ls", taken);
    let mut sink = Executor::new(&runner);
    let mut session = InstallSession::new();

    let err = map_encrypted(&mut sink, &mut session, &mut encrypted_root(), PASSPHRASE)
        .unwrap_err();
    assert!(matches!(err, SysError::OperationFailed(_)), "{err}");
    assert!(runner.calls_to("cryptsetup --batch-mode luksOpen").is_empty());
    assert!(session.mappings().is_empty());
}

#[test]
fn plain_partitions_are_not_encrypted() {
    let runner = ScriptedRunner::new();
    let mut sink = Executor::new(&runner);
    let mut session = InstallSession::new();
    let mut bd = encrypted_root();
    bd.device_type = DeviceType::Part;

    let err = map_encrypted(&mut sink, &mut session, &mut bd, PASSPHRASE).unwrap_err();
    assert!(matches!(err, SysError::Precondition(_)));
    assert!(runner.calls().is_empty());
}

#[test]
fn dry_run_names_the_mapping_without_opening_it() {
    let runner = ScriptedRunner::new();
    let mut sink = DryRun::new(&runner);
    let mut session = InstallSession::new();
    let mut bd = encrypted_root();

    map_encrypted(&mut sink, &mut session, &mut bd, PASSPHRASE).unwrap();

    assert_eq!(bd.mapped_name, "mapper/root");
    assert!(session.mappings().is_empty());
    assert_eq!(runner.calls(), vec!["dmsetup ls"]);
}

#[test]
fn session_closes_mappings_in_reverse_and_reports_failures() {
    let runner = ScriptedRunner::new().fail(
        "cryptsetup --batch-mode luksClose home",
        "Device home is still in use.",
    );
    let mut session = InstallSession::new();
    session.record_mapping("root");
    session.record_mapping("home");

    let err = session.umount_all(&runner).unwrap_err();

    assert_eq!(err.to_string(), "Operation failed: Failed to unmount: [e-home]");
    assert_eq!(
        runner.calls(),
        vec![
            "cryptsetup --batch-mode luksClose home",
            "cryptsetup --batch-mode luksClose root",
        ]
    );
    assert!(session.mappings().is_empty());
}

#[test]
fn weak_passphrases_are_explained() {
    let weak = ScriptedRunner::new().on(
        "/usr/bin/cracklib-check",
        "password123: it is based on a dictionary word\n",
    );
    assert_eq!(
        check_passphrase_strength(&weak, "password123"),
        Err("Passphrase is based on a dictionary word".to_string())
    );

    let strong = ScriptedRunner::new().on("/usr/bin/cracklib-check", "x7#Lq!9vz: OK\n");
    assert_eq!(check_passphrase_strength(&strong, "x7#Lq!9vz"), Ok(()));
    assert_eq!(
        strong.inputs_to("/usr/bin/cracklib-check"),
        vec![Some("x7#Lq!9vz\n".to_string())]
    );

    let missing = ScriptedRunner::new().fail("/usr/bin/cracklib-check", "not found");
    assert_eq!(check_passphrase_strength(&missing, "anything at all"), Ok(()));
}
