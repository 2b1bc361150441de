// SPDX-License-Identifier: GPL-3.0-only

mod common;

use media_sys::{available_media, list_partitions, scan_media};
use media_types::{BlockDevice, DeviceType};

use common::{LSBLK, ScriptedRunner};

const HOST: &str = r#"{"blockdevices": [
    {"name": "sda", "maj:min": "8:0", "model": "VBOX HARDDISK", "size": 4294967296,
     "type": "disk", "pttype": "gpt"},
    {"name": "sdb", "maj:min": "8:16", "model": "USB DISK", "size": "7.5G", "rm": "1",
     "type": "disk",
     "children": [
        {"name": "sdb1", "size": "7.5G", "type": "part", "fstype": "vfat",
         "mountpoint": "/run/media/usb"}
     ]}
]}"#;

const SDA_FREE: &str = "BYT;\n\
/dev/sda:4294967296B:scsi:512:512:gpt:ATA VBOX HARDDISK:;\n\
1:17408B:4294950911B:4294933504B:free;\n";

#[test]
fn scan_loads_tables_and_prefers_the_user_layout() {
    let runner = ScriptedRunner::new()
        .fail("partprobe", "Error: Could not stat device")
        .on(LSBLK, HOST)
        .on("parted --machine --script -- /dev/sda unit B print free", SDA_FREE);

    let mut planned = BlockDevice {
        name: "sda".to_string(),
        model: "VBOX HARDDISK".to_string(),
        maj_min: "8:0".to_string(),
        device_type: DeviceType::Disk,
        user_defined: true,
        ..Default::default()
    };
    planned.add_child(BlockDevice {
        name: "sda1".to_string(),
        fs_type: "ext4".to_string(),
        mount_point: "/".to_string(),
        device_type: DeviceType::Part,
        make_partition: true,
        ..Default::default()
    });

    let devices = scan_media(&runner, &[planned]).unwrap();

    assert_eq!(devices.len(), 2);
    let sda = &devices[0];
    assert!(sda.user_defined);
    assert_eq!(sda.children.len(), 1);
    assert_eq!(sda.part_table.rows().len(), 1);
    assert!(sda.part_table.rows()[0].is_free());

    assert_eq!(
        runner.calls()[..3],
        [
            "partprobe -s",
            "udevadm settle --timeout 10",
            "lsblk --exclude 1,2,11 -J -b -O",
        ]
    );
    assert_eq!(runner.calls_to("parted --machine").len(), 2);
}

#[test]
fn mounted_media_is_not_offered() {
    let runner = ScriptedRunner::new().on(LSBLK, HOST);
    let devices = scan_media(&runner, &[]).unwrap();

    let available = available_media(devices);
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].name, "sda");
}

#[test]
fn partitions_are_only_listed_for_disks() {
    let runner = ScriptedRunner::new();
    let part = BlockDevice {
        name: "sda1".to_string(),
        device_type: DeviceType::Part,
        ..Default::default()
    };
    assert!(list_partitions(&runner, &part).is_empty());
    assert!(runner.calls().is_empty());
}

#[test]
fn unreadable_table_lists_nothing() {
    let runner = ScriptedRunner::new().fail("parted", "Error: unrecognised disk label");
    let disk = BlockDevice {
        name: "sdc".to_string(),
        device_type: DeviceType::Disk,
        ..Default::default()
    };
    assert!(list_partitions(&runner, &disk).is_empty());
    assert_eq!(
        runner.calls(),
        vec!["parted --machine --script -- /dev/sdc unit B print"]
    );
}
