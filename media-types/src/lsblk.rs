// SPDX-License-Identifier: GPL-3.0-only

//! lsblk JSON descriptor parsing
//!
//! Handles both util-linux encodings: `size` as a byte count or as a short
//! string (`"1.5G"`), and `ro`/`rm` as booleans or `"0"`/`"1"` strings.
//! `null` values fall back to the field default.

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use crate::device::{BlockDevice, DeviceState, DeviceType};
use crate::error::{ModelError, Result};
use crate::size::parse_volume_size;

/// Arguments for a full, byte-sized, JSON listing without RAM disks,
/// floppies and SCSI CD-ROMs (majors 1, 2 and 11).
pub const LSBLK_ARGS: [&str; 5] = ["--exclude", "1,2,11", "-J", "-b", "-O"];

#[derive(Debug, Default, Deserialize)]
struct Descriptor {
    #[serde(default)]
    blockdevices: Vec<Entry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Entry {
    #[serde(deserialize_with = "nullable_string")]
    name: String,
    #[serde(deserialize_with = "nullable_string")]
    model: String,
    #[serde(rename = "maj:min", deserialize_with = "nullable_string")]
    maj_min: String,
    #[serde(deserialize_with = "size_field")]
    size: u64,
    #[serde(deserialize_with = "nullable_string")]
    pttype: String,
    #[serde(deserialize_with = "nullable_string")]
    fstype: String,
    #[serde(deserialize_with = "nullable_string")]
    uuid: String,
    #[serde(deserialize_with = "nullable_string")]
    serial: String,
    #[serde(rename = "type", deserialize_with = "nullable_string")]
    device_type: String,
    #[serde(deserialize_with = "nullable_string")]
    state: String,
    #[serde(deserialize_with = "nullable_string")]
    mountpoint: String,
    #[serde(deserialize_with = "nullable_string")]
    label: String,
    #[serde(deserialize_with = "nullable_string")]
    partlabel: String,
    #[serde(deserialize_with = "flag_field")]
    ro: bool,
    #[serde(deserialize_with = "flag_field")]
    rm: bool,
    children: Option<Vec<Entry>>,
}

fn nullable_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn size_field<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| de::Error::custom(format!("size is not a byte count: {n}"))),
        Value::String(s) => parse_volume_size(&s).map_err(de::Error::custom),
        other => Err(de::Error::custom(format!("invalid size value: {other}"))),
    }
}

fn flag_field<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(b),
        Value::String(s) => match s.as_str() {
            "" | "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(de::Error::custom(format!("invalid flag value: {s:?}"))),
        },
        other => Err(de::Error::custom(format!("invalid flag value: {other}"))),
    }
}

impl Entry {
    fn into_block_device(self) -> Result<BlockDevice> {
        let mut bd = BlockDevice {
            device_type: DeviceType::parse(&self.device_type)?,
            state: DeviceState::parse(&self.state)?,
            name: self.name,
            model: self.model,
            maj_min: self.maj_min,
            size: self.size,
            pt_type: self.pttype,
            fs_type: self.fstype,
            uuid: self.uuid,
            serial: self.serial,
            mount_point: self.mountpoint,
            label: self.label,
            part_label: self.partlabel,
            read_only: self.ro,
            removable: self.rm,
            ..Default::default()
        };

        for child in self.children.unwrap_or_default() {
            bd.children.push(child.into_block_device()?);
        }

        Ok(bd)
    }
}

/// Parse the output of `lsblk -J -b -O` into device trees.
pub fn parse_block_devices_descriptor(data: &str) -> Result<Vec<BlockDevice>> {
    let descriptor: Descriptor =
        serde_json::from_str(data).map_err(|e| ModelError::Descriptor(e.to_string()))?;

    descriptor
        .blockdevices
        .into_iter()
        .map(Entry::into_block_device)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = r#"{
   "blockdevices": [
      {"name": "sda", "maj:min": "8:0", "rm": false, "size": 4294967296, "ro": false,
       "type": "disk", "mountpoint": null, "model": "VBOX HARDDISK", "pttype": "gpt",
       "fstype": null, "uuid": null, "serial": "VB1", "state": "running",
       "label": null, "partlabel": null,
       "children": [
          {"name": "sda1", "maj:min": "8:1", "rm": false, "size": 157286400, "ro": false,
           "type": "part", "mountpoint": "/boot", "fstype": "vfat", "uuid": "E1A5-1B2C",
           "label": "boot", "partlabel": "CLR_BOOT"},
          {"name": "sda2", "maj:min": "8:2", "rm": "0", "size": "1.5G", "ro": "1",
           "type": "part", "fstype": "LVM2_member",
           "children": [
              {"name": "vg0-root", "maj:min": "253:0", "size": 1073741824,
               "type": "lvm", "fstype": "ext4", "state": "live"}
           ]}
       ]},
      {"name": "nvme0n1", "maj:min": "259:0", "rm": "1", "size": "10g", "ro": "0",
       "type": "disk", "state": "live", "children": null}
   ]
}"#;

    fn with_value(value: &str) -> String {
        format!(r#"{{"blockdevices": [{{ {value} }}]}}"#)
    }

    #[test]
    fn parses_nested_descriptor() {
        let devices = parse_block_devices_descriptor(DESCRIPTOR).unwrap();
        assert_eq!(devices.len(), 2);

        let sda = &devices[0];
        assert_eq!(sda.name, "sda");
        assert_eq!(sda.maj_min, "8:0");
        assert_eq!(sda.model, "VBOX HARDDISK");
        assert_eq!(sda.device_type, DeviceType::Disk);
        assert_eq!(sda.state, DeviceState::Running);
        assert_eq!(sda.pt_type, "gpt");
        assert_eq!(sda.children.len(), 2);
        assert!(!sda.is_available());

        let boot = &sda.children[0];
        assert_eq!(boot.mount_point, "/boot");
        assert_eq!(boot.part_label, "CLR_BOOT");
        assert_eq!(boot.uuid, "E1A5-1B2C");

        let pv = &sda.children[1];
        assert_eq!(pv.size, 1_610_612_736);
        assert!(pv.read_only);
        assert!(!pv.removable);
        assert_eq!(pv.children[0].device_type, DeviceType::Lvm2Volume);
        assert_eq!(pv.children[0].state, DeviceState::Live);

        let nvme = &devices[1];
        assert!(nvme.removable);
        assert_eq!(nvme.size, 10 * (1 << 30));
        assert!(nvme.children.is_empty());
        assert!(nvme.is_available());
    }

    #[test]
    fn empty_descriptor_fails() {
        assert!(parse_block_devices_descriptor("").is_err());
        assert!(parse_block_devices_descriptor("{").is_err());
    }

    #[test]
    fn null_removable_is_false() {
        let devices = parse_block_devices_descriptor(&with_value(
            r#""name": "sda", "type": "disk", "rm": null, "ro": null, "size": null"#,
        ))
        .unwrap();
        assert!(!devices[0].removable);
        assert!(!devices[0].read_only);
        assert_eq!(devices[0].size, 0);
    }

    #[test]
    fn invalid_values_fail() {
        let cases = [
            r#""children": "invalid""#,
            r#""fstype": []"#,
            r#""maj:min": []"#,
            r#""mountpoint": []"#,
            r#""rm": "3""#,
            r#""rm": []"#,
            r#""ro": "3""#,
            r#""ro": []"#,
            r#""size": "str""#,
            r#""size": 1.1"#,
            r#""type": "invalid""#,
            r#""type": []"#,
            r#""state": "gone""#,
            r#""uuid": []"#,
        ];

        for value in cases {
            assert!(
                parse_block_devices_descriptor(&with_value(value)).is_err(),
                "{value} should fail to parse"
            );
        }
    }

    #[test]
    fn size_strings_use_binary_units() {
        let cases = [
            (r#""size": "1k""#, 1024),
            (r#""size": "1.3k""#, 1331),
            (r#""size": "1.5m""#, 1_572_864),
            (r#""size": "1g""#, 1_073_741_824),
            (r#""size": "1.5t""#, 1_649_267_441_664),
            (r#""size": 1000"#, 1000),
        ];

        for (value, expected) in cases {
            let devices =
                parse_block_devices_descriptor(&with_value(&format!(r#""type": "disk", {value}"#)))
                    .unwrap();
            assert_eq!(devices[0].size, expected, "{value}");
        }
    }
}
