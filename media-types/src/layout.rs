// SPDX-License-Identifier: GPL-3.0-only

//! User-authored layout documents
//!
//! ```toml
//! [aliases]
//! target = "nvme0n1"
//!
//! [[devices]]
//! name = "${target}"
//! type = "disk"
//!
//! [[devices.children]]
//! name = "${target}1"
//! fstype = "vfat"
//! mountpoint = "/boot"
//! size = "150MB"
//! ```
//!
//! A child of a disk is a partition to create. On a partial install a child
//! whose name matches a partition already on the disk is reused instead, and
//! is only reformatted with `format = true`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::device::{BlockDevice, DeviceState, DeviceType};
use crate::error::{ModelError, Result};
use crate::size::parse_volume_size;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutDocument {
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub aliases: HashMap<String, String>,
    pub devices: Vec<LayoutDevice>,
}

/// Size as a byte count or a size string (`"20G"`, `"150MiB"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizeValue {
    Bytes(u64),
    Text(String),
}

impl Default for SizeValue {
    fn default() -> Self {
        Self::Bytes(0)
    }
}

impl SizeValue {
    pub fn bytes(&self) -> Result<u64> {
        match self {
            Self::Bytes(b) => Ok(*b),
            Self::Text(s) if s.trim().is_empty() => Ok(0),
            Self::Text(s) => parse_volume_size(s),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutDevice {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub maj_min: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fstype: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub serial: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mountpoint: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub partlabel: String,
    pub size: SizeValue,
    pub ro: bool,
    pub rm: bool,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub state: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub options: String,
    /// Put a new filesystem on the partition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<LayoutDevice>,
}

impl LayoutDevice {
    fn into_block_device(self) -> Result<BlockDevice> {
        let context = |e: ModelError| ModelError::Layout(format!("device {:?}: {e}", self.name));

        let device_type = if self.device_type.is_empty() {
            DeviceType::Disk
        } else {
            DeviceType::parse(&self.device_type).map_err(context)?
        };
        let state = DeviceState::parse(&self.state).map_err(context)?;
        let size = self.size.bytes().map_err(context)?;
        let planned = device_type != DeviceType::Disk;

        let mut bd = BlockDevice {
            name: self.name,
            model: self.model,
            maj_min: self.maj_min,
            fs_type: self.fstype,
            uuid: self.uuid,
            serial: self.serial,
            mount_point: self.mountpoint,
            label: self.label,
            part_label: self.partlabel,
            size,
            device_type,
            state,
            read_only: self.ro,
            removable: self.rm,
            options: self.options,
            user_defined: true,
            make_partition: planned,
            format_partition: planned && self.format.unwrap_or(false),
            ..Default::default()
        };

        for child in self.children {
            bd.children.push(child.into_block_device()?);
        }

        Ok(bd)
    }

    fn from_block_device(bd: &BlockDevice) -> Self {
        Self {
            name: bd.name.clone(),
            model: bd.model.clone(),
            maj_min: bd.maj_min.clone(),
            fstype: bd.fs_type.clone(),
            uuid: bd.uuid.clone(),
            serial: bd.serial.clone(),
            mountpoint: bd.mount_point.clone(),
            label: bd.label.clone(),
            partlabel: bd.part_label.clone(),
            size: SizeValue::Bytes(bd.size),
            ro: bd.read_only,
            rm: bd.removable,
            device_type: bd.device_type.as_str().to_string(),
            state: bd.state.as_str().to_string(),
            options: bd.options.clone(),
            format: bd.format_partition.then_some(true),
            children: bd.children.iter().map(Self::from_block_device).collect(),
        }
    }
}

/// Parse a layout document into device trees, expanding `${alias}` names.
pub fn parse_layout(data: &str) -> Result<Vec<BlockDevice>> {
    let doc: LayoutDocument =
        toml::from_str(data).map_err(|e| ModelError::Layout(e.to_string()))?;

    let mut devices = Vec::with_capacity(doc.devices.len());
    for device in doc.devices {
        let mut bd = device.into_block_device()?;
        if !doc.aliases.is_empty() {
            bd.expand_name(&doc.aliases);
        }
        devices.push(bd);
    }

    Ok(devices)
}

/// Serialize device trees back into a layout document.
pub fn to_layout_string(devices: &[BlockDevice]) -> Result<String> {
    let doc = LayoutDocument {
        aliases: HashMap::new(),
        devices: devices.iter().map(LayoutDevice::from_block_device).collect(),
    };
    toml::to_string_pretty(&doc).map_err(|e| ModelError::Layout(e.to_string()))
}
