// SPDX-License-Identifier: GPL-3.0-only

//! Block device tree
//!
//! A [`BlockDevice`] describes a disk, a partition, an encrypted mapping, a
//! RAID array or an LVM volume, with its children in scan order. Trees come
//! either from the host (lsblk) or from a user layout document; cloning is
//! always deep, table snapshot included.

use std::collections::HashMap;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::error::{ModelError, Result};
use crate::parted::PartitionTable;
use crate::size::{SizeUnits, human_size};

/// Partition label marker carried by installer media.
pub const INSTALLER_MEDIA_LABEL: &str = "CLR_ISO";

/// Smallest partition we ever create.
pub const MINIMUM_PARTITION_SIZE: u64 = 1_048_576;

/// Device kinds as reported by lsblk's `type` column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DeviceType {
    #[default]
    Disk,
    Part,
    Rom,
    Lvm2Group,
    Lvm2Volume,
    Raid0,
    Raid1,
    Raid4,
    Raid5,
    Raid6,
    Raid10,
    Crypt,
    Loop,
    Unknown,
}

impl DeviceType {
    pub const ALL: [DeviceType; 14] = [
        DeviceType::Disk,
        DeviceType::Part,
        DeviceType::Rom,
        DeviceType::Lvm2Group,
        DeviceType::Lvm2Volume,
        DeviceType::Raid0,
        DeviceType::Raid1,
        DeviceType::Raid4,
        DeviceType::Raid5,
        DeviceType::Raid6,
        DeviceType::Raid10,
        DeviceType::Crypt,
        DeviceType::Loop,
        DeviceType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disk => "disk",
            Self::Part => "part",
            Self::Rom => "rom",
            Self::Lvm2Group => "LVM2_member",
            Self::Lvm2Volume => "lvm",
            Self::Raid0 => "raid0",
            Self::Raid1 => "raid1",
            Self::Raid4 => "raid4",
            Self::Raid5 => "raid5",
            Self::Raid6 => "raid6",
            Self::Raid10 => "raid10",
            Self::Crypt => "crypt",
            Self::Loop => "loop",
            Self::Unknown => "",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ModelError::UnknownType(s.to_string()))
    }

    pub fn is_raid(&self) -> bool {
        matches!(
            self,
            Self::Raid0 | Self::Raid1 | Self::Raid4 | Self::Raid5 | Self::Raid6 | Self::Raid10
        )
    }

    /// Node kinds that own a partition table snapshot.
    pub fn has_partition_table(&self) -> bool {
        matches!(self, Self::Disk | Self::Loop) || self.is_raid()
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DeviceType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Device state as reported by lsblk's `state` column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DeviceState {
    #[default]
    Unknown,
    Running,
    Live,
    Connected,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::Running => "running",
            Self::Live => "live",
            Self::Connected => "Connected",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "" => Ok(Self::Unknown),
            "running" => Ok(Self::Running),
            "live" => Ok(Self::Live),
            "Connected" => Ok(Self::Connected),
            _ => Err(ModelError::UnknownState(s.to_string())),
        }
    }
}

impl Serialize for DeviceState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// How much of the standard layout a disk already carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfiguredStatus {
    None,
    Partial,
    Full,
}

/// A node of the block device tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BlockDevice {
    pub name: String,
    /// Device-mapper name (`mapper/<name>`) once opened or activated.
    pub mapped_name: String,
    pub model: String,
    pub maj_min: String,
    pub pt_type: String,
    pub fs_type: String,
    pub uuid: String,
    pub serial: String,
    pub mount_point: String,
    /// Filesystem label, set by mkfs.
    pub label: String,
    /// Partition (GPT name) label, carries advanced-mode keywords.
    pub part_label: String,
    pub size: u64,
    pub device_type: DeviceType,
    pub state: DeviceState,
    pub read_only: bool,
    pub removable: bool,
    pub children: Vec<BlockDevice>,
    pub user_defined: bool,
    pub make_partition: bool,
    pub format_partition: bool,
    pub labeled_advanced: bool,
    /// Extra mkfs options, whitespace separated.
    pub options: String,
    /// Number given by the partitioning tool, 0 until the partition exists.
    /// Read it through [`BlockDevice::partition_number`].
    #[serde(skip)]
    pub partition: u64,
    #[serde(skip)]
    pub part_table: PartitionTable,
}

impl BlockDevice {
    /// Device node path, e.g. `/dev/sda1`.
    pub fn device_file(&self) -> String {
        format!("/dev/{}", self.name)
    }

    /// Path of the mapped device if one is set, else the device node.
    pub fn mapped_device_file(&self) -> String {
        if self.mapped_name.is_empty() {
            self.device_file()
        } else {
            format!("/dev/{}", self.mapped_name)
        }
    }

    /// Stable identifier for fstab/crypttab: label, then UUID, then the device node.
    pub fn device_id(&self) -> String {
        if !self.label.is_empty() {
            format!("LABEL={}", self.label)
        } else if !self.uuid.is_empty() {
            format!("UUID={}", self.uuid)
        } else {
            self.device_file()
        }
    }

    /// Assigned partition number, else the trailing digits of the name, else 0.
    pub fn partition_number(&self) -> u64 {
        if self.partition > 0 {
            return self.partition;
        }

        let digits = self.name.len()
            - self
                .name
                .chars()
                .rev()
                .take_while(|c| c.is_ascii_digit())
                .count();
        self.name[digits..].parse().unwrap_or(0)
    }

    /// Record the number the partitioning tool gave this partition.
    pub fn set_partition_number(&mut self, partition: u64) {
        if self.partition > 0 && self.partition != partition {
            tracing::debug!(
                "{}: partition number {} replaced by {}",
                self.name,
                self.partition,
                partition
            );
        }
        self.partition = partition;
    }

    /// Whether a number was assigned to this node in memory.
    pub fn has_assigned_partition(&self) -> bool {
        self.partition > 0
    }

    /// Prefix of this device's partition names: `sda`, `nvme0n1p`, `loop0p`.
    pub fn base_partition_name(&self) -> String {
        if self.device_type == DeviceType::Loop
            || self.name.contains("nvme")
            || self.name.contains("mmcblk")
        {
            format!("{}p", self.name)
        } else {
            self.name.clone()
        }
    }

    /// Append `child`, naming it `<parent>[p]<n>` (or `<parent>[p]?` while
    /// unnumbered) when it has no name yet.
    pub fn add_child(&mut self, mut child: BlockDevice) -> &mut BlockDevice {
        if child.name.is_empty() {
            child.name = if child.partition < 1 {
                format!("{}?", self.base_partition_name())
            } else {
                format!("{}{}", self.base_partition_name(), child.partition)
            };
        }
        tracing::debug!("add_child: child name is {:?}", child.name);

        let index = self.children.len();
        self.children.push(child);
        &mut self.children[index]
    }

    /// Remove the child with the given name, renaming placeholder siblings
    /// that have since been numbered.
    pub fn remove_child(&mut self, name: &str) -> Option<BlockDevice> {
        let index = self.children.iter().position(|c| c.name == name)?;
        let removed = self.children.remove(index);

        let base = self.base_partition_name();
        for child in &mut self.children {
            if child.name.ends_with('?') && child.partition > 0 {
                child.name = format!("{base}{}", child.partition);
            }
        }

        Some(removed)
    }

    /// Same physical device: name, model and major:minor all match.
    pub fn same_device(&self, other: &BlockDevice) -> bool {
        self.name == other.name && self.model == other.model && self.maj_min == other.maj_min
    }

    /// Reported size if known, else the sum of the children.
    pub fn disk_size(&self) -> Result<u64> {
        let mut children_size = 0u64;
        for child in &self.children {
            children_size += if child.children.is_empty() {
                child.size
            } else {
                child.disk_size()?
            };
        }

        if self.size > 0 && children_size > self.size {
            return Err(ModelError::ChildrenTooLarge {
                name: self.name.clone(),
                children: children_size,
                size: self.size,
            });
        }

        Ok(if self.size > 0 { self.size } else { children_size })
    }

    /// False when any descendant is mounted, is a squashfs, or is labeled
    /// as installer media.
    pub fn is_available(&self) -> bool {
        self.children.iter().all(|child| {
            child.mount_point.is_empty()
                && !child.label.contains(INSTALLER_MEDIA_LABEL)
                && child.fs_type != "squashfs"
                && child.is_available()
        })
    }

    pub fn fs_type_not_swap(&self) -> bool {
        self.fs_type != "swap"
    }

    pub fn device_has_swap(&self) -> bool {
        self.children.iter().any(|c| c.fs_type == "swap")
    }

    /// True when this node or a descendant carries an advanced label.
    pub fn is_advanced_configuration(&self) -> bool {
        self.labeled_advanced
            || self
                .children
                .iter()
                .any(BlockDevice::is_advanced_configuration)
    }

    /// A non-swap encrypted node anywhere in the tree needs a passphrase.
    pub fn encryption_requires_passphrase(&self) -> bool {
        (self.device_type == DeviceType::Crypt && self.fs_type_not_swap())
            || self
                .children
                .iter()
                .any(BlockDevice::encryption_requires_passphrase)
    }

    pub fn configured_status(&self) -> ConfiguredStatus {
        let boot = self
            .children
            .iter()
            .any(|c| c.fs_type == "vfat" && c.mount_point == "/boot");
        let root = self.children.iter().any(|c| c.mount_point == "/");
        let swap = self.children.iter().any(|c| c.fs_type == "swap");

        if boot && root && swap {
            ConfiguredStatus::Full
        } else if boot || root {
            ConfiguredStatus::Partial
        } else {
            ConfiguredStatus::None
        }
    }

    /// Replace `${alias}` variables in this name and the children names.
    ///
    /// Children see the aliased device with its partition suffix so that
    /// `${disk}1` expands to `nvme0n1p1`.
    pub fn expand_name(&mut self, aliases: &HashMap<String, String>) {
        self.name = expand_variables(aliases, &self.name);

        let child_aliases: HashMap<String, String> = aliases
            .iter()
            .map(|(k, v)| (k.clone(), format!("{v}{}", alias_suffix(&format!("/dev/{v}")))))
            .collect();

        for child in &mut self.children {
            child.name = expand_variables(&child_aliases, &child.name);
        }
    }

    pub fn human_size(&self) -> String {
        human_size(self.size, SizeUnits::Decimal, None, None)
            .unwrap_or_else(|_| self.size.to_string())
    }

    /// Depth-first iterator over this node and every descendant.
    pub fn walk(&self) -> Vec<&BlockDevice> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }
}

fn alias_suffix(file: &str) -> &'static str {
    const PREFIXES: [&str; 3] = ["/dev/loop", "/dev/nvme", "/dev/mmcblk"];
    if PREFIXES.iter().any(|p| file.starts_with(p)) {
        "p"
    } else {
        ""
    }
}

fn expand_variables(aliases: &HashMap<String, String>, input: &str) -> String {
    let mut out = input.to_string();
    for (key, value) in aliases {
        out = out.replace(&format!("${{{key}}}"), value);
    }
    out
}

/// Depth-first search for the node that directly contains `child_name`,
/// restricted to parents accepted by `is_parent`.
pub fn find_parent<'a>(
    roots: &'a [BlockDevice],
    child_name: &str,
    is_parent: &dyn Fn(&BlockDevice) -> bool,
) -> Option<&'a BlockDevice> {
    for root in roots {
        if is_parent(root) && root.children.iter().any(|c| c.name == child_name) {
            return Some(root);
        }
        if let Some(found) = find_parent(&root.children, child_name, is_parent) {
            return Some(found);
        }
    }
    None
}

/// Merge host-scanned devices with user-authored ones: a user node replaces
/// the scanned node describing the same device, and inherits its table
/// snapshot when it has none of its own.
pub fn merge_user_defined(scanned: Vec<BlockDevice>, user: &[BlockDevice]) -> Vec<BlockDevice> {
    scanned
        .into_iter()
        .map(|bd| match user.iter().find(|u| u.same_device(&bd)) {
            Some(u) => {
                tracing::debug!("{}: replacing scanned device with user layout", bd.name);
                let mut merged = u.clone();
                if merged.part_table.is_empty() {
                    merged.part_table = bd.part_table;
                }
                merged
            }
            None => bd,
        })
        .collect()
}
