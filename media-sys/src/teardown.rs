// SPDX-License-Identifier: GPL-3.0-only

//! Destructive teardown of whatever lives on a disk before it is wiped
//!
//! Children are torn down before their parents. Parents are never stored on
//! the tree: each step looks its parent up in a fresh lsblk listing of the
//! disk, by child name.

use media_types::messages::{self, device_line};
use media_types::{BlockDevice, DeviceType, find_parent};

use crate::cmd::{ActionSink, ToolCommand};
use crate::logical::{process_physical_volume, remove_raid_member};
use crate::scan::list_block_devices;
use crate::{Result, SysError};

/// How a node is taken off the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// `parted rm`, or the PV cascade when the partition is an LVM PV.
    RemovePartition,
    /// Fail/remove the member from its md array.
    RemoveRaidMember,
    /// Logical volumes go away with their physical volume.
    ViaPhysicalVolume,
    Keep,
}

pub fn teardown_for(device_type: DeviceType) -> Teardown {
    match device_type {
        DeviceType::Part => Teardown::RemovePartition,
        DeviceType::Raid0
        | DeviceType::Raid1
        | DeviceType::Raid4
        | DeviceType::Raid5
        | DeviceType::Raid6
        | DeviceType::Raid10 => Teardown::RemoveRaidMember,
        DeviceType::Lvm2Volume => Teardown::ViaPhysicalVolume,
        DeviceType::Disk
        | DeviceType::Rom
        | DeviceType::Lvm2Group
        | DeviceType::Crypt
        | DeviceType::Loop
        | DeviceType::Unknown => Teardown::Keep,
    }
}

/// Tear down every descendant of `device`, deepest first.
///
/// `disk_file` is the device being wiped; parents are searched under it.
pub fn clean_up_disk(
    sink: &mut dyn ActionSink,
    device: &BlockDevice,
    disk_file: &str,
) -> Result<()> {
    for child in &device.children {
        clean_up_disk(sink, child, disk_file)?;

        match teardown_for(child.device_type) {
            Teardown::RemovePartition => remove_partition(sink, child, disk_file)?,
            Teardown::RemoveRaidMember => remove_raid_member(sink, child, disk_file)?,
            Teardown::ViaPhysicalVolume => {
                tracing::debug!("{}: removed along with its physical volume", child.name)
            }
            Teardown::Keep => {}
        }
    }
    Ok(())
}

fn is_partition_parent(bd: &BlockDevice) -> bool {
    matches!(
        bd.device_type,
        DeviceType::Disk | DeviceType::Loop | DeviceType::Lvm2Volume
    ) || bd.device_type.is_raid()
}

/// Remove one partition from its parent table.
pub fn remove_partition(
    sink: &mut dyn ActionSink,
    part: &BlockDevice,
    disk_file: &str,
) -> Result<()> {
    if part.device_type != DeviceType::Part {
        return Err(SysError::Precondition(format!(
            "{}: type is not a partition",
            part.name
        )));
    }

    let number = part.partition_number();
    if number == 0 {
        return Err(SysError::Precondition(format!(
            "{}: could not find partition number",
            part.name
        )));
    }

    let fresh = list_block_devices(sink.runner(), Some(disk_file))?;
    let parent = find_parent(&fresh, &part.name, &is_partition_parent)
        .ok_or_else(|| SysError::DeviceNotFound(format!("parent of {}", part.name)))?;
    tracing::debug!("{}: parent is {}", part.name, parent.device_file());

    if part.fs_type == DeviceType::Lvm2Group.as_str() {
        return process_physical_volume(sink, part);
    }

    tracing::warn!("deleting partition {} from {}", part.name, parent.name);
    let parent_file = parent.device_file();
    let number = number.to_string();
    sink.apply(
        &ToolCommand::new("parted").args([
            parent_file.as_str(),
            "--script",
            "--",
            "rm",
            number.as_str(),
        ]),
        Some(&device_line(&part.name, &messages::remove_partition())),
    )
    .map_err(|e| e.annotate(format!("removing partition {}", part.name)))?;
    Ok(())
}
