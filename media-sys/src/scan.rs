// SPDX-License-Identifier: GPL-3.0-only

//! Host device discovery: lsblk trees and parted table dumps

use media_types::{
    BlockDevice, DeviceType, LSBLK_ARGS, PartedPartition, PartitionTable, merge_user_defined,
    parse_block_devices_descriptor,
};

use crate::cmd::{CommandRunner, ToolCommand};
use crate::error::Result;

/// List block devices, or only `device_file` and its descendants.
pub fn list_block_devices(
    runner: &dyn CommandRunner,
    device_file: Option<&str>,
) -> Result<Vec<BlockDevice>> {
    let mut command = ToolCommand::new("lsblk").args(LSBLK_ARGS);
    if let Some(file) = device_file {
        command = command.arg(file);
    }

    let outcome = runner
        .run(&command)
        .map_err(|e| e.annotate("listing block devices"))?;
    Ok(parse_block_devices_descriptor(&outcome.stdout)?)
}

fn print_table(runner: &dyn CommandRunner, device_file: &str, free: bool) -> Result<String> {
    let mut command = ToolCommand::new("parted").args([
        "--machine",
        "--script",
        "--",
        device_file,
        "unit",
        "B",
        "print",
    ]);
    if free {
        command = command.arg("free");
    }
    Ok(runner.run(&command)?.stdout)
}

/// Current partitions of a disk, without free-space rows.
///
/// A disk without a readable label has no partitions.
pub fn list_partitions(runner: &dyn CommandRunner, disk: &BlockDevice) -> Vec<PartedPartition> {
    if !matches!(disk.device_type, DeviceType::Disk | DeviceType::Loop) {
        tracing::warn!("list_partitions called on non-disk {}", disk.device_file());
        return Vec::new();
    }

    match print_table(runner, &disk.device_file(), false) {
        Ok(output) => PartitionTable::parse(&output).rows().to_vec(),
        Err(e) => {
            tracing::warn!("{}: could not read partition table: {e}", disk.name);
            Vec::new()
        }
    }
}

/// Refresh the in-memory table of a disk, free space included.
pub fn load_partition_table(runner: &dyn CommandRunner, disk: &mut BlockDevice) {
    if !disk.device_type.has_partition_table() {
        return;
    }

    disk.part_table = match print_table(runner, &disk.device_file(), true) {
        Ok(output) => PartitionTable::parse(&output),
        Err(e) => {
            tracing::debug!("{}: no partition table loaded: {e}", disk.name);
            PartitionTable::default()
        }
    };
}

/// Full scan: every device tree with partition tables loaded, user-authored
/// devices replacing the scanned ones they describe.
pub fn scan_media(
    runner: &dyn CommandRunner,
    user_defined: &[BlockDevice],
) -> Result<Vec<BlockDevice>> {
    // Let the kernel and udev catch up with earlier table changes first.
    for command in [
        ToolCommand::new("partprobe").arg("-s"),
        ToolCommand::new("udevadm").args(["settle", "--timeout", "10"]),
    ] {
        if let Err(e) = runner.run(&command) {
            tracing::warn!("{} has non-zero exit status: {e}", command.program());
        }
    }

    let mut devices = list_block_devices(runner, None)?;
    for device in &mut devices {
        load_partition_table(runner, device);
    }
    tracing::info!("found {} block devices", devices.len());

    Ok(merge_user_defined(devices, user_defined))
}

/// Only devices nothing is mounted from.
pub fn available_media(devices: Vec<BlockDevice>) -> Vec<BlockDevice> {
    devices
        .into_iter()
        .filter(|bd| {
            let available = bd.is_available();
            if !available {
                tracing::debug!("{}: in use, not offered", bd.name);
            }
            available
        })
        .collect()
}
