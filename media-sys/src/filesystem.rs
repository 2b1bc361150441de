// SPDX-License-Identifier: GPL-3.0-only

//! Filesystem creation on planned partitions

use std::path::Path;

use media_types::{BlockDevice, DeviceType, Filesystem, MkpartStyle};

use crate::cmd::{ActionSink, CommandRunner, ToolCommand};
use crate::{Result, SysError};

/// Label arguments for the formatter, truncating labels that are too long.
fn label_args(bd: &mut BlockDevice, fs: Filesystem) -> Vec<String> {
    if bd.label.is_empty() {
        return Vec::new();
    }

    let max = fs.max_label_length();
    if bd.label.chars().count() > max {
        let short: String = bd.label.chars().take(max - 1).collect();
        tracing::warn!(
            "truncating {} file system label {:?} to {:?} ({max} characters max)",
            fs,
            bd.label,
            short
        );
        bd.label = short;
    }

    vec![fs.label_flag().to_string(), bd.label.clone()]
}

/// Formatter invocation for `bd`, options and target device included.
pub fn make_fs_command(bd: &mut BlockDevice) -> Result<ToolCommand> {
    let fs = Filesystem::parse(&bd.fs_type)?;

    let mut command = ToolCommand::new(fs.mkfs_command())
        .args(label_args(bd, fs))
        .args(fs.mkfs_args().iter().copied());
    if !bd.options.trim().is_empty() {
        command = command.args(bd.options.split_whitespace());
    }
    Ok(command.arg(bd.mapped_device_file()))
}

fn is_encrypted_swap(bd: &BlockDevice) -> bool {
    bd.fs_type == Filesystem::Swap.as_str() && bd.device_type == DeviceType::Crypt
}

/// Encrypted swap gets a random key at every boot; the partition only
/// carries a tiny ext2 header whose label crypttab can find it by.
fn make_encrypted_swap(sink: &mut dyn ActionSink, bd: &BlockDevice) -> Result<()> {
    let device_file = bd.device_file();
    let mapped = bd.mapped_device_file();
    let label = Path::new(&mapped)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| bd.name.clone());

    sink.apply(&ToolCommand::new("wipefs").arg(&device_file), None)?;
    sink.apply(
        &ToolCommand::new("mkfs.ext2").args(["-L", label.as_str(), device_file.as_str(), "1M"]),
        None,
    )?;
    Ok(())
}

/// Create the filesystem described by `bd`, then refresh its label and
/// UUID from the new superblock.
pub fn make_fs(sink: &mut dyn ActionSink, bd: &mut BlockDevice) -> Result<()> {
    if bd.device_type == DeviceType::Disk {
        return Err(SysError::Precondition(format!(
            "{}: cannot format a disk, partition required",
            bd.name
        )));
    }

    if is_encrypted_swap(bd) {
        make_encrypted_swap(sink, bd)?;
    } else {
        let command = make_fs_command(bd)?;
        sink.apply(&command, None)
            .map_err(|e| e.annotate(format!("formatting {} as {}", bd.name, bd.fs_type)))?;
    }

    if !sink.is_dry_run() {
        update_partition_info(sink.runner(), bd)?;
    }
    Ok(())
}

/// Read `LABEL` and `UUID` back with blkid.
pub fn update_partition_info(runner: &dyn CommandRunner, bd: &mut BlockDevice) -> Result<()> {
    if bd.device_type == DeviceType::Disk {
        return Err(SysError::Precondition(format!(
            "{}: cannot probe a disk, partition required",
            bd.name
        )));
    }

    let device_file = bd.device_file();
    let outcome = runner.run(
        &ToolCommand::new("blkid").args(["--probe", device_file.as_str(), "--output", "export"]),
    )?;

    for line in outcome.stdout.lines() {
        match line.split_once('=') {
            Some(("LABEL", value)) => {
                bd.label = value.to_string();
                tracing::debug!("{device_file}: LABEL is now {value}");
            }
            Some(("UUID", value)) => {
                bd.uuid = value.to_string();
                tracing::debug!("{device_file}: UUID is now {value}");
            }
            _ => tracing::trace!("blkid: ignoring {line:?}"),
        }
    }
    Ok(())
}

/// The `mkpart <name> [fs]` part of a parted script line.
///
/// Encrypted swap partitions are named `eswap-<name>` and get the matching
/// mapped name, so crypttab can open them by label.
pub fn mkpart_argument(bd: &mut BlockDevice) -> Result<String> {
    let fs = Filesystem::parse(&bd.fs_type).map_err(|_| {
        SysError::Precondition(format!(
            "{}: no partition command for file system {:?}",
            bd.name, bd.fs_type
        ))
    })?;

    Ok(match fs.mkpart_style() {
        MkpartStyle::Common if bd.mount_point.is_empty() => format!("mkpart {}", fs),
        MkpartStyle::Common => format!("mkpart {}", bd.mount_point),
        MkpartStyle::Swap if bd.device_type == DeviceType::Crypt => {
            let mapped = format!("eswap-{}", bd.name);
            bd.mapped_name = format!("mapper/{mapped}");
            format!("mkpart {mapped}")
        }
        MkpartStyle::Swap => "mkpart linux-swap".to_string(),
        MkpartStyle::Vfat => "mkpart EFI fat32".to_string(),
    })
}
