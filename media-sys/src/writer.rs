// SPDX-License-Identifier: GPL-3.0-only

//! Partition-table writer
//!
//! Turns the planned children of a disk into real partitions:
//!
//! 1. partial installs reserve a table row for each new child; whole-disk
//!    installs tear down what lives on the disk and write a new GPT label;
//! 2. children are sorted by name (`sda2` before `sda10`);
//! 3. each planned child gets a `parted mkpart`, retried a few times one MB
//!    further along, and its number is read back from the new table;
//! 4. GPT type codes are assigned;
//! 5. the boot partition is flagged;
//! 6. the kernel re-reads the tables.
//!
//! The same code drives a dry run, through a [`DryRun`] sink.

use std::cmp::Ordering;
use std::time::Duration;

use media_types::messages::{self, device_line};
use media_types::size::MB;
use media_types::{
    BlockDevice, ByteRange, DeviceType, Filesystem, InstallTarget, MediaOpts, find_new_partition,
    gpt_type_for, human_size_xib_precision, planned_partition_changes, swap_file_line,
    target_headline,
};

use crate::cmd::{ActionSink, Applied, CommandRunner, DryRun, ToolCommand};
use crate::filesystem::mkpart_argument;
use crate::scan::{list_block_devices, list_partitions};
use crate::teardown::clean_up_disk;
use crate::{Result, SysError};

/// Extra `mkpart` attempts after the first one fails.
pub const PARTITION_RETRIES: u32 = 3;

/// Wait after re-probing so udev can create the new device nodes.
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(4);

const BOOT_STYLE: &str = "boot";
const LEGACY_BOOT_STYLE: &str = "legacy_boot";
const LEGACY_EXT_OPTION: &str = "-O ^64bit";

/// Order device names with their numeric suffix compared as a number.
pub fn compare_device_names(a: &str, b: &str) -> Ordering {
    fn split(name: &str) -> (&str, &str) {
        let base = name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        name.split_at(base)
    }

    let (a_base, a_number) = split(a);
    let (b_base, b_number) = split(b);
    if !a_number.is_empty()
        && !b_number.is_empty()
        && a_base == b_base
        && let (Ok(x), Ok(y)) = (a_number.parse::<u64>(), b_number.parse::<u64>())
    {
        return x.cmp(&y);
    }
    a.cmp(b)
}

/// parted start/end arguments in MB. A zero start means the beginning of
/// the disk, a zero end means the end of it.
pub fn start_end_mb(start: u64, end: u64) -> String {
    let start = if start < 1 {
        "0%".to_string()
    } else {
        format!("{}M", start / MB)
    };
    let end = if end < 1 {
        "-1".to_string()
    } else {
        format!("{}M", end / MB)
    };
    format!("{start} {end}")
}

/// Write the planned partitions of `disk`.
///
/// With `whole_disk` the disk is torn down and relabelled first and the
/// partitions are laid out back to back; otherwise each planned partition
/// goes to the region reserved for its number in the disk's table.
pub fn write_partition_table(
    sink: &mut dyn ActionSink,
    disk: &mut BlockDevice,
    whole_disk: bool,
) -> Result<()> {
    if !disk.device_type.has_partition_table() {
        return Err(SysError::Precondition(format!(
            "{}: type is {}, disk required",
            disk.name, disk.device_type
        )));
    }

    let disk_file = disk.device_file();
    if whole_disk {
        tracing::info!("cleaning disk {disk_file}");
        let fresh = list_block_devices(sink.runner(), Some(&disk_file))?;
        let [current] = fresh.as_slice() else {
            return Err(SysError::OperationFailed(format!(
                "expected one entry for {disk_file}, found {}",
                fresh.len()
            )));
        };
        clean_up_disk(sink, current, &disk_file)?;
        write_partition_label(sink, disk)?;
    }

    disk.children.sort_by(|a, b| compare_device_names(&a.name, &b.name));
    for child in &mut disk.children {
        if !child.has_assigned_partition() {
            let number = child.partition_number();
            child.set_partition_number(number);
        }
    }

    make_partitions(sink, disk, whole_disk)?;
    set_partition_guids(sink, disk)?;

    for line in planned_partition_changes(disk) {
        sink.note(line);
    }
    Ok(())
}

fn write_partition_label(sink: &mut dyn ActionSink, disk: &BlockDevice) -> Result<()> {
    let disk_file = disk.device_file();
    tracing::info!("writing partition table to {}", disk.name);
    sink.apply(
        &ToolCommand::new("parted").args(["-s", disk_file.as_str(), "mklabel", "gpt"]),
        Some(&device_line(&disk.name, &messages::new_partition_table())),
    )
    .map_err(|e| e.annotate(format!("writing partition label on {}", disk.name)))?;
    Ok(())
}

fn make_partitions(
    sink: &mut dyn ActionSink,
    disk: &mut BlockDevice,
    whole_disk: bool,
) -> Result<()> {
    let zero_sized = disk
        .children
        .iter()
        .filter(|c| c.make_partition && c.size == 0)
        .count();
    if zero_sized > 1 {
        return Err(SysError::Precondition(format!(
            "found more than one partition with size 0 for {}",
            disk.name
        )));
    }

    let disk_file = disk.device_file();
    let base_name = disk.base_partition_name();
    let mut current = list_partitions(sink.runner(), disk);
    let mut start = 0u64;

    for index in 0..disk.children.len() {
        if !disk.children[index].make_partition {
            tracing::debug!("{}: existing partition, skipped", disk.children[index].name);
            continue;
        }

        let child = &mut disk.children[index];
        let mkpart = mkpart_argument(child)?;
        let size = child.size;
        let number = child.partition_number();
        let child_name = child.name.clone();

        let (mut part_start, mut end) = if whole_disk {
            (start, start + size)
        } else {
            let (start, end) = disk.part_table.start_end(number);
            if start == 0 && end == 0 {
                return Err(SysError::Precondition(format!(
                    "{}: no region reserved for partition {number} ({child_name})",
                    disk.name
                )));
            }
            (start, end)
        };
        if size == 0 {
            end = 0;
        }
        tracing::debug!("{child_name}: start {part_start}, end {end}");

        let plan = device_line(
            &disk.name,
            &messages::add_partition(&human_size_xib_precision(size, 1)),
        );
        let mut retries = PARTITION_RETRIES;
        let applied = loop {
            let script = format!("{mkpart} {}", start_end_mb(part_start, end));
            let command = ToolCommand::new("parted").args([
                "-a",
                "optimal",
                disk_file.as_str(),
                "unit",
                "MB",
                "--script",
                "--",
                script.as_str(),
            ]);

            match sink.apply(&command, Some(&plan)) {
                Ok(applied) => break applied,
                Err(e) if retries > 0 => {
                    tracing::warn!("{child_name}: {e}, retrying one MB further");
                    part_start += MB;
                    retries -= 1;
                }
                Err(e) => return Err(e.annotate(format!("creating partition {child_name}"))),
            }
        };

        if let Applied::Executed(_) = applied {
            let after = list_partitions(sink.runner(), disk);
            let created = find_new_partition(&current, &after).ok_or_else(|| {
                SysError::OperationFailed(format!(
                    "{}: could not identify the partition created for {child_name}",
                    disk.name
                ))
            })?;

            let child = &mut disk.children[index];
            child.set_partition_number(created.number);
            if child.name.is_empty() || child.name.ends_with('?') {
                child.name = format!("{base_name}{}", created.number);
            }
            tracing::info!("{}: created partition {}", disk.name, child.name);
            current = after;
        }

        start = end;
    }

    Ok(())
}

/// Assign GPT type codes so systemd can find the standard mounts.
fn set_partition_guids(sink: &mut dyn ActionSink, disk: &BlockDevice) -> Result<()> {
    let disk_file = disk.device_file();

    for child in &disk.children {
        if child.fs_type == Filesystem::Swap.as_str() && child.device_type == DeviceType::Crypt {
            continue;
        }
        let Some(gpt) = gpt_type_for(child) else {
            continue;
        };
        let number = child.partition_number();
        if number == 0 {
            tracing::warn!("{}: no partition number, {} type not set", child.name, gpt.name);
            continue;
        }

        sink.apply(
            &ToolCommand::new("sgdisk").args([
                disk_file.clone(),
                format!("--typecode={number}:{}", gpt.guid),
            ]),
            None,
        )
        .map_err(|e| e.annotate(format!("setting partition type of {}", child.name)))?;
    }
    Ok(())
}

fn boot_error(sink: &mut dyn ActionSink, message: String) -> SysError {
    tracing::error!("{message}");
    if sink.is_dry_run() {
        sink.note(message.clone());
    }
    SysError::Precondition(message)
}

/// Flag the partition the firmware boots from.
///
/// An explicit `/boot` wins. In legacy BIOS mode without one, the root
/// partition is flagged `legacy_boot` instead, and an ext root loses the
/// 64bit feature the legacy loader cannot read.
pub fn set_boot_partition(
    sink: &mut dyn ActionSink,
    medias: &mut [BlockDevice],
    opts: &MediaOpts,
) -> Result<()> {
    let mut boot: Option<(usize, usize)> = None;
    let mut root: Option<(usize, usize)> = None;

    for (m, media) in medias.iter().enumerate() {
        for (c, child) in media.children.iter().enumerate() {
            let slot = match child.mount_point.as_str() {
                "/boot" => &mut boot,
                "/" => &mut root,
                _ => continue,
            };
            if slot.is_some() {
                let message = messages::multiple_mount_partitions(&child.mount_point);
                return Err(boot_error(sink, message));
            }
            *slot = Some((m, c));
        }
    }

    if boot.is_none() && !opts.legacy_bios {
        return Err(boot_error(sink, messages::no_boot_partition()));
    }

    let Some((m, c)) = boot.or(root) else {
        return Err(boot_error(sink, messages::no_boot_or_root_partition()));
    };

    let mut style = BOOT_STYLE;
    if opts.legacy_bios {
        style = LEGACY_BOOT_STYLE;
        let bd = &mut medias[m].children[c];
        sink.note(device_line(&bd.name, &messages::legacy_mode()));

        if boot.is_none() {
            sink.note(device_line(&bd.name, &messages::legacy_no_boot()));
            if Filesystem::parse(&bd.fs_type).is_ok_and(|fs| fs.is_ext()) {
                tracing::warn!("{}: legacy_boot on / requires {LEGACY_EXT_OPTION}", bd.name);
                bd.options = format!("{} {LEGACY_EXT_OPTION}", bd.options)
                    .trim()
                    .to_string();
            }
        }
    }

    let parent_file = medias[m].device_file();
    let bd = &medias[m].children[c];
    let number = bd.partition_number();
    if number == 0 && !sink.is_dry_run() {
        return Err(SysError::Precondition(format!(
            "{}: boot partition has no number",
            bd.name
        )));
    }

    tracing::info!("setting boot partition: {} [{style}]", bd.name);
    sink.apply(
        &ToolCommand::new("parted").args([parent_file, format!("set {number} {style} on")]),
        None,
    )
    .map_err(|e| e.annotate(format!("flagging {} bootable", bd.name)))?;
    Ok(())
}

/// Ask the kernel to re-read a partition table. Failures only warn.
pub fn part_probe(sink: &mut dyn ActionSink, bd: &BlockDevice) {
    if let Err(e) = sink.apply(&ToolCommand::new("partprobe").arg(bd.device_file()), None) {
        tracing::warn!("partprobe has non-zero exit status: {e}");
    }
}

/// Write the tables of every target and set the boot partition.
///
/// Before a table is written the target decides which children are new:
/// partial targets reuse partitions already on the disk and carve the new
/// ones out of the target's free region.
///
/// In a dry run failures turn into a warning line so the report stays
/// complete; for real they abort.
pub fn prepare_installation_media(
    sink: &mut dyn ActionSink,
    targets: &[InstallTarget],
    medias: &mut [BlockDevice],
    opts: &MediaOpts,
    settle: Duration,
) -> Result<()> {
    for target in targets {
        sink.note(target_headline(target));

        let region = ByteRange {
            start: target.free_start,
            end: target.free_end,
        };
        for media in medias.iter_mut().filter(|m| m.name == target.name) {
            let written = media
                .reserve_partitions(target.whole_disk, region)
                .map_err(SysError::from)
                .and_then(|()| write_partition_table(sink, media, target.whole_disk));
            if let Err(e) = written {
                if !sink.is_dry_run() {
                    return Err(e.annotate(format!("writing partition table of {}", media.name)));
                }
                tracing::warn!("{}: {e}", media.name);
                sink.note(messages::partition_info_failed());
            }
        }
    }

    if let Err(e) = set_boot_partition(sink, medias, opts) {
        tracing::warn!("could not set boot information: {e}");
        if !sink.is_dry_run() {
            return Err(e);
        }
        sink.note(messages::partition_info_failed());
    }

    for media in medias.iter() {
        part_probe(sink, media);
    }
    sink.settle(settle);

    Ok(())
}

/// Everything an install would do to the given targets, as report lines.
///
/// Works on a copy of `medias`; nothing is changed on disk.
pub fn planned_media_changes(
    runner: &dyn CommandRunner,
    targets: &[InstallTarget],
    medias: &[BlockDevice],
    opts: &MediaOpts,
) -> Vec<String> {
    if targets.len() != medias.len() {
        tracing::warn!(
            "the number of install targets ({}) != media devices ({})",
            targets.len(),
            medias.len()
        );
    }

    let mut medias = medias.to_vec();
    let mut sink = DryRun::new(runner);
    if let Err(e) =
        prepare_installation_media(&mut sink, targets, &mut medias, opts, Duration::ZERO)
    {
        tracing::warn!("planning media changes: {e}");
    }

    let mut lines = sink.into_lines();
    lines.extend(swap_file_line(opts));
    lines
}
