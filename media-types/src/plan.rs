// SPDX-License-Identifier: GPL-3.0-only

//! Human-readable planning report lines

use crate::device::{BlockDevice, DeviceType};
use crate::messages::{
    device_line, format_partition, media_data_loss, media_erased, media_partitioned, media_used,
    swap_file, use_partition,
};
use crate::options::{MediaOpts, SWAPFILE_NAME};
use crate::target::InstallTarget;

fn child_name(disk: &BlockDevice, ch: &BlockDevice) -> String {
    if !ch.name.is_empty() {
        return ch.name.clone();
    }
    let number = ch.partition_number();
    if number > 0 {
        format!("{}{}", disk.base_partition_name(), number)
    } else {
        format!("{}?", disk.base_partition_name())
    }
}

/// What happens to each child of `disk`: formatted, or reused as is.
/// Children that are neither mounted nor swap are left out.
pub fn planned_partition_changes(disk: &BlockDevice) -> Vec<String> {
    let mut results = Vec::new();

    for ch in &disk.children {
        let mut line = if ch.format_partition {
            let mut line = device_line(&child_name(disk, ch), &format_partition(&ch.fs_type));
            if !ch.mount_point.is_empty() {
                line.push_str(&format!(" [{}]", ch.mount_point));
            }
            line
        } else if !ch.mount_point.is_empty() || !ch.fs_type_not_swap() {
            let mut line = device_line(&child_name(disk, ch), &use_partition());
            if !ch.mount_point.is_empty() {
                line.push_str(&format!(" [{}]", ch.mount_point));
            } else if !ch.fs_type.is_empty() {
                line.push_str(&format!(" ({})", ch.fs_type));
            }
            line
        } else {
            continue;
        };

        if ch.device_type == DeviceType::Crypt {
            line.push_str(" Encrypted");
        }
        results.push(line);
    }

    results
}

/// First report line for a target, by how destructive the install is.
pub fn target_headline(target: &InstallTarget) -> String {
    let message = if target.erase_disk {
        media_erased()
    } else if target.data_loss {
        media_data_loss()
    } else if target.whole_disk {
        media_partitioned()
    } else {
        media_used()
    };
    device_line(&target.name, &message)
}

/// `/var/swapfile (<size>)` when a swap file was requested.
pub fn swap_file_line(opts: &MediaOpts) -> Option<String> {
    opts.swap_file_size
        .as_deref()
        .filter(|size| !size.is_empty())
        .map(|size| swap_file(SWAPFILE_NAME, size))
}
