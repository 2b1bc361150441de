// SPDX-License-Identifier: GPL-3.0-only

//! Taking a disk out of an md RAID array before it is wiped

use media_types::messages::{self, device_line};
use media_types::{BlockDevice, find_parent};

use crate::cmd::{ActionSink, ToolCommand};
use crate::scan::list_block_devices;
use crate::{Result, SysError};

const RAID_MEMBER_FSTYPE: &str = "linux_raid_member";

/// Detach the member of `disk_file` that backs the array `raid`.
///
/// Fails the member and removes it from the array, then zeroes its
/// superblock. If the array refuses to fail the member it is stopped
/// instead, and the superblock zeroed all the same.
pub fn remove_raid_member(
    sink: &mut dyn ActionSink,
    raid: &BlockDevice,
    disk_file: &str,
) -> Result<()> {
    let fresh = list_block_devices(sink.runner(), Some(disk_file))?;
    let is_member = |bd: &BlockDevice| bd.fs_type == RAID_MEMBER_FSTYPE;
    let member = find_parent(&fresh, &raid.name, &is_member).ok_or_else(|| {
        SysError::DeviceNotFound(format!("RAID member of {} on {disk_file}", raid.name))
    })?;

    let raid_file = raid.device_file();
    let member_file = member.device_file();
    tracing::debug!("{raid_file}: member on {disk_file} is {member_file}");

    let zero = ToolCommand::new("mdadm").args(["--zero-superblock", member_file.as_str()]);

    tracing::warn!("failing {member_file} in RAID {raid_file}");
    let fail = ToolCommand::new("mdadm").args(["--fail", raid_file.as_str(), member_file.as_str()]);
    let degrade = messages::degrade_raid(&raid.name);
    match sink.apply(&fail, Some(&degrade)) {
        Ok(_) => {
            tracing::warn!("removing {member_file} from RAID {raid_file}");
            let remove = ToolCommand::new("mdadm").args([
                "--remove",
                raid_file.as_str(),
                member_file.as_str(),
            ]);
            let plan = device_line(&member.name, &messages::remove_raid_member(&raid.name));
            sink.apply(&remove, Some(&plan))?;
        }
        Err(e) => {
            tracing::warn!("could not fail {member_file} ({e}), stopping RAID {raid_file}");
            sink.apply(
                &ToolCommand::new("mdadm").args(["--stop", raid_file.as_str()]),
                None,
            )?;
        }
    }

    tracing::warn!("zeroing RAID superblock of {member_file}");
    sink.apply(&zero, None)?;
    Ok(())
}
