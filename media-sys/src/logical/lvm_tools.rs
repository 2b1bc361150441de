// SPDX-License-Identifier: GPL-3.0-only

//! LVM physical-volume teardown
//!
//! A PV that is about to be wiped takes its volume group down with it: every
//! logical volume of the group is removed, then the group is removed (last
//! PV) or reduced (other PVs remain), then the PV label itself.

use media_types::messages;
use media_types::{BlockDevice, DeviceType};

use crate::cmd::{ActionSink, ToolCommand};
use crate::{Result, SysError};

const PVDISPLAY_FIELDS: usize = 12;
const LVDISPLAY_FIELDS: usize = 13;
const VGDISPLAY_FIELDS: usize = 17;

#[derive(Debug, Clone, PartialEq, Eq)]
struct PvRow {
    pv_name: String,
    vg_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct VgRow {
    name: String,
    pv_count: u64,
}

fn parse_colon_line(line: &str) -> Vec<&str> {
    line.split(':').collect()
}

fn parse_pvdisplay(output: &str) -> Vec<PvRow> {
    output
        .lines()
        .filter_map(|line| {
            let cols = parse_colon_line(line);
            if cols.len() != PVDISPLAY_FIELDS {
                return None;
            }
            let vg_name = cols[1].trim();
            Some(PvRow {
                pv_name: cols[0].trim().to_string(),
                vg_name: (!vg_name.is_empty()).then(|| vg_name.to_string()),
            })
        })
        .collect()
}

fn parse_lvdisplay(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let cols = parse_colon_line(line);
            (cols.len() == LVDISPLAY_FIELDS).then(|| cols[0].trim().to_string())
        })
        .collect()
}

fn parse_vgdisplay(output: &str) -> Result<Vec<VgRow>> {
    let mut rows = Vec::new();
    for line in output.lines() {
        let cols = parse_colon_line(line);
        if cols.len() != VGDISPLAY_FIELDS {
            continue;
        }
        let pv_count = cols[9].trim().parse().map_err(|_| {
            SysError::OperationFailed(format!("unexpected PV count in vgdisplay row {line:?}"))
        })?;
        rows.push(VgRow {
            name: cols[0].trim().to_string(),
            pv_count,
        });
    }
    Ok(rows)
}

fn query(sink: &dyn ActionSink, command: ToolCommand) -> Result<String> {
    let rendered = command.render();
    sink.runner()
        .run(&command)
        .map(|outcome| outcome.stdout)
        .map_err(|e| e.annotate(format!("querying LVM ({rendered})")))
}

/// Volume group owning the PV at `pv_file`, if any.
fn volume_group_of(sink: &dyn ActionSink, pv_file: &str) -> Result<Option<String>> {
    let output = query(sink, ToolCommand::new("pvdisplay").arg("--colon"))?;
    Ok(parse_pvdisplay(&output)
        .into_iter()
        .find(|row| row.pv_name == pv_file)
        .and_then(|row| row.vg_name))
}

fn remove_physical_volume(sink: &mut dyn ActionSink, pv: &BlockDevice) -> Result<()> {
    let pv_file = pv.mapped_device_file();
    sink.apply(
        &ToolCommand::new("pvremove").arg(&pv_file),
        Some(&messages::remove_physical_volume(&pv.name)),
    )
    .map_err(|e| e.annotate(format!("removing physical volume {pv_file}")))?;
    Ok(())
}

/// Remove an LVM physical volume and everything its group holds.
pub fn process_physical_volume(sink: &mut dyn ActionSink, pv: &BlockDevice) -> Result<()> {
    if pv.fs_type != DeviceType::Lvm2Group.as_str() {
        return Err(SysError::Precondition(format!(
            "{}: block device is not a physical volume",
            pv.name
        )));
    }

    let pv_file = pv.mapped_device_file();
    let Some(volume_group) = volume_group_of(sink, &pv_file)? else {
        tracing::warn!("could not find volume group for the physical volume {pv_file}");
        return remove_physical_volume(sink, pv);
    };

    let output = query(
        sink,
        ToolCommand::new("lvdisplay")
            .arg(format!("/dev/mapper/{volume_group}"))
            .arg("--colon"),
    )?;
    let volumes = parse_lvdisplay(&output);

    for (index, volume) in volumes.iter().enumerate() {
        tracing::debug!("removing logical volume {} of {}", index + 1, volumes.len());
        sink.apply(
            &ToolCommand::new("lvremove").args([volume.as_str(), "-y"]),
            Some(&messages::remove_logical_volume(volume)),
        )
        .map_err(|e| e.annotate(format!("removing logical volume {volume}")))?;
    }

    let output = query(sink, ToolCommand::new("vgdisplay").arg("--colon"))?;
    let pv_count = parse_vgdisplay(&output)?
        .into_iter()
        .find(|row| row.name == volume_group)
        .map_or(1, |row| row.pv_count);

    if pv_count == 1 {
        tracing::info!("volume group {volume_group} has only {pv_file}, removing the group");
        sink.apply(
            &ToolCommand::new("vgremove").arg(&volume_group),
            Some(&messages::remove_volume_group(&volume_group)),
        )?;
    } else {
        tracing::info!("reducing volume group {volume_group} by {pv_file}");
        sink.apply(
            &ToolCommand::new("vgreduce").args([volume_group.as_str(), pv_file.as_str()]),
            Some(&messages::reduce_volume_group(&pv.name, &volume_group)),
        )?;
    }

    remove_physical_volume(sink, pv)
}
