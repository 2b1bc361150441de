// SPDX-License-Identifier: GPL-3.0-only

//! Raw image files and the loop devices that expose them

use std::path::Path;

use media_types::BlockDevice;

use crate::cmd::{CommandRunner, ToolCommand};
use crate::{Result, SysError};

/// Create a sparse raw image as large as `disk`.
pub fn make_image(runner: &dyn CommandRunner, disk: &BlockDevice, file: &Path) -> Result<()> {
    let size = disk.disk_size()?;
    runner
        .run(&ToolCommand::new("qemu-img").args([
            "create".to_string(),
            "-f".to_string(),
            "raw".to_string(),
            file.display().to_string(),
            size.to_string(),
        ]))
        .map_err(|e| e.annotate(format!("creating image {}", file.display())))?;
    Ok(())
}

/// Attach `file` to the first free loop device, partitions scanned.
///
/// Returns the device node, e.g. `/dev/loop0`.
pub fn setup_loop_device(runner: &dyn CommandRunner, file: &Path) -> Result<String> {
    let outcome = runner
        .run(&ToolCommand::new("losetup").args([
            "--partscan".to_string(),
            "--find".to_string(),
            "--show".to_string(),
            file.display().to_string(),
        ]))
        .map_err(|e| e.annotate(format!("attaching {}", file.display())))?;

    let device = outcome.stdout.trim_end_matches('\n').trim();
    if device.is_empty() {
        return Err(SysError::OperationFailed(format!(
            "losetup gave no device for {}",
            file.display()
        )));
    }
    tracing::info!("{} attached as {device}", file.display());
    Ok(device.to_string())
}

/// Detach a loop device. Failures are only logged.
pub fn detach_loop_device(runner: &dyn CommandRunner, device: &str) {
    if let Err(e) = runner.run(&ToolCommand::new("losetup").args(["-d", device])) {
        tracing::warn!("failed to detach loop device {device}: {e}");
    }
}
