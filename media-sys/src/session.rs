// SPDX-License-Identifier: GPL-3.0-only

//! Mounts and encrypted mappings held by one install attempt

use std::fs;
use std::path::{Path, PathBuf};

use media_types::{BlockDevice, DeviceType};
use nix::mount::{MntFlags, MsFlags, mount, umount2};

use crate::cmd::CommandRunner;
use crate::encrypt::unmap_encrypted;
use crate::{Result, SysError};

/// Pseudo filesystems the target needs while it is being set up.
const META_FILESYSTEMS: [(&str, &str); 3] = [("proc", "proc"), ("sys", "sysfs"), ("dev", "devtmpfs")];

/// Everything an install attempt has mounted or opened, torn down in one go
/// by [`InstallSession::umount_all`].
#[derive(Debug, Default)]
pub struct InstallSession {
    mount_points: Vec<PathBuf>,
    mappings: Vec<String>,
}

impl InstallSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount_points(&self) -> &[PathBuf] {
        &self.mount_points
    }

    pub fn mappings(&self) -> &[String] {
        &self.mappings
    }

    /// Remember an opened device-mapper target so teardown closes it.
    pub fn record_mapping(&mut self, mapped: &str) {
        self.mappings.push(mapped.to_string());
    }

    fn mount_at(
        &mut self,
        source: &str,
        target: PathBuf,
        fs_type: &str,
        flags: MsFlags,
    ) -> Result<()> {
        fs::create_dir_all(&target)?;
        mount(Some(source), &target, Some(fs_type), flags, None::<&str>).map_err(|source| {
            SysError::Mount {
                target: target.display().to_string(),
                source,
            }
        })?;

        tracing::info!("mounted {source} on {}", target.display());
        self.mount_points.push(target);
        Ok(())
    }

    /// Mount a partition at `root/<mount point>`.
    pub fn mount(&mut self, bd: &BlockDevice, root: &Path) -> Result<()> {
        if bd.device_type == DeviceType::Disk {
            return Err(SysError::Precondition(format!(
                "{}: cannot mount a disk, partition required",
                bd.name
            )));
        }
        if bd.mount_point.is_empty() {
            return Err(SysError::Precondition(format!(
                "{}: no mount point set",
                bd.name
            )));
        }

        let target = root.join(bd.mount_point.trim_start_matches('/'));
        let source = bd.mapped_device_file();
        self.mount_at(&source, target, &bd.fs_type, MsFlags::MS_RELATIME)
            .map_err(|e| e.annotate(format!("mounting {}", bd.name)))
    }

    /// Mount `proc`, `sysfs` and `devtmpfs` under `root`.
    pub fn mount_meta_fs(&mut self, root: &Path) -> Result<()> {
        for (dir, fs_type) in META_FILESYSTEMS {
            self.mount_at(fs_type, root.join(dir), fs_type, MsFlags::empty())?;
        }
        Ok(())
    }

    /// Unmount everything, deepest paths first, then close the mappings in
    /// reverse order. Every step is attempted; failures are reported together.
    pub fn umount_all(&mut self, runner: &dyn CommandRunner) -> Result<()> {
        let mounted = kernel_mount_points();
        let mut failed = Vec::new();

        let mut points = std::mem::take(&mut self.mount_points);
        points.sort();
        for point in points.iter().rev() {
            if let Some(mounted) = &mounted
                && !mounted.contains(point)
            {
                tracing::debug!("{} is no longer mounted", point.display());
                continue;
            }

            match umount2(point, MntFlags::MNT_FORCE | MntFlags::MNT_DETACH) {
                Ok(()) => tracing::info!("unmounted {}", point.display()),
                Err(e) => {
                    tracing::warn!("could not unmount {}: {e}", point.display());
                    failed.push(point.display().to_string());
                }
            }
        }

        let mappings = std::mem::take(&mut self.mappings);
        for mapped in mappings.iter().rev() {
            if let Err(e) = unmap_encrypted(runner, mapped) {
                tracing::warn!("{e}");
                failed.push(format!("e-{mapped}"));
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(SysError::OperationFailed(format!(
                "Failed to unmount: [{}]",
                failed.join(", ")
            )))
        }
    }
}

/// Mount points the kernel lists for this process, if they can be read.
fn kernel_mount_points() -> Option<Vec<PathBuf>> {
    let infos = procfs::process::Process::myself()
        .and_then(|process| process.mountinfo())
        .map_err(|e| tracing::warn!("could not read mountinfo: {e}"))
        .ok()?;
    Some(infos.into_iter().map(|info| info.mount_point).collect())
}
