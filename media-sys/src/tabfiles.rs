// SPDX-License-Identifier: GPL-3.0-only

//! fstab and crypttab for the installed system
//!
//! Standard mounts are found by their GPT type at boot and get no entry.

use std::fs;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use media_types::{BlockDevice, DeviceType, is_standard_mount};

use crate::{Result, SysError};

const CRYPT_SWAP_OPTIONS: &str = "/dev/urandom swap,offset=2048,cipher=aes-xts-plain64,size=512";

/// Table lines for every planned partition, `(fstab, crypttab)`.
pub fn tab_entries(medias: &[BlockDevice]) -> (Vec<String>, Vec<String>) {
    let mut fstab = Vec::new();
    let mut crypttab = Vec::new();

    for child in medias.iter().flat_map(|media| &media.children) {
        let mapped_file = child.mapped_device_file();
        let mapper = Path::new(&mapped_file)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let encrypted = child.device_type == DeviceType::Crypt;

        if encrypted && child.fs_type == "swap" {
            crypttab.push(format!("{mapper} {} {CRYPT_SWAP_OPTIONS}", child.device_id()));
            fstab.push(format!("{mapped_file} none swap defaults 0 0"));
        } else if is_standard_mount(child) {
            continue;
        } else if encrypted {
            crypttab.push(format!("{mapper} {}", child.device_id()));
            fstab.push(format!(
                "{mapped_file} {} {} defaults 0 2",
                child.mount_point, child.fs_type
            ));
        } else if !child.mount_point.is_empty() {
            fstab.push(format!(
                "{} {} {} defaults 0 2",
                child.device_id(),
                child.mount_point,
                child.fs_type
            ));
        }
    }

    (fstab, crypttab)
}

fn write_tab(path: &Path, lines: &[String]) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)?;
    file.set_permissions(fs::Permissions::from_mode(0o644))?;
    file.write_all(format!("{}\n", lines.join("\n")).as_bytes())?;
    tracing::info!("wrote {} entries to {}", lines.len(), path.display());
    Ok(())
}

/// Write `etc/fstab` and `etc/crypttab` under `root`, skipping empty tables.
pub fn generate_tab_files(root: &Path, medias: &[BlockDevice]) -> Result<()> {
    let (fstab, crypttab) = tab_entries(medias);
    let etc = root.join("etc");
    let mut failed = Vec::new();

    for (name, lines) in [("fstab", &fstab), ("crypttab", &crypttab)] {
        if lines.is_empty() {
            continue;
        }
        let written = fs::create_dir_all(&etc)
            .map_err(SysError::from)
            .and_then(|()| write_tab(&etc.join(name), lines));
        if let Err(e) = written {
            tracing::warn!("could not write {name}: {e}");
            failed.push(format!("{name}: {e}"));
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(SysError::OperationFailed(failed.join("; ")))
    }
}
