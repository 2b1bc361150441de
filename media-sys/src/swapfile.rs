// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use media_types::size::MIB;
use media_types::{SWAPFILE_NAME, bytes_with_separators, parse_volume_size};

use crate::cmd::{CommandRunner, ToolCommand};
use crate::Result;

/// Allocate `<root>/var/swapfile` with `size` of zeros and format it as swap.
pub fn create_swap_file(runner: &dyn CommandRunner, root: &Path, size: &str) -> Result<PathBuf> {
    let bytes = parse_volume_size(size)?;
    let path = root.join(SWAPFILE_NAME.trim_start_matches('/'));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&path)?;
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    let block = vec![0u8; MIB as usize];
    for _ in 0..bytes / MIB {
        file.write_all(&block)?;
    }
    file.sync_all()?;
    tracing::info!(
        "allocated {} bytes of swap in {}",
        bytes_with_separators(bytes / MIB * MIB),
        path.display()
    );

    runner
        .run(&ToolCommand::new("mkswap").arg(path.display().to_string()))
        .map_err(|e| e.annotate("formatting swap file"))?;
    Ok(path)
}
