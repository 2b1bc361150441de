// SPDX-License-Identifier: GPL-3.0-only

//! Host-side operations for install-media
//!
//! Every external tool goes through a [`CommandRunner`]; every mutation goes
//! through an [`ActionSink`], so the same code path either changes the disks
//! ([`Executor`]) or only records what it would do ([`DryRun`]).
//!
//! - Device scanning (lsblk, parted)
//! - Partition table writing, with teardown of RAID and LVM leftovers
//! - Filesystem creation and LUKS encryption
//! - Mount session, fstab/crypttab and swap file for the target
//! - Image files and loop devices
//!
//! Most of this needs root and really changes block devices.

pub mod cmd;
pub mod encrypt;
pub mod error;
pub mod filesystem;
pub mod image;
pub mod logical;
pub mod prompt;
pub mod scan;
pub mod session;
pub mod swapfile;
pub mod tabfiles;
pub mod teardown;
pub mod writer;

pub use cmd::{
    ActionSink, Applied, CommandOutcome, CommandRunner, DryRun, Executor, HostRunner,
    ToolCommand, require_tool,
};
pub use encrypt::{
    KERNEL_ARGUMENT, REQUIRED_BUNDLE, check_passphrase_strength, map_encrypted, unmap_encrypted,
};
pub use error::{Result, SysError};
pub use filesystem::{make_fs, mkpart_argument, update_partition_info};
pub use image::{detach_loop_device, make_image, setup_loop_device};
pub use prompt::ask_passphrase;
pub use scan::{available_media, list_block_devices, list_partitions, scan_media};
pub use session::InstallSession;
pub use swapfile::create_swap_file;
pub use tabfiles::generate_tab_files;
pub use teardown::clean_up_disk;
pub use writer::{
    DEFAULT_SETTLE, planned_media_changes, prepare_installation_media, set_boot_partition,
    write_partition_table,
};
