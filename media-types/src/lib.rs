// SPDX-License-Identifier: GPL-3.0-only

//! Domain model for install-media
//!
//! Everything here is pure: no process is spawned and no device is touched.
//! The host side lives in `media-sys`.
//!
//! - **Device model**: [`BlockDevice`] trees, from lsblk or from a layout document
//! - **Partition-table tracker**: [`PartitionTable`] rows, carving free space
//! - **Target discovery**: safe, all and advanced policies
//! - **Validation**: install policy checks returning readable messages
//! - **Planning**: report lines for a dry run
//! - **Localization**: the fluent bundle behind every report line

pub mod device;
pub mod error;
pub mod filesystem;
pub mod layout;
pub mod localize;
pub mod lsblk;
pub mod messages;
pub mod options;
pub mod parted;
pub mod partition_types;
pub mod passphrase;
pub mod plan;
pub mod size;
pub mod target;
pub mod validate;

pub use device::{
    BlockDevice, ConfiguredStatus, DeviceState, DeviceType, INSTALLER_MEDIA_LABEL, find_parent,
    merge_user_defined,
};
pub use error::{ModelError, Result};
pub use filesystem::{Filesystem, MkpartStyle, largest_filesystem_name, supported_filesystems};
pub use layout::{parse_layout, to_layout_string};
pub use lsblk::{LSBLK_ARGS, parse_block_devices_descriptor};
pub use options::{MediaOpts, SWAP_FILE_SIZE_DEFAULT, SWAPFILE_NAME};
pub use parted::{
    ByteRange, PartedPartition, PartitionTable, find_new_partition, new_standard_partitions,
};
pub use partition_types::{GptType, gpt_type_for, is_standard_mount};
pub use passphrase::{is_valid_passphrase, mapper_name_for, next_mapper_name};
pub use plan::{planned_partition_changes, swap_file_line, target_headline};
pub use size::{
    SizeUnits, bytes_with_separators, human_size, human_size_xb, human_size_xib,
    human_size_xib_precision, parse_volume_size,
};
pub use target::{
    InstallTarget, MINIMUM_DESKTOP_INSTALL_SIZE, MINIMUM_SERVER_INSTALL_SIZE,
    find_advanced_install_targets, find_all_install_targets, find_safe_install_targets,
    format_install_portion, has_advanced_swap, sort_install_targets,
};
pub use validate::{
    advanced_partitions, advanced_partitions_require_encryption,
    desktop_validate_advanced_partitions, desktop_validate_partitions,
    server_validate_advanced_partitions, server_validate_partitions, validate_advanced_partitions,
    validate_partitions,
};
