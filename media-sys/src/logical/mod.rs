// SPDX-License-Identifier: GPL-3.0-only

pub mod lvm_tools;
pub mod mdadm_tools;

pub use lvm_tools::process_physical_volume;
pub use mdadm_tools::remove_raid_member;
