// SPDX-License-Identifier: GPL-3.0-only

//! Install target discovery
//!
//! Three policies turn a scanned device list into candidates:
//! [`find_safe_install_targets`] only proposes GPT (or blank) disks with room
//! left, [`find_all_install_targets`] offers every big enough disk for a full
//! erase, and [`find_advanced_install_targets`] follows `CLR_*` partition
//! labels written by the user ahead of time.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::device::{BlockDevice, DeviceType};
use crate::messages;
use crate::size::{GB, human_size_xib_precision};

/// Smallest root for a server install.
pub const MINIMUM_SERVER_INSTALL_SIZE: u64 = 4 * GB;

/// Smallest root for a desktop install.
pub const MINIMUM_DESKTOP_INSTALL_SIZE: u64 = 20 * GB;

/// Boot partition size added on top of the root size by the safe policies.
pub const BOOT_SIZE_DEFAULT: u64 = 150 * 1000 * 1000;

/// GPT allows 128 entries; keep room for boot, swap and root.
pub const MAX_EXISTING_PARTITIONS: usize = 125;

const DEFAULT_FS_TYPE: &str = "ext4";
const DEFAULT_BOOT_FS_TYPE: &str = "vfat";

/// A disk, or a region of one, an install can go to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InstallTarget {
    pub name: String,
    /// Model string shown to the user.
    pub friendly: String,
    pub whole_disk: bool,
    pub removable: bool,
    /// A new partition table is written.
    pub erase_disk: bool,
    /// Existing data is lost without a full erase.
    pub data_loss: bool,
    pub advanced: bool,
    pub free_start: u64,
    pub free_end: u64,
}

impl InstallTarget {
    pub fn free_size(&self) -> u64 {
        self.free_end.saturating_sub(self.free_start)
    }
}

/// Order: fixed before removable, whole disk before partial, then larger
/// free region first. Equal candidates keep scan order.
pub fn sort_install_targets(targets: &mut [InstallTarget]) {
    targets.sort_by(|a, b| {
        a.removable
            .cmp(&b.removable)
            .then(b.whole_disk.cmp(&a.whole_disk))
            .then(b.free_size().cmp(&a.free_size()))
    });
}

fn safe_table_type(bd: &BlockDevice) -> bool {
    if bd.pt_type != "gpt" && !bd.pt_type.is_empty() {
        tracing::debug!(
            "find_safe_install_targets: ignoring disk {} with partition table type {}",
            bd.name,
            bd.pt_type
        );
        return false;
    }
    if bd.children.len() > MAX_EXISTING_PARTITIONS {
        tracing::debug!(
            "find_safe_install_targets: ignoring disk {} with too many partitions ({})",
            bd.name,
            bd.children.len()
        );
        return false;
    }
    true
}

/// Candidates that keep existing data: blank disks as a whole, or the largest
/// free region of a GPT disk when it fits `root_size` plus a boot partition.
pub fn find_safe_install_targets(root_size: u64, medias: &[BlockDevice]) -> Vec<InstallTarget> {
    let min_size = root_size + BOOT_SIZE_DEFAULT;
    let min_size_str = human_size_xib_precision(min_size, 1);
    let mut targets = Vec::new();

    for curr in medias.iter().filter(|bd| safe_table_type(bd)) {
        if curr.size < min_size {
            tracing::debug!(
                "find_safe_install_targets: media {} ({}) smaller than minimum {}",
                curr.name,
                human_size_xib_precision(curr.size, 1),
                min_size_str
            );
            continue;
        }

        if curr.children.is_empty() {
            tracing::debug!("find_safe_install_targets: found whole disk {}", curr.name);
            targets.push(InstallTarget {
                name: curr.name.clone(),
                friendly: curr.model.clone(),
                whole_disk: true,
                removable: curr.removable,
                free_start: 0,
                free_end: curr.size,
                ..Default::default()
            });
            continue;
        }

        let free = curr.largest_contiguous_free_space(min_size);
        if free.is_empty() {
            tracing::debug!(
                "find_safe_install_targets: media {} lacks {} of unallocated space",
                curr.name,
                min_size_str
            );
            continue;
        }

        tracing::debug!(
            "find_safe_install_targets: room on disk {}: {} to {}",
            curr.name,
            free.start,
            free.end
        );
        targets.push(InstallTarget {
            name: curr.name.clone(),
            friendly: curr.model.clone(),
            removable: curr.removable,
            free_start: free.start,
            free_end: free.end,
            ..Default::default()
        });
    }

    sort_install_targets(&mut targets);
    targets
}

/// Every disk large enough, offered as a destructive whole-disk install.
pub fn find_all_install_targets(root_size: u64, medias: &[BlockDevice]) -> Vec<InstallTarget> {
    let min_size = root_size + BOOT_SIZE_DEFAULT;
    let mut targets = Vec::new();

    for curr in medias {
        if curr.size < min_size {
            tracing::debug!(
                "find_all_install_targets: media {} ({}) smaller than minimum {}",
                curr.name,
                human_size_xib_precision(curr.size, 1),
                human_size_xib_precision(min_size, 1)
            );
            continue;
        }

        tracing::debug!("find_all_install_targets: found whole disk {}", curr.name);
        targets.push(InstallTarget {
            name: curr.name.clone(),
            friendly: curr.model.clone(),
            whole_disk: true,
            removable: curr.removable,
            erase_disk: true,
            free_start: 0,
            free_end: curr.size,
            ..Default::default()
        });
    }

    sort_install_targets(&mut targets);
    targets
}

/// Keyword found in a `CLR_*` partition label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabelKeyword {
    Boot,
    Root,
    Swap,
    /// `MNT_<path>`, holding the text after `MNT_` as written.
    Mount(String),
    /// `F`, reformat the partition.
    Format,
}

/// Keywords of a partition label, in order.
///
/// Tokens are split on `_` and matched case-insensitively; nothing counts
/// until a `CLR` token has been seen.
pub fn parse_label_keywords(label: &str) -> Vec<LabelKeyword> {
    let mut keywords = Vec::new();
    let mut clr_found = false;

    for part in label.split('_') {
        let lower = part.to_lowercase();
        if !clr_found {
            clr_found = lower == "clr";
            continue;
        }

        match lower.as_str() {
            "boot" => keywords.push(LabelKeyword::Boot),
            "root" => keywords.push(LabelKeyword::Root),
            "swap" => keywords.push(LabelKeyword::Swap),
            "mnt" => {
                let pieces: Vec<&str> = label.split("MNT_").collect();
                if pieces.len() == 2 {
                    keywords.push(LabelKeyword::Mount(pieces[1].to_string()));
                }
            }
            "f" => keywords.push(LabelKeyword::Format),
            _ => {}
        }
    }

    keywords
}

/// Lexically clean an absolute path; `None` for relative paths.
pub(crate) fn clean_absolute_path(path: &str) -> Option<String> {
    if !path.starts_with('/') {
        return None;
    }

    let mut clean = PathBuf::from("/");
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::ParentDir => {
                clean.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    Some(clean.to_string_lossy().into_owned())
}

fn default_fs_type(ch: &mut BlockDevice, fs_type: &str) {
    if ch.fs_type.is_empty() {
        tracing::debug!(
            "find_advanced_install_targets: no fstype set for {}, defaulting to {} and formatting",
            ch.name,
            fs_type
        );
        ch.fs_type = fs_type.to_string();
        ch.format_partition = true;
    }
}

/// Apply the label keywords of one child. Returns true when the child was
/// claimed for the install.
fn apply_label(parent_type: DeviceType, ch: &mut BlockDevice) -> bool {
    if !ch.part_label.is_empty() {
        tracing::debug!(
            "find_advanced_install_targets: found partition {} with name {}",
            ch.name,
            ch.part_label
        );
    }

    let mut claimed = false;
    for keyword in parse_label_keywords(&ch.part_label) {
        match keyword {
            LabelKeyword::Boot => {
                if parent_type.is_raid() || parent_type == DeviceType::Lvm2Volume {
                    continue;
                }
                if ch.device_type == DeviceType::Crypt {
                    tracing::warn!("find_advanced_install_targets: /boot can not be encrypted, skipping");
                    ch.device_type = DeviceType::Part;
                }
                tracing::debug!("find_advanced_install_targets: boot is {}", ch.name);
                ch.labeled_advanced = true;
                default_fs_type(ch, DEFAULT_BOOT_FS_TYPE);
                ch.mount_point = "/boot".to_string();
                claimed = true;
            }
            LabelKeyword::Root => {
                tracing::debug!("find_advanced_install_targets: root is {}", ch.name);
                ch.labeled_advanced = true;
                default_fs_type(ch, DEFAULT_FS_TYPE);
                ch.mount_point = "/".to_string();
                claimed = true;
            }
            LabelKeyword::Swap => {
                tracing::debug!("find_advanced_install_targets: swap on {}", ch.name);
                ch.labeled_advanced = true;
                default_fs_type(ch, "swap");
                claimed = true;
            }
            LabelKeyword::Mount(path) => {
                if let Some(path) = clean_absolute_path(&path) {
                    tracing::debug!(
                        "find_advanced_install_targets: extra mount {:?} for {}",
                        path,
                        ch.name
                    );
                    ch.mount_point = path;
                    ch.labeled_advanced = true;
                    default_fs_type(ch, DEFAULT_FS_TYPE);
                    claimed = true;
                }
            }
            LabelKeyword::Format => {
                tracing::debug!("find_advanced_install_targets: format partition {} enabled", ch.name);
                ch.format_partition = true;
            }
        }
    }

    claimed
}

/// Devices carrying `CLR_*` labelled partitions, with mount points and
/// filesystems filled in from the labels.
///
/// Children of children (LVM volumes, RAID arrays) are scanned too and
/// reported as devices of their own. Running this again on its own output
/// changes nothing.
pub fn find_advanced_install_targets(medias: &[BlockDevice]) -> Vec<BlockDevice> {
    let mut found = Vec::new();

    for curr in medias {
        let mut install = curr.clone();
        let mut claimed = false;

        for ch in &mut install.children {
            claimed |= apply_label(curr.device_type, ch);

            if !ch.children.is_empty() {
                found.extend(find_advanced_install_targets(&ch.children));
            }
        }

        if claimed {
            found.push(install);
        }
    }

    found
}

/// True when an advanced device carries a `CLR_SWAP` partition.
pub fn has_advanced_swap(medias: &[BlockDevice]) -> bool {
    let has_swap = medias.iter().any(|curr| {
        curr.children
            .iter()
            .any(|ch| ch.labeled_advanced && ch.part_label == "CLR_SWAP")
    });
    tracing::debug!("has_advanced_swap: {has_swap}");
    has_swap
}

/// Short description of how much of the disk an install takes.
pub fn format_install_portion(target: &InstallTarget) -> String {
    let portion = if target.advanced {
        if target.erase_disk {
            String::new()
        } else {
            messages::portion_advanced()
        }
    } else if target.whole_disk || target.erase_disk {
        messages::portion_entire_disk()
    } else {
        messages::portion_partial()
    };

    if portion.is_empty() {
        String::new()
    } else {
        format!("[{portion}]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parted::{PartedPartition, PartitionTable};
    use crate::size::GIB;

    fn disk(name: &str, size: u64) -> BlockDevice {
        BlockDevice {
            name: name.to_string(),
            model: format!("{name} model"),
            size,
            device_type: DeviceType::Disk,
            ..Default::default()
        }
    }

    fn labeled(name: &str, part_label: &str) -> BlockDevice {
        BlockDevice {
            name: name.to_string(),
            part_label: part_label.to_string(),
            size: GIB,
            device_type: DeviceType::Part,
            ..Default::default()
        }
    }

    #[test]
    fn safe_targets_filter_and_order() {
        let blank = disk("sda", 64 * GIB);

        let mut removable = disk("sdb", 64 * GIB);
        removable.removable = true;

        let mut msdos = disk("sdc", 64 * GIB);
        msdos.pt_type = "dos".to_string();

        let small = disk("sdd", GIB);

        let mut partial = disk("sde", 100 * GIB);
        partial.pt_type = "gpt".to_string();
        partial.children.push(labeled("sde1", ""));
        partial.part_table = PartitionTable::new(vec![
            PartedPartition {
                number: 1,
                start: 0,
                end: GIB - 1,
                size: GIB,
                ..Default::default()
            },
            PartedPartition::free(GIB, 100 * GIB - 1, 99 * GIB),
        ]);

        let mut full = disk("sdf", 100 * GIB);
        full.children.push(labeled("sdf1", ""));

        let medias = vec![removable, msdos, small, partial, blank, full];
        let targets = find_safe_install_targets(MINIMUM_SERVER_INSTALL_SIZE, &medias);
        let names: Vec<&str> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["sda", "sde", "sdb"]);

        assert!(targets[0].whole_disk);
        assert!(!targets[0].erase_disk);
        assert!(!targets[1].whole_disk);
        assert_eq!(targets[1].free_start, GIB);
        assert_eq!(targets[1].free_end, 100 * GIB - 1);
        assert!(targets[2].removable);
    }

    #[test]
    fn too_many_partitions_is_unsafe() {
        let mut crowded = disk("sda", 64 * GIB);
        for n in 1..=126 {
            crowded.children.push(labeled(&format!("sda{n}"), ""));
        }
        assert!(find_safe_install_targets(MINIMUM_SERVER_INSTALL_SIZE, &[crowded]).is_empty());
    }

    #[test]
    fn all_targets_erase_everything() {
        let mut msdos = disk("sda", 64 * GIB);
        msdos.pt_type = "dos".to_string();
        msdos.children.push(labeled("sda1", ""));
        let small = disk("sdb", GIB);

        let targets = find_all_install_targets(MINIMUM_DESKTOP_INSTALL_SIZE, &[msdos, small]);
        assert_eq!(targets.len(), 1);
        assert!(targets[0].erase_disk && targets[0].whole_disk);
        assert_eq!(targets[0].free_end, 64 * GIB);
        assert_eq!(format_install_portion(&targets[0]), "[Entire Disk]");
    }

    #[test]
    fn sort_is_stable() {
        let make = |name: &str| InstallTarget {
            name: name.to_string(),
            whole_disk: true,
            free_end: 10,
            ..Default::default()
        };
        let mut targets = vec![make("b"), make("a"), make("c")];
        sort_install_targets(&mut targets);
        let names: Vec<&str> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn label_keywords_need_clr_first() {
        assert!(parse_label_keywords("BOOT_CLR").is_empty());
        assert_eq!(
            parse_label_keywords("CLR_ROOT_F"),
            vec![LabelKeyword::Root, LabelKeyword::Format]
        );
        assert_eq!(parse_label_keywords("clr_swap"), vec![LabelKeyword::Swap]);
        assert_eq!(
            parse_label_keywords("CLR_MNT_/srv/data"),
            vec![LabelKeyword::Mount("/srv/data".to_string())]
        );
        assert_eq!(clean_absolute_path("/srv/../home/./x/"), Some("/home/x".to_string()));
        assert_eq!(clean_absolute_path("home"), None);
    }

    #[test]
    fn advanced_labels_make_one_target() {
        let mut sda = disk("sda", 64 * GIB);
        sda.children = vec![
            labeled("sda1", "CLR_BOOT"),
            labeled("sda2", "CLR_SWAP"),
            labeled("sda3", "CLR_ROOT"),
            labeled("sda4", "CLR_MNT_/home"),
        ];
        let other = disk("sdb", 64 * GIB);

        let targets = find_advanced_install_targets(&[sda, other]);
        assert_eq!(targets.len(), 1);

        let t = &targets[0];
        assert!(t.is_advanced_configuration());
        let summary: Vec<(&str, &str, bool)> = t
            .children
            .iter()
            .map(|c| (c.mount_point.as_str(), c.fs_type.as_str(), c.format_partition))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("/boot", "vfat", true),
                ("", "swap", true),
                ("/", "ext4", true),
                ("/home", "ext4", true),
            ]
        );
        assert!(has_advanced_swap(&targets));
    }

    #[test]
    fn advanced_discovery_is_idempotent() {
        let mut sda = disk("sda", 64 * GIB);
        let mut root = labeled("sda1", "CLR_ROOT");
        root.fs_type = "xfs".to_string();
        sda.children = vec![root, labeled("sda2", "CLR_MNT_/srv/")];

        let first = find_advanced_install_targets(&[sda]);
        let second = find_advanced_install_targets(&first);
        assert_eq!(first, second);
        assert_eq!(second[0].children[0].fs_type, "xfs");
        assert!(!second[0].children[0].format_partition);
        assert_eq!(second[0].children[1].mount_point, "/srv");
    }

    #[test]
    fn advanced_boot_rules() {
        let mut crypt_boot = labeled("sda1", "CLR_BOOT");
        crypt_boot.device_type = DeviceType::Crypt;
        let mut sda = disk("sda", 64 * GIB);
        sda.children = vec![crypt_boot];

        let targets = find_advanced_install_targets(&[sda]);
        assert_eq!(targets[0].children[0].device_type, DeviceType::Part);

        let mut md = disk("md0", 64 * GIB);
        md.device_type = DeviceType::Raid1;
        md.children = vec![labeled("md0p1", "CLR_BOOT")];
        assert!(find_advanced_install_targets(&[md]).is_empty());
    }

    #[test]
    fn nested_volumes_are_reported() {
        let mut pv = labeled("sda2", "");
        pv.fs_type = "LVM2_member".to_string();
        let mut lv_parent = labeled("vg0", "");
        lv_parent.device_type = DeviceType::Lvm2Volume;
        lv_parent.children = vec![labeled("vg0-data", "CLR_MNT_/data")];
        pv.children = vec![lv_parent];

        let mut sda = disk("sda", 64 * GIB);
        sda.children = vec![labeled("sda1", "CLR_ROOT"), pv];

        let targets = find_advanced_install_targets(&[sda]);
        let names: Vec<&str> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["vg0", "sda"]);
        assert_eq!(targets[0].children[0].mount_point, "/data");
    }

    #[test]
    fn install_portion_text() {
        let mut target = InstallTarget::default();
        assert_eq!(format_install_portion(&target), "[Partial]");
        target.advanced = true;
        assert_eq!(format_install_portion(&target), "[Advanced]");
        target.erase_disk = true;
        assert_eq!(format_install_portion(&target), "");
    }
}
