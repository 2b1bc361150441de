// SPDX-License-Identifier: GPL-3.0-only

//! Install policy checks
//!
//! Validation never fails with an `Err`: every problem becomes one line of
//! text so a frontend can show them all and ask again.

use std::collections::HashSet;

use crate::device::{BlockDevice, DeviceType};
use crate::filesystem::Filesystem;
use crate::messages;
use crate::options::{MediaOpts, SWAP_FILE_SIZE_DEFAULT};
use crate::size::{GIB, MB, MIB, human_size_xib_precision, parse_volume_size};
use crate::target::{
    LabelKeyword, MINIMUM_DESKTOP_INSTALL_SIZE, MINIMUM_SERVER_INSTALL_SIZE, clean_absolute_path,
    parse_label_keywords,
};

/// Smallest `/boot`, room for a handful of kernels.
pub const MIN_BOOT_SIZE: u64 = 100 * MB;
pub const MIN_SWAP_SIZE: u64 = 32 * MIB;
pub const MAX_SWAP_SIZE: u64 = 8 * GIB;

/// Names used for the partition roles in messages.
#[derive(Clone, Copy, Debug)]
struct Labels {
    boot: &'static str,
    root: &'static str,
    swap: &'static str,
    var: &'static str,
}

const STANDARD_LABELS: Labels = Labels {
    boot: "/boot",
    root: "/ (root)",
    swap: "[swap]",
    var: "/var",
};

const ADVANCED_LABELS: Labels = Labels {
    boot: "CLR_BOOT",
    root: "CLR_ROOT",
    swap: "CLR_SWAP",
    var: "CLR_MNT_/var",
};

fn warning(bd: Option<&BlockDevice>, message: String) -> String {
    match bd {
        Some(bd) => tracing::warn!("validate_partitions: {message} ({})", bd.name),
        None => tracing::warn!("validate_partitions: {message}"),
    }
    message
}

fn must_be(bd: Option<&BlockDevice>, before: &str, after: &str) -> String {
    warning(bd, messages::must_be(before, after))
}

fn must_be_at_least(bd: &BlockDevice, size: u64, label: &str) -> String {
    must_be(
        Some(bd),
        label,
        &format!(">= {}", human_size_xib_precision(size, 1)),
    )
}

fn missing(label: &str) -> String {
    warning(None, messages::missing_partition(label))
}

fn size_check_skipped(bd: &BlockDevice, skip_size: bool, label: &str) -> bool {
    if bd.size == 0 {
        tracing::warn!("validate_partitions: skipping {label} size check due to zero size");
        true
    } else if skip_size {
        tracing::warn!("validate_partitions: skipping {label} size check due to skip_size");
        true
    } else {
        false
    }
}

fn validate_boot(found: &mut bool, bd: &BlockDevice, skip_size: bool, label: &str) -> Vec<String> {
    let mut results = Vec::new();

    if *found {
        results.push(warning(
            Some(bd),
            messages::multiple_partitions(label),
        ));
    } else {
        *found = true;
        if bd.fs_type != "vfat" {
            results.push(must_be(Some(bd), label, "vfat"));
        }
    }

    if !size_check_skipped(bd, skip_size, label) && bd.size < MIN_BOOT_SIZE {
        results.push(must_be_at_least(bd, MIN_BOOT_SIZE, label));
    }

    results
}

fn validate_root(
    found: &mut bool,
    bd: &BlockDevice,
    min_root_size: u64,
    skip_size: bool,
    label: &str,
) -> Vec<String> {
    let mut results = Vec::new();

    if *found {
        results.push(warning(
            Some(bd),
            messages::multiple_partitions(label),
        ));
    } else {
        *found = true;
        let supported = Filesystem::parse(&bd.fs_type).is_ok_and(|fs| fs.can_host_root());
        if !supported {
            results.push(must_be(Some(bd), label, "ext*|xfs|f2fs"));
        }
    }

    if !size_check_skipped(bd, skip_size, label) && bd.size < min_root_size {
        results.push(must_be_at_least(bd, min_root_size, label));
    }

    results
}

/// Swap partition bounds apply even when size checks are skipped.
fn validate_swap(found: &mut bool, bd: &BlockDevice, label: &str) -> Vec<String> {
    *found = true;

    if bd.size == 0 {
        tracing::warn!("validate_partitions: skipping swap size check due to zero size");
        return Vec::new();
    }

    if bd.size < MIN_SWAP_SIZE {
        vec![must_be_at_least(bd, MIN_SWAP_SIZE, label)]
    } else if bd.size > MAX_SWAP_SIZE {
        vec![must_be(
            Some(bd),
            label,
            &format!("<= {}", human_size_xib_precision(MAX_SWAP_SIZE, 1)),
        )]
    } else {
        Vec::new()
    }
}

/// Without `/boot` the machine can only boot legacy BIOS from the root.
fn validate_boot_legacy(root: Option<&BlockDevice>, labels: Labels, opts: &MediaOpts) -> Vec<String> {
    if !opts.legacy_bios {
        return vec![missing(labels.boot)];
    }

    let mut results = Vec::new();
    if let Some(root) = root {
        if !Filesystem::parse(&root.fs_type).is_ok_and(|fs| fs.is_ext()) {
            tracing::warn!(
                "validate_partitions: legacy mode, invalid fstype: {}",
                root.fs_type
            );
            results.push(must_be(Some(root), labels.root, "ext[234]"));
        }
        if root.device_type == DeviceType::Crypt {
            tracing::warn!("validate_partitions: legacy mode without /boot can not be encrypted");
            results.push(warning(
                Some(root),
                messages::encryption_unsupported(labels.root),
            ));
        }
    }
    results
}

fn validate_var_partition(root: Option<&BlockDevice>, skip_size: bool, var_size: u64) -> Vec<String> {
    tracing::warn!(
        "validate_partitions: an independent /var is discouraged, the update cache lives there"
    );

    let Some(root) = root else {
        return Vec::new();
    };
    if skip_size {
        return Vec::new();
    }

    let root70 = (root.size as f64 * 0.7) as u64;
    if var_size < root70 {
        vec![must_be(
            None,
            &format!("/var ({})", human_size_xib_precision(var_size, 1)),
            &format!(">= 70% / ({})", human_size_xib_precision(root70, 1)),
        )]
    } else {
        Vec::new()
    }
}

fn validate_swap_file(
    opts: &MediaOpts,
    root: Option<&BlockDevice>,
    var: Option<u64>,
) -> Vec<String> {
    let requested = opts.swap_file_size.as_deref().unwrap_or_default();
    let swap_size = if requested.is_empty() {
        SWAP_FILE_SIZE_DEFAULT
    } else {
        match parse_volume_size(requested) {
            Ok(size) => size,
            Err(_) => return vec![warning(None, messages::unreadable_size(requested))],
        }
    };

    let Some(root) = root else {
        return Vec::new();
    };

    let (host, host_size) = match var {
        Some(size) => ("/var", size),
        None => ("/", root.size),
    };
    let swap_str = human_size_xib_precision(swap_size, 1);
    let subject = format!("swapfile ({swap_str})");
    let mut results = Vec::new();

    if swap_size >= host_size {
        results.push(must_be(
            None,
            &subject,
            &format!("< {host} ({})", human_size_xib_precision(host_size, 1)),
        ));
    }

    if opts.skip_validation_size {
        return results;
    }

    if swap_size < MIN_SWAP_SIZE {
        results.push(must_be(
            None,
            &subject,
            &format!(">= {}", human_size_xib_precision(MIN_SWAP_SIZE, 1)),
        ));
    } else if swap_size > MAX_SWAP_SIZE {
        results.push(must_be(
            None,
            &subject,
            &format!("<= {}", human_size_xib_precision(MAX_SWAP_SIZE, 3)),
        ));
    }

    let half = host_size / 2;
    if swap_size > half {
        results.push(must_be(
            None,
            &subject,
            &format!("<= 50% {host} ({})", human_size_xib_precision(half, 1)),
        ));
    }

    results
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Boot,
    Root,
    Swap,
    Var,
}

fn roles(bd: &BlockDevice, advanced: bool) -> Vec<Role> {
    let keywords = if advanced {
        parse_label_keywords(&bd.part_label)
    } else {
        Vec::new()
    };
    let has = |k: &LabelKeyword| keywords.contains(k);

    let mut roles = Vec::new();
    if bd.mount_point == "/boot" || has(&LabelKeyword::Boot) {
        roles.push(Role::Boot);
    }
    if bd.mount_point == "/" || has(&LabelKeyword::Root) {
        roles.push(Role::Root);
    }
    if bd.fs_type == "swap" || has(&LabelKeyword::Swap) {
        roles.push(Role::Swap);
    }
    if bd.mount_point == "/var" || has(&LabelKeyword::Mount("/var".to_string())) {
        roles.push(Role::Var);
    }
    roles
}

/// Check the children of every selected device against the install policy.
///
/// In advanced mode partitions are also classified by their `CLR_*` label
/// and messages name the labels instead of the mount points.
pub fn validate_partitions(
    min_root_size: u64,
    medias: &[BlockDevice],
    opts: &MediaOpts,
    advanced: bool,
) -> Vec<String> {
    if medias.is_empty() {
        return vec![messages::no_media_selected()];
    }

    let labels = if advanced {
        ADVANCED_LABELS
    } else {
        STANDARD_LABELS
    };
    let skip_size = opts.skip_validation_size;

    let mut results = Vec::new();
    let mut boot_found = false;
    let mut root_found = false;
    let mut swap_found = false;
    let mut root: Option<&BlockDevice> = None;
    let mut var: Option<u64> = None;

    for ch in medias.iter().flat_map(|curr| curr.children.iter()) {
        for role in roles(ch, advanced) {
            match role {
                Role::Boot => {
                    results.extend(validate_boot(&mut boot_found, ch, skip_size, labels.boot))
                }
                Role::Root => {
                    let first = !root_found;
                    results.extend(validate_root(
                        &mut root_found,
                        ch,
                        min_root_size,
                        skip_size,
                        labels.root,
                    ));
                    if first {
                        root = Some(ch);
                    }
                }
                Role::Swap => results.extend(validate_swap(&mut swap_found, ch, labels.swap)),
                Role::Var => var = Some(ch.size),
            }
        }
    }

    if root.is_none() {
        results.push(missing(labels.root));
    }

    if !boot_found {
        results.extend(validate_boot_legacy(root, labels, opts));
    }

    if let Some(var_size) = var {
        tracing::debug!("validate_partitions: {} found", labels.var);
        results.extend(validate_var_partition(root, skip_size, var_size));
    }

    if !swap_found || opts.swap_file_set {
        results.extend(validate_swap_file(opts, root, var));
    }

    results
}

pub fn server_validate_partitions(medias: &[BlockDevice], opts: &MediaOpts) -> Vec<String> {
    validate_partitions(MINIMUM_SERVER_INSTALL_SIZE, medias, opts, false)
}

pub fn desktop_validate_partitions(medias: &[BlockDevice], opts: &MediaOpts) -> Vec<String> {
    validate_partitions(MINIMUM_DESKTOP_INSTALL_SIZE, medias, opts, false)
}

pub fn server_validate_advanced_partitions(medias: &[BlockDevice], opts: &MediaOpts) -> Vec<String> {
    validate_advanced_partitions(MINIMUM_SERVER_INSTALL_SIZE, medias, opts)
}

pub fn desktop_validate_advanced_partitions(
    medias: &[BlockDevice],
    opts: &MediaOpts,
) -> Vec<String> {
    validate_advanced_partitions(MINIMUM_DESKTOP_INSTALL_SIZE, medias, opts)
}

fn has_mount_keyword(label: &str) -> bool {
    label
        .split('_')
        .map(str::to_lowercase)
        .skip_while(|part| part != "clr")
        .skip(1)
        .any(|part| part == "mnt")
}

/// Reason a `CLR_MNT_` label is unusable, if any.
fn invalid_mount_label(label: &str, seen: &mut HashSet<String>) -> Option<&'static str> {
    let mut reason = None;

    let pieces: Vec<&str> = label.split("MNT_").collect();
    if pieces.len() != 2 {
        reason = Some("too many parts");
    } else if !pieces[1].starts_with('/') {
        reason = Some("must start with '/'");
    } else if clean_absolute_path(pieces[1]).is_none() {
        reason = Some("must be an absolute path");
    }

    if !seen.insert(label.to_uppercase()) {
        reason = reason.or(Some("found duplicate partition label"));
    }

    reason
}

/// Advanced mode validation: the regular checks plus `CLR_MNT_` label rules.
pub fn validate_advanced_partitions(
    min_root_size: u64,
    medias: &[BlockDevice],
    opts: &MediaOpts,
) -> Vec<String> {
    let mut results = validate_partitions(min_root_size, medias, opts, true);
    let mut seen = HashSet::new();

    for ch in medias.iter().flat_map(|curr| curr.children.iter()) {
        let label = &ch.part_label;
        if !has_mount_keyword(label) {
            continue;
        }
        if let Some(reason) = invalid_mount_label(label, &mut seen) {
            let message = messages::invalid_partition_label(label);
            tracing::warn!("validate_advanced_partitions: {message} {} ({reason})", ch.name);
            results.push(message);
        }
    }

    results
}

/// True when a labelled partition other than the boot one is encrypted and a
/// passphrase will have to be asked for.
pub fn advanced_partitions_require_encryption(medias: &[BlockDevice]) -> bool {
    let required = medias
        .iter()
        .flat_map(|curr| curr.children.iter())
        .filter(|ch| ch.device_type == DeviceType::Crypt && ch.fs_type_not_swap())
        .any(|ch| {
            let keywords = parse_label_keywords(&ch.part_label);
            !keywords.is_empty() && !keywords.contains(&LabelKeyword::Boot)
        });

    if required {
        tracing::debug!(
            "advanced_partitions_require_encryption: found a partition which requires encryption"
        );
    }
    required
}

/// `<name>:<mount point>` (or `<name>:<fstype>`) for every usable advanced
/// partition; encrypted ones are marked with `*`.
pub fn advanced_partitions(medias: &[BlockDevice]) -> Vec<String> {
    let format = |ch: &BlockDevice, fs_type: &str| {
        let mut name = if ch.mount_point.is_empty() {
            format!("{}:{}", ch.name, fs_type)
        } else {
            format!("{}:{}", ch.name, ch.mount_point)
        };
        if ch.device_type == DeviceType::Crypt {
            name.push('*');
        }
        name
    };

    let mut results = Vec::new();
    for ch in medias.iter().flat_map(|curr| curr.children.iter()) {
        let label = ch.part_label.as_str();

        if label.starts_with("CLR_BOOT") && ch.mount_point == "/boot" {
            let mut found = false;
            if validate_boot(&mut found, ch, false, "CLR_BOOT").is_empty() {
                results.push(format(ch, &ch.fs_type));
            }
        }
        if label.starts_with("CLR_SWAP") {
            let mut found = false;
            if validate_swap(&mut found, ch, "CLR_SWAP").is_empty() {
                results.push(format(ch, "swap"));
            }
        }
        if label.starts_with("CLR_ROOT") {
            let mut found = false;
            if validate_root(&mut found, ch, 0, false, "CLR_ROOT").is_empty() {
                results.push(format(ch, &ch.fs_type));
            }
        }
        if label.starts_with("CLR_MNT_/") {
            results.push(format(ch, &ch.fs_type));
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size::GB;
    use crate::target::find_advanced_install_targets;

    fn part(name: &str, fs_type: &str, mount_point: &str, size: u64) -> BlockDevice {
        BlockDevice {
            name: name.to_string(),
            fs_type: fs_type.to_string(),
            mount_point: mount_point.to_string(),
            size,
            device_type: DeviceType::Part,
            ..Default::default()
        }
    }

    fn disk(children: Vec<BlockDevice>) -> BlockDevice {
        BlockDevice {
            name: "sda".to_string(),
            size: 64 * GB,
            device_type: DeviceType::Disk,
            children,
            ..Default::default()
        }
    }

    fn oversized_swap_layout() -> Vec<BlockDevice> {
        let swap_size = parse_volume_size("8.1GiB").unwrap();
        vec![disk(vec![
            part("sda1", "vfat", "/boot", 150 * MB),
            part("sda2", "ext4", "/", 20 * GB),
            part("sda3", "ext4", "/var", 15 * GB),
            part("sda4", "swap", "", swap_size),
        ])]
    }

    #[test]
    fn oversized_swap_and_swapfile() {
        let medias = oversized_swap_layout();
        let opts = MediaOpts::default().with_swap_file("8.1GiB");

        let results = desktop_validate_partitions(&medias, &opts);
        assert_eq!(results.len(), 3, "{results:?}");
        assert_eq!(results[0], "[swap] must be <= 8GiB");
        assert!(results[1].starts_with("swapfile (8.1GiB) must be <= 8GiB"));
        assert!(results[2].starts_with("swapfile (8.1GiB) must be <= 50% /var"));

        let skip = MediaOpts {
            skip_validation_size: true,
            ..opts
        };
        let results = desktop_validate_partitions(&medias, &skip);
        assert_eq!(results, vec!["[swap] must be <= 8GiB".to_string()]);
    }

    #[test]
    fn valid_layout_has_no_errors() {
        let medias = vec![disk(vec![
            part("sda1", "vfat", "/boot", 150 * MB),
            part("sda2", "swap", "", 256 * MB),
            part("sda3", "ext4", "/", 30 * GB),
        ])];
        assert!(desktop_validate_partitions(&medias, &MediaOpts::default()).is_empty());
    }

    #[test]
    fn empty_selection() {
        assert_eq!(
            server_validate_partitions(&[], &MediaOpts::default()),
            vec!["No Media Selected".to_string()]
        );
    }

    #[test]
    fn boot_and_root_problems() {
        let medias = vec![disk(vec![
            part("sda1", "ext4", "/boot", 50 * MB),
            part("sda2", "vfat", "/boot", 150 * MB),
            part("sda3", "btrfs", "/", 10 * GB),
        ])];
        let results = server_validate_partitions(&medias, &MediaOpts::default());

        assert!(results.contains(&"/boot must be vfat".to_string()));
        assert!(results.iter().any(|r| r.starts_with("/boot must be >= ")));
        assert!(results.contains(&"Found multiple /boot partitions".to_string()));
        assert!(results.contains(&"/ (root) must be ext*|xfs|f2fs".to_string()));
    }

    #[test]
    fn missing_partitions() {
        let medias = vec![disk(vec![part("sda1", "swap", "", 256 * MB)])];
        let results = server_validate_partitions(&medias, &MediaOpts::default());
        assert_eq!(
            results,
            vec![
                "Missing / (root) partition".to_string(),
                "Missing /boot partition".to_string(),
            ]
        );
    }

    #[test]
    fn legacy_bios_root_rules() {
        let mut root = part("sda1", "xfs", "/", 30 * GB);
        root.device_type = DeviceType::Crypt;
        let medias = vec![disk(vec![root, part("sda2", "swap", "", 256 * MB)])];
        let opts = MediaOpts {
            legacy_bios: true,
            ..Default::default()
        };

        let results = desktop_validate_partitions(&medias, &opts);
        assert_eq!(
            results,
            vec![
                "/ (root) must be ext[234]".to_string(),
                "Encryption of / (root) is not supported".to_string(),
            ]
        );
    }

    #[test]
    fn small_var_and_bad_swapfile() {
        let medias = vec![disk(vec![
            part("sda1", "vfat", "/boot", 150 * MB),
            part("sda2", "ext4", "/", 30 * GB),
            part("sda3", "ext4", "/var", 10 * GB),
        ])];

        let results = desktop_validate_partitions(&medias, &MediaOpts::default());
        assert_eq!(results.len(), 1, "{results:?}");
        assert!(results[0].starts_with("/var (9.3GiB) must be >= 70% / ("));

        let opts = MediaOpts::default().with_swap_file("lots");
        let results = desktop_validate_partitions(&medias, &opts);
        assert!(results.contains(&"Could not interpret lots".to_string()));
    }

    #[test]
    fn advanced_labels_classify_four_roles() {
        let labeled = |name: &str, label: &str, size: u64| BlockDevice {
            name: name.to_string(),
            part_label: label.to_string(),
            size,
            device_type: DeviceType::Part,
            ..Default::default()
        };
        let medias = vec![disk(vec![
            labeled("sda1", "CLR_BOOT", 150 * MB),
            labeled("sda2", "CLR_SWAP", 256 * MB),
            labeled("sda3", "CLR_ROOT", 30 * GB),
            labeled("sda4", "CLR_MNT_/home", 10 * GB),
        ])];

        let targets = find_advanced_install_targets(&medias);
        assert_eq!(targets.len(), 1);

        let results = desktop_validate_advanced_partitions(&targets, &MediaOpts::default());
        assert!(results.is_empty(), "{results:?}");
        assert!(!advanced_partitions_require_encryption(&targets));
        assert_eq!(
            advanced_partitions(&targets),
            vec!["sda1:/boot", "sda2:swap", "sda3:/", "sda4:/home"]
        );
    }

    #[test]
    fn advanced_mount_label_rules() {
        let labeled = |name: &str, label: &str| BlockDevice {
            name: name.to_string(),
            part_label: label.to_string(),
            fs_type: "ext4".to_string(),
            size: GB,
            device_type: DeviceType::Part,
            ..Default::default()
        };
        let mut root = labeled("sda1", "CLR_ROOT");
        root.mount_point = "/".to_string();
        root.device_type = DeviceType::Crypt;
        root.size = 30 * GB;
        let mut boot = labeled("sda2", "CLR_BOOT");
        boot.fs_type = "vfat".to_string();
        boot.mount_point = "/boot".to_string();
        boot.size = 150 * MB;

        let medias = vec![disk(vec![
            root,
            boot,
            labeled("sda3", "CLR_MNT_relative"),
            labeled("sda4", "CLR_MNT_/srv"),
            labeled("sda5", "clr_mnt_/SRV"),
            labeled("sda6", "CLR_MNT_/srv"),
        ])];

        let results = desktop_validate_advanced_partitions(&medias, &MediaOpts::default());
        assert_eq!(
            results,
            vec![
                "Found invalid CLR_MNT_relative partition".to_string(),
                "Found invalid clr_mnt_/SRV partition".to_string(),
                "Found invalid CLR_MNT_/srv partition".to_string(),
            ]
        );
        assert!(advanced_partitions_require_encryption(&medias));
    }
}
