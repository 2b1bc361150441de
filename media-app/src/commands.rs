// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use media_sys::scan::load_partition_table;
use media_sys::{
    ActionSink, CommandRunner, Executor, HostRunner, InstallSession, KERNEL_ARGUMENT,
    REQUIRED_BUNDLE, ask_passphrase, available_media, create_swap_file, detach_loop_device,
    generate_tab_files, list_block_devices, make_fs, make_image, map_encrypted,
    planned_media_changes, prepare_installation_media, scan_media, setup_loop_device,
};
use media_types::size::MIB;
use media_types::{
    BlockDevice, DeviceType, InstallTarget, SWAP_FILE_SIZE_DEFAULT, advanced_partitions,
    find_advanced_install_targets, find_all_install_targets, find_safe_install_targets,
    format_install_portion, merge_user_defined, parse_layout, parse_volume_size,
    sort_install_targets, to_layout_string, validate_advanced_partitions, validate_partitions,
};

use crate::config::AppConfig;

/// Alias a layout uses for the loop device backing an image.
const IMAGE_ALIAS: &str = "image";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFormat {
    Text,
    Json,
    Layout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPolicy {
    Safe,
    All,
    Advanced,
}

/// How much of a disk named on the command line an install may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    Partial,
    Whole,
    Erase,
}

/// Parse `DISK[:whole|:erase]`; a leading `/dev/` is dropped.
pub fn parse_target(spec: &str) -> Result<(String, TargetMode)> {
    let (name, mode) = match spec.rsplit_once(':') {
        Some((name, "whole")) => (name, TargetMode::Whole),
        Some((name, "erase")) => (name, TargetMode::Erase),
        Some((_, other)) => anyhow::bail!("unknown target mode '{other}' in '{spec}'"),
        None => (spec, TargetMode::Partial),
    };

    let name = name.trim_start_matches("/dev/");
    if name.is_empty() {
        anyhow::bail!("missing device name in target '{spec}'");
    }
    Ok((name.to_string(), mode))
}

/// A partial target takes the largest free region of the disk; the layout's
/// new partitions are carved from it when the table is written.
fn install_target(media: &BlockDevice, mode: TargetMode) -> InstallTarget {
    let whole_disk = mode != TargetMode::Partial;
    let free = if whole_disk {
        Default::default()
    } else {
        media.largest_contiguous_free_space(0)
    };

    InstallTarget {
        name: media.name.clone(),
        friendly: media.model.clone(),
        whole_disk,
        removable: media.removable,
        erase_disk: mode == TargetMode::Erase,
        data_loss: whole_disk && !media.children.is_empty(),
        advanced: media.children.iter().any(|ch| ch.labeled_advanced),
        free_start: free.start,
        free_end: free.end,
    }
}

/// Match target specs against the scanned devices.
///
/// Returns the targets and the devices they name, in the same order.
pub fn select_targets(
    specs: &[String],
    medias: &[BlockDevice],
) -> Result<(Vec<InstallTarget>, Vec<BlockDevice>)> {
    let mut targets = Vec::with_capacity(specs.len());
    let mut selected = Vec::with_capacity(specs.len());

    for spec in specs {
        let (name, mode) = parse_target(spec)?;
        let media = medias
            .iter()
            .find(|bd| bd.name == name)
            .with_context(|| format!("no block device named {name}"))?;
        if selected.iter().any(|bd: &BlockDevice| bd.name == name) {
            anyhow::bail!("{name} is named more than once");
        }

        targets.push(install_target(media, mode));
        selected.push(media.clone());
    }

    Ok((targets, selected))
}

fn read_layout(path: &Path) -> Result<Vec<BlockDevice>> {
    let data =
        fs::read_to_string(path).with_context(|| format!("reading layout {}", path.display()))?;
    parse_layout(&data).with_context(|| format!("parsing layout {}", path.display()))
}

fn print_tree(bd: &BlockDevice, depth: usize) {
    println!(
        "{:indent$}{} {} {} {} {}",
        "",
        bd.name,
        bd.device_type.as_str(),
        bd.human_size(),
        bd.fs_type,
        bd.mount_point,
        indent = depth * 2
    );
    for child in &bd.children {
        print_tree(child, depth + 1);
    }
}

pub fn scan(format: ScanFormat, available: bool) -> Result<()> {
    let runner = HostRunner;
    let mut devices = scan_media(&runner, &[])?;
    if available {
        devices = available_media(devices);
    }

    match format {
        ScanFormat::Json => println!("{}", serde_json::to_string_pretty(&devices)?),
        ScanFormat::Layout => print!("{}", to_layout_string(&devices)?),
        ScanFormat::Text => devices.iter().for_each(|bd| print_tree(bd, 0)),
    }
    Ok(())
}

pub fn targets(config: &AppConfig, policy: TargetPolicy, root_size: Option<&str>) -> Result<()> {
    let min_root_size = match root_size {
        Some(size) => parse_volume_size(size)?,
        None => config.profile.min_root_size(),
    };

    let runner = HostRunner;
    let medias = available_media(scan_media(&runner, &[])?);

    let mut found = match policy {
        TargetPolicy::Safe => find_safe_install_targets(min_root_size, &medias),
        TargetPolicy::All => find_all_install_targets(min_root_size, &medias),
        TargetPolicy::Advanced => {
            let advanced = find_advanced_install_targets(&medias);
            for line in advanced_partitions(&advanced) {
                println!("{line}");
            }
            return Ok(());
        }
    };

    sort_install_targets(&mut found);
    for target in &found {
        println!(
            "{} {} {} {}",
            target.name,
            format_install_portion(target),
            media_types::human_size_xb(target.free_size()),
            target.friendly
        );
    }
    Ok(())
}

fn validation_errors(config: &AppConfig, medias: &[BlockDevice], advanced: bool) -> Vec<String> {
    let min_root_size = config.profile.min_root_size();
    if advanced {
        let labelled = find_advanced_install_targets(medias);
        validate_advanced_partitions(min_root_size, &labelled, &config.media)
    } else {
        validate_partitions(min_root_size, medias, &config.media, false)
    }
}

/// Print every validation error of a layout and return how many there were.
pub fn validate(config: &AppConfig, layout: &Path, advanced: bool) -> Result<usize> {
    let medias = read_layout(layout)?;
    if config.media.skip_validation_all {
        tracing::info!("validation skipped");
        return Ok(0);
    }

    let errors = validation_errors(config, &medias, advanced);
    for error in &errors {
        println!("{error}");
    }
    Ok(errors.len())
}

pub fn plan(config: &AppConfig, layout: &Path, specs: &[String]) -> Result<()> {
    let runner = HostRunner;
    let user = read_layout(layout)?;
    let medias = scan_media(&runner, &user)?;
    let (targets, selected) = select_targets(specs, &medias)?;

    for line in planned_media_changes(&runner, &targets, &selected, &config.media) {
        println!("{line}");
    }
    Ok(())
}

fn check_before_install(config: &AppConfig, medias: &[BlockDevice]) -> Result<()> {
    if config.media.skip_validation_all {
        tracing::warn!("installing without validating the layout");
        return Ok(());
    }

    let advanced = medias
        .iter()
        .any(|bd| bd.children.iter().any(|ch| ch.labeled_advanced));
    let errors = validation_errors(config, medias, advanced);
    if errors.is_empty() {
        return Ok(());
    }
    for error in &errors {
        eprintln!("{error}");
    }
    anyhow::bail!("layout is not installable")
}

pub fn apply(config: &AppConfig, layout: &Path, specs: &[String], root: &Path) -> Result<()> {
    let runner = HostRunner;
    let user = read_layout(layout)?;
    let medias = scan_media(&runner, &user)?;
    let (targets, selected) = select_targets(specs, &medias)?;

    check_before_install(config, &selected)?;
    install(&runner, config, &targets, selected, root)
}

/// Back the first layout disk with an image file and install onto it.
pub fn image(config: &AppConfig, layout: &Path, file: &Path, root: &Path) -> Result<()> {
    let runner = HostRunner;
    let user = read_layout(layout)?;
    let disk = user
        .iter()
        .find(|bd| matches!(bd.device_type, DeviceType::Disk | DeviceType::Loop))
        .context("layout has no disk to build an image from")?;

    make_image(&runner, disk, file)?;
    let loop_file = setup_loop_device(&runner, file)?;

    let result = install_on_loop(&runner, config, user, &loop_file, root);
    detach_loop_device(&runner, &loop_file);
    result
}

fn install_on_loop(
    runner: &dyn CommandRunner,
    config: &AppConfig,
    mut user: Vec<BlockDevice>,
    loop_file: &str,
    root: &Path,
) -> Result<()> {
    let loop_name = loop_file.trim_start_matches("/dev/").to_string();
    let aliases = HashMap::from([(IMAGE_ALIAS.to_string(), loop_name.clone())]);
    user.iter_mut().for_each(|bd| bd.expand_name(&aliases));

    let mut scanned = list_block_devices(runner, Some(loop_file))?;
    for device in &mut scanned {
        load_partition_table(runner, device);
    }
    let Some(host) = scanned.iter().find(|bd| bd.name == loop_name) else {
        anyhow::bail!("{loop_file} is not listed by lsblk");
    };
    let Some(planned) = user.iter_mut().find(|bd| bd.name == loop_name) else {
        anyhow::bail!("layout has no device named ${{{IMAGE_ALIAS}}}");
    };
    planned.model = host.model.clone();
    planned.maj_min = host.maj_min.clone();

    let medias = merge_user_defined(scanned, &user);
    let spec = [format!("{loop_name}:erase")];
    let (targets, selected) = select_targets(&spec, &medias)?;

    check_before_install(config, &selected)?;
    install(runner, config, &targets, selected, root)
}

fn install(
    runner: &dyn CommandRunner,
    config: &AppConfig,
    targets: &[InstallTarget],
    mut medias: Vec<BlockDevice>,
    root: &Path,
) -> Result<()> {
    let encrypted = medias.iter().any(|bd| bd.encryption_requires_passphrase());
    let passphrase = if encrypted {
        Some(ask_passphrase(runner)?)
    } else {
        None
    };

    let mut sink = Executor::new(runner);
    prepare_installation_media(&mut sink, targets, &mut medias, &config.media, config.settle())?;

    let mut session = InstallSession::new();
    let populated = populate(
        &mut sink,
        &mut session,
        config,
        &mut medias,
        passphrase.as_deref(),
        root,
    );
    let released = session.umount_all(runner);

    populated?;
    released?;

    if encrypted {
        tracing::info!(
            "encrypted volumes need the {REQUIRED_BUNDLE} bundle and the {KERNEL_ARGUMENT} kernel argument"
        );
    }
    tracing::info!("installation media prepared under {}", root.display());
    Ok(())
}

fn populate(
    sink: &mut dyn ActionSink,
    session: &mut InstallSession,
    config: &AppConfig,
    medias: &mut [BlockDevice],
    passphrase: Option<&str>,
    root: &Path,
) -> Result<()> {
    for child in medias
        .iter_mut()
        .flat_map(|media| media.children.iter_mut())
        .filter(|ch| ch.format_partition)
    {
        if child.device_type == DeviceType::Crypt && child.fs_type_not_swap() {
            let passphrase = passphrase.context("encrypted partition without a passphrase")?;
            map_encrypted(sink, session, child, passphrase)?;
        }
        make_fs(sink, child)?;
    }

    let mut mounts: Vec<&BlockDevice> = medias
        .iter()
        .flat_map(|media| media.children.iter())
        .filter(|ch| !ch.mount_point.is_empty() && ch.fs_type_not_swap())
        .collect();
    mounts.sort_by(|a, b| a.mount_point.cmp(&b.mount_point));
    for child in mounts {
        session.mount(child, root)?;
    }
    session.mount_meta_fs(root)?;

    generate_tab_files(root, medias)?;

    let has_swap = medias.iter().any(|bd| bd.device_has_swap());
    if config.media.swap_file_set || !has_swap {
        let size = config
            .media
            .swap_file_size
            .clone()
            .unwrap_or_else(|| format!("{}MiB", SWAP_FILE_SIZE_DEFAULT / MIB));
        create_swap_file(sink.runner(), root, &size)?;
    }

    Ok(())
}
