// SPDX-License-Identifier: GPL-3.0-only

//! LUKS encryption of planned partitions
//!
//! The passphrase only ever travels over the tool's standard input.

use media_types::{BlockDevice, DeviceType, mapper_name_for, next_mapper_name};

use crate::cmd::{ActionSink, Applied, CommandRunner, ToolCommand};
use crate::session::InstallSession;
use crate::{Result, SysError};

/// Bundle the target needs to unlock encrypted partitions at boot.
pub const REQUIRED_BUNDLE: &str = "boot-encrypted";
/// Kernel argument the target needs with an encrypted root.
pub const KERNEL_ARGUMENT: &str = "rootflags=x-systemd.device-timeout=0";

pub const ENCRYPT_HASH: &str = "sha256";
pub const ENCRYPT_CIPHER: &str = "aes-xts-plain64";
pub const ENCRYPT_KEY_SIZE: u32 = 512;

/// Names tried before giving up on a free device-mapper name.
const MAPPER_NAME_ATTEMPTS: usize = 5;

const CRACKLIB_CHECK: &str = "/usr/bin/cracklib-check";

/// Device-mapper names currently in use.
pub fn active_mapper_names(runner: &dyn CommandRunner) -> Result<Vec<String>> {
    let outcome = runner.run(&ToolCommand::new("dmsetup").arg("ls"))?;
    Ok(parse_dmsetup_ls(&outcome.stdout))
}

fn parse_dmsetup_ls(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let name = line.split_whitespace().next()?;
            (line.contains('(') && name != "No").then(|| name.to_string())
        })
        .collect()
}

/// First candidate name, `root` or the mount point, not already taken.
fn free_mapper_name(runner: &dyn CommandRunner, mount_point: &str) -> Result<String> {
    let active = active_mapper_names(runner).unwrap_or_else(|e| {
        tracing::warn!("could not list device-mapper targets: {e}");
        Vec::new()
    });

    let mut candidate = mapper_name_for(mount_point);
    for _ in 0..MAPPER_NAME_ATTEMPTS {
        if !active.contains(&candidate) {
            return Ok(candidate);
        }
        tracing::debug!("mapper name {candidate} is taken");
        candidate = next_mapper_name(&candidate);
    }

    Err(SysError::OperationFailed(format!(
        "no free device-mapper name for {mount_point} after {MAPPER_NAME_ATTEMPTS} attempts"
    )))
}

/// Format `bd` as a LUKS volume and open it.
///
/// On success the device's mapped name is `mapper/<name>` and the mapping is
/// recorded on the session so it gets closed at teardown.
pub fn map_encrypted(
    sink: &mut dyn ActionSink,
    session: &mut InstallSession,
    bd: &mut BlockDevice,
    passphrase: &str,
) -> Result<()> {
    if bd.device_type != DeviceType::Crypt {
        return Err(SysError::Precondition(format!(
            "{}: cryptsetup needs a crypt partition",
            bd.name
        )));
    }

    let device_file = bd.device_file();
    let mut format = ToolCommand::new("cryptsetup").args([
        "--batch-mode".to_string(),
        format!("--hash={ENCRYPT_HASH}"),
        format!("--cipher={ENCRYPT_CIPHER}"),
        format!("--key-size={ENCRYPT_KEY_SIZE}"),
    ]);
    if !bd.label.is_empty() {
        format = format.arg(format!("--label={}", bd.label));
    }
    let format = format
        .args(["luksFormat", device_file.as_str(), "-"])
        .stdin(passphrase);
    sink.apply(&format, None)
        .map_err(|e| e.annotate(format!("encrypting {}", bd.name)))?;

    let mapped = free_mapper_name(sink.runner(), &bd.mount_point)?;
    let open = ToolCommand::new("cryptsetup")
        .args(["--batch-mode", "luksOpen", device_file.as_str(), mapped.as_str(), "-"])
        .stdin(passphrase);
    let applied = sink
        .apply(&open, None)
        .map_err(|e| e.annotate(format!("opening {}", bd.name)))?;

    tracing::debug!("disk partition {} is mapped to encrypted partition {mapped}", bd.name);
    if let Applied::Executed(_) = applied {
        session.record_mapping(&mapped);
    }
    bd.mapped_name = format!("mapper/{mapped}");
    Ok(())
}

/// Close a mapping opened by [`map_encrypted`].
pub fn unmap_encrypted(runner: &dyn CommandRunner, mapped: &str) -> Result<()> {
    runner
        .run(&ToolCommand::new("cryptsetup").args(["--batch-mode", "luksClose", mapped]))
        .map_err(|e| e.annotate(format!("closing {mapped}")))?;
    Ok(())
}

/// Run the passphrase through cracklib.
///
/// A checker that cannot run lets every passphrase through.
pub fn check_passphrase_strength(
    runner: &dyn CommandRunner,
    passphrase: &str,
) -> std::result::Result<(), String> {
    let command = ToolCommand::new(CRACKLIB_CHECK).stdin(format!("{passphrase}\n"));
    let outcome = match runner.run(&command) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("error running cracklib-check, check will be skipped: {e}");
            return Ok(());
        }
    };

    match outcome.stdout.rsplit_once(':') {
        Some((_, verdict)) => {
            let verdict = verdict.trim_matches(|c| c == ' ' || c == '\n');
            if verdict.eq_ignore_ascii_case("OK") {
                Ok(())
            } else {
                Err(verdict.replacen("it", "Passphrase", 1))
            }
        }
        None => Ok(()),
    }
}
