// SPDX-License-Identifier: GPL-3.0-only

//! Passphrase policy and mapper naming for encrypted volumes

use crate::messages;

pub const MIN_PASSPHRASE_LENGTH: usize = 8;
pub const MAX_PASSPHRASE_LENGTH: usize = 94;

/// Check the local passphrase rules, returning the reason on failure.
///
/// The strength checker runs separately, on the host.
pub fn is_valid_passphrase(phrase: &str) -> std::result::Result<(), String> {
    if phrase.is_empty() {
        return Err(messages::passphrase_required());
    }
    if !phrase.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err(messages::passphrase_ascii_only());
    }
    let length = phrase.chars().count();
    if length < MIN_PASSPHRASE_LENGTH {
        return Err(messages::passphrase_too_short(MIN_PASSPHRASE_LENGTH));
    }
    if length > MAX_PASSPHRASE_LENGTH {
        return Err(messages::passphrase_too_long(MAX_PASSPHRASE_LENGTH));
    }
    Ok(())
}

/// Mapper name for an encrypted volume mounted at `mount_point`:
/// `root` for `/`, otherwise the lower-cased path without its leading
/// slash and with the remaining slashes turned into underscores.
pub fn mapper_name_for(mount_point: &str) -> String {
    if mount_point == "/" {
        return "root".to_string();
    }
    mount_point
        .to_lowercase()
        .trim_start_matches('/')
        .replace('/', "_")
}

/// Next candidate after a name collision: `home` -> `home1` -> `home2`.
pub fn next_mapper_name(name: &str) -> String {
    let digits = name.len() - name.chars().rev().take_while(|c| c.is_ascii_digit()).count();
    let (base, suffix) = name.split_at(digits);
    let next = suffix.parse::<u32>().map(|n| n + 1).unwrap_or(1);
    format!("{base}{next}")
}
