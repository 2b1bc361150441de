// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

use crate::size::MIB;

/// Path of the swap file inside the target root.
pub const SWAPFILE_NAME: &str = "/var/swapfile";

/// Swap file size assumed when none was requested.
pub const SWAP_FILE_SIZE_DEFAULT: u64 = 64 * MIB;

/// Media related install options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaOpts {
    pub legacy_bios: bool,
    pub skip_validation_size: bool,
    pub skip_validation_all: bool,
    /// Requested swap file size, e.g. `"64MiB"`.
    pub swap_file_size: Option<String>,
    /// Set when the swap file size was asked for explicitly.
    #[serde(skip)]
    pub swap_file_set: bool,
}

impl MediaOpts {
    pub fn with_swap_file(mut self, size: impl Into<String>) -> Self {
        self.swap_file_size = Some(size.into());
        self.swap_file_set = true;
        self
    }

    /// Mark a configured swap file size as explicitly requested.
    pub fn normalize(mut self) -> Self {
        if self
            .swap_file_size
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
        {
            self.swap_file_set = true;
        } else {
            self.swap_file_size = None;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_swap_file_counts_as_requested() {
        let opts: MediaOpts = toml::from_str("swap_file_size = \"128MiB\"").unwrap();
        assert!(!opts.swap_file_set);
        let opts = opts.normalize();
        assert!(opts.swap_file_set);

        let empty = MediaOpts {
            swap_file_size: Some(" ".to_string()),
            ..Default::default()
        }
        .normalize();
        assert!(!empty.swap_file_set);
        assert_eq!(empty.swap_file_size, None);
    }
}
