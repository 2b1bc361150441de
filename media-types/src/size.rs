// SPDX-License-Identifier: GPL-3.0-only

//! Byte size parsing and formatting
//!
//! Sizes come from three places: lsblk (bytes, or a short string such as
//! `"1.5G"` on older util-linux), user layout documents (`"150MiB"`,
//! `"20GB"`) and our own reports. Parsing treats every unit spelling as a
//! power of two, formatting offers both decimal (`XB`) and binary (`XiB`)
//! families.

use num_format::{Locale, ToFormattedString};

use crate::error::{ModelError, Result};

pub const KIB: u64 = 1 << 10;
pub const MIB: u64 = 1 << 20;
pub const GIB: u64 = 1 << 30;

/// Decimal megabyte, the unit parted is driven with.
pub const MB: u64 = 1000 * 1000;
/// Decimal gigabyte.
pub const GB: u64 = 1000 * MB;

/// Which unit family to render with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeUnits {
    /// Powers of 1000: KB, MB, GB...
    Decimal,
    /// Powers of 1024: KiB, MiB, GiB...
    Binary,
}

struct UnitStep {
    unit: &'static str,
    mask: f64,
    precision: usize,
}

const DECIMAL_STEPS: &[UnitStep] = &[
    UnitStep { unit: "PB", mask: 1e15, precision: 5 },
    UnitStep { unit: "TB", mask: 1e12, precision: 4 },
    UnitStep { unit: "GB", mask: 1e9, precision: 3 },
    UnitStep { unit: "MB", mask: 1e6, precision: 2 },
    UnitStep { unit: "KB", mask: 1e3, precision: 1 },
    UnitStep { unit: "B", mask: 1.0, precision: 0 },
];

const BINARY_STEPS: &[UnitStep] = &[
    UnitStep { unit: "PiB", mask: (1u64 << 50) as f64, precision: 5 },
    UnitStep { unit: "TiB", mask: (1u64 << 40) as f64, precision: 4 },
    UnitStep { unit: "GiB", mask: (1u64 << 30) as f64, precision: 3 },
    UnitStep { unit: "MiB", mask: (1u64 << 20) as f64, precision: 2 },
    UnitStep { unit: "KiB", mask: (1u64 << 10) as f64, precision: 1 },
    UnitStep { unit: "B", mask: 1.0, precision: 0 },
];

/// Parse a volume size such as `"1M"`, `"10GiB"`, `"2tb"` or `"1048576"`.
///
/// Every unit spelling (`k`, `kb`, `kib`...) is a power of two. Fractional
/// values are rounded to the closest byte.
pub fn parse_volume_size(input: &str) -> Result<u64> {
    let lower = input.trim().to_lowercase();
    let split = lower
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(lower.len());
    let (number, unit) = lower.split_at(split);

    if number.matches('.').count() > 1 {
        return Err(ModelError::InvalidSize(input.to_string()));
    }

    let shift = match unit {
        "" | "b" => 0,
        "k" | "kb" | "kib" => 10,
        "m" | "mb" | "mib" => 20,
        "g" | "gb" | "gib" => 30,
        "t" | "tb" | "tib" => 40,
        "p" | "pb" | "pib" => 50,
        _ => return Err(ModelError::InvalidSize(input.to_string())),
    };

    let value: f64 = number
        .parse()
        .map_err(|_| ModelError::InvalidSize(input.to_string()))?;

    Ok((value * (1u64 << shift) as f64).round() as u64)
}

/// Render `size` in the requested unit family.
///
/// `unit` forces a specific unit (case insensitive, `"GiB"`, `"mb"`...), and
/// `precision` forces the number of decimals; both default to the closest
/// unit and its usual precision. Trailing zeros are trimmed.
pub fn human_size(
    size: u64,
    units: SizeUnits,
    unit: Option<&str>,
    precision: Option<usize>,
) -> Result<String> {
    if size == 0 {
        return Ok("0".to_string());
    }

    let steps = match units {
        SizeUnits::Decimal => DECIMAL_STEPS,
        SizeUnits::Binary => BINARY_STEPS,
    };
    let wanted = unit.map(|u| u.to_uppercase().replace('I', "i"));
    let value = size as f64;

    for step in steps {
        let scaled = value / step.mask;
        match wanted.as_deref() {
            None if scaled < 1.0 => continue,
            Some(w) if w != step.unit => continue,
            _ => {}
        }

        let formatted = format!("{:.*}", precision.unwrap_or(step.precision), scaled);
        let mut formatted = if formatted.contains('.') {
            formatted
                .trim_end_matches('0')
                .trim_end_matches('.')
                .to_string()
        } else {
            formatted
        };
        if step.unit != "B" {
            formatted.push_str(step.unit);
        }
        return Ok(formatted);
    }

    Err(ModelError::InvalidSize(format!(
        "could not format {size} bytes as {}",
        unit.unwrap_or("<auto>")
    )))
}

/// Closest decimal rendering, e.g. `"20GB"`.
pub fn human_size_xb(size: u64) -> String {
    human_size(size, SizeUnits::Decimal, None, None).unwrap_or_else(|_| size.to_string())
}

/// Closest binary rendering, e.g. `"150MiB"`.
pub fn human_size_xib(size: u64) -> String {
    human_size(size, SizeUnits::Binary, None, None).unwrap_or_else(|_| size.to_string())
}

/// Closest binary rendering with a fixed precision, e.g. `"8.1GiB"`.
pub fn human_size_xib_precision(size: u64, precision: usize) -> String {
    human_size(size, SizeUnits::Binary, None, Some(precision))
        .unwrap_or_else(|_| size.to_string())
}

/// Byte count with thousands separators for log lines.
pub fn bytes_with_separators(bytes: u64) -> String {
    format!("{} bytes", bytes.to_formatted_string(&Locale::en))
}
