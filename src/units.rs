use clap::ValueEnum;
use serde::{Deserialize, Serialize};

const BYTES_PER_KIB: f64 = 1024.0;
const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;
const BITS_PER_BYTE: f64 = 8.0;

/// How a byte rate is presented to the user.
#[derive(ValueEnum, Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnitMode {
    /// Most readable bit-based unit
    #[default]
    #[value(name = "auto")]
    Auto,
    #[value(name = "B")]
    Bps,
    #[value(name = "KiB")]
    KiBps,
    #[value(name = "MiB")]
    MiBps,
    #[value(name = "bit")]
    #[serde(rename = "bps")]
    BitsPs,
    #[value(name = "Kbit")]
    Kbps,
    #[value(name = "Mbit")]
    Mbps,
}

impl UnitMode {
    pub const ALL: [UnitMode; 7] = [
        UnitMode::Auto,
        UnitMode::Bps,
        UnitMode::KiBps,
        UnitMode::MiBps,
        UnitMode::BitsPs,
        UnitMode::Kbps,
        UnitMode::Mbps,
    ];

    /// The mode after this one, wrapping around. Used by the dashboard key binding.
    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|m| *m == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

/// Converts a rate in bytes per second to a value and its unit label.
///
/// Negative, NaN and infinite rates are treated as zero.
pub fn to_value_and_unit(bytes_per_second: f64, mode: UnitMode) -> (f64, &'static str) {
    let bps = if bytes_per_second.is_finite() && bytes_per_second > 0.0 {
        bytes_per_second
    } else {
        0.0
    };

    match mode {
        UnitMode::Bps => (bps, "B/s"),
        UnitMode::KiBps => (bps / BYTES_PER_KIB, "KiB/s"),
        UnitMode::MiBps => (bps / BYTES_PER_MIB, "MiB/s"),
        UnitMode::BitsPs => (bps * BITS_PER_BYTE, "bit/s"),
        UnitMode::Kbps => (bps * BITS_PER_BYTE / 1_000.0, "Kbit/s"),
        UnitMode::Mbps => (bps * BITS_PER_BYTE / 1_000_000.0, "Mbit/s"),
        UnitMode::Auto => {
            let bits = bps * BITS_PER_BYTE;
            if bits >= 1_000_000.0 {
                (bits / 1_000_000.0, "Mbit/s")
            } else if bits >= 1_000.0 {
                (bits / 1_000.0, "Kbit/s")
            } else {
                (bits, "bit/s")
            }
        }
    }
}

/// Formats a rate as e.g. `12.3 Mbit/s` with a fixed number of decimals.
pub fn format_rate(bytes_per_second: f64, mode: UnitMode, decimals: usize) -> String {
    let (value, unit) = to_value_and_unit(bytes_per_second, mode);
    format!("{value:.decimals$} {unit}")
}
