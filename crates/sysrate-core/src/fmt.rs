//! Formatting helpers for rates and byte counts in text output.
//!
//! Functions that differ between a one-line summary and a per-device listing
//! take a [`FmtStyle`].

/// Controls compact vs verbose output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmtStyle {
    /// No spaces, short suffixes: `"1.5G"`, `"12K/s"`.
    Compact,
    /// Spaces, binary suffixes: `"1.5 GiB"`, `"12.0 KiB/s"`.
    Detail,
}

const KIB: f64 = 1024.0;
const MIB: f64 = KIB * 1024.0;
const GIB: f64 = MIB * 1024.0;
const TIB: f64 = GIB * 1024.0;

/// Scales `value` to the largest binary unit it reaches.
fn scaled(value: f64, style: FmtStyle, suffix: &str) -> String {
    let units: [(f64, &str, &str); 4] = [
        (TIB, "T", " TiB"),
        (GIB, "G", " GiB"),
        (MIB, "M", " MiB"),
        (KIB, "K", " KiB"),
    ];
    for (size, compact, detail) in units {
        if value >= size {
            let unit = match style {
                FmtStyle::Compact => compact,
                FmtStyle::Detail => detail,
            };
            return format!("{:.1}{}{}", value / size, unit, suffix);
        }
    }
    match style {
        FmtStyle::Compact => format!("{:.0}B{}", value, suffix),
        FmtStyle::Detail => format!("{:.0} B{}", value, suffix),
    }
}

/// Byte count as a human-readable size.
///
/// Compact: `"1.5G"`, `"512B"`. Detail: `"1.5 GiB"`, `"512 B"`.
pub fn format_bytes(bytes: u64, style: FmtStyle) -> String {
    scaled(bytes as f64, style, "")
}

/// Bytes-per-second rate; `"0"` below one byte per second.
pub fn format_bytes_rate(rate: f64, style: FmtStyle) -> String {
    if rate < 1.0 {
        return "0".to_string();
    }
    scaled(rate, style, "/s")
}

/// Operations-per-second rate.
///
/// Detail keeps one decimal below 10/s.
pub fn format_rate(rate: f64, style: FmtStyle) -> String {
    if rate < 0.01 {
        return "0".to_string();
    }
    if rate >= 1_000_000.0 {
        return format!("{:.1}M/s", rate / 1_000_000.0);
    }
    if rate >= 1_000.0 {
        return format!("{:.1}K/s", rate / 1_000.0);
    }
    match style {
        FmtStyle::Detail if rate < 10.0 => format!("{:.1}/s", rate),
        _ => format!("{:.0}/s", rate),
    }
}

/// Percentage with one decimal. Values above 100 (queued disk waits) are
/// printed as is.
pub fn format_pct(pct: f64) -> String {
    format!("{:.1}%", pct)
}

/// Clock speed in GHz with two decimals.
pub fn format_ghz(ghz: f64) -> String {
    format!("{:.2}GHz", ghz)
}
