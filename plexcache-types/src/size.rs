use std::str::FromStr;

use anyhow::{bail, Error};

/// Formats a byte count the way a human reads it. Grounded on
/// `pbs-api-types::human_byte::HumanByte`, extended with a `FromStr`
/// impl since that type is display-only and this core must also parse
/// `cache_drive_size`-style config values.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct HumanByte(pub u64);

impl From<u64> for HumanByte {
    fn from(v: u64) -> Self {
        HumanByte(v)
    }
}

impl std::fmt::Display for HumanByte {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = self.0 as f64;
        if self.0 < 1024 {
            return write!(f, "{} B", self.0);
        }
        let kb = b / 1024.0;
        if kb < 1024.0 {
            return write!(f, "{:.2} KiB", kb);
        }
        let mb = kb / 1024.0;
        if mb < 1024.0 {
            return write!(f, "{:.2} MiB", mb);
        }
        let gb = mb / 1024.0;
        if gb < 1024.0 {
            return write!(f, "{:.2} GiB", gb);
        }
        let tb = gb / 1024.0;
        if tb < 1024.0 {
            return write!(f, "{:.2} TiB", tb);
        }
        write!(f, "{:.2} PiB", tb / 1024.0)
    }
}

/// A size-expression config value: `cache_drive_size`, `cache_limit`,
/// `min_free_space`, `plexcache_quota` all take one of these (see
/// `spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizeExpr {
    Bytes(u64),
    Percent(f64),
}

impl SizeExpr {
    /// Resolves a (possibly percentage) size expression against the
    /// total drive size in bytes.
    pub fn resolve(&self, total_bytes: u64) -> u64 {
        match self {
            SizeExpr::Bytes(b) => *b,
            SizeExpr::Percent(p) => ((total_bytes as f64) * (p / 100.0)).round() as u64,
        }
    }
}

impl FromStr for SizeExpr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        if let Some(pct) = s.strip_suffix('%') {
            let p: f64 = pct.trim().parse()?;
            if !(0.0..=100.0).contains(&p) {
                bail!("percentage out of range: {s}");
            }
            return Ok(SizeExpr::Percent(p));
        }

        let (digits, suffix) = split_numeric_suffix(s);
        if digits.is_empty() {
            bail!("invalid size expression: {s}");
        }
        let value: f64 = digits.parse()?;

        let multiplier: u64 = match suffix.to_ascii_uppercase().as_str() {
            "" | "B" => 1,
            "K" | "KB" | "KIB" => 1024,
            "M" | "MB" | "MIB" => 1024 * 1024,
            "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
            "T" | "TB" | "TIB" => 1024_u64.pow(4),
            _ => bail!("unknown size suffix: {suffix:?} in {s:?}"),
        };

        Ok(SizeExpr::Bytes((value * multiplier as f64).round() as u64))
    }
}

fn split_numeric_suffix(s: &str) -> (&str, &str) {
    let split_at = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    s.split_at(split_at)
}
