//! Exact fixed-point amounts.
//!
//! Values are stored as `i64` minor units (cents for 2 digits, yen for 0).
//! No f64 anywhere: repeated rollups must never drift.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Largest supported number of minor-unit digits.
pub const MAX_MINOR_DIGITS: u32 = 6;

/// Amount in currency minor units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    #[inline]
    pub const fn minor_units(&self) -> i64 {
        self.0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_scale(self, coefficient: i64) -> Option<Amount> {
        self.0.checked_mul(coefficient).map(Amount)
    }

    /// Parse a user-entered decimal string into minor units.
    ///
    /// Handles "1234", "-1234.5", "+12.34", "1,234,567.89". At most `digits`
    /// fractional digits are accepted; thousands separators must group by 3.
    pub fn parse(raw: &str, digits: u32) -> Result<Amount, EngineError> {
        let invalid = || EngineError::InvalidNumber { raw: raw.to_string() };
        let digits = digits.min(MAX_MINOR_DIGITS);

        let s = raw.trim();
        let (negative, s) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if frac.len() > digits as usize || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if s.contains('.') && frac.is_empty() {
            return Err(invalid());
        }

        let whole_digits = strip_grouping(whole).ok_or_else(invalid)?;

        let scale = 10i64.pow(digits);
        let mut minor: i64 = 0;
        for b in whole_digits.bytes() {
            minor = minor
                .checked_mul(10)
                .and_then(|v| v.checked_add((b - b'0') as i64))
                .ok_or_else(invalid)?;
        }
        minor = minor.checked_mul(scale).ok_or_else(invalid)?;

        // Pad fraction to `digits` places: "5" with 2 digits is 50.
        let mut frac_minor: i64 = 0;
        for i in 0..digits as usize {
            let d = frac.as_bytes().get(i).map_or(0, |b| (b - b'0') as i64);
            frac_minor = frac_minor * 10 + d;
        }
        minor = minor.checked_add(frac_minor).ok_or_else(invalid)?;

        Ok(Amount(if negative { -minor } else { minor }))
    }

    /// Format with a fixed number of fractional digits ("1234.50").
    pub fn format(&self, digits: u32) -> String {
        let digits = digits.min(MAX_MINOR_DIGITS);
        let negative = self.0 < 0;
        let abs = self.0.unsigned_abs();
        let sign = if negative { "-" } else { "" };
        if digits == 0 {
            return format!("{sign}{abs}");
        }
        let scale = 10u64.pow(digits);
        let whole = abs / scale;
        let frac = abs % scale;
        format!("{sign}{whole}.{frac:0width$}", width = digits as usize)
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validate and strip thousands separators. Returns the bare digit string.
fn strip_grouping(whole: &str) -> Option<String> {
    if whole.is_empty() {
        return Some(String::new());
    }
    if !whole.contains(',') {
        return whole.bytes().all(|b| b.is_ascii_digit()).then(|| whole.to_string());
    }
    let mut groups = whole.split(',');
    let first = groups.next()?;
    if first.is_empty() || first.len() > 3 || !first.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut out = first.to_string();
    for g in groups {
        if g.len() != 3 || !g.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        out.push_str(g);
    }
    Some(out)
}
