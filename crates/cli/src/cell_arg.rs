//! `--cell SUBJECT[/DIM]@PERIOD=VALUE` arguments.

use std::fmt;
use std::str::FromStr;

/// One cell assignment from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellArg {
    pub subject: String,
    pub dimension: Option<String>,
    pub period: String,
    /// Raw amount text, parsed by the session.
    pub value: String,
}

impl FromStr for CellArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        let usage = || format!("invalid cell '{}': expected SUBJECT[/DIM]@PERIOD=VALUE", s);

        let (target, value) = s.split_once('=').ok_or_else(usage)?;
        let (row, period) = target.split_once('@').ok_or_else(usage)?;
        let (subject, dimension) = match row.split_once('/') {
            Some((subject, dim)) => (subject, Some(dim)),
            None => (row, None),
        };

        let subject = subject.trim();
        let period = period.trim();
        let value = value.trim();
        if subject.is_empty() || period.is_empty() || value.is_empty() {
            return Err(usage());
        }
        let dimension = match dimension.map(str::trim) {
            Some("") => return Err(usage()),
            other => other.map(str::to_string),
        };

        Ok(Self {
            subject: subject.to_string(),
            dimension,
            period: period.to_string(),
            value: value.to_string(),
        })
    }
}

impl fmt::Display for CellArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.subject)?;
        if let Some(dim) = &self.dimension {
            write!(f, "/{}", dim)?;
        }
        write!(f, "@{}={}", self.period, self.value)
    }
}
