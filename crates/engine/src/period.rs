//! Fiscal period hierarchy.
//!
//! Fixed four-level shape: 12 months roll into 4 quarters, quarters pair into
//! 2 halves, halves sum into 1 fiscal year. Built once per session and never
//! mutated.
//!
//! ```text
//! FY
//! ├── H1
//! │   ├── Q1: P01 P02 P03
//! │   └── Q2: P04 P05 P06
//! └── H2
//!     ├── Q3: P07 P08 P09
//!     └── Q4: P10 P11 P12
//! ```
//!
//! Fiscal month `P01` is the calendar month the fiscal year starts in.

use serde::{Deserialize, Serialize};

const MONTH_CODES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Period identity. Indices are 1-based fiscal positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodId {
    Month(u8),
    Quarter(u8),
    Half(u8),
    Annual,
}

impl PeriodId {
    pub fn kind(&self) -> PeriodKind {
        match self {
            Self::Month(_) => PeriodKind::Month,
            Self::Quarter(_) => PeriodKind::Quarter,
            Self::Half(_) => PeriodKind::Half,
            Self::Annual => PeriodKind::Annual,
        }
    }

    /// Position in the bottom-up table (months, quarters, halves, year).
    fn slot(&self) -> Option<usize> {
        match *self {
            Self::Month(m @ 1..=12) => Some(m as usize - 1),
            Self::Quarter(q @ 1..=4) => Some(11 + q as usize),
            Self::Half(h @ 1..=2) => Some(15 + h as usize),
            Self::Annual => Some(18),
            _ => None,
        }
    }

    fn parent(&self) -> Option<PeriodId> {
        match *self {
            Self::Month(m) => Some(Self::Quarter((m - 1) / 3 + 1)),
            Self::Quarter(q) => Some(Self::Half((q - 1) / 2 + 1)),
            Self::Half(_) => Some(Self::Annual),
            Self::Annual => None,
        }
    }
}

impl std::fmt::Display for PeriodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Month(m) => write!(f, "P{:02}", m),
            Self::Quarter(q) => write!(f, "Q{}", q),
            Self::Half(h) => write!(f, "H{}", h),
            Self::Annual => write!(f, "FY"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodKind {
    Month,
    Quarter,
    Half,
    Annual,
}

/// One node of the period tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Period {
    pub id: PeriodId,
    pub parent: Option<PeriodId>,
    pub kind: PeriodKind,
    /// Only months are directly editable.
    pub editable: bool,
    /// Display label: calendar month code for months (`APR`), otherwise the id.
    pub label: String,
    /// Calendar month (1-12) for month periods.
    pub calendar_month: Option<u32>,
}

/// Static lookup table over the 19 periods of one fiscal year.
#[derive(Clone, Debug)]
pub struct PeriodHierarchy {
    start_month: u32,
    /// Bottom-up order: P01..P12, Q1..Q4, H1, H2, FY.
    periods: Vec<Period>,
}

impl PeriodHierarchy {
    /// Build the fiscal year starting in `start_month` (1 = January).
    ///
    /// Out-of-range values are clamped to 1..=12.
    pub fn fiscal_year(start_month: u32) -> Self {
        let start_month = start_month.clamp(1, 12);
        let mut periods = Vec::with_capacity(19);

        for m in 1..=12u8 {
            let id = PeriodId::Month(m);
            let calendar = (start_month - 1 + (m as u32 - 1)) % 12 + 1;
            periods.push(Period {
                id,
                parent: id.parent(),
                kind: PeriodKind::Month,
                editable: true,
                label: MONTH_CODES[calendar as usize - 1].to_string(),
                calendar_month: Some(calendar),
            });
        }
        let upper = (1..=4u8)
            .map(PeriodId::Quarter)
            .chain((1..=2u8).map(PeriodId::Half))
            .chain(std::iter::once(PeriodId::Annual));
        for id in upper {
            periods.push(Period {
                id,
                parent: id.parent(),
                kind: id.kind(),
                editable: false,
                label: id.to_string(),
                calendar_month: None,
            });
        }

        Self { start_month, periods }
    }

    pub fn start_month(&self) -> u32 {
        self.start_month
    }

    pub fn get(&self, id: PeriodId) -> Option<&Period> {
        id.slot().map(|slot| &self.periods[slot])
    }

    pub fn contains(&self, id: PeriodId) -> bool {
        id.slot().is_some()
    }

    /// All periods, bottom-up (every child precedes its parent).
    pub fn all(&self) -> &[Period] {
        &self.periods
    }

    pub fn months(&self) -> impl Iterator<Item = &Period> + '_ {
        self.periods[..12].iter()
    }

    /// Direct children in fiscal order. Empty for months.
    pub fn children_of(&self, id: PeriodId) -> Vec<&Period> {
        if !self.contains(id) {
            return Vec::new();
        }
        let ids: Vec<PeriodId> = match id {
            PeriodId::Month(_) => Vec::new(),
            PeriodId::Quarter(q) => (0..3).map(|i| PeriodId::Month((q - 1) * 3 + 1 + i)).collect(),
            PeriodId::Half(h) => (0..2).map(|i| PeriodId::Quarter((h - 1) * 2 + 1 + i)).collect(),
            PeriodId::Annual => vec![PeriodId::Half(1), PeriodId::Half(2)],
        };
        ids.into_iter().filter_map(|c| self.get(c)).collect()
    }

    pub fn parent_of(&self, id: PeriodId) -> Option<PeriodId> {
        self.get(id).and_then(|p| p.parent)
    }

    /// Ancestors from the immediate parent up to the fiscal year.
    pub fn ancestors_of(&self, id: PeriodId) -> Vec<PeriodId> {
        let mut out = Vec::with_capacity(3);
        let mut current = self.parent_of(id);
        while let Some(p) = current {
            out.push(p);
            current = self.parent_of(p);
        }
        out
    }

    pub fn is_editable(&self, id: PeriodId) -> bool {
        self.get(id).map_or(false, |p| p.editable)
    }

    pub fn label(&self, id: PeriodId) -> &str {
        self.get(id).map_or("", |p| p.label.as_str())
    }

    /// Fiscal month holding the given calendar month (1-12).
    pub fn month_for_calendar(&self, calendar_month: u32) -> Option<PeriodId> {
        if !(1..=12).contains(&calendar_month) {
            return None;
        }
        let fiscal = (calendar_month + 12 - self.start_month) % 12 + 1;
        Some(PeriodId::Month(fiscal as u8))
    }

    /// Resolve a period code, case-insensitive.
    ///
    /// Accepts `FY`, `H1`-`H2`, `Q1`-`Q4`, fiscal months `P1`/`P01`-`P12`
    /// and calendar month codes `JAN`-`DEC`.
    pub fn resolve(&self, code: &str) -> Option<PeriodId> {
        let code = code.trim().to_ascii_uppercase();
        if code == "FY" {
            return Some(PeriodId::Annual);
        }
        if let Some(pos) = MONTH_CODES.iter().position(|m| *m == code) {
            return self.month_for_calendar(pos as u32 + 1);
        }
        let (prefix, rest) = code.split_at(code.len().min(1));
        let n: u8 = rest.parse().ok()?;
        let id = match prefix {
            "P" => PeriodId::Month(n),
            "Q" => PeriodId::Quarter(n),
            "H" => PeriodId::Half(n),
            _ => return None,
        };
        self.contains(id).then_some(id)
    }
}

impl Default for PeriodHierarchy {
    fn default() -> Self {
        Self::fiscal_year(4)
    }
}
