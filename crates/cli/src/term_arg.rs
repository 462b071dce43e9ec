//! `--term INPUT[:COEF]` arguments.

use std::fmt;
use std::str::FromStr;

use fpgrid_engine::FormulaTerm;

/// One formula term from the command line. The coefficient defaults to 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermArg {
    pub input: String,
    pub coefficient: i64,
}

impl TermArg {
    pub fn to_term(&self) -> FormulaTerm {
        FormulaTerm::new(self.input.as_str(), self.coefficient)
    }
}

impl FromStr for TermArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        let usage = || format!("invalid term '{}': expected INPUT[:COEF] with an integer COEF", s);

        let (input, coefficient) = match s.split_once(':') {
            Some((input, coef)) => (input.trim(), coef.trim().parse::<i64>().map_err(|_| usage())?),
            None => (s.trim(), 1),
        };
        if input.is_empty() {
            return Err(usage());
        }
        Ok(Self { input: input.to_string(), coefficient })
    }
}

impl fmt::Display for TermArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.input, self.coefficient)
    }
}
