// TOML plan files

use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use fpgrid_engine::{PlanRepository, PlanSnapshot};

use crate::error::PlanIoError;

/// Plan repository backed by a TOML document.
#[derive(Clone, Debug)]
pub struct TomlPlanRepository {
    origin: String,
    source: Source,
}

#[derive(Clone, Debug)]
enum Source {
    Path(PathBuf),
    Text(String),
}

impl TomlPlanRepository {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self { origin: path.display().to_string(), source: Source::Path(path) }
    }

    pub fn from_toml(text: impl Into<String>) -> Self {
        Self { origin: "<inline>".to_string(), source: Source::Text(text.into()) }
    }

    fn read(&self) -> Result<String, PlanIoError> {
        match &self.source {
            Source::Path(path) => fs::read_to_string(path).map_err(|e| PlanIoError::io(path, e)),
            Source::Text(text) => Ok(text.clone()),
        }
    }
}

impl PlanRepository for TomlPlanRepository {
    type Error = PlanIoError;

    fn load(&self) -> Result<PlanSnapshot, PlanIoError> {
        let text = self.read()?;
        let snapshot = parse(&text, &self.origin)?;
        info!(
            "loaded plan '{}' from {}: {} values, {} subjects, {} leaves",
            snapshot.name,
            self.origin,
            snapshot.dimension_values.len(),
            snapshot.subjects.len(),
            snapshot.leaves.len()
        );
        Ok(snapshot)
    }
}

/// Parse and validate a plan document.
pub fn parse(text: &str, origin: &str) -> Result<PlanSnapshot, PlanIoError> {
    let snapshot: PlanSnapshot = toml::from_str(text).map_err(|e| PlanIoError::Parse {
        origin: origin.to_string(),
        message: e.message().to_string(),
    })?;
    validate(&snapshot)?;
    Ok(snapshot)
}

/// Field-level checks the engine does not make.
fn validate(snapshot: &PlanSnapshot) -> Result<(), PlanIoError> {
    let blank = |what: &str, index: usize| PlanIoError::Validation(format!("{} #{} has an empty id", what, index + 1));

    for (i, value) in snapshot.dimension_values.iter().enumerate() {
        if value.id.trim().is_empty() {
            return Err(blank("dimension value", i));
        }
    }
    for (i, subject) in snapshot.subjects.iter().enumerate() {
        if subject.id.trim().is_empty() {
            return Err(blank("subject", i));
        }
        if let Some(term) = subject.terms.iter().find(|t| t.coefficient == 0) {
            return Err(PlanIoError::Validation(format!(
                "subject {}: term {} has a zero coefficient",
                subject.id, term.input
            )));
        }
    }
    for (i, leaf) in snapshot.leaves.iter().enumerate() {
        if leaf.subject.trim().is_empty() || leaf.period.trim().is_empty() {
            return Err(PlanIoError::Validation(format!("leaf #{} needs a subject and a period", i + 1)));
        }
    }
    Ok(())
}

/// Serialize a snapshot as a TOML plan document.
pub fn to_toml(snapshot: &PlanSnapshot) -> Result<String, PlanIoError> {
    toml::to_string_pretty(snapshot).map_err(|e| PlanIoError::Parse {
        origin: snapshot.name.clone(),
        message: e.to_string(),
    })
}

/// Write a snapshot to `path`, replacing any existing file.
pub fn save(snapshot: &PlanSnapshot, path: &Path) -> Result<(), PlanIoError> {
    let text = to_toml(snapshot)?;
    fs::write(path, text).map_err(|e| PlanIoError::io(path, e))?;
    info!("saved plan '{}' to {}", snapshot.name, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpgrid_engine::repository::LeafValue;
    use fpgrid_engine::{EngineError, PlanSession, SessionOptions};
    use tempfile::tempdir;

    const PLAN: &str = r#"
name = "FY2025 Budget"

[[dimension_values]]
id = "DOMESTIC"
name = "Domestic"
scope = "region"

[[dimension_values]]
id = "CUST_A"
name = "Customer A"
scope = "customer"
parent = "DOMESTIC"

[[dimension_values]]
id = "CUST_B"
name = "Customer B"
scope = "customer"
parent = "DOMESTIC"
sort_order = 2

[[subjects]]
id = "SALES"
name = "Sales"
class = "base"
rows = ["CUST_A", "CUST_B"]

[[subjects]]
id = "COGS"
name = "Cost of Sales"
class = "base"

[[subjects]]
id = "GP"
name = "Gross Profit"
class = "aggregate"
terms = [{ input = "SALES", coefficient = 1 }, { input = "COGS", coefficient = -1 }]

[[leaves]]
subject = "SALES"
dimension = "CUST_A"
period = "APR"
value = "400"

[[leaves]]
subject = "SALES"
dimension = "CUST_B"
period = "APR"
value = 350

[[leaves]]
subject = "COGS"
period = "APR"
value = "1,000"
"#;

    #[test]
    fn test_load_plan() {
        let repo = TomlPlanRepository::from_toml(PLAN);
        let snapshot = repo.load().unwrap();
        assert_eq!(snapshot.name, "FY2025 Budget");
        assert_eq!(snapshot.dimension_values[1].parent.as_deref(), Some("DOMESTIC"));
        assert_eq!(snapshot.subjects[2].terms[1].coefficient, -1);
        assert_eq!(snapshot.leaves[0].value, LeafValue::Text("400".into()));
        assert_eq!(snapshot.leaves[1].value, LeafValue::Number(350));

        let session = PlanSession::open(&repo, SessionOptions::default()).unwrap();
        let sales = session.value("SALES", None, "APR").unwrap().unwrap();
        assert_eq!(sales.minor_units(), 750);
        let gp = session.value("GP", None, "FY").unwrap().unwrap();
        assert_eq!(gp.minor_units(), -250);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.toml");
        fs::write(&path, PLAN).unwrap();

        let snapshot = TomlPlanRepository::from_path(&path).load().unwrap();
        assert_eq!(snapshot.subjects.len(), 3);

        let missing = TomlPlanRepository::from_path(dir.path().join("missing.toml")).load();
        assert!(matches!(missing, Err(PlanIoError::Io { .. })));
    }

    #[test]
    fn test_parse_errors() {
        let err = parse("name = ", "bad.toml").unwrap_err();
        assert!(matches!(err, PlanIoError::Parse { ref origin, .. } if origin == "bad.toml"));

        let err = parse("[[subjects]]\nid = \"X\"\nname = \"X\"\nclass = \"ratio\"\n", "x").unwrap_err();
        assert!(matches!(err, PlanIoError::Parse { .. }));

        let err = parse("[[dimension_values]]\nid = \" \"\nname = \"Blank\"\n", "x").unwrap_err();
        assert_eq!(err.to_string(), "plan validation failed: dimension value #1 has an empty id");

        let zero = "[[subjects]]\nid = \"GP\"\nname = \"GP\"\nclass = \"aggregate\"\nterms = [{ input = \"S\", coefficient = 0 }]\n";
        assert!(matches!(parse(zero, "x"), Err(PlanIoError::Validation(_))));
    }

    #[test]
    fn test_engine_errors_pass_through() {
        let plan = "[[leaves]]\nsubject = \"RENT\"\nperiod = \"APR\"\nvalue = 1\n";
        let repo = TomlPlanRepository::from_toml(plan);
        let Err(err) = PlanSession::open(&repo, SessionOptions::default()) else {
            panic!("unknown subject should fail");
        };
        assert!(matches!(err, PlanIoError::Engine(EngineError::SubjectNotFound(_))));
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.toml");

        let repo = TomlPlanRepository::from_toml(PLAN);
        let mut session = PlanSession::open(&repo, SessionOptions::default()).unwrap();
        session.edit_leaf_cell("SALES", Some("CUST_B"), "MAY", "25").unwrap();
        save(&session.snapshot(), &path).unwrap();

        let reopened = PlanSession::open(&TomlPlanRepository::from_path(&path), SessionOptions::default()).unwrap();
        assert_eq!(reopened.grid("GP").unwrap(), session.grid("GP").unwrap());
        assert_eq!(reopened.name(), "FY2025 Budget");
    }
}
