// fpgrid CLI - plan file checks, edits, formulas and grid export

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::debug;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use fpgrid_cli::cell_arg::CellArg;
use fpgrid_cli::exit_codes::{EXIT_INCONSISTENT, EXIT_PLAN, EXIT_REJECTED, EXIT_SUCCESS, EXIT_USAGE};
use fpgrid_cli::term_arg::TermArg;
use fpgrid_config::Settings;
use fpgrid_engine::{EngineError, FormulaTerm, PlanSession, RejectReason, SessionOptions};
use fpgrid_io::{json as grid_json, plan, PlanIoError, TomlPlanRepository};

#[derive(Parser)]
#[command(name = "fpgrid")]
#[command(about = "Hierarchical planning grids: check, edit and export TOML plan files")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the user config dir)
    #[arg(long, global = true, env = "FPGRID_SETTINGS", value_name = "PATH")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a plan, recompute every derived cell, and report consistency
    #[command(after_help = "\
Examples:
  fpgrid check budget.toml
  RUST_LOG=debug fpgrid check budget.toml")]
    Check {
        /// Plan file
        plan: PathBuf,
    },

    /// Edit month values of leaf rows; prints the changed cells of each edit
    #[command(after_help = "\
Examples:
  fpgrid edit budget.toml --cell SALES/CUST_A@APR=1000
  fpgrid edit budget.toml --cell SGA@APR=420 --cell SGA@MAY=380 --write")]
    Edit {
        /// Plan file
        plan: PathBuf,

        /// Cell assignment SUBJECT[/DIM]@PERIOD=VALUE. Repeatable; applied in order.
        #[arg(long = "cell", value_name = "CELL", required = true)]
        cells: Vec<CellArg>,

        /// Write the edited plan back to the plan file
        #[arg(long)]
        write: bool,
    },

    /// Move a dimension value (and its subtree) under a new parent
    #[command(after_help = "\
Examples:
  fpgrid reparent budget.toml DOM_WEST --parent OVERSEAS
  fpgrid reparent budget.toml CUST_A          (make CUST_A a root)")]
    Reparent {
        /// Plan file
        plan: PathBuf,

        /// Dimension value to move
        value: String,

        /// New parent; omit to make the value a root
        #[arg(long)]
        parent: Option<String>,

        /// Write the changed plan back to the plan file
        #[arg(long)]
        write: bool,
    },

    /// Replace the formula of an aggregate subject; prints the recomputed cells
    #[command(after_help = "\
Examples:
  fpgrid formula budget.toml OP --term GP --term SGA:-1
  fpgrid formula budget.toml NET --term OP:1 --term RENT:-1 --write
  fpgrid formula budget.toml GP               (empty formula, always 0)")]
    Formula {
        /// Plan file
        plan: PathBuf,

        /// Aggregate subject to define
        subject: String,

        /// Term INPUT[:COEF]. Repeatable; repeated inputs add up.
        #[arg(long = "term", value_name = "TERM")]
        terms: Vec<TermArg>,

        /// Write the changed plan back to the plan file
        #[arg(long)]
        write: bool,
    },

    /// Print subject grids as JSON (minor units keyed by period label)
    Grid {
        /// Plan file
        plan: PathBuf,

        /// Only this subject (prints one object instead of an array)
        #[arg(long)]
        subject: Option<String>,

        /// Output file (omit for stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    let options = session_options(cli.settings.as_deref());

    let result = match cli.command {
        Commands::Check { plan } => cmd_check(&plan, options),
        Commands::Edit { plan, cells, write } => cmd_edit(&plan, &cells, write, options),
        Commands::Reparent { plan, value, parent, write } => {
            cmd_reparent(&plan, &value, parent.as_deref(), write, options)
        }
        Commands::Formula { plan, subject, terms, write } => cmd_formula(&plan, &subject, &terms, write, options),
        Commands::Grid { plan, subject, output } => cmd_grid(&plan, subject.as_deref(), output.as_deref(), options),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

/// Log to stderr; `RUST_LOG` selects the level (default `warn`).
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .try_init();
}

fn session_options(settings_path: Option<&Path>) -> SessionOptions {
    let settings = match settings_path {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    debug!("settings: {:?}", settings);
    SessionOptions {
        fiscal_year_start_month: settings.fiscal_year_start_month,
        minor_unit_digits: settings.minor_unit_digits,
        log_changes: settings.log_changes,
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn plan(err: PlanIoError) -> Self {
        let hint = match &err {
            PlanIoError::Engine(_) => Some("the plan file references ids it does not define".to_string()),
            _ => None,
        };
        Self { code: EXIT_PLAN, message: err.to_string(), hint }
    }

    /// Engine rejection of a requested operation.
    pub fn rejected(err: EngineError) -> Self {
        let hint = match &err {
            EngineError::EditRejected { reason, .. } => Some(
                match reason {
                    RejectReason::NotMonth => "only month periods (APR, P01, ...) are editable",
                    RejectReason::AggregateSubject => "aggregate subjects are computed from their formula",
                    RejectReason::TotalsRow => "this subject has dimension rows; edit one of those",
                    RejectReason::DerivedRow => "this row rolls up its registered child values; edit those",
                    RejectReason::UnregisteredRow => "the subject has no row for this dimension value",
                }
                .to_string(),
            ),
            EngineError::InvalidNumber { .. } => {
                Some("amounts take at most amount.minorUnitDigits decimal places".to_string())
            }
            EngineError::InactiveParent(_) => Some("inactive values cannot take new children".to_string()),
            EngineError::NotAggregate(_) => Some("only aggregate subjects carry a formula".to_string()),
            EngineError::CircularReferenceDetected(_) => {
                Some("the change would make a value its own ancestor or a subject its own input".to_string())
            }
            _ => None,
        };
        Self { code: EXIT_REJECTED, message: err.to_string(), hint }
    }

    fn inconsistent(count: usize) -> Self {
        Self {
            code: EXIT_INCONSISTENT,
            message: format!("{} inconsistent cell(s)", count),
            hint: None,
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

fn open(path: &Path, options: SessionOptions) -> Result<PlanSession, CliError> {
    PlanSession::open(&TomlPlanRepository::from_path(path), options).map_err(CliError::plan)
}

fn write_back(session: &PlanSession, path: &Path) -> Result<(), CliError> {
    plan::save(&session.snapshot(), path).map_err(CliError::plan)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| CliError::usage(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

fn cmd_check(path: &Path, options: SessionOptions) -> Result<(), CliError> {
    let session = open(path, options)?;
    let violations = session.check_invariants().map_err(CliError::rejected)?;

    println!("plan:     {}", session.name());
    println!("values:   {}", session.dimensions().len());
    println!("subjects: {}", session.subjects().len());
    println!("leaves:   {}", session.store().leaf_count());
    println!("derived:  {}", session.store().derived_count());

    if violations.is_empty() {
        println!("status:   ok");
        return Ok(());
    }
    println!("status:   inconsistent");
    for violation in &violations {
        eprintln!("  {:?}", violation);
    }
    Err(CliError::inconsistent(violations.len()))
}

fn cmd_edit(path: &Path, cells: &[CellArg], write: bool, options: SessionOptions) -> Result<(), CliError> {
    let mut session = open(path, options)?;

    let mut results = Vec::with_capacity(cells.len());
    for cell in cells {
        let outcome = session
            .edit_leaf_cell(&cell.subject, cell.dimension.as_deref(), &cell.period, &cell.value)
            .map_err(|e| {
                let mut err = CliError::rejected(e);
                err.message = format!("{}: {}", cell, err.message);
                err
            })?;
        results.push(json!({
            "cell": cell.to_string(),
            "updated": grid_json::patch_to_value(&outcome.updated_cells),
        }));
    }

    if write {
        write_back(&session, path)?;
    }
    print_json(&Value::Array(results))
}

fn cmd_reparent(
    path: &Path,
    value: &str,
    parent: Option<&str>,
    write: bool,
    options: SessionOptions,
) -> Result<(), CliError> {
    let mut session = open(path, options)?;
    let outcome = session.reparent_dimension_value(value, parent).map_err(CliError::rejected)?;

    if write {
        write_back(&session, path)?;
    }
    let moved: Vec<String> = outcome.moved_subtree.iter().map(|v| v.id.to_string()).collect();
    print_json(&json!({
        "value": value,
        "parent": parent,
        "moved": moved,
        "recomputed": grid_json::patch_to_value(&outcome.recomputed_cells),
    }))
}

fn cmd_formula(
    path: &Path,
    subject: &str,
    terms: &[TermArg],
    write: bool,
    options: SessionOptions,
) -> Result<(), CliError> {
    let mut session = open(path, options)?;
    let formula: Vec<FormulaTerm> = terms.iter().map(TermArg::to_term).collect();
    let outcome = session
        .define_aggregate_formula(subject, &formula)
        .map_err(CliError::rejected)?;

    if write {
        write_back(&session, path)?;
    }
    let terms: Vec<String> = terms.iter().map(|t| t.to_string()).collect();
    print_json(&json!({
        "subject": subject,
        "terms": terms,
        "recomputed": grid_json::patch_to_value(&outcome.recomputed_cells),
    }))
}

fn cmd_grid(path: &Path, subject: Option<&str>, output: Option<&Path>, options: SessionOptions) -> Result<(), CliError> {
    let session = open(path, options)?;

    let ids: Vec<String> = match subject {
        Some(s) => vec![s.to_string()],
        None => session.subjects().ids().iter().map(|id| id.to_string()).collect(),
    };
    let mut grids = Vec::with_capacity(ids.len());
    for id in &ids {
        grids.push(session.grid(id).map_err(CliError::rejected)?);
    }

    if let Some(out) = output {
        return grid_json::export(&grids, out).map_err(CliError::plan);
    }
    match (subject, grids.first()) {
        (Some(_), Some(grid)) => print_json(&grid_json::grid_to_value(grid)),
        _ => print_json(&Value::Array(grids.iter().map(grid_json::grid_to_value).collect())),
    }
}
