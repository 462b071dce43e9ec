// Integration tests for the fpgrid binary.
// Run with: cargo test -p fpgrid-cli --test cli_tests

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn fpgrid() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_fpgrid"));
    cmd.env("FPGRID_SETTINGS", fixture("settings.json"));
    cmd.env_remove("RUST_LOG");
    cmd
}

fn run(args: &[&str]) -> Output {
    fpgrid().args(args).output().expect("run fpgrid")
}

fn budget() -> String {
    fixture("budget.toml").to_string_lossy().into_owned()
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "exit code: {:?}\nstderr: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

#[test]
fn check_reports_ok() {
    let output = run(&["check", &budget()]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("plan:     FY2025 Budget"));
    assert!(stdout.contains("subjects: 5"));
    assert!(stdout.contains("leaves:   4"));
    assert!(stdout.contains("status:   ok"));
}

#[test]
fn check_missing_plan_exits_3() {
    let output = run(&["check", "no-such-plan.toml"]);
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error: cannot access"));
}

// ---------------------------------------------------------------------------
// edit
// ---------------------------------------------------------------------------

#[test]
fn edit_prints_changed_cells() {
    let output = run(&["edit", &budget(), "--cell", "SGA@APR=420"]);
    let json = stdout_json(&output);

    assert_eq!(json[0]["cell"], "SGA@APR=420");
    let cells: Vec<&str> = json[0]["updated"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["cell"].as_str().unwrap())
        .collect();
    assert_eq!(cells, ["SGA@P01", "SGA@Q1", "SGA@H1", "SGA@FY", "OP@P01", "OP@Q1", "OP@H1", "OP@FY"]);
    assert_eq!(json[0]["updated"][4]["value"], 750 - 300 - 420);
}

#[test]
fn edits_apply_in_order() {
    let output = run(&[
        "edit",
        &budget(),
        "--cell",
        "SALES/CUST_A@APR=500",
        "--cell",
        "SALES/CUST_A@APR=500",
    ]);
    let json = stdout_json(&output);
    assert!(!json[0]["updated"].as_array().unwrap().is_empty());
    // Same value again changes nothing
    assert!(json[1]["updated"].as_array().unwrap().is_empty());
}

#[test]
fn quarter_edit_exits_4_with_hint() {
    let output = run(&["edit", &budget(), "--cell", "SGA@Q1=5"]);
    assert_eq!(output.status.code(), Some(4));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("SGA@Q1=5"), "{stderr}");
    assert!(stderr.contains("hint:  only month periods"), "{stderr}");
}

#[test]
fn malformed_cell_exits_2() {
    let output = run(&["edit", &budget(), "--cell", "SGA-APR-5"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn edit_write_persists() {
    let dir = tempfile::tempdir().unwrap();
    let plan = dir.path().join("plan.toml");
    std::fs::copy(fixture("budget.toml"), &plan).unwrap();
    let plan = plan.to_string_lossy().into_owned();

    stdout_json(&run(&["edit", &plan, "--cell", "COGS@MAY=75", "--write"]));

    let grid = stdout_json(&run(&["grid", &plan, "--subject", "GP"]));
    assert_eq!(grid["rows"][0]["values"]["MAY"], -75);
    assert_eq!(grid["rows"][0]["values"]["FY"], 750 - 300 - 75);
}

// ---------------------------------------------------------------------------
// reparent
// ---------------------------------------------------------------------------

#[test]
fn reparent_lists_moved_subtree() {
    let json = stdout_json(&run(&["reparent", &budget(), "DOM_WEST", "--parent", "OVERSEAS"]));
    assert_eq!(json["moved"], serde_json::json!(["DOM_WEST", "CUST_B"]));
}

#[test]
fn reparent_cycle_exits_4() {
    let output = run(&["reparent", &budget(), "DOM_EAST", "--parent", "DOM_EAST"]);
    assert_eq!(output.status.code(), Some(4));
    assert!(String::from_utf8_lossy(&output.stderr).contains("DOM_EAST"));
}

// ---------------------------------------------------------------------------
// formula
// ---------------------------------------------------------------------------

#[test]
fn formula_recomputes_subject_and_dependents() {
    let json = stdout_json(&run(&["formula", &budget(), "GP", "--term", "SALES", "--term", "COGS:-2"]));
    assert_eq!(json["subject"], "GP");
    assert_eq!(json["terms"], serde_json::json!(["SALES:1", "COGS:-2"]));

    let recomputed = json["recomputed"].as_array().unwrap();
    let value_of = |cell: &str| recomputed.iter().find(|u| u["cell"] == cell).map(|u| u["value"].clone());
    assert_eq!(value_of("GP@FY"), Some(Value::from(750 - 600)));
    assert_eq!(value_of("OP@FY"), Some(Value::from(750 - 600 - 100)));
}

#[test]
fn formula_write_persists() {
    let dir = tempfile::tempdir().unwrap();
    let plan = dir.path().join("plan.toml");
    std::fs::copy(fixture("budget.toml"), &plan).unwrap();
    let plan = plan.to_string_lossy().into_owned();

    stdout_json(&run(&["formula", &plan, "OP", "--term", "GP", "--write"]));

    let grid = stdout_json(&run(&["grid", &plan, "--subject", "OP"]));
    assert_eq!(grid["rows"][0]["values"]["FY"], 750 - 300);
    assert!(run(&["check", &plan]).status.success());
}

#[test]
fn formula_cycle_exits_4() {
    let output = run(&["formula", &budget(), "GP", "--term", "SALES", "--term", "OP"]);
    assert_eq!(output.status.code(), Some(4));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("GP"), "{stderr}");
    assert!(stderr.contains("hint:  the change would make"), "{stderr}");
}

#[test]
fn formula_on_base_subject_exits_4() {
    let output = run(&["formula", &budget(), "SALES", "--term", "COGS"]);
    assert_eq!(output.status.code(), Some(4));
    assert!(String::from_utf8_lossy(&output.stderr).contains("hint:  only aggregate subjects"));
}

#[test]
fn malformed_term_exits_2() {
    let output = run(&["formula", &budget(), "GP", "--term", "SALES:half"]);
    assert_eq!(output.status.code(), Some(2));
}

// ---------------------------------------------------------------------------
// grid
// ---------------------------------------------------------------------------

#[test]
fn grid_single_subject() {
    let json = stdout_json(&run(&["grid", &budget(), "--subject", "SALES"]));
    assert_eq!(json["subject"], "SALES");
    let rows = json["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["values"]["APR"], 750);
    assert_eq!(rows[0]["editable"], false);
    assert_eq!(rows[1]["dimension"], "CUST_A");
}

#[test]
fn grid_all_subjects_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("grid.json");
    let output = run(&["grid", &budget(), "-o", out.to_str().unwrap()]);
    assert!(output.status.success());

    let json: Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    let subjects: Vec<&str> = json.as_array().unwrap().iter().map(|g| g["subject"].as_str().unwrap()).collect();
    assert_eq!(subjects, ["COGS", "GP", "OP", "SALES", "SGA"]);
}

#[test]
fn unknown_subject_exits_4() {
    let output = run(&["grid", &budget(), "--subject", "RENT"]);
    assert_eq!(output.status.code(), Some(4));
}
