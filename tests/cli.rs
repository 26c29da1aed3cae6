mod common;

use std::fs;

use assert_cmd::Command;
use common::TestWorkspace;
use predicates::{prelude::PredicateBooleanExt, str::contains};
use table_refinery::report::PipelineReport;

fn refinery() -> Command {
    Command::cargo_bin("table-refinery").expect("binary exists")
}

fn process_scores(workspace: &TestWorkspace) {
    let input = workspace.copy_fixture("scores.tsv");
    refinery()
        .args(["process", "-i"])
        .arg(&input)
        .arg("-s")
        .arg(workspace.storage_root())
        .assert()
        .success();
}

#[test]
fn process_prints_json_report_and_infers_type_and_id() {
    let workspace = TestWorkspace::new();
    let input = workspace.copy_fixture("scores.tsv");

    let output = refinery()
        .args(["process", "-i"])
        .arg(&input)
        .arg("-s")
        .arg(workspace.storage_root())
        .output()
        .expect("run process");
    assert!(output.status.success());

    let report: PipelineReport =
        serde_json::from_slice(&output.stdout).expect("stdout holds the report");
    assert!(report.success);
    assert_eq!(report.source_type, "tsv");
    assert_eq!(report.source_id, "scores");
    assert_eq!(report.final_stats.expect("final stats").rows, 3);
    assert!(workspace.storage_root().join("clean/scores.parquet").is_file());
    assert!(workspace.storage_root().join("preview/scores.parquet").is_file());
}

#[test]
fn process_writes_report_file_when_requested() {
    let workspace = TestWorkspace::new();
    let input = workspace.copy_fixture("orders.csv");
    let report_path = workspace.path().join("run.json");

    refinery()
        .args(["process", "-i"])
        .arg(&input)
        .args(["-t", "csv", "--source-id", "orders_2024", "-s"])
        .arg(workspace.storage_root())
        .arg("-r")
        .arg(&report_path)
        .assert()
        .success()
        .stdout(contains("\"source_id\": \"orders_2024\""));

    let written = fs::read_to_string(&report_path).expect("report file");
    let report: PipelineReport = serde_json::from_str(&written).expect("parse report");
    assert_eq!(report.source_id, "orders_2024");
    assert!(report.layers.storage.is_some());
}

#[test]
fn failed_run_exits_non_zero_with_error_type() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("empty.csv", "");

    refinery()
        .args(["process", "-i"])
        .arg(&input)
        .arg("-s")
        .arg(workspace.storage_root())
        .assert()
        .failure()
        .code(1)
        .stdout(contains("\"success\": false"))
        .stderr(contains("Pipeline failed with IngestionError").and(contains("File is empty")));
}

#[test]
fn unknown_extension_requires_source_type() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("data.xml", "<rows/>");

    refinery()
        .args(["process", "-i"])
        .arg(&input)
        .arg("-s")
        .arg(workspace.storage_root())
        .assert()
        .failure()
        .stderr(contains("Cannot infer the source type"));
}

#[test]
fn unsupported_source_type_is_reported() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("data.csv", "a,b\n1,2\n");

    refinery()
        .args(["process", "-i"])
        .arg(&input)
        .args(["-t", "xml", "-s"])
        .arg(workspace.storage_root())
        .assert()
        .failure()
        .stderr(contains("Unsupported source type: xml"));
}

#[test]
fn preview_renders_stored_rows() {
    let workspace = TestWorkspace::new();
    process_scores(&workspace);

    refinery()
        .args(["preview", "--source-id", "scores", "--rows", "2", "-s"])
        .arg(workspace.storage_root())
        .assert()
        .success()
        .stdout(
            contains("id")
                .and(contains("score"))
                .and(contains("grace"))
                .and(contains("alan").not()),
        );
}

#[test]
fn preview_of_unknown_source_fails() {
    let workspace = TestWorkspace::new();

    refinery()
        .args(["preview", "--source-id", "missing", "-s"])
        .arg(workspace.storage_root())
        .assert()
        .failure()
        .stderr(contains("Preview data not found for source missing"));
}

#[test]
fn stats_summarizes_numeric_columns() {
    let workspace = TestWorkspace::new();
    process_scores(&workspace);

    refinery()
        .args(["stats", "--source-id", "scores", "-s"])
        .arg(workspace.storage_root())
        .assert()
        .success()
        .stdout(
            contains("float64")
                .and(contains("9.5000"))
                .and(contains("8.2500"))
                .and(contains("non_null")),
        );
}

#[test]
fn config_file_sets_storage_root() {
    let workspace = TestWorkspace::new();
    let input = workspace.copy_fixture("scores.tsv");
    let storage = workspace.path().join("from-config");
    let config = workspace.write(
        "pipeline.yaml",
        &format!("storage_root: {}\npreview_rows: 2\n", storage.display()),
    );

    refinery()
        .args(["process", "-i"])
        .arg(&input)
        .arg("-c")
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("\"preview_rows\": 2"));
    assert!(storage.join("clean/scores.parquet").is_file());
}
