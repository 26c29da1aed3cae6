mod common;

use common::TestWorkspace;
use table_refinery::{
    data::Value,
    error::PipelineError,
    ingest::{self, Ingested, SheetSelector, SourceType},
    storage,
};

fn ingest_file(
    workspace: &TestWorkspace,
    path: &std::path::Path,
    source_type: SourceType,
) -> Result<Ingested, PipelineError> {
    ingest::ingest(
        path,
        source_type,
        &SheetSelector::default(),
        &workspace.config(),
        "test-run",
    )
}

fn text(value: &str) -> Option<Value> {
    Some(Value::String(value.to_string()))
}

#[test]
fn tsv_is_split_on_tabs() {
    let workspace = TestWorkspace::new();
    let input = workspace.copy_fixture("scores.tsv");
    let ingested = ingest_file(&workspace, &input, SourceType::Tsv).expect("ingest tsv");

    assert_eq!(ingested.report.delimiter.as_deref(), Some("\\t"));
    assert_eq!(ingested.report.columns, vec!["id", "name", "score"]);
    assert_eq!(ingested.dataset.row_count(), 3);
    ingested.raw_archive.discard();
}

#[test]
fn semicolon_delimiter_is_detected() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("eu.csv", "city;amount\nLyon;1,5\nGent;2,25\n");
    let ingested = ingest_file(&workspace, &input, SourceType::Csv).expect("ingest csv");

    assert_eq!(ingested.report.delimiter.as_deref(), Some(";"));
    let amounts = ingested.dataset.column("amount").expect("amount column");
    assert_eq!(amounts.values, vec![text("1,5"), text("2,25")]);
    ingested.raw_archive.discard();
}

#[test]
fn null_tokens_and_short_rows_become_missing() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("gaps.csv", "a,b,c\n1,NA,3\n4\n");
    let ingested = ingest_file(&workspace, &input, SourceType::Csv).expect("ingest csv");

    let first = ingested.dataset.row(0);
    assert_eq!(first[0], Some(&Value::String("1".to_string())));
    assert!(first[1].is_none());
    let short = ingested.dataset.row(1);
    assert_eq!(short.len(), 3);
    assert!(short[1].is_none() && short[2].is_none());
    ingested.raw_archive.discard();
}

#[test]
fn windows_1252_bytes_are_decoded() {
    let workspace = TestWorkspace::new();
    let input = workspace.write_bytes("legacy.csv", b"name,drink\nada,caf\xe9\n");
    let ingested = ingest_file(&workspace, &input, SourceType::Csv).expect("ingest csv");

    assert_eq!(ingested.report.encoding.as_deref(), Some("windows-1252"));
    assert_eq!(
        ingested.dataset.column("drink").expect("drink column").values,
        vec![text("café")]
    );
    ingested.raw_archive.discard();
}

#[test]
fn utf8_bom_is_stripped_from_first_header() {
    let workspace = TestWorkspace::new();
    let input = workspace.write_bytes("bom.csv", b"\xef\xbb\xbfid,name\n1,ada\n");
    let ingested = ingest_file(&workspace, &input, SourceType::Csv).expect("ingest csv");

    assert_eq!(ingested.report.encoding.as_deref(), Some("UTF-8"));
    assert_eq!(ingested.report.columns, vec!["id", "name"]);
    ingested.raw_archive.discard();
}

#[test]
fn json_records_keep_native_types() {
    let workspace = TestWorkspace::new();
    let input = workspace.write(
        "events.json",
        r#"[{"id": 1, "active": true, "user": {"name": "ada"}, "score": 2.5},
            {"id": 2, "active": false, "user": {"name": "linus"}, "score": null}]"#,
    );
    let ingested = ingest_file(&workspace, &input, SourceType::Json).expect("ingest json");
    let dataset = &ingested.dataset;

    assert_eq!(dataset.column_names(), vec!["id", "active", "user.name", "score"]);
    assert_eq!(
        dataset.column("id").expect("id").values,
        vec![Some(Value::Integer(1)), Some(Value::Integer(2))]
    );
    assert_eq!(
        dataset.column("active").expect("active").values,
        vec![Some(Value::Boolean(true)), Some(Value::Boolean(false))]
    );
    assert_eq!(
        dataset.column("score").expect("score").values,
        vec![Some(Value::Float(2.5)), None]
    );
    assert!(ingested.report.delimiter.is_none());
    ingested.raw_archive.discard();
}

#[test]
fn parquet_written_by_a_previous_run_can_be_ingested() {
    let workspace = TestWorkspace::new();
    let input = workspace.copy_fixture("scores.tsv");
    let report = workspace.process(&input, "tsv", "scores");
    assert!(report.success, "{:?}", report.error);

    let parquet = storage::clean_path(&workspace.config(), "scores");
    let ingested = ingest_file(&workspace, &parquet, SourceType::Parquet).expect("ingest parquet");
    assert_eq!(ingested.report.columns, vec!["id", "name", "score"]);
    assert_eq!(ingested.dataset.row_count(), 3);
    assert!(matches!(
        ingested.dataset.column("id").expect("id").values[0],
        Some(Value::Integer(_))
    ));
    ingested.raw_archive.discard();
}

#[test]
fn raw_archive_is_staged_not_committed() {
    let workspace = TestWorkspace::new();
    let input = workspace.copy_fixture("scores.tsv");
    let ingested = ingest_file(&workspace, &input, SourceType::Tsv).expect("ingest tsv");

    let files = workspace.stored_files();
    assert_eq!(files.len(), 1);
    assert!(files[0].starts_with("raw/"));
    assert!(files[0].ends_with(".test-run.tmp"));
    assert_eq!(
        ingested.raw_archive.target(),
        storage::raw_path(&workspace.config(), &ingested.report.fingerprint)
    );

    ingested.raw_archive.discard();
    assert!(workspace.stored_files().is_empty());
}

#[test]
fn empty_file_is_an_ingestion_error() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("empty.csv", "");
    let err = ingest_file(&workspace, &input, SourceType::Csv).unwrap_err();
    assert_eq!(err.error_type(), "IngestionError");
    assert!(err.to_string().contains("File is empty"));
}

#[test]
fn missing_file_is_an_ingestion_error() {
    let workspace = TestWorkspace::new();
    let input = workspace.path().join("absent.csv");
    let err = ingest_file(&workspace, &input, SourceType::Csv).unwrap_err();
    assert_eq!(err.error_type(), "IngestionError");
    assert!(err.to_string().contains("File not found"));
}

#[test]
fn corrupt_workbook_is_an_ingestion_error() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("broken.xlsx", "this is not a zip archive");
    let err = ingest_file(&workspace, &input, SourceType::Excel).unwrap_err();
    assert_eq!(err.error_type(), "IngestionError");
    assert!(workspace.stored_files().is_empty());
}

#[test]
fn malformed_json_is_an_ingestion_error() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("broken.json", "{\"a\": ");
    let err = ingest_file(&workspace, &input, SourceType::Json).unwrap_err();
    assert_eq!(err.error_type(), "IngestionError");
    assert!(err.to_string().contains("Parsing JSON"));
}

#[test]
fn storage_root_that_is_a_file_fails_with_storage_error() {
    let workspace = TestWorkspace::new();
    workspace.write("storage", "occupied");
    let input = workspace.copy_fixture("scores.tsv");

    let report = workspace.process(&input, "tsv", "scores");
    assert!(!report.success);
    assert_eq!(report.error_type.as_deref(), Some("StorageError"));
    assert!(report.layers.ingestion.is_none());
}
