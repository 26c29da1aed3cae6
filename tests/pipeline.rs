mod common;

use std::fs;

use chrono::NaiveDate;
use common::TestWorkspace;
use table_refinery::{
    cleaning::ImputationMethod,
    data::Value,
    pipeline::{Pipeline, PipelineState, ProcessRequest},
    quality::QualityLevel,
    storage,
    typing::SemanticType,
};

#[test]
fn orders_fixture_runs_every_layer() {
    let workspace = TestWorkspace::new();
    let input = workspace.copy_fixture("orders.csv");
    let report = workspace.process(&input, "csv", "orders");
    assert!(report.success, "{:?}", report.error);

    let layers = &report.layers;
    let ingestion = layers.ingestion.as_ref().expect("ingestion");
    assert_eq!((ingestion.row_count, ingestion.column_count), (11, 8));
    assert_eq!(ingestion.delimiter.as_deref(), Some(","));
    assert_eq!(ingestion.encoding.as_deref(), Some("ascii"));

    let validation = layers.validation.as_ref().expect("validation");
    assert_eq!(validation.issues, vec!["Removed 1 empty rows"]);
    assert_eq!(validation.stats.final_rows, 10);

    let normalization = layers.normalization.as_ref().expect("normalization");
    assert_eq!(normalization.column_mapping["Unit Price"], "unit_price");
    assert_eq!(normalization.column_mapping["Discount %"], "discount_percent");
    assert_eq!(normalization.transformation_count, 7);

    let types = &layers.typing.as_ref().expect("typing").type_info;
    assert_eq!(types["order_id"].detected_type, SemanticType::Integer);
    assert_eq!(types["customer"].detected_type, SemanticType::String);
    assert_eq!(types["unit_price"].detected_type, SemanticType::Currency);
    assert_eq!(types["discount_percent"].detected_type, SemanticType::Percentage);
    assert_eq!(types["ordered_on"].detected_type, SemanticType::Date);
    assert_eq!(types["contact"].detected_type, SemanticType::Email);
    assert_eq!(types["rating"].detected_type, SemanticType::Float);
    assert!(types.values().all(|info| info.conversion_success_rate == 100.0));

    let cleaning = layers.cleaning.as_ref().expect("cleaning");
    let records = &cleaning.cleaning_report;
    assert_eq!(records["order_id"].duplicates_removed, 1);
    assert_eq!(records["quantity"].imputation_method, ImputationMethod::Mode);
    assert_eq!(records["ordered_on"].imputation_method, ImputationMethod::ForwardFill);
    assert_eq!(records["unit_price"].outliers_handled, 2);
    assert_eq!(records["discount_percent"].outliers_handled, 1);
    assert_eq!(cleaning.total_imputed, 3);
    assert_eq!(cleaning.total_outliers, 3);

    let quality = &layers.quality.as_ref().expect("quality").quality_report;
    assert_eq!(quality.columns["contact"].consistency, 100.0);
    assert!(
        quality.columns["unit_price"]
            .issues
            .contains(&"22.2% outliers handled".to_string())
    );
    assert_eq!(quality.dataset_stats.total_rows, 9);
    assert_eq!(quality.dataset_stats.missing_cells, 0);

    let stats = report.final_stats.as_ref().expect("final stats");
    assert_eq!((stats.rows, stats.columns), (9, 8));
    assert_eq!(stats.quality_score, quality.overall_score);

    let storage_report = layers.storage.as_ref().expect("storage");
    assert_eq!(storage_report.storage.format, "parquet");
    assert_eq!(storage_report.storage.compression, "snappy");
    assert_eq!(storage_report.storage.preview_rows, 9);
    assert!(storage_report.storage.compression_ratio_percent.is_some());

    let config = workspace.config();
    let clean = storage::load_clean(&config, "orders").expect("load clean");
    assert_eq!(clean.row_count(), 9);
    let customers = clean.column("customer").expect("customer column");
    assert_eq!(
        customers.values[7],
        Some(Value::String("Linus Torvalds".to_string()))
    );
    let dates = clean.column("ordered_on").expect("date column");
    assert_eq!(
        dates.values[3],
        Some(Value::Date(NaiveDate::from_ymd_opt(2024, 1, 4).unwrap()))
    );
    let prices = clean.column("unit_price").expect("price column");
    assert_eq!(prices.values[1], Some(Value::Float(170.125)));
}

#[test]
fn label_row_is_merged_into_header() {
    let workspace = TestWorkspace::new();
    let input = workspace.copy_fixture("multi_header.csv");
    let report = workspace.process(&input, "csv", "people");
    assert!(report.success, "{:?}", report.error);

    let validation = report.layers.validation.as_ref().expect("validation");
    assert!(
        validation
            .issues
            .contains(&"Multi-header rows detected and merged".to_string())
    );
    let mapping = &report
        .layers
        .normalization
        .as_ref()
        .expect("normalization")
        .column_mapping;
    assert_eq!(mapping["name_Full Name"], "name_full_name");
    assert_eq!(mapping["age_Years"], "age_years");
    let final_stats = report.final_stats.expect("final stats");
    assert_eq!(final_stats.rows, 3);

    let types = &report.layers.typing.expect("typing").type_info;
    assert_eq!(types["age_years"].detected_type, SemanticType::Integer);
}

#[test]
fn currency_column_is_cast_to_floats() {
    let workspace = TestWorkspace::new();
    let input = workspace.write(
        "prices.csv",
        "item,qty,price\nwidget,3,\"$1,234.00\"\ngadget,5,\"$56.00\"\n",
    );
    let report = workspace.process(&input, "csv", "prices");
    assert!(report.success, "{:?}", report.error);

    let info = &report.layers.typing.as_ref().expect("typing").type_info["price"];
    assert_eq!(info.detected_type, SemanticType::Currency);
    assert_eq!(info.final_dtype, "float64");
    assert_eq!(
        info.sample_values,
        vec![serde_json::json!(1234.0), serde_json::json!(56.0)]
    );

    let clean = storage::load_clean(&workspace.config(), "prices").expect("load clean");
    assert_eq!(
        clean.column("price").expect("price").values,
        vec![Some(Value::Float(1234.0)), Some(Value::Float(56.0))]
    );
}

#[test]
fn sparse_column_is_imputed_and_flagged() {
    let workspace = TestWorkspace::new();
    let mut contents = String::from("seq,note\n");
    for row in 1..=100 {
        let note = if [10, 50, 90].contains(&row) { "checked" } else { "" };
        contents.push_str(&format!("{row},{note}\n"));
    }
    let input = workspace.write("sparse.csv", &contents);
    let report = workspace.process(&input, "csv", "sparse");
    assert!(report.success, "{:?}", report.error);

    let cleaning = report.layers.cleaning.as_ref().expect("cleaning");
    assert_eq!(cleaning.cleaning_report["note"].original_nulls, 97);
    assert_eq!(cleaning.cleaning_report["note"].imputed_nulls, 97);
    let quality = &report.layers.quality.as_ref().expect("quality").quality_report;
    assert!(
        quality.columns["note"]
            .issues
            .contains(&"97.0% values imputed".to_string())
    );
}

#[test]
fn trailing_total_row_is_dropped() {
    let workspace = TestWorkspace::new();
    let input = workspace.write(
        "sales.csv",
        "region,units\nnorth,10\nsouth,12\neast,9\nwest,14\ncentral,7\nTotal,52\n",
    );
    let report = workspace.process(&input, "csv", "sales");
    assert!(report.success, "{:?}", report.error);

    let validation = report.layers.validation.as_ref().expect("validation");
    assert!(
        validation
            .issues
            .contains(&"Removed 1 footer/summary rows".to_string())
    );
    assert_eq!(report.final_stats.expect("final stats").rows, 5);
}

#[test]
fn reprocessing_is_deterministic() {
    let workspace = TestWorkspace::new();
    let input = workspace.copy_fixture("orders.csv");

    let first = workspace.process(&input, "csv", "orders");
    let second = workspace.process(&input, "csv", "orders");
    assert!(first.success && second.success);

    let first_ingestion = first.layers.ingestion.as_ref().expect("ingestion");
    let second_ingestion = second.layers.ingestion.as_ref().expect("ingestion");
    assert_eq!(first_ingestion.fingerprint, second_ingestion.fingerprint);
    assert_eq!(first_ingestion.raw_path, second_ingestion.raw_path);
    assert_eq!(first.layers.typing, second.layers.typing);
    assert_eq!(first.layers.cleaning, second.layers.cleaning);
    assert_eq!(
        first.final_stats.as_ref().map(|s| s.quality_score),
        second.final_stats.as_ref().map(|s| s.quality_score)
    );

    let files = workspace.stored_files();
    assert_eq!(files.len(), 3, "{files:?}");
    assert!(files.iter().all(|name| !name.ends_with(".tmp")));
}

#[test]
fn failed_run_keeps_previous_artifacts() {
    let workspace = TestWorkspace::new();
    let good = workspace.write("good.csv", "code,qty\nA,1\nB,2\n");
    let first = workspace.process(&good, "csv", "inventory");
    assert!(first.success, "{:?}", first.error);
    let before = workspace.stored_files();

    let empty = workspace.write("empty.csv", "");
    let failed = workspace.process(&empty, "csv", "inventory");
    assert!(!failed.success);
    assert_eq!(failed.error_type.as_deref(), Some("IngestionError"));
    assert!(failed.error.as_deref().unwrap_or_default().contains("File is empty"));
    assert!(failed.final_stats.is_none());

    assert_eq!(workspace.stored_files(), before);
    let clean = storage::load_clean(&workspace.config(), "inventory").expect("load clean");
    assert_eq!(clean.row_count(), 2);
}

#[test]
fn storage_failure_discards_staged_archive() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("data.csv", "label,qty\nA,1\nB,2\n");
    fs::create_dir_all(workspace.storage_root()).expect("storage root");
    fs::write(workspace.storage_root().join("clean"), "not a directory").expect("blocker");

    let report = workspace.process(&input, "csv", "blocked");
    assert!(!report.success);
    assert_eq!(report.error_type.as_deref(), Some("StorageError"));
    assert_eq!(report.error_stage, Some(PipelineState::Scored));
    assert!(report.layers.ingestion.is_some());
    assert!(report.layers.quality.is_some());
    assert!(report.layers.storage.is_none());
    assert_eq!(workspace.stored_files(), vec!["clean".to_string()]);
}

#[test]
fn invalid_source_id_is_rejected_before_reading() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("data.csv", "a,b\n1,2\n");
    let report = Pipeline::new(workspace.config())
        .process(&ProcessRequest::new(&input, "csv", "../outside"));
    assert!(!report.success);
    assert_eq!(report.error_type.as_deref(), Some("IngestionError"));
    assert!(report.layers.ingestion.is_none());
    assert!(workspace.stored_files().is_empty());
}

#[test]
fn report_serializes_with_layer_sections() {
    let workspace = TestWorkspace::new();
    let input = workspace.copy_fixture("scores.tsv");
    let report = workspace.process(&input, "tsv", "scores");
    let json: serde_json::Value =
        serde_json::from_str(&report.to_json_pretty().expect("json")).expect("parse json");

    assert_eq!(json["success"], true);
    assert_eq!(json["source_type"], "tsv");
    assert_eq!(json["layers"]["ingestion"]["delimiter"], "\\t");
    assert_eq!(
        json["layers"]["typing"]["type_info"]["score"]["detected_type"],
        "float"
    );
    assert_eq!(
        json["layers"]["cleaning"]["cleaning_report"]["id"]["imputation_method"],
        "none"
    );
    assert!(json["final_stats"]["quality_level"].is_string());
    assert!(json.get("error").is_none());
}

#[test]
fn quality_level_matches_final_stats() {
    let workspace = TestWorkspace::new();
    let input = workspace.copy_fixture("scores.tsv");
    let report = workspace.process(&input, "tsv", "scores");
    let stats = report.final_stats.expect("final stats");
    assert_eq!(stats.quality_level, QualityLevel::from_score(stats.quality_score));
}
