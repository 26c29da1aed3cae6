//! The orchestrator: runs the seven layers in order and turns the outcome
//! into a [`PipelineReport`].
//!
//! Artifacts written during a run stay staged under run-scoped temporary
//! names until every layer has succeeded. A failed run removes them, so a
//! previous successful run for the same source id keeps its files.

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Instant,
};

use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    cleaning,
    config::PipelineConfig,
    error::{PipelineError, Result},
    ingest::{self, SheetSelector, SourceType},
    io_utils::StagedFile,
    normalize, quality,
    report::{FinalStats, Layers, PipelineReport, round2},
    repair, storage, typing,
};

/// Progress of a run. Each state is reached only after the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Started,
    Ingested,
    StructurallyValid,
    Normalized,
    Typed,
    Cleaned,
    Scored,
    Stored,
    Completed,
    Failed,
}

impl PipelineState {
    /// The state that follows a successful step; `None` once finished.
    pub fn next(self) -> Option<Self> {
        match self {
            PipelineState::Started => Some(PipelineState::Ingested),
            PipelineState::Ingested => Some(PipelineState::StructurallyValid),
            PipelineState::StructurallyValid => Some(PipelineState::Normalized),
            PipelineState::Normalized => Some(PipelineState::Typed),
            PipelineState::Typed => Some(PipelineState::Cleaned),
            PipelineState::Cleaned => Some(PipelineState::Scored),
            PipelineState::Scored => Some(PipelineState::Stored),
            PipelineState::Stored => Some(PipelineState::Completed),
            PipelineState::Completed | PipelineState::Failed => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Started => "started",
            PipelineState::Ingested => "ingested",
            PipelineState::StructurallyValid => "structurally_valid",
            PipelineState::Normalized => "normalized",
            PipelineState::Typed => "typed",
            PipelineState::Cleaned => "cleaned",
            PipelineState::Scored => "scored",
            PipelineState::Stored => "stored",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One invocation of [`Pipeline::process`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub path: PathBuf,
    /// Source type tag as supplied by the caller; parsed at the start of the run.
    pub source_type: String,
    pub source_id: String,
    pub sheet: SheetSelector,
}

impl ProcessRequest {
    pub fn new(
        path: impl Into<PathBuf>,
        source_type: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            source_type: source_type.into(),
            source_id: source_id.into(),
            sheet: SheetSelector::default(),
        }
    }

    pub fn with_sheet(mut self, sheet: SheetSelector) -> Self {
        self.sheet = sheet;
        self
    }
}

/// Mutable bookkeeping of a single run.
struct Run {
    state: PipelineState,
    layers: Layers,
    staged: Vec<StagedFile>,
}

impl Run {
    fn advance(&mut self) {
        if let Some(next) = self.state.next() {
            self.state = next;
        }
    }

    fn discard(&mut self) {
        for staged in self.staged.drain(..) {
            staged.discard();
        }
    }

    fn commit(&mut self) -> Result<()> {
        let mut staged = std::mem::take(&mut self.staged).into_iter();
        while let Some(file) = staged.next() {
            if let Err(err) = file.commit() {
                staged.for_each(StagedFile::discard);
                return Err(err);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs every layer for `request`. Failures never escape: they are
    /// recorded in the returned report with `success: false`.
    pub fn process(&self, request: &ProcessRequest) -> PipelineReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let run_id = Uuid::new_v4().simple().to_string();
        info!(
            "Starting pipeline run {run_id} for {} source {:?}",
            request.source_type, request.path
        );

        let mut run = Run {
            state: PipelineState::Started,
            layers: Layers::default(),
            staged: Vec::new(),
        };
        let outcome = self
            .run_layers(request, &run_id, &mut run)
            .and_then(|stats| run.commit().map(|_| stats));

        let duration_seconds = round2(clock.elapsed().as_secs_f64());
        let mut report = PipelineReport {
            source_id: request.source_id.clone(),
            source_type: request.source_type.clone(),
            file_path: request.path.display().to_string(),
            started_at,
            completed_at: Utc::now(),
            duration_seconds,
            success: false,
            error: None,
            error_type: None,
            error_stage: None,
            layers: Layers::default(),
            final_stats: None,
        };

        match outcome {
            Ok(stats) => {
                info!(
                    "Pipeline run {run_id} complete in {duration_seconds:.2}s: {} row(s), {} column(s), quality {} ({})",
                    stats.rows, stats.columns, stats.quality_score, stats.quality_level
                );
                report.success = true;
                report.final_stats = Some(stats);
            }
            Err(err) => {
                run.discard();
                warn!(
                    "Pipeline run {run_id} failed after reaching '{}': {err}",
                    run.state
                );
                report.error = Some(err.to_string());
                report.error_type = Some(err.error_type().to_string());
                report.error_stage = Some(run.state);
            }
        }
        report.layers = std::mem::take(&mut run.layers);
        report
    }

    fn run_layers(
        &self,
        request: &ProcessRequest,
        run_id: &str,
        run: &mut Run,
    ) -> Result<FinalStats> {
        self.config.validate()?;
        validate_source_id(&request.source_id)?;
        let source_type = request.source_type.parse::<SourceType>()?;

        let ingested = ingest::ingest(
            &request.path,
            source_type,
            &request.sheet,
            &self.config,
            run_id,
        )?;
        run.staged.push(ingested.raw_archive);
        let file_size = ingested.report.file_size;
        run.layers.ingestion = Some(ingested.report);
        run.advance();

        let (dataset, validation) = repair::repair(ingested.dataset);
        run.layers.validation = Some(validation);
        run.advance();

        let (dataset, normalization) = normalize::normalize(dataset);
        run.layers.normalization = Some(normalization);
        run.advance();

        let (dataset, typing_report) = typing::detect_types(dataset, &self.config);
        run.advance();

        let (dataset, cleaning_report) = cleaning::clean(dataset, &typing_report);
        run.advance();

        let quality_report = quality::score(&dataset, &typing_report, &cleaning_report);
        let overall = &quality_report.quality_report;
        let stats = FinalStats {
            rows: dataset.row_count(),
            columns: dataset.column_count(),
            quality_score: overall.overall_score,
            quality_level: overall.overall_level,
        };
        run.layers.typing = Some(typing_report);
        run.layers.cleaning = Some(cleaning_report);
        run.layers.quality = Some(quality_report);
        run.advance();

        let (storage_report, artifacts) = storage::store(
            &dataset,
            &request.source_id,
            &self.config,
            run_id,
            file_size,
        )?;
        run.staged.extend(artifacts.into_files());
        run.layers.storage = Some(storage_report);
        run.advance();

        Ok(stats)
    }
}

/// Source ids name artifact files, so they must be a single plain path
/// component.
pub fn validate_source_id(source_id: &str) -> Result<()> {
    let valid = !source_id.is_empty()
        && !source_id.starts_with('.')
        && source_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(PipelineError::ingestion(format!(
            "Invalid source id '{source_id}': use letters, digits, '-', '_' or '.'"
        )))
    }
}

/// Convenience wrapper for a one-off run with `config`.
pub fn process_file(
    config: PipelineConfig,
    path: &Path,
    source_type: &str,
    source_id: &str,
) -> PipelineReport {
    Pipeline::new(config).process(&ProcessRequest::new(path, source_type, source_id))
}
