use std::collections::HashSet;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use ndarray::Array2;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{ClientConfig, DEFAULT_OPERATION_EXT, DEFAULT_PLOT_THRESHOLD};
use crate::domain::{ImageSize, Preface, Project, Region, RetrievalUnit, TimeSlot};
use crate::error::RetrievalError;
use crate::fetch::Fetcher;
use crate::gap::{GapKind, GapPlan, compute_gap};
use crate::ledger::{CompletionLedger, DirectoryLedger, FileLedger, LedgerMode, open_ledger};
use crate::naming::canonical_name;
use crate::paths::relativize;
use crate::persist::{self, ArtifactStore, Persistence};
use crate::summary::SummaryTable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLocations {
    pub root: Utf8PathBuf,
    pub artifact_dir: Utf8PathBuf,
    pub ledger: Utf8PathBuf,
    pub summary_tables: Vec<Utf8PathBuf>,
    pub plot_dir: Utf8PathBuf,
}

impl OutputLocations {
    pub fn for_project(
        root: &Utf8Path,
        project: &Project,
        prefaces: &[Preface],
        mode: LedgerMode,
    ) -> Self {
        let artifact_dir = root.join("satData").join("images");
        let ledger = match mode {
            LedgerMode::File => root
                .join("satData")
                .join("logs")
                .join(format!("{project}_oper.txt")),
            LedgerMode::Directory => artifact_dir.clone(),
        };
        let summary_tables = prefaces
            .iter()
            .map(|preface| {
                root.join("data")
                    .join(format!("{project}_compData_{preface}.csv"))
            })
            .collect();
        Self {
            root: root.to_path_buf(),
            artifact_dir,
            ledger,
            summary_tables,
            plot_dir: root.join("figures"),
        }
    }

    pub fn display_path(&self, path: &Utf8Path) -> Result<String, RetrievalError> {
        Ok(relativize(&self.root, path)?.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub project: Project,
    pub prefaces: Vec<Preface>,
    pub slots: Vec<TimeSlot>,
    pub region: Region,
    pub size: ImageSize,
    pub ledger_mode: LedgerMode,
    pub write_arrays: bool,
    pub outputs: OutputLocations,
}

impl RetrievalRequest {
    pub fn writes_arrays(&self) -> bool {
        self.write_arrays || self.ledger_mode == LedgerMode::Directory
    }

    fn summary_tables_len(&self) -> usize {
        self.outputs.summary_tables.len()
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub dry_run: bool,
    pub plot_threshold: usize,
    pub ledger_ext: String,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            plot_threshold: DEFAULT_PLOT_THRESHOLD,
            ledger_ext: DEFAULT_OPERATION_EXT.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefaceStatus {
    Satisfied,
    Planned,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrefaceReport {
    pub preface: String,
    pub status: PrefaceStatus,
    pub gap: GapKind,
    pub requested: usize,
    pub gap_units: usize,
    pub summary_table: String,
    pub retrieved: Vec<String>,
    pub plot: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub project: String,
    pub prefaces: Vec<PrefaceReport>,
}

impl RunReport {
    pub fn failed(&self) -> impl Iterator<Item = &PrefaceReport> {
        self.prefaces
            .iter()
            .filter(|report| report.status == PrefaceStatus::Failed)
    }

    pub fn fetched(&self) -> usize {
        self.prefaces.iter().map(|report| report.retrieved.len()).sum()
    }
}

#[derive(Clone)]
pub struct Orchestrator<F: Fetcher> {
    fetcher: F,
    client: ClientConfig,
}

impl<F: Fetcher> Orchestrator<F> {
    pub fn new(fetcher: F, client: ClientConfig) -> Self {
        Self { fetcher, client }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn run(
        &self,
        request: &RetrievalRequest,
        options: &RetrievalOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, RetrievalError> {
        if request.prefaces.is_empty() {
            return Err(RetrievalError::InvalidUnit(format!(
                "project {} has no prefaces",
                request.project
            )));
        }
        if request.summary_tables_len() != request.prefaces.len() {
            return Err(RetrievalError::InvalidUnit(format!(
                "{} prefaces but {} summary tables",
                request.prefaces.len(),
                request.summary_tables_len()
            )));
        }
        let mut seen = HashSet::with_capacity(request.prefaces.len());
        if let Some(repeated) = request.prefaces.iter().find(|preface| !seen.insert(*preface)) {
            return Err(RetrievalError::InvalidUnit(format!(
                "preface {repeated} appears more than once in project {}",
                request.project
            )));
        }

        let mut prefaces = Vec::with_capacity(request.prefaces.len());
        for (position, preface) in request.prefaces.iter().enumerate() {
            let report = self.run_preface(request, position, options, sink);
            if let Some(error) = &report.error {
                warn!(project = %request.project, preface = %preface, error = %error, "preface batch aborted");
            }
            prefaces.push(report);
        }

        Ok(RunReport {
            project: request.project.to_string(),
            prefaces,
        })
    }

    fn run_preface(
        &self,
        request: &RetrievalRequest,
        position: usize,
        options: &RetrievalOptions,
        sink: &dyn ProgressSink,
    ) -> PrefaceReport {
        let preface = &request.prefaces[position];
        let units = RetrievalUnit::for_slots(&request.project, preface, &request.slots);
        let table = &request.outputs.summary_tables[position];
        let mut report = PrefaceReport {
            preface: preface.to_string(),
            status: PrefaceStatus::Failed,
            gap: GapKind::Full,
            requested: units.len(),
            gap_units: 0,
            summary_table: request
                .outputs
                .display_path(table)
                .unwrap_or_else(|_| table.to_string()),
            retrieved: Vec::new(),
            plot: None,
            error: None,
        };

        sink.event(ProgressEvent {
            message: format!("phase=Resolve; {} {}", request.project, preface),
            elapsed: None,
        });

        let outcome = if options.dry_run {
            self.plan_preface(request, &units, options, &mut report)
        } else {
            self.retrieve_preface(request, position, &units, options, sink, &mut report)
        };
        if let Err(err) = outcome {
            report.status = PrefaceStatus::Failed;
            report.error = Some(err.to_string());
        }
        report
    }

    fn plan_preface(
        &self,
        request: &RetrievalRequest,
        units: &[RetrievalUnit],
        options: &RetrievalOptions,
        report: &mut PrefaceReport,
    ) -> Result<(), RetrievalError> {
        let plan = match peek_ledger(request)? {
            Some(ledger) => compute_gap(units, ledger.as_ref(), &options.ledger_ext)?,
            None => GapPlan::Full(units.to_vec()),
        };
        report.gap = plan.kind();
        report.gap_units = plan.len();
        report.status = if plan.is_empty() {
            PrefaceStatus::Satisfied
        } else {
            PrefaceStatus::Planned
        };
        Ok(())
    }

    fn retrieve_preface(
        &self,
        request: &RetrievalRequest,
        position: usize,
        units: &[RetrievalUnit],
        options: &RetrievalOptions,
        sink: &dyn ProgressSink,
        report: &mut PrefaceReport,
    ) -> Result<(), RetrievalError> {
        let preface = &request.prefaces[position];
        let mut ledger = open_ledger(request.ledger_mode, &request.outputs.ledger)?;
        let summary = SummaryTable::bootstrap(&request.outputs.summary_tables[position])?;

        let plan = compute_gap(units, ledger.as_ref(), &options.ledger_ext)?;
        report.gap = plan.kind();
        report.gap_units = plan.len();
        sink.event(ProgressEvent {
            message: format!("phase=Gap; {} of {} units missing", plan.len(), units.len()),
            elapsed: None,
        });

        if plan.is_empty() {
            info!(project = %request.project, preface = %preface, "all requested units already retrieved");
            report.status = PrefaceStatus::Satisfied;
            return Ok(());
        }

        let gap = plan.into_units();
        let keep_for_plot = gap.len() < options.plot_threshold;
        let artifacts = ArtifactStore::new(request.outputs.artifact_dir.clone());
        let mut persistence = Persistence {
            artifacts: &artifacts,
            ledger: ledger.as_mut(),
            summary: &summary,
            ledger_ext: &options.ledger_ext,
            write_arrays: request.writes_arrays(),
        };

        let mut plotted: Vec<Array2<f32>> = Vec::new();
        let mut failure = None;
        for unit in &gap {
            match self.fetch_band(request, unit, position, sink) {
                Ok(band) => {
                    if let Err(err) = persistence.persist_unit(unit, &band) {
                        failure = Some(err);
                        break;
                    }
                    report
                        .retrieved
                        .push(canonical_name(unit, &options.ledger_ext).to_string());
                    if keep_for_plot {
                        plotted.push(band);
                    }
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        sink.event(ProgressEvent {
            message: format!("phase=Store; {} units persisted", report.retrieved.len()),
            elapsed: None,
        });
        let resorted = persistence.resort_summary();
        if let Some(err) = failure {
            return Err(err);
        }
        resorted?;

        if keep_for_plot {
            let slots = gap.iter().map(|unit| unit.slot).collect::<Vec<_>>();
            if let Some(name) = persist::composite_name(&request.project, preface, &slots) {
                let path = request.outputs.plot_dir.join(name);
                sink.event(ProgressEvent {
                    message: "phase=Plot; rendering composite".to_string(),
                    elapsed: None,
                });
                if persist::render_composite(&plotted, &path)? {
                    report.plot = Some(request.outputs.display_path(&path)?);
                }
            }
        }

        info!(
            project = %request.project,
            preface = %preface,
            fetched = report.retrieved.len(),
            "preface batch complete"
        );
        report.status = PrefaceStatus::Completed;
        Ok(())
    }

    fn fetch_band(
        &self,
        request: &RetrievalRequest,
        unit: &RetrievalUnit,
        position: usize,
        sink: &dyn ProgressSink,
    ) -> Result<Array2<f32>, RetrievalError> {
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; {} {}", unit.preface, unit.slot),
            elapsed: None,
        });
        let start = Instant::now();
        let raster = self
            .fetcher
            .fetch(&unit.slot, &request.region, request.size, &self.client)
            .map_err(|err| match err {
                RetrievalError::FetchFailure { .. } => err,
                other => RetrievalError::FetchFailure {
                    slot: unit.slot.to_string(),
                    message: other.to_string(),
                },
            })?;
        let elapsed = start.elapsed();
        sink.event(ProgressEvent {
            message: format!("fetch.response latency_ms={}", elapsed.as_millis()),
            elapsed: Some(elapsed),
        });
        raster.band(position)
    }
}

fn peek_ledger(
    request: &RetrievalRequest,
) -> Result<Option<Box<dyn CompletionLedger>>, RetrievalError> {
    if !request.outputs.ledger.as_std_path().exists() {
        return Ok(None);
    }
    let ledger: Box<dyn CompletionLedger> = match request.ledger_mode {
        LedgerMode::File => Box::new(FileLedger::open(&request.outputs.ledger)?),
        LedgerMode::Directory => Box::new(DirectoryLedger::open(&request.outputs.ledger)?),
    };
    Ok(Some(ledger))
}
