//! End-to-end execution of one benchmark query
//!
//! A run moves through
//! `Unconnected → Connected → TablesRegistered → Stage(1..=n) →
//! PostProcessed → Written → Verified`. Any error aborts the run where it
//! happens. A verification mismatch is recorded in the [`RunReport`]; the
//! run then ends in `Written`, only a passing comparison reaches `Verified`.

use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, info_span, Instrument};

use crate::cluster::connect;
use crate::config::RunConfig;
use crate::error::Result;
use crate::ml::ClusteringModel;
use crate::output::{write_result, QueryOutput, WrittenOutput};
use crate::pipeline::Pipeline;
use crate::profile::{Profiler, StageTiming};
use crate::schema::OutputSchema;
use crate::tables::{register_datasets, FileSystemSource};
use crate::verify::{verify_results, VerificationOutcome};

/// One benchmark query: its source datasets, SQL stages, output contract
/// and optional post-processing.
pub trait BenchmarkQuery: Send + Sync {
    /// Short name used for log fields and result file names, e.g. `q23`
    fn name(&self) -> &str;

    /// Source datasets registered before the first stage
    fn datasets(&self) -> &[&'static str];

    fn pipeline(&self) -> Result<Pipeline>;

    /// Declared columns of the final SQL stage
    fn output_schema(&self) -> OutputSchema;

    /// Analytical step applied to the final stage, if any. Its input is the
    /// normalized final stage reduced to a single partition.
    fn clustering(&self) -> Option<&dyn ClusteringModel> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "stage")]
pub enum RunState {
    Unconnected,
    Connected,
    TablesRegistered,
    Stage(usize),
    PostProcessed,
    Written,
    Verified,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Unconnected => f.write_str("UNCONNECTED"),
            RunState::Connected => f.write_str("CONNECTED"),
            RunState::TablesRegistered => f.write_str("TABLES_REGISTERED"),
            RunState::Stage(n) => write!(f, "STAGE_{}", n),
            RunState::PostProcessed => f.write_str("POSTPROCESSED"),
            RunState::Written => f.write_str("WRITTEN"),
            RunState::Verified => f.write_str("VERIFIED"),
        }
    }
}

/// Summary of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub query: String,
    pub final_state: RunState,
    /// Every state the run went through, starting with `Unconnected`
    pub transitions: Vec<RunState>,
    pub timings: Vec<StageTiming>,
    pub output: WrittenOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationOutcome>,
}

impl RunReport {
    pub fn rows_written(&self) -> usize {
        self.output.rows()
    }

    pub fn verified(&self) -> Option<bool> {
        self.verification.as_ref().map(|v| v.passed)
    }
}

struct Tracker<'a> {
    query: &'a str,
    state: RunState,
    history: Vec<RunState>,
}

impl<'a> Tracker<'a> {
    fn new(query: &'a str) -> Self {
        Self {
            query,
            state: RunState::Unconnected,
            history: vec![RunState::Unconnected],
        }
    }

    fn advance(&mut self, next: RunState) {
        info!(query = self.query, from = %self.state, to = %next, "run state");
        self.state = next;
        self.history.push(next);
    }
}

pub fn profile_file_name(query: &str) -> String {
    format!("{}-profile.json", query)
}

/// Run `query` end to end with the settings in `config`.
pub async fn run_query(query: &dyn BenchmarkQuery, config: &RunConfig) -> Result<RunReport> {
    let span = info_span!("query", name = query.name());
    run(query, config).instrument(span).await
}

async fn run(query: &dyn BenchmarkQuery, config: &RunConfig) -> Result<RunReport> {
    let name = query.name();
    let mut tracker = Tracker::new(name);
    let mut profiler = Profiler::new(config.profile);
    let run_start = Instant::now();

    let pipeline = query.pipeline()?;

    let conn = connect(&config.cluster).await?;
    tracker.advance(RunState::Connected);
    let ctx = conn.context();

    let source = FileSystemSource::new(&config.data_dir);
    profiler
        .time("read_tables", register_datasets(ctx, &source, query.datasets()))
        .await?;
    tracker.advance(RunState::TablesRegistered);

    let result = pipeline
        .run(ctx, &mut profiler, |step| tracker.advance(RunState::Stage(step)))
        .await?;

    let result = query.output_schema().normalize(&result)?;

    let output = match query.clustering() {
        Some(model) => {
            let start = Instant::now();
            let clusters = model.cluster(&conn, result.coalesce()).await?;
            profiler.record("post_process", start.elapsed(), Some(clusters.cid_labels.len()));
            tracker.advance(RunState::PostProcessed);
            QueryOutput::Clusters(clusters)
        }
        None => QueryOutput::Table(result),
    };

    let start = Instant::now();
    let written = write_result(&output, &config.output_dir, name, config.output_filetype)?;
    profiler.record("write", start.elapsed(), Some(written.rows()));
    tracker.advance(RunState::Written);

    let verification = match &config.verify_dir {
        Some(dir) => {
            let outcome = verify_results(&written, dir).await;
            if outcome.passed {
                tracker.advance(RunState::Verified);
            }
            Some(outcome)
        }
        None => None,
    };

    profiler.record("main", run_start.elapsed(), None);

    let profiled = profiler.enabled();
    let report = RunReport {
        query: name.to_string(),
        final_state: tracker.state,
        transitions: tracker.history,
        timings: profiler.into_timings(),
        output: written,
        verification,
    };

    if profiled {
        let path: PathBuf = config.output_dir.join(profile_file_name(name));
        fs::write(&path, serde_json::to_string_pretty(&report)?)?;
        info!(path = %path.display(), "wrote profile");
    }

    Ok(report)
}
