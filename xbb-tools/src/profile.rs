use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Wall-clock record of one named stage
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StageTiming {
    pub stage: String,
    pub elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
}

/// Collects stage timings for a run. Timings are always recorded; `enabled`
/// only raises them to `info` level and makes the driver persist them.
#[derive(Debug, Default)]
pub struct Profiler {
    enabled: bool,
    timings: Vec<StageTiming>,
}

impl Profiler {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            timings: Vec::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&mut self, stage: &str, elapsed: Duration, rows: Option<usize>) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        if self.enabled {
            info!(stage, elapsed_ms, rows, "stage timing");
        } else {
            debug!(stage, elapsed_ms, rows, "stage timing");
        }
        self.timings.push(StageTiming {
            stage: stage.to_string(),
            elapsed_ms,
            rows,
        });
    }

    /// Await `fut` and record how long it took under `stage`.
    pub async fn time<F, T>(&mut self, stage: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let start = Instant::now();
        let out = fut.await;
        self.record(stage, start.elapsed(), None);
        out
    }

    pub fn timings(&self) -> &[StageTiming] {
        &self.timings
    }

    pub fn into_timings(self) -> Vec<StageTiming> {
        self.timings
    }
}
