//! Linear SQL stage pipeline
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s. Each stage is a complete
//! SQL statement evaluated against the tables bound so far; its result is
//! materialized and bound under the stage's name before the next statement
//! runs. The last stage's result is the pipeline's output.

use datafusion::prelude::SessionContext;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::profile::Profiler;
use crate::table::StageTable;
use crate::tables::bind_table;

#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub name: String,
    pub sql: String,
    /// Table name the result is bound to; `None` only for the final stage
    pub bind_as: Option<String>,
}

impl Stage {
    /// Intermediate stage whose result is bound as `name`
    pub fn bound(name: impl Into<String>, sql: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            bind_as: Some(name.clone()),
            name,
            sql: sql.into(),
        }
    }

    /// Final stage; its result is returned instead of bound
    pub fn output(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
            bind_as: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Build a pipeline, checking that every stage but the last binds its
    /// result and that the last one does not.
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        let Some((last, rest)) = stages.split_last() else {
            return Err(Error::Config("pipeline has no stages".to_string()));
        };

        if let Some(stage) = rest.iter().find(|s| s.bind_as.is_none()) {
            return Err(Error::Config(format!(
                "intermediate stage '{}' does not bind its result",
                stage.name
            )));
        }
        if last.bind_as.is_some() {
            return Err(Error::Config(format!(
                "final stage '{}' must not bind its result",
                last.name
            )));
        }

        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Execute every stage in order. The first failing stage aborts the run;
    /// nothing after it is executed or bound.
    ///
    /// `on_stage` is called with the 1-based step number after each stage's
    /// result has been materialized and bound.
    pub async fn run<F>(
        &self,
        ctx: &SessionContext,
        profiler: &mut Profiler,
        mut on_stage: F,
    ) -> Result<StageTable>
    where
        F: FnMut(usize) + Send,
    {
        let mut output = None;

        for (idx, stage) in self.stages.iter().enumerate() {
            debug!(stage = %stage.name, sql = %stage.sql, "executing stage");
            let start = Instant::now();

            let result = execute(ctx, stage).await?;
            profiler.record(&stage.name, start.elapsed(), Some(result.num_rows()));
            info!(
                stage = %stage.name,
                step = idx + 1,
                of = self.stages.len(),
                rows = result.num_rows(),
                "stage complete"
            );

            match &stage.bind_as {
                Some(name) => bind_table(ctx, name, Arc::new(result))?,
                None => output = Some(result),
            }
            on_stage(idx + 1);
        }

        // `new` guarantees the final stage is unbound
        output.ok_or_else(|| Error::Config("pipeline produced no output".to_string()))
    }
}

async fn execute(ctx: &SessionContext, stage: &Stage) -> Result<StageTable> {
    let wrap = |source| Error::Execution {
        stage: stage.name.clone(),
        source,
    };
    let df = ctx.sql(&stage.sql).await.map_err(wrap)?;
    StageTable::from_dataframe(&stage.name, df).await.map_err(wrap)
}
