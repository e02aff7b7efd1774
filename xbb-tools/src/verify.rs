//! Comparison of a persisted result against a reference result
//!
//! Verification never fails a run: every problem, including an unreadable
//! reference, is reported as a failed [`VerificationOutcome`].
//!
//! Rows are compared by position, so both files are read back through a
//! single-partition session that scans each file in file order.

use datafusion::arrow::array::RecordBatch;
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::common::ScalarValue;
use datafusion::prelude::{CsvReadOptions, ParquetReadOptions, SessionConfig, SessionContext};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::ml::ClusterSummary;
use crate::output::WrittenOutput;

/// Relative tolerance for floating point values
pub const FLOAT_TOLERANCE: f64 = 1e-5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationOutcome {
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VerificationOutcome {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Compare `written` with the file of the same name under `reference_dir`.
pub async fn verify_results(written: &WrittenOutput, reference_dir: &Path) -> VerificationOutcome {
    let ctx = reader_context();
    let outcome = match compare(&ctx, written, reference_dir).await {
        Ok(None) => VerificationOutcome::pass(),
        Ok(Some(mismatch)) => VerificationOutcome::fail(mismatch),
        Err(e) => VerificationOutcome::fail(format!("could not compare results: {}", e)),
    };

    if outcome.passed {
        info!(reference = %reference_dir.display(), "verification passed");
    } else {
        warn!(
            reference = %reference_dir.display(),
            reason = outcome.reason.as_deref().unwrap_or_default(),
            "verification failed"
        );
    }
    outcome
}

/// One target partition keeps large files from being split into byte
/// ranges that are read back out of order.
fn reader_context() -> SessionContext {
    SessionContext::new_with_config(SessionConfig::new().with_target_partitions(1))
}

fn reference_for(path: &Path, reference_dir: &Path) -> Result<std::path::PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::Output(format!("{} has no file name", path.display())))?;
    Ok(reference_dir.join(name))
}

/// `Ok(None)` when the results match, `Ok(Some(reason))` on a mismatch
async fn compare(
    ctx: &SessionContext,
    written: &WrittenOutput,
    reference_dir: &Path,
) -> Result<Option<String>> {
    match written {
        WrittenOutput::Table { path, .. } => {
            let reference = reference_for(path, reference_dir)?;
            compare_tables(ctx, path, &reference).await
        }
        WrittenOutput::Clusters { summary, .. } => {
            let reference = reference_for(summary, reference_dir)?;
            let actual: ClusterSummary = serde_json::from_str(&fs::read_to_string(summary)?)?;
            let expected: ClusterSummary = serde_json::from_str(&fs::read_to_string(&reference)?)?;
            Ok(compare_summaries(&actual, &expected))
        }
    }
}

fn compare_summaries(actual: &ClusterSummary, expected: &ClusterSummary) -> Option<String> {
    if actual.nclusters != expected.nclusters {
        return Some(format!(
            "nclusters {} != reference {}",
            actual.nclusters, expected.nclusters
        ));
    }
    if !approx_eq(actual.wssse, expected.wssse) {
        return Some(format!(
            "wssse {} != reference {}",
            actual.wssse, expected.wssse
        ));
    }
    None
}

async fn read_file(ctx: &SessionContext, path: &Path) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let location = path
        .to_str()
        .ok_or_else(|| Error::Output(format!("non UTF-8 path {}", path.display())))?;
    let df = match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => ctx.read_csv(location, CsvReadOptions::new()).await?,
        _ => ctx.read_parquet(location, ParquetReadOptions::default()).await?,
    };
    let schema: SchemaRef = df.schema().inner().clone();
    Ok((schema, df.collect().await?))
}

async fn compare_tables(
    ctx: &SessionContext,
    actual: &Path,
    expected: &Path,
) -> Result<Option<String>> {
    let (actual_schema, actual_batches) = read_file(ctx, actual).await?;
    let (expected_schema, expected_batches) = read_file(ctx, expected).await?;

    let actual_columns: Vec<&String> = actual_schema.fields().iter().map(|f| f.name()).collect();
    let expected_columns: Vec<&String> =
        expected_schema.fields().iter().map(|f| f.name()).collect();
    if actual_columns != expected_columns {
        return Ok(Some(format!(
            "columns {:?} != reference {:?}",
            actual_columns, expected_columns
        )));
    }

    let actual_rows = rows(&actual_batches)?;
    let expected_rows = rows(&expected_batches)?;
    if actual_rows.len() != expected_rows.len() {
        return Ok(Some(format!(
            "{} rows != reference {} rows",
            actual_rows.len(),
            expected_rows.len()
        )));
    }

    for (idx, (a, e)) in actual_rows.iter().zip(&expected_rows).enumerate() {
        for ((value, reference), column) in a.iter().zip(e).zip(&actual_columns) {
            if !values_match(value, reference) {
                return Ok(Some(format!(
                    "row {} column '{}': {} != reference {}",
                    idx, column, value, reference
                )));
            }
        }
    }

    Ok(None)
}

fn rows(batches: &[RecordBatch]) -> Result<Vec<Vec<ScalarValue>>> {
    let mut rows = Vec::new();
    for batch in batches {
        for row in 0..batch.num_rows() {
            let values = batch
                .columns()
                .iter()
                .map(|col| ScalarValue::try_from_array(col, row))
                .collect::<datafusion::error::Result<Vec<_>>>()?;
            rows.push(values);
        }
    }
    Ok(rows)
}

fn as_f64(value: &ScalarValue) -> Option<f64> {
    match value {
        ScalarValue::Float64(v) => *v,
        ScalarValue::Float32(v) => v.map(f64::from),
        _ => None,
    }
}

fn approx_eq(a: f64, b: f64) -> bool {
    if a.is_nan() || b.is_nan() {
        return a.is_nan() && b.is_nan();
    }
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= FLOAT_TOLERANCE * scale
}

fn values_match(value: &ScalarValue, reference: &ScalarValue) -> bool {
    match (as_f64(value), as_f64(reference)) {
        (Some(a), Some(b)) => approx_eq(a, b),
        _ => value == reference,
    }
}
