use datafusion::arrow::array::{Int64Array, RecordBatch, UInt32Array};
use datafusion::arrow::csv::WriterBuilder;
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use datafusion::parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::error::{Error, Result};
use crate::ml::ClusterResult;
use crate::table::StageTable;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFileType {
    #[default]
    Parquet,
    Csv,
}

impl OutputFileType {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFileType::Parquet => "parquet",
            OutputFileType::Csv => "csv",
        }
    }
}

impl fmt::Display for OutputFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFileType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "parquet" => Ok(OutputFileType::Parquet),
            "csv" => Ok(OutputFileType::Csv),
            other => Err(Error::Config(format!("unsupported output filetype '{}'", other))),
        }
    }
}

/// Final value of a query run
#[derive(Debug, Clone)]
pub enum QueryOutput {
    Table(StageTable),
    Clusters(ClusterResult),
}

impl QueryOutput {
    pub fn num_rows(&self) -> usize {
        match self {
            QueryOutput::Table(table) => table.num_rows(),
            QueryOutput::Clusters(clusters) => clusters.cid_labels.len(),
        }
    }
}

/// Files produced by [`write_result`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum WrittenOutput {
    Table { path: PathBuf, rows: usize },
    Clusters { summary: PathBuf, labels: PathBuf, rows: usize },
}

impl WrittenOutput {
    pub fn rows(&self) -> usize {
        match self {
            WrittenOutput::Table { rows, .. } | WrittenOutput::Clusters { rows, .. } => *rows,
        }
    }
}

pub fn result_file_name(query: &str, filetype: OutputFileType) -> String {
    format!("{}-results.{}", query, filetype.extension())
}

pub fn summary_file_name(query: &str) -> String {
    format!("{}-results.json", query)
}

pub fn labels_file_name(query: &str, filetype: OutputFileType) -> String {
    format!("{}-cid-labels.{}", query, filetype.extension())
}

/// Persist `output` under `dir`, overwriting earlier results of `query`.
pub fn write_result(
    output: &QueryOutput,
    dir: &Path,
    query: &str,
    filetype: OutputFileType,
) -> Result<WrittenOutput> {
    fs::create_dir_all(dir)?;

    let written = match output {
        QueryOutput::Table(table) => {
            let path = dir.join(result_file_name(query, filetype));
            write_batches(&path, table.schema_ref(), &table.batches(), filetype)?;
            WrittenOutput::Table {
                path,
                rows: table.num_rows(),
            }
        }
        QueryOutput::Clusters(clusters) => {
            let summary = dir.join(summary_file_name(query));
            fs::write(&summary, serde_json::to_string_pretty(&clusters.summary())?)?;

            let labels = dir.join(labels_file_name(query, filetype));
            let batch = labels_batch(clusters)?;
            write_batches(&labels, batch.schema(), &[batch], filetype)?;
            WrittenOutput::Clusters {
                summary,
                labels,
                rows: clusters.cid_labels.len(),
            }
        }
    };

    info!(query, rows = written.rows(), dir = %dir.display(), "wrote result");
    Ok(written)
}

fn labels_batch(clusters: &ClusterResult) -> Result<RecordBatch> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("cid", DataType::Int64, false),
        Field::new("label", DataType::UInt32, false),
    ]));
    let cids: Int64Array = clusters.cid_labels.iter().map(|(cid, _)| Some(*cid)).collect();
    let labels: UInt32Array = clusters
        .cid_labels
        .iter()
        .map(|(_, label)| Some(*label))
        .collect();
    Ok(RecordBatch::try_new(
        schema,
        vec![Arc::new(cids), Arc::new(labels)],
    )?)
}

fn write_batches(
    path: &Path,
    schema: SchemaRef,
    batches: &[RecordBatch],
    filetype: OutputFileType,
) -> Result<()> {
    let file = File::create(path)?;
    match filetype {
        OutputFileType::Parquet => {
            let mut writer = ArrowWriter::try_new(file, schema, None)
                .map_err(|e| Error::Output(format!("{}: {}", path.display(), e)))?;
            for batch in batches {
                writer
                    .write(batch)
                    .map_err(|e| Error::Output(format!("{}: {}", path.display(), e)))?;
            }
            writer
                .close()
                .map_err(|e| Error::Output(format!("{}: {}", path.display(), e)))?;
        }
        OutputFileType::Csv => {
            let mut writer = WriterBuilder::new().with_header(true).build(file);
            for batch in batches {
                writer.write(batch)?;
            }
        }
    }
    Ok(())
}
