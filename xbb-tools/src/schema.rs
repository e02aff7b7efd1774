use datafusion::arrow::array::{ArrayRef, RecordBatch};
use datafusion::arrow::compute::cast;
use datafusion::arrow::datatypes::{DataType, Field, Schema};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::table::StageTable;

/// Declared output contract of a query: exact column order plus the columns
/// that are normalized to a fixed-width type before persistence.
#[derive(Debug, Clone, Default)]
pub struct OutputSchema {
    columns: Vec<String>,
    casts: Vec<(String, DataType)>,
}

impl OutputSchema {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            casts: Vec::new(),
        }
    }

    pub fn with_cast(mut self, column: impl Into<String>, data_type: DataType) -> Self {
        self.casts.push((column.into(), data_type));
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Check the column set and order, then apply the declared casts.
    pub fn normalize(&self, table: &StageTable) -> Result<StageTable> {
        let schema = table.schema_ref();
        let actual: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        let declared: Vec<&str> = self.columns.iter().map(String::as_str).collect();

        if actual != declared {
            return Err(Error::Output(format!(
                "stage '{}' produced columns {:?}, expected {:?}",
                table.stage(),
                actual,
                declared
            )));
        }

        if self.casts.is_empty() {
            return Ok(table.clone());
        }

        let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
        let mut cast_indices = Vec::with_capacity(self.casts.len());
        for (column, data_type) in &self.casts {
            let idx = schema.index_of(column).map_err(|_| {
                Error::Output(format!("cast target '{}' is not an output column", column))
            })?;
            fields[idx] = fields[idx].clone().with_data_type(data_type.clone());
            cast_indices.push((idx, data_type));
        }
        let target = Arc::new(Schema::new(fields));

        let partitions = table
            .partitions()
            .iter()
            .map(|batches| {
                batches
                    .iter()
                    .map(|batch| {
                        let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
                        for (idx, data_type) in &cast_indices {
                            columns[*idx] = cast(&columns[*idx], data_type)?;
                        }
                        Ok(RecordBatch::try_new(target.clone(), columns)?)
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(StageTable::new(table.stage(), target, partitions))
    }
}
