//! Dataset discovery and registration
//!
//! A [`DatasetSource`] resolves a dataset name to the columnar files that
//! back it. [`register_datasets`] binds each name as a queryable table in a
//! DataFusion session; only schemas are inferred at this point, no rows are
//! scanned.

use async_trait::async_trait;
use datafusion::datasource::TableProvider;
use datafusion::prelude::{ParquetReadOptions, SessionContext};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const PARQUET_EXTENSION: &str = ".parquet";

/// Trait for locating the files of a source dataset
#[async_trait]
pub trait DatasetSource: Send + Sync {
    /// Directory or URL prefix that the dataset's files live under
    fn location(&self, dataset: &str) -> PathBuf;

    /// List the data files of a dataset
    ///
    /// # Errors
    /// Returns a registration error if the dataset directory cannot be read
    /// or holds no data files.
    async fn list_files(&self, dataset: &str) -> Result<Vec<PathBuf>>;
}

/// Resolves `<data_dir>/<dataset>/*.parquet`
#[derive(Debug, Clone)]
pub struct FileSystemSource {
    data_dir: PathBuf,
}

impl FileSystemSource {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl DatasetSource for FileSystemSource {
    fn location(&self, dataset: &str) -> PathBuf {
        self.data_dir.join(dataset)
    }

    async fn list_files(&self, dataset: &str) -> Result<Vec<PathBuf>> {
        let dir = self.location(dataset);

        let entries = fs::read_dir(&dir).map_err(|e| {
            Error::registration(dataset, format!("cannot read {}: {}", dir.display(), e))
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| Error::registration(dataset, e.to_string()))?.path();
            let is_data_file = path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(PARQUET_EXTENSION));
            if is_data_file {
                files.push(path);
            }
        }

        if files.is_empty() {
            return Err(Error::registration(
                dataset,
                format!("no {} files found in {}", PARQUET_EXTENSION, dir.display()),
            ));
        }

        // Sort for consistent ordering
        files.sort();
        Ok(files)
    }
}

/// Bind `name` to `table`, replacing any previous definition of the name.
pub fn bind_table(ctx: &SessionContext, name: &str, table: Arc<dyn TableProvider>) -> Result<()> {
    if ctx.deregister_table(name)?.is_some() {
        debug!(table = name, "replacing existing table binding");
    }
    ctx.register_table(name, table)?;
    Ok(())
}

/// Register every dataset as a Parquet-backed table named after the dataset.
pub async fn register_datasets(
    ctx: &SessionContext,
    source: &dyn DatasetSource,
    datasets: &[&str],
) -> Result<()> {
    for &dataset in datasets {
        let files = source.list_files(dataset).await?;
        let location = source.location(dataset);
        let location = location.to_str().ok_or_else(|| {
            Error::registration(dataset, format!("non UTF-8 path {}", location.display()))
        })?;

        // Trailing separator marks the location as a directory of files
        let table_path = format!("{}/", location.trim_end_matches('/'));

        ctx.deregister_table(dataset)?;
        ctx.register_parquet(
            dataset,
            &table_path,
            ParquetReadOptions::default().file_extension(PARQUET_EXTENSION),
        )
        .await
        .map_err(|e| Error::registration(dataset, e.to_string()))?;

        info!(dataset, files = files.len(), location, "registered dataset");
    }
    Ok(())
}
