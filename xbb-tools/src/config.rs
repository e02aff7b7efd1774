//! Command line and YAML configuration
//!
//! Every driver accepts the same flags. A YAML file passed with
//! `--config-file` supplies defaults; flags given on the command line win.
//! Switches have a `--no-` form so a file-level `true` can be turned off.
//!
//! ```yaml
//! data_dir: /data/sf1000/
//! output_dir: /results/
//! output_filetype: parquet
//! verify_results: true
//! verify_dir: /reference/
//! profile: false
//! scheduler_file: /shared/scheduler.json
//! workers: 16
//! ```

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cluster::{ClusterConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_INTERFACE};
use crate::error::{Error, Result};
use crate::output::OutputFileType;

#[derive(Debug, Clone, Default, Parser)]
#[command(about = "Run one TPCx-BB query on DataFusion")]
pub struct XbbArgs {
    /// YAML file with default settings
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    /// Directory holding one subdirectory per source dataset
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Directory the result is written to
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// parquet or csv
    #[arg(long)]
    pub output_filetype: Option<OutputFileType>,

    /// Record per-stage timings and write them next to the result
    #[arg(long, overrides_with = "no_profile")]
    pub profile: bool,

    #[arg(long, overrides_with = "profile")]
    pub no_profile: bool,

    /// Compare the written result with the reference in --verify-dir
    #[arg(long, overrides_with = "no_verify_results")]
    pub verify_results: bool,

    #[arg(long, overrides_with = "verify_results")]
    pub no_verify_results: bool,

    #[arg(long)]
    pub verify_dir: Option<PathBuf>,

    /// Scheduler address, e.g. tcp://10.0.0.1:8786
    #[arg(long)]
    pub scheduler_address: Option<String>,

    /// JSON scheduler file containing an "address" entry
    #[arg(long)]
    pub scheduler_file: Option<PathBuf>,

    /// Size of the worker pool
    #[arg(long)]
    pub workers: Option<usize>,

    #[arg(long, env = "INTERFACE")]
    pub interface: Option<String>,

    /// Seconds to wait for the scheduler
    #[arg(long)]
    pub connect_timeout: Option<u64>,
}

/// Settings read from `--config-file`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub data_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub output_filetype: Option<OutputFileType>,
    pub profile: Option<bool>,
    pub verify_results: Option<bool>,
    pub verify_dir: Option<PathBuf>,
    pub scheduler_address: Option<String>,
    pub scheduler_file: Option<PathBuf>,
    pub workers: Option<usize>,
    pub interface: Option<String>,
    pub connect_timeout: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        Ok(serde_yaml::from_str(&contents)?)
    }
}

/// Fully resolved settings of one run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub output_filetype: OutputFileType,
    pub profile: bool,
    /// Reference directory when verification is enabled
    pub verify_dir: Option<PathBuf>,
    pub cluster: ClusterConfig,
}

impl RunConfig {
    pub fn new(data_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            output_dir: output_dir.into(),
            output_filetype: OutputFileType::default(),
            profile: false,
            verify_dir: None,
            cluster: ClusterConfig::default(),
        }
    }

    /// Merge command line flags over the optional config file.
    pub fn from_args(args: &XbbArgs) -> Result<Self> {
        let file = match &args.config_file {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(args, file)
    }

    pub fn merge(args: &XbbArgs, file: FileConfig) -> Result<Self> {
        let data_dir = args
            .data_dir
            .clone()
            .or(file.data_dir)
            .ok_or_else(|| Error::Config("data_dir is required".to_string()))?;
        let output_dir = args
            .output_dir
            .clone()
            .or(file.output_dir)
            .ok_or_else(|| Error::Config("output_dir is required".to_string()))?;

        let verify_results =
            switch(args.verify_results, args.no_verify_results, file.verify_results);
        let verify_dir = args.verify_dir.clone().or(file.verify_dir);
        let verify_dir = match (verify_results, verify_dir) {
            (true, Some(dir)) => Some(dir),
            (true, None) => {
                return Err(Error::Config(
                    "verify_results requires verify_dir".to_string(),
                ))
            }
            (false, _) => None,
        };

        let defaults = ClusterConfig::default();
        let cluster = ClusterConfig {
            scheduler_address: args.scheduler_address.clone().or(file.scheduler_address),
            scheduler_file: args.scheduler_file.clone().or(file.scheduler_file),
            workers: args.workers.or(file.workers).unwrap_or(defaults.workers),
            interface: args
                .interface
                .clone()
                .or(file.interface)
                .unwrap_or_else(|| DEFAULT_INTERFACE.to_string()),
            connect_timeout: args
                .connect_timeout
                .or(file.connect_timeout)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        };

        Ok(Self {
            data_dir,
            output_dir,
            output_filetype: args
                .output_filetype
                .or(file.output_filetype)
                .unwrap_or_default(),
            profile: switch(args.profile, args.no_profile, file.profile),
            verify_dir,
            cluster,
        })
    }
}

/// Resolve an on/off switch: an explicit flag wins over the file, which
/// wins over off.
fn switch(on: bool, off: bool, file: Option<bool>) -> bool {
    match (on, off) {
        (true, _) => true,
        (_, true) => false,
        _ => file.unwrap_or(false),
    }
}
