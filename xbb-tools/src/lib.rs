// Shared tooling for TPCx-BB query drivers on DataFusion

pub mod cli;
pub mod cluster;
pub mod config;
pub mod driver;
pub mod error;
pub mod ml;
pub mod output;
pub mod pipeline;
pub mod profile;
pub mod schema;
pub mod table;
pub mod tables;
pub mod verify;

pub use cluster::{connect, ClusterConfig, ClusterConnection};
pub use config::{RunConfig, XbbArgs};
pub use driver::{run_query, BenchmarkQuery, RunReport, RunState};
pub use error::{Error, Result};
pub use ml::{ClusterResult, ClusteringModel, KMeans};
pub use output::{OutputFileType, QueryOutput, WrittenOutput};
pub use pipeline::{Pipeline, Stage};
pub use schema::OutputSchema;
pub use table::StageTable;
pub use verify::VerificationOutcome;
