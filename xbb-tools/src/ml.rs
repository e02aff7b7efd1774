//! Clustering post-step
//!
//! [`ClusteringModel`] is the seam a query uses to hand its final SQL result
//! to an analytical routine. [`KMeans`] fits `linfa-clustering` k-means
//! (k-means++ seeding, best of `n_init` seeded runs) and reports the
//! within-cluster sum of squared errors of the chosen centroids.

use async_trait::async_trait;
use datafusion::arrow::array::{Array, AsArray};
use datafusion::arrow::compute::cast;
use datafusion::arrow::datatypes::{DataType, Float64Type, Int64Type};
use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use ndarray::{Array1, Array2};
use rand_xoshiro::rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::cluster::ClusterConnection;
use crate::error::{Error, Result};
use crate::table::StageTable;

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterResult {
    /// `(id, cluster label)` per input row, in input order
    pub cid_labels: Vec<(i64, u32)>,
    /// Within-cluster sum of squared errors
    pub wssse: f64,
    pub cluster_centers: Vec<Vec<f64>>,
    pub nclusters: usize,
}

/// Persisted part of a [`ClusterResult`]; labels are written separately
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub nclusters: usize,
    pub wssse: f64,
    pub cluster_centers: Vec<Vec<f64>>,
}

impl ClusterResult {
    pub fn summary(&self) -> ClusterSummary {
        ClusterSummary {
            nclusters: self.nclusters,
            wssse: self.wssse,
            cluster_centers: self.cluster_centers.clone(),
        }
    }
}

#[async_trait]
pub trait ClusteringModel: Send + Sync {
    /// Cluster the rows of a single-partition table whose first column is an
    /// integer id and whose remaining columns are numeric features.
    async fn cluster(&self, conn: &ClusterConnection, input: StageTable) -> Result<ClusterResult>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct KMeans {
    pub n_clusters: usize,
    pub max_iter: usize,
    pub n_init: usize,
    pub seed: u64,
    pub tolerance: f64,
}

impl Default for KMeans {
    fn default() -> Self {
        Self {
            n_clusters: 8,
            max_iter: 20,
            n_init: 5,
            seed: 0,
            tolerance: 1e-4,
        }
    }
}

struct Features {
    ids: Vec<i64>,
    points: Vec<Vec<f64>>,
}

fn extract_features(input: &StageTable) -> Result<Features> {
    if input.num_partitions() > 1 {
        return Err(Error::PostProcess(format!(
            "clustering input must be a single partition, stage '{}' has {}",
            input.stage(),
            input.num_partitions()
        )));
    }

    let schema = input.schema_ref();
    if schema.fields().len() < 2 {
        return Err(Error::PostProcess(
            "clustering input needs an id column and at least one feature".to_string(),
        ));
    }
    for field in schema.fields().iter().skip(1) {
        if !field.data_type().is_numeric() {
            return Err(Error::PostProcess(format!(
                "feature column '{}' has non-numeric type {}",
                field.name(),
                field.data_type()
            )));
        }
    }

    let mut ids = Vec::with_capacity(input.num_rows());
    let mut points = Vec::with_capacity(input.num_rows());
    for batch in input.batches() {
        let id_col = cast(batch.column(0), &DataType::Int64)?;
        let id_col = id_col.as_primitive::<Int64Type>();
        let features = batch
            .columns()
            .iter()
            .skip(1)
            .map(|col| cast(col, &DataType::Float64))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for row in 0..batch.num_rows() {
            if id_col.is_null(row) {
                return Err(Error::PostProcess(format!("null id at row {}", row)));
            }
            let point = features
                .iter()
                .map(|col| {
                    let col = col.as_primitive::<Float64Type>();
                    if col.is_null(row) {
                        0.0
                    } else {
                        col.value(row)
                    }
                })
                .collect();
            ids.push(id_col.value(row));
            points.push(point);
        }
    }

    Ok(Features { ids, points })
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn distinct_points(points: &[Vec<f64>]) -> usize {
    points
        .iter()
        .map(|p| p.iter().map(|v| v.to_bits()).collect::<Vec<_>>())
        .collect::<HashSet<_>>()
        .len()
}

impl KMeans {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            ..Self::default()
        }
    }

    /// Cluster already extracted points; `ids` and `points` are parallel.
    pub fn fit(&self, ids: &[i64], points: &[Vec<f64>]) -> Result<ClusterResult> {
        if self.n_clusters == 0 || self.n_init == 0 {
            return Err(Error::PostProcess(
                "n_clusters and n_init must be positive".to_string(),
            ));
        }
        if distinct_points(points) < self.n_clusters {
            return Err(Error::PostProcess(format!(
                "cannot form {} clusters from {} rows ({} distinct)",
                self.n_clusters,
                points.len(),
                distinct_points(points)
            )));
        }

        let dims = points[0].len();
        let observations = Array2::from_shape_vec(
            (points.len(), dims),
            points.iter().flatten().copied().collect(),
        )
        .map_err(|e| Error::PostProcess(format!("invalid feature matrix: {}", e)))?;

        let rng = Xoshiro256Plus::seed_from_u64(self.seed);
        let model = linfa_clustering::KMeans::params_with_rng(self.n_clusters, rng)
            .n_runs(self.n_init)
            .max_n_iterations(self.max_iter as u64)
            .tolerance(self.tolerance)
            .fit(&DatasetBase::from(observations.clone()))
            .map_err(|e| Error::PostProcess(format!("k-means failed: {}", e)))?;

        let labels: Array1<usize> = model.predict(&observations);
        let centers: Vec<Vec<f64>> = model
            .centroids()
            .outer_iter()
            .map(|row| row.to_vec())
            .collect();
        let wssse = points
            .iter()
            .zip(labels.iter())
            .map(|(point, label)| squared_distance(point, &centers[*label]))
            .sum();
        debug!(wssse, "k-means fitted");

        Ok(ClusterResult {
            cid_labels: ids
                .iter()
                .zip(labels.iter())
                .map(|(id, label)| (*id, *label as u32))
                .collect(),
            wssse,
            cluster_centers: centers,
            nclusters: self.n_clusters,
        })
    }
}

#[async_trait]
impl ClusteringModel for KMeans {
    async fn cluster(&self, conn: &ClusterConnection, input: StageTable) -> Result<ClusterResult> {
        let features = extract_features(&input)?;
        debug!(
            rows = features.ids.len(),
            workers = conn.workers(),
            "clustering stage output"
        );

        let model = self.clone();
        tokio::task::spawn_blocking(move || model.fit(&features.ids, &features.points))
            .await
            .map_err(|e| Error::PostProcess(format!("clustering task failed: {}", e)))?
    }
}
