//! Query 26: cluster store customers by how many items of each class they
//! bought within one category.
//!
//! Customers with no more than `min_purchases` qualifying purchases are
//! dropped before clustering.

use datafusion::arrow::datatypes::DataType;
use xbb_tools::{BenchmarkQuery, ClusteringModel, KMeans, OutputSchema, Pipeline, Result, Stage};

pub const DATASETS: &[&str] = &["store_sales", "item"];

/// Number of `i_class_id` buckets turned into feature columns
pub const CLASS_COUNT: usize = 15;

#[derive(Debug, Clone, PartialEq)]
pub struct Q26 {
    pub category: String,
    pub min_purchases: u32,
    pub kmeans: KMeans,
}

impl Default for Q26 {
    fn default() -> Self {
        Self {
            category: "Books".to_string(),
            min_purchases: 5,
            kmeans: KMeans {
                n_clusters: 8,
                max_iter: 20,
                n_init: 5,
                ..KMeans::default()
            },
        }
    }
}

impl Q26 {
    fn customer_features(&self) -> String {
        let class_counts: Vec<String> = (1..=CLASS_COUNT)
            .map(|class| {
                format!(
                    "CAST( count(CASE WHEN i.i_class_id={class} THEN 1 ELSE NULL END) AS DOUBLE ) AS id{class}"
                )
            })
            .collect();

        format!(
            "SELECT
                ss.ss_customer_sk AS cid,
                {class_counts}
            FROM store_sales ss
            INNER JOIN item i
            ON
            (
                ss.ss_item_sk = i.i_item_sk
                AND i.i_category IN ('{category}')
                AND ss.ss_customer_sk IS NOT NULL
            )
            GROUP BY ss.ss_customer_sk
            HAVING count(ss.ss_item_sk) > {min_purchases}
            ORDER BY cid",
            class_counts = class_counts.join(",\n                "),
            category = self.category.replace('\'', "''"),
            min_purchases = self.min_purchases,
        )
    }
}

impl BenchmarkQuery for Q26 {
    fn name(&self) -> &str {
        "q26"
    }

    fn datasets(&self) -> &[&'static str] {
        DATASETS
    }

    fn pipeline(&self) -> Result<Pipeline> {
        Pipeline::new(vec![Stage::output("customer_features", self.customer_features())])
    }

    fn output_schema(&self) -> OutputSchema {
        let columns = std::iter::once("cid".to_string())
            .chain((1..=CLASS_COUNT).map(|class| format!("id{}", class)));
        OutputSchema::new(columns).with_cast("cid", DataType::Int64)
    }

    fn clustering(&self) -> Option<&dyn ClusteringModel> {
        Some(&self.kmeans)
    }
}
