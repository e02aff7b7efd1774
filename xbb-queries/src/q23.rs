//! Query 23: items whose inventory quantity varies strongly in two
//! consecutive months.
//!
//! Per (warehouse, item, month) the sample standard deviation of
//! `inv_quantity_on_hand` is `sqrt(sum((x - mean)^2) / (count - 1))`; the
//! coefficient of variation is `stddev / mean`. A pair is reported when its
//! coefficient reaches `coefficient` in both `month` and `month + 1` of
//! `year`.
//!
//! Groups with a single observation have no sample standard deviation and
//! are dropped before the coefficient filter, so they never qualify.

use datafusion::arrow::datatypes::DataType;
use xbb_tools::{BenchmarkQuery, OutputSchema, Pipeline, Result, Stage};

pub const DATASETS: &[&str] = &["inventory", "date_dim", "warehouse"];

#[derive(Debug, Clone, PartialEq)]
pub struct Q23 {
    pub year: i32,
    pub month: i32,
    pub coefficient: f64,
}

impl Default for Q23 {
    fn default() -> Self {
        Self {
            year: 2001,
            month: 1,
            coefficient: 1.3,
        }
    }
}

impl Q23 {
    fn inv_dates(&self) -> String {
        format!(
            "SELECT inv_warehouse_sk,
                inv_item_sk,
                inv_quantity_on_hand,
                d_moy
            FROM inventory inv
            INNER JOIN date_dim d ON inv.inv_date_sk = d.d_date_sk
            AND d.d_year = {year}
            AND d_moy BETWEEN {month} AND {next_month}",
            year = self.year,
            month = self.month,
            next_month = self.month + 1,
        )
    }

    fn mean_df(&self) -> String {
        "SELECT inv_warehouse_sk,
            inv_item_sk,
            d_moy,
            AVG(CAST(inv_quantity_on_hand AS DOUBLE)) AS q_mean
        FROM inv_dates
        GROUP BY inv_warehouse_sk, inv_item_sk, d_moy"
            .to_string()
    }

    fn iteration(&self) -> String {
        "SELECT id.inv_warehouse_sk,
            id.inv_item_sk,
            id.d_moy,
            md.q_mean,
            SQRT( SUM( (id.inv_quantity_on_hand - md.q_mean) * (id.inv_quantity_on_hand - md.q_mean) )
                / (COUNT(id.inv_quantity_on_hand) - 1.0)) AS q_std
        FROM mean_df md
        INNER JOIN inv_dates id ON id.inv_warehouse_sk = md.inv_warehouse_sk
        AND id.inv_item_sk = md.inv_item_sk
        AND id.d_moy = md.d_moy
        AND md.q_mean > 0.0
        GROUP BY id.inv_warehouse_sk, id.inv_item_sk, id.d_moy, md.q_mean
        HAVING COUNT(id.inv_quantity_on_hand) > 1"
            .to_string()
    }

    fn temp_table(&self) -> String {
        format!(
            "SELECT inv_warehouse_sk,
                inv_item_sk,
                d_moy,
                q_std / q_mean AS qty_cov
            FROM iteration
            WHERE (q_std / q_mean) >= {coefficient:?}",
            coefficient = self.coefficient,
        )
    }

    fn last_query(&self) -> String {
        format!(
            "SELECT inv1.inv_warehouse_sk,
                inv1.inv_item_sk,
                inv1.d_moy,
                inv1.qty_cov AS cov,
                inv2.d_moy AS inv2_d_moy,
                inv2.qty_cov AS inv2_cov
            FROM temp_table inv1
            INNER JOIN temp_table inv2 ON inv1.inv_warehouse_sk = inv2.inv_warehouse_sk
            AND inv1.inv_item_sk = inv2.inv_item_sk
            AND inv1.d_moy = {month}
            AND inv2.d_moy = {next_month}
            ORDER BY inv1.inv_warehouse_sk,
                inv1.inv_item_sk",
            month = self.month,
            next_month = self.month + 1,
        )
    }
}

impl BenchmarkQuery for Q23 {
    fn name(&self) -> &str {
        "q23"
    }

    fn datasets(&self) -> &[&'static str] {
        DATASETS
    }

    fn pipeline(&self) -> Result<Pipeline> {
        Pipeline::new(vec![
            Stage::bound("inv_dates", self.inv_dates()),
            Stage::bound("mean_df", self.mean_df()),
            Stage::bound("iteration", self.iteration()),
            Stage::bound("temp_table", self.temp_table()),
            Stage::output("last_query", self.last_query()),
        ])
    }

    fn output_schema(&self) -> OutputSchema {
        OutputSchema::new([
            "inv_warehouse_sk",
            "inv_item_sk",
            "d_moy",
            "cov",
            "inv2_d_moy",
            "inv2_cov",
        ])
        .with_cast("d_moy", DataType::Int64)
        .with_cast("inv2_d_moy", DataType::Int64)
    }
}
