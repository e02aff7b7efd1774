use async_trait::async_trait;
use datafusion::arrow::array::RecordBatch;
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::catalog::Session;
use datafusion::datasource::{MemTable, TableProvider};
use datafusion::error::Result as DataFusionResult;
use datafusion::logical_expr::{Expr, TableType};
use datafusion::physical_plan::{collect_partitioned, ExecutionPlan};
use datafusion::prelude::DataFrame;
use std::any::Any;
use std::sync::Arc;

/// Materialized result of one pipeline stage.
///
/// Holds the record batches of every output partition so that the result
/// can be registered under a name and scanned by later stages, or handed to
/// a post-processing step after being coalesced to a single partition.
#[derive(Debug, Clone)]
pub struct StageTable {
    stage: String,
    schema: SchemaRef,
    partitions: Arc<Vec<Vec<RecordBatch>>>,
}

impl StageTable {
    pub fn new(
        stage: impl Into<String>,
        schema: SchemaRef,
        partitions: Vec<Vec<RecordBatch>>,
    ) -> Self {
        Self {
            stage: stage.into(),
            schema,
            partitions: Arc::new(partitions),
        }
    }

    /// Execute a DataFrame and keep its output partitioning.
    ///
    /// The schema is taken from the physical plan so a stage that yields no
    /// rows still carries its declared columns, and it matches the schema of
    /// every produced batch.
    pub async fn from_dataframe(stage: &str, df: DataFrame) -> DataFusionResult<Self> {
        let task_ctx = Arc::new(df.task_ctx());
        let plan = df.create_physical_plan().await?;
        let schema = plan.schema();
        let partitions = collect_partitioned(plan, task_ctx).await?;
        Ok(Self::new(stage, schema, partitions))
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn schema_ref(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn partitions(&self) -> &[Vec<RecordBatch>] {
        &self.partitions
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn num_rows(&self) -> usize {
        self.partitions
            .iter()
            .flatten()
            .map(|batch| batch.num_rows())
            .sum()
    }

    /// All batches in partition order
    pub fn batches(&self) -> Vec<RecordBatch> {
        self.partitions.iter().flatten().cloned().collect()
    }

    /// Reduce to a single partition, preserving batch order.
    pub fn coalesce(&self) -> Self {
        Self::new(self.stage.clone(), self.schema.clone(), vec![self.batches()])
    }
}

#[async_trait]
impl TableProvider for StageTable {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn table_type(&self) -> TableType {
        TableType::Temporary
    }

    async fn scan(
        &self,
        state: &dyn Session,
        projection: Option<&Vec<usize>>,
        filters: &[Expr],
        limit: Option<usize>,
    ) -> DataFusionResult<Arc<dyn ExecutionPlan>> {
        // An empty stage still exposes one (empty) partition
        let partitions = if self.partitions.is_empty() {
            vec![vec![]]
        } else {
            self.partitions.as_ref().clone()
        };
        MemTable::try_new(self.schema.clone(), partitions)?
            .scan(state, projection, filters, limit)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::arrow::array::Int64Array;
    use datafusion::arrow::datatypes::{DataType, Field, Schema};
    use datafusion::prelude::SessionContext;

    fn batch(schema: &SchemaRef, values: Vec<i64>) -> RecordBatch {
        RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(values))]).unwrap()
    }

    fn two_partition_table() -> StageTable {
        let schema = Arc::new(Schema::new(vec![Field::new("cid", DataType::Int64, false)]));
        StageTable::new(
            "customers",
            schema.clone(),
            vec![vec![batch(&schema, vec![1, 2])], vec![batch(&schema, vec![3])]],
        )
    }

    #[test]
    fn test_coalesce_single_partition() {
        let table = two_partition_table();
        assert_eq!(table.num_partitions(), 2);

        let coalesced = table.coalesce();
        assert_eq!(coalesced.num_partitions(), 1);
        assert_eq!(coalesced.num_rows(), 3);
        assert_eq!(coalesced.stage(), "customers");
    }

    #[tokio::test]
    async fn test_registered_stage_is_queryable() {
        let ctx = SessionContext::new();
        ctx.register_table("customers", Arc::new(two_partition_table()))
            .expect("Failed to register table");

        let df = ctx
            .sql("SELECT SUM(cid) AS total FROM customers")
            .await
            .expect("Failed to create DataFrame");
        let results = df.collect().await.expect("Failed to collect results");

        let total = results[0]
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
            .value(0);
        assert_eq!(total, 6);
    }

    #[tokio::test]
    async fn test_projection_over_partitions() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("cid", DataType::Int64, false),
            Field::new("clicks", DataType::Int64, false),
        ]));
        let part = |cids: Vec<i64>, clicks: Vec<i64>| {
            RecordBatch::try_new(
                schema.clone(),
                vec![
                    Arc::new(Int64Array::from(cids)),
                    Arc::new(Int64Array::from(clicks)),
                ],
            )
            .unwrap()
        };
        let table = StageTable::new(
            "clicks",
            schema.clone(),
            vec![vec![part(vec![1, 2], vec![10, 20])], vec![part(vec![3], vec![30])]],
        );

        let ctx = SessionContext::new();
        ctx.register_table("clicks", Arc::new(table)).unwrap();
        let results = ctx
            .sql("SELECT clicks FROM clicks ORDER BY clicks DESC")
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(results[0].num_columns(), 1);
        let clicks: Vec<i64> = results
            .iter()
            .flat_map(|b| {
                b.column(0)
                    .as_any()
                    .downcast_ref::<Int64Array>()
                    .unwrap()
                    .values()
                    .to_vec()
            })
            .collect();
        assert_eq!(clicks, vec![30, 20, 10]);
    }

    #[tokio::test]
    async fn test_empty_stage_keeps_schema() {
        let ctx = SessionContext::new();
        let df = ctx.sql("SELECT 1 AS one WHERE 1 = 0").await.unwrap();
        let table = StageTable::from_dataframe("empty", df).await.unwrap();

        assert_eq!(table.num_rows(), 0);
        assert_eq!(table.schema_ref().field(0).name(), "one");

        ctx.register_table("empty", Arc::new(table)).unwrap();
        let results = ctx
            .sql("SELECT COUNT(*) FROM empty")
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(results[0].num_rows(), 1);
    }
}
