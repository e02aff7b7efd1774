mod support;

use datafusion::arrow::array::AsArray;
use datafusion::arrow::datatypes::{Float64Type, Int64Type};
use std::fs;
use std::path::Path;
use support::{purchases, write_item, write_store_sales};
use xbb_queries::Q26;
use xbb_tools::ml::ClusterSummary;
use xbb_tools::profile::Profiler;
use xbb_tools::tables::{register_datasets, FileSystemSource};
use xbb_tools::{
    connect, run_query, BenchmarkQuery, ClusterConfig, KMeans, RunConfig, RunState, StageTable,
    WrittenOutput,
};

const MUSIC_ITEM: i64 = 100;

fn cluster() -> ClusterConfig {
    ClusterConfig {
        workers: 2,
        ..ClusterConfig::default()
    }
}

async fn customer_features(data_dir: &Path, query: &Q26) -> StageTable {
    let conn = connect(&cluster()).await.expect("Failed to connect");
    register_datasets(
        conn.context(),
        &FileSystemSource::new(data_dir),
        query.datasets(),
    )
    .await
    .expect("Failed to register datasets");

    let result = query
        .pipeline()
        .unwrap()
        .run(conn.context(), &mut Profiler::default(), |_| {})
        .await
        .expect("Pipeline failed");
    query.output_schema().normalize(&result).expect("Output contract violated")
}

fn customer_ids(table: &StageTable) -> Vec<i64> {
    table
        .batches()
        .iter()
        .flat_map(|b| b.column(0).as_primitive::<Int64Type>().values().to_vec())
        .collect()
}

fn small_q26(n_clusters: usize) -> Q26 {
    Q26 {
        kmeans: KMeans {
            n_clusters,
            ..KMeans::default()
        },
        ..Q26::default()
    }
}

#[tokio::test]
async fn test_more_than_five_purchases_required() {
    let dir = tempfile::tempdir().unwrap();
    write_item(dir.path());

    let mut sales = Vec::new();
    sales.extend(purchases(1, 1, 6)); // exactly six Books purchases
    sales.extend(purchases(2, 2, 5)); // exactly five
    sales.extend(purchases(3, MUSIC_ITEM, 10)); // wrong category
    sales.extend(vec![(None, 3); 8]); // anonymous sales
    write_store_sales(dir.path(), &sales);

    let result = customer_features(dir.path(), &Q26::default()).await;

    assert_eq!(customer_ids(&result), vec![1]);
}

#[tokio::test]
async fn test_class_counts_become_features() {
    let dir = tempfile::tempdir().unwrap();
    write_item(dir.path());

    let mut sales = Vec::new();
    sales.extend(purchases(7, 1, 2));
    sales.extend(purchases(7, 2, 1));
    sales.extend(purchases(7, 3, 3));
    sales.extend(purchases(7, 15, 1));
    sales.extend(purchases(7, MUSIC_ITEM, 4));
    write_store_sales(dir.path(), &sales);

    let result = customer_features(dir.path(), &Q26::default()).await;
    let batches = result.batches();
    let batch = batches.iter().find(|b| b.num_rows() > 0).expect("No rows");

    let feature = |column: &str| {
        batch
            .column_by_name(column)
            .unwrap()
            .as_primitive::<Float64Type>()
            .value(0)
    };
    assert_eq!(feature("id1"), 2.0);
    assert_eq!(feature("id2"), 1.0);
    assert_eq!(feature("id3"), 3.0);
    assert_eq!(feature("id4"), 0.0);
    assert_eq!(feature("id15"), 1.0);
}

#[tokio::test]
async fn test_customers_ordered_by_id() {
    let dir = tempfile::tempdir().unwrap();
    write_item(dir.path());

    let mut sales = Vec::new();
    for customer in [42, 7, 19] {
        sales.extend(purchases(customer, 4, 6));
    }
    write_store_sales(dir.path(), &sales);

    let result = customer_features(dir.path(), &Q26::default()).await;
    assert_eq!(customer_ids(&result), vec![7, 19, 42]);
}

#[tokio::test]
async fn test_clusters_written() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let output_dir = dir.path().join("out");
    write_item(&data_dir);

    let mut sales = Vec::new();
    // Two customers buying class 1 heavily, two buying class 9 heavily
    sales.extend(purchases(1, 1, 20));
    sales.extend(purchases(2, 1, 22));
    sales.extend(purchases(3, 9, 20));
    sales.extend(purchases(4, 9, 21));
    sales.extend(purchases(5, 9, 5)); // too few purchases
    write_store_sales(&data_dir, &sales);

    let mut config = RunConfig::new(&data_dir, &output_dir);
    config.cluster = cluster();

    let report = run_query(&small_q26(2), &config).await.expect("Run failed");

    assert_eq!(report.final_state, RunState::Written);
    assert_eq!(report.rows_written(), 4);
    let WrittenOutput::Clusters { summary, labels, .. } = &report.output else {
        panic!("expected a cluster result, got {:?}", report.output);
    };
    assert!(labels.exists());

    let summary: ClusterSummary =
        serde_json::from_str(&fs::read_to_string(summary).unwrap()).expect("Invalid summary");
    assert_eq!(summary.nclusters, 2);
    assert_eq!(summary.cluster_centers.len(), 2);
    assert_eq!(summary.cluster_centers[0].len(), 15);
    // Within each pair only the purchase count differs, by 2 and 1
    assert!((summary.wssse - 2.5).abs() < 1e-9, "wssse = {}", summary.wssse);
}

#[tokio::test]
async fn test_too_few_customers_for_clusters() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    write_item(&data_dir);
    write_store_sales(&data_dir, &purchases(1, 1, 6));

    let mut config = RunConfig::new(&data_dir, dir.path().join("out"));
    config.cluster = cluster();

    let err = run_query(&Q26::default(), &config).await.unwrap_err();
    assert!(matches!(err, xbb_tools::Error::PostProcess(_)));
    assert!(!dir.path().join("out").join("q26-results.json").exists());
}

#[tokio::test]
async fn test_cluster_verification() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    write_item(&data_dir);
    let mut sales = Vec::new();
    for customer in 1..=4 {
        sales.extend(purchases(customer, customer, 6 + customer as usize));
    }
    write_store_sales(&data_dir, &sales);

    let mut config = RunConfig::new(&data_dir, dir.path().join("reference"));
    config.cluster = cluster();
    run_query(&small_q26(2), &config).await.expect("Reference run failed");

    config.output_dir = dir.path().join("out");
    config.verify_dir = Some(dir.path().join("reference"));
    let report = run_query(&small_q26(2), &config).await.expect("Run failed");
    assert_eq!(report.verified(), Some(true));

    let report = run_query(&small_q26(3), &config).await.expect("Run failed");
    assert_eq!(report.verified(), Some(false));
}
