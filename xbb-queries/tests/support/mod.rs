#![allow(dead_code)]

use datafusion::arrow::array::{ArrayRef, Int32Array, Int64Array, RecordBatch, StringArray};
use datafusion::arrow::datatypes::{DataType, Field, Schema};
use datafusion::parquet::arrow::ArrowWriter;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

/// Write `batch` as `<data_dir>/<dataset>/part-0.parquet`
pub fn write_dataset(data_dir: &Path, dataset: &str, batch: RecordBatch) {
    let dir = data_dir.join(dataset);
    fs::create_dir_all(&dir).expect("Failed to create dataset directory");
    let file = File::create(dir.join("part-0.parquet")).expect("Failed to create parquet file");
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).expect("Failed to open writer");
    writer.write(&batch).expect("Failed to write batch");
    writer.close().expect("Failed to close writer");
}

fn batch(fields: Vec<Field>, columns: Vec<ArrayRef>) -> RecordBatch {
    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).expect("Invalid fixture batch")
}

/// Calendar used by the inventory fixtures: date 1 is January 2001,
/// date 2 is February 2001 and date 3 is January 2002.
pub fn write_date_dim(data_dir: &Path) {
    write_dataset(
        data_dir,
        "date_dim",
        batch(
            vec![
                Field::new("d_date_sk", DataType::Int64, false),
                Field::new("d_year", DataType::Int32, false),
                Field::new("d_moy", DataType::Int32, false),
            ],
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(Int32Array::from(vec![2001, 2001, 2002])),
                Arc::new(Int32Array::from(vec![1, 2, 1])),
            ],
        ),
    );
}

pub fn write_warehouse(data_dir: &Path) {
    write_dataset(
        data_dir,
        "warehouse",
        batch(
            vec![Field::new("w_warehouse_sk", DataType::Int64, false)],
            vec![Arc::new(Int64Array::from(vec![1, 2]))],
        ),
    );
}

/// One inventory observation
#[derive(Debug, Clone, Copy)]
pub struct Inventory {
    pub date: i64,
    pub warehouse: i64,
    pub item: i64,
    pub quantity: i32,
}

/// Observations of one (warehouse, item) pair on one date
pub fn observations(warehouse: i64, item: i64, date: i64, quantities: &[i32]) -> Vec<Inventory> {
    quantities
        .iter()
        .map(|&quantity| Inventory {
            date,
            warehouse,
            item,
            quantity,
        })
        .collect()
}

pub fn write_inventory(data_dir: &Path, rows: &[Inventory]) {
    write_dataset(
        data_dir,
        "inventory",
        batch(
            vec![
                Field::new("inv_date_sk", DataType::Int64, false),
                Field::new("inv_item_sk", DataType::Int64, false),
                Field::new("inv_warehouse_sk", DataType::Int64, false),
                Field::new("inv_quantity_on_hand", DataType::Int32, true),
            ],
            vec![
                Arc::new(rows.iter().map(|r| Some(r.date)).collect::<Int64Array>()),
                Arc::new(rows.iter().map(|r| Some(r.item)).collect::<Int64Array>()),
                Arc::new(rows.iter().map(|r| Some(r.warehouse)).collect::<Int64Array>()),
                Arc::new(rows.iter().map(|r| Some(r.quantity)).collect::<Int32Array>()),
            ],
        ),
    );
}

/// Write all q23 source datasets
pub fn write_q23_data(data_dir: &Path, rows: &[Inventory]) {
    write_date_dim(data_dir);
    write_warehouse(data_dir);
    write_inventory(data_dir, rows);
}

/// Item catalog: items 1..=15 are Books of class 1..=15, item 100 is Music.
pub fn write_item(data_dir: &Path) {
    let mut item_sk: Vec<i64> = (1..=15).collect();
    let mut class_id: Vec<i32> = (1..=15).collect();
    let mut category: Vec<&str> = vec!["Books"; 15];
    item_sk.push(100);
    class_id.push(1);
    category.push("Music");

    write_dataset(
        data_dir,
        "item",
        batch(
            vec![
                Field::new("i_item_sk", DataType::Int64, false),
                Field::new("i_class_id", DataType::Int32, false),
                Field::new("i_category", DataType::Utf8, false),
            ],
            vec![
                Arc::new(Int64Array::from(item_sk)),
                Arc::new(Int32Array::from(class_id)),
                Arc::new(StringArray::from(category)),
            ],
        ),
    );
}

/// `(customer, item)` purchases; a `None` customer is an anonymous sale
pub fn write_store_sales(data_dir: &Path, sales: &[(Option<i64>, i64)]) {
    write_dataset(
        data_dir,
        "store_sales",
        batch(
            vec![
                Field::new("ss_customer_sk", DataType::Int64, true),
                Field::new("ss_item_sk", DataType::Int64, false),
            ],
            vec![
                Arc::new(sales.iter().map(|(c, _)| *c).collect::<Int64Array>()),
                Arc::new(sales.iter().map(|(_, i)| Some(*i)).collect::<Int64Array>()),
            ],
        ),
    );
}

/// `count` purchases of `item` by `customer`
pub fn purchases(customer: i64, item: i64, count: usize) -> Vec<(Option<i64>, i64)> {
    vec![(Some(customer), item); count]
}
