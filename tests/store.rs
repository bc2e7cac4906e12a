// powerplant_api - Operations dashboard backend for power-plant efficiency metrics
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use powerplant_api::store::{Backend, Store, StoreError};
use powerplant_api::tags::HCFX_COLUMNS;
use serde_json::{json, Value};
use std::collections::BTreeMap;

async fn snapshot_store() -> Store {
    let store = Store::connect("sqlite::memory:", 1).await.unwrap();
    store.create_table().await.unwrap();
    store
}

fn snapshot(values: &[(&str, f64)]) -> BTreeMap<String, Option<f64>> {
    values.iter().map(|(k, v)| (k.to_string(), Some(*v))).collect()
}

#[tokio::test]
async fn test_create_table_is_idempotent() {
    let store = snapshot_store().await;
    store.create_table().await.unwrap();

    assert_eq!(Backend::Sqlite, store.backend());
    assert!(store.latest_snapshot().await.unwrap().is_none());
}

#[tokio::test]
async fn test_latest_snapshot_uses_labels() {
    let store = snapshot_store().await;
    store.insert_snapshot(&snapshot(&[("boiler_eff", 1.0)])).await.unwrap();
    store
        .insert_snapshot(&snapshot(&[("boiler_eff", 2.5), ("peak_vally_diff", -0.75)]))
        .await
        .unwrap();

    let record = store.latest_snapshot().await.unwrap().unwrap();

    assert!(!record.contains_key("id"));
    assert_eq!(HCFX_COLUMNS.len(), record.len());
    assert_eq!(Some(&json!(2.5)), record.get("锅炉效率耗差(g/kWh)"));
    assert_eq!(Some(&json!(-0.75)), record.get("峰谷差耗差(g/kWh)"));
    assert_eq!(Some(&Value::Null), record.get("主汽温度耗差(g/kWh)"));

    let labels: Vec<&str> = record.keys().map(String::as_str).collect();
    let expected: Vec<&str> = HCFX_COLUMNS.iter().map(|(_, label)| *label).collect();
    assert_eq!(expected, labels);
}

#[tokio::test]
async fn test_insert_empty_snapshot() {
    let store = snapshot_store().await;
    let id = store.insert_snapshot(&BTreeMap::new()).await.unwrap();

    assert_eq!(Some(1), id);
    let record = store.latest_snapshot().await.unwrap().unwrap();
    assert!(record.values().all(Value::is_null));
}

#[tokio::test]
async fn test_insert_unknown_column() {
    let store = snapshot_store().await;
    let res = store.insert_snapshot(&snapshot(&[("not_a_column", 1.0)])).await;

    assert!(matches!(res, Err(StoreError::UnknownColumn(c)) if c == "not_a_column"));
    assert!(store.latest_snapshot().await.unwrap().is_none());
}

#[tokio::test]
async fn test_query_rows() {
    let store = snapshot_store().await;
    store.insert_snapshot(&snapshot(&[("boiler_eff", 1.5)])).await.unwrap();
    store.insert_snapshot(&snapshot(&[("boiler_eff", 3.0)])).await.unwrap();

    let rows = store
        .query("SELECT id, boiler_eff, 'unit 4' AS unit FROM HCFX ORDER BY id")
        .await
        .unwrap();

    assert_eq!(
        vec![
            json!({"id": 1, "boiler_eff": 1.5, "unit": "unit 4"}),
            json!({"id": 2, "boiler_eff": 3.0, "unit": "unit 4"}),
        ],
        rows.into_iter().map(Value::Object).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_query_without_rows() {
    let store = snapshot_store().await;
    let rows = store.query("DELETE FROM HCFX").await.unwrap();

    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_query_invalid_sql() {
    let store = snapshot_store().await;
    let res = store.query("SELECT * FROM missing_table").await;

    assert!(matches!(res, Err(StoreError::Sqlx(_))));
}

#[tokio::test]
async fn test_unsupported_scheme() {
    let res = Store::connect_lazy("postgres://localhost/plant", 1);

    assert!(matches!(res, Err(StoreError::Unsupported(s)) if s == "postgres"));
}
