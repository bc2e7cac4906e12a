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

use crate::tags::{column_label, HCFX_COLUMNS};
use serde_json::{Map, Number, Value};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Column, Row, ValueRef};
use std::collections::BTreeMap;
use std::error;
use std::fmt;

pub const HCFX_TABLE: &str = "HCFX";

/// Database flavors that the snapshot table can be created in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    MySql,
    Sqlite,
}

impl Backend {
    fn from_uri(uri: &str) -> Result<Self, StoreError> {
        let scheme = uri.split_once(':').map(|(s, _)| s).unwrap_or(uri);
        match scheme {
            "mysql" | "mariadb" => Ok(Backend::MySql),
            "sqlite" => Ok(Backend::Sqlite),
            _ => Err(StoreError::Unsupported(scheme.to_owned())),
        }
    }

    fn auto_increment(self) -> &'static str {
        match self {
            Backend::MySql => "INTEGER NOT NULL AUTO_INCREMENT PRIMARY KEY",
            Backend::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
        }
    }
}

#[derive(Debug)]
pub enum StoreError {
    Unsupported(String),
    UnknownColumn(String),
    Sqlx(sqlx::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(s) => write!(f, "unsupported database scheme '{}'", s),
            Self::UnknownColumn(c) => write!(f, "unknown column '{}'", c),
            Self::Sqlx(e) => write!(f, "database error: {}", e),
        }
    }
}

impl error::Error for StoreError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Sqlx(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Sqlx(e)
    }
}

/// Strip a `+driver` suffix from the scheme of a database URI, so that connection
/// strings written for other tooling (`mysql+pymysql://...`) can be used as-is.
pub fn normalize_uri(uri: &str) -> String {
    match uri.split_once("://") {
        Some((scheme, rest)) => {
            let scheme = scheme.split_once('+').map(|(s, _)| s).unwrap_or(scheme);
            format!("{}://{}", scheme, rest)
        }
        None => uri.to_owned(),
    }
}

/// Relational store holding heat-consumption deviation snapshots.
///
/// Values are decoded through the sqlx `Any` driver, which understands integers, floats,
/// text, booleans and binary data. Other column types (DATETIME, DECIMAL) returned by
/// raw queries must be `CAST` to one of these.
#[derive(Clone, Debug)]
pub struct Store {
    pool: AnyPool,
    backend: Backend,
}

impl Store {
    pub async fn connect(uri: &str, max_connections: u32) -> Result<Self, StoreError> {
        let (uri, backend) = Self::prepare(uri)?;
        let pool = Self::pool_options(max_connections).connect(&uri).await?;
        Ok(Store { pool, backend })
    }

    /// Create a store without connecting. Connections are opened on first use, so an
    /// unreachable database only fails the requests that need it.
    pub fn connect_lazy(uri: &str, max_connections: u32) -> Result<Self, StoreError> {
        let (uri, backend) = Self::prepare(uri)?;
        let pool = Self::pool_options(max_connections).connect_lazy(&uri)?;
        Ok(Store { pool, backend })
    }

    fn prepare(uri: &str) -> Result<(String, Backend), StoreError> {
        sqlx::any::install_default_drivers();
        let uri = normalize_uri(uri);
        let backend = Backend::from_uri(&uri)?;
        Ok((uri, backend))
    }

    fn pool_options(max_connections: u32) -> AnyPoolOptions {
        AnyPoolOptions::new().max_connections(max_connections.max(1))
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Create the snapshot table unless it already exists.
    pub async fn create_table(&self) -> Result<(), StoreError> {
        let columns: Vec<String> = HCFX_COLUMNS.iter().map(|(c, _)| format!("{} DOUBLE", c)).collect();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (id {}, {})",
            HCFX_TABLE,
            self.backend.auto_increment(),
            columns.join(", ")
        );

        sqlx::query(&sql).execute(&self.pool).await?;
        tracing::debug!(message = "ensured snapshot table exists", table = HCFX_TABLE);
        Ok(())
    }

    /// Insert a snapshot of deviation values keyed by column name. Columns that are
    /// not given are stored as NULL. Returns the id of the new row when the database
    /// reports one.
    pub async fn insert_snapshot(&self, values: &BTreeMap<String, Option<f64>>) -> Result<Option<i64>, StoreError> {
        if let Some(unknown) = values.keys().find(|k| column_label(k).is_none()) {
            return Err(StoreError::UnknownColumn(unknown.clone()));
        }

        let sql = if values.is_empty() {
            match self.backend {
                Backend::MySql => format!("INSERT INTO {} () VALUES ()", HCFX_TABLE),
                Backend::Sqlite => format!("INSERT INTO {} DEFAULT VALUES", HCFX_TABLE),
            }
        } else {
            let columns: Vec<&str> = values.keys().map(String::as_str).collect();
            let params = vec!["?"; columns.len()];
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                HCFX_TABLE,
                columns.join(", "),
                params.join(", ")
            )
        };

        let mut query = sqlx::query(&sql);
        for v in values.values() {
            query = query.bind(*v);
        }

        let res = query.execute(&self.pool).await?;
        Ok(res.last_insert_id())
    }

    /// Newest snapshot with the `id` column removed and every other column renamed
    /// to its display label. Column order is kept.
    pub async fn latest_snapshot(&self) -> Result<Option<Map<String, Value>>, StoreError> {
        let sql = format!("SELECT * FROM {} ORDER BY id DESC LIMIT 1", HCFX_TABLE);
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;

        Ok(row.map(|row| {
            row_to_json(&row)
                .into_iter()
                .filter(|(k, _)| k != "id")
                .map(|(k, v)| (column_label(&k).map(str::to_owned).unwrap_or(k), v))
                .collect()
        }))
    }

    /// Run arbitrary SQL and return every row as an ordered map of column name to value.
    /// Statements that do not produce rows return an empty list.
    pub async fn query(&self, sql: &str) -> Result<Vec<Map<String, Value>>, StoreError> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        tracing::debug!(message = "executed raw query", rows = rows.len());
        Ok(rows.iter().map(row_to_json).collect())
    }
}

fn row_to_json(row: &AnyRow) -> Map<String, Value> {
    row.columns()
        .iter()
        .map(|c| (c.name().to_owned(), column_value(row, c.ordinal())))
        .collect()
}

fn column_value(row: &AnyRow, index: usize) -> Value {
    match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(_) => {}
        Err(_) => return Value::Null,
    }

    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return float(v);
    }
    if let Ok(v) = row.try_get::<f32, _>(index) {
        return float(f64::from(v));
    }
    if let Ok(v) = row.try_get::<String, _>(index) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<bool, _>(index) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(index) {
        return Value::from(String::from_utf8_lossy(&v).into_owned());
    }

    tracing::warn!(message = "unable to decode column, returning null", index = index);
    Value::Null
}

/// JSON number for `v`, null for NaN and infinities which JSON cannot represent.
fn float(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}
