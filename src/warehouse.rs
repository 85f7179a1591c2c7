//! Builds the analytical warehouse: the three fetcher CSVs loaded as typed relations in a single
//! SQLite file, plus the left-anchored joined view the explorer reads. The whole thing is rebuilt
//! from scratch on every run.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info};

use crate::codecs::{from_day_string, lenient_f64, lenient_i64};
use crate::db;
use crate::paths::Paths;

pub const FLOWS_TABLE: &str = "fact_cex_eth_flows";
pub const PRICE_TABLE: &str = "fact_eth_price";
pub const NETWORK_SAMPLE_TABLE: &str = "fact_eth_network_sample";
pub const JOINED_VIEW: &str = "v_cex_eth_macro_with_network";

pub const FLOW_COLUMNS: [&str; 4] = ["day", "eth_inflow", "eth_outflow", "netflow_eth"];
pub const PRICE_COLUMNS: [&str; 4] = ["day", "price_usd", "daily_return", "rolling_vol_7d"];
pub const NETWORK_SAMPLE_COLUMNS: [&str; 7] = [
    "day",
    "sample_block_number",
    "block_tx_count",
    "block_gas_used",
    "block_gas_limit",
    "block_gas_used_ratio",
    "block_base_fee_gwei",
];

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("missing input file: {0}")]
    MissingInput(PathBuf),
    #[error("{relation} is missing required columns: {missing:?}")]
    SchemaMismatch {
        relation: &'static str,
        missing: Vec<String>,
    },
    #[error("{0} returned 0 rows")]
    EmptyRelation(&'static str),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
pub struct FlowRow {
    #[serde(deserialize_with = "from_day_string")]
    pub day: NaiveDate,
    #[serde(deserialize_with = "lenient_f64")]
    pub eth_inflow: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub eth_outflow: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub netflow_eth: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct PriceRow {
    #[serde(deserialize_with = "from_day_string")]
    pub day: NaiveDate,
    #[serde(deserialize_with = "lenient_f64")]
    pub price_usd: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub daily_return: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub rolling_vol_7d: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct NetworkSampleRow {
    #[serde(deserialize_with = "from_day_string")]
    pub day: NaiveDate,
    #[serde(deserialize_with = "lenient_i64")]
    pub sample_block_number: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub block_tx_count: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub block_gas_used: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub block_gas_limit: Option<i64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub block_gas_used_ratio: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub block_base_fee_gwei: Option<f64>,
}

/// Read a headed CSV into typed rows. The header is validated against the declared column set
/// before any row is touched, so a malformed source fails with the missing columns named instead
/// of a silently incomplete relation. An uninterpretable day cell is fatal; numeric cells coerce
/// to null inside the row deserializers.
pub fn load_and_type<T: DeserializeOwned>(
    path: &Path,
    relation: &'static str,
    required_columns: &[&str],
) -> Result<Vec<T>, WarehouseError> {
    if !path.exists() {
        return Err(WarehouseError::MissingInput(path.to_path_buf()));
    }

    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let missing: Vec<String> = required_columns
        .iter()
        .filter(|column| !headers.iter().any(|header| header == **column))
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(WarehouseError::SchemaMismatch { relation, missing });
    }

    let rows = reader.deserialize().collect::<Result<Vec<T>, _>>()?;
    debug!(relation, rows = rows.len(), "loaded and typed source file");
    Ok(rows)
}

// Each store_* drops and recreates its relation inside one transaction, so no partial relation
// is ever observable and re-running the builder never accumulates rows.

async fn store_flows(pool: &SqlitePool, rows: Vec<FlowRow>) -> Result<(), WarehouseError> {
    let create_sql = format!(
        "CREATE TABLE {FLOWS_TABLE} (
            day DATE PRIMARY KEY,
            eth_inflow DOUBLE,
            eth_outflow DOUBLE,
            netflow_eth DOUBLE
        )"
    );
    let insert_sql = format!(
        "INSERT INTO {FLOWS_TABLE} (day, eth_inflow, eth_outflow, netflow_eth)
         VALUES ($1, $2, $3, $4)"
    );

    let mut tx = pool.begin().await?;
    sqlx::query(&format!("DROP TABLE IF EXISTS {FLOWS_TABLE}"))
        .execute(&mut *tx)
        .await?;
    sqlx::query(&create_sql).execute(&mut *tx).await?;
    for row in &rows {
        sqlx::query(&insert_sql)
            .bind(row.day)
            .bind(row.eth_inflow)
            .bind(row.eth_outflow)
            .bind(row.netflow_eth)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn store_prices(pool: &SqlitePool, rows: Vec<PriceRow>) -> Result<(), WarehouseError> {
    let create_sql = format!(
        "CREATE TABLE {PRICE_TABLE} (
            day DATE PRIMARY KEY,
            price_usd DOUBLE,
            daily_return DOUBLE,
            rolling_vol_7d DOUBLE
        )"
    );
    let insert_sql = format!(
        "INSERT INTO {PRICE_TABLE} (day, price_usd, daily_return, rolling_vol_7d)
         VALUES ($1, $2, $3, $4)"
    );

    let mut tx = pool.begin().await?;
    sqlx::query(&format!("DROP TABLE IF EXISTS {PRICE_TABLE}"))
        .execute(&mut *tx)
        .await?;
    sqlx::query(&create_sql).execute(&mut *tx).await?;
    for row in &rows {
        sqlx::query(&insert_sql)
            .bind(row.day)
            .bind(row.price_usd)
            .bind(row.daily_return)
            .bind(row.rolling_vol_7d)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn store_network_samples(
    pool: &SqlitePool,
    rows: Vec<NetworkSampleRow>,
) -> Result<(), WarehouseError> {
    let create_sql = format!(
        "CREATE TABLE {NETWORK_SAMPLE_TABLE} (
            day DATE PRIMARY KEY,
            sample_block_number BIGINT,
            block_tx_count BIGINT,
            block_gas_used BIGINT,
            block_gas_limit BIGINT,
            block_gas_used_ratio DOUBLE,
            block_base_fee_gwei DOUBLE
        )"
    );
    let insert_sql = format!(
        "INSERT INTO {NETWORK_SAMPLE_TABLE} (
            day,
            sample_block_number,
            block_tx_count,
            block_gas_used,
            block_gas_limit,
            block_gas_used_ratio,
            block_base_fee_gwei
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)"
    );

    let mut tx = pool.begin().await?;
    sqlx::query(&format!("DROP TABLE IF EXISTS {NETWORK_SAMPLE_TABLE}"))
        .execute(&mut *tx)
        .await?;
    sqlx::query(&create_sql).execute(&mut *tx).await?;
    for row in &rows {
        sqlx::query(&insert_sql)
            .bind(row.day)
            .bind(row.sample_block_number)
            .bind(row.block_tx_count)
            .bind(row.block_gas_used)
            .bind(row.block_gas_limit)
            .bind(row.block_gas_used_ratio)
            .bind(row.block_base_fee_gwei)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// (Re)declare the joined view: every flow day survives, price and network columns go null where
/// those sources have no matching day.
async fn build_joined_view(pool: &SqlitePool) -> Result<(), WarehouseError> {
    sqlx::query(&format!("DROP VIEW IF EXISTS {JOINED_VIEW}"))
        .execute(pool)
        .await?;
    sqlx::query(&format!(
        "CREATE VIEW {JOINED_VIEW} AS
         SELECT
             f.day,
             f.eth_inflow,
             f.eth_outflow,
             f.netflow_eth,
             n.sample_block_number,
             n.block_tx_count,
             n.block_gas_used_ratio,
             n.block_base_fee_gwei,
             p.price_usd,
             p.daily_return,
             p.rolling_vol_7d
         FROM {FLOWS_TABLE} f
         LEFT JOIN {NETWORK_SAMPLE_TABLE} n
             ON f.day = n.day
         LEFT JOIN {PRICE_TABLE} p
             ON f.day = p.day"
    ))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn joined_row_count(pool: &SqlitePool) -> Result<i64, WarehouseError> {
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {JOINED_VIEW}"))
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn build_warehouse(paths: &Paths) -> Result<(), WarehouseError> {
    let flows: Vec<FlowRow> = load_and_type(&paths.flows_csv, FLOWS_TABLE, &FLOW_COLUMNS)?;
    let prices: Vec<PriceRow> = load_and_type(&paths.price_csv, PRICE_TABLE, &PRICE_COLUMNS)?;
    let samples: Vec<NetworkSampleRow> = load_and_type(
        &paths.network_sample_csv,
        NETWORK_SAMPLE_TABLE,
        &NETWORK_SAMPLE_COLUMNS,
    )?;

    if let Some(parent) = paths.warehouse_db.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let pool = db::get_db_pool(&paths.warehouse_db).await?;

    store_flows(&pool, flows).await?;
    store_prices(&pool, prices).await?;
    store_network_samples(&pool, samples).await?;
    build_joined_view(&pool).await?;

    let row_count = joined_row_count(&pool).await?;
    pool.close().await;

    info!(db = %paths.warehouse_db.display(), row_count, "warehouse built");
    println!(
        "warehouse built at {} ({} joined rows)",
        paths.warehouse_db.display(),
        row_count
    );

    Ok(())
}
