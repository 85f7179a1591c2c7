//! Reads the joined daily view, derives the time-aware features, ranks and summarizes, and
//! persists the augmented series.

use std::cmp::Ordering;
use std::path::Path;

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use tracing::info;

use crate::db;
use crate::paths::Paths;
use crate::report;
use crate::stats;
use crate::warehouse::{WarehouseError, JOINED_VIEW};

const FEE_SPIKE_WINDOW: usize = 7;
const FEE_SPIKE_MIN_PERIODS: usize = 3;
const FEE_SPIKE_RATIO: f64 = 1.25;

/// One row of the joined view, in the view's projection order.
#[derive(Clone, Debug, FromRow, PartialEq)]
pub struct DailyRecord {
    pub day: NaiveDate,
    pub eth_inflow: Option<f64>,
    pub eth_outflow: Option<f64>,
    pub netflow_eth: Option<f64>,
    pub sample_block_number: Option<i64>,
    pub block_tx_count: Option<i64>,
    pub block_gas_used_ratio: Option<f64>,
    pub block_base_fee_gwei: Option<f64>,
    pub price_usd: Option<f64>,
    pub daily_return: Option<f64>,
    pub rolling_vol_7d: Option<f64>,
}

/// A daily record plus the derived columns. Kept flat so the CSV writer sees one wide row.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnalysisRecord {
    pub day: NaiveDate,
    pub eth_inflow: Option<f64>,
    pub eth_outflow: Option<f64>,
    pub netflow_eth: Option<f64>,
    pub sample_block_number: Option<i64>,
    pub block_tx_count: Option<i64>,
    pub block_gas_used_ratio: Option<f64>,
    pub block_base_fee_gwei: Option<f64>,
    pub price_usd: Option<f64>,
    pub daily_return: Option<f64>,
    pub rolling_vol_7d: Option<f64>,
    pub next_day_return: Option<f64>,
    pub fee_spike: Option<bool>,
}

/// All joined rows, day ascending. Zero rows means the warehouse build went wrong and is fatal
/// here, not a valid empty result.
pub async fn load_view(pool: &SqlitePool) -> Result<Vec<DailyRecord>, WarehouseError> {
    let rows = sqlx::query_as::<_, DailyRecord>(&format!(
        "SELECT
            day,
            eth_inflow,
            eth_outflow,
            netflow_eth,
            sample_block_number,
            block_tx_count,
            block_gas_used_ratio,
            block_base_fee_gwei,
            price_usd,
            daily_return,
            rolling_vol_7d
        FROM {JOINED_VIEW}
        ORDER BY day ASC"
    ))
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Err(WarehouseError::EmptyRelation(JOINED_VIEW));
    }
    Ok(rows)
}

/// Derive `next_day_return` and `fee_spike` over the day-ordered records.
///
/// `next_day_return` on day d is the return recorded on day d+1; the last day has none. The fee
/// spike flag compares a day's base fee against 1.25x the trailing 7-day mean (window inclusive
/// of the day, at least 3 non-null observations); with a short window or a null same-day base fee
/// the flag is indeterminate rather than false.
pub fn add_features(records: &[DailyRecord]) -> Vec<AnalysisRecord> {
    records
        .iter()
        .enumerate()
        .map(|(i, daily)| {
            let next_day_return = records.get(i + 1).and_then(|next| next.daily_return);

            let window_start = (i + 1).saturating_sub(FEE_SPIKE_WINDOW);
            let window: Vec<Option<f64>> = records[window_start..=i]
                .iter()
                .map(|record| record.block_base_fee_gwei)
                .collect();
            let trailing_mean = stats::windowed_mean(&window, FEE_SPIKE_MIN_PERIODS);
            let fee_spike = match (daily.block_base_fee_gwei, trailing_mean) {
                (Some(base_fee), Some(mean)) => Some(base_fee > mean * FEE_SPIKE_RATIO),
                _ => None,
            };

            AnalysisRecord {
                day: daily.day,
                eth_inflow: daily.eth_inflow,
                eth_outflow: daily.eth_outflow,
                netflow_eth: daily.netflow_eth,
                sample_block_number: daily.sample_block_number,
                block_tx_count: daily.block_tx_count,
                block_gas_used_ratio: daily.block_gas_used_ratio,
                block_base_fee_gwei: daily.block_base_fee_gwei,
                price_usd: daily.price_usd,
                daily_return: daily.daily_return,
                rolling_vol_7d: daily.rolling_vol_7d,
                next_day_return,
                fee_spike,
            }
        })
        .collect()
}

pub struct Extremes {
    pub top_outflow: Vec<AnalysisRecord>,
    pub top_inflow: Vec<AnalysisRecord>,
}

// Null net flows sort last in both directions, matching how the ranking treats missing data as
// unrankable rather than extreme.
fn compare_netflow(a: &Option<f64>, b: &Option<f64>, descending: bool) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => {
            let ordering = a.partial_cmp(b).unwrap_or(Ordering::Equal);
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// The n strongest net-outflow days and the n strongest net-inflow days. Both sorts are stable,
/// so equal net flows keep their day-ascending input order.
pub fn rank_extremes(records: &[AnalysisRecord], n: usize) -> Extremes {
    let mut top_outflow: Vec<AnalysisRecord> = records.to_vec();
    top_outflow.sort_by(|a, b| compare_netflow(&a.netflow_eth, &b.netflow_eth, false));
    top_outflow.truncate(n);

    let mut top_inflow: Vec<AnalysisRecord> = records.to_vec();
    top_inflow.sort_by(|a, b| compare_netflow(&a.netflow_eth, &b.netflow_eth, true));
    top_inflow.truncate(n);

    Extremes {
        top_outflow,
        top_inflow,
    }
}

/// Write the full augmented table. The day column serializes as a plain calendar date.
pub fn persist(records: &[AnalysisRecord], path: &Path) -> Result<(), WarehouseError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

pub async fn explore_liquidity(paths: &Paths, top_n: usize) -> Result<(), WarehouseError> {
    if !paths.warehouse_db.exists() {
        return Err(WarehouseError::MissingInput(paths.warehouse_db.clone()));
    }

    let pool = db::get_db_pool(&paths.warehouse_db).await?;
    let daily = load_view(&pool).await?;
    pool.close().await;

    report::print_healthcheck(&daily);

    let records = add_features(&daily);

    persist(&records, &paths.analysis_csv)?;
    info!(out = %paths.analysis_csv.display(), rows = records.len(), "saved full joined series");
    println!("\nsaved full joined series to {}", paths.analysis_csv.display());

    let extremes = rank_extremes(&records, top_n);
    report::print_extremes(&extremes, top_n);
    report::print_correlations(&records);
    report::print_fee_spike_days(&records);

    Ok(())
}
