//! End-to-end tests of the warehouse builder and liquidity explorer against temp-dir sources.

use std::path::Path;

use chrono::NaiveDate;
use eth_cex_analysis::db;
use eth_cex_analysis::liquidity::{self, explore_liquidity};
use eth_cex_analysis::paths::Paths;
use eth_cex_analysis::warehouse::{self, build_warehouse, WarehouseError};

const FLOWS_CSV: &str = "\
day,eth_inflow,eth_outflow,netflow_eth
2024-01-01,100,40,60
2024-01-02,50,80,-30
2024-01-03,10,10,5
";

// No 2024-01-03 row.
const PRICE_CSV: &str = "\
day,price_usd,daily_return,rolling_vol_7d
2024-01-01,2300,0.02,
2024-01-02,2277,-0.01,0.03
";

// No 2024-01-02 row.
const NETWORK_CSV: &str = "\
day,sample_block_number,block_tx_count,block_gas_used,block_gas_limit,block_gas_used_ratio,block_base_fee_gwei
2024-01-01,19000000,150,15000000,30000000,0.5,25.0
2024-01-03,19014000,180,20000000,30000000,0.6667,40.0
";

fn day(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn write_file(path: &Path, contents: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn write_sources(paths: &Paths) {
    write_file(&paths.flows_csv, FLOWS_CSV);
    write_file(&paths.price_csv, PRICE_CSV);
    write_file(&paths.network_sample_csv, NETWORK_CSV);
}

async fn load_built_view(paths: &Paths) -> Vec<liquidity::DailyRecord> {
    let pool = db::get_db_pool(&paths.warehouse_db).await.unwrap();
    let records = liquidity::load_view(&pool).await.unwrap();
    pool.close().await;
    records
}

#[tokio::test]
async fn left_join_preserves_every_flow_day() {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::rooted_at(dir.path());
    write_sources(&paths);

    build_warehouse(&paths).await.unwrap();

    let records = load_built_view(&paths).await;
    let days: Vec<NaiveDate> = records.iter().map(|r| r.day).collect();
    assert_eq!(
        days,
        vec![day("2024-01-01"), day("2024-01-02"), day("2024-01-03")]
    );

    // A day missing from the network source keeps its row, with null sample columns.
    assert_eq!(records[1].sample_block_number, None);
    assert_eq!(records[1].block_base_fee_gwei, None);
    assert_eq!(records[1].daily_return, Some(-0.01));

    // A day missing from the price source keeps its row, with null price columns.
    assert_eq!(records[2].price_usd, None);
    assert_eq!(records[2].sample_block_number, Some(19_014_000));
}

#[tokio::test]
async fn netflow_is_carried_through_not_recomputed() {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::rooted_at(dir.path());
    write_sources(&paths);

    build_warehouse(&paths).await.unwrap();

    let records = load_built_view(&paths).await;
    // The 2024-01-03 source row deliberately carries netflow 5 despite inflow - outflow = 0.
    assert_eq!(records[2].netflow_eth, Some(5.0));
}

#[tokio::test]
async fn rebuild_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::rooted_at(dir.path());
    write_sources(&paths);

    build_warehouse(&paths).await.unwrap();
    build_warehouse(&paths).await.unwrap();

    let pool = db::get_db_pool(&paths.warehouse_db).await.unwrap();
    let row_count = warehouse::joined_row_count(&pool).await.unwrap();
    pool.close().await;
    assert_eq!(row_count, 3);
}

#[tokio::test]
async fn missing_source_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::rooted_at(dir.path());
    write_file(&paths.flows_csv, FLOWS_CSV);
    write_file(&paths.network_sample_csv, NETWORK_CSV);
    // No price file.

    let result = build_warehouse(&paths).await;
    match result {
        Err(WarehouseError::MissingInput(path)) => assert_eq!(path, paths.price_csv),
        other => panic!("expected missing input, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_joined_view_is_fatal_for_the_explorer() {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::rooted_at(dir.path());
    write_file(&paths.flows_csv, "day,eth_inflow,eth_outflow,netflow_eth\n");
    write_file(&paths.price_csv, PRICE_CSV);
    write_file(&paths.network_sample_csv, NETWORK_CSV);

    // An empty flow source builds an empty view; the builder reports it, the explorer refuses it.
    build_warehouse(&paths).await.unwrap();

    let result = explore_liquidity(&paths, 15).await;
    assert!(matches!(result, Err(WarehouseError::EmptyRelation(_))));
}

#[tokio::test]
async fn missing_warehouse_is_fatal_for_the_explorer() {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::rooted_at(dir.path());

    let result = explore_liquidity(&paths, 15).await;
    assert!(matches!(result, Err(WarehouseError::MissingInput(_))));
}

#[tokio::test]
async fn explorer_writes_the_augmented_series() {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::rooted_at(dir.path());
    write_sources(&paths);

    build_warehouse(&paths).await.unwrap();
    explore_liquidity(&paths, 15).await.unwrap();

    let contents = std::fs::read_to_string(&paths.analysis_csv).unwrap();
    let mut lines = contents.lines();

    let header = lines.next().unwrap();
    assert!(header.starts_with("day,eth_inflow,eth_outflow,netflow_eth,"));
    assert!(header.ends_with("next_day_return,fee_spike"));

    let rows: Vec<&str> = lines.collect();
    assert_eq!(rows.len(), 3);

    // 2024-01-01 sees the following day's return; the last day has none.
    let first: Vec<&str> = rows[0].split(',').collect();
    assert_eq!(first[0], "2024-01-01");
    assert_eq!(first[11], "-0.01");
    let last: Vec<&str> = rows[2].split(',').collect();
    assert_eq!(last[0], "2024-01-03");
    assert_eq!(last[11], "");
}

#[tokio::test]
async fn unparseable_numeric_cells_flow_through_as_nulls() {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::rooted_at(dir.path());
    write_sources(&paths);
    write_file(
        &paths.price_csv,
        "day,price_usd,daily_return,rolling_vol_7d\n2024-01-01,not-a-price,0.02,\n",
    );

    build_warehouse(&paths).await.unwrap();

    let records = load_built_view(&paths).await;
    assert_eq!(records[0].price_usd, None);
    assert_eq!(records[0].daily_return, Some(0.02));
}
