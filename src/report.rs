//! Operator-facing report printing. Tables and summaries go to stdout; anything diagnostic goes
//! through tracing at the call sites.

use crate::liquidity::{AnalysisRecord, DailyRecord, Extremes};
use crate::stats;

const HEALTHCHECK_COLUMNS: [&str; 8] = [
    "eth_inflow",
    "eth_outflow",
    "netflow_eth",
    "price_usd",
    "daily_return",
    "block_tx_count",
    "block_base_fee_gwei",
    "block_gas_used_ratio",
];

const EXTREMES_HEADERS: [&str; 9] = [
    "day",
    "netflow_eth",
    "eth_inflow",
    "eth_outflow",
    "price_usd",
    "daily_return",
    "block_base_fee_gwei",
    "block_tx_count",
    "block_gas_used_ratio",
];

fn fmt_opt_f64(value: &Option<f64>) -> String {
    value.map(|v| format!("{v:.4}")).unwrap_or_default()
}

fn fmt_opt_i64(value: &Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Right-align every cell under its header, pandas-to_string style.
fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, header)| {
            rows.iter()
                .map(|row| row[i].len())
                .chain(std::iter::once(header.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{header:>width$}", width = widths[i]));
    }
    out.push('\n');
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&format!("{cell:>width$}", width = widths[i]));
        }
        out.push('\n');
    }
    out
}

fn extremes_row(record: &AnalysisRecord) -> Vec<String> {
    vec![
        record.day.to_string(),
        fmt_opt_f64(&record.netflow_eth),
        fmt_opt_f64(&record.eth_inflow),
        fmt_opt_f64(&record.eth_outflow),
        fmt_opt_f64(&record.price_usd),
        fmt_opt_f64(&record.daily_return),
        fmt_opt_f64(&record.block_base_fee_gwei),
        fmt_opt_i64(&record.block_tx_count),
        fmt_opt_f64(&record.block_gas_used_ratio),
    ]
}

fn non_null_count(records: &[DailyRecord], column: &str) -> usize {
    records
        .iter()
        .filter(|record| match column {
            "eth_inflow" => record.eth_inflow.is_some(),
            "eth_outflow" => record.eth_outflow.is_some(),
            "netflow_eth" => record.netflow_eth.is_some(),
            "price_usd" => record.price_usd.is_some(),
            "daily_return" => record.daily_return.is_some(),
            "block_tx_count" => record.block_tx_count.is_some(),
            "block_base_fee_gwei" => record.block_base_fee_gwei.is_some(),
            "block_gas_used_ratio" => record.block_gas_used_ratio.is_some(),
            other => panic!("unknown healthcheck column {other}"),
        })
        .count()
}

/// Row count, date range, and non-null counts for the fixed column list. The records arrive day
/// ordered, so first and last bound the range.
pub fn print_healthcheck(records: &[DailyRecord]) {
    println!("\nhealth check:");
    println!("rows: {}", records.len());
    if let (Some(first), Some(last)) = (records.first(), records.last()) {
        println!("date range: {} -> {}", first.day, last.day);
    }

    println!("\nnon-null counts:");
    let width = HEALTHCHECK_COLUMNS
        .iter()
        .map(|column| column.len())
        .max()
        .unwrap_or(0);
    for column in HEALTHCHECK_COLUMNS {
        println!(
            "{column:<width$} {count}",
            count = non_null_count(records, column)
        );
    }
}

pub fn print_extremes(extremes: &Extremes, n: usize) {
    let outflow_rows: Vec<Vec<String>> = extremes.top_outflow.iter().map(extremes_row).collect();
    let inflow_rows: Vec<Vec<String>> = extremes.top_inflow.iter().map(extremes_row).collect();

    println!("\ntop {n} days net OUTFLOW (most negative netflow_eth):");
    print!("{}", format_table(&EXTREMES_HEADERS, &outflow_rows));

    println!("\ntop {n} days net INFLOW (most positive netflow_eth):");
    print!("{}", format_table(&EXTREMES_HEADERS, &inflow_rows));
}

fn fmt_correlation(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.4}")).unwrap_or_else(|| "n/a".to_string())
}

/// The fixed correlation pair list: net flow against same-day return, next-day return, and the
/// three network metrics.
pub fn print_correlations(records: &[AnalysisRecord]) {
    let netflow: Vec<Option<f64>> = records.iter().map(|r| r.netflow_eth).collect();
    let daily_return: Vec<Option<f64>> = records.iter().map(|r| r.daily_return).collect();
    let next_day_return: Vec<Option<f64>> = records.iter().map(|r| r.next_day_return).collect();
    let base_fee: Vec<Option<f64>> = records.iter().map(|r| r.block_base_fee_gwei).collect();
    let tx_count: Vec<Option<f64>> = records
        .iter()
        .map(|r| r.block_tx_count.map(|count| count as f64))
        .collect();
    let gas_used_ratio: Vec<Option<f64>> = records.iter().map(|r| r.block_gas_used_ratio).collect();

    println!("\ncorrelations:");
    println!(
        "corr(netflow_eth, daily_return same day) = {}",
        fmt_correlation(stats::pearson(&netflow, &daily_return))
    );
    println!(
        "corr(netflow_eth, next_day_return)       = {}",
        fmt_correlation(stats::pearson(&netflow, &next_day_return))
    );
    println!(
        "corr(netflow_eth, block_base_fee_gwei)   = {}",
        fmt_correlation(stats::pearson(&netflow, &base_fee))
    );
    println!(
        "corr(netflow_eth, block_tx_count)        = {}",
        fmt_correlation(stats::pearson(&netflow, &tx_count))
    );
    println!(
        "corr(netflow_eth, block_gas_used_ratio)  = {}",
        fmt_correlation(stats::pearson(&netflow, &gas_used_ratio))
    );
}

/// The days where the fee spike flag is decidedly true; indeterminate days are not spikes.
pub fn print_fee_spike_days(records: &[AnalysisRecord]) {
    let spike_days: Vec<&AnalysisRecord> = records
        .iter()
        .filter(|record| record.fee_spike == Some(true))
        .collect();

    if spike_days.is_empty() {
        return;
    }

    println!("\nfee spike days (base fee > 1.25x 7d mean):");
    let headers = ["day", "block_base_fee_gwei", "netflow_eth", "daily_return"];
    let rows: Vec<Vec<String>> = spike_days
        .iter()
        .map(|record| {
            vec![
                record.day.to_string(),
                fmt_opt_f64(&record.block_base_fee_gwei),
                fmt_opt_f64(&record.netflow_eth),
                fmt_opt_f64(&record.daily_return),
            ]
        })
        .collect();
    print!("{}", format_table(&headers, &rows));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_table_aligns_columns() {
        let headers = ["day", "netflow_eth"];
        let rows = vec![
            vec!["2024-01-01".to_string(), "60.0000".to_string()],
            vec!["2024-01-02".to_string(), "-30.0000".to_string()],
        ];

        let table = format_table(&headers, &rows);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "       day netflow_eth");
        assert_eq!(lines[1], "2024-01-01     60.0000");
        assert_eq!(lines[2], "2024-01-02    -30.0000");
    }

    #[test]
    fn fmt_correlation_handles_undefined() {
        assert_eq!(fmt_correlation(None), "n/a");
        assert_eq!(fmt_correlation(Some(0.12345)), "0.1235");
    }
}
