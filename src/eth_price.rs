//! Pages backwards through Binance daily ETHUSDT klines and derives the day-over-day return and
//! 7-day return volatility columns of the price CSV.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::paths::Paths;
use crate::stats;

const BINANCE_API: &str = "https://api.binance.com";
const KLINES_PAGE_LIMIT: u32 = 1000;
const KLINES_PAGE_COUNT: usize = 5;
const PAGE_SPACING: Duration = Duration::from_millis(500);
const VOLATILITY_WINDOW: usize = 7;

#[derive(Serialize)]
struct KlinesParams {
    symbol: &'static str,
    interval: &'static str,
    limit: u32,
    #[serde(rename = "endTime", skip_serializing_if = "Option::is_none")]
    end_time: Option<i64>,
}

/// One daily candle, reduced to what the pipeline keeps: open time and close price.
#[derive(Debug, PartialEq)]
pub struct Candle {
    pub open_time_ms: i64,
    pub close_usd: f64,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct PriceRecord {
    pub day: NaiveDate,
    pub price_usd: f64,
    pub daily_return: Option<f64>,
    pub rolling_vol_7d: Option<f64>,
}

pub struct BinanceClient {
    base_url: String,
    client: reqwest::Client,
}

impl BinanceClient {
    pub fn new() -> Self {
        Self::new_with_base_url(BINANCE_API)
    }

    pub fn new_with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    /// One page of daily candles, oldest first, ending at `end_time` when given. Binance returns
    /// each kline as a mixed-type array; index 0 is the open time in ms and index 4 the close
    /// price as a string.
    pub async fn get_daily_klines(&self, end_time: Option<i64>) -> Result<Vec<Candle>> {
        let params = KlinesParams {
            symbol: "ETHUSDT",
            interval: "1d",
            limit: KLINES_PAGE_LIMIT,
            end_time,
        };
        let url = format!(
            "{}/api/v3/klines?{}",
            self.base_url,
            serde_qs::to_string(&params)?
        );

        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        let klines = body
            .as_array()
            .with_context(|| format!("unexpected klines response: {body}"))?;

        klines.iter().map(parse_kline).collect()
    }
}

fn parse_kline(kline: &Value) -> Result<Candle> {
    let fields = kline.as_array().context("kline is not an array")?;
    let open_time_ms = fields
        .first()
        .and_then(Value::as_i64)
        .context("kline without open time")?;
    let close_usd = fields
        .get(4)
        .and_then(Value::as_str)
        .and_then(|close| close.parse::<f64>().ok())
        .context("kline without close price")?;

    Ok(Candle {
        open_time_ms,
        close_usd,
    })
}

/// Collapse candles to one close per calendar day, deduped and sorted by day.
pub fn close_by_day(candles: &[Candle]) -> Vec<(NaiveDate, f64)> {
    let mut by_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for candle in candles {
        let Some(timestamp) = DateTime::from_timestamp_millis(candle.open_time_ms) else {
            continue;
        };
        by_day
            .entry(timestamp.date_naive())
            .or_insert(candle.close_usd);
    }
    by_day.into_iter().collect()
}

/// Derive `daily_return` (fractional day-over-day change, null on the first day) and
/// `rolling_vol_7d` (sample std. dev. over a full 7-return window, null before that).
pub fn add_returns(closes: &[(NaiveDate, f64)]) -> Vec<PriceRecord> {
    let returns: Vec<Option<f64>> = closes
        .iter()
        .enumerate()
        .map(|(i, (_, price))| {
            if i == 0 {
                None
            } else {
                let previous = closes[i - 1].1;
                Some(price / previous - 1.0)
            }
        })
        .collect();

    closes
        .iter()
        .enumerate()
        .map(|(i, (day, price))| {
            let window_start = (i + 1).saturating_sub(VOLATILITY_WINDOW);
            let window: Vec<f64> = returns[window_start..=i].iter().flatten().copied().collect();
            let rolling_vol_7d = if window.len() < VOLATILITY_WINDOW {
                None
            } else {
                stats::sample_std(&window)
            };

            PriceRecord {
                day: *day,
                price_usd: *price,
                daily_return: returns[i],
                rolling_vol_7d,
            }
        })
        .collect()
}

pub async fn fetch_eth_price(paths: &Paths) -> Result<()> {
    let client = BinanceClient::new();

    info!("fetching eth price history from binance");
    let mut candles: Vec<Candle> = Vec::new();
    let mut end_time: Option<i64> = None;

    for page in 1..=KLINES_PAGE_COUNT {
        debug!(page, pages = KLINES_PAGE_COUNT, "fetching klines page");

        let page_candles = client.get_daily_klines(end_time).await?;
        if page_candles.is_empty() {
            break;
        }

        let oldest_open_time = page_candles
            .iter()
            .map(|candle| candle.open_time_ms)
            .min()
            .expect("non-empty page to have an oldest candle");
        end_time = Some(oldest_open_time - 1);
        candles.extend(page_candles);

        sleep(PAGE_SPACING).await;
    }

    let closes = close_by_day(&candles);
    if closes.is_empty() {
        bail!("binance returned no usable daily candles");
    }

    let records = add_returns(&closes);

    if let Some(parent) = paths.price_csv.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(&paths.price_csv)?;
    for record in &records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    info!(
        rows = records.len(),
        out = %paths.price_csv.display(),
        "wrote eth price history"
    );
    Ok(())
}
