//! Samples one execution-layer block per flow day (the block nearest-before 12:00 UTC) via the
//! Etherscan V2 API and writes the network sample CSV. A single block stands in for the whole
//! day, which keeps the fetch cheap at the cost of precision.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use format_url::FormatUrl;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::codecs::{from_hex_quantity, from_opt_hex_quantity, parse_day};
use crate::env::ENV_CONFIG;
use crate::paths::Paths;

const ETHERSCAN_V2_API: &str = "https://api.etherscan.io/v2/api";
const CHAIN_ID: &str = "1";
const REQUEST_SPACING: Duration = Duration::from_millis(200);
const WEI_PER_GWEI: f64 = 1e9;

// The balance of the EF donation address, a cheap call any key may make.
const KEY_CHECK_ADDRESS: &str = "0xde0b295669a9fd93d5f28d9ec85e40f4cb697bae";

#[derive(Debug, Deserialize)]
struct BlockNumberResponse {
    status: String,
    result: String,
}

/// The block fields the sample keeps. Quantities arrive as 0x-prefixed hex; blocks before the
/// fee-market fork carry no base fee at all.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionBlock {
    #[serde(deserialize_with = "from_hex_quantity")]
    pub gas_used: u64,
    #[serde(deserialize_with = "from_hex_quantity")]
    pub gas_limit: u64,
    #[serde(default, deserialize_with = "from_opt_hex_quantity")]
    pub base_fee_per_gas: Option<u64>,
    #[serde(default)]
    pub transactions: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ProxyResponse {
    error: Option<Value>,
    result: Option<ExecutionBlock>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct NetworkSampleRecord {
    pub day: NaiveDate,
    pub sample_block_number: u64,
    pub block_tx_count: u64,
    pub block_gas_used: u64,
    pub block_gas_limit: u64,
    pub block_gas_used_ratio: f64,
    pub block_base_fee_gwei: f64,
}

pub struct EtherscanClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl EtherscanClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::new_with_base_url(ETHERSCAN_V2_API, api_key)
    }

    pub fn new_with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    /// The number of the block mined nearest before the given unix timestamp.
    pub async fn get_block_number_by_time(&self, timestamp: i64) -> Result<u64> {
        let timestamp = timestamp.to_string();
        let url = FormatUrl::new(&self.base_url)
            .with_query_params(vec![
                ("chainid", CHAIN_ID),
                ("module", "block"),
                ("action", "getblocknobytime"),
                ("timestamp", timestamp.as_str()),
                ("closest", "before"),
                ("apikey", self.api_key.as_str()),
            ])
            .format_url();

        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<BlockNumberResponse>()
            .await?;

        if body.status != "1" {
            bail!("getblocknobytime failed: {}", body.result);
        }
        body.result
            .parse::<u64>()
            .with_context(|| format!("getblocknobytime returned a non-number: {}", body.result))
    }

    pub async fn get_block_by_number(&self, block_number: u64) -> Result<ExecutionBlock> {
        let tag = format!("0x{block_number:x}");
        let url = FormatUrl::new(&self.base_url)
            .with_query_params(vec![
                ("chainid", CHAIN_ID),
                ("module", "proxy"),
                ("action", "eth_getBlockByNumber"),
                ("tag", tag.as_str()),
                ("boolean", "true"),
                ("apikey", self.api_key.as_str()),
            ])
            .format_url();

        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<ProxyResponse>()
            .await?;

        if let Some(error) = body.error {
            bail!("eth_getBlockByNumber error: {error}");
        }
        body.result
            .with_context(|| format!("eth_getBlockByNumber returned no result for {tag}"))
    }

    /// A raw balance call, used only to smoke-test the configured key.
    pub async fn get_balance_raw(&self, address: &str) -> Result<String> {
        let url = FormatUrl::new(&self.base_url)
            .with_query_params(vec![
                ("chainid", CHAIN_ID),
                ("module", "account"),
                ("action", "balance"),
                ("address", address),
                ("apikey", self.api_key.as_str()),
            ])
            .format_url();

        Ok(self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?)
    }
}

/// Derive the per-day sample from a fetched block. Gas ratio is 0 for a zero gas limit, and a
/// missing base fee counts as zero gwei.
pub fn sample_from_block(
    day: NaiveDate,
    block_number: u64,
    block: &ExecutionBlock,
) -> NetworkSampleRecord {
    let block_gas_used_ratio = if block.gas_limit == 0 {
        0.0
    } else {
        block.gas_used as f64 / block.gas_limit as f64
    };

    NetworkSampleRecord {
        day,
        sample_block_number: block_number,
        block_tx_count: block.transactions.len() as u64,
        block_gas_used: block.gas_used,
        block_gas_limit: block.gas_limit,
        block_gas_used_ratio,
        block_base_fee_gwei: block.base_fee_per_gas.unwrap_or(0) as f64 / WEI_PER_GWEI,
    }
}

/// The unique, sorted day set of the flows CSV. Days that fail to parse are dropped, the fetch
/// samples whatever valid days remain.
pub fn flow_days(flows_csv: &Path) -> Result<Vec<NaiveDate>> {
    if !flows_csv.exists() {
        bail!("flows file not found: {}", flows_csv.display());
    }

    let mut reader = csv::Reader::from_path(flows_csv)?;
    let headers = reader.headers()?.clone();
    let day_index = headers
        .iter()
        .position(|header| header == "day")
        .with_context(|| format!("missing day column in {}", flows_csv.display()))?;

    let mut days = BTreeSet::new();
    for record in reader.records() {
        let record = record?;
        if let Some(day) = record.get(day_index).and_then(parse_day) {
            days.insert(day);
        }
    }
    Ok(days.into_iter().collect())
}

async fn sample_day(client: &EtherscanClient, day: NaiveDate) -> Result<NetworkSampleRecord> {
    let noon = day
        .and_hms_opt(12, 0, 0)
        .expect("noon to be a valid time of day")
        .and_utc();

    let block_number = client.get_block_number_by_time(noon.timestamp()).await?;
    let block = client.get_block_by_number(block_number).await?;
    Ok(sample_from_block(day, block_number, &block))
}

pub async fn fetch_network_sample(paths: &Paths) -> Result<()> {
    let api_key = ENV_CONFIG
        .etherscan_api_key
        .as_ref()
        .expect("expect ETHERSCAN_API_KEY in env in order to fetch network samples");
    let client = EtherscanClient::new(api_key);

    let days = flow_days(&paths.flows_csv)?;
    if days.is_empty() {
        bail!(
            "no valid days found in {} after parsing",
            paths.flows_csv.display()
        );
    }
    info!(
        days = days.len(),
        first = %days[0],
        last = %days[days.len() - 1],
        "sampling one block per flow day"
    );

    let mut progress = pit_wall::Progress::new("sample blocks", days.len() as u64);
    let mut records = Vec::with_capacity(days.len());

    for day in days {
        match sample_day(&client, day).await {
            Ok(record) => {
                debug!(
                    %day,
                    block = record.sample_block_number,
                    txs = record.block_tx_count,
                    base_fee_gwei = record.block_base_fee_gwei,
                    "sampled block"
                );
                records.push(record);
            }
            Err(error) => {
                warn!(%day, %error, "failed to sample block - skipping day");
            }
        }

        progress.inc_work_done();
        if progress.work_done % 10 == 0 {
            info!("{}", progress.get_progress_string());
        }

        sleep(REQUEST_SPACING).await;
    }

    if records.is_empty() {
        bail!("no rows collected from etherscan, check key permissions and rate limits");
    }

    if let Some(parent) = paths.network_sample_csv.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(&paths.network_sample_csv)?;
    for record in &records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    info!(
        rows = records.len(),
        out = %paths.network_sample_csv.display(),
        "wrote network samples"
    );
    Ok(())
}

/// Issue a single balance query and hand back the raw response so an operator can eyeball the
/// key before a long fetch.
pub async fn check_etherscan_api_key() -> Result<()> {
    let api_key = ENV_CONFIG
        .etherscan_api_key
        .as_ref()
        .expect("expect ETHERSCAN_API_KEY in env in order to check the key");
    let client = EtherscanClient::new(api_key);

    info!("sending balance request to etherscan v2");
    let raw = client.get_balance_raw(KEY_CHECK_ADDRESS).await?;
    println!("{raw}");
    Ok(())
}
