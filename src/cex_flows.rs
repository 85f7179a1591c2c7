//! Executes the saved Dune query for daily CEX ETH flows and normalizes the result rows into the
//! exchange flow CSV the warehouse expects.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::codecs::parse_day;
use crate::env::ENV_CONFIG;
use crate::paths::Paths;

const DUNE_API: &str = "https://api.dune.com/api/v1";
const CEX_ETH_FLOWS_QUERY_ID: u64 = 5971722;
const POLL_INTERVAL: Duration = Duration::from_secs(3);

// Dune reports execution state under different keys and with different prefixes depending on API
// version.
const COMPLETED_STATES: [&str; 2] = ["QUERY_STATE_COMPLETED", "COMPLETED"];
const FAILED_STATES: [&str; 2] = ["QUERY_STATE_FAILED", "FAILED"];

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    execution_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    state: Option<String>,
    execution_state: Option<String>,
}

impl StatusResponse {
    fn state(&self) -> Option<&str> {
        self.state.as_deref().or(self.execution_state.as_deref())
    }
}

#[derive(Debug, PartialEq, Serialize)]
pub struct FlowRecord {
    pub day: NaiveDate,
    pub eth_inflow: f64,
    pub eth_outflow: f64,
    pub netflow_eth: f64,
}

pub struct DuneClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl DuneClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::new_with_base_url(DUNE_API, api_key)
    }

    pub fn new_with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    pub async fn execute_query(&self, query_id: u64) -> Result<String> {
        let url = format!("{}/query/{query_id}/execute", self.base_url);
        let body = self
            .client
            .post(url)
            .header("X-Dune-API-Key", &self.api_key)
            .send()
            .await?
            .error_for_status()?
            .json::<ExecuteResponse>()
            .await?;

        body.execution_id
            .ok_or_else(|| anyhow!("dune did not return an execution_id for query {query_id}"))
    }

    pub async fn wait_for_completion(&self, execution_id: &str) -> Result<()> {
        let url = format!("{}/execution/{execution_id}/status", self.base_url);
        loop {
            let status = self
                .client
                .get(&url)
                .header("X-Dune-API-Key", &self.api_key)
                .send()
                .await?
                .error_for_status()?
                .json::<StatusResponse>()
                .await?;

            let state = status.state().unwrap_or("UNKNOWN").to_string();
            debug!(execution_id, %state, "dune execution state");

            if COMPLETED_STATES.contains(&state.as_str()) {
                return Ok(());
            }
            if FAILED_STATES.contains(&state.as_str()) {
                bail!("dune execution {execution_id} failed, state: {state}");
            }

            sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn get_results(&self, execution_id: &str) -> Result<Value> {
        let url = format!("{}/execution/{execution_id}/results", self.base_url);
        Ok(self
            .client
            .get(&url)
            .header("X-Dune-API-Key", &self.api_key)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?)
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Normalize raw Dune result rows into flow records. The day column is discovered among the
/// aliases Dune queries tend to use; the inflow and outflow columns by substring. Net flow is
/// recomputed here once, downstream consumers carry it through untouched.
pub fn normalize_rows(results: &Value) -> Result<Vec<FlowRecord>> {
    let rows = results
        .pointer("/result/rows")
        .and_then(Value::as_array)
        .context("unexpected results format: no result.rows")?;

    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let columns = first
        .as_object()
        .context("unexpected results format: row is not an object")?;

    let day_column = ["day", "date", "block_date"]
        .into_iter()
        .find(|column| columns.contains_key(*column))
        .context("no day column among day, date, block_date")?;
    let inflow_column = columns
        .keys()
        .find(|key| key.contains("inflow"))
        .context("no inflow column")?
        .clone();
    let outflow_column = columns
        .keys()
        .find(|key| key.contains("outflow"))
        .context("no outflow column")?
        .clone();

    rows.iter()
        .map(|row| {
            let day_value = row
                .get(day_column)
                .and_then(Value::as_str)
                .with_context(|| format!("row without {day_column}: {row}"))?;
            let day = parse_day(day_value)
                .with_context(|| format!("uninterpretable day value: {day_value}"))?;
            let eth_inflow = row
                .get(&inflow_column)
                .and_then(value_as_f64)
                .with_context(|| format!("row without numeric {inflow_column}: {row}"))?;
            let eth_outflow = row
                .get(&outflow_column)
                .and_then(value_as_f64)
                .with_context(|| format!("row without numeric {outflow_column}: {row}"))?;

            Ok(FlowRecord {
                day,
                eth_inflow,
                eth_outflow,
                netflow_eth: eth_inflow - eth_outflow,
            })
        })
        .collect()
}

pub async fn fetch_cex_flows(paths: &Paths) -> Result<()> {
    let api_key = ENV_CONFIG
        .dune_api_key
        .as_ref()
        .expect("expect DUNE_API_KEY in env in order to fetch cex flows");
    let client = DuneClient::new(api_key);

    info!(query_id = CEX_ETH_FLOWS_QUERY_ID, "executing dune query");
    let execution_id = client.execute_query(CEX_ETH_FLOWS_QUERY_ID).await?;

    info!(%execution_id, "waiting for dune execution to finish");
    client.wait_for_completion(&execution_id).await?;

    let results = client.get_results(&execution_id).await?;

    if let Some(parent) = paths.flows_raw_json.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&paths.flows_raw_json, serde_json::to_vec_pretty(&results)?)?;
    debug!(raw = %paths.flows_raw_json.display(), "persisted raw dune response");

    let records = normalize_rows(&results)?;
    if records.is_empty() {
        bail!("dune query {CEX_ETH_FLOWS_QUERY_ID} returned 0 rows");
    }

    if let Some(parent) = paths.flows_csv.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(&paths.flows_csv)?;
    for record in &records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    info!(
        rows = records.len(),
        out = %paths.flows_csv.display(),
        "wrote cex flows"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_rows_and_computes_netflow() {
        let results = json!({
            "result": {
                "rows": [
                    { "day": "2024-01-01", "eth_inflow": 100.0, "eth_outflow": 40.0 },
                    { "day": "2024-01-02", "eth_inflow": "50", "eth_outflow": "80" }
                ]
            }
        });

        let records = normalize_rows(&results).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].netflow_eth, 60.0);
        assert_eq!(records[1].netflow_eth, -30.0);
    }

    #[test]
    fn discovers_day_column_aliases() {
        let results = json!({
            "result": {
                "rows": [
                    { "block_date": "2024-01-01 00:00:00 UTC", "total_inflow": 1.0, "total_outflow": 2.0 }
                ]
            }
        });

        let records = normalize_rows(&results).unwrap();
        assert_eq!(
            records[0].day,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
        assert_eq!(records[0].netflow_eth, -1.0);
    }

    #[test]
    fn rejects_results_without_rows() {
        let results = json!({ "error": "not found" });
        assert!(normalize_rows(&results).is_err());
    }

    #[test]
    fn empty_rows_normalize_to_empty() {
        let results = json!({ "result": { "rows": [] } });
        assert_eq!(normalize_rows(&results).unwrap(), Vec::new());
    }

    #[tokio::test]
    async fn executes_and_polls_until_completed() {
        let mut server = mockito::Server::new_async().await;

        let execute_mock = server
            .mock("POST", "/query/5971722/execute")
            .match_header("X-Dune-API-Key", "test-key")
            .with_body(r#"{ "execution_id": "01HV" }"#)
            .create_async()
            .await;
        let status_mock = server
            .mock("GET", "/execution/01HV/status")
            .with_body(r#"{ "state": "QUERY_STATE_COMPLETED" }"#)
            .create_async()
            .await;
        let results_mock = server
            .mock("GET", "/execution/01HV/results")
            .with_body(r#"{ "result": { "rows": [ { "day": "2024-01-01", "eth_inflow": 1.0, "eth_outflow": 0.5 } ] } }"#)
            .create_async()
            .await;

        let client = DuneClient::new_with_base_url(server.url(), "test-key");
        let execution_id = client.execute_query(CEX_ETH_FLOWS_QUERY_ID).await.unwrap();
        client.wait_for_completion(&execution_id).await.unwrap();
        let results = client.get_results(&execution_id).await.unwrap();

        let records = normalize_rows(&results).unwrap();
        assert_eq!(records[0].netflow_eth, 0.5);

        execute_mock.assert_async().await;
        status_mock.assert_async().await;
        results_mock.assert_async().await;
    }

    #[tokio::test]
    async fn failed_execution_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/execution/01HV/status")
            .with_body(r#"{ "execution_state": "QUERY_STATE_FAILED" }"#)
            .create_async()
            .await;

        let client = DuneClient::new_with_base_url(server.url(), "test-key");
        let result = client.wait_for_completion("01HV").await;
        assert!(result.is_err());
    }
}
