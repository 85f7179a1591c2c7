use std::path::PathBuf;

/// Every file the pipeline reads or writes, gathered in one place so components can be pointed at
/// temp dirs in tests instead of the fixed relative layout.
#[derive(Clone, Debug)]
pub struct Paths {
    pub flows_raw_json: PathBuf,
    pub flows_csv: PathBuf,
    pub price_csv: PathBuf,
    pub network_sample_csv: PathBuf,
    pub warehouse_db: PathBuf,
    pub analysis_csv: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            flows_raw_json: "data/raw/dune/cex_eth_flows_raw.json".into(),
            flows_csv: "data/processed/dune/cex_eth_flows_daily.csv".into(),
            price_csv: "data/processed/binance/eth_price_daily.csv".into(),
            network_sample_csv: "data/processed/etherscan/network_sample_daily.csv".into(),
            warehouse_db: "warehouse/eth_cex.db".into(),
            analysis_csv: "data/analysis/cex_eth_liquidity_full.csv".into(),
        }
    }
}

impl Paths {
    /// Root all paths under the given directory. Used by tests.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let defaults = Self::default();
        Self {
            flows_raw_json: root.join(defaults.flows_raw_json),
            flows_csv: root.join(defaults.flows_csv),
            price_csv: root.join(defaults.price_csv),
            network_sample_csv: root.join(defaults.network_sample_csv),
            warehouse_db: root.join(defaults.warehouse_db),
            analysis_csv: root.join(defaults.analysis_csv),
        }
    }
}
