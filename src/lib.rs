pub mod cex_flows;
pub mod codecs;
pub mod db;
pub mod env;
pub mod eth_price;
pub mod liquidity;
pub mod log;
pub mod network_sample;
pub mod paths;
pub mod report;
pub mod stats;
pub mod warehouse;

pub use cex_flows::fetch_cex_flows;
pub use eth_price::fetch_eth_price;
pub use liquidity::explore_liquidity;
pub use network_sample::check_etherscan_api_key;
pub use network_sample::fetch_network_sample;
pub use warehouse::build_warehouse;
