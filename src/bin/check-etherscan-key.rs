use eth_cex_analysis::{check_etherscan_api_key, log};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    log::init();

    check_etherscan_api_key().await?;

    Ok(())
}
