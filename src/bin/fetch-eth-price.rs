use eth_cex_analysis::{fetch_eth_price, log, paths::Paths};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    log::init();

    fetch_eth_price(&Paths::default()).await?;

    Ok(())
}
