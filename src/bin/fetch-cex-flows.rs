use eth_cex_analysis::{fetch_cex_flows, log, paths::Paths};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    log::init();

    fetch_cex_flows(&Paths::default()).await?;

    Ok(())
}
