use eth_cex_analysis::{fetch_network_sample, log, paths::Paths};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    log::init();

    fetch_network_sample(&Paths::default()).await?;

    Ok(())
}
