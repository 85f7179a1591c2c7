use eth_cex_analysis::{build_warehouse, log, paths::Paths};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    log::init();

    build_warehouse(&Paths::default()).await?;

    Ok(())
}
