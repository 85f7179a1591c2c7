use clap::Parser;

use eth_cex_analysis::{explore_liquidity, log, paths::Paths};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Number of days to show in each extremes table.
    #[clap(long, default_value_t = 15)]
    top_n: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    log::init();

    let cli = Cli::parse();
    explore_liquidity(&Paths::default(), cli.top_n).await?;

    Ok(())
}
