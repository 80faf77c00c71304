use anyhow::Result;
use clap::Parser;
use tracing::info;

use mrbarrier::cmd::master::Args;
use mrbarrier::master::Master;
use mrbarrier::utils;

#[tokio::main]
async fn main() -> Result<()> {
    utils::init_tracing();
    let args = Args::parse();
    let job = args.job.to_job();
    let store = args.store.open().await?;

    let mut master = Master::initialize(job, store).await?;
    let metrics = master.solve().await?;
    info!(iterations = metrics.len(), "all iterations finished");
    Ok(())
}
