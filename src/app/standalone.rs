use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tracing::info;

use mrbarrier::standalone::{Args, LocalCluster};
use mrbarrier::{utils, workload};

#[tokio::main]
async fn main() -> Result<()> {
    utils::init_tracing();
    let args = Args::parse();
    let engine = workload::named(&args.workload)?;
    let job = args.job.to_job();
    let store = args.store.open().await?;

    let cluster = LocalCluster::start(
        job.clone(),
        store,
        engine,
        Duration::from_millis(args.worker_pause_ms),
    )
    .await?;
    let metrics = cluster.solve().await?;
    info!(
        iterations = metrics.len(),
        output = %job.output,
        metrics = %job.metricsfile.display(),
        "done"
    );
    Ok(())
}
