use anyhow::Result;
use clap::Parser;

use mrbarrier::cmd::worker::{Args, RoleArg};
use mrbarrier::worker::{MapWorker, ReduceWorker};
use mrbarrier::{utils, workload};

#[tokio::main]
async fn main() -> Result<()> {
    utils::init_tracing();
    let args = Args::parse();
    let engine = workload::named(&args.workload)?;

    match args.role {
        RoleArg::Map => {
            MapWorker::connect(&args.join, args.port, engine, args.pause())
                .await?
                .run()
                .await?
        }
        RoleArg::Reduce => {
            ReduceWorker::connect(&args.join, args.port, engine, args.pause())
                .await?
                .run()
                .await?
        }
    }
    Ok(())
}
