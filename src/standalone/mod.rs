//! Master and workers in one process, talking over loopback.
//!
//! Uses the same endpoints and wire protocol as a distributed deployment;
//! only the process boundary is gone.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::cmd::master::{JobArgs, StoreArgs};
use crate::error::Result;
use crate::master::Master;
use crate::metrics::IterationMetrics;
use crate::store::ArtifactStore;
use crate::worker::{MapWorker, ReduceWorker};
use crate::{Job, Workload};

#[derive(Parser, Debug)]
#[command(version, about = "Run master and workers in one process", long_about = None)]
pub struct Args {
    #[clap(flatten)]
    pub job: JobArgs,

    #[clap(flatten)]
    pub store: StoreArgs,

    /// Name of the workload
    #[clap(short, long, default_value = "wc")]
    pub workload: String,

    /// Pause of each worker after a task, in milliseconds
    #[clap(long, default_value_t = 0)]
    pub worker_pause_ms: u64,
}

pub struct LocalCluster {
    master: Master,
    workers: JoinSet<Result<()>>,
}

impl LocalCluster {
    /// Bind the master, then connect M map and R reduce workers to it.
    pub async fn start(
        job: Job,
        store: Arc<dyn ArtifactStore>,
        workload: Workload,
        worker_pause: Duration,
    ) -> Result<Self> {
        let master = Master::initialize(job, store).await?;
        let job = master.job();
        let host = if job.host.is_unspecified() {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            job.host
        }
        .to_string();

        let mut workers = JoinSet::new();
        for _ in 0..job.n_map {
            let worker = MapWorker::connect(&host, job.base_port, workload, worker_pause).await?;
            workers.spawn(worker.run());
        }
        for _ in 0..job.n_reduce {
            let worker =
                ReduceWorker::connect(&host, job.base_port, workload, worker_pause).await?;
            workers.spawn(worker.run());
        }
        info!(workers = workers.len(), "local cluster started");
        Ok(Self { master, workers })
    }

    pub fn master(&mut self) -> &mut Master {
        &mut self.master
    }

    /// Run every iteration, then stop the workers.
    pub async fn solve(mut self) -> Result<Vec<IterationMetrics>> {
        let result = self.master.solve().await;
        self.shutdown().await;
        result
    }

    pub async fn shutdown(&mut self) {
        self.workers.abort_all();
        while let Some(joined) = self.workers.join_next().await {
            if let Ok(Err(e)) = joined {
                warn!("worker exited: {e}");
            }
        }
    }
}
