use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::{Error, Result};
use crate::job::DEFAULT_BASE_PORT;
use crate::store::s3::{S3Config, S3Store};
use crate::store::{ArtifactStore, FsStore, MemoryStore};
use crate::Job;

#[derive(Parser, Debug)]
#[command(version, about = "Run the MapReduce master", long_about = None)]
pub struct Args {
    #[clap(flatten)]
    pub job: JobArgs,

    #[clap(flatten)]
    pub store: StoreArgs,
}

/// Job parameters shared by the master and the standalone runner.
#[derive(clap::Args, Debug, Clone)]
pub struct JobArgs {
    /// Input text file
    pub datafile: PathBuf,
    /// Number of iterations to run
    #[clap(short, long, default_value_t = 20)]
    pub iters: usize,
    /// Number of map workers
    #[clap(short = 'M', long = "map", default_value_t = 10)]
    pub n_map: usize,
    /// Number of reduce workers
    #[clap(short = 'R', long = "reduce", default_value_t = 3)]
    pub n_reduce: usize,
    /// Base port; the five channels bind on port..=port+4
    #[clap(short, long, default_value_t = DEFAULT_BASE_PORT)]
    pub port: u16,
    /// Address to bind on
    #[clap(long, default_value = "0.0.0.0")]
    pub host: IpAddr,
    /// CSV file receiving one timing row per iteration
    #[clap(short = 'f', long = "metricsfile", default_value = "metrics.csv")]
    pub metricsfile: PathBuf,
    /// Name of the result artifact
    #[clap(short, long, default_value = "results.csv")]
    pub output: String,
    /// Pause between iterations, in milliseconds
    #[clap(long, default_value_t = 5000)]
    pub pause_ms: u64,
}

impl JobArgs {
    pub fn to_job(&self) -> Job {
        Job {
            n_map: self.n_map,
            n_reduce: self.n_reduce,
            iters: self.iters,
            host: self.host,
            base_port: self.port,
            datafile: self.datafile.clone(),
            metricsfile: self.metricsfile.clone(),
            output: self.output.clone(),
            pause: Duration::from_millis(self.pause_ms),
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Files under --workdir
    Fs,
    /// Process memory; artifacts vanish on exit
    Memory,
    /// An S3-compatible object store such as MinIO
    S3,
}

#[derive(clap::Args, Debug, Clone)]
pub struct StoreArgs {
    /// Where artifacts are kept
    #[clap(long, value_enum, default_value_t = StoreKind::Fs)]
    pub store: StoreKind,
    /// Artifact directory for the fs store
    #[clap(long, default_value = ".")]
    pub workdir: PathBuf,
    /// Endpoint of the object store, e.g. 127.0.0.1:9000
    #[clap(short = 's', long)]
    pub os: Option<String>,
    /// Login user of the object store
    #[clap(short, long)]
    pub user: Option<String>,
    /// Login password of the object store
    #[clap(long)]
    pub pw: Option<String>,
    /// Bucket holding the artifacts
    #[clap(long, default_value = "mrbarrier")]
    pub bucket: String,
}

impl StoreArgs {
    pub async fn open(&self) -> Result<Arc<dyn ArtifactStore>> {
        let store: Arc<dyn ArtifactStore> = match self.store {
            StoreKind::Fs => Arc::new(FsStore::open(&self.workdir).await?),
            StoreKind::Memory => Arc::new(MemoryStore::new()),
            StoreKind::S3 => {
                let endpoint = self.os.as_deref().unwrap_or("127.0.0.1:9000");
                let endpoint = if endpoint.contains("://") {
                    endpoint.to_string()
                } else {
                    format!("http://{endpoint}")
                };
                let required = |value: &Option<String>, flag: &str| {
                    value
                        .clone()
                        .ok_or_else(|| Error::Validation(format!("--{flag} is required for the s3 store")))
                };
                Arc::new(
                    S3Store::open(S3Config {
                        endpoint,
                        user: required(&self.user, "user")?,
                        password: required(&self.pw, "pw")?,
                        bucket: self.bucket.clone(),
                        prefix: String::new(),
                    })
                    .await?,
                )
            }
        };
        Ok(store)
    }
}
