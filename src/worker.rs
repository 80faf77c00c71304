//! Stateless map and reduce workers.
//!
//! A worker connects to the master, announces itself once on the liveness
//! channel and then loops forever: pull one task, run the workload, push the
//! result. Workers never see the filesystem or the artifact store.

use std::marker::PhantomData;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::transport::{self, Channel, Puller, Pusher};
use crate::{IntermediateRecord, MapTask, ReduceResult, ReduceShard, Workload};

/// What distinguishes a map worker from a reduce worker.
pub trait Role {
    type Task: DeserializeOwned;
    type Output: Serialize;

    const NAME: &'static str;
    const TASKS: Channel;
    const RESULTS: Channel;

    /// Reject tasks that decoded but are not internally consistent.
    fn check(task: &Self::Task) -> Result<()>;

    /// Run the workload on one task. Pure; no I/O.
    fn process(workload: &Workload, task: &Self::Task) -> anyhow::Result<Self::Output>;
}

pub struct Map;

pub struct Reduce;

impl Role for Map {
    type Task = MapTask;
    type Output = Vec<IntermediateRecord>;

    const NAME: &'static str = "map";
    const TASKS: Channel = Channel::MapTasks;
    const RESULTS: Channel = Channel::MapResults;

    fn check(task: &MapTask) -> Result<()> {
        if task.length != task.content.len() as u64 {
            return Err(Error::Validation(format!(
                "map task {} claims {} bytes but carries {}",
                task.id,
                task.length,
                task.content.len()
            )));
        }
        Ok(())
    }

    fn process(workload: &Workload, task: &MapTask) -> anyhow::Result<Vec<IntermediateRecord>> {
        (workload.map_fn)(&task.content)
    }
}

impl Role for Reduce {
    type Task = ReduceShard;
    type Output = Vec<ReduceResult>;

    const NAME: &'static str = "reduce";
    const TASKS: Channel = Channel::ReduceTasks;
    const RESULTS: Channel = Channel::ReduceResults;

    fn check(_shard: &ReduceShard) -> Result<()> {
        Ok(())
    }

    fn process(workload: &Workload, shard: &ReduceShard) -> anyhow::Result<Vec<ReduceResult>> {
        shard
            .iter()
            .map(|group| {
                let value =
                    (workload.reduce_fn)(&group.key, Box::new(group.values.iter().copied()))?;
                Ok(ReduceResult::new(group.key.clone(), value))
            })
            .collect()
    }
}

pub type MapWorker = Worker<Map>;
pub type ReduceWorker = Worker<Reduce>;

pub struct Worker<R: Role> {
    tasks: Puller,
    results: Pusher,
    workload: Workload,
    pause: Duration,
    completed: usize,
    _role: PhantomData<R>,
}

impl<R: Role> Worker<R> {
    /// Connect every endpoint, then announce liveness. A master that is not
    /// listening yet is a fatal transport error; there is no retry.
    pub async fn connect(
        master: &str,
        base_port: u16,
        workload: Workload,
        pause: Duration,
    ) -> Result<Self> {
        let tasks_addr = transport::resolve(master, R::TASKS, base_port).await?;
        let liveness_addr = transport::resolve(master, Channel::Liveness, base_port).await?;
        let results_addr = transport::resolve(master, R::RESULTS, base_port).await?;

        let tasks = Puller::connect(tasks_addr).await?;
        let mut liveness = Pusher::connect(liveness_addr).await?;
        let results = Pusher::connect(results_addr).await?;
        liveness.send_frame(Bytes::new()).await?;
        info!(role = R::NAME, %master, base_port, "worker up");
        Ok(Self {
            tasks,
            results,
            workload,
            pause,
            completed: 0,
            _role: PhantomData,
        })
    }

    /// Number of tasks this worker has pushed results for.
    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn process(&self, task: &R::Task) -> anyhow::Result<R::Output> {
        R::process(&self.workload, task)
    }

    /// Pull one task, process it and push the result.
    ///
    /// A malformed task or a failing workload is logged and nothing is pushed;
    /// only transport failures are returned.
    pub async fn step(&mut self) -> Result<()> {
        let task = match self.tasks.recv::<R::Task>().await.and_then(|t| {
            R::check(&t)?;
            Ok(t)
        }) {
            Ok(task) => task,
            Err(Error::Validation(msg)) => {
                warn!(role = R::NAME, "dropping malformed task: {msg}");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        match self.process(&task) {
            Ok(output) => {
                self.results.send(&output).await?;
                self.completed += 1;
                info!(role = R::NAME, completed = self.completed, "task done");
            }
            Err(e) => error!(role = R::NAME, "workload failed, nothing pushed: {e:#}"),
        }
        Ok(())
    }

    /// Serve tasks until the connection to the master fails.
    pub async fn run(mut self) -> Result<()> {
        loop {
            self.step().await?;
            tokio::time::sleep(self.pause).await;
        }
    }
}
