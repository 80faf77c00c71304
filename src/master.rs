//! The master: owns every endpoint and drives each iteration through its
//! phases.
//!
//! ```text
//! Init -> ArmMapBarrier -> DistributeMapTasks -> AwaitMapBarrier -> Shuffle
//!      -> ArmReduceBarrier -> DistributeReduceTasks -> AwaitReduceBarrier
//!      -> Finalize -> Reset -> Idle
//! ```
//!
//! A phase's barrier is always armed before the first task of that phase is
//! sent, and the master only ever suspends while waiting on a barrier.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use tracing::{debug, info, warn};

use crate::barrier::{Barrier, BarrierHandle, BarrierKind, BarrierReport, Failed, Released};
use crate::distributor;
use crate::error::{Error, Result};
use crate::metrics::{IterationMetrics, MetricsLog};
use crate::shuffle;
use crate::store::{self, ArtifactStore};
use crate::transport::{Channel, Inbox, Outbox};
use crate::{Job, ShuffleGroup};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Init,
    ArmMapBarrier,
    DistributeMapTasks,
    AwaitMapBarrier,
    Shuffle,
    ArmReduceBarrier,
    DistributeReduceTasks,
    AwaitReduceBarrier,
    Finalize,
    Reset,
    /// Between iterations.
    Idle,
    /// All configured iterations have run.
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Aggregate state of the current iteration. Built fresh for every iteration.
#[derive(Debug, Default)]
pub struct IterationState {
    /// Every distinct key of the iteration with its partial sums, sorted.
    pub groups: Vec<ShuffleGroup>,
    /// Number of groups handed to each reduce worker.
    pub shard_sizes: Vec<usize>,
}

impl IterationState {
    pub fn unique_keys(&self) -> usize {
        self.groups.len()
    }
}

struct Endpoints {
    map_tasks: Outbox,
    reduce_tasks: Outbox,
    // Each inbox is lent to a barrier while one is armed on it.
    liveness: Option<Inbox>,
    map_results: Option<Inbox>,
    reduce_results: Option<Inbox>,
}

impl Endpoints {
    async fn bind(job: &Job) -> Result<Self> {
        let addr = |channel: Channel| channel.addr(job.host, job.base_port);
        Ok(Self {
            map_tasks: Outbox::bind(addr(Channel::MapTasks)?).await?,
            reduce_tasks: Outbox::bind(addr(Channel::ReduceTasks)?).await?,
            liveness: Some(Inbox::bind(addr(Channel::Liveness)?).await?),
            map_results: Some(Inbox::bind(addr(Channel::MapResults)?).await?),
            reduce_results: Some(Inbox::bind(addr(Channel::ReduceResults)?).await?),
        })
    }

    fn inbox_slot(&mut self, kind: BarrierKind) -> &mut Option<Inbox> {
        match kind {
            BarrierKind::Liveness => &mut self.liveness,
            BarrierKind::MapResults => &mut self.map_results,
            BarrierKind::ReduceResults => &mut self.reduce_results,
        }
    }
}

pub struct Master {
    job: Job,
    store: Arc<dyn ArtifactStore>,
    endpoints: Endpoints,
    phase: Phase,
    state: IterationState,
    iteration: usize,
}

impl Master {
    /// Validate the job and bind all five endpoints. Any bind failure is a
    /// fatal [`Error::Transport`].
    pub async fn initialize(job: Job, store: Arc<dyn ArtifactStore>) -> Result<Self> {
        job.validate()?;
        info!(
            n_map = job.n_map,
            n_reduce = job.n_reduce,
            base_port = job.base_port,
            "initializing master"
        );
        let endpoints = Endpoints::bind(&job).await?;
        Ok(Self {
            job,
            store,
            endpoints,
            phase: Phase::Init,
            state: IterationState::default(),
            iteration: 0,
        })
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &IterationState {
        &self.state
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Address actually bound for `channel`.
    pub fn local_addr(&self, channel: Channel) -> Option<SocketAddr> {
        let e = &self.endpoints;
        match channel {
            Channel::MapTasks => Some(e.map_tasks.local_addr()),
            Channel::ReduceTasks => Some(e.reduce_tasks.local_addr()),
            Channel::Liveness => e.liveness.as_ref().and_then(Inbox::local_addr),
            Channel::MapResults => e.map_results.as_ref().and_then(Inbox::local_addr),
            Channel::ReduceResults => e.reduce_results.as_ref().and_then(Inbox::local_addr),
        }
    }

    fn enter(&mut self, phase: Phase) {
        debug!(iteration = self.iteration, from = %self.phase, to = %phase, "phase");
        self.phase = phase;
    }

    fn arm(&mut self, kind: BarrierKind, expected: usize) -> Result<BarrierHandle> {
        let inbox = self.endpoints.inbox_slot(kind).take().ok_or_else(|| {
            Error::Disconnected(format!(
                "{} inbox is held by an unfinished {kind} barrier",
                kind.channel()
            ))
        })?;
        Ok(Barrier::new(kind, expected, self.store.clone()).arm(inbox))
    }

    async fn release(&mut self, handle: BarrierHandle) -> Result<BarrierReport> {
        let kind = handle.kind();
        match handle.wait().await {
            Ok(Released { inbox, report }) => {
                *self.endpoints.inbox_slot(kind) = Some(inbox);
                Ok(report)
            }
            Err(Failed { inbox, error }) => {
                *self.endpoints.inbox_slot(kind) = inbox;
                Err(error)
            }
        }
    }

    /// Cancel an armed barrier whose phase failed before completing, and
    /// reclaim its inbox so a later iteration can arm it again.
    async fn abandon(&mut self, handle: BarrierHandle, error: Error) -> Error {
        let kind = handle.kind();
        warn!(barrier = %kind, "abandoning barrier: {error}");
        *self.endpoints.inbox_slot(kind) = handle.cancel().await;
        error
    }

    /// Block until all M + R workers have announced themselves.
    pub async fn await_workers(&mut self) -> Result<BarrierReport> {
        info!(expected = self.job.n_workers(), "waiting for workers");
        let handle = self.arm(BarrierKind::Liveness, self.job.n_workers())?;
        let report = self.release(handle).await?;
        info!("all map and reduce workers are up");
        Ok(report)
    }

    /// Run one full map, shuffle, reduce and finalize cycle.
    pub async fn run_iteration(&mut self) -> Result<IterationMetrics> {
        if self.phase == Phase::Stopped {
            return Err(Error::Validation("master has stopped".into()));
        }
        self.iteration += 1;
        self.state = IterationState::default();
        self.enter(Phase::Init);
        info!(iteration = self.iteration, "starting iteration");
        let mut metrics = IterationMetrics::default();

        let start = Instant::now();
        let tasks = distributor::plan_map_tasks(&self.job).await?;
        self.enter(Phase::ArmMapBarrier);
        let handle = self.arm(BarrierKind::MapResults, self.job.n_map)?;
        self.enter(Phase::DistributeMapTasks);
        if let Err(e) = distributor::distribute_map_tasks(&tasks, &self.endpoints.map_tasks) {
            return Err(self.abandon(handle, e).await);
        }
        self.enter(Phase::AwaitMapBarrier);
        self.release(handle).await?;
        metrics.map = start.elapsed();
        info!(seconds = metrics.map.as_secs_f64(), "map phase done");

        let start = Instant::now();
        self.enter(Phase::Shuffle);
        self.shuffle().await?;
        metrics.shuffle = start.elapsed();
        info!(
            seconds = metrics.shuffle.as_secs_f64(),
            unique_keys = self.state.unique_keys(),
            shards = ?self.state.shard_sizes,
            "shuffle phase done"
        );

        let start = Instant::now();
        self.enter(Phase::ArmReduceBarrier);
        let handle = self.arm(BarrierKind::ReduceResults, self.job.n_reduce)?;
        self.enter(Phase::DistributeReduceTasks);
        if let Err(e) = distributor::distribute_reduce_tasks(
            self.store.as_ref(),
            &self.endpoints.reduce_tasks,
            self.job.n_reduce,
        )
        .await
        {
            return Err(self.abandon(handle, e).await);
        }
        self.enter(Phase::AwaitReduceBarrier);
        self.release(handle).await?;
        metrics.reduce = start.elapsed();
        info!(seconds = metrics.reduce.as_secs_f64(), "reduce phase done");

        let start = Instant::now();
        self.enter(Phase::Finalize);
        self.finalize().await?;
        metrics.finalize = start.elapsed();
        info!(
            seconds = metrics.finalize.as_secs_f64(),
            total = metrics.total().as_secs_f64(),
            "finalize phase done"
        );
        Ok(metrics)
    }

    async fn shuffle(&mut self) -> Result<()> {
        let partials = shuffle::collect_partials(self.store.as_ref(), self.job.n_map).await?;
        self.state.groups = shuffle::merge(partials);
        let shards = shuffle::partition(&self.state.groups, self.job.n_reduce);
        self.state.shard_sizes = shards.iter().map(Vec::len).collect();
        shuffle::persist_shards(self.store.as_ref(), &shards).await
    }

    /// Concatenate the reduce artifacts in worker-index order into the result
    /// artifact and drop everything scoped to the iteration.
    async fn finalize(&mut self) -> Result<()> {
        let mut result = BytesMut::new();
        for i in 0..self.job.n_reduce {
            let part = self.store.take(&store::reduce_artifact(i)).await?;
            result.extend_from_slice(&part);
        }
        self.store.put(&self.job.output, result.freeze()).await?;
        for i in 0..self.job.n_reduce {
            self.store.delete(&store::shuffle_artifact(i)).await?;
        }
        for i in 0..self.job.n_map {
            self.store.delete(&store::map_artifact(i)).await?;
        }
        Ok(())
    }

    /// Clear the per-iteration aggregate state.
    pub fn reset(&mut self) {
        self.enter(Phase::Reset);
        self.state = IterationState::default();
        self.enter(Phase::Idle);
    }

    /// Wait for the workers, then run every configured iteration, appending
    /// one metrics row per iteration.
    pub async fn solve(&mut self) -> Result<Vec<IterationMetrics>> {
        self.await_workers().await?;
        let mut log = MetricsLog::open(&self.job.metricsfile).await?;
        let mut all = Vec::with_capacity(self.job.iters);
        for i in 0..self.job.iters {
            let metrics = self.run_iteration().await?;
            log.append(&metrics).await?;
            all.push(metrics);
            self.reset();
            if i + 1 < self.job.iters {
                tokio::time::sleep(self.job.pause).await;
            }
        }
        self.enter(Phase::Stopped);
        info!(iterations = all.len(), "master stopped");
        Ok(all)
    }
}
