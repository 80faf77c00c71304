//! Counting rendezvous between the master and its workers.
//!
//! A [`Barrier`] takes ownership of one [`Inbox`], counts qualifying frames
//! until it has seen exactly the expected number, performs a kind-specific
//! side effect per frame and then releases its [`BarrierHandle`] once.
//!
//! The barrier counts messages, not senders: a worker that pushes twice is
//! counted twice and no identity is checked. There is no timeout either; a
//! missing arrival keeps the barrier waiting forever.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{Error, Result};
use crate::store::{self, ArtifactStore};
use crate::transport::{Channel, Inbox};
use crate::{IntermediateRecord, ReduceResult};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BarrierKind {
    /// Workers announcing themselves. Payload is ignored.
    Liveness,
    /// One record sequence per map worker, persisted as a map artifact.
    MapResults,
    /// One result sequence per reduce worker, persisted as a reduce artifact.
    ReduceResults,
}

impl BarrierKind {
    /// The channel this kind of barrier listens on.
    pub fn channel(self) -> Channel {
        match self {
            BarrierKind::Liveness => Channel::Liveness,
            BarrierKind::MapResults => Channel::MapResults,
            BarrierKind::ReduceResults => Channel::ReduceResults,
        }
    }
}

impl fmt::Display for BarrierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BarrierKind::Liveness => "workers_up",
            BarrierKind::MapResults => "map_results",
            BarrierKind::ReduceResults => "reduce_results",
        };
        f.write_str(name)
    }
}

/// What a barrier saw before it released.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BarrierReport {
    pub kind: BarrierKind,
    pub expected: usize,
    pub received: usize,
    /// Frames that failed validation and were not counted.
    pub rejected: usize,
}

pub struct Barrier {
    kind: BarrierKind,
    expected: usize,
    received: usize,
    rejected: usize,
    store: Arc<dyn ArtifactStore>,
}

/// A released barrier hands its inbox back for the next phase.
pub struct Released {
    pub inbox: Inbox,
    pub report: BarrierReport,
}

/// A barrier that stopped before releasing. The inbox comes back unless the
/// barrier task itself was lost.
pub struct Failed {
    pub inbox: Option<Inbox>,
    pub error: Error,
}

impl fmt::Debug for Failed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failed")
            .field("inbox_returned", &self.inbox.is_some())
            .field("error", &self.error)
            .finish()
    }
}

/// The completion side of an armed barrier. Dropping it cancels the barrier.
pub struct BarrierHandle {
    kind: BarrierKind,
    cancel: oneshot::Sender<()>,
    done: oneshot::Receiver<(Inbox, Result<BarrierReport>)>,
}

impl Barrier {
    pub fn new(kind: BarrierKind, expected: usize, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            kind,
            expected,
            received: 0,
            rejected: 0,
            store,
        }
    }

    /// Start counting on `inbox` in its own task.
    ///
    /// Must be called before any task of the phase is sent. Frames that
    /// reached the inbox earlier are buffered and counted too.
    pub fn arm(self, mut inbox: Inbox) -> BarrierHandle {
        let kind = self.kind;
        let (done_tx, done) = oneshot::channel();
        let (cancel, cancelled) = oneshot::channel::<()>();
        info!(barrier = %kind, expected = self.expected, "barrier armed");
        tokio::spawn(async move {
            let result = tokio::select! {
                result = self.run(&mut inbox) => result,
                _ = cancelled => Err(Error::Disconnected(format!("{kind} barrier cancelled"))),
            };
            let _ = done_tx.send((inbox, result));
        });
        BarrierHandle { kind, cancel, done }
    }

    async fn run(mut self, inbox: &mut Inbox) -> Result<BarrierReport> {
        while self.received < self.expected {
            let frame = inbox.recv().await?;
            match self.on_arrival(frame).await {
                Ok(()) => {
                    self.received += 1;
                    debug!(
                        barrier = %self.kind,
                        received = self.received,
                        expected = self.expected,
                        "arrival"
                    );
                }
                Err(Error::Validation(msg)) => {
                    self.rejected += 1;
                    warn!(barrier = %self.kind, "rejected arrival: {msg}");
                }
                Err(e) => return Err(e),
            }
        }
        info!(barrier = %self.kind, received = self.received, "barrier released");
        Ok(BarrierReport {
            kind: self.kind,
            expected: self.expected,
            received: self.received,
            rejected: self.rejected,
        })
    }

    async fn on_arrival(&self, frame: Bytes) -> Result<()> {
        match self.kind {
            BarrierKind::Liveness => Ok(()),
            BarrierKind::MapResults => {
                let records: Vec<IntermediateRecord> = codec::from_json(&frame)?;
                self.store
                    .put(
                        &store::map_artifact(self.received),
                        codec::encode_records(&records)?,
                    )
                    .await
            }
            BarrierKind::ReduceResults => {
                let results: Vec<ReduceResult> = codec::from_json(&frame)?;
                self.store
                    .put(
                        &store::reduce_artifact(self.received),
                        codec::encode_results(&results)?,
                    )
                    .await
            }
        }
    }
}

impl BarrierHandle {
    pub fn kind(&self) -> BarrierKind {
        self.kind
    }

    /// Suspend until the barrier has released (or failed).
    pub async fn wait(self) -> std::result::Result<Released, Failed> {
        match self.done.await {
            Ok((inbox, Ok(report))) => Ok(Released { inbox, report }),
            Ok((inbox, Err(error))) => Err(Failed {
                inbox: Some(inbox),
                error,
            }),
            Err(_) => Err(Failed {
                inbox: None,
                error: Error::Disconnected(format!("{} barrier task", self.kind)),
            }),
        }
    }

    /// Stop counting and take the inbox back. Frames not yet counted stay
    /// buffered in it.
    pub async fn cancel(self) -> Option<Inbox> {
        let _ = self.cancel.send(());
        self.done.await.ok().map(|(inbox, _)| inbox)
    }
}
