//! A barrier-synchronized MapReduce (lite) system.
//!
//! A single master pushes self-contained map tasks to a pool of stateless
//! workers over one-directional message queues, waits on a counting barrier
//! until every result has arrived, shuffles the intermediate records into
//! sorted contiguous shards and repeats the exchange for the reduce phase.
//! Workers share no storage with the master: every byte they work on travels
//! inside the task message.

use serde::{Deserialize, Serialize};

pub mod barrier;
pub mod cmd;
pub mod codec;
pub mod distributor;
pub mod error;
pub mod job;
pub mod master;
pub mod metrics;
pub mod shuffle;
pub mod standalone;
pub mod store;
pub mod transport;
pub mod utils;
pub mod worker;
pub mod workload;

pub use error::{Error, Result};
pub use job::Job;

/////////////////////////////////////////////////////////////////////////////
// MapReduce application types
/////////////////////////////////////////////////////////////////////////////

/// The output of an application map function: every intermediate record
/// produced from one chunk of input, in emission order.
pub type MapOutput = anyhow::Result<Vec<IntermediateRecord>>;

/// A map function takes the textual content of one map task.
pub type MapFn = fn(content: &str) -> MapOutput;

/// A reduce function takes in a key and an iterator over every value
/// collected for that key. It returns the aggregated value.
///
/// The aggregation must be commutative and associative: the master
/// pre-aggregates each map worker's output before the reduce phase.
pub type ReduceFn =
    fn(key: &str, values: Box<dyn Iterator<Item = u64> + '_>) -> anyhow::Result<u64>;

/// A map reduce application.
#[derive(Copy, Clone)]
pub struct Workload {
    pub map_fn: MapFn,
    pub reduce_fn: ReduceFn,
}

/////////////////////////////////////////////////////////////////////////////
// Messages and records
/////////////////////////////////////////////////////////////////////////////

/// One unit of map work. The content is embedded so that workers never need
/// access to the master's filesystem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapTask {
    /// Index of the task within its iteration, in `[0, M)`.
    pub id: usize,
    /// Byte offset of `content` within the input file.
    pub offset: u64,
    /// Length of `content` in bytes.
    pub length: u64,
    pub content: String,
}

/// A key-value pair emitted by a map worker.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntermediateRecord {
    pub key: String,
    pub value: u64,
}

impl IntermediateRecord {
    pub fn new(key: impl Into<String>, value: u64) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// A key with every partial value contributed for it by the map workers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShuffleGroup {
    pub key: String,
    pub values: Vec<u64>,
}

/// A contiguous, key-sorted slice of shuffle groups destined for one reduce
/// worker.
pub type ReduceShard = Vec<ShuffleGroup>;

/// The aggregated value for one key, produced by a reduce worker.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReduceResult {
    pub key: String,
    pub value: u64,
}

impl ReduceResult {
    pub fn new(key: impl Into<String>, value: u64) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}
