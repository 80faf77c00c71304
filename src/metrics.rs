//! Per-iteration phase timings and the append-only metrics log.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use csv::WriterBuilder;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::codec;
use crate::error::{Error, Result};

/// Column names of the metrics log.
pub const HEADER: [&str; 5] = ["map", "shuffle", "reduce", "finalize", "total"];

fn csv_line<I, T>(fields: I) -> Result<Bytes>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer
        .write_record(fields)
        .map_err(|e| Error::codec("write metrics row", e))?;
    codec::finish_csv(writer)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IterationMetrics {
    pub map: Duration,
    pub shuffle: Duration,
    pub reduce: Duration,
    pub finalize: Duration,
}

impl IterationMetrics {
    pub fn total(&self) -> Duration {
        self.map + self.shuffle + self.reduce + self.finalize
    }

    /// One CSV row, durations in seconds.
    pub fn row(&self) -> Result<Bytes> {
        let seconds = [
            self.map,
            self.shuffle,
            self.reduce,
            self.finalize,
            self.total(),
        ];
        csv_line(seconds.iter().map(|d| format!("{:.6}", d.as_secs_f64())))
    }
}

/// Metrics file opened for appending. The header is written only when the
/// file starts out empty.
pub struct MetricsLog {
    path: PathBuf,
    file: File,
}

impl MetricsLog {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let context = || format!("open metrics log {}", path.display());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| Error::io(context(), e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| Error::io(context(), e))?
            .len();
        if len == 0 {
            file.write_all(&csv_line(HEADER)?)
                .await
                .map_err(|e| Error::io(context(), e))?;
            file.flush().await.map_err(|e| Error::io(context(), e))?;
        }
        Ok(Self { path, file })
    }

    pub async fn append(&mut self, metrics: &IterationMetrics) -> Result<()> {
        let context = || format!("append to metrics log {}", self.path.display());
        self.file
            .write_all(&metrics.row()?)
            .await
            .map_err(|e| Error::io(context(), e))?;
        self.file.flush().await.map_err(|e| Error::io(context(), e))
    }
}
