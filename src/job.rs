//! The job configuration shared by the master's phases.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::Channel;

pub const DEFAULT_BASE_PORT: u16 = 5556;
pub const DEFAULT_PAUSE: Duration = Duration::from_secs(5);

/// Configuration of one master process. Built once, validated, never mutated.
#[derive(Clone, Debug)]
pub struct Job {
    /// Number of map workers (M).
    pub n_map: usize,
    /// Number of reduce workers (R).
    pub n_reduce: usize,
    pub iters: usize,
    /// Address the five endpoints bind on.
    pub host: IpAddr,
    pub base_port: u16,
    pub datafile: PathBuf,
    pub metricsfile: PathBuf,
    /// Name of the per-iteration result artifact.
    pub output: String,
    /// Idle time between two iterations.
    pub pause: Duration,
}

impl Job {
    pub fn new(datafile: impl Into<PathBuf>, n_map: usize, n_reduce: usize) -> Self {
        Self {
            n_map,
            n_reduce,
            iters: 1,
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            base_port: DEFAULT_BASE_PORT,
            datafile: datafile.into(),
            metricsfile: PathBuf::from("metrics.csv"),
            output: "results.csv".to_string(),
            pause: DEFAULT_PAUSE,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_map == 0 {
            return Err(Error::Validation("number of map workers must be positive".into()));
        }
        if self.n_reduce == 0 {
            return Err(Error::Validation(
                "number of reduce workers must be positive".into(),
            ));
        }
        if self.iters == 0 {
            return Err(Error::Validation("iteration count must be positive".into()));
        }
        if self.base_port.checked_add(Channel::MAX_OFFSET).is_none() {
            return Err(Error::Validation(format!(
                "base port {} leaves no room for {} channel offsets",
                self.base_port,
                Channel::ALL.len()
            )));
        }
        if self.output.is_empty() {
            return Err(Error::Validation("result artifact name is empty".into()));
        }
        Ok(())
    }

    /// Workers that must announce themselves before the first iteration.
    pub fn n_workers(&self) -> usize {
        self.n_map + self.n_reduce
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_worker_pools() {
        assert!(Job::new("in.txt", 0, 1).validate().is_err());
        assert!(Job::new("in.txt", 1, 0).validate().is_err());
        assert!(Job::new("in.txt", 1, 1).validate().is_ok());
    }

    #[test]
    fn rejects_port_overflow() {
        let mut job = Job::new("in.txt", 2, 2);
        job.base_port = u16::MAX - 2;
        assert!(matches!(job.validate(), Err(Error::Validation(_))));
        job.base_port = u16::MAX - 4;
        assert!(job.validate().is_ok());
    }
}
