use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::job::DEFAULT_BASE_PORT;

#[derive(Parser, Debug)]
#[command(version, about = "Run a map or reduce worker", long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub role: RoleArg,

    /// Connect to a master at the given host (IP address or name)
    #[clap(short = 'J', long, default_value = "127.0.0.1", global = true)]
    pub join: String,

    /// Base port of the master
    #[clap(short, long, default_value_t = DEFAULT_BASE_PORT, global = true)]
    pub port: u16,

    /// Name of the workload
    #[clap(short, long, default_value = "wc", global = true)]
    pub workload: String,

    /// Pause after each task, in milliseconds
    #[clap(long, default_value_t = 5000, global = true)]
    pub pause_ms: u64,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleArg {
    /// Process map tasks
    Map,
    /// Process reduce shards
    Reduce,
}

impl Args {
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_role_and_endpoint() {
        let args = Args::parse_from(["mrb-worker", "reduce", "-J", "master", "-p", "7000"]);
        assert_eq!(args.role, RoleArg::Reduce);
        assert_eq!(args.join, "master");
        assert_eq!(args.port, 7000);
        assert_eq!(args.workload, "wc");
        assert_eq!(args.pause(), Duration::from_secs(5));
    }
}
