//! Command-line arguments of the binaries.

pub mod master;
pub mod worker;
