//! Converts MapReduce application names to actual application code.
//!
//! # Example
//!
//! ```
//! # use anyhow::Result;
//! use mrbarrier::workload;
//! # fn main() -> Result<()> {
//! let wc = workload::named("wc")?;
//! let records = (wc.map_fn)("the cat")?;
//! assert_eq!(records.len(), 2);
//! # Ok(())
//! # }
//! ```

use crate::Workload;
use anyhow::{bail, Result};

pub mod wc;

/// Gets the [`Workload`] named `name`.
///
/// Returns [`None`] if no application with the given name was found.
pub fn try_named(name: &str) -> Option<Workload> {
    match name {
        "wc" => Some(Workload {
            map_fn: wc::map,
            reduce_fn: wc::reduce,
        }),
        "wc-ci" => Some(Workload {
            map_fn: wc::map_folded,
            reduce_fn: wc::reduce,
        }),
        _ => None,
    }
}

/// Gets the [`Workload`] named `name`.
///
/// Returns an [`anyhow::Error`] if no application with the given name was found.
pub fn named(name: &str) -> Result<Workload> {
    match try_named(name) {
        Some(app) => Ok(app),
        None => bail!("No app named `{}` found.", name),
    }
}
