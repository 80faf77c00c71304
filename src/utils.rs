//! Utility functions shared by the binaries and the library.
//!

use bytes::Bytes;
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Read an entire [`Bytes`] slice into a [`String`].
///
/// Returns a validation error if the slice contains invalid UTF-8.
pub fn string_from_bytes(buf: Bytes) -> Result<String> {
    String::from_utf8(buf.to_vec()).map_err(|e| Error::Validation(format!("invalid UTF-8: {e}")))
}

/// Install the global `tracing` subscriber. The filter comes from
/// `RUST_LOG` and defaults to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
