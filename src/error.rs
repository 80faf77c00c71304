//! Error taxonomy for the master, the barrier and the workers.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// Binding or connecting an endpoint failed. Always fatal.
    #[error("transport failure on {addr}: {source}")]
    Transport {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Local I/O failed (input file, metrics log).
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// An artifact could not be written, read or deleted.
    #[error("artifact `{name}`: {source}")]
    Artifact {
        name: String,
        #[source]
        source: BoxError,
    },

    /// Encoding or decoding a frame or an artifact failed.
    #[error("could not {what}: {source}")]
    Codec {
        what: String,
        #[source]
        source: BoxError,
    },

    /// A queue was closed underneath a sender or receiver.
    #[error("channel closed: {0}")]
    Disconnected(String),

    /// A message, artifact or configuration value had an unexpected shape.
    #[error("validation failed: {0}")]
    Validation(String),
}

impl Error {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    pub fn artifact(name: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Artifact {
            name: name.into(),
            source: source.into(),
        }
    }

    pub fn codec(what: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Codec {
            what: what.into(),
            source: source.into(),
        }
    }

    /// Whether an endpoint could not be bound or connected, which aborts the
    /// whole process rather than the current iteration.
    pub fn is_fatal_transport(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn only_endpoint_failures_are_fatal() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5556);
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(Error::Transport { addr, source: refused }.is_fatal_transport());

        let closed = Error::Disconnected("map results inbox".into());
        assert!(!closed.is_fatal_transport());
        assert!(!Error::Validation("bad port".into()).is_fatal_transport());
        let missing = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(!Error::io("read input", missing).is_fatal_transport());
    }
}
