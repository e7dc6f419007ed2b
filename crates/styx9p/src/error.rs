//! Error taxonomy for the client.
//!
//! Mirrors the shape of a hand-rolled `Error` enum rather than reaching for
//! `thiserror`/`anyhow`: a plain enum, a `Display` impl, and a couple of
//! macros at the call sites that produce it most often.

use std::fmt;
use std::io;

/// Everything that can go wrong talking to a 9P server.
#[derive(Debug)]
pub enum Error {
    /// The server replied with `Rerror`.
    ServerError(String),
    /// A frame failed to decode: bad length, truncated field, unknown type octet.
    MalformedFrame(String),
    /// `Rversion` did not agree with what was sent, or returned `VERSION_UNKNOWN`.
    ProtocolMismatch(String),
    /// `Twrite` was accepted but the server wrote fewer bytes than requested.
    ShortWrite { requested: u32, written: u32 },
    /// All 65535 usable tags are in flight.
    TagsExhausted,
    /// All fids are in use.
    FidsExhausted,
    /// The handle's fid was already clunked.
    HandleClosed,
    /// Not implemented by this client (e.g. seek-from-end).
    Unsupported(String),
    /// The connection's receiver loop terminated; `cause` is why.
    ConnectionClosed { cause: String },
    /// Transport-level I/O failure.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ServerError(msg) => write!(f, "server error: {}", msg),
            Error::MalformedFrame(msg) => write!(f, "malformed frame: {}", msg),
            Error::ProtocolMismatch(msg) => write!(f, "protocol mismatch: {}", msg),
            Error::ShortWrite { requested, written } => write!(
                f,
                "short write: requested {} bytes, server wrote {}",
                requested, written
            ),
            Error::TagsExhausted => write!(f, "no tags available"),
            Error::FidsExhausted => write!(f, "no fids available"),
            Error::HandleClosed => write!(f, "handle already closed"),
            Error::Unsupported(what) => write!(f, "unsupported: {}", what),
            Error::ConnectionClosed { cause } => write!(f, "connection closed: {}", cause),
            Error::Io(e) => write!(f, "i/o error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

/// Build an `Error::MalformedFrame` from a format string.
macro_rules! malformed {
    ($($arg:tt)*) => {
        $crate::error::Error::MalformedFrame(format!($($arg)*))
    };
}

pub(crate) use malformed;
