//! A client library for the 9P2000/Styx distributed-file-service protocol.
//!
//! 9P is the file-protocol Plan 9 and its descendants speak for nearly
//! everything: local disks, remote file trees, and synthetic services alike
//! are all just a tree of files reachable by `walk`ing a name apart one
//! component at a time. This crate speaks the 9P2000 dialect — no `.L` or
//! `.u` extensions, no authentication exchange — against any server that
//! does the same.
//!
//! # Example
//!
//! ```no_run
//! use styx9p::{ClientConfig, OpenMode, Session};
//!
//! # async fn run() -> styx9p::Result<()> {
//! let session = Session::connect("tcp!fileserver!564", "glenda", ClientConfig::default()).await?;
//! let session = std::sync::Arc::new(session);
//!
//! let handle = session.clone().open("usr/glenda/notes.txt", OpenMode::READ).await?;
//! let contents = handle.read(-1).await?;
//! handle.close().await?;
//!
//! session.disconnect().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Protocol
//!
//! A session starts with version negotiation (`Tversion`/`Rversion`, fixed
//! to tag [`NOTAG`]), then an attach (`Tattach`/`Rattach`) that binds a fid
//! to the tree's root. From there, every other fid is reached by walking
//! (`Twalk`/`Rwalk`) from an already-bound fid — usually the root — one path
//! component at a time; a partial walk leaves the destination fid unbound.
//! `Topen`/`Tcreate` turn a walked fid into a readable/writable one and hand
//! back an `iounit` capping how much a single `Tread`/`Twrite` may move; this
//! crate respects that cap (and `msize`'s own overhead-adjusted cap) by
//! chunking transparently in [`Handle::read`]/[`Handle::write`].
//!
//! # Concurrency
//!
//! Every in-flight request owns a distinct tag (see [`tagpool`]) and a
//! one-shot reply slot; many callers may share one [`Session`] and issue
//! requests concurrently without stepping on each other. Writes to the wire
//! are serialized independently of tag/fid bookkeeping.
//!
//! # Errors
//!
//! Server-side failures surface as [`Error::ServerError`] carrying the
//! `Rerror` text verbatim. Protocol and transport problems (malformed
//! frames, version mismatches, exhausted tags or fids, a dead connection)
//! get their own variants; see [`Error`].
#![forbid(unsafe_code)]

pub mod error;
pub mod fcall;
pub mod fidpool;
pub mod handle;
pub mod receiver;
pub mod serialize;
pub mod session;
pub mod tagpool;
pub mod transport;
pub mod utils;

pub use crate::error::Error;
pub use crate::fcall::{
    FCall, Msg, MsgType, OpenMode, Perm, Qid, QidType, Stat, DEFAULT_DIR_PERM, DEFAULT_FILE_PERM,
    DEFAULT_MSIZE, NOFID, NOTAG, P92000,
};
pub use crate::handle::{Handle, Whence};
pub use crate::session::{ClientConfig, Session, State};
pub use crate::transport::TlsRoots;
pub use crate::utils::Result;
