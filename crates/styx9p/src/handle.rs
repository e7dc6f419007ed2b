//! File-like read/write/seek/stat access to a walked, opened fid.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::Error;
use crate::fcall::{FCall, OpenMode, Perm, Stat, DEFAULT_DIR_PERM, DEFAULT_FILE_PERM, IOHDRSZ};
use crate::session::Session;
use crate::utils::Result;

/// Whence values for [`Handle::seek`], matching `lseek(2)`'s `SEEK_SET`/`SEEK_CUR`.
/// `SEEK_END` (2) is not supported: 9P has no length-independent way to
/// discover a remote file's size short of a `Tstat`, which this client does
/// not perform implicitly on every seek.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
}

/// A walked and opened fid, offering `read`/`write`/`seek`/`stat`/`close`.
///
/// Holds only a weak reference to its [`Session`]: a `Handle` never keeps a
/// session alive by itself, so dropping (or explicitly disconnecting) the
/// `Session` while handles are still outstanding promptly surfaces
/// `Error::ConnectionClosed` on their next operation instead of silently
/// extending the connection's lifetime.
pub struct Handle {
    session: Weak<Session>,
    fid: u32,
    iounit: u32,
    offset: Mutex<u64>,
    closed: AtomicBool,
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .map(String::from)
        .collect()
}

fn effective_iounit(server_iounit: u32, msize: u32) -> u32 {
    let cap = msize.saturating_sub(IOHDRSZ);
    if server_iounit == 0 || server_iounit > cap {
        cap
    } else {
        server_iounit
    }
}

impl Handle {
    /// Walk from the session's root fid to `path` and open it.
    pub async fn open(session: &Arc<Session>, path: &str, mode: OpenMode) -> Result<Handle> {
        let fid = walk(session, path).await?;
        match session.rpc(FCall::TOpen { fid, mode: mode.bits() }).await {
            Ok(FCall::ROpen { qid: _, iounit }) => Ok(Handle {
                session: Arc::downgrade(session),
                fid,
                iounit: effective_iounit(iounit, session.msize()),
                offset: Mutex::new(0),
                closed: AtomicBool::new(false),
            }),
            Ok(other) => {
                clunk_best_effort(session, fid).await;
                Err(Error::ServerError(format!("unexpected reply to Topen: {:?}", other)))
            }
            Err(e) => {
                clunk_best_effort(session, fid).await;
                Err(e)
            }
        }
    }

    /// Walk to `path`'s parent, `Tcreate` `name` there, leaving the new fid open.
    pub async fn create(
        session: &Arc<Session>,
        parent_path: &str,
        name: &str,
        perm: Perm,
        mode: OpenMode,
    ) -> Result<Handle> {
        let fid = walk(session, parent_path).await?;
        // perm only ever carries the DIR/APPEND/EXCL flags; the 9p mode bits
        // (owner/group/other rwx) are never caller-supplied, so fill in the
        // same defaults the reference client's server side assumes: 0o755
        // for a new directory, 0o644 otherwise.
        let default_bits = if perm.contains(Perm::DIR) {
            DEFAULT_DIR_PERM
        } else {
            DEFAULT_FILE_PERM
        };
        let wire_perm = perm.bits() | default_bits;
        match session
            .rpc(FCall::TCreate {
                fid,
                name: name.to_string(),
                perm: wire_perm,
                mode: mode.bits(),
            })
            .await
        {
            Ok(FCall::RCreate { qid: _, iounit }) => Ok(Handle {
                session: Arc::downgrade(session),
                fid,
                iounit: effective_iounit(iounit, session.msize()),
                offset: Mutex::new(0),
                closed: AtomicBool::new(false),
            }),
            Ok(other) => {
                clunk_best_effort(session, fid).await;
                Err(Error::ServerError(format!("unexpected reply to Tcreate: {:?}", other)))
            }
            Err(e) => {
                clunk_best_effort(session, fid).await;
                Err(e)
            }
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::HandleClosed)
        } else {
            Ok(())
        }
    }

    /// Upgrade the weak session reference, failing the way any other op
    /// would if the session had merely dropped its connection underneath us.
    fn session(&self) -> Result<Arc<Session>> {
        self.session.upgrade().ok_or_else(|| Error::ConnectionClosed {
            cause: "session dropped".into(),
        })
    }

    /// Read from the current offset. `size < 0` reads until end of file;
    /// otherwise up to `size` bytes are returned, possibly fewer if the
    /// server reports end of file first.
    pub async fn read(&self, size: i64) -> Result<Vec<u8>> {
        self.check_open()?;
        let mut out = Vec::new();
        let mut remaining: Option<u64> = if size < 0 { None } else { Some(size as u64) };

        loop {
            if let Some(0) = remaining {
                break;
            }
            let want = remaining
                .map(|r| r.min(self.iounit as u64) as u32)
                .unwrap_or(self.iounit);

            let offset = *self.offset.lock().unwrap();
            let reply = self
                .session()?
                .rpc(FCall::TRead {
                    fid: self.fid,
                    offset,
                    count: want,
                })
                .await?;

            let data = match reply {
                FCall::RRead { data } => data,
                other => {
                    return Err(Error::ServerError(format!("unexpected reply to Tread: {:?}", other)))
                }
            };

            let got = data.len() as u64;
            *self.offset.lock().unwrap() += got;
            out.extend_from_slice(&data);

            if let Some(r) = remaining.as_mut() {
                *r -= got.min(*r);
            }
            // Only a true zero-length reply means EOF; a short-but-nonzero
            // reply is not a terminator on its own (scenario S2: a 5-byte
            // file read with a larger iounit returns 5 bytes, then a second
            // Tread at offset 5 returns 0 before the loop is done).
            if got == 0 {
                break;
            }
        }
        Ok(out)
    }

    /// Write `data` starting at the current offset, chunked to the
    /// negotiated iounit. A short write from the server is not retried: it
    /// is reported as [`Error::ShortWrite`] and the offset reflects only the
    /// bytes actually written.
    pub async fn write(&self, data: &[u8]) -> Result<u32> {
        self.check_open()?;
        let mut written = 0u32;
        for chunk in data.chunks(self.iounit.max(1) as usize) {
            let offset = *self.offset.lock().unwrap();
            let reply = self
                .session()?
                .rpc(FCall::TWrite {
                    fid: self.fid,
                    offset,
                    data: chunk.to_vec(),
                })
                .await?;

            let count = match reply {
                FCall::RWrite { count } => count,
                other => {
                    return Err(Error::ServerError(format!("unexpected reply to Twrite: {:?}", other)))
                }
            };

            *self.offset.lock().unwrap() += count as u64;
            written += count;
            if (count as usize) < chunk.len() {
                return Err(Error::ShortWrite {
                    requested: chunk.len() as u32,
                    written: count,
                });
            }
        }
        Ok(written)
    }

    /// Reposition the handle's offset. `Whence::Start` takes an absolute,
    /// non-negative offset; `Whence::Current` is relative and clamps at
    /// zero rather than going negative.
    pub fn seek(&self, offset: i64, whence: Whence) -> Result<u64> {
        self.check_open()?;
        let mut cur = self.offset.lock().unwrap();
        let next = match whence {
            Whence::Start => {
                if offset < 0 {
                    return Err(Error::MalformedFrame("negative absolute seek offset".into()));
                }
                offset as u64
            }
            Whence::Current => {
                let base = *cur as i64;
                (base + offset).max(0) as u64
            }
        };
        *cur = next;
        Ok(next)
    }

    /// The current offset.
    pub fn tell(&self) -> u64 {
        *self.offset.lock().unwrap()
    }

    /// Fetch the file's `Stat` record.
    pub async fn stat(&self) -> Result<Stat> {
        self.check_open()?;
        match self.session()?.rpc(FCall::TStat { fid: self.fid }).await? {
            FCall::RStat { stat } => Ok(stat),
            other => Err(Error::ServerError(format!("unexpected reply to Tstat: {:?}", other))),
        }
    }

    /// Clunk the fid. Idempotent only in the sense that calling it twice
    /// returns `Error::HandleClosed` the second time rather than clunking
    /// an already-released fid.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::HandleClosed);
        }
        match self.session()?.rpc(FCall::TClunk { fid: self.fid }).await? {
            FCall::RClunk => Ok(()),
            other => Err(Error::ServerError(format!("unexpected reply to Tclunk: {:?}", other))),
        }
    }
}

async fn walk(session: &Arc<Session>, path: &str) -> Result<u32> {
    let newfid = session.alloc_fid()?;
    let wname = split_path(path);
    let expected = wname.len();

    let reply = session
        .rpc(FCall::TWalk {
            fid: session.root_fid(),
            newfid,
            wname,
        })
        .await;

    match reply {
        Ok(FCall::RWalk { wqid }) if wqid.len() == expected => Ok(newfid),
        Ok(FCall::RWalk { wqid }) => {
            let got = wqid.len();
            // A zero-element reply to a non-empty walk means newfid was
            // never bound by the server; anything else bound it up to the
            // last successful component and must be clunked, not just freed.
            if got == 0 {
                session.fids().release(newfid);
            } else {
                clunk_best_effort(session, newfid).await;
            }
            Err(Error::ServerError(format!(
                "walk to {:?} stopped after {} of {} components",
                path, got, expected
            )))
        }
        Ok(other) => {
            session.fids().release(newfid);
            Err(Error::ServerError(format!("unexpected reply to Twalk: {:?}", other)))
        }
        Err(e) => {
            session.fids().release(newfid);
            Err(e)
        }
    }
}

async fn clunk_best_effort(session: &Arc<Session>, fid: u32) {
    // Any reply at all — Rclunk or Rerror — already made receiver.rs's
    // pending_clunks dispatch release fid by the time rpc() returns, per
    // the protocol's own "a clunk always invalidates the fid" rule. Only a
    // genuine no-reply failure (write never landed, connection died before
    // a reply arrived) leaves the pending_clunks entry unresolved, so only
    // that case needs a manual release here. Releasing unconditionally
    // would double-free a fid some other caller has since reallocated.
    if let Err(e) = session.rpc(FCall::TClunk { fid }).await {
        if !matches!(e, Error::ServerError(_)) {
            session.fids().release(fid);
        }
    }
}
