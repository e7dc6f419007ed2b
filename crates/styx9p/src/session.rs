//! Connection lifecycle: version negotiation, attach, request dispatch, and
//! the clunk-everything-then-flush-everything-else shutdown sequence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::Error;
use crate::fcall::{FCall, Msg, NOFID, NOTAG, OpenMode, P92000};
use crate::fidpool::FidPool;
use crate::handle::Handle;
use crate::receiver::Receiver;
use crate::tagpool::TagPool;
use crate::transport::{self, AsyncDuplex, TlsRoots};
use crate::utils::Result;

/// Connection lifecycle state, advanced strictly in order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    New,
    Connected,
    Negotiated,
    Ready,
    Closing,
    Closed,
}

/// Caller-tunable knobs for [`Session::connect`].
#[derive(Clone)]
pub struct ClientConfig {
    /// `msize` proposed on `Tversion`. The server may reply with a smaller
    /// value; the session uses the smaller of the two from then on.
    pub msize: u32,
    /// Root store used for `tls!` addresses.
    pub tls_roots: TlsRoots,
    /// Attach name passed as `Tattach.aname`.
    pub aname: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            msize: crate::fcall::DEFAULT_MSIZE,
            tls_roots: TlsRoots::default(),
            aname: String::new(),
        }
    }
}

/// An attached connection to a 9P server.
pub struct Session {
    write_half: AsyncMutex<WriteHalf<Box<dyn AsyncDuplex>>>,
    receiver: Receiver,
    tags: Arc<TagPool>,
    fids: Arc<FidPool>,
    pending_clunks: Arc<Mutex<HashMap<u16, u32>>>,
    state: Mutex<State>,
    msize: u32,
    root_fid: u32,
    root_qid: crate::fcall::Qid,
}

impl Session {
    /// Connect, negotiate a version, and attach, returning a ready session.
    pub async fn connect(addr: &str, user: &str, config: ClientConfig) -> Result<Session> {
        let stream = transport::connect(addr, &config.tls_roots).await?;
        let (read_half, write_half) = tokio::io::split(stream);

        let tags = Arc::new(TagPool::new());
        let fids = Arc::new(FidPool::new());
        let pending_clunks = Arc::new(Mutex::new(HashMap::new()));

        let receiver = Receiver::spawn(
            read_half,
            tags.clone(),
            fids.clone(),
            pending_clunks.clone(),
            config.msize,
        );

        let mut session = Session {
            write_half: AsyncMutex::new(write_half),
            receiver,
            tags,
            fids,
            pending_clunks,
            state: Mutex::new(State::Connected),
            msize: config.msize,
            root_fid: 0,
            root_qid: crate::fcall::Qid::default(),
        };

        session.negotiate_version(config.msize).await?;
        session.attach(user, &config.aname).await?;
        Ok(session)
    }

    fn set_state(&self, s: State) {
        *self.state.lock().unwrap() = s;
    }

    pub fn state(&self) -> State {
        *self.state.lock().unwrap()
    }

    pub fn msize(&self) -> u32 {
        self.msize
    }

    pub fn root_fid(&self) -> u32 {
        self.root_fid
    }

    pub fn root_qid(&self) -> crate::fcall::Qid {
        self.root_qid
    }

    pub(crate) fn fids(&self) -> &FidPool {
        &*self.fids
    }

    async fn write_frame(&self, frame: &[u8]) -> Result<()> {
        let mut w = self.write_half.lock().await;
        w.write_all(frame).await?;
        Ok(())
    }

    async fn negotiate_version(&mut self, msize: u32) -> Result<()> {
        let rx = self.tags.register(NOTAG);
        let msg = Msg {
            tag: NOTAG,
            body: FCall::TVersion {
                msize,
                version: P92000.into(),
            },
        };
        let frame = msg.encode()?;
        log::trace!("sending {:?}", msg.body);
        self.write_frame(&frame).await?;

        let reply = rx
            .await
            .map_err(|_| Error::ConnectionClosed {
                cause: "receiver dropped before Rversion arrived".into(),
            })??;

        match reply.body {
            FCall::RVersion { msize: server_msize, version } => {
                if version != P92000 {
                    return Err(Error::ProtocolMismatch(format!(
                        "server replied with version {:?}",
                        version
                    )));
                }
                self.msize = self.msize.min(server_msize);
                self.set_state(State::Negotiated);
                Ok(())
            }
            FCall::RError { ename } => Err(Error::ServerError(ename)),
            other => Err(Error::ProtocolMismatch(format!(
                "expected Rversion, got {:?}",
                crate::fcall::MsgType::from(&other)
            ))),
        }
    }

    async fn attach(&mut self, user: &str, aname: &str) -> Result<()> {
        let fid = self.fids.alloc()?;
        let reply = self
            .rpc(FCall::TAttach {
                fid,
                afid: NOFID,
                uname: user.to_string(),
                aname: aname.to_string(),
            })
            .await;

        match reply {
            Ok(FCall::RAttach { qid }) => {
                self.root_fid = fid;
                self.root_qid = qid;
                self.set_state(State::Ready);
                Ok(())
            }
            Ok(other) => {
                self.fids.release(fid);
                Err(Error::ProtocolMismatch(format!(
                    "expected Rattach, got {:?}",
                    crate::fcall::MsgType::from(&other)
                )))
            }
            Err(e) => {
                self.fids.release(fid);
                Err(e)
            }
        }
    }

    /// Allocate a fid for a fresh walk, read, or write sequence.
    pub fn alloc_fid(&self) -> Result<u32> {
        self.fids.alloc()
    }

    /// Walk from the root fid to `path` and open it, the documented
    /// `Session.open(path, mode) -> Handle` entry point.
    ///
    /// Takes `self` by an owned `Arc` rather than `&self` because the
    /// returned `Handle` only holds a `Weak` reference back to the session
    /// (see [`crate::handle::Handle`]) and needs a strong `Arc` to downgrade
    /// from; `Session` does not keep one around internally. Callers who
    /// still need the session afterward clone it first, e.g.
    /// `session.clone().open(path, mode).await?`.
    pub async fn open(self: Arc<Self>, path: &str, mode: OpenMode) -> Result<Handle> {
        Handle::open(&self, path, mode).await
    }

    /// Send a request and wait for its reply, unwrapping `Rerror` into
    /// `Error::ServerError`.
    pub async fn rpc(&self, body: FCall) -> Result<FCall> {
        if self.state() == State::Closed {
            return Err(Error::ConnectionClosed {
                cause: "session already closed".into(),
            });
        }

        let (tag, rx) = self.tags.alloc()?;
        if let FCall::TClunk { fid } = body {
            self.pending_clunks.lock().unwrap().insert(tag, fid);
        }

        let msg = Msg { tag, body };
        let frame = match msg.encode() {
            Ok(f) => f,
            Err(e) => {
                self.tags.release(tag);
                self.pending_clunks.lock().unwrap().remove(&tag);
                return Err(e);
            }
        };
        if frame.len() as u32 > self.msize {
            self.tags.release(tag);
            self.pending_clunks.lock().unwrap().remove(&tag);
            return Err(Error::MalformedFrame(format!(
                "outgoing frame of {} bytes exceeds negotiated msize {}",
                frame.len(),
                self.msize
            )));
        }

        log::trace!("sending {:?}", msg.body);
        if let Err(e) = self.write_frame(&frame).await {
            self.tags.release(tag);
            self.pending_clunks.lock().unwrap().remove(&tag);
            return Err(e);
        }

        let reply = rx.await.map_err(|_| Error::ConnectionClosed {
            cause: "receiver dropped before a reply arrived".into(),
        })??;

        match reply.body {
            FCall::RError { ename } => Err(Error::ServerError(ename)),
            other => Ok(other),
        }
    }

    /// Clunk every allocated fid, flush every outstanding tag, then close
    /// the transport. Mirrors the reference client's shutdown order: fids
    /// first (reverse allocation order), then any tag still awaiting a
    /// reply, then the socket.
    pub async fn disconnect(&self) -> Result<()> {
        self.set_state(State::Closing);

        for fid in self.fids.allocated_reverse() {
            if let Err(e) = self.rpc(FCall::TClunk { fid }).await {
                log::warn!("clunking fid {} during disconnect: {}", fid, e);
                self.fids.release(fid);
            }
        }

        for oldtag in self.tags.outstanding() {
            let flushed = self.rpc(FCall::TFlush { oldtag }).await;
            if let Err(e) = flushed {
                log::warn!("flushing tag {} during disconnect: {}", oldtag, e);
            }
            self.tags.release(oldtag);
        }

        {
            let mut w = self.write_half.lock().await;
            let _ = w.shutdown().await;
        }
        self.receiver.abort();
        self.set_state(State::Closed);
        Ok(())
    }
}

impl Drop for Session {
    /// Any `Handle`s still holding only a weak reference to this session
    /// must see `ConnectionClosed` on their next call rather than hang
    /// forever on a reply that will now never come, and the receiver task
    /// must not outlive the session that spawned it.
    fn drop(&mut self) {
        if self.state() == State::Closed {
            return;
        }
        self.set_state(State::Closed);
        self.receiver.abort();
        self.tags.fail_all(&Error::ConnectionClosed {
            cause: "session dropped".into(),
        });
    }
}
