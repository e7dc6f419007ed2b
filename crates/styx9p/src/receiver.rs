//! The background task that reads frames off the wire and routes replies.
//!
//! One task owns the read half of the transport for the lifetime of the
//! session. It accumulates bytes until a complete frame is available (a 4
//! byte size prefix followed by that many bytes total), decodes it, and
//! either releases a fid whose `Tclunk` just completed or hands the reply to
//! whichever waiter in the `TagPool` is holding that tag. Any I/O or decode
//! failure is terminal: every outstanding waiter is failed with the cause
//! and the loop exits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::{malformed, Error};
use crate::fcall::Msg;
use crate::fidpool::FidPool;
use crate::tagpool::TagPool;
use crate::transport::AsyncDuplex;
use crate::utils::Result;

/// Fids awaiting the `Rclunk` that frees them, keyed by the `Tclunk`'s tag.
pub type PendingClunks = Arc<Mutex<HashMap<u16, u32>>>;

struct Shared {
    cause: Mutex<Option<String>>,
    closed: Notify,
}

/// A running receiver task plus a way to learn when and why it stopped.
pub struct Receiver {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl Receiver {
    /// `msize` caps every frame this receiver will accept, the same way it
    /// caps every frame the client emits (spec invariant: `msize` bounds
    /// both directions once negotiated). Before negotiation completes this
    /// is the client's own requested `msize`, which a compliant server can
    /// never exceed even in `Rversion` itself.
    pub fn spawn(
        mut read_half: tokio::io::ReadHalf<Box<dyn AsyncDuplex>>,
        tags: Arc<TagPool>,
        fids: Arc<FidPool>,
        pending_clunks: PendingClunks,
        msize: u32,
    ) -> Receiver {
        let shared = Arc::new(Shared {
            cause: Mutex::new(None),
            closed: Notify::new(),
        });
        let shared_task = shared.clone();

        let task = tokio::spawn(async move {
            let mut buf = BytesMut::with_capacity(8216);
            let mut chunk = [0u8; 8192];

            let terminal = loop {
                match try_take_frame(&mut buf, msize) {
                    Ok(Some(frame)) => match Msg::decode(&frame) {
                        Ok(msg) => {
                            log::trace!("received {:?}", msg.body);
                            // A Tclunk's fid is invalid the moment its reply
                            // arrives, whether that reply is Rclunk or
                            // Rerror: the protocol never leaves a clunked
                            // fid usable.
                            let fid = pending_clunks.lock().unwrap().remove(&msg.tag);
                            if let Some(fid) = fid {
                                fids.release(fid);
                            }
                            tags.deliver(msg.tag, Ok(msg));
                            continue;
                        }
                        Err(e) => break e,
                    },
                    Ok(None) => {}
                    Err(e) => break e,
                }

                match read_half.read(&mut chunk).await {
                    Ok(0) => break Error::ConnectionClosed {
                        cause: "transport reached eof".into(),
                    },
                    Ok(n) => {
                        buf.extend_from_slice(&chunk[..n]);
                        continue;
                    }
                    Err(e) => break Error::from(e),
                }
            };

            log::warn!("receiver loop terminated: {}", terminal);
            tags.fail_all(&terminal);
            *shared_task.cause.lock().unwrap() = Some(terminal.to_string());
            shared_task.closed.notify_waiters();
        });

        Receiver { shared, task }
    }

    /// `true` once the loop has stopped for any reason.
    pub fn is_closed(&self) -> bool {
        self.shared.cause.lock().unwrap().is_some()
    }

    /// Why the loop stopped, if it has.
    pub fn cause(&self) -> Option<String> {
        self.shared.cause.lock().unwrap().clone()
    }

    /// Wait for the loop to stop, for `disconnect`'s shutdown sequencing.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.shared.closed.notified().await;
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Split a complete frame off the front of `buf`, if one is available yet.
///
/// Frames are `size[4] ...` with `size` counting the whole frame including
/// itself, little-endian. `size` is trusted only once it has passed two
/// checks: it must be large enough to hold the minimal header (`size` type
/// tag, 7 bytes), and it must not exceed `max_size`. Both checks run as
/// soon as the 4-byte prefix itself is available — waiting for `size` more
/// bytes before validating it would mean a corrupt or hostile `size` field
/// (too small to ever satisfy `buf.len() >= size`, or large enough to grow
/// the buffer without bound) hangs the receiver forever instead of failing
/// the connection.
fn try_take_frame(buf: &mut BytesMut, max_size: u32) -> Result<Option<Vec<u8>>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let size = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if size < 7 {
        return Err(malformed!("frame size {} smaller than the minimal header", size));
    }
    if size > max_size {
        return Err(malformed!("frame size {} exceeds negotiated msize {}", size, max_size));
    }
    let size = size as usize;
    if buf.len() < size {
        return Ok(None);
    }
    Ok(Some(buf.split_to(size).to_vec()))
}
