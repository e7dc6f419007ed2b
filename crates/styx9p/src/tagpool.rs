//! Tag allocation and per-tag reply delivery.
//!
//! Each in-flight request owns a `tokio::sync::oneshot` reply slot instead of
//! all waiters sharing one condition variable: the receiver task looks the
//! tag up in a map and fires the matching sender directly, so one slow
//! waiter never blocks another tag's delivery.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::error::Error;
use crate::fcall::{Msg, NOTAG};
use crate::utils::Result;

type ReplySender = oneshot::Sender<Result<Msg>>;

struct Inner {
    in_use: BTreeMap<u16, ReplySender>,
}

/// Allocates 16-bit tags and routes replies to their waiters.
///
/// Tag `NOTAG` (`0xFFFF`) is reserved for `Tversion`/`Rversion` and is never
/// handed out by `alloc`.
pub struct TagPool {
    inner: Mutex<Inner>,
}

impl TagPool {
    pub fn new() -> Self {
        TagPool {
            inner: Mutex::new(Inner {
                in_use: BTreeMap::new(),
            }),
        }
    }

    /// Reserve the lowest unused tag (excluding `NOTAG`) and a oneshot
    /// receiver for its reply, the same lowest-free scan `FidPool::alloc`
    /// uses over its own `BTreeSet`.
    pub fn alloc(&self) -> Result<(u16, oneshot::Receiver<Result<Msg>>)> {
        let mut inner = self.inner.lock().unwrap();
        if inner.in_use.len() >= (NOTAG as usize) {
            return Err(Error::TagsExhausted);
        }
        let mut candidate = 0u16;
        for &used in inner.in_use.keys() {
            if used != candidate {
                break;
            }
            candidate += 1;
        }
        let (tx, rx) = oneshot::channel();
        inner.in_use.insert(candidate, tx);
        Ok((candidate, rx))
    }

    /// Deliver a reply to the waiter registered for `msg.tag`.
    ///
    /// Returns `false` if no waiter was registered (e.g. the caller already
    /// gave up via `Tflush`), which is not itself an error.
    pub fn deliver(&self, tag: u16, reply: Result<Msg>) -> bool {
        let sender = self.inner.lock().unwrap().in_use.remove(&tag);
        match sender {
            Some(tx) => {
                let _ = tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Register a specific tag's reply slot directly, bypassing allocation.
    ///
    /// Used only for `Tversion`, which the protocol requires to use `NOTAG`
    /// rather than an allocated tag.
    pub fn register(&self, tag: u16) -> oneshot::Receiver<Result<Msg>> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().in_use.insert(tag, tx);
        rx
    }

    /// Release a tag without a reply ever arriving, e.g. after a `Tflush`
    /// completes or the connection tears down.
    pub fn release(&self, tag: u16) {
        self.inner.lock().unwrap().in_use.remove(&tag);
    }

    /// All tags still awaiting a reply, for `disconnect`'s flush pass.
    pub fn outstanding(&self) -> Vec<u16> {
        self.inner.lock().unwrap().in_use.keys().copied().collect()
    }

    /// Fail every outstanding waiter with `cause`, used when the receiver
    /// loop terminates.
    pub fn fail_all(&self, cause: &Error) {
        let mut inner = self.inner.lock().unwrap();
        for (_, tx) in inner.in_use.drain() {
            let _ = tx.send(Err(Error::ConnectionClosed {
                cause: cause.to_string(),
            }));
        }
    }
}

impl Default for TagPool {
    fn default() -> Self {
        Self::new()
    }
}
