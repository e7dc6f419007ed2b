//! Fid allocation.
//!
//! Fids are handed out lowest-first, the same discipline the reference
//! client uses for both tags and fids, and the root fid is obtained through
//! this same pool during `connect` rather than hardcoded as fid 0 elsewhere
//! in the session.

use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::error::Error;
use crate::fcall::NOFID;
use crate::utils::Result;

struct Inner {
    in_use: BTreeSet<u32>,
}

pub struct FidPool {
    inner: Mutex<Inner>,
}

impl FidPool {
    pub fn new() -> Self {
        FidPool {
            inner: Mutex::new(Inner {
                in_use: BTreeSet::new(),
            }),
        }
    }

    /// Reserve the lowest unused fid.
    pub fn alloc(&self) -> Result<u32> {
        let mut inner = self.inner.lock().unwrap();
        if inner.in_use.len() >= (NOFID as usize) {
            return Err(Error::FidsExhausted);
        }
        let mut candidate = 0u32;
        for &used in inner.in_use.iter() {
            if used != candidate {
                break;
            }
            candidate += 1;
        }
        inner.in_use.insert(candidate);
        Ok(candidate)
    }

    /// Release a fid once it has been clunked (or the clunk attempt is moot
    /// because the connection is tearing down anyway).
    pub fn release(&self, fid: u32) {
        self.inner.lock().unwrap().in_use.remove(&fid);
    }

    /// All fids currently allocated, highest first — `disconnect` clunks in
    /// this order, undoing allocation in the reverse order it happened.
    pub fn allocated_reverse(&self) -> Vec<u32> {
        self.inner.lock().unwrap().in_use.iter().rev().copied().collect()
    }
}

impl Default for FidPool {
    fn default() -> Self {
        Self::new()
    }
}
