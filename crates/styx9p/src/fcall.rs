//! 9P2000/Styx protocol data types and constants.
//!
//! # Protocol
//! 9P2000

use bitflags::bitflags;
use enum_primitive::*;

/// 9P2000 version string, the only version this client negotiates.
pub const P92000: &str = "9P2000";

/// The version string that comes with `Rversion` when the server does not
/// understand the client's version string.
pub const VERSION_UNKNOWN: &str = "unknown";

/// Special tag which `Tversion`/`Rversion` must use as `tag`.
pub const NOTAG: u16 = !0;

/// Special value which `Tattach` with no auth must use as `afid`.
///
/// This client never authenticates, so every `Tattach` carries `NOFID`.
pub const NOFID: u32 = !0;

/// Default `msize` requested on `Tversion`.
pub const DEFAULT_MSIZE: u32 = 8216;

/// Bytes of `Twrite`/`Tread` header overhead: `size[4] type[1] tag[2] fid[4] offset[8] count[4]`.
pub const IOHDRSZ: u32 = 24;

bitflags! {
    /// Open mode octet used by `Topen`/`Tcreate`.
    ///
    /// The low two bits select the access mode; the high bits are flags
    /// that may be OR'd in.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
    pub struct OpenMode: u8 {
        #[doc = "Open for read"]
        const READ      = 0x00;
        #[doc = "Open for write"]
        const WRITE     = 0x01;
        #[doc = "Open for read and write"]
        const RDWR      = 0x02;
        #[doc = "Open for execute (treated as read, execute permission checked)"]
        const EXEC      = 0x03;
        #[doc = "Truncate the file first; valid only with a write mode"]
        const TRUNC     = 0x10;
        #[doc = "Remove the file when the fid is clunked"]
        const RCLOSE    = 0x40;
    }
}

impl OpenMode {
    /// The low two bits, i.e. the access mode without flag bits.
    pub fn access(self) -> u8 {
        self.bits() & 0x03
    }
}

bitflags! {
    /// Permission bits for `Tcreate`'s `perm` field.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
    pub struct Perm: u32 {
        #[doc = "Directory"]
        const DIR       = 0x80000000;
        #[doc = "Append-only file"]
        const APPEND    = 0x40000000;
        #[doc = "Exclusive-use file"]
        const EXCL      = 0x20000000;
    }
}

/// Default permission bits for a newly created directory: `rwxrwxrwx`, `DMDIR` set.
pub const DEFAULT_DIR_PERM: u32 = Perm::DIR.bits() | 0o755;

/// Default permission bits for a newly created plain file.
pub const DEFAULT_FILE_PERM: u32 = 0o644;

bitflags! {
    /// Bits in `Qid.typ`.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
    pub struct QidType: u8 {
        #[doc = "Directory"]
        const DIR       = 0x80;
        #[doc = "Append-only file"]
        const APPEND    = 0x40;
        #[doc = "Exclusive-use file"]
        const EXCL      = 0x20;
        #[doc = "Plain file"]
        const FILE      = 0x00;
    }
}

/// Server-assigned unique identity of a file, independent of its name.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Qid {
    /// Directory / append-only / exclusive-use bits.
    pub typ: QidType,
    /// Version number, typically incremented each time the file is modified.
    pub version: u32,
    /// Unique id among all files on the server.
    pub path: u64,
}

/// The stat record returned by `Rstat`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stat {
    pub typ: u16,
    pub dev: u32,
    pub qid: Qid,
    pub mode: u32,
    pub atime: u32,
    pub mtime: u32,
    pub length: u64,
    pub name: String,
    pub uid: String,
    pub gid: String,
    pub muid: String,
}

impl Stat {
    /// Size of the record's body, i.e. what `Rstat`'s embedded `size` field must equal.
    pub fn body_size(&self) -> u16 {
        (2 + 4
            + 13 // qid
            + 4 + 4 + 4
            + 8
            + (2 + self.name.len())
            + (2 + self.uid.len())
            + (2 + self.gid.len())
            + (2 + self.muid.len())) as u16
    }
}

enum_from_primitive! {
    /// Message type octet, 9P2000 operations.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    pub enum MsgType {
        TVersion    = 100,
        RVersion    = 101,
        TAttach     = 104,
        RAttach     = 105,
        RError      = 107,
        TFlush      = 108,
        RFlush      = 109,
        TWalk       = 110,
        RWalk       = 111,
        TOpen       = 112,
        ROpen       = 113,
        TCreate     = 114,
        RCreate     = 115,
        TRead       = 116,
        RRead       = 117,
        TWrite      = 118,
        RWrite      = 119,
        TClunk      = 120,
        RClunk      = 121,
        TStat       = 124,
        RStat       = 125,
    }
}

impl MsgType {
    /// `true` for `T`-messages (even type octets).
    pub fn is_t(self) -> bool {
        (self as u8) % 2 == 0
    }

    /// `true` for `R`-messages (odd type octets).
    pub fn is_r(self) -> bool {
        !self.is_t()
    }
}

impl From<&FCall> for MsgType {
    fn from(fcall: &FCall) -> MsgType {
        match *fcall {
            FCall::TVersion { .. } => MsgType::TVersion,
            FCall::RVersion { .. } => MsgType::RVersion,
            FCall::TAttach { .. } => MsgType::TAttach,
            FCall::RAttach { .. } => MsgType::RAttach,
            FCall::RError { .. } => MsgType::RError,
            FCall::TFlush { .. } => MsgType::TFlush,
            FCall::RFlush => MsgType::RFlush,
            FCall::TWalk { .. } => MsgType::TWalk,
            FCall::RWalk { .. } => MsgType::RWalk,
            FCall::TOpen { .. } => MsgType::TOpen,
            FCall::ROpen { .. } => MsgType::ROpen,
            FCall::TCreate { .. } => MsgType::TCreate,
            FCall::RCreate { .. } => MsgType::RCreate,
            FCall::TRead { .. } => MsgType::TRead,
            FCall::RRead { .. } => MsgType::RRead,
            FCall::TWrite { .. } => MsgType::TWrite,
            FCall::RWrite { .. } => MsgType::RWrite,
            FCall::TClunk { .. } => MsgType::TClunk,
            FCall::RClunk => MsgType::RClunk,
            FCall::TStat { .. } => MsgType::TStat,
            FCall::RStat { .. } => MsgType::RStat,
        }
    }
}

/// A data type encapsulating the various 9P2000 messages.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FCall {
    TVersion {
        msize: u32,
        version: String,
    },
    RVersion {
        msize: u32,
        version: String,
    },
    TAttach {
        fid: u32,
        afid: u32,
        uname: String,
        aname: String,
    },
    RAttach {
        qid: Qid,
    },
    RError {
        ename: String,
    },
    TFlush {
        oldtag: u16,
    },
    RFlush,
    TWalk {
        fid: u32,
        newfid: u32,
        wname: Vec<String>,
    },
    RWalk {
        wqid: Vec<Qid>,
    },
    TOpen {
        fid: u32,
        mode: u8,
    },
    ROpen {
        qid: Qid,
        iounit: u32,
    },
    TCreate {
        fid: u32,
        name: String,
        perm: u32,
        mode: u8,
    },
    RCreate {
        qid: Qid,
        iounit: u32,
    },
    TRead {
        fid: u32,
        offset: u64,
        count: u32,
    },
    RRead {
        data: Vec<u8>,
    },
    TWrite {
        fid: u32,
        offset: u64,
        data: Vec<u8>,
    },
    RWrite {
        count: u32,
    },
    TClunk {
        fid: u32,
    },
    RClunk,
    TStat {
        fid: u32,
    },
    RStat {
        stat: Stat,
    },
}

/// Envelope for 9P messages: a tag plus the message body.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Msg {
    /// Chosen by the client (except for `Tversion`, which always uses `NOTAG`)
    /// to pair a reply with its request.
    pub tag: u16,
    pub body: FCall,
}
