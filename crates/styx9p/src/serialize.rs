//! Wire encoding/decoding for 9P2000 messages.
//!
//! A `Msg` is framed as `size[4] type[1] tag[2] body...` where `size` counts
//! the whole frame including itself. `encode` produces that full frame;
//! `decode` consumes one, so it can check the declared size against what it
//! was actually handed.

use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_traits::FromPrimitive;

use crate::error::malformed;
use crate::fcall::{FCall, Msg, MsgType, Qid, QidType, Stat};
use crate::utils::Result;

/// Largest string/array length this client will accept from a server,
/// independent of `msize` — guards against a corrupt `size` field leading to
/// a multi-gigabyte allocation.
const MAX_ELEM: usize = 1 << 24;

trait Encodable {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()>;
}

trait Decodable: Sized {
    fn decode<R: Read>(r: &mut R) -> Result<Self>;
}

// Every `Decodable` impl here runs over an in-memory `Cursor` holding a
// frame whose declared `size` has already been checked against the bytes
// actually on hand (see `Msg::decode`/`try_take_frame`). So any `io::Error`
// surfacing from one of these reads — truncated field, length prefix that
// overruns the buffer — is a parse failure, never a real transport error,
// and must come back as `MalformedFrame` rather than `Error::Io`.

impl Encodable for u8 {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(*self)
    }
}
impl Decodable for u8 {
    fn decode<R: Read>(r: &mut R) -> Result<Self> {
        r.read_u8().map_err(|e| malformed!("truncated u8: {}", e))
    }
}

impl Encodable for u16 {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<LittleEndian>(*self)
    }
}
impl Decodable for u16 {
    fn decode<R: Read>(r: &mut R) -> Result<Self> {
        r.read_u16::<LittleEndian>()
            .map_err(|e| malformed!("truncated u16: {}", e))
    }
}

impl Encodable for u32 {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(*self)
    }
}
impl Decodable for u32 {
    fn decode<R: Read>(r: &mut R) -> Result<Self> {
        r.read_u32::<LittleEndian>()
            .map_err(|e| malformed!("truncated u32: {}", e))
    }
}

impl Encodable for u64 {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(*self)
    }
}
impl Decodable for u64 {
    fn decode<R: Read>(r: &mut R) -> Result<Self> {
        r.read_u64::<LittleEndian>()
            .map_err(|e| malformed!("truncated u64: {}", e))
    }
}

fn encode_bytes<W: Write>(bytes: &[u8], w: &mut W) -> io::Result<()> {
    w.write_u16::<LittleEndian>(bytes.len() as u16)?;
    w.write_all(bytes)
}

fn decode_bytes<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let len = u16::decode(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)
        .map_err(|e| malformed!("declared length {} exceeds remaining bytes: {}", len, e))?;
    Ok(buf)
}

impl Encodable for String {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        encode_bytes(self.as_bytes(), w)
    }
}
impl Decodable for String {
    fn decode<R: Read>(r: &mut R) -> Result<Self> {
        let bytes = decode_bytes(r)?;
        String::from_utf8(bytes).map_err(|e| malformed!("non-utf8 string: {}", e))
    }
}

fn encode_vec<W: Write, T: Encodable>(items: &[T], w: &mut W) -> io::Result<()> {
    w.write_u16::<LittleEndian>(items.len() as u16)?;
    for item in items {
        item.encode(w)?;
    }
    Ok(())
}

fn decode_vec<R: Read, T: Decodable>(r: &mut R) -> Result<Vec<T>> {
    let count = u16::decode(r)? as usize;
    if count > MAX_ELEM {
        return Err(malformed!("array count {} exceeds limit", count));
    }
    let mut out = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        out.push(T::decode(r)?);
    }
    Ok(out)
}

impl Encodable for Qid {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(self.typ.bits())?;
        w.write_u32::<LittleEndian>(self.version)?;
        w.write_u64::<LittleEndian>(self.path)
    }
}
impl Decodable for Qid {
    fn decode<R: Read>(r: &mut R) -> Result<Self> {
        let typ = QidType::from_bits_truncate(u8::decode(r)?);
        let version = u32::decode(r)?;
        let path = u64::decode(r)?;
        Ok(Qid { typ, version, path })
    }
}

impl Encodable for Stat {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<LittleEndian>(self.body_size())?;
        w.write_u16::<LittleEndian>(self.typ)?;
        w.write_u32::<LittleEndian>(self.dev)?;
        self.qid.encode(w)?;
        w.write_u32::<LittleEndian>(self.mode)?;
        w.write_u32::<LittleEndian>(self.atime)?;
        w.write_u32::<LittleEndian>(self.mtime)?;
        w.write_u64::<LittleEndian>(self.length)?;
        self.name.encode(w)?;
        self.uid.encode(w)?;
        self.gid.encode(w)?;
        self.muid.encode(w)
    }
}
impl Decodable for Stat {
    fn decode<R: Read>(r: &mut R) -> Result<Self> {
        let size = u16::decode(r)?;
        let typ = u16::decode(r)?;
        let dev = u32::decode(r)?;
        let qid = Qid::decode(r)?;
        let mode = u32::decode(r)?;
        let atime = u32::decode(r)?;
        let mtime = u32::decode(r)?;
        let length = u64::decode(r)?;
        let name = String::decode(r)?;
        let uid = String::decode(r)?;
        let gid = String::decode(r)?;
        let muid = String::decode(r)?;
        let stat = Stat {
            typ,
            dev,
            qid,
            mode,
            atime,
            mtime,
            length,
            name,
            uid,
            gid,
            muid,
        };
        if stat.body_size() != size {
            return Err(malformed!(
                "stat size field {} does not match body size {}",
                size,
                stat.body_size()
            ));
        }
        Ok(stat)
    }
}

impl FCall {
    fn encode_body<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match self {
            FCall::TVersion { msize, version } => {
                msize.encode(w)?;
                version.encode(w)
            }
            FCall::RVersion { msize, version } => {
                msize.encode(w)?;
                version.encode(w)
            }
            FCall::TAttach { fid, afid, uname, aname } => {
                fid.encode(w)?;
                afid.encode(w)?;
                uname.encode(w)?;
                aname.encode(w)
            }
            FCall::RAttach { qid } => qid.encode(w),
            FCall::RError { ename } => ename.encode(w),
            FCall::TFlush { oldtag } => oldtag.encode(w),
            FCall::RFlush => Ok(()),
            FCall::TWalk { fid, newfid, wname } => {
                fid.encode(w)?;
                newfid.encode(w)?;
                encode_vec(wname, w)
            }
            FCall::RWalk { wqid } => encode_vec(wqid, w),
            FCall::TOpen { fid, mode } => {
                fid.encode(w)?;
                mode.encode(w)
            }
            FCall::ROpen { qid, iounit } => {
                qid.encode(w)?;
                iounit.encode(w)
            }
            FCall::TCreate { fid, name, perm, mode } => {
                fid.encode(w)?;
                name.encode(w)?;
                perm.encode(w)?;
                mode.encode(w)
            }
            FCall::RCreate { qid, iounit } => {
                qid.encode(w)?;
                iounit.encode(w)
            }
            FCall::TRead { fid, offset, count } => {
                fid.encode(w)?;
                offset.encode(w)?;
                count.encode(w)
            }
            FCall::RRead { data } => encode_bytes(data, w),
            FCall::TWrite { fid, offset, data } => {
                fid.encode(w)?;
                offset.encode(w)?;
                encode_bytes(data, w)
            }
            FCall::RWrite { count } => count.encode(w),
            FCall::TClunk { fid } => fid.encode(w),
            FCall::RClunk => Ok(()),
            FCall::TStat { fid } => fid.encode(w),
            FCall::RStat { stat } => {
                // Rstat wraps the stat record in an extra u16 length prefix
                // of the whole encoded stat (distinct from the stat's own
                // embedded size field).
                let mut buf = Vec::new();
                stat.encode(&mut buf)?;
                w.write_u16::<LittleEndian>(buf.len() as u16)?;
                w.write_all(&buf)
            }
        }
    }

    fn decode_body<R: Read>(typ: MsgType, r: &mut R) -> Result<FCall> {
        Ok(match typ {
            MsgType::TVersion => FCall::TVersion {
                msize: u32::decode(r)?,
                version: String::decode(r)?,
            },
            MsgType::RVersion => FCall::RVersion {
                msize: u32::decode(r)?,
                version: String::decode(r)?,
            },
            MsgType::TAttach => FCall::TAttach {
                fid: u32::decode(r)?,
                afid: u32::decode(r)?,
                uname: String::decode(r)?,
                aname: String::decode(r)?,
            },
            MsgType::RAttach => FCall::RAttach { qid: Qid::decode(r)? },
            MsgType::RError => FCall::RError { ename: String::decode(r)? },
            MsgType::TFlush => FCall::TFlush { oldtag: u16::decode(r)? },
            MsgType::RFlush => FCall::RFlush,
            MsgType::TWalk => FCall::TWalk {
                fid: u32::decode(r)?,
                newfid: u32::decode(r)?,
                wname: decode_vec(r)?,
            },
            MsgType::RWalk => FCall::RWalk { wqid: decode_vec(r)? },
            MsgType::TOpen => FCall::TOpen {
                fid: u32::decode(r)?,
                mode: u8::decode(r)?,
            },
            MsgType::ROpen => FCall::ROpen {
                qid: Qid::decode(r)?,
                iounit: u32::decode(r)?,
            },
            MsgType::TCreate => FCall::TCreate {
                fid: u32::decode(r)?,
                name: String::decode(r)?,
                perm: u32::decode(r)?,
                mode: u8::decode(r)?,
            },
            MsgType::RCreate => FCall::RCreate {
                qid: Qid::decode(r)?,
                iounit: u32::decode(r)?,
            },
            MsgType::TRead => FCall::TRead {
                fid: u32::decode(r)?,
                offset: u64::decode(r)?,
                count: u32::decode(r)?,
            },
            MsgType::RRead => FCall::RRead { data: decode_bytes(r)? },
            MsgType::TWrite => FCall::TWrite {
                fid: u32::decode(r)?,
                offset: u64::decode(r)?,
                data: decode_bytes(r)?,
            },
            MsgType::RWrite => FCall::RWrite { count: u32::decode(r)? },
            MsgType::TClunk => FCall::TClunk { fid: u32::decode(r)? },
            MsgType::RClunk => FCall::RClunk,
            MsgType::TStat => FCall::TStat { fid: u32::decode(r)? },
            MsgType::RStat => {
                let _wrapper_len = u16::decode(r)?;
                FCall::RStat { stat: Stat::decode(r)? }
            }
        })
    }
}

impl Msg {
    /// Encode this message as a complete frame: `size[4] type[1] tag[2] body`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        let typ = MsgType::from(&self.body);
        body.write_u8(typ as u8)?;
        body.write_u16::<LittleEndian>(self.tag)?;
        self.body.encode_body(&mut body)?;

        let total = 4 + body.len();
        let mut frame = Vec::with_capacity(total);
        frame.write_u32::<LittleEndian>(total as u32)?;
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode a complete frame, including its leading `size` field.
    ///
    /// `frame` must be exactly the bytes described by its own `size` field;
    /// the caller (the `receiver` module's framing) is responsible for
    /// splitting the byte stream into frame-sized chunks before this runs.
    pub fn decode(frame: &[u8]) -> Result<Msg> {
        if frame.len() < 7 {
            return Err(malformed!("frame too short: {} bytes", frame.len()));
        }
        let mut cur = Cursor::new(frame);
        let size = u32::decode(&mut cur)? as usize;
        if size != frame.len() {
            return Err(malformed!(
                "declared size {} does not match frame length {}",
                size,
                frame.len()
            ));
        }
        let raw_type = u8::decode(&mut cur)?;
        let typ = MsgType::from_u8(raw_type)
            .ok_or_else(|| malformed!("unknown message type {}", raw_type))?;
        let tag = u16::decode(&mut cur)?;
        let body = FCall::decode_body(typ, &mut cur)?;

        let consumed = cur.position() as usize;
        if consumed != frame.len() {
            return Err(malformed!(
                "trailing {} bytes after decoding {:?}",
                frame.len() - consumed,
                typ
            ));
        }
        Ok(Msg { tag, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fcall::NOFID;

    #[test]
    fn round_trips_tversion() {
        let msg = Msg {
            tag: crate::fcall::NOTAG,
            body: FCall::TVersion {
                msize: 8216,
                version: "9P2000".into(),
            },
        };
        let frame = msg.encode().unwrap();
        let decoded = Msg::decode(&frame).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trips_tattach() {
        let msg = Msg {
            tag: 1,
            body: FCall::TAttach {
                fid: 0,
                afid: NOFID,
                uname: "glenda".into(),
                aname: "".into(),
            },
        };
        let frame = msg.encode().unwrap();
        assert_eq!(Msg::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn round_trips_twalk_multi_element() {
        let msg = Msg {
            tag: 7,
            body: FCall::TWalk {
                fid: 0,
                newfid: 1,
                wname: vec!["usr".into(), "glenda".into(), "file.txt".into()],
            },
        };
        let frame = msg.encode().unwrap();
        assert_eq!(Msg::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn round_trips_rstat() {
        let stat = Stat {
            typ: 0,
            dev: 0,
            qid: Qid {
                typ: QidType::empty(),
                version: 1,
                path: 42,
            },
            mode: 0o644,
            atime: 0,
            mtime: 0,
            length: 1024,
            name: "file.txt".into(),
            uid: "glenda".into(),
            gid: "glenda".into(),
            muid: "glenda".into(),
        };
        let msg = Msg {
            tag: 3,
            body: FCall::RStat { stat },
        };
        let frame = msg.encode().unwrap();
        assert_eq!(Msg::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn rejects_truncated_size_field() {
        let err = Msg::decode(&[1, 2, 3]);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_size_mismatch() {
        let msg = Msg {
            tag: 1,
            body: FCall::RClunk,
        };
        let mut frame = msg.encode().unwrap();
        // Corrupt the declared size so it no longer matches the frame.
        frame[0] = frame[0].wrapping_add(1);
        assert!(Msg::decode(&frame).is_err());
    }

    #[test]
    fn rejects_unknown_message_type() {
        let mut frame = Msg {
            tag: 1,
            body: FCall::RClunk,
        }
        .encode()
        .unwrap();
        frame[4] = 255;
        assert!(Msg::decode(&frame).is_err());
    }
}
