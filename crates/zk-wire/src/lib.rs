// Wire codec for the ZooKeeper client protocol.
//
// Everything on the wire is big-endian. Requests are framed as
// `len | xid | opcode | body` and replies as `len | xid | zxid | status | body`,
// where `len` never counts itself. Strings and byte buffers carry a 4-byte
// signed length prefix; `-1` stands for a null buffer.
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub mod acl;
pub mod event;
pub mod handshake;
pub mod multi;
pub mod opcode;
pub mod ops;
pub mod path;
pub mod stat;
pub mod status;

pub use acl::Acl;
pub use event::{EventType, KeeperState, WatchKind, WatchedEvent};
pub use handshake::{ConnectRequest, ConnectResponse};
pub use multi::{Multi, MultiOp, MultiResponse, OpResult};
pub use opcode::OpCode;
pub use ops::Operation;
pub use stat::Stat;
pub use status::Status;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("incomplete frame")]
    Incomplete,
    #[error("reply frame of {0} bytes is shorter than the reply header")]
    FrameTooShort(usize),
    #[error("frame too large: {length} bytes (cap {cap})")]
    FrameTooLarge { length: usize, cap: usize },
    #[error("negative length prefix {0}")]
    NegativeLength(i32),
    #[error("string is not valid utf-8")]
    InvalidUtf8,
    #[error("unknown opcode {0}")]
    UnknownOpCode(i32),
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("{0} unread bytes after reply body")]
    TrailingBytes(usize),
    #[error("multi reply does not match request: {0}")]
    MultiMismatch(String),
    #[error("server returned {0}")]
    Status(Status),
}

/// Reserved request identifiers.
pub mod xid {
    /// Server-pushed watch notification.
    pub const NOTIFICATION: i32 = -1;
    pub const PING: i32 = -2;
    pub const AUTH: i32 = -4;
    pub const SET_WATCHES: i32 = -9;
    /// First identifier handed out to ordinary requests.
    pub const FIRST: i32 = 1;
}

pub const LENGTH_SIZE: usize = 4;
pub const INT_SIZE: usize = 4;
pub const LONG_SIZE: usize = 8;
pub const BOOL_SIZE: usize = 1;

pub fn write_i32(buf: &mut BytesMut, value: i32) -> usize {
    buf.put_i32(value);
    INT_SIZE
}

pub fn write_i64(buf: &mut BytesMut, value: i64) -> usize {
    buf.put_i64(value);
    LONG_SIZE
}

pub fn write_bool(buf: &mut BytesMut, value: bool) -> usize {
    buf.put_u8(value as u8);
    BOOL_SIZE
}

pub fn write_bytes(buf: &mut BytesMut, value: &[u8]) -> usize {
    buf.put_i32(value.len() as i32);
    buf.extend_from_slice(value);
    LENGTH_SIZE + value.len()
}

/// Writes `-1` for a missing buffer, which the server reads back as null.
pub fn write_optional_bytes(buf: &mut BytesMut, value: Option<&[u8]>) -> usize {
    match value {
        Some(value) => write_bytes(buf, value),
        None => write_i32(buf, -1),
    }
}

pub fn write_string(buf: &mut BytesMut, value: &str) -> usize {
    write_bytes(buf, value.as_bytes())
}

pub fn write_strings<'a, I>(buf: &mut BytesMut, values: I) -> usize
where
    I: IntoIterator<Item = &'a str>,
    I::IntoIter: ExactSizeIterator,
{
    let values = values.into_iter();
    let mut size = write_i32(buf, values.len() as i32);
    for value in values {
        size += write_string(buf, value);
    }
    size
}

pub fn read_i32(buf: &mut Bytes) -> Result<i32> {
    if buf.remaining() < INT_SIZE {
        return Err(Error::Incomplete);
    }
    Ok(buf.get_i32())
}

pub fn read_i64(buf: &mut Bytes) -> Result<i64> {
    if buf.remaining() < LONG_SIZE {
        return Err(Error::Incomplete);
    }
    Ok(buf.get_i64())
}

pub fn read_bool(buf: &mut Bytes) -> Result<bool> {
    if buf.remaining() < BOOL_SIZE {
        return Err(Error::Incomplete);
    }
    Ok(buf.get_u8() != 0)
}

/// Splits a length-prefixed slice off the front of `buf`. A null buffer
/// (`-1`) comes back empty.
pub fn read_length_prefixed(buf: &mut Bytes) -> Result<Bytes> {
    let length = read_i32(buf)?;
    if length == -1 {
        return Ok(Bytes::new());
    }
    if length < 0 {
        return Err(Error::NegativeLength(length));
    }
    let length = length as usize;
    if buf.remaining() < length {
        return Err(Error::Incomplete);
    }
    Ok(buf.split_to(length))
}

pub fn read_string(buf: &mut Bytes) -> Result<String> {
    let raw = read_length_prefixed(buf)?;
    String::from_utf8(raw.to_vec()).map_err(|_| Error::InvalidUtf8)
}

pub fn read_strings(buf: &mut Bytes) -> Result<Vec<String>> {
    let count = read_i32(buf)?;
    if count < 0 {
        return Ok(Vec::new());
    }
    // Cap the preallocation by what the buffer could possibly hold.
    let mut values = Vec::with_capacity((count as usize).min(buf.remaining() / LENGTH_SIZE));
    for _ in 0..count {
        values.push(read_string(buf)?);
    }
    Ok(values)
}

pub fn string_size(value: &str) -> usize {
    LENGTH_SIZE + value.len()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub xid: i32,
    pub opcode: OpCode,
}

impl RequestHeader {
    /// Header bytes after the length prefix.
    pub const LEN: usize = 8;

    pub fn new(xid: i32, opcode: OpCode) -> Self {
        Self { xid, opcode }
    }

    /// Writes a placeholder length followed by the header and returns the
    /// offset of the length field so [`finish_frame`] can patch it.
    pub fn begin(&self, buf: &mut BytesMut) -> usize {
        let start = buf.len();
        buf.put_i32(0);
        buf.put_i32(self.xid);
        buf.put_i32(self.opcode.code());
        start
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let xid = read_i32(buf)?;
        let code = read_i32(buf)?;
        let opcode = OpCode::from_code(code).ok_or(Error::UnknownOpCode(code))?;
        Ok(Self { xid, opcode })
    }
}

/// Patches the length prefix written at `start` to cover everything after it.
pub fn finish_frame(buf: &mut BytesMut, start: usize) -> usize {
    let length = buf.len() - start - LENGTH_SIZE;
    buf[start..start + LENGTH_SIZE].copy_from_slice(&(length as i32).to_be_bytes());
    length
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
    pub xid: i32,
    pub zxid: i64,
    pub status: Status,
}

impl ReplyHeader {
    /// Minimal reply payload: xid, zxid and status.
    pub const LEN: usize = 16;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(self.xid);
        buf.put_i64(self.zxid);
        buf.put_i32(self.status.code());
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < Self::LEN {
            return Err(Error::FrameTooShort(buf.remaining()));
        }
        let xid = buf.get_i32();
        let zxid = buf.get_i64();
        let status = Status::from_code(buf.get_i32());
        Ok(Self { xid, zxid, status })
    }
}

/// A reply frame split into its header and the undecoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub header: ReplyHeader,
    pub body: Bytes,
}

impl Reply {
    /// Decodes a reply payload, i.e. the frame without its length prefix.
    ///
    /// ```
    /// use bytes::Bytes;
    /// use zk_wire::{Reply, Status};
    ///
    /// let payload = Bytes::from_static(&[0, 0, 0, 7, 0, 0, 0, 0, 0, 0, 0, 9, 0, 0, 0, 0]);
    /// let reply = Reply::decode(payload).expect("decode");
    /// assert_eq!(reply.header.xid, 7);
    /// assert_eq!(reply.header.zxid, 9);
    /// assert_eq!(reply.header.status, Status::Ok);
    /// ```
    pub fn decode(mut payload: Bytes) -> Result<Self> {
        let header = ReplyHeader::decode(&mut payload)?;
        Ok(Self {
            header,
            body: payload,
        })
    }

    /// Reads only the request id, which routes the frame before it is decoded.
    pub fn peek_xid(payload: &[u8]) -> Result<i32> {
        if payload.len() < ReplyHeader::LEN {
            return Err(Error::FrameTooShort(payload.len()));
        }
        Ok(i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]))
    }

    pub fn status(&self) -> Status {
        self.header.status
    }

    pub fn ensure_ok(&self) -> Result<()> {
        match self.header.status {
            Status::Ok => Ok(()),
            status => Err(Error::Status(status)),
        }
    }

    /// Builds a full reply frame, length prefix included.
    pub fn encode_frame(header: ReplyHeader, body: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(LENGTH_SIZE + ReplyHeader::LEN + body.len());
        buf.put_i32((ReplyHeader::LEN + body.len()) as i32);
        header.encode(&mut buf);
        buf.extend_from_slice(body);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_big_endian() {
        let mut buf = BytesMut::new();
        assert_eq!(write_i32(&mut buf, 0x0102_0304), 4);
        assert_eq!(write_i64(&mut buf, 0x0506_0708_090a_0b0c), 8);
        assert_eq!(write_bool(&mut buf, true), 1);
        assert_eq!(
            buf.as_ref(),
            &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 1][..]
        );
    }

    #[test]
    fn strings_carry_length_prefix() {
        let mut buf = BytesMut::new();
        assert_eq!(write_string(&mut buf, "/zk"), 7);
        assert_eq!(buf.as_ref(), &[0, 0, 0, 3, b'/', b'z', b'k'][..]);
        let mut bytes = buf.freeze();
        assert_eq!(read_string(&mut bytes).expect("read"), "/zk");
        assert!(bytes.is_empty());
    }

    #[test]
    fn null_buffer_reads_as_empty() {
        let mut buf = BytesMut::new();
        write_optional_bytes(&mut buf, None);
        let mut bytes = buf.freeze();
        assert!(read_length_prefixed(&mut bytes).expect("read").is_empty());
    }

    #[test]
    fn rejects_bad_length_prefixes() {
        let mut bytes = Bytes::from_static(&[0xff, 0xff, 0xff, 0xfe]);
        let err = read_length_prefixed(&mut bytes).expect_err("negative");
        assert!(matches!(err, Error::NegativeLength(-2)));

        let mut bytes = Bytes::from_static(&[0, 0, 0, 9, 1, 2]);
        let err = read_length_prefixed(&mut bytes).expect_err("short");
        assert!(matches!(err, Error::Incomplete));
    }

    #[test]
    fn request_frame_length_excludes_itself() {
        let mut buf = BytesMut::new();
        let start = RequestHeader::new(5, OpCode::Exists).begin(&mut buf);
        write_string(&mut buf, "/a");
        write_bool(&mut buf, false);
        let length = finish_frame(&mut buf, start);
        assert_eq!(length, 8 + 6 + 1);
        assert_eq!(&buf[..4], &(length as i32).to_be_bytes());
        assert_eq!(&buf[4..12], &[0, 0, 0, 5, 0, 0, 0, 3]);
    }

    #[test]
    fn short_reply_is_a_protocol_violation() {
        let err = Reply::decode(Bytes::from_static(&[0; 15])).expect_err("short");
        assert!(matches!(err, Error::FrameTooShort(15)));
        assert!(matches!(
            Reply::peek_xid(&[0; 3]).expect_err("short"),
            Error::FrameTooShort(3)
        ));
    }

    #[test]
    fn reply_frame_round_trips_header() {
        let header = ReplyHeader {
            xid: xid::NOTIFICATION,
            zxid: 42,
            status: Status::NoNode,
        };
        let frame = Reply::encode_frame(header, b"xyz");
        assert_eq!(&frame[..4], &19i32.to_be_bytes());
        let reply = Reply::decode(frame.slice(4..)).expect("decode");
        assert_eq!(reply.header, header);
        assert_eq!(reply.body.as_ref(), b"xyz");
        assert!(matches!(
            reply.ensure_ok().expect_err("status"),
            Error::Status(Status::NoNode)
        ));
    }
}
