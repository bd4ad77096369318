//! Typed per-operation codecs.
//!
//! # Purpose
//! Each request the client can send is a small struct implementing
//! [`Operation`]. The session engine only sees the trait: it asks the
//! operation for its opcode and size, lets it write its own body after the
//! request header, and hands the statused reply back for decoding.
//!
//! # Design notes
//! Paths are validated when an operation is built and normalized against
//! the client root when the body is written, so one operation value can be
//! replayed against any connection. Paths the server sends back are mapped
//! under the root again before they reach the caller.
use bytes::BytesMut;

use crate::{Error, LENGTH_SIZE, OpCode, Reply, RequestHeader, Result, Status, WatchKind, finish_frame};

mod node;
mod read;
mod session;
mod watch;

pub use node::{Check, Create, CreateMode, Created, Delete, SetData};
pub use read::{Children, Exists, GetAcl, GetChildren, GetData, GetEphemerals, NodeAcl, NodeData, SyncPath};
pub use session::{Auth, CloseSession, Ping};
pub use watch::{AddWatch, RemoveWatches, SetWatches};

/// Version that matches any node version.
pub const ANY_VERSION: i32 = -1;

pub trait Operation: Send + Sync {
    type Output: Send + 'static;

    fn opcode(&self) -> OpCode;

    /// Upper bound of the body size once normalized against `root`.
    fn max_encoded_size(&self, root: &str) -> usize;

    /// Writes the body after the request header and returns its length.
    fn write_body(&self, buf: &mut BytesMut, root: &str) -> usize;

    /// Decodes a reply and returns the value with the number of body bytes
    /// it consumed.
    fn read_body(&self, reply: &Reply, root: &str) -> Result<(Self::Output, usize)>;

    /// Absolute path and kind of the watch this request asks the server to set.
    fn watch(&self, _root: &str) -> Option<(String, WatchKind)> {
        None
    }

    /// Whether the server kept the requested watch given the reply status.
    fn watch_established(&self, status: Status) -> bool {
        status.is_ok()
    }

    /// Fixed request id for requests that bypass the ordinary counter.
    fn reserved_xid(&self) -> Option<i32> {
        None
    }
}

/// Appends a complete request frame for `op`.
pub fn encode_request<O: Operation + ?Sized>(op: &O, xid: i32, root: &str, buf: &mut BytesMut) {
    buf.reserve(LENGTH_SIZE + RequestHeader::LEN + op.max_encoded_size(root));
    let start = RequestHeader::new(xid, op.opcode()).begin(buf);
    op.write_body(buf, root);
    finish_frame(buf, start);
}

/// Decodes a reply and insists that the body is consumed exactly.
pub fn decode_reply<O: Operation + ?Sized>(op: &O, reply: &Reply, root: &str) -> Result<O::Output> {
    let (output, consumed) = op.read_body(reply, root)?;
    let remaining = reply.body.len().saturating_sub(consumed);
    if remaining > 0 {
        return Err(Error::TrailingBytes(remaining));
    }
    Ok(output)
}

/// Counts how many bytes a decode step took from a cursor.
pub(crate) fn consumed(before: usize, after: &bytes::Bytes) -> usize {
    before - after.len()
}

pub(crate) fn validated(path: impl Into<String>) -> Result<String> {
    let path = path.into();
    crate::path::validate(&path)?;
    Ok(path)
}
