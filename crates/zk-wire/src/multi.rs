//! Batched ("multi") requests.
//!
//! # Purpose
//! Encodes an ordered list of sub-operations into one request and decodes
//! the matching batch reply.
//!
//! # Design notes
//! Every entry is preceded by a sub-header `type | done | err`; a header
//! with type `-1` and `done` set terminates the list. A failed batch still
//! answers every entry (the failing one and all others carry error
//! entries), so decoding walks all of them before it reports the first
//! non-OK status.
use bytes::{Bytes, BytesMut};

use crate::ops::{Check, Create, Created, Delete, Operation, SetData, consumed};
use crate::{
    BOOL_SIZE, Error, INT_SIZE, OpCode, Reply, ReplyHeader, Result, Stat, Status, read_bool,
    read_i32, write_bool, write_i32,
};

const SUB_HEADER_LEN: usize = INT_SIZE + BOOL_SIZE + INT_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultiOp {
    Create(Create),
    Delete(Delete),
    SetData(SetData),
    Check(Check),
}

impl MultiOp {
    pub fn opcode(&self) -> OpCode {
        match self {
            Self::Create(op) => op.opcode(),
            Self::Delete(op) => op.opcode(),
            Self::SetData(op) => op.opcode(),
            Self::Check(op) => op.opcode(),
        }
    }

    fn max_encoded_size(&self, root: &str) -> usize {
        match self {
            Self::Create(op) => op.max_encoded_size(root),
            Self::Delete(op) => op.max_encoded_size(root),
            Self::SetData(op) => op.max_encoded_size(root),
            Self::Check(op) => op.max_encoded_size(root),
        }
    }

    fn write_body(&self, buf: &mut BytesMut, root: &str) -> usize {
        match self {
            Self::Create(op) => op.write_body(buf, root),
            Self::Delete(op) => op.write_body(buf, root),
            Self::SetData(op) => op.write_body(buf, root),
            Self::Check(op) => op.write_body(buf, root),
        }
    }

    fn read_result(&self, reply: &Reply, root: &str) -> Result<(OpResult, usize)> {
        Ok(match self {
            Self::Create(op) => {
                let (created, size) = op.read_body(reply, root)?;
                (OpResult::Create(created), size)
            }
            Self::Delete(op) => {
                let ((), size) = op.read_body(reply, root)?;
                (OpResult::Delete, size)
            }
            Self::SetData(op) => {
                let (stat, size) = op.read_body(reply, root)?;
                (OpResult::SetData(stat), size)
            }
            Self::Check(op) => {
                let ((), size) = op.read_body(reply, root)?;
                (OpResult::Check, size)
            }
        })
    }
}

impl From<Create> for MultiOp {
    fn from(op: Create) -> Self {
        Self::Create(op)
    }
}

impl From<Delete> for MultiOp {
    fn from(op: Delete) -> Self {
        Self::Delete(op)
    }
}

impl From<SetData> for MultiOp {
    fn from(op: SetData) -> Self {
        Self::SetData(op)
    }
}

impl From<Check> for MultiOp {
    fn from(op: Check) -> Self {
        Self::Check(op)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpResult {
    Create(Created),
    Delete,
    SetData(Stat),
    Check,
}

/// Either every sub-result, or the first failure. Never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultiResponse {
    Committed(Vec<OpResult>),
    Failed {
        status: Status,
        index: usize,
        op: MultiOp,
    },
}

impl MultiResponse {
    pub fn has_error(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Multi {
    pub ops: Vec<MultiOp>,
}

impl Multi {
    pub fn new<I, O>(ops: I) -> Self
    where
        I: IntoIterator<Item = O>,
        O: Into<MultiOp>,
    {
        Self {
            ops: ops.into_iter().map(Into::into).collect(),
        }
    }

    pub fn push(&mut self, op: impl Into<MultiOp>) {
        self.ops.push(op.into());
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubHeader {
    pub op_type: i32,
    pub done: bool,
    pub err: i32,
}

impl SubHeader {
    pub const TERMINATOR: Self = Self {
        op_type: -1,
        done: true,
        err: -1,
    };

    pub fn encode(&self, buf: &mut BytesMut) -> usize {
        write_i32(buf, self.op_type) + write_bool(buf, self.done) + write_i32(buf, self.err)
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            op_type: read_i32(buf)?,
            done: read_bool(buf)?,
            err: read_i32(buf)?,
        })
    }
}

impl Operation for Multi {
    type Output = MultiResponse;

    fn opcode(&self) -> OpCode {
        OpCode::Multi
    }

    fn max_encoded_size(&self, root: &str) -> usize {
        self.ops
            .iter()
            .map(|op| SUB_HEADER_LEN + op.max_encoded_size(root))
            .sum::<usize>()
            + SUB_HEADER_LEN
    }

    fn write_body(&self, buf: &mut BytesMut, root: &str) -> usize {
        let mut size = 0;
        for op in &self.ops {
            size += SubHeader {
                op_type: op.opcode().code(),
                done: false,
                err: -1,
            }
            .encode(buf);
            size += op.write_body(buf, root);
        }
        size + SubHeader::TERMINATOR.encode(buf)
    }

    fn read_body(&self, reply: &Reply, root: &str) -> Result<(MultiResponse, usize)> {
        reply.ensure_ok()?;
        let mut body = reply.body.clone();
        let before = body.len();
        let mut results = Vec::with_capacity(self.ops.len());
        let mut failure: Option<(Status, usize)> = None;

        for (index, op) in self.ops.iter().enumerate() {
            let header = SubHeader::decode(&mut body)?;
            if header.done {
                return Err(Error::MultiMismatch(format!(
                    "reply ended after {index} of {} results",
                    self.ops.len()
                )));
            }
            if header.op_type == OpCode::Error.code() {
                let status = Status::from_code(read_i32(&mut body)?);
                if failure.is_none() && !status.is_ok() {
                    failure = Some((status, index));
                }
                continue;
            }
            if header.op_type != op.opcode().code() {
                return Err(Error::MultiMismatch(format!(
                    "result {index} has type {} for a {} request",
                    header.op_type,
                    op.opcode().name()
                )));
            }
            // Let the sub-operation's own codec read its entry.
            let entry = Reply {
                header: ReplyHeader {
                    status: Status::Ok,
                    ..reply.header
                },
                body: body.clone(),
            };
            let (result, size) = op.read_result(&entry, root)?;
            if size > body.len() {
                return Err(Error::Incomplete);
            }
            let _ = body.split_to(size);
            results.push(result);
        }

        let terminator = SubHeader::decode(&mut body)?;
        if !terminator.done {
            return Err(Error::MultiMismatch(format!(
                "expected terminator after {} results",
                self.ops.len()
            )));
        }

        let response = match failure {
            Some((status, index)) => MultiResponse::Failed {
                status,
                index,
                op: self.ops[index].clone(),
            },
            None => MultiResponse::Committed(results),
        };
        Ok((response, consumed(before, &body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{CreateMode, decode_reply, encode_request};
    use crate::write_string;

    fn create(path: &str) -> MultiOp {
        Create::new(path, Bytes::new(), CreateMode::Persistent)
            .expect("op")
            .into()
    }

    fn reply(body: BytesMut) -> Reply {
        Reply {
            header: ReplyHeader {
                xid: 4,
                zxid: 100,
                status: Status::Ok,
            },
            body: body.freeze(),
        }
    }

    fn error_entry(buf: &mut BytesMut, status: Status) {
        SubHeader {
            op_type: -1,
            done: false,
            err: status.code(),
        }
        .encode(buf);
        write_i32(buf, status.code());
    }

    #[test]
    fn request_ends_with_terminator() {
        let multi = Multi::new([create("/c"), create("/c/d")]);
        let mut buf = BytesMut::new();
        encode_request(&multi, 2, "/", &mut buf);
        let tail = &buf[buf.len() - SUB_HEADER_LEN..];
        assert_eq!(tail, &[0xff, 0xff, 0xff, 0xff, 1, 0xff, 0xff, 0xff, 0xff]);
        // first sub-header: create, not done, err -1
        assert_eq!(&buf[12..21], &[0, 0, 0, 1, 0, 0xff, 0xff, 0xff, 0xff]);
        assert!(buf.len() - 4 <= crate::RequestHeader::LEN + multi.max_encoded_size("/"));
    }

    #[test]
    fn committed_batch_returns_every_result() {
        let multi = Multi::new([
            create("/c"),
            MultiOp::Delete(Delete::new("/old", -1).expect("op")),
        ]);
        let mut body = BytesMut::new();
        SubHeader {
            op_type: OpCode::Create.code(),
            done: false,
            err: 0,
        }
        .encode(&mut body);
        write_string(&mut body, "/c");
        SubHeader {
            op_type: OpCode::Delete.code(),
            done: false,
            err: 0,
        }
        .encode(&mut body);
        SubHeader::TERMINATOR.encode(&mut body);

        let response = decode_reply(&multi, &reply(body), "/").expect("decode");
        assert_eq!(
            response,
            MultiResponse::Committed(vec![
                OpResult::Create(Created {
                    path: "/c".to_string(),
                    stat: None
                }),
                OpResult::Delete,
            ])
        );
    }

    #[test]
    fn first_error_wins_and_frame_is_consumed() {
        let multi = Multi::new([create("/c"), create("/c/d/missing"), create("/c/d")]);
        let mut body = BytesMut::new();
        error_entry(&mut body, Status::Ok);
        error_entry(&mut body, Status::NoNode);
        error_entry(&mut body, Status::RuntimeInconsistency);
        SubHeader::TERMINATOR.encode(&mut body);

        let response = decode_reply(&multi, &reply(body), "/").expect("decode");
        match response {
            MultiResponse::Failed { status, index, op } => {
                assert_eq!(status, Status::NoNode);
                assert_eq!(index, 1);
                assert_eq!(op, create("/c/d/missing"));
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn short_reply_is_a_mismatch() {
        let multi = Multi::new([create("/a"), create("/b")]);
        let mut body = BytesMut::new();
        error_entry(&mut body, Status::NodeExists);
        SubHeader::TERMINATOR.encode(&mut body);
        let err = decode_reply(&multi, &reply(body), "/").expect_err("mismatch");
        assert!(matches!(err, Error::MultiMismatch(_)));
    }
}
