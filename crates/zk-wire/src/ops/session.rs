// Session-level requests: auth, ping, close.
use bytes::{Bytes, BytesMut};

use super::Operation;
use crate::{INT_SIZE, LENGTH_SIZE, OpCode, Reply, Result, string_size, write_bytes, write_i32, write_string, xid};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Auth {
    pub scheme: String,
    pub credentials: Bytes,
}

impl Auth {
    pub fn new(scheme: impl Into<String>, credentials: impl Into<Bytes>) -> Self {
        Self {
            scheme: scheme.into(),
            credentials: credentials.into(),
        }
    }
}

impl Operation for Auth {
    type Output = ();

    fn opcode(&self) -> OpCode {
        OpCode::Auth
    }

    fn max_encoded_size(&self, _root: &str) -> usize {
        INT_SIZE + string_size(&self.scheme) + LENGTH_SIZE + self.credentials.len()
    }

    fn write_body(&self, buf: &mut BytesMut, _root: &str) -> usize {
        // auth type is always 0
        write_i32(buf, 0) + write_string(buf, &self.scheme) + write_bytes(buf, &self.credentials)
    }

    fn read_body(&self, reply: &Reply, _root: &str) -> Result<((), usize)> {
        reply.ensure_ok()?;
        Ok(((), 0))
    }

    fn reserved_xid(&self) -> Option<i32> {
        Some(xid::AUTH)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ping;

impl Operation for Ping {
    type Output = ();

    fn opcode(&self) -> OpCode {
        OpCode::Ping
    }

    fn max_encoded_size(&self, _root: &str) -> usize {
        0
    }

    fn write_body(&self, _buf: &mut BytesMut, _root: &str) -> usize {
        0
    }

    fn read_body(&self, reply: &Reply, _root: &str) -> Result<((), usize)> {
        reply.ensure_ok()?;
        Ok(((), 0))
    }

    fn reserved_xid(&self) -> Option<i32> {
        Some(xid::PING)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseSession;

impl Operation for CloseSession {
    type Output = ();

    fn opcode(&self) -> OpCode {
        OpCode::CloseSession
    }

    fn max_encoded_size(&self, _root: &str) -> usize {
        0
    }

    fn write_body(&self, _buf: &mut BytesMut, _root: &str) -> usize {
        0
    }

    fn read_body(&self, reply: &Reply, _root: &str) -> Result<((), usize)> {
        reply.ensure_ok()?;
        Ok(((), 0))
    }
}
