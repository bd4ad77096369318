// Write-side node operations.
use bytes::{Bytes, BytesMut};

use super::{Operation, consumed, validated};
use crate::acl::{acls_size, write_acls};
use crate::path::{self, strip_root};
use crate::{
    Acl, INT_SIZE, LENGTH_SIZE, LONG_SIZE, OpCode, Reply, Result, Stat, read_string, write_bytes,
    write_i32, write_i64,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
    PersistentSequential,
    EphemeralSequential,
    Container,
    PersistentWithTtl,
    PersistentSequentialWithTtl,
}

impl CreateMode {
    pub fn flags(self) -> i32 {
        match self {
            Self::Persistent => 0,
            Self::Ephemeral => 1,
            Self::PersistentSequential => 2,
            Self::EphemeralSequential => 3,
            Self::Container => 4,
            Self::PersistentWithTtl => 5,
            Self::PersistentSequentialWithTtl => 6,
        }
    }

    pub fn from_flags(flags: i32) -> Option<Self> {
        Some(match flags {
            0 => Self::Persistent,
            1 => Self::Ephemeral,
            2 => Self::PersistentSequential,
            3 => Self::EphemeralSequential,
            4 => Self::Container,
            5 => Self::PersistentWithTtl,
            6 => Self::PersistentSequentialWithTtl,
            _ => return None,
        })
    }

    pub fn is_ephemeral(self) -> bool {
        matches!(self, Self::Ephemeral | Self::EphemeralSequential)
    }

    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            Self::PersistentSequential | Self::EphemeralSequential | Self::PersistentSequentialWithTtl
        )
    }

    pub fn is_ttl(self) -> bool {
        matches!(self, Self::PersistentWithTtl | Self::PersistentSequentialWithTtl)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    /// Path of the new node, with the sequence suffix when one was assigned.
    pub path: String,
    pub stat: Option<Stat>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Create {
    pub path: String,
    pub data: Bytes,
    pub acl: Vec<Acl>,
    pub mode: CreateMode,
    pub ttl_ms: Option<i64>,
    pub with_stat: bool,
}

impl Create {
    pub fn new(path: impl Into<String>, data: impl Into<Bytes>, mode: CreateMode) -> Result<Self> {
        Ok(Self {
            path: validated(path)?,
            data: data.into(),
            acl: Acl::open_unsafe(),
            mode,
            ttl_ms: None,
            with_stat: false,
        })
    }

    pub fn acl(mut self, acl: Vec<Acl>) -> Self {
        self.acl = acl;
        self
    }

    /// Asks the server to return the new node's stat as well.
    pub fn with_stat(mut self) -> Self {
        self.with_stat = true;
        self
    }

    pub fn ttl(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }
}

impl Operation for Create {
    type Output = Created;

    fn opcode(&self) -> OpCode {
        if self.mode == CreateMode::Container {
            OpCode::CreateContainer
        } else if self.mode.is_ttl() {
            OpCode::CreateTtl
        } else if self.with_stat {
            OpCode::CreateWithStat
        } else {
            OpCode::Create
        }
    }

    fn max_encoded_size(&self, root: &str) -> usize {
        path::max_size(root, &self.path)
            + LENGTH_SIZE
            + self.data.len()
            + acls_size(&self.acl)
            + INT_SIZE
            + LONG_SIZE
    }

    fn write_body(&self, buf: &mut BytesMut, root: &str) -> usize {
        let mut size = write_bytes(buf, path::normalize(root, &self.path).as_bytes());
        size += write_bytes(buf, &self.data);
        size += write_acls(buf, &self.acl);
        size += write_i32(buf, self.mode.flags());
        if self.mode.is_ttl() {
            size += write_i64(buf, self.ttl_ms.unwrap_or(0));
        }
        size
    }

    fn read_body(&self, reply: &Reply, root: &str) -> Result<(Created, usize)> {
        reply.ensure_ok()?;
        let mut body = reply.body.clone();
        let before = body.len();
        let created = read_string(&mut body)?;
        let stat = match self.opcode() {
            OpCode::Create => None,
            _ => Some(Stat::decode(&mut body)?),
        };
        let created = Created {
            path: strip_root(root, &created).to_string(),
            stat,
        };
        Ok((created, consumed(before, &body)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    pub path: String,
    pub version: i32,
}

impl Delete {
    pub fn new(path: impl Into<String>, version: i32) -> Result<Self> {
        Ok(Self {
            path: validated(path)?,
            version,
        })
    }
}

impl Operation for Delete {
    type Output = ();

    fn opcode(&self) -> OpCode {
        OpCode::Delete
    }

    fn max_encoded_size(&self, root: &str) -> usize {
        path::max_size(root, &self.path) + INT_SIZE
    }

    fn write_body(&self, buf: &mut BytesMut, root: &str) -> usize {
        write_bytes(buf, path::normalize(root, &self.path).as_bytes()) + write_i32(buf, self.version)
    }

    fn read_body(&self, reply: &Reply, _root: &str) -> Result<((), usize)> {
        reply.ensure_ok()?;
        Ok(((), 0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetData {
    pub path: String,
    pub data: Bytes,
    pub version: i32,
}

impl SetData {
    pub fn new(path: impl Into<String>, data: impl Into<Bytes>, version: i32) -> Result<Self> {
        Ok(Self {
            path: validated(path)?,
            data: data.into(),
            version,
        })
    }
}

impl Operation for SetData {
    type Output = Stat;

    fn opcode(&self) -> OpCode {
        OpCode::SetData
    }

    fn max_encoded_size(&self, root: &str) -> usize {
        path::max_size(root, &self.path) + LENGTH_SIZE + self.data.len() + INT_SIZE
    }

    fn write_body(&self, buf: &mut BytesMut, root: &str) -> usize {
        write_bytes(buf, path::normalize(root, &self.path).as_bytes())
            + write_bytes(buf, &self.data)
            + write_i32(buf, self.version)
    }

    fn read_body(&self, reply: &Reply, _root: &str) -> Result<(Stat, usize)> {
        reply.ensure_ok()?;
        let mut body = reply.body.clone();
        let stat = Stat::decode(&mut body)?;
        Ok((stat, Stat::LEN))
    }
}

/// Version guard, only meaningful inside a multi request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub path: String,
    pub version: i32,
}

impl Check {
    pub fn new(path: impl Into<String>, version: i32) -> Result<Self> {
        Ok(Self {
            path: validated(path)?,
            version,
        })
    }
}

impl Operation for Check {
    type Output = ();

    fn opcode(&self) -> OpCode {
        OpCode::Check
    }

    fn max_encoded_size(&self, root: &str) -> usize {
        path::max_size(root, &self.path) + INT_SIZE
    }

    fn write_body(&self, buf: &mut BytesMut, root: &str) -> usize {
        write_bytes(buf, path::normalize(root, &self.path).as_bytes()) + write_i32(buf, self.version)
    }

    fn read_body(&self, reply: &Reply, _root: &str) -> Result<((), usize)> {
        reply.ensure_ok()?;
        Ok(((), 0))
    }
}
