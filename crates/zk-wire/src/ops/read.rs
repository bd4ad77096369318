// Read-side node operations, several of which can leave a watch behind.
use bytes::{Bytes, BytesMut};
use serde::Serialize;

use super::{Operation, consumed, validated};
use crate::acl::read_acls;
use crate::path::{self, strip_root};
use crate::{
    Acl, BOOL_SIZE, OpCode, Reply, Result, Stat, Status, WatchKind, read_length_prefixed,
    read_string, read_strings, write_bool, write_bytes,
};

fn write_path(buf: &mut BytesMut, root: &str, node: &str) -> usize {
    write_bytes(buf, path::normalize(root, node).as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exists {
    pub path: String,
    pub watch: bool,
}

impl Exists {
    pub fn new(path: impl Into<String>) -> Result<Self> {
        Ok(Self {
            path: validated(path)?,
            watch: false,
        })
    }

    pub fn watched(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }
}

impl Operation for Exists {
    /// `None` when the node does not exist.
    type Output = Option<Stat>;

    fn opcode(&self) -> OpCode {
        OpCode::Exists
    }

    fn max_encoded_size(&self, root: &str) -> usize {
        path::max_size(root, &self.path) + BOOL_SIZE
    }

    fn write_body(&self, buf: &mut BytesMut, root: &str) -> usize {
        write_path(buf, root, &self.path) + write_bool(buf, self.watch)
    }

    fn read_body(&self, reply: &Reply, _root: &str) -> Result<(Option<Stat>, usize)> {
        if reply.status() == Status::NoNode {
            return Ok((None, 0));
        }
        reply.ensure_ok()?;
        let mut body = reply.body.clone();
        Ok((Some(Stat::decode(&mut body)?), Stat::LEN))
    }

    fn watch(&self, root: &str) -> Option<(String, WatchKind)> {
        self.watch
            .then(|| (path::normalize(root, &self.path), WatchKind::Exists))
    }

    /// The server arms an exists watch on a missing node too.
    fn watch_established(&self, status: Status) -> bool {
        matches!(status, Status::Ok | Status::NoNode)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeData {
    pub data: Bytes,
    pub stat: Stat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetData {
    pub path: String,
    pub watch: bool,
}

impl GetData {
    pub fn new(path: impl Into<String>) -> Result<Self> {
        Ok(Self {
            path: validated(path)?,
            watch: false,
        })
    }

    pub fn watched(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }
}

impl Operation for GetData {
    type Output = NodeData;

    fn opcode(&self) -> OpCode {
        OpCode::GetData
    }

    fn max_encoded_size(&self, root: &str) -> usize {
        path::max_size(root, &self.path) + BOOL_SIZE
    }

    fn write_body(&self, buf: &mut BytesMut, root: &str) -> usize {
        write_path(buf, root, &self.path) + write_bool(buf, self.watch)
    }

    fn read_body(&self, reply: &Reply, _root: &str) -> Result<(NodeData, usize)> {
        reply.ensure_ok()?;
        let mut body = reply.body.clone();
        let before = body.len();
        let data = read_length_prefixed(&mut body)?;
        let stat = Stat::decode(&mut body)?;
        Ok((NodeData { data, stat }, consumed(before, &body)))
    }

    fn watch(&self, root: &str) -> Option<(String, WatchKind)> {
        self.watch
            .then(|| (path::normalize(root, &self.path), WatchKind::Data))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Children {
    pub children: Vec<String>,
    pub stat: Option<Stat>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetChildren {
    pub path: String,
    pub watch: bool,
    pub with_stat: bool,
}

impl GetChildren {
    pub fn new(path: impl Into<String>) -> Result<Self> {
        Ok(Self {
            path: validated(path)?,
            watch: false,
            with_stat: false,
        })
    }

    pub fn watched(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn with_stat(mut self) -> Self {
        self.with_stat = true;
        self
    }
}

impl Operation for GetChildren {
    type Output = Children;

    fn opcode(&self) -> OpCode {
        if self.with_stat {
            OpCode::GetChildren2
        } else {
            OpCode::GetChildren
        }
    }

    fn max_encoded_size(&self, root: &str) -> usize {
        path::max_size(root, &self.path) + BOOL_SIZE
    }

    fn write_body(&self, buf: &mut BytesMut, root: &str) -> usize {
        write_path(buf, root, &self.path) + write_bool(buf, self.watch)
    }

    fn read_body(&self, reply: &Reply, _root: &str) -> Result<(Children, usize)> {
        reply.ensure_ok()?;
        let mut body = reply.body.clone();
        let before = body.len();
        let children = read_strings(&mut body)?;
        let stat = if self.with_stat {
            Some(Stat::decode(&mut body)?)
        } else {
            None
        };
        Ok((Children { children, stat }, consumed(before, &body)))
    }

    fn watch(&self, root: &str) -> Option<(String, WatchKind)> {
        self.watch
            .then(|| (path::normalize(root, &self.path), WatchKind::Children))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeAcl {
    pub acl: Vec<Acl>,
    pub stat: Stat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetAcl {
    pub path: String,
}

impl GetAcl {
    pub fn new(path: impl Into<String>) -> Result<Self> {
        Ok(Self {
            path: validated(path)?,
        })
    }
}

impl Operation for GetAcl {
    type Output = NodeAcl;

    fn opcode(&self) -> OpCode {
        OpCode::GetAcl
    }

    fn max_encoded_size(&self, root: &str) -> usize {
        path::max_size(root, &self.path)
    }

    fn write_body(&self, buf: &mut BytesMut, root: &str) -> usize {
        write_path(buf, root, &self.path)
    }

    fn read_body(&self, reply: &Reply, _root: &str) -> Result<(NodeAcl, usize)> {
        reply.ensure_ok()?;
        let mut body = reply.body.clone();
        let before = body.len();
        let acl = read_acls(&mut body)?;
        let stat = Stat::decode(&mut body)?;
        Ok((NodeAcl { acl, stat }, consumed(before, &body)))
    }
}

/// Ephemeral nodes owned by this session whose path starts with `prefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetEphemerals {
    pub prefix: String,
}

impl GetEphemerals {
    pub fn new(prefix: impl Into<String>) -> Result<Self> {
        Ok(Self {
            prefix: validated(prefix)?,
        })
    }
}

impl Operation for GetEphemerals {
    type Output = Vec<String>;

    fn opcode(&self) -> OpCode {
        OpCode::GetEphemerals
    }

    fn max_encoded_size(&self, root: &str) -> usize {
        path::max_size(root, &self.prefix)
    }

    fn write_body(&self, buf: &mut BytesMut, root: &str) -> usize {
        write_path(buf, root, &self.prefix)
    }

    fn read_body(&self, reply: &Reply, root: &str) -> Result<(Vec<String>, usize)> {
        reply.ensure_ok()?;
        let mut body = reply.body.clone();
        let before = body.len();
        let paths = read_strings(&mut body)?
            .iter()
            .map(|ephemeral| strip_root(root, ephemeral).to_string())
            .collect();
        Ok((paths, consumed(before, &body)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPath {
    pub path: String,
}

impl SyncPath {
    pub fn new(path: impl Into<String>) -> Result<Self> {
        Ok(Self {
            path: validated(path)?,
        })
    }
}

impl Operation for SyncPath {
    type Output = String;

    fn opcode(&self) -> OpCode {
        OpCode::Sync
    }

    fn max_encoded_size(&self, root: &str) -> usize {
        path::max_size(root, &self.path)
    }

    fn write_body(&self, buf: &mut BytesMut, root: &str) -> usize {
        write_path(buf, root, &self.path)
    }

    fn read_body(&self, reply: &Reply, root: &str) -> Result<(String, usize)> {
        reply.ensure_ok()?;
        let mut body = reply.body.clone();
        let before = body.len();
        let synced = read_string(&mut body)?;
        Ok((strip_root(root, &synced).to_string(), consumed(before, &body)))
    }
}
