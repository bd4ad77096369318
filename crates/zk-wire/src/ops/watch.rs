// Watch management requests. Paths here are already absolute: they come
// out of the client's watch registry, which stores server paths.
use bytes::BytesMut;

use super::{Operation, validated};
use crate::path;
use crate::{
    INT_SIZE, LONG_SIZE, OpCode, Reply, Result, WatchKind, string_size, write_bytes, write_i32,
    write_i64, write_strings, xid,
};

/// Registers a persistent, optionally recursive, watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddWatch {
    pub path: String,
    pub recursive: bool,
}

impl AddWatch {
    pub fn new(path: impl Into<String>, recursive: bool) -> Result<Self> {
        Ok(Self {
            path: validated(path)?,
            recursive,
        })
    }

    pub fn kind(&self) -> WatchKind {
        if self.recursive {
            WatchKind::PersistentRecursive
        } else {
            WatchKind::Persistent
        }
    }
}

impl Operation for AddWatch {
    type Output = ();

    fn opcode(&self) -> OpCode {
        OpCode::AddWatch
    }

    fn max_encoded_size(&self, root: &str) -> usize {
        path::max_size(root, &self.path) + INT_SIZE
    }

    fn write_body(&self, buf: &mut BytesMut, root: &str) -> usize {
        write_bytes(buf, path::normalize(root, &self.path).as_bytes())
            + write_i32(buf, self.recursive as i32)
    }

    fn read_body(&self, reply: &Reply, _root: &str) -> Result<((), usize)> {
        reply.ensure_ok()?;
        Ok(((), 0))
    }

    fn watch(&self, root: &str) -> Option<(String, WatchKind)> {
        Some((path::normalize(root, &self.path), self.kind()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveWatches {
    /// Absolute server path.
    pub path: String,
    pub kind: WatchKind,
}

impl RemoveWatches {
    pub fn new(path: impl Into<String>, kind: WatchKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

impl Operation for RemoveWatches {
    type Output = ();

    fn opcode(&self) -> OpCode {
        OpCode::RemoveWatches
    }

    fn max_encoded_size(&self, _root: &str) -> usize {
        string_size(&self.path) + INT_SIZE
    }

    fn write_body(&self, buf: &mut BytesMut, _root: &str) -> usize {
        write_bytes(buf, self.path.as_bytes()) + write_i32(buf, self.kind.remove_code())
    }

    fn read_body(&self, reply: &Reply, _root: &str) -> Result<((), usize)> {
        reply.ensure_ok()?;
        Ok(((), 0))
    }
}

/// Re-arms every registered watch after a reconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetWatches {
    pub relative_zxid: i64,
    pub data: Vec<String>,
    pub exist: Vec<String>,
    pub child: Vec<String>,
    pub persistent: Vec<String>,
    pub persistent_recursive: Vec<String>,
}

impl SetWatches {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
            && self.exist.is_empty()
            && self.child.is_empty()
            && self.persistent.is_empty()
            && self.persistent_recursive.is_empty()
    }

    fn has_persistent(&self) -> bool {
        !self.persistent.is_empty() || !self.persistent_recursive.is_empty()
    }

    pub fn push(&mut self, path: String, kind: WatchKind) {
        let bucket = match kind {
            WatchKind::Data => &mut self.data,
            WatchKind::Exists => &mut self.exist,
            WatchKind::Children => &mut self.child,
            WatchKind::Persistent => &mut self.persistent,
            WatchKind::PersistentRecursive => &mut self.persistent_recursive,
        };
        if !bucket.contains(&path) {
            bucket.push(path);
        }
    }
}

fn paths_size(paths: &[String]) -> usize {
    INT_SIZE + paths.iter().map(|path| string_size(path)).sum::<usize>()
}

impl Operation for SetWatches {
    type Output = ();

    fn opcode(&self) -> OpCode {
        if self.has_persistent() {
            OpCode::SetWatches2
        } else {
            OpCode::SetWatches
        }
    }

    fn max_encoded_size(&self, _root: &str) -> usize {
        LONG_SIZE
            + paths_size(&self.data)
            + paths_size(&self.exist)
            + paths_size(&self.child)
            + paths_size(&self.persistent)
            + paths_size(&self.persistent_recursive)
    }

    fn write_body(&self, buf: &mut BytesMut, _root: &str) -> usize {
        let mut size = write_i64(buf, self.relative_zxid);
        size += write_strings(buf, self.data.iter().map(String::as_str));
        size += write_strings(buf, self.exist.iter().map(String::as_str));
        size += write_strings(buf, self.child.iter().map(String::as_str));
        if self.has_persistent() {
            size += write_strings(buf, self.persistent.iter().map(String::as_str));
            size += write_strings(buf, self.persistent_recursive.iter().map(String::as_str));
        }
        size
    }

    fn read_body(&self, reply: &Reply, _root: &str) -> Result<((), usize)> {
        reply.ensure_ok()?;
        Ok(((), 0))
    }

    fn reserved_xid(&self) -> Option<i32> {
        Some(xid::SET_WATCHES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::encode_request;

    #[test]
    fn set_watches_uses_v1_without_persistent_paths() {
        let mut watches = SetWatches {
            relative_zxid: 0x10,
            ..Default::default()
        };
        watches.push("/d".to_string(), WatchKind::Data);
        watches.push("/d".to_string(), WatchKind::Data);
        watches.push("/c".to_string(), WatchKind::Children);
        assert_eq!(watches.opcode(), OpCode::SetWatches);
        assert_eq!(watches.data.len(), 1);

        let mut buf = BytesMut::new();
        encode_request(&watches, xid::SET_WATCHES, "/", &mut buf);
        let expected: &[u8] = &[
            0xff, 0xff, 0xff, 0xf7, 0, 0, 0, 101, // xid -9, opcode
            0, 0, 0, 0, 0, 0, 0, 0x10, // relative zxid
            0, 0, 0, 1, 0, 0, 0, 2, b'/', b'd', // data
            0, 0, 0, 0, // exist
            0, 0, 0, 1, 0, 0, 0, 2, b'/', b'c', // child
        ];
        assert_eq!(&buf[4..], expected);
    }

    #[test]
    fn set_watches2_appends_persistent_vectors() {
        let mut watches = SetWatches::default();
        watches.push("/r".to_string(), WatchKind::PersistentRecursive);
        assert_eq!(watches.opcode(), OpCode::SetWatches2);
        let mut buf = BytesMut::new();
        let size = watches.write_body(&mut buf, "/");
        assert_eq!(size, 8 + 4 * 3 + 4 + 4 + 4 + 2);
        assert_eq!(size, watches.max_encoded_size("/"));
    }

    #[test]
    fn add_watch_mode_and_remove_type() {
        let add = AddWatch::new("/p", true).expect("op");
        let mut buf = BytesMut::new();
        add.write_body(&mut buf, "/root");
        assert_eq!(&buf[..], &[0, 0, 0, 7, b'/', b'r', b'o', b'o', b't', b'/', b'p', 0, 0, 0, 1]);
        assert_eq!(add.watch("/root"), Some(("/root/p".to_string(), WatchKind::PersistentRecursive)));

        let remove = RemoveWatches::new("/root/p", WatchKind::Data);
        let mut buf = BytesMut::new();
        remove.write_body(&mut buf, "/root");
        assert_eq!(&buf[buf.len() - 4..], &[0, 0, 0, 2]);
    }
}
