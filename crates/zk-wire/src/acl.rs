// Access control entries. The client passes them through without
// interpreting permissions.
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{Result, read_i32, read_string, string_size, write_i32, write_string};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Acl {
    pub perms: i32,
    pub scheme: String,
    pub id: String,
}

impl Acl {
    pub const READ: i32 = 1;
    pub const WRITE: i32 = 1 << 1;
    pub const CREATE: i32 = 1 << 2;
    pub const DELETE: i32 = 1 << 3;
    pub const ADMIN: i32 = 1 << 4;
    pub const ALL: i32 = Self::READ | Self::WRITE | Self::CREATE | Self::DELETE | Self::ADMIN;

    pub fn new(perms: i32, scheme: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            perms,
            scheme: scheme.into(),
            id: id.into(),
        }
    }

    /// `world:anyone` with every permission.
    pub fn open_unsafe() -> Vec<Acl> {
        vec![Self::new(Self::ALL, "world", "anyone")]
    }

    pub fn read_unsafe() -> Vec<Acl> {
        vec![Self::new(Self::READ, "world", "anyone")]
    }

    pub fn encoded_size(&self) -> usize {
        crate::INT_SIZE + string_size(&self.scheme) + string_size(&self.id)
    }
}

pub fn write_acls(buf: &mut BytesMut, acls: &[Acl]) -> usize {
    let mut size = write_i32(buf, acls.len() as i32);
    for acl in acls {
        size += write_i32(buf, acl.perms);
        size += write_string(buf, &acl.scheme);
        size += write_string(buf, &acl.id);
    }
    size
}

pub fn read_acls(buf: &mut Bytes) -> Result<Vec<Acl>> {
    let count = read_i32(buf)?.max(0) as usize;
    let mut acls = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        acls.push(Acl {
            perms: read_i32(buf)?,
            scheme: read_string(buf)?,
            id: read_string(buf)?,
        });
    }
    Ok(acls)
}

pub fn acls_size(acls: &[Acl]) -> usize {
    crate::INT_SIZE + acls.iter().map(Acl::encoded_size).sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_world_anyone() {
        let mut buf = BytesMut::new();
        let size = write_acls(&mut buf, &Acl::open_unsafe());
        assert_eq!(size, buf.len());
        assert_eq!(size, acls_size(&Acl::open_unsafe()));
        assert_eq!(&buf[..8], &[0, 0, 0, 1, 0, 0, 0, 31]);
        let mut bytes = buf.freeze();
        assert_eq!(read_acls(&mut bytes).expect("decode"), Acl::open_unsafe());
    }
}
