// Per-node metadata returned by reads and writes.
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{Result, read_i32, read_i64};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub czxid: i64,
    pub mzxid: i64,
    pub ctime: i64,
    pub mtime: i64,
    pub version: i32,
    pub cversion: i32,
    pub aversion: i32,
    pub ephemeral_owner: i64,
    pub data_length: i32,
    pub num_children: i32,
    pub pzxid: i64,
}

impl Stat {
    pub const LEN: usize = 68;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i64(self.czxid);
        buf.put_i64(self.mzxid);
        buf.put_i64(self.ctime);
        buf.put_i64(self.mtime);
        buf.put_i32(self.version);
        buf.put_i32(self.cversion);
        buf.put_i32(self.aversion);
        buf.put_i64(self.ephemeral_owner);
        buf.put_i32(self.data_length);
        buf.put_i32(self.num_children);
        buf.put_i64(self.pzxid);
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            czxid: read_i64(buf)?,
            mzxid: read_i64(buf)?,
            ctime: read_i64(buf)?,
            mtime: read_i64(buf)?,
            version: read_i32(buf)?,
            cversion: read_i32(buf)?,
            aversion: read_i32(buf)?,
            ephemeral_owner: read_i64(buf)?,
            data_length: read_i32(buf)?,
            num_children: read_i32(buf)?,
            pzxid: read_i64(buf)?,
        })
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral_owner != 0
    }
}
