// Watch notifications and the kinds of subscription that receive them.
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{Reply, Result, Status, read_i32, read_string, write_i32, write_string, xid};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    None,
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
    DataWatchRemoved,
    ChildWatchRemoved,
    PersistentWatchRemoved,
    Unknown(i32),
}

impl EventType {
    pub fn from_code(code: i32) -> Self {
        match code {
            -1 => Self::None,
            1 => Self::NodeCreated,
            2 => Self::NodeDeleted,
            3 => Self::NodeDataChanged,
            4 => Self::NodeChildrenChanged,
            5 => Self::DataWatchRemoved,
            6 => Self::ChildWatchRemoved,
            7 => Self::PersistentWatchRemoved,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::None => -1,
            Self::NodeCreated => 1,
            Self::NodeDeleted => 2,
            Self::NodeDataChanged => 3,
            Self::NodeChildrenChanged => 4,
            Self::DataWatchRemoved => 5,
            Self::ChildWatchRemoved => 6,
            Self::PersistentWatchRemoved => 7,
            Self::Unknown(code) => code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeeperState {
    Disconnected,
    SyncConnected,
    AuthFailed,
    ConnectedReadOnly,
    Expired,
    Closed,
    Unknown(i32),
}

impl KeeperState {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Disconnected,
            3 => Self::SyncConnected,
            4 => Self::AuthFailed,
            5 => Self::ConnectedReadOnly,
            -112 => Self::Expired,
            7 => Self::Closed,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Disconnected => 0,
            Self::SyncConnected => 3,
            Self::AuthFailed => 4,
            Self::ConnectedReadOnly => 5,
            Self::Expired => -112,
            Self::Closed => 7,
            Self::Unknown(code) => code,
        }
    }
}

/// Kind of subscription a watch was registered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatchKind {
    Children,
    Data,
    Exists,
    Persistent,
    PersistentRecursive,
}

impl WatchKind {
    /// Whether a subscription of this kind should see events of `event_type`.
    pub fn is_handling(self, event_type: EventType) -> bool {
        match self {
            Self::Children => event_type == EventType::NodeChildrenChanged,
            Self::Data => event_type == EventType::NodeDataChanged,
            Self::Exists | Self::Persistent | Self::PersistentRecursive => true,
        }
    }

    pub fn is_persistent(self) -> bool {
        matches!(self, Self::Persistent | Self::PersistentRecursive)
    }

    pub fn is_recursive(self) -> bool {
        self == Self::PersistentRecursive
    }

    /// Watcher type understood by the remove-watches request.
    pub fn remove_code(self) -> i32 {
        match self {
            Self::Children => 1,
            Self::Data => 2,
            Self::Exists | Self::Persistent | Self::PersistentRecursive => 3,
        }
    }
}

/// A notification pushed by the server, or synthesized on state changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedEvent {
    pub event_type: EventType,
    pub state: KeeperState,
    pub path: String,
    /// Transaction that triggered the event; zero for synthetic events.
    pub zxid: i64,
    pub status: Status,
}

impl WatchedEvent {
    /// Synthetic event delivered to every watch when the connection changes state.
    pub fn state_change(state: KeeperState) -> Self {
        let status = match state {
            KeeperState::Expired => Status::SessionExpired,
            KeeperState::SyncConnected | KeeperState::ConnectedReadOnly => Status::Ok,
            _ => Status::ConnectionLoss,
        };
        Self {
            event_type: EventType::None,
            state,
            path: String::new(),
            zxid: 0,
            status,
        }
    }

    /// Decodes a notification frame (request id `-1`).
    pub fn decode(reply: &Reply) -> Result<Self> {
        let mut body = reply.body.clone();
        let event_type = EventType::from_code(read_i32(&mut body)?);
        let state = KeeperState::from_code(read_i32(&mut body)?);
        let path = read_string(&mut body)?;
        Ok(Self {
            event_type,
            state,
            path,
            zxid: reply.header.zxid,
            status: reply.header.status,
        })
    }

    /// Notification frame body, used by servers and tests.
    pub fn encode_body(&self, buf: &mut BytesMut) {
        write_i32(buf, self.event_type.code());
        write_i32(buf, self.state.code());
        write_string(buf, &self.path);
    }

    pub fn encode_frame(&self) -> bytes::Bytes {
        let mut body = BytesMut::new();
        self.encode_body(&mut body);
        let mut buf = BytesMut::with_capacity(4 + crate::ReplyHeader::LEN + body.len());
        buf.put_i32((crate::ReplyHeader::LEN + body.len()) as i32);
        crate::ReplyHeader {
            xid: xid::NOTIFICATION,
            zxid: self.zxid,
            status: self.status,
        }
        .encode(&mut buf);
        buf.extend_from_slice(&body);
        buf.freeze()
    }
}
