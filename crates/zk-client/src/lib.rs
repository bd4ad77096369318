// Client for the ZooKeeper coordination protocol.
//
// One `Session` owns one TCP connection at a time and multiplexes every
// caller's requests, the server's pushed watch notifications and keepalive
// pings over it. `Keeper` exposes a session bound to one host;
// `FailoverClient` moves the same session across the configured hosts when
// a member goes away.
//
// Failure classification lives in the session, retries live only in the
// failover layer:
// - no session yet, socket failed            -> NoConnection (retryable)
// - session still within its timeout         -> ConnectionLost (retryable)
// - server refused to resume / timeout spent -> SessionExpired (fatal)
//
// Watches survive reconnects: every handshake replays them with SetWatches
// relative to the last transaction id seen, so nothing that changed while
// disconnected is missed.
#[macro_use]
mod macros;

mod api;
pub mod config;
mod error;
mod failover;
mod keeper;
mod session;
mod watch;

pub use api::ZooKeeper;
pub use config::{AuthInfo, ClientConfig, Host};
pub use error::{Error, HostAttempt, Result};
pub use failover::FailoverClient;
pub use keeper::Keeper;
pub use session::{Session, SessionState, Watcher};
pub use watch::{WatchCallback, watch_channel};

pub use zk_wire::ops::{ANY_VERSION, Children, CreateMode, Created, NodeAcl, NodeData};
pub use zk_wire::{
    Acl, EventType, KeeperState, Multi, MultiOp, MultiResponse, OpResult, Stat, Status, WatchKind,
    WatchedEvent,
};
