// Loopback ensemble: N listeners over one tree and one session table.
use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use zk_transport::{Connection, TcpServer, TransportConfig};
use zk_wire::acl::{read_acls, write_acls};
use zk_wire::handshake::PASSWORD_LEN;
use zk_wire::multi::SubHeader;
use zk_wire::{
    ConnectRequest, ConnectResponse, EventType, KeeperState, OpCode, Reply, ReplyHeader,
    RequestHeader, Status, WatchedEvent, path, read_bool, read_i32, read_i64,
    read_length_prefixed, read_string, read_strings, write_i32, write_string, write_strings, xid,
};

use crate::tree::{Change, Outcome, Tree};

const DEFAULT_TIMEOUT_MS: i32 = 30_000;
const SESSION_BASE: i64 = 0x0100_0000_0000_0000;

#[derive(Debug, Default)]
struct Watches {
    data: HashSet<String>,
    exist: HashSet<String>,
    child: HashSet<String>,
    persistent: HashSet<String>,
    recursive: HashSet<String>,
}

impl Watches {
    /// Whether `change` notifies this session. One-shot watches that match
    /// are consumed.
    fn trigger(&mut self, change: &Change) -> bool {
        let node = change.path.as_str();
        let mut fired = match change.event_type {
            EventType::NodeCreated | EventType::NodeDataChanged => {
                self.data.remove(node) | self.exist.remove(node)
            }
            EventType::NodeDeleted => {
                self.data.remove(node) | self.exist.remove(node) | self.child.remove(node)
            }
            EventType::NodeChildrenChanged => self.child.remove(node),
            _ => false,
        };
        fired |= self.persistent.contains(node);
        if change.event_type != EventType::NodeChildrenChanged {
            fired |= path::ancestors(node).any(|ancestor| self.recursive.contains(ancestor));
        }
        fired
    }

    fn remove(&mut self, node: &str, watcher_type: i32) -> bool {
        match watcher_type {
            1 => self.child.remove(node),
            2 => self.data.remove(node) | self.exist.remove(node),
            _ => {
                self.data.remove(node)
                    | self.exist.remove(node)
                    | self.child.remove(node)
                    | self.persistent.remove(node)
                    | self.recursive.remove(node)
            }
        }
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

struct Attached {
    connection: u64,
    outbound: mpsc::UnboundedSender<Bytes>,
    /// Dropping this closes the connection.
    _evict: oneshot::Sender<()>,
}

struct SessionEntry {
    password: Bytes,
    timeout: Duration,
    last_seen: Instant,
    attached: Option<Attached>,
    watches: Watches,
}

#[derive(Default)]
struct World {
    tree: Tree,
    sessions: HashMap<i64, SessionEntry>,
}

/// Sub-operation of a transaction, parsed before anything is applied.
enum TxnOp {
    Create {
        opcode: OpCode,
        path: String,
        data: Bytes,
        acl: Vec<zk_wire::Acl>,
        flags: i32,
    },
    Delete {
        path: String,
        version: i32,
    },
    SetData {
        path: String,
        data: Bytes,
        version: i32,
    },
    Check {
        path: String,
        version: i32,
    },
}

impl TxnOp {
    fn opcode(&self) -> OpCode {
        match self {
            Self::Create { opcode, .. } => *opcode,
            Self::Delete { .. } => OpCode::Delete,
            Self::SetData { .. } => OpCode::SetData,
            Self::Check { .. } => OpCode::Check,
        }
    }
}

fn marshalled<T>(result: zk_wire::Result<T>) -> Outcome<T> {
    result.map_err(|_| Status::MarshallingError)
}

fn is_ephemeral(flags: i32) -> bool {
    matches!(flags, 1 | 3)
}

fn is_sequential(flags: i32) -> bool {
    matches!(flags, 2 | 3 | 6)
}

fn notification(change: &Change, zxid: i64) -> Bytes {
    WatchedEvent {
        event_type: change.event_type,
        state: KeeperState::SyncConnected,
        path: change.path.clone(),
        zxid,
        status: Status::Ok,
    }
    .encode_frame()
}

fn parse_create(opcode: OpCode, body: &mut Bytes) -> Outcome<TxnOp> {
    let path = marshalled(read_string(body))?;
    let data = marshalled(read_length_prefixed(body))?;
    let acl = marshalled(read_acls(body))?;
    let flags = marshalled(read_i32(body))?;
    if opcode == OpCode::CreateTtl {
        let ttl = marshalled(read_i64(body))?;
        if ttl <= 0 {
            return Err(Status::BadArguments);
        }
    }
    Ok(TxnOp::Create {
        opcode,
        path,
        data,
        acl,
        flags,
    })
}

fn parse_txn_op(opcode: OpCode, body: &mut Bytes) -> Outcome<TxnOp> {
    match opcode {
        OpCode::Create | OpCode::CreateWithStat | OpCode::CreateContainer | OpCode::CreateTtl => {
            parse_create(opcode, body)
        }
        OpCode::Delete => Ok(TxnOp::Delete {
            path: marshalled(read_string(body))?,
            version: marshalled(read_i32(body))?,
        }),
        OpCode::SetData => Ok(TxnOp::SetData {
            path: marshalled(read_string(body))?,
            data: marshalled(read_length_prefixed(body))?,
            version: marshalled(read_i32(body))?,
        }),
        OpCode::Check => Ok(TxnOp::Check {
            path: marshalled(read_string(body))?,
            version: marshalled(read_i32(body))?,
        }),
        _ => Err(Status::Unimplemented),
    }
}

/// Applies one write to `tree`, encoding its result body into `out`.
fn apply_txn_op(
    tree: &mut Tree,
    session_id: i64,
    op: TxnOp,
    out: &mut BytesMut,
    changes: &mut Vec<Change>,
) -> Outcome<()> {
    match op {
        TxnOp::Create {
            opcode,
            path,
            data,
            acl,
            flags,
        } => {
            let owner = if is_ephemeral(flags) { session_id } else { 0 };
            let (created, stat) = tree.create(&path, data, acl, owner, is_sequential(flags), changes)?;
            write_string(out, &created);
            if opcode != OpCode::Create {
                stat.encode(out);
            }
        }
        TxnOp::Delete { path, version } => tree.delete(&path, version, changes)?,
        TxnOp::SetData {
            path,
            data,
            version,
        } => tree.set_data(&path, data, version, changes)?.encode(out),
        TxnOp::Check { path, version } => tree.check(&path, version)?,
    }
    Ok(())
}

impl World {
    fn fan_out(&mut self, changes: &[Change]) {
        let zxid = self.tree.zxid();
        for change in changes {
            for entry in self.sessions.values_mut() {
                if entry.watches.trigger(change)
                    && let Some(attached) = &entry.attached
                {
                    let _ = attached.outbound.send(notification(change, zxid));
                }
            }
        }
    }

    fn push_to(&self, session_id: i64, change: &Change) {
        if let Some(attached) = self
            .sessions
            .get(&session_id)
            .and_then(|entry| entry.attached.as_ref())
        {
            let _ = attached.outbound.send(notification(change, self.tree.zxid()));
        }
    }

    /// Ends a session: drops its connection and deletes its ephemeral nodes.
    fn end_session(&mut self, session_id: i64, reason: &str) -> bool {
        if self.sessions.remove(&session_id).is_none() {
            return false;
        }
        let mut changes = Vec::new();
        self.tree.remove_owner(session_id, &mut changes);
        self.fan_out(&changes);
        tracing::info!(session_id = format_args!("0x{session_id:x}"), reason, "session ended");
        true
    }

    /// Expires detached sessions whose timeout has run out.
    fn reap(&mut self) {
        let lapsed: Vec<i64> = self
            .sessions
            .iter()
            .filter(|(_, entry)| entry.attached.is_none() && entry.last_seen.elapsed() > entry.timeout)
            .map(|(id, _)| *id)
            .collect();
        for session_id in lapsed {
            self.end_session(session_id, "expired while disconnected");
        }
    }

    fn detach(&mut self, session_id: i64, connection: u64) {
        if let Some(entry) = self.sessions.get_mut(&session_id)
            && entry
                .attached
                .as_ref()
                .is_some_and(|attached| attached.connection == connection)
        {
            entry.attached = None;
            entry.last_seen = Instant::now();
            entry.watches.clear();
        }
    }

    fn set_watches(&mut self, session_id: i64, opcode: OpCode, body: &mut Bytes) -> Outcome<()> {
        let relative = marshalled(read_i64(body))?;
        let data = marshalled(read_strings(body))?;
        let exist = marshalled(read_strings(body))?;
        let child = marshalled(read_strings(body))?;
        let (persistent, recursive) = if opcode == OpCode::SetWatches2 {
            (marshalled(read_strings(body))?, marshalled(read_strings(body))?)
        } else {
            (Vec::new(), Vec::new())
        };

        let mut missed = Vec::new();
        let mut armed = Watches::default();
        for node in data {
            match self.tree.get(&node) {
                None => missed.push((node, EventType::NodeDeleted)),
                Some(entry) if entry.stat.mzxid > relative => {
                    missed.push((node, EventType::NodeDataChanged))
                }
                Some(_) => {
                    armed.data.insert(node);
                }
            }
        }
        for node in exist {
            match self.tree.get(&node) {
                Some(entry) if entry.stat.czxid > relative => {
                    missed.push((node, EventType::NodeCreated))
                }
                Some(entry) if entry.stat.mzxid > relative => {
                    missed.push((node, EventType::NodeDataChanged))
                }
                _ => {
                    armed.exist.insert(node);
                }
            }
        }
        for node in child {
            match self.tree.get(&node) {
                None => missed.push((node, EventType::NodeDeleted)),
                Some(entry) if entry.stat.pzxid > relative => {
                    missed.push((node, EventType::NodeChildrenChanged))
                }
                Some(_) => {
                    armed.child.insert(node);
                }
            }
        }
        armed.persistent.extend(persistent);
        armed.recursive.extend(recursive);

        let entry = self.sessions.get_mut(&session_id).ok_or(Status::SessionExpired)?;
        let watches = &mut entry.watches;
        watches.data.extend(armed.data);
        watches.exist.extend(armed.exist);
        watches.child.extend(armed.child);
        watches.persistent.extend(armed.persistent);
        watches.recursive.extend(armed.recursive);
        for (node, event_type) in missed {
            self.push_to(session_id, &Change { path: node, event_type });
        }
        Ok(())
    }

    fn multi(&mut self, session_id: i64, body: &mut Bytes, out: &mut BytesMut, changes: &mut Vec<Change>) -> Outcome<()> {
        let mut ops = Vec::new();
        loop {
            let header = marshalled(SubHeader::decode(body))?;
            if header.done {
                break;
            }
            let opcode = OpCode::from_code(header.op_type).ok_or(Status::MarshallingError)?;
            ops.push(parse_txn_op(opcode, body)?);
        }

        let mut staged = self.tree.clone();
        let mut results = BytesMut::new();
        let mut staged_changes = Vec::new();
        let count = ops.len();
        for (index, op) in ops.into_iter().enumerate() {
            let opcode = op.opcode();
            let mut entry = BytesMut::new();
            match apply_txn_op(&mut staged, session_id, op, &mut entry, &mut staged_changes) {
                Ok(()) => {
                    SubHeader {
                        op_type: opcode.code(),
                        done: false,
                        err: 0,
                    }
                    .encode(&mut results);
                    results.extend_from_slice(&entry);
                }
                Err(status) => {
                    for position in 0..count {
                        let code = match position.cmp(&index) {
                            std::cmp::Ordering::Less => Status::Ok.code(),
                            std::cmp::Ordering::Equal => status.code(),
                            std::cmp::Ordering::Greater => Status::RuntimeInconsistency.code(),
                        };
                        SubHeader {
                            op_type: OpCode::Error.code(),
                            done: false,
                            err: code,
                        }
                        .encode(out);
                        write_i32(out, code);
                    }
                    SubHeader::TERMINATOR.encode(out);
                    return Ok(());
                }
            }
        }
        self.tree = staged;
        changes.extend(staged_changes);
        out.extend_from_slice(&results);
        SubHeader::TERMINATOR.encode(out);
        Ok(())
    }

    /// Runs one request for `session_id`, writing the reply body into `out`.
    fn execute(
        &mut self,
        shared: &Shared,
        session_id: i64,
        opcode: OpCode,
        body: &mut Bytes,
        out: &mut BytesMut,
        changes: &mut Vec<Change>,
    ) -> Outcome<()> {
        match opcode {
            OpCode::Ping => {
                shared.pings.fetch_add(1, Ordering::Relaxed);
            }
            OpCode::CloseSession => {}
            OpCode::Create
            | OpCode::CreateWithStat
            | OpCode::CreateContainer
            | OpCode::CreateTtl
            | OpCode::Delete
            | OpCode::SetData
            | OpCode::Check => {
                let op = parse_txn_op(opcode, body)?;
                apply_txn_op(&mut self.tree, session_id, op, out, changes)?;
            }
            OpCode::Multi => self.multi(session_id, body, out, changes)?,
            OpCode::Exists => {
                let node = marshalled(read_string(body))?;
                let watch = marshalled(read_bool(body))?;
                if watch && let Some(entry) = self.sessions.get_mut(&session_id) {
                    entry.watches.exist.insert(node.clone());
                }
                self.tree.get_or_missing(&node)?.stat.encode(out);
            }
            OpCode::GetData => {
                let node = marshalled(read_string(body))?;
                let watch = marshalled(read_bool(body))?;
                let entry = self.tree.get_or_missing(&node)?;
                zk_wire::write_bytes(out, &entry.data);
                entry.stat.encode(out);
                if watch && let Some(session) = self.sessions.get_mut(&session_id) {
                    session.watches.data.insert(node);
                }
            }
            OpCode::GetChildren | OpCode::GetChildren2 => {
                let node = marshalled(read_string(body))?;
                let watch = marshalled(read_bool(body))?;
                let children = self.tree.children(&node)?;
                write_strings(out, children.iter().map(String::as_str));
                if opcode == OpCode::GetChildren2 {
                    self.tree.get_or_missing(&node)?.stat.encode(out);
                }
                if watch && let Some(session) = self.sessions.get_mut(&session_id) {
                    session.watches.child.insert(node);
                }
            }
            OpCode::GetAcl => {
                let node = marshalled(read_string(body))?;
                let entry = self.tree.get_or_missing(&node)?;
                write_acls(out, &entry.acl);
                entry.stat.encode(out);
            }
            OpCode::Sync => {
                let node = marshalled(read_string(body))?;
                write_string(out, &node);
            }
            OpCode::GetEphemerals => {
                let prefix = marshalled(read_string(body))?;
                let owned = self.tree.ephemerals(session_id, &prefix);
                write_strings(out, owned.iter().map(String::as_str));
            }
            OpCode::AddWatch => {
                let node = marshalled(read_string(body))?;
                let mode = marshalled(read_i32(body))?;
                let session = self.sessions.get_mut(&session_id).ok_or(Status::SessionExpired)?;
                match mode {
                    0 => session.watches.persistent.insert(node),
                    1 => session.watches.recursive.insert(node),
                    _ => return Err(Status::BadArguments),
                };
            }
            OpCode::RemoveWatches => {
                let node = marshalled(read_string(body))?;
                let watcher_type = marshalled(read_i32(body))?;
                let session = self.sessions.get_mut(&session_id).ok_or(Status::SessionExpired)?;
                if !session.watches.remove(&node, watcher_type) {
                    return Err(Status::NoWatcher);
                }
            }
            OpCode::Auth => {
                let _auth_type = marshalled(read_i32(body))?;
                let scheme = marshalled(read_string(body))?;
                let _credentials = marshalled(read_length_prefixed(body))?;
                if shared.denied_auth.lock().contains(&scheme) {
                    return Err(Status::AuthFailed);
                }
            }
            OpCode::SetWatches | OpCode::SetWatches2 => self.set_watches(session_id, opcode, body)?,
            _ => return Err(Status::Unimplemented),
        }
        Ok(())
    }
}

struct Shared {
    world: Mutex<World>,
    next_session: AtomicI64,
    pings: AtomicU64,
    denied_auth: Mutex<HashSet<String>>,
}

struct Attach {
    session_id: i64,
    timeout: Duration,
    evicted: oneshot::Receiver<()>,
}

enum Exit {
    Dropped,
    Evicted,
    TimedOut,
    Closed,
    Eof,
}

impl Shared {
    fn handshake(
        &self,
        request: &ConnectRequest,
        connection: u64,
        outbound: mpsc::UnboundedSender<Bytes>,
    ) -> (ConnectResponse, Option<Attach>) {
        let mut world = self.world.lock();
        world.reap();
        let timeout_ms = if request.timeout_ms > 0 {
            request.timeout_ms
        } else {
            DEFAULT_TIMEOUT_MS
        };
        let (evict, evicted) = oneshot::channel();
        let attached = Attached {
            connection,
            outbound,
            _evict: evict,
        };

        if request.is_resume() {
            let Some(entry) = world
                .sessions
                .get_mut(&request.session_id)
                .filter(|entry| entry.password == request.password)
            else {
                tracing::info!(
                    session_id = format_args!("0x{:x}", request.session_id),
                    "resume refused"
                );
                return (ConnectResponse::rejected(), None);
            };
            entry.attached = Some(attached);
            entry.last_seen = Instant::now();
            entry.watches.clear();
            let response = ConnectResponse {
                protocol_version: 0,
                timeout_ms: entry.timeout.as_millis() as i32,
                session_id: request.session_id,
                password: entry.password.clone(),
                read_only: false,
            };
            let attach = Attach {
                session_id: request.session_id,
                timeout: entry.timeout,
                evicted,
            };
            return (response, Some(attach));
        }

        let session_id = SESSION_BASE + self.next_session.fetch_add(1, Ordering::Relaxed);
        let mut password = BytesMut::with_capacity(PASSWORD_LEN);
        password.extend_from_slice(&session_id.to_be_bytes());
        password.extend_from_slice(&(!session_id).to_be_bytes());
        let password = password.freeze();
        let timeout = Duration::from_millis(timeout_ms as u64);
        world.sessions.insert(
            session_id,
            SessionEntry {
                password: password.clone(),
                timeout,
                last_seen: Instant::now(),
                attached: Some(attached),
                watches: Watches::default(),
            },
        );
        tracing::info!(session_id = format_args!("0x{session_id:x}"), timeout_ms, "session created");
        let response = ConnectResponse {
            protocol_version: 0,
            timeout_ms,
            session_id,
            password,
            read_only: false,
        };
        let attach = Attach {
            session_id,
            timeout,
            evicted,
        };
        (response, Some(attach))
    }

    /// Handles one request frame; returns true when the session was closed.
    fn handle(&self, session_id: i64, mut payload: Bytes, outbound: &mpsc::UnboundedSender<Bytes>) -> bool {
        let header = match RequestHeader::decode(&mut payload) {
            Ok(header) => header,
            Err(err) => {
                tracing::debug!(error = %err, "undecodable request");
                return false;
            }
        };
        let mut world = self.world.lock();
        if let Some(entry) = world.sessions.get_mut(&session_id) {
            entry.last_seen = Instant::now();
        }
        let mut out = BytesMut::new();
        let mut changes = Vec::new();
        let status = match world.execute(
            self,
            session_id,
            header.opcode,
            &mut payload,
            &mut out,
            &mut changes,
        ) {
            Ok(()) => Status::Ok,
            Err(status) => {
                out.clear();
                status
            }
        };
        world.fan_out(&changes);
        let reply_xid = match header.opcode {
            OpCode::Ping => xid::PING,
            OpCode::Auth => xid::AUTH,
            OpCode::SetWatches | OpCode::SetWatches2 => xid::SET_WATCHES,
            _ => header.xid,
        };
        let reply = ReplyHeader {
            xid: reply_xid,
            zxid: world.tree.zxid(),
            status,
        };
        let _ = outbound.send(Reply::encode_frame(reply, &out));
        if header.opcode == OpCode::CloseSession {
            world.end_session(session_id, "closed by client");
            return true;
        }
        false
    }
}

async fn serve_connection(
    shared: Arc<Shared>,
    connection: Connection,
    mut epoch: watch::Receiver<u64>,
) -> Result<()> {
    let connection_id = connection.info().id.0;
    let (mut reader, mut writer) = connection.split();
    let hello = tokio::select! {
        _ = epoch.changed() => return Ok(()),
        frame = reader.read_frame() => frame?,
    };
    let Some(payload) = hello else {
        return Ok(());
    };
    let request = ConnectRequest::decode(payload).context("decode connect request")?;
    let (outbound, mut queued) = mpsc::unbounded_channel();
    let (response, attach) = shared.handshake(&request, connection_id, outbound.clone());
    writer.write_frame(&response.encode()).await?;
    let Some(Attach {
        session_id,
        timeout,
        mut evicted,
    }) = attach
    else {
        let _ = writer.shutdown().await;
        return Ok(());
    };

    let flush = tokio::spawn(async move {
        while let Some(frame) = queued.recv().await {
            if writer.write_frame(&frame).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let exit = loop {
        let frame = tokio::select! {
            _ = epoch.changed() => break Exit::Dropped,
            _ = &mut evicted => break Exit::Evicted,
            frame = tokio::time::timeout(timeout, reader.read_frame()) => frame,
        };
        match frame {
            Err(_) => break Exit::TimedOut,
            Ok(Ok(Some(payload))) => {
                if shared.handle(session_id, payload, &outbound) {
                    break Exit::Closed;
                }
            }
            Ok(Ok(None)) => break Exit::Eof,
            Ok(Err(err)) => {
                tracing::debug!(error = %format!("{err:#}"), "connection read failed");
                break Exit::Eof;
            }
        }
    };
    drop(outbound);
    match exit {
        Exit::TimedOut => {
            shared.world.lock().end_session(session_id, "timed out");
            flush.abort();
        }
        Exit::Dropped | Exit::Evicted => {
            shared.world.lock().detach(session_id, connection_id);
            flush.abort();
        }
        Exit::Closed => {
            let _ = flush.await;
        }
        Exit::Eof => {
            shared.world.lock().detach(session_id, connection_id);
            let _ = flush.await;
        }
    }
    Ok(())
}

async fn accept_loop(shared: Arc<Shared>, server: TcpServer, epoch: watch::Receiver<u64>) {
    loop {
        let connection = match server.accept().await {
            Ok(connection) => connection,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "accept failed");
                continue;
            }
        };
        let shared = Arc::clone(&shared);
        let mut epoch = epoch.clone();
        epoch.borrow_and_update();
        tokio::spawn(async move {
            if let Err(err) = serve_connection(shared, connection, epoch).await {
                tracing::debug!(error = %format!("{err:#}"), "connection handler failed");
            }
        });
    }
}

struct Member {
    addr: SocketAddr,
    accept: Mutex<Option<JoinHandle<()>>>,
    epoch: watch::Sender<u64>,
}

/// In-process servers on loopback sharing one tree and session table.
///
/// Sessions expire on the server's clock: a connection silent for the
/// negotiated timeout is closed and its session ended, and a detached
/// session is ended once its timeout passes without a resume.
pub struct Ensemble {
    shared: Arc<Shared>,
    members: Vec<Member>,
}

impl Ensemble {
    pub async fn start(size: usize) -> Result<Self> {
        let shared = Arc::new(Shared {
            world: Mutex::new(World::default()),
            next_session: AtomicI64::new(1),
            pings: AtomicU64::new(0),
            denied_auth: Mutex::new(HashSet::new()),
        });
        let mut members = Vec::with_capacity(size);
        for _ in 0..size {
            let server = TcpServer::bind(([127, 0, 0, 1], 0).into(), TransportConfig::default()).await?;
            let addr = server.local_addr()?;
            let (epoch, _) = watch::channel(0);
            let accept = tokio::spawn(accept_loop(Arc::clone(&shared), server, epoch.subscribe()));
            members.push(Member {
                addr,
                accept: Mutex::new(Some(accept)),
                epoch,
            });
        }
        Ok(Self { shared, members })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn address(&self, index: usize) -> SocketAddr {
        self.members[index].addr
    }

    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.members.iter().map(|member| member.addr).collect()
    }

    /// `127.0.0.1:p1,127.0.0.1:p2,...`
    pub fn connect_string(&self) -> String {
        self.members
            .iter()
            .map(|member| member.addr.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Closes every open connection to member `index`; it keeps accepting.
    pub fn drop_connections(&self, index: usize) {
        self.members[index].epoch.send_modify(|epoch| *epoch += 1);
    }

    /// Stops member `index` listening and drops its connections.
    pub fn kill(&self, index: usize) {
        let member = &self.members[index];
        if let Some(accept) = member.accept.lock().take() {
            accept.abort();
        }
        self.drop_connections(index);
    }

    /// Listens again on the member's original address.
    pub async fn restart(&self, index: usize) -> Result<()> {
        let member = &self.members[index];
        if member.accept.lock().is_some() {
            return Ok(());
        }
        let server = TcpServer::bind(member.addr, TransportConfig::default())
            .await
            .with_context(|| format!("rebind {}", member.addr))?;
        let accept = tokio::spawn(accept_loop(
            Arc::clone(&self.shared),
            server,
            member.epoch.subscribe(),
        ));
        *member.accept.lock() = Some(accept);
        Ok(())
    }

    /// Rejects every later authentication with `scheme`.
    pub fn deny_auth(&self, scheme: &str) {
        self.shared.denied_auth.lock().insert(scheme.to_string());
    }

    /// Ends `session_id` as if its timeout had passed.
    pub fn expire_session(&self, session_id: i64) -> bool {
        self.shared
            .world
            .lock()
            .end_session(session_id, "expired by test")
    }

    pub fn session_exists(&self, session_id: i64) -> bool {
        let mut world = self.shared.world.lock();
        world.reap();
        world.sessions.contains_key(&session_id)
    }

    pub fn session_count(&self) -> usize {
        let mut world = self.shared.world.lock();
        world.reap();
        world.sessions.len()
    }

    /// Watches the server holds for `session_id` on its current connection.
    pub fn server_watch_count(&self, session_id: i64) -> usize {
        self.shared
            .world
            .lock()
            .sessions
            .get(&session_id)
            .map(|entry| {
                let watches = &entry.watches;
                watches.data.len()
                    + watches.exist.len()
                    + watches.child.len()
                    + watches.persistent.len()
                    + watches.recursive.len()
            })
            .unwrap_or(0)
    }

    pub fn pings(&self) -> u64 {
        self.shared.pings.load(Ordering::Relaxed)
    }

    pub fn data(&self, node: &str) -> Option<Bytes> {
        self.shared
            .world
            .lock()
            .tree
            .get(node)
            .map(|entry| entry.data.clone())
    }

    pub fn exists(&self, node: &str) -> bool {
        self.shared.world.lock().tree.get(node).is_some()
    }

    /// Writes as an outside client would, firing watches.
    pub fn create(&self, node: &str, data: impl Into<Bytes>) -> bool {
        let mut world = self.shared.world.lock();
        let mut changes = Vec::new();
        let created = world
            .tree
            .create(node, data.into(), zk_wire::Acl::open_unsafe(), 0, false, &mut changes)
            .is_ok();
        world.fan_out(&changes);
        created
    }

    pub fn set_data(&self, node: &str, data: impl Into<Bytes>) -> bool {
        let mut world = self.shared.world.lock();
        let mut changes = Vec::new();
        let updated = world.tree.set_data(node, data.into(), -1, &mut changes).is_ok();
        world.fan_out(&changes);
        updated
    }

    pub fn delete(&self, node: &str) -> bool {
        let mut world = self.shared.world.lock();
        let mut changes = Vec::new();
        let deleted = world.tree.delete(node, -1, &mut changes).is_ok();
        world.fan_out(&changes);
        deleted
    }
}

impl Drop for Ensemble {
    fn drop(&mut self) {
        for index in 0..self.members.len() {
            self.kill(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_watches_are_consumed() {
        let mut watches = Watches::default();
        watches.data.insert("/a".to_string());
        watches.recursive.insert("/r".to_string());
        let changed = Change {
            path: "/a".to_string(),
            event_type: EventType::NodeDataChanged,
        };
        assert!(watches.trigger(&changed));
        assert!(!watches.trigger(&changed));

        let nested = Change {
            path: "/r/x/y".to_string(),
            event_type: EventType::NodeCreated,
        };
        assert!(watches.trigger(&nested));
        let children = Change {
            path: "/r".to_string(),
            event_type: EventType::NodeChildrenChanged,
        };
        assert!(!watches.trigger(&children));
    }

    #[test]
    fn remove_by_watcher_type() {
        let mut watches = Watches::default();
        watches.child.insert("/a".to_string());
        watches.data.insert("/a".to_string());
        assert!(watches.remove("/a", 2));
        assert!(watches.data.is_empty());
        assert!(!watches.child.is_empty());
        assert!(watches.remove("/a", 1));
        assert!(!watches.remove("/a", 3));
    }

    #[tokio::test]
    async fn killed_member_refuses_connections() {
        let ensemble = Ensemble::start(2).await.expect("ensemble");
        let addr = ensemble.address(0);
        ensemble.kill(0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
        ensemble.restart(0).await.expect("restart");
        tokio::net::TcpStream::connect(addr).await.expect("connect after restart");
    }
}
