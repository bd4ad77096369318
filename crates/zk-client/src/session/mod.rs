//! Protocol session engine.
//!
//! # Purpose
//! A [`Session`] owns one physical connection to one server at a time and
//! lets any number of tasks issue requests over it concurrently. It performs
//! the handshake (new session or resume), correlates replies to requests by
//! request id, routes pushed notifications to the watch registry, keeps the
//! session alive while watches exist, and classifies every socket failure as
//! "no connection", "connection lost" or "session expired".
//!
//! # Design notes
//! - Writes are serialized by one async mutex that also guards the live
//!   connection. A caller holds it only while (re)connecting and flushing its
//!   frame, never while waiting for the reply.
//! - Each successful handshake starts a new connection *generation* with
//!   exactly one receive task and one keepalive task. Pending requests are
//!   tagged with their generation, so a stale reader can never resolve or
//!   fail a request written on a newer connection.
//! - The pending table is a concurrent map with insert-if-absent and
//!   remove-if-matching operations; the receive loop never takes the write
//!   lock.
//! - Dropping an `execute` future cancels only that request: its pending
//!   entry (and any watch it registered) is removed by a guard.
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use zk_transport::FrameWriter;
use zk_wire::ops::{AddWatch, Auth, CloseSession, Ping, RemoveWatches, decode_reply, encode_request};
use zk_wire::{KeeperState, Operation, Reply, ReplyHeader, Status, WatchKind, WatchedEvent, xid};

use crate::config::{AuthInfo, ClientConfig, Host};
use crate::error::{Error, Result};
use crate::macros::t_now;
use crate::watch::{WatchCallback, WatchHandle, WatchRegistry};

mod connection;
mod keepalive;
mod receive;

/// Client-side view of the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Expired,
    Closed,
}

#[derive(Debug, Clone)]
struct Credentials {
    session_id: i64,
    password: Bytes,
    timeout: Duration,
    read_only: bool,
}

struct Pending {
    token: u64,
    generation: u64,
    tx: oneshot::Sender<Result<Reply>>,
}

struct PingWaiter {
    generation: u64,
    tx: oneshot::Sender<Result<()>>,
}

/// The live connection of one generation.
struct Link {
    writer: FrameWriter,
    generation: u64,
    host: Host,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Link {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub(crate) struct Shared {
    config: ClientConfig,
    host: Mutex<Host>,
    link: tokio::sync::Mutex<Option<Link>>,
    /// Generation of the connection currently serving traffic; 0 when none.
    live: AtomicU64,
    generations: AtomicU64,
    pending: DashMap<i32, Pending>,
    next_token: AtomicU64,
    next_xid: AtomicI32,
    pings: Mutex<Vec<PingWaiter>>,
    credentials: Mutex<Option<Credentials>>,
    last_zxid: AtomicI64,
    last_heard: Mutex<Instant>,
    auth: Mutex<Vec<AuthInfo>>,
    auth_lock: tokio::sync::Mutex<()>,
    watches: WatchRegistry,
    state: watch::Sender<SessionState>,
    closed: AtomicBool,
}

/// Cheaply cloneable handle to one protocol session.
///
/// ```no_run
/// use zk_client::{ClientConfig, Session};
/// use zk_wire::ops::GetData;
///
/// async fn read(config: ClientConfig) -> zk_client::Result<()> {
///     let session = Session::new(config)?;
///     let node = session.execute(&GetData::new("/config")?).await?;
///     println!("{} bytes at version {}", node.data.len(), node.stat.version);
///     session.close().await
/// }
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<Shared>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host())
            .field("session_id", &self.session_id())
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    /// Creates a disconnected session bound to the first configured host.
    /// The connection is opened by the first request.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let host = config
            .hosts
            .first()
            .cloned()
            .ok_or_else(|| Error::InvalidArgument("no hosts configured".to_string()))?;
        Ok(Self::with_host(config, host))
    }

    pub fn with_host(config: ClientConfig, host: Host) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let shared = Shared {
            host: Mutex::new(host),
            link: tokio::sync::Mutex::new(None),
            live: AtomicU64::new(0),
            generations: AtomicU64::new(0),
            pending: DashMap::new(),
            next_token: AtomicU64::new(1),
            next_xid: AtomicI32::new(xid::FIRST),
            pings: Mutex::new(Vec::new()),
            credentials: Mutex::new(None),
            last_zxid: AtomicI64::new(0),
            last_heard: Mutex::new(Instant::now()),
            auth: Mutex::new(config.auth.clone()),
            auth_lock: tokio::sync::Mutex::new(()),
            watches: WatchRegistry::new(config.root.clone()),
            state,
            closed: AtomicBool::new(false),
            config,
        };
        Self {
            inner: Arc::new(shared),
        }
    }

    /// Opens the connection now instead of on the first request.
    pub async fn connect(&self) -> Result<()> {
        let shared = &self.inner;
        shared.ensure_open()?;
        let mut slot = shared.link.lock().await;
        shared.ensure_open()?;
        shared.ensure_link(&mut slot).await.map(|_| ())
    }

    /// Sends `op` and waits for its reply.
    ///
    /// A watch the operation asks the server for is not tracked locally; use
    /// [`Session::execute_watched`] to receive its events.
    pub async fn execute<O: Operation>(&self, op: &O) -> Result<O::Output> {
        let (reply, _) = self.submit(op, None).await?;
        self.decode(op, &reply)
    }

    /// Like [`Session::execute`], registering `callback` for the watch the
    /// operation sets. The returned watcher is `None` when the server did not
    /// keep the watch (for example a data watch on a missing node).
    pub async fn execute_watched<O: Operation>(
        &self,
        op: &O,
        callback: WatchCallback,
    ) -> Result<(O::Output, Option<Watcher>)> {
        let (reply, handle) = self.submit(op, Some(callback)).await?;
        let output = match self.decode(op, &reply) {
            Ok(output) => output,
            Err(err) => {
                if let Some(handle) = &handle {
                    self.inner.watches.remove(handle);
                }
                return Err(err);
            }
        };
        let watcher = handle.map(|handle| Watcher {
            shared: self.inner.clone(),
            handle,
        });
        Ok((output, watcher))
    }

    /// Registers a persistent watch at `path`, recursive if asked.
    pub async fn add_watch(
        &self,
        path: &str,
        recursive: bool,
        callback: WatchCallback,
    ) -> Result<Watcher> {
        let op = AddWatch::new(path, recursive)?;
        let ((), watcher) = self.execute_watched(&op, callback).await?;
        watcher.ok_or_else(|| Error::ProtocolViolation("server did not keep persistent watch".to_string()))
    }

    /// Authenticates the session and remembers the credentials for every
    /// later handshake.
    pub async fn add_auth(&self, scheme: &str, credentials: impl Into<Bytes>) -> Result<()> {
        let info = AuthInfo::new(scheme, credentials);
        let _serial = self.inner.auth_lock.lock().await;
        let op = Auth::new(info.scheme.clone(), info.credentials.clone());
        match self.execute(&op).await {
            Ok(()) => {
                let mut auth = self.inner.auth.lock();
                if !auth.contains(&info) {
                    auth.push(info);
                }
                Ok(())
            }
            Err(Error::Server(Status::AuthFailed)) => Err(Error::AuthFailed {
                scheme: info.scheme,
            }),
            Err(err) => Err(err),
        }
    }

    /// Sends a ping, or joins the one already in flight.
    pub async fn ping(&self) -> Result<()> {
        let shared = &self.inner;
        shared.ensure_open()?;
        let rx = {
            let mut slot = shared.link.lock().await;
            shared.ensure_open()?;
            shared.ensure_link(&mut slot).await?;
            let link = slot.as_mut().ok_or(Error::Closed)?;
            shared.send_ping(link).await?
        };
        rx.await.unwrap_or(Err(Error::Closed))
    }

    /// Drops the current connection and opens one to `host`, resuming the
    /// session if there is one.
    pub async fn reconnect(&self, host: &Host) -> Result<()> {
        let shared = &self.inner;
        shared.ensure_open()?;
        let mut slot = shared.link.lock().await;
        shared.ensure_open()?;
        if let Some(old) = slot.take() {
            let reason = format!("switching to {host}");
            shared.fail_generation(
                old.generation,
                shared.classify(&old.host, reason),
                KeeperState::Disconnected,
            );
        }
        *shared.host.lock() = host.clone();
        tracing::info!(host = %host, "reconnecting");
        t_counter!("zk_client_reconnects_total").increment(1);
        let link = shared.open_link(host).await?;
        *slot = Some(link);
        Ok(())
    }

    /// Ends the session on the server and fails everything still pending
    /// with [`Error::Closed`]. Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        let shared = &self.inner;
        if shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut slot = shared.link.lock().await;
        let live = shared.live.load(Ordering::Acquire);
        if let Some(link) = slot.as_mut()
            && live != 0
            && link.generation == live
        {
            shared.send_close(link).await;
            shared.fail_generation(live, Error::Closed, KeeperState::Closed);
        }
        drop(slot.take());
        drop(slot);

        shared.fail_all(Error::Closed);
        let session_id = shared.credentials.lock().take().map(|credentials| credentials.session_id);
        shared.state.send_replace(SessionState::Closed);
        shared.watches.dispatch_state(KeeperState::Closed);
        tracing::info!(session_id = ?session_id, "session closed");
        Ok(())
    }

    pub fn session_id(&self) -> Option<i64> {
        self.inner
            .credentials
            .lock()
            .as_ref()
            .map(|credentials| credentials.session_id)
    }

    pub fn negotiated_timeout(&self) -> Option<Duration> {
        self.inner
            .credentials
            .lock()
            .as_ref()
            .map(|credentials| credentials.timeout)
    }

    pub fn is_read_only(&self) -> bool {
        self.inner
            .credentials
            .lock()
            .as_ref()
            .is_some_and(|credentials| credentials.read_only)
    }

    /// Highest transaction id seen in any reply.
    pub fn last_zxid(&self) -> i64 {
        self.inner.last_zxid.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn states(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.live.load(Ordering::Acquire) != 0
    }

    pub fn host(&self) -> Host {
        self.inner.host.lock().clone()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn watch_count(&self) -> usize {
        self.inner.watches.len()
    }

    fn decode<O: Operation>(&self, op: &O, reply: &Reply) -> Result<O::Output> {
        match decode_reply(op, reply, &self.inner.config.root) {
            Ok(output) => Ok(output),
            Err(zk_wire::Error::Status(Status::SessionExpired)) => Err(Error::SessionExpired {
                session_id: self.session_id().unwrap_or_default(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn submit<O: Operation>(
        &self,
        op: &O,
        callback: Option<WatchCallback>,
    ) -> Result<(Reply, Option<WatchHandle>)> {
        let shared = &self.inner;
        shared.ensure_open()?;
        let started = t_now();
        let opcode = op.opcode();
        let root = shared.config.root.as_str();

        let mut slot = shared.link.lock().await;
        shared.ensure_open()?;
        let generation = shared.ensure_link(&mut slot).await?;
        let link = slot.as_mut().ok_or(Error::Closed)?;

        let (xid, rx, mut guard) = shared.register_live(op.reserved_xid(), generation, &link.host)?;
        if let Some(callback) = callback
            && let Some((path, kind)) = op.watch(root)
        {
            guard.watch = Some(shared.watches.register(path, kind, callback));
        }

        let mut frame = BytesMut::new();
        encode_request(op, xid, root, &mut frame);
        if let Err(err) = link.writer.write_frame(&frame).await {
            let error = shared.connection_error(&link.host, &err);
            shared.fail_generation(generation, error.clone(), KeeperState::Disconnected);
            return Err(error);
        }
        drop(slot);
        tracing::debug!(xid, opcode = opcode.name(), generation, "request sent");
        t_counter!("zk_client_requests_total", "op" => opcode.name()).increment(1);
        t_gauge!("zk_client_pending_requests").set(shared.pending.len() as f64);

        let outcome = match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(shared.classify(&shared.host.lock().clone(), "request abandoned")),
        };
        if let Some(started) = started {
            t_histogram!("zk_client_request_ns", "op" => opcode.name())
                .record(started.elapsed().as_nanos() as f64);
        }
        let reply = outcome?;
        let handle = guard.watch.take();
        guard.disarm();
        match handle {
            Some(handle) if !op.watch_established(reply.status()) => {
                shared.watches.remove(&handle);
                Ok((reply, None))
            }
            handle => Ok((reply, handle)),
        }
    }
}

/// A registered watch. Dropping the handle keeps the watch; call
/// [`Watcher::remove`] to cancel it.
pub struct Watcher {
    shared: Arc<Shared>,
    handle: WatchHandle,
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("path", &self.handle.path)
            .field("kind", &self.handle.kind)
            .finish()
    }
}

impl Watcher {
    /// Watched path, relative to the client root.
    pub fn path(&self) -> &str {
        zk_wire::path::strip_root(&self.shared.config.root, &self.handle.path)
    }

    pub fn kind(&self) -> WatchKind {
        self.handle.kind
    }

    /// False once a one-shot watch fired, or after expiry or close.
    pub fn is_active(&self) -> bool {
        self.shared.watches.contains(&self.handle)
    }

    /// Removes this subscription. When it was the last of its kind at the
    /// path the server is asked to drop its watch as well; that request is
    /// best-effort and its failure is not reported.
    pub async fn remove(self) -> Result<()> {
        let removal = self.shared.watches.remove(&self.handle);
        if !removal.last_of_kind {
            return Ok(());
        }
        let session = Session {
            inner: self.shared.clone(),
        };
        let op = RemoveWatches::new(self.handle.path.clone(), self.handle.kind);
        if let Err(err) = session.execute(&op).await {
            tracing::debug!(path = %self.handle.path, error = %err, "remove watches request failed");
        }
        Ok(())
    }
}

/// Removes a pending entry (and the watch registered with it) unless the
/// request completed normally.
struct PendingGuard<'a> {
    shared: &'a Shared,
    xid: i32,
    token: u64,
    watch: Option<WatchHandle>,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let token = self.token;
        self.shared
            .pending
            .remove_if(&self.xid, |_, pending| pending.token == token);
        if self.armed
            && let Some(handle) = self.watch.take()
        {
            self.shared.watches.remove(&handle);
        }
    }
}

impl Shared {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn is_live(&self, generation: u64) -> bool {
        self.live.load(Ordering::Acquire) == generation
    }

    fn idle(&self) -> Duration {
        self.last_heard.lock().elapsed()
    }

    fn touch(&self) {
        *self.last_heard.lock() = Instant::now();
    }

    fn last_zxid(&self) -> i64 {
        self.last_zxid.load(Ordering::Acquire)
    }

    /// Records what every reply tells us: the server is alive, and how far
    /// its history has advanced.
    fn observe(&self, header: &ReplyHeader) {
        self.touch();
        if header.zxid > 0 {
            self.last_zxid.fetch_max(header.zxid, Ordering::AcqRel);
        }
    }

    /// Makes sure `slot` holds the live connection, opening one if needed.
    async fn ensure_link(self: &Arc<Self>, slot: &mut Option<Link>) -> Result<u64> {
        let live = self.live.load(Ordering::Acquire);
        if let Some(link) = slot.as_ref()
            && live != 0
            && link.generation == live
        {
            return Ok(live);
        }
        drop(slot.take());
        let host = self.host.lock().clone();
        let link = self.open_link(&host).await?;
        let generation = link.generation;
        *slot = Some(link);
        Ok(generation)
    }

    fn allocate_xid(&self) -> i32 {
        self.next_xid
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(if current >= i32::MAX { xid::FIRST } else { current + 1 })
            })
            .unwrap_or_else(|current| current)
    }

    fn register_pending(
        &self,
        reserved: Option<i32>,
        generation: u64,
    ) -> Result<(i32, oneshot::Receiver<Result<Reply>>, PendingGuard<'_>)> {
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let pending = Pending {
            token,
            generation,
            tx,
        };
        let xid = match reserved {
            Some(xid) => match self.pending.entry(xid) {
                Entry::Occupied(_) => {
                    return Err(Error::InvalidArgument(format!(
                        "a request with reserved id {xid} is already outstanding"
                    )));
                }
                Entry::Vacant(slot) => {
                    slot.insert(pending);
                    xid
                }
            },
            None => loop {
                let xid = self.allocate_xid();
                if let Entry::Vacant(slot) = self.pending.entry(xid) {
                    slot.insert(pending);
                    break xid;
                }
            },
        };
        let guard = PendingGuard {
            shared: self,
            xid,
            token,
            watch: None,
            armed: true,
        };
        Ok((xid, rx, guard))
    }

    /// Registers a request on connection `generation`, refusing once that
    /// connection is retired. `fail_generation` clears `live` before it
    /// sweeps the table, so an entry the sweep missed is caught here.
    fn register_live(
        &self,
        reserved: Option<i32>,
        generation: u64,
        host: &Host,
    ) -> Result<(i32, oneshot::Receiver<Result<Reply>>, PendingGuard<'_>)> {
        let registered = self.register_pending(reserved, generation)?;
        if !self.is_live(generation) {
            return Err(self.classify(host, "connection replaced"));
        }
        Ok(registered)
    }

    fn classify(&self, host: &Host, reason: impl Into<String>) -> Error {
        let reason = reason.into();
        let credentials = self.credentials.lock().clone();
        match credentials {
            None => Error::NoConnection {
                host: host.to_string(),
                reason,
            },
            Some(credentials) if self.idle() < credentials.timeout => Error::ConnectionLost {
                host: host.to_string(),
                reason,
            },
            Some(credentials) => Error::SessionExpired {
                session_id: credentials.session_id,
            },
        }
    }

    fn connection_error(&self, host: &Host, err: &anyhow::Error) -> Error {
        if let Some(wire) = err.downcast_ref::<zk_wire::Error>() {
            return Error::ProtocolViolation(wire.to_string());
        }
        self.classify(host, format!("{err:#}"))
    }

    /// Retires connection `generation`: fails its pending requests and pings
    /// with `error` and tells every watch about `state`. Only the first
    /// caller for a generation does anything.
    fn fail_generation(&self, generation: u64, error: Error, state: KeeperState) -> bool {
        if self
            .live
            .compare_exchange(generation, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        tracing::info!(generation, error = %error, "connection failed");

        let stale: Vec<i32> = self
            .pending
            .iter()
            .filter(|entry| entry.value().generation == generation)
            .map(|entry| *entry.key())
            .collect();
        for xid in stale {
            if let Some((_, pending)) = self
                .pending
                .remove_if(&xid, |_, pending| pending.generation == generation)
            {
                let _ = pending.tx.send(Err(error.clone()));
            }
        }
        self.fail_pings(generation, &error);
        t_gauge!("zk_client_pending_requests").set(self.pending.len() as f64);

        if state != KeeperState::Closed {
            self.state.send_if_modified(|current| {
                if *current == SessionState::Connected || *current == SessionState::Connecting {
                    *current = SessionState::Disconnected;
                    true
                } else {
                    false
                }
            });
        }
        self.watches.dispatch_state(state);
        true
    }

    fn fail_all(&self, error: Error) {
        let keys: Vec<i32> = self.pending.iter().map(|entry| *entry.key()).collect();
        for xid in keys {
            if let Some((_, pending)) = self.pending.remove(&xid) {
                let _ = pending.tx.send(Err(error.clone()));
            }
        }
        for waiter in std::mem::take(&mut *self.pings.lock()) {
            let _ = waiter.tx.send(Err(error.clone()));
        }
    }

    /// The server no longer knows the session: forget it and its watches.
    fn expire(&self, session_id: i64) {
        *self.credentials.lock() = None;
        self.state.send_replace(SessionState::Expired);
        tracing::warn!(session_id = format_args!("0x{session_id:x}"), "session expired");
        t_counter!("zk_client_session_expired_total").increment(1);
        self.watches.dispatch_state(KeeperState::Expired);
    }

    /// Hands a pushed notification to the registry.
    fn deliver(&self, event: WatchedEvent) {
        if event.event_type == zk_wire::EventType::None {
            match event.state {
                KeeperState::Expired => {
                    let session_id = self
                        .credentials
                        .lock()
                        .as_ref()
                        .map(|credentials| credentials.session_id)
                        .unwrap_or_default();
                    self.expire(session_id);
                }
                state => {
                    self.watches.dispatch_state(state);
                }
            }
            return;
        }
        let fired = self.watches.dispatch(&event);
        t_counter!("zk_client_watch_events_total").increment(fired as u64);
    }

    fn enqueue_ping(&self, generation: u64) -> (oneshot::Receiver<Result<()>>, bool) {
        let (tx, rx) = oneshot::channel();
        let mut pings = self.pings.lock();
        let first = !pings.iter().any(|waiter| waiter.generation == generation);
        pings.push(PingWaiter { generation, tx });
        (rx, first)
    }

    fn take_pings(&self, generation: u64) -> Vec<PingWaiter> {
        let mut pings = self.pings.lock();
        let (matched, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut *pings)
            .into_iter()
            .partition(|waiter| waiter.generation == generation);
        *pings = rest;
        matched
    }

    fn resolve_pings(&self, generation: u64) {
        for waiter in self.take_pings(generation) {
            let _ = waiter.tx.send(Ok(()));
        }
    }

    fn fail_pings(&self, generation: u64, error: &Error) {
        for waiter in self.take_pings(generation) {
            let _ = waiter.tx.send(Err(error.clone()));
        }
    }

    /// Queues a ping waiter on a connection that is still live.
    fn join_ping(&self, generation: u64, host: &Host) -> Result<(oneshot::Receiver<Result<()>>, bool)> {
        let queued = self.enqueue_ping(generation);
        if !self.is_live(generation) {
            let error = self.classify(host, "connection replaced");
            self.fail_pings(generation, &error);
            return Err(error);
        }
        Ok(queued)
    }

    /// Queues a ping waiter, writing the ping frame only if none is in
    /// flight on this connection.
    async fn send_ping(&self, link: &mut Link) -> Result<oneshot::Receiver<Result<()>>> {
        let (rx, first) = self.join_ping(link.generation, &link.host)?;
        if first {
            let mut frame = BytesMut::new();
            encode_request(&Ping, xid::PING, &self.config.root, &mut frame);
            if let Err(err) = link.writer.write_frame(&frame).await {
                let error = self.connection_error(&link.host, &err);
                self.fail_generation(link.generation, error.clone(), KeeperState::Disconnected);
                return Err(error);
            }
            tracing::debug!(generation = link.generation, "ping sent");
            t_counter!("zk_client_pings_total").increment(1);
        }
        Ok(rx)
    }

    /// Ping on connection `generation` only; never reconnects.
    async fn ping_on(&self, generation: u64) -> Result<()> {
        let rx = {
            let mut slot = self.link.lock().await;
            let host = self.host.lock().clone();
            let link = slot
                .as_mut()
                .filter(|link| link.generation == generation && self.is_live(generation))
                .ok_or_else(|| self.classify(&host, "connection replaced"))?;
            self.send_ping(link).await?
        };
        rx.await.unwrap_or(Err(Error::Closed))
    }

    async fn send_close(&self, link: &mut Link) {
        let Ok((xid, rx, _guard)) = self.register_live(None, link.generation, &link.host) else {
            return;
        };
        let mut frame = BytesMut::new();
        encode_request(&CloseSession, xid, &self.config.root, &mut frame);
        if let Err(err) = link.writer.write_frame(&frame).await {
            tracing::debug!(error = %format!("{err:#}"), "close session request not sent");
            return;
        }
        match tokio::time::timeout(self.config.connect_timeout, rx).await {
            Ok(Ok(Ok(_))) => tracing::debug!(xid, "close session acknowledged"),
            Ok(Ok(Err(err))) => tracing::debug!(xid, error = %err, "close session failed"),
            Ok(Err(_)) | Err(_) => tracing::debug!(xid, "close session not acknowledged"),
        }
    }
}
