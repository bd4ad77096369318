//! Host rotation on top of one [`Session`].
//!
//! # Purpose
//! Keeps a session usable while single ensemble members fail. A call that
//! fails with "no connection" or "connection lost" moves the session to the
//! next host and runs again there; every other failure, session expiry in
//! particular, reaches the caller untouched.
//!
//! # Design notes
//! - One rotation at a time. Callers that failed while another caller was
//!   rotating first retry on the host that rotation settled on, unless
//!   they already failed there.
//! - Each host is tried at most once per failed call, even when other
//!   callers rotate in between; the aggregate error lists every attempt.
//! - Watch callbacks are wrapped so a pushed disconnect starts the same
//!   rotation in the background before the user callback runs.
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use zk_wire::{Operation, WatchedEvent};

use crate::api::ZooKeeper;
use crate::config::{ClientConfig, Host};
use crate::error::{Error, HostAttempt, Result};
use crate::session::{Session, Watcher};
use crate::watch::{WatchCallback, is_disconnect};

struct Rotation {
    session: Session,
    hosts: Vec<Host>,
    current: AtomicUsize,
    lock: tokio::sync::Mutex<()>,
    rounds: AtomicU64,
}

/// Client that fails over between the configured hosts.
#[derive(Clone)]
pub struct FailoverClient {
    inner: Arc<Rotation>,
}

impl fmt::Debug for FailoverClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailoverClient")
            .field("hosts", &self.inner.hosts)
            .field("current", &self.current_host())
            .field("session", &self.inner.session)
            .finish()
    }
}

impl FailoverClient {
    /// Starts on a random host so clients spread across the ensemble.
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.hosts.is_empty() {
            return Err(Error::InvalidArgument("no hosts configured".to_string()));
        }
        let start = rand::thread_rng().gen_range(0..config.hosts.len());
        Self::starting_at(config, start)
    }

    /// Starts on `hosts[index]`.
    pub fn starting_at(config: ClientConfig, index: usize) -> Result<Self> {
        let host = config.hosts.get(index).cloned().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "start index {index} outside {} configured hosts",
                config.hosts.len()
            ))
        })?;
        let hosts = config.hosts.clone();
        let rotation = Rotation {
            session: Session::with_host(config, host),
            hosts,
            current: AtomicUsize::new(index),
            lock: tokio::sync::Mutex::new(()),
            rounds: AtomicU64::new(0),
        };
        Ok(Self {
            inner: Arc::new(rotation),
        })
    }

    pub fn hosts(&self) -> &[Host] {
        &self.inner.hosts
    }

    pub fn current_host(&self) -> Host {
        self.inner.session.host()
    }

    pub async fn add_auth(&self, scheme: &str, credentials: impl Into<bytes::Bytes>) -> Result<()> {
        let credentials = credentials.into();
        let round = self.inner.rounds.load(Ordering::Acquire);
        let tried = [self.inner.current.load(Ordering::Acquire)];
        match self.inner.session.add_auth(scheme, credentials.clone()).await {
            Err(err) if err.is_retryable() => {
                let mut attempts = Vec::new();
                self.inner.rotate(round, &tried, &mut attempts).await?;
                self.inner.session.add_auth(scheme, credentials).await
            }
            outcome => outcome,
        }
    }

    async fn run<O: Operation>(
        &self,
        op: &O,
        callback: Option<WatchCallback>,
    ) -> Result<(O::Output, Option<Watcher>)> {
        let rotation = &self.inner;
        let round = rotation.rounds.load(Ordering::Acquire);
        let mut tried = vec![rotation.current.load(Ordering::Acquire)];
        let first = match rotation.attempt(op, &callback).await {
            Err(err) if err.is_retryable() => err,
            outcome => return outcome,
        };
        let _serial = rotation.lock.lock().await;
        let mut attempts = vec![HostAttempt {
            host: rotation.session.host().to_string(),
            error: first,
        }];

        let settled = rotation.current.load(Ordering::Acquire);
        if rotation.rounds.load(Ordering::Acquire) != round && !tried.contains(&settled) {
            tried.push(settled);
            match rotation.attempt(op, &callback).await {
                Err(err) if err.is_retryable() => attempts.push(HostAttempt {
                    host: rotation.session.host().to_string(),
                    error: err,
                }),
                outcome => return outcome,
            }
        }

        rotation.rounds.fetch_add(1, Ordering::AcqRel);
        for index in rotation.remaining(&tried) {
            let host = &rotation.hosts[index];
            rotation.current.store(index, Ordering::Release);
            t_counter!("zk_client_host_rotations_total").increment(1);
            tracing::info!(host = %host, opcode = op.opcode().name(), "failing over");
            let outcome = match rotation.session.reconnect(host).await {
                Ok(()) => rotation.attempt(op, &callback).await,
                Err(err) => Err(err),
            };
            match outcome {
                Err(err) if err.is_retryable() => attempts.push(HostAttempt {
                    host: host.to_string(),
                    error: err,
                }),
                outcome => return outcome,
            }
        }
        tracing::warn!(attempts = attempts.len(), "every host failed");
        Err(Error::AllHostsFailed { attempts })
    }

    fn wrap(&self, callback: WatchCallback) -> WatchCallback {
        let rotation = Arc::downgrade(&self.inner);
        Arc::new(move |event: WatchedEvent| {
            if is_disconnect(&event) {
                spawn_recovery(&rotation);
            }
            callback(event);
        })
    }
}

fn spawn_recovery(rotation: &Weak<Rotation>) {
    let Some(rotation) = rotation.upgrade() else {
        return;
    };
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::debug!("no runtime to recover the connection on");
        return;
    };
    let round = rotation.rounds.load(Ordering::Acquire);
    runtime.spawn(async move {
        let mut attempts = Vec::new();
        match rotation.rotate(round, &[], &mut attempts).await {
            Ok(()) => tracing::debug!("connection recovered after disconnect"),
            Err(err) => tracing::warn!(error = %err, "recovery after disconnect failed"),
        }
    });
}

impl Rotation {
    async fn attempt<O: Operation>(
        &self,
        op: &O,
        callback: &Option<WatchCallback>,
    ) -> Result<(O::Output, Option<Watcher>)> {
        match callback {
            Some(callback) => self.session.execute_watched(op, callback.clone()).await,
            None => self.session.execute(op).await.map(|output| (output, None)),
        }
    }

    /// Host indices to try after the current one fails: every other host in
    /// list order, or the same host again when it is the only one.
    fn schedule(&self) -> Vec<usize> {
        let count = self.hosts.len();
        let start = self.current.load(Ordering::Acquire);
        let steps = if count == 1 { 1 } else { count - 1 };
        (1..=steps).map(|step| (start + step) % count).collect()
    }

    /// The schedule minus hosts this call already failed on. A lone host
    /// stays in it so it still gets its one reconnect.
    fn remaining(&self, tried: &[usize]) -> Vec<usize> {
        let schedule = self.schedule();
        if self.hosts.len() == 1 {
            return schedule;
        }
        schedule
            .into_iter()
            .filter(|index| !tried.contains(index))
            .collect()
    }

    /// Moves the session to a working host unless another rotation already
    /// happened since `round` or the session reconnected on its own.
    async fn rotate(
        &self,
        round: u64,
        tried: &[usize],
        attempts: &mut Vec<HostAttempt>,
    ) -> Result<()> {
        let _serial = self.lock.lock().await;
        if self.rounds.load(Ordering::Acquire) != round || self.session.is_connected() {
            return Ok(());
        }
        self.rounds.fetch_add(1, Ordering::AcqRel);
        for index in self.remaining(tried) {
            let host = &self.hosts[index];
            self.current.store(index, Ordering::Release);
            t_counter!("zk_client_host_rotations_total").increment(1);
            tracing::info!(host = %host, "rotating to next host");
            match self.session.reconnect(host).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() => attempts.push(HostAttempt {
                    host: host.to_string(),
                    error: err,
                }),
                Err(err) => return Err(err),
            }
        }
        Err(Error::AllHostsFailed {
            attempts: std::mem::take(attempts),
        })
    }
}

impl ZooKeeper for FailoverClient {
    fn execute<O: Operation>(&self, op: &O) -> impl Future<Output = Result<O::Output>> + Send {
        async move { self.run(op, None).await.map(|(output, _)| output) }
    }

    fn execute_watched<O: Operation>(
        &self,
        op: &O,
        callback: WatchCallback,
    ) -> impl Future<Output = Result<(O::Output, Option<Watcher>)>> + Send {
        let callback = self.wrap(callback);
        async move { self.run(op, Some(callback)).await }
    }

    fn close(&self) -> impl Future<Output = Result<()>> + Send {
        self.inner.session.close()
    }

    fn session(&self) -> &Session {
        &self.inner.session
    }
}
