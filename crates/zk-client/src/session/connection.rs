// Opening a connection: TCP connect, handshake, auth and watch replay, then
// the per-generation receive and keepalive tasks.
use bytes::BytesMut;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use zk_transport::Connection;
use zk_wire::ops::{Auth, encode_request};
use zk_wire::{ConnectRequest, ConnectResponse, KeeperState, Operation, Reply, Status, WatchedEvent, xid};

use super::{Credentials, Link, SessionState, Shared, keepalive, receive};
use crate::config::Host;
use crate::error::{Error, Result};

impl Shared {
    /// Connects to `host` and brings the session up on it, bounded by the
    /// configured connect timeout.
    pub(super) async fn open_link(self: &Arc<Self>, host: &Host) -> Result<Link> {
        self.state.send_if_modified(|current| {
            if *current == SessionState::Expired {
                false
            } else {
                *current = SessionState::Connecting;
                true
            }
        });
        let connect_timeout = self.config.connect_timeout;
        let outcome = match tokio::time::timeout(connect_timeout, self.establish(host)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(self.classify(
                host,
                format!("handshake not completed within {connect_timeout:?}"),
            )),
        };
        if let Err(err) = &outcome {
            tracing::warn!(host = %host, error = %err, "connection attempt failed");
            self.state.send_if_modified(|current| {
                if *current == SessionState::Connecting {
                    *current = SessionState::Disconnected;
                    true
                } else {
                    false
                }
            });
        }
        outcome
    }

    async fn establish(self: &Arc<Self>, host: &Host) -> Result<Link> {
        let transport = self.config.transport_config();
        let mut connection = zk_transport::connect(&host.address, host.port, &transport)
            .await
            .map_err(|err| self.connection_error(host, &err))?;

        let prior = self.credentials.lock().clone();
        let timeout_ms = self.config.session_timeout_ms();
        let request = match &prior {
            Some(prior) => ConnectRequest::resume(
                timeout_ms,
                self.config.read_only,
                prior.session_id,
                prior.password.clone(),
                self.last_zxid(),
            ),
            None => ConnectRequest::new_session(timeout_ms, self.config.read_only),
        };
        connection
            .write_frame(&request.encode())
            .await
            .map_err(|err| self.connection_error(host, &err))?;
        let payload = connection
            .read_frame()
            .await
            .map_err(|err| self.connection_error(host, &err))?
            .ok_or_else(|| self.classify(host, "server closed the connection during handshake"))?;
        let response = ConnectResponse::decode(payload)?;

        if response.is_rejected() {
            return Err(match prior {
                Some(prior) => {
                    self.expire(prior.session_id);
                    Error::SessionExpired {
                        session_id: prior.session_id,
                    }
                }
                None => Error::NoConnection {
                    host: host.to_string(),
                    reason: "server refused to create a session".to_string(),
                },
            });
        }

        let resumed = prior
            .as_ref()
            .is_some_and(|prior| prior.session_id == response.session_id);
        if let Some(prior) = &prior
            && !resumed
        {
            tracing::warn!(
                previous = format_args!("0x{:x}", prior.session_id),
                current = format_args!("0x{:x}", response.session_id),
                "server assigned a different session"
            );
        }
        let credentials = Credentials {
            session_id: response.session_id,
            password: response.password.clone(),
            timeout: Duration::from_millis(u64::try_from(response.timeout_ms).unwrap_or(0)),
            read_only: response.read_only,
        };
        *self.credentials.lock() = Some(credentials.clone());
        self.touch();
        tracing::info!(
            host = %host,
            session_id = format_args!("0x{:x}", credentials.session_id),
            timeout_ms = response.timeout_ms,
            resumed,
            "session established"
        );

        self.replay_auth(&mut connection, host).await?;
        self.replay_watches(&mut connection, host).await?;

        let generation = self.generations.fetch_add(1, Ordering::AcqRel) + 1;
        let (reader, writer) = connection.split();
        self.live.store(generation, Ordering::Release);
        let weak = Arc::downgrade(self);
        let tasks = vec![
            tokio::spawn(receive::run(weak.clone(), reader, generation, host.clone())),
            tokio::spawn(keepalive::run(weak, generation, credentials.timeout)),
        ];
        self.state.send_replace(SessionState::Connected);
        self.watches.dispatch_state(if credentials.read_only {
            KeeperState::ConnectedReadOnly
        } else {
            KeeperState::SyncConnected
        });
        Ok(Link {
            writer,
            generation,
            host: host.clone(),
            tasks,
        })
    }

    /// Re-sends every remembered credential before the connection is used.
    async fn replay_auth(&self, connection: &mut Connection, host: &Host) -> Result<()> {
        let auth = self.auth.lock().clone();
        for info in auth {
            let op = Auth::new(info.scheme.clone(), info.credentials.clone());
            let reply = self.exchange(connection, host, &op, xid::AUTH).await?;
            match reply.status() {
                Status::Ok => tracing::debug!(scheme = %info.scheme, "auth replayed"),
                Status::AuthFailed => {
                    self.watches.dispatch_state(KeeperState::AuthFailed);
                    return Err(Error::AuthFailed {
                        scheme: info.scheme,
                    });
                }
                status => return Err(Error::Server(status)),
            }
        }
        Ok(())
    }

    /// Re-registers every live watch, relative to the last transaction seen,
    /// so changes missed while disconnected still fire.
    async fn replay_watches(&self, connection: &mut Connection, host: &Host) -> Result<()> {
        let request = self.watches.set_watches(self.last_zxid());
        if request.is_empty() {
            return Ok(());
        }
        let reply = self
            .exchange(connection, host, &request, xid::SET_WATCHES)
            .await?;
        if reply.status().is_ok() {
            tracing::debug!(watches = self.watches.len(), "watches replayed");
        } else {
            tracing::warn!(status = %reply.status(), "server rejected watch replay");
        }
        Ok(())
    }

    /// Writes one reserved-id request on a connection that has no receive
    /// task yet and reads until its reply, delivering notifications that
    /// arrive in between.
    async fn exchange<O: Operation>(
        &self,
        connection: &mut Connection,
        host: &Host,
        op: &O,
        reserved: i32,
    ) -> Result<Reply> {
        let mut frame = BytesMut::new();
        encode_request(op, reserved, &self.config.root, &mut frame);
        connection
            .write_frame(&frame)
            .await
            .map_err(|err| self.connection_error(host, &err))?;
        loop {
            let payload = connection
                .read_frame()
                .await
                .map_err(|err| self.connection_error(host, &err))?
                .ok_or_else(|| self.classify(host, "server closed the connection"))?;
            let reply = Reply::decode(payload)?;
            self.observe(&reply.header);
            match reply.header.xid {
                id if id == reserved => return Ok(reply),
                xid::NOTIFICATION => self.deliver(WatchedEvent::decode(&reply)?),
                other => tracing::debug!(xid = other, "unexpected reply during handshake; ignoring"),
            }
        }
    }
}
