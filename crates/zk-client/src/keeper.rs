use std::future::Future;
use zk_wire::Operation;

use crate::api::ZooKeeper;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::session::{Session, Watcher};
use crate::watch::WatchCallback;

/// Client bound to the first configured host. Connection failures surface
/// to the caller; nothing is retried.
#[derive(Debug, Clone)]
pub struct Keeper {
    session: Session,
}

impl Keeper {
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self {
            session: Session::new(config)?,
        })
    }

    /// Connects eagerly so configuration mistakes show up here rather than
    /// on the first request.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let keeper = Self::new(config)?;
        keeper.session.connect().await?;
        Ok(keeper)
    }

    pub async fn add_auth(&self, scheme: &str, credentials: impl Into<bytes::Bytes>) -> Result<()> {
        self.session.add_auth(scheme, credentials).await
    }
}

impl From<Session> for Keeper {
    fn from(session: Session) -> Self {
        Self { session }
    }
}

impl ZooKeeper for Keeper {
    fn execute<O: Operation>(&self, op: &O) -> impl Future<Output = Result<O::Output>> + Send {
        self.session.execute(op)
    }

    fn execute_watched<O: Operation>(
        &self,
        op: &O,
        callback: WatchCallback,
    ) -> impl Future<Output = Result<(O::Output, Option<Watcher>)>> + Send {
        self.session.execute_watched(op, callback)
    }

    fn close(&self) -> impl Future<Output = Result<()>> + Send {
        self.session.close()
    }

    fn session(&self) -> &Session {
        &self.session
    }
}
