//! Typed client surface shared by [`crate::Keeper`] and
//! [`crate::FailoverClient`].
use bytes::Bytes;
use std::future::Future;
use zk_wire::ops::{
    AddWatch, Children, Create, CreateMode, Delete, Exists, GetAcl, GetChildren, GetData,
    GetEphemerals, NodeAcl, NodeData, SetData, SyncPath,
};
use zk_wire::{Multi, MultiOp, MultiResponse, Operation, Stat};

use crate::error::{Error, Result};
use crate::session::{Session, Watcher};
use crate::watch::WatchCallback;

/// A handle that can run protocol operations.
///
/// Implementors provide the three primitives; every typed helper is built
/// on them. Paths are relative to the configured root.
pub trait ZooKeeper: Send + Sync {
    fn execute<O: Operation>(&self, op: &O) -> impl Future<Output = Result<O::Output>> + Send;

    fn execute_watched<O: Operation>(
        &self,
        op: &O,
        callback: WatchCallback,
    ) -> impl Future<Output = Result<(O::Output, Option<Watcher>)>> + Send;

    fn close(&self) -> impl Future<Output = Result<()>> + Send;

    /// The session requests currently travel on.
    fn session(&self) -> &Session;

    /// Creates a node and returns its actual path, which carries the
    /// sequence suffix for sequential modes.
    fn create(
        &self,
        path: &str,
        data: impl Into<Bytes>,
        mode: CreateMode,
    ) -> impl Future<Output = Result<String>> + Send {
        let op = Create::new(path, data, mode);
        async move { Ok(self.execute(&op?).await?.path) }
    }

    fn delete(&self, path: &str, version: i32) -> impl Future<Output = Result<()>> + Send {
        let op = Delete::new(path, version);
        async move { self.execute(&op?).await }
    }

    fn exists(&self, path: &str) -> impl Future<Output = Result<Option<Stat>>> + Send {
        let op = Exists::new(path);
        async move { self.execute(&op?).await }
    }

    /// Checks for the node and watches it. The watch is kept whether or not
    /// the node exists, and fires on its creation or deletion.
    fn exists_watched(
        &self,
        path: &str,
        callback: WatchCallback,
    ) -> impl Future<Output = Result<(Option<Stat>, Option<Watcher>)>> + Send {
        let op = Exists::new(path).map(|op| op.watched(true));
        async move { self.execute_watched(&op?, callback).await }
    }

    fn get_data(&self, path: &str) -> impl Future<Output = Result<NodeData>> + Send {
        let op = GetData::new(path);
        async move { self.execute(&op?).await }
    }

    fn get_data_watched(
        &self,
        path: &str,
        callback: WatchCallback,
    ) -> impl Future<Output = Result<(NodeData, Option<Watcher>)>> + Send {
        let op = GetData::new(path).map(|op| op.watched(true));
        async move { self.execute_watched(&op?, callback).await }
    }

    fn set_data(
        &self,
        path: &str,
        data: impl Into<Bytes>,
        version: i32,
    ) -> impl Future<Output = Result<Stat>> + Send {
        let op = SetData::new(path, data, version);
        async move { self.execute(&op?).await }
    }

    fn get_children(&self, path: &str) -> impl Future<Output = Result<Vec<String>>> + Send {
        let op = GetChildren::new(path);
        async move { Ok(self.execute(&op?).await?.children) }
    }

    fn get_children_with_stat(&self, path: &str) -> impl Future<Output = Result<Children>> + Send {
        let op = GetChildren::new(path).map(GetChildren::with_stat);
        async move { self.execute(&op?).await }
    }

    fn get_children_watched(
        &self,
        path: &str,
        callback: WatchCallback,
    ) -> impl Future<Output = Result<(Vec<String>, Option<Watcher>)>> + Send {
        let op = GetChildren::new(path).map(|op| op.watched(true));
        async move {
            let (children, watcher) = self.execute_watched(&op?, callback).await?;
            Ok((children.children, watcher))
        }
    }

    fn get_acl(&self, path: &str) -> impl Future<Output = Result<NodeAcl>> + Send {
        let op = GetAcl::new(path);
        async move { self.execute(&op?).await }
    }

    /// Ephemeral nodes owned by this session under `prefix`.
    fn get_ephemerals(&self, prefix: &str) -> impl Future<Output = Result<Vec<String>>> + Send {
        let op = GetEphemerals::new(prefix);
        async move { self.execute(&op?).await }
    }

    fn sync(&self, path: &str) -> impl Future<Output = Result<String>> + Send {
        let op = SyncPath::new(path);
        async move { self.execute(&op?).await }
    }

    /// Submits `ops` as one atomic transaction.
    fn multi(&self, ops: Vec<MultiOp>) -> impl Future<Output = Result<MultiResponse>> + Send {
        async move {
            if ops.is_empty() {
                return Err(Error::InvalidArgument("empty transaction".to_string()));
            }
            self.execute(&Multi { ops }).await
        }
    }

    /// Registers a persistent watch that survives firing.
    fn add_watch(
        &self,
        path: &str,
        recursive: bool,
        callback: WatchCallback,
    ) -> impl Future<Output = Result<Watcher>> + Send {
        let op = AddWatch::new(path, recursive);
        async move {
            let ((), watcher) = self.execute_watched(&op?, callback).await?;
            watcher.ok_or_else(|| {
                Error::ProtocolViolation("server did not keep persistent watch".to_string())
            })
        }
    }
}
