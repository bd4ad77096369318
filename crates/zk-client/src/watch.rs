//! Watch subscriptions and event fan-out.
//!
//! # Purpose
//! Tracks every watch the session has asked the server for, keyed by the
//! absolute server path, and routes pushed notifications to the callbacks
//! that registered them.
//!
//! # Design notes
//! Recursive subscriptions live in their own map so a notification can walk
//! its path's ancestors without scanning ordinary watches. Callbacks are
//! collected under the map's shard lock and invoked after it is released, so
//! a callback may register or remove watches itself. A panicking callback is
//! logged and swallowed; it never unwinds into the receive loop.
use dashmap::DashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use zk_wire::ops::SetWatches;
use zk_wire::path;
use zk_wire::{EventType, KeeperState, WatchKind, WatchedEvent};

/// Handler invoked for every event a subscription receives.
pub type WatchCallback = Arc<dyn Fn(WatchedEvent) + Send + Sync>;

/// Adapts the callback interface to a channel.
///
/// ```
/// use zk_client::watch_channel;
/// use zk_wire::{KeeperState, WatchedEvent};
///
/// let (callback, mut events) = watch_channel();
/// callback(WatchedEvent::state_change(KeeperState::Disconnected));
/// assert_eq!(events.try_recv().expect("event").state, KeeperState::Disconnected);
/// ```
pub fn watch_channel() -> (WatchCallback, mpsc::UnboundedReceiver<WatchedEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: WatchCallback = Arc::new(move |event: WatchedEvent| {
        let _ = tx.send(event);
    });
    (callback, rx)
}

#[derive(Clone)]
struct Subscription {
    id: u64,
    kind: WatchKind,
    callback: WatchCallback,
}

/// Identifies one registered subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WatchHandle {
    pub(crate) id: u64,
    /// Absolute server path.
    pub(crate) path: String,
    pub(crate) kind: WatchKind,
}

/// Outcome of removing one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Removal {
    pub(crate) removed: bool,
    /// No other subscription of the same kind is left at the path, so the
    /// server-side watch can go too.
    pub(crate) last_of_kind: bool,
}

pub(crate) struct WatchRegistry {
    root: String,
    next_id: AtomicU64,
    ordinary: DashMap<String, Vec<Subscription>>,
    recursive: DashMap<String, Vec<Subscription>>,
}

impl WatchRegistry {
    pub(crate) fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            next_id: AtomicU64::new(1),
            ordinary: DashMap::new(),
            recursive: DashMap::new(),
        }
    }

    fn table(&self, kind: WatchKind) -> &DashMap<String, Vec<Subscription>> {
        if kind.is_recursive() {
            &self.recursive
        } else {
            &self.ordinary
        }
    }

    pub(crate) fn register(&self, path: String, kind: WatchKind, callback: WatchCallback) -> WatchHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.table(kind)
            .entry(path.clone())
            .or_default()
            .push(Subscription { id, kind, callback });
        WatchHandle { id, path, kind }
    }

    pub(crate) fn remove(&self, handle: &WatchHandle) -> Removal {
        let table = self.table(handle.kind);
        let mut removal = Removal {
            removed: false,
            last_of_kind: false,
        };
        if let Some(mut subscriptions) = table.get_mut(&handle.path) {
            let before = subscriptions.len();
            subscriptions.retain(|subscription| subscription.id != handle.id);
            removal.removed = subscriptions.len() != before;
            removal.last_of_kind = removal.removed
                && !subscriptions
                    .iter()
                    .any(|subscription| subscription.kind == handle.kind);
        }
        table.remove_if(&handle.path, |_, subscriptions| subscriptions.is_empty());
        removal
    }

    pub(crate) fn contains(&self, handle: &WatchHandle) -> bool {
        self.table(handle.kind)
            .get(&handle.path)
            .is_some_and(|subscriptions| subscriptions.iter().any(|subscription| subscription.id == handle.id))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ordinary.is_empty() && self.recursive.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        let count = |table: &DashMap<String, Vec<Subscription>>| {
            table.iter().map(|entry| entry.value().len()).sum::<usize>()
        };
        count(&self.ordinary) + count(&self.recursive)
    }

    /// Delivers a server notification. Returns the number of callbacks run.
    pub(crate) fn dispatch(&self, event: &WatchedEvent) -> usize {
        let mut fired: Vec<WatchCallback> = Vec::new();

        if let Some(mut subscriptions) = self.ordinary.get_mut(&event.path) {
            subscriptions.retain(|subscription| {
                if !subscription.kind.is_handling(event.event_type) {
                    return true;
                }
                fired.push(subscription.callback.clone());
                subscription.kind.is_persistent()
            });
        }
        self.ordinary
            .remove_if(&event.path, |_, subscriptions| subscriptions.is_empty());

        for ancestor in path::ancestors(&event.path) {
            if let Some(subscriptions) = self.recursive.get(ancestor) {
                fired.extend(
                    subscriptions
                        .iter()
                        .map(|subscription| subscription.callback.clone()),
                );
            }
        }

        let delivered = WatchedEvent {
            path: path::strip_root(&self.root, &event.path).to_string(),
            ..event.clone()
        };
        let count = fired.len();
        for callback in fired {
            invoke(&callback, delivered.clone());
        }
        tracing::debug!(path = %event.path, event_type = ?event.event_type, callbacks = count, "dispatched watch event");
        count
    }

    /// Tells every subscription about a connection state change. Expiry and
    /// close also drop all subscriptions, since the server forgot them.
    pub(crate) fn dispatch_state(&self, state: KeeperState) -> usize {
        let drop_all = matches!(state, KeeperState::Expired | KeeperState::Closed);
        let collect = |table: &DashMap<String, Vec<Subscription>>| -> Vec<WatchCallback> {
            table
                .iter()
                .flat_map(|entry| {
                    entry
                        .value()
                        .iter()
                        .map(|subscription| subscription.callback.clone())
                        .collect::<Vec<_>>()
                })
                .collect()
        };
        let mut fired = collect(&self.ordinary);
        fired.extend(collect(&self.recursive));
        if drop_all {
            self.ordinary.clear();
            self.recursive.clear();
        }

        let event = WatchedEvent::state_change(state);
        let count = fired.len();
        for callback in fired {
            invoke(&callback, event.clone());
        }
        if count > 0 {
            tracing::debug!(?state, callbacks = count, "dispatched state change to watches");
        }
        count
    }

    /// Groups every registered path by kind for re-arming after a reconnect.
    pub(crate) fn set_watches(&self, relative_zxid: i64) -> SetWatches {
        let mut request = SetWatches {
            relative_zxid,
            ..Default::default()
        };
        for table in [&self.ordinary, &self.recursive] {
            for entry in table.iter() {
                for subscription in entry.value() {
                    request.push(entry.key().clone(), subscription.kind);
                }
            }
        }
        request
    }
}

fn invoke(callback: &WatchCallback, event: WatchedEvent) {
    if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
        tracing::warn!("watch callback panicked");
    }
}

/// Whether a synthetic event reports a lost connection.
pub(crate) fn is_disconnect(event: &WatchedEvent) -> bool {
    event.event_type == EventType::None && event.state == KeeperState::Disconnected
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use zk_wire::Status;

    fn recorder() -> (WatchCallback, Arc<Mutex<Vec<WatchedEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: WatchCallback = Arc::new(move |event: WatchedEvent| sink.lock().push(event));
        (callback, seen)
    }

    fn node_event(event_type: EventType, path: &str) -> WatchedEvent {
        WatchedEvent {
            event_type,
            state: KeeperState::SyncConnected,
            path: path.to_string(),
            zxid: 10,
            status: Status::Ok,
        }
    }

    #[test]
    fn one_shot_fires_once_and_only_for_its_event_type() {
        let registry = WatchRegistry::new("/");
        let (callback, seen) = recorder();
        registry.register("/a".to_string(), WatchKind::Data, callback);

        assert_eq!(registry.dispatch(&node_event(EventType::NodeChildrenChanged, "/a")), 0);
        assert_eq!(registry.dispatch(&node_event(EventType::NodeDataChanged, "/a")), 1);
        assert_eq!(registry.dispatch(&node_event(EventType::NodeDataChanged, "/a")), 0);
        assert_eq!(seen.lock().len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn persistent_watch_survives_firing() {
        let registry = WatchRegistry::new("/");
        let (callback, seen) = recorder();
        registry.register("/p".to_string(), WatchKind::Persistent, callback);
        for _ in 0..3 {
            registry.dispatch(&node_event(EventType::NodeDataChanged, "/p"));
        }
        assert_eq!(seen.lock().len(), 3);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn recursive_watch_fires_for_descendants_only() {
        let registry = WatchRegistry::new("/");
        let (at_a, seen_a) = recorder();
        let (at_root, seen_root) = recorder();
        registry.register("/a".to_string(), WatchKind::PersistentRecursive, at_a);
        registry.register("/".to_string(), WatchKind::PersistentRecursive, at_root);

        for path in ["/a", "/a/b", "/a/b/c", "/x"] {
            registry.dispatch(&node_event(EventType::NodeCreated, path));
        }
        let paths: Vec<String> = seen_a.lock().iter().map(|event| event.path.clone()).collect();
        assert_eq!(paths, vec!["/a", "/a/b", "/a/b/c"]);
        assert_eq!(seen_root.lock().len(), 4);
    }

    #[test]
    fn events_are_delivered_relative_to_root() {
        let registry = WatchRegistry::new("/app");
        let (callback, seen) = recorder();
        registry.register("/app/n".to_string(), WatchKind::Exists, callback);
        registry.dispatch(&node_event(EventType::NodeCreated, "/app/n"));
        assert_eq!(seen.lock()[0].path, "/n");
    }

    #[test]
    fn disconnect_keeps_subscriptions_and_expiry_drops_them() {
        let registry = WatchRegistry::new("/");
        let (callback, seen) = recorder();
        registry.register("/d".to_string(), WatchKind::Data, callback.clone());
        registry.register("/r".to_string(), WatchKind::PersistentRecursive, callback);

        assert_eq!(registry.dispatch_state(KeeperState::Disconnected), 2);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.dispatch_state(KeeperState::Expired), 2);
        assert!(registry.is_empty());
        let states: Vec<KeeperState> = seen.lock().iter().map(|event| event.state).collect();
        assert_eq!(
            states,
            vec![
                KeeperState::Disconnected,
                KeeperState::Disconnected,
                KeeperState::Expired,
                KeeperState::Expired
            ]
        );
        assert!(is_disconnect(&seen.lock()[0]));
    }

    #[test]
    fn removal_reports_last_subscription_of_kind() {
        let registry = WatchRegistry::new("/");
        let (callback, _) = recorder();
        let first = registry.register("/n".to_string(), WatchKind::Data, callback.clone());
        let second = registry.register("/n".to_string(), WatchKind::Data, callback.clone());
        let other = registry.register("/n".to_string(), WatchKind::Children, callback);

        let removal = registry.remove(&first);
        assert!(removal.removed && !removal.last_of_kind);
        let removal = registry.remove(&second);
        assert!(removal.removed && removal.last_of_kind);
        assert!(!registry.remove(&second).removed);
        assert!(registry.contains(&other));
    }

    #[test]
    fn set_watches_groups_paths_by_kind() {
        let registry = WatchRegistry::new("/");
        let (callback, _) = recorder();
        registry.register("/d".to_string(), WatchKind::Data, callback.clone());
        registry.register("/d".to_string(), WatchKind::Data, callback.clone());
        registry.register("/e".to_string(), WatchKind::Exists, callback.clone());
        registry.register("/c".to_string(), WatchKind::Children, callback.clone());
        registry.register("/r".to_string(), WatchKind::PersistentRecursive, callback);

        let request = registry.set_watches(77);
        assert_eq!(request.relative_zxid, 77);
        assert_eq!(request.data, vec!["/d".to_string()]);
        assert_eq!(request.exist, vec!["/e".to_string()]);
        assert_eq!(request.child, vec!["/c".to_string()]);
        assert_eq!(request.persistent_recursive, vec!["/r".to_string()]);
        assert!(request.persistent.is_empty());
    }

    #[test]
    fn panicking_callback_does_not_stop_delivery() {
        let registry = WatchRegistry::new("/");
        let (callback, seen) = recorder();
        registry.register(
            "/p".to_string(),
            WatchKind::Persistent,
            Arc::new(|_: WatchedEvent| panic!("boom")),
        );
        registry.register("/p".to_string(), WatchKind::Persistent, callback);
        assert_eq!(registry.dispatch(&node_event(EventType::NodeDeleted, "/p")), 2);
        assert_eq!(seen.lock().len(), 1);
    }
}
