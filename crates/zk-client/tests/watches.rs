//! Watch delivery tests against an in-process ensemble.
//!
//! # Purpose
//! - Verify one-shot watches fire exactly once and persistent watches keep firing.
//! - Verify watches are replayed across a reconnect, including changes missed
//!   while disconnected.
//! - Verify connection state changes reach every subscription.
//! - Verify removing a watch also removes it on the server.
mod common;

use std::time::Duration;

use common::{assert_quiet, config, events_until, next_event, wait_for};
use zk_client::{
    CreateMode, EventType, KeeperState, Keeper, SessionState, WatchKind, ZooKeeper, watch_channel,
};
use zk_test_harness::Ensemble;

const QUIET: Duration = Duration::from_millis(200);

#[tokio::test]
async fn data_watch_fires_once() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    assert!(ensemble.create("/w", "v0"));
    let keeper = Keeper::connect(config(&ensemble)).await.expect("connect");
    let (callback, mut events) = watch_channel();

    let (node, watcher) = keeper
        .get_data_watched("/w", callback)
        .await
        .expect("get_data_watched");
    assert_eq!(node.data, b"v0".to_vec());
    let watcher = watcher.expect("watch registered");
    assert_eq!(watcher.path(), "/w");
    assert_eq!(watcher.kind(), WatchKind::Data);

    assert!(ensemble.set_data("/w", "v1"));
    let event = next_event(&mut events).await;
    assert_eq!(event.event_type, EventType::NodeDataChanged);
    assert_eq!(event.state, KeeperState::SyncConnected);
    assert_eq!(event.path, "/w");
    assert!(!watcher.is_active());

    assert!(ensemble.set_data("/w", "v2"));
    assert_quiet(&mut events, QUIET).await;
    assert_eq!(keeper.session().watch_count(), 0);
}

#[tokio::test]
async fn exists_watch_on_missing_node_fires_on_create() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    let keeper = Keeper::connect(config(&ensemble)).await.expect("connect");
    let (callback, mut events) = watch_channel();

    let (stat, watcher) = keeper
        .exists_watched("/later", callback)
        .await
        .expect("exists_watched");
    assert_eq!(stat, None);
    assert_eq!(watcher.expect("watch registered").kind(), WatchKind::Exists);

    assert!(ensemble.create("/later", ""));
    let event = next_event(&mut events).await;
    assert_eq!(event.event_type, EventType::NodeCreated);
    assert_eq!(event.path, "/later");
}

#[tokio::test]
async fn failed_read_does_not_leave_a_watch() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    let keeper = Keeper::connect(config(&ensemble)).await.expect("connect");
    let (callback, _events) = watch_channel();

    keeper
        .get_data_watched("/missing", callback)
        .await
        .expect_err("no node");
    assert_eq!(keeper.session().watch_count(), 0);
}

#[tokio::test]
async fn child_watch_fires_on_membership_change() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    assert!(ensemble.create("/group", ""));
    let keeper = Keeper::connect(config(&ensemble)).await.expect("connect");
    let (callback, mut events) = watch_channel();

    let (children, watcher) = keeper
        .get_children_watched("/group", callback)
        .await
        .expect("get_children_watched");
    assert!(children.is_empty());
    assert_eq!(watcher.expect("watch registered").kind(), WatchKind::Children);

    assert!(ensemble.set_data("/group", "not a membership change"));
    assert!(ensemble.create("/group/member", ""));
    let event = next_event(&mut events).await;
    assert_eq!(event.event_type, EventType::NodeChildrenChanged);
    assert_eq!(event.path, "/group");
}

#[tokio::test]
async fn persistent_recursive_watch_sees_descendants() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    let keeper = Keeper::connect(config(&ensemble)).await.expect("connect");
    let (callback, mut events) = watch_channel();
    let watcher = keeper
        .add_watch("/tree", true, callback)
        .await
        .expect("add_watch");
    assert_eq!(watcher.kind(), WatchKind::PersistentRecursive);

    assert!(ensemble.create("/tree", ""));
    assert!(ensemble.create("/tree/a", ""));
    assert!(ensemble.set_data("/tree/a", "x"));

    let seen: Vec<(EventType, String)> = [
        next_event(&mut events).await,
        next_event(&mut events).await,
        next_event(&mut events).await,
    ]
    .into_iter()
    .map(|event| (event.event_type, event.path))
    .collect();
    assert_eq!(
        seen,
        vec![
            (EventType::NodeCreated, "/tree".to_string()),
            (EventType::NodeCreated, "/tree/a".to_string()),
            (EventType::NodeDataChanged, "/tree/a".to_string()),
        ]
    );
    assert!(watcher.is_active());
}

#[tokio::test]
async fn watches_survive_a_reconnect() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    assert!(ensemble.create("/r", ""));
    let keeper = Keeper::connect(config(&ensemble)).await.expect("connect");
    let session_id = keeper.session().session_id().expect("session id");
    let (callback, mut events) = watch_channel();
    let (_, watcher) = keeper
        .get_data_watched("/r", callback)
        .await
        .expect("get_data_watched");
    let watcher = watcher.expect("watch registered");

    ensemble.drop_connections(0);
    let event = next_event(&mut events).await;
    assert_eq!(event.event_type, EventType::None);
    assert_eq!(event.state, KeeperState::Disconnected);
    assert!(watcher.is_active());

    keeper.exists("/r").await.expect("reconnect");
    assert_eq!(next_event(&mut events).await.state, KeeperState::SyncConnected);
    assert_eq!(ensemble.server_watch_count(session_id), 1);

    assert!(ensemble.set_data("/r", "changed"));
    let event = next_event(&mut events).await;
    assert_eq!(event.event_type, EventType::NodeDataChanged);
    assert_eq!(event.path, "/r");
}

#[tokio::test]
async fn changes_missed_while_disconnected_fire_on_replay() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    assert!(ensemble.create("/m", "before"));
    let keeper = Keeper::connect(config(&ensemble)).await.expect("connect");
    let (callback, mut events) = watch_channel();
    keeper
        .get_data_watched("/m", callback)
        .await
        .expect("get_data_watched");

    ensemble.drop_connections(0);
    wait_for("disconnect", || !keeper.session().is_connected()).await;
    assert!(ensemble.set_data("/m", "while away"));

    keeper.exists("/m").await.expect("reconnect");
    let seen = events_until(&mut events, |event| {
        event.event_type == EventType::NodeDataChanged
    })
    .await;
    assert_eq!(seen.first().map(|event| event.state), Some(KeeperState::Disconnected));
    assert_eq!(seen.last().map(|event| event.path.as_str()), Some("/m"));
    assert_eq!(keeper.session().watch_count(), 0);
}

#[tokio::test]
async fn expiry_notifies_and_clears_watches() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    let keeper = Keeper::connect(config(&ensemble)).await.expect("connect");
    let session_id = keeper.session().session_id().expect("session id");
    let (callback, mut events) = watch_channel();
    keeper.add_watch("/", true, callback).await.expect("add_watch");

    assert!(ensemble.expire_session(session_id));
    wait_for("disconnect", || !keeper.session().is_connected()).await;
    keeper.exists("/").await.expect_err("expired");

    let seen = events_until(&mut events, |event| event.state == KeeperState::Expired).await;
    assert_eq!(seen.first().map(|event| event.state), Some(KeeperState::Disconnected));
    assert_eq!(keeper.session().state(), SessionState::Expired);
    assert_eq!(keeper.session().watch_count(), 0);
    assert_quiet(&mut events, QUIET).await;
}

#[tokio::test]
async fn removing_a_watch_removes_it_on_the_server() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    assert!(ensemble.create("/gone", ""));
    let keeper = Keeper::connect(config(&ensemble)).await.expect("connect");
    let session_id = keeper.session().session_id().expect("session id");
    let (callback, mut events) = watch_channel();
    let watcher = keeper
        .add_watch("/gone", false, callback)
        .await
        .expect("add_watch");
    assert_eq!(ensemble.server_watch_count(session_id), 1);

    watcher.remove().await.expect("remove");
    assert_eq!(keeper.session().watch_count(), 0);
    wait_for("server to drop the watch", || {
        ensemble.server_watch_count(session_id) == 0
    })
    .await;

    assert!(ensemble.set_data("/gone", "x"));
    assert_quiet(&mut events, QUIET).await;
}

#[tokio::test]
async fn shared_path_keeps_server_watch_until_last_removal() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    assert!(ensemble.create("/shared", ""));
    let keeper = Keeper::connect(config(&ensemble)).await.expect("connect");
    let session_id = keeper.session().session_id().expect("session id");
    let (first_callback, mut first) = watch_channel();
    let (second_callback, mut second) = watch_channel();
    let first_watcher = keeper
        .add_watch("/shared", false, first_callback)
        .await
        .expect("first");
    keeper
        .add_watch("/shared", false, second_callback)
        .await
        .expect("second");

    first_watcher.remove().await.expect("remove first");
    assert_eq!(ensemble.server_watch_count(session_id), 1);

    assert!(ensemble.set_data("/shared", "x"));
    assert_eq!(next_event(&mut second).await.path, "/shared");
    assert_quiet(&mut first, QUIET).await;
}

#[tokio::test]
async fn chroot_events_carry_relative_paths() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    assert!(ensemble.create("/app", ""));
    assert!(ensemble.create("/app/cfg", ""));
    let config = config(&ensemble).with_root("/app").expect("root");
    let keeper = Keeper::connect(config).await.expect("connect");
    let (callback, mut events) = watch_channel();
    keeper
        .get_data_watched("/cfg", callback)
        .await
        .expect("get_data_watched");

    assert!(ensemble.set_data("/app/cfg", "x"));
    let event = next_event(&mut events).await;
    assert_eq!(event.path, "/cfg");
    assert_eq!(keeper.session().watch_count(), 0);
    keeper
        .create("/other", "", CreateMode::Persistent)
        .await
        .expect("create");
}
