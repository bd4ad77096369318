//! Session lifecycle tests against an in-process ensemble.
//!
//! # Purpose
//! - Verify concurrent requests share one connection and each gets its own reply.
//! - Verify a dropped connection resumes the same session.
//! - Verify expiry is reported once and the next call starts a fresh session.
//! - Verify keepalive pings go out at half the negotiated timeout.
//! - Verify close, authentication, pings and chroot behavior end to end.
mod common;

use std::time::Duration;

use common::{config, config_with_timeout, wait_for};
use futures::future::join_all;
use tokio::time::{Instant, sleep, timeout};
use zk_client::{
    CreateMode, Error, Keeper, Session, SessionState, Status, ZooKeeper, watch_channel,
};
use zk_test_harness::Ensemble;

#[tokio::test]
async fn concurrent_requests_share_one_session() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    let keeper = Keeper::connect(config(&ensemble)).await.expect("connect");
    for index in 0..20 {
        keeper
            .create(&format!("/n{index}"), format!("value-{index}"), CreateMode::Persistent)
            .await
            .expect("create");
    }

    let reads = (0..20).map(|index| {
        let keeper = &keeper;
        async move { (index, keeper.get_data(&format!("/n{index}")).await) }
    });
    for (index, result) in join_all(reads).await {
        let node = result.expect("get_data");
        assert_eq!(node.data, format!("value-{index}").into_bytes());
    }

    assert_eq!(keeper.session().pending_requests(), 0);
    assert_eq!(ensemble.session_count(), 1);
    keeper.close().await.expect("close");
}

#[tokio::test]
async fn server_errors_leave_the_session_usable() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    let keeper = Keeper::connect(config(&ensemble)).await.expect("connect");

    let err = keeper.get_data("/missing").await.expect_err("no node");
    assert_eq!(err, Error::Server(Status::NoNode));
    assert_eq!(keeper.exists("/missing").await.expect("exists"), None);

    keeper
        .create("/dup", "x", CreateMode::Persistent)
        .await
        .expect("create");
    let err = keeper
        .create("/dup", "x", CreateMode::Persistent)
        .await
        .expect_err("exists");
    assert_eq!(err.status(), Some(Status::NodeExists));

    let err = keeper.set_data("/dup", "y", 7).await.expect_err("version");
    assert_eq!(err, Error::Server(Status::BadVersion));
    let stat = keeper.set_data("/dup", "y", 0).await.expect("set_data");
    assert_eq!(stat.version, 1);
    assert!(keeper.session().is_connected());
}

#[tokio::test]
async fn sequential_and_ephemeral_nodes() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    let keeper = Keeper::connect(config(&ensemble)).await.expect("connect");
    keeper
        .create("/queue", "", CreateMode::Persistent)
        .await
        .expect("parent");
    let first = keeper
        .create("/queue/item-", "a", CreateMode::PersistentSequential)
        .await
        .expect("first");
    let second = keeper
        .create("/queue/item-", "b", CreateMode::EphemeralSequential)
        .await
        .expect("second");
    assert_eq!(first, "/queue/item-0000000000");
    assert_eq!(second, "/queue/item-0000000001");

    let children = keeper.get_children_with_stat("/queue").await.expect("children");
    assert_eq!(children.children.len(), 2);
    assert_eq!(children.stat.map(|stat| stat.num_children), Some(2));

    let ephemerals = keeper.get_ephemerals("/queue").await.expect("ephemerals");
    assert_eq!(ephemerals, vec![second.clone()]);

    keeper.close().await.expect("close");
    assert!(ensemble.exists(&first));
    assert!(!ensemble.exists(&second));
}

#[tokio::test]
async fn dropped_connection_resumes_same_session() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    let keeper = Keeper::connect(config(&ensemble)).await.expect("connect");
    keeper
        .create("/eph", "held", CreateMode::Ephemeral)
        .await
        .expect("create");
    let session_id = keeper.session().session_id().expect("session id");
    let mut states = keeper.session().states();

    ensemble.drop_connections(0);
    timeout(
        Duration::from_secs(5),
        states.wait_for(|state| *state == SessionState::Disconnected),
    )
    .await
    .expect("disconnect noticed")
    .expect("state channel open");

    let stat = keeper.exists("/eph").await.expect("exists after resume");
    assert!(stat.is_some());
    assert_eq!(keeper.session().session_id(), Some(session_id));
    assert_eq!(keeper.session().state(), SessionState::Connected);
    assert_eq!(ensemble.session_count(), 1);
}

#[tokio::test]
async fn expired_session_is_reported_then_replaced() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    let keeper = Keeper::connect(config(&ensemble)).await.expect("connect");
    keeper
        .create("/owned", "", CreateMode::Ephemeral)
        .await
        .expect("create");
    let old_id = keeper.session().session_id().expect("session id");

    assert!(ensemble.expire_session(old_id));
    wait_for("disconnect after expiry", || !keeper.session().is_connected()).await;

    let err = keeper.exists("/owned").await.expect_err("expired");
    assert!(err.is_session_expired(), "unexpected error {err:?}");
    assert!(!err.is_retryable());
    assert_eq!(keeper.session().state(), SessionState::Expired);

    assert_eq!(keeper.exists("/owned").await.expect("fresh session"), None);
    let new_id = keeper.session().session_id().expect("new session id");
    assert_ne!(new_id, old_id);
}

#[tokio::test]
async fn connect_to_dead_host_is_no_connection() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    ensemble.kill(0);

    let err = Keeper::connect(config(&ensemble))
        .await
        .expect_err("nothing listening");
    assert!(matches!(err, Error::NoConnection { .. }), "unexpected error {err:?}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn close_ends_the_session_once() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    let keeper = Keeper::connect(config(&ensemble)).await.expect("connect");
    let session_id = keeper.session().session_id().expect("session id");
    let (callback, mut events) = watch_channel();
    keeper.add_watch("/", false, callback).await.expect("watch");

    keeper.close().await.expect("close");
    keeper.close().await.expect("second close is a no-op");

    assert_eq!(keeper.session().state(), SessionState::Closed);
    assert_eq!(keeper.session().session_id(), None);
    assert_eq!(keeper.session().watch_count(), 0);
    wait_for("server side session end", || !ensemble.session_exists(session_id)).await;

    let err = keeper.get_data("/").await.expect_err("closed");
    assert_eq!(err, Error::Closed);

    let closing = common::events_until(&mut events, |event| {
        event.state == zk_client::KeeperState::Closed
    })
    .await;
    assert!(
        closing
            .iter()
            .all(|event| event.event_type == zk_client::EventType::None)
    );
}

#[tokio::test]
async fn auth_is_remembered_and_denials_reported() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    ensemble.deny_auth("bad");
    let keeper = Keeper::connect(config(&ensemble)).await.expect("connect");

    keeper.add_auth("digest", "user:secret").await.expect("digest auth");
    let err = keeper.add_auth("bad", "who:ever").await.expect_err("denied");
    assert_eq!(
        err,
        Error::AuthFailed {
            scheme: "bad".to_string()
        }
    );

    ensemble.drop_connections(0);
    wait_for("disconnect", || !keeper.session().is_connected()).await;
    keeper.get_data("/").await.expect("request after auth replay");
    assert!(keeper.session().is_connected());
}

#[tokio::test]
async fn configured_auth_is_sent_in_the_handshake() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    ensemble.deny_auth("bad");
    let config = config(&ensemble).with_auth(zk_client::AuthInfo::new("bad", "x:y"));

    let err = Keeper::connect(config).await.expect_err("auth in handshake");
    assert!(
        matches!(&err, Error::AuthFailed { scheme } if scheme == "bad"),
        "unexpected error {err:?}"
    );
}

#[tokio::test]
async fn explicit_pings_reach_the_server() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    let session = Session::new(config(&ensemble)).expect("session");
    session.connect().await.expect("connect");
    let before = ensemble.pings();

    let (first, second) = tokio::join!(session.ping(), session.ping());
    first.expect("first ping");
    second.expect("second ping");
    session.ping().await.expect("third ping");

    assert!(ensemble.pings() > before);
    assert!(ensemble.pings() - before <= 3);
}

#[tokio::test]
async fn keepalive_pings_at_half_the_timeout() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    let session_timeout = Duration::from_millis(1000);
    let config = config_with_timeout(&ensemble, session_timeout);
    let keeper = Keeper::connect(config).await.expect("connect");
    let session_id = keeper.session().session_id().expect("session id");
    let (callback, _events) = watch_channel();
    let _watcher = keeper.add_watch("/", true, callback).await.expect("watch");
    let quiet_until = Instant::now() + session_timeout * 2 / 5;
    let due_by = Instant::now() + session_timeout * 7 / 10;

    while Instant::now() < quiet_until {
        assert_eq!(ensemble.pings(), 0, "ping sent well before half the timeout");
        sleep(Duration::from_millis(5)).await;
    }
    while ensemble.pings() == 0 {
        assert!(Instant::now() < due_by, "no ping by 0.7 of the timeout");
        sleep(Duration::from_millis(5)).await;
    }

    sleep(session_timeout * 2).await;
    assert!(ensemble.pings() >= 3);
    assert!(ensemble.session_exists(session_id));
    assert!(keeper.session().is_connected());
}

#[tokio::test]
async fn idle_session_without_watches_lapses() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    let config = config_with_timeout(&ensemble, Duration::from_millis(300));
    let keeper = Keeper::connect(config).await.expect("connect");
    let session_id = keeper.session().session_id().expect("session id");

    wait_for("server to end the idle session", || {
        !ensemble.session_exists(session_id)
    })
    .await;
    assert_eq!(ensemble.pings(), 0);
}

#[tokio::test]
async fn chroot_paths_are_relative_to_the_root() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    assert!(ensemble.create("/app", ""));
    let config = config(&ensemble).with_root("/app").expect("root");
    let keeper = Keeper::connect(config).await.expect("connect");

    let created = keeper
        .create("/job", "run", CreateMode::Persistent)
        .await
        .expect("create");
    assert_eq!(created, "/job");
    assert!(ensemble.exists("/app/job"));
    assert_eq!(keeper.get_children("/").await.expect("children"), vec!["job"]);
    assert_eq!(keeper.sync("/job").await.expect("sync"), "/job");
}

#[tokio::test]
async fn cancelled_requests_leave_nothing_pending() {
    let ensemble = Ensemble::start(1).await.expect("ensemble");
    let keeper = Keeper::connect(config(&ensemble)).await.expect("connect");

    for _ in 0..10 {
        let _ = timeout(Duration::from_micros(1), keeper.get_data("/")).await;
    }
    wait_for("pending table to drain", || {
        keeper.session().pending_requests() == 0
    })
    .await;
    keeper.get_data("/").await.expect("session still usable");
}
