//! Notification sessions and change iteration
//!
//! Apply subscribers receive a commit id, open a read-only session
//! bound to it, iterate the change records and acknowledge; the last
//! acknowledgement releases the commit context.

mod common;

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use yangstore::core::error::ErrorKind;
use yangstore::core::types::{Credentials, Datastore};
use yangstore::dm::commit_context::ChangeOp;
use yangstore::np::{
    ChangeEvent, EventFilter, SubscrOptions, SubscribeSpec, SubscriptionHandler, SubscriptionKind,
};
use yangstore::rp::{RequestBody, ResponsePayload};

use common::*;

struct Observed {
    commit_id: u32,
    subscription_id: u32,
}

fn subscribe_manual_ack_observer(
    runtime: &Arc<yangstore::core::runtime::CoreRuntime>,
    session: u32,
) -> mpsc::Receiver<Observed> {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let response = runtime.execute(
        session,
        RequestBody::Subscribe {
            spec: SubscribeSpec {
                kind: SubscriptionKind::ModuleChange,
                module: "example-module".into(),
                xpath: None,
                destination: "change-observer".into(),
                priority: 1,
                options: SubscrOptions {
                    enable_running: true,
                    manual_ack: true,
                    ..Default::default()
                },
                events: EventFilter::apply_only(),
                handler: SubscriptionHandler::Change(Arc::new(move |notification| {
                    if notification.event == ChangeEvent::Apply {
                        let _ = tx.lock().unwrap().send(Observed {
                            commit_id: notification.commit_id,
                            subscription_id: notification.subscription_id,
                        });
                    }
                    Ok(())
                })),
            },
        },
    );
    assert!(response.is_ok(), "{:?}", response.errors);
    rx
}

#[test]
fn test_change_iteration_over_notification_session() {
    let (_dir, runtime) = setup();
    let session = start_session(&runtime, Datastore::Running);
    let rx = subscribe_manual_ack_observer(&runtime, session);

    // first commit: the list instance with its keys
    let list = "/example-module:container/list[key1='x'][key2='y']";
    let set = runtime.execute(
        session,
        RequestBody::SetItem {
            path: list.into(),
            value: None,
            options: Default::default(),
        },
    );
    assert!(set.is_ok(), "{:?}", set.errors);
    expect_commit_id(&commit(&runtime, session));
    let first = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    runtime
        .ack_commit(first.commit_id, first.subscription_id)
        .unwrap();

    // second commit: a single created leaf
    assert!(set_string(&runtime, session, &format!("{}/leaf", list), "v").is_ok());
    expect_commit_id(&commit(&runtime, session));
    let observed = rx.recv_timeout(Duration::from_secs(1)).unwrap();

    // a notification session bound to the commit inspects the changes
    let notif = runtime
        .notification_session_start(Credentials::process(), observed.commit_id)
        .unwrap();
    let changes = runtime.execute(
        notif,
        RequestBody::GetChanges {
            xpath: "/example-module:container".into(),
            offset: 0,
            limit: 100,
        },
    );
    match &changes.payload {
        ResponsePayload::Changes(records) => {
            assert_eq!(records.len(), 1, "records: {:?}", records);
            assert_eq!(records[0].operation, ChangeOp::Created);
            let created = records[0].new.as_ref().unwrap();
            assert_eq!(
                created.path,
                "/example-module:container/list[key1='x'][key2='y']/leaf"
            );
            assert_eq!(created.value.canonical(), "v");
        }
        other => panic!("expected change records, got {:?}", other),
    }

    // the post-commit data is visible through the notification session
    let read = get_item(&runtime, notif, &format!("{}/leaf", list));
    assert!(read.is_ok(), "{:?}", read.errors);

    // acknowledging releases the context
    runtime
        .ack_commit(observed.commit_id, observed.subscription_id)
        .unwrap();
    let gone = runtime.execute(
        notif,
        RequestBody::GetChanges {
            xpath: "/example-module:container".into(),
            offset: 0,
            limit: 100,
        },
    );
    assert!(!gone.is_ok());
    assert_eq!(gone.errors[0].kind, ErrorKind::NotFound);
    runtime.shutdown();
}

#[test]
fn test_notification_session_whitelist() {
    let (_dir, runtime) = setup();
    let session = start_session(&runtime, Datastore::Running);
    let rx = subscribe_manual_ack_observer(&runtime, session);

    assert!(set_string(
        &runtime,
        session,
        "/example-module:container/list[key1='a'][key2='b']/leaf",
        "x"
    )
    .is_ok());
    expect_commit_id(&commit(&runtime, session));
    let observed = rx.recv_timeout(Duration::from_secs(1)).unwrap();

    let notif = runtime
        .notification_session_start(Credentials::process(), observed.commit_id)
        .unwrap();

    // edits are rejected on a notification session
    let denied = set_string(
        &runtime,
        notif,
        "/example-module:container/list[key1='a'][key2='b']/leaf",
        "y",
    );
    assert!(!denied.is_ok());
    assert_eq!(denied.errors[0].kind, ErrorKind::Unsupported);

    let denied = runtime.execute(notif, RequestBody::Commit);
    assert_eq!(denied.errors[0].kind, ErrorKind::Unsupported);

    // reads are allowed
    let read = get_items(&runtime, notif, "/example-module:container//*");
    assert!(read.is_ok(), "{:?}", read.errors);

    runtime
        .ack_commit(observed.commit_id, observed.subscription_id)
        .unwrap();
    runtime.shutdown();
}

#[test]
fn test_changes_window_bounds() {
    let (_dir, runtime) = setup();
    let session = start_session(&runtime, Datastore::Running);
    let rx = subscribe_manual_ack_observer(&runtime, session);

    assert!(set_string(
        &runtime,
        session,
        "/example-module:container/list[key1='a'][key2='b']/leaf",
        "x"
    )
    .is_ok());
    expect_commit_id(&commit(&runtime, session));
    let observed = rx.recv_timeout(Duration::from_secs(1)).unwrap();

    let notif = runtime
        .notification_session_start(Credentials::process(), observed.commit_id)
        .unwrap();

    // the subtree creation expands to three created leaves (two keys
    // plus the value leaf)
    let all = runtime.execute(
        notif,
        RequestBody::GetChanges {
            xpath: "/example-module:container".into(),
            offset: 0,
            limit: 100,
        },
    );
    let total = match &all.payload {
        ResponsePayload::Changes(records) => records.len(),
        other => panic!("expected change records, got {:?}", other),
    };
    assert_eq!(total, 3);

    // offset == total reports NotFound
    let at_end = runtime.execute(
        notif,
        RequestBody::GetChanges {
            xpath: "/example-module:container".into(),
            offset: total,
            limit: 10,
        },
    );
    assert_eq!(at_end.errors[0].kind, ErrorKind::NotFound);

    runtime
        .ack_commit(observed.commit_id, observed.subscription_id)
        .unwrap();
    runtime.shutdown();
}

#[test]
fn test_unacked_context_expires_via_release_timer() {
    let (_dir, runtime) = setup();
    let session = start_session(&runtime, Datastore::Running);
    let rx = subscribe_manual_ack_observer(&runtime, session);

    assert!(set_string(
        &runtime,
        session,
        "/example-module:container/list[key1='a'][key2='b']/leaf",
        "x"
    )
    .is_ok());
    expect_commit_id(&commit(&runtime, session));
    let observed = rx.recv_timeout(Duration::from_secs(1)).unwrap();

    // without an ack the context is still reachable right away
    assert!(runtime.dm.commit_store().contains(observed.commit_id));
    runtime.shutdown();
}
