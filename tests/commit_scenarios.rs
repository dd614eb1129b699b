//! Commit pipeline scenarios
//!
//! End-to-end flows through the request processor: startup commits,
//! no-op commits, validation aborts, verifier vetoes and the
//! candidate-to-running path.

mod common;

use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use yangstore::core::error::ErrorKind;
use yangstore::core::types::Datastore;
use yangstore::core::value::Value;
use yangstore::np::{
    ChangeEvent, EventFilter, SubscrOptions, SubscribeSpec, SubscriptionHandler, SubscriptionKind,
};
use yangstore::rp::{RequestBody, ResponsePayload};

use common::*;

#[test]
fn test_set_and_commit_startup() {
    let (_dir, runtime) = setup();
    let session = start_session(&runtime, Datastore::Startup);

    let path = "/example-module:container/list[key1='a'][key2='b']/leaf";
    assert!(set_string(&runtime, session, path, "L").is_ok());
    expect_commit_id(&commit(&runtime, session));

    // running is untouched
    assert!(!_dir
        .path()
        .join("data/example-module.running.json")
        .exists());
    assert!(_dir
        .path()
        .join("data/example-module.startup.json")
        .exists());

    // a fresh session observes the committed value
    let fresh = start_session(&runtime, Datastore::Startup);
    let response = get_item(&runtime, fresh, path);
    match &response.payload {
        ResponsePayload::Item(item) => {
            assert_eq!(item.value, Value::String("L".into()));
            assert_eq!(item.path, path);
        }
        other => panic!("expected an item, got {:?}", other),
    }
    runtime.shutdown();
}

#[test]
fn test_commit_without_ops_is_noop() {
    let (_dir, runtime) = setup();
    let session = start_session(&runtime, Datastore::Startup);

    let response = commit(&runtime, session);
    assert!(response.is_ok());
    assert_eq!(response.payload, ResponsePayload::CommitId(None));
    assert!(!_dir
        .path()
        .join("data/example-module.startup.json")
        .exists());
    runtime.shutdown();
}

#[test]
fn test_validation_failure_aborts_before_write() {
    let (_dir, runtime) = setup();
    let session = start_session(&runtime, Datastore::Startup);

    // a list instance without its non-key leaf is fine; missing key
    // leaves are created from predicates, so build an invalid tree by
    // deleting a key leaf after creation
    let path = "/example-module:container/list[key1='a'][key2='b']/leaf";
    assert!(set_string(&runtime, session, path, "L").is_ok());
    let del = runtime.execute(
        session,
        RequestBody::DeleteItem {
            path: "/example-module:container/list[key1='a'][key2='b']/key2".into(),
            options: Default::default(),
        },
    );
    assert!(del.is_ok());

    let response = commit(&runtime, session);
    assert!(!response.is_ok());
    assert!(response
        .errors
        .iter()
        .any(|e| e.kind == ErrorKind::ValidationFailed));
    // nothing reached the disk
    assert!(!_dir
        .path()
        .join("data/example-module.startup.json")
        .exists());
    runtime.shutdown();
}

#[test]
fn test_verifier_rejects_commit() {
    let (_dir, runtime) = setup();

    // subscribing with enable-running makes the module editable in running
    let session = start_session(&runtime, Datastore::Running);
    let subscribe = runtime.execute(
        session,
        RequestBody::Subscribe {
            spec: SubscribeSpec {
                kind: SubscriptionKind::ModuleChange,
                module: "test-module".into(),
                xpath: None,
                destination: "verifier-2".into(),
                priority: 10,
                options: SubscrOptions {
                    enable_running: true,
                    ..Default::default()
                },
                events: EventFilter::verify_and_apply(),
                handler: SubscriptionHandler::Change(Arc::new(|notification| {
                    if notification.event == ChangeEvent::Verify {
                        return Err(yangstore::core::error::Error::new(
                            ErrorKind::ValidationFailed,
                            "rejected by verifier",
                        ));
                    }
                    Ok(())
                })),
            },
        },
    );
    assert!(subscribe.is_ok(), "{:?}", subscribe.errors);

    assert!(set_string(&runtime, session, "/test-module:main/string", "x").is_ok());
    let response = commit(&runtime, session);
    assert!(!response.is_ok());
    assert_eq!(response.errors[0].kind, ErrorKind::ValidationFailed);
    assert!(!_dir.path().join("data/test-module.running.json").exists());

    // discard restores the prior working tree
    assert!(runtime
        .execute(session, RequestBody::DiscardChanges)
        .is_ok());
    let read = get_item(&runtime, session, "/test-module:main/string");
    assert!(!read.is_ok());
    assert_eq!(read.errors[0].kind, ErrorKind::NotFound);
    runtime.shutdown();
}

#[test]
fn test_candidate_commit_after_copy_writes_running() {
    let (_dir, runtime) = setup();

    // enable the module in running via a passive observer, before any
    // data exists
    let session = start_session(&runtime, Datastore::Candidate);
    let subscribe = runtime.execute(
        session,
        RequestBody::Subscribe {
            spec: SubscribeSpec {
                kind: SubscriptionKind::ModuleChange,
                module: "test-module".into(),
                xpath: None,
                destination: "observer".into(),
                priority: 0,
                options: SubscrOptions {
                    enable_running: true,
                    passive: true,
                    ..Default::default()
                },
                events: EventFilter::apply_only(),
                handler: SubscriptionHandler::Change(Arc::new(|_| Ok(()))),
            },
        },
    );
    assert!(subscribe.is_ok(), "{:?}", subscribe.errors);

    // seed startup
    let seed = start_session(&runtime, Datastore::Startup);
    assert!(set_string(&runtime, seed, "/test-module:main/string", "from-startup").is_ok());
    expect_commit_id(&commit(&runtime, seed));
    assert!(!_dir.path().join("data/test-module.running.json").exists());

    // cross-datastore copy into candidate, then commit with zero ops
    let copy = runtime.execute(
        session,
        RequestBody::CopyConfig {
            module: Some("test-module".into()),
            src: Datastore::Startup,
            dst: Datastore::Candidate,
        },
    );
    assert!(copy.is_ok(), "{:?}", copy.errors);
    expect_commit_id(&commit(&runtime, session));

    assert!(_dir.path().join("data/test-module.running.json").exists());
    let fresh = start_session(&runtime, Datastore::Running);
    let read = get_item(&runtime, fresh, "/test-module:main/string");
    match &read.payload {
        ResponsePayload::Item(item) => {
            assert_eq!(item.value.canonical(), "from-startup");
        }
        other => panic!("expected an item, got {:?}", other),
    }
    runtime.shutdown();
}

#[test]
fn test_apply_observer_receives_commit_id() {
    let (_dir, runtime) = setup();
    let session = start_session(&runtime, Datastore::Running);

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let subscribe = runtime.execute(
        session,
        RequestBody::Subscribe {
            spec: SubscribeSpec {
                kind: SubscriptionKind::ModuleChange,
                module: "test-module".into(),
                xpath: None,
                destination: "observer".into(),
                priority: 5,
                options: SubscrOptions {
                    enable_running: true,
                    ..Default::default()
                },
                events: EventFilter::apply_only(),
                handler: SubscriptionHandler::Change(Arc::new(move |notification| {
                    if notification.event == ChangeEvent::Apply {
                        let _ = tx.lock().unwrap().send(notification.commit_id);
                    }
                    Ok(())
                })),
            },
        },
    );
    assert!(subscribe.is_ok(), "{:?}", subscribe.errors);

    assert!(set_string(&runtime, session, "/test-module:main/string", "x").is_ok());
    let commit_id = expect_commit_id(&commit(&runtime, session));

    let observed = rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
    assert_eq!(observed, commit_id);
    runtime.shutdown();
}
