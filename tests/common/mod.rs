//! Shared test fixture: schema documents and a booted runtime.
#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use yangstore::core::runtime::{CoreRuntime, RuntimeConfig};
use yangstore::core::types::{Credentials, Datastore};
use yangstore::core::value::Value;
use yangstore::dm::session::EditOptions;
use yangstore::rp::{RequestBody, Response, ResponsePayload};

pub fn write_schemas(schema_dir: &Path) {
    fs::create_dir_all(schema_dir).unwrap();

    let example_module = serde_json::json!({
        "name": "example-module",
        "prefix": "ex",
        "revision": "2016-03-01",
        "nodes": [{
            "name": "container",
            "kind": "container",
            "children": [{
                "name": "list",
                "kind": "list",
                "keys": ["key1", "key2"],
                "children": [
                    { "name": "key1", "kind": "leaf", "type": { "base": "string" } },
                    { "name": "key2", "kind": "leaf", "type": { "base": "string" } },
                    { "name": "leaf", "kind": "leaf", "type": { "base": "string" } }
                ]
            }]
        }]
    });

    let test_module = serde_json::json!({
        "name": "test-module",
        "prefix": "tm",
        "features": ["extra"],
        "nodes": [{
            "name": "main",
            "kind": "container",
            "children": [
                { "name": "string", "kind": "leaf", "type": { "base": "string" } },
                { "name": "i8", "kind": "leaf", "type": { "base": "int8" } },
                { "name": "numbers", "kind": "leaf-list", "type": { "base": "uint8" },
                  "user_ordered": true }
            ]
        }]
    });

    let dummy_amp = serde_json::json!({
        "name": "dummy-amp",
        "prefix": "amp",
        "nodes": [{
            "name": "amplifier",
            "kind": "container",
            "children": [{
                "name": "stage-1",
                "kind": "container",
                "children": [
                    { "name": "gain", "kind": "leaf", "type": { "base": "uint8" } },
                    { "name": "temperature", "kind": "leaf", "type": { "base": "uint8" },
                      "config": false }
                ]
            }]
        }]
    });

    for (file, doc) in [
        ("example-module@2016-03-01.json", &example_module),
        ("test-module.json", &test_module),
        ("dummy-amp.json", &dummy_amp),
    ] {
        fs::write(
            schema_dir.join(file),
            serde_json::to_string_pretty(doc).unwrap(),
        )
        .unwrap();
    }
}

pub fn setup() -> (TempDir, Arc<CoreRuntime>) {
    let dir = tempfile::tempdir().unwrap();
    let schema_dir = dir.path().join("schemas");
    write_schemas(&schema_dir);
    let config = RuntimeConfig::new(schema_dir, dir.path().join("data"));
    let runtime = CoreRuntime::start(config).unwrap();
    (dir, runtime)
}

pub fn start_session(runtime: &CoreRuntime, datastore: Datastore) -> u32 {
    runtime
        .session_start(Credentials::process(), datastore)
        .unwrap()
}

pub fn set_string(runtime: &CoreRuntime, session: u32, path: &str, value: &str) -> Response {
    runtime.execute(
        session,
        RequestBody::SetItem {
            path: path.to_string(),
            value: Some(Value::String(value.to_string())),
            options: EditOptions::default(),
        },
    )
}

pub fn commit(runtime: &CoreRuntime, session: u32) -> Response {
    runtime.execute(session, RequestBody::Commit)
}

pub fn get_item(runtime: &CoreRuntime, session: u32, path: &str) -> Response {
    runtime.execute(
        session,
        RequestBody::GetItem {
            path: path.to_string(),
        },
    )
}

pub fn get_items(runtime: &CoreRuntime, session: u32, path: &str) -> Response {
    runtime.execute(
        session,
        RequestBody::GetItems {
            path: path.to_string(),
            offset: None,
            limit: None,
        },
    )
}

pub fn expect_items(response: &Response) -> &Vec<yangstore::core::value::Item> {
    assert!(
        response.is_ok(),
        "expected success, got {:?}",
        response.errors
    );
    match &response.payload {
        ResponsePayload::Items(items) => items,
        other => panic!("expected items payload, got {:?}", other),
    }
}

pub fn expect_commit_id(response: &Response) -> u32 {
    assert!(
        response.is_ok(),
        "expected successful commit, got {:?}",
        response.errors
    );
    match &response.payload {
        ResponsePayload::CommitId(Some(id)) => *id,
        other => panic!("expected a commit id, got {:?}", other),
    }
}
