//! Registration lifecycle: ready, error, rebinding.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sourced_reqres::bus::InMemoryQueue;
use sourced_reqres::{respond, Config, ReqRes, RequestOptions, SetupError};

use crate::support;

#[test]
fn malformed_routing_key_reports_error() {
    let (queue, reqres) = support::start();

    for bad in ["", "v1..get", "v1.users get"] {
        let result = reqres.respond(bad, |_, _| {});
        assert!(matches!(result, Err(SetupError::InvalidRoutingKey { .. })), "{bad:?}");
    }
    assert!(reqres.bindings().is_empty());
    assert!(!queue.is_bound("v1..get"));
}

#[test]
fn closed_bus_fails_to_start() {
    support::init_tracing();
    let queue = Arc::new(InMemoryQueue::new());
    queue.close();

    assert!(matches!(
        ReqRes::start(queue, support::config()),
        Err(SetupError::Transport(_))
    ));
}

#[test]
fn bus_closed_after_start_fails_new_registrations() {
    let (queue, reqres) = support::start();
    queue.close();

    let result = reqres.respond("v1.users.get", |_, _| {});
    assert!(matches!(result, Err(SetupError::Transport(_))));
    assert!(reqres.bindings().is_empty());
}

#[test]
fn requests_after_ready_reach_the_handler() {
    let (queue, reqres) = support::start();
    reqres
        .respond("v1.users.get", |_, sender| sender.success("users").unwrap())
        .unwrap();

    assert!(queue.is_bound("v1.users.get"));
    assert_eq!(reqres.bindings(), vec!["v1.users.get".to_string()]);
    assert_eq!(
        reqres
            .request("v1.users.get", &json!({}), RequestOptions::default())
            .wait()
            .unwrap(),
        json!("users")
    );
}

#[test]
fn rebinding_swaps_the_handler_in_place() {
    let (_queue, reqres) = support::start();
    reqres
        .respond("v1.version.get", |_, sender| sender.success("v1").unwrap())
        .unwrap();
    reqres
        .respond("v1.version.get", |_, sender| sender.success("v2").unwrap())
        .unwrap();

    let data = reqres
        .request("v1.version.get", &json!({}), RequestOptions::default())
        .wait()
        .unwrap();
    assert_eq!(data, json!("v2"));
    assert_eq!(reqres.bindings().len(), 1);
}

#[test]
fn unbound_key_no_longer_answers() {
    let (_queue, reqres) = support::start();
    reqres
        .respond("v1.users.get", |_, sender| sender.success("users").unwrap())
        .unwrap();
    let stats = reqres.unbind("v1.users.get").unwrap();
    assert_eq!(stats.handled, 0);

    let rejection = reqres
        .request(
            "v1.users.get",
            &json!({}),
            RequestOptions::default().with_timeout(Duration::from_millis(80)),
        )
        .wait()
        .unwrap_err();
    assert!(rejection.is_timeout());
}

#[test]
fn standalone_registration_serves_requests() {
    let (queue, reqres) = support::start();
    let registration = respond(
        queue.clone(),
        "v1.standalone.get",
        |_, sender| sender.success("standalone").unwrap(),
        &Config::default().with_poll_interval(Duration::from_millis(5)),
    )
    .unwrap();

    let data = reqres
        .request("v1.standalone.get", &json!({}), RequestOptions::default())
        .wait()
        .unwrap();
    assert_eq!(data, json!("standalone"));

    let stats = registration.stop();
    assert_eq!(stats.handled, 1);
}

#[test]
fn config_from_json() {
    let config =
        Config::from_json_str(r#"{ "default_timeout_ms": 250, "reply_to": "reply.app" }"#)
            .unwrap();
    assert_eq!(config.default_timeout(), Duration::from_millis(250));

    let queue = Arc::new(InMemoryQueue::new());
    let reqres = ReqRes::start(queue.clone(), config).unwrap();
    assert_eq!(reqres.client().reply_to(), "reply.app");
    assert!(queue.is_bound("reply.app"));
}
