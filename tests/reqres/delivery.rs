//! Redelivery, transport failures and handler misbehaviour.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;
use sourced_reqres::{ReqRes, RequestError, RequestOptions, SendError};

use crate::support::{self, DuplicatingBus};

#[test]
fn duplicated_reply_settles_once() {
    support::init_tracing();
    let bus = Arc::new(DuplicatingBus::default());
    let reqres = ReqRes::start(bus.clone(), support::config()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    reqres
        .respond("v1.users.get", move |_, sender| {
            counter.fetch_add(1, Ordering::SeqCst);
            sender.success("users").unwrap();
        })
        .unwrap();

    let reply = reqres.request("v1.users.get", &json!({}), RequestOptions::default());
    assert_eq!(reply.wait().unwrap(), json!("users"));

    thread::sleep(Duration::from_millis(100));
    // Request delivered twice, each answered twice; one settlement.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(bus.queue.sent_to(reqres.client().reply_to()).len(), 4);
    assert_eq!(reqres.client().pending(), 0);
}

#[test]
fn publish_failure_rejects_immediately() {
    let (queue, reqres) = support::start();
    queue.fail_publish("v1.broken.get");

    let rejection = reqres
        .request("v1.broken.get", &json!({}), RequestOptions::default())
        .wait()
        .unwrap_err();

    assert!(matches!(rejection, RequestError::Transport(_)));
    assert_eq!(reqres.client().pending(), 0);
}

#[test]
fn second_reply_from_handler_is_refused() {
    let (_queue, reqres) = support::start();
    let (tx, rx) = std::sync::mpsc::channel();

    reqres
        .respond("v1.twice.get", move |_, sender| {
            sender.success("first").unwrap();
            tx.send(sender.fail("second")).unwrap();
        })
        .unwrap();

    let data = reqres
        .request("v1.twice.get", &json!({}), RequestOptions::default())
        .wait()
        .unwrap();

    assert_eq!(data, json!("first"));
    assert!(matches!(
        rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        Err(SendError::AlreadySent { .. })
    ));
}

#[test]
fn handler_that_never_replies_produces_an_error() {
    let (_queue, reqres) = support::start();
    reqres.respond("v1.forgetful.get", |_, _| {}).unwrap();

    let rejection = reqres
        .request("v1.forgetful.get", &json!({}), RequestOptions::default())
        .wait()
        .unwrap_err();

    assert_eq!(
        rejection.as_error().unwrap().message,
        "responder dropped without replying"
    );
}

#[test]
fn panicking_handler_produces_an_error_and_keeps_serving() {
    let (_queue, reqres) = support::start();
    reqres
        .respond("v1.fragile.get", |request, sender| {
            if request.payload()["explode"] == json!(true) {
                panic!("exploded");
            }
            sender.success("fine").unwrap();
        })
        .unwrap();

    let rejection = reqres
        .request("v1.fragile.get", &json!({ "explode": true }), RequestOptions::default())
        .wait()
        .unwrap_err();
    assert!(rejection.as_error().is_some());

    let data = reqres
        .request("v1.fragile.get", &json!({}), RequestOptions::default())
        .wait()
        .unwrap();
    assert_eq!(data, json!("fine"));
}
