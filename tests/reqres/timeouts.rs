//! Requests that outlive their deadline.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;
use sourced_reqres::{RequestError, RequestOptions, Sender};

use crate::support;

#[test]
fn silent_responder_times_out_and_late_reply_is_ignored() {
    let (queue, reqres) = support::start();
    let parked: Arc<Mutex<Vec<Sender>>> = Arc::new(Mutex::new(Vec::new()));
    let stash = Arc::clone(&parked);

    reqres
        .respond("v1.slow.get", move |_, sender| {
            stash.lock().unwrap().push(sender);
        })
        .unwrap();

    let started = Instant::now();
    let rejection = reqres
        .request(
            "v1.slow.get",
            &json!({}),
            RequestOptions::default().with_timeout(Duration::from_millis(100)),
        )
        .wait()
        .unwrap_err();

    assert!(started.elapsed() >= Duration::from_millis(100));
    match &rejection {
        RequestError::Timeout(timeout) => {
            assert_eq!(timeout.routing_key, "v1.slow.get");
            assert_eq!(timeout.timeout, Duration::from_millis(100));
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert_eq!(reqres.client().pending(), 0);

    // The responder answers after the caller gave up
    let sender = parked.lock().unwrap().pop().unwrap();
    sender.success("too late").unwrap();
    thread::sleep(Duration::from_millis(100));

    assert_eq!(reqres.client().pending(), 0);
    assert_eq!(queue.acknowledged().len(), 2);
}

#[test]
fn reply_before_deadline_clears_the_timer() {
    let (_queue, reqres) = support::start();
    reqres
        .respond("v1.fast.get", |_, sender| sender.success("quick").unwrap())
        .unwrap();

    let reply = reqres.request(
        "v1.fast.get",
        &json!({}),
        RequestOptions::default().with_timeout(Duration::from_millis(150)),
    );
    assert_eq!(reply.wait().unwrap(), json!("quick"));

    // Past the deadline nothing fires and nothing is left behind
    thread::sleep(Duration::from_millis(250));
    assert_eq!(reqres.client().pending(), 0);
}

#[test]
fn default_timeout_applies_without_override() {
    support::init_tracing();
    let queue = Arc::new(sourced_reqres::bus::InMemoryQueue::new());
    let reqres = sourced_reqres::ReqRes::start(
        queue,
        support::config().with_default_timeout(Duration::from_millis(80)),
    )
    .unwrap();

    let rejection = reqres
        .request("v1.nobody.get", &json!({}), RequestOptions::default())
        .wait()
        .unwrap_err();
    assert!(rejection.is_timeout());
}

#[test]
fn shorter_deadline_fires_first() {
    let (_queue, reqres) = support::start();

    let long = reqres.request(
        "v1.nobody.get",
        &json!({}),
        RequestOptions::default().with_timeout(Duration::from_millis(400)),
    );
    let short = reqres.request(
        "v1.nobody.get",
        &json!({}),
        RequestOptions::default().with_timeout(Duration::from_millis(50)),
    );

    assert!(short.wait().unwrap_err().is_timeout());
    assert!(!long.is_settled());
    assert_eq!(reqres.client().pending(), 1);
    assert!(long.wait().unwrap_err().is_timeout());
}
