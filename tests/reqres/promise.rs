//! Success, error and fail round trips.

use std::io;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use sourced_reqres::{RequestError, RequestOptions, Status};

use crate::support;

#[test]
fn success_resolves_with_data() {
    let (_queue, reqres) = support::start();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    reqres
        .respond("v1.reqres-promise.get", move |request, sender| {
            sink.lock().unwrap().push(request.payload()["user"].clone());
            sender.success("users").unwrap();
        })
        .unwrap();

    let data = reqres
        .request("v1.reqres-promise.get", &json!({ "user": "Testfoo" }), RequestOptions::default())
        .wait()
        .unwrap();

    assert_eq!(data, json!("users"));
    assert_eq!(*seen.lock().unwrap(), vec![json!("Testfoo")]);
    assert_eq!(reqres.client().pending(), 0);
}

#[test]
fn error_rejects_with_error_envelope() {
    let (_queue, reqres) = support::start();
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);

    reqres
        .respond("v1.reqres-promise.post", move |request, sender| {
            *sink.lock().unwrap() = Some(request.payload()["user"].clone());
            let err = io::Error::new(io::ErrorKind::Other, "database unavailable");
            sender.error("Something went wrong", &err, Some(500)).unwrap();
        })
        .unwrap();

    let rejection = reqres
        .request("v1.reqres-promise.post", &json!({ "user": "Foo" }), RequestOptions::default())
        .wait()
        .unwrap_err();

    assert_eq!(*seen.lock().unwrap(), Some(json!("Foo")));
    let error = rejection.as_error().unwrap();
    assert_eq!(error.status(), Status::Error);
    assert_eq!(error.message, "Something went wrong");
    assert_eq!(error.code, 500);
    assert_ne!(error.data, Value::Null);
    assert!(rejection.as_fail().is_none());
}

#[test]
fn fail_rejects_with_fail_envelope() {
    let (_queue, reqres) = support::start();
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);

    reqres
        .respond("v1.reqres-promise.put", move |request, sender| {
            *sink.lock().unwrap() = Some(request.payload()["user"].clone());
            sender.fail("Invalid data").unwrap();
        })
        .unwrap();

    let rejection = reqres
        .request("v1.reqres-promise.put", &json!({ "user": "Foo" }), RequestOptions::default())
        .wait()
        .unwrap_err();

    assert_eq!(*seen.lock().unwrap(), Some(json!("Foo")));
    match rejection {
        RequestError::Fail(fail) => {
            assert_eq!(fail.status(), Status::Fail);
            assert_eq!(fail.data, json!("Invalid data"));
        }
        other => panic!("expected a fail envelope, got {other:?}"),
    }
}

#[test]
fn error_code_falls_back_to_configured_default() {
    support::init_tracing();
    let queue = Arc::new(sourced_reqres::bus::InMemoryQueue::new());
    let reqres = sourced_reqres::ReqRes::start(
        queue,
        support::config().with_default_error_code(503),
    )
    .unwrap();

    reqres
        .respond("v1.reqres-promise.delete", |_, sender| {
            let err = io::Error::new(io::ErrorKind::Other, "down");
            sender.error("unavailable", &err, None).unwrap();
        })
        .unwrap();

    let rejection = reqres
        .request("v1.reqres-promise.delete", &json!({}), RequestOptions::default())
        .wait()
        .unwrap_err();
    assert_eq!(rejection.as_error().unwrap().code, 503);
}

#[test]
fn concurrent_requests_settle_independently() {
    let (_queue, reqres) = support::start();

    reqres
        .respond("v1.math.double", |request, sender| {
            let n = request.payload()["n"].as_i64().unwrap_or_default();
            sender.success(&(n * 2)).unwrap();
        })
        .unwrap();

    let replies: Vec<_> = (0..10)
        .map(|n| reqres.request("v1.math.double", &json!({ "n": n }), RequestOptions::default()))
        .collect();

    for (n, reply) in replies.into_iter().enumerate() {
        assert_eq!(reply.wait().unwrap(), json!(n * 2));
    }
}

#[test]
fn typed_input_and_headers_reach_the_handler() {
    #[derive(serde::Deserialize)]
    struct GetUser {
        user: String,
    }

    let (_queue, reqres) = support::start();
    reqres
        .respond("v1.users.get", |request, sender| match request.input::<GetUser>() {
            Ok(input) => {
                let trace = request.header("traceId").unwrap_or("none").to_string();
                sender.success(&json!({ "user": input.user, "trace": trace })).unwrap();
            }
            Err(e) => sender.fail(&e.to_string()).unwrap(),
        })
        .unwrap();

    let data = reqres
        .request(
            "v1.users.get",
            &json!({ "user": "Testfoo" }),
            RequestOptions::default().with_header("traceId", "t-42"),
        )
        .wait()
        .unwrap();
    assert_eq!(data, json!({ "user": "Testfoo", "trace": "t-42" }));

    let rejection = reqres
        .request("v1.users.get", &json!({ "name": "Testfoo" }), RequestOptions::default())
        .wait()
        .unwrap_err();
    assert!(rejection.as_fail().is_some());
}
