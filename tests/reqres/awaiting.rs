//! Replies awaited from async code and via callbacks.

use std::sync::mpsc;
use std::time::Duration;

use serde_json::json;
use sourced_reqres::RequestOptions;

use crate::support;

#[tokio::test]
async fn reply_can_be_awaited() {
    let (_queue, reqres) = support::start();
    reqres
        .respond("v1.reqres-promise.get", |request, sender| {
            assert_eq!(request.payload()["user"], json!("Testfoo"));
            sender.success("users").unwrap();
        })
        .unwrap();

    let data = reqres
        .request("v1.reqres-promise.get", &json!({ "user": "Testfoo" }), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(data, json!("users"));
}

#[tokio::test]
async fn awaited_fail_rejects() {
    let (_queue, reqres) = support::start();
    reqres
        .respond("v1.reqres-promise.put", |_, sender| sender.fail("Invalid data").unwrap())
        .unwrap();

    let rejection = reqres
        .request("v1.reqres-promise.put", &json!({}), RequestOptions::default())
        .await
        .unwrap_err();
    assert_eq!(rejection.as_fail().unwrap().data, json!("Invalid data"));
}

#[test]
fn callback_receives_the_outcome() {
    let (_queue, reqres) = support::start();
    reqres
        .respond("v1.users.get", |_, sender| sender.success("users").unwrap())
        .unwrap();

    let (tx, rx) = mpsc::channel();
    reqres.request_with("v1.users.get", &json!({}), RequestOptions::default(), move |result| {
        tx.send(result).unwrap();
    });

    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap(), json!("users"));
}

#[test]
fn callback_receives_timeouts() {
    let (_queue, reqres) = support::start();

    let (tx, rx) = mpsc::channel();
    reqres.request_with(
        "v1.nobody.get",
        &json!({}),
        RequestOptions::default().with_timeout(Duration::from_millis(50)),
        move |result| tx.send(result).unwrap(),
    );

    assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap_err().is_timeout());
}
