//! Routing tests: which backend sees which command, and the context state
//! machine as observed through the session.

mod common;

use serde_json::json;

use common::{Harness, BUNDLE_ID};
use mobiwd_core::alert::AlertPolicy;
use mobiwd_core::context::Context;
use mobiwd_core::error::ErrorKind;
use mobiwd_core::native::{AgentReply, Method};
use mobiwd_core::session::Reply;

// ---------------------------------------------------------------------------
// Native proxy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn native_commands_are_forwarded_verbatim() {
    let mut h = Harness::new(&[]);
    h.start_app().await;
    h.native.queue_reply(AgentReply::from_body(json!({
        "sessionId": "agent-1", "status": 0, "value": {"ELEMENT": "native-3"}
    })));

    let body = json!({"using": "name", "value": "Login"});
    let reply = h.send(Method::Post, "element", body.clone()).await.unwrap();

    assert_eq!(
        reply,
        Reply::Native(json!({"sessionId": "agent-1", "status": 0, "value": {"ELEMENT": "native-3"}}))
    );
    let calls = h.native.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].path, h.path("element"));
    assert_eq!(calls[0].method, Method::Post);
    assert_eq!(calls[0].body, Some(body));
    assert!(h.content.calls().is_empty());
    assert!(h.session.registry().is_empty());
}

#[tokio::test]
async fn get_requests_are_forwarded_without_body() {
    let mut h = Harness::new(&[]);
    h.start_app().await;

    h.send(Method::Get, "source", serde_json::Value::Null).await.unwrap();

    let calls = h.native.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, Method::Get);
    assert_eq!(calls[0].body, None);
}

#[tokio::test]
async fn alert_hook_runs_before_every_proxied_command() {
    let mut h = Harness::new(&[]);
    h.start(json!({"udid": common::UDID, "bundleId": BUNDLE_ID, "autoAcceptAlerts": true}))
        .await
        .unwrap();
    h.native.clear();
    assert_eq!(h.session.alert_policy(), AlertPolicy::Accept);

    h.send(Method::Get, "source", serde_json::Value::Null).await.unwrap();
    h.send(Method::Post, "element/5/click", json!({})).await.unwrap();

    assert_eq!(
        h.native.paths(),
        vec![
            "/wd/hub/session/:sessionId/accept_alert".to_string(),
            h.path("source"),
            "/wd/hub/session/:sessionId/accept_alert".to_string(),
            h.path("element/5/click"),
        ]
    );
}

#[tokio::test]
async fn dismiss_policy_uses_dismiss_endpoint() {
    let mut h = Harness::new(&[]);
    h.start(json!({"udid": common::UDID, "bundleId": BUNDLE_ID, "autoDismissAlerts": true}))
        .await
        .unwrap();
    h.native.clear();

    h.send(Method::Get, "source", serde_json::Value::Null).await.unwrap();
    assert_eq!(h.native.paths()[0], "/wd/hub/session/:sessionId/dismiss_alert");
}

#[tokio::test]
async fn without_alert_caps_nothing_extra_is_sent() {
    let mut h = Harness::new(&[]);
    h.start_app().await;
    assert_eq!(h.session.alert_policy(), AlertPolicy::NoOp);

    h.send(Method::Get, "source", serde_json::Value::Null).await.unwrap();
    assert_eq!(h.native.paths(), vec![h.path("source")]);
}

// ---------------------------------------------------------------------------
// Driver-local commands
// ---------------------------------------------------------------------------

#[tokio::test]
async fn contexts_list_native_first() {
    let mut h = Harness::new(&[3, 8]);
    h.start_app().await;

    let contexts = h.value(Method::Get, "contexts", serde_json::Value::Null).await.unwrap();
    assert_eq!(contexts, json!(["NATIVE_APP", "WEBVIEW_3", "WEBVIEW_8"]));
    assert!(h.native.calls().is_empty());
}

#[tokio::test]
async fn set_then_get_context_round_trips() {
    let mut h = Harness::new(&[3, 8]);
    h.start_app().await;

    let names = h.value(Method::Get, "contexts", serde_json::Value::Null).await.unwrap();
    for name in names.as_array().unwrap() {
        h.value(Method::Post, "context", json!({ "name": name })).await.unwrap();
        let current = h.value(Method::Get, "context", serde_json::Value::Null).await.unwrap();
        assert_eq!(&current, name);
    }
}

#[tokio::test]
async fn null_context_name_means_native() {
    let mut h = Harness::new(&[3]);
    h.start_in_webview(3).await;
    h.content.queue("frame_by_index", vec![mobiwd_core::remote::AtomResult::ok(json!({"WINDOW": "w1"}))]);
    h.value(Method::Post, "frame", json!({"id": 0})).await.unwrap();
    assert!(h.session.contexts().frame().is_some());

    h.value(Method::Post, "context", json!({"name": null})).await.unwrap();

    assert_eq!(h.session.contexts().active(), Context::Native);
    assert_eq!(h.session.contexts().frame(), None);
    assert!(h.session.contexts().is_proxying());
    assert_eq!(h.content.connected(), None);
}

#[tokio::test]
async fn unknown_context_keeps_the_active_one() {
    let mut h = Harness::new(&[3]);
    h.start_in_webview(3).await;

    let err = h
        .value(Method::Post, "context", json!({"name": "WEBVIEW_99"}))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NoSuchWindow);
    assert_eq!(h.session.contexts().active(), Context::Content(3));
    assert!(!h.session.contexts().is_proxying());
    assert_eq!(h.content.connected(), Some(3));
}

#[tokio::test]
async fn switching_between_pages_moves_the_link() {
    let mut h = Harness::new(&[3, 8]);
    h.start_in_webview(3).await;

    h.value(Method::Post, "context", json!({"name": "WEBVIEW_8"})).await.unwrap();

    assert_eq!(h.session.contexts().active(), Context::Content(8));
    assert_eq!(h.content.connected(), Some(8));
}

#[tokio::test]
async fn implicit_wait_is_driver_local() {
    let mut h = Harness::new(&[]);
    h.start_app().await;

    h.value(Method::Post, "timeouts/implicit_wait", json!({"ms": 1500})).await.unwrap();
    assert_eq!(h.session.implicit_wait().as_millis(), 1500);

    h.value(Method::Post, "timeouts", json!({"implicit": 250})).await.unwrap();
    assert_eq!(h.session.implicit_wait().as_millis(), 250);
    assert!(h.native.calls().is_empty());
}

#[tokio::test]
async fn other_timeouts_succeed_without_changing_the_implicit_wait() {
    let mut h = Harness::new(&[]);
    h.start_app().await;
    h.value(Method::Post, "timeouts", json!({"implicit": 700})).await.unwrap();

    let value = h
        .value(Method::Post, "timeouts", json!({"type": "page load", "ms": 30000}))
        .await
        .unwrap();
    assert_eq!(value, serde_json::Value::Null);
    h.value(Method::Post, "timeouts", json!({"script": 30000})).await.unwrap();

    assert_eq!(h.session.implicit_wait().as_millis(), 700);
    assert!(h.native.calls().is_empty());
}

#[tokio::test]
async fn screenshot_returns_the_agent_value() {
    let mut h = Harness::new(&[]);
    h.start_app().await;
    h.native.queue_reply(AgentReply::ok(json!("iVBORw0KGgo=")));

    let shot = h.value(Method::Get, "screenshot", serde_json::Value::Null).await.unwrap();
    assert_eq!(shot, json!("iVBORw0KGgo="));
    assert_eq!(h.native.paths(), vec!["/wd/hub/session/:sessionId/screenshot".to_string()]);
}

#[tokio::test]
async fn get_in_native_mode_opens_url_on_device_and_attaches() {
    let mut h = Harness::new(&[4, 6]);
    h.start_app().await;

    h.value(Method::Post, "url", json!({"url": "https://example.com/"})).await.unwrap();

    assert!(h.device.log().contains(&"open_url https://example.com/".to_string()));
    assert_eq!(h.session.contexts().active(), Context::Content(6));
    assert_eq!(h.content.connected(), Some(6));
}

#[tokio::test]
async fn get_in_web_context_navigates_the_page() {
    let mut h = Harness::new(&[4]);
    h.start_in_webview(4).await;

    h.value(Method::Post, "url", json!({"url": "https://example.com/next"})).await.unwrap();

    assert_eq!(h.content.navigations(), vec!["https://example.com/next".to_string()]);
    assert!(!h.device.log().iter().any(|e| e.starts_with("open_url")));
}

#[tokio::test]
async fn window_handles_outside_safari() {
    let mut h = Harness::new(&[4]);
    h.start_app().await;

    // not whitelisted, so native mode hands it to the native agent
    let reply = h
        .send(Method::Get, "window_handles", serde_json::Value::Null)
        .await
        .unwrap();
    assert!(matches!(reply, Reply::Native(_)));
    assert_eq!(h.native.paths(), vec![h.path("window_handles")]);

    h.send(Method::Post, "context", json!({"name": "WEBVIEW_4"})).await.unwrap();
    let err = h
        .value(Method::Get, "window_handles", serde_json::Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSuchWindow);
}

#[tokio::test]
async fn unsupported_content_command_is_not_implemented() {
    let mut h = Harness::new(&[4]);
    h.start_in_webview(4).await;

    let err = h
        .value(Method::Get, "cookie", serde_json::Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotImplementedError);
}
