// tests/push_router.rs
mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::RecordingNotifier;
use stream_notifier::notify::{parse_push_contents, Report};
use stream_notifier::{DispatchSummary, NotifierMux, TemplateContext};

fn contents(pairs: &[(&str, &str)]) -> stream_notifier::notify::PushContents {
    let raw: BTreeMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    parse_push_contents(&raw)
}

#[tokio::test]
async fn failing_destination_does_not_block_the_other() {
    let broken = Arc::new(RecordingNotifier::failing());
    let healthy = Arc::new(RecordingNotifier::default());
    let mux = NotifierMux::new(false)
        .with("a_broken", broken.clone(), "discord")
        .with("b_healthy", healthy.clone(), "telegram");

    let ctx = TemplateContext::new().with("title", "Live now");
    let out = mux
        .send_push(&contents(&[("a_broken", "{title}"), ("b_healthy", "{title}!")]), &ctx)
        .await
        .unwrap();

    assert_eq!(out, DispatchSummary { sent: 1, failed: 1, skipped: 0 });
    assert_eq!(*healthy.sent.lock(), vec!["Live now!".to_string()]);
    assert_eq!(broken.sent.lock().len(), 1);
}

#[tokio::test]
async fn reports_are_isolated_too() {
    let broken = Arc::new(RecordingNotifier::failing());
    let healthy = Arc::new(RecordingNotifier::default());
    let mux = NotifierMux::new(false)
        .with("a", broken.clone(), "a")
        .with("b", healthy.clone(), "b");

    mux.send_report(&["a", "missing", "b"], &Report::new("Stream Notifier Started"))
        .await;
    assert_eq!(healthy.report_titles(), vec!["Stream Notifier Started".to_string()]);
}

#[tokio::test]
async fn push_test_sends_literal_content_once() {
    let discord = Arc::new(RecordingNotifier::default());
    let mux = NotifierMux::new(false).with("discord", discord.clone(), "discord");

    mux.send_one("discord", "hello").await.unwrap();
    assert_eq!(*discord.sent.lock(), vec!["hello".to_string()]);

    assert!(mux.send_one("nowhere", "hello").await.is_err());
}

#[tokio::test]
async fn close_is_idempotent() {
    let sink = Arc::new(RecordingNotifier::default());
    let mux = NotifierMux::new(false).with("x", sink.clone(), "x");
    mux.close().await;
    mux.close().await;
    assert_eq!(*sink.closes.lock(), 1);
}
