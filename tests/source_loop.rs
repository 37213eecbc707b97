// tests/source_loop.rs
mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::{snap, RecordingNotifier, ScriptedSource};
use serde_json::json;
use stream_notifier::checkers::twitch::TwitchRule;
use stream_notifier::config::RuleBinding;
use stream_notifier::notify::parse_push_contents;
use stream_notifier::rules::PushRule;
use stream_notifier::{CacheStore, ChangeDetector, CycleOutcome, NotifierMux};

fn binding(rule: PushRule, dest: &str, template: &str) -> RuleBinding {
    RuleBinding {
        rule,
        contents: parse_push_contents(&BTreeMap::from([(dest.to_string(), template.to_string())])),
    }
}

fn detector(
    source: ScriptedSource,
    cache: CacheStore,
    sink: Arc<RecordingNotifier>,
) -> ChangeDetector {
    let rule = source.rule.clone();
    let mux = Arc::new(NotifierMux::new(false).with("main", sink, "recording"));
    ChangeDetector::new("src", Box::new(source), cache, mux)
        .with_bindings(vec![binding(rule, "main", "new {id}")])
        .report_to(vec!["main".into()])
}

#[tokio::test]
async fn same_identity_is_pushed_once_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(RecordingNotifier::default());
    let first = json!({"id": "abc", "should_push": true});

    let mut d = detector(
        ScriptedSource::debug(vec![Ok(Some(snap(first.clone())))]),
        CacheStore::in_dir(dir.path(), "src"),
        sink.clone(),
    );
    d.run_once().await.unwrap();

    // A fresh loop reading the same cache dir sees the identity as already handled.
    let mut restarted = detector(
        ScriptedSource::debug(vec![Ok(Some(snap(first)))]),
        CacheStore::in_dir(dir.path(), "src"),
        sink.clone(),
    );
    let out = restarted.run_once().await.unwrap();

    assert_eq!(out, CycleOutcome::Evaluated { notified: 0, cancelled: 0, suppressed: 1 });
    assert_eq!(*sink.sent.lock(), vec!["new abc".to_string()]);
}

#[tokio::test]
async fn four_failures_then_success_send_no_reports() {
    let sink = Arc::new(RecordingNotifier::default());
    let mut replies: Vec<anyhow::Result<_>> = (0..4).map(|_| Err(anyhow::anyhow!("timeout"))).collect();
    replies.push(Ok(None));
    let mut d = detector(ScriptedSource::debug(replies), CacheStore::disabled(), sink.clone());

    for _ in 0..5 {
        d.run_once().await.unwrap();
    }
    assert!(sink.report_titles().is_empty());
}

#[tokio::test]
async fn five_failures_then_success_report_down_then_up() {
    let sink = Arc::new(RecordingNotifier::default());
    let mut replies: Vec<anyhow::Result<_>> = (0..7).map(|_| Err(anyhow::anyhow!("timeout"))).collect();
    replies.push(Ok(None));
    let mut d = detector(ScriptedSource::debug(replies), CacheStore::disabled(), sink.clone());

    for _ in 0..8 {
        d.run_once().await.unwrap();
    }
    assert_eq!(
        sink.report_titles(),
        vec!["Debug checker down".to_string(), "Debug checker up".to_string()]
    );
    let reports = sink.reports.lock();
    assert_eq!(reports[0].description.as_deref(), Some("timeout"));
    assert_eq!(reports[1].description.as_deref(), Some("Last exception cleared"));
}

#[tokio::test]
async fn twitch_title_change_with_same_start_is_suppressed() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = CacheStore::in_dir(dir.path(), "src");
    cache
        .set(&snap(json!({"id": "A", "type": "live", "started_at": "T1", "title": "X"})))
        .await
        .unwrap();

    let sink = Arc::new(RecordingNotifier::default());
    let source = ScriptedSource::with_rule(
        "Twitch",
        PushRule::Twitch(TwitchRule::default()),
        vec![Ok(Some(snap(json!({"id": "A", "type": "live", "started_at": "T1", "title": "Y"}))))],
    );
    let mut d = detector(source, CacheStore::in_dir(dir.path(), "src"), sink.clone());
    let out = d.run_once().await.unwrap();

    assert_eq!(out, CycleOutcome::Evaluated { notified: 0, cancelled: 0, suppressed: 1 });
    assert!(sink.sent.lock().is_empty());
    assert!(sink.report_titles().is_empty());
    assert_eq!(d.cached().await.get_str("title"), Some("Y"));
}

#[tokio::test]
async fn missing_template_field_reports_push_failure() {
    let sink = Arc::new(RecordingNotifier::default());
    let source = ScriptedSource::debug(vec![Ok(Some(snap(json!({"id": 1, "should_push": true}))))]);
    let mux = Arc::new(NotifierMux::new(false).with("main", sink.clone(), "recording"));
    let mut d = ChangeDetector::new("src", Box::new(source), CacheStore::disabled(), mux)
        .with_bindings(vec![binding(
            PushRule::Debug(Default::default()),
            "main",
            "{no_such_field}",
        )])
        .report_to(vec!["main".into()]);

    d.run_once().await.unwrap();
    assert!(sink.sent.lock().is_empty());
    assert_eq!(
        sink.report_titles(),
        vec!["Stream found for Debug".to_string(), "Notification Push failed!❌".to_string()]
    );
    let failed = &sink.reports.lock()[1];
    assert!(failed
        .description
        .as_deref()
        .unwrap_or_default()
        .starts_with("TemplateError:"));
}

#[tokio::test]
async fn each_rule_is_judged_on_its_own() {
    let sink = Arc::new(RecordingNotifier::default());
    let source = ScriptedSource::debug(vec![Ok(Some(snap(json!({"id": 2, "should_push": true}))))]);
    let mux = Arc::new(NotifierMux::new(false).with("main", sink.clone(), "recording"));
    let mut d = ChangeDetector::new("src", Box::new(source), CacheStore::disabled(), mux)
        .with_bindings(vec![
            binding(PushRule::Debug(Default::default()), "main", "a {id}"),
            binding(PushRule::Debug(Default::default()), "main", "b {id}"),
        ]);

    let out = d.run_once().await.unwrap();
    assert_eq!(out, CycleOutcome::Evaluated { notified: 2, cancelled: 0, suppressed: 0 });
    assert_eq!(*sink.sent.lock(), vec!["a 2".to_string(), "b 2".to_string()]);
}

#[tokio::test]
async fn unreadable_snapshot_is_reported_once() {
    let sink = Arc::new(RecordingNotifier::default());
    let same = json!({"id": 1, "should_push": null});
    let replies = (0..3).map(|_| Ok(Some(snap(same.clone())))).collect();
    let mut d = detector(ScriptedSource::debug(replies), CacheStore::disabled(), sink.clone());

    let first = d.run_once().await.unwrap();
    assert_eq!(first, CycleOutcome::Evaluated { notified: 0, cancelled: 1, suppressed: 0 });
    for _ in 0..2 {
        let again = d.run_once().await.unwrap();
        assert_eq!(again, CycleOutcome::Evaluated { notified: 0, cancelled: 0, suppressed: 1 });
    }
    assert_eq!(sink.report_titles(), vec!["Push notification cancelled!🚫".to_string()]);
    assert_eq!(
        sink.reports.lock()[0].description.as_deref(),
        Some("Reason: Push is disabled!")
    );
}

#[tokio::test]
async fn malformed_twitch_snapshot_with_same_start_is_cancelled_once() {
    let sink = Arc::new(RecordingNotifier::default());
    let bad = json!({"type": "live", "started_at": "T1", "title": ["not", "text"]});
    let source = ScriptedSource::with_rule(
        "Twitch",
        PushRule::Twitch(TwitchRule::default()),
        vec![Ok(Some(snap(bad.clone()))), Ok(Some(snap(bad)))],
    );
    let mut d = detector(source, CacheStore::disabled(), sink.clone());

    let first = d.run_once().await.unwrap();
    assert_eq!(first, CycleOutcome::Evaluated { notified: 0, cancelled: 1, suppressed: 0 });
    let second = d.run_once().await.unwrap();
    assert_eq!(second, CycleOutcome::Evaluated { notified: 0, cancelled: 0, suppressed: 1 });
    assert_eq!(sink.report_titles().len(), 1);
    assert!(sink.sent.lock().is_empty());
}
