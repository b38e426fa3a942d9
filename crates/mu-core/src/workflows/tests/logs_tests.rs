use std::sync::{Arc, Mutex};

use super::{DEV_CONFIG, harness};
use crate::kernel::Error;
use crate::provider::LogEvent;
use crate::workflows::logs::{self, DEFAULT_SEARCH_DURATION, LineSink};

fn collector() -> (Arc<Mutex<Vec<String>>>, LineSink) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink_lines = lines.clone();
    let sink: LineSink = Arc::new(move |line: &str| sink_lines.lock().unwrap().push(line.to_string()));
    (lines, sink)
}

#[test]
fn test_format_event_appends_stream() {
    let event = LogEvent {
        stream: "web/1".to_string(),
        message: "started\n".to_string(),
        timestamp: 0,
    };
    assert_eq!(logs::format_event(&event), "started [web/1]");
}

#[tokio::test]
async fn test_group_names() {
    let h = harness(DEV_CONFIG).await;

    assert_eq!(logs::environment_groups(&h.ctx, "dev"), vec!["mu-environment-dev"]);
    assert_eq!(logs::service_groups(&h.ctx, "dev", "").unwrap(), vec!["mu-service-my-svc-dev"]);
    assert_eq!(logs::service_groups(&h.ctx, "dev", "api").unwrap(), vec!["mu-service-api-dev"]);

    let pipeline = logs::pipeline_groups(&h.ctx, "").unwrap();
    assert_eq!(pipeline.len(), 6);
    assert_eq!(pipeline[0], "/aws/codebuild/mu-pipeline-my-svc-artifact");
    assert_eq!(pipeline[5], "/aws/codebuild/mu-pipeline-my-svc-test-production");
}

#[tokio::test]
async fn test_viewer_delivers_filtered_lines() {
    let h = harness(DEV_CONFIG).await;
    h.cloud
        .put_log_events("mu-service-my-svc-dev", "task/1", &["GET /health 200", "GET /api 500"]);
    let (lines, sink) = collector();

    logs::viewer(
        h.ctx.clone(),
        vec!["mu-service-my-svc-dev".to_string()],
        DEFAULT_SEARCH_DURATION,
        false,
        "500",
        sink,
    )
    .execute()
    .await
    .unwrap();

    assert_eq!(*lines.lock().unwrap(), vec!["GET /api 500 [task/1]".to_string()]);
}

#[tokio::test]
async fn test_viewer_reads_every_group() {
    let h = harness(DEV_CONFIG).await;
    h.cloud.put_log_events("group-a", "s", &["from a"]);
    h.cloud.put_log_events("group-b", "s", &["from b"]);
    let (lines, sink) = collector();

    logs::viewer(
        h.ctx.clone(),
        vec!["group-a".to_string(), "group-b".to_string()],
        DEFAULT_SEARCH_DURATION,
        false,
        "",
        sink,
    )
    .execute()
    .await
    .unwrap();

    let mut seen = lines.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["from a [s]", "from b [s]"]);
}

#[tokio::test]
async fn test_viewer_fails_on_missing_group() {
    let h = harness(DEV_CONFIG).await;
    let (_, sink) = collector();

    let err = logs::viewer(
        h.ctx.clone(),
        vec!["missing".to_string()],
        DEFAULT_SEARCH_DURATION,
        false,
        "",
        sink,
    )
    .execute()
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Provider { .. }), "{err}");
}
