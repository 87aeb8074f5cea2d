use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use logship::collector::runner::CollectorRunner;
use logship::config::{parse_config, Config};
use logship::delivery::sink::HttpSink;
use logship::storage::buffer::FileBufferStore;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct MockSink {
    failing: Arc<AtomicBool>,
    received: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
}

impl MockSink {
    fn messages(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, entries)| {
                entries
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|e| e["Message"].as_str().unwrap_or_default().to_string())
            })
            .collect()
    }
}

async fn ingest(
    State(sink): State<MockSink>,
    headers: HeaderMap,
    Json(entries): Json<serde_json::Value>,
) -> StatusCode {
    if sink.failing.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    let batch_id = headers
        .get("x-batch-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    sink.received.lock().unwrap().push((batch_id, entries));
    StatusCode::OK
}

async fn start_mock_sink() -> (String, MockSink) {
    let sink = MockSink::default();
    let app = Router::new()
        .route("/ingest", post(ingest))
        .with_state(sink.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/ingest", addr), sink)
}

fn agent_config(dir: &TempDir, sink_url: &str) -> Config {
    let yaml = format!(
        r#"
collector:
  machine_id: press-01
  log_directory: {logs}
  buffer_directory: {buffer}
  upload_interval: 200ms
  retry:
    count: 1
    interval: 10ms
sink:
  url: {sink_url}
  timeout: 2s
"#,
        logs = dir.path().join("logs").display(),
        buffer = dir.path().join("buffer").display(),
        sink_url = sink_url,
    );
    parse_config(&yaml).unwrap()
}

fn runner_for(config: &Config) -> CollectorRunner {
    let collector = Arc::new(config.collector.clone());
    let sink = Arc::new(HttpSink::new(&config.sink).unwrap());
    let buffer = Arc::new(FileBufferStore::open(collector.batches_directory()).unwrap());
    CollectorRunner::new(collector, sink, buffer).unwrap()
}

fn append_entries(path: &Path, messages: &[&str]) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    for (i, message) in messages.iter().enumerate() {
        writeln!(
            file,
            r#"{{"TimeGenerated":"2024-06-01T12:00:00Z","Severity":"Error","EventId":{},"Message":"{}","Tags":{{"line":"4"}}}}"#,
            i + 1,
            message
        )
        .unwrap();
    }
}

fn buffered_files(config: &Config) -> usize {
    std::fs::read_dir(config.collector.batches_directory())
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
                .count()
        })
        .unwrap_or(0)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not met within 10s");
}

#[tokio::test]
async fn test_appended_lines_reach_the_sink() {
    let dir = TempDir::new().unwrap();
    let (url, sink) = start_mock_sink().await;
    let config = agent_config(&dir, &url);

    let mut runner = runner_for(&config);
    runner.start().await.unwrap();

    let log = config.collector.log_directory.join("machine.log");
    append_entries(&log, &["spindle overload", "coolant low"]);
    // Not matched by *.log
    append_entries(&config.collector.log_directory.join("notes.txt"), &["ignored"]);

    wait_until(|| sink.messages().len() == 2).await;
    runner.stop(Duration::from_secs(5)).await;

    assert_eq!(sink.messages(), vec!["spindle overload", "coolant low"]);
    let received = sink.received.lock().unwrap();
    let (batch_id, entries) = &received[0];
    assert!(uuid::Uuid::parse_str(batch_id).is_ok());
    assert_eq!(entries[0]["MachineId"], "press-01");
    assert_eq!(entries[0]["Severity"], "Error");
    assert_eq!(entries[0]["Tags"]["line"], "4");
}

#[tokio::test]
async fn test_outage_buffers_then_replays() {
    let dir = TempDir::new().unwrap();
    let (url, sink) = start_mock_sink().await;
    let config = agent_config(&dir, &url);
    sink.failing.store(true, Ordering::SeqCst);

    let mut runner = runner_for(&config);
    runner.start().await.unwrap();

    let log = config.collector.log_directory.join("machine.log");
    append_entries(&log, &["during outage"]);
    wait_until(|| buffered_files(&config) == 1).await;
    assert!(sink.messages().is_empty());

    sink.failing.store(false, Ordering::SeqCst);
    wait_until(|| buffered_files(&config) == 0).await;
    runner.stop(Duration::from_secs(5)).await;

    assert_eq!(sink.messages(), vec!["during outage"]);
    let stats = runner.stats();
    assert_eq!(stats.batches_buffered, 1);
    assert_eq!(stats.batches_replayed, 1);
}

#[tokio::test]
async fn test_restart_resumes_without_duplicates() {
    let dir = TempDir::new().unwrap();
    let (url, sink) = start_mock_sink().await;
    let config = agent_config(&dir, &url);
    let log = config.collector.log_directory.join("machine.log");

    let mut first = runner_for(&config);
    first.start().await.unwrap();
    append_entries(&log, &["one", "two"]);
    wait_until(|| sink.messages().len() == 2).await;
    first.stop(Duration::from_secs(5)).await;
    drop(first);

    // Written while the agent is down
    append_entries(&log, &["three"]);

    let mut second = runner_for(&config);
    second.start().await.unwrap();
    wait_until(|| sink.messages().len() == 3).await;
    // Give any stray duplicate a chance to show up
    tokio::time::sleep(Duration::from_millis(300)).await;
    second.stop(Duration::from_secs(5)).await;

    assert_eq!(sink.messages(), vec!["one", "two", "three"]);
}
