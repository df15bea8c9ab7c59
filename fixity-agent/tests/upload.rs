use std::collections::VecDeque;
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    routing::{get, post},
};
use fixity_agent::host::HostInfo;
use fixity_agent::upload::{RetryPolicy, Uploader};
use fixity_agent::{Agent, AgentConfig, AgentError, AgentEvent, ClientState};
use fixity_model::{IngestRequest, IngestResponse, ScanRecord};

const TOKEN: &str = "secret-token";

/// Scripted stand-in for the server. Each call pops the next scripted
/// status; an empty script (or `None`) answers normally.
#[derive(Clone, Default)]
struct MockServer {
    hello_script: Arc<Mutex<VecDeque<StatusCode>>>,
    hello_body: Arc<Mutex<String>>,
    hello_calls: Arc<AtomicUsize>,
    ingest_script: Arc<Mutex<VecDeque<Option<StatusCode>>>>,
    ingest_calls: Arc<AtomicUsize>,
    accepted: Arc<Mutex<Vec<IngestRequest>>>,
}

impl MockServer {
    fn new() -> Self {
        let mock = Self::default();
        *mock.hello_body.lock().unwrap() = "Hello".to_string();
        mock
    }

    fn script_hello(&self, statuses: &[u16]) {
        let mut script = self.hello_script.lock().unwrap();
        script.extend(statuses.iter().map(|s| StatusCode::from_u16(*s).unwrap()));
    }

    fn script_ingest(&self, statuses: &[Option<u16>]) {
        let mut script = self.ingest_script.lock().unwrap();
        script.extend(
            statuses
                .iter()
                .map(|s| s.map(|code| StatusCode::from_u16(code).unwrap())),
        );
    }

    async fn spawn(&self) -> String {
        let app = Router::new()
            .route("/hello", get(hello))
            .route("/ingest", post(ingest))
            .with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        format!("http://{addr}")
    }
}

async fn hello(State(mock): State<MockServer>) -> (StatusCode, String) {
    mock.hello_calls.fetch_add(1, Ordering::SeqCst);
    match mock.hello_script.lock().unwrap().pop_front() {
        Some(status) => (status, "unavailable".to_string()),
        None => (StatusCode::OK, mock.hello_body.lock().unwrap().clone()),
    }
}

async fn ingest(
    State(mock): State<MockServer>,
    headers: HeaderMap,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, StatusCode> {
    mock.ingest_calls.fetch_add(1, Ordering::SeqCst);
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        == Some(format!("Bearer {TOKEN}").as_str());
    if !authorized {
        return Err(StatusCode::UNAUTHORIZED);
    }
    if let Some(Some(status)) = mock.ingest_script.lock().unwrap().pop_front() {
        return Err(status);
    }
    let received = request.records.len();
    mock.accepted.lock().unwrap().push(request);
    Ok(Json(IngestResponse {
        received,
        ..IngestResponse::default()
    }))
}

fn fast_policy(retries: u32) -> RetryPolicy {
    RetryPolicy {
        retries,
        initial: Duration::from_millis(1),
        max: Duration::from_millis(5),
    }
}

fn agent_config(base_url: &str, token: &str, scan_root: &str, batch: usize) -> AgentConfig {
    let json = serde_json::json!({
        "machine_name": "test-box",
        "server_url": base_url,
        "auth_token": token,
        "scan_paths": [scan_root],
        "tag": "nightly",
        "max_batch_records": batch,
    });
    AgentConfig::from_json_str(&json.to_string()).expect("config")
}

fn record() -> ScanRecord {
    ScanRecord {
        file_path: "/data/a.txt".into(),
        file_name: "a.txt".into(),
        extension: "txt".into(),
        size_bytes: 3,
        sha256: "b".repeat(64),
        scan_ts: "2026-03-01T10:00:00.000000+00:00".into(),
        urn: "test-box:a.txt:txt:1:2026-03-01".into(),
    }
}

fn one_record_request() -> IngestRequest {
    IngestRequest {
        records: vec![record()],
        ..IngestRequest::default()
    }
}

#[tokio::test]
async fn hello_retries_through_transient_failures() {
    let mock = MockServer::new();
    mock.script_hello(&[503, 429]);
    let url = mock.spawn().await;

    let uploader = Uploader::new(&agent_config(&url, TOKEN, ".", 30))
        .expect("uploader")
        .with_policy(fast_policy(3));
    uploader.hello().await.expect("hello succeeds on third attempt");
    assert_eq!(mock.hello_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhausted_retries_report_attempt_count() {
    let mock = MockServer::new();
    mock.script_hello(&[503, 503, 503, 503, 503]);
    let url = mock.spawn().await;

    let uploader = Uploader::new(&agent_config(&url, TOKEN, ".", 30))
        .expect("uploader")
        .with_policy(fast_policy(2));
    let err = uploader.hello().await.expect_err("gives up");
    assert!(matches!(err, AgentError::Transient { attempts: 3, .. }), "{err:?}");
    assert!(err.is_transient());
    assert_eq!(mock.hello_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn unexpected_hello_body_is_rejected() {
    let mock = MockServer::new();
    *mock.hello_body.lock().unwrap() = "hello".to_string();
    let url = mock.spawn().await;

    let uploader = Uploader::new(&agent_config(&url, TOKEN, ".", 30)).expect("uploader");
    let err = uploader.hello().await.expect_err("body mismatch");
    assert!(matches!(err, AgentError::Http { status: 200, .. }), "{err:?}");
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn unauthorized_upload_is_not_retried() {
    let mock = MockServer::new();
    let url = mock.spawn().await;

    let uploader = Uploader::new(&agent_config(&url, "wrong-token", ".", 30))
        .expect("uploader")
        .with_policy(fast_policy(4));
    let err = uploader
        .upload_batch(&one_record_request())
        .await
        .expect_err("unauthorized");
    assert!(matches!(err, AgentError::Auth), "{err:?}");
    assert_eq!(mock.ingest_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn client_errors_fail_without_retry_and_server_errors_retry() {
    let mock = MockServer::new();
    mock.script_ingest(&[Some(400), Some(502), None]);
    let url = mock.spawn().await;

    let uploader = Uploader::new(&agent_config(&url, TOKEN, ".", 30))
        .expect("uploader")
        .with_policy(fast_policy(4));

    let err = uploader
        .upload_batch(&one_record_request())
        .await
        .expect_err("bad request");
    assert!(matches!(err, AgentError::Http { status: 400, .. }), "{err:?}");
    assert_eq!(mock.ingest_calls.load(Ordering::SeqCst), 1);

    let response = uploader
        .upload_batch(&one_record_request())
        .await
        .expect("502 then success");
    assert_eq!(response.received, 1);
    assert_eq!(mock.ingest_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn failed_batch_keeps_earlier_acknowledgements() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("data");
    fs::create_dir_all(&root).expect("mkdir");
    for name in ["a.txt", "b.txt", "c.txt"] {
        fs::write(root.join(name), name).expect("write");
    }
    let state_path = dir.path().join("state.json");

    let mock = MockServer::new();
    mock.script_ingest(&[None, Some(400)]);
    let url = mock.spawn().await;

    let config = agent_config(&url, TOKEN, &root.to_string_lossy(), 2);
    let agent = Agent::new(config, Arc::new(AtomicBool::new(false)))
        .expect("agent")
        .with_retry_policy(fast_policy(1))
        .with_host(HostInfo {
            host_name: "test-host".into(),
            mac: "aa:bb:cc:dd:ee:ff".into(),
        });

    let mut acknowledged = 0;
    let mut emit = |event: AgentEvent| {
        if matches!(event, AgentEvent::BatchAcknowledged { .. }) {
            acknowledged += 1;
        }
    };
    let mut state = ClientState::load(&state_path).expect("state");
    let report = agent
        .run_cycle(&mut state, &state_path, None, &mut emit)
        .await
        .expect("cycle runs");

    assert_eq!(report.queued_files, 3);
    assert_eq!(report.scanned_files, 3);
    assert_eq!(report.batches, 1);
    assert_eq!(report.uploaded_files, 2);
    assert!(report.upload_error.is_some());
    assert_eq!(report.exit_code(), 1);
    assert_eq!(acknowledged, 1);

    let saved = ClientState::load(&state_path).expect("reload");
    assert_eq!(saved.files.len(), 2);
    assert_eq!(saved.machine_id, state.machine_id);

    {
        let accepted = mock.accepted.lock().unwrap();
        let first = &accepted[0];
        assert_eq!(first.host_name, "test-host");
        assert_eq!(first.mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(first.tag, "nightly");
        let names: Vec<&str> = first.records.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    // The unacknowledged file is still unscanned, so it is all the next run picks.
    let mut state = saved;
    let report = agent
        .run_cycle(&mut state, &state_path, None, &mut |_: AgentEvent| {})
        .await
        .expect("second cycle");
    assert_eq!(report.queued_files, 1);
    assert_eq!(report.uploaded_files, 1);
    assert!(report.upload_error.is_none());
    assert_eq!(ClientState::load(&state_path).expect("reload").files.len(), 3);
}

#[tokio::test]
async fn unreachable_server_fails_before_scanning() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("a.txt"), "a").expect("write");
    let state_path = dir.path().join("state.json");

    let config = agent_config(
        "http://127.0.0.1:9",
        TOKEN,
        &dir.path().to_string_lossy(),
        30,
    );
    let agent = Agent::new(config, Arc::new(AtomicBool::new(false)))
        .expect("agent")
        .with_retry_policy(fast_policy(0));

    let mut state = ClientState::new();
    let err = agent
        .run_cycle(&mut state, &state_path, None, &mut |_: AgentEvent| {})
        .await
        .expect_err("liveness fails");
    assert!(matches!(err, AgentError::Transient { attempts: 1, .. }), "{err:?}");
    assert_eq!(err.exit_code(), 2);
    assert!(!state_path.exists());
}
