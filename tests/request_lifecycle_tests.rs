//! Request lifecycle against a scripted legacy gateway.
//!
//! Covers start/stop ordering in both call modes, sync timeouts, failed
//! connects, server-side task failures, cancellation and channel reuse.

mod mock_server;

use parking_lot::Mutex;
use serde_json::Value;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use mock_server::{Frame, MockServer};
use nls_sdk::{
    ClientConfig, EncoderType, Event, EventKind, ExitStatus, NlsClient, NlsError, NodeState,
    SpeechRecognizerRequest,
};

const WAIT: Duration = Duration::from_secs(3);

/// Collects every delivered event in order.
#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<Event>>>);

impl Recorder {
    fn hook(&self) -> impl Fn(&Event) + Send + Sync + 'static {
        let events = Arc::clone(&self.0);
        move |event| events.lock().push(event.clone())
    }

    fn kinds(&self) -> Vec<EventKind> {
        self.0.lock().iter().map(|e| e.kind).collect()
    }

    fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }
}

fn client() -> NlsClient {
    let client = NlsClient::new();
    client.start_work_thread(2).unwrap();
    client
}

fn recognizer(client: &NlsClient, server: &MockServer) -> SpeechRecognizerRequest {
    let request = client
        .create_recognizer_request("nls-sdk-test", false)
        .unwrap();
    request.set_url(&server.url()).unwrap();
    request.set_appkey("test-appkey").unwrap();
    request.set_token("test-token").unwrap();
    request
}

fn record_all(request: &SpeechRecognizerRequest, recorder: &Recorder) {
    request.set_on_started(recorder.hook()).unwrap();
    request.set_on_result_changed(recorder.hook()).unwrap();
    request.set_on_completed(recorder.hook()).unwrap();
    request.set_on_task_failed(recorder.hook()).unwrap();
    request.set_on_channel_closed(recorder.hook()).unwrap();
}

/// A local port nothing listens on.
fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn test_async_start_audio_stop_ordering() {
    let server = MockServer::start(mock_server::recognizer());
    let client = client();
    let request = recognizer(&client, &server);
    let recorder = Recorder::default();
    record_all(&request, &recorder);

    tokio_test::assert_ok!(request.start());
    tokio_test::assert_ok!(request.wait_started(WAIT));
    assert_eq!(request.status(), NodeState::Running);

    for _ in 0..3 {
        assert_eq!(request.send_audio(&[0u8; 640], EncoderType::None).unwrap(), 640);
    }
    tokio_test::assert_ok!(request.stop());
    tokio_test::assert_ok!(request.wait_completed(WAIT));

    assert_eq!(
        server.timeline(),
        vec!["StartRecognition", "<binary>", "<binary>", "<binary>", "StopRecognition"]
    );
    assert_eq!(
        recorder.kinds(),
        vec![
            EventKind::Started,
            EventKind::ResultChanged,
            EventKind::ResultChanged,
            EventKind::ResultChanged,
            EventKind::Completed,
            EventKind::Close,
        ]
    );

    let events = recorder.events();
    let task_id = request.task_id();
    assert_eq!(task_id.len(), 32);
    assert!(events[..5].iter().all(|e| e.task_id == task_id));
    assert_eq!(events[4].text(), "final text");
    assert_eq!(request.status(), NodeState::Closed);
    assert_eq!(request.exit_status(), ExitStatus::Closed);
}

#[test]
fn test_sync_mode_blocks_until_resolution() {
    let server = MockServer::start(mock_server::recognizer());
    let client = client();
    client.set_sync_call_timeout(2000);
    let request = recognizer(&client, &server);

    tokio_test::assert_ok!(request.start());
    assert_eq!(request.status(), NodeState::Running);
    request.send_audio(&[1u8; 320], EncoderType::None).unwrap();
    tokio_test::assert_ok!(request.stop());
    assert_eq!(request.status(), NodeState::Closed);

    assert_eq!(server.header("X-NLS-Token").as_deref(), Some("test-token"));
    let Frame::Text(start) = &server.received()[0] else {
        panic!("first frame must be the start directive");
    };
    assert_eq!(start["header"]["appkey"], "test-appkey");
    assert_eq!(start["payload"]["format"], "pcm");
    assert_eq!(start["context"]["sdk"]["name"], "nls-sdk-test");
}

#[test]
fn test_start_directive_carries_overrides() {
    let server = MockServer::start(mock_server::recognizer());
    let client = client();
    client.set_sync_call_timeout(2000);
    let request = recognizer(&client, &server);
    request.set_intermediate_result(true).unwrap();
    request
        .set_payload_param(r#"{"model": "custom", "format": "opu"}"#)
        .unwrap();
    request.append_http_header("X-Trace", "abc").unwrap();

    request.start().unwrap();
    request.stop().unwrap();

    let Frame::Text(start) = &server.received()[0] else {
        panic!("first frame must be the start directive");
    };
    assert_eq!(start["payload"]["enable_intermediate_result"], true);
    assert_eq!(start["payload"]["model"], "custom");
    assert_eq!(start["payload"]["format"], "opu");
    assert_eq!(server.header("X-Trace").as_deref(), Some("abc"));
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_sync_start_timeout_then_cancel() {
    let server = MockServer::start(mock_server::silent());
    let client = client();
    client.set_sync_call_timeout(300);
    let request = recognizer(&client, &server);
    let recorder = Recorder::default();
    record_all(&request, &recorder);

    let err = request.start().unwrap_err();
    assert!(matches!(err, NlsError::Timeout(_)), "got {err:?}");
    assert!(request.status().is_active());

    tokio_test::assert_ok!(request.cancel());
    assert_eq!(request.status(), NodeState::Cancelled);
    assert_eq!(request.exit_status(), ExitStatus::Cancelled);

    std::thread::sleep(Duration::from_millis(200));
    assert!(recorder.kinds().is_empty(), "cancel must not deliver events");
}

#[test]
fn test_unreachable_host_fails_after_retries() {
    let config = ClientConfig {
        connect_retry_count: 3,
        connect_timeout_ms: 2000,
        sync_call_timeout_ms: 3000,
        ..Default::default()
    };
    let client = NlsClient::with_config(config).unwrap();
    client.start_work_thread(1).unwrap();
    let request = client.create_recognizer_request("nls-sdk-test", false).unwrap();
    request
        .set_url(&format!("ws://127.0.0.1:{}/ws/v1", closed_port()))
        .unwrap();
    request.set_appkey("test-appkey").unwrap();
    request.set_token("test-token").unwrap();
    let recorder = Recorder::default();
    record_all(&request, &recorder);

    let err = request.start().unwrap_err();
    assert!(matches!(err, NlsError::Connect(_)), "got {err:?}");
    assert!(err.code() < 0);
    assert_eq!(request.status(), NodeState::Failed);
    assert_eq!(recorder.kinds(), vec![EventKind::TaskFailed, EventKind::Close]);

    let failed = &recorder.events()[0];
    let body: Value = serde_json::from_str(&failed.response).unwrap();
    assert!(body["TaskFailed"].as_str().is_some());
    let closed: Value = serde_json::from_str(&recorder.events()[1].response).unwrap();
    assert_eq!(closed["channelClosed"], "nls request finished.");

    let dump: Value = serde_json::from_str(&request.dump_all_info()).unwrap();
    assert_eq!(dump["data"]["connect_attempts"], 3);
}

#[test]
fn test_server_task_failed_resolves_sync_start() {
    let server = MockServer::start(mock_server::rejecting(40000003));
    let client = client();
    client.set_sync_call_timeout(2000);
    let request = recognizer(&client, &server);
    let recorder = Recorder::default();
    record_all(&request, &recorder);

    match request.start() {
        Err(NlsError::TaskFailed { status_code, .. }) => assert_eq!(status_code, 40000003),
        other => panic!("expected TaskFailed, got {other:?}"),
    }
    assert_eq!(request.status(), NodeState::Failed);
    assert_eq!(recorder.kinds(), vec![EventKind::TaskFailed, EventKind::Close]);
    assert_eq!(recorder.events()[0].status_code, 40000003);
}

#[test]
fn test_send_before_start_is_rejected() {
    let server = MockServer::start(mock_server::recognizer());
    let client = client();
    let request = recognizer(&client, &server);

    let err = request.send_audio(&[0u8; 640], EncoderType::None).unwrap_err();
    assert!(matches!(err, NlsError::State { .. }));
    assert!(err.code() < 0);
    tokio_test::assert_err!(request.stop());
    assert_eq!(server.connections(), 0);
}

#[test]
fn test_send_after_close_never_reaches_the_server() {
    let server = MockServer::start(mock_server::recognizer());
    let client = client();
    let request = recognizer(&client, &server);

    request.start().unwrap();
    request.wait_started(WAIT).unwrap();
    request.stop().unwrap();
    request.wait_completed(WAIT).unwrap();
    assert_eq!(request.status(), NodeState::Closed);
    let before = server.timeline();

    let err = request.send_audio(&[0u8; 640], EncoderType::None).unwrap_err();
    assert!(matches!(err, NlsError::State { .. }));
    assert!(err.code() < 0);
    tokio_test::assert_err!(request.stop());

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(server.timeline(), before);
    assert_eq!(before, vec!["StartRecognition", "StopRecognition"]);
}

#[test]
fn test_send_after_failure_is_rejected() {
    let server = MockServer::start(mock_server::rejecting(40000003));
    let client = client();
    let request = recognizer(&client, &server);

    request.start().unwrap();
    tokio_test::assert_err!(request.wait_completed(WAIT));
    assert_eq!(request.status(), NodeState::Failed);

    let err = request.send_audio(&[0u8; 640], EncoderType::None).unwrap_err();
    assert!(matches!(err, NlsError::State { .. }));
    assert!(err.code() < 0);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(server.timeline(), vec!["StartRecognition"]);
}

#[test]
fn test_started_state_is_recorded_before_running() {
    let server = MockServer::start(mock_server::recognizer());
    let client = client();
    let request = recognizer(&client, &server);

    request.start().unwrap();
    request.wait_started(WAIT).unwrap();
    assert_eq!(request.status(), NodeState::Running);

    let dump: Value = serde_json::from_str(&request.dump_all_info()).unwrap();
    assert_eq!(dump["status"], "Running");
    assert!(dump["timestamp"]["started"].as_u64().unwrap() > 0);
    request.cancel().unwrap();
}

#[test]
fn test_synthesis_audio_before_started_synthesises_started() {
    let server = MockServer::start(mock_server::synthesizer_audio_first());
    let client = client();
    let request = client
        .create_synthesizer_request("nls-sdk-test", false)
        .unwrap();
    request.set_url(&server.url()).unwrap();
    request.set_appkey("test-appkey").unwrap();
    request.set_token("test-token").unwrap();
    request.set_text("今天天气很好").unwrap();

    let recorder = Recorder::default();
    request.set_on_started(recorder.hook()).unwrap();
    request.set_on_binary_data(recorder.hook()).unwrap();
    request.set_on_completed(recorder.hook()).unwrap();
    request.set_on_channel_closed(recorder.hook()).unwrap();

    request.start().unwrap();
    tokio_test::assert_ok!(request.wait_completed(WAIT));

    assert_eq!(
        recorder.kinds(),
        vec![
            EventKind::Started,
            EventKind::Binary,
            EventKind::Binary,
            EventKind::Completed,
            EventKind::Close,
        ]
    );
    let events = recorder.events();
    assert_eq!(events[0].name, "SynthesisStarted");
    assert_eq!(events[1].binary_data().map(|b| b.len()), Some(640));
    assert_eq!(server.timeline(), vec!["StartSynthesis"]);
}

#[test]
fn test_missing_credentials_fail_locally() {
    let server = MockServer::start(mock_server::recognizer());
    let client = client();
    let request = client.create_recognizer_request("nls-sdk-test", false).unwrap();
    request.set_url(&server.url()).unwrap();

    let err = request.start().unwrap_err();
    assert!(matches!(err, NlsError::Configuration(_)));
    assert_eq!(request.status(), NodeState::Invalid);
    assert_eq!(server.connections(), 0);
}

// =============================================================================
// Cancel and reuse
// =============================================================================

#[test]
fn test_cancel_is_idempotent_and_restartable() {
    let server = MockServer::start(mock_server::recognizer());
    let client = client();
    let request = recognizer(&client, &server);

    tokio_test::assert_ok!(request.cancel());
    assert_eq!(request.status(), NodeState::Invalid);

    request.start().unwrap();
    request.wait_started(WAIT).unwrap();
    tokio_test::assert_ok!(request.cancel());
    tokio_test::assert_ok!(request.cancel());
    assert_eq!(request.status(), NodeState::Cancelled);
    assert!(request.send_audio(&[0u8; 320], EncoderType::None).is_err());

    request.start().unwrap();
    request.wait_started(WAIT).unwrap();
    request.stop().unwrap();
    request.wait_completed(WAIT).unwrap();
    assert_eq!(request.status(), NodeState::Closed);
    tokio_test::assert_ok!(request.cancel());
    assert_eq!(request.status(), NodeState::Closed);
}

#[test]
fn test_each_start_uses_a_fresh_task_id() {
    let server = MockServer::start(mock_server::recognizer());
    let client = client();
    client.set_sync_call_timeout(2000);
    let request = recognizer(&client, &server);

    request.start().unwrap();
    let first = request.task_id();
    request.stop().unwrap();
    request.start().unwrap();
    let second = request.task_id();
    request.stop().unwrap();

    assert_ne!(first, second);
    assert_eq!(server.connections(), 2);
}

#[test]
fn test_long_connection_reuses_the_channel() {
    let server = MockServer::start(mock_server::recognizer());
    let client = client();
    client.set_sync_call_timeout(2000);
    let request = client.create_recognizer_request("nls-sdk-test", true).unwrap();
    request.set_url(&server.url()).unwrap();
    request.set_appkey("test-appkey").unwrap();
    request.set_token("test-token").unwrap();

    for _ in 0..2 {
        request.start().unwrap();
        request.send_audio(&[0u8; 320], EncoderType::None).unwrap();
        request.stop().unwrap();
    }

    assert_eq!(server.connections(), 1);
    assert_eq!(
        server.timeline(),
        vec![
            "StartRecognition",
            "<binary>",
            "StopRecognition",
            "StartRecognition",
            "<binary>",
            "StopRecognition",
        ]
    );
}

#[test]
fn test_raw_message_mode_receives_local_events() {
    let server = MockServer::start(mock_server::recognizer());
    let client = client();
    let request = recognizer(&client, &server);
    let recorder = Recorder::default();
    request.set_on_message(recorder.hook()).unwrap();
    assert!(request.is_raw_mode());
    assert!(request.set_on_started(|_| {}).is_err());

    request.start().unwrap();
    request.wait_started(WAIT).unwrap();
    request.stop().unwrap();
    request.wait_completed(WAIT).unwrap();

    let responses: Vec<Value> = recorder
        .events()
        .iter()
        .map(|e| serde_json::from_str(&e.response).unwrap())
        .collect();
    assert_eq!(responses[0]["header"]["name"], "RecognitionStarted");
    assert_eq!(responses[1]["header"]["name"], "RecognitionCompleted");
    assert_eq!(responses[2]["channelClosed"], "nls request finished.");
}
