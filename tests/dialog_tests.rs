//! Dialog assistant flows: audio dialogs end on the dialog result, not on
//! recognition completion; text dialogs get the dialog result alone.

mod mock_server;

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use mock_server::{Frame, MockServer};
use nls_sdk::{
    DialogAssistantRequest, DialogVersion, EncoderType, Event, EventKind, NlsClient, NodeState,
};

const WAIT: Duration = Duration::from_secs(3);

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
}

fn client() -> NlsClient {
    let client = NlsClient::new();
    client.start_work_thread(1).unwrap();
    client
}

fn dialog(client: &NlsClient, server: &MockServer, recorder: &Recorder) -> DialogAssistantRequest {
    let request = client
        .create_dialog_assistant_request(DialogVersion::V1, "nls-sdk-test", false)
        .unwrap();
    request.set_url(&server.url()).unwrap();
    request.set_appkey("test-appkey").unwrap();
    request.set_token("test-token").unwrap();
    request.set_on_started(recorder.hook()).unwrap();
    request.set_on_result_changed(recorder.hook()).unwrap();
    request.set_on_completed(recorder.hook()).unwrap();
    request
        .set_on_dialog_result_generated(recorder.hook())
        .unwrap();
    request.set_on_task_failed(recorder.hook()).unwrap();
    request.set_on_channel_closed(recorder.hook()).unwrap();
    request
}

#[test]
fn test_audio_dialog_ends_on_dialog_result() {
    let server = MockServer::start(mock_server::dialog());
    let client = client();
    let recorder = Recorder::default();
    let request = dialog(&client, &server, &recorder);

    request.start().unwrap();
    request.wait_started(WAIT).unwrap();
    request.send_audio(&[0u8; 640], EncoderType::None).unwrap();
    request.stop().unwrap();
    tokio_test::assert_ok!(request.wait_completed(WAIT));

    assert_eq!(
        recorder.kinds(),
        vec![
            EventKind::Started,
            EventKind::ResultChanged,
            EventKind::Completed,
            EventKind::DialogResultGenerated,
            EventKind::Close,
        ]
    );
    assert_eq!(request.status(), NodeState::Closed);
    assert_eq!(
        server.timeline(),
        vec!["StartRecognition", "<binary>", "StopRecognition"]
    );
}

#[test]
fn test_text_dialog_completes_without_recognition() {
    let server = MockServer::start(mock_server::dialog());
    let client = client();
    let recorder = Recorder::default();
    let request = dialog(&client, &server, &recorder);
    request.set_query("weather today").unwrap();

    request.execute_dialog().unwrap();
    tokio_test::assert_ok!(request.wait_completed(WAIT));

    assert_eq!(
        recorder.kinds(),
        vec![
            EventKind::Started,
            EventKind::DialogResultGenerated,
            EventKind::Close,
        ]
    );
    assert_eq!(request.status(), NodeState::Closed);

    let Frame::Text(start) = &server.received()[0] else {
        panic!("first frame must be ExecuteDialog");
    };
    assert_eq!(start["header"]["name"], "ExecuteDialog");
    assert_eq!(start["payload"]["query"], "weather today");
}

#[test]
fn test_dialog_returns_to_audio_after_text_query() {
    let server = MockServer::start(mock_server::dialog());
    let client = client();
    let recorder = Recorder::default();
    let request = dialog(&client, &server, &recorder);
    request.set_query("weather today").unwrap();

    request.execute_dialog().unwrap();
    request.wait_completed(WAIT).unwrap();

    request.start().unwrap();
    request.wait_started(WAIT).unwrap();
    request.stop().unwrap();
    request.wait_completed(WAIT).unwrap();

    let names: Vec<_> = server
        .received()
        .iter()
        .filter_map(|frame| frame.directive().map(str::to_string))
        .collect();
    assert_eq!(names, vec!["ExecuteDialog", "StartRecognition", "StopRecognition"]);
}
