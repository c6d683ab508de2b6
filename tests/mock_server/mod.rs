//! Scripted WebSocket server for integration tests.
//!
//! Each accepted connection feeds its frames to a [`Script`], which returns
//! the frames to send back. Every received frame is recorded so tests can
//! assert on ordering.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// A frame as received by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(Value),
    Binary(usize),
}

impl Frame {
    /// `header.name` (legacy) or `header.action` (task protocol).
    pub fn directive(&self) -> Option<&str> {
        match self {
            Frame::Text(value) => value["header"]["name"]
                .as_str()
                .or_else(|| value["header"]["action"].as_str()),
            Frame::Binary(_) => None,
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            Frame::Text(value) => value["header"]["task_id"].as_str().unwrap_or(""),
            Frame::Binary(_) => "",
        }
    }
}

/// Per-connection reply logic: frame in, frames out.
pub type Script = Arc<dyn Fn(&Frame, &mut Session) -> Vec<Message> + Send + Sync>;

/// Connection-local state handed to the script.
#[derive(Debug, Default)]
pub struct Session {
    pub task_id: String,
    pub audio_frames: usize,
    pub audio_bytes: usize,
}

pub struct MockServer {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<Frame>>>,
    accepted: Arc<AtomicUsize>,
    headers: Arc<Mutex<Vec<(String, String)>>>,
    runtime: Option<Runtime>,
}

impl MockServer {
    pub fn start(script: Script) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        let headers = Arc::new(Mutex::new(Vec::new()));

        let (rx, acc, hdr) = (received.clone(), accepted.clone(), headers.clone());
        runtime.spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                acc.fetch_add(1, Ordering::SeqCst);
                let script = script.clone();
                let received = rx.clone();
                let headers = hdr.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve(stream, script, received, headers).await {
                        eprintln!("mock connection ended: {e}");
                    }
                });
            }
        });

        Self {
            addr,
            received,
            accepted,
            headers,
            runtime: Some(runtime),
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws/v1", self.addr)
    }

    pub fn received(&self) -> Vec<Frame> {
        self.received.lock().clone()
    }

    /// Directive names in arrival order, binary frames as `"<binary>"`.
    pub fn timeline(&self) -> Vec<String> {
        self.received()
            .iter()
            .map(|frame| frame.directive().unwrap_or("<binary>").to_string())
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Value of the last upgrade request header `name`, if any.
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .lock()
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    /// Poll `condition` until it holds or two seconds pass.
    pub fn wait_until(&self, condition: impl Fn(&MockServer) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition(self) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        condition(self)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

async fn serve(
    stream: TcpStream,
    script: Script,
    received: Arc<Mutex<Vec<Frame>>>,
    headers: Arc<Mutex<Vec<(String, String)>>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let record_headers = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let mut seen = headers.lock();
        for (name, value) in request.headers() {
            seen.push((
                name.to_string(),
                value.to_str().unwrap_or_default().to_string(),
            ));
        }
        Ok(response)
    };
    let ws = tokio_tungstenite::accept_hdr_async(stream, record_headers).await?;
    let (mut write, mut read) = ws.split();
    let mut session = Session::default();

    while let Some(message) = read.next().await {
        let frame = match message? {
            Message::Text(text) => Frame::Text(serde_json::from_str(text.as_str())?),
            Message::Binary(data) => {
                session.audio_frames += 1;
                session.audio_bytes += data.len();
                Frame::Binary(data.len())
            }
            Message::Close(_) => break,
            _ => continue,
        };
        if !frame.task_id().is_empty() {
            session.task_id = frame.task_id().to_string();
        }
        received.lock().push(frame.clone());
        for reply in script(&frame, &mut session) {
            let closing = matches!(reply, Message::Close(_));
            write.send(reply).await?;
            if closing {
                return Ok(());
            }
        }
    }
    Ok(())
}

// =============================================================================
// Reply builders
// =============================================================================

pub fn legacy(name: &str, task_id: &str, status: i64, payload: Value) -> Message {
    let body = json!({
        "header": {
            "namespace": "Mock",
            "name": name,
            "status": status,
            "status_text": "Gateway:SUCCESS:Success.",
            "task_id": task_id,
            "message_id": "0123456789abcdef0123456789abcdef",
        },
        "payload": payload,
    });
    Message::Text(body.to_string().into())
}

pub fn task_event(event: &str, task_id: &str, payload: Value) -> Message {
    let body = json!({
        "header": {"event": event, "task_id": task_id},
        "payload": payload,
    });
    Message::Text(body.to_string().into())
}

// =============================================================================
// Scripts
// =============================================================================

/// Accepts the connection and never answers.
pub fn silent() -> Script {
    Arc::new(|_: &Frame, _: &mut Session| Vec::new())
}

/// `SpeechRecognizer`: Started on start, one ResultChanged per audio
/// frame, Completed on stop.
pub fn recognizer() -> Script {
    Arc::new(|frame: &Frame, session: &mut Session| match frame {
        Frame::Binary(_) => vec![legacy(
            "RecognitionResultChanged",
            &session.task_id,
            20000000,
            json!({"result": format!("partial {}", session.audio_frames), "duration": 0}),
        )],
        _ => match frame.directive() {
            Some("StartRecognition") => vec![legacy(
                "RecognitionStarted",
                &session.task_id,
                20000000,
                json!({}),
            )],
            Some("StopRecognition") => vec![legacy(
                "RecognitionCompleted",
                &session.task_id,
                20000000,
                json!({"result": "final text", "duration": session.audio_bytes}),
            )],
            _ => Vec::new(),
        },
    })
}

/// Rejects every start with a TaskFailed.
pub fn rejecting(status: i64) -> Script {
    Arc::new(move |frame: &Frame, session: &mut Session| match frame.directive() {
        Some(name) if name.starts_with("Start") => vec![legacy(
            "TaskFailed",
            &session.task_id,
            status,
            json!({}),
        )],
        _ => Vec::new(),
    })
}

/// Paraformer: a partial result per audio frame, a final sentence and
/// task-finished on finish-task.
pub fn paraformer() -> Script {
    Arc::new(|frame: &Frame, session: &mut Session| match frame {
        Frame::Binary(_) => vec![task_event(
            "result-generated",
            &session.task_id,
            json!({"output": {"sentence": {
                "sentence_id": 1, "begin_time": 100, "text": "hello",
                "sentence_end": false,
            }}}),
        )],
        _ => match frame.directive() {
            Some("run-task") => vec![task_event("task-started", &session.task_id, json!({}))],
            Some("finish-task") => vec![
                task_event(
                    "result-generated",
                    &session.task_id,
                    json!({
                        "output": {"sentence": {
                            "sentence_id": 1, "begin_time": 100, "end_time": 900,
                            "text": "hello world", "sentence_end": true,
                        }},
                        "usage": {"duration": 1},
                    }),
                ),
                task_event("task-finished", &session.task_id, json!({})),
            ],
            _ => Vec::new(),
        },
    })
}

/// CosyVoice: 320 bytes of audio plus a usage report per text chunk.
pub fn cosyvoice() -> Script {
    Arc::new(|frame: &Frame, session: &mut Session| match frame.directive() {
        Some("run-task") => vec![task_event("task-started", &session.task_id, json!({}))],
        Some("continue-task") => vec![
            Message::Binary(vec![0u8; 320].into()),
            task_event(
                "result-generated",
                &session.task_id,
                json!({"output": {"sentence": {"index": 0, "words": []}}, "usage": {"characters": 2}}),
            ),
        ],
        Some("finish-task") => vec![task_event("task-finished", &session.task_id, json!({}))],
        _ => Vec::new(),
    })
}

/// `SpeechSynthesizer` that streams audio without ever sending
/// `SynthesisStarted`.
pub fn synthesizer_audio_first() -> Script {
    Arc::new(|frame: &Frame, session: &mut Session| match frame.directive() {
        Some("StartSynthesis") => vec![
            Message::Binary(vec![0u8; 640].into()),
            Message::Binary(vec![0u8; 640].into()),
            legacy("SynthesisCompleted", &session.task_id, 20000000, json!({})),
        ],
        _ => Vec::new(),
    })
}

/// `DialogAssistant`: recognition events for audio, then the dialog result
/// after `RecognitionCompleted`. A text query gets the dialog result only.
pub fn dialog() -> Script {
    let result = |task_id: &str| {
        legacy(
            "DialogResultGenerated",
            task_id,
            20000000,
            json!({"session_id": task_id, "action": "Weather", "display_text": "Sunny"}),
        )
    };
    Arc::new(move |frame: &Frame, session: &mut Session| match frame {
        Frame::Binary(_) => vec![legacy(
            "RecognitionResultChanged",
            &session.task_id,
            20000000,
            json!({"result": "weather"}),
        )],
        _ => match frame.directive() {
            Some("StartRecognition") => vec![legacy(
                "RecognitionStarted",
                &session.task_id,
                20000000,
                json!({}),
            )],
            Some("StopRecognition") => vec![
                legacy(
                    "RecognitionCompleted",
                    &session.task_id,
                    20000000,
                    json!({"result": "weather today"}),
                ),
                result(&session.task_id),
            ],
            Some("ExecuteDialog") => vec![result(&session.task_id)],
            _ => Vec::new(),
        },
    })
}
