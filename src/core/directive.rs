//! Outgoing directives.
//!
//! Start, stop and control commands are plain serde structs serialised to
//! JSON text frames, one family per dialect.

use serde::Serialize;
use serde_json::{Map, Value};

/// Version reported in the `context.sdk` block.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Language reported in the `context.sdk` block.
pub const SDK_LANGUAGE: &str = "Rust";

/// 32 lowercase hex characters, as the service expects for task and message ids.
pub fn new_task_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Build the `context` object carrying SDK identification plus caller extras.
pub fn sdk_context(sdk_name: &str, extra: &Map<String, Value>) -> Map<String, Value> {
    let mut context = extra.clone();
    context.insert(
        "sdk".to_string(),
        serde_json::json!({
            "name": sdk_name,
            "version": SDK_VERSION,
            "language": SDK_LANGUAGE,
        }),
    );
    context
}

/// Shallow-merge a JSON object literal into `target`.
pub fn merge_object(target: &mut Map<String, Value>, json: &str) -> Result<(), serde_json::Error> {
    let value: Map<String, Value> = serde_json::from_str(json)?;
    for (key, value) in value {
        target.insert(key, value);
    }
    Ok(())
}

// =============================================================================
// Legacy gateway directives
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct LegacyHeader {
    pub namespace: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub appkey: String,
    pub task_id: String,
    pub message_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LegacyDirective {
    pub header: LegacyHeader,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub payload: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
}

impl LegacyDirective {
    pub fn new(namespace: &str, name: &str, appkey: &str, task_id: &str) -> Self {
        Self {
            header: LegacyHeader {
                namespace: namespace.to_string(),
                name: name.to_string(),
                appkey: appkey.to_string(),
                task_id: task_id.to_string(),
                message_id: new_task_id(),
                extra: Map::new(),
            },
            payload: Map::new(),
            context: Map::new(),
        }
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_header_field(mut self, key: &str, value: Value) -> Self {
        self.header.extra.insert(key.to_string(), value);
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// =============================================================================
// Task protocol directives
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskAction {
    RunTask,
    ContinueTask,
    FinishTask,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskHeader {
    pub action: TaskAction,
    pub task_id: String,
    pub streaming: &'static str,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<Value>>,
    pub input: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskDirective {
    pub header: TaskHeader,
    pub payload: TaskPayload,
}

impl TaskDirective {
    pub fn new(action: TaskAction, task_id: &str, payload: TaskPayload) -> Self {
        Self {
            header: TaskHeader {
                action,
                task_id: task_id.to_string(),
                streaming: "duplex",
            },
            payload,
        }
    }

    /// `continue-task` carrying a chunk of text to synthesise.
    pub fn continue_with_text(task_id: &str, text: &str) -> Self {
        let mut input = Map::new();
        input.insert("text".to_string(), Value::String(text.to_string()));
        Self::new(
            TaskAction::ContinueTask,
            task_id,
            TaskPayload {
                input,
                ..Default::default()
            },
        )
    }

    pub fn finish(task_id: &str) -> Self {
        Self::new(TaskAction::FinishTask, task_id, TaskPayload::default())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
