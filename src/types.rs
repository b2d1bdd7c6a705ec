use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message in the session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System { content: String },
    User { content: String },
    Assistant(AssistantMessage),
    Tool(ToolResult),
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Message::Assistant(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResult> {
        match self {
            Message::Tool(result) => Some(result),
            _ => None,
        }
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Message::Tool(_))
    }
}

/// One model reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    /// Provider-assigned response id, used for continuity chaining.
    pub response_id: Option<String>,
    /// Raw `reasoning` output items, replayed ahead of the calls they led to
    /// whenever the log is resubmitted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasoning: Vec<Value>,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantMessage {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn computer_calls(&self) -> impl Iterator<Item = &ComputerCall> {
        self.tool_calls.iter().filter_map(|call| match call {
            ToolCall::Computer(c) => Some(c),
            ToolCall::Function(_) => None,
        })
    }

    pub fn function_calls(&self) -> impl Iterator<Item = &FunctionCall> {
        self.tool_calls.iter().filter_map(|call| match call {
            ToolCall::Function(f) => Some(f),
            ToolCall::Computer(_) => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolCall {
    Computer(ComputerCall),
    Function(FunctionCall),
}

impl ToolCall {
    pub fn call_id(&self) -> &str {
        match self {
            ToolCall::Computer(c) => &c.call_id,
            ToolCall::Function(f) => &f.call_id,
        }
    }
}

/// A computer-use action requested by the model. The action is kept in its
/// wire form so the full log can be replayed verbatim; the translator parses
/// it into a [`ComputerAction`] when it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputerCall {
    pub id: Option<String>,
    pub call_id: String,
    pub action: Value,
    #[serde(default)]
    pub pending_safety_checks: Vec<SafetyCheck>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub id: Option<String>,
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyCheck {
    pub id: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// The answer to exactly one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Internal message id. Never sent to the model.
    pub id: String,
    pub call_id: String,
    pub kind: ToolResultKind,
    pub content: ToolContent,
    pub status: CallStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acknowledged_safety_checks: Vec<SafetyCheck>,
    /// Diagnostic for incomplete results. Never sent to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn new(call_id: impl Into<String>, kind: ToolResultKind, content: ToolContent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            call_id: call_id.into(),
            kind,
            content,
            status: CallStatus::Completed,
            acknowledged_safety_checks: Vec::new(),
            error: None,
        }
    }

    pub fn incomplete(mut self, error: impl ToString) -> Self {
        self.status = CallStatus::Incomplete;
        self.error = Some(error.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultKind {
    ComputerCallOutput,
    FunctionCallOutput,
}

impl ToolResultKind {
    /// Discriminator the model API expects on the item.
    pub fn wire_type(self) -> &'static str {
        match self {
            ToolResultKind::ComputerCallOutput => "computer_call_output",
            ToolResultKind::FunctionCallOutput => "function_call_output",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ToolContent {
    /// `data:image/...;base64,...`
    Image(String),
    Text(String),
}

impl ToolContent {
    pub fn as_str(&self) -> &str {
        match self {
            ToolContent::Image(url) | ToolContent::Text(url) => url,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Completed,
    Incomplete,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Completed => "completed",
            CallStatus::Incomplete => "incomplete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Button named by a `click` action. Besides real buttons the model can ask
/// for history navigation or a wheel tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClickButton {
    Left,
    Right,
    Wheel,
    Back,
    Forward,
    #[serde(untagged)]
    Other(String),
}

/// One abstract computer action, parsed from the model's wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComputerAction {
    Click {
        x: f64,
        y: f64,
        #[serde(default = "default_button")]
        button: ClickButton,
    },
    DoubleClick {
        x: f64,
        y: f64,
    },
    Scroll {
        x: f64,
        y: f64,
        scroll_x: f64,
        scroll_y: f64,
    },
    Keypress {
        keys: Vec<String>,
    },
    Type {
        text: String,
    },
    Wait,
    Screenshot,
    Drag {
        path: Vec<Point>,
    },
    Move {
        x: f64,
        y: f64,
    },
    #[serde(skip)]
    Unknown { kind: String },
}

const KNOWN_ACTIONS: &[&str] = &[
    "click",
    "double_click",
    "scroll",
    "keypress",
    "type",
    "wait",
    "screenshot",
    "drag",
    "move",
];

fn default_button() -> ClickButton {
    ClickButton::Left
}

impl ComputerAction {
    /// Parse the wire form. Unrecognized kinds become [`ComputerAction::Unknown`];
    /// a recognized kind with bad fields is an error.
    pub fn from_value(value: &Value) -> Result<Self, crate::error::ActionError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("<missing>")
            .to_string();

        if !KNOWN_ACTIONS.contains(&kind.as_str()) {
            return Ok(ComputerAction::Unknown { kind });
        }

        serde_json::from_value(value.clone()).map_err(|e| {
            crate::error::ActionError::MalformedAction {
                kind,
                reason: e.to_string(),
            }
        })
    }

    pub fn kind(&self) -> &str {
        match self {
            ComputerAction::Click { .. } => "click",
            ComputerAction::DoubleClick { .. } => "double_click",
            ComputerAction::Scroll { .. } => "scroll",
            ComputerAction::Keypress { .. } => "keypress",
            ComputerAction::Type { .. } => "type",
            ComputerAction::Wait => "wait",
            ComputerAction::Screenshot => "screenshot",
            ComputerAction::Drag { .. } => "drag",
            ComputerAction::Move { .. } => "move",
            ComputerAction::Unknown { kind } => kind,
        }
    }
}

/// Opaque id of one page (tab, window) on the automation surface.
pub type PageId = String;

pub const DEFAULT_MAX_TURNS: usize = 25;
