//! Model invocation: request building, log normalization and the Responses
//! API client.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::Descriptor;
use crate::continuity::{pending_results, should_chain};
use crate::error::{AgentError, ConfigError, ModelError};
use crate::tools::ToolDefinition;
use crate::types::{
    AssistantMessage, ComputerCall, FunctionCall, Message, SafetyCheck, ToolCall, ToolContent,
    ToolResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Truncation {
    Auto,
    Disabled,
}

/// One call to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRequest {
    pub model: String,
    pub tools: Vec<ToolDefinition>,
    pub truncation: Truncation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    pub input: Vec<Value>,
    /// `Some(false)` under zero data retention.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
}

/// Extra output requested under zero data retention, so reasoning items can
/// be replayed without server-side storage.
pub const ENCRYPTED_REASONING: &str = "reasoning.encrypted_content";

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn create(&self, request: ModelRequest) -> Result<AssistantMessage, ModelError>;
}

/// Builds each turn's request from the session log and asks the model.
pub struct ModelInvoker {
    client: Arc<dyn ModelClient>,
}

impl ModelInvoker {
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self { client }
    }

    pub async fn invoke(
        &self,
        descriptor: &Descriptor,
        log: &[Message],
    ) -> Result<AssistantMessage, AgentError> {
        let request = build_request(descriptor, log)?;
        tracing::debug!(
            chained = request.previous_response_id.is_some(),
            items = request.input.len(),
            "[Brain] invoking model"
        );
        let reply = self.client.create(request).await?;
        tracing::info!(
            response_id = reply.response_id.as_deref().unwrap_or("-"),
            tool_calls = reply.tool_calls.len(),
            "[Brain] model replied"
        );
        Ok(reply)
    }
}

/// Request for the next turn. With chaining, only the pending tool results
/// are sent; otherwise the prompt and the whole log.
pub fn build_request(descriptor: &Descriptor, log: &[Message]) -> Result<ModelRequest, AgentError> {
    let previous_response_id = should_chain(descriptor.zdr_enabled, log)?;

    let input: Vec<Value> = match previous_response_id {
        Some(_) => pending_results(log).iter().flat_map(to_wire).collect(),
        None => {
            let prompt = descriptor
                .prompt
                .as_ref()
                .map(|p| json!({"role": "system", "content": p}));
            prompt
                .into_iter()
                .chain(log.iter().flat_map(to_wire))
                .collect()
        }
    };

    let (store, include) = if descriptor.zdr_enabled {
        (Some(false), vec![ENCRYPTED_REASONING.to_string()])
    } else {
        (None, Vec::new())
    };

    Ok(ModelRequest {
        model: descriptor.model.clone(),
        tools: descriptor.manifest.tools().to_vec(),
        truncation: Truncation::Auto,
        previous_response_id,
        input,
        store,
        include,
    })
}

/// Wire items for one log message. Reasoning items go ahead of the calls they
/// belong to. Tool results drop the internal id and are tagged with their
/// output type.
pub fn to_wire(message: &Message) -> Vec<Value> {
    match message {
        Message::System { content } => vec![json!({"role": "system", "content": content})],
        Message::User { content } => vec![json!({"role": "user", "content": content})],
        Message::Assistant(reply) => {
            let text = (!reply.content.is_empty())
                .then(|| json!({"role": "assistant", "content": reply.content}));
            reply
                .reasoning
                .iter()
                .cloned()
                .chain(text)
                .chain(reply.tool_calls.iter().map(tool_call_to_wire))
                .collect()
        }
        Message::Tool(result) => vec![tool_result_to_wire(result)],
    }
}

fn tool_call_to_wire(call: &ToolCall) -> Value {
    match call {
        ToolCall::Computer(c) => {
            let mut item = json!({
                "type": "computer_call",
                "call_id": c.call_id,
                "action": c.action,
                "pending_safety_checks": c.pending_safety_checks,
                "status": "completed",
            });
            if let Some(id) = &c.id {
                item["id"] = json!(id);
            }
            item
        }
        ToolCall::Function(f) => {
            let mut item = json!({
                "type": "function_call",
                "call_id": f.call_id,
                "name": f.name,
                "arguments": f.arguments.to_string(),
            });
            if let Some(id) = &f.id {
                item["id"] = json!(id);
            }
            item
        }
    }
}

fn tool_result_to_wire(result: &ToolResult) -> Value {
    let output = match &result.content {
        ToolContent::Image(url) => json!({"type": "input_image", "image_url": url}),
        ToolContent::Text(text) => json!(text),
    };
    let mut item = json!({
        "type": result.kind.wire_type(),
        "call_id": result.call_id,
        "output": output,
        "status": result.status.as_str(),
    });
    if !result.acknowledged_safety_checks.is_empty() {
        item["acknowledged_safety_checks"] = json!(result.acknowledged_safety_checks);
    }
    item
}

/// OpenAI Responses API client.
pub struct OpenAiResponses {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiResponses {
    pub fn new(api_key: String, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.into(),
        }
    }

    pub fn from_env(base_url: impl Into<String>) -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingApiKey("OPENAI_API_KEY"))?;
        Ok(Self::new(api_key, base_url))
    }
}

#[derive(Debug, Deserialize)]
struct ResponsesReply {
    id: String,
    #[serde(default)]
    output: Vec<Value>,
}

#[async_trait]
impl ModelClient for OpenAiResponses {
    async fn create(&self, request: ModelRequest) -> Result<AssistantMessage, ModelError> {
        let response = self
            .client
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let json_resp: Value = response.json().await?;

        if !status.is_success() {
            let message = json_resp["error"]["message"]
                .as_str()
                .unwrap_or("Unknown API error")
                .to_string();
            tracing::error!(status = status.as_u16(), %message, "[Brain] API error");
            return Err(ModelError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let reply: ResponsesReply = serde_json::from_value(json_resp)
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
        parse_output(reply.id, reply.output)
    }
}

/// Fold Responses API output items into one assistant message.
fn parse_output(id: String, output: Vec<Value>) -> Result<AssistantMessage, ModelError> {
    let mut message = AssistantMessage {
        response_id: Some(id),
        ..AssistantMessage::default()
    };

    for item in output {
        let kind = item["type"].as_str().unwrap_or_default().to_string();
        match kind.as_str() {
            "message" => {
                let parts = item["content"].as_array().cloned().unwrap_or_default();
                for part in parts {
                    if let Some(text) = part["text"].as_str() {
                        message.content.push_str(text);
                    }
                }
            }
            "reasoning" => message.reasoning.push(item),
            "computer_call" => {
                let call_id = required_str(&item, "call_id")?;
                let pending_safety_checks: Vec<SafetyCheck> =
                    serde_json::from_value(item["pending_safety_checks"].clone())
                        .unwrap_or_default();
                message.tool_calls.push(ToolCall::Computer(ComputerCall {
                    id: item["id"].as_str().map(String::from),
                    call_id,
                    action: item["action"].clone(),
                    pending_safety_checks,
                }));
            }
            "function_call" => {
                let call_id = required_str(&item, "call_id")?;
                let name = required_str(&item, "name")?;
                let raw = item["arguments"].as_str().unwrap_or("{}");
                // Unparseable arguments stay raw; the translator reports them.
                let arguments = serde_json::from_str(raw)
                    .unwrap_or_else(|_| Value::String(raw.to_string()));
                message.tool_calls.push(ToolCall::Function(FunctionCall {
                    id: item["id"].as_str().map(String::from),
                    call_id,
                    name,
                    arguments,
                }));
            }
            other => tracing::debug!(item_type = other, "[Brain] skipping output item"),
        }
    }

    Ok(message)
}

fn required_str(item: &Value, field: &str) -> Result<String, ModelError> {
    item[field]
        .as_str()
        .map(String::from)
        .ok_or_else(|| ModelError::InvalidResponse(format!("output item without `{}`", field)))
}
