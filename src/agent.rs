//! The agent loop: acquire an instance, ask the model, run what it asks for,
//! repeat until it answers without tool calls.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::brain::{ModelClient, ModelInvoker};
use crate::config::Descriptor;
use crate::error::{AgentError, PreconditionError};
use crate::provider::InstanceProvider;
use crate::surface::AutomationSurface;
use crate::translator::{ActionTranslator, PLACEHOLDER_SCREENSHOT};
use crate::types::{
    AssistantMessage, CallStatus, ComputerCall, Message, PageId, ToolCall, ToolContent,
    ToolResult, ToolResultKind,
};

/// Progress events for observers of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    LiveView { url: String },
    Thinking,
    ModelReply { text: String },
    Action { call_id: String, description: String },
    ActionIncomplete { call_id: String, message: String },
    TaskComplete { summary: String },
    TaskError { message: String },
    Ready,
}

impl AgentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::LiveView { .. } => "live_view",
            AgentEvent::Thinking => "thinking",
            AgentEvent::ModelReply { .. } => "model_reply",
            AgentEvent::Action { .. } => "action",
            AgentEvent::ActionIncomplete { .. } => "action_incomplete",
            AgentEvent::TaskComplete { .. } => "task_complete",
            AgentEvent::TaskError { .. } => "task_error",
            AgentEvent::Ready => "ready",
        }
    }
}

/// Everything one run mutates. The caller owns it and releases the instance.
#[derive(Default)]
pub struct Session {
    pub messages: Vec<Message>,
    pub instance_id: Option<String>,
    pub live_url: Option<String>,
    pub surface: Option<Box<dyn AutomationSurface>>,
    pub current_page: Option<PageId>,
}

impl Session {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(task)],
            ..Self::default()
        }
    }

    /// Write the message log as pretty JSON, replacing any previous file.
    pub fn save_transcript(&self, path: &Path) -> std::io::Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        serde_json::to_writer_pretty(file, &self.messages)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    NeedsInstance,
    ReadyForModel,
    ModelResponded,
    NeedsAction,
    Terminal,
}

pub struct Agent {
    descriptor: Descriptor,
    provider: Arc<dyn InstanceProvider>,
    invoker: ModelInvoker,
    translator: ActionTranslator,
    events: Option<broadcast::Sender<AgentEvent>>,
    state: AgentState,
    turns: usize,
}

impl Agent {
    pub fn new(
        descriptor: Descriptor,
        provider: Arc<dyn InstanceProvider>,
        client: Arc<dyn ModelClient>,
    ) -> Self {
        let translator = ActionTranslator::new(&descriptor);
        Self {
            descriptor,
            provider,
            invoker: ModelInvoker::new(client),
            translator,
            events: None,
            state: AgentState::NeedsInstance,
            turns: 0,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Drive the session until the model answers without tool calls and
    /// return that answer.
    pub async fn run(&mut self, session: &mut Session) -> Result<String, AgentError> {
        self.state = AgentState::NeedsInstance;
        self.turns = 0;

        while self.step(session).await? != AgentState::Terminal {}

        let summary = session
            .messages
            .last()
            .and_then(Message::as_assistant)
            .map(|reply| reply.content.clone())
            .unwrap_or_default();
        tracing::info!(turns = self.turns, "[Agent] Task complete");
        self.emit(AgentEvent::TaskComplete {
            summary: summary.clone(),
        });
        Ok(summary)
    }

    /// Advance by one transition and return the new state.
    pub async fn step(&mut self, session: &mut Session) -> Result<AgentState, AgentError> {
        self.state = match self.state {
            AgentState::NeedsInstance => {
                self.ensure_instance(session).await?;
                AgentState::ReadyForModel
            }
            AgentState::ReadyForModel => {
                self.call_model(session).await?;
                AgentState::ModelResponded
            }
            AgentState::ModelResponded => {
                let wants_tools = session
                    .messages
                    .last()
                    .and_then(Message::as_assistant)
                    .is_some_and(AssistantMessage::has_tool_calls);
                if wants_tools {
                    AgentState::NeedsAction
                } else {
                    AgentState::Terminal
                }
            }
            AgentState::NeedsAction => {
                self.take_action(session).await?;
                AgentState::ReadyForModel
            }
            AgentState::Terminal => AgentState::Terminal,
        };
        Ok(self.state)
    }

    async fn ensure_instance(&self, session: &mut Session) -> Result<(), AgentError> {
        if session.instance_id.is_some() {
            return Ok(());
        }

        let instance = self
            .provider
            .acquire(&self.descriptor.session_params)
            .await?;
        tracing::info!(instance_id = %instance.id, "[Agent] Instance acquired");
        let surface = self.provider.connect(&instance).await?;

        session.instance_id = Some(instance.id);
        session.surface = Some(surface);
        if let Some(url) = instance.live_url {
            self.record_live_url(session, url);
        }
        Ok(())
    }

    fn record_live_url(&self, session: &mut Session, url: String) {
        if session.live_url.is_some() {
            return;
        }
        tracing::info!(%url, "[Agent] Live view available");
        session.live_url = Some(url.clone());
        self.emit(AgentEvent::LiveView { url });
    }

    async fn call_model(&mut self, session: &mut Session) -> Result<(), AgentError> {
        if self.turns >= self.descriptor.max_turns {
            tracing::warn!(max_turns = self.descriptor.max_turns, "[Agent] Turn limit reached");
            return Err(AgentError::TurnLimit(self.descriptor.max_turns));
        }
        self.turns += 1;

        tracing::info!(turn = self.turns, "[Agent] Asking Brain for next step...");
        self.emit(AgentEvent::Thinking);
        let reply = self
            .invoker
            .invoke(&self.descriptor, &session.messages)
            .await?;

        if !reply.content.is_empty() {
            self.emit(AgentEvent::ModelReply {
                text: reply.content.clone(),
            });
        }
        session.messages.push(Message::Assistant(reply));
        Ok(())
    }

    /// Answer every tool call of the last assistant message. Function calls
    /// all run; of the computer calls only the last one runs.
    async fn take_action(&self, session: &mut Session) -> Result<(), AgentError> {
        let instance_id = session
            .instance_id
            .clone()
            .ok_or(PreconditionError::MissingInstance)?;
        let reply = session
            .messages
            .last()
            .and_then(Message::as_assistant)
            .filter(|reply| reply.has_tool_calls())
            .cloned()
            .ok_or(PreconditionError::NoToolCall)?;
        if session.surface.is_none() {
            return Err(PreconditionError::MissingSurface.into());
        }

        let instance = self.provider.get_instance(&instance_id).await?;
        if !instance.status.is_active() {
            return Err(PreconditionError::InactiveInstance {
                id: instance_id,
                status: instance.status.to_string(),
            }
            .into());
        }
        if let Some(url) = instance.live_url {
            self.record_live_url(session, url);
        }

        let surface = session
            .surface
            .as_deref_mut()
            .ok_or(PreconditionError::MissingSurface)?;

        let opened = surface.take_opened_pages();
        if let Some(newest) = opened.last() {
            match surface.focus_page(newest) {
                Ok(()) => {
                    tracing::info!(page = %newest, opened = opened.len(), "[Agent] Switched to new page");
                    session.current_page = Some(newest.clone());
                }
                Err(e) => tracing::warn!(page = %newest, error = %e, "[Agent] Failed to focus new page"),
            }
        }

        let last_computer = reply.computer_calls().last().map(|c| c.call_id.clone());
        let mut results = Vec::with_capacity(reply.tool_calls.len());
        for call in &reply.tool_calls {
            let result = match call {
                ToolCall::Computer(c) if last_computer.as_deref() != Some(c.call_id.as_str()) => {
                    superseded(c)
                }
                _ => {
                    let description = describe(call);
                    tracing::info!(call_id = call.call_id(), %description, "[Agent] Executing");
                    self.emit(AgentEvent::Action {
                        call_id: call.call_id().to_string(),
                        description,
                    });
                    self.translator.execute(surface, call).await
                }
            };

            if result.status == CallStatus::Incomplete {
                self.emit(AgentEvent::ActionIncomplete {
                    call_id: result.call_id.clone(),
                    message: result.error.clone().unwrap_or_default(),
                });
            }
            results.push(Message::Tool(result));
        }

        session.messages.extend(results);
        Ok(())
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// Result for a computer call that was not executed because a later one in
/// the same reply was.
fn superseded(call: &ComputerCall) -> ToolResult {
    tracing::warn!(call_id = %call.call_id, "[Agent] Skipping superseded computer call");
    ToolResult::new(
        &call.call_id,
        ToolResultKind::ComputerCallOutput,
        ToolContent::Image(PLACEHOLDER_SCREENSHOT.to_string()),
    )
    .incomplete("superseded by a later computer call in the same turn")
}

fn describe(call: &ToolCall) -> String {
    match call {
        ToolCall::Computer(c) => c.action.to_string(),
        ToolCall::Function(f) => format!("{}({})", f.name, f.arguments),
    }
}
