use serde::Serialize;
use serde_json::{Value, json};

use crate::config::{Environment, Provider};

pub const COMPUTER_USE_TOOL: &str = "computer_use_preview";
pub const GO_TO_URL: &str = "go_to_url";
pub const GET_CURRENT_URL: &str = "get_current_url";

/// Display size reported to the model in the computer-use tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DisplayGeometry {
    pub width: u32,
    pub height: u32,
}

impl Default for DisplayGeometry {
    fn default() -> Self {
        // Scrapybara does not allow configuring this.
        Self {
            width: 1024,
            height: 768,
        }
    }
}

/// One tool definition sent with every model request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDefinition {
    ComputerUsePreview {
        display_width: u32,
        display_height: u32,
        environment: &'static str,
    },
    Function {
        name: &'static str,
        description: &'static str,
        parameters: Value,
    },
}

impl ToolDefinition {
    pub fn name(&self) -> &str {
        match self {
            ToolDefinition::ComputerUsePreview { .. } => COMPUTER_USE_TOOL,
            ToolDefinition::Function { name, .. } => name,
        }
    }
}

/// Named functions the translator knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    GoToUrl,
    GetCurrentUrl,
}

/// The tools declared to the model for one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ToolManifest {
    tools: Vec<ToolDefinition>,
}

impl ToolManifest {
    pub fn for_target(
        provider: Provider,
        environment: Environment,
        geometry: DisplayGeometry,
    ) -> Self {
        let computer = ToolDefinition::ComputerUsePreview {
            display_width: geometry.width,
            display_height: geometry.height,
            environment: environment.model_environment(),
        };

        let tools = match provider {
            Provider::Scrapybara => vec![computer],
            Provider::Hyperbrowser => vec![computer, go_to_url(), get_current_url()],
        };

        Self { tools }
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Resolve a function name the model asked for. Names not declared in
    /// this manifest resolve to `None`.
    pub fn function(&self, name: &str) -> Option<FunctionKind> {
        let declared = self
            .tools
            .iter()
            .any(|t| matches!(t, ToolDefinition::Function { .. }) && t.name() == name);
        if !declared {
            return None;
        }
        match name {
            GO_TO_URL => Some(FunctionKind::GoToUrl),
            GET_CURRENT_URL => Some(FunctionKind::GetCurrentUrl),
            _ => None,
        }
    }
}

fn go_to_url() -> ToolDefinition {
    ToolDefinition::Function {
        name: GO_TO_URL,
        description: "Navigate to a URL. Can be used when on a blank page to go to a specific URL or search engine.",
        parameters: json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The fully qualified URL to navigate to",
                },
            },
            "required": ["url"],
        }),
    }
}

fn get_current_url() -> ToolDefinition {
    ToolDefinition::Function {
        name: GET_CURRENT_URL,
        description: "Get the current URL",
        parameters: json!({
            "type": "object",
            "properties": {},
            "required": [],
        }),
    }
}
