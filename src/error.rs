use thiserror::Error;

/// Invalid or unsupported configuration. Raised before any remote call.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Invalid environment: {0}")]
    InvalidEnvironment(String),

    #[error("Provider {provider} does not support the {environment} environment")]
    UnsupportedEnvironment {
        provider: String,
        environment: String,
    },

    #[error("Invalid display geometry {width}x{height}")]
    InvalidGeometry { width: u32, height: u32 },

    #[error("Missing API key: {0} not set in environment")]
    MissingApiKey(&'static str),

    #[error("Could not read config file {path}: {reason}")]
    File { path: String, reason: String },
}

/// A loop invariant was violated by the caller. Always fatal.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PreconditionError {
    #[error("Can not take computer action without an instance ID.")]
    MissingInstance,

    #[error("Instance {id} is not active (status: {status}).")]
    InactiveInstance { id: String, status: String },

    #[error("Automation surface not bound to the session.")]
    MissingSurface,

    #[error(
        "Can not take computer action without a computer call or function call in the last message."
    )]
    NoToolCall,

    #[error("Tool result at position {0} is not preceded by the assistant message that requested it.")]
    OrphanToolResult(usize),
}

/// Failures of the automation surface itself.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SurfaceError {
    #[error("CDP error: {0}")]
    Cdp(String),

    #[error("Remote computer error: {0}")]
    Remote(String),

    #[error("Operation not supported by this surface: {0}")]
    Unsupported(&'static str),

    #[error("Page not found: {0}")]
    PageNotFound(String),
}

/// Failure to execute one tool call. Recoverable: the translator turns these
/// into incomplete tool results.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActionError {
    #[error(transparent)]
    Surface(#[from] SurfaceError),

    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: &'static str, millis: u128 },

    #[error("Invalid drag path: must contain at least a start and end point")]
    InvalidDragPath,

    #[error("Unknown button: {0}")]
    UnknownButton(String),

    #[error("Unknown action type: {0}")]
    UnknownAction(String),

    #[error("Malformed {kind} action: {reason}")]
    MalformedAction { kind: String, reason: String },

    #[error("Unknown function tool call: {0}")]
    UnknownFunction(String),

    #[error("Invalid arguments for {name}: {reason}")]
    InvalidArguments { name: String, reason: String },
}

/// Model transport or response failures.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OpenAI API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid model response: {0}")]
    InvalidResponse(String),
}

/// Instance provider failures.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error ({status}): {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("Invalid {provider} response: {reason}")]
    InvalidResponse {
        provider: &'static str,
        reason: String,
    },

    #[error("Failed to connect to instance {id}: {reason}")]
    Connect { id: String, reason: String },
}

/// Fatal errors that end a run.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Reached maximum turn limit ({0})")]
    TurnLimit(usize),
}
