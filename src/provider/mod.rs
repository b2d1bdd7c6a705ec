//! Remote instance providers: provisioning, status, release and binding an
//! automation surface to a running instance.

mod hyperbrowser;
mod scrapybara;

pub use hyperbrowser::HyperbrowserProvider;
pub use scrapybara::{ScrapybaraComputer, ScrapybaraProvider};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{Descriptor, Provider, SessionParams};
use crate::error::{ConfigError, ProviderError};
use crate::surface::AutomationSurface;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    Active,
    Other(String),
}

impl InstanceStatus {
    /// Normalize a provider status string. Hyperbrowser reports `active`,
    /// Scrapybara reports `running`.
    pub fn from_provider(status: &str) -> Self {
        match status {
            "active" | "running" => InstanceStatus::Active,
            other => InstanceStatus::Other(other.to_string()),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, InstanceStatus::Active)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Active => f.write_str("active"),
            InstanceStatus::Other(status) => f.write_str(status),
        }
    }
}

/// A remote browser or desktop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub status: InstanceStatus,
    /// Human-facing live view of the instance.
    pub live_url: Option<String>,
    /// DevTools websocket endpoint, when the instance exposes one.
    pub cdp_url: Option<String>,
}

#[async_trait]
pub trait InstanceProvider: Send + Sync {
    async fn acquire(&self, params: &SessionParams) -> Result<Instance, ProviderError>;

    async fn get_instance(&self, id: &str) -> Result<Instance, ProviderError>;

    async fn release(&self, id: &str) -> Result<(), ProviderError>;

    /// Open an automation surface on a running instance.
    async fn connect(&self, instance: &Instance)
    -> Result<Box<dyn AutomationSurface>, ProviderError>;
}

/// Build the provider selected by the descriptor. API keys come from the
/// environment.
pub fn from_descriptor(descriptor: &Descriptor) -> Result<Arc<dyn InstanceProvider>, ConfigError> {
    match descriptor.provider {
        Provider::Hyperbrowser => {
            let api_key = api_key("HYPERBROWSER_API_KEY")?;
            Ok(Arc::new(HyperbrowserProvider::new(
                api_key,
                descriptor.timing.idle_connection(),
            )))
        }
        Provider::Scrapybara => {
            let api_key = api_key("SCRAPYBARA_API_KEY")?;
            Ok(Arc::new(ScrapybaraProvider::new(
                api_key,
                descriptor.environment,
                descriptor.timing.idle_connection(),
            )))
        }
    }
}

fn api_key(var: &'static str) -> Result<String, ConfigError> {
    std::env::var(var).map_err(|_| ConfigError::MissingApiKey(var))
}

/// Read an HTTP response as JSON, turning non-2xx statuses into API errors.
async fn read_json<T: serde::de::DeserializeOwned>(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("message")
                    .or_else(|| v.get("detail"))
                    .or_else(|| v.get("error"))
                    .map(|m| m.as_str().map(String::from).unwrap_or_else(|| m.to_string()))
            })
            .unwrap_or(body);
        return Err(ProviderError::Api {
            provider,
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str(&body).map_err(|e| ProviderError::InvalidResponse {
        provider,
        reason: e.to_string(),
    })
}
