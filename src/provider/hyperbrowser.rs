use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Instance, InstanceProvider, InstanceStatus, read_json};
use crate::config::SessionParams;
use crate::error::ProviderError;
use crate::hands::ChromeSurface;
use crate::surface::AutomationSurface;

const BASE_URL: &str = "https://app.hyperbrowser.ai/api";
const NAME: &str = "hyperbrowser";

/// Hyperbrowser cloud browser sessions.
pub struct HyperbrowserProvider {
    client: Client,
    api_key: String,
    base_url: String,
    idle_timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionDetail {
    id: String,
    status: String,
    live_url: Option<String>,
    ws_endpoint: Option<String>,
}

impl From<SessionDetail> for Instance {
    fn from(session: SessionDetail) -> Self {
        Instance {
            id: session.id,
            status: InstanceStatus::from_provider(&session.status),
            live_url: session.live_url,
            cdp_url: session.ws_endpoint,
        }
    }
}

impl HyperbrowserProvider {
    pub fn new(api_key: String, idle_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: BASE_URL.to_string(),
            idle_timeout,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Session create body: the screen size plus any passthrough parameters.
fn create_body(params: &SessionParams) -> Value {
    let mut body = params.extra.clone();
    if let Some(screen) = params.screen {
        body.insert(
            "screen".to_string(),
            json!({"width": screen.width, "height": screen.height}),
        );
    }
    Value::Object(body)
}

#[async_trait]
impl InstanceProvider for HyperbrowserProvider {
    async fn acquire(&self, params: &SessionParams) -> Result<Instance, ProviderError> {
        let response = self
            .client
            .post(format!("{}/session", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(&create_body(params))
            .send()
            .await?;
        let session: SessionDetail = read_json(NAME, response).await?;
        tracing::info!(session_id = %session.id, "[Hyperbrowser] session created");
        Ok(session.into())
    }

    async fn get_instance(&self, id: &str) -> Result<Instance, ProviderError> {
        let response = self
            .client
            .get(format!("{}/session/{}", self.base_url, id))
            .header("x-api-key", &self.api_key)
            .send()
            .await?;
        let session: SessionDetail = read_json(NAME, response).await?;
        Ok(session.into())
    }

    async fn release(&self, id: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .put(format!("{}/session/{}/stop", self.base_url, id))
            .header("x-api-key", &self.api_key)
            .send()
            .await?;
        let _: Value = read_json(NAME, response).await?;
        tracing::info!(session_id = %id, "[Hyperbrowser] session stopped");
        Ok(())
    }

    async fn connect(
        &self,
        instance: &Instance,
    ) -> Result<Box<dyn AutomationSurface>, ProviderError> {
        let ws_url = instance.cdp_url.clone().ok_or_else(|| ProviderError::Connect {
            id: instance.id.clone(),
            reason: "session has no websocket endpoint".to_string(),
        })?;
        let surface = ChromeSurface::connect(ws_url, self.idle_timeout)
            .await
            .map_err(|e| ProviderError::Connect {
                id: instance.id.clone(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(surface))
    }
}
