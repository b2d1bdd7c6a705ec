use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Instance, InstanceProvider, InstanceStatus, read_json};
use crate::config::{Environment, SessionParams};
use crate::error::{ProviderError, SurfaceError};
use crate::hands::ChromeSurface;
use crate::surface::AutomationSurface;
use crate::types::{MouseButton, PageId, Point};

const BASE_URL: &str = "https://api.scrapybara.com/v1";
const NAME: &str = "scrapybara";

/// Scrapybara browser, Ubuntu and Windows instances.
pub struct ScrapybaraProvider {
    client: Client,
    api_key: String,
    base_url: String,
    environment: Environment,
    idle_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct InstanceDetail {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct StreamUrl {
    stream_url: String,
}

#[derive(Debug, Deserialize)]
struct BrowserStart {
    cdp_url: String,
}

impl ScrapybaraProvider {
    pub fn new(api_key: String, environment: Environment, idle_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: BASE_URL.to_string(),
            environment,
            idle_timeout,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn instance_type(&self) -> &'static str {
        match self.environment {
            Environment::Web => "browser",
            Environment::Ubuntu => "ubuntu",
            Environment::Windows => "windows",
        }
    }

    async fn stream_url(&self, id: &str) -> Result<String, ProviderError> {
        let response = self
            .client
            .get(format!("{}/instance/{}/stream_url", self.base_url, id))
            .header("x-api-key", &self.api_key)
            .send()
            .await?;
        let stream: StreamUrl = read_json(NAME, response).await?;
        Ok(stream.stream_url)
    }

    async fn start_browser(&self, id: &str) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(format!("{}/instance/{}/browser/start", self.base_url, id))
            .header("x-api-key", &self.api_key)
            .send()
            .await?;
        let browser: BrowserStart = read_json(NAME, response).await?;
        Ok(browser.cdp_url)
    }
}

#[async_trait]
impl InstanceProvider for ScrapybaraProvider {
    async fn acquire(&self, params: &SessionParams) -> Result<Instance, ProviderError> {
        let mut body = params.extra.clone();
        body.insert("instance_type".to_string(), json!(self.instance_type()));

        let response = self
            .client
            .post(format!("{}/start", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let detail: InstanceDetail = read_json(NAME, response).await?;
        tracing::info!(instance_id = %detail.id, instance_type = self.instance_type(), "[Scrapybara] instance started");

        let live_url = match self.stream_url(&detail.id).await {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(instance_id = %detail.id, error = %e, "[Scrapybara] no stream url");
                None
            }
        };

        Ok(Instance {
            id: detail.id,
            status: InstanceStatus::from_provider(&detail.status),
            live_url,
            cdp_url: None,
        })
    }

    async fn get_instance(&self, id: &str) -> Result<Instance, ProviderError> {
        let response = self
            .client
            .get(format!("{}/instance/{}", self.base_url, id))
            .header("x-api-key", &self.api_key)
            .send()
            .await?;
        let detail: InstanceDetail = read_json(NAME, response).await?;
        Ok(Instance {
            id: detail.id,
            status: InstanceStatus::from_provider(&detail.status),
            live_url: None,
            cdp_url: None,
        })
    }

    async fn release(&self, id: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(format!("{}/instance/{}/stop", self.base_url, id))
            .header("x-api-key", &self.api_key)
            .send()
            .await?;
        let _: Value = read_json(NAME, response).await?;
        tracing::info!(instance_id = %id, "[Scrapybara] instance stopped");
        Ok(())
    }

    async fn connect(
        &self,
        instance: &Instance,
    ) -> Result<Box<dyn AutomationSurface>, ProviderError> {
        if self.environment != Environment::Web {
            return Ok(Box::new(ScrapybaraComputer::new(
                self.client.clone(),
                self.api_key.clone(),
                format!("{}/instance/{}/computer", self.base_url, instance.id),
            )));
        }

        let cdp_url = match &instance.cdp_url {
            Some(url) => url.clone(),
            None => self.start_browser(&instance.id).await?,
        };
        let surface = ChromeSurface::connect(cdp_url, self.idle_timeout)
            .await
            .map_err(|e| ProviderError::Connect {
                id: instance.id.clone(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(surface))
    }
}

/// Surface backed by a Scrapybara desktop's computer-action endpoint.
///
/// The endpoint only knows whole gestures, so chords are buffered on key
/// down and sent as one `key` action on the first key up, and a press/release
/// pair becomes either a click or a `left_click_drag`.
pub struct ScrapybaraComputer {
    client: Client,
    api_key: String,
    endpoint: String,
    pointer: Point,
    pressed_at: Option<Point>,
    chord: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ComputerResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    base64_image: Option<String>,
}

impl ScrapybaraComputer {
    pub fn new(client: Client, api_key: String, endpoint: String) -> Self {
        Self {
            client,
            api_key,
            endpoint,
            pointer: Point::new(0.0, 0.0),
            pressed_at: None,
            chord: Vec::new(),
        }
    }

    async fn act(&self, body: Value) -> Result<ComputerResponse, SurfaceError> {
        let remote = |e: reqwest::Error| SurfaceError::Remote(e.to_string());
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(remote)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SurfaceError::Remote(format!("{}: {}", status, text)));
        }

        let reply: ComputerResponse = response.json().await.map_err(remote)?;
        if let Some(error) = reply.error.as_deref().filter(|e| !e.is_empty()) {
            return Err(SurfaceError::Remote(error.to_string()));
        }
        Ok(reply)
    }
}

fn coordinates(point: Point) -> Value {
    json!([point.x.round() as i64, point.y.round() as i64])
}

/// Surface key names to xdotool keysyms.
fn xdotool_key(key: &str) -> String {
    let mapped = match key {
        "Control" => "ctrl",
        "Shift" => "shift",
        "Alt" => "alt",
        "Meta" => "super",
        "Enter" => "Return",
        "Backspace" => "BackSpace",
        "ArrowUp" => "Up",
        "ArrowDown" => "Down",
        "ArrowLeft" => "Left",
        "ArrowRight" => "Right",
        "PageUp" => "Page_Up",
        "PageDown" => "Page_Down",
        "CapsLock" => "Caps_Lock",
        "Divide" => "KP_Divide",
        "Backslash" => "backslash",
        " " => "space",
        other => other,
    };
    mapped.to_string()
}

#[async_trait]
impl AutomationSurface for ScrapybaraComputer {
    async fn mouse_move(&mut self, to: Point) -> Result<(), SurfaceError> {
        self.pointer = to;
        if self.pressed_at.is_some() {
            // Intermediate drag points collapse into the final left_click_drag.
            return Ok(());
        }
        self.act(json!({"action": "mouse_move", "coordinates": coordinates(to)}))
            .await
            .map(|_| ())
    }

    async fn mouse_click(
        &mut self,
        at: Point,
        button: MouseButton,
        click_count: u32,
    ) -> Result<(), SurfaceError> {
        self.mouse_move(at).await?;
        let action = match (button, click_count) {
            (MouseButton::Left, 2) => "double_click",
            (MouseButton::Left, _) => "left_click",
            (MouseButton::Right, _) => "right_click",
            (MouseButton::Middle, _) => "middle_click",
        };
        self.act(json!({"action": action})).await.map(|_| ())
    }

    async fn mouse_down(&mut self, button: MouseButton) -> Result<(), SurfaceError> {
        if button != MouseButton::Left {
            return Err(SurfaceError::Unsupported("non-left drag"));
        }
        self.pressed_at = Some(self.pointer);
        Ok(())
    }

    async fn mouse_up(&mut self, _button: MouseButton) -> Result<(), SurfaceError> {
        let Some(start) = self.pressed_at.take() else {
            return Ok(());
        };
        if start == self.pointer {
            return self.act(json!({"action": "left_click"})).await.map(|_| ());
        }
        self.act(json!({
            "action": "left_click_drag",
            "coordinates": coordinates(self.pointer),
        }))
        .await
        .map(|_| ())
    }

    async fn mouse_wheel(
        &mut self,
        at: Point,
        delta_x: f64,
        delta_y: f64,
    ) -> Result<(), SurfaceError> {
        self.pointer = at;
        self.act(json!({
            "action": "scroll",
            "coordinates": coordinates(at),
            "delta_x": delta_x,
            "delta_y": delta_y,
        }))
        .await
        .map(|_| ())
    }

    async fn key_down(&mut self, key: &str) -> Result<(), SurfaceError> {
        self.chord.push(xdotool_key(key));
        Ok(())
    }

    async fn key_up(&mut self, _key: &str) -> Result<(), SurfaceError> {
        if self.chord.is_empty() {
            return Ok(());
        }
        let text = std::mem::take(&mut self.chord).join("+");
        self.act(json!({"action": "key", "text": text}))
            .await
            .map(|_| ())
    }

    async fn type_text(&mut self, text: &str) -> Result<(), SurfaceError> {
        self.act(json!({"action": "type", "text": text}))
            .await
            .map(|_| ())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, SurfaceError> {
        let reply = self.act(json!({"action": "screenshot"})).await?;
        let encoded = reply
            .base64_image
            .ok_or_else(|| SurfaceError::Remote("screenshot returned no image".to_string()))?;
        BASE64
            .decode(encoded)
            .map_err(|e| SurfaceError::Remote(format!("bad screenshot encoding: {}", e)))
    }

    async fn navigate(&mut self, _url: &str, _timeout: Duration) -> Result<(), SurfaceError> {
        Err(SurfaceError::Unsupported("navigate"))
    }

    async fn go_back(&mut self, _timeout: Duration) -> Result<(), SurfaceError> {
        self.act(json!({"action": "key", "text": "alt+Left"}))
            .await
            .map(|_| ())
    }

    async fn go_forward(&mut self, _timeout: Duration) -> Result<(), SurfaceError> {
        self.act(json!({"action": "key", "text": "alt+Right"}))
            .await
            .map(|_| ())
    }

    async fn current_url(&mut self) -> Result<String, SurfaceError> {
        Err(SurfaceError::Unsupported("current_url"))
    }

    fn take_opened_pages(&mut self) -> Vec<PageId> {
        Vec::new()
    }

    fn focus_page(&mut self, _page: &PageId) -> Result<(), SurfaceError> {
        Ok(())
    }
}
