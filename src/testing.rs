//! In-crate test doubles for the collaborator traits.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::brain::{ModelClient, ModelRequest};
use crate::config::SessionParams;
use crate::error::{ModelError, ProviderError, SurfaceError};
use crate::provider::{Instance, InstanceProvider, InstanceStatus};
use crate::surface::AutomationSurface;
use crate::types::{AssistantMessage, MouseButton, PageId, Point};

#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Move(f64, f64),
    Click {
        x: f64,
        y: f64,
        button: MouseButton,
        count: u32,
    },
    Down(MouseButton),
    Up(MouseButton),
    Wheel {
        x: f64,
        y: f64,
        dx: f64,
        dy: f64,
    },
    KeyDown(String),
    KeyUp(String),
    Type(String),
    Screenshot,
    Navigate(String),
    Back,
    Forward,
    CurrentUrl,
}

/// Records every primitive. With `fail` set, every input primitive errors
/// while screenshots still succeed.
#[derive(Default)]
pub struct RecordingSurface {
    pub calls: Vec<Primitive>,
    pub fail: bool,
    pub opened: Vec<PageId>,
    pub focused: Option<PageId>,
    /// Shared view of `calls` for tests that hand the surface to an agent.
    pub shared: Option<Arc<Mutex<Vec<Primitive>>>>,
}

impl RecordingSurface {
    pub const SCREENSHOT: &'static [u8] = b"\x89PNG fake";
    pub const URL: &'static str = "https://example.com/current";

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn shared() -> (Self, Arc<Mutex<Vec<Primitive>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let surface = Self {
            shared: Some(log.clone()),
            ..Self::default()
        };
        (surface, log)
    }

    pub fn key_events(&self) -> Vec<Primitive> {
        self.calls
            .iter()
            .filter(|c| matches!(c, Primitive::KeyDown(_) | Primitive::KeyUp(_)))
            .cloned()
            .collect()
    }

    fn record(&mut self, primitive: Primitive) -> Result<(), SurfaceError> {
        let is_input = !matches!(primitive, Primitive::Screenshot);
        self.calls.push(primitive.clone());
        if let Some(shared) = &self.shared {
            shared.lock().unwrap().push(primitive);
        }
        if self.fail && is_input {
            return Err(SurfaceError::Cdp("element is detached".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AutomationSurface for RecordingSurface {
    async fn mouse_move(&mut self, to: Point) -> Result<(), SurfaceError> {
        self.record(Primitive::Move(to.x, to.y))
    }

    async fn mouse_click(
        &mut self,
        at: Point,
        button: MouseButton,
        click_count: u32,
    ) -> Result<(), SurfaceError> {
        self.record(Primitive::Click {
            x: at.x,
            y: at.y,
            button,
            count: click_count,
        })
    }

    async fn mouse_down(&mut self, button: MouseButton) -> Result<(), SurfaceError> {
        self.record(Primitive::Down(button))
    }

    async fn mouse_up(&mut self, button: MouseButton) -> Result<(), SurfaceError> {
        self.record(Primitive::Up(button))
    }

    async fn mouse_wheel(
        &mut self,
        at: Point,
        delta_x: f64,
        delta_y: f64,
    ) -> Result<(), SurfaceError> {
        self.record(Primitive::Wheel {
            x: at.x,
            y: at.y,
            dx: delta_x,
            dy: delta_y,
        })
    }

    async fn key_down(&mut self, key: &str) -> Result<(), SurfaceError> {
        self.record(Primitive::KeyDown(key.to_string()))
    }

    async fn key_up(&mut self, key: &str) -> Result<(), SurfaceError> {
        self.record(Primitive::KeyUp(key.to_string()))
    }

    async fn type_text(&mut self, text: &str) -> Result<(), SurfaceError> {
        self.record(Primitive::Type(text.to_string()))
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, SurfaceError> {
        self.record(Primitive::Screenshot)?;
        Ok(Self::SCREENSHOT.to_vec())
    }

    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), SurfaceError> {
        self.record(Primitive::Navigate(url.to_string()))
    }

    async fn go_back(&mut self, _timeout: Duration) -> Result<(), SurfaceError> {
        self.record(Primitive::Back)
    }

    async fn go_forward(&mut self, _timeout: Duration) -> Result<(), SurfaceError> {
        self.record(Primitive::Forward)
    }

    async fn current_url(&mut self) -> Result<String, SurfaceError> {
        self.record(Primitive::CurrentUrl)?;
        Ok(Self::URL.to_string())
    }

    fn take_opened_pages(&mut self) -> Vec<PageId> {
        std::mem::take(&mut self.opened)
    }

    fn focus_page(&mut self, page: &PageId) -> Result<(), SurfaceError> {
        self.focused = Some(page.clone());
        Ok(())
    }
}

/// Replays canned replies and records every request.
#[derive(Clone, Default)]
pub struct ScriptedModel {
    replies: Arc<Mutex<VecDeque<AssistantMessage>>>,
    pub requests: Arc<Mutex<Vec<ModelRequest>>>,
}

impl ScriptedModel {
    pub fn new(replies: impl IntoIterator<Item = AssistantMessage>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into_iter().collect())),
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn create(&self, request: ModelRequest) -> Result<AssistantMessage, ModelError> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ModelError::InvalidResponse("script exhausted".into()))
    }
}

/// Hands out one pre-built surface and reports a fixed status.
pub struct FakeProvider {
    pub status: InstanceStatus,
    pub acquired: Arc<Mutex<usize>>,
    surface: Mutex<Option<Box<dyn AutomationSurface>>>,
}

impl FakeProvider {
    pub fn new(surface: impl AutomationSurface + 'static) -> Self {
        Self {
            status: InstanceStatus::Active,
            acquired: Arc::default(),
            surface: Mutex::new(Some(Box::new(surface))),
        }
    }

    pub fn instance(&self, id: &str) -> Instance {
        Instance {
            id: id.to_string(),
            status: self.status.clone(),
            live_url: Some(format!("https://live.example.com/{id}")),
            cdp_url: None,
        }
    }
}

#[async_trait]
impl InstanceProvider for FakeProvider {
    async fn acquire(&self, _params: &SessionParams) -> Result<Instance, ProviderError> {
        *self.acquired.lock().unwrap() += 1;
        Ok(self.instance("inst_1"))
    }

    async fn get_instance(&self, id: &str) -> Result<Instance, ProviderError> {
        Ok(self.instance(id))
    }

    async fn release(&self, _id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn connect(&self, instance: &Instance) -> Result<Box<dyn AutomationSurface>, ProviderError> {
        self.surface
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ProviderError::Connect {
                id: instance.id.clone(),
                reason: "surface already taken".into(),
            })
    }
}

/// Serve `app` on an ephemeral localhost port and return its base URL.
pub async fn serve_local(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
