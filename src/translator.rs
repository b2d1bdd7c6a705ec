//! Turns one tool call from the model into automation primitives and packages
//! what happened as a [`ToolResult`].
//!
//! Nothing here fails outward. Any error while executing a call becomes an
//! `incomplete` result so the model can see the failure and try something
//! else on the next turn.

use std::future::Future;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::config::{Descriptor, Timing};
use crate::error::{ActionError, SurfaceError};
use crate::keys::KeyMap;
use crate::surface::AutomationSurface;
use crate::tools::{FunctionKind, ToolManifest};
use crate::types::{
    ClickButton, ComputerAction, ComputerCall, FunctionCall, MouseButton, Point, ToolCall,
    ToolContent, ToolResult, ToolResultKind,
};

/// 1x1 JPEG returned when a live screenshot cannot be taken.
pub const PLACEHOLDER_SCREENSHOT: &str = concat!(
    "data:image/jpeg;base64,",
    "/9j/4AAQSkZJRgABAQEASABIAAD/2wBDAAMCAgMCAgMDAwMEAwMEBQgFBQQEBQoHBwYIDAoMDAsKCwsNDhIQDQ4RDgsLEBYQERMUFRUVDA8XGBYUGBIUFRT/wAALCAABAAEBAREA/8QAFAABAAAAAAAAAAAAAAAAAAAACf/EABQQAQAAAAAAAAAAAAAAAAAAAAD/2gAIAQEAAD8AKp//2Q=="
);

/// Wheel delta used when the model clicks with the wheel button.
const WHEEL_NOTCH: f64 = 100.0;

pub struct ActionTranslator {
    keys: KeyMap,
    manifest: ToolManifest,
    timing: Timing,
}

impl ActionTranslator {
    pub fn new(descriptor: &Descriptor) -> Self {
        Self {
            keys: KeyMap::default(),
            manifest: descriptor.manifest.clone(),
            timing: descriptor.timing,
        }
    }

    pub fn with_keys(mut self, keys: KeyMap) -> Self {
        self.keys = keys;
        self
    }

    pub async fn execute(&self, surface: &mut dyn AutomationSurface, call: &ToolCall) -> ToolResult {
        match call {
            ToolCall::Computer(c) => self.execute_computer_call(surface, c).await,
            ToolCall::Function(f) => self.execute_function_call(surface, f).await,
        }
    }

    pub async fn execute_computer_call(
        &self,
        surface: &mut dyn AutomationSurface,
        call: &ComputerCall,
    ) -> ToolResult {
        let outcome = match ComputerAction::from_value(&call.action) {
            Ok(action) => self.perform(surface, &action).await,
            Err(e) => Err(e),
        };

        let mut result = match outcome {
            Ok(data_url) => ToolResult::new(
                &call.call_id,
                ToolResultKind::ComputerCallOutput,
                ToolContent::Image(data_url),
            ),
            Err(e) => {
                tracing::error!(
                    call_id = %call.call_id,
                    action = %call.action,
                    error = %e,
                    "Failed to execute computer call"
                );
                ToolResult::new(
                    &call.call_id,
                    ToolResultKind::ComputerCallOutput,
                    ToolContent::Image(PLACEHOLDER_SCREENSHOT.to_string()),
                )
                .incomplete(e)
            }
        };
        result.acknowledged_safety_checks = call.pending_safety_checks.clone();
        result
    }

    pub async fn execute_function_call(
        &self,
        surface: &mut dyn AutomationSurface,
        call: &FunctionCall,
    ) -> ToolResult {
        match self.run_function(surface, call).await {
            Ok(text) => ToolResult::new(
                &call.call_id,
                ToolResultKind::FunctionCallOutput,
                ToolContent::Text(text),
            ),
            Err(e) => {
                tracing::error!(
                    call_id = %call.call_id,
                    name = %call.name,
                    arguments = %call.arguments,
                    error = %e,
                    "Failed to execute function call"
                );
                ToolResult::new(
                    &call.call_id,
                    ToolResultKind::FunctionCallOutput,
                    ToolContent::Text(format!("Failed to execute function call: {}", call.name)),
                )
                .incomplete(e)
            }
        }
    }

    /// Run the action and return a fresh screenshot as a data URL.
    async fn perform(
        &self,
        surface: &mut dyn AutomationSurface,
        action: &ComputerAction,
    ) -> Result<String, ActionError> {
        tracing::debug!(action = action.kind(), "executing computer action");
        let t = &self.timing;

        match action {
            ComputerAction::Click { x, y, button } => {
                let at = Point::new(*x, *y);
                match button {
                    ClickButton::Back => {
                        bounded("go_back", t.history_timeout(), surface.go_back(t.history_timeout()))
                            .await?
                    }
                    ClickButton::Forward => {
                        bounded(
                            "go_forward",
                            t.history_timeout(),
                            surface.go_forward(t.history_timeout()),
                        )
                        .await?
                    }
                    ClickButton::Wheel => surface.mouse_wheel(at, 0.0, WHEEL_NOTCH).await?,
                    ClickButton::Left => surface.mouse_click(at, MouseButton::Left, 1).await?,
                    ClickButton::Right => surface.mouse_click(at, MouseButton::Right, 1).await?,
                    ClickButton::Other(name) => {
                        return Err(ActionError::UnknownButton(name.clone()));
                    }
                }
            }
            ComputerAction::DoubleClick { x, y } => {
                surface
                    .mouse_click(Point::new(*x, *y), MouseButton::Left, 2)
                    .await?
            }
            ComputerAction::Scroll {
                x,
                y,
                scroll_x,
                scroll_y,
            } => {
                let at = Point::new(*x, *y);
                surface.mouse_move(at).await?;
                surface.mouse_wheel(at, *scroll_x, *scroll_y).await?;
            }
            ComputerAction::Keypress { keys } => {
                let mapped: Vec<String> = keys.iter().map(|k| self.keys.translate(k)).collect();
                for key in &mapped {
                    surface.key_down(key).await?;
                }
                for key in mapped.iter().rev() {
                    surface.key_up(key).await?;
                }
            }
            ComputerAction::Type { text } => surface.type_text(text).await?,
            ComputerAction::Wait => {
                pause(t.wait_action()).await;
                return self.capture(surface).await;
            }
            ComputerAction::Screenshot => return self.capture(surface).await,
            ComputerAction::Drag { path } => {
                let (first, last) = match (path.first(), path.last()) {
                    (Some(first), Some(last)) if path.len() >= 2 => (*first, *last),
                    _ => return Err(ActionError::InvalidDragPath),
                };
                surface.mouse_move(first).await?;
                surface.mouse_down(MouseButton::Left).await?;
                for point in path {
                    surface.mouse_move(*point).await?;
                    pause(t.drag_step()).await;
                }
                tracing::trace!(end_x = last.x, end_y = last.y, "drag released");
                surface.mouse_up(MouseButton::Left).await?;
            }
            ComputerAction::Move { x, y } => surface.mouse_move(Point::new(*x, *y)).await?,
            ComputerAction::Unknown { kind } => {
                return Err(ActionError::UnknownAction(kind.clone()));
            }
        }

        pause(t.settle()).await;
        self.capture(surface).await
    }

    async fn capture(&self, surface: &mut dyn AutomationSurface) -> Result<String, ActionError> {
        let limit = self.timing.screenshot_timeout();
        let bytes = bounded("screenshot", limit, surface.screenshot()).await?;
        Ok(png_data_url(&bytes))
    }

    async fn run_function(
        &self,
        surface: &mut dyn AutomationSurface,
        call: &FunctionCall,
    ) -> Result<String, ActionError> {
        let kind = self
            .manifest
            .function(&call.name)
            .ok_or_else(|| ActionError::UnknownFunction(call.name.clone()))?;

        match kind {
            FunctionKind::GoToUrl => {
                let url = call
                    .arguments
                    .get("url")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ActionError::InvalidArguments {
                        name: call.name.clone(),
                        reason: "missing string field `url`".to_string(),
                    })?;
                let limit = self.timing.navigation_timeout();
                bounded("navigation", limit, surface.navigate(url, limit)).await?;
                pause(self.timing.settle()).await;
                Ok(format!("Successfully navigated to the URL: {}", url))
            }
            FunctionKind::GetCurrentUrl => Ok(surface.current_url().await?),
        }
    }
}

/// Encode raw screenshot bytes as a PNG data URL.
pub fn png_data_url(bytes: &[u8]) -> String {
    format!("data:image/png;base64,{}", BASE64.encode(bytes))
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

async fn bounded<T>(
    operation: &'static str,
    limit: Duration,
    call: impl Future<Output = Result<T, SurfaceError>>,
) -> Result<T, ActionError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(ActionError::from),
        Err(_) => Err(ActionError::Timeout {
            operation,
            millis: limit.as_millis(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::testing::{Primitive, RecordingSurface};
    use crate::types::{CallStatus, SafetyCheck};
    use serde_json::json;

    fn translator(provider: &str) -> ActionTranslator {
        let mut config = AgentConfig {
            provider: provider.to_string(),
            ..AgentConfig::default()
        };
        config.timing = Timing::instant();
        ActionTranslator::new(&config.resolve().unwrap())
    }

    fn computer_call(action: serde_json::Value) -> ComputerCall {
        ComputerCall {
            id: Some("cu_1".into()),
            call_id: "call_1".into(),
            action,
            pending_safety_checks: vec![],
        }
    }

    fn function_call(name: &str, arguments: serde_json::Value) -> FunctionCall {
        FunctionCall {
            id: None,
            call_id: "fn_1".into(),
            name: name.into(),
            arguments,
        }
    }

    #[tokio::test]
    async fn keypress_releases_in_reverse_order() {
        let mut surface = RecordingSurface::default();
        let result = translator("scrapybara")
            .execute_computer_call(
                &mut surface,
                &computer_call(json!({"type": "keypress", "keys": ["ctrl", "shift", "t"]})),
            )
            .await;

        assert_eq!(result.status, CallStatus::Completed);
        assert_eq!(
            surface.key_events(),
            vec![
                Primitive::KeyDown("Control".into()),
                Primitive::KeyDown("Shift".into()),
                Primitive::KeyDown("t".into()),
                Primitive::KeyUp("t".into()),
                Primitive::KeyUp("Shift".into()),
                Primitive::KeyUp("Control".into()),
            ]
        );
    }

    #[tokio::test]
    async fn custom_key_map_replaces_the_default() {
        let mut surface = RecordingSurface::default();
        let translator = translator("scrapybara").with_keys(KeyMap::from_pairs([("ENTER", "Return")]));
        translator
            .execute_computer_call(
                &mut surface,
                &computer_call(json!({"type": "keypress", "keys": ["enter", "ctrl"]})),
            )
            .await;

        assert_eq!(
            surface.key_events(),
            vec![
                Primitive::KeyDown("Return".into()),
                Primitive::KeyDown("ctrl".into()),
                Primitive::KeyUp("ctrl".into()),
                Primitive::KeyUp("Return".into()),
            ]
        );
    }

    #[tokio::test]
    async fn short_drag_fails_before_touching_the_pointer() {
        let mut surface = RecordingSurface::default();
        let result = translator("scrapybara")
            .execute_computer_call(
                &mut surface,
                &computer_call(json!({"type": "drag", "path": [{"x": 1, "y": 1}]})),
            )
            .await;

        assert_eq!(result.status, CallStatus::Incomplete);
        assert_eq!(
            result.error.as_deref(),
            Some(ActionError::InvalidDragPath.to_string().as_str())
        );
        assert!(surface.calls.is_empty());
    }

    #[tokio::test]
    async fn drag_presses_walks_and_releases() {
        let mut surface = RecordingSurface::default();
        translator("scrapybara")
            .execute_computer_call(
                &mut surface,
                &computer_call(json!({
                    "type": "drag",
                    "path": [{"x": 10, "y": 10}, {"x": 20, "y": 15}, {"x": 30, "y": 20}]
                })),
            )
            .await;

        assert_eq!(
            surface.calls,
            vec![
                Primitive::Move(10.0, 10.0),
                Primitive::Down(MouseButton::Left),
                Primitive::Move(10.0, 10.0),
                Primitive::Move(20.0, 15.0),
                Primitive::Move(30.0, 20.0),
                Primitive::Up(MouseButton::Left),
                Primitive::Screenshot,
            ]
        );
    }

    #[tokio::test]
    async fn wheel_button_scrolls_instead_of_clicking() {
        let mut surface = RecordingSurface::default();
        let result = translator("scrapybara")
            .execute_computer_call(
                &mut surface,
                &computer_call(json!({"type": "click", "x": 100, "y": 200, "button": "wheel"})),
            )
            .await;

        assert_eq!(result.status, CallStatus::Completed);
        assert!(matches!(
            surface.calls[0],
            Primitive::Wheel { x, y, .. } if x == 100.0 && y == 200.0
        ));
        assert!(
            !surface
                .calls
                .iter()
                .any(|c| matches!(c, Primitive::Click { .. }))
        );
    }

    #[tokio::test]
    async fn click_result_is_a_png_data_url() {
        let mut surface = RecordingSurface::default();
        let result = translator("scrapybara")
            .execute_computer_call(
                &mut surface,
                &computer_call(json!({"type": "click", "x": 5, "y": 6, "button": "right"})),
            )
            .await;

        assert_eq!(
            surface.calls[0],
            Primitive::Click {
                x: 5.0,
                y: 6.0,
                button: MouseButton::Right,
                count: 1
            }
        );
        assert_eq!(result.kind, ToolResultKind::ComputerCallOutput);
        assert_eq!(
            result.content,
            ToolContent::Image(png_data_url(RecordingSurface::SCREENSHOT))
        );
    }

    #[tokio::test]
    async fn failing_primitive_yields_incomplete_placeholder() {
        let mut surface = RecordingSurface::failing();
        let result = translator("scrapybara")
            .execute_computer_call(
                &mut surface,
                &computer_call(json!({"type": "double_click", "x": 1, "y": 2})),
            )
            .await;

        assert_eq!(result.status, CallStatus::Incomplete);
        assert_eq!(
            result.content,
            ToolContent::Image(PLACEHOLDER_SCREENSHOT.to_string())
        );
        assert_eq!(result.call_id, "call_1");
    }

    #[tokio::test]
    async fn unknown_action_and_button_are_incomplete() {
        let t = translator("scrapybara");
        let mut surface = RecordingSurface::default();

        let result = t
            .execute_computer_call(&mut surface, &computer_call(json!({"type": "teleport"})))
            .await;
        assert_eq!(result.status, CallStatus::Incomplete);
        assert_eq!(result.error.as_deref(), Some("Unknown action type: teleport"));

        let result = t
            .execute_computer_call(
                &mut surface,
                &computer_call(json!({"type": "click", "x": 1, "y": 1, "button": "middle"})),
            )
            .await;
        assert_eq!(result.error.as_deref(), Some("Unknown button: middle"));
        assert!(surface.calls.is_empty());
    }

    #[tokio::test]
    async fn screenshot_and_wait_skip_settle_but_capture() {
        let mut surface = RecordingSurface::default();
        let t = translator("scrapybara");
        t.execute_computer_call(&mut surface, &computer_call(json!({"type": "screenshot"})))
            .await;
        t.execute_computer_call(&mut surface, &computer_call(json!({"type": "wait"})))
            .await;
        assert_eq!(surface.calls, vec![Primitive::Screenshot, Primitive::Screenshot]);
    }

    #[tokio::test]
    async fn back_button_navigates_history() {
        let mut surface = RecordingSurface::default();
        translator("hyperbrowser")
            .execute_computer_call(
                &mut surface,
                &computer_call(json!({"type": "click", "x": 0, "y": 0, "button": "back"})),
            )
            .await;
        assert_eq!(surface.calls[0], Primitive::Back);
    }

    #[tokio::test]
    async fn safety_checks_are_acknowledged() {
        let mut surface = RecordingSurface::default();
        let mut call = computer_call(json!({"type": "move", "x": 3, "y": 4}));
        call.pending_safety_checks = vec![SafetyCheck {
            id: "sc_1".into(),
            code: Some("malicious_instructions".into()),
            message: None,
        }];
        let result = translator("scrapybara")
            .execute_computer_call(&mut surface, &call)
            .await;
        assert_eq!(result.acknowledged_safety_checks.len(), 1);
        assert_eq!(surface.calls[0], Primitive::Move(3.0, 4.0));
    }

    #[tokio::test]
    async fn go_to_url_navigates_and_reports_text() {
        let mut surface = RecordingSurface::default();
        let result = translator("hyperbrowser")
            .execute_function_call(
                &mut surface,
                &function_call("go_to_url", json!({"url": "https://example.com"})),
            )
            .await;

        assert_eq!(result.kind, ToolResultKind::FunctionCallOutput);
        assert_eq!(
            result.content,
            ToolContent::Text("Successfully navigated to the URL: https://example.com".into())
        );
        assert_eq!(
            surface.calls,
            vec![Primitive::Navigate("https://example.com".into())]
        );
    }

    #[tokio::test]
    async fn get_current_url_returns_page_url() {
        let mut surface = RecordingSurface::default();
        let result = translator("hyperbrowser")
            .execute_function_call(&mut surface, &function_call("get_current_url", json!({})))
            .await;
        assert_eq!(
            result.content,
            ToolContent::Text(RecordingSurface::URL.into())
        );
    }

    #[tokio::test]
    async fn functions_outside_the_manifest_are_rejected() {
        let mut surface = RecordingSurface::default();
        let result = translator("scrapybara")
            .execute_function_call(
                &mut surface,
                &function_call("go_to_url", json!({"url": "https://example.com"})),
            )
            .await;

        assert_eq!(result.status, CallStatus::Incomplete);
        assert_eq!(
            result.content,
            ToolContent::Text("Failed to execute function call: go_to_url".into())
        );
        assert!(surface.calls.is_empty());
    }

    #[tokio::test]
    async fn go_to_url_without_url_is_incomplete() {
        let mut surface = RecordingSurface::default();
        let result = translator("hyperbrowser")
            .execute_function_call(&mut surface, &function_call("go_to_url", json!({})))
            .await;
        assert_eq!(result.status, CallStatus::Incomplete);
        assert!(surface.calls.is_empty());
    }
}
