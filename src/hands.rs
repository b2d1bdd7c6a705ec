//! Automation surface over a remote Chrome reached through its DevTools
//! websocket. `headless_chrome` is blocking, so every call runs on the
//! blocking pool.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::protocol::cdp::Input;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, Tab};
use serde_json::{Value, json};

use crate::error::SurfaceError;
use crate::surface::AutomationSurface;
use crate::types::{MouseButton, PageId, Point};

const MODIFIER_ALT: u32 = 1;
const MODIFIER_CTRL: u32 = 2;
const MODIFIER_META: u32 = 4;
const MODIFIER_SHIFT: u32 = 8;

/// One connected browser. Tracks the page primitives are sent to, the
/// pointer position and held modifiers.
pub struct ChromeSurface {
    browser: Browser,
    tab: Arc<Tab>,
    known_pages: HashSet<PageId>,
    pointer: Point,
    held_button: Option<MouseButton>,
    modifiers: u32,
}

fn cdp_err(e: impl std::fmt::Display) -> SurfaceError {
    SurfaceError::Cdp(e.to_string())
}

impl ChromeSurface {
    /// Attach to a remote browser. The connection is closed by the library
    /// once `idle_timeout` passes without any DevTools traffic.
    pub async fn connect(ws_url: String, idle_timeout: Duration) -> Result<Self, SurfaceError> {
        tokio::task::spawn_blocking(move || Self::connect_blocking(ws_url, idle_timeout))
            .await
            .map_err(|e| SurfaceError::Cdp(format!("connect task failed: {}", e)))?
    }

    fn connect_blocking(ws_url: String, idle_timeout: Duration) -> Result<Self, SurfaceError> {
        tracing::info!(idle_secs = idle_timeout.as_secs(), "[Hands] Attaching to remote Chrome...");
        let browser = Browser::connect_with_timeout(ws_url, idle_timeout).map_err(cdp_err)?;

        let (first, known_pages) = {
            let tabs = browser
                .get_tabs()
                .lock()
                .map_err(|_| SurfaceError::Cdp("tab list poisoned".to_string()))?;
            let known: HashSet<PageId> = tabs.iter().map(|t| t.get_target_id().clone()).collect();
            (tabs.first().cloned(), known)
        };

        let tab = match first {
            Some(tab) => tab,
            None => {
                tracing::info!("[Hands] No tabs found, creating new one.");
                browser.new_tab().map_err(cdp_err)?
            }
        };

        let mut known_pages = known_pages;
        known_pages.insert(tab.get_target_id().clone());
        tracing::info!(page = %tab.get_target_id(), "[Hands] Chrome ready.");

        Ok(Self {
            browser,
            tab,
            known_pages,
            pointer: Point::new(0.0, 0.0),
            held_button: None,
            modifiers: 0,
        })
    }

    /// Run a blocking closure against the current tab.
    async fn on_tab<T, F>(&self, f: F) -> Result<T, SurfaceError>
    where
        F: FnOnce(&Tab) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || f(tab.as_ref()))
            .await
            .map_err(|e| SurfaceError::Cdp(format!("blocking task failed: {}", e)))?
            .map_err(cdp_err)
    }

    async fn dispatch_mouse(&self, event: Value) -> Result<(), SurfaceError> {
        let event: Input::DispatchMouseEvent = serde_json::from_value(event).map_err(cdp_err)?;
        self.on_tab(move |tab| {
            tab.call_method(event)?;
            Ok(())
        })
        .await
    }

    async fn dispatch_key(&self, event: Value) -> Result<(), SurfaceError> {
        let event: Input::DispatchKeyEvent = serde_json::from_value(event).map_err(cdp_err)?;
        self.on_tab(move |tab| {
            tab.call_method(event)?;
            Ok(())
        })
        .await
    }

    fn mouse_event(&self, kind: &str, at: Point, button: Option<MouseButton>, clicks: u32) -> Value {
        json!({
            "type": kind,
            "x": at.x,
            "y": at.y,
            "modifiers": self.modifiers,
            "button": button.map(cdp_button).unwrap_or("none"),
            "clickCount": clicks,
        })
    }
}

fn cdp_button(button: MouseButton) -> &'static str {
    match button {
        MouseButton::Left => "left",
        MouseButton::Right => "right",
        MouseButton::Middle => "middle",
    }
}

/// DevTools description of one key in the surface vocabulary.
#[derive(Debug, Clone, PartialEq)]
struct KeyDefinition {
    key: String,
    code: String,
    key_code: u32,
    text: Option<String>,
    modifier: u32,
}

fn key_definition(key: &str) -> KeyDefinition {
    let named = |code: &str, key_code: u32, modifier: u32| KeyDefinition {
        key: key.to_string(),
        code: code.to_string(),
        key_code,
        text: None,
        modifier,
    };

    match key {
        "Control" => named("ControlLeft", 17, MODIFIER_CTRL),
        "Shift" => named("ShiftLeft", 16, MODIFIER_SHIFT),
        "Alt" => named("AltLeft", 18, MODIFIER_ALT),
        "Meta" => named("MetaLeft", 91, MODIFIER_META),
        "Enter" => KeyDefinition {
            text: Some("\r".to_string()),
            ..named("Enter", 13, 0)
        },
        "Tab" => named("Tab", 9, 0),
        "Escape" => named("Escape", 27, 0),
        "Backspace" => named("Backspace", 8, 0),
        "Delete" => named("Delete", 46, 0),
        "Insert" => named("Insert", 45, 0),
        "CapsLock" => named("CapsLock", 20, 0),
        "Home" => named("Home", 36, 0),
        "End" => named("End", 35, 0),
        "PageUp" => named("PageUp", 33, 0),
        "PageDown" => named("PageDown", 34, 0),
        "ArrowLeft" => named("ArrowLeft", 37, 0),
        "ArrowUp" => named("ArrowUp", 38, 0),
        "ArrowRight" => named("ArrowRight", 39, 0),
        "ArrowDown" => named("ArrowDown", 40, 0),
        " " => KeyDefinition {
            text: Some(" ".to_string()),
            ..named("Space", 32, 0)
        },
        "Divide" => KeyDefinition {
            key: "/".to_string(),
            text: Some("/".to_string()),
            ..named("NumpadDivide", 111, 0)
        },
        "Backslash" => KeyDefinition {
            key: "\\".to_string(),
            text: Some("\\".to_string()),
            ..named("Backslash", 220, 0)
        },
        _ => {
            if let Some(n) = key.strip_prefix('F').and_then(|n| n.parse::<u32>().ok()) {
                if (1..=12).contains(&n) {
                    return named(key, 111 + n, 0);
                }
            }
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphabetic() => KeyDefinition {
                    text: Some(key.to_string()),
                    ..named(&format!("Key{}", c.to_ascii_uppercase()), c.to_ascii_uppercase() as u32, 0)
                },
                (Some(c), None) if c.is_ascii_digit() => KeyDefinition {
                    text: Some(key.to_string()),
                    ..named(&format!("Digit{}", c), c as u32, 0)
                },
                (Some(_), None) => KeyDefinition {
                    text: Some(key.to_string()),
                    ..named("", 0, 0)
                },
                _ => named(key, 0, 0),
            }
        }
    }
}

#[async_trait]
impl AutomationSurface for ChromeSurface {
    async fn mouse_move(&mut self, to: Point) -> Result<(), SurfaceError> {
        let event = self.mouse_event("mouseMoved", to, self.held_button, 0);
        self.dispatch_mouse(event).await?;
        self.pointer = to;
        Ok(())
    }

    async fn mouse_click(
        &mut self,
        at: Point,
        button: MouseButton,
        click_count: u32,
    ) -> Result<(), SurfaceError> {
        self.mouse_move(at).await?;
        for clicks in 1..=click_count.max(1) {
            let press = self.mouse_event("mousePressed", at, Some(button), clicks);
            self.dispatch_mouse(press).await?;
            let release = self.mouse_event("mouseReleased", at, Some(button), clicks);
            self.dispatch_mouse(release).await?;
        }
        Ok(())
    }

    async fn mouse_down(&mut self, button: MouseButton) -> Result<(), SurfaceError> {
        let event = self.mouse_event("mousePressed", self.pointer, Some(button), 1);
        self.dispatch_mouse(event).await?;
        self.held_button = Some(button);
        Ok(())
    }

    async fn mouse_up(&mut self, button: MouseButton) -> Result<(), SurfaceError> {
        let event = self.mouse_event("mouseReleased", self.pointer, Some(button), 1);
        self.held_button = None;
        self.dispatch_mouse(event).await
    }

    async fn mouse_wheel(
        &mut self,
        at: Point,
        delta_x: f64,
        delta_y: f64,
    ) -> Result<(), SurfaceError> {
        let mut event = self.mouse_event("mouseWheel", at, None, 0);
        event["deltaX"] = json!(delta_x);
        event["deltaY"] = json!(delta_y);
        self.dispatch_mouse(event).await
    }

    async fn key_down(&mut self, key: &str) -> Result<(), SurfaceError> {
        let def = key_definition(key);
        self.modifiers |= def.modifier;

        // Chords other than shift must not insert text.
        let text = def
            .text
            .filter(|_| self.modifiers & !MODIFIER_SHIFT == 0);
        let kind = if text.is_some() { "keyDown" } else { "rawKeyDown" };

        let mut event = json!({
            "type": kind,
            "modifiers": self.modifiers,
            "key": def.key,
            "code": def.code,
            "windowsVirtualKeyCode": def.key_code,
            "nativeVirtualKeyCode": def.key_code,
        });
        if let Some(text) = text {
            event["text"] = json!(text);
            event["unmodifiedText"] = json!(text);
        }
        self.dispatch_key(event).await
    }

    async fn key_up(&mut self, key: &str) -> Result<(), SurfaceError> {
        let def = key_definition(key);
        self.modifiers &= !def.modifier;
        let event = json!({
            "type": "keyUp",
            "modifiers": self.modifiers,
            "key": def.key,
            "code": def.code,
            "windowsVirtualKeyCode": def.key_code,
            "nativeVirtualKeyCode": def.key_code,
        });
        self.dispatch_key(event).await
    }

    async fn type_text(&mut self, text: &str) -> Result<(), SurfaceError> {
        let text = text.to_string();
        self.on_tab(move |tab| {
            tab.type_str(&text)?;
            Ok(())
        })
        .await
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, SurfaceError> {
        self.on_tab(|tab| {
            tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
        })
        .await
    }

    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), SurfaceError> {
        let url = url.to_string();
        tracing::info!(url = %url, "[Hands] navigating");
        self.on_tab(move |tab| {
            tab.set_default_timeout(timeout);
            tab.navigate_to(&url)?;
            tab.wait_until_navigated()?;
            Ok(())
        })
        .await
    }

    async fn go_back(&mut self, timeout: Duration) -> Result<(), SurfaceError> {
        self.on_tab(move |tab| {
            tab.set_default_timeout(timeout);
            tab.evaluate("history.back()", false)?;
            tab.wait_until_navigated()?;
            Ok(())
        })
        .await
    }

    async fn go_forward(&mut self, timeout: Duration) -> Result<(), SurfaceError> {
        self.on_tab(move |tab| {
            tab.set_default_timeout(timeout);
            tab.evaluate("history.forward()", false)?;
            tab.wait_until_navigated()?;
            Ok(())
        })
        .await
    }

    async fn current_url(&mut self) -> Result<String, SurfaceError> {
        self.on_tab(|tab| Ok(tab.get_url())).await
    }

    fn take_opened_pages(&mut self) -> Vec<PageId> {
        let Ok(tabs) = self.browser.get_tabs().lock() else {
            tracing::warn!("[Hands] tab list poisoned, skipping new-page check");
            return Vec::new();
        };
        let mut opened = Vec::new();
        for tab in tabs.iter() {
            let id = tab.get_target_id();
            if self.known_pages.insert(id.clone()) {
                opened.push(id.clone());
            }
        }
        opened
    }

    fn focus_page(&mut self, page: &PageId) -> Result<(), SurfaceError> {
        let tab = {
            let tabs = self
                .browser
                .get_tabs()
                .lock()
                .map_err(|_| SurfaceError::Cdp("tab list poisoned".to_string()))?;
            tabs.iter()
                .find(|t| t.get_target_id() == page)
                .cloned()
                .ok_or_else(|| SurfaceError::PageNotFound(page.clone()))?
        };
        tracing::info!(page = %page, "[Hands] switching to page");
        self.tab = tab;
        self.held_button = None;
        self.modifiers = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modifiers_carry_their_bit() {
        assert_eq!(key_definition("Control").modifier, MODIFIER_CTRL);
        assert_eq!(key_definition("Meta").code, "MetaLeft");
        assert_eq!(key_definition("Enter").text.as_deref(), Some("\r"));
    }

    #[test]
    fn single_characters_get_codes() {
        let t = key_definition("t");
        assert_eq!(t.code, "KeyT");
        assert_eq!(t.key_code, 'T' as u32);
        assert_eq!(t.text.as_deref(), Some("t"));

        assert_eq!(key_definition("7").code, "Digit7");
        assert_eq!(key_definition("F5").key_code, 116);
        assert_eq!(key_definition("Divide").key, "/");
    }

    #[test]
    fn mouse_events_parse_as_devtools_commands() {
        let event = json!({
            "type": "mousePressed",
            "x": 10.0,
            "y": 20.0,
            "modifiers": 0,
            "button": "left",
            "clickCount": 1,
        });
        let parsed: Result<Input::DispatchMouseEvent, _> = serde_json::from_value(event);
        assert!(parsed.is_ok());
    }

    #[tokio::test]
    async fn secure_websocket_urls_reach_the_network() {
        // Nothing listens on the discard port; the failure must come from the
        // TCP connect, not from scheme handling.
        let err = ChromeSurface::connect(
            "wss://127.0.0.1:9/devtools/browser/abc".to_string(),
            Duration::from_secs(5),
        )
        .await
        .err()
        .unwrap();
        let message = err.to_string();
        assert!(!message.contains("TLS support not compiled in"), "{message}");
        assert!(!message.contains("URL error"), "{message}");
    }
}
