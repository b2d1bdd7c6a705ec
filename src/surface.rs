use std::time::Duration;

use async_trait::async_trait;

use crate::error::SurfaceError;
use crate::types::{MouseButton, PageId, Point};

/// Primitive operations on a remote browser page or desktop.
///
/// A surface is owned by exactly one session. Pages opened by the remote side
/// (popups, `target=_blank` links) are reported through
/// [`AutomationSurface::take_opened_pages`]; the agent loop drains them before
/// every dispatch and focuses the newest one.
#[async_trait]
pub trait AutomationSurface: Send {
    async fn mouse_move(&mut self, to: Point) -> Result<(), SurfaceError>;

    async fn mouse_click(
        &mut self,
        at: Point,
        button: MouseButton,
        click_count: u32,
    ) -> Result<(), SurfaceError>;

    async fn mouse_down(&mut self, button: MouseButton) -> Result<(), SurfaceError>;

    async fn mouse_up(&mut self, button: MouseButton) -> Result<(), SurfaceError>;

    async fn mouse_wheel(&mut self, at: Point, delta_x: f64, delta_y: f64)
    -> Result<(), SurfaceError>;

    async fn key_down(&mut self, key: &str) -> Result<(), SurfaceError>;

    async fn key_up(&mut self, key: &str) -> Result<(), SurfaceError>;

    async fn type_text(&mut self, text: &str) -> Result<(), SurfaceError>;

    /// Capture the current page as PNG (or JPEG) bytes.
    async fn screenshot(&mut self) -> Result<Vec<u8>, SurfaceError>;

    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), SurfaceError>;

    async fn go_back(&mut self, timeout: Duration) -> Result<(), SurfaceError>;

    async fn go_forward(&mut self, timeout: Duration) -> Result<(), SurfaceError>;

    async fn current_url(&mut self) -> Result<String, SurfaceError>;

    /// Pages opened since the last call, oldest first.
    fn take_opened_pages(&mut self) -> Vec<PageId>;

    /// Direct subsequent primitives at `page`.
    fn focus_page(&mut self, page: &PageId) -> Result<(), SurfaceError>;
}
