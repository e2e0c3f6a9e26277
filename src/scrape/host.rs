use image::RgbaImage;

use super::capture::{Rect, SurfaceDimensions};
use super::rules::RegionId;

/// What the client currently shows for one interface component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionSnapshot {
    pub visible: bool,
    pub text: Option<String>,
    pub bounds: Rect,
}

/// The game client as seen by the scraper.
///
/// All of these read state that only the client thread may touch, so an
/// implementation is moved onto the [`OwnerContext`](super::OwnerContext)
/// thread and is never called from anywhere else.
pub trait HostClient: Send + 'static {
    /// `None` when the component is not loaded at all.
    fn read_region(&self, id: RegionId) -> Option<RegionSnapshot>;

    /// Name of the logged-in player; `None` on the login screen.
    fn local_player_name(&self) -> Option<String>;

    fn surface(&self) -> SurfaceDimensions;

    /// Draws one frame and returns its pixels.
    fn render_frame(&mut self) -> RgbaImage;
}
