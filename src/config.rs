//! Render-time configuration.
//!
//! Every capacity is a hard bound: when one is reached the renderer stops
//! inserting for the rest of the frame and logs at `debug` level.

use crate::engine::types::Screen;

/// How leaf work is split between the producer and the helper worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Scheduling {
    /// Everything runs on the calling thread.
    Single,
    /// A helper thread culls half of the PVS and rasterizes every other leaf.
    #[default]
    Dual,
}

#[derive(Clone, Debug)]
pub struct RenderConfig {
    pub screen: Screen,
    /// Near plane distance in view space.
    pub z_clip: i32,
    /// Span arena slots shared by both workers.
    pub max_spans: usize,
    /// Rasterized faces per frame, shared by both workers.
    pub max_faces: usize,
    /// Vertex capacity of a polygon after near-plane clipping.
    pub max_poly: usize,
    /// Visible subsector records (2D BSP path).
    pub max_vis_subsectors: usize,
    /// Visible segment records (2D BSP path).
    pub max_vis_segs: usize,
    pub scheduling: Scheduling,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            screen: Screen::default(),
            z_clip: 64,
            max_spans: 11_000,
            max_faces: 500,
            max_poly: 20,
            max_vis_subsectors: 128,
            max_vis_segs: 512,
            scheduling: Scheduling::Dual,
        }
    }
}

impl RenderConfig {
    pub fn with_screen(mut self, w: i32, h: i32) -> Self {
        self.screen = Screen::new(w, h);
        self
    }

    pub fn with_scheduling(mut self, scheduling: Scheduling) -> Self {
        self.scheduling = scheduling;
        self
    }
}
