//! Visibility and rasterization pipeline for a column-oriented GPU.
//!
//! * [`fixed`] – fixed-point kernel shared by everything else.
//! * [`engine`] – rasterizer, clipper, texturing, frustum, span arena,
//!   PVS/BSP traversal and the per-frame drivers.
//! * [`world`] – view and level models.
//! * [`pack`] – the fixed-point level pack streamed from flash.
//! * [`renderer`] – the hardware command protocol and device seam.

pub mod config;
pub mod engine;
pub mod fixed;
pub mod pack;
pub mod renderer;
pub mod world;

pub use config::{RenderConfig, Scheduling};
