pub mod bsp;
pub mod clip;
pub mod columns;
pub mod doom;
pub mod frame;
pub mod frustum;
pub mod mesh;
pub mod pvs;
pub mod raster;
pub mod spans;
pub mod texturing;
pub mod transform;
pub mod types;

pub use doom::{DoomRenderer, DoomStats};
pub use frame::{FrameStats, RenderState};
pub use mesh::{Mesh, MeshRenderer};
