mod bsp;
mod geometry;
pub mod helpers;
mod view;

pub use bsp::{CHILD_MASK, SUBSECTOR_BIT};
pub use geometry::{
    Level2d, LevelError, NO_TEXTURE, Node, NodeId, Sector, SectorId, Seg, SegFlags, SegId,
    Subsector, SubsectorId,
};
pub use view::{InverseView, View, View2d};
