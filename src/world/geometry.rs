use bitflags::bitflags;
use glam::IVec2;
use thiserror::Error;

use crate::engine::frustum::Bbox2;
use crate::world::bsp::{CHILD_MASK, SUBSECTOR_BIT};

pub type NodeId = u16;
pub type SubsectorId = u16;
pub type SegId = u16;
pub type SectorId = u16;

/// Texture id meaning "nothing to draw" for walls and floors.
pub const NO_TEXTURE: u16 = 0;

/// Runtime snapshot of one 2D BSP map (immutable after construction).
///
/// Map coordinates are plain integers, `y` pointing up, angles counted
/// counter-clockwise from +X.
#[derive(Debug)]
pub struct Level2d {
    pub nodes: Vec<Node>,
    pub subsectors: Vec<Subsector>,
    pub segs: Vec<Seg>,
    pub sectors: Vec<Sector>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LevelError {
    #[error("level has no nodes and {0} subsectors")]
    EmptyTree(usize),

    #[error("node {node}: child {child:#06x} out of range")]
    BadChild { node: usize, child: u16 },

    /// Node children must have lower indices than their parent, which rules
    /// out cycles.
    #[error("node {node}: child node {child} does not precede its parent")]
    ChildOrder { node: usize, child: u16 },

    #[error("subsector {0}: segment range out of bounds")]
    BadSegRange(usize),

    #[error("subsector {subsector}: sector {sector} out of range")]
    BadSector { subsector: usize, sector: u16 },

    #[error("segment {seg}: other sector {sector} out of range")]
    BadOtherSector { seg: usize, sector: u16 },
}

/*------------------------------ nodes --------------------------------*/

/// Splitter `(x, y) + t·(dx, dy)`; `child[0]`/`bbox[0]` is the front
/// (right-hand) side. A child with [`SUBSECTOR_BIT`] set is a subsector.
#[derive(Clone, Debug)]
pub struct Node {
    pub x: i32,
    pub y: i32,
    pub dx: i32,
    pub dy: i32,
    pub bbox: [Bbox2; 2],
    pub child: [u16; 2],
}

/*------------------------------ segs ---------------------------------*/

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct SegFlags: u16 {
        /// Middle texture has holes; the column stays open behind it.
        const TRANSPARENT = 0x0001;
    }
}

/// Boundary segment of a subsector, seen from the right of `v0 → v1`.
#[derive(Clone, Debug)]
pub struct Seg {
    pub v0: IVec2,
    pub v1: IVec2,
    /// Texture `u` at `v1`.
    pub len: i32,
    pub upper: u16,
    pub lower: u16,
    pub middle: u16,
    /// Sector behind a two-sided segment.
    pub other: Option<SectorId>,
    pub flags: SegFlags,
}

impl Seg {
    /// One-sided wall with a middle texture.
    pub fn wall(v0: IVec2, v1: IVec2, middle: u16) -> Self {
        Self {
            v0,
            v1,
            len: (v1 - v0).as_vec2().length() as i32,
            upper: NO_TEXTURE,
            lower: NO_TEXTURE,
            middle,
            other: None,
            flags: SegFlags::empty(),
        }
    }

    /// Two-sided opening into `other` with step textures.
    pub fn portal(v0: IVec2, v1: IVec2, other: SectorId, upper: u16, lower: u16) -> Self {
        Self {
            upper,
            lower,
            middle: NO_TEXTURE,
            other: Some(other),
            ..Self::wall(v0, v1, NO_TEXTURE)
        }
    }
}

#[derive(Clone, Debug)]
pub struct Subsector {
    pub first_seg: SegId,
    pub seg_count: u16,
    pub sector: SectorId,
}

/*----------------------------- sectors -------------------------------*/

#[derive(Clone, Debug, Default)]
pub struct Sector {
    pub floor_h: i32,
    pub ceil_h: i32,
    /// [`NO_TEXTURE`] leaves the floor undrawn.
    pub floor_tex: u16,
    pub ceil_tex: u16,
    pub light: u8,
    pub lowlight: u8,
    pub special: u16,
}

impl Sector {
    /// Light level at `frame` after the sector's lighting special.
    ///
    /// * 1 – random off, dark while `rand < 256`
    /// * 2, 12 – fast flash, lit for 4 frames out of 16
    /// * 3, 13 – slow flash, lit for 8 frames out of 32
    /// * 8 – oscillates every 8 frames
    pub fn light_level(&self, frame: u32, rand: u32) -> u8 {
        let lit = match self.special {
            1 => rand >= 256,
            2 | 12 => (frame / 4) & 3 == 0,
            3 | 13 => (frame / 8) & 3 == 0,
            8 => (frame / 8) & 1 != 0,
            _ => true,
        };
        if lit { self.light } else { self.lowlight }
    }
}

/*------------------------------ level --------------------------------*/

impl Level2d {
    /// Checks every cross reference; the BSP root is the last node, or the
    /// only subsector of a level without nodes.
    pub fn new(
        nodes: Vec<Node>,
        subsectors: Vec<Subsector>,
        segs: Vec<Seg>,
        sectors: Vec<Sector>,
    ) -> Result<Self, LevelError> {
        if nodes.is_empty() && subsectors.len() != 1 {
            return Err(LevelError::EmptyTree(subsectors.len()));
        }

        for (i, node) in nodes.iter().enumerate() {
            for &child in &node.child {
                let idx = (child & CHILD_MASK) as usize;
                if child & SUBSECTOR_BIT != 0 {
                    if idx >= subsectors.len() {
                        return Err(LevelError::BadChild { node: i, child });
                    }
                } else if idx >= nodes.len() {
                    return Err(LevelError::BadChild { node: i, child });
                } else if idx >= i {
                    return Err(LevelError::ChildOrder { node: i, child });
                }
            }
        }

        for (i, ss) in subsectors.iter().enumerate() {
            let end = ss.first_seg as usize + ss.seg_count as usize;
            if end > segs.len() {
                return Err(LevelError::BadSegRange(i));
            }
            if ss.sector as usize >= sectors.len() {
                return Err(LevelError::BadSector { subsector: i, sector: ss.sector });
            }
        }

        for (i, seg) in segs.iter().enumerate() {
            if let Some(sector) = seg.other {
                if sector as usize >= sectors.len() {
                    return Err(LevelError::BadOtherSector { seg: i, sector });
                }
            }
        }

        Ok(Self { nodes, subsectors, segs, sectors })
    }

    #[inline]
    pub fn subsector_segs(&self, ss: SubsectorId) -> &[Seg] {
        let ss = &self.subsectors[ss as usize];
        let first = ss.first_seg as usize;
        &self.segs[first..first + ss.seg_count as usize]
    }

    #[inline]
    pub fn sector_of(&self, ss: SubsectorId) -> &Sector {
        &self.sectors[self.subsectors[ss as usize].sector as usize]
    }
}
