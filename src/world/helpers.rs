//! Small hand-built levels for the demo binary and the tests.

use glam::{IVec2, ivec2};

use crate::{
    engine::frustum::Bbox2,
    world::{
        bsp::SUBSECTOR_BIT,
        geometry::{Level2d, Node, Sector, Seg, Subsector},
    },
};

pub const WALL_TEX: u16 = 3;
pub const STEP_TEX: u16 = 4;
pub const FLOOR_TEX: u16 = 1;
pub const CEIL_TEX: u16 = 2;

/// Closed loop of segs through `corners`, wound so the inside is on the
/// right of every seg. `portals` maps a corner index `i` (edge `i → i+1`) to
/// the sector behind that edge.
fn room(corners: &[IVec2], portals: &[(usize, u16)]) -> Vec<Seg> {
    (0..corners.len())
        .map(|i| {
            let (v0, v1) = (corners[i], corners[(i + 1) % corners.len()]);
            match portals.iter().find(|(edge, _)| *edge == i) {
                Some(&(_, other)) => Seg::portal(v0, v1, other, STEP_TEX, STEP_TEX),
                None => Seg::wall(v0, v1, WALL_TEX),
            }
        })
        .collect()
}

/// Two 256×256 rooms side by side, split at `x = 256`.
///
/// * sector 0 (`x < 256`): floor 0, ceiling 128, subsector 0
/// * sector 1 (`x ≥ 256`): floor 32, ceiling 96, subsector 1
///
/// The opening between them is a pair of portal segs.
pub fn two_rooms() -> Level2d {
    let a = [ivec2(0, 0), ivec2(0, 256), ivec2(256, 256), ivec2(256, 0)];
    let b = [ivec2(256, 0), ivec2(256, 256), ivec2(512, 256), ivec2(512, 0)];

    let mut segs = room(&a, &[(2, 1)]);
    let mut b_segs = room(&b, &[(0, 0)]);
    // from the raised room the step down is not visible
    b_segs[0].lower = 0;
    b_segs[0].upper = 0;
    segs.append(&mut b_segs);

    let sector = |floor_h, ceil_h| Sector {
        floor_h,
        ceil_h,
        floor_tex: FLOOR_TEX,
        ceil_tex: CEIL_TEX,
        light: 12,
        lowlight: 6,
        special: 0,
    };

    Level2d {
        nodes: vec![Node {
            x: 256,
            y: 0,
            dx: 0,
            dy: 256,
            bbox: [
                Bbox2::new(ivec2(256, 0), ivec2(512, 256)),
                Bbox2::new(ivec2(0, 0), ivec2(256, 256)),
            ],
            child: [SUBSECTOR_BIT | 1, SUBSECTOR_BIT],
        }],
        subsectors: vec![
            Subsector { first_seg: 0, seg_count: 4, sector: 0 },
            Subsector { first_seg: 4, seg_count: 4, sector: 1 },
        ],
        segs,
        sectors: vec![sector(0, 128), sector(32, 96)],
    }
}
