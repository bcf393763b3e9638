use glam::IVec2;

use crate::world::geometry::{Level2d, Node, SectorId, SubsectorId};

pub const CHILD_MASK: u16 = 0x7FFF;

pub const SUBSECTOR_BIT: u16 = 0x8000;

// ──────────────────────────────────────────────────────────────────────────
//                       Level – public helpers
// ──────────────────────────────────────────────────────────────────────────
impl Level2d {
    /// Tagged root child: the last node, or subsector 0 when the level has
    /// no nodes.
    #[inline(always)]
    pub fn bsp_root(&self) -> u16 {
        match self.nodes.len() {
            0 => SUBSECTOR_BIT,
            n => (n - 1) as u16,
        }
    }

    /// Walk the BSP and return the subsector id containing `p`.
    ///
    /// Children always precede their parent (checked by [`Level2d::new`]),
    /// so the descent strictly decreases the node index and terminates.
    pub fn locate_subsector(&self, p: IVec2) -> SubsectorId {
        let mut idx = self.bsp_root();
        loop {
            if idx & SUBSECTOR_BIT != 0 {
                return idx & CHILD_MASK;
            }
            let node = &self.nodes[idx as usize];
            idx = node.child[node.point_side(p)];
        }
    }

    /// Sector containing `p`.
    #[inline]
    pub fn find_sector(&self, p: IVec2) -> SectorId {
        self.subsectors[self.locate_subsector(p) as usize].sector
    }
}

// ──────────────────────────────────────────────────────────────────────────
//                       Node geometry helpers
// ──────────────────────────────────────────────────────────────────────────
impl Node {
    /// 0 = *front* of splitter, 1 = *back*. Points on the line are front.
    #[inline(always)]
    pub fn point_side(&self, p: IVec2) -> usize {
        let csl = (p.x - self.x) as i64 * self.dy as i64;
        let csr = (p.y - self.y) as i64 * self.dx as i64;
        if csr > csl { 1 } else { 0 }
    }
}

// ──────────────────────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::frustum::Bbox2,
        world::{
            geometry::{Sector, Seg, Subsector},
            helpers::two_rooms,
        },
    };
    use glam::ivec2;

    #[test]
    fn point_side_matches_bbox() {
        let lvl = two_rooms();
        let root = &lvl.nodes[lvl.bsp_root() as usize];
        for side in 0..=1 {
            let bb = &root.bbox[side];
            let mid = (bb.lo + bb.hi) / 2;
            assert_eq!(root.point_side(mid), side);
        }
        // on the splitter
        assert_eq!(root.point_side(ivec2(256, 17)), 0);
    }

    #[test]
    fn location_is_total_and_deterministic() {
        let lvl = two_rooms();
        let mut seen = [false; 2];
        for x in (-64..600).step_by(16) {
            for y in (-64..320).step_by(16) {
                let p = ivec2(x, y);
                let ss = lvl.locate_subsector(p);
                assert!((ss as usize) < lvl.subsectors.len());
                assert_eq!(lvl.locate_subsector(p), ss);
                seen[ss as usize] = true;
            }
        }
        assert_eq!(seen, [true, true]);
        assert_eq!(lvl.find_sector(ivec2(100, 100)), 0);
        assert_eq!(lvl.find_sector(ivec2(400, 100)), 1);
    }

    /// Four quadrants: root splits on x, both children split on y.
    #[test]
    fn every_leaf_of_a_deeper_tree_is_reachable() {
        let bb = |lo: IVec2, hi: IVec2| Bbox2::new(lo, hi);
        let full = 100;
        let nodes = vec![
            // x < 0 half, split on y = 0 pointing +x (front is y < 0)
            Node {
                x: 0,
                y: 0,
                dx: 1,
                dy: 0,
                bbox: [bb(ivec2(-full, -full), ivec2(0, 0)), bb(ivec2(-full, 0), ivec2(0, full))],
                child: [SUBSECTOR_BIT, SUBSECTOR_BIT | 1],
            },
            // x >= 0 half
            Node {
                x: 0,
                y: 0,
                dx: 1,
                dy: 0,
                bbox: [bb(ivec2(0, -full), ivec2(full, 0)), bb(ivec2(0, 0), ivec2(full, full))],
                child: [SUBSECTOR_BIT | 2, SUBSECTOR_BIT | 3],
            },
            // root, split on x = 0 pointing +y (front is x >= 0)
            Node {
                x: 0,
                y: 0,
                dx: 0,
                dy: 1,
                bbox: [bb(ivec2(0, -full), ivec2(full, full)), bb(ivec2(-full, -full), ivec2(0, full))],
                child: [1, 0],
            },
        ];
        let subsectors = (0..4)
            .map(|i| Subsector { first_seg: 0, seg_count: 1, sector: i })
            .collect();
        let segs = vec![Seg::wall(ivec2(0, 0), ivec2(1, 0), 1)];
        let sectors = vec![Sector::default(); 4];
        let lvl = Level2d::new(nodes, subsectors, segs, sectors).unwrap();

        assert_eq!(lvl.locate_subsector(ivec2(-50, -50)), 0);
        assert_eq!(lvl.locate_subsector(ivec2(-50, 50)), 1);
        assert_eq!(lvl.locate_subsector(ivec2(50, -50)), 2);
        assert_eq!(lvl.locate_subsector(ivec2(50, 50)), 3);
    }

    #[test]
    fn single_subsector_level() {
        let lvl = Level2d::new(
            vec![],
            vec![Subsector { first_seg: 0, seg_count: 0, sector: 0 }],
            vec![],
            vec![Sector::default()],
        )
        .unwrap();
        assert_eq!(lvl.bsp_root(), SUBSECTOR_BIT);
        assert_eq!(lvl.locate_subsector(ivec2(12345, -999)), 0);
    }
}
