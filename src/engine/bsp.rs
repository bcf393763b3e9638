//! ----------------------------------------------------------------------------
//! **BSP front-to-back traversal** (2D levels)
//!
//! Responsible for
//! * finding the potentially visible subsectors, near side first
//! * projecting every visible seg into a [`VisSeg`] record: its column range
//!   plus the `1/d` and `u/d` interpolants the column renderer steps
//!
//! An explicit stack replaces recursion so the depth is bounded by the
//! tree, not by the call stack. Both record tables are bounded; once one is
//! full the rest of the frame is dropped.
//! ----------------------------------------------------------------------------

use std::f64::consts::TAU;

use glam::IVec2;
use smallvec::SmallVec;

use crate::{
    config::RenderConfig,
    engine::{frustum::ViewRays2d, types::Screen},
    fixed::{ANGLE_STEPS, TRIG_SHIFT, cos, sin},
    world::{CHILD_MASK, Level2d, SUBSECTOR_BIT, Seg, SegId, SubsectorId, View2d},
};

/// Segs closer than this are clipped.
pub const SEG_NEAR: i32 = 16;
/// Fraction bits of the seg clip ratio.
const CLIP_SHIFT: u32 = 16;
/// `invd = (1 << INVD_SHIFT) / depth`.
pub const INVD_SHIFT: u32 = 22;

/*──────────────────────────── Column table ───────────────────────────*/

/// Per-column view angles and plane offsets for a horizontal focal length
/// of `3w/4`.
#[derive(Clone, Debug)]
pub struct ColumnTable {
    pub screen: Screen,
    pub focal: i32,
    /// Angle of each column relative to the view direction, counter-clockwise
    /// positive (column 0 is the leftmost, so its angle is positive).
    pub alpha: Vec<i32>,
    /// Q12 horizontal offset of each column at unit depth.
    pub x: Vec<i32>,
}

impl ColumnTable {
    pub fn new(screen: Screen) -> Self {
        let focal = 3 * screen.w / 4;
        let half = screen.half_w();
        let alpha = (0..screen.w)
            .map(|c| {
                let a = ((half - c) as f64).atan2(focal as f64);
                (a * ANGLE_STEPS as f64 / TAU).round() as i32
            })
            .collect();
        let x = (0..screen.w)
            .map(|c| ((c - half) << TRIG_SHIFT) / focal.max(1))
            .collect();
        Self { screen, focal, alpha, x }
    }

    /// View rays through the first and last column.
    pub fn rays(&self, view: &View2d) -> ViewRays2d {
        let left = self.alpha.first().copied().unwrap_or(0);
        let right = self.alpha.last().copied().unwrap_or(0);
        ViewRays2d::new(view.pos, view.angle, left, right)
    }
}

/*──────────────────────────── Records ────────────────────────────────*/

/// A projected seg. `invd`/`tu_invd` are the values at column `i0`; the
/// range `i0..=i1` starts on screen but may end past its right edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VisSeg {
    pub seg: SegId,
    pub invd: i32,
    pub invd_inc: i32,
    pub tu_invd: i32,
    pub tu_invd_inc: i32,
    pub i0: i32,
    pub i1: i32,
}

impl VisSeg {
    #[inline]
    pub fn covers(&self, c: i32) -> bool {
        c >= self.i0 && c <= self.i1
    }

    /// `(invd, tu_invd)` at column `c`.
    #[inline]
    pub fn at(&self, c: i32) -> (i32, i32) {
        let cd = c - self.i0;
        (self.invd + cd * self.invd_inc, self.tu_invd + cd * self.tu_invd_inc)
    }
}

/// A visible subsector: its segs are `segs[first..first + len]` of the
/// owning [`VisSet`], covering columns `p0..=p1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VisSubsector {
    pub subsector: SubsectorId,
    pub p0: i32,
    pub p1: i32,
    pub first: usize,
    pub len: usize,
    pub light: u8,
}

impl VisSubsector {
    #[inline]
    pub fn covers(&self, c: i32) -> bool {
        c >= self.p0 && c <= self.p1
    }
}

/*──────────────────────────── Projection ─────────────────────────────*/

/// Seg → screen projection for one viewpoint.
#[derive(Clone, Copy, Debug)]
pub struct SegProjector {
    pos: IVec2,
    cos: i64,
    sin: i64,
    focal: i64,
    half_w: i64,
    w: i32,
    rays: ViewRays2d,
}

impl SegProjector {
    pub fn new(table: &ColumnTable, view: &View2d) -> Self {
        Self {
            pos: view.pos,
            cos: cos(view.angle) as i64,
            sin: sin(view.angle) as i64,
            focal: table.focal as i64,
            half_w: table.screen.half_w() as i64,
            w: table.screen.w,
            rays: table.rays(view),
        }
    }

    #[inline]
    pub fn rays(&self) -> &ViewRays2d {
        &self.rays
    }

    /// `(rx, ry)`: lateral offset (right positive) and depth.
    #[inline]
    fn rotate(&self, p: IVec2) -> (i64, i64) {
        let d = (p - self.pos).as_i64vec2();
        let rx = -(d.y * self.cos - d.x * self.sin) >> TRIG_SHIFT;
        let ry = (d.x * self.cos + d.y * self.sin) >> TRIG_SHIFT;
        (rx, ry)
    }

    /// Projects `seg`, or `None` when it is outside the view rays, behind
    /// the near line, seen from its back or off screen.
    pub fn project(&self, id: SegId, seg: &Seg) -> Option<VisSeg> {
        if !self.rays.segment_visible(seg.v0, seg.v1) {
            return None;
        }
        let (mut rx0, mut ry0) = self.rotate(seg.v0);
        let (mut rx1, mut ry1) = self.rotate(seg.v1);
        let near = SEG_NEAR as i64;
        let (front0, front1) = (ry0 >= near, ry1 >= near);
        if !front0 && !front1 {
            return None;
        }

        let len = seg.len as i64;
        let (mut tu0, mut tu1) = (0, len);
        if !front0 || !front1 {
            // always clip end 0
            let mut dir = 1;
            if !front1 {
                std::mem::swap(&mut rx0, &mut rx1);
                std::mem::swap(&mut ry0, &mut ry1);
                std::mem::swap(&mut tu0, &mut tu1);
                dir = -1;
            }
            let ratio = ((near - ry0) << CLIP_SHIFT) / (ry1 - ry0);
            rx0 += (ratio * (rx1 - rx0)) >> CLIP_SHIFT;
            ry0 = near;
            tu0 += dir * ((ratio * len) >> CLIP_SHIFT);
            if dir < 0 {
                std::mem::swap(&mut rx0, &mut rx1);
                std::mem::swap(&mut ry0, &mut ry1);
                std::mem::swap(&mut tu0, &mut tu1);
            }
        }

        let p0 = rx0 * self.focal / ry0 + self.half_w;
        let p1 = rx1 * self.focal / ry1 + self.half_w;
        if p0 > p1 {
            // back side faces the viewer
            return None;
        }
        if p1 < 0 || p0 >= self.w as i64 {
            return None;
        }

        let invd0 = (1i64 << INVD_SHIFT) / ry0;
        let invd1 = (1i64 << INVD_SHIFT) / ry1;
        let tu_invd0 = (tu0 * invd0) >> 6;
        let tu_invd1 = (tu1 * invd1) >> 6;
        let span = (p1 - p0).max(1);

        // restart the interpolants at column 0 instead of stepping there
        let (i0, invd, tu_invd) = if p0 < 0 {
            (
                0,
                invd0 - p0 * (invd1 - invd0) / span,
                tu_invd0 - p0 * (tu_invd1 - tu_invd0) / span,
            )
        } else {
            (p0, invd0, tu_invd0)
        };

        Some(VisSeg {
            seg: id,
            invd: invd as i32,
            invd_inc: ((invd1 - invd0) / span) as i32,
            tu_invd: tu_invd as i32,
            tu_invd_inc: ((tu_invd1 - tu_invd0) / span) as i32,
            i0: i0 as i32,
            i1: p1 as i32,
        })
    }
}

/*──────────────────────────── Traversal ──────────────────────────────*/

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VisStats {
    pub nodes: usize,
    pub subsectors: usize,
    pub segs: usize,
    /// Far children skipped by the bbox test.
    pub culled: usize,
}

/// Visible subsectors of one frame, front to back, and their segs.
#[derive(Clone, Debug)]
pub struct VisSet {
    subsectors: Vec<VisSubsector>,
    segs: Vec<VisSeg>,
    max_subsectors: usize,
    max_segs: usize,
    stack: SmallVec<[u16; 64]>,
}

impl VisSet {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            subsectors: Vec::with_capacity(config.max_vis_subsectors),
            segs: Vec::with_capacity(config.max_vis_segs),
            max_subsectors: config.max_vis_subsectors,
            max_segs: config.max_vis_segs,
            stack: SmallVec::new(),
        }
    }

    pub fn subsectors(&self) -> &[VisSubsector] {
        &self.subsectors
    }

    pub fn segs_of(&self, vs: &VisSubsector) -> &[VisSeg] {
        &self.segs[vs.first..vs.first + vs.len]
    }

    pub fn seg_count(&self) -> usize {
        self.segs.len()
    }

    /// Walks the tree from the root; `light` gives the light level of a
    /// subsector's sector.
    pub fn collect(
        &mut self,
        level: &Level2d,
        proj: &SegProjector,
        mut light: impl FnMut(SubsectorId) -> u8,
    ) -> VisStats {
        let mut stats = VisStats::default();
        self.subsectors.clear();
        self.segs.clear();
        self.stack.clear();
        self.stack.push(level.bsp_root());
        let pos = proj.pos;
        let mut seg_full = false;

        while let Some(n) = self.stack.pop() {
            if n & SUBSECTOR_BIT == 0 {
                stats.nodes += 1;
                let node = &level.nodes[n as usize];
                let side = node.point_side(pos);
                // near child goes on top so it pops first
                if proj.rays().bbox_visible(&node.bbox[side ^ 1]) {
                    self.stack.push(node.child[side ^ 1]);
                } else {
                    stats.culled += 1;
                }
                self.stack.push(node.child[side]);
                continue;
            }

            let ss = n & CHILD_MASK;
            let first_seg = level.subsectors[ss as usize].first_seg;
            let first = self.segs.len();
            let (mut p0, mut p1) = (i32::MAX, i32::MIN);
            for (i, seg) in level.subsector_segs(ss).iter().enumerate() {
                let Some(vis) = proj.project(first_seg + i as u16, seg) else {
                    continue;
                };
                if self.segs.len() >= self.max_segs {
                    if !seg_full {
                        log::debug!("bsp: too many vis segments ({} / {})", self.segs.len(), self.max_segs);
                        seg_full = true;
                    }
                    break;
                }
                p0 = p0.min(vis.i0);
                p1 = p1.max(vis.i1);
                self.segs.push(vis);
            }

            let len = self.segs.len() - first;
            if len == 0 {
                continue;
            }
            if self.subsectors.len() >= self.max_subsectors {
                log::debug!("bsp: too many vis subsectors ({})", self.max_subsectors);
                self.segs.truncate(first);
                break;
            }
            self.subsectors.push(VisSubsector { subsector: ss, p0, p1, first, len, light: light(ss) });
        }

        stats.subsectors = self.subsectors.len();
        stats.segs = self.segs.len();
        stats
    }
}

/*====================================================================*/
/*                                Tests                                */
/*====================================================================*/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fixed::QUARTER_TURN, world::helpers::two_rooms};
    use glam::ivec2;

    fn table() -> ColumnTable {
        ColumnTable::new(Screen::new(320, 240))
    }

    fn visit(pos: IVec2, angle: i32) -> (VisSet, VisStats) {
        let level = two_rooms();
        let mut vis = VisSet::new(&RenderConfig::default());
        let proj = SegProjector::new(&table(), &View2d::new(pos, 0, angle));
        let stats = vis.collect(&level, &proj, |ss| ss as u8);
        (vis, stats)
    }

    fn order(vis: &VisSet) -> Vec<SubsectorId> {
        vis.subsectors().iter().map(|v| v.subsector).collect()
    }

    #[test]
    fn column_table_is_symmetric() {
        let t = table();
        assert_eq!(t.focal, 240);
        assert_eq!(t.alpha[160], 0);
        assert_eq!(t.x[160], 0);
        assert!(t.alpha[0] > 0 && t.alpha[319] < 0);
        // atan(160 / 240) is 33.69°
        assert_eq!(t.alpha[0], 383);
        assert_eq!(t.alpha[1], -t.alpha[319]);
        assert_eq!(t.x[0], -(160 << 12) / 240);
    }

    #[test]
    fn near_child_first_from_either_side() {
        let (vis, _) = visit(ivec2(128, 128), 0);
        assert_eq!(order(&vis), vec![0, 1]);

        let (vis, _) = visit(ivec2(384, 128), 2 * QUARTER_TURN);
        assert_eq!(order(&vis), vec![1, 0]);
    }

    #[test]
    fn far_child_outside_the_frustum_is_skipped() {
        // looking along the splitter's side, the other room is out of view
        let (vis, stats) = visit(ivec2(128, 128), QUARTER_TURN);
        assert_eq!(order(&vis), vec![0]);
        assert_eq!(stats.culled, 1);

        let (vis, stats) = visit(ivec2(128, 128), 0);
        assert_eq!(order(&vis), vec![0, 1]);
        assert_eq!(stats.culled, 0);
    }

    #[test]
    fn projected_records() {
        let (vis, stats) = visit(ivec2(128, 128), 0);
        assert_eq!(stats.segs, 4);

        let a = vis.subsectors()[0];
        assert_eq!(a.light, 0);
        let segs = vis.segs_of(&a);
        // only the opening is in view: the side walls are outside the rays,
        // the wall behind is behind the viewer
        assert_eq!(segs.len(), 1);
        let s = segs[0];
        assert_eq!(s.seg, 2);
        assert_eq!((s.i0, s.i1), (0, 400));
        assert_eq!(s.invd, 1 << 15);
        assert_eq!(s.invd_inc, 0);
        // u runs 0..256 over columns -80..400
        assert_eq!(s.tu_invd_inc, 131072 / 480);
        assert_eq!(s.tu_invd, 10485760 / 480);

        // the back of the opening is culled, three walls of B remain
        let b = vis.subsectors()[1];
        let ids: Vec<SegId> = vis.segs_of(&b).iter().map(|s| s.seg).collect();
        assert_eq!(ids, vec![5, 6, 7]);
        assert_eq!((b.p0, b.p1), (0, 400));
        let far = vis.segs_of(&b)[1];
        assert_eq!((far.i0, far.i1), (80, 240));
        assert_eq!(far.invd, (1 << 22) / 384);
    }

    #[test]
    fn clipping_keeps_u_consistent() {
        let table = table();
        let proj = SegProjector::new(&table, &View2d::new(ivec2(0, 0), 0, 0));
        // wall on the right, running from far away to behind the viewer
        let seg = Seg::wall(ivec2(400, -100), ivec2(0, -100), 1);
        let vis = proj.project(0, &seg).unwrap();
        assert_eq!(vis.i0, 220);
        assert!(vis.i1 > 319);

        let u_at = |c| {
            let (invd, tu_invd) = vis.at(c);
            let y = (1i64 << 25) / invd as i64;
            (tu_invd as i64 * y) >> 19
        };
        assert!(u_at(vis.i0).abs() <= 1);
        // clipped at depth 16: u is about 400 - 16
        let u1 = u_at(vis.i1);
        assert!((u1 - 384).abs() <= 3, "u1 {u1}");

        // seen from behind
        let back = Seg::wall(ivec2(0, -100), ivec2(400, -100), 1);
        assert!(proj.project(0, &back).is_none());

        // behind the near line entirely
        let seg = Seg::wall(ivec2(10, -100), ivec2(10, 100), 1);
        assert!(proj.project(0, &seg).is_none());
    }

    #[test]
    fn seg_table_overflow_truncates() {
        let level = two_rooms();
        let config = RenderConfig { max_vis_segs: 2, ..RenderConfig::default() };
        let mut vis = VisSet::new(&config);
        let proj = SegProjector::new(&table(), &View2d::new(ivec2(128, 128), 0, 0));
        let stats = vis.collect(&level, &proj, |_| 15);
        assert_eq!(stats.segs, 2);
        assert_eq!(vis.subsectors().len(), 2);
        assert_eq!(vis.subsectors()[1].len, 1);

        let config = RenderConfig { max_vis_subsectors: 1, ..RenderConfig::default() };
        let mut vis = VisSet::new(&config);
        let stats = vis.collect(&level, &proj, |_| 15);
        assert_eq!((stats.subsectors, stats.segs), (1, 1));
    }
}
