//! ----------------------------------------------------------------------------
//! **Convex polygon column rasterizer**
//!
//! Produces one vertical span per screen column for a convex polygon whose
//! vertices are wound clockwise on a y-down screen. From the leftmost vertex
//! the *top* chain is found by walking forward through the ring and the
//! *bottom* chain by walking backward, so no per-edge orientation test is
//! needed.
//!
//! ```text
//!         1 .-------. 2
//!          /  +1 top \
//!       0 .           . 3
//!          \ -1 btm  /
//!         5 .-------. 4
//! ```
//! ----------------------------------------------------------------------------

use glam::IVec2;
use smallvec::SmallVec;

use crate::{
    engine::types::{ColumnSpan, Screen},
    fixed::{INV_DX, INV_DX_LEN, Q16_SHIFT},
};

/// Inline capacity of a rasterized polygon before spilling to the heap.
pub type Polygon2 = SmallVec<[IVec2; 20]>;

/*──────────────────────────── Edge stepper ────────────────────────────*/

/// One side of the polygon, stepped one column at a time.
///
/// `y` and `dydx` are Q16.16 held in 64 bits: projected rows of geometry
/// near the camera run far past the screen and are only clamped per column.
#[derive(Clone, Copy, Debug, Default)]
pub struct Edge {
    x: i32,
    x_end: i32,
    y: i64,
    dydx: i64,
}

impl Edge {
    /// Edge between two projected points; endpoints are ordered by x and the
    /// part left of column 0 is skipped.
    pub fn new(mut p0: IVec2, mut p1: IVec2) -> Self {
        if p1.x < p0.x {
            std::mem::swap(&mut p0, &mut p1);
        }
        let dx = p1.x as i64 - p0.x as i64;
        let dy = p1.y as i64 - p0.y as i64;
        let dydx = if (dx as usize) < INV_DX_LEN {
            dy * INV_DX[dx as usize] as i64
        } else {
            (dy << Q16_SHIFT) / dx
        };
        let mut e = Self {
            x: p0.x,
            x_end: p1.x,
            y: (p0.y as i64) << Q16_SHIFT,
            dydx,
        };
        if e.x < 0 {
            e.y -= e.x as i64 * e.dydx;
            e.x = 0;
        }
        e
    }

    #[inline(always)]
    pub fn done(&self) -> bool {
        self.x >= self.x_end
    }

    #[inline(always)]
    pub fn step(&mut self) {
        self.x += 1;
        self.y += self.dydx;
    }

    #[inline(always)]
    pub fn x(&self) -> i32 {
        self.x
    }

    /// Current row (integer part of `y`), saturated to the `i32` range.
    #[inline(always)]
    pub fn row(&self) -> i32 {
        (self.y >> Q16_SHIFT).clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }
}

/*──────────────────────────── Convex walker ───────────────────────────*/

/// Rasterization state of one convex polygon; yields a [`ColumnSpan`] for
/// every column in `[x, last_x]`.
#[derive(Clone, Debug)]
pub struct ConvexRaster {
    poly: Polygon2,
    x: i32,
    last_x: i32,
    max_x: i32,
    top: Edge,
    btm: Edge,
    /// Start vertex of the top edge (walks forward).
    vtop: usize,
    /// End vertex of the bottom edge (walks backward).
    vbtm: usize,
    /// Reseeds left before the chains would wrap around the ring.
    budget: usize,
    screen: Screen,
}

impl ConvexRaster {
    /// Starts rasterizing `poly`. `None` when there is nothing to draw: fewer
    /// than three vertices, a zero-width polygon, or an x-range entirely off
    /// screen.
    pub fn new(poly: &[IVec2], screen: Screen) -> Option<Self> {
        Self::from_polygon(poly.iter().copied().collect(), screen)
    }

    /// Same as [`ConvexRaster::new`] for a polygon given as indices into a
    /// shared vertex array.
    pub fn from_indices<I>(indices: &[I], pts: &[IVec2], screen: Screen) -> Option<Self>
    where
        I: Copy + Into<usize>,
    {
        let mut poly = Polygon2::new();
        for &i in indices {
            poly.push(*pts.get(i.into())?);
        }
        Self::from_polygon(poly, screen)
    }

    fn from_polygon(poly: Polygon2, screen: Screen) -> Option<Self> {
        let n = poly.len();
        if n < 3 {
            return None;
        }

        // leftmost = first occurrence of the minimum x
        let mut left = 0;
        let (mut min_x, mut max_x) = (poly[0].x, poly[0].x);
        for (i, p) in poly.iter().enumerate().skip(1) {
            if p.x < min_x {
                min_x = p.x;
                left = i;
            } else if p.x > max_x {
                max_x = p.x;
            }
        }
        if min_x == max_x || max_x < 0 || min_x > screen.last_col() {
            return None;
        }

        let vtop = left;
        let vbtm = left;
        let mut r = Self {
            top: Edge::new(poly[left], poly[next(left, n)]),
            btm: Edge::new(poly[prev(left, n)], poly[left]),
            poly,
            x: min_x.max(0),
            last_x: max_x.min(screen.last_col()),
            max_x,
            vtop,
            vbtm,
            budget: n,
            screen,
        };
        r.settle();
        Some(r)
    }

    /// First column still to be produced.
    #[inline(always)]
    pub fn x(&self) -> i32 {
        self.x
    }

    /// Last column the polygon covers on screen.
    #[inline(always)]
    pub fn last_x(&self) -> i32 {
        self.last_x
    }

    /// Number of columns left to produce.
    #[inline(always)]
    pub fn columns(&self) -> usize {
        (self.last_x - self.x + 1).max(0) as usize
    }

    /// Reseeds every edge that reached its end column, skipping zero-width
    /// edges. Edges ending on the rightmost column are kept so the final
    /// column reads the rightmost vertices.
    fn settle(&mut self) {
        let n = self.poly.len();
        while self.top.done() && self.top.x_end < self.max_x && self.budget > 0 {
            self.vtop = next(self.vtop, n);
            self.top = Edge::new(self.poly[self.vtop], self.poly[next(self.vtop, n)]);
            self.budget -= 1;
        }
        while self.btm.done() && self.btm.x_end < self.max_x && self.budget > 0 {
            self.vbtm = prev(self.vbtm, n);
            self.btm = Edge::new(self.poly[prev(self.vbtm, n)], self.poly[self.vbtm]);
            self.budget -= 1;
        }
    }
}

impl Iterator for ConvexRaster {
    type Item = ColumnSpan;

    fn next(&mut self) -> Option<ColumnSpan> {
        if self.x > self.last_x {
            return None;
        }
        let last_row = self.screen.last_row();
        let span = ColumnSpan {
            x: self.x,
            ys: self.top.row().clamp(0, last_row),
            ye: self.btm.row().clamp(0, last_row),
        };

        self.x += 1;
        self.top.step();
        self.btm.step();
        self.settle();
        Some(span)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.columns();
        (n, Some(n))
    }
}

impl ExactSizeIterator for ConvexRaster {}

#[inline(always)]
fn next(i: usize, n: usize) -> usize {
    if i + 1 == n { 0 } else { i + 1 }
}

#[inline(always)]
fn prev(i: usize, n: usize) -> usize {
    if i == 0 { n - 1 } else { i - 1 }
}

/*====================================================================*/
/*                                Tests                                */
/*====================================================================*/
#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, ivec2};

    fn screen() -> Screen {
        Screen::default()
    }

    /// Float reference: rows covered by the polygon at column centre `x`.
    fn reference_rows(poly: &[IVec2], x: f32) -> Option<(f32, f32)> {
        let n = poly.len();
        let (mut lo, mut hi) = (f32::MAX, f32::MIN);
        for i in 0..n {
            let a = poly[i].as_vec2();
            let b = poly[(i + 1) % n].as_vec2();
            let (a, b): (Vec2, Vec2) = if a.x <= b.x { (a, b) } else { (b, a) };
            if x < a.x || x > b.x {
                continue;
            }
            let y = if b.x == a.x {
                lo = lo.min(a.y.min(b.y));
                hi = hi.max(a.y.max(b.y));
                continue;
            } else {
                a.y + (b.y - a.y) * (x - a.x) / (b.x - a.x)
            };
            lo = lo.min(y);
            hi = hi.max(y);
        }
        (lo <= hi).then_some((lo, hi))
    }

    fn check_against_reference(poly: &[IVec2]) {
        let spans: Vec<_> = ConvexRaster::new(poly, screen()).unwrap().collect();
        let min_x = poly.iter().map(|p| p.x).min().unwrap();
        let max_x = poly.iter().map(|p| p.x).max().unwrap();
        assert_eq!(spans.len() as i32, max_x - min_x + 1);
        for s in &spans {
            let (lo, hi) = reference_rows(poly, s.x as f32).unwrap();
            assert!((s.ys as f32 - lo).abs() <= 2.0, "col {} ys {} ref {lo}", s.x, s.ys);
            assert!((s.ye as f32 - hi).abs() <= 2.0, "col {} ye {} ref {hi}", s.x, s.ye);
        }
    }

    #[test]
    fn triangle_matches_float_fill() {
        check_against_reference(&[ivec2(20, 100), ivec2(140, 30), ivec2(90, 200)]);
    }

    #[test]
    fn hexagon_matches_float_fill() {
        check_against_reference(&[
            ivec2(50, 120),
            ivec2(80, 60),
            ivec2(200, 50),
            ivec2(260, 130),
            ivec2(210, 210),
            ivec2(90, 200),
        ]);
    }

    #[test]
    fn rectangle_with_vertical_sides() {
        let quad = [ivec2(10, 20), ivec2(60, 20), ivec2(60, 90), ivec2(10, 90)];
        let spans: Vec<_> = ConvexRaster::new(&quad, screen()).unwrap().collect();
        assert_eq!(spans.first().unwrap().x, 10);
        assert_eq!(spans.last().unwrap().x, 60);
        for s in spans {
            assert_eq!(s.ys, 20, "col {}", s.x);
            assert!((s.ye - 90).abs() <= 1, "col {} ye {}", s.x, s.ye);
        }
    }

    #[test]
    fn wide_edges_use_division() {
        let tri = [ivec2(-400, 10), ivec2(700, 10), ivec2(150, 230)];
        let mut r = ConvexRaster::new(&tri, screen()).unwrap();
        assert_eq!(r.x(), 0);
        assert_eq!(r.last_x(), 319);
        assert_eq!(r.len(), 320);
        let mid = r.nth(150).unwrap();
        assert_eq!(mid.x, 150);
        assert_eq!(mid.ys, 10);
        assert!((mid.ye - 230).abs() <= 2);
    }

    #[test]
    fn rows_are_clamped_to_screen() {
        let tri = [ivec2(10, -50), ivec2(100, -50), ivec2(50, 400)];
        for s in ConvexRaster::new(&tri, screen()).unwrap() {
            assert!((0..240).contains(&s.ys));
            assert!((0..240).contains(&s.ye));
        }
    }

    #[test]
    fn off_screen_polygons_do_not_start() {
        let left = [ivec2(-90, 10), ivec2(-10, 10), ivec2(-50, 80)];
        let right = [ivec2(330, 10), ivec2(400, 10), ivec2(350, 80)];
        assert!(ConvexRaster::new(&left, screen()).is_none());
        assert!(ConvexRaster::new(&right, screen()).is_none());
    }

    #[test]
    fn degenerate_polygons_do_not_start() {
        let sliver = [ivec2(40, 10), ivec2(40, 50), ivec2(40, 90)];
        assert!(ConvexRaster::new(&sliver, screen()).is_none());
        assert!(ConvexRaster::new(&[ivec2(0, 0), ivec2(5, 5)], screen()).is_none());
    }

    #[test]
    fn indexed_polygon_matches_direct() {
        let pts = [ivec2(90, 200), ivec2(20, 100), ivec2(140, 30)];
        let direct: Vec<_> = ConvexRaster::new(&[pts[1], pts[2], pts[0]], screen())
            .unwrap()
            .collect();
        let indexed: Vec<_> = ConvexRaster::from_indices(&[1usize, 2, 0], &pts, screen())
            .unwrap()
            .collect();
        assert_eq!(direct, indexed);
        assert!(ConvexRaster::from_indices(&[0usize, 1, 9], &pts, screen()).is_none());
    }

    #[test]
    fn tall_edges_do_not_overflow() {
        // apex 40000 rows below the screen, one column right of the start
        let tall = [ivec2(100, 100), ivec2(150, 100), ivec2(101, 40100)];
        let spans: Vec<_> = ConvexRaster::new(&tall, screen()).unwrap().collect();
        assert_eq!(spans.len(), 51);
        assert_eq!((spans[0].ys, spans[0].ye), (100, 100));
        assert_eq!((spans[1].x, spans[1].ys, spans[1].ye), (101, 100, 239));
        for s in &spans {
            assert!((0..240).contains(&s.ys) && (0..240).contains(&s.ye), "{s:?}");
        }

        // long steep edge stepped over the whole screen width
        let steep = [ivec2(0, 100), ivec2(300, 100), ivec2(300, 40000)];
        let spans: Vec<_> = ConvexRaster::new(&steep, screen()).unwrap().collect();
        assert_eq!(spans.len(), 301);
        assert_eq!((spans[0].ys, spans[0].ye), (100, 100));
        assert_eq!(spans[150].ys, 100);
        assert_eq!(spans[150].ye, 239);
    }

    #[test]
    fn rows_past_the_q16_range_still_clamp() {
        let edge = Edge::new(ivec2(-10, -50_000), ivec2(200, 50_000));
        assert_eq!(edge.x(), 0);
        assert!(edge.row() < -40_000);
        let quad = [
            ivec2(-300, -50_000),
            ivec2(600, -50_000),
            ivec2(600, 50_000),
            ivec2(-300, 50_000),
        ];
        let spans: Vec<_> = ConvexRaster::new(&quad, screen()).unwrap().collect();
        assert_eq!(spans.len(), 320);
        assert!(spans.iter().all(|s| (s.ys, s.ye) == (0, 239)));
    }
}
