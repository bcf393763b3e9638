//! ----------------------------------------------------------------------------
//! **View frustum**
//!
//! * [`Frustum`] – five half-spaces (front + four sides, no far plane) built
//!   once in view space from unprojected screen corners, then carried into
//!   world space every frame. *Inside* means positive signed distance.
//! * [`ViewRays2d`] – the cheap 2D left/front/right ray tests used while
//!   walking a 2D BSP.
//! ----------------------------------------------------------------------------

use glam::{IVec2, IVec3};

use crate::{
    engine::{
        transform::{Project, Transform},
        types::Screen,
    },
    fixed::{cos, dot, dot_q8, normal_from_points, sin},
};

/*──────────────────────────── 3D planes ───────────────────────────────*/

/// Half-space `dot(p, n) >> 8 + d > 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Plane {
    pub n: IVec3,
    pub d: i32,
}

impl Plane {
    /// Plane through three points; the normal is `cross(p1-p0, p2-p0)`.
    pub fn from_points(p0: IVec3, p1: IVec3, p2: IVec3) -> Option<Self> {
        let n = normal_from_points(p0, p1, p2)?;
        Some(Self::through(p0, n))
    }

    /// Plane with normal `n` passing through `p`.
    #[inline]
    pub fn through(p: IVec3, n: IVec3) -> Self {
        Self {
            n,
            d: (-dot(p, n)) >> 8,
        }
    }

    #[inline(always)]
    pub fn distance(&self, p: IVec3) -> i32 {
        dot_q8(p, self.n) + self.d
    }
}

/// Axis-aligned box, inclusive bounds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Aabb {
    pub min: IVec3,
    pub max: IVec3,
}

impl Aabb {
    pub const fn new(min: IVec3, max: IVec3) -> Self {
        Self { min, max }
    }

    /// Corner picking `max` on every axis whose bit is set in `mask`
    /// (bit 0 = x, bit 1 = y, bit 2 = z).
    #[inline(always)]
    pub fn corner(&self, mask: usize) -> IVec3 {
        IVec3::new(
            if mask & 1 != 0 { self.max.x } else { self.min.x },
            if mask & 2 != 0 { self.max.y } else { self.min.y },
            if mask & 4 != 0 { self.max.z } else { self.min.z },
        )
    }

    pub fn contains(&self, p: IVec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Overlap {
    Outside,
    Intersect,
    Inside,
}

/// Octant of a normal, which is also the [`Aabb::corner`] mask of the box
/// corner furthest along it. The nearest corner is the complement.
#[inline(always)]
fn octant(n: IVec3) -> usize {
    (n.x > 0) as usize | ((n.y > 0) as usize) << 1 | ((n.z > 0) as usize) << 2
}

/// Plane order: front, left, right, and the two horizontal sides.
pub const FRUSTUM_PLANES: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frustum {
    pub planes: [Plane; FRUSTUM_PLANES],
    /// One point on every plane, kept so transforms can re-derive `d`.
    anchors: [IVec3; FRUSTUM_PLANES],
}

impl Frustum {
    /// View-space frustum from the screen corners unprojected at `z_clip`
    /// and `2 * z_clip`.
    ///
    /// ```text
    ///        far
    ///     3 +-----+ 2
    ///       |near |
    ///     0 +-----+ 1
    /// ```
    pub fn new(proj: &impl Project, screen: Screen, z_clip: i32) -> Option<Self> {
        let corners = [
            IVec2::new(0, 0),
            IVec2::new(screen.w, 0),
            IVec2::new(screen.w, screen.h),
            IVec2::new(0, screen.h),
        ];
        let near = corners.map(|c| proj.unproject(c, z_clip));
        let far = corners.map(|c| proj.unproject(c, z_clip << 1));

        let triples = [
            (near[0], near[1], near[2]),
            (near[0], near[3], far[0]),
            (near[1], far[1], near[2]),
            (near[3], near[2], far[3]),
            (near[0], far[0], near[1]),
        ];
        let mut planes = [Plane { n: IVec3::ZERO, d: 0 }; FRUSTUM_PLANES];
        let mut anchors = [IVec3::ZERO; FRUSTUM_PLANES];
        for (i, &(p0, p1, p2)) in triples.iter().enumerate() {
            planes[i] = Plane::from_points(p0, p1, p2)?;
            anchors[i] = p0;
        }
        Some(Self { planes, anchors })
    }

    /// Carries the frustum through `t`: normals are rotated, anchors get the
    /// full transform and `d` is re-derived from them.
    pub fn transform(&self, t: &impl Transform) -> Self {
        let mut out = *self;
        for ((plane, anchor), (src, src_anchor)) in out
            .planes
            .iter_mut()
            .zip(out.anchors.iter_mut())
            .zip(self.planes.iter().zip(self.anchors.iter()))
        {
            *anchor = t.point(*src_anchor);
            *plane = Plane::through(*anchor, t.direction(src.n));
        }
        out
    }

    /// Classifies `b` against every plane, short-circuiting on the first
    /// plane that rejects it entirely.
    pub fn classify(&self, b: &Aabb) -> Overlap {
        let mut result = Overlap::Inside;
        for plane in &self.planes {
            let mask = octant(plane.n);
            if plane.distance(b.corner(mask)) < 0 {
                return Overlap::Outside;
            }
            if plane.distance(b.corner(!mask & 7)) < 0 {
                result = Overlap::Intersect;
            }
        }
        result
    }

    #[inline]
    pub fn is_visible(&self, b: &Aabb) -> bool {
        self.classify(b) != Overlap::Outside
    }
}

/*──────────────────────────── 2D rays ─────────────────────────────────*/

/// 2D bounding box of a BSP child, inclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Bbox2 {
    pub lo: IVec2,
    pub hi: IVec2,
}

impl Bbox2 {
    pub const fn new(lo: IVec2, hi: IVec2) -> Self {
        Self { lo, hi }
    }

    pub fn corners(&self) -> [IVec2; 4] {
        [
            self.lo,
            IVec2::new(self.hi.x, self.lo.y),
            self.hi,
            IVec2::new(self.lo.x, self.hi.y),
        ]
    }

    pub fn contains(&self, p: IVec2) -> bool {
        p.cmpge(self.lo).all() && p.cmple(self.hi).all()
    }
}

/// `d` lies clockwise of `ray` (Q12 direction).
#[inline(always)]
pub fn side(ray: IVec2, d: IVec2) -> bool {
    d.x * ray.y > d.y * ray.x
}

/// `d` lies strictly ahead of `ray`.
#[inline(always)]
pub fn infront(ray: IVec2, d: IVec2) -> bool {
    d.x * ray.x + d.y * ray.y > 0
}

/// Q12 unit direction of a 4096-per-turn angle.
#[inline]
pub fn ray(angle: i32) -> IVec2 {
    IVec2::new(cos(angle), sin(angle))
}

/// Viewpoint and its left, front and right boundary rays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewRays2d {
    pub pos: IVec2,
    pub left: IVec2,
    pub front: IVec2,
    pub right: IVec2,
}

impl ViewRays2d {
    /// `left_alpha`/`right_alpha` are the angular offsets of the first and
    /// last screen column from the view direction.
    pub fn new(pos: IVec2, angle: i32, left_alpha: i32, right_alpha: i32) -> Self {
        Self {
            pos,
            left: ray(angle + left_alpha),
            front: ray(angle),
            right: ray(angle + right_alpha),
        }
    }

    /// A segment is dropped when both ends are behind the viewer, both are
    /// left of the left ray, or both are right of the right ray.
    pub fn segment_visible(&self, p0: IVec2, p1: IVec2) -> bool {
        let (d0, d1) = (p0 - self.pos, p1 - self.pos);
        let (sl0, sl1) = (side(self.left, d0), side(self.left, d1));
        let (sr0, sr1) = (side(self.right, d0), side(self.right, d1));
        let (fr0, fr1) = (infront(self.front, d0), infront(self.front, d1));
        !((!fr0 && !fr1) || (!sl0 && !sl1) || (sr0 && sr1))
    }

    /// Same test for the four corners of a box.
    pub fn bbox_visible(&self, b: &Bbox2) -> bool {
        let d = b.corners().map(|c| c - self.pos);
        if d.iter().all(|&d| !side(self.left, d)) {
            return false;
        }
        if d.iter().all(|&d| side(self.right, d)) {
            return false;
        }
        d.iter().any(|&d| infront(self.front, d))
    }
}

/*====================================================================*/
/*                                Tests                                */
/*====================================================================*/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::transform::{Identity, Perspective, Translate};
    use glam::{ivec2, ivec3};

    const Z_CLIP: i32 = 64;

    fn view_frustum() -> Frustum {
        let screen = Screen::default();
        Frustum::new(&Perspective::new(screen), screen, Z_CLIP).unwrap()
    }

    #[test]
    fn planes_face_inward() {
        let f = view_frustum();
        let centre = ivec3(0, 0, 200);
        for (i, p) in f.planes.iter().enumerate() {
            assert!(p.distance(centre) > 0, "plane {i}: {p:?}");
        }
        // front plane sits on z_clip
        assert_eq!(f.planes[0].n, ivec3(0, 0, 256));
        assert_eq!(f.planes[0].d, -Z_CLIP);
    }

    #[test]
    fn box_around_near_rectangle_is_not_outside() {
        let f = view_frustum();
        let b = Aabb::new(ivec3(-100, -100, 0), ivec3(100, 100, 200));
        assert_ne!(f.classify(&b), Overlap::Outside);
    }

    #[test]
    fn box_behind_viewer_is_outside() {
        let f = view_frustum();
        let b = Aabb::new(ivec3(-100, -100, -2000), ivec3(100, 100, -1000));
        assert_eq!(f.classify(&b), Overlap::Outside);
    }

    #[test]
    fn small_box_ahead_is_inside() {
        let f = view_frustum();
        let b = Aabb::new(ivec3(-5, -5, 300), ivec3(5, 5, 320));
        assert_eq!(f.classify(&b), Overlap::Inside);
    }

    #[test]
    fn box_across_left_plane_intersects() {
        let f = view_frustum();
        let b = Aabb::new(ivec3(-400, -5, 300), ivec3(0, 5, 320));
        assert_eq!(f.classify(&b), Overlap::Intersect);
    }

    #[test]
    fn box_far_to_the_side_is_outside() {
        let f = view_frustum();
        let b = Aabb::new(ivec3(2000, -5, 300), ivec3(2100, 5, 320));
        assert_eq!(f.classify(&b), Overlap::Outside);
    }

    #[test]
    fn identity_transform_keeps_planes() {
        let f = view_frustum();
        assert_eq!(f.transform(&Identity), f);
    }

    #[test]
    fn translated_frustum_follows_viewer() {
        // viewer at z = -1000 in world space
        let world = view_frustum().transform(&Translate(ivec3(0, 0, -1000)));
        let ahead = Aabb::new(ivec3(-5, -5, -800), ivec3(5, 5, -780));
        let behind = Aabb::new(ivec3(-5, -5, -1200), ivec3(5, 5, -1100));
        assert_eq!(world.classify(&ahead), Overlap::Inside);
        assert_eq!(world.classify(&behind), Overlap::Outside);
    }

    /// Looking along +x with a 90° field of view.
    fn rays() -> ViewRays2d {
        ViewRays2d::new(ivec2(0, 0), 0, 512, -512)
    }

    #[test]
    fn side_and_infront() {
        let r = rays();
        assert!(infront(r.front, ivec2(10, 0)));
        assert!(!infront(r.front, ivec2(-10, 0)));
        // right of the left ray, left of the right ray
        assert!(side(r.left, ivec2(100, 0)));
        assert!(!side(r.right, ivec2(100, 0)));
    }

    #[test]
    fn segment_tests() {
        let r = rays();
        assert!(r.segment_visible(ivec2(100, -20), ivec2(100, 20)));
        // behind
        assert!(!r.segment_visible(ivec2(-100, -20), ivec2(-100, 20)));
        // entirely left of the left ray
        assert!(!r.segment_visible(ivec2(10, 100), ivec2(50, 200)));
        // entirely right of the right ray
        assert!(!r.segment_visible(ivec2(10, -100), ivec2(50, -200)));
        // crossing the whole view
        assert!(r.segment_visible(ivec2(50, 500), ivec2(50, -500)));
    }

    #[test]
    fn bbox_tests() {
        let r = rays();
        assert!(r.bbox_visible(&Bbox2::new(ivec2(50, -10), ivec2(80, 10))));
        assert!(!r.bbox_visible(&Bbox2::new(ivec2(-300, -10), ivec2(-200, 10))));
        assert!(!r.bbox_visible(&Bbox2::new(ivec2(10, 200), ivec2(50, 300))));
        assert!(!r.bbox_visible(&Bbox2::new(ivec2(10, -300), ivec2(50, -200))));
        // viewer inside the box
        assert!(r.bbox_visible(&Bbox2::new(ivec2(-10, -10), ivec2(10, 10))));
    }
}
