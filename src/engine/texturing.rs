//! ----------------------------------------------------------------------------
//! **Planar texture setup**
//!
//! The GPU performs the per-pixel perspective divide itself; software only
//! provides, per face, a plane distance and UV anchors ([`Texturing`]) and, per
//! span, three dot products of the view ray against the plane frame
//! ([`SpanCoeffs`]).
//!
//! * [`Surface`] – Q8 orthonormal frame `n,u,v` built once from a triangle.
//! * [`TransformedSurface`] – the same frame rotated into view space, once per
//!   frame.
//! * `ded > 0` marks a front-facing plane; anything else is culled.
//! ----------------------------------------------------------------------------

use glam::IVec3;

use crate::{
    engine::{transform::Transform, types::Screen},
    fixed::{Q8_ONE, cross_q8, dot, dot_q8, normal_from_points, normalize_q8},
};

/// Depth component of the per-span view ray.
pub const RAY_Z: i32 = 256;

const AXIS_X: IVec3 = IVec3::new(Q8_ONE, 0, 0);
const AXIS_Y: IVec3 = IVec3::new(0, Q8_ONE, 0);

/// Texturing frame of a plane (world space, Q8 unit vectors).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Surface {
    pub n: IVec3,
    pub u: IVec3,
    pub v: IVec3,
}

impl Surface {
    /// `n = |cross(p1-p0, p2-p0)|`, `u = |cross(n, X)|`, `v = |cross(n, u)|`.
    ///
    /// Planes perpendicular to X take `u` from the Y axis instead. `None` for
    /// collinear points.
    pub fn from_triangle(p0: IVec3, p1: IVec3, p2: IVec3) -> Option<Self> {
        let n = normal_from_points(p0, p1, p2)?;
        let u = normalize_q8(cross_q8(n, AXIS_X)).or_else(|| {
            log::trace!("surface: normal {n} parallel to X, using Y for u");
            normalize_q8(cross_q8(n, AXIS_Y))
        })?;
        let v = normalize_q8(cross_q8(n, u))?;
        Some(Self { n, u, v })
    }

    /// Rotates the frame into view space (no translation).
    pub fn transform(&self, t: &impl Transform) -> TransformedSurface {
        TransformedSurface {
            n: t.direction(self.n),
            u: t.direction(self.u),
            v: t.direction(self.v),
        }
    }
}

/// A [`Surface`] in view space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransformedSurface {
    pub n: IVec3,
    pub u: IVec3,
    pub v: IVec3,
}

/// Per-face plane distance and texture anchors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Texturing {
    pub ded: i32,
    pub u_offs: i32,
    pub v_offs: i32,
}

impl Texturing {
    #[inline(always)]
    pub fn is_front_facing(&self) -> bool {
        self.ded > 0
    }
}

/// Light-map anchors of a face.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LightmapOffsets {
    pub u_offs: i32,
    pub v_offs: i32,
}

/// Texture-space placement of a face sampled with a light map.
#[derive(Clone, Copy, Debug, Default)]
pub struct LightmapPlacement {
    /// Texture distance terms along `u`/`v`.
    pub d_u: i32,
    pub d_v: i32,
    /// Light-map position inside the light-map atlas.
    pub l_u: i32,
    pub l_v: i32,
    /// Point the light map is anchored on.
    pub l_ref: IVec3,
}

impl LightmapPlacement {
    /// Unpacks the 8:8 atlas position of a face (`(uv & 255) << 6`, `(uv >> 8) << 6`).
    pub fn from_packed_uv(uv: u16, d_u: i32, d_v: i32, l_ref: IVec3) -> Self {
        Self {
            d_u,
            d_v,
            l_u: ((uv & 255) as i32) << 6,
            l_v: ((uv >> 8) as i32) << 6,
            l_ref,
        }
    }
}

/// Dot products of one span's view ray against `n,u,v`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpanCoeffs {
    pub dr: i32,
    pub du: i32,
    pub dv: i32,
}

impl TransformedSurface {
    /// Texturing anchored on `reference`, a world-space point of the face.
    ///
    /// Offsets are `dot >> 10` and flip sign for front faces.
    pub fn texturing(&self, t: &impl Transform, reference: IVec3) -> Texturing {
        let p = t.point(reference);
        let mut tex = Texturing {
            ded: dot_q8(p, self.n),
            u_offs: dot(p, self.u) >> 10,
            v_offs: dot(p, self.v) >> 10,
        };
        if tex.ded > 0 {
            tex.u_offs = -tex.u_offs;
            tex.v_offs = -tex.v_offs;
        }
        tex
    }

    /// Texturing for faces whose texture axes are anchored on the world
    /// origin, plus the matching light-map anchors.
    ///
    /// `reference` is any point of the face and only decides `ded`.
    pub fn texturing_with_lightmap(
        &self,
        t: &impl Transform,
        reference: IVec3,
        place: &LightmapPlacement,
    ) -> (Texturing, LightmapOffsets) {
        let origin = t.point(IVec3::ZERO);
        let p = t.point(reference);
        let l = t.point(place.l_ref);

        let mut tex = Texturing {
            ded: dot_q8(p, self.n),
            u_offs: dot(origin, self.u),
            v_offs: dot(origin, self.v),
        };
        let mut lmap = LightmapOffsets {
            u_offs: dot(l, self.u),
            v_offs: dot(l, self.v),
        };
        if tex.ded > 0 {
            tex.u_offs = -tex.u_offs;
            tex.v_offs = -tex.v_offs;
            lmap.u_offs = -lmap.u_offs;
            lmap.v_offs = -lmap.v_offs;
        }
        tex.u_offs += place.d_u << 8;
        tex.v_offs += place.d_v << 8;
        lmap.u_offs += place.l_u << 8;
        lmap.v_offs += place.l_v << 8;
        (tex, lmap)
    }

    /// Span-constant coefficients for the view ray `(rx, ry, rz)`.
    #[inline]
    pub fn setup_span(&self, rx: i32, ry: i32, rz: i32) -> SpanCoeffs {
        let r = IVec3::new(rx, ry, rz);
        SpanCoeffs {
            dr: dot_q8(r, self.n),
            du: dot_q8(r, self.u),
            dv: dot_q8(r, self.v),
        }
    }

    /// [`setup_span`](Self::setup_span) for the ray through the top pixel of
    /// a span starting at row `ys` in column `x`.
    #[inline]
    pub fn setup_column_span(&self, screen: &Screen, x: i32, ys: i32) -> SpanCoeffs {
        self.setup_span(x - screen.half_w(), ys - screen.half_h(), RAY_Z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::transform::{Identity, Translate};
    use glam::ivec3;

    /// Clockwise on a y-down screen, facing the viewer at depth 100.
    fn facing_quad() -> [IVec3; 4] {
        [
            ivec3(-50, -50, 100),
            ivec3(50, -50, 100),
            ivec3(50, 50, 100),
            ivec3(-50, 50, 100),
        ]
    }

    #[test]
    fn frame_is_orthonormal() {
        let q = facing_quad();
        let s = Surface::from_triangle(q[0], q[1], q[2]).unwrap();
        assert_eq!(s.n, ivec3(0, 0, 256));
        assert_eq!(s.u, ivec3(0, 256, 0));
        assert_eq!(s.v, ivec3(-256, 0, 0));
        assert_eq!(dot(s.n, s.u), 0);
        assert_eq!(dot(s.n, s.v), 0);
        assert_eq!(dot(s.u, s.v), 0);
    }

    #[test]
    fn plane_perpendicular_to_x_falls_back_to_y() {
        let s = Surface::from_triangle(ivec3(0, 0, 0), ivec3(0, 100, 0), ivec3(0, 0, 100))
            .unwrap();
        assert_eq!(s.n, ivec3(256, 0, 0));
        assert_eq!(s.u, ivec3(0, 0, 256));
        assert_eq!(s.v, ivec3(0, -256, 0));
    }

    #[test]
    fn collinear_points_have_no_surface() {
        assert!(Surface::from_triangle(ivec3(0, 0, 0), ivec3(1, 1, 1), ivec3(2, 2, 2)).is_none());
    }

    #[test]
    fn facing_quad_is_front_facing() {
        let q = facing_quad();
        let s = Surface::from_triangle(q[0], q[1], q[2]).unwrap().transform(&Identity);
        let tex = s.texturing(&Identity, q[0]);
        assert_eq!(tex.ded, 100);
        assert!(tex.is_front_facing());
        // dot >> 10, negated for a front face
        assert_eq!(tex.u_offs, 13);
        assert_eq!(tex.v_offs, -12);
    }

    #[test]
    fn reversed_winding_is_culled() {
        let q = facing_quad();
        let s = Surface::from_triangle(q[0], q[2], q[1]).unwrap().transform(&Identity);
        let tex = s.texturing(&Identity, q[0]);
        assert_eq!(tex.ded, -100);
        assert!(!tex.is_front_facing());
    }

    #[test]
    fn ded_tracks_translation() {
        let q = facing_quad();
        let s = Surface::from_triangle(q[0], q[1], q[2]).unwrap().transform(&Identity);
        let far = s.texturing(&Translate(ivec3(0, 0, 300)), q[0]);
        assert_eq!(far.ded, 400);
    }

    #[test]
    fn lightmap_anchors() {
        let q = facing_quad();
        let s = Surface::from_triangle(q[0], q[1], q[2]).unwrap().transform(&Identity);
        let place = LightmapPlacement::from_packed_uv(0x0201, 3, -2, q[0]);
        assert_eq!((place.l_u, place.l_v), (64, 128));

        let (tex, lmap) = s.texturing_with_lightmap(&Identity, q[0], &place);
        assert!(tex.is_front_facing());
        // origin anchors are zero under the identity
        assert_eq!(tex.u_offs, 3 << 8);
        assert_eq!(tex.v_offs, -2 << 8);
        // dot(q0, u) = -12800, negated, plus 64 << 8
        assert_eq!(lmap.u_offs, 12800 + (64 << 8));
        assert_eq!(lmap.v_offs, -12800 + (128 << 8));
    }

    #[test]
    fn span_coefficients() {
        let q = facing_quad();
        let s = Surface::from_triangle(q[0], q[1], q[2]).unwrap().transform(&Identity);
        let c = s.setup_span(10, -20, RAY_Z);
        assert_eq!(c, SpanCoeffs { dr: 256, du: -20, dv: -10 });

        let screen = Screen::default();
        let c = s.setup_column_span(&screen, 170, 100);
        assert_eq!(c, s.setup_span(10, -20, RAY_Z));
    }
}
