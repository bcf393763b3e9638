//! Near-plane clipping of view-space polygons.

use glam::IVec3;
use smallvec::SmallVec;

use crate::fixed::{Q16_SHIFT, ratio_q16};

/// Inline capacity of a clipped polygon.
pub type Polygon3 = SmallVec<[IVec3; 20]>;

/// Keeps the part of `poly` with `z >= z_clip`.
///
/// The ring is walked from the last vertex so the wrap-around edge is tested
/// once like every other edge. Crossing points land exactly on `z_clip`.
/// A convex input yields at most `N + 2` vertices; anything beyond
/// `max_vertices` is dropped. Fewer than three output vertices means there is
/// nothing left to rasterize.
pub fn clip_polygon(z_clip: i32, poly: &[IVec3], max_vertices: usize) -> Polygon3 {
    let mut out = Polygon3::new();
    let Some(&last) = poly.last() else {
        return out;
    };

    let mut truncated = false;
    let mut push = |out: &mut Polygon3, p: IVec3| {
        if out.len() < max_vertices {
            out.push(p);
        } else {
            truncated = true;
        }
    };

    let mut prev = last;
    let mut prev_in = prev.z >= z_clip;
    for &cur in poly {
        let cur_in = cur.z >= z_clip;
        if cur_in != prev_in {
            push(&mut out, crossing(z_clip, prev, cur));
        }
        if cur_in {
            push(&mut out, cur);
        }
        prev = cur;
        prev_in = cur_in;
    }

    if truncated {
        log::debug!(
            "clip: polygon of {} vertices exceeds {max_vertices} after clipping",
            poly.len()
        );
    }
    out
}

/// Intersection of segment `a → b` with the plane `z == z_clip`.
///
/// The Q16.16 ratio `(z_clip - a.z) / (b.z - a.z)` goes through the
/// reciprocal table for small depth deltas.
fn crossing(z_clip: i32, a: IVec3, b: IVec3) -> IVec3 {
    let t = ratio_q16(z_clip - a.z, b.z - a.z) as i64;
    let lerp = |from: i32, to: i32| from + (((to - from) as i64 * t) >> Q16_SHIFT) as i32;
    IVec3::new(lerp(a.x, b.x), lerp(a.y, b.y), z_clip)
}
