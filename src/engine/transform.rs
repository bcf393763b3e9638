//! Transform and projection capabilities.
//!
//! The rasterizer, texturing and frustum code never hard-code a camera; they
//! take one of these so tests can drive them with trivial transforms.

use glam::{IVec2, IVec3};

use crate::engine::types::Screen;

/// Maps world space into view space (or back, for an inverse transform).
pub trait Transform {
    /// Rotation + translation.
    fn point(&self, p: IVec3) -> IVec3;
    /// Rotation only.
    fn direction(&self, d: IVec3) -> IVec3;
}

/// Perspective divide and its inverse at a known depth.
pub trait Project {
    fn project(&self, p: IVec3) -> IVec2;
    fn unproject(&self, p: IVec2, z: i32) -> IVec3;
}

/// Identity transform; geometry already lives in view space.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl Transform for Identity {
    #[inline(always)]
    fn point(&self, p: IVec3) -> IVec3 {
        p
    }

    #[inline(always)]
    fn direction(&self, d: IVec3) -> IVec3 {
        d
    }
}

/// Pure translation, useful for placing an object in front of the viewer.
#[derive(Clone, Copy, Debug, Default)]
pub struct Translate(pub IVec3);

impl Transform for Translate {
    #[inline(always)]
    fn point(&self, p: IVec3) -> IVec3 {
        p + self.0
    }

    #[inline(always)]
    fn direction(&self, d: IVec3) -> IVec3 {
        d
    }
}

/// Focal length 256: `x' = x * 256 / z + w/2`.
#[derive(Clone, Copy, Debug)]
pub struct Perspective {
    pub screen: Screen,
}

impl Perspective {
    pub const fn new(screen: Screen) -> Self {
        Self { screen }
    }

    /// Q16 inverse depth; `z == 0` saturates instead of trapping.
    #[inline(always)]
    pub fn inv_z(z: i32) -> i64 {
        if z != 0 { (1i64 << 16) / z as i64 } else { 1 << 16 }
    }
}

impl Project for Perspective {
    #[inline]
    fn project(&self, p: IVec3) -> IVec2 {
        let inv_z = Self::inv_z(p.z);
        IVec2::new(
            ((p.x as i64 * inv_z) >> 8) as i32 + self.screen.half_w(),
            ((p.y as i64 * inv_z) >> 8) as i32 + self.screen.half_h(),
        )
    }

    #[inline]
    fn unproject(&self, p: IVec2, z: i32) -> IVec3 {
        let x = ((((p.x - self.screen.half_w()) as i64) << 8) * z as i64) >> 16;
        let y = ((((p.y - self.screen.half_h()) as i64) << 8) * z as i64) >> 16;
        IVec3::new(x as i32, y as i32, z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_unproject_round_trip() {
        let persp = Perspective::new(Screen::default());
        for z in [64, 128, 256, 512, 1024] {
            for (x, y) in [(0, 0), (37, -21), (-100, 90), (250, -250)] {
                let p = IVec3::new(x, y, z);
                let s = persp.project(p);
                let back = persp.unproject(s, z);
                let tol = z / 256 + 1;
                assert_eq!(back.z, z);
                assert!((back.x - x).abs() <= tol, "x {x} z {z} -> {}", back.x);
                assert!((back.y - y).abs() <= tol, "y {y} z {z} -> {}", back.y);
            }
        }
    }

    #[test]
    fn zero_depth_does_not_trap() {
        let persp = Perspective::new(Screen::default());
        let s = persp.project(IVec3::new(1, -1, 0));
        assert_eq!(s, IVec2::new(160 + 256, 120 - 256));
    }
}
