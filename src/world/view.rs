use glam::{I64Vec3, IVec2, IVec3};

use crate::{
    engine::transform::Transform,
    fixed::{ANGLE_MASK, TRIG_SHIFT, cos, sin},
};

/// Viewpoint of the 3D engines.
///
/// * `yaw` turns around Y, `pitch` around X, both in 4096ths of a turn.
/// * World → view is *translate by `-pos`, yaw, then pitch*; the inverse
///   undoes pitch, then yaw, then adds `pos` back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct View {
    pub pos: IVec3,
    pub yaw: i32,
    pub pitch: i32,
}

impl View {
    pub const fn new(pos: IVec3, yaw: i32, pitch: i32) -> Self {
        Self { pos, yaw, pitch }
    }

    /// View → world.
    #[inline]
    pub fn inverse(&self) -> InverseView {
        InverseView(*self)
    }

    pub fn turn(&mut self, delta: i32) {
        self.yaw = (self.yaw + delta) & ANGLE_MASK;
    }
}

/// `x' = cos·x − sin·z`, `z' = sin·x + cos·z` (Q12).
#[inline(always)]
fn rot_y(angle: i32, p: IVec3) -> IVec3 {
    let (s, c) = (sin(angle) as i64, cos(angle) as i64);
    let q = p.as_i64vec3();
    IVec3::new(
        ((c * q.x - s * q.z) >> TRIG_SHIFT) as i32,
        p.y,
        ((s * q.x + c * q.z) >> TRIG_SHIFT) as i32,
    )
}

/// `y' = cos·y − sin·z`, `z' = sin·y + cos·z` (Q12).
#[inline(always)]
fn rot_x(angle: i32, p: IVec3) -> IVec3 {
    let (s, c) = (sin(angle) as i64, cos(angle) as i64);
    let q: I64Vec3 = p.as_i64vec3();
    IVec3::new(
        p.x,
        ((c * q.y - s * q.z) >> TRIG_SHIFT) as i32,
        ((s * q.y + c * q.z) >> TRIG_SHIFT) as i32,
    )
}

impl Transform for View {
    #[inline]
    fn point(&self, p: IVec3) -> IVec3 {
        self.direction(p - self.pos)
    }

    #[inline]
    fn direction(&self, d: IVec3) -> IVec3 {
        rot_x(self.pitch, rot_y(self.yaw, d))
    }
}

/// Inverse of a [`View`]; carries frustum planes into world space.
#[derive(Clone, Copy, Debug)]
pub struct InverseView(View);

impl Transform for InverseView {
    #[inline]
    fn point(&self, p: IVec3) -> IVec3 {
        self.direction(p) + self.0.pos
    }

    #[inline]
    fn direction(&self, d: IVec3) -> IVec3 {
        rot_y(-self.0.yaw, rot_x(-self.0.pitch, d))
    }
}

/// Viewpoint of the 2D BSP engine: map position, eye altitude and heading
/// (4096ths of a turn, counter-clockwise from +X).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct View2d {
    pub pos: IVec2,
    pub z: i32,
    pub angle: i32,
}

impl View2d {
    pub const fn new(pos: IVec2, z: i32, angle: i32) -> Self {
        Self { pos, z, angle }
    }

    /// Moves `dist` map units along the heading.
    pub fn step(&mut self, dist: i32) {
        self.pos.x += (dist * cos(self.angle)) >> TRIG_SHIFT;
        self.pos.y += (dist * sin(self.angle)) >> TRIG_SHIFT;
    }

    pub fn turn(&mut self, delta: i32) {
        self.angle = (self.angle + delta) & ANGLE_MASK;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::QUARTER_TURN;
    use glam::ivec3;

    #[test]
    fn quarter_turns_are_exact() {
        let v = View::new(IVec3::ZERO, QUARTER_TURN, 0);
        assert_eq!(v.point(ivec3(100, 7, 0)), ivec3(0, 7, 100));
        let v = View::new(IVec3::ZERO, 0, QUARTER_TURN);
        assert_eq!(v.point(ivec3(3, 100, 0)), ivec3(3, 0, 100));
    }

    #[test]
    fn directions_ignore_position() {
        let v = View::new(ivec3(500, -20, 9), 300, 100);
        let d = ivec3(0, 0, 256);
        assert_eq!(v.direction(d), View::new(IVec3::ZERO, 300, 100).direction(d));
        assert_eq!(v.point(v.pos), IVec3::ZERO);
    }

    #[test]
    fn inverse_round_trip() {
        for (yaw, pitch) in [(0, 0), (300, 0), (1500, -200), (4000, 90)] {
            let v = View::new(ivec3(120, -40, 900), yaw, pitch);
            for p in [ivec3(0, 0, 0), ivec3(1000, 200, -300), ivec3(-64, 64, 2000)] {
                let back = v.inverse().point(v.point(p));
                let err = (back - p).abs().max_element();
                assert!(err <= 2, "yaw {yaw} pitch {pitch}: {p} -> {back}");
            }
        }
    }

    #[test]
    fn view2d_moves_along_heading() {
        let mut v = View2d::new(IVec2::new(10, 10), 0, 0);
        v.step(100);
        assert_eq!(v.pos, IVec2::new(110, 10));
        v.turn(QUARTER_TURN);
        v.step(50);
        assert_eq!(v.pos, IVec2::new(110, 60));
        v.turn(-2 * QUARTER_TURN - 4096);
        assert_eq!(v.angle, 4096 - QUARTER_TURN);
    }
}
