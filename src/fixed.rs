//! Fixed-point kernel.
//!
//! Every numeric format in the pipeline is a plain `i32` with an implied
//! binary point:
//!
//! * **Q8** – unit vectors and plane normals, `256 == 1.0`.
//! * **Q12** – the sine table, `4096 == 1.0`; angles use 4096 units per turn.
//! * **Q16.16** – edge steppers and clip ratios.
//!
//! Shifts are part of the hardware contract, so the helpers here never round
//! differently from a plain arithmetic shift.

use glam::IVec3;
use once_cell::sync::Lazy;

/// Fraction bits of a unit vector.
pub const Q8_SHIFT: u32 = 8;
pub const Q8_ONE: i32 = 1 << Q8_SHIFT;

/// Fraction bits of the sine table.
pub const TRIG_SHIFT: u32 = 12;
pub const TRIG_ONE: i32 = 1 << TRIG_SHIFT;

/// Angle units per full turn.
pub const ANGLE_STEPS: i32 = 4096;
pub const ANGLE_MASK: i32 = ANGLE_STEPS - 1;
pub const QUARTER_TURN: i32 = ANGLE_STEPS / 4;

/// Fraction bits of edge steppers and clip ratios.
pub const Q16_SHIFT: u32 = 16;

/// Entries of the reciprocal table; wider deltas fall back to a division.
pub const INV_DX_LEN: usize = 320;

/// `INV_DX[x] == 65535 / x`, `INV_DX[0] == 0`.
pub static INV_DX: Lazy<[u16; INV_DX_LEN]> = Lazy::new(|| {
    let mut table = [0u16; INV_DX_LEN];
    for (x, slot) in table.iter_mut().enumerate().skip(1) {
        *slot = (65535 / x) as u16;
    }
    table
});

/// Q12 sine over one turn of [`ANGLE_STEPS`].
pub static SINE: Lazy<[i32; ANGLE_STEPS as usize]> = Lazy::new(|| {
    let mut table = [0i32; ANGLE_STEPS as usize];
    for (a, slot) in table.iter_mut().enumerate() {
        let rad = a as f64 * std::f64::consts::TAU / ANGLE_STEPS as f64;
        *slot = (rad.sin() * TRIG_ONE as f64).round() as i32;
    }
    table
});

#[inline(always)]
pub fn sin(angle: i32) -> i32 {
    SINE[(angle & ANGLE_MASK) as usize]
}

#[inline(always)]
pub fn cos(angle: i32) -> i32 {
    SINE[((angle + QUARTER_TURN) & ANGLE_MASK) as usize]
}

/*──────────────────────────── scalar helpers ────────────────────────────*/

/// `(a * b) >> shift` with a 64-bit intermediate.
#[inline(always)]
pub fn mul_shr(a: i32, b: i32, shift: u32) -> i32 {
    ((a as i64 * b as i64) >> shift) as i32
}

/// `(num << 16) / den` as Q16.16; `den` must be non-zero.
#[inline(always)]
pub fn div_q16(num: i32, den: i32) -> i32 {
    (((num as i64) << Q16_SHIFT) / den as i64) as i32
}

/// Q16.16 ratio `num / den`, using the reciprocal table when `|den|` is small.
///
/// The table is unsigned, so the sign of `den` is folded back explicitly.
pub fn ratio_q16(num: i32, den: i32) -> i32 {
    let mag = den.unsigned_abs() as usize;
    if mag < INV_DX_LEN {
        let r = num * INV_DX[mag] as i32;
        if den < 0 { -r } else { r }
    } else {
        div_q16(num, den)
    }
}

/// Integer square root (bit-by-bit, no division).
pub fn isqrt(x: u64) -> u64 {
    let mut rem = x;
    let mut root = 0u64;
    let mut bit = 1u64 << 62;
    while bit > rem {
        bit >>= 2;
    }
    while bit != 0 {
        let trial = root + bit;
        root >>= 1;
        if rem >= trial {
            rem -= trial;
            root += bit;
        }
        bit >>= 2;
    }
    root
}

/// Integer square root of a non-negative `i32`; negative input yields 0.
#[inline]
pub fn sqrt_i32(x: i32) -> i32 {
    if x <= 0 { 0 } else { isqrt(x as u64) as i32 }
}

/*──────────────────────────── vector helpers ────────────────────────────*/

/// Plain integer dot product.
#[inline(always)]
pub fn dot(a: IVec3, b: IVec3) -> i32 {
    a.x * b.x + a.y * b.y + a.z * b.z
}

/// Dot product against a Q8 vector, rescaled back by `>> 8`.
#[inline(always)]
pub fn dot_q8(a: IVec3, n: IVec3) -> i32 {
    dot(a, n) >> Q8_SHIFT
}

/// Cross product with each component rescaled by `>> 8`.
#[inline]
pub fn cross_q8(a: IVec3, b: IVec3) -> IVec3 {
    IVec3::new(
        (a.y * b.z - a.z * b.y) >> Q8_SHIFT,
        (a.z * b.x - a.x * b.z) >> Q8_SHIFT,
        (a.x * b.y - a.y * b.x) >> Q8_SHIFT,
    )
}

/// Scale `v` to Q8 unit length; `None` for the zero vector.
pub fn normalize_q8(v: IVec3) -> Option<IVec3> {
    let (x, y, z) = (v.x as i64, v.y as i64, v.z as i64);
    let len = isqrt((x * x + y * y + z * z) as u64) as i64;
    if len == 0 {
        return None;
    }
    Some(IVec3::new(
        ((x << Q8_SHIFT) / len) as i32,
        ((y << Q8_SHIFT) / len) as i32,
        ((z << Q8_SHIFT) / len) as i32,
    ))
}

/// Unit normal of the plane through three points (`cross(p1-p0, p2-p0)`).
pub fn normal_from_points(p0: IVec3, p1: IVec3, p2: IVec3) -> Option<IVec3> {
    normalize_q8(cross_q8(p1 - p0, p2 - p0))
}

/*====================================================================*/
/*                                Tests                                */
/*====================================================================*/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqrt_is_floor_of_real_root() {
        for x in [0, 1, 2, 3, 4, 15, 16, 17, 65535, 65536, 1 << 30, i32::MAX] {
            let r = sqrt_i32(x) as i64;
            assert!(r * r <= x as i64, "{x}");
            assert!((r + 1) * (r + 1) > x as i64, "{x}");
        }
        assert_eq!(sqrt_i32(-5), 0);
    }

    #[test]
    fn reciprocal_table_edges() {
        assert_eq!(INV_DX[0], 0);
        assert_eq!(INV_DX[1], 65535);
        assert_eq!(INV_DX[2], 32767);
        assert_eq!(INV_DX[319], (65535 / 319) as u16);
    }

    #[test]
    fn trig_quadrants() {
        assert_eq!(sin(0), 0);
        assert_eq!(sin(QUARTER_TURN), TRIG_ONE);
        assert_eq!(cos(0), TRIG_ONE);
        assert_eq!(cos(2 * QUARTER_TURN), -TRIG_ONE);
        // wraps
        assert_eq!(sin(ANGLE_STEPS + 7), sin(7));
        assert_eq!(sin(-QUARTER_TURN), -TRIG_ONE);
    }

    #[test]
    fn normalize_keeps_direction_and_unit_length() {
        let n = normalize_q8(IVec3::new(0, 0, 1000)).unwrap();
        assert_eq!(n, IVec3::new(0, 0, Q8_ONE));

        let n = normalize_q8(IVec3::new(300, -400, 0)).unwrap();
        assert_eq!(n, IVec3::new(153, -204, 0));

        assert!(normalize_q8(IVec3::ZERO).is_none());
    }

    #[test]
    fn normalize_survives_large_vectors() {
        let n = normalize_q8(IVec3::new(60_000, 60_000, 0)).unwrap();
        assert!((n.x - 181).abs() <= 1 && n.x == n.y);
    }

    #[test]
    fn ratio_sign_follows_denominator() {
        // 1/2 in Q16.16 (table gives 32767 instead of 32768)
        assert_eq!(ratio_q16(1, 2), 32767);
        assert_eq!(ratio_q16(1, -2), -32767);
        assert_eq!(ratio_q16(-1, 2), -32767);
        // outside the table: exact division
        assert_eq!(ratio_q16(500, 1000), 1 << 15);
        assert_eq!(ratio_q16(500, -1000), -(1 << 15));
    }

    #[test]
    fn cross_of_axes() {
        let x = IVec3::new(256, 0, 0);
        let y = IVec3::new(0, 256, 0);
        assert_eq!(cross_q8(x, y), IVec3::new(0, 0, 256));
        assert_eq!(cross_q8(y, x), IVec3::new(0, 0, -256));
    }
}
