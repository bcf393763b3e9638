//! Command protocol of the column GPU.
//!
//! *The engine never touches pixels.* Every frame becomes a stream of
//! two-word [`Command`]s, column by column, each column closed by
//! [`Command::END_OF_COLUMN`].
//!
//! * `word1` bits 30‥31 carry the [`Opcode`]; draw commands keep the column
//!   fields (texture, start row, end row, light) in its low bits.
//! * `word0` holds the draw arguments, or for [`Opcode::Parameter`] a
//!   parameter selected by its own top two bits ([`Param`]).
//! * [`Command::decode`] is the inverse; the simulated device and the tests
//!   read streams back through it.

pub mod device;

pub use device::{ColumnDevice, CommandStream, MmioDevice, Recorder, Status};

/// Wall `y` meaning "infinitely far" (sky, background).
pub const Y_MAX: i32 = 65535;
/// Bit of a uv-offset parameter selecting the light-map sampler.
pub const LIGHTMAP_EN: u32 = 1 << 25;
/// Terrain pick request.
pub const PICK: u32 = 1 << 31;

const OP_SHIFT: u32 = 30;
const EOC_BIT: u32 = 1;

/// Two-bit command selector in `word1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    Wall = 0,
    Plane = 1,
    Terrain = 2,
    Parameter = 3,
}

impl Opcode {
    #[inline(always)]
    pub const fn bits(self) -> u32 {
        (self as u32) << OP_SHIFT
    }

    #[inline(always)]
    pub const fn of(word: u32) -> Self {
        match word >> OP_SHIFT {
            0 => Self::Wall,
            1 => Self::Plane,
            2 => Self::Terrain,
            _ => Self::Parameter,
        }
    }
}

/// Parameter selector in `word0` of a [`Opcode::Parameter`] command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Param {
    RayCs = 0,
    UvOffset = 1,
    PlaneA = 2,
    ViewZ = 3,
}

/// Column fields shared by every draw command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnDraw {
    pub texture: u16,
    pub ys: i32,
    pub ye: i32,
    pub light: u8,
}

impl ColumnDraw {
    pub const fn new(texture: u16, ys: i32, ye: i32, light: u8) -> Self {
        Self { texture, ys, ye, light }
    }

    /// `texture | ys << 10 | ye << 18 | light << 26`.
    #[inline(always)]
    pub const fn bits(&self) -> u32 {
        (self.texture as u32 & 1023)
            | (self.ys as u32 & 255) << 10
            | (self.ye as u32 & 255) << 18
            | (self.light as u32 & 15) << 26
    }

    const fn from_bits(w: u32) -> Self {
        Self {
            texture: (w & 1023) as u16,
            ys: ((w >> 10) & 255) as i32,
            ye: ((w >> 18) & 255) as i32,
            light: ((w >> 26) & 15) as u8,
        }
    }
}

/// One command as seen on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Command {
    pub word0: u32,
    pub word1: u32,
}

/*──────────────────────────── Encoding ────────────────────────────*/

impl Command {
    pub const END_OF_COLUMN: Self = Self {
        word0: 0,
        word1: Opcode::Parameter.bits() | EOC_BIT,
    };

    #[inline(always)]
    const fn param(p: Param, body: u32, ex: u32) -> Self {
        Self {
            word0: (p as u32) << OP_SHIFT | body,
            word1: ex | Opcode::Parameter.bits(),
        }
    }

    /// Per-column ray direction (`cs`, `ss` on 14 bits).
    pub const fn ray_cs(cs: i32, ss: i32) -> Self {
        Self::param(
            Param::RayCs,
            (cs as u32 & 16383) | (ss as u32 & 16383) << 14,
            0,
        )
    }

    /// Texture origin; `v` in `word0`, `u` in the extended part. `lightmap`
    /// routes the offsets to the light-map sampler.
    pub const fn uv_offset(v: i32, u: i32, lightmap: bool) -> Self {
        let mut cmd = Self::param(
            Param::UvOffset,
            v as u32 & 0xFF_FFFF,
            (u as u32 & 0xFF_FFFF) << 1,
        );
        if lightmap {
            cmd.word1 |= LIGHTMAP_EN;
        }
        cmd
    }

    /// Plane frame `y` components (10 bits each) and the span's `du`, `dv`
    /// (14 bits each).
    pub const fn plane_a(ny: i32, uy: i32, vy: i32, du: i32, dv: i32) -> Self {
        Self::param(
            Param::PlaneA,
            (ny as u32 & 1023) | (uy as u32 & 1023) << 10 | (vy as u32 & 1023) << 20,
            (du as u32 & 16383) << 1 | (dv as u32 & 16383) << 15,
        )
    }

    /// Eye altitude for terrain columns.
    pub const fn view_z(z: i32) -> Self {
        Self::param(Param::ViewZ, z as u32 & 0xFFFF, 0)
    }

    /// Textured wall column: `y` is the wall distance, `v`/`u` the texture
    /// origin. `y` saturates to [`Y_MAX`].
    pub const fn wall(y: i32, v: i32, u: i32, col: ColumnDraw) -> Self {
        let y = if y < 0 {
            0
        } else if y > Y_MAX {
            Y_MAX
        } else {
            y
        };
        Self {
            word0: y as u32 | (v as u32 & 255) << 16 | (u as u32 & 255) << 24,
            word1: col.bits() | Opcode::Wall.bits(),
        }
    }

    /// Perspective plane column; `ded` and `dr` are truncated to 16 bits.
    pub const fn plane(ded: i32, dr: i32, col: ColumnDraw) -> Self {
        Self {
            word0: (ded as u32 & 0xFFFF) | (dr as u32 & 0xFFFF) << 16,
            word1: col.bits() | Opcode::Plane.bits(),
        }
    }

    pub const fn terrain(start: i32, end: i32, pick: bool, col: ColumnDraw) -> Self {
        Self {
            word0: (end as u32 & 0xFFFF)
                | (start as u32 & 0x7FFF) << 16
                | if pick { PICK } else { 0 },
            word1: col.bits() | Opcode::Terrain.bits(),
        }
    }

    /// Background wall filling rows `ys..=ye`.
    pub const fn filler(ys: i32, ye: i32, light: u8) -> Self {
        Self::wall(Y_MAX, 0, 0, ColumnDraw::new(0, ys, ye, light))
    }

    #[inline(always)]
    pub const fn opcode(&self) -> Opcode {
        Opcode::of(self.word1)
    }

    #[inline(always)]
    pub const fn is_end_of_column(&self) -> bool {
        self.word0 == 0 && self.word1 == Self::END_OF_COLUMN.word1
    }
}

/*──────────────────────────── Decoding ────────────────────────────*/

/// A [`Command`] with its fields unpacked. Signed fields are sign-extended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decoded {
    Wall { y: i32, v: i32, u: i32, col: ColumnDraw },
    Plane { ded: i32, dr: i32, col: ColumnDraw },
    Terrain { start: i32, end: i32, pick: bool, col: ColumnDraw },
    RayCs { cs: i32, ss: i32 },
    UvOffset { v: i32, u: i32, lightmap: bool },
    PlaneA { ny: i32, uy: i32, vy: i32, du: i32, dv: i32 },
    ViewZ { z: i32 },
    EndOfColumn,
}

impl Decoded {
    /// Column fields of a draw command.
    pub fn column(&self) -> Option<ColumnDraw> {
        match *self {
            Self::Wall { col, .. } | Self::Plane { col, .. } | Self::Terrain { col, .. } => {
                Some(col)
            }
            _ => None,
        }
    }
}

#[inline(always)]
const fn sext(v: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((v << shift) as i32) >> shift
}

impl Command {
    pub fn decode(&self) -> Decoded {
        let (w0, w1) = (self.word0, self.word1);
        match self.opcode() {
            Opcode::Wall => Decoded::Wall {
                y: (w0 & 0xFFFF) as i32,
                v: ((w0 >> 16) & 255) as i32,
                u: ((w0 >> 24) & 255) as i32,
                col: ColumnDraw::from_bits(w1),
            },
            Opcode::Plane => Decoded::Plane {
                ded: sext(w0 & 0xFFFF, 16),
                dr: sext(w0 >> 16, 16),
                col: ColumnDraw::from_bits(w1),
            },
            Opcode::Terrain => Decoded::Terrain {
                start: ((w0 >> 16) & 0x7FFF) as i32,
                end: (w0 & 0xFFFF) as i32,
                pick: w0 & PICK != 0,
                col: ColumnDraw::from_bits(w1),
            },
            Opcode::Parameter if w1 & EOC_BIT != 0 => Decoded::EndOfColumn,
            Opcode::Parameter => match w0 >> OP_SHIFT {
                0 => Decoded::RayCs {
                    cs: sext(w0 & 16383, 14),
                    ss: sext((w0 >> 14) & 16383, 14),
                },
                1 => Decoded::UvOffset {
                    v: sext(w0 & 0xFF_FFFF, 24),
                    u: sext((w1 >> 1) & 0xFF_FFFF, 24),
                    lightmap: w1 & LIGHTMAP_EN != 0,
                },
                2 => Decoded::PlaneA {
                    ny: sext(w0 & 1023, 10),
                    uy: sext((w0 >> 10) & 1023, 10),
                    vy: sext((w0 >> 20) & 1023, 10),
                    du: sext((w1 >> 1) & 16383, 14),
                    dv: sext((w1 >> 15) & 16383, 14),
                },
                _ => Decoded::ViewZ {
                    z: (w0 & 0xFFFF) as i32,
                },
            },
        }
    }
}
