//! # Level pack
//!
//! Pre-baked BSP level data in the fixed-point layout of [`raw`]:
//!
//! * the node tree and its planes, the shared normal and texturing-vector
//!   tables and the leaf offset table are read once by [`Pack::open`];
//! * visibility lists, leaf boxes and leaf geometry stay on the byte source
//!   ([`Flash`]) and are streamed in every frame.
//!
//! [`PackWriter`] produces the same layout; the demo binary and the tests use
//! it to build packs in memory.

mod reader;
pub mod raw;
mod writer;

use std::io;

use glam::IVec3;
use thiserror::Error;

use crate::{engine::frustum::Aabb, fixed::dot_q8};

pub use reader::{Flash, Pack};
pub use writer::PackWriter;

/// Set on a node child that names a leaf; the leaf index is `!child`.
pub const LEAF_BIT: u16 = 0x8000;

/// Node child referring to `leaf`.
#[inline]
pub const fn leaf_child(leaf: u16) -> u16 {
    !leaf
}

/// Loader / decoding errors.
#[derive(Error, Debug)]
pub enum PackError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not a level pack")]
    BadMagic,

    #[error("unsupported pack version {0}")]
    BadVersion(u32),

    #[error("{table} table ({count} records at {offset}) extends beyond the pack ({size} bytes)")]
    TableOutOfBounds {
        table: &'static str,
        offset: u32,
        count: u32,
        size: u64,
    },

    #[error("node {node}: {what} {index} out of range")]
    BadNode {
        node: usize,
        what: &'static str,
        index: usize,
    },

    #[error("descent did not reach a leaf after {0} nodes")]
    BadTree(usize),

    #[error("leaf index {0} out of range")]
    BadLeaf(usize),

    #[error("leaf {leaf}: blob {start}..{end} is not a valid range")]
    BadLeafOffset { leaf: usize, start: u32, end: u32 },

    #[error("leaf {leaf}: visibility list {start}+{len} past the end of the lists ({total})")]
    BadVisList {
        leaf: usize,
        start: i32,
        len: i32,
        total: u32,
    },

    #[error("leaf {leaf}: {what}")]
    BadLeafData { leaf: usize, what: String },

    #[error("{what} record: {source}")]
    Decode {
        what: &'static str,
        source: bincode::error::DecodeError,
    },

    #[error("{what} value {value} does not fit its field")]
    OutOfRange { what: &'static str, value: i64 },

    #[error("encoding {what}: {source}")]
    Encode {
        what: &'static str,
        source: bincode::error::EncodeError,
    },
}

/*=======================================================================*/
/*                             Records                                   */
/*=======================================================================*/

/// Splitting plane `dot(p, n) >> 8 == dist`, Q8 normal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PackPlane {
    pub n: IVec3,
    pub dist: i32,
}

impl PackPlane {
    /// Signed distance of `p`; negative is behind.
    #[inline(always)]
    pub fn side(&self, p: IVec3) -> i32 {
        dot_q8(p, self.n) - self.dist
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackNode {
    pub plane: u16,
    /// Front, back. High bit set: `!child` is a leaf.
    pub child: [u16; 2],
    pub bbox: Aabb,
}

/// Texture axes of a face, Q8, with their texture-space distance terms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TexVec {
    pub s: IVec3,
    pub dist_s: i32,
    pub t: IVec3,
    pub dist_t: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LeafFace {
    /// Range into [`Leaf::indices`].
    pub first: u16,
    pub count: u16,
    pub normal: u16,
    pub texvec: u16,
    pub texture: u16,
    pub lightmap: u16,
    /// Light-map atlas position, 8:8.
    pub lightmap_uv: u16,
    /// World point the light map is anchored on.
    pub lightmap_ref: IVec3,
}

/// Geometry of one leaf; reused as fetch scratch across frames.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Leaf {
    pub vertices: Vec<IVec3>,
    pub faces: Vec<LeafFace>,
    pub indices: Vec<u32>,
}

impl Leaf {
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.faces.clear();
        self.indices.clear();
    }

    /// Vertex indices of `face`.
    pub fn ring(&self, face: &LeafFace) -> &[u32] {
        let first = face.first as usize;
        self.indices
            .get(first..first + face.count as usize)
            .unwrap_or_default()
    }
}

#[inline]
fn aabb_from(b: [i16; 6]) -> Aabb {
    Aabb::new(
        IVec3::new(b[0] as i32, b[1] as i32, b[2] as i32),
        IVec3::new(b[3] as i32, b[4] as i32, b[5] as i32),
    )
}

#[inline]
fn vec_from(v: [i16; 3]) -> IVec3 {
    IVec3::new(v[0] as i32, v[1] as i32, v[2] as i32)
}
