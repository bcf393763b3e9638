//! On-flash record layouts of a level pack.
//!
//! Every record is little-endian with fixed-width integers and no padding:
//!
//! ```text
//! header     68 bytes at offset 0
//! nodes      18 bytes each   {plane u16, front u16, back u16, bbox 6×i16}
//! planes     10 bytes each   {nx, ny, nz i16, dist i32}
//! normals     6 bytes each   {x, y, z i16}
//! texvecs    16 bytes each   {s 3×i16, dist_s i16, t 3×i16, dist_t i16}
//! leaves     one blob each, see below
//! leaf table (leaf_count + 1) × u32 absolute blob offsets
//! vis lists  u16 leaf indices
//! ```
//!
//! A leaf blob is `{bbox 6×i16, vis_start i32, vis_len i32}` followed by its
//! geometry: `vertex_count i32`, the vertices, `face_count i32`, the faces
//! and `i32` indices up to the next blob.

use bincode::{
    Decode, Encode,
    config::{self, Configuration, Fixint, LittleEndian},
    decode_from_slice,
};

use crate::pack::PackError;

pub const MAGIC: [u8; 4] = *b"DMCP";
pub const VERSION: u32 = 1;

pub const HEADER_SIZE: usize = 68;
pub const NODE_SIZE: usize = 18;
pub const PLANE_SIZE: usize = 10;
pub const NORMAL_SIZE: usize = 6;
pub const TEXVEC_SIZE: usize = 16;
pub const VERTEX_SIZE: usize = 6;
pub const FACE_SIZE: usize = 20;
/// Bounding box and visibility range in front of the leaf geometry.
pub const LEAF_HEAD_SIZE: usize = 20;

#[inline]
pub fn cfg() -> Configuration<LittleEndian, Fixint> {
    config::standard()
        .with_fixed_int_encoding()
        .with_little_endian()
}

/// Decodes one record from the front of `bytes` and advances past it.
pub fn take<T: Decode<()>>(bytes: &mut &[u8], what: &'static str) -> Result<T, PackError> {
    let (val, read) =
        decode_from_slice::<T, _>(bytes, cfg()).map_err(|source| PackError::Decode { what, source })?;
    *bytes = &bytes[read..];
    Ok(val)
}

/*=======================================================================*/
/*                         Raw binary structs                            */
/*=======================================================================*/

#[derive(Clone, Copy, Debug, Default, Encode, Decode, PartialEq, Eq)]
pub struct RawTable {
    pub offset: u32,
    pub count: u32,
}

#[derive(Clone, Copy, Debug, Encode, Decode, PartialEq, Eq)]
pub struct RawHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub nodes: RawTable,
    pub planes: RawTable,
    pub normals: RawTable,
    pub texvecs: RawTable,
    /// Offset of the leaf table; `count` leaves, `count + 1` entries.
    pub leaves: RawTable,
    pub vis: RawTable,
    pub start: [i32; 3],
}

#[derive(Clone, Copy, Debug, Encode, Decode, PartialEq, Eq)]
pub struct RawNode {
    pub plane: u16,
    pub front: u16,
    pub back: u16,
    pub bbox: [i16; 6],
}

#[derive(Clone, Copy, Debug, Encode, Decode, PartialEq, Eq)]
pub struct RawPlane {
    pub n: [i16; 3],
    pub dist: i32,
}

#[derive(Clone, Copy, Debug, Encode, Decode, PartialEq, Eq)]
pub struct RawTexVec {
    pub s: [i16; 3],
    pub dist_s: i16,
    pub t: [i16; 3],
    pub dist_t: i16,
}

#[derive(Clone, Copy, Debug, Encode, Decode, PartialEq, Eq)]
pub struct RawLeafHead {
    pub bbox: [i16; 6],
    pub vis_start: i32,
    pub vis_len: i32,
}

#[derive(Clone, Copy, Debug, Encode, Decode, PartialEq, Eq)]
pub struct RawFace {
    pub first: u16,
    pub count: u16,
    pub normal: u16,
    pub texvec: u16,
    pub texture: u16,
    pub lightmap: u16,
    pub lightmap_uv: u16,
    pub lightmap_ref: [i16; 3],
}
