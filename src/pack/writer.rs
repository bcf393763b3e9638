use std::io::Write;

use bincode::{Encode, encode_into_std_write};
use byteorder::{LittleEndian as LE, WriteBytesExt};
use glam::IVec3;

use crate::{
    engine::frustum::Aabb,
    pack::{
        Leaf, PackError, PackNode, PackPlane, TexVec,
        raw::{
            self, FACE_SIZE, HEADER_SIZE, LEAF_HEAD_SIZE, MAGIC, NODE_SIZE, NORMAL_SIZE,
            PLANE_SIZE, RawFace, RawHeader, RawLeafHead, RawNode, RawPlane, RawTable, RawTexVec,
            TEXVEC_SIZE, VERSION, VERTEX_SIZE,
        },
    },
};

#[derive(Clone, Debug)]
struct LeafEntry {
    bbox: Aabb,
    vis: Vec<u16>,
    leaf: Leaf,
}

impl LeafEntry {
    fn blob_size(&self) -> usize {
        LEAF_HEAD_SIZE
            + 4
            + self.leaf.vertices.len() * VERTEX_SIZE
            + 4
            + self.leaf.faces.len() * FACE_SIZE
            + self.leaf.indices.len() * 4
    }
}

/// Builds a level pack in the layout [`Pack`](crate::pack::Pack) reads.
///
/// Records are written in insertion order; `add_*` return the index the
/// record will have in the pack.
#[derive(Clone, Debug, Default)]
pub struct PackWriter {
    nodes: Vec<PackNode>,
    planes: Vec<PackPlane>,
    normals: Vec<IVec3>,
    texvecs: Vec<TexVec>,
    leaves: Vec<LeafEntry>,
    start: IVec3,
}

impl PackWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_start(&mut self, start: IVec3) {
        self.start = start;
    }

    pub fn add_plane(&mut self, plane: PackPlane) -> u16 {
        self.planes.push(plane);
        (self.planes.len() - 1) as u16
    }

    /// Node 0 is the root.
    pub fn add_node(&mut self, node: PackNode) -> u16 {
        self.nodes.push(node);
        (self.nodes.len() - 1) as u16
    }

    pub fn add_normal(&mut self, n: IVec3) -> u16 {
        self.normals.push(n);
        (self.normals.len() - 1) as u16
    }

    pub fn add_texvec(&mut self, t: TexVec) -> u16 {
        self.texvecs.push(t);
        (self.texvecs.len() - 1) as u16
    }

    /// Adds a leaf with its bounding box and visibility list.
    pub fn add_leaf(&mut self, bbox: Aabb, vis: &[u16], leaf: Leaf) -> u16 {
        self.leaves.push(LeafEntry {
            bbox,
            vis: vis.to_vec(),
            leaf,
        });
        (self.leaves.len() - 1) as u16
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PackError> {
        let mut out = Vec::new();
        self.write(&mut out)?;
        Ok(out)
    }

    /// Serializes the whole pack; returns the number of bytes written.
    pub fn write<W: Write>(&self, w: &mut W) -> Result<usize, PackError> {
        // ---- layout
        let mut at = HEADER_SIZE;
        let mut table = |count: usize, elem: usize| -> Result<RawTable, PackError> {
            let t = RawTable {
                offset: narrow_u32(at, "table offset")?,
                count: narrow_u32(count, "table count")?,
            };
            at += count * elem;
            Ok(t)
        };
        let nodes = table(self.nodes.len(), NODE_SIZE)?;
        let planes = table(self.planes.len(), PLANE_SIZE)?;
        let normals = table(self.normals.len(), NORMAL_SIZE)?;
        let texvecs = table(self.texvecs.len(), TEXVEC_SIZE)?;
        let blobs_at = at;
        let blob_sizes: usize = self.leaves.iter().map(LeafEntry::blob_size).sum();
        at += blob_sizes;
        let leaf_table = RawTable {
            offset: narrow_u32(at, "leaf table offset")?,
            count: narrow_u32(self.leaves.len(), "leaf count")?,
        };
        at += (self.leaves.len() + 1) * 4;
        let vis_total: usize = self.leaves.iter().map(|l| l.vis.len()).sum();
        let vis = RawTable {
            offset: narrow_u32(at, "vis offset")?,
            count: narrow_u32(vis_total, "vis count")?,
        };
        let total = at + vis_total * 2;

        // ---- records
        let mut out = Vec::with_capacity(total);
        let header = RawHeader {
            magic: MAGIC,
            version: VERSION,
            nodes,
            planes,
            normals,
            texvecs,
            leaves: leaf_table,
            vis,
            start: self.start.to_array(),
        };
        put(&mut out, header, "header")?;
        for n in &self.nodes {
            let raw = RawNode {
                plane: n.plane,
                front: n.child[0],
                back: n.child[1],
                bbox: bbox_to(&n.bbox)?,
            };
            put(&mut out, raw, "node")?;
        }
        for p in &self.planes {
            let raw = RawPlane {
                n: vec_to(p.n, "plane normal")?,
                dist: p.dist,
            };
            put(&mut out, raw, "plane")?;
        }
        for &n in &self.normals {
            put(&mut out, vec_to(n, "normal")?, "normal")?;
        }
        for t in &self.texvecs {
            let raw = RawTexVec {
                s: vec_to(t.s, "texvec s")?,
                dist_s: narrow_i16(t.dist_s, "texvec dist")?,
                t: vec_to(t.t, "texvec t")?,
                dist_t: narrow_i16(t.dist_t, "texvec dist")?,
            };
            put(&mut out, raw, "texvec")?;
        }

        debug_assert_eq!(out.len(), blobs_at);
        let mut offsets = Vec::with_capacity(self.leaves.len() + 1);
        let mut vis_start = 0usize;
        for entry in &self.leaves {
            offsets.push(narrow_u32(out.len(), "leaf offset")?);
            put_leaf(&mut out, entry, vis_start)?;
            vis_start += entry.vis.len();
        }
        offsets.push(narrow_u32(out.len(), "leaf offset")?);
        for o in offsets {
            out.write_u32::<LE>(o)?;
        }
        for entry in &self.leaves {
            for &v in &entry.vis {
                out.write_u16::<LE>(v)?;
            }
        }
        debug_assert_eq!(out.len(), total);

        w.write_all(&out)?;
        Ok(out.len())
    }
}

fn put_leaf(out: &mut Vec<u8>, e: &LeafEntry, vis_start: usize) -> Result<(), PackError> {
    let head = RawLeafHead {
        bbox: bbox_to(&e.bbox)?,
        vis_start: narrow_i32(vis_start, "vis start")?,
        vis_len: narrow_i32(e.vis.len(), "vis length")?,
    };
    put(out, head, "leaf head")?;

    out.write_i32::<LE>(narrow_i32(e.leaf.vertices.len(), "vertex count")?)?;
    for &v in &e.leaf.vertices {
        put(out, vec_to(v, "vertex")?, "vertex")?;
    }
    out.write_i32::<LE>(narrow_i32(e.leaf.faces.len(), "face count")?)?;
    for f in &e.leaf.faces {
        let raw = RawFace {
            first: f.first,
            count: f.count,
            normal: f.normal,
            texvec: f.texvec,
            texture: f.texture,
            lightmap: f.lightmap,
            lightmap_uv: f.lightmap_uv,
            lightmap_ref: vec_to(f.lightmap_ref, "light-map reference")?,
        };
        put(out, raw, "face")?;
    }
    for &i in &e.leaf.indices {
        out.write_i32::<LE>(narrow_i32(i as usize, "vertex index")?)?;
    }
    Ok(())
}

fn put<T: Encode>(out: &mut Vec<u8>, val: T, what: &'static str) -> Result<(), PackError> {
    encode_into_std_write(val, out, raw::cfg()).map_err(|source| PackError::Encode { what, source })?;
    Ok(())
}

fn narrow_i16(v: i32, what: &'static str) -> Result<i16, PackError> {
    i16::try_from(v).map_err(|_| PackError::OutOfRange { what, value: v as i64 })
}

fn narrow_i32(v: usize, what: &'static str) -> Result<i32, PackError> {
    i32::try_from(v).map_err(|_| PackError::OutOfRange { what, value: v as i64 })
}

fn narrow_u32(v: usize, what: &'static str) -> Result<u32, PackError> {
    u32::try_from(v).map_err(|_| PackError::OutOfRange { what, value: v as i64 })
}

fn vec_to(v: IVec3, what: &'static str) -> Result<[i16; 3], PackError> {
    Ok([
        narrow_i16(v.x, what)?,
        narrow_i16(v.y, what)?,
        narrow_i16(v.z, what)?,
    ])
}

fn bbox_to(b: &Aabb) -> Result<[i16; 6], PackError> {
    let [a, b2, c] = vec_to(b.min, "bbox")?;
    let [d, e, f] = vec_to(b.max, "bbox")?;
    Ok([a, b2, c, d, e, f])
}
