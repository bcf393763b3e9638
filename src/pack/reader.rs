use std::{
    fs::File,
    io::{self, BufReader, Read, Seek, SeekFrom},
    path::Path,
};

use byteorder::{ByteOrder, LittleEndian as LE, ReadBytesExt};
use glam::IVec3;

use crate::{
    engine::frustum::Aabb,
    pack::{
        Leaf, LeafFace, LEAF_BIT, PackError, PackNode, PackPlane, TexVec, aabb_from,
        raw::{
            self, FACE_SIZE, HEADER_SIZE, LEAF_HEAD_SIZE, MAGIC, NODE_SIZE, NORMAL_SIZE,
            PLANE_SIZE, RawFace, RawHeader, RawLeafHead, RawNode, RawPlane, RawTable, RawTexVec,
            TEXVEC_SIZE, VERSION, VERTEX_SIZE,
        },
        vec_from,
    },
};

/// Random-access byte source the pack is streamed from.
pub trait Flash {
    /// Fills `buf` with the bytes starting at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
    fn size(&mut self) -> io::Result<u64>;
}

impl<T: Read + Seek> Flash for T {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf)
    }

    fn size(&mut self) -> io::Result<u64> {
        self.seek(SeekFrom::End(0))
    }
}

/// An opened level pack.
#[derive(Debug)]
pub struct Pack<F> {
    flash: F,
    size: u64,
    nodes: Vec<PackNode>,
    planes: Vec<PackPlane>,
    normals: Vec<IVec3>,
    texvecs: Vec<TexVec>,
    /// `leaf_count + 1` absolute blob offsets.
    leaf_offsets: Vec<u32>,
    vis: RawTable,
    start: IVec3,
    buf: Vec<u8>,
}

impl Pack<BufReader<File>> {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PackError> {
        Self::open(BufReader::new(File::open(path)?))
    }
}

impl<F: Flash> Pack<F> {
    // ------------------------------------------------------------------ //
    // Loading
    // ------------------------------------------------------------------ //

    /// Reads the header and the resident tables and checks every cross
    /// reference of the node tree.
    pub fn open(mut flash: F) -> Result<Self, PackError> {
        let size = flash.size()?;
        let mut bytes = [0u8; HEADER_SIZE];
        flash.read_at(0, &mut bytes)?;
        let header: RawHeader = raw::take(&mut &bytes[..], "header")?;
        if header.magic != MAGIC {
            return Err(PackError::BadMagic);
        }
        if header.version != VERSION {
            return Err(PackError::BadVersion(header.version));
        }
        if header.leaves.count > LEAF_BIT as u32 {
            return Err(PackError::BadLeaf(header.leaves.count as usize));
        }

        let mut pack = Self {
            flash,
            size,
            nodes: Vec::new(),
            planes: Vec::new(),
            normals: Vec::new(),
            texvecs: Vec::new(),
            leaf_offsets: Vec::new(),
            vis: header.vis,
            start: IVec3::from_array(header.start),
            buf: Vec::new(),
        };

        pack.nodes = pack
            .read_table::<RawNode>(header.nodes, "nodes", NODE_SIZE)?
            .into_iter()
            .map(|n| PackNode {
                plane: n.plane,
                child: [n.front, n.back],
                bbox: aabb_from(n.bbox),
            })
            .collect();
        pack.planes = pack
            .read_table::<RawPlane>(header.planes, "planes", PLANE_SIZE)?
            .into_iter()
            .map(|p| PackPlane {
                n: vec_from(p.n),
                dist: p.dist,
            })
            .collect();
        pack.normals = pack
            .read_table::<[i16; 3]>(header.normals, "normals", NORMAL_SIZE)?
            .into_iter()
            .map(vec_from)
            .collect();
        pack.texvecs = pack
            .read_table::<RawTexVec>(header.texvecs, "texvecs", TEXVEC_SIZE)?
            .into_iter()
            .map(|t| TexVec {
                s: vec_from(t.s),
                dist_s: t.dist_s as i32,
                t: vec_from(t.t),
                dist_t: t.dist_t as i32,
            })
            .collect();

        // leaf table has one extra entry tagging the end of the last blob
        let table = RawTable {
            offset: header.leaves.offset,
            count: header.leaves.count + 1,
        };
        pack.check_table(table, "leaf offsets", 4)?;
        let mut offs = vec![0u8; table.count as usize * 4];
        pack.flash.read_at(table.offset as u64, &mut offs)?;
        pack.leaf_offsets = vec![0u32; table.count as usize];
        LE::read_u32_into(&offs, &mut pack.leaf_offsets);

        pack.check_table(header.vis, "visibility", 2)?;
        pack.validate()?;

        log::debug!(
            "pack: {} nodes, {} planes, {} leaves, {} normals, {} texvecs, {} vis entries",
            pack.nodes.len(),
            pack.planes.len(),
            pack.leaf_count(),
            pack.normals.len(),
            pack.texvecs.len(),
            pack.vis.count
        );
        Ok(pack)
    }

    fn check_table(&self, t: RawTable, table: &'static str, elem: usize) -> Result<(), PackError> {
        let end = t.offset as u64 + t.count as u64 * elem as u64;
        if end > self.size {
            return Err(PackError::TableOutOfBounds {
                table,
                offset: t.offset,
                count: t.count,
                size: self.size,
            });
        }
        Ok(())
    }

    fn read_table<T>(
        &mut self,
        t: RawTable,
        table: &'static str,
        elem: usize,
    ) -> Result<Vec<T>, PackError>
    where
        T: bincode::Decode<()>,
    {
        self.check_table(t, table, elem)?;
        let mut bytes = vec![0u8; t.count as usize * elem];
        self.flash.read_at(t.offset as u64, &mut bytes)?;
        let mut cur = &bytes[..];
        let mut out = Vec::with_capacity(t.count as usize);
        while !cur.is_empty() {
            out.push(raw::take(&mut cur, table)?);
        }
        Ok(out)
    }

    fn validate(&self) -> Result<(), PackError> {
        let n_leaves = self.leaf_count();
        for (i, node) in self.nodes.iter().enumerate() {
            if node.plane as usize >= self.planes.len() {
                return Err(PackError::BadNode {
                    node: i,
                    what: "plane",
                    index: node.plane as usize,
                });
            }
            for &child in &node.child {
                let (what, index, bound) = if child & LEAF_BIT != 0 {
                    ("leaf", !child as usize, n_leaves)
                } else {
                    ("child node", child as usize, self.nodes.len())
                };
                if index >= bound {
                    return Err(PackError::BadNode { node: i, what, index });
                }
            }
        }
        for (leaf, w) in self.leaf_offsets.windows(2).enumerate() {
            let (start, end) = (w[0], w[1]);
            if (start as u64) < HEADER_SIZE as u64
                || start as u64 + LEAF_HEAD_SIZE as u64 > end as u64
                || end as u64 > self.size
            {
                return Err(PackError::BadLeafOffset { leaf, start, end });
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------ //
    // Resident tables
    // ------------------------------------------------------------------ //

    pub fn nodes(&self) -> &[PackNode] {
        &self.nodes
    }

    pub fn planes(&self) -> &[PackPlane] {
        &self.planes
    }

    pub fn normals(&self) -> &[IVec3] {
        &self.normals
    }

    pub fn texvecs(&self) -> &[TexVec] {
        &self.texvecs
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_offsets.len().saturating_sub(1)
    }

    /// Suggested starting viewpoint.
    pub fn start(&self) -> IVec3 {
        self.start
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    // ------------------------------------------------------------------ //
    // Queries
    // ------------------------------------------------------------------ //

    /// Leaf containing `p`: descends from node 0, taking the back child when
    /// `p` is strictly behind the plane. A pack without nodes is leaf 0.
    pub fn locate_leaf(&self, p: IVec3) -> Result<u16, PackError> {
        if self.nodes.is_empty() {
            return self.check_leaf(0);
        }
        let mut id = 0u16;
        for _ in 0..=self.nodes.len() {
            if id & LEAF_BIT != 0 {
                return self.check_leaf(!id);
            }
            let node = self
                .nodes
                .get(id as usize)
                .ok_or(PackError::BadTree(self.nodes.len()))?;
            let plane = self.planes.get(node.plane as usize).ok_or(PackError::BadNode {
                node: id as usize,
                what: "plane",
                index: node.plane as usize,
            })?;
            id = node.child[(plane.side(p) < 0) as usize];
        }
        Err(PackError::BadTree(self.nodes.len()))
    }

    fn check_leaf(&self, leaf: u16) -> Result<u16, PackError> {
        if (leaf as usize) < self.leaf_count() {
            Ok(leaf)
        } else {
            Err(PackError::BadLeaf(leaf as usize))
        }
    }

    fn blob(&self, leaf: u16) -> Result<(u32, u32), PackError> {
        let i = leaf as usize;
        match (self.leaf_offsets.get(i), self.leaf_offsets.get(i + 1)) {
            (Some(&start), Some(&end)) => Ok((start, end)),
            _ => Err(PackError::BadLeaf(i)),
        }
    }

    fn leaf_head(&mut self, leaf: u16) -> Result<RawLeafHead, PackError> {
        let (start, _) = self.blob(leaf)?;
        let mut bytes = [0u8; LEAF_HEAD_SIZE];
        self.flash.read_at(start as u64, &mut bytes)?;
        raw::take(&mut &bytes[..], "leaf head")
    }

    pub fn leaf_bbox(&mut self, leaf: u16) -> Result<Aabb, PackError> {
        Ok(aabb_from(self.leaf_head(leaf)?.bbox))
    }

    /// Leaves potentially visible from `leaf`, replacing the content of `out`.
    pub fn vis_list(&mut self, leaf: u16, out: &mut Vec<u16>) -> Result<(), PackError> {
        let head = self.leaf_head(leaf)?;
        let (start, len) = (head.vis_start, head.vis_len);
        if start < 0 || len < 0 || start as u64 + len as u64 > self.vis.count as u64 {
            return Err(PackError::BadVisList {
                leaf: leaf as usize,
                start,
                len,
                total: self.vis.count,
            });
        }
        self.buf.resize(len as usize * 2, 0);
        let offset = self.vis.offset as u64 + start as u64 * 2;
        self.flash.read_at(offset, &mut self.buf)?;
        out.clear();
        out.resize(len as usize, 0);
        LE::read_u16_into(&self.buf, out);
        Ok(())
    }

    /// Streams the geometry of `leaf` into `out`, checking every index.
    pub fn fetch_leaf(&mut self, leaf: u16, out: &mut Leaf) -> Result<(), PackError> {
        let (start, end) = self.blob(leaf)?;
        let from = start + LEAF_HEAD_SIZE as u32;
        self.buf.resize(end.saturating_sub(from) as usize, 0);
        self.flash.read_at(from as u64, &mut self.buf)?;
        parse_leaf(
            leaf as usize,
            &self.buf,
            out,
            self.normals.len(),
            self.texvecs.len(),
        )
    }
}

/// Decodes `{vertex_count, vertices, face_count, faces, indices}`.
fn parse_leaf(
    leaf: usize,
    mut cur: &[u8],
    out: &mut Leaf,
    n_normals: usize,
    n_texvecs: usize,
) -> Result<(), PackError> {
    let bad = |what: String| PackError::BadLeafData { leaf, what };
    out.clear();

    let count = |cur: &mut &[u8], what: &str, elem: usize| -> Result<usize, PackError> {
        let n = cur
            .read_i32::<LE>()
            .map_err(|_| bad(format!("missing {what} count")))?;
        if n < 0 || n as usize * elem > cur.len() {
            return Err(bad(format!("{what} count {n} exceeds the blob")));
        }
        Ok(n as usize)
    };

    let nv = count(&mut cur, "vertex", VERTEX_SIZE)?;
    for _ in 0..nv {
        out.vertices.push(vec_from(raw::take(&mut cur, "vertex")?));
    }
    let nf = count(&mut cur, "face", FACE_SIZE)?;
    for _ in 0..nf {
        let f: RawFace = raw::take(&mut cur, "face")?;
        out.faces.push(LeafFace {
            first: f.first,
            count: f.count,
            normal: f.normal,
            texvec: f.texvec,
            texture: f.texture,
            lightmap: f.lightmap,
            lightmap_uv: f.lightmap_uv,
            lightmap_ref: vec_from(f.lightmap_ref),
        });
    }

    if cur.len() % 4 != 0 {
        return Err(bad(format!("{} bytes of indices", cur.len())));
    }
    for chunk in cur.chunks_exact(4) {
        let i = LE::read_i32(chunk);
        if i < 0 || i as usize >= nv {
            return Err(bad(format!("vertex index {i} out of range ({nv} vertices)")));
        }
        out.indices.push(i as u32);
    }

    for (i, f) in out.faces.iter().enumerate() {
        if f.first as usize + f.count as usize > out.indices.len() {
            return Err(bad(format!(
                "face {i} indices {}+{} past {}",
                f.first,
                f.count,
                out.indices.len()
            )));
        }
        if f.normal as usize >= n_normals || f.texvec as usize >= n_texvecs {
            return Err(bad(format!(
                "face {i} normal {} / texvec {} out of range",
                f.normal, f.texvec
            )));
        }
    }
    Ok(())
}

// ==========================================================================
// Tests
// ==========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::{PackWriter, leaf_child};
    use glam::ivec3;
    use std::io::{Cursor, Write};

    fn square_leaf(x: i32) -> Leaf {
        Leaf {
            vertices: vec![
                ivec3(x, 0, 0),
                ivec3(x + 64, 0, 0),
                ivec3(x + 64, 64, 0),
                ivec3(x, 64, 0),
            ],
            faces: vec![LeafFace {
                first: 0,
                count: 4,
                lightmap_uv: 0x0102,
                lightmap_ref: ivec3(x, 0, 0),
                texture: 9,
                ..LeafFace::default()
            }],
            indices: vec![0, 1, 2, 3],
        }
    }

    /// Two leaves split by the plane `x = 64`, each seeing the other.
    fn two_leaf_pack() -> Vec<u8> {
        let mut w = PackWriter::new();
        w.set_start(ivec3(10, 20, 30));
        w.add_normal(ivec3(0, 0, 256));
        w.add_texvec(TexVec {
            s: ivec3(256, 0, 0),
            dist_s: 3,
            t: ivec3(0, 256, 0),
            dist_t: -4,
        });
        let plane = w.add_plane(PackPlane { n: ivec3(256, 0, 0), dist: 64 });
        w.add_node(PackNode {
            plane,
            child: [leaf_child(1), leaf_child(0)],
            bbox: Aabb::new(ivec3(0, 0, 0), ivec3(128, 64, 0)),
        });
        w.add_leaf(Aabb::new(ivec3(0, 0, 0), ivec3(64, 64, 0)), &[0, 1], square_leaf(0));
        w.add_leaf(Aabb::new(ivec3(64, 0, 0), ivec3(128, 64, 0)), &[1, 0], square_leaf(64));
        w.to_bytes().unwrap()
    }

    #[test]
    fn opens_header() {
        let pack = Pack::open(Cursor::new(two_leaf_pack())).unwrap();
        assert_eq!(pack.nodes().len(), 1);
        assert_eq!(pack.planes()[0].dist, 64);
        assert_eq!(pack.leaf_count(), 2);
        assert_eq!(pack.normals(), &[ivec3(0, 0, 256)]);
        assert_eq!(pack.texvecs()[0].dist_t, -4);
        assert_eq!(pack.start(), ivec3(10, 20, 30));
    }

    #[test]
    fn locate_leaf_follows_the_plane() {
        let pack = Pack::open(Cursor::new(two_leaf_pack())).unwrap();
        assert_eq!(pack.locate_leaf(ivec3(10, 5, 0)).unwrap(), 0);
        assert_eq!(pack.locate_leaf(ivec3(100, 5, 0)).unwrap(), 1);
        // on the plane counts as front
        assert_eq!(pack.locate_leaf(ivec3(64, 0, 0)).unwrap(), 1);
        // deterministic
        for _ in 0..3 {
            assert_eq!(pack.locate_leaf(ivec3(63, 9, 9)).unwrap(), 0);
        }
    }

    #[test]
    fn vis_lists_and_boxes() {
        let mut pack = Pack::open(Cursor::new(two_leaf_pack())).unwrap();
        let mut list = Vec::new();
        pack.vis_list(1, &mut list).unwrap();
        assert_eq!(list, vec![1, 0]);
        pack.vis_list(0, &mut list).unwrap();
        assert_eq!(list, vec![0, 1]);
        assert_eq!(
            pack.leaf_bbox(1).unwrap(),
            Aabb::new(ivec3(64, 0, 0), ivec3(128, 64, 0))
        );
        assert!(matches!(pack.leaf_bbox(2), Err(PackError::BadLeaf(2))));
    }

    #[test]
    fn fetched_leaf_matches_the_written_one() {
        let mut pack = Pack::open(Cursor::new(two_leaf_pack())).unwrap();
        let mut leaf = Leaf::default();
        pack.fetch_leaf(1, &mut leaf).unwrap();
        assert_eq!(leaf, square_leaf(64));
        // scratch is reused
        pack.fetch_leaf(0, &mut leaf).unwrap();
        assert_eq!(leaf, square_leaf(0));
        assert_eq!(leaf.ring(&leaf.faces[0]), &[0, 1, 2, 3]);
    }

    #[test]
    fn bad_magic_and_version() {
        let mut bytes = two_leaf_pack();
        bytes[0] = b'X';
        assert!(matches!(Pack::open(Cursor::new(bytes)), Err(PackError::BadMagic)));

        let mut bytes = two_leaf_pack();
        bytes[4] = 7;
        assert!(matches!(Pack::open(Cursor::new(bytes)), Err(PackError::BadVersion(7))));
    }

    #[test]
    fn truncated_pack_is_rejected() {
        let bytes = two_leaf_pack();
        let short = bytes[..bytes.len() - 3].to_vec();
        assert!(matches!(
            Pack::open(Cursor::new(short)),
            Err(PackError::TableOutOfBounds { table: "visibility", .. })
        ));
        let tiny = bytes[..10].to_vec();
        assert!(matches!(Pack::open(Cursor::new(tiny)), Err(PackError::Io(_))));
    }

    #[test]
    fn bad_leaf_index_in_blob() {
        let mut w = PackWriter::new();
        w.add_normal(ivec3(0, 0, 256));
        w.add_texvec(TexVec::default());
        let mut leaf = square_leaf(0);
        leaf.indices[2] = 17;
        w.add_leaf(Aabb::default(), &[0], leaf);
        let mut pack = Pack::open(Cursor::new(w.to_bytes().unwrap())).unwrap();
        assert_eq!(pack.locate_leaf(IVec3::ZERO).unwrap(), 0);
        let mut out = Leaf::default();
        assert!(matches!(
            pack.fetch_leaf(0, &mut out),
            Err(PackError::BadLeafData { leaf: 0, .. })
        ));
    }

    #[test]
    fn node_with_dangling_child_is_rejected() {
        let mut w = PackWriter::new();
        let plane = w.add_plane(PackPlane { n: ivec3(256, 0, 0), dist: 0 });
        w.add_node(PackNode {
            plane,
            child: [leaf_child(0), leaf_child(3)],
            bbox: Aabb::default(),
        });
        w.add_leaf(Aabb::default(), &[], Leaf::default());
        assert!(matches!(
            Pack::open(Cursor::new(w.to_bytes().unwrap())),
            Err(PackError::BadNode { node: 0, what: "leaf", index: 3 })
        ));
    }

    #[test]
    fn from_file_reads_the_same_pack() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&two_leaf_pack()).unwrap();
        file.flush().unwrap();

        let mut pack = Pack::from_file(file.path()).unwrap();
        assert_eq!(pack.leaf_count(), 2);
        let mut leaf = Leaf::default();
        pack.fetch_leaf(0, &mut leaf).unwrap();
        assert_eq!(leaf.faces[0].texture, 9);
        assert_eq!(leaf.faces[0].lightmap_uv, 0x0102);
    }
}
