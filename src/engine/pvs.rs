//! ----------------------------------------------------------------------------
//! **Precomputed visibility**
//!
//! The PVS engine never walks the tree for visibility: the leaf holding the
//! viewpoint names every leaf that may be seen from it. Those candidates are
//! box-tested against the world-space frustum, culled entries are overwritten
//! with [`NOT_VISIBLE`] so list positions stay stable, and the survivors'
//! geometry is streamed in and scanned into spans.
//!
//! Faces carry no surface frame of their own: they index shared normal and
//! texturing-vector tables that are rotated into view space once per frame
//! ([`ViewTables`]).
//! ----------------------------------------------------------------------------

use glam::{IVec2, IVec3};

use crate::{
    engine::{
        columns::{FULL_LIGHT, FaceLightmap, FaceTable, RasterFace},
        frustum::{Aabb, Frustum},
        mesh::{FaceRasterizer, Insert, Placement, RasterStats, SpanSink},
        spans::{ColumnHeads, End, SpanArena, TwoEnded},
        texturing::{LightmapPlacement, TransformedSurface},
        transform::Transform,
        types::Screen,
    },
    pack::{Flash, Leaf, LeafFace, Pack, PackError, TexVec},
};

/// Tag of a culled visibility-list entry.
pub const NOT_VISIBLE: u16 = 0xFFFF;

/*──────────────────────────── View tables ────────────────────────────*/

/// Pack normals and texture axes in view space.
#[derive(Clone, Debug, Default)]
pub struct ViewTables {
    pub normals: Vec<IVec3>,
    pub texvecs: Vec<TexVec>,
}

impl ViewTables {
    /// Rotates both tables (directions only; distance terms are kept).
    pub fn update(&mut self, normals: &[IVec3], texvecs: &[TexVec], view: &impl Transform) {
        self.normals.clear();
        self.normals.extend(normals.iter().map(|&n| view.direction(n)));
        self.texvecs.clear();
        self.texvecs.extend(texvecs.iter().map(|t| TexVec {
            s: view.direction(t.s),
            t: view.direction(t.t),
            ..*t
        }));
    }

    /// Plane frame of `face`: its normal with the `s`/`t` texture axes.
    pub fn surface(&self, face: &LeafFace) -> Option<(TransformedSurface, &TexVec)> {
        let n = *self.normals.get(face.normal as usize)?;
        let tv = self.texvecs.get(face.texvec as usize)?;
        Some((TransformedSurface { n, u: tv.s, v: tv.t }, tv))
    }
}

/*───────────────────────────── Vis list ──────────────────────────────*/

/// Candidate leaves of the current leaf and their bounding boxes.
#[derive(Clone, Debug, Default)]
pub struct VisList {
    pub leaves: Vec<u16>,
    pub boxes: Vec<Aabb>,
}

impl VisList {
    /// Reads the list of `leaf`, then the box of every listed leaf.
    pub fn load<F: Flash>(&mut self, pack: &mut Pack<F>, leaf: u16) -> Result<(), PackError> {
        pack.vis_list(leaf, &mut self.leaves)?;
        self.boxes.clear();
        for &l in &self.leaves {
            self.boxes.push(pack.leaf_bbox(l)?);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// First entry of the helper's share: the producer culls `[0, len/2]`.
    pub fn split_point(&self) -> usize {
        ((self.leaves.len() >> 1) + 1).min(self.leaves.len())
    }

    /// Entries not tagged by [`cull`].
    pub fn visible(&self) -> impl Iterator<Item = u16> + '_ {
        self.leaves.iter().copied().filter(|&l| l != NOT_VISIBLE)
    }
}

/// Tags every entry whose box lies outside `frustum`; returns how many.
pub fn cull(leaves: &mut [u16], boxes: &[Aabb], frustum: &Frustum) -> usize {
    let mut culled = 0;
    for (leaf, b) in leaves.iter_mut().zip(boxes) {
        if *leaf != NOT_VISIBLE && !frustum.is_visible(b) {
            *leaf = NOT_VISIBLE;
            culled += 1;
        }
    }
    culled
}

/*───────────────────────────── Workers ───────────────────────────────*/

/// Frame storage owned by one worker: its span heads, its face records and
/// its projected-vertex scratch.
#[derive(Clone, Debug)]
pub struct Worker {
    pub heads: ColumnHeads,
    pub faces: FaceTable,
    projected: Vec<Option<IVec2>>,
    exhausted: bool,
}

impl Worker {
    pub fn new(end: End, screen: Screen) -> Self {
        Self {
            heads: ColumnHeads::new(end, screen.w.max(0) as usize),
            faces: FaceTable::new(end),
            projected: Vec::new(),
            exhausted: false,
        }
    }

    pub fn reset(&mut self) {
        self.heads.reset();
        self.faces.reset();
        self.exhausted = false;
    }

    /// `true` once the worker ran out of span slots or face ids this frame.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Everything a worker reads while scanning leaves; shared by both workers.
pub struct LeafRaster<'a, T> {
    pub raster: &'a FaceRasterizer,
    pub view: &'a T,
    pub tables: &'a ViewTables,
    pub arena: &'a SpanArena,
    pub ids: &'a TwoEnded,
}

impl<T: Transform> LeafRaster<'_, T> {
    /// Scans the front faces of `leaf` into `worker`'s span lists.
    pub fn render(&self, leaf: &Leaf, worker: &mut Worker) -> RasterStats {
        let mut stats = RasterStats::default();
        if worker.exhausted {
            return stats;
        }
        self.raster
            .project_vertices(&leaf.vertices, self.view, &mut worker.projected);
        let projected = &worker.projected;

        let mut sink = SpanSink {
            arena: self.arena,
            ids: self.ids,
            heads: &mut worker.heads,
            faces: &mut worker.faces,
        };
        for face in &leaf.faces {
            let ring = leaf.ring(face);
            let Placement::Visible { clipped } = self.raster.placement(ring, projected) else {
                continue;
            };
            let (Some((surface, tv)), Some(&reference)) = (
                self.tables.surface(face),
                ring.first().and_then(|&i| leaf.vertices.get(i as usize)),
            ) else {
                continue;
            };
            let place = LightmapPlacement::from_packed_uv(
                face.lightmap_uv,
                tv.dist_s,
                tv.dist_t,
                face.lightmap_ref,
            );
            let (tex, offs) = surface.texturing_with_lightmap(self.view, reference, &place);
            if !tex.is_front_facing() {
                stats.culled += 1;
                continue;
            }
            let Some(raster) =
                self.raster
                    .raster(ring, &leaf.vertices, projected, self.view, clipped)
            else {
                continue;
            };
            let record = RasterFace {
                surface,
                tex,
                texture: face.texture,
                light: FULL_LIGHT,
                lightmap: Some(FaceLightmap {
                    id: face.lightmap,
                    offs,
                }),
            };
            match sink.insert(raster, record) {
                Insert::Spans(0) => {}
                Insert::Spans(n) => {
                    stats.faces += 1;
                    stats.clipped += clipped as usize;
                    stats.spans += n;
                }
                Insert::Exhausted => {
                    worker.exhausted = true;
                    break;
                }
            }
        }
        stats
    }
}
