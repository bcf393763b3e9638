//! ----------------------------------------------------------------------------
//! **Whole-mesh rasterization**
//!
//! Static geometry kept entirely in memory and drawn without any visibility
//! structure: every vertex is projected once, every face is culled, clipped
//! and scanned into the span arena, then the columns are emitted.
//!
//! The face pipeline ([`FaceRasterizer`] + [`SpanSink`]) is shared with the
//! PVS leaf renderer.
//! ----------------------------------------------------------------------------

use std::ops::AddAssign;

use glam::{IVec2, IVec3};
use smallvec::SmallVec;

use crate::{
    config::RenderConfig,
    engine::{
        clip::{Polygon3, clip_polygon},
        columns::{ColumnEmitter, EmitStats, FULL_LIGHT, FaceTable, Faces, RasterFace},
        frustum::Aabb,
        raster::{ConvexRaster, Polygon2},
        spans::{ColumnHeads, End, Span, SpanArena, TwoEnded},
        texturing::{Surface, TransformedSurface},
        transform::{Perspective, Project, Transform},
        types::{ColumnSpan, Screen},
    },
    renderer::{ColumnDevice, CommandStream},
};

/*──────────────────────────────── Mesh ───────────────────────────────*/

/// One polygon: `count` indices starting at `first`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshFace {
    pub first: u32,
    pub count: u16,
    pub surface: u16,
    pub texture: u16,
    pub light: u8,
}

#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub vertices: Vec<IVec3>,
    pub indices: Vec<u32>,
    pub faces: Vec<MeshFace>,
    pub surfaces: Vec<Surface>,
}

impl Mesh {
    pub fn new(vertices: Vec<IVec3>) -> Self {
        Self {
            vertices,
            ..Self::default()
        }
    }

    /// Adds a convex polygon wound clockwise as seen from its visible side.
    /// Its texturing frame comes from its first three vertices.
    ///
    /// `None` (nothing added) for fewer than three vertices, an index out of
    /// range or collinear leading vertices.
    pub fn add_polygon(&mut self, ring: &[u32], texture: u16, light: u8) -> Option<usize> {
        if ring.len() < 3 || ring.len() > u16::MAX as usize {
            return None;
        }
        let v = |i: u32| self.vertices.get(i as usize).copied();
        let (p0, p1, p2) = (v(ring[0])?, v(ring[1])?, v(ring[2])?);
        if ring.iter().any(|&i| v(i).is_none()) {
            return None;
        }
        let Some(surface) = Surface::from_triangle(p0, p1, p2) else {
            log::trace!("mesh: degenerate polygon {ring:?} skipped");
            return None;
        };

        self.faces.push(MeshFace {
            first: self.indices.len() as u32,
            count: ring.len() as u16,
            surface: self.surfaces.len() as u16,
            texture,
            light,
        });
        self.surfaces.push(surface);
        self.indices.extend_from_slice(ring);
        Some(self.faces.len() - 1)
    }

    pub fn ring(&self, face: &MeshFace) -> &[u32] {
        let first = face.first as usize;
        self.indices
            .get(first..first + face.count as usize)
            .unwrap_or_default()
    }

    /// A closed box, visible from outside.
    pub fn cuboid(bounds: Aabb, texture: u16) -> Self {
        const SIDES: [[u32; 4]; 6] = [
            [0, 1, 3, 2], // min z
            [4, 6, 7, 5], // max z
            [0, 2, 6, 4], // min x
            [1, 5, 7, 3], // max x
            [0, 4, 5, 1], // min y
            [2, 3, 7, 6], // max y
        ];
        let mut mesh = Self::new((0..8).map(|m| bounds.corner(m)).collect());
        for side in &SIDES {
            mesh.add_polygon(side, texture, FULL_LIGHT);
        }
        mesh
    }
}

/*──────────────────────────── Face pipeline ──────────────────────────*/

/// Counters of one rasterization pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RasterStats {
    /// Faces that produced spans.
    pub faces: usize,
    /// ... of which went through the near-plane clipper.
    pub clipped: usize,
    /// Back faces.
    pub culled: usize,
    pub spans: usize,
}

impl AddAssign for RasterStats {
    fn add_assign(&mut self, o: Self) {
        self.faces += o.faces;
        self.clipped += o.clipped;
        self.culled += o.culled;
        self.spans += o.spans;
    }
}

/// Where a face lies with respect to the near plane and the screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Entirely behind the near plane or off screen.
    Hidden,
    /// On screen; `clipped` when some vertices are behind the near plane.
    Visible { clipped: bool },
}

/// Projection and scan conversion of indexed polygons.
#[derive(Clone, Copy, Debug)]
pub struct FaceRasterizer {
    pub screen: Screen,
    pub persp: Perspective,
    pub z_clip: i32,
    pub max_poly: usize,
}

impl FaceRasterizer {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            screen: config.screen,
            persp: Perspective::new(config.screen),
            z_clip: config.z_clip,
            max_poly: config.max_poly,
        }
    }

    /// Projects every vertex; vertices behind the near plane become `None`.
    pub fn project_vertices(
        &self,
        vertices: &[IVec3],
        view: &impl Transform,
        out: &mut Vec<Option<IVec2>>,
    ) {
        out.clear();
        out.extend(vertices.iter().map(|&v| {
            let p = view.point(v);
            (p.z >= self.z_clip).then(|| self.persp.project(p))
        }));
    }

    /// Screen bounds are taken over the vertices in front of the near plane.
    pub fn placement(&self, ring: &[u32], projected: &[Option<IVec2>]) -> Placement {
        let mut n_clipped = 0;
        let (mut lo, mut hi) = (IVec2::MAX, IVec2::MIN);
        for &i in ring {
            match projected.get(i as usize).copied().flatten() {
                Some(p) => {
                    lo = lo.min(p);
                    hi = hi.max(p);
                }
                None => n_clipped += 1,
            }
        }
        if n_clipped == ring.len() {
            return Placement::Hidden;
        }
        if lo.x >= self.screen.w || hi.x <= 0 || lo.y >= self.screen.h || hi.y <= 0 {
            return Placement::Hidden;
        }
        Placement::Visible {
            clipped: n_clipped > 0,
        }
    }

    /// Starts scanning a face; clipped faces are re-transformed, clipped
    /// against the near plane and projected again.
    pub fn raster(
        &self,
        ring: &[u32],
        vertices: &[IVec3],
        projected: &[Option<IVec2>],
        view: &impl Transform,
        clipped: bool,
    ) -> Option<ConvexRaster> {
        if !clipped {
            let poly: Polygon2 = ring
                .iter()
                .map(|&i| projected.get(i as usize).copied().flatten())
                .collect::<Option<_>>()?;
            return ConvexRaster::new(&poly, self.screen);
        }
        let mut poly = Polygon3::new();
        for &i in ring {
            poly.push(view.point(*vertices.get(i as usize)?));
        }
        let clipped = clip_polygon(self.z_clip, &poly, self.max_poly);
        if clipped.len() < 3 {
            return None;
        }
        let screen: Polygon2 = clipped.iter().map(|&p| self.persp.project(p)).collect();
        ConvexRaster::new(&screen, self.screen)
    }
}

/// Result of handing a scanned face to a [`SpanSink`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Insert {
    /// Spans inserted.
    Spans(usize),
    /// Out of span slots or face ids; the worker is done for this frame.
    Exhausted,
}

/// Drawable columns of one face, gathered before any slot is reserved.
type ColumnRun = SmallVec<[ColumnSpan; 64]>;

/// One worker's view of the shared frame storage.
pub struct SpanSink<'a> {
    pub arena: &'a SpanArena,
    pub ids: &'a TwoEnded,
    pub heads: &'a mut ColumnHeads,
    pub faces: &'a mut FaceTable,
}

impl SpanSink<'_> {
    /// Records `face` and one span per drawable column of `raster`.
    ///
    /// Span slots are reserved only for drawable columns and only once the
    /// face has an id, so nothing is taken from the pool that stays unused.
    pub fn insert(&mut self, raster: ConvexRaster, face: RasterFace) -> Insert {
        let columns: ColumnRun = raster.filter(|s| s.is_drawable()).collect();
        if columns.is_empty() {
            return Insert::Spans(0);
        }
        let Some(id) = self.faces.push(self.ids, face) else {
            return Insert::Exhausted;
        };
        let Some(mut run) = self.heads.reserve(self.arena, columns.len()) else {
            return Insert::Exhausted;
        };
        let mut n = 0;
        for s in columns {
            let span = Span {
                ys: s.ys as u16,
                ye: s.ye as u16,
                face: id,
            };
            if self.heads.insert(self.arena, &mut run, s.x as usize, span) {
                n += 1;
            }
        }
        Insert::Spans(n)
    }
}

/*──────────────────────────── Mesh renderer ──────────────────────────*/

/// Single-worker renderer for a [`Mesh`].
pub struct MeshRenderer {
    raster: FaceRasterizer,
    projected: Vec<Option<IVec2>>,
    surfaces: Vec<TransformedSurface>,
    arena: SpanArena,
    ids: TwoEnded,
    heads: ColumnHeads,
    faces: FaceTable,
    emitter: ColumnEmitter,
    max_faces: usize,
}

impl MeshRenderer {
    pub fn new(config: &RenderConfig) -> Self {
        let max_faces = config.max_faces.min(u16::MAX as usize);
        Self {
            raster: FaceRasterizer::new(config),
            projected: Vec::new(),
            surfaces: Vec::new(),
            arena: SpanArena::new(config.max_spans),
            ids: TwoEnded::new(0, max_faces as u32),
            heads: ColumnHeads::new(End::Front, config.screen.w.max(0) as usize),
            faces: FaceTable::new(End::Front),
            emitter: ColumnEmitter::new(config.screen),
            max_faces,
        }
    }

    /// Scans every visible front face of `mesh` into spans.
    pub fn rasterize(&mut self, mesh: &Mesh, view: &impl Transform) -> RasterStats {
        self.arena.reset();
        self.ids.reset();
        self.heads.reset();
        self.faces.reset();

        self.raster
            .project_vertices(&mesh.vertices, view, &mut self.projected);
        self.surfaces.clear();
        self.surfaces
            .extend(mesh.surfaces.iter().map(|s| s.transform(view)));

        let mut stats = RasterStats::default();
        let mut sink = SpanSink {
            arena: &self.arena,
            ids: &self.ids,
            heads: &mut self.heads,
            faces: &mut self.faces,
        };
        for face in &mesh.faces {
            let ring = mesh.ring(face);
            let Placement::Visible { clipped } = self.raster.placement(ring, &self.projected)
            else {
                continue;
            };
            let (Some(&surface), Some(&reference)) = (
                self.surfaces.get(face.surface as usize),
                ring.first().and_then(|&i| mesh.vertices.get(i as usize)),
            ) else {
                continue;
            };
            let tex = surface.texturing(view, reference);
            if !tex.is_front_facing() {
                stats.culled += 1;
                continue;
            }
            let Some(raster) =
                self.raster
                    .raster(ring, &mesh.vertices, &self.projected, view, clipped)
            else {
                continue;
            };
            let record = RasterFace {
                surface,
                tex,
                texture: face.texture,
                light: face.light,
                lightmap: None,
            };
            match sink.insert(raster, record) {
                Insert::Spans(0) => {}
                Insert::Spans(n) => {
                    stats.faces += 1;
                    stats.clipped += clipped as usize;
                    stats.spans += n;
                }
                Insert::Exhausted => break,
            }
        }
        stats
    }

    /// Emits the columns of the last [`rasterize`](Self::rasterize).
    pub fn emit<D: ColumnDevice>(&mut self, stream: &mut CommandStream<D>) -> EmitStats {
        let faces = Faces::new(&self.faces, None, self.max_faces);
        self.emitter
            .emit(stream, &self.arena, &[&self.heads], &faces)
    }

    /// Frame gate, rasterization, emission.
    pub fn render<D: ColumnDevice>(
        &mut self,
        mesh: &Mesh,
        view: &impl Transform,
        stream: &mut CommandStream<D>,
    ) -> (RasterStats, EmitStats) {
        stream.wait_all_drawn();
        let raster = self.rasterize(mesh, view);
        let emit = self.emit(stream);
        log::debug!(
            "mesh: {} faces ({} clipped, {} culled), {} spans, {} fillers",
            raster.faces,
            raster.clipped,
            raster.culled,
            raster.spans,
            emit.fillers
        );
        (raster, emit)
    }

    /// Spans of column `x`, most recent first.
    pub fn column(&self, x: usize) -> impl Iterator<Item = Span> + '_ {
        self.heads.column(&self.arena, x)
    }

    pub fn face(&self, id: u16) -> Option<&RasterFace> {
        Faces::new(&self.faces, None, self.max_faces).get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::transform::{Identity, Translate},
        renderer::{Decoded, Recorder},
    };
    use glam::ivec3;

    fn quad_mesh(z: i32) -> Mesh {
        let mut mesh = Mesh::new(vec![
            ivec3(-100, -60, z),
            ivec3(100, -60, z),
            ivec3(100, 60, z),
            ivec3(-100, 60, z),
        ]);
        mesh.add_polygon(&[0, 1, 2, 3], 42, FULL_LIGHT).unwrap();
        mesh
    }

    #[test]
    fn front_facing_quad_end_to_end() {
        let config = RenderConfig::default();
        let mesh = quad_mesh(400);
        let mut r = MeshRenderer::new(&config);
        let stats = r.rasterize(&mesh, &Identity);
        assert_eq!(stats.faces, 1);
        assert_eq!(stats.culled, 0);

        // analytic bounding box of the projected corners
        let persp = Perspective::new(config.screen);
        let pts: Vec<IVec2> = mesh.vertices.iter().map(|&v| persp.project(v)).collect();
        let min = pts.iter().copied().reduce(IVec2::min).unwrap();
        let max = pts.iter().copied().reduce(IVec2::max).unwrap();
        assert_eq!((min, max), (IVec2::new(96, 81), IVec2::new(223, 158)));

        let covered: Vec<usize> = (0..320).filter(|&x| r.column(x).count() > 0).collect();
        assert_eq!(covered.first(), Some(&(min.x as usize)));
        assert_eq!(covered.last(), Some(&(max.x as usize)));
        assert_eq!(covered.len(), (max.x - min.x + 1) as usize);
        assert_eq!(stats.spans, covered.len());

        for x in covered {
            let spans: Vec<Span> = r.column(x).collect();
            assert_eq!(spans.len(), 1);
            assert_eq!((spans[0].ys as i32, spans[0].ye as i32), (min.y, max.y));
            let face = r.face(spans[0].face).unwrap();
            assert!(face.tex.ded > 0);
            assert_eq!(face.texture, 42);
        }
    }

    #[test]
    fn screen_filling_wall_near_the_camera() {
        let config = RenderConfig::default();
        let mut r = MeshRenderer::new(&config);
        for h in [1000, 10_000] {
            let mut mesh = Mesh::new(vec![
                ivec3(-100, -h, 70),
                ivec3(100, -h, 70),
                ivec3(100, h, 70),
                ivec3(-100, h, 70),
            ]);
            mesh.add_polygon(&[0, 1, 2, 3], 42, FULL_LIGHT).unwrap();
            let stats = r.rasterize(&mesh, &Identity);
            assert_eq!(stats.faces, 1, "h {h}");
            assert_eq!(stats.spans, 320, "h {h}");
            let spans: Vec<Span> = r.column(160).collect();
            assert_eq!(spans.len(), 1);
            assert_eq!((spans[0].ys, spans[0].ye), (0, 239), "h {h}");
        }
    }

    #[test]
    fn emitted_columns_follow_the_spans() {
        let mut r = MeshRenderer::new(&RenderConfig::default());
        let mut stream = CommandStream::new(Recorder::default());
        let (raster, emit) = r.render(&quad_mesh(400), &Identity, &mut stream);
        assert_eq!(emit.columns, 320);
        assert_eq!(emit.spans, raster.spans);
        // the quad never covers a whole column
        assert_eq!(emit.fillers, 320);

        let rec = stream.into_inner();
        assert_eq!(rec.overflows(), 0);
        let cols = rec.columns();
        assert_eq!(cols.len(), 320);
        assert_eq!(cols[0].len(), 1);
        assert_eq!(cols[100].len(), 4);
        match cols[100][2] {
            Decoded::Plane { ded, col, .. } => {
                assert_eq!(ded, 400);
                assert_eq!((col.texture, col.ys, col.ye), (42, 81, 158));
            }
            ref other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn back_face_is_culled() {
        let mut mesh = Mesh::new(quad_mesh(400).vertices);
        mesh.add_polygon(&[0, 3, 2, 1], 1, FULL_LIGHT).unwrap();
        let mut r = MeshRenderer::new(&RenderConfig::default());
        let stats = r.rasterize(&mesh, &Identity);
        assert_eq!(stats, RasterStats { culled: 1, ..Default::default() });
        assert!((0..320).all(|x| r.column(x).next().is_none()));
    }

    #[test]
    fn cuboid_shows_one_face_from_the_front() {
        let mesh = Mesh::cuboid(Aabb::new(ivec3(-100, -100, 300), ivec3(100, 100, 500)), 7);
        assert_eq!(mesh.faces.len(), 6);
        let mut r = MeshRenderer::new(&RenderConfig::default());
        let stats = r.rasterize(&mesh, &Identity);
        assert_eq!(stats.faces, 1);
        assert_eq!(stats.culled, 5);

        // moved to the left, the max-x side faces the viewer too and the
        // min-x side leaves the screen
        let stats = r.rasterize(&mesh, &Translate(ivec3(-250, 0, 0)));
        assert_eq!(stats.faces, 2);
        assert_eq!(stats.culled, 3);
    }

    #[test]
    fn straddling_quad_is_clipped() {
        let mut mesh = Mesh::new(vec![
            ivec3(-100, -60, 10),
            ivec3(100, -60, 10),
            ivec3(100, 60, 400),
            ivec3(-100, 60, 400),
        ]);
        mesh.add_polygon(&[0, 1, 2, 3], 3, FULL_LIGHT).unwrap();
        let mut r = MeshRenderer::new(&RenderConfig::default());
        let stats = r.rasterize(&mesh, &Identity);
        assert_eq!(stats.faces, 1);
        assert_eq!(stats.clipped, 1);
        assert!(stats.spans > 0);
    }

    #[test]
    fn behind_and_off_screen_faces_are_hidden() {
        let config = RenderConfig::default();
        let raster = FaceRasterizer::new(&config);
        let mut projected = Vec::new();
        raster.project_vertices(&quad_mesh(-400).vertices, &Identity, &mut projected);
        assert!(projected.iter().all(Option::is_none));
        assert_eq!(raster.placement(&[0, 1, 2, 3], &projected), Placement::Hidden);

        let far_right = quad_mesh(400)
            .vertices
            .iter()
            .map(|&v| v + ivec3(5000, 0, 0))
            .collect::<Vec<_>>();
        raster.project_vertices(&far_right, &Identity, &mut projected);
        assert_eq!(raster.placement(&[0, 1, 2, 3], &projected), Placement::Hidden);
    }

    #[test]
    fn span_overflow_truncates() {
        let config = RenderConfig {
            max_spans: 300,
            ..RenderConfig::default()
        };
        let mut mesh = quad_mesh(400);
        // the same quad three times; 128 columns each
        mesh.add_polygon(&[0, 1, 2, 3], 42, FULL_LIGHT).unwrap();
        mesh.add_polygon(&[0, 1, 2, 3], 42, FULL_LIGHT).unwrap();
        let mut r = MeshRenderer::new(&config);
        let stats = r.rasterize(&mesh, &Identity);
        assert_eq!(stats.faces, 2);
        assert_eq!(stats.spans, 256);
    }

    #[test]
    fn rejects_bad_polygons() {
        let mut mesh = quad_mesh(400);
        assert!(mesh.add_polygon(&[0, 1], 0, 0).is_none());
        assert!(mesh.add_polygon(&[0, 1, 9], 0, 0).is_none());
        mesh.vertices.push(ivec3(300, -60, 400));
        assert!(mesh.add_polygon(&[0, 1, 4], 0, 0).is_none());
        assert_eq!(mesh.faces.len(), 1);
    }

    #[test]
    fn sink_reserves_only_for_drawn_columns() {
        let screen = Screen::default();
        let arena = SpanArena::new(1000);
        let mut heads = ColumnHeads::new(End::Front, screen.w as usize);
        let mut faces = FaceTable::new(End::Front);
        let mesh = quad_mesh(400);
        let surface = mesh.surfaces[0].transform(&Identity);
        let record = RasterFace {
            surface,
            tex: surface.texturing(&Identity, mesh.vertices[0]),
            texture: 42,
            light: FULL_LIGHT,
            lightmap: None,
        };
        // wound the wrong way round: every column comes out flipped
        let flipped = [
            IVec2::new(10, 20),
            IVec2::new(10, 90),
            IVec2::new(60, 90),
            IVec2::new(60, 20),
        ];
        let square = [
            IVec2::new(10, 20),
            IVec2::new(60, 20),
            IVec2::new(60, 90),
            IVec2::new(10, 90),
        ];

        let ids = TwoEnded::new(0, 4);
        let mut sink = SpanSink { arena: &arena, ids: &ids, heads: &mut heads, faces: &mut faces };
        let raster = ConvexRaster::new(&flipped, screen).unwrap();
        assert_eq!(sink.insert(raster, record), Insert::Spans(0));
        assert!(arena.is_empty());
        assert_eq!(ids.used(), 0);

        // no face id left: the pool is left alone too
        let no_ids = TwoEnded::new(0, 0);
        let mut spare = FaceTable::new(End::Front);
        let mut sink = SpanSink { arena: &arena, ids: &no_ids, heads: &mut heads, faces: &mut spare };
        let raster = ConvexRaster::new(&square, screen).unwrap();
        assert_eq!(sink.insert(raster, record), Insert::Exhausted);
        assert!(arena.is_empty());

        let mut sink = SpanSink { arena: &arena, ids: &ids, heads: &mut heads, faces: &mut faces };
        let raster = ConvexRaster::new(&square, screen).unwrap();
        assert_eq!(sink.insert(raster, record), Insert::Spans(51));
        assert_eq!(arena.len(), 51);
        assert_eq!(ids.used(), 1);
    }
}
