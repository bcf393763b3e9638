//! ----------------------------------------------------------------------------
//! **Column emission**
//!
//! Turns the span lists of a frame into commands, one column at a time:
//!
//! 1. every span of the producer's list, then every span of the helper's;
//!    each span is a plane-frame parameter, a uv-offset parameter and a
//!    plane draw (repeated for the light map when the face has one),
//! 2. a background filler when the spans left rows uncovered,
//! 3. the end-of-column marker.
//!
//! Faces are stored in per-worker [`FaceTable`]s whose ids come from one
//! two-ended range; [`Faces`] resolves an id back to its record.
//! ----------------------------------------------------------------------------

use crate::{
    engine::{
        spans::{ColumnHeads, End, Span, SpanArena, TwoEnded},
        texturing::{LightmapOffsets, Texturing, TransformedSurface},
        types::Screen,
    },
    renderer::{ColumnDevice, ColumnDraw, Command, CommandStream},
};

/// Light level of faces that carry no light information.
pub const FULL_LIGHT: u8 = 15;

/// Light-map sampling of a face.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaceLightmap {
    pub id: u16,
    pub offs: LightmapOffsets,
}

/// Everything column emission needs about one rasterized face.
#[derive(Clone, Copy, Debug)]
pub struct RasterFace {
    pub surface: TransformedSurface,
    pub tex: Texturing,
    pub texture: u16,
    pub light: u8,
    pub lightmap: Option<FaceLightmap>,
}

/*──────────────────────────── Face tables ────────────────────────────*/

/// Faces rasterized by one worker this frame.
#[derive(Clone, Debug)]
pub struct FaceTable {
    end: End,
    faces: Vec<RasterFace>,
    exhausted: bool,
}

impl FaceTable {
    pub fn new(end: End) -> Self {
        Self {
            end,
            faces: Vec::new(),
            exhausted: false,
        }
    }

    pub fn reset(&mut self) {
        self.faces.clear();
        self.exhausted = false;
    }

    /// Stores `face` under a fresh id from `ids`. `None` once the id range
    /// is used up; every later call fails too.
    pub fn push(&mut self, ids: &TwoEnded, face: RasterFace) -> Option<u16> {
        if self.exhausted {
            return None;
        }
        let Some(range) = ids.reserve(self.end, 1) else {
            log::debug!(
                "faces: id range full ({} / {}), {:?} worker stops inserting",
                ids.used(),
                ids.capacity(),
                self.end
            );
            self.exhausted = true;
            return None;
        };
        self.faces.push(face);
        Some(range.start as u16)
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Resolves face ids of a front and an optional back [`FaceTable`] that
/// share one id range of `capacity` ids.
#[derive(Clone, Copy, Debug)]
pub struct Faces<'a> {
    front: &'a FaceTable,
    back: Option<&'a FaceTable>,
    capacity: usize,
}

impl<'a> Faces<'a> {
    pub fn new(front: &'a FaceTable, back: Option<&'a FaceTable>, capacity: usize) -> Self {
        Self { front, back, capacity }
    }

    /// Front ids count up from 0, back ids down from `capacity - 1`.
    pub fn get(&self, id: u16) -> Option<&'a RasterFace> {
        let id = id as usize;
        if id < self.front.faces.len() {
            return self.front.faces.get(id);
        }
        let back = self.back?;
        back.faces.get(self.capacity.checked_sub(id + 1)?)
    }

    pub fn len(&self) -> usize {
        self.front.len() + self.back.map_or(0, FaceTable::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/*────────────────────────────── Emitter ──────────────────────────────*/

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EmitStats {
    pub spans: usize,
    pub fillers: usize,
    pub columns: usize,
}

/// Per-frame column walker; owns the coverage scratch of one column.
#[derive(Clone, Debug)]
pub struct ColumnEmitter {
    screen: Screen,
    covered: Vec<bool>,
    n_covered: usize,
}

impl ColumnEmitter {
    pub fn new(screen: Screen) -> Self {
        Self {
            screen,
            covered: vec![false; screen.h.max(0) as usize],
            n_covered: 0,
        }
    }

    /// Emits every column of the frame.
    pub fn emit<D: ColumnDevice>(
        &mut self,
        stream: &mut CommandStream<D>,
        arena: &SpanArena,
        lists: &[&ColumnHeads],
        faces: &Faces<'_>,
    ) -> EmitStats {
        let mut stats = EmitStats::default();
        for c in 0..self.screen.w {
            self.covered.fill(false);
            self.n_covered = 0;

            for heads in lists {
                for span in heads.column(arena, c as usize) {
                    let Some(face) = faces.get(span.face) else {
                        log::warn!("columns: span of column {c} names unknown face {}", span.face);
                        continue;
                    };
                    self.emit_span(stream, c, &span, face);
                    stats.spans += 1;
                }
            }

            if self.n_covered < self.covered.len() {
                stream.send(Command::filler(0, self.screen.last_row(), 0));
                stats.fillers += 1;
            }
            stream.end_column();
            stats.columns += 1;
        }
        stats
    }

    fn emit_span<D: ColumnDevice>(
        &mut self,
        stream: &mut CommandStream<D>,
        c: i32,
        span: &Span,
        face: &RasterFace,
    ) {
        let (ys, ye) = (span.ys as i32, span.ye as i32);
        self.cover(ys, ye);

        let s = &face.surface;
        let k = s.setup_column_span(&self.screen, c, ys);
        let frame = Command::plane_a(s.n.y, s.u.y, s.v.y, k.du, k.dv);

        stream.send(frame);
        stream.send(Command::uv_offset(face.tex.v_offs, face.tex.u_offs, false));
        stream.send(Command::plane(
            face.tex.ded,
            k.dr,
            ColumnDraw::new(face.texture, ys, ye, face.light),
        ));

        if let Some(lm) = face.lightmap {
            stream.send(frame);
            stream.send(Command::uv_offset(lm.offs.v_offs, lm.offs.u_offs, true));
            stream.send(Command::plane(
                face.tex.ded,
                k.dr,
                ColumnDraw::new(lm.id, ys, ye, FULL_LIGHT),
            ));
        }
    }

    fn cover(&mut self, ys: i32, ye: i32) {
        let last = self.covered.len() as i32 - 1;
        for y in ys.max(0)..=ye.min(last) {
            let row = &mut self.covered[y as usize];
            if !*row {
                *row = true;
                self.n_covered += 1;
            }
        }
    }
}
