//! ----------------------------------------------------------------------------
//! **Column renderer for 2D BSP levels**
//!
//! Every frame:
//! 1. wait for the previous frame to drain, advance the light RNG
//! 2. collect the visible subsectors and segs (see [`super::bsp`])
//! 3. for each column, front to back: floor and ceiling flats, lower,
//!    upper and middle walls, each clamped to the still-open rows
//!    `btm..=top`; an opaque middle wall closes the column
//! 4. open rows left at the end get a sky filler, then end-of-column
//!
//! Rows count upwards from the bottom of the screen on this path.
//! ----------------------------------------------------------------------------

use crate::{
    config::RenderConfig,
    engine::{
        bsp::{ColumnTable, SegProjector, VisSet, VisStats},
        columns::FULL_LIGHT,
        frustum::ray,
        types::Screen,
    },
    fixed::{TRIG_SHIFT, cos, mul_shr, sin},
    renderer::{ColumnDevice, ColumnDraw, Command, CommandStream},
    world::{Level2d, NO_TEXTURE, SegFlags, View2d},
};

/// Eye altitude above the floor of the sector under the viewer.
pub const EYE_HEIGHT: i32 = 30;
/// `y = (1 << DIST_SHIFT) / invd` is eight times the view depth.
const DIST_SHIFT: u32 = 25;
/// Texture `v` correction: `rows · y >> DEPTH_SHIFT`.
const DEPTH_SHIFT: u32 = 11;
/// Seed of the light-effect generator.
const RAND_SEED: u32 = 3137;
/// Depth of the flat ray used for plane offsets (Q12).
const FLAT_RZ: i32 = 1 << TRIG_SHIFT;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DoomStats {
    pub vis: VisStats,
    pub columns: usize,
    /// Columns closed by an opaque middle wall.
    pub closed: usize,
    pub sky: usize,
    pub commands: usize,
}

/// Linear congruential generator driving the flickering lights.
#[inline]
pub fn next_rand(r: u32) -> u32 {
    r.wrapping_mul(31421).wrapping_add(6927)
}

pub struct DoomRenderer {
    screen: Screen,
    table: ColumnTable,
    vis: VisSet,
    frame: u32,
    rand: u32,
}

impl DoomRenderer {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            screen: config.screen,
            table: ColumnTable::new(config.screen),
            vis: VisSet::new(config),
            frame: 0,
            rand: RAND_SEED,
        }
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn table(&self) -> &ColumnTable {
        &self.table
    }

    pub fn vis(&self) -> &VisSet {
        &self.vis
    }

    /// Puts the eye [`EYE_HEIGHT`] above the floor under the viewer.
    pub fn snap_altitude(&self, level: &Level2d, view: &mut View2d) {
        let sector = &level.sectors[level.find_sector(view.pos) as usize];
        view.z = sector.floor_h + EYE_HEIGHT;
    }

    pub fn render<D: ColumnDevice>(
        &mut self,
        level: &Level2d,
        view: &View2d,
        stream: &mut CommandStream<D>,
    ) -> DoomStats {
        stream.wait_all_drawn();
        let sent = stream.sent();

        self.rand = next_rand(self.rand);
        let (frame, rand) = (self.frame, self.rand);
        let proj = SegProjector::new(&self.table, view);
        let vis = self.vis.collect(level, &proj, |ss| level.sector_of(ss).light_level(frame, rand));

        let mut stats = DoomStats { vis, ..DoomStats::default() };

        // flats are textured relative to the viewer
        stream.send(Command::uv_offset(view.pos.y, view.pos.x, false));
        stream.send(Command::view_z(view.z));

        for c in 0..self.screen.w {
            self.draw_column(level, view, c, stream, &mut stats);
        }

        log::debug!(
            "doom: frame {} – {} subsectors, {} segs, {} closed, {} sky",
            self.frame,
            stats.vis.subsectors,
            stats.vis.segs,
            stats.closed,
            stats.sky
        );
        self.frame = self.frame.wrapping_add(1);
        stats.commands = stream.sent() - sent;
        stats
    }

    /// Screen row of height `h` (relative to the eye) at inverse depth `invd`.
    #[inline(always)]
    fn to_h(&self, h: i32, invd: i32) -> i32 {
        mul_shr(h, invd, 14) + self.screen.half_h()
    }

    fn draw_column<D: ColumnDevice>(
        &self,
        level: &Level2d,
        view: &View2d,
        c: i32,
        stream: &mut CommandStream<D>,
        stats: &mut DoomStats,
    ) {
        let alpha = self.table.alpha[c as usize];
        // stretch the ray so its forward component is one
        let inv_sw = (1 << (2 * TRIG_SHIFT)) / cos(alpha).max(1);
        let r = ray(view.angle + alpha);
        stream.send(Command::ray_cs(mul_shr(r.x, inv_sw, TRIG_SHIFT), mul_shr(r.y, inv_sw, TRIG_SHIFT)));

        let cx = self.table.x[c as usize];
        let (cv, sv) = (cos(view.angle), sin(view.angle));
        let du = (cx * cv + FLAT_RZ * sv) >> 14;
        let dv = (-cx * sv + FLAT_RZ * cv) >> 14;
        stream.send(Command::plane_a(256, 0, 0, du, dv));

        let half_h = self.screen.half_h();
        let mut top = self.screen.last_row();
        let mut btm = 0;

        'subsectors: for vss in self.vis.subsectors() {
            if top <= btm {
                break;
            }
            if !vss.covers(c) {
                continue;
            }
            let sector = level.sector_of(vss.subsector);
            let light = vss.light;

            for vseg in self.vis.segs_of(vss) {
                if !vseg.covers(c) {
                    continue;
                }
                let seg = &level.segs[vseg.seg as usize];
                let (invd, tu_invd) = vseg.at(c);
                if invd <= 0 {
                    continue;
                }
                let y = (1 << DIST_SHIFT) / invd;
                let tc_u = mul_shr(tu_invd, y, 19);

                let sec_f_h = sector.floor_h - view.z;
                let sec_c_h = sector.ceil_h - view.z;
                let mut f_h = self.to_h(sec_f_h, invd);
                let mut c_h = self.to_h(sec_c_h, invd);

                let mut tex_v_f = 0;
                if btm > f_h {
                    tex_v_f = mul_shr(btm - f_h, y, DEPTH_SHIFT);
                    f_h = btm;
                } else if top < f_h {
                    tex_v_f = mul_shr(f_h - top, y, DEPTH_SHIFT);
                    f_h = top;
                }
                c_h = c_h.clamp(btm, top.max(btm));

                if sector.floor_tex != NO_TEXTURE {
                    stream.send(Command::plane(
                        -sec_f_h,
                        btm - half_h,
                        ColumnDraw::new(sector.floor_tex, btm, f_h, light),
                    ));
                }
                btm = f_h;

                stream.send(Command::plane(
                    sec_c_h,
                    c_h - half_h,
                    ColumnDraw::new(sector.ceil_tex, c_h, top, light),
                ));
                top = c_h;

                let other = seg.other.map(|o| &level.sectors[o as usize]);

                if let (true, Some(other)) = (seg.lower != NO_TEXTURE, other) {
                    let f_o = self.to_h(other.floor_h - view.z, invd).clamp(btm, top.max(btm));
                    stream.send(Command::wall(y, tex_v_f, tc_u, ColumnDraw::new(seg.lower, btm, f_o, light)));
                    btm = f_o;
                }

                if let (true, Some(other)) = (seg.upper != NO_TEXTURE, other) {
                    let mut c_o = self.to_h(other.ceil_h - view.z, invd);
                    let mut tex_v = 0;
                    if btm > c_o {
                        tex_v = mul_shr(btm - c_o, y, DEPTH_SHIFT);
                        c_o = btm;
                    } else if top < c_o {
                        tex_v = mul_shr(c_o - top, y, DEPTH_SHIFT);
                        c_o = top;
                    }
                    stream.send(Command::wall(y, tex_v, tc_u, ColumnDraw::new(seg.upper, c_o, top, light)));
                    top = c_o;
                }

                if seg.middle != NO_TEXTURE {
                    stream.send(Command::wall(y, tex_v_f, tc_u, ColumnDraw::new(seg.middle, f_h, c_h, light)));
                    if !seg.flags.contains(SegFlags::TRANSPARENT) {
                        top = btm;
                        stats.closed += 1;
                        break 'subsectors;
                    }
                }
            }
        }

        if btm < top {
            stream.send(Command::filler(btm, top, FULL_LIGHT));
            stats.sky += 1;
        }
        stream.end_column();
        stats.columns += 1;
    }
}
