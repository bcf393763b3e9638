//! Headless frame driver.
//!
//! Renders frames of one of the three engines into the simulated command
//! FIFO and logs what went over the wire.
//!
//! ```bash
//! cargo run --release --bin render_frame -- pvs --pack level.dmcp --frames 60
//! cargo run --release --bin render_frame -- pvs --demo --single
//! cargo run --release --bin render_frame -- doom --turn 16
//! RUST_LOG=debug cargo run --bin render_frame -- mesh
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use glam::{IVec2, IVec3, ivec3};

use dmc_render::{
    RenderConfig, Scheduling,
    engine::{DoomRenderer, Mesh, MeshRenderer, RenderState, frustum::Aabb},
    pack::{Leaf, LeafFace, Pack, PackNode, PackPlane, PackWriter, TexVec, leaf_child},
    renderer::{CommandStream, Recorder},
    world::{View, View2d, helpers},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// 2D BSP level, column walls and flats.
    Doom,
    /// Precomputed-visibility level pack.
    Pvs,
    /// A textured box.
    Mesh,
}

#[derive(Parser, Debug)]
#[command(version, about = "Render frames into the simulated column GPU")]
struct Args {
    #[arg(value_enum, default_value_t = Mode::Pvs)]
    mode: Mode,

    /// Level pack for `pvs`.
    #[arg(long, conflicts_with = "demo")]
    pack: Option<PathBuf>,

    /// Use the built-in two-leaf room for `pvs`.
    #[arg(long)]
    demo: bool,

    /// Viewer position `x,y,z` (`x,y` on the 2D path).
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pos: Option<Vec<i32>>,

    /// Initial yaw, 4096ths of a turn.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    yaw: i32,

    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pitch: i32,

    /// Yaw added after every frame.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    turn: i32,

    #[arg(long, default_value_t = 1)]
    frames: u32,

    /// Keep all work on the calling thread.
    #[arg(long)]
    single: bool,

    #[arg(long, default_value_t = 320)]
    width: i32,

    #[arg(long, default_value_t = 240)]
    height: i32,

    #[arg(long)]
    max_spans: Option<usize>,

    #[arg(long)]
    max_faces: Option<usize>,

    /// Command FIFO depth of the simulated device.
    #[arg(long, default_value_t = 16)]
    fifo: usize,
}

impl Args {
    fn config(&self) -> RenderConfig {
        let mut config = RenderConfig::default()
            .with_screen(self.width, self.height)
            .with_scheduling(if self.single {
                Scheduling::Single
            } else {
                Scheduling::Dual
            });
        if let Some(n) = self.max_spans {
            config.max_spans = n;
        }
        if let Some(n) = self.max_faces {
            config.max_faces = n;
        }
        config
    }

    fn pos3(&self, default: IVec3) -> Result<IVec3> {
        match self.pos.as_deref() {
            None => Ok(default),
            Some(&[x, y, z]) => Ok(ivec3(x, y, z)),
            Some(p) => bail!("--pos wants x,y,z, got {} values", p.len()),
        }
    }

    fn pos2(&self, default: IVec2) -> Result<IVec2> {
        match self.pos.as_deref() {
            None => Ok(default),
            Some(&[x, y]) => Ok(IVec2::new(x, y)),
            Some(p) => bail!("--pos wants x,y, got {} values", p.len()),
        }
    }
}

/*──────────────────────────── Demo data ─────────────────────────────*/

const WALL_TEX: u16 = 7;
const LIGHTMAP_BASE: u16 = 600;

/// Axis-aligned wall quad with its outward normal and texture axes.
struct DemoWall {
    corners: [IVec3; 4],
    normal: u16,
    texvec: u16,
}

/// A 512×512 room split at `x = 0` into two leaves that see each other.
fn demo_pack() -> Result<Vec<u8>> {
    const H: i32 = 64;
    const R: i32 = 256;

    let mut w = PackWriter::new();
    let plane = w.add_plane(PackPlane { n: ivec3(256, 0, 0), dist: 0 });
    w.add_node(PackNode {
        plane,
        child: [leaf_child(1), leaf_child(0)],
        bbox: Aabb::new(ivec3(-R, -H, -R), ivec3(R, H, R)),
    });
    // normals point out of the room
    let north = w.add_normal(ivec3(0, 0, 256));
    let south = w.add_normal(ivec3(0, 0, -256));
    let west = w.add_normal(ivec3(-256, 0, 0));
    let east = w.add_normal(ivec3(256, 0, 0));
    let along_x = w.add_texvec(TexVec {
        s: ivec3(256, 0, 0),
        dist_s: 0,
        t: ivec3(0, 256, 0),
        dist_t: 0,
    });
    let along_z = w.add_texvec(TexVec {
        s: ivec3(0, 0, 256),
        dist_s: 0,
        t: ivec3(0, 256, 0),
        dist_t: 0,
    });

    let half = |x0: i32, x1: i32, side: u16, side_x: i32| {
        let z_wall = |z: i32, normal| DemoWall {
            corners: [
                ivec3(x0, -H, z),
                ivec3(x1, -H, z),
                ivec3(x1, H, z),
                ivec3(x0, H, z),
            ],
            normal,
            texvec: along_x,
        };
        vec![
            z_wall(R, north),
            z_wall(-R, south),
            DemoWall {
                corners: [
                    ivec3(side_x, -H, -R),
                    ivec3(side_x, -H, R),
                    ivec3(side_x, H, R),
                    ivec3(side_x, H, -R),
                ],
                normal: side,
                texvec: along_z,
            },
        ]
    };
    let leaves = [
        (Aabb::new(ivec3(-R, -H, -R), ivec3(0, H, R)), half(-R, 0, west, -R)),
        (Aabb::new(ivec3(0, -H, -R), ivec3(R, H, R)), half(0, R, east, R)),
    ];

    let mut lightmap = LIGHTMAP_BASE;
    for (i, (bbox, walls)) in leaves.into_iter().enumerate() {
        let mut leaf = Leaf::default();
        for wall in walls {
            let first = leaf.indices.len() as u16;
            let base = leaf.vertices.len() as u32;
            leaf.vertices.extend_from_slice(&wall.corners);
            leaf.indices.extend(base..base + 4);
            leaf.faces.push(LeafFace {
                first,
                count: 4,
                normal: wall.normal,
                texvec: wall.texvec,
                texture: WALL_TEX,
                lightmap,
                lightmap_uv: 0,
                lightmap_ref: wall.corners[0],
            });
            lightmap += 1;
        }
        let other = 1 - i as u16;
        w.add_leaf(bbox, &[i as u16, other], leaf);
    }
    w.set_start(ivec3(-R / 2, 0, 0));
    Ok(w.to_bytes()?)
}

/*──────────────────────────── Drivers ───────────────────────────────*/

fn report(stream: &CommandStream<Recorder>) {
    let dev = stream.device();
    log::info!(
        "{} commands sent, {} FIFO stalls, {} overflows",
        stream.sent(),
        stream.stalls(),
        dev.overflows()
    );
}

fn run_pvs(args: &Args, config: &RenderConfig) -> Result<()> {
    let bytes = match &args.pack {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?
        }
        None => {
            if !args.demo {
                log::info!("no --pack given, rendering the demo room");
            }
            demo_pack().context("building the demo pack")?
        }
    };
    let mut pack = Pack::open(std::io::Cursor::new(bytes)).context("opening the level pack")?;
    log::info!(
        "pack: {} nodes, {} leaves, start {}",
        pack.nodes().len(),
        pack.leaf_count(),
        pack.start()
    );

    let mut state = RenderState::new(config).context("screen too small for a view frustum")?;
    let mut stream = CommandStream::new(Recorder::new(args.fifo));
    let mut view = View::new(args.pos3(pack.start())?, args.yaw, args.pitch);
    for _ in 0..args.frames {
        let stats = state.render(&mut pack, &view, &mut stream)?;
        log::info!(
            "frame {}: leaf {}, {}/{} leaves, {} faces, {} spans, {} fillers in {:?}",
            state.frame() - 1,
            stats.leaf,
            stats.leaves,
            stats.vis,
            stats.raster.faces,
            stats.raster.spans,
            stats.emit.fillers,
            stats.timings.total()
        );
        view.turn(args.turn);
    }
    report(&stream);
    Ok(())
}

fn run_doom(args: &Args, config: &RenderConfig) -> Result<()> {
    let level = helpers::two_rooms();
    let mut renderer = DoomRenderer::new(config);
    let mut stream = CommandStream::new(Recorder::new(args.fifo));
    let mut view = View2d::new(args.pos2(IVec2::new(128, 128))?, 0, args.yaw);
    for _ in 0..args.frames {
        renderer.snap_altitude(&level, &mut view);
        let stats = renderer.render(&level, &view, &mut stream);
        log::info!(
            "frame {}: {} subsectors, {} segs, {} closed columns, {} commands",
            renderer.frame() - 1,
            stats.vis.subsectors,
            stats.vis.segs,
            stats.closed,
            stats.commands
        );
        view.turn(args.turn);
    }
    report(&stream);
    Ok(())
}

fn run_mesh(args: &Args, config: &RenderConfig) -> Result<()> {
    let mesh = Mesh::cuboid(Aabb::new(ivec3(-100, -100, 300), ivec3(100, 100, 500)), WALL_TEX);
    let mut renderer = MeshRenderer::new(config);
    let mut stream = CommandStream::new(Recorder::new(args.fifo));
    let mut view = View::new(args.pos3(IVec3::ZERO)?, args.yaw, args.pitch);
    for frame in 0..args.frames {
        let (raster, emit) = renderer.render(&mesh, &view, &mut stream);
        log::info!(
            "frame {frame}: {} faces ({} culled), {} spans, {} fillers",
            raster.faces,
            raster.culled,
            raster.spans,
            emit.fillers
        );
        view.turn(args.turn);
    }
    report(&stream);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = args.config();
    match args.mode {
        Mode::Pvs => run_pvs(&args, &config),
        Mode::Doom => run_doom(&args, &config),
        Mode::Mesh => run_mesh(&args, &config),
    }
}
