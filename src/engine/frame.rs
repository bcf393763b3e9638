//! ----------------------------------------------------------------------------
//! **PVS frame driver**
//!
//! One frame of the precomputed-visibility engine:
//!
//! 1. wait for the device to finish the previous frame,
//! 2. carry the frustum into world space, rotate the shared normal and
//!    texture-axis tables,
//! 3. locate the view leaf and load its visibility list,
//! 4. cull the list against the frustum,
//! 5. stream the surviving leaves in and scan them into spans,
//! 6. emit every column.
//!
//! With [`Scheduling::Dual`] a helper thread takes half of step 4 and every
//! other leaf of step 5. The two workers share nothing mutable but the span
//! arena and the face-id range, which hand out disjoint slots from opposite
//! ends; everything else moves by value over two rendezvous channels: the
//! helper's share of the visibility list goes out and comes back culled, and
//! the staged leaf blob goes out and comes back once scanned.
//! ----------------------------------------------------------------------------

use std::{
    mem,
    ops::AddAssign,
    thread,
    time::{Duration, Instant},
};

use crossbeam::channel::{self, Receiver, SendError, Sender};

use crate::{
    config::{RenderConfig, Scheduling},
    engine::{
        columns::{ColumnEmitter, EmitStats, Faces},
        frustum::{Aabb, Frustum},
        mesh::{FaceRasterizer, RasterStats},
        pvs::{LeafRaster, ViewTables, VisList, Worker, cull},
        spans::{End, SpanArena, TwoEnded},
        transform::Perspective,
    },
    pack::{Flash, Leaf, Pack, PackError},
    renderer::{ColumnDevice, CommandStream},
    world::View,
};

/// Wall-clock time of each phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timings {
    pub setup: Duration,
    pub locate: Duration,
    pub cull: Duration,
    pub raster: Duration,
    pub emit: Duration,
}

impl Timings {
    pub fn total(&self) -> Duration {
        self.setup + self.locate + self.cull + self.raster + self.emit
    }
}

impl AddAssign for Timings {
    fn add_assign(&mut self, o: Self) {
        self.setup += o.setup;
        self.locate += o.locate;
        self.cull += o.cull;
        self.raster += o.raster;
        self.emit += o.emit;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Leaf holding the viewpoint.
    pub leaf: u16,
    /// Entries of its visibility list.
    pub vis: usize,
    /// ... of which failed the frustum test.
    pub culled: usize,
    /// Leaves streamed in and scanned.
    pub leaves: usize,
    pub raster: RasterStats,
    pub emit: EmitStats,
    pub timings: Timings,
}

/// Work handed to the helper.
enum Task<'a> {
    /// Cull the helper's share of the visibility list.
    Cull {
        leaves: Vec<u16>,
        boxes: &'a [Aabb],
    },
    /// Scan a staged leaf into the helper's span lists.
    Raster(Leaf),
}

enum Reply {
    Culled {
        leaves: Vec<u16>,
        culled: usize,
    },
    Rastered {
        leaf: Leaf,
        stats: RasterStats,
        exhausted: bool,
    },
}

/// Everything the PVS engine keeps from one frame to the next.
pub struct RenderState {
    config: RenderConfig,
    raster: FaceRasterizer,
    /// View-space frustum; carried into world space every frame.
    frustum: Frustum,
    tables: ViewTables,
    vis: VisList,
    /// Helper's share of the visibility list while it is being culled.
    tail: Vec<u16>,
    arena: SpanArena,
    ids: TwoEnded,
    producer: Worker,
    helper: Worker,
    /// Two leaf blobs: the first goes to the helper, the second stays.
    staging: [Leaf; 2],
    emitter: ColumnEmitter,
    max_faces: usize,
    frame: u32,
}

impl RenderState {
    /// `None` when the screen is too small to build a frustum.
    pub fn new(config: &RenderConfig) -> Option<Self> {
        let frustum = Frustum::new(&Perspective::new(config.screen), config.screen, config.z_clip)?;
        let max_faces = config.max_faces.min(u16::MAX as usize);
        Some(Self {
            config: config.clone(),
            raster: FaceRasterizer::new(config),
            frustum,
            tables: ViewTables::default(),
            vis: VisList::default(),
            tail: Vec::new(),
            arena: SpanArena::new(config.max_spans),
            ids: TwoEnded::new(0, max_faces as u32),
            producer: Worker::new(End::Front, config.screen),
            helper: Worker::new(End::Back, config.screen),
            staging: [Leaf::default(), Leaf::default()],
            emitter: ColumnEmitter::new(config.screen),
            max_faces,
            frame: 0,
        })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Frames rendered so far.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Renders one frame of `pack` seen from `view`.
    ///
    /// Only reading the pack can fail; running out of spans or faces just
    /// drops the rest of the frame's geometry.
    pub fn render<F: Flash, D: ColumnDevice>(
        &mut self,
        pack: &mut Pack<F>,
        view: &View,
        stream: &mut CommandStream<D>,
    ) -> Result<FrameStats, PackError> {
        let mut stats = FrameStats::default();

        stream.wait_all_drawn();
        let t = Instant::now();
        self.arena.reset();
        self.ids.reset();
        self.producer.reset();
        self.helper.reset();
        let world = self.frustum.transform(&view.inverse());
        self.tables.update(pack.normals(), pack.texvecs(), view);
        stats.timings.setup = t.elapsed();

        let t = Instant::now();
        stats.leaf = pack.locate_leaf(view.pos)?;
        self.vis.load(pack, stats.leaf)?;
        stats.vis = self.vis.len();
        stats.timings.locate = t.elapsed();

        match self.config.scheduling {
            Scheduling::Single => self.run_single(pack, view, &world, &mut stats)?,
            Scheduling::Dual => self.run_dual(pack, view, &world, &mut stats)?,
        }

        let t = Instant::now();
        let faces = Faces::new(&self.producer.faces, Some(&self.helper.faces), self.max_faces);
        stats.emit = self.emitter.emit(
            stream,
            &self.arena,
            &[&self.producer.heads, &self.helper.heads],
            &faces,
        );
        stats.timings.emit = t.elapsed();

        log::debug!(
            "frame {}: leaf {}, {} / {} leaves visible, {} faces ({} clipped, {} culled), {} spans, {:?}",
            self.frame,
            stats.leaf,
            stats.vis - stats.culled,
            stats.vis,
            stats.raster.faces,
            stats.raster.clipped,
            stats.raster.culled,
            stats.raster.spans,
            stats.timings.total()
        );
        self.frame = self.frame.wrapping_add(1);
        Ok(stats)
    }

    fn run_single<F: Flash>(
        &mut self,
        pack: &mut Pack<F>,
        view: &View,
        world: &Frustum,
        stats: &mut FrameStats,
    ) -> Result<(), PackError> {
        let t = Instant::now();
        stats.culled = cull(&mut self.vis.leaves, &self.vis.boxes, world);
        stats.timings.cull = t.elapsed();

        let t = Instant::now();
        let ctx = LeafRaster {
            raster: &self.raster,
            view,
            tables: &self.tables,
            arena: &self.arena,
            ids: &self.ids,
        };
        let staged = &mut self.staging[0];
        for leaf in self.vis.visible() {
            if self.producer.is_exhausted() {
                break;
            }
            pack.fetch_leaf(leaf, staged)?;
            stats.raster += ctx.render(staged, &mut self.producer);
            stats.leaves += 1;
        }
        stats.timings.raster = t.elapsed();
        Ok(())
    }

    fn run_dual<F: Flash>(
        &mut self,
        pack: &mut Pack<F>,
        view: &View,
        world: &Frustum,
        stats: &mut FrameStats,
    ) -> Result<(), PackError> {
        let Self {
            raster,
            tables,
            vis,
            tail,
            arena,
            ids,
            producer,
            helper,
            staging,
            ..
        } = self;
        let ctx = &LeafRaster {
            raster: &*raster,
            view,
            tables: &*tables,
            arena: &*arena,
            ids: &*ids,
        };
        let (task_tx, task_rx) = channel::bounded::<Task<'_>>(0);
        let (reply_tx, reply_rx) = channel::bounded::<Reply>(0);

        thread::scope(|s| {
            s.spawn(move || assist(ctx, world, helper, task_rx, reply_tx));

            // ---- frustum culling, split in two halves
            let t = Instant::now();
            let split = vis.split_point();
            tail.clear();
            tail.extend_from_slice(&vis.leaves[split..]);
            vis.leaves.truncate(split);
            let boxes = &vis.boxes[split..];
            let task = Task::Cull {
                leaves: mem::take(tail),
                boxes,
            };
            let mut helper_gone = false;
            let returned = offer(&task_tx, task);
            stats.culled = cull(&mut vis.leaves, &vis.boxes[..split], world);
            match returned {
                None => match reply_rx.recv() {
                    Ok(Reply::Culled { leaves, culled }) => {
                        stats.culled += culled;
                        vis.leaves.extend_from_slice(&leaves);
                        *tail = leaves;
                    }
                    _ => {
                        log::warn!("frame: helper lost its share of the visibility list");
                        helper_gone = true;
                    }
                },
                Some(Task::Cull { mut leaves, boxes }) => {
                    stats.culled += cull(&mut leaves, boxes, world);
                    vis.leaves.extend_from_slice(&leaves);
                    *tail = leaves;
                    helper_gone = true;
                }
                Some(Task::Raster(_)) => helper_gone = true,
            }
            stats.timings.cull = t.elapsed();

            // ---- leaves, two at a time
            let t = Instant::now();
            let mut helper_done = false;
            let mut visible = vis.visible();
            while let Some(first) = visible.next() {
                let second = visible.next();
                let [to_helper, kept] = &mut *staging;
                pack.fetch_leaf(first, to_helper)?;
                if let Some(second) = second {
                    pack.fetch_leaf(second, kept)?;
                }

                let mut handed = false;
                if !helper_done && !helper_gone {
                    match offer(&task_tx, Task::Raster(mem::take(to_helper))) {
                        None => handed = true,
                        Some(task) => {
                            if let Task::Raster(leaf) = task {
                                *to_helper = leaf;
                            }
                            helper_gone = true;
                        }
                    }
                }
                if second.is_some() {
                    stats.raster += ctx.render(kept, producer);
                }
                if handed {
                    match reply_rx.recv() {
                        Ok(Reply::Rastered {
                            leaf,
                            stats: helped,
                            exhausted,
                        }) => {
                            *to_helper = leaf;
                            stats.raster += helped;
                            helper_done = exhausted;
                        }
                        _ => {
                            log::warn!("frame: helper lost leaf {first}");
                            helper_gone = true;
                            handed = false;
                        }
                    }
                } else if helper_gone {
                    // the helper's leaf comes back to the producer
                    stats.raster += ctx.render(to_helper, producer);
                    handed = true;
                }
                stats.leaves += handed as usize + second.is_some() as usize;
                if (helper_done || helper_gone) && producer.is_exhausted() {
                    break;
                }
            }
            stats.timings.raster = t.elapsed();

            drop(task_tx);
            Ok(())
        })
    }
}

/// Hands `task` to the helper; gives it back when the helper is gone.
fn offer<'a>(tasks: &Sender<Task<'a>>, task: Task<'a>) -> Option<Task<'a>> {
    match tasks.send(task) {
        Ok(()) => None,
        Err(SendError(task)) => {
            log::warn!("frame: helper is gone, the producer takes its work back");
            Some(task)
        }
    }
}

/// Helper side of the dual split: serves tasks until the producer hangs up.
fn assist(
    ctx: &LeafRaster<'_, View>,
    world: &Frustum,
    worker: &mut Worker,
    tasks: Receiver<Task<'_>>,
    replies: Sender<Reply>,
) {
    for task in tasks {
        let reply = match task {
            Task::Cull { mut leaves, boxes } => {
                let culled = cull(&mut leaves, boxes, world);
                Reply::Culled { leaves, culled }
            }
            Task::Raster(leaf) => {
                let stats = ctx.render(&leaf, worker);
                Reply::Rastered {
                    leaf,
                    stats,
                    exhausted: worker.is_exhausted(),
                }
            }
        };
        if replies.send(reply).is_err() {
            break;
        }
    }
}
