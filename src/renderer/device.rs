//! ---------------------------------------------------------------------------
//! Column device seam
//!
//! * [`ColumnDevice`] – anything that accepts commands and reports status.
//! * [`CommandStream`] – busy-waits on the FIFO bit before every write and on
//!   the frame bit before a new frame touches shared state.
//! * [`Recorder`] – simulated FIFO that keeps every command, for tests and
//!   the demo binary.
//! * [`MmioDevice`] – the real register pair.
//! ---------------------------------------------------------------------------

use bitflags::bitflags;
use std::ptr;

use crate::renderer::{Command, Decoded};

bitflags! {
    /// Device status word.
    #[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Status: u32 {
        /// The command FIFO has room for one more command.
        const COL_READY   = 1 << 0;
        /// Every command of the previous frame has been drawn.
        const FRAME_DRAWN = 1 << 2;
    }
}

pub trait ColumnDevice {
    /// Reads the status word. Polling is how the device makes progress, so
    /// this takes `&mut self`.
    fn status(&mut self) -> Status;
    fn write(&mut self, cmd: Command);
}

impl<D: ColumnDevice + ?Sized> ColumnDevice for &mut D {
    fn status(&mut self) -> Status {
        (**self).status()
    }

    fn write(&mut self, cmd: Command) {
        (**self).write(cmd)
    }
}

/*──────────────────────── Backpressure stream ────────────────────────*/

/// Writes commands while honouring the device's FIFO bit.
#[derive(Debug)]
pub struct CommandStream<D> {
    device: D,
    sent: usize,
    stalls: usize,
}

impl<D: ColumnDevice> CommandStream<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            sent: 0,
            stalls: 0,
        }
    }

    /// Spins until the FIFO accepts a command.
    #[inline]
    pub fn col_process(&mut self) {
        while !self.device.status().contains(Status::COL_READY) {
            self.stalls += 1;
            std::hint::spin_loop();
        }
    }

    #[inline]
    pub fn send(&mut self, cmd: Command) {
        self.col_process();
        self.device.write(cmd);
        self.sent += 1;
    }

    pub fn end_column(&mut self) {
        self.send(Command::END_OF_COLUMN);
    }

    /// Spins until the previous frame is fully drawn.
    pub fn wait_all_drawn(&mut self) {
        while !self.device.status().contains(Status::FRAME_DRAWN) {
            self.stalls += 1;
            std::hint::spin_loop();
        }
    }

    /// Commands written since creation.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Status polls that found the device busy.
    pub fn stalls(&self) -> usize {
        self.stalls
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_inner(self) -> D {
        self.device
    }
}

/*──────────────────────────── Simulation ─────────────────────────────*/

/// Simulated device: a FIFO of `depth` commands that drains one command per
/// status poll, plus a log of everything ever written.
#[derive(Clone, Debug)]
pub struct Recorder {
    depth: usize,
    queued: usize,
    overflows: usize,
    log: Vec<Command>,
}

impl Recorder {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            queued: 0,
            overflows: 0,
            log: Vec::new(),
        }
    }

    pub fn commands(&self) -> &[Command] {
        &self.log
    }

    /// Writes that arrived while the FIFO was full.
    pub fn overflows(&self) -> usize {
        self.overflows
    }

    pub fn clear(&mut self) {
        self.log.clear();
        self.queued = 0;
        self.overflows = 0;
    }

    /// Decoded commands split at every end-of-column marker (markers
    /// excluded). A trailing unterminated column is dropped.
    pub fn columns(&self) -> Vec<Vec<Decoded>> {
        let mut out = Vec::new();
        let mut cur = Vec::new();
        for cmd in &self.log {
            match cmd.decode() {
                Decoded::EndOfColumn => out.push(std::mem::take(&mut cur)),
                d => cur.push(d),
            }
        }
        out
    }
}

impl Default for Recorder {
    /// FIFO depth of the hardware.
    fn default() -> Self {
        Self::new(16)
    }
}

impl ColumnDevice for Recorder {
    fn status(&mut self) -> Status {
        self.queued = self.queued.saturating_sub(1);
        let mut s = Status::empty();
        if self.queued < self.depth {
            s |= Status::COL_READY;
        }
        if self.queued == 0 {
            s |= Status::FRAME_DRAWN;
        }
        s
    }

    fn write(&mut self, cmd: Command) {
        if self.queued >= self.depth {
            log::warn!("recorder: write with a full FIFO ({} queued)", self.queued);
            self.overflows += 1;
        }
        self.queued += 1;
        self.log.push(cmd);
    }
}

/*──────────────────────────── Hardware ───────────────────────────────*/

/// The memory-mapped command registers.
#[derive(Debug)]
pub struct MmioDevice {
    word0: *mut u32,
    word1: *mut u32,
    status: *const u32,
}

impl MmioDevice {
    /// Offset of the register receiving `word0`.
    pub const COLDRAW0: usize = 0x40014;
    /// Offset of the register receiving `word1`; writing it queues the
    /// command.
    pub const COLDRAW1: usize = 0x40010;

    /// # Safety
    /// `base + COLDRAW0`, `base + COLDRAW1` and `status` must be valid,
    /// aligned device registers for as long as the value lives.
    pub unsafe fn new(base: *mut u8, status: *const u32) -> Self {
        // SAFETY: offsets stay inside the register window promised by the caller.
        unsafe {
            Self {
                word0: base.add(Self::COLDRAW0).cast(),
                word1: base.add(Self::COLDRAW1).cast(),
                status,
            }
        }
    }
}

impl ColumnDevice for MmioDevice {
    fn status(&mut self) -> Status {
        // SAFETY: see `MmioDevice::new`.
        Status::from_bits_truncate(unsafe { ptr::read_volatile(self.status) })
    }

    fn write(&mut self, cmd: Command) {
        // SAFETY: see `MmioDevice::new`; word1 goes last since it queues.
        unsafe {
            ptr::write_volatile(self.word0, cmd.word0);
            ptr::write_volatile(self.word1, cmd.word1);
        }
    }
}
