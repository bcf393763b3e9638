//! ----------------------------------------------------------------------------
//! **Span arena**
//!
//! One preallocated array of span records shared by two workers. The
//! producer allocates upward from the front, the helper downward from the
//! back; the two cursors live in a single atomic word, so a reservation is one
//! compare-and-swap and the workers can never hand out the same slot. When
//! the cursors would cross, the pool is full and the requesting worker stops
//! inserting for the rest of the frame.
//!
//! Every worker owns its own per-column list heads ([`ColumnHeads`]); slot
//! `0` is the list terminator and never allocated.
//! ----------------------------------------------------------------------------

use std::{
    ops::Range,
    sync::atomic::{AtomicU64, Ordering},
};

/// Null link / empty column.
pub const NO_SPAN: u16 = 0;

/// Which end of a shared pool a worker allocates from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum End {
    Front,
    Back,
}

/*──────────────────────── Two-ended allocator ─────────────────────────*/

/// Two cursors converging inside `[lo, hi)`; front grows up, back grows down.
#[derive(Debug)]
pub struct TwoEnded {
    cursors: AtomicU64,
    lo: u32,
    hi: u32,
}

impl TwoEnded {
    pub fn new(lo: u32, hi: u32) -> Self {
        Self {
            cursors: AtomicU64::new(pack(lo, hi)),
            lo,
            hi: hi.max(lo),
        }
    }

    pub fn reset(&mut self) {
        *self.cursors.get_mut() = pack(self.lo, self.hi);
    }

    /// Reserves `n` consecutive indices from `end`, or `None` once the two
    /// cursors would cross.
    pub fn reserve(&self, end: End, n: u32) -> Option<Range<u32>> {
        let mut cur = self.cursors.load(Ordering::Relaxed);
        loop {
            let (front, back) = unpack(cur);
            if back - front < n {
                return None;
            }
            let (next, range) = match end {
                End::Front => (pack(front + n, back), front..front + n),
                End::Back => (pack(front, back - n), back - n..back),
            };
            match self
                .cursors
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Some(range),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Indices handed out so far from both ends.
    pub fn used(&self) -> usize {
        let (front, back) = unpack(self.cursors.load(Ordering::Acquire));
        ((front - self.lo) + (self.hi - back)) as usize
    }

    pub fn capacity(&self) -> usize {
        (self.hi - self.lo) as usize
    }
}

#[inline(always)]
fn pack(front: u32, back: u32) -> u64 {
    front as u64 | (back as u64) << 32
}

#[inline(always)]
fn unpack(v: u64) -> (u32, u32) {
    (v as u32, (v >> 32) as u32)
}

/*──────────────────────────── Span records ────────────────────────────*/

/// Rows `[ys, ye]` of one column covered by raster face `face`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub ys: u16,
    pub ye: u16,
    pub face: u16,
}

impl Span {
    #[inline(always)]
    fn pack(self, next: u16) -> u64 {
        self.ys as u64 | (self.ye as u64) << 16 | (self.face as u64) << 32 | (next as u64) << 48
    }

    #[inline(always)]
    fn unpack(v: u64) -> (Self, u16) {
        let span = Self {
            ys: v as u16,
            ye: (v >> 16) as u16,
            face: (v >> 32) as u16,
        };
        (span, (v >> 48) as u16)
    }
}

/// Span records of one frame; each slot is written once by the worker that
/// reserved it.
#[derive(Debug)]
pub struct SpanArena {
    slots: Vec<AtomicU64>,
    alloc: TwoEnded,
}

impl SpanArena {
    /// `capacity` usable records (at most `u16::MAX`, slot 0 excluded).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(u16::MAX as usize);
        let slots = (0..=capacity).map(|_| AtomicU64::new(0)).collect();
        Self {
            slots,
            alloc: TwoEnded::new(1, capacity as u32 + 1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.alloc.capacity()
    }

    /// Records allocated this frame.
    pub fn len(&self) -> usize {
        self.alloc.used()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts a new frame. Slots are not cleared; they are unreachable until
    /// re-linked.
    pub fn reset(&mut self) {
        self.alloc.reset();
    }

    #[inline]
    fn write(&self, slot: u16, span: Span, next: u16) {
        self.slots[slot as usize].store(span.pack(next), Ordering::Relaxed);
    }

    #[inline]
    fn read(&self, slot: u16) -> (Span, u16) {
        Span::unpack(self.slots[slot as usize].load(Ordering::Relaxed))
    }

    /// Walks the list starting at `head`, most recently inserted first.
    pub fn list(&self, head: u16) -> SpanIter<'_> {
        SpanIter { arena: self, at: head }
    }
}

pub struct SpanIter<'a> {
    arena: &'a SpanArena,
    at: u16,
}

impl Iterator for SpanIter<'_> {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        if self.at == NO_SPAN {
            return None;
        }
        let (span, next) = self.arena.read(self.at);
        self.at = next;
        Some(span)
    }
}

/*──────────────────────────── Column heads ────────────────────────────*/

/// Slots reserved ahead of a polygon's columns.
#[derive(Debug)]
pub struct SpanRun {
    slots: Range<u32>,
    end: End,
}

impl SpanRun {
    fn take(&mut self) -> Option<u16> {
        let slot = match self.end {
            End::Front => self.slots.next(),
            End::Back => self.slots.next_back(),
        };
        slot.map(|s| s as u16)
    }
}

/// One worker's per-column list heads into the shared [`SpanArena`].
#[derive(Clone, Debug)]
pub struct ColumnHeads {
    end: End,
    heads: Vec<u16>,
    exhausted: bool,
}

impl ColumnHeads {
    pub fn new(end: End, columns: usize) -> Self {
        Self {
            end,
            heads: vec![NO_SPAN; columns],
            exhausted: false,
        }
    }

    pub fn end(&self) -> End {
        self.end
    }

    pub fn reset(&mut self) {
        self.heads.fill(NO_SPAN);
        self.exhausted = false;
    }

    /// `true` once a reservation failed this frame.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    #[inline(always)]
    pub fn head(&self, x: usize) -> u16 {
        self.heads.get(x).copied().unwrap_or(NO_SPAN)
    }

    /// Reserves `n` slots for the columns of one polygon. After the first
    /// failure every later call fails too.
    pub fn reserve(&mut self, arena: &SpanArena, n: usize) -> Option<SpanRun> {
        if self.exhausted {
            return None;
        }
        match arena.alloc.reserve(self.end, n as u32) {
            Some(slots) => Some(SpanRun { slots, end: self.end }),
            None => {
                log::debug!(
                    "spans: pool full ({} / {}), {:?} worker stops inserting",
                    arena.len(),
                    arena.capacity(),
                    self.end
                );
                self.exhausted = true;
                None
            }
        }
    }

    /// Prepends `span` to column `x` using the next slot of `run`.
    pub fn insert(&mut self, arena: &SpanArena, run: &mut SpanRun, x: usize, span: Span) -> bool {
        let Some(head) = self.heads.get_mut(x) else {
            return false;
        };
        let Some(slot) = run.take() else {
            return false;
        };
        arena.write(slot, span, *head);
        *head = slot;
        true
    }

    /// Single-span insertion.
    pub fn push(&mut self, arena: &SpanArena, x: usize, span: Span) -> bool {
        match self.reserve(arena, 1) {
            Some(mut run) => self.insert(arena, &mut run, x, span),
            None => false,
        }
    }

    /// Spans of column `x`, most recent first.
    pub fn column<'a>(&self, arena: &'a SpanArena, x: usize) -> SpanIter<'a> {
        arena.list(self.head(x))
    }
}
