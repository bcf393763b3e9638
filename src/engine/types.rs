/// Constants that depend on the *frame-buffer*, not on the level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Screen {
    pub w: i32,
    pub h: i32,
}

impl Screen {
    pub const fn new(w: i32, h: i32) -> Self {
        Self { w, h }
    }

    #[inline(always)]
    pub const fn half_w(&self) -> i32 {
        self.w / 2
    }

    #[inline(always)]
    pub const fn half_h(&self) -> i32 {
        self.h / 2
    }

    #[inline(always)]
    pub const fn last_col(&self) -> i32 {
        self.w - 1
    }

    #[inline(always)]
    pub const fn last_row(&self) -> i32 {
        self.h - 1
    }
}

impl Default for Screen {
    /// The 320×240 target of the column GPU.
    fn default() -> Self {
        Self::new(320, 240)
    }
}

/// Inclusive vertical run of rows produced for one screen column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnSpan {
    pub x: i32,
    pub ys: i32,
    pub ye: i32,
}

impl ColumnSpan {
    /// `false` once clamping flipped the run (polygon entirely above/below).
    #[inline(always)]
    pub fn is_drawable(&self) -> bool {
        self.ys <= self.ye
    }
}
