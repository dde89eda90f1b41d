//! Wheel encoder counts.
//!
//! The quadrature decoding itself happens in a hardware counting
//! peripheral (PIO plus DMA on the robot), abstracted here as
//! [`QuadratureCounter`]. This layer adds direction flipping and the
//! read-and-reset bookkeeping applications use to take deltas without
//! worrying about overflow.

/// The background counting peripheral monitoring both encoders.
pub trait QuadratureCounter {
    type Error;

    /// Current free-running `(left, right)` counts. The counts wrap around
    /// on 32-bit overflow.
    fn counts(&mut self) -> Result<(i32, i32), Self::Error>;
}

/// Reads counts from the encoders on the two drive wheels.
///
/// Counts start at 0 and increase with forward motion. On overflow they
/// wrap, so poll [`counts_and_reset_left`](Self::counts_and_reset_left) /
/// `_right` often enough if absolute totals matter.
pub struct Encoders<C> {
    counter: C,
    flip: bool,
    left_offset: i32,
    right_offset: i32,
}

impl<C: QuadratureCounter> Encoders<C> {
    pub fn new(counter: C) -> Self {
        Self {
            counter,
            flip: false,
            left_offset: 0,
            right_offset: 0,
        }
    }

    /// Flips the counting direction of both encoders, for gearboxes that
    /// reverse the wheel rotation relative to the standard robot.
    pub fn flip_encoders(&mut self, flip: bool) {
        self.flip = flip;
    }

    /// Counts detected from the left encoder since the last reset.
    pub fn counts_left(&mut self) -> Result<i32, C::Error> {
        let (left, _) = self.raw_counts()?;
        Ok(left.wrapping_sub(self.left_offset))
    }

    /// Counts detected from the right encoder since the last reset.
    pub fn counts_right(&mut self) -> Result<i32, C::Error> {
        let (_, right) = self.raw_counts()?;
        Ok(right.wrapping_sub(self.right_offset))
    }

    /// Like [`counts_left`](Self::counts_left), but also zeroes the count.
    pub fn counts_and_reset_left(&mut self) -> Result<i32, C::Error> {
        let (left, _) = self.raw_counts()?;
        let delta = left.wrapping_sub(self.left_offset);
        self.left_offset = left;
        Ok(delta)
    }

    /// Like [`counts_right`](Self::counts_right), but also zeroes the
    /// count.
    pub fn counts_and_reset_right(&mut self) -> Result<i32, C::Error> {
        let (_, right) = self.raw_counts()?;
        let delta = right.wrapping_sub(self.right_offset);
        self.right_offset = right;
        Ok(delta)
    }

    fn raw_counts(&mut self) -> Result<(i32, i32), C::Error> {
        let (left, right) = self.counter.counts()?;
        if self.flip {
            Ok((left.wrapping_neg(), right.wrapping_neg()))
        } else {
            Ok((left, right))
        }
    }
}
