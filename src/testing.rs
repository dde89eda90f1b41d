//! Shared fakes for the unit tests: a scripted sampling engine and an
//! emitter pin that records how it was driven.

use core::convert::Infallible;

use arbitrary_int::u7;
use embedded_hal::digital::{ErrorType, OutputPin};

use crate::qtr::{Sample, SensorProgram, CYCLE_DONE, QTR_SENSOR_COUNT, TIMEOUT};

/// A sampling engine that synthesizes FIFO words from per-cycle decay
/// times. A decay of `>= TIMEOUT` (use `u16::MAX`) means the channel never
/// falls. Once the scripted cycles run out, the last one repeats.
pub(crate) struct SequenceProgram {
    cycles: Vec<[u16; QTR_SENSOR_COUNT]>,
    cycle: usize,
    words: Vec<u32>,
    next: usize,
    pub(crate) starts: usize,
}

impl SequenceProgram {
    pub(crate) fn new(cycles: Vec<[u16; QTR_SENSOR_COUNT]>) -> Self {
        assert!(!cycles.is_empty());
        Self {
            cycles,
            cycle: 0,
            words: Vec::new(),
            next: 0,
            starts: 0,
        }
    }

    fn build_words(decays: &[u16; QTR_SENSOR_COUNT]) -> Vec<u32> {
        // One sample per distinct transition time, in order, exactly like
        // the hardware pushing on pin-state changes.
        let mut times: Vec<u16> = decays.iter().copied().filter(|&t| t < TIMEOUT).collect();
        times.sort_unstable();
        times.dedup();

        let mut words = Vec::new();
        for &t in &times {
            let mut levels: u8 = 0x7F;
            for (i, &decay) in decays.iter().enumerate() {
                if decay <= t {
                    levels &= !(1 << i);
                }
            }
            words.push(
                Sample::new_with_raw_value(0)
                    .with_levels(u7::new(levels))
                    .with_ticks(t)
                    .raw_value(),
            );
        }
        words.push(CYCLE_DONE);
        words
    }
}

impl SensorProgram for SequenceProgram {
    type Error = Infallible;

    fn start(&mut self) -> Result<(), Self::Error> {
        let decays = self.cycles[self.cycle.min(self.cycles.len() - 1)];
        self.cycle += 1;
        self.words = Self::build_words(&decays);
        self.next = 0;
        self.starts += 1;
        Ok(())
    }

    fn pull(&mut self) -> Result<u32, Self::Error> {
        let word = self.words.get(self.next).copied().unwrap_or(CYCLE_DONE);
        self.next += 1;
        Ok(word)
    }
}

/// An output pin that records its level and how often it was driven high.
pub(crate) struct FakePin {
    pub(crate) is_high: bool,
    pub(crate) highs: usize,
}

impl FakePin {
    pub(crate) fn new() -> Self {
        Self {
            is_high: false,
            highs: 0,
        }
    }
}

impl ErrorType for FakePin {
    type Error = Infallible;
}

impl OutputPin for FakePin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.is_high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.is_high = true;
        self.highs += 1;
        Ok(())
    }
}
