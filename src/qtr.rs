//! Shared acquisition driver for the seven QTR reflectance sensors.
//!
//! The QTR sensors are RC-discharge devices: charge a small capacitor by
//! driving the sensor pin high, release the pin to an input, and measure
//! how long the pin takes to fall back low. A dark surface (or a pressed
//! bumper) reflects little IR, so the discharge is slow and the measured
//! time is large.
//!
//! All seven sensors share one sampling engine because they live on one
//! contiguous pin bank. The engine is abstracted as [`SensorProgram`]: on
//! the robot it is a PIO state machine that charges the bank, flips it to
//! input and then pushes one packed [`Sample`] word per observed change,
//! finishing with [`CYCLE_DONE`]. [`QtrSensors`] drives the engine and
//! reduces the word stream to one elapsed time per channel.

use core::cell::RefCell;

use arbitrary_int::{u7, Number};
use bitbybit::bitfield;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Number of bump sensor channels.
pub const BUMP_SENSOR_COUNT: usize = 2;
/// Number of line sensor channels.
pub const LINE_SENSOR_COUNT: usize = 5;
/// Total channels sampled per acquisition cycle.
pub const QTR_SENSOR_COUNT: usize = BUMP_SENSOR_COUNT + LINE_SENSOR_COUNT;

/// Elapsed-time saturation value, in sampling-clock ticks.
///
/// A channel whose pin never falls within this budget reads as exactly
/// `TIMEOUT`. The sampling clock runs at 8 MHz on the robot, so one tick
/// is 0.125 µs and a full timeout is 128 µs.
pub const TIMEOUT: u16 = 1024;

/// Sentinel word pushed by the sampling engine when a cycle has run out
/// of time budget. It cannot collide with a real [`Sample`]: bits 23..=31
/// of a sample word are always zero.
pub const CYCLE_DONE: u32 = 0xFFFF_FFFF;

/// One FIFO word from the sampling engine.
///
/// `levels` holds the current logic level of every channel (bit n =
/// channel n, in pin-bank order) and `ticks` the elapsed sampling-clock
/// ticks since the pins were released.
#[bitfield(u32, default = 0)]
#[derive(Debug)]
pub struct Sample {
    #[bits(0..=15, rw)]
    pub ticks: u16,
    #[bits(16..=22, rw)]
    pub levels: u7,
}

/// The programmable-I/O sampling engine behind the QTR sensors.
///
/// Channel order follows the pin bank (GPIO16..22 on the robot): channel 0
/// is the right bumper, channel 1 the left bumper, channels 2..=6 the line
/// sensors from rightmost to leftmost. The sensor layers apply the
/// canonical left-to-right reordering on top.
pub trait SensorProgram {
    type Error;

    /// Arms one charge/release/sample cycle.
    ///
    /// Drives the whole pin bank high for the fixed charge interval, then
    /// releases it to inputs and starts pushing [`Sample`] words.
    fn start(&mut self) -> Result<(), Self::Error>;

    /// Blocks until the next raw FIFO word is available.
    ///
    /// Returns either a packed [`Sample`] or [`CYCLE_DONE`] once the cycle
    /// has completed.
    fn pull(&mut self) -> Result<u32, Self::Error>;
}

/// Raw elapsed times from one acquisition cycle, in pin-bank channel order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QtrReadings {
    pub raw: [u16; QTR_SENSOR_COUNT],
}

impl QtrReadings {
    /// The two bumper channels: `[right, left]` in pin-bank order.
    pub fn bumpers(&self) -> [u16; BUMP_SENSOR_COUNT] {
        [self.raw[0], self.raw[1]]
    }

    /// The five line channels, rightmost sensor first (pin-bank order).
    pub fn line(&self) -> [u16; LINE_SENSOR_COUNT] {
        let mut vals = [0; LINE_SENSOR_COUNT];
        vals.copy_from_slice(&self.raw[BUMP_SENSOR_COUNT..]);
        vals
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Reading,
}

/// Driver for the shared QTR sampling engine.
///
/// Exactly one reading cycle is in flight at a time; [`read`](Self::read)
/// runs a cycle to completion before returning. Wrap the driver with
/// [`into_shared`](Self::into_shared) to hand it to both the line and bump
/// sensor layers.
pub struct QtrSensors<P> {
    program: P,
    state: State,
}

impl<P: SensorProgram> QtrSensors<P> {
    pub fn new(program: P) -> Self {
        Self {
            program,
            state: State::Idle,
        }
    }

    /// Wraps the driver for shared use by the line and bump sensor layers.
    pub fn into_shared<M: RawMutex>(self) -> SharedQtr<M, P> {
        Mutex::new(RefCell::new(self))
    }

    /// Releases the underlying sampling engine.
    pub fn free(self) -> P {
        self.program
    }

    /// Arms a new reading cycle. Does nothing if one is already running.
    pub fn start_read(&mut self) -> Result<(), P::Error> {
        if self.state == State::Reading {
            return Ok(());
        }
        self.program.start()?;
        self.state = State::Reading;
        Ok(())
    }

    /// Runs one acquisition cycle to completion.
    ///
    /// Each channel records the elapsed time at its first observed
    /// high-to-low transition, capped at [`TIMEOUT`]; channels that never
    /// fall stay at `TIMEOUT`. Transitions back up and any later falls
    /// within the same cycle are ignored.
    pub fn read(&mut self) -> Result<QtrReadings, P::Error> {
        self.start_read()?;

        let mut readings = QtrReadings {
            raw: [TIMEOUT; QTR_SENSOR_COUNT],
        };
        // All pins start high after the charge interval.
        let mut last_levels = u7::MAX.value();
        let mut resolved: u8 = 0;

        loop {
            // On a pull failure the cycle is abandoned; go back to Idle so
            // the next read can arm a fresh one.
            let word = match self.program.pull() {
                Ok(word) => word,
                Err(e) => {
                    self.state = State::Idle;
                    return Err(e);
                }
            };
            if word == CYCLE_DONE {
                break;
            }
            let sample = Sample::new_with_raw_value(word);
            let levels = sample.levels().value();
            let ticks = sample.ticks().min(TIMEOUT);

            // Only falling edges count, and only the first one per channel.
            let fell = last_levels & !levels & !resolved;
            for (i, value) in readings.raw.iter_mut().enumerate() {
                if fell & (1 << i) != 0 {
                    *value = ticks;
                }
            }
            resolved |= fell;
            last_levels = levels;
        }

        self.state = State::Idle;
        trace!("qtr cycle done, resolved mask {:?}", resolved);
        Ok(readings)
    }
}

/// A [`QtrSensors`] driver shared between the line and bump sensor layers.
///
/// The same shape embassy uses for buses shared between device drivers: a
/// blocking mutex around a `RefCell`, with the `RawMutex` flavor chosen by
/// the application (`NoopRawMutex` single-threaded,
/// `CriticalSectionRawMutex` if the layers live in different contexts).
pub type SharedQtr<M, P> = Mutex<M, RefCell<QtrSensors<P>>>;

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted engine: replays a fixed list of FIFO words per cycle.
    struct Script {
        words: Vec<u32>,
        next: usize,
        starts: usize,
    }

    impl Script {
        fn new(words: Vec<u32>) -> Self {
            Self {
                words,
                next: 0,
                starts: 0,
            }
        }
    }

    impl SensorProgram for Script {
        type Error = core::convert::Infallible;

        fn start(&mut self) -> Result<(), Self::Error> {
            self.starts += 1;
            self.next = 0;
            Ok(())
        }

        fn pull(&mut self) -> Result<u32, Self::Error> {
            let word = self.words.get(self.next).copied().unwrap_or(CYCLE_DONE);
            self.next += 1;
            Ok(word)
        }
    }

    fn word(levels: u8, ticks: u16) -> u32 {
        Sample::new_with_raw_value(0)
            .with_levels(u7::new(levels))
            .with_ticks(ticks)
            .raw_value()
    }

    #[test]
    fn all_channels_time_out_without_transitions() {
        let mut qtr = QtrSensors::new(Script::new(vec![]));
        let readings = qtr.read().unwrap();
        assert_eq!(readings.raw, [TIMEOUT; QTR_SENSOR_COUNT]);
    }

    #[test]
    fn records_first_falling_edge_per_channel() {
        // Channel 0 falls at 10, channel 3 at 500, the rest never fall.
        let script = Script::new(vec![
            word(0b111_1110, 10),
            word(0b111_0110, 500),
            CYCLE_DONE,
        ]);
        let mut qtr = QtrSensors::new(script);
        let readings = qtr.read().unwrap();
        assert_eq!(readings.raw[0], 10);
        assert_eq!(readings.raw[3], 500);
        for i in [1, 2, 4, 5, 6] {
            assert_eq!(readings.raw[i], TIMEOUT);
        }
    }

    #[test]
    fn later_edges_do_not_overwrite_the_first() {
        // Channel 2 falls at 50, bounces back high, falls again at 700.
        let script = Script::new(vec![
            word(0b111_1011, 50),
            word(0b111_1111, 60),
            word(0b111_1011, 700),
            CYCLE_DONE,
        ]);
        let mut qtr = QtrSensors::new(script);
        let readings = qtr.read().unwrap();
        assert_eq!(readings.raw[2], 50);
    }

    #[test]
    fn fall_on_the_first_sample_records() {
        // Pins start high after the charge interval, so a first sample with
        // every level low is a fall for all seven channels.
        let script = Script::new(vec![word(0b000_0000, 3), CYCLE_DONE]);
        let mut qtr = QtrSensors::new(script);
        let readings = qtr.read().unwrap();
        assert_eq!(readings.raw, [3; QTR_SENSOR_COUNT]);
    }

    #[test]
    fn elapsed_time_is_capped_at_timeout() {
        let script = Script::new(vec![word(0b111_1110, 5000), CYCLE_DONE]);
        let mut qtr = QtrSensors::new(script);
        let readings = qtr.read().unwrap();
        assert_eq!(readings.raw[0], TIMEOUT);
    }

    #[test]
    fn start_read_is_idempotent_while_reading() {
        let mut qtr = QtrSensors::new(Script::new(vec![]));
        qtr.start_read().unwrap();
        qtr.start_read().unwrap();
        assert_eq!(qtr.program.starts, 1);

        // read() completes the cycle without re-arming...
        let _ = qtr.read().unwrap();
        assert_eq!(qtr.program.starts, 1);

        // ...and the next read arms a fresh one.
        let _ = qtr.read().unwrap();
        assert_eq!(qtr.program.starts, 2);
    }

    /// Engine whose pull fails a scripted number of times, then behaves.
    struct Flaky {
        failures: usize,
        starts: usize,
    }

    impl SensorProgram for Flaky {
        type Error = ();

        fn start(&mut self) -> Result<(), Self::Error> {
            self.starts += 1;
            Ok(())
        }

        fn pull(&mut self) -> Result<u32, Self::Error> {
            if self.failures > 0 {
                self.failures -= 1;
                Err(())
            } else {
                Ok(CYCLE_DONE)
            }
        }
    }

    #[test]
    fn failed_cycle_can_be_rearmed() {
        let mut qtr = QtrSensors::new(Flaky {
            failures: 1,
            starts: 0,
        });
        assert!(qtr.read().is_err());

        // The failed cycle must not leave the driver wedged: the next read
        // arms a fresh cycle and completes.
        let readings = qtr.read().unwrap();
        assert_eq!(readings.raw, [TIMEOUT; QTR_SENSOR_COUNT]);
        assert_eq!(qtr.program.starts, 2);
    }

    #[test]
    fn sample_word_layout_matches_the_fifo_format() {
        let w = word(0x55, 0x1234);
        assert_eq!(w, (0x55 << 16) | 0x1234);
        let s = Sample::new_with_raw_value(w);
        assert_eq!(s.levels().value(), 0x55);
        assert_eq!(s.ticks(), 0x1234);
    }
}
