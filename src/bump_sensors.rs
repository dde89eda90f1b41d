//! The two front bump sensors.
//!
//! The bumpers are the same kind of RC reflectance sensor as the line
//! array, read through the same shared QTR driver: pressing a bumper moves
//! its reflector, the sensed reflectance drops, and the discharge time
//! rises past a calibrated threshold.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal::digital::OutputPin;

use crate::qtr::{SensorProgram, SharedQtr, BUMP_SENSOR_COUNT, TIMEOUT};

/// Bump sensor sides, also the bit positions in [`BumpSensors::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BumpSide {
    Left = 0,
    Right = 1,
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<P, E> {
    /// The sampling engine failed.
    Program(P),
    /// The emitter pin could not be driven.
    Emitter(E),
}

/// Default number of raw reads averaged into the calibration baseline.
pub const CALIBRATION_COUNT: u8 = 50;

/// Default press margin over the baseline, in percent.
const DEFAULT_MARGIN_PERCENTAGE: u16 = 50;

/// Driver for the two bump sensors, layered over the shared QTR driver.
///
/// Call [`calibrate`](Self::calibrate) with the bumpers unpressed before
/// the first [`read`](Self::read).
pub struct BumpSensors<'a, M: RawMutex, P, E> {
    qtr: &'a SharedQtr<M, P>,
    /// Some hardware revisions give the bumpers their own IR emitter pin;
    /// on others the emitter is hardwired and there is nothing to drive.
    emitter: Option<E>,
    /// Margin added to the baseline to form the press threshold, in
    /// percent. Takes effect on the next [`calibrate`](Self::calibrate).
    pub margin_percentage: u16,
    baseline: [u16; BUMP_SENSOR_COUNT],
    threshold: [u16; BUMP_SENSOR_COUNT],
    sensor_values: [u16; BUMP_SENSOR_COUNT],
    pressed: [bool; BUMP_SENSOR_COUNT],
    last: [bool; BUMP_SENSOR_COUNT],
}

impl<'a, M, P, E> BumpSensors<'a, M, P, E>
where
    M: RawMutex,
    P: SensorProgram,
    E: OutputPin,
{
    /// Creates the bump sensor view over the shared QTR driver.
    pub fn new(qtr: &'a SharedQtr<M, P>, emitter: Option<E>) -> Self {
        Self {
            qtr,
            emitter,
            margin_percentage: DEFAULT_MARGIN_PERCENTAGE,
            baseline: [0; BUMP_SENSOR_COUNT],
            threshold: [0; BUMP_SENSOR_COUNT],
            sensor_values: [0; BUMP_SENSOR_COUNT],
            pressed: [false; BUMP_SENSOR_COUNT],
            last: [false; BUMP_SENSOR_COUNT],
        }
    }

    /// Reads the sensors `count` times and derives the press thresholds.
    ///
    /// The baseline is the rounded mean of the readings, and the threshold
    /// is `baseline * (100 + margin_percentage) / 100`, capped at
    /// [`TIMEOUT`] so a sensor that times out always counts as pressed.
    /// The bumpers must not be pressed while this runs.
    ///
    /// A `count` of 0 takes no readings and leaves the current thresholds
    /// in place.
    pub fn calibrate(&mut self, count: u8) -> Result<(), Error<P::Error, E::Error>> {
        if count == 0 {
            return Ok(());
        }
        let mut sum = [0u32; BUMP_SENSOR_COUNT];
        for _ in 0..count {
            self.read_raw()?;
            for s in 0..BUMP_SENSOR_COUNT {
                sum[s] += self.sensor_values[s] as u32;
            }
        }

        for s in 0..BUMP_SENSOR_COUNT {
            self.baseline[s] = ((sum[s] + count as u32 / 2) / count as u32) as u16;
            let threshold =
                self.baseline[s] as u32 * (100 + self.margin_percentage as u32) / 100;
            self.threshold[s] = threshold.min(TIMEOUT as u32) as u16;
        }
        debug!(
            "bump calibration: baseline {:?} threshold {:?}",
            self.baseline, self.threshold
        );
        Ok(())
    }

    /// Reads both bump sensors.
    ///
    /// Returns a bit field: bit 0 ([`BumpSide::Left`]) set if the left
    /// bumper is pressed, bit 1 ([`BumpSide::Right`]) for the right.
    pub fn read(&mut self) -> Result<u8, Error<P::Error, E::Error>> {
        self.read_raw()?;

        let mut bits = 0u8;
        for s in 0..BUMP_SENSOR_COUNT {
            self.last[s] = self.pressed[s];
            self.pressed[s] = self.sensor_values[s] >= self.threshold[s];
            bits |= (self.pressed[s] as u8) << s;
        }
        Ok(bits)
    }

    /// Whether the left bumper was pressed during the most recent read.
    pub fn left_is_pressed(&self) -> bool {
        self.pressed[BumpSide::Left as usize]
    }

    /// Whether the right bumper was pressed during the most recent read.
    pub fn right_is_pressed(&self) -> bool {
        self.pressed[BumpSide::Right as usize]
    }

    /// Whether the left bumper changed state between the two most recent
    /// calls to [`read`](Self::read).
    pub fn left_changed(&self) -> bool {
        self.pressed[BumpSide::Left as usize] ^ self.last[BumpSide::Left as usize]
    }

    /// Whether the right bumper changed state between the two most recent
    /// calls to [`read`](Self::read).
    pub fn right_changed(&self) -> bool {
        self.pressed[BumpSide::Right as usize] ^ self.last[BumpSide::Right as usize]
    }

    /// Baselines from the last calibration, `[left, right]`.
    pub fn baseline(&self) -> [u16; BUMP_SENSOR_COUNT] {
        self.baseline
    }

    /// Press thresholds from the last calibration, `[left, right]`.
    pub fn threshold(&self) -> [u16; BUMP_SENSOR_COUNT] {
        self.threshold
    }

    /// Raw readings from the most recent read, `[left, right]`.
    pub fn sensor_values(&self) -> [u16; BUMP_SENSOR_COUNT] {
        self.sensor_values
    }

    fn read_raw(&mut self) -> Result<(), Error<P::Error, E::Error>> {
        if let Some(emitter) = self.emitter.as_mut() {
            emitter.set_high().map_err(Error::Emitter)?;
        }
        let readings = self.qtr.lock(|qtr| qtr.borrow_mut().read());
        if let Some(emitter) = self.emitter.as_mut() {
            emitter.set_low().map_err(Error::Emitter)?;
        }
        let bank = readings.map_err(Error::Program)?.bumpers();

        // The pin bank has the right bumper on the lower channel; store
        // left-first to match the BumpSide ordering.
        self.sensor_values = [bank[1], bank[0]];
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qtr::{QtrSensors, QTR_SENSOR_COUNT};
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    use crate::testing::{FakePin, SequenceProgram};

    type TestSensors<'a> =
        BumpSensors<'a, NoopRawMutex, SequenceProgram, FakePin>;

    /// A cycle with the given left/right bumper decay times; line channels
    /// time out.
    fn bump_cycle(left: u16, right: u16) -> [u16; QTR_SENSOR_COUNT] {
        let mut raw = [u16::MAX; QTR_SENSOR_COUNT];
        raw[0] = right;
        raw[1] = left;
        raw
    }

    fn shared(cycles: Vec<[u16; QTR_SENSOR_COUNT]>) -> SharedQtr<NoopRawMutex, SequenceProgram> {
        QtrSensors::new(SequenceProgram::new(cycles)).into_shared()
    }

    #[test]
    fn calibrate_averages_to_an_exact_baseline() {
        let qtr = shared(vec![bump_cycle(300, 400)]);
        let mut bumps = TestSensors::new(&qtr, None);
        bumps.calibrate(CALIBRATION_COUNT).unwrap();
        assert_eq!(bumps.baseline(), [300, 400]);
        // Default margin of 50%.
        assert_eq!(bumps.threshold(), [450, 600]);
    }

    #[test]
    fn calibrate_rounds_the_mean() {
        // Two reads of 100 and 101: mean 100.5 rounds up.
        let qtr = shared(vec![bump_cycle(100, 100), bump_cycle(101, 100)]);
        let mut bumps = TestSensors::new(&qtr, None);
        bumps.calibrate(2).unwrap();
        assert_eq!(bumps.baseline(), [101, 100]);
    }

    #[test]
    fn threshold_is_capped_at_timeout() {
        let qtr = shared(vec![bump_cycle(900, 900)]);
        let mut bumps = TestSensors::new(&qtr, None);
        bumps.calibrate(CALIBRATION_COUNT).unwrap();
        assert_eq!(bumps.threshold(), [TIMEOUT, TIMEOUT]);
    }

    #[test]
    fn press_detection_is_exact_at_the_threshold() {
        let qtr = shared(vec![
            bump_cycle(300, 300), // calibration
            bump_cycle(449, 450), // left just below, right at threshold
        ]);
        let mut bumps = TestSensors::new(&qtr, None);
        bumps.calibrate(1).unwrap();
        assert_eq!(bumps.threshold(), [450, 450]);

        let bits = bumps.read().unwrap();
        assert_eq!(bits, 1 << BumpSide::Right as u8);
        assert!(!bumps.left_is_pressed());
        assert!(bumps.right_is_pressed());
    }

    #[test]
    fn timed_out_sensor_reads_as_pressed() {
        let qtr = shared(vec![
            bump_cycle(800, 800),
            bump_cycle(u16::MAX, u16::MAX),
        ]);
        let mut bumps = TestSensors::new(&qtr, None);
        bumps.calibrate(1).unwrap();
        assert_eq!(bumps.read().unwrap(), 0b11);
    }

    #[test]
    fn changed_fires_once_per_transition() {
        let qtr = shared(vec![
            bump_cycle(300, 300), // calibration
            bump_cycle(600, 300), // left pressed
            bump_cycle(600, 300), // still pressed
            bump_cycle(300, 300), // released
        ]);
        let mut bumps = TestSensors::new(&qtr, None);
        bumps.calibrate(1).unwrap();

        bumps.read().unwrap();
        assert!(bumps.left_changed());
        assert!(!bumps.right_changed());

        bumps.read().unwrap();
        assert!(!bumps.left_changed());

        bumps.read().unwrap();
        assert!(bumps.left_changed());
        assert!(!bumps.left_is_pressed());
    }

    #[test]
    fn zero_count_calibration_is_a_no_op() {
        let qtr = shared(vec![bump_cycle(400, 400)]);
        let mut bumps = TestSensors::new(&qtr, None);
        bumps.calibrate(1).unwrap();
        assert_eq!(bumps.threshold(), [600, 600]);

        bumps.calibrate(0).unwrap();
        assert_eq!(bumps.baseline(), [400, 400]);
        assert_eq!(bumps.threshold(), [600, 600]);
    }

    #[test]
    fn margin_change_applies_on_recalibration() {
        let qtr = shared(vec![bump_cycle(400, 400)]);
        let mut bumps = TestSensors::new(&qtr, None);
        bumps.calibrate(1).unwrap();
        assert_eq!(bumps.threshold(), [600, 600]);

        bumps.margin_percentage = 100;
        assert_eq!(bumps.threshold(), [600, 600]);
        bumps.calibrate(1).unwrap();
        assert_eq!(bumps.threshold(), [800, 800]);
    }

    #[test]
    fn emitter_is_pulsed_around_each_raw_read() {
        let qtr = shared(vec![bump_cycle(300, 300)]);
        let mut bumps = TestSensors::new(&qtr, Some(FakePin::new()));
        bumps.calibrate(5).unwrap();
        let emitter = bumps.emitter.as_ref().unwrap();
        assert_eq!(emitter.highs, 5);
        assert!(!emitter.is_high);
    }
}
