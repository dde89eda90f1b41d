//! The five downward-facing reflectance sensors used for line following.
//!
//! Readings come from the shared QTR acquisition driver; this layer adds
//! emitter control, per-channel min/max calibration (kept separately for
//! emitters-on and emitters-off readings), normalization to 0..=1000 and a
//! weighted-average line position estimate with lost-line hysteresis.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal::digital::OutputPin;

use crate::qtr::{SensorProgram, SharedQtr, LINE_SENSOR_COUNT, TIMEOUT};

/// Emitter behavior while taking a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadMode {
    /// Read with the IR emitters off: a measure of ambient light.
    Off,
    /// Read with the IR emitters on: a measure of reflectance.
    On,
    /// Leave the emitters alone; the caller controls them. Calibration and
    /// calibrated reads are not supported in this mode.
    Manual,
}

/// Raw or calibrated values for the five line sensors, leftmost first.
pub type LineReadings = [u16; LINE_SENSOR_COUNT];

/// Per-channel reflectance bounds learned by [`LineSensors::calibrate`].
///
/// The fields are public so applications can persist them and restore them
/// at startup instead of recalibrating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationData {
    /// Lowest reading seen per channel.
    pub minimum: LineReadings,
    /// Highest reading seen per channel.
    pub maximum: LineReadings,
    /// Whether a calibration pass has populated this set.
    pub initialized: bool,
}

impl CalibrationData {
    /// Sentinel extremes: the first real sample is guaranteed to lower the
    /// minimum and raise the maximum.
    pub const fn new() -> Self {
        Self {
            minimum: [TIMEOUT; LINE_SENSOR_COUNT],
            maximum: [0; LINE_SENSOR_COUNT],
            initialized: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for CalibrationData {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<P, E> {
    /// The sampling engine failed.
    Program(P),
    /// The emitter pin could not be driven.
    Emitter(E),
    /// A calibrated read was requested before [`LineSensors::calibrate`]
    /// ran for the requested emitter mode.
    NotCalibrated,
    /// [`ReadMode::Manual`] was passed to an operation that needs to own
    /// the emitter state.
    ManualNotSupported,
}

/// Driver for the five line sensors, layered over the shared QTR driver.
///
/// `read*` results are ordered left to right: index 0 is the physically
/// leftmost sensor and a line position of 0 means the line is under it.
pub struct LineSensors<'a, M: RawMutex, P, E> {
    qtr: &'a SharedQtr<M, P>,
    emitter: E,
    /// Bounds learned with the emitters on.
    pub calibration_on: CalibrationData,
    /// Bounds learned with the emitters off.
    pub calibration_off: CalibrationData,
    last_position: u16,
}

/// Number of raw reads folded into the running bounds per calibrate call.
const CALIBRATION_BATCH: usize = 10;
/// Calibrated values at or below this are treated as noise and do not
/// contribute to the position average.
const NOISE_THRESHOLD: u16 = 50;
/// At least one channel must exceed this for the line to count as seen.
const LINE_THRESHOLD: u16 = 200;
/// Largest position value: line under the rightmost sensor.
const MAX_POSITION: u16 = (LINE_SENSOR_COUNT as u16 - 1) * 1000;

impl<'a, M, P, E> LineSensors<'a, M, P, E>
where
    M: RawMutex,
    P: SensorProgram,
    E: OutputPin,
{
    /// Creates the line sensor view over the shared QTR driver.
    ///
    /// `emitter` is the pin controlling the downward-facing IR emitters;
    /// it is driven low (emitters off) to start.
    pub fn new(qtr: &'a SharedQtr<M, P>, mut emitter: E) -> Result<Self, Error<P::Error, E::Error>> {
        emitter.set_low().map_err(Error::Emitter)?;
        Ok(Self {
            qtr,
            emitter,
            calibration_on: CalibrationData::new(),
            calibration_off: CalibrationData::new(),
            last_position: 0,
        })
    }

    /// The saturation value for raw readings, in sampling-clock ticks.
    pub fn timeout(&self) -> u16 {
        TIMEOUT
    }

    /// Turns the IR emitters on.
    pub fn emitters_on(&mut self) -> Result<(), Error<P::Error, E::Error>> {
        self.emitter.set_high().map_err(Error::Emitter)
    }

    /// Turns the IR emitters off.
    pub fn emitters_off(&mut self) -> Result<(), Error<P::Error, E::Error>> {
        self.emitter.set_low().map_err(Error::Emitter)
    }

    /// Discards all calibration for both emitter modes.
    pub fn reset_calibration(&mut self) {
        self.calibration_on.reset();
        self.calibration_off.reset();
    }

    /// Reads the raw sensor values, handling the emitters per `mode`.
    ///
    /// Values are elapsed discharge times in 0..=[`TIMEOUT`]; higher means
    /// less reflectance (darker surface). Index 0 is the leftmost sensor.
    pub fn read(&mut self, mode: ReadMode) -> Result<LineReadings, Error<P::Error, E::Error>> {
        match mode {
            ReadMode::Off => {
                self.emitters_off()?;
                self.read_raw()
            }
            ReadMode::Manual => self.read_raw(),
            ReadMode::On => {
                self.emitters_on()?;
                let values = self.read_raw();
                self.emitters_off()?;
                values
            }
        }
    }

    /// Runs a ten-read calibration pass for the given emitter mode.
    ///
    /// The pass tracks the minimum and maximum seen per channel within the
    /// batch and only then folds them into the running bounds: the stored
    /// maximum rises only if even the batch *minimum* was above it, and the
    /// stored minimum drops only if even the batch *maximum* was below it.
    /// A lone outlier sample can therefore never move a bound.
    pub fn calibrate(&mut self, mode: ReadMode) -> Result<(), Error<P::Error, E::Error>> {
        if mode == ReadMode::Manual {
            return Err(Error::ManualNotSupported);
        }
        let mut batch_min = [0u16; LINE_SENSOR_COUNT];
        let mut batch_max = [0u16; LINE_SENSOR_COUNT];

        for j in 0..CALIBRATION_BATCH {
            let values = self.read(mode)?;
            for i in 0..LINE_SENSOR_COUNT {
                if j == 0 || values[i] > batch_max[i] {
                    batch_max[i] = values[i];
                }
                if j == 0 || values[i] < batch_min[i] {
                    batch_min[i] = values[i];
                }
            }
        }

        let calibration = match mode {
            ReadMode::On => &mut self.calibration_on,
            _ => &mut self.calibration_off,
        };
        for i in 0..LINE_SENSOR_COUNT {
            if batch_min[i] > calibration.maximum[i] {
                calibration.maximum[i] = batch_min[i];
            }
            if batch_max[i] < calibration.minimum[i] {
                calibration.minimum[i] = batch_max[i];
            }
        }
        calibration.initialized = true;
        debug!(
            "line calibration updated, min {:?} max {:?}",
            calibration.minimum, calibration.maximum
        );
        Ok(())
    }

    /// Reads the sensors and normalizes each channel against the stored
    /// bounds for `mode`: 0 at the calibrated minimum, 1000 at the maximum.
    pub fn read_calibrated(
        &mut self,
        mode: ReadMode,
    ) -> Result<LineReadings, Error<P::Error, E::Error>> {
        let calibration = match mode {
            ReadMode::On => &self.calibration_on,
            ReadMode::Off => &self.calibration_off,
            ReadMode::Manual => return Err(Error::ManualNotSupported),
        };
        if !calibration.initialized {
            return Err(Error::NotCalibrated);
        }
        let (minimum, maximum) = (calibration.minimum, calibration.maximum);

        let raw = self.read(mode)?;
        let mut values = [0u16; LINE_SENSOR_COUNT];
        for i in 0..LINE_SENSOR_COUNT {
            let denominator = maximum[i].wrapping_sub(minimum[i]);
            let mut value = 0i32;
            if denominator != 0 {
                value = (raw[i] as i32 - minimum[i] as i32) * 1000 / denominator as i32;
            }
            values[i] = value.clamp(0, 1000) as u16;
        }
        Ok(values)
    }

    /// Reads the sensors and estimates the position of a black line.
    ///
    /// Returns a weighted average of the channel indices scaled by 1000:
    /// 0 when the line is under the leftmost sensor, 4000 under the
    /// rightmost, intermediate values between sensors. When no channel sees
    /// the line, the estimate saturates toward the side the line was last
    /// seen on: 0 if the last known position was in the left half,
    /// [`MAX_POSITION`] otherwise.
    pub fn read_line_black(&mut self, mode: ReadMode) -> Result<u16, Error<P::Error, E::Error>> {
        self.read_line(mode, false)
    }

    /// Like [`read_line_black`](Self::read_line_black), for a white line on
    /// a dark background.
    pub fn read_line_white(&mut self, mode: ReadMode) -> Result<u16, Error<P::Error, E::Error>> {
        self.read_line(mode, true)
    }

    fn read_line(
        &mut self,
        mode: ReadMode,
        invert: bool,
    ) -> Result<u16, Error<P::Error, E::Error>> {
        if mode == ReadMode::Manual {
            return Err(Error::ManualNotSupported);
        }
        let calibrated = self.read_calibrated(mode)?;

        let mut on_line = false;
        let mut avg: u32 = 0;
        let mut sum: u32 = 0;
        for (i, &raw_value) in calibrated.iter().enumerate() {
            let value = if invert { 1000 - raw_value } else { raw_value };

            if value > LINE_THRESHOLD {
                on_line = true;
            }
            if value > NOISE_THRESHOLD {
                avg += value as u32 * (i as u32 * 1000);
                sum += value as u32;
            }
        }

        if !on_line {
            // Steer back toward the side the line was last seen on.
            if self.last_position <= MAX_POSITION / 2 {
                return Ok(0);
            } else {
                return Ok(MAX_POSITION);
            }
        }

        self.last_position = (avg / sum) as u16;
        Ok(self.last_position)
    }

    fn read_raw(&mut self) -> Result<LineReadings, Error<P::Error, E::Error>> {
        let readings = self
            .qtr
            .lock(|qtr| qtr.borrow_mut().read())
            .map_err(Error::Program)?;
        // The pin bank runs right-to-left; flip so index 0 is leftmost.
        let bank = readings.line();
        let mut values = [0u16; LINE_SENSOR_COUNT];
        for i in 0..LINE_SENSOR_COUNT {
            values[i] = bank[LINE_SENSOR_COUNT - 1 - i];
        }
        Ok(values)
    }
}
