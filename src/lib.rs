#![cfg_attr(not(test), no_std)]

//! Drivers for the sensors and actuators of the 3pi+ 2040 robot.
//!
//! The centerpiece is the QTR reflectance sensor subsystem: a single
//! programmable-I/O acquisition engine samples all seven downward/forward
//! facing RC sensors at once, and two views are layered on top of it, the
//! five [`line_sensors`] used for line following and the two front
//! [`bump_sensors`].
//!
//! Hardware access goes through narrow traits so the crate stays portable
//! and host-testable: the acquisition engine is anything implementing
//! [`qtr::SensorProgram`] (a PIO state machine on the real robot), plain
//! pins and PWM go through `embedded-hal` 1.0, and the encoder counting
//! peripheral is abstracted as [`encoders::QuadratureCounter`].

// This must go first so that the fmt macros are visible everywhere.
mod fmt;

pub mod bump_sensors;
pub mod buttons;
pub mod encoders;
pub mod imu;
pub mod leds;
pub mod line_sensors;
pub mod motors;
pub mod qtr;

#[cfg(test)]
pub(crate) mod testing;

pub use bump_sensors::{BumpSensors, BumpSide};
pub use imu::Imu;
pub use leds::{Rgb, RgbLeds};
pub use line_sensors::{CalibrationData, LineSensors, ReadMode};
pub use qtr::{QtrSensors, SensorProgram, SharedQtr, TIMEOUT};
