//! Drive motor control: signed speeds over PWM plus a direction pin per
//! side.
//!
//! The motor drivers take a 20 kHz PWM whose duty never exceeds 50%, so
//! the full speed range 0..=400 maps onto half of the PWM peripheral's
//! duty range.

use embedded_hal::digital::OutputPin;
use embedded_hal::pwm::SetDutyCycle;

/// Largest magnitude accepted by the speed setters; inputs clamp to it.
pub const MAX_SPEED: i16 = 400;

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<P, D> {
    /// The PWM peripheral rejected the duty cycle.
    Pwm(P),
    /// The direction pin could not be driven.
    Direction(D),
}

/// The two drive motors.
///
/// Generic over the PWM channels and direction pins of the two sides.
/// Speeds are signed: positive drives the robot forward, subject to the
/// per-side flip flags for non-standard gearboxes.
pub struct Motors<PL, PR, DL, DR> {
    left_pwm: PL,
    right_pwm: PR,
    left_dir: DL,
    right_dir: DR,
    flip_left: bool,
    flip_right: bool,
}

impl<PL, PR, DL, DR> Motors<PL, PR, DL, DR>
where
    PL: SetDutyCycle,
    PR: SetDutyCycle,
    DL: OutputPin,
    DR: OutputPin,
{
    /// Creates the motor driver with both motors stopped.
    pub fn new(
        mut left_pwm: PL,
        mut right_pwm: PR,
        left_dir: DL,
        right_dir: DR,
    ) -> Result<Self, SideError<PL::Error, PR::Error>> {
        left_pwm.set_duty_cycle(0).map_err(SideError::Left)?;
        right_pwm.set_duty_cycle(0).map_err(SideError::Right)?;
        Ok(Self {
            left_pwm,
            right_pwm,
            left_dir,
            right_dir,
            flip_left: false,
            flip_right: false,
        })
    }

    /// Reverses the meaning of positive speed for the left motor.
    pub fn flip_left_motor(&mut self, flip: bool) {
        self.flip_left = flip;
    }

    /// Reverses the meaning of positive speed for the right motor.
    pub fn flip_right_motor(&mut self, flip: bool) {
        self.flip_right = flip;
    }

    /// Sets the left motor speed, clamped to ±[`MAX_SPEED`].
    pub fn set_left_speed(&mut self, speed: i16) -> Result<(), Error<PL::Error, DL::Error>> {
        let (magnitude, reverse) = split_speed(speed);
        let duty = duty_for(magnitude, self.left_pwm.max_duty_cycle());
        self.left_pwm.set_duty_cycle(duty).map_err(Error::Pwm)?;
        set_direction(&mut self.left_dir, reverse ^ self.flip_left).map_err(Error::Direction)
    }

    /// Sets the right motor speed, clamped to ±[`MAX_SPEED`].
    pub fn set_right_speed(&mut self, speed: i16) -> Result<(), Error<PR::Error, DR::Error>> {
        let (magnitude, reverse) = split_speed(speed);
        let duty = duty_for(magnitude, self.right_pwm.max_duty_cycle());
        self.right_pwm.set_duty_cycle(duty).map_err(Error::Pwm)?;
        set_direction(&mut self.right_dir, reverse ^ self.flip_right).map_err(Error::Direction)
    }

    /// Sets both motor speeds.
    #[allow(clippy::type_complexity)]
    pub fn set_speeds(
        &mut self,
        left: i16,
        right: i16,
    ) -> Result<(), Error<SideError<PL::Error, PR::Error>, SideError<DL::Error, DR::Error>>> {
        self.set_left_speed(left).map_err(|e| match e {
            Error::Pwm(e) => Error::Pwm(SideError::Left(e)),
            Error::Direction(e) => Error::Direction(SideError::Left(e)),
        })?;
        self.set_right_speed(right).map_err(|e| match e {
            Error::Pwm(e) => Error::Pwm(SideError::Right(e)),
            Error::Direction(e) => Error::Direction(SideError::Right(e)),
        })
    }
}

/// Which side failed in an operation touching both motors.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SideError<L, R> {
    Left(L),
    Right(R),
}

fn split_speed(speed: i16) -> (u16, bool) {
    let reverse = speed < 0;
    let magnitude = (speed as i32).unsigned_abs().min(MAX_SPEED as u32) as u16;
    (magnitude, reverse)
}

/// Maps 0..=400 onto 0..=50% of the peripheral's duty range.
fn duty_for(magnitude: u16, max_duty: u16) -> u16 {
    (magnitude as u32 * (max_duty as u32 / 2) / MAX_SPEED as u32) as u16
}

fn set_direction<D: OutputPin>(pin: &mut D, reverse: bool) -> Result<(), D::Error> {
    if reverse {
        pin.set_high()
    } else {
        pin.set_low()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePin;
    use core::convert::Infallible;

    struct FakePwm {
        duty: u16,
        max: u16,
    }

    impl FakePwm {
        fn new(max: u16) -> Self {
            Self { duty: 0, max }
        }
    }

    impl embedded_hal::pwm::ErrorType for FakePwm {
        type Error = Infallible;
    }

    impl SetDutyCycle for FakePwm {
        fn max_duty_cycle(&self) -> u16 {
            self.max
        }

        fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
            self.duty = duty;
            Ok(())
        }
    }

    fn motors() -> Motors<FakePwm, FakePwm, FakePin, FakePin> {
        Motors::new(
            FakePwm::new(1000),
            FakePwm::new(1000),
            FakePin::new(),
            FakePin::new(),
        )
        .unwrap()
    }

    #[test]
    fn full_speed_is_half_the_duty_range() {
        let mut m = motors();
        m.set_left_speed(400).unwrap();
        assert_eq!(m.left_pwm.duty, 500);
        assert!(!m.left_dir.is_high);
    }

    #[test]
    fn speed_scales_linearly() {
        let mut m = motors();
        m.set_right_speed(200).unwrap();
        assert_eq!(m.right_pwm.duty, 250);
    }

    #[test]
    fn negative_speed_reverses_direction() {
        let mut m = motors();
        m.set_left_speed(-400).unwrap();
        assert_eq!(m.left_pwm.duty, 500);
        assert!(m.left_dir.is_high);
    }

    #[test]
    fn out_of_range_speeds_clamp() {
        let mut m = motors();
        m.set_left_speed(i16::MAX).unwrap();
        assert_eq!(m.left_pwm.duty, 500);
        m.set_left_speed(i16::MIN).unwrap();
        assert_eq!(m.left_pwm.duty, 500);
        assert!(m.left_dir.is_high);
    }

    #[test]
    fn flip_inverts_the_direction_pin() {
        let mut m = motors();
        m.flip_right_motor(true);
        m.set_right_speed(100).unwrap();
        assert!(m.right_dir.is_high);
        m.set_right_speed(-100).unwrap();
        assert!(!m.right_dir.is_high);
    }

    #[test]
    fn set_speeds_drives_both_sides() {
        let mut m = motors();
        m.set_speeds(400, -200).unwrap();
        assert_eq!(m.left_pwm.duty, 500);
        assert_eq!(m.right_pwm.duty, 250);
        assert!(!m.left_dir.is_high);
        assert!(m.right_dir.is_high);
    }
}
