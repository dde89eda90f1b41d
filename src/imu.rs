//! The inertial sensors: an LSM6DSO gyro + accelerometer and an LIS3MDL
//! magnetometer, both on the shared I2C bus.
//!
//! Readings are raw 16-bit axis values; scaling to physical units depends
//! on the configured full-scale range and is left to the application.

use embedded_hal::i2c::I2c;

/// 7-bit I2C address of the LSM6DSO gyro + accelerometer.
pub const LSM6DSO_ADDR: u8 = 0b110_1011;
/// 7-bit I2C address of the LIS3MDL magnetometer.
pub const LIS3MDL_ADDR: u8 = 0b001_1110;

mod lsm6dso {
    pub const WHO_AM_I: u8 = 0x0F;
    pub const CTRL1_XL: u8 = 0x10;
    pub const CTRL2_G: u8 = 0x11;
    pub const CTRL3_C: u8 = 0x12;
    pub const STATUS_REG: u8 = 0x1E;
    pub const OUTX_L_G: u8 = 0x22;
    pub const OUTX_L_XL: u8 = 0x28;

    pub const WHO_AM_I_VALUE: u8 = 0x6C;
}

mod lis3mdl {
    pub const WHO_AM_I: u8 = 0x0F;
    pub const CTRL_REG1: u8 = 0x20;
    pub const CTRL_REG2: u8 = 0x21;
    pub const CTRL_REG3: u8 = 0x22;
    pub const CTRL_REG4: u8 = 0x23;
    pub const STATUS_REG: u8 = 0x27;
    pub const OUT_X_L: u8 = 0x28;

    pub const WHO_AM_I_VALUE: u8 = 0x3D;
    /// Subaddress bit enabling register auto-increment on multi-byte reads.
    pub const AUTO_INCREMENT: u8 = 0x80;
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    I2c(E),
    /// A device did not answer its `WHO_AM_I` register with the expected
    /// id; the board does not carry the supported sensor combination.
    UnknownDevice,
}

/// Raw axis readings from one of the sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Vector3 {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

/// Driver for the inertial sensors.
///
/// Call [`init`](Self::init) once to verify the sensors answer, then one
/// of the `configure_for_*` presets or [`enable_default`](Self::enable_default)
/// before reading.
pub struct Imu<I> {
    i2c: I,
    /// Raw accelerometer readings from the last [`read_acc`](Self::read_acc).
    pub acc: Vector3,
    /// Raw gyro readings from the last [`read_gyro`](Self::read_gyro).
    pub gyro: Vector3,
    /// Raw magnetometer readings from the last [`read_mag`](Self::read_mag).
    pub mag: Vector3,
}

impl<I: I2c> Imu<I> {
    pub fn new(i2c: I) -> Self {
        Self {
            i2c,
            acc: Vector3::default(),
            gyro: Vector3::default(),
            mag: Vector3::default(),
        }
    }

    /// Checks that both sensors answer with their expected device ids.
    pub fn init(&mut self) -> Result<(), Error<I::Error>> {
        if self.read_reg(LSM6DSO_ADDR, lsm6dso::WHO_AM_I)? != lsm6dso::WHO_AM_I_VALUE
            || self.read_reg(LIS3MDL_ADDR, lis3mdl::WHO_AM_I)? != lis3mdl::WHO_AM_I_VALUE
        {
            return Err(Error::UnknownDevice);
        }
        Ok(())
    }

    /// Enables all three sensors with a general-purpose configuration.
    pub fn enable_default(&mut self) -> Result<(), Error<I::Error>> {
        // Accelerometer: 52 Hz, ±2 g.
        self.write_reg(LSM6DSO_ADDR, lsm6dso::CTRL1_XL, 0x30)?;
        // Gyro: 208 Hz, ±245 dps.
        self.write_reg(LSM6DSO_ADDR, lsm6dso::CTRL2_G, 0x50)?;
        // Register address auto-increment on multi-byte reads.
        self.write_reg(LSM6DSO_ADDR, lsm6dso::CTRL3_C, 0x04)?;

        // Magnetometer: ultra-high-performance X/Y, 10 Hz.
        self.write_reg(LIS3MDL_ADDR, lis3mdl::CTRL_REG1, 0x70)?;
        // ±4 gauss.
        self.write_reg(LIS3MDL_ADDR, lis3mdl::CTRL_REG2, 0x00)?;
        // Continuous-conversion mode.
        self.write_reg(LIS3MDL_ADDR, lis3mdl::CTRL_REG3, 0x00)?;
        // Ultra-high-performance Z.
        self.write_reg(LIS3MDL_ADDR, lis3mdl::CTRL_REG4, 0x0C)
    }

    /// Reconfigures the gyro for fast yaw tracking: 833 Hz, ±2000 dps.
    pub fn configure_for_turn_sensing(&mut self) -> Result<(), Error<I::Error>> {
        self.write_reg(LSM6DSO_ADDR, lsm6dso::CTRL2_G, 0x7C)
    }

    /// Reconfigures the accelerometer for a slow, stable gravity vector:
    /// 12.5 Hz, ±2 g.
    pub fn configure_for_face_uphill(&mut self) -> Result<(), Error<I::Error>> {
        self.write_reg(LSM6DSO_ADDR, lsm6dso::CTRL1_XL, 0x10)
    }

    /// Reconfigures the magnetometer for heading estimation:
    /// ultra-high-performance X/Y at 80 Hz.
    pub fn configure_for_compass_heading(&mut self) -> Result<(), Error<I::Error>> {
        self.write_reg(LIS3MDL_ADDR, lis3mdl::CTRL_REG1, 0x7C)
    }

    /// Reads the accelerometer into [`acc`](Self::acc).
    pub fn read_acc(&mut self) -> Result<Vector3, Error<I::Error>> {
        self.acc = self.read_axes(LSM6DSO_ADDR, lsm6dso::OUTX_L_XL)?;
        Ok(self.acc)
    }

    /// Reads the gyro into [`gyro`](Self::gyro).
    pub fn read_gyro(&mut self) -> Result<Vector3, Error<I::Error>> {
        self.gyro = self.read_axes(LSM6DSO_ADDR, lsm6dso::OUTX_L_G)?;
        Ok(self.gyro)
    }

    /// Reads the magnetometer into [`mag`](Self::mag).
    pub fn read_mag(&mut self) -> Result<Vector3, Error<I::Error>> {
        self.mag = self.read_axes(LIS3MDL_ADDR, lis3mdl::OUT_X_L | lis3mdl::AUTO_INCREMENT)?;
        Ok(self.mag)
    }

    /// Reads all three sensors.
    pub fn read(&mut self) -> Result<(), Error<I::Error>> {
        self.read_acc()?;
        self.read_gyro()?;
        self.read_mag()?;
        Ok(())
    }

    pub fn acc_data_ready(&mut self) -> Result<bool, Error<I::Error>> {
        Ok(self.read_reg(LSM6DSO_ADDR, lsm6dso::STATUS_REG)? & 0x01 != 0)
    }

    pub fn gyro_data_ready(&mut self) -> Result<bool, Error<I::Error>> {
        Ok(self.read_reg(LSM6DSO_ADDR, lsm6dso::STATUS_REG)? & 0x02 != 0)
    }

    pub fn mag_data_ready(&mut self) -> Result<bool, Error<I::Error>> {
        Ok(self.read_reg(LIS3MDL_ADDR, lis3mdl::STATUS_REG)? & 0x08 != 0)
    }

    /// Releases the I2C bus.
    pub fn free(self) -> I {
        self.i2c
    }

    fn write_reg(&mut self, addr: u8, reg: u8, value: u8) -> Result<(), Error<I::Error>> {
        self.i2c.write(addr, &[reg, value]).map_err(Error::I2c)
    }

    fn read_reg(&mut self, addr: u8, reg: u8) -> Result<u8, Error<I::Error>> {
        let mut value = [0u8];
        self.i2c
            .write_read(addr, &[reg], &mut value)
            .map_err(Error::I2c)?;
        Ok(value[0])
    }

    fn read_axes(&mut self, addr: u8, first_reg: u8) -> Result<Vector3, Error<I::Error>> {
        let mut raw = [0u8; 6];
        self.i2c
            .write_read(addr, &[first_reg], &mut raw)
            .map_err(Error::I2c)?;
        Ok(Vector3 {
            x: i16::from_le_bytes([raw[0], raw[1]]),
            y: i16::from_le_bytes([raw[2], raw[3]]),
            z: i16::from_le_bytes([raw[4], raw[5]]),
        })
    }
}
