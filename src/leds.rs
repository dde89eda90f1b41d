//! The six addressable RGB LEDs around the edge of the robot.
//!
//! The LEDs are SK9822-compatible and hang off the shared SPI bus (clock
//! and data only). Each LED consumes one 4-byte frame holding a 5-bit
//! global brightness and 8-bit blue/green/red; a zeroed start frame
//! precedes the chain and a few trailing clock bytes push the last frames
//! through it.

use embedded_hal::spi::SpiBus;

/// Number of RGB LEDs on the robot.
pub const LED_COUNT: usize = 6;

/// Positions of the LEDs in the chain.
pub const BACK_LEFT_LED: usize = 0;
pub const BACK_CENTER_LED: usize = 1;
pub const BACK_RIGHT_LED: usize = 2;
pub const FRONT_RIGHT_LED: usize = 3;
pub const FRONT_CENTER_LED: usize = 4;
pub const FRONT_LEFT_LED: usize = 5;

/// Largest per-LED brightness value.
pub const MAX_BRIGHTNESS: u8 = 31;

/// An RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Rgb {
    pub const BLACK: Self = Self::new(0, 0, 0);
    pub const WHITE: Self = Self::new(255, 255, 255);
    pub const RED: Self = Self::new(255, 0, 0);
    pub const ORANGE: Self = Self::new(255, 128, 0);
    pub const YELLOW: Self = Self::new(255, 255, 0);
    pub const GREEN: Self = Self::new(0, 255, 0);
    pub const BLUE: Self = Self::new(0, 0, 255);
    pub const VIOLET: Self = Self::new(255, 0, 255);

    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Converts a hue/saturation/value triple, each in 0..=255, to RGB.
    pub fn from_hsv(h: u8, s: u8, v: u8) -> Self {
        if s == 0 {
            return Self::new(v, v, v);
        }

        let region = h / 43;
        let remainder = (h as u32 - region as u32 * 43) * 6;
        let s32 = s as u32;
        let v32 = v as u32;
        let p = ((v32 * (255 - s32)) >> 8) as u8;
        let q = ((v32 * (255 - ((s32 * remainder) >> 8))) >> 8) as u8;
        let t = ((v32 * (255 - ((s32 * (255 - remainder)) >> 8))) >> 8) as u8;

        match region {
            0 => Self::new(v, t, p),
            1 => Self::new(q, v, p),
            2 => Self::new(p, v, t),
            3 => Self::new(p, q, v),
            4 => Self::new(t, p, v),
            _ => Self::new(v, p, q),
        }
    }
}

/// A chain of `N` SK9822-compatible LEDs on an SPI bus.
///
/// Setters push the whole chain out over SPI immediately; call
/// [`set_auto_show`](Self::set_auto_show) with `false` to batch updates
/// and [`show`](Self::show) explicitly. LED indices out of range panic.
pub struct LedStrip<S, const N: usize> {
    spi: S,
    colors: [Rgb; N],
    brightness: [u8; N],
    auto_show: bool,
}

/// The robot's stock chain of six LEDs.
pub type RgbLeds<S> = LedStrip<S, LED_COUNT>;

impl<S: SpiBus, const N: usize> LedStrip<S, N> {
    /// Creates the driver with every LED black at full brightness.
    ///
    /// Nothing is sent until the first setter or [`show`](Self::show).
    pub fn new(spi: S) -> Self {
        Self {
            spi,
            colors: [Rgb::BLACK; N],
            brightness: [MAX_BRIGHTNESS; N],
            auto_show: true,
        }
    }

    /// Whether setters push the chain out immediately (the default).
    pub fn set_auto_show(&mut self, auto_show: bool) {
        self.auto_show = auto_show;
    }

    /// Writes the current colors and brightnesses to the chain.
    pub fn show(&mut self) -> Result<(), S::Error> {
        self.spi.write(&[0; 4])?;
        for led in 0..N {
            let color = self.colors[led];
            self.spi.write(&[
                0xE0 | self.brightness[led],
                color.blue,
                color.green,
                color.red,
            ])?;
        }
        // Trailing clock pulses, one byte per 16 LEDs of chain.
        for _ in 0..(N + 14) / 16 {
            self.spi.write(&[0])?;
        }
        self.spi.flush()
    }

    pub fn set(&mut self, led: usize, color: Rgb) -> Result<(), S::Error> {
        self.colors[led] = color;
        self.maybe_show()
    }

    pub fn set_with_brightness(
        &mut self,
        led: usize,
        color: Rgb,
        brightness: u8,
    ) -> Result<(), S::Error> {
        self.colors[led] = color;
        self.brightness[led] = brightness & MAX_BRIGHTNESS;
        self.maybe_show()
    }

    pub fn get(&self, led: usize) -> Rgb {
        self.colors[led]
    }

    /// Sets one LED's 5-bit brightness; values above 31 wrap into range.
    pub fn set_brightness(&mut self, led: usize, brightness: u8) -> Result<(), S::Error> {
        self.brightness[led] = brightness & MAX_BRIGHTNESS;
        self.maybe_show()
    }

    /// Sets every LED's brightness at once.
    pub fn set_brightness_all(&mut self, brightness: u8) -> Result<(), S::Error> {
        self.brightness = [brightness & MAX_BRIGHTNESS; N];
        self.maybe_show()
    }

    pub fn get_brightness(&self, led: usize) -> u8 {
        self.brightness[led]
    }

    /// Blacks out the whole chain.
    pub fn off(&mut self) -> Result<(), S::Error> {
        self.colors = [Rgb::BLACK; N];
        self.show()
    }

    /// Releases the SPI bus.
    pub fn free(self) -> S {
        self.spi
    }

    fn maybe_show(&mut self) -> Result<(), S::Error> {
        if self.auto_show {
            self.show()
        } else {
            Ok(())
        }
    }
}
