//! The three user buttons.
//!
//! All three buttons pull their pin low when pressed (they share pins with
//! other functions on the board, each with an external pull-up). The
//! debouncing state machine is time-driven: feed it the pin level and a
//! millisecond timestamp from your main loop and it reports each press or
//! release exactly once, after the level has been stable for
//! [`DEBOUNCE_MS`].

use embedded_hal::digital::InputPin;

/// How long a level must hold steady to count, in milliseconds.
pub const DEBOUNCE_MS: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for the button to be released.
    WaitRelease,
    /// Released; timing the stability window.
    DebounceRelease,
    /// Stable released; waiting for a press.
    WaitPress,
    /// Pressed; timing the stability window.
    DebouncePress,
}

/// Debouncer yielding a single event per physical press.
///
/// Kept separate from [`Button`] so it can also run on levels that do not
/// come from an `InputPin` (the B button is sensed through the flash
/// chip-select line, which needs board-specific code to sample).
#[derive(Debug)]
pub struct PressMonitor {
    phase: Phase,
    since_ms: u32,
}

impl PressMonitor {
    pub const fn new() -> Self {
        Self {
            phase: Phase::WaitRelease,
            since_ms: 0,
        }
    }

    /// Feeds one sample; returns true on a debounced press.
    ///
    /// `now_ms` must come from a monotonic millisecond clock; wraparound
    /// is handled.
    pub fn update(&mut self, pressed: bool, now_ms: u32) -> bool {
        match self.phase {
            Phase::WaitRelease => {
                if !pressed {
                    self.phase = Phase::DebounceRelease;
                    self.since_ms = now_ms;
                }
            }
            Phase::DebounceRelease => {
                if pressed {
                    // Bounce: not a stable release.
                    self.phase = Phase::WaitRelease;
                } else if now_ms.wrapping_sub(self.since_ms) >= DEBOUNCE_MS {
                    self.phase = Phase::WaitPress;
                }
            }
            Phase::WaitPress => {
                if pressed {
                    self.phase = Phase::DebouncePress;
                    self.since_ms = now_ms;
                }
            }
            Phase::DebouncePress => {
                if !pressed {
                    self.phase = Phase::WaitPress;
                } else if now_ms.wrapping_sub(self.since_ms) >= DEBOUNCE_MS {
                    self.phase = Phase::WaitRelease;
                    return true;
                }
            }
        }
        false
    }
}

impl Default for PressMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// An active-low user button.
pub struct Button<P> {
    pin: P,
    monitor: PressMonitor,
}

impl<P: InputPin> Button<P> {
    pub fn new(pin: P) -> Self {
        Self {
            pin,
            monitor: PressMonitor::new(),
        }
    }

    /// Instantaneous, undebounced state.
    pub fn is_pressed(&mut self) -> Result<bool, P::Error> {
        self.pin.is_low()
    }

    /// Samples the pin and reports a debounced press.
    ///
    /// Call this repeatedly from a loop with a millisecond timestamp; it
    /// returns true exactly once per press, [`DEBOUNCE_MS`] after the
    /// button settles down.
    pub fn get_single_debounced_press(&mut self, now_ms: u32) -> Result<bool, P::Error> {
        let pressed = self.pin.is_low()?;
        Ok(self.monitor.update(pressed, now_ms))
    }

    /// Releases the underlying pin.
    pub fn free(self) -> P {
        self.pin
    }
}
