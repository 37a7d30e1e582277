//! Timed indicator output
//!
//! One GPIO-driven LED with steady, blinking and one-shot pulse modes, ticked
//! from the foreground loop via [`Indicator::run`].

use cbus_driver::hal::OutputPin;

use crate::time::{Clock, Duration, Instant};

const DEFAULT_BLINK_HALF_PERIOD: Duration = Duration::from_millis(500);
const DEFAULT_SHORT_PULSE: Duration = Duration::from_millis(100);
const DEFAULT_LONG_PULSE: Duration = Duration::from_millis(500);

/// Pulse length selector, see [`Indicator::set_short_pulse`] /
/// [`Indicator::set_long_pulse`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pulse {
    Short,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Off,
    On,
    Blink,
    Pulse,
}

pub struct Indicator<P: OutputPin, C: Clock> {
    pin: P,
    clock: C,
    mode: Mode,
    level: bool,
    blink_phase: Option<Instant>,
    pulse_start: Instant,
    pulse_len: Duration,
    blink_half_period: Duration,
    short_pulse: Duration,
    long_pulse: Duration,
}

impl<P: OutputPin, C: Clock> Indicator<P, C> {
    /// Takes ownership of the output pin and drives it low
    pub fn new(mut pin: P, clock: C) -> Self {
        pin.set_low();
        Self {
            pin,
            clock,
            mode: Mode::Off,
            level: false,
            blink_phase: None,
            pulse_start: Instant::from_ticks(0),
            pulse_len: DEFAULT_LONG_PULSE,
            blink_half_period: DEFAULT_BLINK_HALF_PERIOD,
            short_pulse: DEFAULT_SHORT_PULSE,
            long_pulse: DEFAULT_LONG_PULSE,
        }
    }

    /// Half-period of [`blink`](Self::blink)
    pub fn set_blink_rate(&mut self, half_period: Duration) {
        self.blink_half_period = half_period;
    }

    pub fn set_short_pulse(&mut self, duration: Duration) {
        self.short_pulse = duration;
    }

    pub fn set_long_pulse(&mut self, duration: Duration) {
        self.long_pulse = duration;
    }

    /// Steady on; cancels blink or pulse
    pub fn on(&mut self) {
        self.mode = Mode::On;
    }

    /// Steady off; cancels blink or pulse
    pub fn off(&mut self) {
        self.mode = Mode::Off;
    }

    pub fn toggle(&mut self) {
        if self.level {
            self.off()
        } else {
            self.on()
        }
    }

    pub fn blink(&mut self) {
        self.mode = Mode::Blink;
        self.blink_phase = None;
    }

    /// One-shot pulse; the output goes high immediately and [`run`](Self::run)
    /// drops it after the configured duration
    pub fn pulse(&mut self, pulse: Pulse) {
        self.pulse_len = match pulse {
            Pulse::Short => self.short_pulse,
            Pulse::Long => self.long_pulse,
        };
        self.pulse_start = self.clock.now();
        self.mode = Mode::Pulse;
        self.set_level(true);
    }

    /// The level currently driven onto the pin
    pub fn state(&self) -> bool {
        self.level
    }

    /// Periodic tick; drives the pin according to the active mode
    pub fn run(&mut self) {
        let now = self.clock.now();
        match self.mode {
            Mode::Off => self.set_level(false),
            Mode::On => self.set_level(true),
            Mode::Blink => match self.blink_phase {
                None => {
                    self.set_level(true);
                    self.blink_phase = Some(now);
                }
                Some(phase) if now - phase >= self.blink_half_period => {
                    let level = !self.level;
                    self.set_level(level);
                    self.blink_phase = Some(now);
                }
                Some(_) => {}
            },
            Mode::Pulse => {
                if now - self.pulse_start >= self.pulse_len {
                    self.set_level(false);
                    self.mode = Mode::Off;
                }
            }
        }
    }

    fn set_level(&mut self, level: bool) {
        self.level = level;
        self.pin.set(level);
    }
}
