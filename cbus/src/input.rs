//! Debounced pushbutton input
//!
//! A periodically-polled discrete input with edge detection and duration
//! bookkeeping: how long the current state has been held, how long the
//! previous state lasted, and when the last change happened. Used for the
//! FLiM enrol button, where press duration selects the action.

use cbus_driver::hal::{InputPin, Pull};

use crate::time::{Clock, Duration, Instant};

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(20);

/// Which physical level means "pressed"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Polarity {
    /// Pressed pulls the pin low; idle is pulled up
    ActiveLow,
    /// Pressed drives the pin high; idle is pulled down
    ActiveHigh,
}

pub struct Switch<P: InputPin, C: Clock> {
    pin: P,
    clock: C,
    active_level: bool,
    debounce: Duration,
    raw: bool,
    stable: bool,
    raw_changed_at: Instant,
    changed: bool,
    current_state_start: Instant,
    last_state_duration: Duration,
    last_change_time: Instant,
}

impl<P: InputPin, C: Clock> Switch<P, C> {
    /// Takes ownership of the input pin, configuring the pull to match the
    /// polarity (active-low gets a pull-up, active-high a pull-down)
    pub fn new(mut pin: P, polarity: Polarity, clock: C) -> Self {
        let active_level = match polarity {
            Polarity::ActiveLow => {
                pin.configure_pull(Pull::Up);
                false
            }
            Polarity::ActiveHigh => {
                pin.configure_pull(Pull::Down);
                true
            }
        };
        let now = clock.now();
        Self {
            pin,
            clock,
            active_level,
            debounce: DEFAULT_DEBOUNCE,
            raw: !active_level,
            stable: !active_level,
            raw_changed_at: now,
            changed: false,
            current_state_start: now,
            last_state_duration: Duration::from_ticks(0),
            last_change_time: now,
        }
    }

    /// How long a raw change must persist before the stable state flips.
    /// Zero makes flips immediate.
    pub fn set_debounce(&mut self, debounce: Duration) {
        self.debounce = debounce;
    }

    /// Periodic tick; samples the pin and advances the debounce
    pub fn run(&mut self) {
        let now = self.clock.now();
        let sample = self.pin.read();

        if sample != self.raw {
            self.raw = sample;
            self.raw_changed_at = now;
        }

        if self.raw != self.stable
            && (self.debounce.as_ticks() == 0 || now - self.raw_changed_at >= self.debounce)
        {
            self.stable = self.raw;
            self.last_state_duration = now - self.current_state_start;
            self.current_state_start = now;
            self.last_change_time = now;
            self.changed = true;
        }
    }

    /// Debounced physical pin level
    pub fn state(&self) -> bool {
        self.stable
    }

    pub fn is_pressed(&self) -> bool {
        self.stable == self.active_level
    }

    /// True once per stable-state flip; reading clears the flag
    pub fn state_changed(&mut self) -> bool {
        core::mem::take(&mut self.changed)
    }

    /// How long the current stable state has been held
    pub fn current_state_duration(&self) -> Duration {
        self.clock.now() - self.current_state_start
    }

    /// How long the previous stable state lasted
    pub fn last_state_duration(&self) -> Duration {
        self.last_state_duration
    }

    pub fn last_state_change_time(&self) -> Instant {
        self.last_change_time
    }

    /// Restarts the held-duration measurement from now
    pub fn reset_current_duration(&mut self) {
        self.current_state_start = self.clock.now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{TestClock, TestInput};
    use core::cell::Cell;

    #[test]
    fn test_active_low_idles_high() {
        let time = Cell::new(0);
        let pin = Cell::new(true);
        let mut sw = Switch::new(TestInput(&pin), Polarity::ActiveLow, TestClock(&time));

        sw.run();
        assert!(sw.state());
        assert!(!sw.is_pressed());
    }

    #[test]
    fn test_active_high_idles_low() {
        let time = Cell::new(0);
        let pin = Cell::new(false);
        let mut sw = Switch::new(TestInput(&pin), Polarity::ActiveHigh, TestClock(&time));

        sw.run();
        assert!(!sw.state());
        assert!(!sw.is_pressed());
    }

    #[test]
    fn test_debounced_press_and_release() {
        let debounce = Duration::from_millis(20);
        let held = Duration::from_millis(100);

        let time = Cell::new(0);
        let pin = Cell::new(true);
        let clock = TestClock(&time);
        let mut sw = Switch::new(TestInput(&pin), Polarity::ActiveLow, clock);
        sw.set_debounce(debounce);
        sw.run();

        assert!(!sw.is_pressed());

        // press; the raw edge alone must not register
        pin.set(false);
        sw.run();
        assert!(sw.state());
        assert!(!sw.is_pressed());
        assert!(!sw.state_changed());

        // half the debounce window: still released
        clock.advance_millis(10);
        sw.run();
        assert!(sw.state());
        assert!(!sw.is_pressed());

        // full window: now pressed, exactly one change report
        clock.advance_millis(10);
        sw.run();
        assert!(!sw.state());
        assert!(sw.is_pressed());
        assert!(sw.state_changed());
        assert!(!sw.state_changed());

        assert_eq!(sw.current_state_duration(), Duration::from_ticks(0));

        clock.advance_millis(100);
        sw.run();
        assert_eq!(sw.current_state_duration(), held);

        // release and ride out the off-debounce
        pin.set(true);
        sw.run();
        clock.advance_millis(20);
        sw.run();
        assert!(!sw.is_pressed());

        clock.advance_millis(100);
        sw.run();
        assert_eq!(sw.last_state_duration(), held + debounce);
        assert_eq!(
            sw.last_state_change_time(),
            Instant::from_millis(100 + 2 * 20)
        );
    }

    #[test]
    fn test_zero_debounce_flips_immediately() {
        let held = Duration::from_millis(100);

        let time = Cell::new(0);
        let pin = Cell::new(true);
        let clock = TestClock(&time);
        let mut sw = Switch::new(TestInput(&pin), Polarity::ActiveLow, clock);
        sw.set_debounce(Duration::from_ticks(0));
        sw.run();

        pin.set(false);
        sw.run();
        assert!(sw.is_pressed());

        clock.advance_millis(100);
        sw.run();
        assert_eq!(sw.current_state_duration(), held);

        sw.reset_current_duration();
        clock.advance_millis(200);
        sw.run();
        assert_eq!(sw.current_state_duration(), 2 * held);
    }
}
