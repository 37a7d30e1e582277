//! Dispatcher-facing glue
//!
//! The minimal surface the external opcode dispatcher consumes: a polled
//! frame source over the RX ring, and the SLiM/FLiM mode indicator pair that
//! implements the standard enrol UI together with [`input::Switch`] and
//! [`store::Store::reset_module_confirmed`].
//!
//! [`input::Switch`]: crate::input::Switch
//! [`store::Store::reset_module_confirmed`]: crate::store::Store::reset_module_confirmed

use cbus_driver::hal::OutputPin;
use cbus_driver::link::FrameSource;

use crate::buffer::FrameRing;
use crate::frame::CanFrame;
use crate::indicator::Indicator;
use crate::time::{Clock, Instant};

/// Foreground consumer view of a [`FrameRing`]
pub struct Inbox<'a, C: Clock, const N: usize> {
    ring: &'a FrameRing<C, N>,
}

impl<'a, C: Clock, const N: usize> Inbox<'a, C, N> {
    pub fn new(ring: &'a FrameRing<C, N>) -> Self {
        Self { ring }
    }

    /// The oldest captured frame without removing it
    pub fn peek(&self) -> Option<CanFrame> {
        self.ring.peek()
    }

    /// Capture time of the oldest frame
    pub fn insert_time(&self) -> Option<Instant> {
        self.ring.insert_time()
    }
}

impl<C: Clock, const N: usize> FrameSource for Inbox<'_, C, N> {
    fn available(&self) -> bool {
        self.ring.available()
    }

    fn next_frame(&mut self) -> Option<CanFrame> {
        self.ring.get()
    }
}

/// Node operating mode shown on the indicator pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Self-learned: green steady
    Slim,
    /// Fully learned-in-module: yellow steady
    Flim,
    /// Enrol in progress: yellow blinking
    Setup,
}

/// The green/yellow mode indicator pair
pub struct ModeLeds<G: OutputPin, Y: OutputPin, C: Clock> {
    green: Indicator<G, C>,
    yellow: Indicator<Y, C>,
}

impl<G: OutputPin, Y: OutputPin, C: Clock> ModeLeds<G, Y, C> {
    pub fn new(green: Indicator<G, C>, yellow: Indicator<Y, C>) -> Self {
        Self { green, yellow }
    }

    pub fn set_mode(&mut self, mode: Mode) {
        match mode {
            Mode::Slim => {
                self.green.on();
                self.yellow.off();
            }
            Mode::Flim => {
                self.green.off();
                self.yellow.on();
            }
            Mode::Setup => {
                self.green.off();
                self.yellow.blink();
            }
        }
    }

    /// Periodic tick for both indicators
    pub fn run(&mut self) {
        self.green.run();
        self.yellow.run();
    }

    pub fn green(&mut self) -> &mut Indicator<G, C> {
        &mut self.green
    }

    pub fn yellow(&mut self) -> &mut Indicator<Y, C> {
        &mut self.yellow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{TestClock, TestOutput};
    use core::cell::Cell;

    #[test]
    fn test_inbox_drains_ring() {
        let time = Cell::new(0);
        let ring: FrameRing<_, 4> = FrameRing::new(TestClock(&time));

        ring.put(&CanFrame::new(1, &[0x90]).unwrap());
        ring.put(&CanFrame::new(2, &[0x91]).unwrap());

        let mut inbox = Inbox::new(&ring);
        assert!(inbox.available());
        assert_eq!(inbox.peek().map(|f| f.id), Some(1));
        assert_eq!(inbox.insert_time(), Some(Instant::from_micros(0)));
        assert_eq!(inbox.next_frame().map(|f| f.id), Some(1));
        assert_eq!(inbox.next_frame().map(|f| f.id), Some(2));
        assert!(!inbox.available());
        assert_eq!(inbox.next_frame(), None);
    }

    #[test]
    fn test_mode_leds() {
        let time = Cell::new(0);
        let clock = TestClock(&time);
        let green_pin = Cell::new(false);
        let yellow_pin = Cell::new(false);
        let mut leds = ModeLeds::new(
            Indicator::new(TestOutput(&green_pin), clock),
            Indicator::new(TestOutput(&yellow_pin), clock),
        );

        leds.set_mode(Mode::Slim);
        leds.run();
        assert!(green_pin.get());
        assert!(!yellow_pin.get());

        leds.set_mode(Mode::Flim);
        leds.run();
        assert!(!green_pin.get());
        assert!(yellow_pin.get());

        // setup blinks yellow
        leds.set_mode(Mode::Setup);
        leds.run();
        assert!(yellow_pin.get());
        time.set(600_000);
        leds.run();
        assert!(!yellow_pin.get());
    }
}
