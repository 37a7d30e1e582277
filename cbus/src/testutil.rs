//! In-process fakes shared by the unit tests

use core::cell::Cell;

use cbus_core::Priority;
use cbus_driver::hal::{FlashAccess, InputPin, OutputPin, Pull};
use cbus_driver::link::FrameSender;

use crate::frame::CanFrame;
use crate::store::FLASH_SECTOR_SIZE;
use crate::time::{Clock, Instant};

/// A clock scripted through a shared microsecond counter
#[derive(Clone, Copy)]
pub struct TestClock<'a>(pub &'a Cell<u64>);

impl TestClock<'_> {
    pub fn advance_millis(&self, millis: u64) {
        self.0.set(self.0.get() + millis * 1000);
    }
}

impl Clock for TestClock<'_> {
    fn now(&self) -> Instant {
        Instant::from_micros(self.0.get())
    }
}

/// One flash sector held in RAM, starting erased
pub struct RamFlash {
    data: [u8; FLASH_SECTOR_SIZE],
}

impl RamFlash {
    pub fn new() -> Self {
        Self {
            data: [0xff; FLASH_SECTOR_SIZE],
        }
    }
}

impl FlashAccess for RamFlash {
    fn erase_sector(&mut self, offset: u32, len: usize) {
        let start = offset as usize;
        self.data[start..start + len].fill(0xff);
    }

    fn program(&mut self, offset: u32, bytes: &[u8]) {
        let start = offset as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    fn read(&self, offset: u32, buf: &mut [u8]) {
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
    }
}

/// An output pin recording the last driven level
pub struct TestOutput<'a>(pub &'a Cell<bool>);

impl OutputPin for TestOutput<'_> {
    fn set(&mut self, level: bool) {
        self.0.set(level);
    }
}

/// An input pin scripted through a shared level
pub struct TestInput<'a>(pub &'a Cell<bool>);

impl InputPin for TestInput<'_> {
    fn configure_pull(&mut self, _pull: Pull) {}

    fn read(&self) -> bool {
        self.0.get()
    }
}

/// A frame sink recording everything queued for transmission
pub struct TestSender {
    pub frames: heapless::Vec<(CanFrame, Priority), 64>,
    pub accept: bool,
}

impl TestSender {
    pub fn new() -> Self {
        Self {
            frames: heapless::Vec::new(),
            accept: true,
        }
    }
}

impl FrameSender for TestSender {
    fn send_frame(&mut self, frame: &CanFrame, priority: Priority) -> bool {
        if self.accept {
            self.frames.push((*frame, priority)).unwrap();
        }
        self.accept
    }
}
