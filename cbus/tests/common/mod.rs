//! Shared fixtures for the integration tests
#![allow(dead_code)]

use core::cell::Cell;

use cbus::core::{Priority, StreamId};
use cbus::frame::CanFrame;
use cbus::hal::{BusError, FlashAccess, InputPin, OutputPin, Pull, TwoWireBus};
use cbus::link::FrameSender;
use cbus::longmsg::{LongMessageHandler, Status};
use cbus::store::FLASH_SECTOR_SIZE;
use cbus::time::{Clock, Duration, Instant};

/// A clock scripted through a shared microsecond counter
#[derive(Clone, Copy)]
pub struct FakeClock<'a> {
    micros: &'a Cell<u64>,
}

impl<'a> FakeClock<'a> {
    pub fn new(micros: &'a Cell<u64>) -> Self {
        Self { micros }
    }

    pub fn advance_millis(&self, millis: u64) {
        self.micros.set(self.micros.get() + millis * 1000);
    }
}

impl Clock for FakeClock<'_> {
    fn now(&self) -> Instant {
        Instant::from_micros(self.micros.get())
    }
}

/// A clock that steps forward on every read, so code that spins on the
/// clock makes progress under test
#[derive(Clone, Copy)]
pub struct SteppingClock<'a> {
    micros: &'a Cell<u64>,
    step_micros: u64,
}

impl<'a> SteppingClock<'a> {
    pub fn new(micros: &'a Cell<u64>, step: Duration) -> Self {
        Self {
            micros,
            step_micros: step.as_micros(),
        }
    }
}

impl Clock for SteppingClock<'_> {
    fn now(&self) -> Instant {
        let now = self.micros.get();
        self.micros.set(now + self.step_micros);
        Instant::from_micros(now)
    }
}

/// Captures every frame queued for transmission
pub struct RecordingSender {
    pub frames: Vec<(CanFrame, Priority)>,
    pub accept: bool,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            accept: true,
        }
    }

    pub fn take(&mut self) -> Vec<CanFrame> {
        self.frames.drain(..).map(|(frame, _)| frame).collect()
    }
}

impl FrameSender for RecordingSender {
    fn send_frame(&mut self, frame: &CanFrame, priority: Priority) -> bool {
        if self.accept {
            self.frames.push((*frame, priority));
        }
        self.accept
    }
}

/// Records every terminal long-message callback
pub struct RecordingHandler {
    pub calls: Vec<(Vec<u8>, StreamId, Status)>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self { calls: Vec::new() }
    }
}

impl LongMessageHandler for RecordingHandler {
    fn handle(&mut self, fragment: &[u8], stream: StreamId, status: Status) {
        self.calls.push((fragment.to_vec(), stream, status));
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

/// A 256-byte serial EEPROM on a two-wire bus
///
/// Single-byte addressing: a one-byte write sets the address pointer, a
/// two-byte write stores a value, reads start at the pointer.
pub struct RamEeprom {
    pub mem: [u8; 256],
    pub fail_probe: bool,
    pointer: usize,
    pub writes: usize,
}

impl RamEeprom {
    pub fn new() -> Self {
        Self {
            mem: [0xff; 256],
            fail_probe: false,
            pointer: 0,
            writes: 0,
        }
    }
}

impl TwoWireBus for RamEeprom {
    fn write(&mut self, _addr: u8, bytes: &[u8], _nostop: bool) -> Result<usize, BusError> {
        if self.fail_probe {
            return Err(BusError::Nak);
        }
        match *bytes {
            [offset] => self.pointer = offset as usize,
            [offset, value] => {
                self.mem[offset as usize] = value;
                self.writes += 1;
            }
            _ => return Err(BusError::Nak),
        }
        Ok(bytes.len())
    }

    fn read_timeout(
        &mut self,
        _addr: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, BusError> {
        if self.fail_probe {
            return Err(BusError::Timeout);
        }
        for byte in buf.iter_mut() {
            *byte = self.mem[self.pointer % self.mem.len()];
            self.pointer += 1;
        }
        Ok(buf.len())
    }
}

/// An output pin recording the last driven level
pub struct RecordingPin<'a>(pub &'a Cell<bool>);

impl OutputPin for RecordingPin<'_> {
    fn set(&mut self, level: bool) {
        self.0.set(level);
    }
}

/// An input pin scripted through a shared level
pub struct ScriptedPin<'a>(pub &'a Cell<bool>);

impl InputPin for ScriptedPin<'_> {
    fn configure_pull(&mut self, _pull: Pull) {}

    fn read(&self) -> bool {
        self.0.get()
    }
}
