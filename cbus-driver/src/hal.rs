//! Peripheral capability traits consumed by the stack
//!
//! Board crates implement these over their HAL of choice. Every method is
//! synchronous; the long operations (sector erase, bus transactions) are
//! bounded and measured in milliseconds.

use embassy_time::Duration;

/// One erasable flash sector used as the persistent store
///
/// Offsets are relative to the sector base. The store keeps a RAM shadow and
/// only calls [`program`](FlashAccess::program) with whole-shadow writes after
/// an erase.
pub trait FlashAccess {
    fn erase_sector(&mut self, offset: u32, len: usize);
    fn program(&mut self, offset: u32, bytes: &[u8]);
    fn read(&self, offset: u32, buf: &mut [u8]);
}

impl<T: FlashAccess + ?Sized> FlashAccess for &mut T {
    fn erase_sector(&mut self, offset: u32, len: usize) {
        (**self).erase_sector(offset, len)
    }

    fn program(&mut self, offset: u32, bytes: &[u8]) {
        (**self).program(offset, bytes)
    }

    fn read(&self, offset: u32, buf: &mut [u8]) {
        (**self).read(offset, buf)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// Address or data byte not acknowledged
    Nak,
    /// No response within the deadline
    Timeout,
}

/// Two-wire (I2C-style) bus master capability for external serial EEPROMs
pub trait TwoWireBus {
    /// Writes `bytes` to the device at `addr`. `nostop` keeps the bus claimed
    /// for a following read. Returns the number of bytes written.
    fn write(&mut self, addr: u8, bytes: &[u8], nostop: bool) -> Result<usize, BusError>;

    /// Reads into `buf` from the device at `addr`, giving up after `timeout`.
    /// Returns the number of bytes read.
    fn read_timeout(&mut self, addr: u8, buf: &mut [u8], timeout: Duration)
        -> Result<usize, BusError>;
}

impl<T: TwoWireBus + ?Sized> TwoWireBus for &mut T {
    fn write(&mut self, addr: u8, bytes: &[u8], nostop: bool) -> Result<usize, BusError> {
        (**self).write(addr, bytes, nostop)
    }

    fn read_timeout(
        &mut self,
        addr: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, BusError> {
        (**self).read_timeout(addr, buf, timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pull {
    Up,
    Down,
}

/// A discrete input, sampled by polling
pub trait InputPin {
    fn configure_pull(&mut self, pull: Pull);
    fn read(&self) -> bool;
}

/// A discrete output
pub trait OutputPin {
    fn set(&mut self, level: bool);

    fn set_high(&mut self) {
        self.set(true)
    }

    fn set_low(&mut self) {
        self.set(false)
    }
}
