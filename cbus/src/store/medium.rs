//! Storage media backing the persistent store
//!
//! Two media are supported: the MCU's own flash, treated as a single
//! erasable sector with a RAM shadow, and an external serial EEPROM reached
//! over a two-wire bus with per-byte transactions. Both are driven through
//! the [`StorageMedium`] capability set so the store proper stays
//! media-agnostic.

use cbus_driver::hal::{BusError, FlashAccess, TwoWireBus};

use crate::time::Duration;

/// Size of the flash sector backing the store
pub const FLASH_SECTOR_SIZE: usize = 4096;

/// Fixed bus address of the external EEPROM
const EEPROM_ADDRESS: u8 = 0x50;

/// Bounded wait for a single EEPROM byte read
const EEPROM_READ_TIMEOUT: Duration = Duration::from_millis(5);

/// Byte-addressable persistence capability
///
/// Writes may be deferred; [`commit`](StorageMedium::commit) makes the image
/// durable. Reads after a write observe the written value regardless of
/// commit state.
pub trait StorageMedium {
    fn read_byte(&mut self, offset: usize) -> u8;
    fn write_byte(&mut self, offset: usize, value: u8);

    fn read_bytes(&mut self, offset: usize, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read_byte(offset + i);
        }
    }

    fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            self.write_byte(offset + i, *byte);
        }
    }

    /// Resets the whole image to `0xFF`
    fn erase_all(&mut self);

    fn commit(&mut self);
}

/// On-chip flash medium: one sector cached in RAM, flushed on commit
pub struct FlashBackend<F: FlashAccess> {
    flash: F,
    shadow: [u8; FLASH_SECTOR_SIZE],
    dirty: bool,
}

impl<F: FlashAccess> FlashBackend<F> {
    pub fn new(flash: F) -> Self {
        let mut backend = Self {
            flash,
            shadow: [0xff; FLASH_SECTOR_SIZE],
            dirty: false,
        };
        backend.flash.read(0, &mut backend.shadow);
        backend
    }

    /// Releases the flash access handle
    pub fn into_inner(self) -> F {
        self.flash
    }
}

impl<F: FlashAccess> StorageMedium for FlashBackend<F> {
    fn read_byte(&mut self, offset: usize) -> u8 {
        self.shadow.get(offset).copied().unwrap_or(0xff)
    }

    fn write_byte(&mut self, offset: usize, value: u8) {
        if let Some(byte) = self.shadow.get_mut(offset) {
            if *byte != value {
                *byte = value;
                self.dirty = true;
            }
        }
    }

    fn read_bytes(&mut self, offset: usize, buf: &mut [u8]) {
        let end = (offset + buf.len()).min(FLASH_SECTOR_SIZE);
        if offset < end {
            buf[..end - offset].copy_from_slice(&self.shadow[offset..end]);
        }
        if end < offset + buf.len() {
            buf[end.saturating_sub(offset)..].fill(0xff);
        }
    }

    fn erase_all(&mut self) {
        self.shadow.fill(0xff);
        self.dirty = true;
    }

    fn commit(&mut self) {
        if self.dirty {
            self.flash.erase_sector(0, FLASH_SECTOR_SIZE);
            self.flash.program(0, &self.shadow);
            self.dirty = false;
        }
    }
}

/// External serial EEPROM medium
///
/// Every write is an immediate `[address, value]` transaction; reads set the
/// address pointer and read one byte back with a bounded wait. There is no
/// shadow and commit is a no-op.
pub struct EepromBackend<B: TwoWireBus> {
    bus: B,
    size: usize,
}

impl<B: TwoWireBus> EepromBackend<B> {
    /// Probes the device with an address-pointer write. A device that does
    /// not acknowledge yields the bus back so the caller can fall back to
    /// flash.
    pub fn probe(mut bus: B, size: usize) -> Result<Self, (B, BusError)> {
        match bus.write(EEPROM_ADDRESS, &[0], false) {
            Ok(_) => Ok(Self { bus, size }),
            Err(e) => Err((bus, e)),
        }
    }
}

impl<B: TwoWireBus> StorageMedium for EepromBackend<B> {
    fn read_byte(&mut self, offset: usize) -> u8 {
        let mut byte = [0xff];
        let _ = self.bus.write(EEPROM_ADDRESS, &[offset as u8], true);
        let _ = self
            .bus
            .read_timeout(EEPROM_ADDRESS, &mut byte, EEPROM_READ_TIMEOUT);
        byte[0]
    }

    fn write_byte(&mut self, offset: usize, value: u8) {
        let _ = self.bus.write(EEPROM_ADDRESS, &[offset as u8, value], false);
    }

    fn erase_all(&mut self) {
        for offset in 0..self.size {
            self.write_byte(offset, 0xff);
        }
    }

    fn commit(&mut self) {}
}

/// Placeholder bus type for flash-only stores
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NoBus;

impl TwoWireBus for NoBus {
    fn write(&mut self, _addr: u8, _bytes: &[u8], _nostop: bool) -> Result<usize, BusError> {
        Err(BusError::Nak)
    }

    fn read_timeout(
        &mut self,
        _addr: u8,
        _buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, BusError> {
        Err(BusError::Nak)
    }
}
