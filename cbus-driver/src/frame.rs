//! CAN frame object

use embedded_can::{ExtendedId, Id, StandardId};

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidLength;

/// Classic-CAN data vector
///
/// Holds 0 to 8 payload bytes inline. Unused bytes are kept zeroed so that
/// whole-struct comparison works.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Data {
    length: u8,
    bytes: [u8; 8],
}

impl Data {
    pub const MAX_LENGTH: usize = 8;

    /// Creates a new vector from a slice of compatible length.
    pub fn new(data: &[u8]) -> Result<Self, InvalidLength> {
        if data.len() > Self::MAX_LENGTH {
            return Err(InvalidLength);
        }
        let mut bytes = [0; Self::MAX_LENGTH];
        bytes[..data.len()].copy_from_slice(data);

        Ok(Self {
            length: data.len() as u8,
            bytes,
        })
    }

    pub const fn empty() -> Self {
        Self {
            length: 0,
            bytes: [0; Self::MAX_LENGTH],
        }
    }

    pub const fn new_zeros(length: usize) -> Option<Self> {
        if length <= Self::MAX_LENGTH {
            Some(Self {
                length: length as u8,
                bytes: [0; Self::MAX_LENGTH],
            })
        } else {
            None
        }
    }

    pub const fn length(&self) -> usize {
        self.length as usize
    }
}

impl Default for Data {
    fn default() -> Self {
        Data::empty()
    }
}

impl core::ops::Deref for Data {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.bytes[..self.length()]
    }
}

impl core::ops::DerefMut for Data {
    fn deref_mut(&mut self) -> &mut Self::Target {
        let length = self.length();
        &mut self.bytes[..length]
    }
}

/// The primitive wire datum: one CAN 2.0 frame
///
/// Immutable after capture by convention; two frames compare equal on full
/// field equality. The identifier is kept raw (11 or 29 bits per `ext`):
/// CBUS dispatches on opcode bytes, so the stack never decodes the ID beyond
/// the priority nibble and sender CAN ID helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanFrame {
    pub id: u32,
    pub ext: bool,
    pub rtr: bool,
    pub data: Data,
}

impl CanFrame {
    pub fn new(id: u32, data: &[u8]) -> Result<Self, InvalidLength> {
        Ok(Self {
            id,
            ext: false,
            rtr: false,
            data: Data::new(data)?,
        })
    }

    /// First payload byte, where the CBUS opcode lives
    pub fn opcode(&self) -> Option<u8> {
        self.data.first().copied()
    }

    /// Sender CAN ID: the low 7 bits of an 11-bit CBUS identifier
    pub const fn sender_can_id(&self) -> u8 {
        (self.id & 0x7f) as u8
    }
}

impl embedded_can::Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        let data = Data::new(data).ok()?;
        let (id, ext) = match id.into() {
            Id::Standard(id) => (u32::from(id.as_raw()), false),
            Id::Extended(id) => (id.as_raw(), true),
        };
        Some(Self {
            id,
            ext,
            rtr: false,
            data,
        })
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        let data = Data::new_zeros(dlc)?;
        let (id, ext) = match id.into() {
            Id::Standard(id) => (u32::from(id.as_raw()), false),
            Id::Extended(id) => (id.as_raw(), true),
        };
        Some(Self {
            id,
            ext,
            rtr: true,
            data,
        })
    }

    fn is_extended(&self) -> bool {
        self.ext
    }

    fn is_remote_frame(&self) -> bool {
        self.rtr
    }

    fn id(&self) -> Id {
        if self.ext {
            Id::Extended(unwrap!(ExtendedId::new(self.id & ExtendedId::MAX.as_raw())))
        } else {
            Id::Standard(unwrap!(StandardId::new(
                (self.id as u16) & StandardId::MAX.as_raw()
            )))
        }
    }

    fn dlc(&self) -> usize {
        self.data.length()
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}
