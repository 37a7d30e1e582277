//! Persistent configuration store
//!
//! A typed view over one byte-addressable image: node identity at fixed
//! offsets, a node-variable block, and the learned event table, with a
//! RAM-resident hash index for fast event lookup. The image lives on one of
//! two media behind the [`StorageMedium`] capability set: the MCU's own
//! flash sector, or an external serial EEPROM that silently downgrades to
//! flash when the probe fails at [`begin`](Store::begin).
//!
//! Image layout:
//!
//! | Region | Offset |
//! |--------|--------|
//! | FLiM flag | 0 |
//! | CAN ID | 1 |
//! | Node number (big-endian) | 2..=3 |
//! | Reset flag | 5 |
//! | Node variables | `layout.nvs_start` |
//! | Event slots | `layout.events_start` |
//!
//! Each event slot is 4 header bytes (node number, event number, both
//! big-endian) followed by `num_evs` event-variable bytes. A slot whose node
//! number reads `0xFFFF` is unused.
//!
//! The write path is best-effort throughout: backend errors never reach the
//! caller, out-of-range indices are silently ignored.

mod medium;

pub use medium::{EepromBackend, FlashBackend, NoBus, StorageMedium, FLASH_SECTOR_SIZE};

use cbus_core::{CanId, EventId, NodeNumber};
use cbus_driver::hal::{FlashAccess, InputPin, OutputPin, TwoWireBus};
use heapless::Vec;

use crate::indicator::Indicator;
use crate::input::Switch;
use crate::time::{Clock, Duration};

/// Upper bound on event table slots (the hash index is sized for this)
pub const MAX_EVENT_SLOTS: usize = 255;

const FLIM_OFFSET: usize = 0;
const CAN_ID_OFFSET: usize = 1;
const NODE_NUMBER_OFFSET: usize = 2;
const RESET_FLAG_OFFSET: usize = 5;

/// Marker distinguishable from both the virgin byte and a cleared flag
const RESET_FLAG_SET: u8 = 99;

const EVENT_HEADER_LEN: usize = 4;

/// How long the pushbutton must be held to confirm a module reset
const RESET_HOLD: Duration = Duration::from_secs(6);

/// Region geometry, fixed before [`Store::begin`]
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StoreLayout {
    pub nvs_start: usize,
    pub num_nvs: usize,
    pub events_start: usize,
    pub max_events: usize,
    pub num_evs: usize,
}

impl StoreLayout {
    pub const fn bytes_per_event(&self) -> usize {
        self.num_evs + EVENT_HEADER_LEN
    }

    const fn event_offset(&self, slot: usize) -> usize {
        self.events_start + slot * self.bytes_per_event()
    }

    const fn end(&self) -> usize {
        self.events_start + self.max_events * self.bytes_per_event()
    }
}

/// The persistent model: identity, node variables, learned events
pub struct Store<F: FlashAccess, B: TwoWireBus = NoBus> {
    layout: StoreLayout,
    flash: FlashBackend<F>,
    pending_bus: Option<B>,
    eeprom: Option<EepromBackend<B>>,
    hash: Vec<u8, MAX_EVENT_SLOTS>,
}

impl<F: FlashAccess> Store<F, NoBus> {
    /// A store backed by the flash sector alone
    pub fn new_flash(flash: F, layout: StoreLayout) -> Self {
        Self::build(flash, None, layout)
    }
}

impl<F: FlashAccess, B: TwoWireBus> Store<F, B> {
    /// A store backed by an external EEPROM, with flash as the fallback
    /// medium should the probe fail
    pub fn new_with_eeprom(flash: F, bus: B, layout: StoreLayout) -> Self {
        Self::build(flash, Some(bus), layout)
    }

    fn build(flash: F, bus: Option<B>, mut layout: StoreLayout) -> Self {
        layout.max_events = layout.max_events.min(MAX_EVENT_SLOTS);
        Self {
            layout,
            flash: FlashBackend::new(flash),
            pending_bus: bus,
            eeprom: None,
            hash: Vec::new(),
        }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Probes the EEPROM (if any), writes identity defaults into a virgin
    /// image, and builds the event hash index
    pub fn begin(&mut self) {
        if let Some(bus) = self.pending_bus.take() {
            match EepromBackend::probe(bus, self.layout.end()) {
                Ok(eeprom) => self.eeprom = Some(eeprom),
                Err(_) => warn!("eeprom probe failed, falling back to flash"),
            }
        }

        if self.medium().read_byte(FLIM_OFFSET) == 0xff {
            let medium = self.medium();
            medium.write_byte(FLIM_OFFSET, 0);
            medium.write_byte(CAN_ID_OFFSET, CanId::default().into_u8());
            medium.write_bytes(NODE_NUMBER_OFFSET, &[0, 0]);
            medium.commit();
        }

        self.rebuild_event_hash();
    }

    fn medium(&mut self) -> &mut dyn StorageMedium {
        match &mut self.eeprom {
            Some(eeprom) => eeprom,
            None => &mut self.flash,
        }
    }

    // --- identity ---

    pub fn can_id(&mut self) -> CanId {
        CanId::new(self.medium().read_byte(CAN_ID_OFFSET)).unwrap_or_default()
    }

    pub fn set_can_id(&mut self, id: CanId) {
        let medium = self.medium();
        medium.write_byte(CAN_ID_OFFSET, id.into_u8());
        medium.commit();
    }

    pub fn node_number(&mut self) -> NodeNumber {
        let mut bytes = [0; 2];
        self.medium().read_bytes(NODE_NUMBER_OFFSET, &mut bytes);
        NodeNumber::from_be_bytes(bytes)
    }

    pub fn set_node_number(&mut self, number: NodeNumber) {
        let medium = self.medium();
        medium.write_bytes(NODE_NUMBER_OFFSET, &number.to_be_bytes());
        medium.commit();
    }

    pub fn flim(&mut self) -> bool {
        self.medium().read_byte(FLIM_OFFSET) == 1
    }

    pub fn set_flim(&mut self, flim: bool) {
        let medium = self.medium();
        medium.write_byte(FLIM_OFFSET, flim as u8);
        medium.commit();
    }

    // --- node variables ---

    /// Reads node variable `index`; out-of-range reads yield 0
    pub fn read_nv(&mut self, index: usize) -> u8 {
        if index < self.layout.num_nvs {
            let offset = self.layout.nvs_start + index;
            self.medium().read_byte(offset)
        } else {
            0
        }
    }

    /// Writes node variable `index`; out-of-range writes are ignored
    pub fn write_nv(&mut self, index: usize, value: u8) {
        if index < self.layout.num_nvs {
            let offset = self.layout.nvs_start + index;
            let medium = self.medium();
            medium.write_byte(offset, value);
            medium.commit();
        }
    }

    // --- event table ---

    /// First unused slot, or `None` when the table is full
    pub fn find_event_space(&mut self) -> Option<usize> {
        (0..self.layout.max_events).find(|&slot| self.read_event(slot).is_unused())
    }

    /// Number of slots currently in use
    pub fn num_events(&mut self) -> usize {
        (0..self.layout.max_events)
            .filter(|&slot| !self.read_event(slot).is_unused())
            .count()
    }

    /// Reads the 4-byte event header of `slot`
    pub fn read_event(&mut self, slot: usize) -> EventId {
        if slot >= self.layout.max_events {
            return EventId::UNUSED;
        }
        let offset = self.layout.event_offset(slot);
        let mut bytes = [0xff; EVENT_HEADER_LEN];
        self.medium().read_bytes(offset, &mut bytes);
        EventId::from_bytes(bytes)
    }

    /// Writes the 4-byte event header of `slot`; `flush` forces a commit
    pub fn write_event(&mut self, slot: usize, event: EventId, flush: bool) {
        if slot >= self.layout.max_events {
            return;
        }
        let offset = self.layout.event_offset(slot);
        let medium = self.medium();
        medium.write_bytes(offset, &event.to_bytes());
        if flush {
            medium.commit();
        }
    }

    /// Writes event variable `ev_index` (1-based) of `slot`
    pub fn write_event_ev(&mut self, slot: usize, ev_index: usize, value: u8) {
        if slot >= self.layout.max_events || ev_index == 0 || ev_index > self.layout.num_evs {
            return;
        }
        let offset = self.layout.event_offset(slot) + EVENT_HEADER_LEN + ev_index - 1;
        let medium = self.medium();
        medium.write_byte(offset, value);
        medium.commit();
    }

    /// Reads event variable `ev_index` (1-based) of `slot`; out-of-range
    /// reads yield 0
    pub fn event_ev(&mut self, slot: usize, ev_index: usize) -> u8 {
        if slot >= self.layout.max_events || ev_index == 0 || ev_index > self.layout.num_evs {
            return 0;
        }
        let offset = self.layout.event_offset(slot) + EVENT_HEADER_LEN + ev_index - 1;
        self.medium().read_byte(offset)
    }

    /// Writes `0xFF` across the whole event region and clears the hash index
    pub fn clear_events(&mut self) {
        let start = self.layout.events_start;
        let end = self.layout.end();
        let medium = self.medium();
        for offset in start..end {
            medium.write_byte(offset, 0xff);
        }
        medium.commit();
        self.clear_event_hash();
    }

    // --- event hash index ---

    /// Additive 8-bit fold of the 4 header bytes. An unused header folds to
    /// the empty sentinel 0; a populated header may also genuinely fold to 0,
    /// which the scan fallback in [`find_existing_event`] tolerates.
    ///
    /// [`find_existing_event`]: Self::find_existing_event
    fn fold(event: EventId) -> u8 {
        if event.is_unused() {
            return 0;
        }
        event
            .to_bytes()
            .iter()
            .fold(0u8, |acc, byte| acc.wrapping_add(*byte))
    }

    /// Recomputes the hash entry of one slot after its header changed
    pub fn update_event_hash(&mut self, slot: usize) {
        if slot < self.hash.len() {
            let event = self.read_event(slot);
            self.hash[slot] = Self::fold(event);
        }
    }

    /// Rebuilds the whole index by scanning every slot
    pub fn rebuild_event_hash(&mut self) {
        self.hash.clear();
        for slot in 0..self.layout.max_events {
            let event = self.read_event(slot);
            // capacity is MAX_EVENT_SLOTS and max_events is clamped below it
            let _ = self.hash.push(Self::fold(event));
        }
    }

    /// Zeroes the index; every entry then reads as empty until rebuilt
    pub fn clear_event_hash(&mut self) {
        for entry in self.hash.iter_mut() {
            *entry = 0;
        }
    }

    /// Finds the slot teaching `event`, or `None`
    ///
    /// When the event's fold appears exactly once in the index, only that
    /// slot is compared; a collision (including the 0-means-empty ambiguity)
    /// falls back to a linear scan of all slots.
    pub fn find_existing_event(&mut self, event: EventId) -> Option<usize> {
        let fold = Self::fold(event);

        if fold != 0 {
            let mut found = None;
            let mut count = 0;
            for (slot, entry) in self.hash.iter().enumerate() {
                if *entry == fold {
                    count += 1;
                    if found.is_none() {
                        found = Some(slot);
                    }
                }
            }
            if count == 1 {
                let slot = unwrap!(found);
                if self.read_event(slot) == event {
                    return Some(slot);
                }
            }
        }

        (0..self.layout.max_events).find(|&slot| self.read_event(slot) == event)
    }

    // --- reset ---

    pub fn reset_flag(&mut self) -> bool {
        self.medium().read_byte(RESET_FLAG_OFFSET) == RESET_FLAG_SET
    }

    pub fn set_reset_flag(&mut self) {
        let medium = self.medium();
        medium.write_byte(RESET_FLAG_OFFSET, RESET_FLAG_SET);
        medium.commit();
    }

    pub fn clear_reset_flag(&mut self) {
        let medium = self.medium();
        medium.write_byte(RESET_FLAG_OFFSET, 0);
        medium.commit();
    }

    /// Wipes the image back to identity defaults with the reset flag set, so
    /// the next boot can tell a factory reset from a power cycle
    pub fn reset_module(&mut self) {
        let medium = self.medium();
        medium.erase_all();
        medium.write_byte(FLIM_OFFSET, 0);
        medium.write_byte(CAN_ID_OFFSET, CanId::default().into_u8());
        medium.write_bytes(NODE_NUMBER_OFFSET, &[0, 0]);
        medium.write_byte(RESET_FLAG_OFFSET, RESET_FLAG_SET);
        medium.commit();
        self.clear_event_hash();
    }

    /// Boot-time reset with user confirmation: both indicators blink while
    /// the pushbutton decides. The reset proceeds only if the button stays
    /// held for the full hold period; releasing early aborts.
    ///
    /// Spins on the clock; call from startup code only.
    pub fn reset_module_confirmed<G, Y, P, C>(
        &mut self,
        green: &mut Indicator<G, C>,
        yellow: &mut Indicator<Y, C>,
        button: &mut Switch<P, C>,
        clock: C,
    ) -> bool
    where
        G: OutputPin,
        Y: OutputPin,
        P: InputPin,
        C: Clock,
    {
        green.blink();
        yellow.blink();

        let deadline = clock.now() + RESET_HOLD;
        let confirmed = loop {
            green.run();
            yellow.run();
            button.run();

            if !button.is_pressed() {
                break false;
            }
            if clock.now() >= deadline {
                break true;
            }
        };

        green.off();
        yellow.off();
        green.run();
        yellow.run();

        if confirmed {
            info!("module reset confirmed");
            self.reset_module();
        }
        confirmed
    }
}
