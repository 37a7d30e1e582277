//! Interrupt-safe bounded frame ring
//!
//! The ring sits between the CAN RX interrupt and the foreground dispatcher:
//! the interrupt handler calls [`FrameRing::put`], the foreground consumes
//! with [`peek`](FrameRing::peek)/[`get`](FrameRing::get). When full, a put
//! overwrites the oldest frame and counts an overflow; the newest traffic
//! always wins.
//!
//! # Concurrency
//!
//! Single-producer/single-consumer discipline, enforced by convention:
//!
//! * `put` is the producer entry point and the only call safe from interrupt
//!   context.
//! * Every other mutating call (`get`, `clear`) belongs to the foreground
//!   consumer and must not be invoked from an interrupt.
//!
//! Indices and statistics are 8/32-bit atomics; the producer publishes a new
//! slot with a release store on `size`, the consumer acquires it before
//! reading. No locks, no critical sections.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::frame::CanFrame;
use crate::time::{Clock, Instant};

/// Largest usable capacity: indices and the size statistic are 8-bit
pub const MAX_CAPACITY: usize = u8::MAX as usize;

#[derive(Clone, Copy)]
struct Slot {
    frame: CanFrame,
    captured_at: Instant,
}

impl Slot {
    const fn empty() -> Self {
        Self {
            frame: CanFrame {
                id: 0,
                ext: false,
                rtr: false,
                data: crate::frame::Data::empty(),
            },
            captured_at: Instant::from_ticks(0),
        }
    }
}

/// Fixed-capacity ring of received frames with capture timestamps
///
/// A capacity-0 ring accepts every call, stores nothing and yields `None`
/// from the consumer side.
pub struct FrameRing<C: Clock, const N: usize> {
    clock: C,
    slots: [UnsafeCell<Slot>; N],
    head: AtomicU8,
    tail: AtomicU8,
    full: AtomicBool,
    size: AtomicU8,
    high_water: AtomicU8,
    puts: AtomicU32,
    gets: AtomicU32,
    overflows: AtomicU32,
}

// Safety: slot cells are only written by the single producer (`put`) at
// `head` and only read by the single consumer at `tail`; publication is
// ordered through the release/acquire pair on `size`.
unsafe impl<C: Clock + Sync, const N: usize> Sync for FrameRing<C, N> {}

impl<C: Clock, const N: usize> FrameRing<C, N> {
    const _ASSERT: usize = MAX_CAPACITY - N;

    pub fn new(clock: C) -> Self {
        let _ = Self::_ASSERT;
        Self {
            clock,
            slots: core::array::from_fn(|_| UnsafeCell::new(Slot::empty())),
            head: AtomicU8::new(0),
            tail: AtomicU8::new(0),
            full: AtomicBool::new(false),
            size: AtomicU8::new(0),
            high_water: AtomicU8::new(0),
            puts: AtomicU32::new(0),
            gets: AtomicU32::new(0),
            overflows: AtomicU32::new(0),
        }
    }

    /// Stores a frame, stamping it with the capture time
    ///
    /// If the ring is full the oldest frame is overwritten and the overflow
    /// counter incremented. Producer-side call; safe from the RX interrupt.
    pub fn put(&self, frame: &CanFrame) {
        if N == 0 {
            return;
        }

        let head = self.head.load(Ordering::Relaxed);
        // Safety: single producer: slots are written only here, only at `head`,
        // which the consumer never reads while `size` excludes it (non-overflow
        // case). The overflow overwrite races a concurrent `peek` by design,
        // matching the put-wins-on-full policy.
        unsafe {
            *self.slots[usize::from(head)].get() = Slot {
                frame: *frame,
                captured_at: self.clock.now(),
            };
        }

        // Counters have a single writer each (producer here, consumer in
        // `get`), so plain load/store pairs suffice. ARMv6-M cores have no
        // RMW atomics.
        let mut tail = self.tail.load(Ordering::Relaxed);
        if self.full.load(Ordering::Relaxed) {
            tail = Self::advance(tail);
            self.tail.store(tail, Ordering::Relaxed);
            let overflows = self.overflows.load(Ordering::Relaxed);
            self.overflows.store(overflows + 1, Ordering::Relaxed);
        }

        let head = Self::advance(head);
        self.head.store(head, Ordering::Relaxed);
        let full = head == tail;
        self.full.store(full, Ordering::Relaxed);

        let size = Self::derive_size(full, head, tail);
        self.size.store(size, Ordering::Release);
        if size > self.high_water.load(Ordering::Relaxed) {
            self.high_water.store(size, Ordering::Relaxed);
        }
        let puts = self.puts.load(Ordering::Relaxed);
        self.puts.store(puts + 1, Ordering::Relaxed);
    }

    /// Copies out the oldest frame without removing it
    pub fn peek(&self) -> Option<CanFrame> {
        if N == 0 || self.size.load(Ordering::Acquire) == 0 {
            return None;
        }
        let tail = self.tail.load(Ordering::Relaxed);
        // Safety: the slot at `tail` was published by the producer before the
        // acquired `size` made it visible.
        Some(unsafe { (*self.slots[usize::from(tail)].get()).frame })
    }

    /// Capture time of the oldest frame, `None` when empty
    ///
    /// Read this before [`get`](Self::get) removes the frame.
    pub fn insert_time(&self) -> Option<Instant> {
        if N == 0 || self.size.load(Ordering::Acquire) == 0 {
            return None;
        }
        let tail = self.tail.load(Ordering::Relaxed);
        // Safety: as in `peek`.
        Some(unsafe { (*self.slots[usize::from(tail)].get()).captured_at })
    }

    /// Removes and returns the oldest frame. Consumer-side call.
    pub fn get(&self) -> Option<CanFrame> {
        if N == 0 || self.size.load(Ordering::Acquire) == 0 {
            return None;
        }

        let tail = self.tail.load(Ordering::Relaxed);
        // Safety: as in `peek`.
        let slot = unsafe { *self.slots[usize::from(tail)].get() };

        self.full.store(false, Ordering::Relaxed);
        let tail = Self::advance(tail);
        self.tail.store(tail, Ordering::Relaxed);

        let head = self.head.load(Ordering::Relaxed);
        self.size
            .store(Self::derive_size(false, head, tail), Ordering::Release);
        let gets = self.gets.load(Ordering::Relaxed);
        self.gets.store(gets + 1, Ordering::Relaxed);

        Some(slot.frame)
    }

    /// Discards all stored frames. Statistics are retained.
    pub fn clear(&self) {
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
        self.full.store(false, Ordering::Relaxed);
        self.size.store(0, Ordering::Release);
    }

    pub fn available(&self) -> bool {
        self.size() > 0
    }

    pub fn size(&self) -> u8 {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_full(&self) -> bool {
        self.full.load(Ordering::Relaxed)
    }

    pub const fn capacity(&self) -> u8 {
        N as u8
    }

    pub fn free_slots(&self) -> u8 {
        self.capacity() - self.size()
    }

    /// Largest number of frames ever held at once
    pub fn high_water_mark(&self) -> u8 {
        self.high_water.load(Ordering::Relaxed)
    }

    pub fn puts(&self) -> u32 {
        self.puts.load(Ordering::Relaxed)
    }

    pub fn gets(&self) -> u32 {
        self.gets.load(Ordering::Relaxed)
    }

    pub fn overflows(&self) -> u32 {
        self.overflows.load(Ordering::Relaxed)
    }

    const fn advance(index: u8) -> u8 {
        ((index as usize + 1) % N) as u8
    }

    const fn derive_size(full: bool, head: u8, tail: u8) -> u8 {
        if full {
            N as u8
        } else if head >= tail {
            head - tail
        } else {
            (N + head as usize - tail as usize) as u8
        }
    }
}
