//! CBUS driver interface
//!
//! The crate provides the seam between hardware drivers and the CBUS stack.
//! Limited scope facilitates compatibility across versions. Driver and board
//! crates should depend on this crate. Stack users should depend on the `cbus`
//! crate instead.
//!
//! The stack reaches hardware exclusively through the traits defined here:
//!
//! * [`link::FrameSender`] / [`link::FrameSource`]: the polled CAN surface.
//!   The receive side is typically backed by the stack's own frame ring,
//!   filled from the CAN RX interrupt.
//! * [`hal`]: flash sector, two-wire bus and GPIO capabilities consumed by
//!   the persistent store and the user-interface components.
//! * [`time::Clock`]: the monotonic time base. Every timed behaviour in the
//!   stack is driven from this trait, which keeps components testable without
//!   a global time driver.
//!
//! All calls are synchronous and bounded; nothing here suspends. The only
//! operations measured in milliseconds rather than microseconds are flash
//! erase/program and two-wire transactions, which is acceptable for this
//! class of device.

#![no_std]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod frame;
pub mod hal;
pub mod link;
pub mod time;
