//! # CBUS node stack
//!
//! This library provides the node-side core of a CBUS module (the MERG
//! model-railway control bus layered on CAN 2.0B) for small
//! microcontrollers in no_std environments. It uses caller-provided buffers
//! and const-generic pools, requiring no dynamic memory allocation.
//!
//! ## Architecture
//!
//! ```text
//!  CAN RX ISR ──put──► FrameRing ──peek/get──► dispatcher (external)
//!                                                  │
//!                      ┌───────────────────────────┼──────────────┐
//!                      ▼                           ▼              ▼
//!                LongMessage                     Store        Switch/LEDs
//!                 feed/process               NVs + events      enrol UI
//!                      │                           │
//!                      └──send──► FrameSender ◄────┘
//!                                 (CAN driver)
//! ```
//!
//! Components:
//! * _FrameRing_ ([`buffer`]) captures frames from the receive interrupt with
//!   timestamps, overflow accounting and a newest-wins policy.
//! * _Store_ ([`store`]) persists node identity, node variables and the
//!   learned event table on flash or external EEPROM, with a RAM hash index
//!   for event lookup.
//! * _LongMessage_ ([`longmsg`]) segments and reassembles payloads larger
//!   than one frame, in simplex or multiplex form, with optional CRC-16.
//! * _Indicator_ and _Switch_ ([`indicator`], [`input`]) drive the module's
//!   LED/pushbutton front panel from the foreground loop.
//! * _Params_ ([`params`]) is the descriptor vector reported to the
//!   configuration tool.
//! * [`node`] adapts the pieces to the surface the external opcode
//!   dispatcher consumes.
//!
//! ## Concurrency model
//!
//! A single-threaded cooperative foreground loop with exactly one preemption
//! source, the CAN RX interrupt. Only [`buffer::FrameRing::put`] may be
//! called from the interrupt; every other operation belongs to the
//! foreground. Nothing blocks beyond bounded peripheral transactions, and
//! nothing allocates after construction.
//!
//! Timed behaviour is driven by the [`time::Clock`] capability rather than a
//! global tick, so the whole stack runs under test with a scripted clock.
//!
//! ## Error model
//!
//! Best-effort throughout: send paths report refusal by value, store writes
//! swallow backend errors, receive failures surface as status codes through
//! the long-message handler. No panics on bad external input.
#![no_std]

pub use cbus_core as core;
pub use cbus_driver::{frame, hal, link, time};

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod buffer;
pub mod indicator;
pub mod input;
pub mod longmsg;
pub mod node;
pub mod params;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;
