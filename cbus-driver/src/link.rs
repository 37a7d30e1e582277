//! Polled channels connecting a CAN driver and the CBUS stack
//!
//! Unlike async network stacks, CBUS modules run a cooperative foreground
//! loop: the dispatcher polls for received frames and pushes outgoing frames
//! synchronously. Both traits here reflect that: no operation blocks, and a
//! refused send is reported by value, never retried internally.

use cbus_core::Priority;

use crate::frame::CanFrame;

/// Consumer of frames for transmission
///
/// The CBUS priority nibble is passed alongside the frame; the driver is
/// responsible for packing it into the high bits of the CAN identifier
/// together with the node's own CAN ID. RTR and extended flags travel inside
/// the frame itself.
pub trait FrameSender {
    /// Queues a frame for transmission. Returns true iff the frame was
    /// accepted by the driver.
    fn send_frame(&mut self, frame: &CanFrame, priority: Priority) -> bool;
}

impl<T: FrameSender + ?Sized> FrameSender for &mut T {
    fn send_frame(&mut self, frame: &CanFrame, priority: Priority) -> bool {
        (**self).send_frame(frame, priority)
    }
}

/// Producer of received frames, polled from the foreground loop
pub trait FrameSource {
    /// True iff a call to [`next_frame`](Self::next_frame) would yield a frame
    fn available(&self) -> bool;

    /// Removes and returns the oldest captured frame
    fn next_frame(&mut self) -> Option<CanFrame>;
}

impl<T: FrameSource + ?Sized> FrameSource for &mut T {
    fn available(&self) -> bool {
        (**self).available()
    }

    fn next_frame(&mut self) -> Option<CanFrame> {
        (**self).next_frame()
    }
}
