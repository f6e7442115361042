//! Frame Synchronization Engine
//!
//! Owns the frame counter and derives slot ownership from its parity: the
//! host writes slot `frame_id % 2` while the coprocessor's latest output sits
//! in the other slot. Exactly one side touches a slot in a given frame, so no
//! lock is involved; the protocol is the only concurrency control.
//!
//! # Frame cycle
//!
//! ```text
//!   WaitingForCoprocessor ──(wake event)──▶ ReadyToMutate
//!            ▲                                   │ config writes / status reads
//!            └────────────(publish)──────────────┘
//! ```

use std::fmt;
use std::time::Duration;

use merry_platform::layout::RegionId;
use merry_platform::{CoprocessorBackend, Handle};
use serde::{Deserialize, Serialize};
use tracing::{error, trace};

use crate::error::{SyncError, SyncResult};
use crate::region::MappedRegion;

/// One of the two alternating shared-memory buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    Zero,
    One,
}

impl Slot {
    /// Slot the host writes during `frame_id`
    pub fn for_write(frame_id: u16) -> Self {
        if frame_id % 2 == 1 {
            Slot::One
        } else {
            Slot::Zero
        }
    }

    /// Slot the host reads during `frame_id`
    pub fn for_read(frame_id: u16) -> Self {
        Self::for_write(frame_id).other()
    }

    pub fn other(self) -> Self {
        match self {
            Slot::Zero => Slot::One,
            Slot::One => Slot::Zero,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Slot::Zero => 0,
            Slot::One => 1,
        }
    }
}

/// Steady-state frame operations, for fault reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameOp {
    Wait,
    ClearEvent,
    Publish,
    FlushCache,
}

impl fmt::Display for FrameOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameOp::Wait => "wait_for_frame_boundary",
            FrameOp::ClearEvent => "wake event clear",
            FrameOp::Publish => "publish_frame",
            FrameOp::FlushCache => "data cache flush",
        };
        f.write_str(name)
    }
}

/// Where the host is within the current frame
///
/// Config writes and status reads do not move the state: `ReadyToMutate`
/// covers both the mutation window and "ready to publish".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FramePhase {
    WaitingForCoprocessor,
    ReadyToMutate,
}

/// Frame counter plus the two kernel handles the cycle runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameState {
    /// Next frame id to publish; wraps like the firmware's 16-bit cell
    pub frame_id: u16,

    /// Event the coprocessor's pipe interrupt signals
    pub wake_event: Handle,

    /// Semaphore the host signals to hand a frame over
    pub notify_semaphore: Handle,
}

/// Blocking wait / publish cycle with the coprocessor
#[derive(Debug)]
pub struct FrameSync {
    state: FrameState,
    phase: FramePhase,
    frames_published: u64,
}

impl FrameSync {
    pub fn new(state: FrameState) -> Self {
        Self {
            state,
            phase: FramePhase::WaitingForCoprocessor,
            frames_published: 0,
        }
    }

    pub fn state(&self) -> &FrameState {
        &self.state
    }

    pub fn frame_id(&self) -> u16 {
        self.state.frame_id
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Frames published since bootstrap handed control over
    pub fn frames_published(&self) -> u64 {
        self.frames_published
    }

    pub fn write_slot(&self) -> Slot {
        Slot::for_write(self.state.frame_id)
    }

    pub fn read_slot(&self) -> Slot {
        Slot::for_read(self.state.frame_id)
    }

    /// Block until the coprocessor finishes its frame, then clear the event
    ///
    /// `None` waits without a deadline. Any failure, including an expired
    /// deadline, is a [`SyncError::CoprocessorFault`] and the phase stays
    /// `WaitingForCoprocessor`.
    pub fn wait_for_frame_boundary(
        &mut self,
        backend: &mut dyn CoprocessorBackend,
        timeout: Option<Duration>,
    ) -> SyncResult<()> {
        if self.phase != FramePhase::WaitingForCoprocessor {
            return Err(SyncError::OutOfOrder {
                operation: FrameOp::Wait,
                frame_id: self.state.frame_id,
            });
        }

        let event = self.state.wake_event;
        backend.wait_event(event, timeout).map_err(|source| {
            error!(frame_id = self.state.frame_id, "frame wait failed: {}", source);
            SyncError::CoprocessorFault {
                operation: FrameOp::Wait,
                source,
            }
        })?;
        backend
            .clear_event(event)
            .map_err(|source| SyncError::CoprocessorFault {
                operation: FrameOp::ClearEvent,
                source,
            })?;

        self.phase = FramePhase::ReadyToMutate;
        trace!(frame_id = self.state.frame_id, "frame boundary");
        Ok(())
    }

    /// Stamp the write slot, advance the counter and notify the coprocessor
    ///
    /// `frame_counter` must be the frame-counter region of the current write
    /// slot. Returns the frame id that was published.
    pub fn publish_frame(
        &mut self,
        backend: &mut dyn CoprocessorBackend,
        frame_counter: &MappedRegion,
    ) -> SyncResult<u16> {
        if self.phase != FramePhase::ReadyToMutate {
            return Err(SyncError::OutOfOrder {
                operation: FrameOp::Publish,
                frame_id: self.state.frame_id,
            });
        }
        debug_assert_eq!(frame_counter.id(), RegionId::FrameCounter);

        let published = self.state.frame_id;
        frame_counter.write_u16(0, published);
        self.state.frame_id = published.wrapping_add(1);
        self.phase = FramePhase::WaitingForCoprocessor;
        self.frames_published += 1;

        backend
            .signal_event(self.state.notify_semaphore)
            .map_err(|source| {
                error!(frame_id = published, "frame notify failed: {}", source);
                SyncError::CoprocessorFault {
                    operation: FrameOp::Publish,
                    source,
                }
            })?;

        trace!(frame_id = published, "frame published");
        Ok(published)
    }
}
