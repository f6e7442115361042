//! Coprocessor Backend Traits
//!
//! Defines the hardware-handle layer every backend must provide: component
//! upload, kernel events, the audio pipe, the notify semaphore and
//! DSP-to-process address translation.

use std::ptr::NonNull;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PlatformError;

/// Pipe carrying audio control opcodes and the address-table handshake
pub const AUDIO_PIPE: u32 = 2;

/// Interrupt type for pipe-related coprocessor interrupts
pub const PIPE_INTERRUPT: u32 = 2;

/// Semaphore value telling the coprocessor that host data is available
pub const SEMAPHORE_DATA_AVAILABLE: u16 = 0x4000;

/// Wake reasons the notify semaphore is restricted to
pub const SEMAPHORE_FRAME_MASK: u16 = 0x2000;

/// Bit that selects the second bank of coprocessor DRAM
pub const SLOT1_BANK_OFFSET: u32 = 0x1_0000;

/// Opaque kernel handle (event or semaphore)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle(u32);

impl Handle {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Opcodes written to the audio pipe, 4-byte little-endian words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PipeOpcode {
    /// Request initialisation (starts the address-table handshake)
    Initialize = 0,
    /// Request shutdown / idle
    Shutdown = 1,
}

impl PipeOpcode {
    pub fn to_le_bytes(self) -> [u8; 4] {
        (self as u32).to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; 4]) -> Option<Self> {
        match u32::from_le_bytes(bytes) {
            0 => Some(Self::Initialize),
            1 => Some(Self::Shutdown),
            _ => None,
        }
    }
}

/// Hardware-handle layer for the audio coprocessor
///
/// Each backend (real hardware service, simulator) implements this trait so
/// the synchronization core never touches OS-specific calls directly.
///
/// # Safety
///
/// Implementors guarantee that every pointer returned by
/// [`convert_dsp_address`](CoprocessorBackend::convert_dsp_address) addresses
/// memory that stays mapped and valid for reads and writes, up to the end of
/// the coprocessor DRAM bank containing it, for as long as the backend value
/// is alive. The memory may be written concurrently by the coprocessor, so
/// callers only access it with volatile operations.
pub unsafe trait CoprocessorBackend: Send {
    /// Get the name of this backend
    fn name(&self) -> &'static str;

    /// Unload whatever component the coprocessor is running
    fn unload_component(&mut self) -> Result<(), PlatformError>;

    /// Upload a firmware component
    ///
    /// Returns whether the coprocessor reports the component as loaded.
    fn load_component(
        &mut self,
        image: &[u8],
        prog_mask: u16,
        data_mask: u16,
    ) -> Result<bool, PlatformError>;

    /// Create a one-shot (sticky until cleared) event
    fn create_event(&mut self) -> Result<Handle, PlatformError>;

    /// Route coprocessor interrupts of `interrupt` type on `channel` to `event`
    ///
    /// Passing `None` unregisters delivery.
    fn register_interrupt_events(
        &mut self,
        event: Option<Handle>,
        interrupt: u32,
        channel: u32,
    ) -> Result<(), PlatformError>;

    /// Obtain the cross-process notify semaphore handle
    fn semaphore_handle(&mut self) -> Result<Handle, PlatformError>;

    /// Restrict the semaphore to the given wake-reason bits
    fn set_semaphore_mask(&mut self, mask: u16) -> Result<(), PlatformError>;

    /// Write a value into the coprocessor semaphore register
    fn set_semaphore(&mut self, value: u16) -> Result<(), PlatformError>;

    /// Write bytes to a coprocessor pipe
    fn write_pipe(&mut self, channel: u32, data: &[u8]) -> Result<(), PlatformError>;

    /// Read up to `buf.len()` bytes from a coprocessor pipe
    ///
    /// Returns the number of bytes actually read.
    fn read_pipe(&mut self, channel: u32, buf: &mut [u8]) -> Result<usize, PlatformError>;

    /// Block until `event` is signalled
    ///
    /// `None` waits without a deadline; an expired deadline returns
    /// [`PlatformError::Timeout`].
    fn wait_event(&mut self, event: Handle, timeout: Option<Duration>) -> Result<(), PlatformError>;

    /// Reset a signalled event
    fn clear_event(&mut self, event: Handle) -> Result<(), PlatformError>;

    /// Signal an event or semaphore handle
    fn signal_event(&mut self, handle: Handle) -> Result<(), PlatformError>;

    /// Release a handle
    fn close_handle(&mut self, handle: Handle) -> Result<(), PlatformError>;

    /// Translate a coprocessor DRAM word address into a process pointer
    fn convert_dsp_address(&self, dsp_address: u32) -> Result<NonNull<u8>, PlatformError>;

    /// Flush CPU data cache lines covering `data` before the coprocessor reads it
    fn flush_data_cache(&self, data: &[u8]) -> Result<(), PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_encoding() {
        assert_eq!(PipeOpcode::Initialize.to_le_bytes(), [0, 0, 0, 0]);
        assert_eq!(PipeOpcode::Shutdown.to_le_bytes(), [1, 0, 0, 0]);
        assert_eq!(
            PipeOpcode::from_le_bytes([1, 0, 0, 0]),
            Some(PipeOpcode::Shutdown)
        );
        assert_eq!(PipeOpcode::from_le_bytes([7, 0, 0, 0]), None);
    }

    #[test]
    fn test_handle_serialization() {
        let handle = Handle::from_raw(0x42);
        let json = serde_json::to_string(&handle).unwrap();
        let deserialized: Handle = serde_json::from_str(&json).unwrap();
        assert_eq!(handle, deserialized);
        assert_eq!(deserialized.raw(), 0x42);
    }
}
