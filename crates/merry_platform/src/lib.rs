//! Merry Platform - Coprocessor Hardware-Handle Layer
//!
//! This crate provides the seam between the synchronization core and the
//! system services that reach the audio coprocessor:
//! - Component (firmware) upload and unload
//! - Kernel events, the notify semaphore and interrupt registration
//! - The audio pipe used for opcodes and the address-table handshake
//! - DSP DRAM to process address translation and cache maintenance
//! - The firmware memory-layout contract shared by host and coprocessor
//!
//! # Backends
//!
//! | Backend      | Feature | Notes                                      |
//! |--------------|---------|--------------------------------------------|
//! | `SimBackend` | `sim`   | Deterministic in-process coprocessor model |
//!
//! Hardware backends implement the `CoprocessorBackend` trait outside this
//! crate; the core only ever talks to the trait.

mod error;
mod traits;

pub mod layout;

#[cfg(feature = "sim")]
pub mod sim;

pub use error::PlatformError;
pub use traits::{
    CoprocessorBackend, Handle, PipeOpcode, AUDIO_PIPE, PIPE_INTERRUPT, SEMAPHORE_DATA_AVAILABLE,
    SEMAPHORE_FRAME_MASK, SLOT1_BANK_OFFSET,
};

/// Check whether the simulated backend was compiled in
pub fn has_simulator() -> bool {
    cfg!(feature = "sim")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        let _ = has_simulator();
        assert_eq!(layout::RegionId::ALL.len(), layout::REGION_COUNT);
        assert_eq!(PipeOpcode::Initialize as u32, 0);
    }
}
