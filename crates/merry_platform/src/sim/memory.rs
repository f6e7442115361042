//! Simulated coprocessor DRAM
//!
//! Two banks of 16-bit words. Bank 1 starts at word address `0x10000`, the
//! same bit the host sets to reach slot 1 of a region.

use std::ptr::NonNull;

use crate::error::PlatformError;
use crate::layout::{dsp_u32_from_words, dsp_u32_to_words};
use crate::traits::SLOT1_BANK_OFFSET;

/// Words per bank
pub const BANK_WORDS: usize = SLOT1_BANK_OFFSET as usize;

/// Heap-backed DRAM shared between the simulated coprocessor and the host
///
/// Every access goes through volatile reads and writes on 16-bit words (or
/// single bytes), matching what the host side does through its mapped
/// regions.
pub struct DspRam {
    base: NonNull<u16>,
    words: usize,
}

// SAFETY: The allocation is owned by this value and only freed in Drop.
// Concurrent access follows the slot protocol: the host and the simulated
// coprocessor never touch the same slot within a frame, and the simulator
// runs its frame on the signalling thread.
unsafe impl Send for DspRam {}
unsafe impl Sync for DspRam {}

impl DspRam {
    /// Allocate two zeroed banks
    pub fn new() -> Self {
        let words = BANK_WORDS * 2;
        let boxed: Box<[u16]> = vec![0u16; words].into_boxed_slice();
        let raw = Box::into_raw(boxed) as *mut u16;
        // SAFETY: Box::into_raw never returns null.
        let base = unsafe { NonNull::new_unchecked(raw) };
        Self { base, words }
    }

    /// Total size in bytes
    pub fn len_bytes(&self) -> usize {
        self.words * 2
    }

    /// Process pointer for a DSP word address
    pub fn pointer(&self, dsp_address: u32) -> Result<NonNull<u8>, PlatformError> {
        let word = dsp_address as usize;
        if word >= self.words {
            return Err(PlatformError::UnmappedAddress(dsp_address));
        }
        // SAFETY: word < self.words, so the offset stays inside the allocation.
        let ptr = unsafe { self.base.as_ptr().add(word) } as *mut u8;
        NonNull::new(ptr).ok_or(PlatformError::UnmappedAddress(dsp_address))
    }

    fn byte_ptr(&self, byte_offset: usize, width: usize) -> *mut u8 {
        assert!(
            byte_offset + width <= self.len_bytes(),
            "DSP RAM access out of range: {byte_offset:#x}+{width}"
        );
        // SAFETY: bounds checked above.
        unsafe { (self.base.as_ptr() as *mut u8).add(byte_offset) }
    }

    pub fn read_u8(&self, byte_offset: usize) -> u8 {
        // SAFETY: byte_ptr checks bounds; u8 has no alignment requirement.
        unsafe { self.byte_ptr(byte_offset, 1).read_volatile() }
    }

    pub fn write_u8(&self, byte_offset: usize, value: u8) {
        // SAFETY: byte_ptr checks bounds; u8 has no alignment requirement.
        unsafe { self.byte_ptr(byte_offset, 1).write_volatile(value) }
    }

    pub fn read_u16(&self, byte_offset: usize) -> u16 {
        assert_eq!(byte_offset % 2, 0, "unaligned DSP word read");
        // SAFETY: in bounds and 2-byte aligned (the allocation is u16-aligned).
        unsafe { (self.byte_ptr(byte_offset, 2) as *mut u16).read_volatile() }
    }

    pub fn write_u16(&self, byte_offset: usize, value: u16) {
        assert_eq!(byte_offset % 2, 0, "unaligned DSP word write");
        // SAFETY: in bounds and 2-byte aligned (the allocation is u16-aligned).
        unsafe { (self.byte_ptr(byte_offset, 2) as *mut u16).write_volatile(value) }
    }

    /// Little-endian 32-bit value, low word first
    pub fn read_u32(&self, byte_offset: usize) -> u32 {
        let low = self.read_u16(byte_offset) as u32;
        let high = self.read_u16(byte_offset + 2) as u32;
        (high << 16) | low
    }

    pub fn write_u32(&self, byte_offset: usize, value: u32) {
        self.write_u16(byte_offset, value as u16);
        self.write_u16(byte_offset + 2, (value >> 16) as u16);
    }

    /// Firmware word-order 32-bit value, high word first
    pub fn read_dsp_u32(&self, byte_offset: usize) -> u32 {
        dsp_u32_from_words([self.read_u16(byte_offset), self.read_u16(byte_offset + 2)])
    }

    pub fn write_dsp_u32(&self, byte_offset: usize, value: u32) {
        let [high, low] = dsp_u32_to_words(value);
        self.write_u16(byte_offset, high);
        self.write_u16(byte_offset + 2, low);
    }

    pub fn read_f32(&self, byte_offset: usize) -> f32 {
        f32::from_bits(self.read_u32(byte_offset))
    }
}

impl Default for DspRam {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DspRam {
    fn drop(&mut self) {
        let slice = std::ptr::slice_from_raw_parts_mut(self.base.as_ptr(), self.words);
        // SAFETY: reconstructs exactly the Box leaked in new(), once.
        drop(unsafe { Box::from_raw(slice) });
    }
}
