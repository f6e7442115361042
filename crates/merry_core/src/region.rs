//! Memory-mapped coprocessor regions
//!
//! A [`MappedRegion`] is a bounds-checked window onto coprocessor DRAM.
//! Every access is a volatile read or write of a byte or a 16-bit word, so
//! the compiler never caches, merges or reorders accesses the coprocessor
//! can observe. Wider fields are built from 16-bit halves, which also keeps
//! them valid on word-aligned (not dword-aligned) DSP addresses.

use std::ptr::NonNull;

use merry_platform::layout::{dsp_u32_from_words, dsp_u32_to_words, Access, RegionId};

/// Volatile accessor over one named region of one slot
#[derive(Debug)]
pub struct MappedRegion {
    id: RegionId,
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: The region aliases coprocessor DRAM owned by the backend, not by
// this value. Moving it to another thread is fine; the slot protocol decides
// who may touch the memory in any given frame.
unsafe impl Send for MappedRegion {}

impl MappedRegion {
    /// Wrap `len` bytes of coprocessor memory starting at `base`
    ///
    /// # Safety
    ///
    /// `base` must be valid for volatile reads and writes of `len` bytes,
    /// 2-byte aligned, and stay valid for the whole lifetime of the returned
    /// value.
    pub(crate) unsafe fn new(id: RegionId, base: NonNull<u8>, len: usize) -> Self {
        debug_assert_eq!(base.as_ptr() as usize % 2, 0, "DSP regions are word aligned");
        Self { id, base, len }
    }

    pub fn id(&self) -> RegionId {
        self.id
    }

    pub fn access(&self) -> Access {
        self.id.access()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Process address of the first byte
    pub fn address(&self) -> usize {
        self.base.as_ptr() as usize
    }

    fn ptr(&self, offset: usize, width: usize) -> *mut u8 {
        assert!(
            offset
                .checked_add(width)
                .map_or(false, |end| end <= self.len),
            "{} access out of range: offset {:#x} width {} len {:#x}",
            self.id.name(),
            offset,
            width,
            self.len
        );
        // SAFETY: offset + width <= len, and base is valid for len bytes.
        unsafe { self.base.as_ptr().add(offset) }
    }

    fn word_ptr(&self, offset: usize) -> *mut u16 {
        assert_eq!(offset % 2, 0, "{} word access at odd offset {:#x}", self.id.name(), offset);
        self.ptr(offset, 2) as *mut u16
    }

    fn check_writable(&self) {
        assert_eq!(
            self.access(),
            Access::HostWritable,
            "host write into coprocessor-owned {}",
            self.id.name()
        );
    }

    pub fn read_u8(&self, offset: usize) -> u8 {
        // SAFETY: in bounds; bytes need no alignment.
        unsafe { self.ptr(offset, 1).read_volatile() }
    }

    pub fn read_bool(&self, offset: usize) -> bool {
        self.read_u8(offset) != 0
    }

    pub fn read_u16(&self, offset: usize) -> u16 {
        // SAFETY: in bounds and even offset from a word-aligned base.
        unsafe { self.word_ptr(offset).read_volatile() }
    }

    pub fn read_i16(&self, offset: usize) -> i16 {
        self.read_u16(offset) as i16
    }

    /// Little-endian 32-bit field (low half first)
    pub fn read_u32(&self, offset: usize) -> u32 {
        let low = self.read_u16(offset) as u32;
        let high = self.read_u16(offset + 2) as u32;
        (high << 16) | low
    }

    pub fn read_f32(&self, offset: usize) -> f32 {
        f32::from_bits(self.read_u32(offset))
    }

    /// Firmware word-order 32-bit field (high half first)
    pub fn read_dsp_u32(&self, offset: usize) -> u32 {
        dsp_u32_from_words([self.read_u16(offset), self.read_u16(offset + 2)])
    }

    pub fn read_dsp_i32(&self, offset: usize) -> i32 {
        self.read_dsp_u32(offset) as i32
    }

    /// Copy consecutive 16-bit words starting at `offset`
    pub fn read_words(&self, offset: usize, out: &mut [u16]) {
        for (index, word) in out.iter_mut().enumerate() {
            *word = self.read_u16(offset + index * 2);
        }
    }

    pub(crate) fn write_u8(&self, offset: usize, value: u8) {
        self.check_writable();
        // SAFETY: in bounds; bytes need no alignment.
        unsafe { self.ptr(offset, 1).write_volatile(value) }
    }

    pub(crate) fn write_bool(&self, offset: usize, value: bool) {
        self.write_u8(offset, value as u8);
    }

    pub(crate) fn write_u16(&self, offset: usize, value: u16) {
        self.check_writable();
        // SAFETY: in bounds and even offset from a word-aligned base.
        unsafe { self.word_ptr(offset).write_volatile(value) }
    }

    pub(crate) fn write_i16(&self, offset: usize, value: i16) {
        self.write_u16(offset, value as u16);
    }

    pub(crate) fn write_u32(&self, offset: usize, value: u32) {
        self.write_u16(offset, value as u16);
        self.write_u16(offset + 2, (value >> 16) as u16);
    }

    pub(crate) fn write_f32(&self, offset: usize, value: f32) {
        self.write_u32(offset, value.to_bits());
    }

    pub(crate) fn write_dsp_u32(&self, offset: usize, value: u32) {
        self.write_words(offset, &dsp_u32_to_words(value));
    }

    pub(crate) fn write_words(&self, offset: usize, words: &[u16]) {
        for (index, word) in words.iter().enumerate() {
            self.write_u16(offset + index * 2, *word);
        }
    }

    /// Set bits in a little-endian 32-bit flag word without touching the others
    pub(crate) fn set_bits_u32(&self, offset: usize, bits: u32) {
        let current = self.read_u32(offset);
        self.write_u32(offset, current | bits);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Heap memory standing in for one coprocessor region
    pub(crate) struct Backing {
        words: Box<[u16]>,
    }

    impl Backing {
        pub(crate) fn for_region(id: RegionId) -> Self {
            Self {
                words: vec![0u16; (id.size() + 1) / 2].into_boxed_slice(),
            }
        }

        pub(crate) fn region(&mut self, id: RegionId) -> MappedRegion {
            let len = self.words.len() * 2;
            let base = NonNull::new(self.words.as_mut_ptr() as *mut u8).unwrap();
            // SAFETY: the backing outlives every region the tests create from it.
            unsafe { MappedRegion::new(id, base, len) }
        }

        pub(crate) fn word(&self, index: usize) -> u16 {
            self.words[index]
        }

        /// Write as the coprocessor would, bypassing host access checks
        pub(crate) fn set_word(&mut self, index: usize, value: u16) {
            self.words[index] = value;
        }

        pub(crate) fn set_byte(&mut self, offset: usize, value: u8) {
            let word = &mut self.words[offset / 2];
            let mut bytes = word.to_ne_bytes();
            bytes[offset % 2] = value;
            *word = u16::from_ne_bytes(bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::Backing;
    use super::*;

    #[test]
    fn test_word_orders() {
        let mut backing = Backing::for_region(RegionId::DspConfiguration);
        let region = backing.region(RegionId::DspConfiguration);

        region.write_u32(0x00, 0xAABB_CCDD);
        region.write_dsp_u32(0x04, 0xAABB_CCDD);

        assert_eq!(backing.word(0), 0xCCDD);
        assert_eq!(backing.word(1), 0xAABB);
        assert_eq!(backing.word(2), 0xAABB);
        assert_eq!(backing.word(3), 0xCCDD);
    }

    #[test]
    fn test_scalar_accessors() {
        let mut backing = Backing::for_region(RegionId::SourceConfigurations);
        let region = backing.region(RegionId::SourceConfigurations);

        region.write_f32(0x34, 1.5);
        region.write_i16(0x3C, -42);
        region.write_bool(0xA0, true);
        region.set_bits_u32(0x00, 1 << 25);
        region.set_bits_u32(0x00, 1 << 16);

        assert_eq!(region.read_f32(0x34), 1.5);
        assert_eq!(region.read_i16(0x3C), -42);
        assert!(region.read_bool(0xA0));
        assert_eq!(region.read_u32(0x00), (1 << 25) | (1 << 16));
        assert_eq!(region.len(), RegionId::SourceConfigurations.size());
    }

    #[test]
    fn test_words_copy() {
        let mut backing = Backing::for_region(RegionId::Compressor);
        let region = backing.region(RegionId::Compressor);
        region.write_words(4, &[1, 2, 3]);

        let mut out = [0u16; 3];
        region.read_words(4, &mut out);
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_bounds_read_panics() {
        let mut backing = Backing::for_region(RegionId::FrameCounter);
        let region = backing.region(RegionId::FrameCounter);
        region.read_u32(0);
    }

    #[test]
    #[should_panic(expected = "host write into coprocessor-owned")]
    fn test_write_to_status_region_panics() {
        let mut backing = Backing::for_region(RegionId::SourceStatuses);
        let region = backing.region(RegionId::SourceStatuses);
        region.write_u16(0, 1);
    }
}
