//! Simulated coprocessor firmware
//!
//! Consumes the dirty-flagged configuration of one slot per frame, clears the
//! dirty bits, advances each source through its buffer queue and writes the
//! resulting status back into the same slot. No audio is mixed: sample
//! regions are left as they are.

use crate::layout::{
    self, buffer, source_config, source_status, DspConfigDirty, RegionId, SourceDirty,
    ADDRESS_TABLE_LEN, NUM_SOURCES, QUEUE_SLOTS, SAMPLES_PER_FRAME,
};
use crate::traits::SLOT1_BANK_OFFSET;

use super::memory::DspRam;

/// First word address handed out by the simulated address table
const REGION_BASE_WORD: u16 = 0x8000;

/// Words reserved for each address-table entry past the named regions
const AUXILIARY_WORDS: u16 = 0x10;

/// Word addresses of every address-table entry, slot 0 bank
#[derive(Debug, Clone)]
pub struct SimLayout {
    addresses: Vec<u16>,
}

impl SimLayout {
    pub fn new() -> Self {
        let mut addresses = Vec::with_capacity(ADDRESS_TABLE_LEN as usize);
        let mut next = REGION_BASE_WORD;
        for region in RegionId::ALL {
            addresses.push(next);
            let words = ((region.size() + 1) / 2) as u16;
            next += words;
        }
        while addresses.len() < ADDRESS_TABLE_LEN as usize {
            addresses.push(next);
            next += AUXILIARY_WORDS;
        }
        Self { addresses }
    }

    pub fn addresses(&self) -> &[u16] {
        &self.addresses
    }

    /// Byte offset into [`DspRam`] of `region` in `slot`
    pub fn region_offset(&self, region: RegionId, slot: usize) -> usize {
        let mut word = self.addresses[region.index()] as u32;
        if slot == 1 {
            word |= SLOT1_BANK_OFFSET;
        }
        word as usize * 2
    }
}

impl Default for SimLayout {
    fn default() -> Self {
        Self::new()
    }
}

/// What the simulated coprocessor saw in one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    /// Value of the frame-counter cell of the consumed slot
    pub frame_counter: u16,

    /// Slot the coprocessor consumed and produced status into
    pub slot: usize,

    /// Dirty bits observed per source before clearing them
    pub source_dirty: [SourceDirty; NUM_SOURCES],

    /// Global configuration dirty bits observed before clearing them
    pub dsp_dirty: DspConfigDirty,
}

impl FrameRecord {
    /// Sources whose dirty set contained `flag`
    pub fn sources_with(&self, flag: SourceDirty) -> Vec<usize> {
        self.source_dirty
            .iter()
            .enumerate()
            .filter(|(_, dirty)| dirty.contains(flag))
            .map(|(index, _)| index)
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct QueuedBuffer {
    id: u16,
    length: u32,
    looping: bool,
}

#[derive(Debug, Clone, Default)]
struct SourceState {
    enabled: bool,
    sync: u16,
    rate: f32,
    position: u32,
    current: Option<QueuedBuffer>,
    current_id: u16,
    queue: Vec<QueuedBuffer>,
}

impl SourceState {
    fn reset(&mut self) {
        let sync = self.sync;
        let rate = self.rate;
        *self = Self {
            sync,
            rate,
            ..Self::default()
        };
    }

    fn enqueue(&mut self, buffer: QueuedBuffer) {
        self.queue.retain(|queued| queued.id != buffer.id);
        self.queue.push(buffer);
        // Lowest id plays first
        self.queue.sort_by_key(|queued| queued.id);
    }

    fn next_buffer(&mut self) -> Option<QueuedBuffer> {
        if self.queue.is_empty() {
            None
        } else {
            Some(self.queue.remove(0))
        }
    }

    /// Advance one frame; returns whether the current buffer changed
    fn advance(&mut self) -> bool {
        if !self.enabled {
            return false;
        }

        let mut changed = false;
        if self.current.is_none() {
            match self.next_buffer() {
                Some(next) => {
                    self.current = Some(next);
                    self.current_id = next.id;
                    self.position = 0;
                    changed = true;
                }
                None => return false,
            }
        }

        let step = (SAMPLES_PER_FRAME as f32 * self.rate).max(0.0) as u32;
        self.position = self.position.saturating_add(step);

        if let Some(current) = self.current {
            if self.position >= current.length {
                if current.looping && current.length > 0 {
                    self.position %= current.length;
                } else {
                    match self.next_buffer() {
                        Some(next) => {
                            self.current = Some(next);
                            self.current_id = next.id;
                            self.position = 0;
                            changed = true;
                        }
                        None => {
                            self.current = None;
                            self.enabled = false;
                        }
                    }
                }
            }
        }

        changed
    }
}

/// Simulated firmware state across frames
#[derive(Debug, Clone)]
pub struct SimFirmware {
    layout: SimLayout,
    sources: Vec<SourceState>,
}

impl SimFirmware {
    pub fn new(layout: SimLayout) -> Self {
        let sources = (0..NUM_SOURCES)
            .map(|_| SourceState {
                rate: 1.0,
                ..SourceState::default()
            })
            .collect();
        Self { layout, sources }
    }

    pub fn layout(&self) -> &SimLayout {
        &self.layout
    }

    /// Slot the host published last, judged by the newer frame counter
    pub fn pick_slot(&self, ram: &DspRam) -> usize {
        let counter0 = ram.read_u16(self.layout.region_offset(RegionId::FrameCounter, 0));
        let counter1 = ram.read_u16(self.layout.region_offset(RegionId::FrameCounter, 1));
        if (counter1.wrapping_sub(counter0) as i16) > 0 {
            1
        } else {
            0
        }
    }

    /// Run one frame against the slot the host just published
    pub fn process_frame(&mut self, ram: &DspRam) -> FrameRecord {
        let slot = self.pick_slot(ram);
        let frame_counter = ram.read_u16(self.layout.region_offset(RegionId::FrameCounter, slot));

        let config_base = self.layout.region_offset(RegionId::SourceConfigurations, slot);
        let status_base = self.layout.region_offset(RegionId::SourceStatuses, slot);

        let mut source_dirty = [SourceDirty::empty(); NUM_SOURCES];
        for (index, state) in self.sources.iter_mut().enumerate() {
            let config = config_base + index * source_config::STRIDE;
            let dirty =
                SourceDirty::from_bits_retain(ram.read_u32(config + source_config::DIRTY));
            source_dirty[index] = dirty;

            apply_source_config(ram, config, dirty, state);

            ram.write_u32(config + source_config::DIRTY, 0);
            ram.write_u16(config + source_config::BUFFERS_DIRTY, 0);

            let changed = state.advance();

            let status = status_base + index * source_status::STRIDE;
            ram.write_u8(status + source_status::IS_ENABLED, state.enabled as u8);
            ram.write_u8(status + source_status::CURRENT_BUFFER_ID_DIRTY, changed as u8);
            ram.write_u16(status + source_status::SYNC, state.sync);
            ram.write_dsp_u32(status + source_status::PLAY_POSITION, state.position);
            ram.write_u16(status + source_status::CURRENT_BUFFER_ID, state.current_id);
        }

        let dsp_config = self.layout.region_offset(RegionId::DspConfiguration, slot);
        let dsp_dirty = DspConfigDirty::from_bits_retain(
            ram.read_u32(dsp_config + layout::dsp_config::DIRTY),
        );
        ram.write_u32(dsp_config + layout::dsp_config::DIRTY, 0);

        FrameRecord {
            frame_counter,
            slot,
            source_dirty,
            dsp_dirty,
        }
    }
}

fn apply_source_config(ram: &DspRam, config: usize, dirty: SourceDirty, state: &mut SourceState) {
    if dirty.contains(SourceDirty::RESET) {
        state.reset();
    }
    if dirty.contains(SourceDirty::ENABLE) {
        state.enabled = ram.read_u8(config + source_config::ENABLE) != 0;
    }
    if dirty.contains(SourceDirty::SYNC) {
        state.sync = ram.read_u16(config + source_config::SYNC);
    }
    if dirty.contains(SourceDirty::RATE_MULTIPLIER) {
        state.rate = ram.read_f32(config + source_config::RATE_MULTIPLIER);
    }
    if dirty.contains(SourceDirty::EMBEDDED_BUFFER) {
        state.enqueue(QueuedBuffer {
            id: ram.read_u16(config + source_config::BUFFER_ID),
            length: ram.read_dsp_u32(config + source_config::LENGTH),
            looping: ram.read_u8(config + source_config::IS_LOOPING) != 0,
        });
    }
    if dirty.contains(SourceDirty::PLAY_POSITION) {
        state.position = ram.read_dsp_u32(config + source_config::PLAY_POSITION);
    }
    if dirty.contains(SourceDirty::BUFFER_QUEUE) {
        let slots = ram.read_u16(config + source_config::BUFFERS_DIRTY);
        for slot in 0..QUEUE_SLOTS {
            if slots & (1 << slot) == 0 {
                continue;
            }
            let entry = config + source_config::BUFFERS + slot * buffer::STRIDE;
            state.enqueue(QueuedBuffer {
                id: ram.read_u16(entry + buffer::BUFFER_ID),
                length: ram.read_dsp_u32(entry + buffer::LENGTH),
                looping: ram.read_u8(entry + buffer::IS_LOOPING) != 0,
            });
        }
    }
}
