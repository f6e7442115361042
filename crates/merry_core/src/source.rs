//! Per-Source Configuration and Status
//!
//! Each of the 24 sources has a configuration record the host writes and a
//! status record the coprocessor writes. Configuration fields are grouped;
//! every setter writes its group's values and raises the group's dirty bit
//! together, so a value can never reach the coprocessor without its flag.
//! The host never clears dirty bits: the coprocessor does that once it has
//! applied the values.

use merry_platform::layout::{
    buffer, source_config, source_status, ChannelLayout, InterpolationMode, SampleFormat,
    SourceDirty, GAIN_CHANNELS, GAIN_MIXES, NUM_SOURCES, QUEUE_SLOTS,
};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::region::MappedRegion;

pub(crate) fn check_source(index: usize) -> SyncResult<()> {
    if index < NUM_SOURCES {
        Ok(())
    } else {
        Err(SyncError::InvalidSourceIndex(index))
    }
}

/// ADPCM decoder state a buffer starts from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdpcmState {
    /// Predictor index and scale byte
    pub predictor_scale: u8,

    /// Previous two decoded samples (yn1, yn2)
    pub history: [i16; 2],
}

/// One entry of a source's buffer queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferQueueEntry {
    /// Physical address of the sample data
    pub physical_address: u32,

    /// Length in samples
    pub length: u32,

    pub looping: bool,

    /// Host-chosen id; the coprocessor plays queued buffers lowest id first
    pub id: u16,

    /// Decoder state to load when this buffer starts, if ADPCM
    pub adpcm: Option<AdpcmState>,
}

/// Playback flags for a buffer embedded in the configuration record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedPlayback {
    /// Ramp the volume up over the first frame
    pub fade_in: bool,

    /// Continue with the buffer queue once the embedded buffer ends
    pub continue_with_queue: bool,
}

/// Ring arithmetic for a source's buffer queue
///
/// Slots cycle `0, 1, 2, 3, 0, ...` and buffer ids are pre-incremented, so
/// the first buffer gets id 1 and id 0 never names a real buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueCursor {
    next_slot: usize,
    last_id: u16,
}

/// Slot and id handed out by [`QueueCursor::next`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePosition {
    pub slot: usize,
    pub id: u16,
}

impl QueueCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the next slot and buffer id
    pub fn next(&mut self) -> QueuePosition {
        let slot = self.next_slot;
        self.next_slot = (slot + 1) % QUEUE_SLOTS;
        self.last_id = match self.last_id.wrapping_add(1) {
            0 => 1,
            id => id,
        };
        QueuePosition {
            slot,
            id: self.last_id,
        }
    }

    /// Id most recently handed out (0 before the first call)
    pub fn last_id(&self) -> u16 {
        self.last_id
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Second-order filter coefficients in the firmware's fixed-point format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiquadCoefficients {
    pub a2: i16,
    pub a1: i16,
    pub b2: i16,
    pub b1: i16,
    pub b0: i16,
}

/// Host-side handle on one source's configuration in the write slot
#[derive(Debug, Clone, Copy)]
pub struct SourceConfig<'a> {
    region: &'a MappedRegion,
    index: usize,
    base: usize,
}

impl<'a> SourceConfig<'a> {
    pub(crate) fn new(region: &'a MappedRegion, index: usize) -> SyncResult<Self> {
        check_source(index)?;
        Ok(Self {
            region,
            index,
            base: index * source_config::STRIDE,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    fn mark(&self, flags: SourceDirty) {
        self.region
            .set_bits_u32(self.base + source_config::DIRTY, flags.bits());
    }

    /// Dirty groups still waiting for the coprocessor
    pub fn dirty(&self) -> SourceDirty {
        SourceDirty::from_bits_retain(self.region.read_u32(self.base + source_config::DIRTY))
    }

    /// Set the four channel gains of one mix
    pub fn set_gain(&self, mix: usize, gains: [f32; GAIN_CHANNELS]) -> SyncResult<()> {
        let flag = SourceDirty::gain(mix).ok_or(SyncError::InvalidMixIndex(mix))?;
        let offset = self.base + source_config::GAIN + mix * GAIN_CHANNELS * 4;
        for (channel, gain) in gains.iter().enumerate() {
            self.region.write_f32(offset + channel * 4, *gain);
        }
        self.mark(flag);
        Ok(())
    }

    pub fn gain(&self, mix: usize) -> SyncResult<[f32; GAIN_CHANNELS]> {
        if mix >= GAIN_MIXES {
            return Err(SyncError::InvalidMixIndex(mix));
        }
        let offset = self.base + source_config::GAIN + mix * GAIN_CHANNELS * 4;
        Ok(std::array::from_fn(|channel| {
            self.region.read_f32(offset + channel * 4)
        }))
    }

    pub fn set_rate_multiplier(&self, rate: f32) {
        self.region
            .write_f32(self.base + source_config::RATE_MULTIPLIER, rate);
        self.mark(SourceDirty::RATE_MULTIPLIER);
    }

    pub fn rate_multiplier(&self) -> f32 {
        self.region.read_f32(self.base + source_config::RATE_MULTIPLIER)
    }

    pub fn set_interpolation(&self, mode: InterpolationMode) {
        self.region
            .write_u8(self.base + source_config::INTERPOLATION_MODE, mode.to_raw());
        self.region
            .write_u8(self.base + source_config::INTERPOLATION_RELATED, 0);
        self.mark(SourceDirty::INTERPOLATION);
    }

    pub fn interpolation(&self) -> Option<InterpolationMode> {
        InterpolationMode::from_raw(
            self.region
                .read_u8(self.base + source_config::INTERPOLATION_MODE),
        )
    }

    pub fn set_filters_enabled(&self, simple: bool, biquad: bool) {
        let mut bits = 0;
        if simple {
            bits |= source_config::FILTER_SIMPLE_BIT;
        }
        if biquad {
            bits |= source_config::FILTER_BIQUAD_BIT;
        }
        self.region
            .write_u16(self.base + source_config::FILTERS_ENABLED, bits);
        self.mark(SourceDirty::FILTERS_ENABLED);
    }

    /// Single-pole filter coefficients (b0, a1)
    pub fn set_simple_filter(&self, b0: i16, a1: i16) {
        self.region
            .write_i16(self.base + source_config::SIMPLE_FILTER_B0, b0);
        self.region
            .write_i16(self.base + source_config::SIMPLE_FILTER_A1, a1);
        self.mark(SourceDirty::SIMPLE_FILTER);
    }

    pub fn set_biquad_filter(&self, coefficients: BiquadCoefficients) {
        let base = self.base;
        self.region
            .write_i16(base + source_config::BIQUAD_A2, coefficients.a2);
        self.region
            .write_i16(base + source_config::BIQUAD_A1, coefficients.a1);
        self.region
            .write_i16(base + source_config::BIQUAD_B2, coefficients.b2);
        self.region
            .write_i16(base + source_config::BIQUAD_B1, coefficients.b1);
        self.region
            .write_i16(base + source_config::BIQUAD_B0, coefficients.b0);
        self.mark(SourceDirty::BIQUAD_FILTER);
    }

    pub fn set_loop_related(&self, value: u32) {
        self.region
            .write_dsp_u32(self.base + source_config::LOOP_RELATED, value);
        self.mark(SourceDirty::LOOP_RELATED);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.region
            .write_bool(self.base + source_config::ENABLE, enabled);
        self.mark(SourceDirty::ENABLE);
    }

    pub fn enabled(&self) -> bool {
        self.region.read_bool(self.base + source_config::ENABLE)
    }

    /// Sync counter the coprocessor echoes back in the source status
    pub fn set_sync(&self, sync: u16) {
        self.region.write_u16(self.base + source_config::SYNC, sync);
        self.mark(SourceDirty::SYNC);
    }

    pub fn sync(&self) -> u16 {
        self.region.read_u16(self.base + source_config::SYNC)
    }

    /// Sample position to resume the current buffer from
    pub fn set_play_position(&self, position: u32) {
        self.region
            .write_dsp_u32(self.base + source_config::PLAY_POSITION, position);
        self.mark(SourceDirty::PLAY_POSITION);
    }

    pub fn play_position(&self) -> u32 {
        self.region
            .read_dsp_u32(self.base + source_config::PLAY_POSITION)
    }

    pub fn set_format(&self, format: SampleFormat, layout: ChannelLayout) {
        self.region
            .write_u8(self.base + source_config::FORMAT, format.to_raw());
        self.region
            .write_u8(self.base + source_config::MONO_OR_STEREO, layout.to_raw());
        self.mark(SourceDirty::FORMAT | SourceDirty::MONO_OR_STEREO);
    }

    pub fn format(&self) -> Option<SampleFormat> {
        SampleFormat::from_raw(self.region.read_u8(self.base + source_config::FORMAT))
    }

    /// Start playback from a buffer held in the configuration record itself
    pub fn set_embedded_buffer(&self, entry: &BufferQueueEntry, playback: EmbeddedPlayback) {
        let base = self.base;
        self.region
            .write_dsp_u32(base + source_config::PHYSICAL_ADDRESS, entry.physical_address);
        self.region
            .write_dsp_u32(base + source_config::LENGTH, entry.length);
        self.region
            .write_bool(base + source_config::IS_LOOPING, entry.looping);
        self.region
            .write_u16(base + source_config::BUFFER_ID, entry.id);
        self.region
            .write_bool(base + source_config::FADE_IN, playback.fade_in);
        let flags = if playback.continue_with_queue {
            source_config::PLAY_FLAG_USE_QUEUE
        } else {
            0
        };
        self.region.write_u16(base + source_config::PLAY_FLAGS, flags);

        let adpcm = entry.adpcm.unwrap_or_default();
        self.region
            .write_u8(base + source_config::ADPCM_PS, adpcm.predictor_scale);
        self.region
            .write_i16(base + source_config::ADPCM_YN, adpcm.history[0]);
        self.region
            .write_i16(base + source_config::ADPCM_YN + 2, adpcm.history[1]);
        self.region
            .write_bool(base + source_config::ADPCM_DIRTY, entry.adpcm.is_some());

        self.mark(SourceDirty::EMBEDDED_BUFFER);
    }

    /// Write a buffer into queue slot `slot` and flag that slot
    pub fn enqueue_buffer(&self, slot: usize, entry: &BufferQueueEntry) -> SyncResult<()> {
        if slot >= QUEUE_SLOTS {
            return Err(SyncError::InvalidQueueSlot(slot));
        }
        let base = self.base + source_config::BUFFERS + slot * buffer::STRIDE;
        let adpcm = entry.adpcm.unwrap_or_default();

        self.region
            .write_dsp_u32(base + buffer::PHYSICAL_ADDRESS, entry.physical_address);
        self.region.write_dsp_u32(base + buffer::LENGTH, entry.length);
        self.region
            .write_u16(base + buffer::ADPCM_PS, adpcm.predictor_scale as u16);
        self.region
            .write_i16(base + buffer::ADPCM_YN, adpcm.history[0]);
        self.region
            .write_i16(base + buffer::ADPCM_YN + 2, adpcm.history[1]);
        self.region
            .write_bool(base + buffer::ADPCM_DIRTY, entry.adpcm.is_some());
        self.region.write_bool(base + buffer::IS_LOOPING, entry.looping);
        self.region.write_u16(base + buffer::BUFFER_ID, entry.id);

        let pending = self.region.read_u16(self.base + source_config::BUFFERS_DIRTY);
        self.region
            .write_u16(self.base + source_config::BUFFERS_DIRTY, pending | (1 << slot));
        self.mark(SourceDirty::BUFFER_QUEUE);
        Ok(())
    }

    /// Queue slots written since the coprocessor last consumed the queue
    pub fn pending_queue_slots(&self) -> u16 {
        self.region.read_u16(self.base + source_config::BUFFERS_DIRTY)
    }

    pub(crate) fn mark_adpcm_coefficients(&self) {
        self.mark(SourceDirty::ADPCM_COEFFICIENTS);
    }

    /// Ask the coprocessor to reset the source's playback state
    pub fn request_reset(&self) {
        self.mark(SourceDirty::RESET);
    }
}

/// Read-only view of one source's status in the read slot
#[derive(Debug, Clone, Copy)]
pub struct SourceStatus<'a> {
    region: &'a MappedRegion,
    index: usize,
    base: usize,
}

impl<'a> SourceStatus<'a> {
    pub(crate) fn new(region: &'a MappedRegion, index: usize) -> SyncResult<Self> {
        check_source(index)?;
        Ok(Self {
            region,
            index,
            base: index * source_status::STRIDE,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_enabled(&self) -> bool {
        self.region.read_bool(self.base + source_status::IS_ENABLED)
    }

    /// Whether the current buffer changed during the last frame
    pub fn current_buffer_id_dirty(&self) -> bool {
        self.region
            .read_bool(self.base + source_status::CURRENT_BUFFER_ID_DIRTY)
    }

    pub fn sync(&self) -> u16 {
        self.region.read_u16(self.base + source_status::SYNC)
    }

    pub fn play_position(&self) -> u32 {
        self.region
            .read_dsp_u32(self.base + source_status::PLAY_POSITION)
    }

    pub fn current_buffer_id(&self) -> u16 {
        self.region
            .read_u16(self.base + source_status::CURRENT_BUFFER_ID)
    }

    /// Copy every field out of shared memory at once
    pub fn snapshot(&self) -> SourceStatusSnapshot {
        SourceStatusSnapshot {
            index: self.index,
            is_enabled: self.is_enabled(),
            current_buffer_id_dirty: self.current_buffer_id_dirty(),
            sync: self.sync(),
            play_position: self.play_position(),
            current_buffer_id: self.current_buffer_id(),
        }
    }
}

/// Owned copy of a [`SourceStatus`], safe to keep past the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStatusSnapshot {
    pub index: usize,
    pub is_enabled: bool,
    pub current_buffer_id_dirty: bool,
    pub sync: u16,
    pub play_position: u32,
    pub current_buffer_id: u16,
}
