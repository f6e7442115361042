//! Global DSP regions
//!
//! Typed access to the master configuration and status records plus the
//! mixed-sample regions. Compressor state, debug info and the ADPCM
//! coefficient table have no host-side interpretation and are exposed as
//! raw 16-bit words through [`OpaqueRegion`].

use merry_platform::layout::{
    dsp_config, dsp_status, final_samples, intermediate, DspConfigDirty, OutputFormat,
    SAMPLES_PER_FRAME,
};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::region::MappedRegion;

/// Number of master volume controls
pub const MASTER_VOLUMES: usize = 3;

fn check_sample_index(index: usize) -> SyncResult<()> {
    if index < SAMPLES_PER_FRAME {
        Ok(())
    } else {
        Err(SyncError::InvalidSampleIndex(index))
    }
}

/// Master mixer configuration in one slot
#[derive(Debug, Clone, Copy)]
pub struct DspConfig<'a> {
    region: &'a MappedRegion,
}

impl<'a> DspConfig<'a> {
    pub(crate) fn new(region: &'a MappedRegion) -> Self {
        Self { region }
    }

    fn mark(&self, flags: DspConfigDirty) {
        self.region.set_bits_u32(dsp_config::DIRTY, flags.bits());
    }

    pub fn dirty(&self) -> DspConfigDirty {
        DspConfigDirty::from_bits_retain(self.region.read_u32(dsp_config::DIRTY))
    }

    pub fn set_master_volume(&self, index: usize, volume: f32) -> SyncResult<()> {
        let flag = DspConfigDirty::volume(index).ok_or(SyncError::InvalidMixIndex(index))?;
        self.region.write_f32(dsp_config::VOLUME + index * 4, volume);
        self.mark(flag);
        Ok(())
    }

    pub fn master_volume(&self, index: usize) -> SyncResult<f32> {
        if index >= MASTER_VOLUMES {
            return Err(SyncError::InvalidMixIndex(index));
        }
        Ok(self.region.read_f32(dsp_config::VOLUME + index * 4))
    }

    pub fn set_output_format(&self, format: OutputFormat) {
        self.region
            .write_u16(dsp_config::OUTPUT_FORMAT, format.to_raw());
        self.mark(DspConfigDirty::OUTPUT_FORMAT);
    }

    pub fn output_format(&self) -> Option<OutputFormat> {
        OutputFormat::from_raw(self.region.read_u16(dsp_config::OUTPUT_FORMAT))
    }

    pub fn set_limiter_enabled(&self, enabled: bool) {
        self.region
            .write_u16(dsp_config::LIMITER_ENABLED, enabled as u16);
        self.mark(DspConfigDirty::LIMITER_ENABLED);
    }

    pub fn limiter_enabled(&self) -> bool {
        self.region.read_u16(dsp_config::LIMITER_ENABLED) != 0
    }

    pub fn set_headphones_connected(&self, connected: bool) {
        self.region
            .write_u16(dsp_config::HEADPHONES_CONNECTED, connected as u16);
        self.mark(DspConfigDirty::HEADPHONES_CONNECTED);
    }

    pub fn headphones_connected(&self) -> bool {
        self.region.read_u16(dsp_config::HEADPHONES_CONNECTED) != 0
    }

    /// Route the aux bus `bus` (0 or 1) through the intermediate mix
    pub fn set_aux_bus_enabled(&self, bus: usize, enabled: bool) -> SyncResult<()> {
        let (offset, flag) = match bus {
            0 => (dsp_config::MIXER1_ENABLED, DspConfigDirty::MIXER1_ENABLED),
            1 => (dsp_config::MIXER2_ENABLED, DspConfigDirty::MIXER2_ENABLED),
            _ => return Err(SyncError::InvalidMixIndex(bus)),
        };
        self.region.write_u16(offset, enabled as u16);
        self.mark(flag);
        Ok(())
    }

    pub fn aux_bus_enabled(&self, bus: usize) -> SyncResult<bool> {
        let offset = match bus {
            0 => dsp_config::MIXER1_ENABLED,
            1 => dsp_config::MIXER2_ENABLED,
            _ => return Err(SyncError::InvalidMixIndex(bus)),
        };
        Ok(self.region.read_u16(offset) != 0)
    }
}

/// Master status written by the coprocessor
#[derive(Debug, Clone, Copy)]
pub struct DspStatus<'a> {
    region: &'a MappedRegion,
}

impl<'a> DspStatus<'a> {
    pub(crate) fn new(region: &'a MappedRegion) -> Self {
        Self { region }
    }

    pub fn unknown(&self) -> u16 {
        self.region.read_u16(dsp_status::UNKNOWN)
    }

    pub fn dropped_frames(&self) -> u16 {
        self.region.read_u16(dsp_status::DROPPED_FRAMES)
    }

    pub fn snapshot(&self) -> DspStatusSnapshot {
        DspStatusSnapshot {
            unknown: self.unknown(),
            dropped_frames: self.dropped_frames(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DspStatusSnapshot {
    pub unknown: u16,
    pub dropped_frames: u16,
}

/// Final stereo mix of the last frame
#[derive(Debug, Clone, Copy)]
pub struct FinalSamples<'a> {
    region: &'a MappedRegion,
}

impl<'a> FinalSamples<'a> {
    pub(crate) fn new(region: &'a MappedRegion) -> Self {
        Self { region }
    }

    /// Left and right sample of frame position `index`
    pub fn frame(&self, index: usize) -> SyncResult<[i16; 2]> {
        check_sample_index(index)?;
        let offset = index * final_samples::CHANNELS * 2;
        Ok([
            self.region.read_i16(offset),
            self.region.read_i16(offset + 2),
        ])
    }

    /// Copy the interleaved samples into `out`; returns how many were copied
    pub fn copy_interleaved(&self, out: &mut [i16]) -> usize {
        let count = out.len().min(SAMPLES_PER_FRAME * final_samples::CHANNELS);
        for (index, sample) in out[..count].iter_mut().enumerate() {
            *sample = self.region.read_i16(index * 2);
        }
        count
    }
}

/// Aux bus mixes of the last frame
#[derive(Debug, Clone, Copy)]
pub struct IntermediateSamples<'a> {
    region: &'a MappedRegion,
}

impl<'a> IntermediateSamples<'a> {
    pub(crate) fn new(region: &'a MappedRegion) -> Self {
        Self { region }
    }

    pub fn sample(&self, mix: usize, channel: usize, index: usize) -> SyncResult<i32> {
        if mix >= intermediate::MIXES {
            return Err(SyncError::InvalidMixIndex(mix));
        }
        if channel >= intermediate::CHANNELS {
            return Err(SyncError::InvalidChannel {
                channel,
                max: intermediate::CHANNELS,
            });
        }
        check_sample_index(index)?;
        let offset = mix * intermediate::MIX_STRIDE + (channel * SAMPLES_PER_FRAME + index) * 4;
        Ok(self.region.read_dsp_i32(offset))
    }
}

/// Region with no host-side field interpretation
#[derive(Debug, Clone, Copy)]
pub struct OpaqueRegion<'a> {
    region: &'a MappedRegion,
}

impl<'a> OpaqueRegion<'a> {
    pub(crate) fn new(region: &'a MappedRegion) -> Self {
        Self { region }
    }

    pub fn len_words(&self) -> usize {
        self.region.len() / 2
    }

    fn check_range(&self, word_offset: usize, count: usize) -> SyncResult<()> {
        let len = self.len_words();
        if word_offset.checked_add(count).map_or(true, |end| end > len) {
            return Err(SyncError::WordRangeOutOfBounds {
                region: self.region.id().name(),
                offset: word_offset,
                count,
                len,
            });
        }
        Ok(())
    }

    pub fn read_words(&self, word_offset: usize, out: &mut [u16]) -> SyncResult<()> {
        self.check_range(word_offset, out.len())?;
        self.region.read_words(word_offset * 2, out);
        Ok(())
    }

    /// Raw word write; only available on host-writable regions of the write slot
    pub(crate) fn write_words(&self, word_offset: usize, words: &[u16]) -> SyncResult<()> {
        self.check_range(word_offset, words.len())?;
        self.region.write_words(word_offset * 2, words);
        Ok(())
    }
}

/// Write access to an opaque host-writable region
#[derive(Debug, Clone, Copy)]
pub struct OpaqueRegionMut<'a> {
    inner: OpaqueRegion<'a>,
}

impl<'a> OpaqueRegionMut<'a> {
    pub(crate) fn new(region: &'a MappedRegion) -> Self {
        Self {
            inner: OpaqueRegion::new(region),
        }
    }

    pub fn len_words(&self) -> usize {
        self.inner.len_words()
    }

    pub fn read_words(&self, word_offset: usize, out: &mut [u16]) -> SyncResult<()> {
        self.inner.read_words(word_offset, out)
    }

    pub fn write_words(&self, word_offset: usize, words: &[u16]) -> SyncResult<()> {
        self.inner.write_words(word_offset, words)
    }
}
