//! Firmware Memory Layout
//!
//! Region order, sizes and field offsets shared with the coprocessor firmware.
//! Everything here is a versioned contract with one firmware build; nothing
//! in this module interprets what the fields mean to the audio pipeline.
//!
//! Byte offsets are relative to the start of each region. 32-bit fields the
//! firmware marks as DSP words are stored high half first (see
//! [`dsp_u32_to_words`]).

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Number of entries the firmware reports in its address table
pub const ADDRESS_TABLE_LEN: u16 = 15;

/// Number of named regions per slot
pub const REGION_COUNT: usize = 10;

/// Number of logical audio sources
pub const NUM_SOURCES: usize = 24;

/// Samples processed per frame
pub const SAMPLES_PER_FRAME: usize = 160;

/// Queued-buffer slots per source
pub const QUEUE_SLOTS: usize = 4;

/// Gain mixes per source (main + two aux busses)
pub const GAIN_MIXES: usize = 3;

/// Output channels per gain mix
pub const GAIN_CHANNELS: usize = 4;

/// Frame id written into slot 0 during the handshake
pub const FRAME_ID_SEED: u16 = 2;

/// Who may write a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Access {
    HostWritable,
    CoprocessorWritable,
}

/// Named shared regions, in firmware address-table order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegionId {
    FrameCounter,
    SourceConfigurations,
    SourceStatuses,
    AdpcmCoefficients,
    DspConfiguration,
    DspStatus,
    FinalSamples,
    IntermediateMixSamples,
    Compressor,
    DspDebug,
}

impl RegionId {
    pub const ALL: [RegionId; REGION_COUNT] = [
        RegionId::FrameCounter,
        RegionId::SourceConfigurations,
        RegionId::SourceStatuses,
        RegionId::AdpcmCoefficients,
        RegionId::DspConfiguration,
        RegionId::DspStatus,
        RegionId::FinalSamples,
        RegionId::IntermediateMixSamples,
        RegionId::Compressor,
        RegionId::DspDebug,
    ];

    /// Position in the firmware address table
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn access(self) -> Access {
        match self {
            RegionId::FrameCounter
            | RegionId::SourceConfigurations
            | RegionId::AdpcmCoefficients
            | RegionId::DspConfiguration
            | RegionId::Compressor => Access::HostWritable,
            RegionId::SourceStatuses
            | RegionId::DspStatus
            | RegionId::FinalSamples
            | RegionId::IntermediateMixSamples
            | RegionId::DspDebug => Access::CoprocessorWritable,
        }
    }

    /// Region size in bytes
    pub fn size(self) -> usize {
        match self {
            RegionId::FrameCounter => 2,
            RegionId::SourceConfigurations => source_config::STRIDE * NUM_SOURCES,
            RegionId::SourceStatuses => source_status::STRIDE * NUM_SOURCES,
            RegionId::AdpcmCoefficients => adpcm::STRIDE * NUM_SOURCES,
            RegionId::DspConfiguration => dsp_config::SIZE,
            RegionId::DspStatus => dsp_status::SIZE,
            RegionId::FinalSamples => final_samples::SIZE,
            RegionId::IntermediateMixSamples => intermediate::SIZE,
            RegionId::Compressor => 0x38,
            RegionId::DspDebug => 0x40,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RegionId::FrameCounter => "frame counter",
            RegionId::SourceConfigurations => "source configurations",
            RegionId::SourceStatuses => "source statuses",
            RegionId::AdpcmCoefficients => "ADPCM coefficients",
            RegionId::DspConfiguration => "DSP configuration",
            RegionId::DspStatus => "DSP status",
            RegionId::FinalSamples => "final mix samples",
            RegionId::IntermediateMixSamples => "intermediate mix samples",
            RegionId::Compressor => "compressor",
            RegionId::DspDebug => "DSP debug",
        }
    }
}

/// Split a 32-bit value into the firmware's word order (high half first)
pub fn dsp_u32_to_words(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, value as u16]
}

/// Reassemble a 32-bit value stored high half first
pub fn dsp_u32_from_words(words: [u16; 2]) -> u32 {
    ((words[0] as u32) << 16) | words[1] as u32
}

bitflags! {
    /// Per-source dirty bits, one per field group
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SourceDirty: u32 {
        const FORMAT = 1 << 0;
        const MONO_OR_STEREO = 1 << 1;
        const ADPCM_COEFFICIENTS = 1 << 2;
        const ENABLE = 1 << 16;
        const INTERPOLATION = 1 << 17;
        const RATE_MULTIPLIER = 1 << 18;
        const BUFFER_QUEUE = 1 << 19;
        const LOOP_RELATED = 1 << 20;
        const PLAY_POSITION = 1 << 21;
        const FILTERS_ENABLED = 1 << 22;
        const SIMPLE_FILTER = 1 << 23;
        const BIQUAD_FILTER = 1 << 24;
        const GAIN_0 = 1 << 25;
        const GAIN_1 = 1 << 26;
        const GAIN_2 = 1 << 27;
        const SYNC = 1 << 28;
        const RESET = 1 << 29;
        const EMBEDDED_BUFFER = 1 << 30;
    }
}

impl SourceDirty {
    /// Dirty bit guarding gain mix `mix`
    pub fn gain(mix: usize) -> Option<Self> {
        match mix {
            0 => Some(Self::GAIN_0),
            1 => Some(Self::GAIN_1),
            2 => Some(Self::GAIN_2),
            _ => None,
        }
    }
}

bitflags! {
    /// Global DSP configuration dirty bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DspConfigDirty: u32 {
        const MIXER1_ENABLED = 1 << 8;
        const MIXER2_ENABLED = 1 << 9;
        const VOLUME_0 = 1 << 16;
        const VOLUME_1 = 1 << 24;
        const VOLUME_2 = 1 << 25;
        const OUTPUT_FORMAT = 1 << 26;
        const LIMITER_ENABLED = 1 << 27;
        const HEADPHONES_CONNECTED = 1 << 28;
    }
}

impl DspConfigDirty {
    /// Dirty bit guarding master volume `index`
    pub fn volume(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::VOLUME_0),
            1 => Some(Self::VOLUME_1),
            2 => Some(Self::VOLUME_2),
            _ => None,
        }
    }
}

/// Sample interpolation applied by the coprocessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterpolationMode {
    Polyphase,
    Linear,
    None,
}

impl InterpolationMode {
    pub fn to_raw(self) -> u8 {
        match self {
            Self::Polyphase => 0,
            Self::Linear => 1,
            Self::None => 2,
        }
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Polyphase),
            1 => Some(Self::Linear),
            2 => Some(Self::None),
            _ => None,
        }
    }
}

/// Sample encoding of a source buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    Pcm8,
    Pcm16,
    Adpcm,
}

impl SampleFormat {
    pub fn to_raw(self) -> u8 {
        match self {
            Self::Pcm8 => 0,
            Self::Pcm16 => 1,
            Self::Adpcm => 2,
        }
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Pcm8),
            1 => Some(Self::Pcm16),
            2 => Some(Self::Adpcm),
            _ => None,
        }
    }
}

/// Channel count of a source buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

impl ChannelLayout {
    pub fn to_raw(self) -> u8 {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
        }
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Mono),
            2 => Some(Self::Stereo),
            _ => None,
        }
    }
}

/// Final output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Mono,
    Stereo,
    Surround,
}

impl OutputFormat {
    pub fn to_raw(self) -> u16 {
        match self {
            Self::Mono => 0,
            Self::Stereo => 1,
            Self::Surround => 2,
        }
    }

    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Self::Mono),
            1 => Some(Self::Stereo),
            2 => Some(Self::Surround),
            _ => None,
        }
    }
}

/// Per-source configuration entry
pub mod source_config {
    pub const STRIDE: usize = 0xC0;

    pub const DIRTY: usize = 0x00;
    /// `[f32; 4]` per mix, three mixes
    pub const GAIN: usize = 0x04;
    pub const RATE_MULTIPLIER: usize = 0x34;
    pub const INTERPOLATION_MODE: usize = 0x38;
    pub const INTERPOLATION_RELATED: usize = 0x39;
    /// bit 0 simple filter, bit 1 biquad filter
    pub const FILTERS_ENABLED: usize = 0x3A;
    pub const SIMPLE_FILTER_B0: usize = 0x3C;
    pub const SIMPLE_FILTER_A1: usize = 0x3E;
    pub const BIQUAD_A2: usize = 0x40;
    pub const BIQUAD_A1: usize = 0x42;
    pub const BIQUAD_B2: usize = 0x44;
    pub const BIQUAD_B1: usize = 0x46;
    pub const BIQUAD_B0: usize = 0x48;
    /// One bit per queue slot
    pub const BUFFERS_DIRTY: usize = 0x4A;
    pub const BUFFERS: usize = 0x4C;
    pub const LOOP_RELATED: usize = 0x9C;
    pub const ENABLE: usize = 0xA0;
    pub const SYNC: usize = 0xA2;
    pub const PLAY_POSITION: usize = 0xA4;
    pub const PHYSICAL_ADDRESS: usize = 0xA8;
    pub const LENGTH: usize = 0xAC;
    pub const MONO_OR_STEREO: usize = 0xB0;
    pub const FORMAT: usize = 0xB1;
    pub const ADPCM_PS: usize = 0xB2;
    pub const ADPCM_DIRTY: usize = 0xB3;
    pub const ADPCM_YN: usize = 0xB4;
    pub const FADE_IN: usize = 0xB8;
    pub const IS_LOOPING: usize = 0xB9;
    pub const BUFFER_ID: usize = 0xBA;
    /// bit 0: play from the buffer queue after the embedded buffer
    pub const PLAY_FLAGS: usize = 0xBC;

    pub const FILTER_SIMPLE_BIT: u16 = 1 << 0;
    pub const FILTER_BIQUAD_BIT: u16 = 1 << 1;
    pub const PLAY_FLAG_USE_QUEUE: u16 = 1 << 0;
}

/// Queued buffer entry inside a source configuration
pub mod buffer {
    pub const STRIDE: usize = 0x14;

    pub const PHYSICAL_ADDRESS: usize = 0x00;
    pub const LENGTH: usize = 0x04;
    pub const ADPCM_PS: usize = 0x08;
    pub const ADPCM_YN: usize = 0x0A;
    pub const ADPCM_DIRTY: usize = 0x0E;
    pub const IS_LOOPING: usize = 0x0F;
    pub const BUFFER_ID: usize = 0x10;
}

/// Per-source status entry
pub mod source_status {
    pub const STRIDE: usize = 0x0C;

    pub const IS_ENABLED: usize = 0x00;
    pub const CURRENT_BUFFER_ID_DIRTY: usize = 0x01;
    pub const SYNC: usize = 0x02;
    pub const PLAY_POSITION: usize = 0x04;
    pub const CURRENT_BUFFER_ID: usize = 0x08;
}

/// ADPCM coefficient table, one entry per source
pub mod adpcm {
    pub const COEFFICIENTS: usize = 16;
    pub const STRIDE: usize = COEFFICIENTS * 2;
}

/// Global DSP configuration
pub mod dsp_config {
    pub const SIZE: usize = 0xC4;

    pub const DIRTY: usize = 0x00;
    /// `[f32; 3]`
    pub const VOLUME: usize = 0x04;
    pub const OUTPUT_FORMAT: usize = 0x10;
    pub const LIMITER_ENABLED: usize = 0x12;
    pub const HEADPHONES_CONNECTED: usize = 0x14;
    pub const MIXER1_ENABLED: usize = 0x16;
    pub const MIXER2_ENABLED: usize = 0x18;
}

/// Global DSP status
pub mod dsp_status {
    pub const SIZE: usize = 0x20;

    pub const UNKNOWN: usize = 0x00;
    pub const DROPPED_FRAMES: usize = 0x02;
}

/// Final mix, interleaved stereo PCM16
pub mod final_samples {
    use super::SAMPLES_PER_FRAME;

    pub const CHANNELS: usize = 2;
    pub const SIZE: usize = SAMPLES_PER_FRAME * CHANNELS * 2;
}

/// Aux bus mixes, PCM32 DSP words, `[[i32; 160]; 4]` per mix
pub mod intermediate {
    use super::SAMPLES_PER_FRAME;

    pub const MIXES: usize = 2;
    pub const CHANNELS: usize = 4;
    pub const MIX_STRIDE: usize = CHANNELS * SAMPLES_PER_FRAME * 4;
    pub const SIZE: usize = MIX_STRIDE * MIXES;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_order_matches_table() {
        for (position, region) in RegionId::ALL.iter().enumerate() {
            assert_eq!(region.index(), position);
        }
        assert!(REGION_COUNT <= ADDRESS_TABLE_LEN as usize);
    }

    #[test]
    fn test_status_regions_are_coprocessor_writable() {
        assert_eq!(RegionId::SourceStatuses.access(), Access::CoprocessorWritable);
        assert_eq!(RegionId::DspStatus.access(), Access::CoprocessorWritable);
        assert_eq!(RegionId::SourceConfigurations.access(), Access::HostWritable);
        assert_eq!(RegionId::FrameCounter.access(), Access::HostWritable);
    }

    #[test]
    fn test_source_config_fits_stride() {
        let queue_end = source_config::BUFFERS + buffer::STRIDE * QUEUE_SLOTS;
        assert!(queue_end <= source_config::LOOP_RELATED);
        assert!(source_config::PLAY_FLAGS + 2 <= source_config::STRIDE);
        assert_eq!(
            source_config::GAIN + GAIN_MIXES * GAIN_CHANNELS * 4,
            source_config::RATE_MULTIPLIER
        );
    }

    #[test]
    fn test_region_sizes_are_word_aligned() {
        for region in RegionId::ALL {
            assert_eq!(region.size() % 2, 0, "{} is not word aligned", region.name());
        }
    }

    #[test]
    fn test_dsp_word_order() {
        assert_eq!(dsp_u32_to_words(0x1234_5678), [0x1234, 0x5678]);
        assert_eq!(dsp_u32_from_words([0xDEAD, 0xBEEF]), 0xDEAD_BEEF);
    }

    #[test]
    fn test_gain_dirty_lookup() {
        assert_eq!(SourceDirty::gain(1), Some(SourceDirty::GAIN_1));
        assert_eq!(SourceDirty::gain(3), None);
        assert_eq!(DspConfigDirty::volume(2), Some(DspConfigDirty::VOLUME_2));
    }

    #[test]
    fn test_enum_raw_values() {
        assert_eq!(InterpolationMode::from_raw(2), Some(InterpolationMode::None));
        assert_eq!(SampleFormat::Pcm16.to_raw(), 1);
        assert_eq!(ChannelLayout::from_raw(2), Some(ChannelLayout::Stereo));
        assert_eq!(OutputFormat::from_raw(9), None);
    }
}
