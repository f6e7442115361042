//! Slot views
//!
//! A [`SlotView`] is the read side of one slot's regions; a [`WriteView`]
//! adds the host-writable accessors and is only handed out for the current
//! write slot. Both borrow the session, so no view survives a publish.

use std::ops::Deref;

use merry_platform::layout::{adpcm, InterpolationMode, OutputFormat, RegionId, NUM_SOURCES};

use crate::directory::SharedRegionSet;
use crate::dsp::{
    DspConfig, DspStatus, FinalSamples, IntermediateSamples, OpaqueRegion, OpaqueRegionMut,
};
use crate::error::SyncResult;
use crate::frame::Slot;
use crate::region::MappedRegion;
use crate::source::{check_source, SourceConfig, SourceStatus, SourceStatusSnapshot};

/// Read access to every region of one slot
#[derive(Debug, Clone, Copy)]
pub struct SlotView<'a> {
    set: &'a SharedRegionSet,
}

impl<'a> SlotView<'a> {
    pub(crate) fn new(set: &'a SharedRegionSet) -> Self {
        Self { set }
    }

    pub fn slot(&self) -> Slot {
        self.set.slot()
    }

    pub fn region(&self, id: RegionId) -> &'a MappedRegion {
        self.set.region(id)
    }

    /// Frame id the host last stamped into this slot
    pub fn frame_counter(&self) -> u16 {
        self.region(RegionId::FrameCounter).read_u16(0)
    }

    pub fn source_status(&self, index: usize) -> SyncResult<SourceStatus<'a>> {
        SourceStatus::new(self.region(RegionId::SourceStatuses), index)
    }

    pub fn source_statuses(&self) -> Vec<SourceStatusSnapshot> {
        let region = self.region(RegionId::SourceStatuses);
        (0..NUM_SOURCES)
            .filter_map(|index| SourceStatus::new(region, index).ok())
            .map(|status| status.snapshot())
            .collect()
    }

    pub fn dsp_status(&self) -> DspStatus<'a> {
        DspStatus::new(self.region(RegionId::DspStatus))
    }

    pub fn final_samples(&self) -> FinalSamples<'a> {
        FinalSamples::new(self.region(RegionId::FinalSamples))
    }

    pub fn intermediate_samples(&self) -> IntermediateSamples<'a> {
        IntermediateSamples::new(self.region(RegionId::IntermediateMixSamples))
    }

    pub fn adpcm_coefficients(&self, index: usize) -> SyncResult<[i16; adpcm::COEFFICIENTS]> {
        check_source(index)?;
        let region = self.region(RegionId::AdpcmCoefficients);
        let mut words = [0u16; adpcm::COEFFICIENTS];
        region.read_words(index * adpcm::STRIDE, &mut words);
        Ok(words.map(|word| word as i16))
    }

    pub fn compressor(&self) -> OpaqueRegion<'a> {
        OpaqueRegion::new(self.region(RegionId::Compressor))
    }

    pub fn debug_info(&self) -> OpaqueRegion<'a> {
        OpaqueRegion::new(self.region(RegionId::DspDebug))
    }
}

/// Read/write access to the current write slot
#[derive(Debug, Clone, Copy)]
pub struct WriteView<'a> {
    view: SlotView<'a>,
}

impl<'a> Deref for WriteView<'a> {
    type Target = SlotView<'a>;

    fn deref(&self) -> &Self::Target {
        &self.view
    }
}

impl<'a> WriteView<'a> {
    pub(crate) fn new(set: &'a SharedRegionSet) -> Self {
        Self {
            view: SlotView::new(set),
        }
    }

    pub fn source_config(&self, index: usize) -> SyncResult<SourceConfig<'a>> {
        SourceConfig::new(self.view.region(RegionId::SourceConfigurations), index)
    }

    pub fn dsp_config(&self) -> DspConfig<'a> {
        DspConfig::new(self.view.region(RegionId::DspConfiguration))
    }

    /// Replace a source's ADPCM coefficient table
    pub fn set_adpcm_coefficients(
        &self,
        index: usize,
        coefficients: &[i16; adpcm::COEFFICIENTS],
    ) -> SyncResult<()> {
        let source = self.source_config(index)?;
        let words = coefficients.map(|coefficient| coefficient as u16);
        self.view
            .region(RegionId::AdpcmCoefficients)
            .write_words(index * adpcm::STRIDE, &words);
        source.mark_adpcm_coefficients();
        Ok(())
    }

    pub fn compressor_mut(&self) -> OpaqueRegionMut<'a> {
        OpaqueRegionMut::new(self.view.region(RegionId::Compressor))
    }

    /// Write the standard initial configuration for every source and the mixer
    pub fn apply_power_on_defaults(&self, headphones_connected: bool) -> SyncResult<()> {
        for index in 0..NUM_SOURCES {
            let source = self.source_config(index)?;
            source.set_enabled(false);
            source.set_interpolation(InterpolationMode::None);
            source.set_rate_multiplier(1.0);
            source.set_filters_enabled(false, false);
            source.set_gain(0, [1.0, 1.0, 0.0, 0.0])?;
            source.set_gain(1, [0.0; 4])?;
            source.set_gain(2, [0.0; 4])?;
            source.set_sync(1);
            source.request_reset();
        }

        let config = self.dsp_config();
        config.set_master_volume(0, 1.0)?;
        config.set_master_volume(1, 0.0)?;
        config.set_master_volume(2, 0.0)?;
        config.set_output_format(OutputFormat::Stereo);
        config.set_limiter_enabled(false);
        config.set_headphones_connected(headphones_connected);
        Ok(())
    }
}
