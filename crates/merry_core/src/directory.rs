//! Region Directory
//!
//! Organizes the translated address table into two parallel sets of named
//! regions, one per slot. Pointers are resolved once at bootstrap and never
//! change afterwards; only the memory behind them does.

use merry_platform::layout::{RegionId, REGION_COUNT};
use merry_platform::{CoprocessorBackend, PlatformError, SLOT1_BANK_OFFSET};
use tracing::debug;

use crate::frame::Slot;
use crate::region::MappedRegion;

/// Ten named regions of one slot
#[derive(Debug)]
pub struct SharedRegionSet {
    slot: Slot,
    regions: [MappedRegion; REGION_COUNT],
}

impl SharedRegionSet {
    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn region(&self, id: RegionId) -> &MappedRegion {
        &self.regions[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappedRegion> {
        self.regions.iter()
    }
}

/// Translated pointers for an address-table entry past the named regions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxiliaryRegion {
    /// DSP word address reported by the firmware
    pub dsp_address: u16,

    /// Process addresses for slot 0 and slot 1
    pub process_addresses: [usize; 2],
}

/// Both slots' region sets plus the raw address table
#[derive(Debug)]
pub struct RegionDirectory {
    slots: [SharedRegionSet; 2],
    address_table: Vec<u16>,
    auxiliary: Vec<AuxiliaryRegion>,
}

impl RegionDirectory {
    /// Translate every table entry for both slots and name the first ten
    ///
    /// The table must hold at least [`REGION_COUNT`] entries; the caller
    /// validates the count against the firmware contract beforehand.
    pub(crate) fn resolve(
        backend: &dyn CoprocessorBackend,
        address_table: &[u16],
    ) -> Result<Self, PlatformError> {
        assert!(
            address_table.len() >= REGION_COUNT,
            "address table shorter than the named region list"
        );

        for (index, id) in RegionId::ALL.iter().enumerate() {
            let end = address_table[index] as usize + (id.size() + 1) / 2;
            if end > SLOT1_BANK_OFFSET as usize {
                return Err(PlatformError::UnmappedAddress(address_table[index] as u32));
            }
        }

        let mut pointers = Vec::with_capacity(address_table.len());
        for &address in address_table {
            let slot0 = backend.convert_dsp_address(address as u32)?;
            let slot1 = backend.convert_dsp_address(address as u32 | SLOT1_BANK_OFFSET)?;
            pointers.push([slot0, slot1]);
        }

        let build_set = |slot: Slot| SharedRegionSet {
            slot,
            regions: std::array::from_fn(|index| {
                let id = RegionId::ALL[index];
                // SAFETY: the backend contract keeps translated pointers valid
                // for the backend's lifetime, and the session drops this
                // directory before it releases the backend's component.
                unsafe { MappedRegion::new(id, pointers[index][slot.index()], id.size()) }
            }),
        };
        let slots = [build_set(Slot::Zero), build_set(Slot::One)];

        let auxiliary = address_table[REGION_COUNT..]
            .iter()
            .zip(&pointers[REGION_COUNT..])
            .map(|(&dsp_address, pair)| AuxiliaryRegion {
                dsp_address,
                process_addresses: [pair[0].as_ptr() as usize, pair[1].as_ptr() as usize],
            })
            .collect();

        debug!(
            entries = address_table.len(),
            "resolved shared regions for both slots"
        );

        Ok(Self {
            slots,
            address_table: address_table.to_vec(),
            auxiliary,
        })
    }

    pub fn slot(&self, slot: Slot) -> &SharedRegionSet {
        &self.slots[slot.index()]
    }

    /// Address table exactly as the firmware reported it
    pub fn address_table(&self) -> &[u16] {
        &self.address_table
    }

    /// Table entries past the ten named regions
    pub fn auxiliary(&self) -> &[AuxiliaryRegion] {
        &self.auxiliary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use merry_platform::sim::{SimBackend, SimCall};

    #[test]
    fn test_resolve_names_regions_in_table_order() {
        let backend = SimBackend::new();
        let probe = backend.probe();
        let table = probe.layout().addresses().to_vec();

        let directory = RegionDirectory::resolve(&backend, &table).unwrap();

        for slot in [Slot::Zero, Slot::One] {
            let set = directory.slot(slot);
            assert_eq!(set.slot(), slot);
            for (index, region) in set.iter().enumerate() {
                assert_eq!(region.id(), RegionId::ALL[index]);
                assert_ne!(region.address(), 0);
            }
        }
        assert_eq!(directory.auxiliary().len(), table.len() - REGION_COUNT);
        assert_eq!(probe.count(SimCall::ConvertAddress), table.len() * 2);
    }

    #[test]
    fn test_slots_alias_distinct_banks() {
        let backend = SimBackend::new();
        let table = backend.probe().layout().addresses().to_vec();
        let directory = RegionDirectory::resolve(&backend, &table).unwrap();

        let slot0 = directory.slot(Slot::Zero).region(RegionId::DspStatus).address();
        let slot1 = directory.slot(Slot::One).region(RegionId::DspStatus).address();
        assert_eq!(slot1 - slot0, SLOT1_BANK_OFFSET as usize * 2);
    }

    #[test]
    fn test_region_crossing_bank_end_is_rejected() {
        let backend = SimBackend::new();
        let probe = backend.probe();
        let mut table = probe.layout().addresses().to_vec();
        table[RegionId::IntermediateMixSamples.index()] = 0xFFF0;

        let err = RegionDirectory::resolve(&backend, &table).unwrap_err();
        assert_eq!(err, PlatformError::UnmappedAddress(0xFFF0));
        assert_eq!(probe.count(SimCall::ConvertAddress), 0);
    }
}
