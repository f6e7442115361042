//! Coprocessor Bootstrap
//!
//! Hands the firmware image to the coprocessor and runs the initialisation
//! handshake that reveals where the shared regions live.
//!
//! # Handshake
//!
//! ```text
//!   Host                                   Coprocessor
//!   ────                                   ───────────
//!   unload / load component
//!   create wake event, register on pipe 2
//!   notify semaphore, mask 0x2000
//!   pipe 2 ◀── opcode 0 (initialize)
//!   semaphore ◀── 0x4000 (data available)
//!                                 ──────▶  wake event
//!   pipe 2 ──▶ count:u16, count × address:u16
//!   translate (slot 1 = address | 0x10000)
//!   semaphore ◀── 0x4000 (acknowledge)
//!   slot 0 frame counter ◀── seed
//!   notify semaphore ◀── signal
//! ```

use std::fmt;

use merry_platform::layout::RegionId;
use merry_platform::{
    CoprocessorBackend, PipeOpcode, PlatformError, AUDIO_PIPE, PIPE_INTERRUPT,
    SEMAPHORE_DATA_AVAILABLE,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::SessionConfig;
use crate::directory::RegionDirectory;
use crate::error::{SyncError, SyncResult};
use crate::firmware::FirmwareImage;
use crate::frame::{FrameState, FrameSync, Slot};
use crate::shutdown::ResourceLedger;

/// Bootstrap steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BootStep {
    UnloadPrevious,
    LoadComponent,
    CreateEvent,
    RegisterInterrupt,
    AcquireSemaphore,
    SetSemaphoreMask,
    SendInitialize,
    SignalDataAvailable,
    WaitForAddressTable,
    ClearWakeEvent,
    ReadAddressTable,
    TranslateAddresses,
    Acknowledge,
    HandOff,
}

impl fmt::Display for BootStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootStep::UnloadPrevious => "previous component unload",
            BootStep::LoadComponent => "firmware upload",
            BootStep::CreateEvent => "wake event creation",
            BootStep::RegisterInterrupt => "interrupt registration",
            BootStep::AcquireSemaphore => "notify semaphore acquisition",
            BootStep::SetSemaphoreMask => "semaphore mask setup",
            BootStep::SendInitialize => "initialize opcode",
            BootStep::SignalDataAvailable => "data-available signal",
            BootStep::WaitForAddressTable => "address table wait",
            BootStep::ClearWakeEvent => "wake event clear",
            BootStep::ReadAddressTable => "address table read",
            BootStep::TranslateAddresses => "address translation",
            BootStep::Acknowledge => "handshake acknowledge",
            BootStep::HandOff => "frame hand-off",
        };
        f.write_str(name)
    }
}

/// Everything a successful bootstrap produces
#[derive(Debug)]
pub(crate) struct BootOutcome {
    pub frame: FrameSync,
    pub directory: RegionDirectory,
}

fn step<T>(step: BootStep, result: Result<T, PlatformError>) -> SyncResult<T> {
    result.map_err(|source| {
        error!("Bootstrap failed at {}: {}", step, source);
        SyncError::HardwareError { step, source }
    })
}

/// Read exactly `buf.len()` bytes from the audio pipe
fn read_exact(
    backend: &mut dyn CoprocessorBackend,
    buf: &mut [u8],
    what: &'static str,
) -> SyncResult<()> {
    let got = step(BootStep::ReadAddressTable, backend.read_pipe(AUDIO_PIPE, buf))?;
    if got != buf.len() {
        error!(expected = buf.len(), got, "short read of {}", what);
        return Err(SyncError::ProtocolMismatch {
            what,
            expected: buf.len(),
            got,
        });
    }
    Ok(())
}

/// Read the count header and the address table that follows it
fn read_address_table(
    backend: &mut dyn CoprocessorBackend,
    expected: u16,
) -> SyncResult<Vec<u16>> {
    let mut header = [0u8; 2];
    read_exact(backend, &mut header, "address table header")?;

    let count = u16::from_le_bytes(header);
    if count != expected {
        error!(expected, count, "address table count mismatch");
        return Err(SyncError::ProtocolMismatch {
            what: "address table count",
            expected: expected as usize,
            got: count as usize,
        });
    }

    let mut body = vec![0u8; count as usize * 2];
    read_exact(backend, &mut body, "address table body")?;

    Ok(body
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Run the full bootstrap sequence
///
/// Resources are written into `ledger` as soon as they are acquired, so the
/// caller can release exactly what was taken if this returns an error.
pub(crate) fn boot(
    backend: &mut dyn CoprocessorBackend,
    image: &FirmwareImage,
    config: &SessionConfig,
    ledger: &mut ResourceLedger,
) -> SyncResult<BootOutcome> {
    info!(
        backend = backend.name(),
        bytes = image.len(),
        "Booting audio coprocessor"
    );

    step(BootStep::UnloadPrevious, backend.unload_component())?;

    let loaded = step(
        BootStep::LoadComponent,
        backend.load_component(image.as_bytes(), config.program_mask, config.data_mask),
    )?;
    if !loaded {
        return step(BootStep::LoadComponent, Err(PlatformError::ComponentNotLoaded));
    }
    ledger.component_loaded = true;
    debug!("component loaded");

    let wake_event = step(BootStep::CreateEvent, backend.create_event())?;
    ledger.wake_event = Some(wake_event);

    step(
        BootStep::RegisterInterrupt,
        backend.register_interrupt_events(Some(wake_event), PIPE_INTERRUPT, AUDIO_PIPE),
    )?;
    ledger.interrupt_registered = true;

    let notify_semaphore = step(BootStep::AcquireSemaphore, backend.semaphore_handle())?;
    ledger.notify_semaphore = Some(notify_semaphore);

    step(
        BootStep::SetSemaphoreMask,
        backend.set_semaphore_mask(config.semaphore_mask),
    )?;

    step(
        BootStep::SendInitialize,
        backend.write_pipe(AUDIO_PIPE, &PipeOpcode::Initialize.to_le_bytes()),
    )?;
    step(
        BootStep::SignalDataAvailable,
        backend.set_semaphore(SEMAPHORE_DATA_AVAILABLE),
    )?;

    step(
        BootStep::WaitForAddressTable,
        backend.wait_event(wake_event, config.boot_timeout()),
    )?;
    step(BootStep::ClearWakeEvent, backend.clear_event(wake_event))?;

    let table = read_address_table(backend, config.expected_address_count)?;
    debug!(entries = table.len(), "address table received");

    let directory = step(
        BootStep::TranslateAddresses,
        RegionDirectory::resolve(backend, &table),
    )?;

    step(
        BootStep::Acknowledge,
        backend.set_semaphore(SEMAPHORE_DATA_AVAILABLE),
    )?;

    let seed = config.frame_id_seed;
    directory
        .slot(Slot::Zero)
        .region(RegionId::FrameCounter)
        .write_u16(0, seed);
    let frame = FrameSync::new(FrameState {
        frame_id: seed.wrapping_add(1),
        wake_event,
        notify_semaphore,
    });

    step(BootStep::HandOff, backend.signal_event(notify_semaphore))?;

    info!(frame_id = frame.frame_id(), "Audio coprocessor running");
    Ok(BootOutcome { frame, directory })
}

#[cfg(test)]
mod tests {
    use super::*;
    use merry_platform::sim::{SimBackend, SimCall, SimConfig};
    use merry_platform::SEMAPHORE_FRAME_MASK;

    fn image() -> FirmwareImage {
        FirmwareImage::from_bytes(vec![0x5A; 64])
    }

    #[test]
    fn test_boot_step_names() {
        assert_eq!(
            BootStep::AcquireSemaphore.to_string(),
            "notify semaphore acquisition"
        );
        assert_eq!(BootStep::ReadAddressTable.to_string(), "address table read");
    }

    #[test]
    fn test_boot_call_sequence() {
        let mut backend = SimBackend::new();
        let probe = backend.probe();
        let mut ledger = ResourceLedger::new();

        let outcome = boot(&mut backend, &image(), &SessionConfig::default(), &mut ledger).unwrap();

        let calls = probe.calls();
        let handshake: Vec<SimCall> = calls
            .iter()
            .copied()
            .filter(|call| *call != SimCall::ConvertAddress)
            .collect();
        assert_eq!(
            handshake,
            vec![
                SimCall::UnloadComponent,
                SimCall::LoadComponent,
                SimCall::CreateEvent,
                SimCall::RegisterInterrupt,
                SimCall::SemaphoreHandle,
                SimCall::SetSemaphoreMask,
                SimCall::WritePipe,
                SimCall::SetSemaphore,
                SimCall::WaitEvent,
                SimCall::ClearEvent,
                SimCall::ReadPipe,
                SimCall::ReadPipe,
                SimCall::SetSemaphore,
                SimCall::SignalEvent,
            ]
        );
        assert_eq!(probe.count(SimCall::ConvertAddress), 30);
        assert_eq!(probe.semaphore_mask(), SEMAPHORE_FRAME_MASK);
        assert_eq!(probe.opcodes(), vec![PipeOpcode::Initialize]);
        assert_eq!(outcome.frame.frame_id(), 3);
        assert!(ledger.component_loaded());
        assert!(ledger.interrupt_registered());
        assert!(ledger.wake_event().is_some());
        assert!(ledger.notify_semaphore().is_some());
    }

    #[test]
    fn test_count_mismatch_skips_translation() {
        let mut backend = SimBackend::with_config(SimConfig {
            address_count: 12,
            ..SimConfig::default()
        });
        let probe = backend.probe();
        let mut ledger = ResourceLedger::new();

        let err = boot(&mut backend, &image(), &SessionConfig::default(), &mut ledger).unwrap_err();
        assert!(matches!(
            err,
            SyncError::ProtocolMismatch {
                what: "address table count",
                expected: 15,
                got: 12
            }
        ));
        assert_eq!(probe.count(SimCall::ConvertAddress), 0);
        assert_eq!(probe.count(SimCall::SetSemaphore), 1);
    }

    #[test]
    fn test_short_table_is_protocol_mismatch() {
        let mut backend = SimBackend::with_config(SimConfig {
            truncate_table_by: 4,
            ..SimConfig::default()
        });
        let probe = backend.probe();
        let mut ledger = ResourceLedger::new();

        let err = boot(&mut backend, &image(), &SessionConfig::default(), &mut ledger).unwrap_err();
        assert!(matches!(
            err,
            SyncError::ProtocolMismatch {
                what: "address table body",
                expected: 30,
                got: 26
            }
        ));
        assert_eq!(probe.count(SimCall::ConvertAddress), 0);
    }

    #[test]
    fn test_rejected_component_is_hardware_error() {
        let mut backend = SimBackend::with_config(SimConfig {
            accept_firmware: false,
            ..SimConfig::default()
        });
        let mut ledger = ResourceLedger::new();

        let err = boot(&mut backend, &image(), &SessionConfig::default(), &mut ledger).unwrap_err();
        assert!(matches!(
            err,
            SyncError::HardwareError {
                step: BootStep::LoadComponent,
                source: PlatformError::ComponentNotLoaded
            }
        ));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_failure_records_partial_ledger() {
        let mut backend = SimBackend::with_config(SimConfig {
            fail_call: Some((SimCall::SetSemaphoreMask, 0)),
            ..SimConfig::default()
        });
        let mut ledger = ResourceLedger::new();

        let err = boot(&mut backend, &image(), &SessionConfig::default(), &mut ledger).unwrap_err();
        assert!(matches!(
            err,
            SyncError::HardwareError {
                step: BootStep::SetSemaphoreMask,
                ..
            }
        ));
        assert!(ledger.component_loaded());
        assert!(ledger.interrupt_registered());
        assert!(ledger.notify_semaphore().is_some());
    }
}
