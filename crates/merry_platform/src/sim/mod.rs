//! Simulated Coprocessor Backend
//!
//! A deterministic, in-process stand-in for the audio coprocessor service.
//! It answers the initialisation handshake with an address table, owns the
//! shared DRAM, and runs one firmware frame every time the host signals the
//! notify semaphore.
//!
//! # Architecture
//!
//! ```text
//! Host (CoprocessorSession)            SimBackend
//! ─────────────────────────            ──────────
//!   write_pipe(Initialize) ─────────►  phase = InitRequested
//!   set_semaphore(0x4000)  ─────────►  push address table, fire event
//!   wait_event / read_pipe ◄─────────  table bytes
//!   set_semaphore(0x4000)  ─────────►  phase = Acknowledged
//!   signal_event(semaphore) ────────►  SimFirmware::process_frame, fire event
//! ```
//!
//! The frame runs synchronously inside `signal_event`, so host and simulated
//! coprocessor never touch DRAM at the same time. Tests keep a [`SimProbe`]
//! to inspect the call log and frame records after the backend has been
//! moved into a session, and to inject faults or stall the coprocessor.

mod firmware;
mod memory;

pub use firmware::{FrameRecord, SimFirmware, SimLayout};
pub use memory::{DspRam, BANK_WORDS};

use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::PlatformError;
use crate::layout::ADDRESS_TABLE_LEN;
use crate::traits::{
    CoprocessorBackend, Handle, PipeOpcode, AUDIO_PIPE, SEMAPHORE_DATA_AVAILABLE,
};

/// Result code reported for injected failures
pub const SIM_FAILURE_CODE: u32 = 0xD8E0_07F7;

/// Hardware calls the simulator records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimCall {
    UnloadComponent,
    LoadComponent,
    CreateEvent,
    RegisterInterrupt,
    UnregisterInterrupt,
    SemaphoreHandle,
    SetSemaphoreMask,
    SetSemaphore,
    WritePipe,
    ReadPipe,
    WaitEvent,
    ClearEvent,
    SignalEvent,
    CloseHandle,
    ConvertAddress,
    FlushDataCache,
}

/// Behaviour knobs for the simulated coprocessor
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Count reported in the address-table header
    pub address_count: u16,

    /// Truncate the address-table body by this many bytes
    pub truncate_table_by: usize,

    /// Fail the n-th (0-based) occurrence of a call
    pub fail_call: Option<(SimCall, usize)>,

    /// Whether the component reports itself as loaded after upload
    pub accept_firmware: bool,

    /// Stop answering frames after this many have been processed
    pub stall_after_frames: Option<usize>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            address_count: ADDRESS_TABLE_LEN,
            truncate_table_by: 0,
            fail_call: None,
            accept_firmware: true,
            stall_after_frames: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    InitRequested,
    TableSent,
    Running,
    Stopped,
}

struct SimEvent {
    sender: Sender<()>,
    receiver: Receiver<()>,
}

impl SimEvent {
    fn new() -> Self {
        let (sender, receiver) = bounded(1);
        Self { sender, receiver }
    }

    fn signal(&self) {
        // Already-signalled events stay signalled
        let _ = self.sender.try_send(());
    }

    fn clear(&self) {
        while self.receiver.try_recv().is_ok() {}
    }
}

struct SimState {
    config: SimConfig,
    phase: Phase,
    component_loaded: bool,
    next_handle: u32,
    events: HashMap<u32, SimEvent>,
    semaphore: Option<Handle>,
    semaphore_mask: u16,
    interrupt_event: Option<Handle>,
    pipe_out: VecDeque<u8>,
    firmware: SimFirmware,
    stalled: bool,
    calls: Vec<SimCall>,
    closed: Vec<Handle>,
    frames: Vec<FrameRecord>,
    opcodes: Vec<PipeOpcode>,
}

impl SimState {
    fn new(config: SimConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            component_loaded: false,
            next_handle: 0x20,
            events: HashMap::new(),
            semaphore: None,
            semaphore_mask: 0,
            interrupt_event: None,
            pipe_out: VecDeque::new(),
            firmware: SimFirmware::new(SimLayout::new()),
            stalled: false,
            calls: Vec::new(),
            closed: Vec::new(),
            frames: Vec::new(),
            opcodes: Vec::new(),
        }
    }

    /// Log a call and apply fault injection
    fn enter(&mut self, call: SimCall, name: &'static str) -> Result<(), PlatformError> {
        let occurrence = self.calls.iter().filter(|logged| **logged == call).count();
        self.calls.push(call);
        trace!(?call, occurrence, "sim call");
        match self.config.fail_call {
            Some((failing, nth)) if failing == call && nth == occurrence => {
                debug!(call = name, "injected failure");
                Err(PlatformError::CallFailed {
                    call: name,
                    code: SIM_FAILURE_CODE,
                })
            }
            _ => Ok(()),
        }
    }

    fn allocate_handle(&mut self) -> Handle {
        let handle = Handle::from_raw(self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn fire_interrupt(&self) {
        if let Some(event) = self.interrupt_event {
            if let Some(event) = self.events.get(&event.raw()) {
                event.signal();
            }
        }
    }

    fn send_address_table(&mut self) {
        self.pipe_out.clear();
        self.pipe_out
            .extend(self.config.address_count.to_le_bytes());

        let mut body: Vec<u8> = self
            .firmware
            .layout()
            .addresses()
            .iter()
            .flat_map(|address| address.to_le_bytes())
            .collect();
        let keep = body.len().saturating_sub(self.config.truncate_table_by);
        body.truncate(keep);
        self.pipe_out.extend(body);

        self.phase = Phase::TableSent;
        self.fire_interrupt();
    }

    fn run_frame(&mut self, ram: &DspRam) {
        if self.stalled {
            return;
        }
        if let Some(limit) = self.config.stall_after_frames {
            if self.frames.len() >= limit {
                debug!(frames = self.frames.len(), "simulated coprocessor stalled");
                self.stalled = true;
                return;
            }
        }
        let record = self.firmware.process_frame(ram);
        trace!(counter = record.frame_counter, slot = record.slot, "sim frame");
        self.frames.push(record);
        self.fire_interrupt();
    }
}

/// Simulated coprocessor backend
pub struct SimBackend {
    state: Arc<Mutex<SimState>>,
    ram: Arc<DspRam>,
}

impl SimBackend {
    pub fn new() -> Self {
        Self::with_config(SimConfig::default())
    }

    pub fn with_config(config: SimConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(config))),
            ram: Arc::new(DspRam::new()),
        }
    }

    /// Inspection handle that outlives moving the backend into a session
    pub fn probe(&self) -> SimProbe {
        SimProbe {
            state: Arc::clone(&self.state),
            ram: Arc::clone(&self.ram),
        }
    }
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: convert_dsp_address only returns pointers into `ram`, which is
// reference counted and lives at least as long as this backend.
unsafe impl CoprocessorBackend for SimBackend {
    fn name(&self) -> &'static str {
        "Simulated coprocessor"
    }

    fn unload_component(&mut self) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.enter(SimCall::UnloadComponent, "DSP_UnloadComponent")?;
        state.component_loaded = false;
        state.phase = Phase::Idle;
        Ok(())
    }

    fn load_component(
        &mut self,
        image: &[u8],
        _prog_mask: u16,
        _data_mask: u16,
    ) -> Result<bool, PlatformError> {
        let mut state = self.state.lock();
        state.enter(SimCall::LoadComponent, "DSP_LoadComponent")?;
        state.component_loaded = state.config.accept_firmware && !image.is_empty();
        if state.component_loaded {
            state.firmware = SimFirmware::new(SimLayout::new());
            debug!(bytes = image.len(), "simulated component loaded");
        }
        Ok(state.component_loaded)
    }

    fn create_event(&mut self) -> Result<Handle, PlatformError> {
        let mut state = self.state.lock();
        state.enter(SimCall::CreateEvent, "svcCreateEvent")?;
        let handle = state.allocate_handle();
        state.events.insert(handle.raw(), SimEvent::new());
        Ok(handle)
    }

    fn register_interrupt_events(
        &mut self,
        event: Option<Handle>,
        _interrupt: u32,
        channel: u32,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        let call = if event.is_some() {
            SimCall::RegisterInterrupt
        } else {
            SimCall::UnregisterInterrupt
        };
        state.enter(call, "DSP_RegisterInterruptEvents")?;
        if channel != AUDIO_PIPE {
            return Err(PlatformError::UnsupportedChannel { channel });
        }
        if let Some(handle) = event {
            if !state.events.contains_key(&handle.raw()) {
                return Err(PlatformError::InvalidHandle(handle.raw()));
            }
        }
        state.interrupt_event = event;
        Ok(())
    }

    fn semaphore_handle(&mut self) -> Result<Handle, PlatformError> {
        let mut state = self.state.lock();
        state.enter(SimCall::SemaphoreHandle, "DSP_GetSemaphoreHandle")?;
        let handle = state.allocate_handle();
        state.semaphore = Some(handle);
        Ok(handle)
    }

    fn set_semaphore_mask(&mut self, mask: u16) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.enter(SimCall::SetSemaphoreMask, "DSP_SetSemaphoreMask")?;
        state.semaphore_mask = mask;
        Ok(())
    }

    fn set_semaphore(&mut self, value: u16) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.enter(SimCall::SetSemaphore, "DSP_SetSemaphore")?;
        if value & SEMAPHORE_DATA_AVAILABLE == 0 {
            return Ok(());
        }
        match state.phase {
            Phase::InitRequested => state.send_address_table(),
            Phase::TableSent => state.phase = Phase::Running,
            _ => {}
        }
        Ok(())
    }

    fn write_pipe(&mut self, channel: u32, data: &[u8]) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.enter(SimCall::WritePipe, "DSP_WriteProcessPipe")?;
        if channel != AUDIO_PIPE {
            return Err(PlatformError::UnsupportedChannel { channel });
        }
        if !state.component_loaded {
            return Err(PlatformError::ComponentNotLoaded);
        }
        let word: [u8; 4] = data
            .get(..4)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(PlatformError::CallFailed {
                call: "DSP_WriteProcessPipe",
                code: SIM_FAILURE_CODE,
            })?;
        match PipeOpcode::from_le_bytes(word) {
            Some(opcode) => {
                state.opcodes.push(opcode);
                state.phase = match opcode {
                    PipeOpcode::Initialize => Phase::InitRequested,
                    PipeOpcode::Shutdown => Phase::Stopped,
                };
            }
            None => debug!(?word, "unknown opcode ignored"),
        }
        Ok(())
    }

    fn read_pipe(&mut self, channel: u32, buf: &mut [u8]) -> Result<usize, PlatformError> {
        let mut state = self.state.lock();
        state.enter(SimCall::ReadPipe, "DSP_ReadPipeIfPossible")?;
        if channel != AUDIO_PIPE {
            return Err(PlatformError::UnsupportedChannel { channel });
        }
        let mut read = 0;
        for byte in buf.iter_mut() {
            match state.pipe_out.pop_front() {
                Some(value) => {
                    *byte = value;
                    read += 1;
                }
                None => break,
            }
        }
        Ok(read)
    }

    fn wait_event(&mut self, event: Handle, timeout: Option<Duration>) -> Result<(), PlatformError> {
        // Clone the receiver so the lock is not held while blocking
        let (receiver, sender) = {
            let mut state = self.state.lock();
            state.enter(SimCall::WaitEvent, "svcWaitSynchronization")?;
            let sim_event = state
                .events
                .get(&event.raw())
                .ok_or(PlatformError::InvalidHandle(event.raw()))?;
            (sim_event.receiver.clone(), sim_event.sender.clone())
        };

        let outcome = match timeout {
            Some(limit) => receiver.recv_timeout(limit),
            None => receiver
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        };

        match outcome {
            Ok(()) => {
                // Waiting does not reset the event; only clear_event does
                let _ = sender.try_send(());
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(PlatformError::Timeout(event.raw())),
            Err(RecvTimeoutError::Disconnected) => {
                Err(PlatformError::Disconnected("event channel closed".into()))
            }
        }
    }

    fn clear_event(&mut self, event: Handle) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.enter(SimCall::ClearEvent, "svcClearEvent")?;
        let sim_event = state
            .events
            .get(&event.raw())
            .ok_or(PlatformError::InvalidHandle(event.raw()))?;
        sim_event.clear();
        Ok(())
    }

    fn signal_event(&mut self, handle: Handle) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.enter(SimCall::SignalEvent, "svcSignalEvent")?;
        if state.semaphore == Some(handle) {
            if state.phase == Phase::Running {
                state.run_frame(&self.ram);
            }
            return Ok(());
        }
        let sim_event = state
            .events
            .get(&handle.raw())
            .ok_or(PlatformError::InvalidHandle(handle.raw()))?;
        sim_event.signal();
        Ok(())
    }

    fn close_handle(&mut self, handle: Handle) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.enter(SimCall::CloseHandle, "svcCloseHandle")?;
        if state.semaphore == Some(handle) {
            state.semaphore = None;
        } else if state.events.remove(&handle.raw()).is_none() {
            return Err(PlatformError::InvalidHandle(handle.raw()));
        }
        if state.interrupt_event == Some(handle) {
            state.interrupt_event = None;
        }
        state.closed.push(handle);
        Ok(())
    }

    fn convert_dsp_address(&self, dsp_address: u32) -> Result<NonNull<u8>, PlatformError> {
        self.state
            .lock()
            .enter(SimCall::ConvertAddress, "DSP_ConvertProcessAddressFromDspDram")?;
        self.ram.pointer(dsp_address)
    }

    fn flush_data_cache(&self, _data: &[u8]) -> Result<(), PlatformError> {
        self.state
            .lock()
            .enter(SimCall::FlushDataCache, "DSP_FlushDataCache")
    }
}

/// Shared view into a [`SimBackend`] for assertions and fault injection
#[derive(Clone)]
pub struct SimProbe {
    state: Arc<Mutex<SimState>>,
    ram: Arc<DspRam>,
}

impl SimProbe {
    /// Every hardware call made so far, in order
    pub fn calls(&self) -> Vec<SimCall> {
        self.state.lock().calls.clone()
    }

    /// Number of times `call` was made
    pub fn count(&self, call: SimCall) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|logged| **logged == call)
            .count()
    }

    /// Handles closed so far, in order
    pub fn closed_handles(&self) -> Vec<Handle> {
        self.state.lock().closed.clone()
    }

    /// Frames the simulated coprocessor has processed
    pub fn frames(&self) -> Vec<FrameRecord> {
        self.state.lock().frames.clone()
    }

    /// Opcodes received on the audio pipe
    pub fn opcodes(&self) -> Vec<PipeOpcode> {
        self.state.lock().opcodes.clone()
    }

    pub fn semaphore_mask(&self) -> u16 {
        self.state.lock().semaphore_mask
    }

    pub fn component_loaded(&self) -> bool {
        self.state.lock().component_loaded
    }

    /// Whether an interrupt event is currently registered
    pub fn interrupt_registered(&self) -> bool {
        self.state.lock().interrupt_event.is_some()
    }

    /// Number of event handles still open
    pub fn open_events(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Stop (or resume) answering frames
    pub fn set_stalled(&self, stalled: bool) {
        self.state.lock().stalled = stalled;
    }

    /// Direct access to the simulated DRAM
    pub fn ram(&self) -> &DspRam {
        &self.ram
    }

    /// Simulated word addresses of the address table
    pub fn layout(&self) -> SimLayout {
        self.state.lock().firmware.layout().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{PIPE_INTERRUPT, SEMAPHORE_FRAME_MASK};

    fn handshake(backend: &mut SimBackend) -> (Handle, Vec<u8>) {
        backend.load_component(&[0xAA; 16], 0xFF, 0xFF).unwrap();
        let event = backend.create_event().unwrap();
        backend
            .register_interrupt_events(Some(event), PIPE_INTERRUPT, AUDIO_PIPE)
            .unwrap();
        backend.semaphore_handle().unwrap();
        backend.set_semaphore_mask(SEMAPHORE_FRAME_MASK).unwrap();
        backend
            .write_pipe(AUDIO_PIPE, &PipeOpcode::Initialize.to_le_bytes())
            .unwrap();
        backend.set_semaphore(SEMAPHORE_DATA_AVAILABLE).unwrap();
        backend
            .wait_event(event, Some(Duration::from_millis(10)))
            .unwrap();

        let mut table = vec![0u8; 2 + 2 * ADDRESS_TABLE_LEN as usize];
        let read = backend.read_pipe(AUDIO_PIPE, &mut table).unwrap();
        table.truncate(read);
        (event, table)
    }

    #[test]
    fn test_handshake_sends_address_table() {
        let mut backend = SimBackend::new();
        let (_, table) = handshake(&mut backend);
        assert_eq!(table.len(), 32);
        assert_eq!(u16::from_le_bytes([table[0], table[1]]), ADDRESS_TABLE_LEN);
        assert_eq!(backend.probe().semaphore_mask(), SEMAPHORE_FRAME_MASK);
    }

    #[test]
    fn test_event_is_sticky_until_cleared() {
        let mut backend = SimBackend::new();
        let event = backend.create_event().unwrap();
        backend.signal_event(event).unwrap();

        let timeout = Some(Duration::from_millis(5));
        backend.wait_event(event, timeout).unwrap();
        backend.wait_event(event, timeout).unwrap();

        backend.clear_event(event).unwrap();
        assert_eq!(
            backend.wait_event(event, timeout),
            Err(PlatformError::Timeout(event.raw()))
        );
    }

    #[test]
    fn test_injected_failure_on_nth_call() {
        let mut backend = SimBackend::with_config(SimConfig {
            fail_call: Some((SimCall::CreateEvent, 1)),
            ..SimConfig::default()
        });
        assert!(backend.create_event().is_ok());
        let err = backend.create_event().unwrap_err();
        assert!(matches!(err, PlatformError::CallFailed { call: "svcCreateEvent", .. }));
        assert_eq!(backend.probe().count(SimCall::CreateEvent), 2);
    }

    #[test]
    fn test_double_close_is_rejected() {
        let mut backend = SimBackend::new();
        let event = backend.create_event().unwrap();
        backend.close_handle(event).unwrap();
        assert_eq!(
            backend.close_handle(event),
            Err(PlatformError::InvalidHandle(event.raw()))
        );
    }

    #[test]
    fn test_semaphore_signal_runs_a_frame_after_ack() {
        let mut backend = SimBackend::new();
        let (event, _) = handshake(&mut backend);
        backend.clear_event(event).unwrap();
        backend.set_semaphore(SEMAPHORE_DATA_AVAILABLE).unwrap();

        let semaphore = backend.state.lock().semaphore.unwrap();
        backend.signal_event(semaphore).unwrap();

        let probe = backend.probe();
        assert_eq!(probe.frames().len(), 1);
        backend
            .wait_event(event, Some(Duration::from_millis(5)))
            .unwrap();
    }

    #[test]
    fn test_rejected_firmware_reports_not_loaded() {
        let mut backend = SimBackend::with_config(SimConfig {
            accept_firmware: false,
            ..SimConfig::default()
        });
        assert_eq!(backend.load_component(&[1, 2, 3], 0xFF, 0xFF), Ok(false));
        assert!(!backend.probe().component_loaded());
    }
}
