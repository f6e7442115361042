//! Shutdown
//!
//! Every resource bootstrap acquires is recorded in a [`ResourceLedger`] the
//! moment the acquiring call succeeds. Teardown walks the ledger, releases
//! what is there and takes each entry out before releasing it, so a second
//! teardown (or one after a half-finished bootstrap) only touches what is
//! still held.

use std::fmt;

use merry_platform::{
    CoprocessorBackend, Handle, PipeOpcode, PlatformError, AUDIO_PIPE, PIPE_INTERRUPT,
};
use tracing::{debug, warn};

/// Resources currently held on the coprocessor service
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResourceLedger {
    pub(crate) component_loaded: bool,
    pub(crate) wake_event: Option<Handle>,
    pub(crate) interrupt_registered: bool,
    pub(crate) notify_semaphore: Option<Handle>,
}

/// One teardown action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    SendShutdown,
    UnregisterInterrupt,
    CloseWakeEvent,
    CloseSemaphore,
    UnloadComponent,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TeardownStep::SendShutdown => "shutdown opcode",
            TeardownStep::UnregisterInterrupt => "interrupt unregistration",
            TeardownStep::CloseWakeEvent => "wake event release",
            TeardownStep::CloseSemaphore => "notify semaphore release",
            TeardownStep::UnloadComponent => "component unload",
        };
        f.write_str(name)
    }
}

/// What a teardown did
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TeardownReport {
    /// Steps attempted, in order
    pub performed: Vec<TeardownStep>,

    /// Steps whose hardware call failed; teardown carried on regardless
    pub failures: Vec<(TeardownStep, PlatformError)>,
}

impl TeardownReport {
    /// Whether there was nothing left to release
    pub fn is_noop(&self) -> bool {
        self.performed.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, step: TeardownStep, result: Result<(), PlatformError>) {
        self.performed.push(step);
        if let Err(e) = result {
            warn!("{} failed during teardown: {}", step, e);
            self.failures.push((step, e));
        }
    }
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether nothing is held
    pub fn is_empty(&self) -> bool {
        !self.component_loaded
            && self.wake_event.is_none()
            && !self.interrupt_registered
            && self.notify_semaphore.is_none()
    }

    pub fn component_loaded(&self) -> bool {
        self.component_loaded
    }

    pub fn wake_event(&self) -> Option<Handle> {
        self.wake_event
    }

    pub fn interrupt_registered(&self) -> bool {
        self.interrupt_registered
    }

    pub fn notify_semaphore(&self) -> Option<Handle> {
        self.notify_semaphore
    }

    /// Release everything still held, best effort
    pub fn release(&mut self, backend: &mut dyn CoprocessorBackend) -> TeardownReport {
        let mut report = TeardownReport::default();

        if self.component_loaded {
            report.record(
                TeardownStep::SendShutdown,
                backend.write_pipe(AUDIO_PIPE, &PipeOpcode::Shutdown.to_le_bytes()),
            );
        }

        if std::mem::take(&mut self.interrupt_registered) {
            report.record(
                TeardownStep::UnregisterInterrupt,
                backend.register_interrupt_events(None, PIPE_INTERRUPT, AUDIO_PIPE),
            );
        }

        if let Some(event) = self.wake_event.take() {
            report.record(TeardownStep::CloseWakeEvent, backend.close_handle(event));
        }

        if let Some(semaphore) = self.notify_semaphore.take() {
            report.record(TeardownStep::CloseSemaphore, backend.close_handle(semaphore));
        }

        if std::mem::take(&mut self.component_loaded) {
            report.record(TeardownStep::UnloadComponent, backend.unload_component());
        }

        if !report.is_noop() {
            debug!(
                steps = report.performed.len(),
                failures = report.failures.len(),
                "coprocessor resources released"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use merry_platform::sim::{SimBackend, SimCall, SimConfig};

    #[test]
    fn test_empty_ledger_makes_no_calls() {
        let mut backend = SimBackend::new();
        let probe = backend.probe();
        let mut ledger = ResourceLedger::new();

        let report = ledger.release(&mut backend);
        assert!(report.is_noop());
        assert!(probe.calls().is_empty());
    }

    #[test]
    fn test_release_only_what_is_held() {
        let mut backend = SimBackend::new();
        let probe = backend.probe();
        let event = backend.create_event().unwrap();
        let mut ledger = ResourceLedger {
            wake_event: Some(event),
            ..ResourceLedger::default()
        };

        let report = ledger.release(&mut backend);
        assert_eq!(report.performed, vec![TeardownStep::CloseWakeEvent]);
        assert!(report.is_clean());
        assert_eq!(probe.closed_handles(), vec![event]);
        assert!(ledger.is_empty());

        // Second release is a no-op
        assert!(ledger.release(&mut backend).is_noop());
        assert_eq!(probe.count(SimCall::CloseHandle), 1);
    }

    #[test]
    fn test_failures_do_not_stop_teardown() {
        let mut backend = SimBackend::with_config(SimConfig {
            fail_call: Some((SimCall::UnregisterInterrupt, 0)),
            ..SimConfig::default()
        });
        let probe = backend.probe();
        backend.load_component(&[1, 2, 3, 4], 0xFF, 0xFF).unwrap();
        let event = backend.create_event().unwrap();
        backend
            .register_interrupt_events(Some(event), PIPE_INTERRUPT, AUDIO_PIPE)
            .unwrap();
        let semaphore = backend.semaphore_handle().unwrap();

        let mut ledger = ResourceLedger {
            component_loaded: true,
            wake_event: Some(event),
            interrupt_registered: true,
            notify_semaphore: Some(semaphore),
        };
        let report = ledger.release(&mut backend);

        assert_eq!(
            report.performed,
            vec![
                TeardownStep::SendShutdown,
                TeardownStep::UnregisterInterrupt,
                TeardownStep::CloseWakeEvent,
                TeardownStep::CloseSemaphore,
                TeardownStep::UnloadComponent,
            ]
        );
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, TeardownStep::UnregisterInterrupt);
        assert_eq!(probe.opcodes(), vec![PipeOpcode::Shutdown]);
        assert!(!probe.component_loaded());
        assert!(ledger.is_empty());
    }
}
