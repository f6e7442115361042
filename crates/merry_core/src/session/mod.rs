//! Coprocessor Session - Main Entry Point
//!
//! The `CoprocessorSession` owns the hardware backend, the resources acquired
//! during bootstrap, the frame counter and the region directory. It is the
//! only object a frame loop talks to.
//!
//! # Frame loop
//!
//! ```text
//!   boot ──▶ wait_for_frame ──▶ read_view / write_view ──▶ publish_frame ─┐
//!                 ▲                                                       │
//!                 └───────────────────────────────────────────────────────┘
//! ```
//!
//! The session is `Send`, so it can live on a dedicated audio thread, but all
//! frame operations take `&mut self`; there is no shared access.

use std::time::Duration;

use merry_platform::layout::RegionId;
use merry_platform::CoprocessorBackend;
use tracing::{debug, error, info, warn};

use crate::bootstrap::{self, BootOutcome};
use crate::config::SessionConfig;
use crate::directory::RegionDirectory;
use crate::error::{SyncError, SyncResult};
use crate::firmware::FirmwareImage;
use crate::frame::{FrameOp, FramePhase, FrameSync};
use crate::shutdown::{ResourceLedger, TeardownReport};
use crate::view::{SlotView, WriteView};


/// Everything handed to a `run_frames` callback for one frame
pub struct FrameContext<'a> {
    /// Frame id that will be published when the callback returns
    pub frame_id: u16,

    /// Coprocessor output of the previous frame
    pub read: SlotView<'a>,

    /// Configuration for the frame being built
    pub write: WriteView<'a>,
}

/// Host side of a running coprocessor
pub struct CoprocessorSession {
    /// Frame state and region pointers; dropped before the backend
    booted: Option<BootOutcome>,

    /// Resources to release at shutdown
    ledger: ResourceLedger,

    config: SessionConfig,

    backend: Box<dyn CoprocessorBackend>,
}

impl CoprocessorSession {
    /// Create an idle session around a backend
    pub fn new(backend: impl CoprocessorBackend + 'static, config: SessionConfig) -> SyncResult<Self> {
        config.validate()?;
        debug!(backend = backend.name(), "Coprocessor session created");
        Ok(Self {
            booted: None,
            ledger: ResourceLedger::new(),
            config,
            backend: Box::new(backend),
        })
    }

    /// Create a session and boot it from the configured firmware file
    pub fn open(backend: impl CoprocessorBackend + 'static, config: SessionConfig) -> SyncResult<Self> {
        let mut session = Self::new(backend, config)?;
        session.boot_from_file()?;
        Ok(session)
    }

    /// Read the configured firmware file and boot with it
    ///
    /// A missing or unreadable file fails before any hardware call.
    pub fn boot_from_file(&mut self) -> SyncResult<()> {
        self.check_can_boot()?;
        let image = FirmwareImage::load(&self.config.firmware_path)?;
        self.boot(&image)
    }

    /// Upload `image` and run the handshake
    ///
    /// On failure the partially acquired resources stay recorded; call
    /// [`shutdown`](Self::shutdown) (or drop the session) to release them.
    /// Booting again before that returns [`SyncError::ResourcesHeld`].
    pub fn boot(&mut self, image: &FirmwareImage) -> SyncResult<()> {
        self.check_can_boot()?;
        if image.is_empty() {
            return Err(SyncError::NotFound {
                path: image.origin().map(|p| p.to_path_buf()).unwrap_or_default(),
                reason: "firmware image is empty".to_string(),
            });
        }

        let outcome = bootstrap::boot(self.backend.as_mut(), image, &self.config, &mut self.ledger)?;
        self.booted = Some(outcome);
        Ok(())
    }

    fn check_can_boot(&self) -> SyncResult<()> {
        if self.booted.is_some() {
            return Err(SyncError::AlreadyBooted);
        }
        if !self.ledger.is_empty() {
            warn!("Boot refused: a previous attempt still holds coprocessor resources");
            return Err(SyncError::ResourcesHeld);
        }
        Ok(())
    }

    pub fn is_booted(&self) -> bool {
        self.booted.is_some()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Resources currently held on the coprocessor service
    pub fn resources(&self) -> &ResourceLedger {
        &self.ledger
    }

    fn booted(&self) -> SyncResult<&BootOutcome> {
        self.booted.as_ref().ok_or(SyncError::NotBooted)
    }

    fn frame(&self) -> SyncResult<&FrameSync> {
        Ok(&self.booted()?.frame)
    }

    /// Next frame id to publish
    pub fn frame_id(&self) -> SyncResult<u16> {
        Ok(self.frame()?.frame_id())
    }

    pub fn phase(&self) -> SyncResult<FramePhase> {
        Ok(self.frame()?.phase())
    }

    pub fn frames_published(&self) -> SyncResult<u64> {
        Ok(self.frame()?.frames_published())
    }

    pub fn directory(&self) -> SyncResult<&RegionDirectory> {
        Ok(&self.booted()?.directory)
    }

    /// Slot the host fills this frame
    pub fn write_view(&self) -> SyncResult<WriteView<'_>> {
        let booted = self.booted()?;
        Ok(WriteView::new(booted.directory.slot(booted.frame.write_slot())))
    }

    /// Slot holding the coprocessor's latest output
    pub fn read_view(&self) -> SyncResult<SlotView<'_>> {
        let booted = self.booted()?;
        Ok(SlotView::new(booted.directory.slot(booted.frame.read_slot())))
    }

    /// Block until the coprocessor signals the end of its frame
    ///
    /// `None` blocks without a deadline.
    pub fn wait_for_frame_boundary(&mut self, timeout: Option<Duration>) -> SyncResult<()> {
        let booted = self.booted.as_mut().ok_or(SyncError::NotBooted)?;
        booted
            .frame
            .wait_for_frame_boundary(self.backend.as_mut(), timeout)
    }

    /// Wait using the configured frame timeout
    pub fn wait_for_frame(&mut self) -> SyncResult<()> {
        let timeout = self.config.frame_timeout();
        self.wait_for_frame_boundary(timeout)
    }

    /// Stamp the write slot and hand the frame to the coprocessor
    pub fn publish_frame(&mut self) -> SyncResult<u16> {
        let BootOutcome { frame, directory } =
            self.booted.as_mut().ok_or(SyncError::NotBooted)?;
        let counter = directory
            .slot(frame.write_slot())
            .region(RegionId::FrameCounter);
        frame.publish_frame(self.backend.as_mut(), counter)
    }

    /// Drive `count` frames of wait, callback, publish
    ///
    /// The first error from the wait, the callback or the publish stops the
    /// loop, shuts the session down and is returned.
    pub fn run_frames<F>(&mut self, count: u64, mut f: F) -> SyncResult<u64>
    where
        F: FnMut(&mut FrameContext<'_>) -> SyncResult<()>,
    {
        for completed in 0..count {
            if let Err(e) = self.run_one_frame(&mut f) {
                error!(completed, "Frame loop stopped: {}", e);
                self.shutdown();
                return Err(e);
            }
        }
        Ok(count)
    }

    fn run_one_frame<F>(&mut self, f: &mut F) -> SyncResult<()>
    where
        F: FnMut(&mut FrameContext<'_>) -> SyncResult<()>,
    {
        self.wait_for_frame()?;
        {
            let mut context = FrameContext {
                frame_id: self.frame_id()?,
                read: self.read_view()?,
                write: self.write_view()?,
            };
            f(&mut context)?;
        }
        self.publish_frame()?;
        Ok(())
    }

    /// Write the standard initial configuration into the write slot
    pub fn apply_power_on_defaults(&self, headphones_connected: bool) -> SyncResult<()> {
        self.write_view()?
            .apply_power_on_defaults(headphones_connected)
    }

    /// Flush host caches over sample data the coprocessor will read
    pub fn flush_buffer(&self, data: &[u8]) -> SyncResult<()> {
        self.backend
            .flush_data_cache(data)
            .map_err(|source| SyncError::CoprocessorFault {
                operation: FrameOp::FlushCache,
                source,
            })
    }

    /// Release every held resource; safe to call any number of times
    pub fn shutdown(&mut self) -> TeardownReport {
        let was_booted = self.booted.take().is_some();
        let report = self.ledger.release(self.backend.as_mut());
        if !report.is_noop() {
            if report.is_clean() {
                info!(was_booted, "Coprocessor session shut down");
            } else {
                warn!(
                    failures = report.failures.len(),
                    "Coprocessor session shut down with errors"
                );
            }
        }
        report
    }
}

impl Drop for CoprocessorSession {
    fn drop(&mut self) {
        if !self.ledger.is_empty() {
            debug!("Coprocessor session dropped while holding resources");
            self.shutdown();
        }
    }
}
