//! Firmware image loading
//!
//! The image is opaque: it is read from storage and forwarded to the
//! backend byte-for-byte.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::error::{SyncError, SyncResult};

/// Opaque coprocessor firmware image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    bytes: Vec<u8>,
    origin: Option<PathBuf>,
}

impl FirmwareImage {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            origin: None,
        }
    }

    /// Read an image from storage
    ///
    /// Missing, unreadable and empty files all report [`SyncError::NotFound`].
    pub fn load(path: &Path) -> SyncResult<Self> {
        let bytes = fs::read(path).map_err(|e| {
            error!("Couldn't read firmware at {:?}: {}", path, e);
            SyncError::NotFound {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        if bytes.is_empty() {
            return Err(SyncError::NotFound {
                path: path.to_path_buf(),
                reason: "firmware image is empty".to_string(),
            });
        }

        debug!(bytes = bytes.len(), "firmware image read from {:?}", path);
        Ok(Self {
            bytes,
            origin: Some(path.to_path_buf()),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// File the image was read from, if any
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }
}
