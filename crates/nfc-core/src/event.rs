//! Shared payload types for asynchronous controller events.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Frame class observed during an observe-mode polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollingFrameKind {
    NfcA,
    NfcB,
    NfcF,
    RemoteFieldOn,
    RemoteFieldOff,
    Unknown,
}

/// One frame captured from the remote reader's polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingFrame {
    pub kind: PollingFrameKind,
    pub data: Bytes,
    /// Controller timestamp, microseconds since an arbitrary epoch.
    pub timestamp_us: u64,
    /// Vendor-specific field strength indication, if reported.
    pub gain: Option<u8>,
}

/// Structured response to a raw vendor NCI command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorResponse {
    /// NCI status byte; zero is success.
    pub status: u8,
    pub payload: Bytes,
}

impl VendorResponse {
    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}
