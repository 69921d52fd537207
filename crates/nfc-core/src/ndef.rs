//! NDEF message and cache types for tag endpoints.

use bytes::Bytes;

/// Raw NDEF message bytes as read from or written to a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefMessage(pub Bytes);

impl NdefMessage {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NdefMode {
    ReadWrite,
    ReadOnly,
}

/// Result of NDEF detection on a connected tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdefInfo {
    pub max_size: u32,
    pub current_size: u32,
    pub mode: NdefMode,
}

/// Per-endpoint NDEF cache. Populated only by an explicit read
/// (`read_ndef` / `find_and_read_ndef`), never by detection alone.
#[derive(Debug, Clone, Default)]
pub struct NdefCache {
    pub message: Option<NdefMessage>,
    pub formatted: bool,
}
