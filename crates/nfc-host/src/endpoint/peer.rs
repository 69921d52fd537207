//! Peer-to-peer (NFC-DEP) endpoint.

use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;

use nfc_core::tech::PeerMode;
use nfc_core::{NfcError, Result};
use nfc_hal::{HalHandle, Handle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Idle,
    Connected,
}

pub struct PeerEndpoint {
    handle: Handle,
    hal: HalHandle,
    mode: PeerMode,
    general_bytes: Bytes,
    state: Mutex<PeerState>,
    transport: tokio::sync::Mutex<()>,
    /// Bound on how long a receive waits for the remote peer.
    io_timeout: Duration,
}

impl PeerEndpoint {
    pub fn new(
        hal: HalHandle,
        handle: Handle,
        mode: PeerMode,
        general_bytes: Bytes,
        io_timeout: Duration,
    ) -> Self {
        Self {
            handle,
            hal,
            mode,
            general_bytes,
            state: Mutex::new(PeerState::Idle),
            transport: tokio::sync::Mutex::new(()),
            io_timeout,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Initiator or target, fixed at link negotiation.
    pub fn mode(&self) -> PeerMode {
        self.mode
    }

    pub fn general_bytes(&self) -> &Bytes {
        &self.general_bytes
    }

    pub fn state(&self) -> PeerState {
        *self.state.lock().unwrap()
    }

    fn require_connected(&self) -> Result<()> {
        match self.state() {
            PeerState::Connected => Ok(()),
            PeerState::Idle => Err(NfcError::connection("peer link is not connected")),
        }
    }

    pub async fn connect(&self) -> Result<()> {
        if self.state() == PeerState::Connected {
            return Err(NfcError::connection("peer link already connected"));
        }
        self.hal.peer_connect(self.handle).await?;
        *self.state.lock().unwrap() = PeerState::Connected;
        tracing::debug!(handle = self.handle, mode = ?self.mode, "peer connected");
        Ok(())
    }

    /// Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        if self.state() == PeerState::Idle {
            return Ok(());
        }
        let _io = self.transport.lock().await;
        let _ = self.hal.peer_disconnect(self.handle).await;
        *self.state.lock().unwrap() = PeerState::Idle;
        tracing::debug!(handle = self.handle, "peer disconnected");
        Ok(())
    }

    pub async fn send(&self, data: &[u8]) -> Result<()> {
        self.require_connected()?;
        let _io = self.transport.lock().await;
        self.hal
            .peer_send(self.handle, Bytes::copy_from_slice(data))
            .await?
            .map_err(|status| NfcError::connection(format!("peer send failed: 0x{status:02x}")))
    }

    pub async fn receive(&self) -> Result<Bytes> {
        self.require_connected()?;
        let _io = self.transport.lock().await;
        self.wait_receive().await
    }

    /// Send one frame and wait for the response, under a single
    /// transport hold.
    pub async fn transceive(&self, data: &[u8]) -> Result<Bytes> {
        self.require_connected()?;
        let _io = self.transport.lock().await;
        self.hal
            .peer_send(self.handle, Bytes::copy_from_slice(data))
            .await?
            .map_err(|status| NfcError::connection(format!("peer send failed: 0x{status:02x}")))?;
        self.wait_receive().await
    }

    /// Caller holds the transport lock.
    async fn wait_receive(&self) -> Result<Bytes> {
        let ms = self.io_timeout.as_millis() as u64;
        match tokio::time::timeout(self.io_timeout, self.hal.peer_receive(self.handle)).await {
            Ok(result) => result?.map_err(|status| {
                NfcError::connection(format!("peer receive failed: 0x{status:02x}"))
            }),
            Err(_) => Err(NfcError::Timeout { ms }),
        }
    }
}
