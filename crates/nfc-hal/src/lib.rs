//! nfc-hal — the native controller boundary.
//!
//! The driver side is a task fed by a command channel; every command
//! carries a oneshot reply. Asynchronous hardware events flow back on a
//! separate event channel. The host side holds a [`HalHandle`] and never
//! sees the driver's internals, so a real NCI driver and the in-memory
//! [`mock::MockController`] are interchangeable.

pub mod mock;

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use nfc_core::event::{PollingFrame, VendorResponse};
use nfc_core::ndef::NdefInfo;
use nfc_core::routing::RouteEntry;
use nfc_core::tech::{PeerMode, TechMask, TechSet, Technology};
use nfc_core::{NfcError, Result, TransceiveStatus};

/// Stable identifier for one activated remote endpoint, assigned by the
/// controller for the lifetime of a discovery cycle.
pub type Handle = u32;

/// NCI status byte from the controller; zero is success.
pub type HalStatus = u8;

/// Static capabilities reported by the controller at initialize time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HalCapabilities {
    pub max_routing_table_size: usize,
    pub aid_table_size: usize,
    pub lf_t3t_max: usize,
    /// Largest transceive payload per technology; `default` applies to
    /// technologies without a dedicated bound.
    pub max_transceive_len_iso_dep: usize,
    pub max_transceive_len_default: usize,
    pub nci_version: u8,
    pub observe_mode_supported: bool,
    pub extended_apdu_supported: bool,
    pub multi_tag_supported: bool,
    pub firmware_version: String,
}

/// Body of an endpoint-discovered event.
#[derive(Debug, Clone)]
pub enum DiscoveredBody {
    Tag { technologies: TechSet, uid: Bytes, tech_extras: Vec<(Technology, Bytes)> },
    Peer { mode: PeerMode, general_bytes: Bytes },
}

/// Asynchronous event from the controller, in hardware order.
#[derive(Debug, Clone)]
pub enum HalEvent {
    EndpointDiscovered { handle: Handle, body: DiscoveredBody },
    /// RF link to an activated endpoint dropped (deactivate ntf).
    EndpointLost { handle: Handle },
    FieldActivated,
    FieldDeactivated,
    HceActivated { technology: Technology },
    HceData { technology: Technology, data: Bytes },
    HceDeactivated { technology: Technology },
    Transaction { aid: Vec<u8>, data: Bytes, ee_name: String },
    EeUpdated,
    HwError,
    PollingFrames(Vec<PollingFrame>),
    WlcStopped { end_condition: u8 },
    Vendor { gid: u8, oid: u8, payload: Bytes },
}

/// Requests to the driver task. Each reply channel is fired exactly
/// once; a dropped reply means the driver is gone.
#[derive(Debug)]
pub enum HalCommand {
    Initialize { reply: oneshot::Sender<std::result::Result<HalCapabilities, HalStatus>> },
    Deinitialize { reply: oneshot::Sender<()> },
    CheckFirmware { reply: oneshot::Sender<bool> },
    FactoryReset { reply: oneshot::Sender<()> },
    Shutdown { reply: oneshot::Sender<()> },

    SetDiscovery {
        poll_mask: TechMask,
        listen_mask: TechMask,
        reply: oneshot::Sender<std::result::Result<(), HalStatus>>,
    },
    StopDiscovery { reply: oneshot::Sender<()> },
    SetScreenState { mask: u8, always_poll: bool, reply: oneshot::Sender<()> },
    SetPolling { enable: bool, reply: oneshot::Sender<()> },

    Activate {
        handle: Handle,
        technology: Technology,
        reply: oneshot::Sender<std::result::Result<(), HalStatus>>,
    },
    Deactivate { handle: Handle, reply: oneshot::Sender<()> },
    Transceive {
        handle: Handle,
        payload: Bytes,
        raw: bool,
        timeout: Duration,
        reply: oneshot::Sender<(TransceiveStatus, Bytes)>,
    },
    PresenceProbe { handle: Handle, reply: oneshot::Sender<bool> },

    NdefDetect { handle: Handle, reply: oneshot::Sender<std::result::Result<NdefInfo, HalStatus>> },
    NdefRead { handle: Handle, reply: oneshot::Sender<std::result::Result<Bytes, HalStatus>> },
    NdefWrite {
        handle: Handle,
        data: Bytes,
        reply: oneshot::Sender<std::result::Result<(), HalStatus>>,
    },
    NdefFormat {
        handle: Handle,
        key: Bytes,
        reply: oneshot::Sender<std::result::Result<(), HalStatus>>,
    },
    NdefMakeReadOnly { handle: Handle, reply: oneshot::Sender<std::result::Result<(), HalStatus>> },

    PeerConnect { handle: Handle, reply: oneshot::Sender<std::result::Result<(), HalStatus>> },
    PeerDisconnect { handle: Handle, reply: oneshot::Sender<()> },
    PeerSend {
        handle: Handle,
        data: Bytes,
        reply: oneshot::Sender<std::result::Result<(), HalStatus>>,
    },
    PeerReceive { handle: Handle, reply: oneshot::Sender<std::result::Result<Bytes, HalStatus>> },

    CommitRouting {
        entries: Vec<RouteEntry>,
        reply: oneshot::Sender<std::result::Result<(), HalStatus>>,
    },
    RegisterT3t { id: Bytes, reply: oneshot::Sender<std::result::Result<(), HalStatus>> },
    DeregisterT3t { id: Bytes, reply: oneshot::Sender<()> },
    ClearT3t { reply: oneshot::Sender<()> },

    SetObserveMode { enable: bool, reply: oneshot::Sender<bool> },
    SetPowerSaving { enable: bool, reply: oneshot::Sender<bool> },
    SetNfceePowerAndLink { enable: bool, reply: oneshot::Sender<()> },
    SetNfcSecure { enable: bool, reply: oneshot::Sender<bool> },

    VendorCommand {
        mt: u8,
        gid: u8,
        oid: u8,
        payload: Bytes,
        reply: oneshot::Sender<VendorResponse>,
    },
    SendRawFrame { data: Bytes, reply: oneshot::Sender<std::result::Result<(), HalStatus>> },
}

/// Host-side handle to the driver task. Cheap to clone; every endpoint
/// and manager shares one.
#[derive(Clone)]
pub struct HalHandle {
    cmd_tx: mpsc::Sender<HalCommand>,
}

/// Depth of the command channel. Commands are request/response, so the
/// channel only needs to absorb short bursts.
pub const COMMAND_QUEUE_DEPTH: usize = 32;

impl HalHandle {
    pub fn new(cmd_tx: mpsc::Sender<HalCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Create a connected (handle, command receiver) pair for a driver.
    pub fn channel() -> (Self, mpsc::Receiver<HalCommand>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        (Self::new(tx), rx)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> HalCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(build(tx)).await.map_err(|_| NfcError::LinkDown)?;
        rx.await.map_err(|_| NfcError::LinkDown)
    }

    pub async fn initialize(&self) -> Result<HalCapabilities> {
        self.request(|reply| HalCommand::Initialize { reply })
            .await?
            .map_err(|status| NfcError::connection(format!("initialize failed: 0x{status:02x}")))
    }

    pub async fn deinitialize(&self) -> Result<()> {
        self.request(|reply| HalCommand::Deinitialize { reply }).await
    }

    pub async fn check_firmware(&self) -> Result<bool> {
        self.request(|reply| HalCommand::CheckFirmware { reply }).await
    }

    pub async fn factory_reset(&self) -> Result<()> {
        self.request(|reply| HalCommand::FactoryReset { reply }).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| HalCommand::Shutdown { reply }).await
    }

    pub async fn set_discovery(&self, poll_mask: TechMask, listen_mask: TechMask) -> Result<()> {
        self.request(|reply| HalCommand::SetDiscovery { poll_mask, listen_mask, reply })
            .await?
            .map_err(|status| NfcError::connection(format!("discovery rejected: 0x{status:02x}")))
    }

    pub async fn stop_discovery(&self) -> Result<()> {
        self.request(|reply| HalCommand::StopDiscovery { reply }).await
    }

    pub async fn set_screen_state(&self, mask: u8, always_poll: bool) -> Result<()> {
        self.request(|reply| HalCommand::SetScreenState { mask, always_poll, reply }).await
    }

    pub async fn set_polling(&self, enable: bool) -> Result<()> {
        self.request(|reply| HalCommand::SetPolling { enable, reply }).await
    }

    pub async fn activate(&self, handle: Handle, technology: Technology) -> Result<()> {
        self.request(|reply| HalCommand::Activate { handle, technology, reply })
            .await?
            .map_err(|status| NfcError::connection(format!("activation rejected: 0x{status:02x}")))
    }

    pub async fn deactivate(&self, handle: Handle) -> Result<()> {
        self.request(|reply| HalCommand::Deactivate { handle, reply }).await
    }

    pub async fn transceive(
        &self,
        handle: Handle,
        payload: Bytes,
        raw: bool,
        timeout: Duration,
    ) -> Result<(TransceiveStatus, Bytes)> {
        self.request(|reply| HalCommand::Transceive { handle, payload, raw, timeout, reply }).await
    }

    pub async fn presence_probe(&self, handle: Handle) -> Result<bool> {
        self.request(|reply| HalCommand::PresenceProbe { handle, reply }).await
    }

    pub async fn ndef_detect(&self, handle: Handle) -> Result<std::result::Result<NdefInfo, HalStatus>> {
        self.request(|reply| HalCommand::NdefDetect { handle, reply }).await
    }

    pub async fn ndef_read(&self, handle: Handle) -> Result<std::result::Result<Bytes, HalStatus>> {
        self.request(|reply| HalCommand::NdefRead { handle, reply }).await
    }

    pub async fn ndef_write(
        &self,
        handle: Handle,
        data: Bytes,
    ) -> Result<std::result::Result<(), HalStatus>> {
        self.request(|reply| HalCommand::NdefWrite { handle, data, reply }).await
    }

    pub async fn ndef_format(
        &self,
        handle: Handle,
        key: Bytes,
    ) -> Result<std::result::Result<(), HalStatus>> {
        self.request(|reply| HalCommand::NdefFormat { handle, key, reply }).await
    }

    pub async fn ndef_make_read_only(
        &self,
        handle: Handle,
    ) -> Result<std::result::Result<(), HalStatus>> {
        self.request(|reply| HalCommand::NdefMakeReadOnly { handle, reply }).await
    }

    pub async fn peer_connect(&self, handle: Handle) -> Result<()> {
        self.request(|reply| HalCommand::PeerConnect { handle, reply })
            .await?
            .map_err(|status| NfcError::connection(format!("peer activation rejected: 0x{status:02x}")))
    }

    pub async fn peer_disconnect(&self, handle: Handle) -> Result<()> {
        self.request(|reply| HalCommand::PeerDisconnect { handle, reply }).await
    }

    pub async fn peer_send(&self, handle: Handle, data: Bytes) -> Result<std::result::Result<(), HalStatus>> {
        self.request(|reply| HalCommand::PeerSend { handle, data, reply }).await
    }

    pub async fn peer_receive(&self, handle: Handle) -> Result<std::result::Result<Bytes, HalStatus>> {
        self.request(|reply| HalCommand::PeerReceive { handle, reply }).await
    }

    pub async fn commit_routing(&self, entries: Vec<RouteEntry>) -> Result<std::result::Result<(), HalStatus>> {
        self.request(|reply| HalCommand::CommitRouting { entries, reply }).await
    }

    pub async fn register_t3t(&self, id: Bytes) -> Result<std::result::Result<(), HalStatus>> {
        self.request(|reply| HalCommand::RegisterT3t { id, reply }).await
    }

    pub async fn deregister_t3t(&self, id: Bytes) -> Result<()> {
        self.request(|reply| HalCommand::DeregisterT3t { id, reply }).await
    }

    pub async fn clear_t3t(&self) -> Result<()> {
        self.request(|reply| HalCommand::ClearT3t { reply }).await
    }

    pub async fn set_observe_mode(&self, enable: bool) -> Result<bool> {
        self.request(|reply| HalCommand::SetObserveMode { enable, reply }).await
    }

    pub async fn set_power_saving(&self, enable: bool) -> Result<bool> {
        self.request(|reply| HalCommand::SetPowerSaving { enable, reply }).await
    }

    pub async fn set_nfcee_power_and_link(&self, enable: bool) -> Result<()> {
        self.request(|reply| HalCommand::SetNfceePowerAndLink { enable, reply }).await
    }

    pub async fn set_nfc_secure(&self, enable: bool) -> Result<bool> {
        self.request(|reply| HalCommand::SetNfcSecure { enable, reply }).await
    }

    pub async fn vendor_command(
        &self,
        mt: u8,
        gid: u8,
        oid: u8,
        payload: Bytes,
    ) -> Result<VendorResponse> {
        self.request(|reply| HalCommand::VendorCommand { mt, gid, oid, payload, reply }).await
    }

    pub async fn send_raw_frame(&self, data: Bytes) -> Result<()> {
        self.request(|reply| HalCommand::SendRawFrame { data, reply })
            .await?
            .map_err(|status| NfcError::connection(format!("raw frame rejected: 0x{status:02x}")))
    }
}
