//! In-memory controller used by unit and integration tests.
//!
//! Implements the driver side of the command channel against a scripted
//! scene: tags and peers are injected by tests, failures are toggled by
//! flags, and call counters expose what the host actually asked the
//! hardware to do.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use nfc_core::event::VendorResponse;
use nfc_core::ndef::{NdefInfo, NdefMode};
use nfc_core::routing::RouteEntry;
use nfc_core::tech::{PeerMode, TechSet, Technology};
use nfc_core::TransceiveStatus;

use crate::{DiscoveredBody, HalCapabilities, HalCommand, HalEvent, HalHandle, Handle};

const STATUS_REJECTED: u8 = 0x03;
const STATUS_FAILED: u8 = 0x01;

/// One scripted passive tag in the scene.
#[derive(Debug, Clone)]
pub struct MockTag {
    pub uid: Bytes,
    pub technologies: TechSet,
    pub present: bool,
    pub ndef: Option<Bytes>,
    pub formatted: bool,
    pub read_only: bool,
    /// Scripted transceive responses; when empty the tag echoes.
    pub responses: VecDeque<Bytes>,
}

#[derive(Debug, Clone)]
pub struct MockPeer {
    pub mode: PeerMode,
    pub general_bytes: Bytes,
    pub present: bool,
    pub inbound: VecDeque<Bytes>,
}

/// Shared scene state, visible to tests.
pub struct MockState {
    event_tx: mpsc::UnboundedSender<HalEvent>,
    next_handle: AtomicU32,
    tags: Mutex<HashMap<Handle, MockTag>>,
    peers: Mutex<HashMap<Handle, MockPeer>>,
    capabilities: Mutex<HalCapabilities>,
    committed: Mutex<Vec<RouteEntry>>,
    t3t: Mutex<Vec<Bytes>>,
    vendor_response: Mutex<Option<VendorResponse>>,

    discovery_running: AtomicBool,
    discovery_starts: AtomicUsize,
    discovery_stops: AtomicUsize,
    commits: AtomicUsize,

    fail_activate: AtomicBool,
    fail_commit: AtomicBool,
    observe_enabled: AtomicBool,
}

impl MockState {
    fn new(event_tx: mpsc::UnboundedSender<HalEvent>) -> Self {
        Self {
            event_tx,
            next_handle: AtomicU32::new(1),
            tags: Mutex::new(HashMap::new()),
            peers: Mutex::new(HashMap::new()),
            capabilities: Mutex::new(HalCapabilities {
                max_routing_table_size: 512,
                aid_table_size: 50,
                lf_t3t_max: 16,
                max_transceive_len_iso_dep: 65279,
                max_transceive_len_default: 253,
                nci_version: 0x20,
                observe_mode_supported: true,
                extended_apdu_supported: true,
                multi_tag_supported: false,
                firmware_version: "mock-1.0".to_string(),
            }),
            committed: Mutex::new(Vec::new()),
            t3t: Mutex::new(Vec::new()),
            vendor_response: Mutex::new(None),
            discovery_running: AtomicBool::new(false),
            discovery_starts: AtomicUsize::new(0),
            discovery_stops: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            fail_activate: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            observe_enabled: AtomicBool::new(false),
        }
    }

    // ── Scene scripting ───────────────────────────────────────────────────────

    /// Place a tag in the field and report it as discovered.
    pub fn discover_tag(&self, uid: &[u8], technologies: &[Technology]) -> Handle {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let techs: TechSet = technologies.iter().copied().collect();
        self.tags.lock().unwrap().insert(
            handle,
            MockTag {
                uid: Bytes::copy_from_slice(uid),
                technologies: techs.clone(),
                present: true,
                ndef: None,
                formatted: false,
                read_only: false,
                responses: VecDeque::new(),
            },
        );
        let _ = self.event_tx.send(HalEvent::EndpointDiscovered {
            handle,
            body: DiscoveredBody::Tag {
                technologies: techs,
                uid: Bytes::copy_from_slice(uid),
                tech_extras: Vec::new(),
            },
        });
        handle
    }

    /// Re-report an existing tag without re-inserting it, as a
    /// controller does when the same tag is seen in a later poll round.
    pub fn rediscover_tag(&self, handle: Handle) {
        let tags = self.tags.lock().unwrap();
        if let Some(tag) = tags.get(&handle) {
            let _ = self.event_tx.send(HalEvent::EndpointDiscovered {
                handle,
                body: DiscoveredBody::Tag {
                    technologies: tag.technologies.clone(),
                    uid: tag.uid.clone(),
                    tech_extras: Vec::new(),
                },
            });
        }
    }

    pub fn discover_peer(&self, mode: PeerMode, general_bytes: &[u8]) -> Handle {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.peers.lock().unwrap().insert(
            handle,
            MockPeer {
                mode,
                general_bytes: Bytes::copy_from_slice(general_bytes),
                present: true,
                inbound: VecDeque::new(),
            },
        );
        let _ = self.event_tx.send(HalEvent::EndpointDiscovered {
            handle,
            body: DiscoveredBody::Peer { mode, general_bytes: Bytes::copy_from_slice(general_bytes) },
        });
        handle
    }

    /// Remove the tag from the field without notifying the host.
    /// Presence probes and exchanges start failing.
    pub fn set_present(&self, handle: Handle, present: bool) {
        if let Some(tag) = self.tags.lock().unwrap().get_mut(&handle) {
            tag.present = present;
        }
    }

    /// Remove the tag from the field and report the link loss.
    pub fn lose_tag(&self, handle: Handle) {
        self.set_present(handle, false);
        let _ = self.event_tx.send(HalEvent::EndpointLost { handle });
    }

    pub fn push_response(&self, handle: Handle, response: &[u8]) {
        if let Some(tag) = self.tags.lock().unwrap().get_mut(&handle) {
            tag.responses.push_back(Bytes::copy_from_slice(response));
        }
    }

    pub fn push_peer_inbound(&self, handle: Handle, data: &[u8]) {
        if let Some(peer) = self.peers.lock().unwrap().get_mut(&handle) {
            peer.inbound.push_back(Bytes::copy_from_slice(data));
        }
    }

    pub fn set_tag_ndef(&self, handle: Handle, message: &[u8]) {
        if let Some(tag) = self.tags.lock().unwrap().get_mut(&handle) {
            tag.ndef = Some(Bytes::copy_from_slice(message));
            tag.formatted = true;
        }
    }

    pub fn set_fail_activate(&self, fail: bool) {
        self.fail_activate.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::Relaxed);
    }

    pub fn set_vendor_response(&self, response: VendorResponse) {
        *self.vendor_response.lock().unwrap() = Some(response);
    }

    pub fn set_aid_table_size(&self, size: usize) {
        self.capabilities.lock().unwrap().aid_table_size = size;
    }

    /// Inject an arbitrary hardware event (field, HCE, vendor, frames).
    pub fn inject(&self, event: HalEvent) {
        let _ = self.event_tx.send(event);
    }

    // ── Observations ──────────────────────────────────────────────────────────

    pub fn discovery_starts(&self) -> usize {
        self.discovery_starts.load(Ordering::Relaxed)
    }

    pub fn discovery_stops(&self) -> usize {
        self.discovery_stops.load(Ordering::Relaxed)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::Relaxed)
    }

    pub fn committed_routes(&self) -> Vec<RouteEntry> {
        self.committed.lock().unwrap().clone()
    }

    pub fn registered_t3t(&self) -> Vec<Bytes> {
        self.t3t.lock().unwrap().clone()
    }

    pub fn is_discovery_running(&self) -> bool {
        self.discovery_running.load(Ordering::Relaxed)
    }
}

/// Driver task consuming the command channel against a [`MockState`].
pub struct MockController;

impl MockController {
    /// Spawn the mock driver. Returns the host-side handle, the event
    /// receiver to feed the host's event pump, and the scene state.
    pub fn spawn() -> (HalHandle, mpsc::UnboundedReceiver<HalEvent>, Arc<MockState>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (handle, cmd_rx) = HalHandle::channel();
        let state = Arc::new(MockState::new(event_tx));
        tokio::spawn(run(state.clone(), cmd_rx));
        (handle, event_rx, state)
    }
}

async fn run(state: Arc<MockState>, mut cmd_rx: mpsc::Receiver<HalCommand>) {
    while let Some(command) = cmd_rx.recv().await {
        handle_command(&state, command);
    }
    tracing::debug!("mock controller command channel closed");
}

fn handle_command(state: &MockState, command: HalCommand) {
    match command {
        HalCommand::Initialize { reply } => {
            let caps = state.capabilities.lock().unwrap().clone();
            let _ = reply.send(Ok(caps));
        }
        HalCommand::Deinitialize { reply } => {
            state.discovery_running.store(false, Ordering::Relaxed);
            let _ = reply.send(());
        }
        HalCommand::CheckFirmware { reply } => {
            let _ = reply.send(true);
        }
        HalCommand::FactoryReset { reply } => {
            state.committed.lock().unwrap().clear();
            state.t3t.lock().unwrap().clear();
            let _ = reply.send(());
        }
        HalCommand::Shutdown { reply } => {
            state.discovery_running.store(false, Ordering::Relaxed);
            let _ = reply.send(());
        }

        HalCommand::SetDiscovery { reply, .. } => {
            state.discovery_running.store(true, Ordering::Relaxed);
            state.discovery_starts.fetch_add(1, Ordering::Relaxed);
            let _ = reply.send(Ok(()));
        }
        HalCommand::StopDiscovery { reply } => {
            if state.discovery_running.swap(false, Ordering::Relaxed) {
                state.discovery_stops.fetch_add(1, Ordering::Relaxed);
            }
            let _ = reply.send(());
        }
        HalCommand::SetScreenState { reply, .. } => {
            let _ = reply.send(());
        }
        HalCommand::SetPolling { reply, .. } => {
            let _ = reply.send(());
        }

        HalCommand::Activate { handle, technology, reply } => {
            let result = if state.fail_activate.load(Ordering::Relaxed) {
                Err(STATUS_REJECTED)
            } else {
                match state.tags.lock().unwrap().get(&handle) {
                    Some(tag) if tag.present && tag.technologies.contains(technology) => Ok(()),
                    Some(_) => Err(STATUS_REJECTED),
                    None => Err(STATUS_FAILED),
                }
            };
            let _ = reply.send(result);
        }
        HalCommand::Deactivate { handle, reply } => {
            let _ = handle;
            let _ = reply.send(());
        }
        HalCommand::Transceive { handle, payload, reply, .. } => {
            let response = match state.tags.lock().unwrap().get_mut(&handle) {
                Some(tag) if tag.present => match tag.responses.pop_front() {
                    Some(scripted) => (TransceiveStatus::Success, scripted),
                    None => (TransceiveStatus::Success, payload),
                },
                _ => (TransceiveStatus::TagLost, Bytes::new()),
            };
            let _ = reply.send(response);
        }
        HalCommand::PresenceProbe { handle, reply } => {
            let present = state
                .tags
                .lock()
                .unwrap()
                .get(&handle)
                .map(|tag| tag.present)
                .unwrap_or(false);
            let _ = reply.send(present);
        }

        HalCommand::NdefDetect { handle, reply } => {
            let result = match state.tags.lock().unwrap().get(&handle) {
                Some(tag) if tag.present && (tag.formatted || tag.ndef.is_some()) => Ok(NdefInfo {
                    max_size: 4096,
                    current_size: tag.ndef.as_ref().map(|m| m.len() as u32).unwrap_or(0),
                    mode: if tag.read_only { NdefMode::ReadOnly } else { NdefMode::ReadWrite },
                }),
                _ => Err(STATUS_FAILED),
            };
            let _ = reply.send(result);
        }
        HalCommand::NdefRead { handle, reply } => {
            let result = match state.tags.lock().unwrap().get(&handle) {
                Some(tag) if tag.present => tag.ndef.clone().ok_or(STATUS_FAILED),
                _ => Err(STATUS_FAILED),
            };
            let _ = reply.send(result);
        }
        HalCommand::NdefWrite { handle, data, reply } => {
            let result = match state.tags.lock().unwrap().get_mut(&handle) {
                Some(tag) if tag.present && !tag.read_only => {
                    tag.ndef = Some(data);
                    Ok(())
                }
                _ => Err(STATUS_REJECTED),
            };
            let _ = reply.send(result);
        }
        HalCommand::NdefFormat { handle, reply, .. } => {
            let result = match state.tags.lock().unwrap().get_mut(&handle) {
                Some(tag) if tag.present => {
                    tag.formatted = true;
                    Ok(())
                }
                _ => Err(STATUS_REJECTED),
            };
            let _ = reply.send(result);
        }
        HalCommand::NdefMakeReadOnly { handle, reply } => {
            let result = match state.tags.lock().unwrap().get_mut(&handle) {
                Some(tag) if tag.present => {
                    tag.read_only = true;
                    Ok(())
                }
                _ => Err(STATUS_REJECTED),
            };
            let _ = reply.send(result);
        }

        HalCommand::PeerConnect { handle, reply } => {
            let result = match state.peers.lock().unwrap().get(&handle) {
                Some(peer) if peer.present => Ok(()),
                _ => Err(STATUS_REJECTED),
            };
            let _ = reply.send(result);
        }
        HalCommand::PeerDisconnect { handle, reply } => {
            let _ = handle;
            let _ = reply.send(());
        }
        HalCommand::PeerSend { handle, reply, .. } => {
            let result = match state.peers.lock().unwrap().get(&handle) {
                Some(peer) if peer.present => Ok(()),
                _ => Err(STATUS_REJECTED),
            };
            let _ = reply.send(result);
        }
        HalCommand::PeerReceive { handle, reply } => {
            let result = match state.peers.lock().unwrap().get_mut(&handle) {
                Some(peer) if peer.present => peer.inbound.pop_front().ok_or(STATUS_FAILED),
                _ => Err(STATUS_REJECTED),
            };
            let _ = reply.send(result);
        }

        HalCommand::CommitRouting { entries, reply } => {
            let result = if state.fail_commit.load(Ordering::Relaxed) {
                Err(STATUS_REJECTED)
            } else {
                *state.committed.lock().unwrap() = entries;
                state.commits.fetch_add(1, Ordering::Relaxed);
                Ok(())
            };
            let _ = reply.send(result);
        }
        HalCommand::RegisterT3t { id, reply } => {
            state.t3t.lock().unwrap().push(id);
            let _ = reply.send(Ok(()));
        }
        HalCommand::DeregisterT3t { id, reply } => {
            state.t3t.lock().unwrap().retain(|existing| existing != &id);
            let _ = reply.send(());
        }
        HalCommand::ClearT3t { reply } => {
            state.t3t.lock().unwrap().clear();
            let _ = reply.send(());
        }

        HalCommand::SetObserveMode { enable, reply } => {
            let supported = state.capabilities.lock().unwrap().observe_mode_supported;
            if supported {
                state.observe_enabled.store(enable, Ordering::Relaxed);
            }
            let _ = reply.send(supported);
        }
        HalCommand::SetPowerSaving { reply, .. } => {
            let _ = reply.send(true);
        }
        HalCommand::SetNfceePowerAndLink { reply, .. } => {
            let _ = reply.send(());
        }
        HalCommand::SetNfcSecure { reply, .. } => {
            let _ = reply.send(true);
        }

        HalCommand::VendorCommand { payload, reply, .. } => {
            let response = state
                .vendor_response
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(VendorResponse { status: 0, payload });
            let _ = reply.send(response);
        }
        HalCommand::SendRawFrame { reply, .. } => {
            let _ = reply.send(Ok(()));
        }
    }
}
