//! The controller facade.
//!
//! One `NfcController` owns the whole host-side state: discovery and
//! routing managers, the endpoint arena, the event notifier, and the
//! hardware event pump. Applications talk to this type and to the
//! endpoints it hands out; nothing else touches the driver handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use nfc_core::config::{HostConfig, Timeouts};
use nfc_core::discovery::DiscoveryParameters;
use nfc_core::event::VendorResponse;
use nfc_core::routing::RoutingTable;
use nfc_core::tech::{TechMask, Technology};
use nfc_core::{NfcError, Result};
use nfc_hal::{DiscoveredBody, HalCapabilities, HalEvent, HalHandle, Handle};

use crate::discovery::DiscoveryController;
use crate::endpoint::arena::{Endpoint, EndpointArena};
use crate::endpoint::peer::PeerEndpoint;
use crate::endpoint::tag::TagEndpoint;
use crate::events::{EventNotifier, EventPublisher, HostEvent, NfcEventListener};
use crate::routing::RoutingManager;

pub struct NfcController {
    hal: HalHandle,
    discovery: DiscoveryController,
    routing: RoutingManager,
    arena: Arc<EndpointArena>,
    notifier: EventNotifier,
    timeouts: Arc<RwLock<Timeouts>>,

    capabilities: Mutex<Option<HalCapabilities>>,
    initialized: AtomicBool,
    observe_enabled: AtomicBool,
    dta_mode: AtomicBool,

    presence_interval: Duration,
    reconnect_attempts: u32,

    /// Hardware event receiver, consumed when the pump first starts.
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<HalEvent>>>,
    /// Spawned on first initialize; survives deinitialize so late
    /// driver events are still drained.
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl NfcController {
    pub fn new(
        hal: HalHandle,
        events: mpsc::UnboundedReceiver<HalEvent>,
        config: HostConfig,
    ) -> Self {
        let rf_lock = Arc::new(tokio::sync::Mutex::new(()));
        Self {
            discovery: DiscoveryController::new(hal.clone(), rf_lock.clone()),
            routing: RoutingManager::new(hal.clone(), rf_lock),
            arena: Arc::new(EndpointArena::new()),
            notifier: EventNotifier::new(config.events.queue_depth),
            timeouts: Arc::new(RwLock::new(Timeouts::new(config.timeouts.clone()))),
            capabilities: Mutex::new(None),
            initialized: AtomicBool::new(false),
            observe_enabled: AtomicBool::new(false),
            dta_mode: AtomicBool::new(config.dta_mode),
            presence_interval: Duration::from_millis(config.presence.check_interval_ms),
            reconnect_attempts: config.presence.reconnect_attempts,
            event_rx: Mutex::new(Some(events)),
            pump: Mutex::new(None),
            hal,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn require_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(NfcError::NotInitialized)
        }
    }

    fn caps(&self) -> Result<HalCapabilities> {
        self.require_initialized()?;
        self.capabilities.lock().unwrap().clone().ok_or(NfcError::NotInitialized)
    }

    /// Bring the controller up. Idempotent; a repeated call while
    /// initialized succeeds without touching hardware.
    pub async fn initialize(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let caps = self.hal.initialize().await?;
        tracing::info!(
            nci = format!("0x{:02x}", caps.nci_version),
            firmware = %caps.firmware_version,
            aid_table = caps.aid_table_size,
            "controller initialized"
        );
        self.routing.set_capacity(caps.aid_table_size, caps.lf_t3t_max);
        *self.capabilities.lock().unwrap() = Some(caps);
        self.spawn_pump();
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Tear the controller down. Idempotent, and a no-op success when
    /// initialization never happened or already failed.
    pub async fn deinitialize(&self) -> Result<()> {
        if !self.is_initialized() {
            return Ok(());
        }
        self.discovery.disable_discovery().await?;
        for endpoint in self.arena.retire_all() {
            match endpoint {
                Endpoint::Tag(tag) => {
                    let _ = tag.disconnect().await;
                }
                Endpoint::Peer(peer) => {
                    let _ = peer.disconnect().await;
                }
            }
        }
        self.hal.deinitialize().await?;
        self.initialized.store(false, Ordering::Release);
        *self.capabilities.lock().unwrap() = None;
        tracing::info!("controller deinitialized");
        Ok(())
    }

    /// Firmware download check. Only legal before `initialize`.
    pub async fn check_firmware(&self) -> Result<bool> {
        if self.is_initialized() {
            return Err(NfcError::Lifecycle("firmware check requires a deinitialized controller"));
        }
        self.hal.check_firmware().await
    }

    pub async fn factory_reset(&self) -> Result<()> {
        self.hal.factory_reset().await?;
        self.routing.reset_tables();
        tracing::warn!("factory reset performed");
        Ok(())
    }

    /// Prepare the controller for host power-off.
    pub async fn shutdown(&self) -> Result<()> {
        self.hal.shutdown().await
    }

    /// Unrecoverable-state escape hatch. Logs, dumps what it can, and
    /// terminates the process without unwinding.
    pub fn abort(&self, reason: &str) -> ! {
        tracing::error!(reason, "aborting on unrecoverable controller state");
        let mut stderr = std::io::stderr();
        let _ = self.dump(&mut stderr);
        std::process::abort()
    }

    // ── Capabilities ──────────────────────────────────────────────────────────

    pub fn is_observe_mode_supported(&self) -> Result<bool> {
        Ok(self.caps()?.observe_mode_supported)
    }

    pub fn get_max_routing_table_size(&self) -> Result<usize> {
        Ok(self.caps()?.max_routing_table_size)
    }

    pub fn get_aid_table_size(&self) -> Result<usize> {
        Ok(self.caps()?.aid_table_size)
    }

    pub fn get_lf_t3t_max(&self) -> Result<usize> {
        Ok(self.caps()?.lf_t3t_max)
    }

    pub fn get_nci_version(&self) -> Result<u8> {
        Ok(self.caps()?.nci_version)
    }

    pub fn get_extended_length_apdus_supported(&self) -> Result<bool> {
        Ok(self.caps()?.extended_apdu_supported)
    }

    pub fn is_multi_tag_supported(&self) -> Result<bool> {
        Ok(self.caps()?.multi_tag_supported)
    }

    pub fn get_max_transceive_length(&self, technology: Technology) -> Result<usize> {
        let caps = self.caps()?;
        Ok(match technology {
            Technology::IsoDep => caps.max_transceive_len_iso_dep,
            _ => caps.max_transceive_len_default,
        })
    }

    /// Pure technology property, valid in any lifecycle state.
    pub fn can_make_read_only(&self, technology: Technology) -> bool {
        technology.can_make_read_only()
    }

    // ── Timeouts ──────────────────────────────────────────────────────────────

    pub fn set_transceive_timeout(&self, technology: Technology, ms: u64) {
        self.timeouts.write().unwrap().set(technology, ms);
    }

    pub fn get_transceive_timeout(&self, technology: Technology) -> u64 {
        self.timeouts.read().unwrap().get(technology)
    }

    pub fn reset_timeouts(&self) {
        self.timeouts.write().unwrap().reset();
    }

    // ── Modes ─────────────────────────────────────────────────────────────────

    /// Returns true when the controller accepted the change. Always
    /// false on hardware without observe-mode support.
    pub async fn set_observe_mode(&self, enable: bool) -> Result<bool> {
        if !self.caps()?.observe_mode_supported {
            return Ok(false);
        }
        let accepted = self.hal.set_observe_mode(enable).await?;
        if accepted {
            self.observe_enabled.store(enable, Ordering::Relaxed);
        }
        Ok(accepted)
    }

    pub fn is_observe_mode_enabled(&self) -> bool {
        self.observe_enabled.load(Ordering::Relaxed)
    }

    pub async fn set_power_saving_mode(&self, enable: bool) -> Result<bool> {
        self.require_initialized()?;
        self.hal.set_power_saving(enable).await
    }

    pub async fn set_nfcee_power_and_link_ctrl(&self, enable: bool) -> Result<()> {
        self.require_initialized()?;
        self.hal.set_nfcee_power_and_link(enable).await
    }

    pub async fn set_nfc_secure(&self, enable: bool) -> Result<bool> {
        self.require_initialized()?;
        self.hal.set_nfc_secure(enable).await
    }

    /// Conformance-test mode is a host-side flag; the controller keeps
    /// running normally but protocol shortcuts are disabled elsewhere.
    pub fn enable_dta_mode(&self) {
        self.dta_mode.store(true, Ordering::Relaxed);
        tracing::info!("DTA mode enabled");
    }

    pub fn disable_dta_mode(&self) {
        self.dta_mode.store(false, Ordering::Relaxed);
        tracing::info!("DTA mode disabled");
    }

    pub fn is_dta_mode(&self) -> bool {
        self.dta_mode.load(Ordering::Relaxed)
    }

    // ── Raw access ────────────────────────────────────────────────────────────

    pub async fn send_raw_frame(&self, data: &[u8]) -> Result<()> {
        self.require_initialized()?;
        self.hal.send_raw_frame(Bytes::copy_from_slice(data)).await
    }

    /// Forward a proprietary NCI command. Header fields are validated
    /// host-side so malformed requests never reach the controller.
    pub async fn send_raw_vendor_cmd(
        &self,
        mt: u8,
        gid: u8,
        oid: u8,
        payload: &[u8],
    ) -> Result<VendorResponse> {
        self.require_initialized()?;
        if mt > 0x07 {
            return Err(NfcError::VendorCommand(format!("message type out of range: 0x{mt:02x}")));
        }
        if gid > 0x0f {
            return Err(NfcError::VendorCommand(format!("gid out of range: 0x{gid:02x}")));
        }
        if oid > 0x3f {
            return Err(NfcError::VendorCommand(format!("oid out of range: 0x{oid:02x}")));
        }
        self.hal.vendor_command(mt, gid, oid, Bytes::copy_from_slice(payload)).await
    }

    pub fn enable_vendor_nci_notifications(&self, enable: bool) {
        self.notifier.set_vendor_enabled(enable);
    }

    // ── Listener ──────────────────────────────────────────────────────────────

    pub fn set_listener(&self, listener: Arc<dyn NfcEventListener>) {
        self.notifier.set_listener(listener);
    }

    pub fn clear_listener(&self) {
        self.notifier.clear_listener();
    }

    // ── Discovery ─────────────────────────────────────────────────────────────

    pub async fn enable_discovery(
        &self,
        params: DiscoveryParameters,
        restart: bool,
    ) -> Result<()> {
        self.require_initialized()?;
        self.discovery.enable_discovery(params, restart).await
    }

    pub async fn disable_discovery(&self) -> Result<()> {
        self.require_initialized()?;
        self.discovery.disable_discovery().await
    }

    pub async fn set_discovery_tech(&self, poll: TechMask, listen: TechMask) -> Result<()> {
        self.require_initialized()?;
        self.discovery.set_discovery_tech(poll, listen).await
    }

    pub async fn reset_discovery_tech(&self) -> Result<()> {
        self.require_initialized()?;
        self.discovery.reset_discovery_tech().await
    }

    pub async fn set_screen_state(&self, mask: u8, always_poll: bool) -> Result<()> {
        self.require_initialized()?;
        self.discovery.set_screen_state(mask, always_poll).await
    }

    pub async fn start_stop_polling(&self, enable: bool) -> Result<()> {
        self.require_initialized()?;
        self.discovery.start_stop_polling(enable).await
    }

    // ── Routing ───────────────────────────────────────────────────────────────

    pub fn route_aid(&self, aid: &[u8], route: u8, aid_info: u8, power: u8) -> Result<()> {
        self.require_initialized()?;
        self.routing.route_aid(aid, route, aid_info, power)
    }

    pub fn unroute_aid(&self, aid: &[u8]) -> Result<()> {
        self.require_initialized()?;
        self.routing.unroute_aid(aid);
        Ok(())
    }

    pub fn set_iso_dep_protocol_route(&self, route: u8) -> Result<()> {
        self.require_initialized()?;
        self.routing.set_iso_dep_protocol_route(route);
        Ok(())
    }

    pub fn set_technology_ab_route(&self, route: u8) -> Result<()> {
        self.require_initialized()?;
        self.routing.set_technology_ab_route(route);
        Ok(())
    }

    pub fn clear_routing_entry(&self, flags: u8) -> Result<()> {
        self.require_initialized()?;
        self.routing.clear_routing_entry(flags);
        Ok(())
    }

    pub async fn commit_routing(&self) -> Result<()> {
        self.require_initialized()?;
        self.routing.commit_routing().await
    }

    pub fn get_routing_table(&self) -> Result<RoutingTable> {
        self.require_initialized()?;
        Ok(self.routing.get_routing_table())
    }

    pub async fn register_t3t_identifier(&self, id: &[u8]) -> Result<()> {
        self.require_initialized()?;
        self.routing.register_t3t_identifier(id).await
    }

    pub async fn deregister_t3t_identifier(&self, id: &[u8]) -> Result<()> {
        self.require_initialized()?;
        self.routing.deregister_t3t_identifier(id).await
    }

    pub async fn clear_t3t_identifiers_cache(&self) -> Result<()> {
        self.require_initialized()?;
        self.routing.clear_t3t_identifiers_cache().await
    }

    pub fn t3t_identifier_count(&self) -> usize {
        self.routing.t3t_count()
    }

    // ── Endpoints ─────────────────────────────────────────────────────────────

    pub fn tag_endpoint(&self, handle: Handle) -> Option<Arc<TagEndpoint>> {
        self.arena.tag(handle)
    }

    pub fn endpoint(&self, handle: Handle) -> Option<Endpoint> {
        self.arena.get(handle)
    }

    /// Configured default delay between background presence probes.
    pub fn presence_check_interval(&self) -> Duration {
        self.presence_interval
    }

    // ── Diagnostics ───────────────────────────────────────────────────────────

    pub fn dump(&self, w: &mut dyn std::io::Write) -> std::io::Result<()> {
        crate::dump::write_snapshot(
            w,
            self.is_initialized(),
            &self.discovery.snapshot(),
            &self.routing.get_routing_table(),
            self.routing.t3t_count(),
            &self.arena.snapshot(),
        )
    }

    // ── Event pump ────────────────────────────────────────────────────────────

    fn spawn_pump(&self) {
        let mut slot = self.pump.lock().unwrap();
        if slot.is_some() {
            return;
        }
        let rx = match self.event_rx.lock().unwrap().take() {
            Some(rx) => rx,
            None => return,
        };
        *slot = Some(tokio::spawn(pump(
            rx,
            self.hal.clone(),
            self.arena.clone(),
            self.notifier.publisher(),
            self.timeouts.clone(),
            self.reconnect_attempts,
        )));
    }
}

impl Drop for NfcController {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().unwrap().take() {
            pump.abort();
        }
    }
}

/// Drains the driver event channel, maintains the arena, and feeds the
/// notifier queue. Runs until the driver side closes the channel.
async fn pump(
    mut rx: mpsc::UnboundedReceiver<HalEvent>,
    hal: HalHandle,
    arena: Arc<EndpointArena>,
    publisher: EventPublisher,
    timeouts: Arc<RwLock<Timeouts>>,
    reconnect_attempts: u32,
) {
    while let Some(event) = rx.recv().await {
        match event {
            HalEvent::EndpointDiscovered { handle, body } => {
                // a controller may re-report a tag the host is still
                // talking to; that must not reach the listener again
                if arena.is_connected(handle) {
                    tracing::trace!(handle, "re-discovery of connected endpoint suppressed");
                    continue;
                }
                match body {
                    DiscoveredBody::Tag { technologies, uid, tech_extras } => {
                        let tag = Arc::new(TagEndpoint::new(
                            hal.clone(),
                            handle,
                            technologies,
                            uid,
                            tech_extras,
                            timeouts.clone(),
                            reconnect_attempts,
                        ));
                        arena.insert(handle, Endpoint::Tag(tag.clone()));
                        tracing::debug!(handle, uid = hex::encode_upper(tag.uid()), "tag discovered");
                        publisher.publish(HostEvent::TagDiscovered(tag));
                    }
                    DiscoveredBody::Peer { mode, general_bytes } => {
                        let io_timeout =
                            Duration::from_millis(timeouts.read().unwrap().default_ms());
                        let peer = Arc::new(PeerEndpoint::new(
                            hal.clone(),
                            handle,
                            mode,
                            general_bytes,
                            io_timeout,
                        ));
                        arena.insert(handle, Endpoint::Peer(peer.clone()));
                        tracing::debug!(handle, ?mode, "peer discovered");
                        publisher.publish(HostEvent::PeerDiscovered(peer));
                    }
                }
            }
            HalEvent::EndpointLost { handle } => {
                if let Some(Endpoint::Tag(tag)) = arena.retire(handle) {
                    tag.mark_presence_lost();
                    tag.stop_presence_checking().await;
                }
                tracing::debug!(handle, "endpoint lost");
            }
            HalEvent::FieldActivated => publisher.publish(HostEvent::FieldActivated),
            HalEvent::FieldDeactivated => publisher.publish(HostEvent::FieldDeactivated),
            HalEvent::HceActivated { technology } => {
                publisher.publish(HostEvent::HostCardEmulationActivated { technology })
            }
            HalEvent::HceData { technology, data } => {
                publisher.publish(HostEvent::HostCardEmulationData { technology, data })
            }
            HalEvent::HceDeactivated { technology } => {
                publisher.publish(HostEvent::HostCardEmulationDeactivated { technology })
            }
            HalEvent::Transaction { aid, data, ee_name } => {
                publisher.publish(HostEvent::TransactionReceived { aid, data, ee_name })
            }
            HalEvent::EeUpdated => publisher.publish(HostEvent::EeUpdated),
            HalEvent::HwError => {
                tracing::error!("controller reported a hardware error");
                publisher.publish(HostEvent::HwError);
            }
            HalEvent::PollingFrames(frames) => {
                publisher.publish(HostEvent::PollingFrames(frames))
            }
            HalEvent::WlcStopped { end_condition } => {
                publisher.publish(HostEvent::WlcStopped { end_condition })
            }
            HalEvent::Vendor { gid, oid, payload } => {
                publisher.publish(HostEvent::Vendor { gid, oid, payload })
            }
        }
    }
    tracing::debug!("driver event channel closed, event pump exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfc_hal::mock::MockController;
    use std::time::Duration;

    fn controller() -> (NfcController, Arc<nfc_hal::mock::MockState>) {
        let (hal, events, state) = MockController::spawn();
        (NfcController::new(hal, events, HostConfig::default()), state)
    }

    #[tokio::test]
    async fn initialize_is_idempotent_and_exposes_capabilities() {
        let (controller, _mock) = controller();
        assert!(matches!(
            controller.get_nci_version(),
            Err(NfcError::NotInitialized)
        ));

        controller.initialize().await.unwrap();
        controller.initialize().await.unwrap();
        assert_eq!(controller.get_nci_version().unwrap(), 0x20);
        assert_eq!(controller.get_aid_table_size().unwrap(), 50);
        assert!(controller.is_observe_mode_supported().unwrap());
    }

    #[tokio::test]
    async fn check_firmware_only_before_initialize() {
        let (controller, _mock) = controller();
        assert!(controller.check_firmware().await.unwrap());

        controller.initialize().await.unwrap();
        assert!(matches!(
            controller.check_firmware().await,
            Err(NfcError::Lifecycle(_))
        ));

        controller.deinitialize().await.unwrap();
        controller.deinitialize().await.unwrap();
        assert!(controller.check_firmware().await.unwrap());
    }

    #[tokio::test]
    async fn discovered_tag_lands_in_arena() {
        let (controller, mock) = controller();
        controller.initialize().await.unwrap();

        let handle = mock.discover_tag(&[0x04, 0xa1], &[Technology::NfcA]);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let tag = controller.tag_endpoint(handle).expect("tag in arena");
        assert_eq!(&tag.uid()[..], &[0x04, 0xa1]);
    }

    #[tokio::test]
    async fn rediscovery_of_connected_tag_is_suppressed() {
        let (controller, mock) = controller();
        controller.initialize().await.unwrap();

        let handle = mock.discover_tag(&[0x04], &[Technology::NfcA]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let tag = controller.tag_endpoint(handle).unwrap();
        tag.connect(Technology::NfcA).await.unwrap();

        mock.rediscover_tag(handle);
        tokio::time::sleep(Duration::from_millis(20)).await;

        // arena still holds the connected endpoint, not a fresh one
        let same = controller.tag_endpoint(handle).unwrap();
        assert!(Arc::ptr_eq(&tag, &same));
    }

    #[tokio::test]
    async fn endpoint_lost_retires_from_arena() {
        let (controller, mock) = controller();
        controller.initialize().await.unwrap();

        let handle = mock.discover_tag(&[0x04], &[Technology::NfcA]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(controller.tag_endpoint(handle).is_some());

        mock.lose_tag(handle);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(controller.tag_endpoint(handle).is_none());
    }

    #[tokio::test]
    async fn deinitialize_tears_down_peer_links() {
        use crate::endpoint::peer::PeerState;
        use nfc_core::tech::PeerMode;

        let (controller, mock) = controller();
        controller.initialize().await.unwrap();

        let handle = mock.discover_peer(PeerMode::Initiator, &[0x46, 0x66, 0x6d]);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let peer = match controller.endpoint(handle) {
            Some(Endpoint::Peer(peer)) => peer,
            _ => panic!("expected a peer endpoint in the arena"),
        };
        peer.connect().await.unwrap();

        controller.deinitialize().await.unwrap();
        assert_eq!(peer.state(), PeerState::Idle);
        assert!(controller.endpoint(handle).is_none());
    }

    #[tokio::test]
    async fn vendor_command_header_validation() {
        let (controller, _mock) = controller();
        controller.initialize().await.unwrap();

        assert!(matches!(
            controller.send_raw_vendor_cmd(0x08, 0x0f, 0x00, &[]).await,
            Err(NfcError::VendorCommand(_))
        ));
        assert!(matches!(
            controller.send_raw_vendor_cmd(0x01, 0x10, 0x00, &[]).await,
            Err(NfcError::VendorCommand(_))
        ));
        assert!(matches!(
            controller.send_raw_vendor_cmd(0x01, 0x0f, 0x40, &[]).await,
            Err(NfcError::VendorCommand(_))
        ));

        let response = controller.send_raw_vendor_cmd(0x01, 0x0f, 0x3f, &[0xaa]).await.unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn observe_mode_tracks_controller_acceptance() {
        let (controller, _mock) = controller();
        controller.initialize().await.unwrap();
        assert!(!controller.is_observe_mode_enabled());

        assert!(controller.set_observe_mode(true).await.unwrap());
        assert!(controller.is_observe_mode_enabled());

        assert!(controller.set_observe_mode(false).await.unwrap());
        assert!(!controller.is_observe_mode_enabled());
    }

    #[tokio::test]
    async fn timeout_overrides_apply_and_reset() {
        let (controller, _mock) = controller();
        assert_eq!(controller.get_transceive_timeout(Technology::NfcA), 500);
        controller.set_transceive_timeout(Technology::NfcA, 1200);
        assert_eq!(controller.get_transceive_timeout(Technology::NfcA), 1200);
        controller.reset_timeouts();
        assert_eq!(controller.get_transceive_timeout(Technology::NfcA), 500);
    }
}
