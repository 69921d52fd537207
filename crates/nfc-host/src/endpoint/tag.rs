//! Tag endpoint state machine and data exchange.
//!
//! One `TagEndpoint` represents one physically present passive tag.
//! All RF access to the tag goes through a per-endpoint transport
//! mutex, so an application transceive and a background presence probe
//! can never hit the controller simultaneously for the same endpoint;
//! the probe yields by skipping its iteration when the transport is
//! busy.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use nfc_core::config::Timeouts;
use nfc_core::ndef::{NdefCache, NdefInfo, NdefMessage};
use nfc_core::tech::{TechSet, Technology};
use nfc_core::{NfcError, Result, TransceiveStatus};
use nfc_hal::{HalHandle, Handle};

/// Invoked at most once when background presence checking observes the
/// tag leaving the field.
pub trait TagDisconnectedCallback: Send + Sync {
    fn on_tag_disconnected(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagState {
    Disconnected,
    Connecting,
    Connected,
    PresenceLost,
    Disconnecting,
}

impl std::fmt::Display for TagState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::PresenceLost => "PRESENCE_LOST",
            Self::Disconnecting => "DISCONNECTING",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Link {
    state: TagState,
    technology: Option<Technology>,
}

pub struct TagEndpoint {
    handle: Handle,
    hal: HalHandle,
    uid: Bytes,
    tech_extras: Vec<(Technology, Bytes)>,
    technologies: Mutex<TechSet>,
    link: Mutex<Link>,
    ndef: Mutex<NdefCache>,
    /// Exclusive access to the RF exchange path for this endpoint.
    transport: tokio::sync::Mutex<()>,
    /// Flips to true while a disconnect is tearing the link down;
    /// cancels any in-flight exchange.
    closing: watch::Sender<bool>,
    presence: Mutex<Option<JoinHandle<()>>>,
    timeouts: Arc<RwLock<Timeouts>>,
    reconnect_attempts: u32,
}

impl TagEndpoint {
    pub fn new(
        hal: HalHandle,
        handle: Handle,
        technologies: TechSet,
        uid: Bytes,
        tech_extras: Vec<(Technology, Bytes)>,
        timeouts: Arc<RwLock<Timeouts>>,
        reconnect_attempts: u32,
    ) -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            handle,
            hal,
            uid,
            tech_extras,
            technologies: Mutex::new(technologies),
            link: Mutex::new(Link { state: TagState::Disconnected, technology: None }),
            ndef: Mutex::new(NdefCache::default()),
            transport: tokio::sync::Mutex::new(()),
            closing,
            presence: Mutex::new(None),
            timeouts,
            reconnect_attempts,
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn uid(&self) -> &Bytes {
        &self.uid
    }

    pub fn tech_list(&self) -> TechSet {
        self.technologies.lock().unwrap().clone()
    }

    pub fn tech_extras(&self) -> &[(Technology, Bytes)] {
        &self.tech_extras
    }

    pub fn remove_technology(&self, tech: Technology) {
        self.technologies.lock().unwrap().remove(tech);
    }

    pub fn state(&self) -> TagState {
        self.link.lock().unwrap().state
    }

    /// Defined only while connected.
    pub fn connected_technology(&self) -> Option<Technology> {
        let link = self.link.lock().unwrap();
        match link.state {
            TagState::Connected => link.technology,
            _ => None,
        }
    }

    fn require_connected(&self) -> Result<Technology> {
        let link = self.link.lock().unwrap();
        match (link.state, link.technology) {
            (TagState::Connected, Some(technology)) => Ok(technology),
            (TagState::PresenceLost, _) => Err(NfcError::TagLost),
            _ => Err(NfcError::connection("endpoint is not connected")),
        }
    }

    pub(crate) fn mark_presence_lost(&self) {
        let mut link = self.link.lock().unwrap();
        if link.state == TagState::Connected {
            link.state = TagState::PresenceLost;
            tracing::debug!(handle = self.handle, "tag presence lost");
        }
    }

    // ── Connection ────────────────────────────────────────────────────────────

    /// Establish the RF link on one of the endpoint's technologies.
    /// Valid only from `DISCONNECTED`.
    pub async fn connect(&self, technology: Technology) -> Result<()> {
        {
            let mut link = self.link.lock().unwrap();
            if link.state != TagState::Disconnected {
                return Err(NfcError::connection(format!(
                    "connect in state {}",
                    link.state
                )));
            }
            if !self.technologies.lock().unwrap().contains(technology) {
                return Err(NfcError::connection(format!(
                    "technology {technology} not supported by endpoint"
                )));
            }
            link.state = TagState::Connecting;
        }

        match self.hal.activate(self.handle, technology).await {
            Ok(()) => {
                let mut link = self.link.lock().unwrap();
                // a disconnect may have raced the activation; it wins
                if link.state != TagState::Connecting {
                    return Err(NfcError::connection("activation superseded by disconnect"));
                }
                link.state = TagState::Connected;
                link.technology = Some(technology);
                self.closing.send_replace(false);
                tracing::debug!(handle = self.handle, %technology, "tag connected");
                Ok(())
            }
            Err(err) => {
                let mut link = self.link.lock().unwrap();
                if link.state == TagState::Connecting {
                    link.state = TagState::Disconnected;
                }
                Err(err)
            }
        }
    }

    /// Re-establish the link on the currently connected technology.
    /// Valid only from `CONNECTED`; repeated failure drops the
    /// endpoint to `DISCONNECTED`.
    pub async fn reconnect(&self) -> Result<()> {
        let technology = self.require_connected()?;
        let _io = self.transport.lock().await;

        let attempts = self.reconnect_attempts.max(1);
        for attempt in 1..=attempts {
            match self.hal.activate(self.handle, technology).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::debug!(handle = self.handle, attempt, error = %err, "reconnect attempt failed");
                }
            }
        }

        let mut link = self.link.lock().unwrap();
        link.state = TagState::Disconnected;
        link.technology = None;
        Err(NfcError::connection("reconnect failed"))
    }

    /// Tear the link down. Valid from any state and idempotent; cancels
    /// any in-flight exchange or presence probe before returning.
    pub async fn disconnect(&self) -> Result<()> {
        {
            let mut link = self.link.lock().unwrap();
            if link.state == TagState::Disconnected {
                return Ok(());
            }
            link.state = TagState::Disconnecting;
        }

        self.stop_presence_checking().await;
        self.closing.send_replace(true);
        // wait for an in-flight exchange to observe the cancel and
        // release the transport
        let _io = self.transport.lock().await;
        let _ = self.hal.deactivate(self.handle).await;

        let mut link = self.link.lock().unwrap();
        link.state = TagState::Disconnected;
        link.technology = None;
        tracing::debug!(handle = self.handle, "tag disconnected");
        Ok(())
    }

    // ── Presence ──────────────────────────────────────────────────────────────

    /// Cheap state probe; true while the link is up and the tag has not
    /// been observed leaving the field.
    pub fn is_present(&self) -> bool {
        self.state() == TagState::Connected
    }

    /// Issue a hardware liveness probe. Returns false (and moves the
    /// endpoint to `PRESENCE_LOST`) if the tag is gone.
    pub async fn presence_check(&self) -> Result<bool> {
        if self.state() != TagState::Connected {
            return Ok(false);
        }
        let _io = self.transport.lock().await;
        let present = self.hal.presence_probe(self.handle).await?;
        if !present {
            self.mark_presence_lost();
        }
        Ok(present)
    }

    /// Begin periodic background presence probing. On the first
    /// negative probe the callback fires exactly once and probing
    /// stops. A probe finding the transport busy with an application
    /// exchange treats the tag as live for that iteration.
    pub fn start_presence_checking(
        self: &Arc<Self>,
        delay: Duration,
        callback: Arc<dyn TagDisconnectedCallback>,
    ) {
        let mut slot = self.presence.lock().unwrap();
        if slot.is_some() {
            return;
        }
        let endpoint = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(delay);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // first tick is immediate
            loop {
                ticker.tick().await;
                if endpoint.state() != TagState::Connected {
                    break;
                }
                let present = match endpoint.transport.try_lock() {
                    Ok(_io) => endpoint.hal.presence_probe(endpoint.handle).await.unwrap_or(false),
                    Err(_) => continue,
                };
                if !present {
                    endpoint.mark_presence_lost();
                    callback.on_tag_disconnected();
                    break;
                }
            }
        }));
    }

    /// Stop background probing. Idempotent; once this returns, no
    /// further callback invocation happens for this endpoint.
    pub async fn stop_presence_checking(&self) {
        let task = self.presence.lock().unwrap().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }

    // ── Data exchange ─────────────────────────────────────────────────────────

    /// Exchange one frame with the tag. Valid only while connected;
    /// blocks until the controller responds or the per-technology
    /// timeout elapses. The status travels out-of-band from the
    /// payload, so an empty successful response is distinguishable
    /// from a failure.
    pub async fn transceive(&self, data: &[u8], raw: bool) -> Result<(TransceiveStatus, Bytes)> {
        let technology = self.require_connected()?;
        let timeout_ms = self.timeouts.read().unwrap().get(technology);
        let mut closing = self.closing.subscribe();
        let _io = self.transport.lock().await;
        if *closing.borrow() {
            return Err(NfcError::connection("endpoint is disconnecting"));
        }

        tokio::select! {
            result = self.hal.transceive(
                self.handle,
                Bytes::copy_from_slice(data),
                raw,
                Duration::from_millis(timeout_ms),
            ) => {
                let (status, payload) = result?;
                if status == TransceiveStatus::TagLost {
                    self.mark_presence_lost();
                }
                Ok((status, payload))
            }
            _ = closing.changed() => Err(NfcError::connection("exchange cancelled by disconnect")),
        }
    }

    // ── NDEF ──────────────────────────────────────────────────────────────────

    /// Detect NDEF content and report its size/mode, without reading.
    pub async fn check_ndef(&self) -> Result<Option<NdefInfo>> {
        self.require_connected()?;
        let _io = self.transport.lock().await;
        Ok(self.hal.ndef_detect(self.handle).await?.ok())
    }

    /// Detection only — used when a conformance run must skip the read.
    /// Never touches the NDEF cache.
    pub async fn find_ndef(&self) -> Result<bool> {
        self.require_connected()?;
        let _io = self.transport.lock().await;
        Ok(self.hal.ndef_detect(self.handle).await?.is_ok())
    }

    /// Read the current NDEF message and populate the cache.
    pub async fn read_ndef(&self) -> Result<NdefMessage> {
        self.require_connected()?;
        let _io = self.transport.lock().await;
        match self.hal.ndef_read(self.handle).await? {
            Ok(data) => {
                let message = NdefMessage(data);
                let mut cache = self.ndef.lock().unwrap();
                cache.message = Some(message.clone());
                cache.formatted = true;
                Ok(message)
            }
            Err(status) => Err(NfcError::connection(format!("NDEF read failed: 0x{status:02x}"))),
        }
    }

    /// Detection followed by read as one unit, under a single transport
    /// hold. Returns `None` when the tag carries no NDEF content.
    pub async fn find_and_read_ndef(&self) -> Result<Option<NdefMessage>> {
        self.require_connected()?;
        let _io = self.transport.lock().await;
        if self.hal.ndef_detect(self.handle).await?.is_err() {
            return Ok(None);
        }
        match self.hal.ndef_read(self.handle).await? {
            Ok(data) => {
                let message = NdefMessage(data);
                let mut cache = self.ndef.lock().unwrap();
                cache.message = Some(message.clone());
                cache.formatted = true;
                Ok(Some(message))
            }
            Err(status) => Err(NfcError::connection(format!("NDEF read failed: 0x{status:02x}"))),
        }
    }

    /// Cached message from the last explicit read. Detection alone does
    /// not populate this.
    pub fn get_ndef(&self) -> Option<NdefMessage> {
        self.ndef.lock().unwrap().message.clone()
    }

    /// Write an NDEF message. Destructive.
    pub async fn write_ndef(&self, data: &[u8]) -> Result<()> {
        self.require_connected()?;
        let _io = self.transport.lock().await;
        match self.hal.ndef_write(self.handle, Bytes::copy_from_slice(data)).await? {
            Ok(()) => {
                let mut cache = self.ndef.lock().unwrap();
                cache.message = Some(NdefMessage(Bytes::copy_from_slice(data)));
                cache.formatted = true;
                Ok(())
            }
            Err(status) => Err(NfcError::connection(format!("NDEF write failed: 0x{status:02x}"))),
        }
    }

    pub fn is_ndef_formatable(&self) -> bool {
        match self.connected_technology() {
            Some(tech) => tech.is_formattable(),
            None => self.technologies.lock().unwrap().iter().any(|t| t.is_formattable()),
        }
    }

    /// Format the tag for NDEF. Destructive and irreversible in effect.
    pub async fn format_ndef(&self, key: &[u8]) -> Result<()> {
        let technology = self.require_connected()?;
        if !technology.is_formattable() {
            return Err(NfcError::NotFormattable(technology));
        }
        let _io = self.transport.lock().await;
        match self.hal.ndef_format(self.handle, Bytes::copy_from_slice(key)).await? {
            Ok(()) => {
                self.ndef.lock().unwrap().formatted = true;
                Ok(())
            }
            Err(status) => Err(NfcError::connection(format!("NDEF format failed: 0x{status:02x}"))),
        }
    }

    /// Permanently lock the NDEF content.
    pub async fn make_read_only(&self) -> Result<()> {
        let technology = self.require_connected()?;
        if !technology.can_make_read_only() {
            return Err(NfcError::NotFormattable(technology));
        }
        let _io = self.transport.lock().await;
        match self.hal.ndef_make_read_only(self.handle).await? {
            Ok(()) => Ok(()),
            Err(status) => {
                Err(NfcError::connection(format!("make read-only failed: 0x{status:02x}")))
            }
        }
    }
}
