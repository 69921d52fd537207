//! Single-listener event notification.
//!
//! Hardware events enter a bounded ordered queue and a dedicated
//! dispatch task hands them to the registered listener, so a slow
//! listener can never stall the hardware event pump. Delivery order
//! matches hardware order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use nfc_core::event::PollingFrame;
use nfc_core::tech::Technology;

use crate::endpoint::peer::PeerEndpoint;
use crate::endpoint::tag::TagEndpoint;

/// Event fan-out to the application layer.
#[derive(Clone)]
pub enum HostEvent {
    TagDiscovered(Arc<TagEndpoint>),
    PeerDiscovered(Arc<PeerEndpoint>),
    HostCardEmulationActivated { technology: Technology },
    HostCardEmulationData { technology: Technology, data: Bytes },
    HostCardEmulationDeactivated { technology: Technology },
    FieldActivated,
    FieldDeactivated,
    TransactionReceived { aid: Vec<u8>, data: Bytes, ee_name: String },
    EeUpdated,
    HwError,
    PollingFrames(Vec<PollingFrame>),
    WlcStopped { end_condition: u8 },
    Vendor { gid: u8, oid: u8, payload: Bytes },
}

pub trait NfcEventListener: Send + Sync {
    fn on_event(&self, event: HostEvent);
}

type ListenerSlot = Arc<RwLock<Option<Arc<dyn NfcEventListener>>>>;

/// Producer half handed to the event pump. Never blocks.
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<HostEvent>,
    vendor_enabled: Arc<AtomicBool>,
}

impl EventPublisher {
    pub fn publish(&self, event: HostEvent) {
        if let HostEvent::Vendor { gid, oid, .. } = &event {
            if !self.vendor_enabled.load(Ordering::Relaxed) {
                tracing::trace!(gid, oid, "vendor event suppressed");
                return;
            }
        }
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("event queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("event dispatch stopped, dropping event");
            }
        }
    }

    pub fn set_vendor_enabled(&self, enabled: bool) {
        self.vendor_enabled.store(enabled, Ordering::Relaxed);
    }
}

/// Bounded queue plus dispatch task feeding the single listener.
pub struct EventNotifier {
    publisher: EventPublisher,
    listener: ListenerSlot,
    dispatch: JoinHandle<()>,
}

impl EventNotifier {
    pub fn new(queue_depth: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<HostEvent>(queue_depth.max(1));
        let listener: ListenerSlot = Arc::new(RwLock::new(None));
        let dispatch_listener = listener.clone();
        let dispatch = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let current = dispatch_listener.read().unwrap().clone();
                match current {
                    Some(listener) => listener.on_event(event),
                    None => tracing::trace!("no listener registered, event dropped"),
                }
            }
        });
        Self {
            publisher: EventPublisher { tx, vendor_enabled: Arc::new(AtomicBool::new(false)) },
            listener,
            dispatch,
        }
    }

    pub fn publisher(&self) -> EventPublisher {
        self.publisher.clone()
    }

    pub fn set_listener(&self, listener: Arc<dyn NfcEventListener>) {
        *self.listener.write().unwrap() = Some(listener);
    }

    pub fn clear_listener(&self) {
        *self.listener.write().unwrap() = None;
    }

    pub fn set_vendor_enabled(&self, enabled: bool) {
        self.publisher.set_vendor_enabled(enabled);
    }
}

impl Drop for EventNotifier {
    fn drop(&mut self) {
        self.dispatch.abort();
    }
}
