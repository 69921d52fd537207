//! End-to-end tests for the host controller layer.
//!
//! Every scenario runs against the in-memory mock driver, exercising
//! the public surface the way an embedding platform would: construct a
//! controller, register a listener, script the scene through
//! [`MockState`], and observe events and endpoint behavior.
//!
//!   cargo test --test integration
//!
//! [`MockState`]: nfc_hal::mock::MockState

mod discovery_flow;
mod lifecycle;
mod routing_flow;
mod tag_flow;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use nfc_core::config::HostConfig;
use nfc_hal::mock::{MockController, MockState};
use nfc_host::{HostEvent, NfcController, NfcEventListener};

// ── Harness ───────────────────────────────────────────────────────────────────

fn init_tracing() {
    use std::sync::Once;
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Forwards listener callbacks into a channel the test can await on.
struct ChannelListener {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl NfcEventListener for ChannelListener {
    fn on_event(&self, event: HostEvent) {
        let _ = self.tx.send(event);
    }
}

/// An initialized controller with a listener wired up, plus the mock
/// scene and the captured event stream.
pub async fn controller_up() -> (
    NfcController,
    Arc<MockState>,
    mpsc::UnboundedReceiver<HostEvent>,
) {
    init_tracing();
    let (hal, events, state) = MockController::spawn();
    let controller = NfcController::new(hal, events, HostConfig::default());
    controller.initialize().await.expect("initialize");

    let (tx, rx) = mpsc::unbounded_channel();
    controller.set_listener(Arc::new(ChannelListener { tx }));
    (controller, state, rx)
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<HostEvent>) -> HostEvent {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

/// True when no event arrives within the grace window. Used to assert
/// suppression rules.
pub async fn no_event_within(rx: &mut mpsc::UnboundedReceiver<HostEvent>, window: Duration) -> bool {
    tokio::time::timeout(window, rx.recv()).await.is_err()
}
