//! nfc-host — controller-facing NFC abstraction layer.
//!
//! Sits between application logic and the native controller driver:
//! discovery and routing control, tag/peer endpoint state machines,
//! presence tracking, and ordered event notification, all independent
//! of which driver backs the [`nfc_hal::HalHandle`].

pub mod controller;
pub mod discovery;
pub mod dump;
pub mod endpoint;
pub mod events;
pub mod routing;

pub use controller::NfcController;
pub use discovery::DiscoveryController;
pub use endpoint::peer::{PeerEndpoint, PeerState};
pub use endpoint::tag::{TagDisconnectedCallback, TagEndpoint, TagState};
pub use events::{HostEvent, NfcEventListener};
pub use routing::RoutingManager;
