//! nfc-core — shared types for the NFC controller abstraction layer.
//! All other crates in this workspace depend on this one.

pub mod config;
pub mod discovery;
pub mod error;
pub mod event;
pub mod ndef;
pub mod routing;
pub mod tech;

pub use discovery::DiscoveryParameters;
pub use error::{NfcError, Result, TransceiveStatus};
pub use event::{PollingFrame, VendorResponse};
pub use routing::{RouteEntry, RouteSelector, RoutingTable};
pub use tech::{PeerMode, TechSet, Technology};
