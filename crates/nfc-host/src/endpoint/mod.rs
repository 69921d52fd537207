//! Endpoint records for discovered tags and peers.

pub mod arena;
pub mod peer;
pub mod tag;

pub use arena::{Endpoint, EndpointArena};
