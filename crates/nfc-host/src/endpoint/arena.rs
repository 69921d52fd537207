//! Handle-keyed registry of live endpoints.
//!
//! Discovery inserts, disconnect/presence-loss/deinitialize retire.
//! The arena is the single source of truth for the re-discovery
//! suppression rule: a handle whose endpoint is still connected is
//! never reported to the listener again.

use std::sync::Arc;

use dashmap::DashMap;

use nfc_hal::Handle;

use super::peer::{PeerEndpoint, PeerState};
use super::tag::{TagEndpoint, TagState};

#[derive(Clone)]
pub enum Endpoint {
    Tag(Arc<TagEndpoint>),
    Peer(Arc<PeerEndpoint>),
}

impl Endpoint {
    pub fn is_connected(&self) -> bool {
        match self {
            Endpoint::Tag(tag) => {
                matches!(tag.state(), TagState::Connected | TagState::Connecting)
            }
            Endpoint::Peer(peer) => peer.state() == PeerState::Connected,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Endpoint::Tag(tag) => format!(
                "tag handle={} state={} uid={} techs=[{}]",
                tag.handle(),
                tag.state(),
                hex::encode_upper(tag.uid()),
                tag.tech_list(),
            ),
            Endpoint::Peer(peer) => format!(
                "peer handle={} state={:?} mode={:?}",
                peer.handle(),
                peer.state(),
                peer.mode(),
            ),
        }
    }
}

#[derive(Default)]
pub struct EndpointArena {
    entries: DashMap<Handle, Endpoint>,
}

impl EndpointArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: Handle, endpoint: Endpoint) {
        self.entries.insert(handle, endpoint);
    }

    pub fn get(&self, handle: Handle) -> Option<Endpoint> {
        self.entries.get(&handle).map(|e| e.value().clone())
    }

    pub fn tag(&self, handle: Handle) -> Option<Arc<TagEndpoint>> {
        match self.get(handle) {
            Some(Endpoint::Tag(tag)) => Some(tag),
            _ => None,
        }
    }

    pub fn is_connected(&self, handle: Handle) -> bool {
        self.entries.get(&handle).map(|e| e.is_connected()).unwrap_or(false)
    }

    pub fn retire(&self, handle: Handle) -> Option<Endpoint> {
        self.entries.remove(&handle).map(|(_, endpoint)| endpoint)
    }

    pub fn retire_all(&self) -> Vec<Endpoint> {
        let handles: Vec<Handle> = self.entries.iter().map(|e| *e.key()).collect();
        handles.into_iter().filter_map(|h| self.retire(h)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<(Handle, Endpoint)> {
        let mut entries: Vec<(Handle, Endpoint)> =
            self.entries.iter().map(|e| (*e.key(), e.value().clone())).collect();
        entries.sort_by_key(|(handle, _)| *handle);
        entries
    }
}
