//! Listen-mode routing table model.
//!
//! The table itself is a plain ordered collection; the staged/committed
//! duality lives in the routing manager. At most one entry exists per
//! selector — a later `route_aid` for an existing AID replaces its
//! entry in place.

use serde::{Deserialize, Serialize};

/// Clear-flag bits for selective table clears.
pub const CLEAR_AID_ENTRIES: u8 = 0x01;
pub const CLEAR_PROTOCOL_ENTRIES: u8 = 0x02;
pub const CLEAR_TECHNOLOGY_ENTRIES: u8 = 0x04;
pub const CLEAR_ALL: u8 = CLEAR_AID_ENTRIES | CLEAR_PROTOCOL_ENTRIES | CLEAR_TECHNOLOGY_ENTRIES;

/// What a route entry matches on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteSelector {
    /// Application identifier pattern (exact or prefix bytes).
    Aid(Vec<u8>),
    /// Protocol-level default route for ISO-DEP.
    IsoDepProtocol,
    /// Technology-level default route for NFC-A/B.
    TechnologyAb,
}

/// One listen-mode routing rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub selector: RouteSelector,
    /// Destination: 0 = device host, otherwise an execution environment id.
    pub route: u8,
    /// AID routing info flags (prefix/subset matching etc). Zero for
    /// protocol and technology selectors.
    pub aid_info: u8,
    /// Power state mask under which this route is active.
    pub power: u8,
}

impl std::fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.selector {
            RouteSelector::Aid(aid) => write!(
                f,
                "aid={} -> route=0x{:02x} info=0x{:02x} power=0x{:02x}",
                hex::encode_upper(aid),
                self.route,
                self.aid_info,
                self.power
            ),
            RouteSelector::IsoDepProtocol => {
                write!(f, "proto=ISO-DEP -> route=0x{:02x} power=0x{:02x}", self.route, self.power)
            }
            RouteSelector::TechnologyAb => {
                write!(f, "tech=A/B -> route=0x{:02x} power=0x{:02x}", self.route, self.power)
            }
        }
    }
}

/// Ordered collection of route entries, unique per selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    entries: Vec<RouteEntry>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, replacing any existing entry with the same
    /// selector in place (preserving its position in the order).
    pub fn upsert(&mut self, entry: RouteEntry) {
        match self.entries.iter_mut().find(|e| e.selector == entry.selector) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Remove the entry for an AID. No-op if absent.
    pub fn remove_aid(&mut self, aid: &[u8]) {
        self.entries
            .retain(|e| !matches!(&e.selector, RouteSelector::Aid(a) if a.as_slice() == aid));
    }

    pub fn aid_entry(&self, aid: &[u8]) -> Option<&RouteEntry> {
        self.entries
            .iter()
            .find(|e| matches!(&e.selector, RouteSelector::Aid(a) if a.as_slice() == aid))
    }

    /// Selectively clear entry classes per the clear-flag bitmask.
    pub fn clear(&mut self, flags: u8) {
        self.entries.retain(|e| {
            let cleared = match e.selector {
                RouteSelector::Aid(_) => flags & CLEAR_AID_ENTRIES != 0,
                RouteSelector::IsoDepProtocol => flags & CLEAR_PROTOCOL_ENTRIES != 0,
                RouteSelector::TechnologyAb => flags & CLEAR_TECHNOLOGY_ENTRIES != 0,
            };
            !cleared
        });
    }

    pub fn aid_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.selector, RouteSelector::Aid(_)))
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }
}
