//! Listen-mode routing table management.
//!
//! Mutations apply to a staging copy; `commit_routing` pushes the
//! staged table to the controller atomically and only then does it
//! become visible through `get_routing_table`. A rejected commit rolls
//! the staging copy back to the last committed table, so no partial
//! commit is ever observable.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use nfc_core::routing::{RouteEntry, RouteSelector, RoutingTable};
use nfc_core::{NfcError, Result};
use nfc_hal::HalHandle;

struct Tables {
    staged: RoutingTable,
    committed: RoutingTable,
}

pub struct RoutingManager {
    hal: HalHandle,
    rf_lock: Arc<tokio::sync::Mutex<()>>,
    tables: Mutex<Tables>,
    /// Discovered from hardware at initialize; zero means unknown (no
    /// bound enforced yet).
    aid_table_size: AtomicUsize,
    lf_t3t_max: AtomicUsize,
    t3t_ids: Mutex<Vec<Bytes>>,
}

impl RoutingManager {
    pub fn new(hal: HalHandle, rf_lock: Arc<tokio::sync::Mutex<()>>) -> Self {
        Self {
            hal,
            rf_lock,
            tables: Mutex::new(Tables {
                staged: RoutingTable::new(),
                committed: RoutingTable::new(),
            }),
            aid_table_size: AtomicUsize::new(0),
            lf_t3t_max: AtomicUsize::new(0),
            t3t_ids: Mutex::new(Vec::new()),
        }
    }

    pub fn set_capacity(&self, aid_table_size: usize, lf_t3t_max: usize) {
        self.aid_table_size.store(aid_table_size, Ordering::Relaxed);
        self.lf_t3t_max.store(lf_t3t_max, Ordering::Relaxed);
    }

    // ── Table edits (staging only) ────────────────────────────────────────────

    /// Insert or replace the route for an AID.
    pub fn route_aid(&self, aid: &[u8], route: u8, aid_info: u8, power: u8) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let max = self.aid_table_size.load(Ordering::Relaxed);
        let replacing = tables.staged.aid_entry(aid).is_some();
        if !replacing && max != 0 && tables.staged.aid_count() >= max {
            return Err(NfcError::Capacity { used: tables.staged.aid_count(), max });
        }
        tables.staged.upsert(RouteEntry {
            selector: RouteSelector::Aid(aid.to_vec()),
            route,
            aid_info,
            power,
        });
        tracing::debug!(aid = hex::encode_upper(aid), route, replacing, "aid route staged");
        Ok(())
    }

    /// Remove the entry for an AID. No-op when absent.
    pub fn unroute_aid(&self, aid: &[u8]) {
        self.tables.lock().unwrap().staged.remove_aid(aid);
        tracing::debug!(aid = hex::encode_upper(aid), "aid route removed from staging");
    }

    pub fn set_iso_dep_protocol_route(&self, route: u8) {
        self.tables.lock().unwrap().staged.upsert(RouteEntry {
            selector: RouteSelector::IsoDepProtocol,
            route,
            aid_info: 0,
            power: 0x01,
        });
    }

    pub fn set_technology_ab_route(&self, route: u8) {
        self.tables.lock().unwrap().staged.upsert(RouteEntry {
            selector: RouteSelector::TechnologyAb,
            route,
            aid_info: 0,
            power: 0x01,
        });
    }

    /// Selectively clear staged entry classes per the clear-flag mask.
    pub fn clear_routing_entry(&self, flags: u8) {
        self.tables.lock().unwrap().staged.clear(flags);
        tracing::debug!(flags = format!("0x{flags:02x}"), "staged routing entries cleared");
    }

    /// Last successfully committed table; staged edits are invisible
    /// here until `commit_routing` succeeds.
    pub fn get_routing_table(&self) -> RoutingTable {
        self.tables.lock().unwrap().committed.clone()
    }

    pub(crate) fn staged_len(&self) -> usize {
        self.tables.lock().unwrap().staged.len()
    }

    // ── Commit ────────────────────────────────────────────────────────────────

    /// Push the staged table to the controller. Serializes with other
    /// commits and with discovery changes via the shared rf lock; a
    /// second concurrent commit waits and then observes this commit's
    /// result as its baseline.
    pub async fn commit_routing(&self) -> Result<()> {
        let _rf = self.rf_lock.lock().await;

        let snapshot = self.tables.lock().unwrap().staged.clone();
        match self.hal.commit_routing(snapshot.entries().to_vec()).await? {
            Ok(()) => {
                let mut tables = self.tables.lock().unwrap();
                tables.committed = snapshot;
                tracing::info!(entries = tables.committed.len(), "routing table committed");
                Ok(())
            }
            Err(status) => {
                let mut tables = self.tables.lock().unwrap();
                tables.staged = tables.committed.clone();
                tracing::warn!(
                    status = format!("0x{status:02x}"),
                    "routing commit rejected, staged table rolled back"
                );
                Err(NfcError::Commit)
            }
        }
    }

    /// Drop both tables, as after a factory reset.
    pub fn reset_tables(&self) {
        let mut tables = self.tables.lock().unwrap();
        tables.staged = RoutingTable::new();
        tables.committed = RoutingTable::new();
        self.t3t_ids.lock().unwrap().clear();
    }

    // ── T3T identifier cache ──────────────────────────────────────────────────

    pub async fn register_t3t_identifier(&self, id: &[u8]) -> Result<()> {
        {
            let ids = self.t3t_ids.lock().unwrap();
            let max = self.lf_t3t_max.load(Ordering::Relaxed);
            if ids.iter().any(|existing| existing.as_ref() == id) {
                return Ok(());
            }
            if max != 0 && ids.len() >= max {
                return Err(NfcError::Capacity { used: ids.len(), max });
            }
        }
        self.hal
            .register_t3t(Bytes::copy_from_slice(id))
            .await?
            .map_err(|status| NfcError::connection(format!("t3t registration failed: 0x{status:02x}")))?;
        self.t3t_ids.lock().unwrap().push(Bytes::copy_from_slice(id));
        Ok(())
    }

    pub async fn deregister_t3t_identifier(&self, id: &[u8]) -> Result<()> {
        self.hal.deregister_t3t(Bytes::copy_from_slice(id)).await?;
        self.t3t_ids.lock().unwrap().retain(|existing| existing.as_ref() != id);
        Ok(())
    }

    pub async fn clear_t3t_identifiers_cache(&self) -> Result<()> {
        self.hal.clear_t3t().await?;
        self.t3t_ids.lock().unwrap().clear();
        Ok(())
    }

    pub fn t3t_count(&self) -> usize {
        self.t3t_ids.lock().unwrap().len()
    }
}
